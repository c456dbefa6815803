//! Renderer module
//!
//! Renders records to the output formats: jsonl, json, md, raw.
//! jsonl and raw can be written one record at a time as a scan streams;
//! json and md need the whole collection.

use serde::Serialize;

use crate::core::model::DiscoveredItem;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Json,
    Markdown,
    Raw,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonl" => Ok(OutputFormat::Jsonl),
            "json" => Ok(OutputFormat::Json),
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            "raw" => Ok(OutputFormat::Raw),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Whether records can be written as they arrive
    pub fn is_streaming(self) -> bool {
        matches!(self, OutputFormat::Jsonl | OutputFormat::Raw)
    }
}

/// Render configuration combining format and options
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderConfig {
    pub format: OutputFormat,
    pub pretty: bool,
}

impl RenderConfig {
    /// Create a new render config with default options
    #[allow(dead_code)]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            pretty: false,
        }
    }

    /// Create a new render config with pretty option
    pub fn with_pretty(format: OutputFormat, pretty: bool) -> Self {
        Self { format, pretty }
    }
}

/// A record that can be printed in every output format
pub trait Render: Serialize {
    /// Section heading for markdown output
    const HEADING: &'static str;

    /// Plain one-line form, used by raw output
    fn raw_line(&self) -> String;

    /// Markdown list entry, without the leading "- "
    fn markdown_line(&self) -> String {
        format!("`{}`", self.raw_line())
    }
}

impl Render for DiscoveredItem {
    const HEADING: &'static str = "Files";

    fn raw_line(&self) -> String {
        self.path.display().to_string()
    }

    fn markdown_line(&self) -> String {
        let mut line = format!("`{}`", self.path.display());
        if let Some(status) = self.status {
            line.push_str(&format!(" [{}]", status));
        }
        if let Some(size) = self.meta.size {
            line.push_str(&format!(" ({} bytes)", size));
        }
        line
    }
}

/// Renderer for record collections
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    #[allow(dead_code)]
    pub fn new(format: OutputFormat) -> Self {
        Self {
            config: RenderConfig::new(format),
        }
    }

    /// Create a new renderer with render config
    pub fn with_config(config: RenderConfig) -> Self {
        Self { config }
    }

    pub fn format(&self) -> OutputFormat {
        self.config.format
    }

    /// Render a whole collection to a string
    pub fn render<T: Render>(&self, records: &[T]) -> String {
        match self.config.format {
            OutputFormat::Jsonl => self.render_jsonl(records),
            OutputFormat::Json => self.render_json(records),
            OutputFormat::Markdown => self.render_markdown(records),
            OutputFormat::Raw => records
                .iter()
                .map(Render::raw_line)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Render one record as it arrives. `None` for formats that only render
    /// whole collections.
    pub fn render_record<T: Render>(&self, record: &T) -> Option<String> {
        match self.config.format {
            OutputFormat::Jsonl => self.to_json(record),
            OutputFormat::Raw => Some(record.raw_line()),
            OutputFormat::Json | OutputFormat::Markdown => None,
        }
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> Option<String> {
        if self.config.pretty {
            serde_json::to_string_pretty(value).ok()
        } else {
            serde_json::to_string(value).ok()
        }
    }

    /// Render as JSON Lines (one JSON object per line)
    fn render_jsonl<T: Render>(&self, records: &[T]) -> String {
        records
            .iter()
            .filter_map(|record| self.to_json(record))
            .collect::<Vec<_>>()
            .join(if self.config.pretty { "\n\n" } else { "\n" })
    }

    /// Render as a single JSON array
    fn render_json<T: Render>(&self, records: &[T]) -> String {
        self.to_json(records).unwrap_or_else(|| "[]".to_string())
    }

    /// Render as a Markdown list under the record type's heading
    fn render_markdown<T: Render>(&self, records: &[T]) -> String {
        if records.is_empty() {
            return String::new();
        }
        let mut output = format!("## {}\n\n", T::HEADING);
        for record in records {
            output.push_str("- ");
            output.push_str(&record.markdown_line());
            output.push('\n');
        }
        output
    }
}
