//! Doctor - Dependency checking

use anyhow::Result;
use serde::Serialize;

use crate::backends::process::ExternalTool;
use crate::backends::select::select_tool;
use crate::core::model::ScanOptions;
use crate::core::render::{Render, RenderConfig, Renderer};
use crate::core::util::find_executable;

/// Dependency status
#[derive(Debug, Clone, Serialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub required: bool,
    /// Serves scans run with default options
    pub selected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Render for DependencyStatus {
    const HEADING: &'static str = "Dependencies";

    fn raw_line(&self) -> String {
        let status = if self.available { "✓" } else { "✗" };
        let required = if self.required {
            "required"
        } else {
            "optional"
        };

        let mut line = format!(
            "{} {} ({}) - {}",
            status,
            self.name,
            required,
            self.command
                .as_ref()
                .map(|c| format!("found: {}", c))
                .unwrap_or_else(|| "not found".to_string())
        );
        if self.selected {
            line.push_str(" [selected]");
        }
        if let Some(notes) = &self.notes {
            line.push_str(&format!("\n  Note: {}", notes));
        }
        line
    }

    fn markdown_line(&self) -> String {
        self.raw_line().replace('\n', "\n ")
    }
}

fn tool_status(tool: ExternalTool, selected: Option<ExternalTool>, notes: &str) -> DependencyStatus {
    let found = tool.locate();
    DependencyStatus {
        name: tool.backend().to_string(),
        available: found.is_some(),
        command: found.map(|p| p.display().to_string()),
        required: false,
        selected: selected == Some(tool),
        notes: Some(notes.to_string()),
    }
}

/// Check all dependencies
pub fn check_dependencies() -> Vec<DependencyStatus> {
    let selected = select_tool(&ScanOptions::default()).map(|(tool, _)| tool);

    let git = find_executable("git");
    vec![
        tool_status(
            ExternalTool::Fd,
            selected,
            "Install: apt install fd-find / brew install fd / cargo install fd-find",
        ),
        tool_status(
            ExternalTool::Rg,
            selected,
            "Install: apt install ripgrep / brew install ripgrep / cargo install ripgrep",
        ),
        DependencyStatus {
            name: "walker".to_string(),
            available: true,
            command: None,
            required: true,
            selected: selected.is_none(),
            notes: Some("Built-in fallback, used when fd and rg are unavailable".to_string()),
        },
        DependencyStatus {
            name: "git".to_string(),
            available: git.is_some(),
            command: git.map(|p| p.display().to_string()),
            required: false,
            selected: false,
            notes: Some("Needed for status tracking".to_string()),
        },
    ]
}

/// Run the doctor command
pub fn run_doctor(config: RenderConfig) -> Result<()> {
    let deps = check_dependencies();
    let renderer = Renderer::with_config(config);
    println!("{}", renderer.render(&deps));
    Ok(())
}
