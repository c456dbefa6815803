//! CLI module - Command-line interface definitions and handlers

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backends::select::build_scanner;
use crate::core::error::TrawlError;
use crate::core::model::{DiscoveredItem, ScanOptions, ScanRoot};
use crate::core::paths::absolutize;
use crate::core::render::{OutputFormat, Render, RenderConfig, Renderer};
use crate::core::util::stat_meta;
use crate::status::{RepoEntry, StatusCache};

/// trawl - stream file listings fast, with git status on the side.
#[derive(Parser, Debug)]
#[command(name = "trawl")]
#[command(
    author,
    version,
    about,
    long_about = r#"trawl lists files under one or more roots using the fastest tool available
(fd, then rg --files, then a built-in walker) and can annotate each file with
its git status.

Output formats:
- jsonl: one JSON object per line, streamed as files are found
- json: a single JSON array
- md: human-friendly Markdown
- raw: one path per line, streamed

Examples:
    trawl scan
    trawl scan src tests --max-depth 3 --exclude target
    trawl scan --status --format md
    trawl status src/main.rs README.md
    trawl watch .
"#
)]
pub struct Cli {
    /// Output format (jsonl/json/md/raw).
    #[arg(
        long,
        global = true,
        default_value = "jsonl",
        value_name = "FORMAT",
        long_help = "Select the output format.\n\n\
Supported values:\n\
- jsonl (default)\n\
- json\n\
- md (markdown)\n\
- raw\n\n\
Tip: jsonl and raw stream as files are discovered; json and md wait for the scan to finish."
    )]
    pub format: String,

    /// Quiet mode (minimal output).
    #[arg(
        short,
        long,
        global = true,
        long_help = "Reduce non-essential output. Only errors are logged, and progress notes\n\
on stderr are suppressed. Results are still printed to stdout."
    )]
    pub quiet: bool,

    /// Verbose mode (more diagnostics).
    #[arg(
        short,
        long,
        global = true,
        long_help = "Log debug diagnostics to stderr: backend choice, spawn failures,\n\
skipped directories, git runs. RUST_LOG overrides this."
    )]
    pub verbose: bool,

    /// Pretty-print JSON/JSONL output with indentation.
    #[arg(
        long,
        global = true,
        long_help = "Pretty-print JSON and JSONL output with indentation for human readability.\n\n\
Has no effect on md/raw formats."
    )]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List files under one or more roots.
    #[command(
        long_about = "List files under each ROOT (default: the current directory) and emit one\n\
record per file with its absolute path.\n\n\
The backend is chosen once per run: fd if installed, otherwise rg --files, otherwise\n\
the built-in walker. Use --no-fd / --no-rg to skip a tool.\n\n\
Examples:\n\
  trawl scan\n\
  trawl scan src --hidden --max-depth 2\n\
  trawl scan --no-fd --no-rg --exclude '*.log'\n\
  trawl scan --status --limit 100\n"
    )]
    Scan {
        /// Directories to scan.
        #[arg(value_name = "ROOT", default_value = ".")]
        roots: Vec<PathBuf>,

        /// Include hidden files/directories (dotfiles).
        #[arg(
            long,
            long_help = "Include hidden files and directories (dotfiles).\n\n\
By default, hidden entries are skipped."
        )]
        hidden: bool,

        /// Follow symbolic links.
        #[arg(
            long,
            long_help = "Follow symbolic links and list what they point to. Directory loops are\n\
walked once. Without this flag the walker reports live links as symlink entries\n\
and skips dangling ones."
        )]
        follow: bool,

        /// Disable .gitignore and other ignore rules.
        #[arg(
            long,
            long_help = "Disable respect for ignore files (.gitignore, .ignore).\n\n\
Use this for a raw scan that includes all paths, even those normally ignored."
        )]
        no_ignore: bool,

        /// Never use fd.
        #[arg(long, env = "TRAWL_NO_FD")]
        no_fd: bool,

        /// Never use rg.
        #[arg(long, env = "TRAWL_NO_RG")]
        no_rg: bool,

        /// Exclude entries by name or glob (repeatable).
        #[arg(
            long,
            value_name = "PATTERN",
            long_help = "Exclude entries whose name matches PATTERN. Plain names match exactly;\n\
patterns with glob characters (*, ?, [..], {..}) are matched as globs.\n\n\
May be given more than once."
        )]
        exclude: Vec<String>,

        /// Maximum directory depth below each root.
        #[arg(
            long,
            value_name = "N",
            long_help = "Maximum depth below each root. Files directly inside a root are at\n\
depth 1.\n\n\
If omitted, scan traverses all depths."
        )]
        max_depth: Option<usize>,

        /// Annotate each file with its git status.
        #[arg(long)]
        status: bool,

        /// Fill in size, mtime and mode for each file.
        #[arg(long)]
        stat: bool,

        /// Sort output by path (waits for the scan to finish).
        #[arg(long)]
        sort: bool,

        /// Stop after N files.
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },

    /// Show the git status of paths.
    #[command(
        long_about = "Load the git status of each PATH's repository and emit one record per\n\
path. Directories report the most significant status found below them.\n\n\
Status is `clean` when git reports nothing for the path and `none` when the path\n\
is not inside a repository.\n\n\
Examples:\n\
  trawl status src/main.rs\n\
  trawl status . --format md\n"
    )]
    Status {
        /// Paths to report.
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<PathBuf>,
    },

    /// Check scan backends and git.
    #[command(
        long_about = "Report which of fd, rg and git are installed, and which backend a\n\
default scan would use.\n\n\
Example:\n\
  trawl doctor --format md\n"
    )]
    Doctor,

    /// Print a record each time a repository's status changes.
    #[command(
        long_about = "Watch the repository containing ROOT. Each time the index or HEAD\n\
changes (staging, committing, checking out) the status is reloaded and a record is\n\
printed. Runs until interrupted.\n\n\
Example:\n\
  trawl watch .\n"
    )]
    Watch {
        /// A path inside the repository to watch.
        #[arg(value_name = "ROOT", default_value = ".")]
        root: PathBuf,
    },
}

/// Status of one path, as printed by `trawl status`
#[derive(Debug, Clone, Serialize)]
pub struct PathStatus {
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<PathBuf>,
    /// A status kind, `clean`, or `none` outside a repository
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

impl Render for PathStatus {
    const HEADING: &'static str = "Status";

    fn raw_line(&self) -> String {
        format!("{}\t{}", self.status, self.path.display())
    }

    fn markdown_line(&self) -> String {
        format!("`{}` {}", self.path.display(), self.status)
    }
}

/// A status reload observed by `trawl watch`
#[derive(Debug, Clone, Serialize)]
pub struct RefreshEvent {
    pub repository: PathBuf,
    pub entries: usize,
    pub captured_at: DateTime<Utc>,
}

impl RefreshEvent {
    fn from_entry(entry: &RepoEntry) -> Self {
        Self {
            repository: entry.root.clone(),
            entries: entry.status.len(),
            captured_at: entry.captured_wall,
        }
    }
}

impl Render for RefreshEvent {
    const HEADING: &'static str = "Refreshes";

    fn raw_line(&self) -> String {
        format!(
            "{} {} ({} entries)",
            self.captured_at.to_rfc3339(),
            self.repository.display(),
            self.entries
        )
    }
}

/// Extra work the CLI does per item, on top of the scan itself
#[derive(Debug, Clone, Copy, Default)]
struct ScanOutput {
    stat: bool,
    sort: bool,
    limit: Option<usize>,
}

enum ScanEvent {
    Item(DiscoveredItem),
    Done,
}

pub async fn run(cli: Cli) -> Result<()> {
    // Parse output format
    let format: OutputFormat = cli.format.parse().unwrap_or_default();
    let render_config = RenderConfig::with_pretty(format, cli.pretty);

    match cli.command {
        Commands::Scan {
            roots,
            hidden,
            follow,
            no_ignore,
            no_fd,
            no_rg,
            exclude,
            max_depth,
            status,
            stat,
            sort,
            limit,
        } => {
            let options = ScanOptions {
                show_hidden: hidden,
                follow_symlinks: follow,
                respect_ignore: !no_ignore,
                use_fd: !no_fd,
                use_rg: !no_rg,
                exclude,
                max_depth,
                track_status: status,
            };
            let output = ScanOutput { stat, sort, limit };
            run_scan(&roots, options, output, render_config, cli.quiet).await
        }

        Commands::Status { paths } => run_status(&paths, render_config).await,

        Commands::Doctor => crate::backends::doctor::run_doctor(render_config),

        Commands::Watch { root } => run_watch(&root, render_config, cli.quiet).await,
    }
}

async fn run_scan(
    roots: &[PathBuf],
    options: ScanOptions,
    output: ScanOutput,
    config: RenderConfig,
    quiet: bool,
) -> Result<()> {
    let roots = roots
        .iter()
        .map(ScanRoot::new)
        .collect::<Result<Vec<_>, TrawlError>>()
        .context("invalid scan root")?;

    let cache = options.track_status.then(StatusCache::new);
    let scanner = build_scanner(&options, roots.clone(), cache.as_ref());
    let backend = scanner.backend();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let done_tx = tx.clone();
    let handle = scanner.start(
        Arc::new(move |item| {
            let _ = tx.send(ScanEvent::Item(item));
        }),
        Box::new(move || {
            let _ = done_tx.send(ScanEvent::Done);
        }),
    );

    // Items queue up in the channel while status loads; the preload started
    // by the selector is joined rather than repeated.
    if let Some(cache) = &cache {
        for root in &roots {
            cache.load(root.path()).await;
        }
    }

    let renderer = Renderer::with_config(config);
    let stream = renderer.format().is_streaming() && !output.sort;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut collected = Vec::new();
    let mut count = 0usize;
    let mut interrupted = false;

    loop {
        if output.limit.is_some_and(|limit| count >= limit) {
            break;
        }
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                None
            }
        };
        let item = match event {
            Some(ScanEvent::Item(item)) => item,
            Some(ScanEvent::Done) | None => break,
        };

        let item = annotate(item, output.stat, cache.as_ref());
        if stream {
            if let Some(line) = renderer.render_record(&item) {
                if !write_line(&mut out, &line)? {
                    break;
                }
            }
        } else {
            collected.push(item);
        }

        count += 1;
    }
    handle.cancel();

    if !stream {
        if output.sort {
            collected.sort_by(|a, b| a.path.cmp(&b.path));
        }
        if renderer.format().is_streaming() {
            for item in &collected {
                if let Some(line) = renderer.render_record(item) {
                    if !write_line(&mut out, &line)? {
                        break;
                    }
                }
            }
        } else {
            write_line(&mut out, &renderer.render(&collected))?;
        }
    }
    flush(&mut out)?;

    info!(%backend, items = count, interrupted, "scan finished");
    if interrupted && !quiet {
        eprintln!("# interrupted after {} items", count);
    }
    Ok(())
}

/// Fill in the per-item extras the scan itself never computes
fn annotate(item: DiscoveredItem, stat: bool, cache: Option<&StatusCache>) -> DiscoveredItem {
    let item = if stat {
        match stat_meta(&item.path) {
            Ok(meta) => item.with_meta(meta),
            Err(e) => {
                debug!(path = %item.path.display(), error = %e, "stat failed");
                item
            }
        }
    } else {
        item
    };
    match cache {
        Some(cache) => {
            let status = cache.get_status_sync(&item.path);
            item.with_status(status)
        }
        None => item,
    }
}

async fn run_status(paths: &[PathBuf], config: RenderConfig) -> Result<()> {
    let cache = StatusCache::new();
    // Each repository is refreshed once, however many of its paths are asked about
    let mut refreshed: HashMap<PathBuf, Option<Arc<RepoEntry>>> = HashMap::new();
    let mut reports = Vec::with_capacity(paths.len());

    for path in paths {
        let path = absolutize(path)
            .with_context(|| format!("failed to resolve {}", path.display()))?;
        let entry = match cache.repo_root(&path) {
            Some(root) => match refreshed.get(&root) {
                Some(entry) => entry.clone(),
                None => {
                    let entry = cache.refresh(&path).await;
                    refreshed.insert(root, entry.clone());
                    entry
                }
            },
            None => None,
        };
        let report = match entry {
            Some(entry) => PathStatus {
                status: cache
                    .get_status_sync(&path)
                    .map(|kind| kind.as_str().to_string())
                    .unwrap_or_else(|| "clean".to_string()),
                repository: Some(entry.root.clone()),
                captured_at: Some(entry.captured_wall),
                path,
            },
            None => PathStatus {
                path,
                repository: None,
                status: "none".to_string(),
                captured_at: None,
            },
        };
        reports.push(report);
    }

    let renderer = Renderer::with_config(config);
    println!("{}", renderer.render(&reports));
    Ok(())
}

async fn run_watch(root: &Path, config: RenderConfig, quiet: bool) -> Result<()> {
    let root = absolutize(root).with_context(|| format!("failed to resolve {}", root.display()))?;
    let cache = StatusCache::new();
    let entry = cache
        .load(&root)
        .await
        .ok_or_else(|| TrawlError::NoRepository(root.clone()))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    cache
        .watch(&entry.root, move |repository| {
            let _ = tx.send(repository.to_path_buf());
        })
        .context("failed to watch repository")?;

    let renderer = Renderer::with_config(config);
    if !quiet {
        eprintln!("# watching {} (Ctrl-C to stop)", entry.root.display());
    }
    print_record(&renderer, &RefreshEvent::from_entry(&entry))?;

    loop {
        let repository = tokio::select! {
            changed = rx.recv() => changed,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(repository) = repository else {
            break;
        };
        // Several events usually arrive per git command
        while rx.try_recv().is_ok() {}

        if let Some(entry) = cache.load(&repository).await {
            print_record(&renderer, &RefreshEvent::from_entry(&entry))?;
        }
    }

    if cache.unwatch(&entry.root) {
        debug!(repository = %entry.root.display(), "watch removed");
    }
    cache.shutdown();
    Ok(())
}

fn print_record<T: Render>(renderer: &Renderer, record: &T) -> Result<()> {
    let line = renderer
        .render_record(record)
        .unwrap_or_else(|| renderer.render(std::slice::from_ref(record)));
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_line(&mut out, &line)?;
    flush(&mut out)
}

/// Write one line. Returns false once the reader has gone away.
fn write_line<W: Write>(out: &mut W, line: &str) -> Result<bool> {
    match writeln!(out, "{}", line) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e).context("failed to write output"),
    }
}

fn flush<W: Write>(out: &mut W) -> Result<()> {
    match out.flush() {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e).context("failed to write output"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ItemKind, StatusKind};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_parse_scan_flags() {
        let cli = Cli::try_parse_from([
            "trawl",
            "scan",
            "src",
            "tests",
            "--hidden",
            "--exclude",
            "target",
            "--exclude",
            "*.log",
            "--max-depth",
            "3",
            "--limit",
            "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan {
                roots,
                hidden,
                exclude,
                max_depth,
                limit,
                ..
            } => {
                assert_eq!(roots, vec![PathBuf::from("src"), PathBuf::from("tests")]);
                assert!(hidden);
                assert_eq!(exclude, vec!["target", "*.log"]);
                assert_eq!(max_depth, Some(3));
                assert_eq!(limit, Some(10));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_scan_defaults_to_current_dir() {
        let cli = Cli::try_parse_from(["trawl", "scan"]).unwrap();
        match cli.command {
            Commands::Scan { roots, .. } => assert_eq!(roots, vec![PathBuf::from(".")]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_status_requires_paths() {
        assert!(Cli::try_parse_from(["trawl", "status"]).is_err());
    }

    #[test]
    fn test_annotate_stat() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, "hello").unwrap();

        let item = annotate(DiscoveredItem::new(path, ItemKind::File), true, None);
        assert_eq!(item.meta.size, Some(5));
        assert!(item.status.is_none());

        let missing = annotate(
            DiscoveredItem::new(temp.path().join("gone"), ItemKind::File),
            true,
            None,
        );
        assert!(missing.meta.is_empty());
    }

    #[test]
    fn test_path_status_render() {
        let report = PathStatus {
            path: PathBuf::from("/repo/a.rs"),
            repository: Some(PathBuf::from("/repo")),
            status: StatusKind::Modified.to_string(),
            captured_at: None,
        };
        assert_eq!(report.raw_line(), "modified\t/repo/a.rs");
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""status":"modified""#));
        assert!(!json.contains("captured_at"));
    }
}
