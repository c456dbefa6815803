//! Backend selection
//!
//! Exactly one backend serves a session: fd when allowed and installed, then
//! `rg --files`, then the native walker.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backends::process::{ExternalTool, ProcessScanner};
use crate::backends::walker::WalkScanner;
use crate::backends::Scan;
use crate::core::model::{ScanOptions, ScanRoot};
use crate::status::StatusCache;

/// The external tool that would serve `options`, if any
pub fn select_tool(options: &ScanOptions) -> Option<(ExternalTool, PathBuf)> {
    let allowed = [
        (ExternalTool::Fd, options.use_fd),
        (ExternalTool::Rg, options.use_rg),
    ];
    allowed
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .find_map(|(tool, _)| tool.locate().map(|program| (tool, program)))
}

/// Build the scanner for a session.
///
/// With `track_status` set and a cache supplied, status for every root is
/// preloaded in the background; the scan does not wait for it.
pub fn build_scanner(
    options: &ScanOptions,
    roots: Vec<ScanRoot>,
    status: Option<&StatusCache>,
) -> Box<dyn Scan> {
    if options.track_status {
        if let Some(cache) = status {
            for root in &roots {
                let path = root.path().to_path_buf();
                cache.preload(root.path(), move |entry| match entry {
                    Some(entry) => debug!(
                        root = %path.display(),
                        entries = entry.status.len(),
                        "status preloaded"
                    ),
                    None => debug!(root = %path.display(), "no repository for root"),
                });
            }
        }
    }

    let scanner: Box<dyn Scan> = match select_tool(options) {
        Some((tool, program)) => Box::new(ProcessScanner::new(tool, program, options, roots)),
        None => Box::new(WalkScanner::new(Arc::new(options.clone()), roots)),
    };
    info!(backend = %scanner.backend(), "scan backend selected");
    scanner
}
