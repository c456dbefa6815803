//! Common utilities

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::core::model::Meta;

/// Locate an executable in PATH
pub fn find_executable(cmd: &str) -> Option<PathBuf> {
    which::which(cmd).ok()
}

/// Stat a path and fill in the lazily-loaded item metadata
pub fn stat_meta(path: &Path) -> std::io::Result<Meta> {
    let metadata = std::fs::metadata(path)?;
    let mtime_ms = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64);

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        Some(metadata.permissions().mode())
    };
    #[cfg(not(unix))]
    let mode = None;

    Ok(Meta {
        mtime_ms,
        size: Some(metadata.len()),
        mode,
    })
}
