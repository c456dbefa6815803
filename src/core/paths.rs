//! Path helpers
//!
//! Backends emit absolute paths built from whatever the tools print; these
//! helpers keep that conversion in one place.

use std::path::{Path, PathBuf};

/// Check if a name is hidden (starts with '.')
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// Basename of a path, lossily decoded. Empty for paths without one.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Resolve `path` against the current directory when it is relative.
/// Does not touch the filesystem beyond reading the cwd.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    let joined = cwd.join(path);
    Ok(strip_cur_dir(&joined))
}

/// Remove `.` components so `/a/./b` becomes `/a/b`
fn strip_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}

/// Strip the `./` prefix some tools put in front of relative output
pub fn strip_dot_prefix(line: &str) -> &str {
    let mut rest = line;
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest
}
