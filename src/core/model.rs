//! Scan and status data model
//!
//! Every backend maps what it discovers onto [`DiscoveredItem`], and every
//! status source maps raw codes onto [`StatusKind`], before anything is handed
//! to callers or renderers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::error::TrawlError;
use crate::core::paths::{absolutize, file_name_lossy};

/// Options for a single scan. Immutable once the scan starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Include entries whose name starts with '.'
    #[serde(default)]
    pub show_hidden: bool,

    /// Follow symlinks and classify them by their target
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Honour .gitignore / .ignore files
    #[serde(default = "default_true")]
    pub respect_ignore: bool,

    /// Allow the fd backend
    #[serde(default = "default_true")]
    pub use_fd: bool,

    /// Allow the `rg --files` backend
    #[serde(default = "default_true")]
    pub use_rg: bool,

    /// Name patterns to exclude (exact names, or globs when they contain metacharacters)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Maximum depth below each root; root children are depth 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,

    /// Preload git status for every root when the scan starts
    #[serde(default)]
    pub track_status: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            show_hidden: false,
            follow_symlinks: false,
            respect_ignore: true,
            use_fd: true,
            use_rg: true,
            exclude: Vec::new(),
            max_depth: None,
            track_status: false,
        }
    }
}

impl ScanOptions {
    /// Options that only allow the native walker
    #[allow(dead_code)]
    pub fn walker_only() -> Self {
        Self {
            use_fd: false,
            use_rg: false,
            ..Self::default()
        }
    }

    /// Whether an entry at `depth` may be emitted
    pub fn emits_at(&self, depth: usize) -> bool {
        self.max_depth.map_or(true, |max| depth <= max)
    }

    /// Whether a directory at `depth` may be expanded
    pub fn expands_at(&self, depth: usize) -> bool {
        self.max_depth.map_or(true, |max| depth < max)
    }
}

/// A validated, absolute directory to scan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanRoot(PathBuf);

impl ScanRoot {
    /// Validate `path` as a scan root. Relative paths are resolved against the
    /// current directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TrawlError> {
        let path = absolutize(path.as_ref())?;
        let metadata = std::fs::metadata(&path).map_err(|_| TrawlError::InvalidRoot(path.clone()))?;
        if !metadata.is_dir() {
            return Err(TrawlError::NotADirectory(path));
        }
        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ScanRoot {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// The kind of a discovered entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Dir,
    Symlink,
}

/// Metadata for an item. The scanner never fills this in; consumers do it
/// lazily when they need it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Modification time in milliseconds since epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime_ms: Option<i64>,

    /// File size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Unix permission bits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

impl Meta {
    pub fn is_empty(&self) -> bool {
        self.mtime_ms.is_none() && self.size.is_none() && self.mode.is_none()
    }
}

/// A single entry produced by a scan backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredItem {
    /// Absolute path
    pub path: PathBuf,

    /// Basename
    pub name: String,

    pub kind: ItemKind,

    #[serde(default, skip_serializing_if = "Meta::is_empty")]
    pub meta: Meta,

    /// Git status, attached by consumers that track it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusKind>,
}

impl DiscoveredItem {
    pub fn new(path: PathBuf, kind: ItemKind) -> Self {
        let name = file_name_lossy(&path);
        Self {
            path,
            name,
            kind,
            meta: Meta::default(),
            status: None,
        }
    }

    /// Build a file item from a path relative to `root`
    pub fn file_under(root: &Path, relative: &str) -> Self {
        Self::new(root.join(relative), ItemKind::File)
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn with_status(mut self, status: Option<StatusKind>) -> Self {
        self.status = status;
        self
    }
}

/// Normalized git status of a path.
///
/// When several raw codes apply to one path the kind with the highest
/// [`priority`](StatusKind::priority) wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Untracked,
    Ignored,
    Modified,
    Staged,
    Deleted,
    Added,
    Renamed,
    Copied,
    Unmerged,
    Unknown,
}

impl StatusKind {
    pub fn priority(self) -> u8 {
        match self {
            StatusKind::Unmerged => 30,
            StatusKind::Staged => 25,
            StatusKind::Deleted => 20,
            StatusKind::Modified => 15,
            StatusKind::Added | StatusKind::Renamed | StatusKind::Copied => 10,
            StatusKind::Untracked => 5,
            StatusKind::Ignored => 1,
            StatusKind::Unknown => 0,
        }
    }

    /// Pick the higher-priority kind; ties keep `self`
    pub fn max_priority(self, other: StatusKind) -> StatusKind {
        if other.priority() > self.priority() {
            other
        } else {
            self
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Untracked => "untracked",
            StatusKind::Ignored => "ignored",
            StatusKind::Modified => "modified",
            StatusKind::Staged => "staged",
            StatusKind::Deleted => "deleted",
            StatusKind::Added => "added",
            StatusKind::Renamed => "renamed",
            StatusKind::Copied => "copied",
            StatusKind::Unmerged => "unmerged",
            StatusKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
