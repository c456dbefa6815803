//! `git status --porcelain=v1 -z` parsing
//!
//! Each record is `XY path` terminated by NUL. Rename and copy records are
//! followed by one more NUL-terminated field holding the original path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::model::StatusKind;

/// Map a two-character porcelain code to a status kind
pub fn classify(code: &str) -> StatusKind {
    match code {
        "??" => StatusKind::Untracked,
        "!!" => StatusKind::Ignored,
        "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU" => StatusKind::Unmerged,
        "M " | "T " => StatusKind::Staged,
        "MM" | "MT" | "TM" | "TT" | " M" | " T" => StatusKind::Modified,
        "D " | " D" | "MD" | "TD" | "AD" | "RD" | "CD" => StatusKind::Deleted,
        "A " | " A" | "AM" | "AT" => StatusKind::Added,
        "R " | " R" | "RM" | "RT" => StatusKind::Renamed,
        "C " | "CM" | "CT" => StatusKind::Copied,
        _ => StatusKind::Unknown,
    }
}

/// Parsed status of one repository, keyed by repository-relative paths
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedStatus {
    /// Per-path status
    pub files: HashMap<PathBuf, StatusKind>,

    /// Directory records (`?? dir/`, `!! dir/`) that cover everything below them
    pub dirs: HashMap<PathBuf, StatusKind>,
}

impl ParsedStatus {
    /// Record `kind` for `path`, keeping the higher-priority kind on conflict
    pub fn insert(&mut self, path: PathBuf, kind: StatusKind) {
        merge(&mut self.files, path, kind);
    }

    fn insert_dir(&mut self, path: PathBuf, kind: StatusKind) {
        merge(&mut self.dirs, path, kind);
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    /// Status of a repository-relative path.
    ///
    /// Checks the exact path, then the nearest covering directory record,
    /// then aggregates everything recorded below the path.
    pub fn lookup(&self, relative: &Path) -> Option<StatusKind> {
        if let Some(kind) = self.files.get(relative) {
            return Some(*kind);
        }
        if let Some(kind) = self.dirs.get(relative) {
            return Some(*kind);
        }

        let mut ancestor = relative.parent();
        while let Some(dir) = ancestor {
            if dir.as_os_str().is_empty() {
                break;
            }
            if let Some(kind) = self.dirs.get(dir) {
                return Some(*kind);
            }
            ancestor = dir.parent();
        }

        self.files
            .iter()
            .chain(self.dirs.iter())
            .filter(|(path, _)| path.starts_with(relative) && path.as_path() != relative)
            .map(|(_, kind)| *kind)
            .reduce(StatusKind::max_priority)
    }
}

fn merge(map: &mut HashMap<PathBuf, StatusKind>, path: PathBuf, kind: StatusKind) {
    map.entry(path)
        .and_modify(|existing| *existing = existing.max_priority(kind))
        .or_insert(kind);
}

/// Parse NUL-delimited porcelain v1 output
pub fn parse_porcelain(output: &[u8]) -> ParsedStatus {
    let mut status = ParsedStatus::default();
    let mut fields = output.split(|b| *b == 0);

    while let Some(field) = fields.next() {
        // "XY " plus at least one byte of path
        if field.len() < 4 || field[2] != b' ' {
            continue;
        }
        let code = String::from_utf8_lossy(&field[..2]);
        let raw_path = String::from_utf8_lossy(&field[3..]);

        let (x, y) = (field[0], field[1]);
        let renamed = matches!(x, b'R' | b'C') || matches!(y, b'R' | b'C');
        if renamed {
            // Original path of the rename/copy
            fields.next();
        }

        let path = match raw_path.split_once(" -> ") {
            Some((_, new)) if renamed => new,
            _ => raw_path.as_ref(),
        };

        let kind = classify(&code);
        match path.strip_suffix('/') {
            Some(dir) if !dir.is_empty() => status.insert_dir(PathBuf::from(dir), kind),
            Some(_) => {}
            None => status.insert(PathBuf::from(path), kind),
        }
    }

    status
}
