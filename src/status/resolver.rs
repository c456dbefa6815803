//! Repository root resolution
//!
//! Walks upward from a path looking for `.git` (a directory, or a gitfile in
//! worktrees and submodules). Answers are cached briefly per directory, so
//! the files of one directory share a single lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a resolution (positive or negative) is reused
pub const RESOLVE_TTL: Duration = Duration::from_secs(5);

const GIT_MARKER: &str = ".git";

/// Find the repository root containing `path`, without caching
pub fn find_repo_root(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|dir| dir.join(GIT_MARKER).exists())
        .map(Path::to_path_buf)
}

/// The git directory for a repository root. Follows `gitdir:` files.
pub fn git_dir(root: &Path) -> Option<PathBuf> {
    let marker = root.join(GIT_MARKER);
    if marker.is_dir() {
        return Some(marker);
    }
    let content = std::fs::read_to_string(&marker).ok()?;
    let target = content
        .lines()
        .find_map(|line| line.strip_prefix("gitdir:"))?
        .trim();
    let target = Path::new(target);
    let resolved = if target.is_absolute() {
        target.to_path_buf()
    } else {
        root.join(target)
    };
    resolved.is_dir().then_some(resolved)
}

#[derive(Debug)]
struct Resolutions {
    entries: HashMap<PathBuf, (Option<PathBuf>, Instant)>,
    last_sweep: Instant,
}

#[derive(Debug)]
pub struct RootResolver {
    ttl: Duration,
    cache: Mutex<Resolutions>,
}

impl Default for RootResolver {
    fn default() -> Self {
        Self::new(RESOLVE_TTL)
    }
}

/// Directory whose answer covers `path`. Anything that is not a directory
/// (including paths that no longer exist) shares its parent's root.
fn lookup_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !path.is_dir() => parent,
        _ => path,
    }
}

impl RootResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(Resolutions {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Repository root for `path`, using the short-lived cache
    pub fn resolve(&self, path: &Path) -> Option<PathBuf> {
        let dir = lookup_dir(path);
        let now = Instant::now();
        if let Ok(cache) = self.cache.lock() {
            if let Some((root, at)) = cache.entries.get(dir) {
                if now.duration_since(*at) < self.ttl {
                    return root.clone();
                }
            }
        }

        let root = find_repo_root(dir);

        if let Ok(mut cache) = self.cache.lock() {
            // Expired entries are dropped at most once per TTL
            if now.duration_since(cache.last_sweep) >= self.ttl {
                let ttl = self.ttl;
                cache.entries.retain(|_, (_, at)| now.duration_since(*at) < ttl);
                cache.last_sweep = now;
            }
            cache.entries.insert(dir.to_path_buf(), (root.clone(), now));
        }
        root
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.entries.clear();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.cache.lock().map(|cache| cache.entries.len()).unwrap_or(0)
    }
}
