//! Repository metadata watching
//!
//! Staging, committing and checking out all rewrite `index` or `HEAD` in the
//! git directory. Git replaces those files by renaming a lock file over them,
//! so the git directory itself is watched (non-recursively) and events are
//! filtered by file name.

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::core::error::TrawlError;

/// Files whose change means the status map is out of date
pub const WATCHED_FILES: [&str; 2] = ["index", "HEAD"];

/// Whether a changed path is one of the watched metadata files
pub fn is_metadata_change(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| WATCHED_FILES.contains(&name))
}

/// A live watch on one repository's git directory. Dropping it stops the watch.
pub struct RepoWatch {
    git_dir: PathBuf,
    _watcher: RecommendedWatcher,
}

impl RepoWatch {
    /// Watch `git_dir`, calling `on_change` with each changed metadata file
    pub fn install<F>(git_dir: &Path, on_change: F) -> Result<Self, TrawlError>
    where
        F: Fn(&Path) + Send + 'static,
    {
        let watched = git_dir.to_path_buf();
        let mut watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                if let Some(changed) = event.paths.iter().find(|p| is_metadata_change(p)) {
                    debug!(path = %changed.display(), "repository metadata changed");
                    on_change(changed);
                }
            }
            Err(e) => warn!(git_dir = %watched.display(), error = %e, "repository watch error"),
        })
        .map_err(|source| TrawlError::Watch {
            path: git_dir.to_path_buf(),
            source,
        })?;

        watcher
            .watch(git_dir, RecursiveMode::NonRecursive)
            .map_err(|source| TrawlError::Watch {
                path: git_dir.to_path_buf(),
                source,
            })?;

        Ok(Self {
            git_dir: git_dir.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }
}

impl std::fmt::Debug for RepoWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoWatch")
            .field("git_dir", &self.git_dir)
            .field("_watcher", &"<watcher>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_is_metadata_change() {
        assert!(is_metadata_change(Path::new("/repo/.git/index")));
        assert!(is_metadata_change(Path::new("/repo/.git/HEAD")));
        assert!(!is_metadata_change(Path::new("/repo/.git/index.lock")));
        assert!(!is_metadata_change(Path::new("/repo/.git/ORIG_HEAD")));
        assert!(!is_metadata_change(Path::new("/")));
    }

    #[test]
    fn test_install_missing_dir_fails() {
        let temp = tempdir().unwrap();
        let result = RepoWatch::install(&temp.path().join("missing"), |_| {});
        assert!(matches!(result, Err(TrawlError::Watch { .. })));
    }

    #[test]
    fn test_index_write_triggers_callback() {
        let temp = tempdir().unwrap();
        let git_dir = temp.path().join(".git");
        std::fs::create_dir(&git_dir).unwrap();

        let (tx, rx) = mpsc::channel();
        let watch = RepoWatch::install(&git_dir, move |path| {
            let _ = tx.send(path.to_path_buf());
        })
        .unwrap();
        assert_eq!(watch.git_dir(), git_dir.as_path());

        std::fs::write(git_dir.join("unrelated"), "x").unwrap();
        std::fs::write(git_dir.join("index"), "x").unwrap();

        let changed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(changed.file_name().unwrap(), "index");
    }
}
