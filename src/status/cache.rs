//! Git status cache
//!
//! One [`RepoEntry`] per repository root, holding the parsed output of a
//! single `git status` run. Entries are swapped in whole behind an `Arc`, so a
//! reader either sees the old map or the new one, never a mix.
//!
//! Reads never wait for git. A stale entry (older than the TTL) is still
//! served while a refresh runs in the background; a missing entry reads as
//! nothing known.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::error::TrawlError;
use crate::core::model::StatusKind;
use crate::status::parse::{parse_porcelain, ParsedStatus};
use crate::status::resolver::{git_dir, RootResolver, RESOLVE_TTL};
use crate::status::watch::{is_metadata_change, RepoWatch};

/// Age after which an entry is refreshed in the background
pub const STATUS_TTL: Duration = Duration::from_secs(15 * 60);

const GIT_STATUS_ARGS: [&str; 5] = [
    "status",
    "--porcelain=v1",
    "--ignored=matching",
    "-z",
    "-unormal",
];

/// Fetches retried when the repository is invalidated mid-fetch
const MAX_FETCH_ATTEMPTS: usize = 3;

/// Time source for TTL checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Status of one repository at one point in time
#[derive(Debug)]
pub struct RepoEntry {
    pub root: PathBuf,
    pub status: ParsedStatus,
    pub captured_at: Instant,
    pub captured_wall: DateTime<Utc>,
}

impl RepoEntry {
    pub fn new(root: PathBuf, status: ParsedStatus, captured_at: Instant) -> Self {
        Self {
            root,
            status,
            captured_at,
            captured_wall: Utc::now(),
        }
    }

    pub fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) >= ttl
    }

    /// Status of an absolute path inside this repository
    pub fn lookup(&self, path: &Path) -> Option<StatusKind> {
        let relative = path.strip_prefix(&self.root).ok()?;
        self.status.lookup(relative)
    }
}

/// Cache settings. `Default` gives the production values.
pub struct CacheSettings {
    pub ttl: Duration,
    pub resolve_ttl: Duration,
    pub git_program: PathBuf,
    pub clock: Arc<dyn Clock>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: STATUS_TTL,
            resolve_ttl: RESOLVE_TTL,
            git_program: PathBuf::from("git"),
            clock: Arc::new(SystemClock),
        }
    }
}

struct Inner {
    entries: RwLock<HashMap<PathBuf, Arc<RepoEntry>>>,
    resolver: RootResolver,
    fetches: Mutex<HashMap<PathBuf, watch::Sender<bool>>>,
    watches: Mutex<HashMap<PathBuf, RepoWatch>>,
    /// Bumped on every invalidation so in-flight fetches can tell they raced one
    generation: AtomicU64,
    ttl: Duration,
    git: PathBuf,
    clock: Arc<dyn Clock>,
}

/// Shared git status cache. Cloning is cheap and every clone sees the same
/// entries.
#[derive(Clone)]
pub struct StatusCache {
    inner: Arc<Inner>,
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StatusCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCache")
            .field("repos", &read_entries(&self.inner.entries).len())
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

impl StatusCache {
    pub fn new() -> Self {
        Self::with_settings(CacheSettings::default())
    }

    pub fn with_settings(settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                resolver: RootResolver::new(settings.resolve_ttl),
                fetches: Mutex::new(HashMap::new()),
                watches: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                ttl: settings.ttl,
                git: settings.git_program,
                clock: settings.clock,
            }),
        }
    }

    /// Repository root containing `path`
    pub fn repo_root(&self, path: &Path) -> Option<PathBuf> {
        self.inner.resolver.resolve(path)
    }

    /// Current entry for a repository root, stale or not
    pub fn entry(&self, root: &Path) -> Option<Arc<RepoEntry>> {
        read_entries(&self.inner.entries).get(root).cloned()
    }

    /// Cached status of `path`. Never waits for git.
    ///
    /// A stale entry is still answered from, and a background refresh is
    /// started if a tokio runtime is available.
    pub fn get_status_sync(&self, path: &Path) -> Option<StatusKind> {
        let root = self.repo_root(path)?;
        let entry = self.entry(&root)?;
        if entry.is_stale(self.inner.clock.now(), self.inner.ttl) {
            debug!(root = %root.display(), "serving stale status");
            self.spawn_refresh(root, None);
        }
        entry.lookup(path)
    }

    /// Load the repository of `path` in the background if its entry is
    /// missing or stale, then call `on_complete`.
    pub fn preload<F>(&self, path: &Path, on_complete: F)
    where
        F: FnOnce(Option<Arc<RepoEntry>>) + Send + 'static,
    {
        let Ok(handle) = Handle::try_current() else {
            debug!(path = %path.display(), "no runtime for status preload");
            let entry = self.repo_root(path).and_then(|root| self.entry(&root));
            on_complete(entry);
            return;
        };
        let this = self.clone();
        let path = path.to_path_buf();
        handle.spawn(async move {
            let entry = this.load(&path).await;
            on_complete(entry);
        });
    }

    /// Entry for the repository of `path`, fetching it when missing or stale
    pub async fn load(&self, path: &Path) -> Option<Arc<RepoEntry>> {
        let root = self.repo_root(path)?;
        if let Some(entry) = self.entry(&root) {
            if !entry.is_stale(self.inner.clock.now(), self.inner.ttl) {
                return Some(entry);
            }
        }
        self.fetch(&root).await;
        self.entry(&root)
    }

    /// Re-run git status for the repository of `path` regardless of age
    pub async fn refresh(&self, path: &Path) -> Option<Arc<RepoEntry>> {
        let root = self.repo_root(path)?;
        self.fetch(&root).await;
        self.entry(&root)
    }

    /// Drop the entry of one repository, or every entry (and the root
    /// resolution cache) when `root` is `None`.
    pub fn invalidate(&self, root: Option<&Path>) {
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        match root {
            Some(root) => {
                let key = if self.entry(root).is_some() {
                    Some(root.to_path_buf())
                } else {
                    self.repo_root(root)
                };
                if let Some(key) = key {
                    write_entries(&self.inner.entries).remove(&key);
                    debug!(root = %key.display(), "status invalidated");
                }
            }
            None => {
                write_entries(&self.inner.entries).clear();
                self.inner.resolver.clear();
                debug!("status cache cleared");
            }
        }
    }

    /// Watch the repository of `path` for index/HEAD changes. Returns
    /// `Ok(false)` when a watch is already installed.
    pub fn watch<F>(&self, path: &Path, on_change: F) -> Result<bool, TrawlError>
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        let root = self
            .repo_root(path)
            .ok_or_else(|| TrawlError::NoRepository(path.to_path_buf()))?;

        let mut watches = lock(&self.inner.watches);
        if watches.contains_key(&root) {
            return Ok(false);
        }

        let git_dir = git_dir(&root).ok_or_else(|| TrawlError::NoRepository(root.clone()))?;
        let weak = Arc::downgrade(&self.inner);
        let handle = Handle::try_current().ok();
        let repo_root = root.clone();

        let repo_watch = RepoWatch::install(&git_dir, move |changed| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let cache = StatusCache { inner };
            if cache.apply_change(&repo_root, changed, handle.clone()) {
                on_change(&repo_root);
            }
        })?;

        info!(
            root = %root.display(),
            git_dir = %repo_watch.git_dir().display(),
            "watching repository"
        );
        watches.insert(root, repo_watch);
        Ok(true)
    }

    /// Remove the watch on the repository of `path`
    pub fn unwatch(&self, path: &Path) -> bool {
        let mut watches = lock(&self.inner.watches);
        if watches.remove(path).is_some() {
            return true;
        }
        match self.repo_root(path) {
            Some(root) => watches.remove(&root).is_some(),
            None => false,
        }
    }

    /// React to a change of `changed` inside the git directory of `root`.
    /// Returns true when it was a metadata file and the entry was invalidated.
    #[allow(dead_code)]
    pub fn handle_metadata_change(&self, root: &Path, changed: &Path) -> bool {
        self.apply_change(root, changed, None)
    }

    /// Drop every watch and entry
    pub fn shutdown(&self) {
        lock(&self.inner.watches).clear();
        self.invalidate(None);
    }

    fn apply_change(&self, root: &Path, changed: &Path, handle: Option<Handle>) -> bool {
        if !is_metadata_change(changed) {
            return false;
        }
        self.invalidate(Some(root));
        self.spawn_refresh(root.to_path_buf(), handle);
        true
    }

    fn is_fetching(&self, root: &Path) -> bool {
        lock(&self.inner.fetches).contains_key(root)
    }

    fn spawn_refresh(&self, root: PathBuf, handle: Option<Handle>) {
        if self.is_fetching(&root) {
            return;
        }
        let Some(handle) = handle.or_else(|| Handle::try_current().ok()) else {
            debug!(root = %root.display(), "no runtime for background refresh");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            this.fetch(&root).await;
        });
    }

    /// Run git status for `root` and install the result. Concurrent callers
    /// for the same root wait for the fetch already running.
    async fn fetch(&self, root: &Path) {
        let waiter = {
            let mut fetches = lock(&self.inner.fetches);
            match fetches.get(root) {
                Some(done) => Some(done.subscribe()),
                None => {
                    let (done, _) = watch::channel(false);
                    fetches.insert(root.to_path_buf(), done);
                    None
                }
            }
        };

        if let Some(mut waiter) = waiter {
            let _ = waiter.wait_for(|done| *done).await;
            return;
        }

        let _guard = FetchGuard {
            inner: &self.inner,
            root,
        };

        for attempt in 1..=MAX_FETCH_ATTEMPTS {
            let generation = self.inner.generation.load(Ordering::Acquire);
            let status = run_git_status(&self.inner.git, root).await;
            let raced = generation != self.inner.generation.load(Ordering::Acquire);
            if !raced || attempt == MAX_FETCH_ATTEMPTS {
                self.install(RepoEntry::new(
                    root.to_path_buf(),
                    status,
                    self.inner.clock.now(),
                ));
                return;
            }
            debug!(root = %root.display(), attempt, "invalidated during fetch, retrying");
        }
    }

    fn install(&self, entry: RepoEntry) {
        let root = entry.root.clone();
        write_entries(&self.inner.entries).insert(root, Arc::new(entry));
    }

    #[cfg(test)]
    pub(crate) fn install_entry(&self, entry: RepoEntry) {
        self.install(entry);
    }
}

/// Signals waiters and clears the in-flight marker however the fetch ends
struct FetchGuard<'a> {
    inner: &'a Inner,
    root: &'a Path,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if let Some(done) = lock(&self.inner.fetches).remove(self.root) {
            let _ = done.send(true);
        }
    }
}

/// Run git status in `root`. Any failure yields an empty map so callers do
/// not keep re-running a broken git.
async fn run_git_status(git: &Path, root: &Path) -> ParsedStatus {
    let output = Command::new(git)
        .args(GIT_STATUS_ARGS)
        .current_dir(root)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            let status = parse_porcelain(&output.stdout);
            debug!(root = %root.display(), entries = status.len(), "git status loaded");
            status
        }
        Ok(output) => {
            warn!(
                root = %root.display(),
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git status failed"
            );
            ParsedStatus::default()
        }
        Err(e) => {
            debug!(root = %root.display(), error = %e, "git unavailable");
            ParsedStatus::default()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_entries(
    entries: &RwLock<HashMap<PathBuf, Arc<RepoEntry>>>,
) -> std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Arc<RepoEntry>>> {
    entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_entries(
    entries: &RwLock<HashMap<PathBuf, Arc<RepoEntry>>>,
) -> std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, Arc<RepoEntry>>> {
    entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const MISSING_GIT: &str = "/nonexistent/trawl-missing-git";

    struct ManualClock(Mutex<Instant>);

    impl ManualClock {
        fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.0.lock().unwrap()
        }
    }

    fn fake_repo() -> TempDir {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join(".git")).unwrap();
        temp
    }

    fn cache_with_clock(clock: Arc<ManualClock>) -> StatusCache {
        StatusCache::with_settings(CacheSettings {
            git_program: PathBuf::from(MISSING_GIT),
            clock,
            ..CacheSettings::default()
        })
    }

    fn entry_with(root: &Path, records: &[u8], at: Instant) -> RepoEntry {
        RepoEntry::new(root.to_path_buf(), parse_porcelain(records), at)
    }

    async fn wait_until<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_stale_entry_is_served_while_refreshing() {
        let repo = fake_repo();
        let base = Instant::now();
        let clock = Arc::new(ManualClock(Mutex::new(base)));
        let cache = cache_with_clock(clock.clone());
        cache.install_entry(entry_with(repo.path(), b" M a.txt\0", base));

        clock.advance(Duration::from_secs(16 * 60));
        let file = repo.path().join("a.txt");
        assert_eq!(cache.get_status_sync(&file), Some(StatusKind::Modified));

        // The refresh ran separately and, with git missing, installed an empty map
        let refreshed = wait_until(|| {
            cache
                .entry(repo.path())
                .is_some_and(|entry| entry.captured_at != base)
        })
        .await;
        assert!(refreshed);
        assert_eq!(cache.get_status_sync(&file), None);
    }

    #[tokio::test]
    async fn test_fresh_entry_is_not_refreshed() {
        let repo = fake_repo();
        let base = Instant::now();
        let clock = Arc::new(ManualClock(Mutex::new(base)));
        let cache = cache_with_clock(clock.clone());
        cache.install_entry(entry_with(repo.path(), b"?? new.txt\0", base));

        clock.advance(Duration::from_secs(14 * 60));
        assert_eq!(
            cache.get_status_sync(&repo.path().join("new.txt")),
            Some(StatusKind::Untracked)
        );
        tokio::task::yield_now().await;
        assert_eq!(cache.entry(repo.path()).unwrap().captured_at, base);
    }

    #[tokio::test]
    async fn test_metadata_change_clears_entry_immediately() {
        let repo = fake_repo();
        let clock = Arc::new(ManualClock(Mutex::new(Instant::now())));
        let cache = cache_with_clock(clock.clone());
        cache.install_entry(entry_with(repo.path(), b"M  a.txt\0", clock.now()));

        let file = repo.path().join("a.txt");
        assert_eq!(cache.get_status_sync(&file), Some(StatusKind::Staged));

        let index = repo.path().join(".git/index");
        assert!(cache.handle_metadata_change(repo.path(), &index));
        // The refetch has not run yet on this single-threaded runtime
        assert_eq!(cache.get_status_sync(&file), None);
    }

    #[tokio::test]
    async fn test_unrelated_change_is_ignored() {
        let repo = fake_repo();
        let clock = Arc::new(ManualClock(Mutex::new(Instant::now())));
        let cache = cache_with_clock(clock.clone());
        cache.install_entry(entry_with(repo.path(), b"M  a.txt\0", clock.now()));

        let lock_file = repo.path().join(".git/index.lock");
        assert!(!cache.handle_metadata_change(repo.path(), &lock_file));
        assert!(cache.entry(repo.path()).is_some());
    }

    #[tokio::test]
    async fn test_missing_git_caches_empty_map() {
        let repo = fake_repo();
        let cache = cache_with_clock(Arc::new(ManualClock(Mutex::new(Instant::now()))));

        let entry = cache.load(repo.path()).await.unwrap();
        assert!(entry.status.is_empty());

        // A second load reuses the cached (empty) entry instead of re-running git
        let again = cache.load(repo.path()).await.unwrap();
        assert!(Arc::ptr_eq(&entry, &again));
    }

    #[tokio::test]
    async fn test_preload_calls_back() {
        let repo = fake_repo();
        let cache = cache_with_clock(Arc::new(ManualClock(Mutex::new(Instant::now()))));

        let (tx, rx) = tokio::sync::oneshot::channel();
        cache.preload(repo.path(), move |entry| {
            let _ = tx.send(entry.map(|e| e.root.clone()));
        });
        assert_eq!(rx.await.unwrap(), Some(repo.path().to_path_buf()));
    }

    #[tokio::test]
    async fn test_preload_outside_repository() {
        let temp = tempdir().unwrap();
        let cache = cache_with_clock(Arc::new(ManualClock(Mutex::new(Instant::now()))));
        let dir = temp.path().join("plain");
        fs::create_dir(&dir).unwrap();

        if cache.repo_root(&dir).is_some() {
            // The temp dir lives inside some repository on this machine
            return;
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        cache.preload(&dir, move |entry| {
            let _ = tx.send(entry.is_none());
        });
        assert!(rx.await.unwrap());
        assert_eq!(cache.get_status_sync(&dir.join("a.txt")), None);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let repo = fake_repo();
        let cache = cache_with_clock(Arc::new(ManualClock(Mutex::new(Instant::now()))));

        let (a, b) = tokio::join!(cache.load(repo.path()), cache.load(repo.path()));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert!(!cache.is_fetching(repo.path()));
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let one = fake_repo();
        let two = fake_repo();
        let clock = Arc::new(ManualClock(Mutex::new(Instant::now())));
        let cache = cache_with_clock(clock.clone());
        cache.install_entry(entry_with(one.path(), b"?? a\0", clock.now()));
        cache.install_entry(entry_with(two.path(), b"?? b\0", clock.now()));

        cache.invalidate(Some(&one.path().join("sub/file.rs")));
        assert!(cache.entry(one.path()).is_none());
        assert!(cache.entry(two.path()).is_some());

        cache.invalidate(None);
        assert!(cache.entry(two.path()).is_none());
    }

    #[tokio::test]
    async fn test_watch_is_idempotent() {
        let repo = fake_repo();
        let cache = cache_with_clock(Arc::new(ManualClock(Mutex::new(Instant::now()))));

        assert!(cache.watch(repo.path(), |_| {}).unwrap());
        assert!(!cache.watch(&repo.path().join("src"), |_| {}).unwrap());
        assert!(cache.unwatch(repo.path()));
        assert!(!cache.unwatch(repo.path()));
        assert!(cache.watch(repo.path(), |_| {}).unwrap());
        cache.shutdown();
        assert!(!cache.unwatch(repo.path()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_index_write_invalidates_and_notifies() {
        let repo = fake_repo();
        let clock = Arc::new(ManualClock(Mutex::new(Instant::now())));
        let cache = cache_with_clock(clock.clone());
        cache.install_entry(entry_with(repo.path(), b"M  a.txt\0", clock.now()));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        cache
            .watch(repo.path(), move |root| {
                let _ = tx.send(root.to_path_buf());
            })
            .unwrap();

        fs::write(repo.path().join(".git/index"), "changed").unwrap();
        let notified = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap();
        assert_eq!(notified, Some(repo.path().to_path_buf()));

        // The background refresh replaces the staged entry with git's (empty) answer
        let replaced = wait_until(|| {
            cache
                .get_status_sync(&repo.path().join("a.txt"))
                .is_none()
        })
        .await;
        assert!(replaced);
    }

    #[tokio::test]
    async fn test_real_git_status() {
        if crate::core::util::find_executable("git").is_none() {
            return;
        }
        let temp = tempdir().unwrap();
        let root = temp.path();
        let init = std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(root)
            .status()
            .unwrap();
        assert!(init.success());

        fs::write(root.join("staged.txt"), "a").unwrap();
        fs::write(root.join("new.txt"), "b").unwrap();
        fs::write(root.join(".gitignore"), "*.log\n").unwrap();
        fs::write(root.join("debug.log"), "c").unwrap();
        let add = std::process::Command::new("git")
            .args(["add", "staged.txt"])
            .current_dir(root)
            .status()
            .unwrap();
        assert!(add.success());

        let cache = StatusCache::new();
        let entry = cache.refresh(root).await.unwrap();
        assert!(!entry.status.is_empty());
        assert_eq!(
            cache.get_status_sync(&root.join("staged.txt")),
            Some(StatusKind::Added)
        );
        assert_eq!(
            cache.get_status_sync(&root.join("new.txt")),
            Some(StatusKind::Untracked)
        );
        assert_eq!(
            cache.get_status_sync(&root.join("debug.log")),
            Some(StatusKind::Ignored)
        );
    }
}
