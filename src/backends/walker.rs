//! Native fallback walker
//!
//! Walks every root of a session from one shared queue with a ceiling on
//! concurrent directory reads. Used when neither fd nor rg is available or
//! enabled, so it must never fail a session: unreadable directories are
//! skipped and the walk carries on.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;

use crate::backends::filters::{load_ignore_rules, EntryFilter, IgnoreRules};
use crate::backends::session::{CancelHandle, SessionState};
use crate::backends::{Backend, DoneCallback, ItemCallback, Scan};
use crate::core::model::{DiscoveredItem, ItemKind, ScanOptions, ScanRoot};

/// Default ceiling on simultaneous directory reads
pub const MAX_IN_FLIGHT_READS: usize = 16;

/// A directory waiting to be read
struct WorkItem {
    dir: PathBuf,
    depth: usize,
    rules: Arc<IgnoreRules>,
}

#[derive(Debug)]
enum EntryKind {
    File,
    Symlink,
    /// `real` is set when symlinks are followed, for loop detection
    Dir { real: Option<PathBuf> },
}

#[derive(Debug)]
struct Entry {
    path: PathBuf,
    kind: EntryKind,
}

/// Result of reading one directory
struct Listing {
    depth: usize,
    rules: Arc<IgnoreRules>,
    entries: Vec<Entry>,
}

pub struct WalkScanner {
    options: Arc<ScanOptions>,
    roots: Vec<ScanRoot>,
    max_in_flight: usize,
}

impl WalkScanner {
    pub fn new(options: Arc<ScanOptions>, roots: Vec<ScanRoot>) -> Self {
        Self {
            options,
            roots,
            max_in_flight: MAX_IN_FLIGHT_READS,
        }
    }

    #[allow(dead_code)]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }
}

impl Scan for WalkScanner {
    fn backend(&self) -> Backend {
        Backend::Walker
    }

    fn start(&self, on_item: ItemCallback, on_done: DoneCallback) -> CancelHandle {
        // The whole multi-root walk is one unit of work
        let session = SessionState::new(Backend::Walker, 1, on_item, on_done);
        tokio::spawn(walk(
            session.clone(),
            self.options.clone(),
            self.roots.clone(),
            self.max_in_flight,
        ));
        CancelHandle::new(session)
    }
}

async fn walk(
    session: Arc<SessionState>,
    options: Arc<ScanOptions>,
    roots: Vec<ScanRoot>,
    max_in_flight: usize,
) {
    let filter = Arc::new(EntryFilter::new(&options));
    let mut queue = VecDeque::new();
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let base_rules = Arc::new(IgnoreRules::default());

    for root in roots {
        let real = tokio::fs::canonicalize(root.path())
            .await
            .unwrap_or_else(|_| root.path().to_path_buf());
        if visited.insert(real) {
            queue.push_back(WorkItem {
                dir: root.path().to_path_buf(),
                depth: 0,
                rules: base_rules.clone(),
            });
        }
    }

    let mut reads = JoinSet::new();

    loop {
        while reads.len() < max_in_flight && !session.is_cancelled() {
            let Some(work) = queue.pop_front() else {
                break;
            };
            reads.spawn(read_listing(work, options.clone(), filter.clone()));
        }

        // Nothing queued and nothing in flight: the walk is complete
        let joined = tokio::select! {
            biased;
            _ = session.token().cancelled() => break,
            joined = reads.join_next() => joined,
        };
        let Some(joined) = joined else {
            break;
        };

        let listing = match joined {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => {
                debug!(error = %e, "skipping unreadable directory");
                continue;
            }
            Err(e) => {
                debug!(error = %e, "directory read task failed");
                continue;
            }
        };

        let depth = listing.depth + 1;
        for entry in listing.entries {
            let kind = match entry.kind {
                EntryKind::Dir { real } => {
                    if !options.expands_at(depth) {
                        continue;
                    }
                    if let Some(real) = real {
                        if !visited.insert(real) {
                            debug!(path = %entry.path.display(), "directory already visited");
                            continue;
                        }
                    }
                    queue.push_back(WorkItem {
                        dir: entry.path,
                        depth,
                        rules: listing.rules.clone(),
                    });
                    continue;
                }
                EntryKind::File => ItemKind::File,
                EntryKind::Symlink => ItemKind::Symlink,
            };
            if !options.emits_at(depth) {
                continue;
            }
            if !session.emit(DiscoveredItem::new(entry.path, kind)) {
                break;
            }
        }
    }

    // In-flight reads may still finish, but nothing reads their results
    reads.abort_all();
    session.unit_done();
}

/// Read one directory, applying the name filters and resolving symlink
/// targets off the scheduling loop.
async fn read_listing(
    work: WorkItem,
    options: Arc<ScanOptions>,
    filter: Arc<EntryFilter>,
) -> io::Result<Listing> {
    let mut read_dir = tokio::fs::read_dir(&work.dir).await?;

    let rules = if options.respect_ignore {
        load_ignore_rules(&work.dir, &work.rules).await
    } else {
        work.rules.clone()
    };

    let mut entries = Vec::new();
    loop {
        let dir_entry = match read_dir.next_entry().await {
            Ok(Some(dir_entry)) => dir_entry,
            Ok(None) => break,
            Err(e) => {
                debug!(dir = %work.dir.display(), error = %e, "directory listing cut short");
                break;
            }
        };

        let name = dir_entry.file_name();
        let name = name.to_string_lossy();
        if !filter.allows(&name, &rules) {
            continue;
        }

        // Entries can vanish between listing and stat
        let Ok(file_type) = dir_entry.file_type().await else {
            continue;
        };
        let path = dir_entry.path();

        let kind = if file_type.is_symlink() {
            match tokio::fs::metadata(&path).await {
                // Dangling link
                Err(_) => continue,
                Ok(_) if !options.follow_symlinks => EntryKind::Symlink,
                Ok(target) if target.is_dir() => EntryKind::Dir {
                    real: tokio::fs::canonicalize(&path).await.ok(),
                },
                Ok(_) => EntryKind::File,
            }
        } else if file_type.is_dir() {
            let real = if options.follow_symlinks {
                tokio::fs::canonicalize(&path).await.ok()
            } else {
                None
            };
            EntryKind::Dir { real }
        } else {
            EntryKind::File
        };

        entries.push(Entry { path, kind });
    }

    Ok(Listing {
        depth: work.depth,
        rules,
        entries,
    })
}
