//! Backends module - File discovery and tool integrations
//!
//! Provides:
//! - process: fd / rg streaming, one process per root
//! - walker: native bounded-concurrency fallback walker
//! - filters: hidden / ignore-file / exclude filters for the walker
//! - select: backend selection and `build_scanner`
//! - session: shared session state and the cancel handle
//! - doctor: dependency checking

pub mod doctor;
pub mod filters;
pub mod process;
pub mod select;
pub mod session;
pub mod walker;

use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::core::model::DiscoveredItem;
pub use session::CancelHandle;

/// Called once per discovered item, from whichever task found it
pub type ItemCallback = Arc<dyn Fn(DiscoveredItem) + Send + Sync>;

/// Called at most once when the session completes or is cancelled
pub type DoneCallback = Box<dyn FnOnce() + Send>;

/// The concrete strategy serving a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Fd,
    Rg,
    Walker,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Fd => "fd",
            Backend::Rg => "rg",
            Backend::Walker => "walker",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured scan over a fixed set of roots.
///
/// `start` must be called from within a tokio runtime; the work runs on
/// spawned tasks and `start` returns immediately.
pub trait Scan: Send + Sync {
    fn backend(&self) -> Backend;

    fn start(&self, on_item: ItemCallback, on_done: DoneCallback) -> CancelHandle;
}

/// Run a scan to completion and collect everything it emits, sorted by path
#[allow(dead_code)]
pub async fn collect(scanner: &dyn Scan) -> Vec<DiscoveredItem> {
    let items = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = oneshot::channel();

    let sink = items.clone();
    let _handle = scanner.start(
        Arc::new(move |item| {
            if let Ok(mut items) = sink.lock() {
                items.push(item);
            }
        }),
        Box::new(move || {
            let _ = done_tx.send(());
        }),
    );
    let _ = done_rx.await;

    let mut items = match items.lock() {
        Ok(mut items) => std::mem::take(&mut *items),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    };
    items.sort_by(|a, b| a.path.cmp(&b.path));
    items
}
