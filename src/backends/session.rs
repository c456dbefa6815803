//! Scan session state shared by every sub-scan of one invocation
//!
//! A session owns the caller's callbacks, one cancellation token and a
//! counter of outstanding units (one per root for process backends, one for
//! the whole walk). Completion fires once, either when the counter reaches
//! zero or when the session is cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backends::{Backend, DoneCallback, ItemCallback};
use crate::core::model::DiscoveredItem;

pub struct SessionState {
    backend: Backend,
    token: CancellationToken,
    remaining: AtomicUsize,
    emitted: AtomicUsize,
    on_item: ItemCallback,
    on_done: Mutex<Option<DoneCallback>>,
}

impl SessionState {
    pub fn new(
        backend: Backend,
        units: usize,
        on_item: ItemCallback,
        on_done: DoneCallback,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            backend,
            token: CancellationToken::new(),
            remaining: AtomicUsize::new(units),
            emitted: AtomicUsize::new(0),
            on_item,
            on_done: Mutex::new(Some(on_done)),
        });
        if units == 0 {
            session.finish();
        }
        session
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Deliver one item. Returns false once the session is cancelled, in
    /// which case the item is dropped.
    pub fn emit(&self, item: DiscoveredItem) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        (self.on_item)(item);
        true
    }

    /// Mark one unit (root or walk) finished
    pub fn unit_done(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.finish();
        }
    }

    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        debug!(backend = %self.backend, "scan cancelled");
        self.finish();
    }

    fn finish(&self) {
        let on_done = match self.on_done.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(on_done) = on_done {
            debug!(
                backend = %self.backend,
                items = self.emitted.load(Ordering::Relaxed),
                cancelled = self.token.is_cancelled(),
                "scan finished"
            );
            on_done();
        }
    }
}

/// Handle returned by [`Scan::start`](crate::backends::Scan::start).
///
/// Cancelling is idempotent. After it returns no new work is scheduled and
/// the completion callback has fired (if it had not already). An item whose
/// delivery was already under way may still arrive; nothing after it will.
#[derive(Clone)]
pub struct CancelHandle {
    session: Arc<SessionState>,
}

impl CancelHandle {
    pub(crate) fn new(session: Arc<SessionState>) -> Self {
        Self { session }
    }

    pub fn cancel(&self) {
        self.session.cancel();
    }

    #[allow(dead_code)]
    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("backend", &self.session.backend)
            .field("cancelled", &self.session.is_cancelled())
            .finish()
    }
}
