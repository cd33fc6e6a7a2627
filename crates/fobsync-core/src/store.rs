//! The snapshot store: single source of truth for the published authorization list.
//!
//! ## Concurrency
//!
//! One `parking_lot::Mutex` guards the current snapshot and the waiter set. The
//! lock is never held across an `.await`; readers get an `Arc` to a complete
//! snapshot, so a replace is atomic from their point of view.
//!
//! ## Waiters
//!
//! Each blocked reader owns a [`Waiter`] backed by a capacity-1 channel. A change
//! is signalled with `try_send`, so a slow reader never blocks the writer and
//! repeated signals before the reader wakes collapse into one. Dropping the
//! waiter (after a wake, a timeout, or cancellation of the waiting task)
//! removes it from the set.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::snapshot::{Fingerprint, Snapshot};

#[derive(Default)]
struct StoreInner {
    snapshot: Option<Arc<Snapshot>>,
    waiters: HashMap<u64, mpsc::Sender<()>>,
}

/// Concurrency-safe holder of the latest [`Snapshot`].
#[derive(Default)]
pub struct SnapshotStore {
    inner: Mutex<StoreInner>,
    next_waiter_id: AtomicU64,
}

impl SnapshotStore {
    /// Create an empty ("not yet warmed") store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an `Arc` for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Install `candidate` unless its fingerprint matches the current one.
    ///
    /// Returns `true` when the snapshot was replaced, in which case every
    /// registered waiter has been signalled exactly once. The first call on an
    /// empty store always installs.
    pub fn replace_if_changed(&self, candidate: Snapshot) -> bool {
        let mut inner = self.inner.lock();

        if inner
            .snapshot
            .as_ref()
            .is_some_and(|current| current.fingerprint() == candidate.fingerprint())
        {
            return false;
        }

        inner.snapshot = Some(Arc::new(candidate));
        for waiter in inner.waiters.values() {
            // Full means a signal is already pending for this waiter.
            let _ = waiter.try_send(());
        }
        true
    }

    /// Current snapshot, or `None` if the cache has never been filled.
    pub fn load(&self) -> Option<Arc<Snapshot>> {
        self.inner.lock().snapshot.clone()
    }

    /// Fingerprint of the current snapshot, if any.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.inner
            .lock()
            .snapshot
            .as_ref()
            .map(|s| s.fingerprint().clone())
    }

    pub fn is_warm(&self) -> bool {
        self.inner.lock().snapshot.is_some()
    }

    /// Register a waiter now; wait on it later.
    ///
    /// Registering before inspecting the store closes the window in which a
    /// change could land between a `load()` and the start of a wait.
    pub fn subscribe(&self) -> Waiter<'_> {
        let (tx, rx) = mpsc::channel(1);
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().waiters.insert(id, tx);
        Waiter {
            store: self,
            id,
            rx,
        }
    }

    /// Block the calling task until the next change or until `timeout` elapses.
    ///
    /// Callers cannot tell which of the two happened and must `load()` again.
    pub async fn wait_for_change(&self, timeout: Duration) {
        self.subscribe().wait(timeout).await;
    }

    /// Number of currently registered waiters.
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    fn deregister(&self, id: u64) {
        self.inner.lock().waiters.remove(&id);
    }
}

/// A registered interest in the next snapshot change.
///
/// Deregisters itself on drop.
pub struct Waiter<'a> {
    store: &'a SnapshotStore,
    id: u64,
    rx: mpsc::Receiver<()>,
}

impl Waiter<'_> {
    /// Wait for a change signal or `timeout`, whichever comes first.
    pub async fn wait(mut self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.rx.recv()).await;
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.store.deregister(self.id);
    }
}
