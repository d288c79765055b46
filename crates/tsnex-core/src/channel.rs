//! Snapshot publish/subscribe channel
//!
//! Broadcast with a small ring (default one slot). Publishing never blocks;
//! a subscriber that falls behind skips straight to the newest snapshots, so
//! the latest one is always delivered while older ones may be lost. Once the
//! channel is closed, publish and poll are no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::debug;

use crate::snapshot::Snapshot;

/// Shared publisher handle.
#[derive(Debug)]
pub struct SnapshotChannel {
    tx: Mutex<Option<broadcast::Sender<Arc<Snapshot>>>>,
    published: AtomicU64,
}

impl SnapshotChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Mutex::new(Some(tx)),
            published: AtomicU64::new(0),
        }
    }

    /// Send to every current subscriber. Fire-and-forget.
    pub fn publish(&self, snapshot: Snapshot) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            debug!(seq = snapshot.seq, "publish on closed channel ignored");
            return;
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        // no subscribers is not an error: the snapshot is simply dropped
        let _ = tx.send(Arc::new(snapshot));
    }

    pub fn subscribe(&self) -> SnapshotSubscriber {
        let rx = match self.tx.lock().as_ref() {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            }
        };
        SnapshotSubscriber { rx }
    }

    /// Number of successful publishes so far.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Tear down; subscribers drain what is buffered, then see nothing.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl Default for SnapshotChannel {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Consumer handle.
#[derive(Debug)]
pub struct SnapshotSubscriber {
    rx: broadcast::Receiver<Arc<Snapshot>>,
}

impl SnapshotSubscriber {
    /// Next available snapshot, or `None` when nothing new is pending.
    pub fn poll(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => return Some(snapshot),
                Err(TryRecvError::Lagged(missed)) => {
                    debug!(missed, "subscriber lagged, skipping to newest snapshot");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next snapshot; `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "subscriber lagged, skipping to newest snapshot");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
