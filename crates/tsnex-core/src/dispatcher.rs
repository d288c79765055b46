//! Dispatcher
//!
//! Consumes snapshots, forwards them to the client as JSON frames and holds
//! the optimizer until the client acknowledges. Runs as an async task next
//! to the blocking optimizer loop.
//!
//! Pacing comes from the receive itself: each wait is bounded by one tick,
//! after which `stop` is re-checked. Closing the channel ends the loop
//! without waiting out the tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::SnapshotSubscriber;
use crate::dataset::Dataset;
use crate::snapshot::{Snapshot, WireFrame};
use crate::status::StatusStore;
use crate::tracing::prefix;

/// Shortest wait between stop checks.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Where serialized frames go.
pub trait Outbound: Send {
    fn is_open(&self) -> bool;

    /// Hand one frame over; `false` when the connection is gone.
    fn send_frame(&mut self, frame: String) -> bool;
}

impl Outbound for mpsc::UnboundedSender<String> {
    fn is_open(&self) -> bool {
        !self.is_closed()
    }

    fn send_frame(&mut self, frame: String) -> bool {
        self.send(frame).is_ok()
    }
}

/// Counters reported when the dispatcher exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u64,
    /// Snapshots received while the outbound side was closed
    pub dropped: u64,
}

pub struct Dispatcher<O: Outbound> {
    status: Arc<StatusStore>,
    subscriber: SnapshotSubscriber,
    dataset: Arc<Dataset>,
    outbound: O,
    stats: DispatchStats,
}

impl<O: Outbound> Dispatcher<O> {
    pub fn new(
        status: Arc<StatusStore>,
        subscriber: SnapshotSubscriber,
        dataset: Arc<Dataset>,
        outbound: O,
    ) -> Self {
        Self {
            status,
            subscriber,
            dataset,
            outbound,
            stats: DispatchStats::default(),
        }
    }

    /// Forward snapshots until `stop` is set or the channel is torn down.
    pub async fn run(mut self) -> DispatchStats {
        info!("{} dispatcher started", prefix::OPEN);
        loop {
            let status = self.status.read();
            if status.stop {
                break;
            }
            let tick = status.tick().max(MIN_TICK);

            match timeout(tick, self.subscriber.recv()).await {
                Ok(Some(snapshot)) => {
                    self.forward(&snapshot);
                }
                Ok(None) => {
                    debug!("snapshot channel closed");
                    break;
                }
                // nothing published within one tick; re-check stop
                Err(_) => {}
            }
        }
        info!(
            "{} dispatcher finished: {} sent, {} dropped",
            prefix::CLOSE,
            self.stats.sent,
            self.stats.dropped
        );
        self.stats
    }

    /// Serialize and send one snapshot; `true` when it went out.
    ///
    /// The optimizer is paused before the frame leaves so that an
    /// acknowledgment can never arrive ahead of the pause.
    fn forward(&mut self, snapshot: &Snapshot) -> bool {
        if !self.outbound.is_open() {
            self.stats.dropped += 1;
            debug!(seq = snapshot.seq, "outbound closed, snapshot dropped");
            return false;
        }

        let frame = match serde_json::to_string(&WireFrame::new(snapshot, &self.dataset)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(seq = snapshot.seq, "failed to serialize snapshot: {}", e);
                self.stats.dropped += 1;
                return false;
            }
        };

        self.status.pause();
        if self.outbound.send_frame(frame) {
            self.stats.sent += 1;
            debug!(seq = snapshot.seq, iteration = snapshot.iteration, "snapshot sent");
            true
        } else {
            self.status.resume();
            self.stats.dropped += 1;
            debug!(seq = snapshot.seq, "outbound closed during send");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SnapshotChannel;
    use crate::snapshot::Telemetry;
    use crate::status::StatusPatch;

    fn dataset() -> Arc<Dataset> {
        Arc::new(Dataset::from_rows("pair", vec![vec![0.0], vec![1.0]], None, None).unwrap())
    }

    fn snap(seq: u64) -> Snapshot {
        Snapshot {
            seq,
            iteration: seq * 5,
            positions: vec![[0.0, 0.0], [1.0, 1.0]],
            fixed: vec![true, false],
            influence: vec![0.0, 0.0],
            grad_magnitude: vec![0.0, 0.0],
            importance: None,
            error: 0.5,
            telemetry: Telemetry::default(),
        }
    }

    fn fast_status() -> Arc<StatusStore> {
        Arc::new(
            StatusStore::with_patch(&StatusPatch {
                tick_frequency_ms: Some(1),
                ..Default::default()
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn forwards_snapshot_and_pauses() {
        let status = fast_status();
        let channel = SnapshotChannel::default();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let dispatcher =
            Dispatcher::new(Arc::clone(&status), channel.subscribe(), dataset(), tx);
        let handle = tokio::spawn(dispatcher.run());

        channel.publish(snap(1));
        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["kind"], "snapshot");
        assert_eq!(value["iteration"], 5);
        assert_eq!(value["points"][0]["fixed"], true);
        assert!(!status.read().ready);

        status.stop();
        let stats = handle.await.unwrap();
        assert_eq!(stats.sent, 1);
    }

    #[tokio::test]
    async fn closed_outbound_drops_and_keeps_running() {
        let status = fast_status();
        let channel = SnapshotChannel::default();
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(rx);
        let mut sub = channel.subscribe();
        let mut dispatcher =
            Dispatcher::new(Arc::clone(&status), channel.subscribe(), dataset(), tx);

        channel.publish(snap(1));
        let snapshot = sub.poll().unwrap();
        assert!(!dispatcher.forward(&snapshot));
        assert_eq!(dispatcher.stats.dropped, 1);
        assert!(status.read().ready);
    }

    #[tokio::test]
    async fn exits_when_channel_closes() {
        let status = fast_status();
        let channel = SnapshotChannel::default();
        let (tx, _rx) = mpsc::unbounded_channel::<String>();
        let dispatcher = Dispatcher::new(status, channel.subscribe(), dataset(), tx);
        channel.close();
        let stats = dispatcher.run().await;
        assert_eq!(stats, DispatchStats::default());
    }
}
