//! Shared status store
//!
//! The single coordination record between the optimizer loop, the dispatcher
//! and the command front-end. Every write is a merge: keys present in the
//! patch overwrite, everything else is preserved.
//!
//! # Consistency
//!
//! One `merge` call is applied atomically under the lock, so fields written
//! together (e.g. `ready` + `client_iteration` in [`StatusStore::acknowledge`])
//! are always observed together. Two concurrent merges may interleave in
//! either order; no invariant spans separate calls.
//!
//! Waiters block on a condition variable that every merge signals, so resume
//! and stop wake the optimizer immediately. The wait still re-checks on each
//! `tick_frequency_ms` as a fallback.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Flat record of control flags and live tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Pacing interval for waits and post-publish pauses (default: 50ms)
    pub tick_frequency_ms: u64,
    /// Sampling stride: publish a snapshot every `n_jump` iterations (default: 10)
    pub n_jump: u64,
    /// Optimizer may proceed; cleared by the dispatcher after each send
    pub ready: bool,
    /// Cancellation flag
    pub stop: bool,
    /// Compute quality measures at sampling points
    pub measure: bool,
    /// Keep pinned points across iterations instead of one wave only
    pub hard_move: bool,
    /// Carry constraints and telemetry across optimization phases
    pub accumulate: bool,
    /// Redistribute pinned points' gradient to their neighbours
    pub share_grad: bool,
    /// Attach a PageRank importance score to snapshots
    pub importance: bool,
    /// Last iteration the optimizer published
    pub iteration: u64,
    /// Last iteration the client acknowledged
    pub client_iteration: u64,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            tick_frequency_ms: 50,
            n_jump: 10,
            ready: true,
            stop: false,
            measure: false,
            hard_move: false,
            accumulate: true,
            share_grad: false,
            importance: false,
            iteration: 0,
            client_iteration: 0,
        }
    }
}

impl StatusRecord {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_frequency_ms)
    }
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusPatch {
    pub tick_frequency_ms: Option<u64>,
    pub n_jump: Option<u64>,
    pub ready: Option<bool>,
    pub stop: Option<bool>,
    pub measure: Option<bool>,
    pub hard_move: Option<bool>,
    pub accumulate: Option<bool>,
    pub share_grad: Option<bool>,
    pub importance: Option<bool>,
    pub iteration: Option<u64>,
    pub client_iteration: Option<u64>,
}

impl StatusPatch {
    /// Reject values the loop cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.n_jump == Some(0) {
            return Err(EngineError::Config("n_jump must be at least 1".into()));
        }
        Ok(())
    }

    fn apply_to(&self, record: &mut StatusRecord) {
        if let Some(v) = self.tick_frequency_ms {
            record.tick_frequency_ms = v;
        }
        if let Some(v) = self.n_jump {
            record.n_jump = v;
        }
        if let Some(v) = self.ready {
            record.ready = v;
        }
        if let Some(v) = self.stop {
            record.stop = v;
        }
        if let Some(v) = self.measure {
            record.measure = v;
        }
        if let Some(v) = self.hard_move {
            record.hard_move = v;
        }
        if let Some(v) = self.accumulate {
            record.accumulate = v;
        }
        if let Some(v) = self.share_grad {
            record.share_grad = v;
        }
        if let Some(v) = self.importance {
            record.importance = v;
        }
        if let Some(v) = self.iteration {
            record.iteration = v;
        }
        if let Some(v) = self.client_iteration {
            record.client_iteration = v;
        }
    }
}

/// Thread-safe owner of the [`StatusRecord`].
#[derive(Debug, Default)]
pub struct StatusStore {
    record: Mutex<StatusRecord>,
    changed: Condvar,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `patch` merged over the defaults.
    pub fn with_patch(patch: &StatusPatch) -> Result<Self> {
        let store = Self::new();
        store.merge(patch)?;
        Ok(store)
    }

    /// Copy of the full record.
    pub fn read(&self) -> StatusRecord {
        self.record.lock().clone()
    }

    /// Only the named fields, as JSON.
    pub fn read_fields(&self, fields: &[&str]) -> Result<Map<String, Value>> {
        let full = match serde_json::to_value(self.read())? {
            Value::Object(map) => map,
            _ => return Err(EngineError::Config("status record is not an object".into())),
        };

        fields
            .iter()
            .map(|&name| {
                full.get(name)
                    .cloned()
                    .map(|v| (name.to_string(), v))
                    .ok_or_else(|| EngineError::Config(format!("unknown status field '{}'", name)))
            })
            .collect()
    }

    /// Merge `patch` into the record and wake every waiter.
    pub fn merge(&self, patch: &StatusPatch) -> Result<()> {
        patch.validate()?;
        {
            let mut record = self.record.lock();
            patch.apply_to(&mut record);
        }
        self.changed.notify_all();
        Ok(())
    }

    /// Merge a JSON object of the same shape as [`StatusPatch`].
    pub fn merge_json(&self, value: Value) -> Result<()> {
        let patch: StatusPatch = serde_json::from_value(value)
            .map_err(|e| EngineError::Config(format!("invalid status update: {}", e)))?;
        self.merge(&patch)
    }

    /// Restore documented defaults.
    pub fn reset(&self) {
        *self.record.lock() = StatusRecord::default();
        self.changed.notify_all();
        debug!("status store reset to defaults");
    }

    /// Hold the optimizer at its next wait point.
    pub fn pause(&self) {
        self.set(|r| r.ready = false);
    }

    pub fn resume(&self) {
        self.set(|r| r.ready = true);
    }

    /// Request cancellation of both workers.
    pub fn stop(&self) {
        self.set(|r| r.stop = true);
    }

    /// Client acknowledgment: resume and record the client's iteration together.
    pub fn acknowledge(&self, client_iteration: u64) {
        self.set(|r| {
            r.ready = true;
            r.client_iteration = client_iteration;
        });
    }

    /// Publish the optimizer's latest sampled iteration.
    pub fn record_iteration(&self, iteration: u64) {
        self.set(|r| r.iteration = iteration);
    }

    pub fn is_stopped(&self) -> bool {
        self.record.lock().stop
    }

    /// Block until `ready` is set or `stop` is requested.
    ///
    /// Returns the record seen on wake-up; callers check `stop` on it.
    pub fn wait_until_ready(&self) -> StatusRecord {
        let mut record = self.record.lock();
        while !record.ready && !record.stop {
            let tick = record.tick().max(Duration::from_millis(1));
            self.changed.wait_for(&mut record, tick);
        }
        record.clone()
    }

    /// Sleep for up to `duration`, returning early once `stop` is requested.
    ///
    /// Returns `true` when woken by a stop.
    pub fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut record = self.record.lock();
        while !record.stop {
            if self.changed.wait_until(&mut record, deadline).timed_out() {
                break;
            }
        }
        record.stop
    }

    fn set(&self, f: impl FnOnce(&mut StatusRecord)) {
        {
            let mut record = self.record.lock();
            f(&mut *record);
        }
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn merge_preserves_unspecified_keys() {
        let store = StatusStore::new();
        store
            .merge(&StatusPatch {
                measure: Some(true),
                ..Default::default()
            })
            .unwrap();
        store
            .merge(&StatusPatch {
                hard_move: Some(true),
                ..Default::default()
            })
            .unwrap();

        let record = store.read();
        assert!(record.measure);
        assert!(record.hard_move);
        assert_eq!(record.n_jump, StatusRecord::default().n_jump);
    }

    #[test]
    fn read_fields_returns_only_requested() {
        let store = StatusStore::new();
        let fields = store.read_fields(&["ready", "n_jump"]).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["ready"], json!(true));
        assert_eq!(fields["n_jump"], json!(10));
    }

    #[test]
    fn read_unknown_field_fails() {
        let store = StatusStore::new();
        assert!(store.read_fields(&["nope"]).is_err());
    }

    #[test]
    fn merge_json_rejects_unknown_and_zero_stride() {
        let store = StatusStore::new();
        assert!(store.merge_json(json!({"n_jmp": 3})).is_err());
        assert!(store.merge_json(json!({"n_jump": 0})).is_err());
        assert!(store.merge_json(json!({"n_jump": 3})).is_ok());
        assert_eq!(store.read().n_jump, 3);
    }

    #[test]
    fn reset_restores_defaults() {
        let store = StatusStore::new();
        store.stop();
        store.pause();
        store.reset();
        assert_eq!(store.read(), StatusRecord::default());
    }

    #[test]
    fn acknowledge_sets_ready_and_iteration_together() {
        let store = StatusStore::new();
        store.pause();
        store.acknowledge(42);
        let record = store.read();
        assert!(record.ready);
        assert_eq!(record.client_iteration, 42);
    }

    #[test]
    fn waiter_wakes_on_resume() {
        let store = Arc::new(StatusStore::new());
        store
            .merge(&StatusPatch {
                ready: Some(false),
                tick_frequency_ms: Some(10_000),
                ..Default::default()
            })
            .unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.wait_until_ready())
        };
        thread::sleep(Duration::from_millis(20));
        store.resume();

        let seen = waiter.join().unwrap();
        assert!(seen.ready);
        assert!(!seen.stop);
    }

    #[test]
    fn sleep_is_cut_short_by_stop() {
        let store = Arc::new(StatusStore::new());
        let sleeper = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.sleep_unless_stopped(Duration::from_secs(60)))
        };
        thread::sleep(Duration::from_millis(20));
        store.stop();
        assert!(sleeper.join().unwrap());
    }

    #[test]
    fn sleep_runs_out_without_stop() {
        let store = StatusStore::new();
        assert!(!store.sleep_unless_stopped(Duration::from_millis(5)));
    }

    #[test]
    fn waiter_wakes_on_stop() {
        let store = Arc::new(StatusStore::new());
        store.pause();

        let waiter = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.wait_until_ready())
        };
        store.stop();

        let seen = waiter.join().unwrap();
        assert!(seen.stop);
    }
}
