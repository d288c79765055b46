//! Interaction queue
//!
//! FIFO of user edits from the command front-end to the optimizer loop.
//! Any number of producers, exactly one consumer; the loop takes at most one
//! event per iteration and never blocks on the queue.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{EngineError, Result};

/// One user edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InteractionEvent {
    /// Pin `ids[k]` at `positions[k]`
    Pin {
        ids: Vec<usize>,
        positions: Vec<[f64; 2]>,
    },
    /// Replace the whole layout with client-edited positions
    Reseed { embedding: Vec<[f64; 2]> },
}

impl InteractionEvent {
    pub fn pin(ids: Vec<usize>, positions: Vec<[f64; 2]>) -> Result<Self> {
        if ids.len() != positions.len() {
            return Err(EngineError::Interaction(format!(
                "{} ids but {} positions",
                ids.len(),
                positions.len()
            )));
        }
        if positions.iter().flatten().any(|v| !v.is_finite()) {
            return Err(EngineError::Interaction(
                "pinned positions must be finite".into(),
            ));
        }
        Ok(Self::Pin { ids, positions })
    }

    pub fn reseed(embedding: Vec<[f64; 2]>) -> Result<Self> {
        if embedding.iter().flatten().any(|v| !v.is_finite()) {
            return Err(EngineError::Interaction(
                "reseed embedding must be finite".into(),
            ));
        }
        Ok(Self::Reseed { embedding })
    }
}

/// Producer side, cloneable.
#[derive(Debug, Clone)]
pub struct InteractionSender {
    tx: mpsc::UnboundedSender<InteractionEvent>,
}

impl InteractionSender {
    /// Enqueue an event. Fails only once the consumer is gone.
    pub fn push(&self, event: InteractionEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| EngineError::Interaction("interaction queue is closed".into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side, owned by the optimizer loop.
#[derive(Debug)]
pub struct InteractionReceiver {
    rx: mpsc::UnboundedReceiver<InteractionEvent>,
}

impl InteractionReceiver {
    /// Next pending event, if any. Never blocks.
    pub fn try_next(&mut self) -> Option<InteractionEvent> {
        self.rx.try_recv().ok()
    }
}

/// Session-scoped queue.
pub fn interaction_queue() -> (InteractionSender, InteractionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InteractionSender { tx }, InteractionReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (tx, mut rx) = interaction_queue();
        tx.push(InteractionEvent::pin(vec![1], vec![[1.0, 1.0]]).unwrap())
            .unwrap();
        tx.push(InteractionEvent::pin(vec![2], vec![[2.0, 2.0]]).unwrap())
            .unwrap();

        match rx.try_next() {
            Some(InteractionEvent::Pin { ids, .. }) => assert_eq!(ids, vec![1]),
            other => panic!("unexpected {:?}", other),
        }
        match rx.try_next() {
            Some(InteractionEvent::Pin { ids, .. }) => assert_eq!(ids, vec![2]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn push_after_consumer_dropped_fails() {
        let (tx, rx) = interaction_queue();
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx
            .push(InteractionEvent::reseed(vec![[0.0, 0.0]]).unwrap())
            .is_err());
    }

    #[test]
    fn mismatched_lengths_rejected() {
        assert!(InteractionEvent::pin(vec![0, 1], vec![[0.0, 0.0]]).is_err());
    }

    #[test]
    fn deserializes_both_shapes() {
        let pin: InteractionEvent =
            serde_json::from_str(r#"{"ids":[3],"positions":[[0.5,1.5]]}"#).unwrap();
        assert_eq!(
            pin,
            InteractionEvent::Pin {
                ids: vec![3],
                positions: vec![[0.5, 1.5]]
            }
        );
        let reseed: InteractionEvent =
            serde_json::from_str(r#"{"embedding":[[0.0,0.0],[1.0,1.0]]}"#).unwrap();
        assert!(matches!(reseed, InteractionEvent::Reseed { .. }));
    }
}
