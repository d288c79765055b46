//! TSNEX Core Engine
//!
//! Interactive t-SNE: an optimizer loop that keeps refining a 2-D embedding
//! while a client watches snapshots stream out and pins points mid-run.
//!
//! # Layout
//!
//! - [`optimizer`] - gradient descent with momentum and adaptive gains
//! - [`objective`] / [`affinity`] - KL divergence kernel and high-dimensional P
//! - [`status`] - shared control record (ready/stop and live tunables)
//! - [`interaction`] / [`constraints`] - user edits and the pinned-point set
//! - [`channel`] / [`dispatcher`] - snapshot broadcast and client forwarding
//! - [`scoring`] / [`importance`] - quality measures and PageRank/HITS ranking
//! - [`session`] - wires a run together on a tokio runtime
//!
//! # Features
//!
//! - `parallel` - Parallel gradient and distance rows via rayon
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tsnex_core::{
//!     interaction_queue, joint_probabilities, Dataset, EmbeddingState, EngineConfig,
//!     KlDivergence, Optimizer, SnapshotChannel, StatusStore,
//! };
//!
//! let rows = (0..6).map(|i| vec![i as f64, (i % 2) as f64]).collect();
//! let dataset = Dataset::from_rows("demo", rows, None, None).unwrap();
//! let config = EngineConfig {
//!     max_iter: Some(20),
//!     ..Default::default()
//! };
//!
//! let (_events, queue) = interaction_queue();
//! let optimizer = Optimizer::new(
//!     config,
//!     Box::new(KlDivergence::new(joint_probabilities(&dataset, 2.0))),
//!     Arc::new(StatusStore::new()),
//!     queue,
//!     Arc::new(SnapshotChannel::default()),
//! );
//! let outcome = optimizer.run(EmbeddingState::random(dataset.len(), 0).unwrap());
//! assert_eq!(outcome.state.iteration, 20);
//! ```

pub mod affinity;
pub mod channel;
pub mod config;
pub mod constraints;
pub mod dataset;
pub mod dispatcher;
pub mod error;
pub mod importance;
pub mod interaction;
pub mod objective;
pub mod optimizer;
pub mod scoring;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod tracing;

mod geometry;

// Re-export main types at crate root
pub use affinity::{joint_probabilities, joint_probabilities_from_distances, AffinityMatrix};
pub use channel::{SnapshotChannel, SnapshotSubscriber};
pub use config::EngineConfig;
pub use constraints::{ConstraintSet, MergeOutcome};
pub use dataset::{Dataset, DatasetLoader};
pub use dispatcher::{DispatchStats, Dispatcher, Outbound};
pub use error::{EngineError, Result};
pub use interaction::{interaction_queue, InteractionEvent, InteractionReceiver, InteractionSender};
pub use objective::{EvalContext, Evaluation, KlDivergence, Objective, PinPenalty};
pub use optimizer::{EmbeddingState, Optimizer, OptimizerOutcome, StopReason};
pub use scoring::{DrMetric, NeighborScorer, QualityReport, Scorer};
pub use session::{Session, SessionOptions};
pub use snapshot::{PointRecord, SeriesBlock, Snapshot, Telemetry, WireFrame};
pub use status::{StatusPatch, StatusRecord, StatusStore};
