//! Session orchestration
//!
//! Wires one run together: the optimizer on a blocking worker, the dispatcher
//! as an async task, and the session-scoped queue and channel between them.
//! The status store outlives runs; the last embedding survives a reset.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::affinity::joint_probabilities_from_distances;
use crate::channel::SnapshotChannel;
use crate::config::EngineConfig;
use crate::dataset::Dataset;
use crate::dispatcher::{DispatchStats, Dispatcher, Outbound};
use crate::error::{EngineError, Result};
use crate::interaction::{interaction_queue, InteractionEvent, InteractionSender};
use crate::objective::KlDivergence;
use crate::optimizer::{EmbeddingState, Optimizer, OptimizerOutcome};
use crate::scoring::{NeighborScorer, QualityReport, Scorer};
use crate::status::{StatusPatch, StatusStore};
use crate::tracing::prefix;

/// Everything `start` needs besides the dataset and the outbound side.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub config: EngineConfig,
    /// Merged over the current status record
    pub status: StatusPatch,
    /// Initial layout; random when absent
    pub embedding: Option<Vec<[f64; 2]>>,
}

struct RunResult {
    outcome: OptimizerOutcome,
    scorer: Arc<dyn Scorer>,
}

struct Running {
    dataset: Arc<Dataset>,
    interactions: InteractionSender,
    channel: Arc<SnapshotChannel>,
    optimizer: JoinHandle<RunResult>,
    dispatcher: JoinHandle<DispatchStats>,
}

/// One interactive embedding session at a time.
pub struct Session {
    status: Arc<StatusStore>,
    running: Option<Running>,
    last_state: Option<EmbeddingState>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            status: Arc::new(StatusStore::new()),
            running: None,
            last_state: None,
        }
    }

    pub fn status(&self) -> &Arc<StatusStore> {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Dataset of the running session.
    pub fn dataset(&self) -> Option<&Arc<Dataset>> {
        self.running.as_ref().map(|r| &r.dataset)
    }

    /// Final state of the last finished run.
    pub fn last_state(&self) -> Option<&EmbeddingState> {
        self.last_state.as_ref()
    }

    /// Validate, seed and spawn both workers. Must be called inside a tokio runtime.
    ///
    /// Affinities are computed on the optimizer's worker, so this returns
    /// before the first iteration runs.
    pub fn start<O>(&mut self, dataset: Dataset, options: SessionOptions, outbound: O) -> Result<()>
    where
        O: Outbound + 'static,
    {
        if self.running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }
        let SessionOptions {
            config,
            status,
            embedding,
        } = options;
        config.validate()?;
        status.validate()?;

        let n = dataset.len();
        let state = match embedding {
            Some(positions) => {
                if positions.len() != n {
                    return Err(EngineError::Config(format!(
                        "initial embedding has {} points, dataset '{}' has {}",
                        positions.len(),
                        dataset.name(),
                        n
                    )));
                }
                if positions.iter().flatten().any(|v| !v.is_finite()) {
                    return Err(EngineError::Config(
                        "initial embedding must be finite".into(),
                    ));
                }
                EmbeddingState::new(positions)
            }
            None => EmbeddingState::random(n, config.seed)?,
        };

        self.status.merge(&StatusPatch {
            stop: Some(false),
            ready: Some(true),
            iteration: Some(0),
            client_iteration: Some(0),
            ..Default::default()
        })?;
        self.status.merge(&status)?;

        let dataset = Arc::new(dataset);
        let channel = Arc::new(SnapshotChannel::new(config.snapshot_capacity));
        let (interactions, queue) = interaction_queue();

        let dispatcher = tokio::spawn(
            Dispatcher::new(
                Arc::clone(&self.status),
                channel.subscribe(),
                Arc::clone(&dataset),
                outbound,
            )
            .run(),
        );

        let optimizer = {
            let dataset = Arc::clone(&dataset);
            let status = Arc::clone(&self.status);
            let channel = Arc::clone(&channel);
            tokio::task::spawn_blocking(move || {
                let distances = Arc::new(dataset.squared_distances());
                let p = joint_probabilities_from_distances(&distances, n, config.perplexity);
                let scorer: Arc<dyn Scorer> = Arc::new(NeighborScorer::with_distances(
                    Arc::clone(&distances),
                    dataset.classes().map(<[i64]>::to_vec),
                    config.measure_k,
                ));
                let outcome = Optimizer::new(
                    config,
                    Box::new(KlDivergence::new(p)),
                    status,
                    queue,
                    channel,
                )
                .with_scorer(Arc::clone(&scorer), distances)
                .run(state);
                RunResult { outcome, scorer }
            })
        };

        info!(
            "{} session started on '{}' ({} points, {} features)",
            prefix::OPEN,
            dataset.name(),
            n,
            dataset.dims()
        );
        self.running = Some(Running {
            dataset,
            interactions,
            channel,
            optimizer,
            dispatcher,
        });
        Ok(())
    }

    /// Queue a user edit and let the optimizer pick it up.
    pub fn interact(&self, event: InteractionEvent) -> Result<()> {
        let running = self.running.as_ref().ok_or(EngineError::NotRunning)?;
        running.interactions.push(event)?;
        self.status.resume();
        Ok(())
    }

    /// Client acknowledgment of the frame at `client_iteration`.
    pub fn acknowledge(&self, client_iteration: u64) -> Result<()> {
        if self.running.is_none() {
            return Err(EngineError::NotRunning);
        }
        self.status.acknowledge(client_iteration);
        Ok(())
    }

    /// Wait for the optimizer to return on its own (budget or convergence),
    /// then shut the dispatcher down.
    pub async fn join(&mut self) -> Result<OptimizerOutcome> {
        let running = self.running.take().ok_or(EngineError::NotRunning)?;
        let result = running
            .optimizer
            .await
            .map_err(|e| EngineError::Worker(format!("optimizer: {}", e)))?;

        self.status.stop();
        running.channel.close();
        Self::join_dispatcher(running.dispatcher).await?;

        self.last_state = Some(result.outcome.state.clone());
        info!("{} session finished", prefix::CLOSE);
        Ok(result.outcome)
    }

    /// Stop both workers, wait for them, and restore status defaults.
    ///
    /// Returns a final quality report when measurement was enabled. Without a
    /// running session only the status store is reset.
    pub async fn reset(&mut self) -> Result<Option<QualityReport>> {
        let measured = self.status.read().measure;
        let Some(running) = self.running.take() else {
            self.status.reset();
            return Ok(None);
        };

        self.status.stop();
        running.channel.close();
        let optimizer = running
            .optimizer
            .await
            .map_err(|e| EngineError::Worker(format!("optimizer: {}", e)));
        let dispatcher = Self::join_dispatcher(running.dispatcher).await;
        self.status.reset();

        let RunResult { outcome, scorer } = optimizer?;
        dispatcher?;
        info!(
            "{} session reset at iteration {} ({} snapshots)",
            prefix::CLOSE,
            outcome.state.iteration,
            outcome.snapshots
        );

        let report = if measured {
            let positions = outcome.state.positions.clone();
            let report = tokio::task::spawn_blocking(move || scorer.report(&positions))
                .await
                .map_err(|e| EngineError::Worker(format!("scoring: {}", e)))?;
            Some(report)
        } else {
            None
        };
        self.last_state = Some(outcome.state);
        Ok(report)
    }

    async fn join_dispatcher(handle: JoinHandle<DispatchStats>) -> Result<DispatchStats> {
        handle.await.map_err(|e| {
            warn!("dispatcher failed: {}", e);
            EngineError::Worker(format!("dispatcher: {}", e))
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
