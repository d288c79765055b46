//! Optimizer loop
//!
//! Gradient descent with momentum and per-coordinate adaptive gains, driven
//! by the shared status store and steered by interaction events.
//!
//! # Iteration
//!
//! 1. Read the status record; return on `stop`, block while not `ready`.
//! 2. Take at most one event from the interaction queue and fold it in.
//!    Without `hard_move` a pin event replaces the previous wave of pinned
//!    points; with it the new pins are merged.
//! 3. Force pinned points onto their targets.
//! 4. Evaluate the objective; zero or share the pinned points' gradient.
//! 5. Momentum and gains update, then re-force pinned points.
//! 6. Every `n_jump` iterations sample: score, append telemetry, publish.
//! 7. Every `n_iter_check` iterations update convergence bookkeeping.
//!
//! # Schedule
//!
//! Two phases share one global iteration counter: exploration (exaggerated P,
//! low momentum) for `exploration_iters`, then refinement until `max_iter` or
//! forever. Each phase starts with fresh momentum, unit gains and fresh
//! best-error bookkeeping.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::channel::SnapshotChannel;
use crate::config::EngineConfig;
use crate::constraints::ConstraintSet;
use crate::error::{EngineError, Result};
use crate::geometry;
use crate::importance;
use crate::interaction::{InteractionEvent, InteractionReceiver};
use crate::objective::{EvalContext, Evaluation, Objective, PinPenalty};
use crate::scoring::Scorer;
use crate::snapshot::{Snapshot, Telemetry};
use crate::status::{StatusRecord, StatusStore};
use crate::tracing::prefix;

/// Standard deviation of the random initial layout.
const INIT_STD: f64 = 1e-4;
/// Neighbours per point in the importance graph.
const IMPORTANCE_K: usize = 10;
const PAGERANK_DAMPING: f64 = 0.85;

/// Positions plus everything the update rule carries between iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingState {
    pub positions: Vec<[f64; 2]>,
    /// Momentum buffer
    pub update: Vec<[f64; 2]>,
    pub gains: Vec<[f64; 2]>,
    /// Global iteration counter, 0 before the first iteration
    pub iteration: u64,
    /// KL divergence at the last iteration
    pub error: f64,
    pub best_error: f64,
    pub best_iter: u64,
}

impl EmbeddingState {
    pub fn new(positions: Vec<[f64; 2]>) -> Self {
        let n = positions.len();
        Self {
            positions,
            update: vec![[0.0, 0.0]; n],
            gains: vec![[1.0, 1.0]; n],
            iteration: 0,
            error: f64::MAX,
            best_error: f64::MAX,
            best_iter: 0,
        }
    }

    /// `n` points drawn from N(0, 1e-4²), reproducible for a given seed.
    pub fn random(n: usize, seed: u64) -> Result<Self> {
        let normal = Normal::new(0.0, INIT_STD)
            .map_err(|e| EngineError::Config(format!("initial layout: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let positions = (0..n)
            .map(|_| [normal.sample(&mut rng), normal.sample(&mut rng)])
            .collect();
        Ok(Self::new(positions))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn start_phase(&mut self) {
        self.update.iter_mut().for_each(|u| *u = [0.0, 0.0]);
        self.gains.iter_mut().for_each(|g| *g = [1.0, 1.0]);
        self.best_error = f64::MAX;
        self.best_iter = self.iteration;
    }

    /// One momentum-and-gains step.
    ///
    /// A gain grows by 0.2 while the gradient keeps opposing the previous
    /// update and shrinks by a factor 0.8 otherwise, never below `min_gain`.
    pub fn apply_gradient(
        &mut self,
        grad: &[[f64; 2]],
        momentum: f64,
        learning_rate: f64,
        min_gain: f64,
    ) {
        let rows = self
            .positions
            .iter_mut()
            .zip(self.update.iter_mut())
            .zip(self.gains.iter_mut())
            .zip(grad);
        for (((p, u), gain), g) in rows {
            for c in 0..2 {
                if u[c] * g[c] < 0.0 {
                    gain[c] += 0.2;
                } else {
                    gain[c] *= 0.8;
                }
                gain[c] = gain[c].max(min_gain);
                u[c] = momentum * u[c] - learning_rate * gain[c] * g[c];
                p[c] += u[c];
            }
        }
    }
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// `stop` was set in the status store
    Stopped,
    /// `max_iter` reached
    Budget,
    /// Converged with `stop_on_convergence` enabled
    Converged,
}

/// Everything the loop hands back when it returns.
#[derive(Debug, Clone)]
pub struct OptimizerOutcome {
    pub state: EmbeddingState,
    pub reason: StopReason,
    /// Snapshots published over the run
    pub snapshots: u64,
    pub constraints: ConstraintSet,
    pub telemetry: Telemetry,
}

#[derive(Debug, Clone, Copy)]
struct Phase {
    name: &'static str,
    exaggeration: f64,
    momentum: f64,
    /// Last global iteration of the phase, `None` for unbounded
    end: Option<u64>,
}

/// Owns the embedding for the lifetime of a run.
pub struct Optimizer {
    config: EngineConfig,
    objective: Box<dyn Objective>,
    status: Arc<StatusStore>,
    queue: InteractionReceiver,
    channel: Arc<SnapshotChannel>,
    scorer: Option<(Arc<dyn Scorer>, Arc<Vec<f64>>)>,
    constraints: ConstraintSet,
    penalty: Option<PinPenalty>,
    telemetry: Telemetry,
    influence: Vec<f64>,
    seq: u64,
}

impl Optimizer {
    pub fn new(
        config: EngineConfig,
        objective: Box<dyn Objective>,
        status: Arc<StatusStore>,
        queue: InteractionReceiver,
        channel: Arc<SnapshotChannel>,
    ) -> Self {
        Self {
            config,
            objective,
            status,
            queue,
            channel,
            scorer: None,
            constraints: ConstraintSet::new(),
            penalty: None,
            telemetry: Telemetry::default(),
            influence: Vec::new(),
            seq: 0,
        }
    }

    /// Enable quality measures; `high_dim` is the data's dense squared-distance matrix.
    pub fn with_scorer(mut self, scorer: Arc<dyn Scorer>, high_dim: Arc<Vec<f64>>) -> Self {
        self.scorer = Some((scorer, high_dim));
        self
    }

    /// Run until stopped, out of budget or (optionally) converged.
    pub fn run(mut self, mut state: EmbeddingState) -> OptimizerOutcome {
        info!(
            "{} optimizer started: {} points, max_iter {:?}",
            prefix::OPEN,
            state.len(),
            self.config.max_iter
        );
        self.influence = vec![0.0; state.len()];

        let budget = self.config.max_iter;
        let exploration_end = state.iteration + self.config.exploration_iters;
        let phases = [
            Phase {
                name: "exploration",
                exaggeration: self.config.early_exaggeration,
                momentum: self.config.exploration_momentum,
                end: Some(budget.map_or(exploration_end, |b| b.min(exploration_end))),
            },
            Phase {
                name: "refinement",
                exaggeration: 1.0,
                momentum: self.config.momentum,
                end: budget,
            },
        ];

        let mut reason = StopReason::Budget;
        for (index, phase) in phases.iter().enumerate() {
            if index > 0 && !self.status.read().accumulate {
                self.constraints.clear();
                self.penalty = None;
                self.telemetry.clear();
                self.influence.iter_mut().for_each(|z| *z = 0.0);
            }
            state.start_phase();
            debug!(phase = phase.name, from = state.iteration, end = ?phase.end, "phase start");

            match self.run_phase(&mut state, phase) {
                StopReason::Budget => continue,
                other => {
                    reason = other;
                    break;
                }
            }
        }

        info!(
            "{} optimizer finished at iteration {} ({:?}, error {:.6})",
            prefix::CLOSE,
            state.iteration,
            reason,
            state.error
        );
        OptimizerOutcome {
            state,
            reason,
            snapshots: self.seq,
            constraints: self.constraints,
            telemetry: self.telemetry,
        }
    }

    fn run_phase(&mut self, state: &mut EmbeddingState, phase: &Phase) -> StopReason {
        loop {
            if phase.end.is_some_and(|end| state.iteration >= end) {
                return StopReason::Budget;
            }

            let mut status = self.status.read();
            if status.stop {
                return StopReason::Stopped;
            }
            if !status.ready {
                status = self.status.wait_until_ready();
                if status.stop {
                    return StopReason::Stopped;
                }
            }

            state.iteration += 1;
            let iteration = state.iteration;

            if let Some(event) = self.queue.try_next() {
                self.fold_event(event, state, status.hard_move);
            }
            self.constraints.apply(&mut state.positions);

            let ctx = EvalContext {
                exaggeration: phase.exaggeration,
                penalty: self.penalty.as_ref(),
            };
            let Evaluation {
                kl,
                penalty,
                mut gradient,
                divergences,
            } = self.objective.evaluate(&state.positions, &ctx);
            for (z, d) in self.influence.iter_mut().zip(&divergences) {
                *z += d;
            }

            if status.share_grad {
                self.constraints
                    .share_gradient(&mut gradient, &state.positions, self.config.share_k);
            } else {
                self.constraints.zero_gradient(&mut gradient);
            }
            let grad_magnitude: Vec<f64> = gradient
                .iter()
                .map(|g| (g[0] * g[0] + g[1] * g[1]).sqrt())
                .collect();
            let grad_norm: f64 = grad_magnitude.iter().sum();

            let previous = status.measure.then(|| state.positions.clone());
            state.apply_gradient(
                &gradient,
                phase.momentum,
                self.config.learning_rate,
                self.config.min_gain,
            );
            self.constraints.apply(&mut state.positions);
            state.error = kl;

            if iteration % status.n_jump.max(1) == 0 {
                self.sample(
                    state,
                    &status,
                    previous.as_deref(),
                    penalty,
                    grad_norm,
                    grad_magnitude,
                );
            }

            if iteration % self.config.n_iter_check.max(1) == 0 {
                let mut converged = false;
                if kl < state.best_error {
                    state.best_error = kl;
                    state.best_iter = iteration;
                } else if iteration - state.best_iter > self.config.n_iter_without_progress {
                    debug!(
                        iteration,
                        "no progress for {} iterations", self.config.n_iter_without_progress
                    );
                    converged = true;
                }
                if grad_norm <= self.config.min_grad_norm {
                    debug!(iteration, grad_norm, "gradient norm below threshold");
                    converged = true;
                }
                if converged && self.config.stop_on_convergence {
                    return StopReason::Converged;
                }
            }
        }
    }

    /// Fold one interaction event into the constraint set or the layout.
    ///
    /// A pin event replaces the current pins unless `hard_move` is set, in
    /// which case it is merged into them.
    fn fold_event(
        &mut self,
        event: InteractionEvent,
        state: &mut EmbeddingState,
        hard_move: bool,
    ) {
        let n = state.len();
        match event {
            InteractionEvent::Pin { ids, positions } => {
                if !hard_move {
                    self.constraints.clear();
                }
                let outcome = self.constraints.merge(&ids, &positions, n);
                // neighbourhoods come from the layout before the pins move
                self.penalty = Some(self.constraints.penalty(
                    &state.positions,
                    self.config.pin_neighbor_fraction,
                    self.config.reg_param,
                ));
                debug!(
                    accepted = outcome.accepted,
                    pinned = self.constraints.len(),
                    "merged pin event"
                );
            }
            InteractionEvent::Reseed { embedding } => {
                if embedding.len() == n {
                    state.positions = embedding;
                    debug!("layout reseeded by client");
                } else {
                    warn!(
                        expected = n,
                        got = embedding.len(),
                        "dropping reseed event with wrong point count"
                    );
                }
            }
        }
    }

    fn sample(
        &mut self,
        state: &EmbeddingState,
        status: &StatusRecord,
        previous: Option<&[[f64; 2]]>,
        penalty: f64,
        grad_norm: f64,
        grad_magnitude: Vec<f64>,
    ) {
        let n = state.len();
        let importance = status.importance.then(|| {
            let distances = geometry::embedding_sq_distances(&state.positions);
            importance::pagerank(
                &importance::knn_graph(&distances, n, IMPORTANCE_K),
                PAGERANK_DAMPING,
            )
        });

        if let (Some((scorer, high_dim)), Some(previous)) = (&self.scorer, previous) {
            let trust = scorer.quality(&state.positions);
            let (stability, convergence) = scorer.measure(previous, &state.positions, high_dim);
            self.telemetry.trustworthiness.push(trust);
            self.telemetry.stability.push(stability);
            self.telemetry.convergence.push(convergence);
            if let Some(accuracy) = scorer.classify(&state.positions) {
                self.telemetry.accuracy.push(accuracy);
            }
            if let Some((v_measure, silhouette)) = scorer.cluster(&state.positions) {
                self.telemetry.v_measure.push(v_measure);
                self.telemetry.silhouette.push(silhouette);
            }
        }
        self.telemetry.errors.push(state.error);
        self.telemetry.penalties.push(penalty);
        self.telemetry.grad_norms.push(grad_norm);

        self.seq += 1;
        self.channel.publish(Snapshot {
            seq: self.seq,
            iteration: state.iteration,
            positions: state.positions.clone(),
            fixed: self.constraints.mask(n),
            influence: self.influence.clone(),
            grad_magnitude,
            importance,
            error: state.error,
            telemetry: self.telemetry.clone(),
        });
        self.status.record_iteration(state.iteration);
        debug!(
            "{} iteration {}: error {:.6}, gradient norm {:.6}",
            prefix::TICK,
            state.iteration,
            state.error,
            grad_norm
        );

        // give the dispatcher a chance to pick the snapshot up
        let tick = status.tick();
        if !tick.is_zero() {
            self.status.sleep_unless_stopped(tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::joint_probabilities;
    use crate::dataset::Dataset;
    use crate::interaction::interaction_queue;
    use crate::objective::KlDivergence;
    use crate::status::StatusPatch;

    fn dataset() -> Dataset {
        let rows = (0..8)
            .map(|i| vec![(i % 4) as f64, (i / 4) as f64 * 3.0, (i * i) as f64 * 0.1])
            .collect();
        Dataset::from_rows("grid", rows, None, None).unwrap()
    }

    fn optimizer(config: EngineConfig, patch: StatusPatch) -> (Optimizer, Arc<SnapshotChannel>) {
        let ds = dataset();
        let p = joint_probabilities(&ds, 2.0);
        let status = Arc::new(StatusStore::with_patch(&patch).unwrap());
        let (_tx, rx) = interaction_queue();
        let channel = Arc::new(SnapshotChannel::new(config.snapshot_capacity));
        let opt = Optimizer::new(
            config,
            Box::new(KlDivergence::new(p)),
            status,
            rx,
            Arc::clone(&channel),
        );
        (opt, channel)
    }

    fn quiet() -> StatusPatch {
        StatusPatch {
            tick_frequency_ms: Some(0),
            ..Default::default()
        }
    }

    #[test]
    fn gains_grow_while_sign_holds_and_shrink_on_flip() {
        let mut state = EmbeddingState::new(vec![[0.0, 0.0]]);
        state.apply_gradient(&[[1.0, -1.0]], 0.5, 10.0, 0.01);
        let first = state.gains[0];

        state.apply_gradient(&[[1.0, -1.0]], 0.5, 10.0, 0.01);
        assert!(state.gains[0][0] > first[0]);
        assert!(state.gains[0][1] > first[1]);

        let before = state.gains[0];
        state.apply_gradient(&[[-1.0, 1.0]], 0.5, 10.0, 0.01);
        assert!(state.gains[0][0] < before[0]);
        assert!(state.gains[0][1] < before[1]);
    }

    #[test]
    fn gains_never_fall_below_minimum() {
        let mut state = EmbeddingState::new(vec![[0.0, 0.0]]);
        for _ in 0..100 {
            state.apply_gradient(&[[0.0, 0.0]], 0.0, 1.0, 0.05);
        }
        assert_eq!(state.gains[0], [0.05, 0.05]);
    }

    #[test]
    fn random_layout_is_seeded() {
        let a = EmbeddingState::random(5, 3).unwrap();
        let b = EmbeddingState::random(5, 3).unwrap();
        assert_eq!(a, b);
        assert!(a.positions.iter().flatten().all(|v| v.abs() < 1e-2));
    }

    #[test]
    fn budget_spans_both_phases() {
        let config = EngineConfig {
            exploration_iters: 4,
            max_iter: Some(9),
            ..Default::default()
        };
        let (opt, channel) = optimizer(config, quiet());
        let outcome = opt.run(EmbeddingState::random(8, 0).unwrap());
        assert_eq!(outcome.reason, StopReason::Budget);
        assert_eq!(outcome.state.iteration, 9);
        assert_eq!(outcome.snapshots, 0);
        assert_eq!(channel.published(), 0);
    }

    #[test]
    fn converges_when_asked_to() {
        let config = EngineConfig {
            exploration_iters: 0,
            max_iter: Some(10_000),
            n_iter_check: 1,
            min_grad_norm: f64::MAX,
            stop_on_convergence: true,
            ..Default::default()
        };
        let (opt, _) = optimizer(config, quiet());
        let outcome = opt.run(EmbeddingState::random(8, 0).unwrap());
        assert_eq!(outcome.reason, StopReason::Converged);
        assert_eq!(outcome.state.iteration, 1);
    }

    #[test]
    fn reseed_with_wrong_length_is_ignored() {
        let ds = dataset();
        let status = Arc::new(StatusStore::with_patch(&quiet()).unwrap());
        let (tx, rx) = interaction_queue();
        tx.push(InteractionEvent::reseed(vec![[0.0, 0.0]; 3]).unwrap())
            .unwrap();
        let config = EngineConfig {
            max_iter: Some(1),
            ..Default::default()
        };
        let opt = Optimizer::new(
            config,
            Box::new(KlDivergence::new(joint_probabilities(&ds, 2.0))),
            status,
            rx,
            Arc::new(SnapshotChannel::default()),
        );
        let outcome = opt.run(EmbeddingState::random(8, 1).unwrap());
        assert_eq!(outcome.state.len(), 8);
        assert_eq!(outcome.state.iteration, 1);
    }

    #[test]
    fn pins_hold_until_the_next_event_replaces_them() {
        let ds = dataset();
        let status = Arc::new(StatusStore::with_patch(&quiet()).unwrap());
        let (tx, rx) = interaction_queue();
        tx.push(InteractionEvent::pin(vec![2], vec![[5.0, 5.0]]).unwrap())
            .unwrap();
        tx.push(InteractionEvent::pin(vec![3], vec![[-1.0, -1.0]]).unwrap())
            .unwrap();
        let config = EngineConfig {
            max_iter: Some(5),
            ..Default::default()
        };
        let opt = Optimizer::new(
            config,
            Box::new(KlDivergence::new(joint_probabilities(&ds, 2.0))),
            status,
            rx,
            Arc::new(SnapshotChannel::default()),
        );
        let outcome = opt.run(EmbeddingState::random(8, 1).unwrap());
        assert_eq!(outcome.constraints.ids().collect::<Vec<_>>(), vec![3]);
        assert!(!outcome.constraints.contains(2));
        assert_eq!(outcome.state.positions[3], [-1.0, -1.0]);
    }

    #[test]
    fn single_pin_survives_later_iterations() {
        let ds = dataset();
        let status = Arc::new(StatusStore::with_patch(&quiet()).unwrap());
        let (tx, rx) = interaction_queue();
        tx.push(InteractionEvent::pin(vec![2], vec![[5.0, 5.0]]).unwrap())
            .unwrap();
        let config = EngineConfig {
            max_iter: Some(30),
            ..Default::default()
        };
        let opt = Optimizer::new(
            config,
            Box::new(KlDivergence::new(joint_probabilities(&ds, 2.0))),
            status,
            rx,
            Arc::new(SnapshotChannel::default()),
        );
        let outcome = opt.run(EmbeddingState::random(8, 1).unwrap());
        assert_eq!(outcome.constraints.len(), 1);
        assert_eq!(outcome.state.positions[2], [5.0, 5.0]);
    }
}
