//! Objective capability and the built-in KL divergence kernel
//!
//! The optimizer loop only sees [`Objective`]; swapping in another cost
//! function means implementing `evaluate` and nothing else.
//!
//! # Kernel
//!
//! ```text
//! w_ij = (1 + |y_i - y_j|^2)^-1          Q_ij = max(w_ij / sum_{k!=l} w_kl, eps)
//! KL   = sum_{i!=j} P_ij log(max(P_ij, eps) / Q_ij)
//! dKL/dy_i = 4 sum_j (P_ij - Q_ij) w_ij (y_i - y_j)
//! ```
//!
//! Summing over ordered pairs equals `2 * sum_{i<j}` over the condensed form.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::affinity::{AffinityMatrix, MACHINE_EPSILON};
use crate::geometry;

/// Quadratic pull of each pinned point's neighbourhood toward the point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinPenalty {
    pub reg_param: f64,
    /// (pinned id, neighbour ids) pairs; every neighbour list has the same length
    pub anchors: Vec<(usize, Vec<usize>)>,
}

impl PinPenalty {
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty() || self.neighbors_per_anchor() == 0
    }

    fn neighbors_per_anchor(&self) -> usize {
        self.anchors.first().map_or(0, |(_, nbs)| nbs.len())
    }

    /// `reg / (F k) * sum_f sum_nb |y_f - y_nb|^2`, with its gradient added into `grad`.
    fn apply(&self, positions: &[[f64; 2]], grad: &mut [[f64; 2]]) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let scale = self.reg_param / (self.anchors.len() * self.neighbors_per_anchor()) as f64;

        let mut penalty = 0.0;
        for (fixed, nbs) in &self.anchors {
            let yf = positions[*fixed];
            for &nb in nbs {
                let yn = positions[nb];
                penalty += geometry::sq_dist(yf, yn);
                // d/dy_nb |y_f - y_nb|^2 = -2 (y_f - y_nb)
                grad[nb][0] -= 2.0 * scale * (yf[0] - yn[0]);
                grad[nb][1] -= 2.0 * scale * (yf[1] - yn[1]);
            }
        }
        penalty * scale
    }
}

/// Per-call inputs that change over the course of a run.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Multiplier on P (early exaggeration), 1 outside the exploration phase
    pub exaggeration: f64,
    pub penalty: Option<&'a PinPenalty>,
}

impl Default for EvalContext<'_> {
    fn default() -> Self {
        Self {
            exaggeration: 1.0,
            penalty: None,
        }
    }
}

/// Loss and gradient at one set of positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub kl: f64,
    pub penalty: f64,
    pub gradient: Vec<[f64; 2]>,
    /// Row sums of `P log(P/Q)`, one per point
    pub divergences: Vec<f64>,
}

impl Evaluation {
    /// Total loss, `KL + penalty`.
    pub fn loss(&self) -> f64 {
        self.kl + self.penalty
    }

    /// Euclidean norm of each point's gradient.
    pub fn per_point_norms(&self) -> Vec<f64> {
        self.gradient
            .iter()
            .map(|g| (g[0] * g[0] + g[1] * g[1]).sqrt())
            .collect()
    }
}

/// Cost function driven by the optimizer loop.
pub trait Objective: Send {
    fn evaluate(&self, positions: &[[f64; 2]], ctx: &EvalContext<'_>) -> Evaluation;
}

/// Kullback-Leibler divergence between P and a Student-t Q (one degree of freedom).
#[derive(Debug, Clone)]
pub struct KlDivergence {
    p: AffinityMatrix,
}

impl KlDivergence {
    pub fn new(p: AffinityMatrix) -> Self {
        Self { p }
    }

    pub fn affinities(&self) -> &AffinityMatrix {
        &self.p
    }
}

impl Objective for KlDivergence {
    fn evaluate(&self, positions: &[[f64; 2]], ctx: &EvalContext<'_>) -> Evaluation {
        let n = positions.len();
        debug_assert_eq!(n, self.p.len());

        // Student-t weights, diagonal left at 0
        let w = geometry::pairwise_sq_distances(n, |i, j| {
            1.0 / (1.0 + geometry::sq_dist(positions[i], positions[j]))
        });
        let w_sum = w.iter().sum::<f64>().max(MACHINE_EPSILON);
        let exaggeration = ctx.exaggeration;

        let row = |i: usize| -> (f64, [f64; 2]) {
            let mut divergence = 0.0;
            let mut g = [0.0, 0.0];
            for j in 0..n {
                if i == j {
                    continue;
                }
                let wij = w[i * n + j];
                let pij = self.p.get(i, j) * exaggeration;
                let qij = (wij / w_sum).max(MACHINE_EPSILON);
                divergence += pij * (pij.max(MACHINE_EPSILON) / qij).ln();
                let force = (pij - qij) * wij;
                g[0] += force * (positions[i][0] - positions[j][0]);
                g[1] += force * (positions[i][1] - positions[j][1]);
            }
            (divergence, [4.0 * g[0], 4.0 * g[1]])
        };

        #[cfg(feature = "parallel")]
        let rows: Vec<(f64, [f64; 2])> = (0..n).into_par_iter().map(row).collect();
        #[cfg(not(feature = "parallel"))]
        let rows: Vec<(f64, [f64; 2])> = (0..n).map(row).collect();

        let (divergences, mut gradient): (Vec<f64>, Vec<[f64; 2]>) = rows.into_iter().unzip();
        let kl = divergences.iter().sum();

        let penalty = ctx
            .penalty
            .map_or(0.0, |pen| pen.apply(positions, &mut gradient));

        Evaluation {
            kl,
            penalty,
            gradient,
            divergences,
        }
    }
}
