//! High-dimensional affinities (the P matrix)
//!
//! Conditional Gaussian probabilities restricted to each point's nearest
//! neighbours, with a per-point precision found by binary search so that the
//! entropy matches `ln(perplexity)`; then symmetrised and normalised.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::debug;

use crate::dataset::Dataset;
use crate::geometry;

/// Smallest positive double; floor for every probability that enters a log.
pub const MACHINE_EPSILON: f64 = f64::EPSILON;

const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const PERPLEXITY_STEPS: usize = 100;
const MIN_ROW_SUM: f64 = 1e-8;

/// Dense symmetric joint probabilities, zero diagonal, summing to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct AffinityMatrix {
    n: usize,
    p: Vec<f64>,
}

impl AffinityMatrix {
    /// Wrap a precomputed dense matrix. Used by tests and custom pipelines.
    pub fn from_dense(n: usize, p: Vec<f64>) -> Self {
        assert_eq!(p.len(), n * n, "affinity matrix must be n*n");
        Self { n, p }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.p[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.p[i * self.n..(i + 1) * self.n]
    }

    pub fn sum(&self) -> f64 {
        self.p.iter().sum()
    }
}

/// Compute P from squared high-dimensional distances.
pub fn joint_probabilities(dataset: &Dataset, perplexity: f64) -> AffinityMatrix {
    let n = dataset.len();
    let distances = dataset.squared_distances();
    joint_probabilities_from_distances(&distances, n, perplexity)
}

/// Same as [`joint_probabilities`] over an existing N×N squared-distance matrix.
pub fn joint_probabilities_from_distances(
    distances: &[f64],
    n: usize,
    perplexity: f64,
) -> AffinityMatrix {
    let k = n.saturating_sub(1).min((3.0 * perplexity + 1.0) as usize);
    let neighbors = geometry::knn_indices(distances, n, k);

    let conditional_row = |i: usize| -> Vec<(usize, f64)> {
        let nn = &neighbors[i];
        let d: Vec<f64> = nn.iter().map(|&j| distances[i * n + j]).collect();
        let probs = search_precision(&d, perplexity);
        nn.iter().copied().zip(probs).collect()
    };

    #[cfg(feature = "parallel")]
    let conditional: Vec<Vec<(usize, f64)>> = (0..n).into_par_iter().map(conditional_row).collect();
    #[cfg(not(feature = "parallel"))]
    let conditional: Vec<Vec<(usize, f64)>> = (0..n).map(conditional_row).collect();

    let mut p = vec![0.0; n * n];
    for (i, row) in conditional.iter().enumerate() {
        for &(j, pij) in row {
            p[i * n + j] += pij;
            p[j * n + i] += pij;
        }
    }

    let total = p.iter().sum::<f64>().max(MACHINE_EPSILON);
    for v in p.iter_mut() {
        *v /= total;
    }

    debug!(n, k, perplexity, "joint probabilities computed");
    AffinityMatrix { n, p }
}

/// Conditional probabilities of one point given its neighbour distances.
fn search_precision(distances: &[f64], perplexity: f64) -> Vec<f64> {
    let desired_entropy = perplexity.ln();
    let mut beta = 1.0;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut probs = vec![0.0; distances.len()];

    for _ in 0..PERPLEXITY_STEPS {
        for (p, &d) in probs.iter_mut().zip(distances) {
            *p = (-d * beta).exp();
        }
        let sum = probs.iter().sum::<f64>().max(MIN_ROW_SUM);
        let mut weighted = 0.0;
        for (p, &d) in probs.iter_mut().zip(distances) {
            *p /= sum;
            weighted += d * *p;
        }

        let entropy = sum.ln() + beta * weighted;
        let diff = entropy - desired_entropy;
        if diff.abs() <= PERPLEXITY_TOLERANCE {
            break;
        }

        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() {
                beta * 2.0
            } else {
                (beta + beta_max) / 2.0
            };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() {
                beta / 2.0
            } else {
                (beta + beta_min) / 2.0
            };
        }
    }

    probs
}
