//! Scoring adapter
//!
//! Quality, stability and convergence measures sampled by the optimizer loop.
//! Every measure is a pure function over position arrays; [`Scorer`] is the
//! seam the loop calls through, [`NeighborScorer`] the default implementation.
//!
//! # Measures
//!
//! | Callable   | Result                        | Needs labels |
//! |------------|-------------------------------|--------------|
//! | `measure`  | (stability, convergence)      | no           |
//! | `quality`  | trustworthiness               | no           |
//! | `classify` | k-NN accuracy                 | yes          |
//! | `cluster`  | (V-measure, silhouette)       | yes          |

mod cluster;
mod metric;
mod neighbors;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use cluster::{kmeans, silhouette, v_measure, KMeans};
pub use metric::DrMetric;
pub use neighbors::{knn_accuracy, pive_measure, trustworthiness};

use crate::dataset::Dataset;

/// k-means restarts when scoring clusters.
const KMEANS_RESTARTS: usize = 10;
const KMEANS_SEED: u64 = 42;

/// Distance-based summary attached to a [`QualityReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrSummary {
    pub auc_rnx: f64,
    pub pearson: f64,
    pub sammon_stress: f64,
}

/// Final quality of an embedding, returned when a measured session resets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub trustworthiness: f64,
    pub accuracy: Option<f64>,
    pub v_measure: Option<f64>,
    pub silhouette: Option<f64>,
    pub dr: Option<DrSummary>,
}

/// Measures invoked at sampling points.
pub trait Scorer: Send + Sync {
    /// PIVE stability and convergence of `new` against `old` and the data.
    fn measure(&self, old: &[[f64; 2]], new: &[[f64; 2]], high_dim: &[f64]) -> (f64, f64);

    fn quality(&self, embedding: &[[f64; 2]]) -> f64;

    /// `None` when the dataset carries no class labels.
    fn classify(&self, embedding: &[[f64; 2]]) -> Option<f64>;

    /// `None` when the dataset carries fewer than two classes.
    fn cluster(&self, embedding: &[[f64; 2]]) -> Option<(f64, f64)>;

    fn report(&self, embedding: &[[f64; 2]]) -> QualityReport {
        let cluster = self.cluster(embedding);
        QualityReport {
            trustworthiness: self.quality(embedding),
            accuracy: self.classify(embedding),
            v_measure: cluster.map(|c| c.0),
            silhouette: cluster.map(|c| c.1),
            dr: None,
        }
    }
}

/// Neighbourhood-based scorer over one dataset.
#[derive(Debug, Clone)]
pub struct NeighborScorer {
    k: usize,
    high_dim: Arc<Vec<f64>>,
    labels: Option<Vec<i64>>,
}

impl NeighborScorer {
    pub fn new(dataset: &Dataset, k: usize) -> Self {
        Self::with_distances(
            Arc::new(dataset.squared_distances()),
            dataset.classes().map(<[i64]>::to_vec),
            k,
        )
    }

    /// Reuse an already computed dense squared-distance matrix.
    pub fn with_distances(high_dim: Arc<Vec<f64>>, labels: Option<Vec<i64>>, k: usize) -> Self {
        Self {
            k: k.max(1),
            high_dim,
            labels,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    fn n_classes(&self) -> usize {
        self.labels
            .as_ref()
            .map_or(0, |l| l.iter().collect::<BTreeSet<_>>().len())
    }
}

impl Scorer for NeighborScorer {
    fn measure(&self, old: &[[f64; 2]], new: &[[f64; 2]], high_dim: &[f64]) -> (f64, f64) {
        pive_measure(old, new, high_dim, self.k)
    }

    fn quality(&self, embedding: &[[f64; 2]]) -> f64 {
        trustworthiness(&self.high_dim, embedding, self.k)
    }

    fn classify(&self, embedding: &[[f64; 2]]) -> Option<f64> {
        let labels = self.labels.as_ref()?;
        Some(knn_accuracy(embedding, labels, self.k))
    }

    fn cluster(&self, embedding: &[[f64; 2]]) -> Option<(f64, f64)> {
        let labels = self.labels.as_ref()?;
        let n_clusters = self.n_classes();
        if n_clusters < 2 {
            return None;
        }
        let fit = kmeans(embedding, n_clusters, KMEANS_RESTARTS, KMEANS_SEED)?;
        Some((
            v_measure(labels, &fit.labels),
            silhouette(embedding, &fit.labels),
        ))
    }

    fn report(&self, embedding: &[[f64; 2]]) -> QualityReport {
        let cluster = self.cluster(embedding);
        let dr = (self.high_dim.len() == embedding.len() * embedding.len()).then(|| {
            let metric = DrMetric::new(&self.high_dim, embedding);
            DrSummary {
                auc_rnx: metric.auc_rnx(),
                pearson: metric.pearson(),
                sammon_stress: metric.sammon_stress(),
            }
        });
        QualityReport {
            trustworthiness: self.quality(embedding),
            accuracy: self.classify(embedding),
            v_measure: cluster.map(|c| c.0),
            silhouette: cluster.map(|c| c.1),
            dr,
        }
    }
}
