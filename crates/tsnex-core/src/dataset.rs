//! Input dataset
//!
//! An immutable N×D matrix with optional integer classes and display labels.
//! Loaded once per session, shared read-only between workers, released on reset.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::geometry;

/// High-dimensional points plus their optional annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    name: String,
    n: usize,
    d: usize,
    /// Row-major N×D features
    values: Vec<f64>,
    classes: Option<Vec<i64>>,
    labels: Option<Vec<String>>,
}

impl Dataset {
    /// Build a dataset from feature rows.
    ///
    /// Rows must be non-empty, of equal width and finite. Classes and labels,
    /// when present, must have one entry per row.
    pub fn from_rows(
        name: impl Into<String>,
        rows: Vec<Vec<f64>>,
        classes: Option<Vec<i64>>,
        labels: Option<Vec<String>>,
    ) -> Result<Self> {
        let name = name.into();
        let n = rows.len();
        if n < 2 {
            return Err(EngineError::Dataset(format!(
                "dataset '{}' needs at least 2 points, got {}",
                name, n
            )));
        }

        let d = rows[0].len();
        if d == 0 {
            return Err(EngineError::Dataset(format!(
                "dataset '{}' has zero features",
                name
            )));
        }

        let mut values = Vec::with_capacity(n * d);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != d {
                return Err(EngineError::Dataset(format!(
                    "row {} has {} features, expected {}",
                    i,
                    row.len(),
                    d
                )));
            }
            if let Some(bad) = row.iter().position(|v| !v.is_finite()) {
                return Err(EngineError::Dataset(format!(
                    "row {} feature {} is not finite",
                    i, bad
                )));
            }
            values.extend(row);
        }

        if let Some(classes) = &classes {
            if classes.len() != n {
                return Err(EngineError::Dataset(format!(
                    "{} classes for {} points",
                    classes.len(),
                    n
                )));
            }
        }
        if let Some(labels) = &labels {
            if labels.len() != n {
                return Err(EngineError::Dataset(format!(
                    "{} labels for {} points",
                    labels.len(),
                    n
                )));
            }
        }

        Ok(Self {
            name,
            n,
            d,
            values,
            classes,
            labels,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Number of features per point.
    pub fn dims(&self) -> usize {
        self.d
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.d..(i + 1) * self.d]
    }

    pub fn classes(&self) -> Option<&[i64]> {
        self.classes.as_deref()
    }

    /// Display string for point `i`: its label, else its class, else its id.
    pub fn display_label(&self, i: usize) -> String {
        if let Some(labels) = &self.labels {
            return labels[i].clone();
        }
        if let Some(classes) = &self.classes {
            return classes[i].to_string();
        }
        i.to_string()
    }

    /// Dense N×N matrix of squared Euclidean distances between rows.
    pub fn squared_distances(&self) -> Vec<f64> {
        geometry::pairwise_sq_distances(self.n, |i, j| {
            self.row(i)
                .iter()
                .zip(self.row(j))
                .map(|(a, b)| (a - b) * (a - b))
                .sum()
        })
    }
}

/// Source of named datasets.
///
/// Loading and parsing live outside the engine; front-ends implement this for
/// whatever storage they have.
pub trait DatasetLoader {
    fn load(&self, name: &str) -> Result<Dataset>;
}
