//! Snapshots and their outbound wire form

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;

/// Telemetry series accumulated over a run, one entry per sampling point.
///
/// Quality series only grow when measurement is enabled, so their lengths
/// may differ from `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub errors: Vec<f64>,
    pub penalties: Vec<f64>,
    pub grad_norms: Vec<f64>,
    pub trustworthiness: Vec<f64>,
    pub stability: Vec<f64>,
    pub convergence: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub v_measure: Vec<f64>,
    pub silhouette: Vec<f64>,
}

/// One named chart: several aligned series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBlock {
    pub name: String,
    pub series: Vec<Vec<f64>>,
}

impl Telemetry {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Chart blocks in the order the client renders them.
    pub fn series_data(&self) -> Vec<SeriesBlock> {
        let block = |name: &str, series: Vec<&Vec<f64>>| SeriesBlock {
            name: name.to_string(),
            series: series.into_iter().cloned().collect(),
        };
        vec![
            block("errors, penalty", vec![&self.errors, &self.penalties]),
            block("gradients norms", vec![&self.grad_norms]),
            block("classification accuracy", vec![&self.accuracy]),
            block("vmeasure, silhoutte", vec![&self.v_measure, &self.silhouette]),
            block(
                "trustworthinesses,statbility,convergence",
                vec![&self.trustworthiness, &self.stability, &self.convergence],
            ),
        ]
    }
}

/// Immutable capture of the embedding at one sampling iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Publish sequence number within the session, from 1
    pub seq: u64,
    pub iteration: u64,
    pub positions: Vec<[f64; 2]>,
    pub fixed: Vec<bool>,
    /// Cumulative per-point KL contribution
    pub influence: Vec<f64>,
    /// Per-point gradient norm at this iteration
    pub grad_magnitude: Vec<f64>,
    /// PageRank over the embedding's k-NN graph, when enabled
    pub importance: Option<Vec<f64>>,
    pub error: f64,
    pub telemetry: Telemetry,
}

/// One point as the client sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub influence_score: f64,
    pub label: String,
    pub fixed: bool,
}

/// Serialized snapshot sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub kind: String,
    pub seq: u64,
    pub iteration: u64,
    pub error: f64,
    pub points: Vec<PointRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<Vec<f64>>,
    #[serde(rename = "seriesData")]
    pub series_data: Vec<SeriesBlock>,
}

impl WireFrame {
    pub const KIND: &'static str = "snapshot";

    pub fn new(snapshot: &Snapshot, dataset: &Dataset) -> Self {
        let points = snapshot
            .positions
            .iter()
            .enumerate()
            .map(|(id, p)| PointRecord {
                id,
                x: p[0],
                y: p[1],
                influence_score: snapshot.influence.get(id).copied().unwrap_or(0.0),
                label: dataset.display_label(id),
                fixed: snapshot.fixed.get(id).copied().unwrap_or(false),
            })
            .collect();

        Self {
            kind: Self::KIND.to_string(),
            seq: snapshot.seq,
            iteration: snapshot.iteration,
            error: snapshot.error,
            points,
            importance: snapshot.importance.clone(),
            series_data: snapshot.telemetry.series_data(),
        }
    }
}
