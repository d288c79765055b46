//! Constraint merger
//!
//! The cumulative set of pinned points (id → target position). Edits are
//! folded in with last-write-wins per id; entries leave only through
//! [`ConstraintSet::clear`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::geometry;
use crate::objective::PinPenalty;

/// Result of folding one edit into the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub accepted: usize,
    /// Ids outside `[0, N)`, dropped
    pub rejected: Vec<usize>,
}

/// Pinned points of the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSet {
    pinned: BTreeMap<usize, [f64; 2]>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<[f64; 2]> {
        self.pinned.get(&id).copied()
    }

    pub fn contains(&self, id: usize) -> bool {
        self.pinned.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.pinned.keys().copied()
    }

    pub fn clear(&mut self) {
        self.pinned.clear();
    }

    /// Fold `ids`/`positions` into the set for a dataset of `n` points.
    ///
    /// Same-id entries are overwritten, new ids appended. Out-of-range ids
    /// are dropped with a warning and reported back.
    pub fn merge(&mut self, ids: &[usize], positions: &[[f64; 2]], n: usize) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for (&id, &pos) in ids.iter().zip(positions) {
            if id >= n {
                outcome.rejected.push(id);
                continue;
            }
            self.pinned.insert(id, pos);
            outcome.accepted += 1;
        }
        if !outcome.rejected.is_empty() {
            warn!(
                rejected = ?outcome.rejected,
                n, "dropping pinned ids outside the dataset"
            );
        }
        outcome
    }

    /// Force every pinned point onto its target. Idempotent.
    pub fn apply(&self, positions: &mut [[f64; 2]]) {
        for (&id, &target) in &self.pinned {
            if let Some(slot) = positions.get_mut(id) {
                *slot = target;
            }
        }
    }

    /// Per-point flag, `true` for pinned ids.
    pub fn mask(&self, n: usize) -> Vec<bool> {
        let mut mask = vec![false; n];
        for id in self.ids().filter(|&id| id < n) {
            mask[id] = true;
        }
        mask
    }

    /// Penalty anchors: each pinned point with its nearest neighbours in `positions`.
    ///
    /// Neighbourhood size is `ceil(fraction * N)`, at least 1.
    pub fn penalty(&self, positions: &[[f64; 2]], fraction: f64, reg_param: f64) -> PinPenalty {
        let n = positions.len();
        let k = ((fraction * n as f64).ceil() as usize)
            .max(1)
            .min(n.saturating_sub(1));

        let anchors = self
            .ids()
            .filter(|&id| id < n)
            .map(|id| {
                let mut order: Vec<usize> = (0..n).filter(|&j| j != id).collect();
                order.sort_by(|&a, &b| {
                    geometry::sq_dist(positions[id], positions[a])
                        .total_cmp(&geometry::sq_dist(positions[id], positions[b]))
                        .then(a.cmp(&b))
                });
                order.truncate(k);
                (id, order)
            })
            .collect();

        PinPenalty { reg_param, anchors }
    }

    /// Pinned points contribute no force: zero their gradient rows.
    pub fn zero_gradient(&self, grad: &mut [[f64; 2]]) {
        for id in self.ids() {
            if let Some(g) = grad.get_mut(id) {
                *g = [0.0, 0.0];
            }
        }
    }

    /// Move each pinned point's gradient onto its `k` nearest non-pinned neighbours.
    ///
    /// The gradient is split evenly across the neighbours actually found, so
    /// the total moved equals the total removed. A pinned point with no
    /// non-pinned neighbour keeps its gradient.
    pub fn share_gradient(&self, grad: &mut [[f64; 2]], positions: &[[f64; 2]], k: usize) {
        let n = positions.len();
        for id in self.ids().filter(|&id| id < n) {
            let g = grad[id];
            if g == [0.0, 0.0] {
                continue;
            }

            let mut order: Vec<usize> = (0..n).filter(|&j| !self.contains(j)).collect();
            order.sort_by(|&a, &b| {
                geometry::sq_dist(positions[id], positions[a])
                    .total_cmp(&geometry::sq_dist(positions[id], positions[b]))
                    .then(a.cmp(&b))
            });
            order.truncate(k);
            if order.is_empty() {
                continue;
            }

            grad[id] = [0.0, 0.0];
            let share = [g[0] / order.len() as f64, g[1] / order.len() as f64];
            for j in order {
                grad[j][0] += share[0];
                grad[j][1] += share[1];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(n: usize) -> Vec<[f64; 2]> {
        (0..n).map(|i| [i as f64, 0.0]).collect()
    }

    #[test]
    fn merge_overwrites_same_id() {
        let mut set = ConstraintSet::new();
        set.merge(&[3], &[[1.0, 1.0]], 10);
        set.merge(&[3], &[[2.0, -2.0]], 10);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(3), Some([2.0, -2.0]));
    }

    #[test]
    fn merge_is_dictionary_union() {
        let mut set = ConstraintSet::new();
        set.merge(&[0, 1], &[[0.0, 0.0], [1.0, 1.0]], 4);
        set.merge(&[1, 2], &[[5.0, 5.0], [2.0, 2.0]], 4);
        assert_eq!(set.ids().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(set.get(1), Some([5.0, 5.0]));
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let mut set = ConstraintSet::new();
        let outcome = set.merge(&[1, 7], &[[0.0, 0.0], [1.0, 1.0]], 4);
        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.rejected, vec![7]);
        assert!(!set.contains(7));
    }

    #[test]
    fn apply_is_idempotent() {
        let mut set = ConstraintSet::new();
        set.merge(&[1], &[[9.0, 9.0]], 3);
        let mut pos = line(3);
        set.apply(&mut pos);
        let once = pos.clone();
        set.apply(&mut pos);
        assert_eq!(pos, once);
        assert_eq!(pos[1], [9.0, 9.0]);
    }

    #[test]
    fn penalty_anchors_use_nearest_points() {
        let mut set = ConstraintSet::new();
        set.merge(&[0], &[[0.0, 0.0]], 20);
        let penalty = set.penalty(&line(20), 0.1, 1e-3);
        assert_eq!(penalty.anchors, vec![(0, vec![1, 2])]);
    }

    #[test]
    fn share_conserves_gradient() {
        let mut set = ConstraintSet::new();
        set.merge(&[0, 1], &[[0.0, 0.0], [1.0, 0.0]], 6);
        let pos = line(6);
        let mut grad = vec![[0.0, 0.0]; 6];
        grad[0] = [3.0, -6.0];

        set.share_gradient(&mut grad, &pos, 3);

        assert_eq!(grad[0], [0.0, 0.0]);
        assert_eq!(grad[1], [0.0, 0.0]);
        for j in 2..5 {
            assert_eq!(grad[j], [1.0, -2.0]);
        }
        assert_eq!(grad[5], [0.0, 0.0]);
    }

    #[test]
    fn share_keeps_axis_aligned_gradient() {
        let mut set = ConstraintSet::new();
        set.merge(&[0], &[[0.0, 0.0]], 6);
        let pos = line(6);
        let mut grad = vec![[0.0, 0.0]; 6];
        grad[0] = [3.0, 0.0];

        set.share_gradient(&mut grad, &pos, 3);

        assert_eq!(grad[0], [0.0, 0.0]);
        for j in 1..4 {
            assert_eq!(grad[j], [1.0, 0.0]);
        }
        assert_eq!(grad[4], [0.0, 0.0]);
        let total: f64 = grad.iter().map(|g| g[0]).sum();
        assert_eq!(total, 3.0);
    }

    #[test]
    fn share_without_free_neighbours_keeps_gradient() {
        let mut set = ConstraintSet::new();
        set.merge(&[0, 1], &[[0.0, 0.0], [1.0, 0.0]], 2);
        let mut grad = vec![[2.0, 0.0], [0.0, 0.0]];

        set.share_gradient(&mut grad, &line(2), 3);

        assert_eq!(grad[0], [2.0, 0.0]);
    }
}
