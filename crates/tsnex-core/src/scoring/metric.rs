//! Whole-embedding quality metrics
//!
//! Rank-based co-ranking measures (Q_NX, R_NX and the area under R_NX on a
//! log-k scale) plus distance-based stress functions. All of them compare
//! Euclidean distances in the original space against the embedding.

use crate::geometry;

/// Distances and neighbour orderings of one (data, embedding) pair.
#[derive(Debug, Clone)]
pub struct DrMetric {
    n: usize,
    /// Condensed pairwise distances, `i < j` in row order
    dx: Vec<f64>,
    dy: Vec<f64>,
    idx: Vec<Vec<usize>>,
    idy: Vec<Vec<usize>>,
}

impl DrMetric {
    /// `high_dim_sq` is the dense N×N squared-distance matrix of the data.
    pub fn new(high_dim_sq: &[f64], embedding: &[[f64; 2]]) -> Self {
        let n = embedding.len();
        debug_assert_eq!(high_dim_sq.len(), n * n);
        let low_dim_sq = geometry::embedding_sq_distances(embedding);

        let condensed = |dense: &[f64]| -> Vec<f64> {
            let mut out = Vec::with_capacity(n * n.saturating_sub(1) / 2);
            for i in 0..n {
                for j in i + 1..n {
                    out.push(dense[i * n + j].sqrt());
                }
            }
            out
        };

        Self {
            n,
            dx: condensed(high_dim_sq),
            dy: condensed(&low_dim_sq),
            idx: (0..n).map(|i| geometry::ranked_neighbors(high_dim_sq, n, i)).collect(),
            idy: (0..n).map(|i| geometry::ranked_neighbors(&low_dim_sq, n, i)).collect(),
        }
    }

    /// `Q_NX(k)` for every `k` in `1..N`, index `k - 1`.
    ///
    /// Built incrementally so the whole curve costs O(N²).
    pub fn qnx_curve(&self) -> Vec<f64> {
        let n = self.n;
        if n < 2 {
            return Vec::new();
        }
        let mut overlap = vec![0usize; n - 1];
        let mut in_x = vec![false; n];
        let mut in_y = vec![false; n];

        for i in 0..n {
            in_x.iter_mut().for_each(|v| *v = false);
            in_y.iter_mut().for_each(|v| *v = false);
            let mut shared = 0usize;
            for k in 0..n - 1 {
                let a = self.idx[i][k];
                in_x[a] = true;
                if in_y[a] {
                    shared += 1;
                }
                let b = self.idy[i][k];
                in_y[b] = true;
                if in_x[b] {
                    shared += 1;
                }
                overlap[k] += shared;
            }
        }

        overlap
            .into_iter()
            .enumerate()
            .map(|(k, shared)| shared as f64 / ((k + 1) * n) as f64)
            .collect()
    }

    /// Average fraction of the `k` nearest neighbours preserved.
    pub fn qnx(&self, k: usize) -> f64 {
        if k == 0 || k >= self.n {
            return 0.0;
        }
        self.qnx_curve()[k - 1]
    }

    /// `Q_NX` rescaled against a random embedding: `((N-1) Q - k) / (N-1-k)`.
    pub fn rnx(&self, k: usize) -> f64 {
        if k == 0 || k + 1 >= self.n {
            return 0.0;
        }
        Self::rescale(self.qnx(k), k, self.n)
    }

    fn rescale(q: f64, k: usize, n: usize) -> f64 {
        ((n - 1) as f64 * q - k as f64) / (n - 1 - k) as f64
    }

    /// Area under `R_NX(k)` with `1/k` weights, normalised to `[0, 1]`
    /// for embeddings at least as good as random.
    pub fn auc_rnx(&self) -> f64 {
        let n = self.n;
        if n < 3 {
            return 0.0;
        }
        let curve = self.qnx_curve();
        let (mut auc, mut norm) = (0.0, 0.0);
        for k in 1..n - 1 {
            auc += Self::rescale(curve[k - 1], k, n) / k as f64;
            norm += 1.0 / k as f64;
        }
        auc / norm
    }

    /// Pearson correlation of the two condensed distance vectors.
    pub fn pearson(&self) -> f64 {
        let len = self.dx.len() as f64;
        if len < 2.0 {
            return 0.0;
        }
        let mx = self.dx.iter().sum::<f64>() / len;
        let my = self.dy.iter().sum::<f64>() / len;
        let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
        for (&x, &y) in self.dx.iter().zip(&self.dy) {
            sxy += (x - mx) * (y - my);
            sxx += (x - mx) * (x - mx);
            syy += (y - my) * (y - my);
        }
        if sxx == 0.0 || syy == 0.0 {
            return 0.0;
        }
        sxy / (sxx * syy).sqrt()
    }

    /// Curvilinear component analysis stress on standardised distances,
    /// weighted by `1 - sigmoid(d_y)`.
    pub fn cca_stress(&self) -> f64 {
        let dx = standardize(&self.dx);
        let dy = standardize(&self.dy);
        dx.iter()
            .zip(&dy)
            .map(|(&x, &y)| (x - y).powi(2) * (1.0 - 1.0 / (1.0 + (-y).exp())))
            .sum()
    }

    /// Normalised stress between the isotonic fit of `d_y` on `d_x` and `d_y`.
    pub fn mds_isotonic(&self) -> f64 {
        let dx = standardize(&self.dx);
        let dy = standardize(&self.dy);
        let fitted = isotonic_fit(&dx, &dy);
        let residual: f64 = fitted.iter().zip(&dy).map(|(f, y)| (f - y).powi(2)).sum();
        let scale: f64 = dy.iter().map(|y| y * y).sum();
        if scale == 0.0 {
            return 0.0;
        }
        (residual / scale).sqrt()
    }

    /// Sammon's non-linear mapping stress. Coincident pairs in the original
    /// space are skipped.
    pub fn sammon_stress(&self) -> f64 {
        let total: f64 = self.dx.iter().sum();
        if total == 0.0 {
            return 0.0;
        }
        let stress: f64 = self
            .dx
            .iter()
            .zip(&self.dy)
            .filter(|(&x, _)| x > 0.0)
            .map(|(&x, &y)| (x - y).powi(2) / x)
            .sum();
        stress / total
    }
}

/// Zero mean, unit population variance. Constant input maps to zeros.
fn standardize(values: &[f64]) -> Vec<f64> {
    let len = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / len;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / len).sqrt();
    let std = if std == 0.0 { 1.0 } else { std };
    values.iter().map(|v| (v - mean) / std).collect()
}

/// Non-decreasing least-squares fit of `y` ordered by `x` (pool adjacent violators).
fn isotonic_fit(x: &[f64], y: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]).then(y[a].total_cmp(&y[b])));

    // blocks of (mean, weight)
    let mut blocks: Vec<(f64, usize)> = Vec::with_capacity(order.len());
    for &i in &order {
        blocks.push((y[i], 1));
        while blocks.len() > 1 {
            let (last_mean, last_w) = blocks[blocks.len() - 1];
            let (prev_mean, prev_w) = blocks[blocks.len() - 2];
            if prev_mean <= last_mean {
                break;
            }
            blocks.pop();
            let w = prev_w + last_w;
            let merged = (prev_mean * prev_w as f64 + last_mean * last_w as f64) / w as f64;
            if let Some(top) = blocks.last_mut() {
                *top = (merged, w);
            }
        }
    }

    let mut fitted = vec![0.0; x.len()];
    let mut pos = 0;
    for (mean, w) in blocks {
        for &i in &order[pos..pos + w] {
            fitted[i] = mean;
        }
        pos += w;
    }
    fitted
}
