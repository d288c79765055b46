//! Dense distance and neighbourhood helpers shared by the kernel, the
//! constraint merger and the scoring adapter.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Fill a dense N×N matrix with `dist(i, j)` off the diagonal and 0 on it.
pub(crate) fn pairwise_sq_distances<F>(n: usize, dist: F) -> Vec<f64>
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    let mut out = vec![0.0; n * n];
    let fill = |(i, row): (usize, &mut [f64])| {
        for (j, cell) in row.iter_mut().enumerate() {
            if i != j {
                *cell = dist(i, j);
            }
        }
    };

    #[cfg(feature = "parallel")]
    out.par_chunks_mut(n.max(1)).enumerate().for_each(fill);
    #[cfg(not(feature = "parallel"))]
    out.chunks_mut(n.max(1)).enumerate().for_each(fill);

    out
}

/// Squared Euclidean distance between two 2-D points.
#[inline]
pub fn sq_dist(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Dense squared distances between embedded points.
pub fn embedding_sq_distances(positions: &[[f64; 2]]) -> Vec<f64> {
    pairwise_sq_distances(positions.len(), |i, j| sq_dist(positions[i], positions[j]))
}

/// Indices of row `i` sorted by ascending distance, `i` itself excluded.
///
/// Ties keep index order so results are deterministic.
pub fn ranked_neighbors(dist: &[f64], n: usize, i: usize) -> Vec<usize> {
    let row = &dist[i * n..(i + 1) * n];
    let mut order: Vec<usize> = (0..n).filter(|&j| j != i).collect();
    order.sort_by(|&a, &b| row[a].total_cmp(&row[b]).then(a.cmp(&b)));
    order
}

/// The `k` nearest neighbours of every point (self excluded).
pub fn knn_indices(dist: &[f64], n: usize, k: usize) -> Vec<Vec<usize>> {
    let k = k.min(n.saturating_sub(1));
    let rank = |i: usize| {
        let mut nn = ranked_neighbors(dist, n, i);
        nn.truncate(k);
        nn
    };

    #[cfg(feature = "parallel")]
    let knn = (0..n).into_par_iter().map(rank).collect();
    #[cfg(not(feature = "parallel"))]
    let knn = (0..n).map(rank).collect();

    knn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_distances() {
        let pos = [[0.0, 0.0], [3.0, 4.0], [0.0, 1.0]];
        let d = embedding_sq_distances(&pos);
        assert_eq!(d[1], 25.0);
        assert_eq!(d[3], 25.0);
        assert_eq!(d[2], 1.0);
        assert_eq!(d[4], 0.0);
    }

    #[test]
    fn knn_excludes_self() {
        let pos = [[0.0, 0.0], [1.0, 0.0], [5.0, 0.0], [1.5, 0.0]];
        let d = embedding_sq_distances(&pos);
        let knn = knn_indices(&d, 4, 2);
        assert_eq!(knn[0], vec![1, 3]);
        assert_eq!(knn[2], vec![3, 1]);
        assert!(knn.iter().enumerate().all(|(i, nn)| !nn.contains(&i)));
    }

    #[test]
    fn knn_caps_k_at_n_minus_one() {
        let pos = [[0.0, 0.0], [1.0, 0.0]];
        let d = embedding_sq_distances(&pos);
        assert_eq!(knn_indices(&d, 2, 10), vec![vec![1], vec![0]]);
    }
}
