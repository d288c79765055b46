//! Neighbourhood-preservation measures

use std::collections::BTreeMap;

use crate::geometry;

/// PIVE stability and convergence.
///
/// ```text
/// stability   = 1/(nk) sum_i |N_k(y_i^t) \ N_k(y_i^{t-1})|
/// convergence = 1/(nk) sum_i |N_k(y_i^t) ∩ N_k(x_i)|
/// ```
pub fn pive_measure(
    old: &[[f64; 2]],
    new: &[[f64; 2]],
    high_dim: &[f64],
    k: usize,
) -> (f64, f64) {
    let n = new.len();
    if n < 2 || old.len() != n || high_dim.len() != n * n {
        return (0.0, 0.0);
    }
    let k = k.min(n - 1);

    let knn_old = geometry::knn_indices(&geometry::embedding_sq_distances(old), n, k);
    let knn_new = geometry::knn_indices(&geometry::embedding_sq_distances(new), n, k);
    let knn_x = geometry::knn_indices(high_dim, n, k);

    let mut moved = 0usize;
    let mut shared = 0usize;
    let mut mark = vec![usize::MAX; n];
    for i in 0..n {
        for &j in &knn_old[i] {
            mark[j] = 2 * i;
        }
        moved += knn_new[i].iter().filter(|&&j| mark[j] != 2 * i).count();

        for &j in &knn_x[i] {
            mark[j] = 2 * i + 1;
        }
        shared += knn_new[i].iter().filter(|&&j| mark[j] == 2 * i + 1).count();
    }

    let denom = (n * k) as f64;
    (moved as f64 / denom, shared as f64 / denom)
}

/// Trustworthiness of an embedding with respect to precomputed
/// high-dimensional distances.
///
/// Penalises embedding neighbours that are far away in the original space,
/// weighted by their original rank. 1 is perfect.
pub fn trustworthiness(high_dim: &[f64], embedding: &[[f64; 2]], k: usize) -> f64 {
    let n = embedding.len();
    if n < 3 || high_dim.len() != n * n {
        return 1.0;
    }
    // the normaliser requires k < n/2
    let k = k.min((n - 1) / 2).max(1);

    let knn_y = geometry::knn_indices(&geometry::embedding_sq_distances(embedding), n, k);

    let mut rank = vec![0usize; n];
    let mut total = 0usize;
    for (i, nn_y) in knn_y.iter().enumerate() {
        for (r, j) in geometry::ranked_neighbors(high_dim, n, i).into_iter().enumerate() {
            rank[j] = r + 1;
        }
        total += nn_y
            .iter()
            .map(|&j| rank[j])
            .filter(|&r| r > k)
            .map(|r| r - k)
            .sum::<usize>();
    }

    let (n, k) = (n as f64, k as f64);
    1.0 - total as f64 * 2.0 / (n * k * (2.0 * n - 3.0 * k - 1.0))
}

/// Accuracy of a k-NN majority vote: first half trains, second half tests.
pub fn knn_accuracy(embedding: &[[f64; 2]], classes: &[i64], k: usize) -> f64 {
    let n = embedding.len().min(classes.len());
    let split = n / 2;
    if split == 0 || split == n {
        return 0.0;
    }
    let k = k.clamp(1, split);

    let mut correct = 0usize;
    for i in split..n {
        let mut train: Vec<usize> = (0..split).collect();
        train.sort_by(|&a, &b| {
            geometry::sq_dist(embedding[i], embedding[a])
                .total_cmp(&geometry::sq_dist(embedding[i], embedding[b]))
                .then(a.cmp(&b))
        });

        // class -> (votes, rank of its closest voter)
        let mut votes: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
        for (rank, &j) in train.iter().take(k).enumerate() {
            let entry = votes.entry(classes[j]).or_insert((0, rank));
            entry.0 += 1;
        }
        let predicted = votes
            .into_iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
            .map(|(class, _)| class);

        if predicted == Some(classes[i]) {
            correct += 1;
        }
    }

    correct as f64 / (n - split) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> Vec<[f64; 2]> {
        (0..n).map(|i| [i as f64, 0.0]).collect()
    }

    fn line_distances(n: usize) -> Vec<f64> {
        geometry::embedding_sq_distances(&line(n))
    }

    #[test]
    fn identical_layouts_are_stable_and_converged() {
        let pos = line(12);
        let (stability, convergence) = pive_measure(&pos, &pos, &line_distances(12), 3);
        assert_eq!(stability, 0.0);
        assert_eq!(convergence, 1.0);
    }

    #[test]
    fn reversed_layout_keeps_neighbourhoods() {
        let old = line(10);
        let new: Vec<[f64; 2]> = old.iter().map(|p| [-p[0], 0.0]).collect();
        let (stability, _) = pive_measure(&old, &new, &line_distances(10), 2);
        assert_eq!(stability, 0.0);
    }

    #[test]
    fn trustworthiness_of_faithful_embedding_is_one() {
        let t = trustworthiness(&line_distances(20), &line(20), 5);
        assert!((t - 1.0).abs() < 1e-12);
    }

    #[test]
    fn trustworthiness_drops_for_shuffled_embedding() {
        let mut shuffled = line(20);
        shuffled.swap(0, 19);
        shuffled.swap(3, 12);
        shuffled.swap(5, 16);
        let t = trustworthiness(&line_distances(20), &shuffled, 5);
        assert!(t < 1.0);
        assert!(t > 0.0);
    }

    #[test]
    fn knn_accuracy_on_separated_classes() {
        let mut pos = Vec::new();
        let mut classes = Vec::new();
        for i in 0..10 {
            let c = (i % 2) as i64;
            pos.push([c as f64 * 100.0 + i as f64 * 0.1, 0.0]);
            classes.push(c);
        }
        assert_eq!(knn_accuracy(&pos, &classes, 3), 1.0);
    }
}
