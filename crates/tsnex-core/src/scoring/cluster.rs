//! k-means clustering of the embedding and the scores computed on it

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geometry::sq_dist;

const MAX_ITER: usize = 300;
const TOLERANCE: f64 = 1e-4;

/// Cluster assignment with its within-cluster sum of squares.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeans {
    pub labels: Vec<usize>,
    pub centroids: Vec<[f64; 2]>,
    pub inertia: f64,
}

/// Best of `restarts` Lloyd runs, each seeded with k-means++.
///
/// Deterministic for a given `seed`.
pub fn kmeans(points: &[[f64; 2]], k: usize, restarts: usize, seed: u64) -> Option<KMeans> {
    if k == 0 || points.len() < k {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    (0..restarts.max(1))
        .map(|_| lloyd(points, seed_centroids(points, k, &mut rng)))
        .min_by(|a, b| a.inertia.total_cmp(&b.inertia))
}

/// k-means++ seeding: each next centroid is drawn with probability
/// proportional to its squared distance from the closest chosen one.
fn seed_centroids(points: &[[f64; 2]], k: usize, rng: &mut StdRng) -> Vec<[f64; 2]> {
    let mut centroids = vec![points[rng.gen_range(0..points.len())]];
    let mut closest: Vec<f64> = points.iter().map(|&p| sq_dist(p, centroids[0])).collect();

    while centroids.len() < k {
        let total: f64 = closest.iter().sum();
        let next = if total <= 0.0 {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut picked = points.len() - 1;
            for (i, &d) in closest.iter().enumerate() {
                if target < d {
                    picked = i;
                    break;
                }
                target -= d;
            }
            picked
        };
        let centroid = points[next];
        centroids.push(centroid);
        for (c, &p) in closest.iter_mut().zip(points) {
            *c = c.min(sq_dist(p, centroid));
        }
    }
    centroids
}

fn nearest(p: [f64; 2], centroids: &[[f64; 2]]) -> (usize, f64) {
    centroids
        .iter()
        .enumerate()
        .map(|(c, &m)| (c, sq_dist(p, m)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 0.0))
}

fn lloyd(points: &[[f64; 2]], mut centroids: Vec<[f64; 2]>) -> KMeans {
    let k = centroids.len();
    let mut labels = vec![0usize; points.len()];

    for _ in 0..MAX_ITER {
        for (label, &p) in labels.iter_mut().zip(points) {
            *label = nearest(p, &centroids).0;
        }

        let mut sums = vec![[0.0, 0.0]; k];
        let mut counts = vec![0usize; k];
        for (&label, &p) in labels.iter().zip(points) {
            sums[label][0] += p[0];
            sums[label][1] += p[1];
            counts[label] += 1;
        }

        let mut shift = 0.0;
        for c in 0..k {
            // empty clusters keep their centroid
            if counts[c] == 0 {
                continue;
            }
            let moved = [sums[c][0] / counts[c] as f64, sums[c][1] / counts[c] as f64];
            shift += sq_dist(moved, centroids[c]);
            centroids[c] = moved;
        }
        if shift <= TOLERANCE * TOLERANCE {
            break;
        }
    }

    let mut inertia = 0.0;
    for (label, &p) in labels.iter_mut().zip(points) {
        let (c, d) = nearest(p, &centroids);
        *label = c;
        inertia += d;
    }
    KMeans {
        labels,
        centroids,
        inertia,
    }
}

fn entropy(counts: impl Iterator<Item = usize>, n: f64) -> f64 {
    counts
        .filter(|&c| c > 0)
        .map(|c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Harmonic mean of homogeneity and completeness.
pub fn v_measure(truth: &[i64], predicted: &[usize]) -> f64 {
    let n = truth.len().min(predicted.len());
    if n == 0 {
        return 1.0;
    }
    let nf = n as f64;

    let mut joint: HashMap<(i64, usize), usize> = HashMap::new();
    let mut classes: HashMap<i64, usize> = HashMap::new();
    let mut clusters: HashMap<usize, usize> = HashMap::new();
    for (&c, &k) in truth.iter().zip(predicted).take(n) {
        *joint.entry((c, k)).or_default() += 1;
        *classes.entry(c).or_default() += 1;
        *clusters.entry(k).or_default() += 1;
    }

    let h_c = entropy(classes.values().copied(), nf);
    let h_k = entropy(clusters.values().copied(), nf);
    let h_ck = entropy(joint.values().copied(), nf);
    // H(C|K) = H(C,K) - H(K)
    let homogeneity = if h_c == 0.0 { 1.0 } else { 1.0 - (h_ck - h_k) / h_c };
    let completeness = if h_k == 0.0 { 1.0 } else { 1.0 - (h_ck - h_c) / h_k };

    if homogeneity + completeness == 0.0 {
        0.0
    } else {
        2.0 * homogeneity * completeness / (homogeneity + completeness)
    }
}

/// Mean silhouette coefficient over Euclidean distances.
///
/// Points alone in their cluster score 0. Fewer than two clusters scores 0.
pub fn silhouette(points: &[[f64; 2]], labels: &[usize]) -> f64 {
    let n = points.len().min(labels.len());
    let n_clusters = labels.iter().take(n).max().map_or(0, |&m| m + 1);
    if n < 2 || n_clusters < 2 {
        return 0.0;
    }

    let mut sizes = vec![0usize; n_clusters];
    for &l in &labels[..n] {
        sizes[l] += 1;
    }
    if sizes.iter().filter(|&&s| s > 0).count() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut sums = vec![0.0; n_clusters];
    for i in 0..n {
        sums.iter_mut().for_each(|s| *s = 0.0);
        for j in 0..n {
            if i != j {
                sums[labels[j]] += sq_dist(points[i], points[j]).sqrt();
            }
        }

        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }
        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..n_clusters)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }
    total / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> (Vec<[f64; 2]>, Vec<i64>) {
        let mut points = Vec::new();
        let mut truth = Vec::new();
        for i in 0..10 {
            let jitter = i as f64 * 0.01;
            points.push([jitter, -jitter]);
            truth.push(0);
            points.push([50.0 + jitter, 50.0 - jitter]);
            truth.push(1);
        }
        (points, truth)
    }

    #[test]
    fn kmeans_separates_blobs() {
        let (points, truth) = two_blobs();
        let result = kmeans(&points, 2, 10, 7).unwrap();
        assert!((v_measure(&truth, &result.labels) - 1.0).abs() < 1e-12);
        assert!(result.inertia < 1.0);
    }

    #[test]
    fn kmeans_is_deterministic() {
        let (points, _) = two_blobs();
        assert_eq!(kmeans(&points, 2, 3, 1), kmeans(&points, 2, 3, 1));
    }

    #[test]
    fn kmeans_needs_enough_points() {
        assert!(kmeans(&[[0.0, 0.0]], 2, 1, 0).is_none());
    }

    #[test]
    fn v_measure_ignores_label_names() {
        assert!((v_measure(&[0, 0, 1, 1], &[1, 1, 0, 0]) - 1.0).abs() < 1e-12);
        assert!(v_measure(&[0, 0, 1, 1], &[0, 1, 0, 1]) < 1e-12);
    }

    #[test]
    fn silhouette_of_tight_blobs_is_near_one() {
        let (points, truth) = two_blobs();
        let labels: Vec<usize> = truth.iter().map(|&c| c as usize).collect();
        assert!(silhouette(&points, &labels) > 0.99);
    }

    #[test]
    fn silhouette_of_single_cluster_is_zero() {
        assert_eq!(silhouette(&[[0.0, 0.0], [1.0, 1.0]], &[0, 0]), 0.0);
    }
}
