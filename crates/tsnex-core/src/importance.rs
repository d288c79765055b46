//! Graph-based importance ranking
//!
//! Builds an undirected, distance-weighted neighbourhood graph over the points
//! and scores every vertex by PageRank or HITS. Scores are L1-normalised so
//! they can be compared across snapshots.

use crate::geometry;

/// Maximum power-iteration steps.
const MAX_STEPS: usize = 100;
/// Convergence tolerance, scaled by the number of vertices.
const TOLERANCE: f64 = 1e-8;

/// Undirected weighted adjacency list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl Graph {
    pub fn with_vertices(n: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Add `a`–`b` once; a repeated edge keeps its first weight.
    pub fn add_edge(&mut self, a: usize, b: usize, weight: f64) {
        if a == b || self.adjacency[a].iter().any(|&(v, _)| v == b) {
            return;
        }
        self.adjacency[a].push((b, weight));
        self.adjacency[b].push((a, weight));
    }

    pub fn neighbors(&self, v: usize) -> &[(usize, f64)] {
        &self.adjacency[v]
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }
}

/// Connect every point to its `k` nearest neighbours, weighted by distance.
///
/// `distances` is a dense N×N squared-distance matrix.
pub fn knn_graph(distances: &[f64], n: usize, k: usize) -> Graph {
    let mut graph = Graph::with_vertices(n);
    for (i, nn) in geometry::knn_indices(distances, n, k).into_iter().enumerate() {
        for j in nn {
            graph.add_edge(i, j, distances[i * n + j].sqrt());
        }
    }
    graph
}

/// Connect every pair closer than the `quantile` of all pairwise distances.
pub fn threshold_graph(distances: &[f64], n: usize, quantile: f64) -> Graph {
    let mut graph = Graph::with_vertices(n);
    let mut off_diagonal: Vec<f64> = (0..n)
        .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| distances[i * n + j])
        .collect();
    if off_diagonal.is_empty() {
        return graph;
    }
    off_diagonal.sort_by(f64::total_cmp);
    let q = quantile.clamp(0.0, 1.0);
    let cut = off_diagonal[((off_diagonal.len() - 1) as f64 * q).round() as usize];

    for i in 0..n {
        for j in i + 1..n {
            let d = distances[i * n + j];
            if d <= cut {
                graph.add_edge(i, j, d.sqrt());
            }
        }
    }
    graph
}

fn l1_normalize(scores: &mut [f64]) {
    let total: f64 = scores.iter().sum();
    if total > 0.0 {
        scores.iter_mut().for_each(|s| *s /= total);
    }
}

fn l1_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Weighted PageRank by power iteration.
///
/// Vertices with no outgoing weight spread their rank uniformly.
pub fn pagerank(graph: &Graph, damping: f64) -> Vec<f64> {
    let n = graph.len();
    if n == 0 {
        return Vec::new();
    }
    let out_weight: Vec<f64> = (0..n)
        .map(|v| graph.neighbors(v).iter().map(|&(_, w)| w).sum())
        .collect();

    let uniform = 1.0 / n as f64;
    let mut rank = vec![uniform; n];
    for step in 0..MAX_STEPS {
        let dangling: f64 = (0..n)
            .filter(|&v| out_weight[v] <= 0.0)
            .map(|v| rank[v])
            .sum();
        let base = (1.0 - damping) * uniform + damping * dangling * uniform;

        let mut next = vec![base; n];
        for v in (0..n).filter(|&v| out_weight[v] > 0.0) {
            for &(u, w) in graph.neighbors(v) {
                next[u] += damping * rank[v] * w / out_weight[v];
            }
        }

        let delta = l1_diff(&next, &rank);
        rank = next;
        if delta < n as f64 * TOLERANCE {
            tracing::trace!(step, "pagerank converged");
            break;
        }
    }
    l1_normalize(&mut rank);
    rank
}

/// Hub and authority scores by power iteration.
pub fn hits(graph: &Graph) -> (Vec<f64>, Vec<f64>) {
    let n = graph.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let mut hubs = vec![1.0 / n as f64; n];
    let mut authorities = vec![0.0; n];

    for _ in 0..MAX_STEPS {
        authorities.iter_mut().for_each(|a| *a = 0.0);
        for v in 0..n {
            for &(u, w) in graph.neighbors(v) {
                authorities[u] += hubs[v] * w;
            }
        }
        l1_normalize(&mut authorities);

        let mut next = vec![0.0; n];
        for (v, slot) in next.iter_mut().enumerate() {
            *slot = graph
                .neighbors(v)
                .iter()
                .map(|&(u, w)| authorities[u] * w)
                .sum();
        }
        l1_normalize(&mut next);

        let delta = l1_diff(&next, &hubs);
        hubs = next;
        if delta < n as f64 * TOLERANCE {
            break;
        }
    }
    (hubs, authorities)
}

/// Ids of the `ntop` highest scores, best first; ties keep id order.
pub fn top_points(scores: &[f64], ntop: usize) -> Vec<usize> {
    let mut ids: Vec<usize> = (0..scores.len()).collect();
    ids.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    ids.truncate(ntop);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Star: vertex 0 linked to 1..=4 with unit weights.
    fn star() -> Graph {
        let mut g = Graph::with_vertices(5);
        for leaf in 1..5 {
            g.add_edge(0, leaf, 1.0);
        }
        g
    }

    #[test]
    fn pagerank_ranks_hub_first() {
        let scores = pagerank(&star(), 0.85);
        assert!((scores.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(top_points(&scores, 1), vec![0]);
        assert!((scores[1] - scores[4]).abs() < 1e-12);
    }

    #[test]
    fn hits_on_undirected_graph_is_symmetric() {
        // triangle 0-1-2 with a pendant 3 on vertex 0
        let mut g = Graph::with_vertices(4);
        for (a, b) in [(0, 1), (0, 2), (1, 2), (0, 3)] {
            g.add_edge(a, b, 1.0);
        }
        let (hubs, authorities) = hits(&g);
        assert_eq!(top_points(&hubs, 1), vec![0]);
        for (h, a) in hubs.iter().zip(&authorities) {
            assert!((h - a).abs() < 1e-6);
        }
    }

    #[test]
    fn knn_graph_links_nearest() {
        let pos = [[0.0, 0.0], [1.0, 0.0], [10.0, 0.0], [11.0, 0.0]];
        let g = knn_graph(&geometry::embedding_sq_distances(&pos), 4, 1);
        assert_eq!(g.edge_count(), 2);
        assert_eq!(g.neighbors(0), &[(1, 1.0)]);
    }

    #[test]
    fn threshold_graph_keeps_short_edges() {
        let pos = [[0.0, 0.0], [1.0, 0.0], [10.0, 0.0], [11.0, 0.0]];
        let g = threshold_graph(&geometry::embedding_sq_distances(&pos), 4, 0.2);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn isolated_vertices_share_rank() {
        let scores = pagerank(&Graph::with_vertices(4), 0.85);
        assert!(scores.iter().all(|&s| (s - 0.25).abs() < 1e-12));
    }

    #[test]
    fn top_points_breaks_ties_by_id() {
        assert_eq!(top_points(&[0.2, 0.5, 0.5, 0.1], 3), vec![1, 2, 0]);
    }
}
