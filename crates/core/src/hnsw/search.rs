//! HNSW search: single-layer beam search and multi-layer k-NN.
//!
//! Beam search walks both the primary links and the overflow set of every
//! expanded node. Equal distances are ordered by handle, lower first.

use crate::error::IndexResult;
use crate::hnsw::distance::DistanceMetric;
use crate::hnsw::graph::GraphStore;
use crate::hnsw::index::HnswIndex;
use crate::hnsw::visited::{with_visited, VisitedSet};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// One search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: u32,
    pub distance: f32,
}

/// A candidate to expand. Reversed ordering turns the max-heap into a min-heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.distance, other.id).cmp(&(self.distance, self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A result entry. Max-heap by (distance, id) so the worst sits on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    id: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.distance, self.id).cmp(&(other.distance, other.id))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Search one layer of the graph.
///
/// Returns up to `ef` nodes closest to `query`, sorted by (distance, id).
/// `visited` is cleared at the start of each call; `exclude` is marked
/// visited up front so it is neither expanded nor returned.
#[allow(clippy::too_many_arguments)]
pub(crate) fn search_layer(
    graph: &GraphStore,
    metric: DistanceMetric,
    query: &[f32],
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    exclude: Option<u32>,
) -> Vec<(f32, u32)> {
    visited.clear();
    if let Some(id) = exclude {
        visited.insert(id);
    }
    // The beam never holds more than the whole graph
    let cap = ef.min(graph.len());
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(cap * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(cap + 1);
    // Cached worst result, valid once the heap holds ef entries
    let mut worst = ResultEntry {
        distance: OrderedFloat(f32::MAX),
        id: u32::MAX,
    };
    let mut scratch: Vec<u32> = Vec::new();

    for &ep in entry_points {
        if !visited.insert(ep) {
            continue;
        }
        let dist = metric.distance(query, graph.node(ep).vector());
        candidates.push(Candidate {
            distance: OrderedFloat(dist),
            id: ep,
        });
        results.push(ResultEntry {
            distance: OrderedFloat(dist),
            id: ep,
        });
        if results.len() > ef {
            results.pop();
        }
        if results.len() >= ef {
            if let Some(top) = results.peek() {
                worst = *top;
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        // Closest unexpanded candidate is already worse than every result
        if results.len() >= ef && candidate.distance > worst.distance {
            break;
        }

        scratch.clear();
        match graph.node(candidate.id).read_layer(layer) {
            Some(adj) => scratch.extend(adj.links.iter().chain(adj.overflow.iter()).map(|l| l.id)),
            None => continue,
        }

        for &neighbor_id in &scratch {
            if !visited.insert(neighbor_id) {
                continue;
            }
            let entry = ResultEntry {
                distance: OrderedFloat(metric.distance(query, graph.node(neighbor_id).vector())),
                id: neighbor_id,
            };
            if results.len() < ef || entry < worst {
                candidates.push(Candidate {
                    distance: entry.distance,
                    id: neighbor_id,
                });
                results.push(entry);
                if results.len() > ef {
                    results.pop();
                }
                if results.len() >= ef {
                    if let Some(top) = results.peek() {
                        worst = *top;
                    }
                }
            }
        }
    }

    results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.id))
        .collect()
}

/// Greedy descent with beam width 1 from `entry` through layers
/// `top..=bottom + 1`. Returns the closest node found on the last layer walked.
#[allow(clippy::too_many_arguments)]
pub(crate) fn greedy_descent(
    graph: &GraphStore,
    metric: DistanceMetric,
    query: &[f32],
    entry: u32,
    top: usize,
    bottom: usize,
    visited: &mut VisitedSet,
    exclude: Option<u32>,
) -> u32 {
    let mut current = entry;
    for layer in (bottom + 1..=top).rev() {
        let nearest = search_layer(
            graph,
            metric,
            query,
            std::slice::from_ref(&current),
            1,
            layer,
            visited,
            exclude,
        );
        if let Some(&(_, id)) = nearest.first() {
            current = id;
        }
    }
    current
}

impl HnswIndex {
    /// The `k` nearest neighbors of `query`, closest first.
    ///
    /// Uses the configured `ef_search`, or `k` when unset. An empty index
    /// returns no results.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        let ef = self.config.ef_search.unwrap_or(k);
        self.search_with_ef(query, k, ef)
    }

    /// Like [`HnswIndex::search`] with an explicit beam width. `ef` is raised
    /// to `k` when smaller and capped at the node count, so a `k` larger than
    /// the graph returns every node.
    pub fn search_with_ef(&self, query: &[f32], k: usize, ef: usize) -> IndexResult<Vec<Neighbor>> {
        self.check_dimension(query.len())?;
        let _ticket = self.access.read()?;

        let state = self.graph.state();
        let entry = match state.entry_point {
            Some(ep) if k > 0 => ep,
            _ => return Ok(Vec::new()),
        };
        let metric = self.config.distance_metric;
        let ef = ef.max(k).min(self.graph.len());

        let mut hits = with_visited(self.graph.len(), |visited| {
            let nearest = greedy_descent(
                &self.graph,
                metric,
                query,
                entry,
                state.max_layer,
                0,
                visited,
                None,
            );
            search_layer(&self.graph, metric, query, &[nearest], ef, 0, visited, None)
        });
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(distance, id)| Neighbor { id, distance })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::{HnswConfig, NeighborHeuristic};
    use crate::IndexError;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_embedding(dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    fn build(n: u64, dim: usize, config: HnswConfig) -> HnswIndex {
        let index = HnswIndex::with_seed(dim, config, 42).unwrap();
        for seed in 0..n {
            index.insert(make_embedding(dim, seed)).unwrap();
        }
        index
    }

    fn brute_force(index: &HnswIndex, query: &[f32], k: usize) -> Vec<u32> {
        let metric = index.config().distance_metric;
        let mut all: Vec<(f32, u32)> = (0..index.len() as u32)
            .map(|id| (metric.distance(query, index.graph().node(id).vector()), id))
            .collect();
        all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        all.into_iter().take(k).map(|(_, id)| id).collect()
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = HnswIndex::with_seed(4, HnswConfig::default(), 1).unwrap();
        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_k_zero_returns_nothing() {
        let index = build(10, 4, HnswConfig::default());
        assert!(index.search(&make_embedding(4, 3), 0).unwrap().is_empty());
    }

    #[test]
    fn test_k_beyond_node_count_returns_all() {
        let index = build(5, 4, HnswConfig::default());
        let query = [1.0, 0.0, 0.0, 0.0];

        let hits = index.search(&query, usize::MAX).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

        let hits = index.search_with_ef(&query, 3, usize::MAX).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(index.search_with_ef(&query, 1 << 33, 1 << 33).unwrap().len(), 5);
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = build(3, 4, HnswConfig::default());
        let err = index.search(&[1.0, 2.0], 1).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 4,
                got: 2
            }
        ));
    }

    #[test]
    fn test_results_ascending_and_self_first() {
        let index = build(300, 16, HnswConfig::default());
        for seed in [0u64, 17, 150, 299] {
            let query = make_embedding(16, seed);
            let hits = index.search_with_ef(&query, 10, 64).unwrap();
            assert_eq!(hits.len(), 10);
            assert_eq!(hits[0].id, seed as u32);
            assert!(hits[0].distance < 1e-5);
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
    }

    #[test]
    fn test_k_larger_than_graph() {
        let index = build(5, 8, HnswConfig::default());
        let hits = index.search(&make_embedding(8, 99), 50).unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn test_recall_against_brute_force() {
        let config = HnswConfig {
            ef_construction: 100,
            ..HnswConfig::default()
        };
        let index = build(500, 16, config);
        let mut found = 0;
        for seed in 1000..1020u64 {
            let query = make_embedding(16, seed);
            let truth = brute_force(&index, &query, 10);
            let hits = index.search_with_ef(&query, 10, 64).unwrap();
            found += hits.iter().filter(|h| truth.contains(&h.id)).count();
        }
        let recall = found as f64 / 200.0;
        assert!(recall > 0.9, "recall@10 too low: {recall}");
    }

    #[test]
    fn test_simple_heuristic_searches() {
        let config = HnswConfig {
            neighbor_heuristic: NeighborHeuristic::Simple,
            ..HnswConfig::default()
        };
        let index = build(200, 8, config);
        let hits = index.search_with_ef(&make_embedding(8, 42), 1, 32).unwrap();
        assert_eq!(hits[0].id, 42);
    }

    #[test]
    fn test_search_layer_excludes_node() {
        let index = build(50, 8, HnswConfig::default());
        let query = index.graph().node(7).vector().to_vec();
        let hits = with_visited(index.len(), |visited| {
            search_layer(
                index.graph(),
                index.config().distance_metric,
                &query,
                &[0],
                10,
                0,
                visited,
                Some(7),
            )
        });
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|&(_, id)| id != 7));
    }
}
