//! HNSW insertion.
//!
//! Connects a new node layer by layer with symmetric links and heuristic
//! neighbor pruning (Algorithm 4 of the HNSW paper). Batches reserve their
//! handles up front and connect either sequentially or on the rayon pool.

use crate::error::IndexResult;
use crate::hnsw::graph::{sort_links, Adjacency, Link, Node, NeighborHeuristic};
use crate::hnsw::index::HnswIndex;
use crate::hnsw::rng::draw_level;
use crate::hnsw::search::{greedy_descent, search_layer};
use crate::hnsw::visited::with_visited;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Instant;

impl HnswIndex {
    /// Insert one vector and return its handle.
    pub fn insert(&self, vector: Vec<f32>) -> IndexResult<u32> {
        self.check_dimension(vector.len())?;
        let _ticket = self.access.write()?;

        let level = draw_level(
            self.rng.lock().as_mut(),
            self.level_lambda,
            self.config.max_layers,
        );
        let id = self.graph.append(vec![Node::new(vector, level)]).start;
        self.connect(id);
        Ok(id)
    }

    /// Insert many vectors. Handles are consecutive and follow input order.
    ///
    /// Every dimension is checked before the graph is touched, so a bad
    /// vector rejects the whole batch. Levels are drawn in input order.
    pub fn insert_batch(&self, vectors: Vec<Vec<f32>>) -> IndexResult<Vec<u32>> {
        for v in &vectors {
            self.check_dimension(v.len())?;
        }
        if vectors.is_empty() {
            return Ok(Vec::new());
        }
        let _ticket = self.access.write()?;
        let start = Instant::now();

        let nodes: Vec<Node> = {
            let mut rng = self.rng.lock();
            vectors
                .into_iter()
                .map(|v| {
                    let level = draw_level(rng.as_mut(), self.level_lambda, self.config.max_layers);
                    Node::new(v, level)
                })
                .collect()
        };
        let handles = self.graph.append(nodes);

        if self.config.thread_safe {
            handles.clone().into_par_iter().for_each(|id| self.connect(id));
        } else {
            for id in handles.clone() {
                self.connect(id);
            }
        }

        tracing::debug!(
            count = handles.len(),
            first = handles.start,
            parallel = self.config.thread_safe,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch connected"
        );
        Ok(handles.collect())
    }

    /// Wire an appended node into the graph.
    fn connect(&self, id: u32) {
        let node = self.graph.node(id);
        let level = node.level();

        // Empty graph: the node becomes the entry point
        let Some((entry, top)) = self.graph.claim_entry_point(id, level) else {
            return;
        };
        let metric = self.config.distance_metric;
        let query = node.vector();

        with_visited(self.graph.len(), |visited| {
            // Phase 1: greedy descent to the node's top layer
            let mut seed = greedy_descent(
                &self.graph,
                metric,
                query,
                entry,
                top,
                level,
                visited,
                Some(id),
            );

            // Phase 2: beam search and link on every shared layer
            for layer in (0..=level.min(top)).rev() {
                let candidates = search_layer(
                    &self.graph,
                    metric,
                    query,
                    std::slice::from_ref(&seed),
                    self.config.ef_construction,
                    layer,
                    visited,
                    Some(id),
                );
                let Some(&(_, closest)) = candidates.first() else {
                    continue;
                };
                seed = closest;

                let selected = self.select_neighbors(&candidates, self.config.m);
                self.set_links(&node, layer, &selected);

                // Phase 3: reverse links, pruning neighbors over capacity
                for &(distance, neighbor) in &selected {
                    self.link_back(neighbor, id, distance, layer);
                }
            }
        });

        // Phase 4: a taller node takes over as entry point
        if self.graph.promote(id, level) {
            tracing::debug!(id, level, "Entry point raised");
        }
    }

    /// Pick at most `m` neighbors from `candidates`, which must be sorted by
    /// (distance, id).
    pub(crate) fn select_neighbors(&self, candidates: &[(f32, u32)], m: usize) -> Vec<(f32, u32)> {
        match self.config.neighbor_heuristic {
            NeighborHeuristic::Simple => candidates.iter().take(m).copied().collect(),
            NeighborHeuristic::Diversified => {
                let metric = self.config.distance_metric;
                let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
                let mut selected_nodes: Vec<Arc<Node>> = Vec::with_capacity(m);
                let mut rejected: Vec<(f32, u32)> = Vec::new();

                for &(dist_to_base, candidate) in candidates {
                    if selected.len() >= m {
                        break;
                    }
                    let node = self.graph.node(candidate);
                    let diverse = selected_nodes
                        .iter()
                        .all(|s| dist_to_base <= metric.distance(node.vector(), s.vector()));
                    if diverse {
                        selected.push((dist_to_base, candidate));
                        selected_nodes.push(node);
                    } else {
                        rejected.push((dist_to_base, candidate));
                    }
                }

                if self.config.expand_best_selection && selected.len() < m {
                    let room = m - selected.len();
                    selected.extend(rejected.into_iter().take(room));
                    selected.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                }
                selected
            }
        }
    }

    /// Merge the node's chosen links at `layer` with any backlinks that
    /// concurrent inserts already attached.
    fn set_links(&self, node: &Node, layer: usize, selected: &[(f32, u32)]) {
        let Some(mut adj) = node.write_layer(layer) else {
            return;
        };
        for &(distance, id) in selected {
            if !adj.contains(id) {
                adj.links.push(Link { id, distance });
            }
        }
        let cap = self.config.layer_capacity(layer);
        if adj.links.len() > cap {
            self.prune(&mut adj, cap);
        } else {
            sort_links(&mut adj.links);
            let Adjacency { links, overflow } = &mut *adj;
            overflow.retain(|o| !links.iter().any(|l| l.id == o.id));
        }
    }

    /// Add the reverse link `neighbor -> id`.
    fn link_back(&self, neighbor: u32, id: u32, distance: f32, layer: usize) {
        let node = self.graph.node(neighbor);
        let Some(mut adj) = node.write_layer(layer) else {
            return;
        };
        if adj.contains(id) {
            return;
        }
        adj.overflow.retain(|l| l.id != id);
        adj.links.push(Link { id, distance });

        let cap = self.config.layer_capacity(layer);
        if adj.links.len() > cap {
            self.prune(&mut adj, cap);
        }
    }

    /// Re-run selection over an over-full link list and shrink it to `cap`.
    /// Dropped links go to the overflow set when `keep_pruned_connections`
    /// is set.
    fn prune(&self, adj: &mut Adjacency, cap: usize) {
        sort_links(&mut adj.links);
        let candidates: Vec<(f32, u32)> = adj.links.iter().map(|l| (l.distance, l.id)).collect();
        let kept = self.select_neighbors(&candidates, cap);

        let (links, dropped): (Vec<Link>, Vec<Link>) = adj
            .links
            .iter()
            .copied()
            .partition(|l| kept.iter().any(|&(_, id)| id == l.id));
        adj.links = links;
        if self.config.keep_pruned_connections {
            adj.stash(dropped, self.config.m);
        } else {
            let links = &adj.links;
            adj.overflow.retain(|o| !links.iter().any(|l| l.id == o.id));
        }
    }
}
