//! HNSW graph structure and configuration.
//!
//! [`HnswConfig`] holds the tuning parameters. [`GraphStore`] is the node
//! arena: handles are dense `u32` indices into an append-only vector of
//! [`Node`]s, and every node carries one lock per layer around its adjacency.

use crate::config;
use crate::error::{IndexError, IndexResult};
use crate::hnsw::distance::DistanceMetric;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Rule used to pick a node's neighbors from a candidate list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborHeuristic {
    /// The M closest candidates by raw distance.
    Simple,
    /// Skip candidates that are closer to an already chosen neighbor than to
    /// the base node, spreading links across directions.
    #[default]
    Diversified,
}

/// Configuration parameters for an HNSW index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Maximum links per node above layer 0. Layer 0 allows `2 * m`.
    pub m: usize,
    /// Beam width while inserting.
    pub ef_construction: usize,
    /// Beam width while searching. `None` uses the requested `k`.
    pub ef_search: Option<usize>,
    /// Level multiplier. `None` uses `1 / ln(m)`.
    pub level_lambda: Option<f64>,
    /// Maximum number of layers; sampled levels are capped below it.
    pub max_layers: usize,
    /// Backfill diversified selections with rejected candidates up to `m`.
    pub expand_best_selection: bool,
    /// Keep links dropped by pruning in a bounded overflow set.
    pub keep_pruned_connections: bool,
    pub neighbor_heuristic: NeighborHeuristic,
    pub distance_metric: DistanceMetric,
    /// Allow concurrent inserts from multiple threads. When false, overlapping
    /// mutations fail with [`IndexError::ConcurrencyViolation`].
    pub thread_safe: bool,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: config::HNSW_DEFAULT_M,
            ef_construction: config::HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_search: None,
            level_lambda: None,
            max_layers: config::HNSW_DEFAULT_MAX_LAYERS,
            expand_best_selection: false,
            keep_pruned_connections: false,
            neighbor_heuristic: NeighborHeuristic::Diversified,
            distance_metric: DistanceMetric::Cosine,
            thread_safe: false,
        }
    }
}

impl HnswConfig {
    /// Link capacity of a layer: `2m` at layer 0, `m` above.
    #[inline]
    pub fn layer_capacity(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    /// Effective level multiplier.
    pub fn level_lambda(&self) -> f64 {
        self.level_lambda
            .unwrap_or_else(|| 1.0 / (self.m as f64).ln())
    }

    pub fn validate(&self) -> IndexResult<()> {
        if self.m < 2 {
            return Err(IndexError::InvalidConfig(format!(
                "m must be at least 2, got {}",
                self.m
            )));
        }
        if self.ef_construction == 0 {
            return Err(IndexError::InvalidConfig(
                "ef_construction must be positive".into(),
            ));
        }
        if self.ef_search == Some(0) {
            return Err(IndexError::InvalidConfig("ef_search must be positive".into()));
        }
        if self.max_layers == 0 {
            return Err(IndexError::InvalidConfig(
                "max_layers must be positive".into(),
            ));
        }
        let lambda = self.level_lambda();
        if !lambda.is_finite() || lambda <= 0.0 {
            return Err(IndexError::InvalidConfig(format!(
                "level_lambda must be finite and positive, got {lambda}"
            )));
        }
        Ok(())
    }
}

/// A directed link to a neighbor with the distance cached at link time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: u32,
    pub distance: f32,
}

/// Adjacency of one node at one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Adjacency {
    /// Primary links, bounded by the layer capacity.
    pub links: Vec<Link>,
    /// Links dropped by pruning, kept when `keep_pruned_connections` is set.
    /// Search follows them; they are never promoted back into `links`.
    pub overflow: Vec<Link>,
}

impl Adjacency {
    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.links.iter().any(|l| l.id == id)
    }

    /// Move pruned links into the overflow set, keeping the `cap` closest.
    pub(crate) fn stash(&mut self, dropped: impl IntoIterator<Item = Link>, cap: usize) {
        for link in dropped {
            if !self.overflow.iter().any(|l| l.id == link.id) {
                self.overflow.push(link);
            }
        }
        let links = &self.links;
        self.overflow.retain(|l| !links.iter().any(|p| p.id == l.id));
        sort_links(&mut self.overflow);
        self.overflow.truncate(cap);
    }
}

/// Sort by distance, lower handle first among equals.
pub(crate) fn sort_links(links: &mut [Link]) {
    links.sort_unstable_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
}

/// A graph node: its vector and one adjacency lock per layer `0..=level`.
#[derive(Debug)]
pub struct Node {
    vector: Box<[f32]>,
    layers: Vec<RwLock<Adjacency>>,
}

impl Node {
    pub(crate) fn new(vector: Vec<f32>, level: usize) -> Self {
        Self {
            vector: vector.into_boxed_slice(),
            layers: (0..=level).map(|_| RwLock::new(Adjacency::default())).collect(),
        }
    }

    pub(crate) fn with_layers(vector: Vec<f32>, layers: Vec<Adjacency>) -> Self {
        Self {
            vector: vector.into_boxed_slice(),
            layers: layers.into_iter().map(RwLock::new).collect(),
        }
    }

    /// Top layer of this node.
    #[inline]
    pub fn level(&self) -> usize {
        self.layers.len() - 1
    }

    #[inline]
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    /// Handles reachable from this node at `layer`: primary links followed by
    /// the overflow set. Empty if the node does not reach that layer.
    pub fn neighbors(&self, layer: usize) -> Vec<u32> {
        match self.layers.get(layer) {
            Some(lock) => {
                let adj = lock.read();
                adj.links
                    .iter()
                    .chain(adj.overflow.iter())
                    .map(|l| l.id)
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Snapshot of one layer's adjacency.
    pub fn adjacency(&self, layer: usize) -> Option<Adjacency> {
        self.layers.get(layer).map(|lock| lock.read().clone())
    }

    /// Number of primary links at `layer`.
    pub fn degree(&self, layer: usize) -> usize {
        self.layers.get(layer).map_or(0, |lock| lock.read().links.len())
    }

    #[inline]
    pub(crate) fn read_layer(&self, layer: usize) -> Option<RwLockReadGuard<'_, Adjacency>> {
        self.layers.get(layer).map(|lock| lock.read())
    }

    #[inline]
    pub(crate) fn write_layer(&self, layer: usize) -> Option<RwLockWriteGuard<'_, Adjacency>> {
        self.layers.get(layer).map(|lock| lock.write())
    }
}

/// Entry point and top layer, updated together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphState {
    pub entry_point: Option<u32>,
    pub max_layer: usize,
}

/// Append-only node arena plus global entry state.
///
/// Lock order: an adjacency lock may be held while calling [`GraphStore::node`];
/// the arena lock is never held while acquiring an adjacency lock.
#[derive(Debug)]
pub struct GraphStore {
    nodes: RwLock<Vec<Arc<Node>>>,
    state: Mutex<GraphState>,
    dimension: usize,
}

impl GraphStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            nodes: RwLock::new(Vec::new()),
            state: Mutex::new(GraphState::default()),
            dimension,
        }
    }

    pub(crate) fn from_parts(dimension: usize, nodes: Vec<Node>, state: GraphState) -> Self {
        Self {
            nodes: RwLock::new(nodes.into_iter().map(Arc::new).collect()),
            state: Mutex::new(state),
            dimension,
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Node by handle.
    ///
    /// # Panics
    ///
    /// Panics if `id` was never appended. Handles only come from this store.
    #[inline]
    pub fn node(&self, id: u32) -> Arc<Node> {
        Arc::clone(&self.nodes.read()[id as usize])
    }

    /// Clone of the whole arena, in handle order.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn state(&self) -> GraphState {
        *self.state.lock()
    }

    /// Append nodes under one arena write lock. Handles are consecutive and
    /// follow the iterator order.
    pub(crate) fn append(&self, new_nodes: Vec<Node>) -> Range<u32> {
        let mut nodes = self.nodes.write();
        let start = nodes.len() as u32;
        nodes.extend(new_nodes.into_iter().map(Arc::new));
        start..nodes.len() as u32
    }

    /// Make `id` the entry point if the graph has none yet.
    ///
    /// Returns `None` when `id` was installed, otherwise the current entry
    /// point and top layer to descend from.
    pub(crate) fn claim_entry_point(&self, id: u32, level: usize) -> Option<(u32, usize)> {
        let mut state = self.state.lock();
        match state.entry_point {
            Some(ep) => Some((ep, state.max_layer)),
            None => {
                state.entry_point = Some(id);
                state.max_layer = level;
                None
            }
        }
    }

    /// Raise the entry point to `id` if `level` exceeds the current top layer.
    pub(crate) fn promote(&self, id: u32, level: usize) -> bool {
        let mut state = self.state.lock();
        if level > state.max_layer {
            state.max_layer = level;
            state.entry_point = Some(id);
            true
        } else {
            false
        }
    }
}

/// Per-layer statistics reported by [`HnswIndex::stats`](crate::HnswIndex::stats).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerStats {
    pub layer: usize,
    pub nodes: usize,
    pub mean_degree: f64,
    pub max_degree: usize,
    pub overflow_links: usize,
}

/// Shape of the graph: node count, entry state and per-layer statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub dimension: usize,
    pub entry_point: Option<u32>,
    pub max_layer: usize,
    pub layers: Vec<LayerStats>,
}

impl GraphStore {
    pub fn stats(&self) -> GraphStats {
        let state = self.state();
        let nodes = self.nodes();
        let top = nodes.iter().map(|n| n.level()).max().unwrap_or(0);
        let mut layers: Vec<LayerStats> = (0..=top)
            .map(|layer| LayerStats {
                layer,
                ..LayerStats::default()
            })
            .collect();
        let mut degree_sums = vec![0usize; top + 1];

        for node in &nodes {
            for (layer, stats) in layers.iter_mut().enumerate().take(node.level() + 1) {
                if let Some(adj) = node.read_layer(layer) {
                    stats.nodes += 1;
                    stats.max_degree = stats.max_degree.max(adj.links.len());
                    stats.overflow_links += adj.overflow.len();
                    degree_sums[layer] += adj.links.len();
                }
            }
        }
        for (stats, sum) in layers.iter_mut().zip(degree_sums) {
            if stats.nodes > 0 {
                stats.mean_degree = sum as f64 / stats.nodes as f64;
            }
        }
        if nodes.is_empty() {
            layers.clear();
        }

        GraphStats {
            nodes: nodes.len(),
            dimension: self.dimension,
            entry_point: state.entry_point,
            max_layer: state.max_layer,
            layers,
        }
    }
}
