//! Hierarchical Navigable Small World (HNSW) approximate nearest neighbor index.
//!
//! Vectors live in an append-only node arena; each node carries its adjacency
//! for every layer it reaches behind its own lock, so inserts touching
//! unrelated nodes do not contend. Levels are drawn from an injected
//! [`RandomGenerator`], which makes single-threaded builds reproducible.

/// Distance metrics: cosine, dot product and squared euclidean.
pub mod distance;
/// Node arena, adjacency lists and index configuration.
pub mod graph;
/// The index handle.
pub mod index;
/// Insertion with symmetric links and heuristic pruning.
pub mod insert;
/// Level sampling.
pub mod rng;
/// Single-layer beam search and multi-layer k-NN.
pub mod search;
/// SIMD distance kernels.
pub mod simd;
/// Generation-based visited set for graph traversal.
pub mod visited;

pub use distance::{normalize, DistanceMetric};
pub use graph::{
    Adjacency, GraphState, GraphStats, GraphStore, HnswConfig, LayerStats, Link, NeighborHeuristic,
    Node,
};
pub use index::HnswIndex;
pub use rng::{RandomGenerator, SeededRandom};
pub use search::Neighbor;
