//! # smallworld-core
//!
//! In-memory approximate nearest neighbor index built on a Hierarchical
//! Navigable Small World (HNSW) graph, with topology-only persistence and a
//! parallel record ingestion pipeline.
//!
//! The index stores full `f32` vectors; the persisted graph does not. Callers
//! reloading a graph resupply the vectors in the id-sorted order used at
//! construction, since node handles are positional.

/// Global configuration constants: defaults and input limits.
pub mod config;
/// Error types shared by the index and its persistence layer.
pub mod error;
/// HNSW index: graph store, construction, search, distance metrics and level sampling.
pub mod hnsw;
/// Record ingestion: file readers, id ordering, batched delivery to the index.
pub mod ingest;
/// Topology persistence: byte-stream format and atomic file save/load.
pub mod storage;

pub use error::{IndexError, IndexResult};
pub use hnsw::{
    DistanceMetric, GraphStats, HnswConfig, HnswIndex, Neighbor, NeighborHeuristic,
    RandomGenerator, SeededRandom,
};
