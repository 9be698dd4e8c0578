//! Storage layer: topology-only graph persistence.
//!
//! A saved graph holds the configuration, entry state and adjacency of every
//! node, guarded by a CRC32 footer. Vectors stay with the caller and are
//! supplied again on load.

/// Graph byte format and atomic file save/load.
pub mod persistence;

pub use persistence::{load_graph, save_graph};
