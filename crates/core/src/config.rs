//! Global configuration constants for smallworld.
//!
//! Tuning defaults for the HNSW index and limits applied while ingesting
//! records. Runtime configuration is carried by [`HnswConfig`](crate::HnswConfig)
//! and by CLI arguments in the `smallworld` binary.

/// Default maximum number of links per node above layer 0.
///
/// Layer 0 allows twice as many. Higher values improve recall but increase
/// memory and build time. Typical range: 8–64.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default beam width during index construction.
///
/// Higher values produce a better graph but slow down insertion.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Maximum number of layers in the graph. Sampled levels are capped at
/// `HNSW_DEFAULT_MAX_LAYERS - 1`.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Default seed used when a caller asks for a reproducible build without
/// choosing one.
pub const DEFAULT_SEED: u64 = 42;

/// Maximum accepted embedding dimension when reading record files.
pub const MAX_DIMENSION: usize = 4096;

/// Default number of records handed to the index per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Share of logical CPUs used by the file reading pool.
pub const DEFAULT_READER_CPU_FRACTION: f64 = 0.75;

/// File extension of persisted graphs.
pub const GRAPH_FILE_EXTENSION: &str = "hnsw";
