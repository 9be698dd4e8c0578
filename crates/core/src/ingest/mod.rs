//! Record ingestion.
//!
//! Files are read in parallel on a bounded rayon pool, merged into one
//! id-sorted, id-unique sequence, then handed to the index batch by batch
//! through a [`VectorSource`]. The index receives a single deterministic
//! order; handles therefore follow id order.

/// JSON lines and binary vector file readers.
pub mod reader;

use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_READER_CPU_FRACTION};
use crate::error::IndexError;
use crate::hnsw::HnswIndex;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

pub use reader::{read_file, read_fvecs, read_jsonl, write_fvecs};

/// One input record: an identifier, its embedding and optional metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub vector: Vec<f32>,
    pub title: Option<String>,
    pub text: Option<String>,
}

impl Record {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            title: None,
            text: None,
        }
    }
}

/// Errors raised while reading records or feeding them to the index.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: invalid JSON record: {source}", .path.display())]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Structurally invalid record or vector file.
    #[error("malformed input {}: {message}", .path.display())]
    Malformed { path: PathBuf, message: String },

    #[error(
        "unsupported record file {} (expected .jsonl, .ndjson, .json, .fvecs or .bin)",
        .0.display()
    )]
    UnsupportedFormat(PathBuf),

    /// Records disagree on the embedding dimension.
    #[error("record '{id}' has dimension {got}, expected {expected}")]
    Dimension {
        id: String,
        expected: usize,
        got: usize,
    },

    #[error("reader pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Ordered supplier of record batches. An empty batch means exhausted.
pub trait VectorSource {
    fn next_batch(&mut self) -> Vec<Record>;
}

/// [`VectorSource`] over an in-memory, already ordered record list.
#[derive(Debug)]
pub struct MemorySource {
    records: std::vec::IntoIter<Record>,
    batch_size: usize,
}

impl MemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self::with_batch_size(records, DEFAULT_BATCH_SIZE)
    }

    /// A zero batch size is treated as one.
    pub fn with_batch_size(records: Vec<Record>, batch_size: usize) -> Self {
        Self {
            records: records.into_iter(),
            batch_size: batch_size.max(1),
        }
    }

    /// Records not yet handed out.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl VectorSource for MemorySource {
    fn next_batch(&mut self) -> Vec<Record> {
        self.records.by_ref().take(self.batch_size).collect()
    }
}

/// Outcome of [`IngestionPipeline::feed`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub batches: usize,
    pub records: usize,
    /// Handle assigned to `ids[0]`.
    pub first_handle: u32,
    /// Record ids in handle order.
    pub ids: Vec<String>,
    /// Handle of each entry in `ids`, ascending. Other writers on a
    /// thread-safe index can leave gaps between batches.
    pub handles: Vec<u32>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl IngestReport {
    /// Record id stored under `handle`, if it came from this ingest.
    pub fn id_of(&self, handle: u32) -> Option<&str> {
        let pos = self.handles.binary_search(&handle).ok()?;
        self.ids.get(pos).map(String::as_str)
    }
}

/// Parallel file reading and batched delivery to an [`HnswIndex`].
#[derive(Debug, Clone)]
pub struct IngestionPipeline {
    batch_size: usize,
    threads: usize,
}

impl Default for IngestionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestionPipeline {
    /// Pipeline with the default batch size and a reader pool sized to a
    /// fraction of the logical CPUs.
    pub fn new() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        let threads = ((cpus as f64 * DEFAULT_READER_CPU_FRACTION) as usize).max(1);
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            threads,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Read all `paths` in parallel and merge them into one sequence sorted
    /// by id.
    ///
    /// Duplicate ids keep the first occurrence in `paths` order and are
    /// logged. Every record must share one dimension.
    pub fn load_files<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Result<Vec<Record>, IngestError> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;
        let per_file: Vec<Vec<Record>> = pool.install(|| {
            paths
                .par_iter()
                .map(|p| reader::read_file(p.as_ref()))
                .collect::<Result<_, _>>()
        })?;

        let mut records: Vec<Record> = per_file.into_iter().flatten().collect();
        let read = records.len();
        // Stable: among equal ids the earliest file and line stay first
        records.sort_by(|a, b| a.id.cmp(&b.id));
        let mut duplicates = 0usize;
        records.dedup_by(|later, kept| {
            let dup = later.id == kept.id;
            if dup {
                duplicates += 1;
                tracing::warn!(id = %later.id, "Duplicate record id, keeping first occurrence");
            }
            dup
        });

        if let Some(first) = records.first() {
            let expected = first.vector.len();
            if let Some(bad) = records.iter().find(|r| r.vector.len() != expected) {
                return Err(IngestError::Dimension {
                    id: bad.id.clone(),
                    expected,
                    got: bad.vector.len(),
                });
            }
        }

        tracing::info!(
            files = paths.len(),
            records = records.len(),
            read,
            duplicates,
            threads = self.threads,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded record files"
        );
        Ok(records)
    }

    /// Wrap records in a [`MemorySource`] using this pipeline's batch size.
    pub fn source(&self, records: Vec<Record>) -> MemorySource {
        MemorySource::with_batch_size(records, self.batch_size)
    }

    /// Drain `source` into `index`, one `insert_batch` per source batch.
    pub fn feed(
        &self,
        source: &mut dyn VectorSource,
        index: &HnswIndex,
    ) -> Result<IngestReport, IngestError> {
        let start = Instant::now();
        let mut report = IngestReport {
            first_handle: index.len() as u32,
            ..IngestReport::default()
        };

        loop {
            let batch = source.next_batch();
            if batch.is_empty() {
                break;
            }
            let batch_start = Instant::now();
            let size = batch.len();
            let (ids, vectors): (Vec<String>, Vec<Vec<f32>>) =
                batch.into_iter().map(|r| (r.id, r.vector)).unzip();
            let handles = index.insert_batch(vectors)?;

            if let (0, Some(&first)) = (report.batches, handles.first()) {
                report.first_handle = first;
            }
            report.batches += 1;
            report.records += size;
            report.ids.extend(ids);
            report.handles.extend_from_slice(&handles);
            tracing::debug!(
                batch = report.batches,
                size,
                first_handle = ?handles.first(),
                total = report.records,
                elapsed_ms = batch_start.elapsed().as_millis() as u64,
                "Batch inserted"
            );
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            records = report.records,
            batches = report.batches,
            nodes = index.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Ingest complete"
        );
        Ok(report)
    }
}
