//! The [`HnswIndex`] handle tying configuration, graph store and level
//! sampling together.

use crate::error::{IndexError, IndexResult};
use crate::hnsw::graph::{GraphStats, GraphStore, HnswConfig};
use crate::hnsw::rng::{RandomGenerator, SeededRandom};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};

/// Approximate nearest neighbor index over fixed-dimension `f32` vectors.
///
/// All operations take `&self`; share the index across threads with an
/// `Arc`. Concurrent inserts require `config.thread_safe`.
pub struct HnswIndex {
    pub(crate) config: HnswConfig,
    pub(crate) level_lambda: f64,
    pub(crate) graph: GraphStore,
    pub(crate) rng: Mutex<Box<dyn RandomGenerator>>,
    pub(crate) access: AccessGuard,
}

// RandomGenerator is not Debug
impl fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HnswIndex")
            .field("config", &self.config)
            .field("level_lambda", &self.level_lambda)
            .field("dimension", &self.graph.dimension())
            .field("len", &self.graph.len())
            .finish()
    }
}

impl HnswIndex {
    /// Creates an empty index drawing levels from `rng`.
    pub fn new(
        dimension: usize,
        config: HnswConfig,
        rng: Box<dyn RandomGenerator>,
    ) -> IndexResult<Self> {
        Self::from_graph(GraphStore::new(dimension), config, rng)
    }

    /// Creates an empty index with a seeded level generator.
    pub fn with_seed(dimension: usize, config: HnswConfig, seed: u64) -> IndexResult<Self> {
        Self::new(dimension, config, Box::new(SeededRandom::new(seed)))
    }

    pub(crate) fn from_graph(
        graph: GraphStore,
        config: HnswConfig,
        rng: Box<dyn RandomGenerator>,
    ) -> IndexResult<Self> {
        config.validate()?;
        if graph.dimension() == 0 {
            return Err(IndexError::InvalidConfig(
                "dimension must be positive".into(),
            ));
        }
        Ok(Self {
            level_lambda: config.level_lambda(),
            access: AccessGuard::new(config.thread_safe),
            config,
            graph,
            rng: Mutex::new(rng),
        })
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.graph.dimension()
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.graph.state().entry_point
    }

    pub fn max_layer(&self) -> usize {
        self.graph.state().max_layer
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Vector stored under `id`, if any.
    pub fn vector(&self, id: u32) -> Option<Vec<f32>> {
        ((id as usize) < self.graph.len()).then(|| self.graph.node(id).vector().to_vec())
    }

    /// Change the default query beam width. `None` searches with `ef = k`.
    pub fn set_ef_search(&mut self, ef: Option<usize>) {
        self.config.ef_search = ef;
    }

    pub fn stats(&self) -> GraphStats {
        self.graph.stats()
    }

    pub(crate) fn check_dimension(&self, got: usize) -> IndexResult<()> {
        let expected = self.graph.dimension();
        if got != expected {
            return Err(IndexError::DimensionMismatch { expected, got });
        }
        Ok(())
    }
}

/// Detects overlapping use of an index built with `thread_safe = false`.
///
/// State is `0` when idle, `-1` while a mutation runs and the number of
/// active readers otherwise. Thread-safe indexes skip the bookkeeping.
#[derive(Debug)]
pub(crate) struct AccessGuard {
    enabled: bool,
    state: AtomicIsize,
}

impl AccessGuard {
    fn new(thread_safe: bool) -> Self {
        Self {
            enabled: !thread_safe,
            state: AtomicIsize::new(0),
        }
    }

    /// Exclusive access for inserts.
    pub(crate) fn write(&self) -> IndexResult<AccessTicket<'_>> {
        if !self.enabled {
            return Ok(AccessTicket { guard: None, delta: 0 });
        }
        self.state
            .compare_exchange(0, -1, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| IndexError::ConcurrencyViolation)?;
        Ok(AccessTicket {
            guard: Some(self),
            delta: 1,
        })
    }

    /// Shared access for searches and serialization.
    pub(crate) fn read(&self) -> IndexResult<AccessTicket<'_>> {
        if !self.enabled {
            return Ok(AccessTicket { guard: None, delta: 0 });
        }
        self.state
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |s| {
                (s >= 0).then_some(s + 1)
            })
            .map_err(|_| IndexError::ConcurrencyViolation)?;
        Ok(AccessTicket {
            guard: Some(self),
            delta: -1,
        })
    }
}

/// Releases an [`AccessGuard`] claim on drop.
pub(crate) struct AccessTicket<'a> {
    guard: Option<&'a AccessGuard>,
    delta: isize,
}

impl Drop for AccessTicket<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard {
            guard.state.fetch_add(self.delta, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_rejects_overlapping_writes() {
        let guard = AccessGuard::new(false);
        let ticket = guard.write().unwrap();
        assert!(matches!(guard.write(), Err(IndexError::ConcurrencyViolation)));
        assert!(matches!(guard.read(), Err(IndexError::ConcurrencyViolation)));
        drop(ticket);
        assert!(guard.write().is_ok());
    }

    #[test]
    fn test_guard_allows_shared_reads() {
        let guard = AccessGuard::new(false);
        let a = guard.read().unwrap();
        let b = guard.read().unwrap();
        assert!(matches!(guard.write(), Err(IndexError::ConcurrencyViolation)));
        drop(a);
        drop(b);
        assert!(guard.write().is_ok());
    }

    #[test]
    fn test_thread_safe_guard_is_a_no_op() {
        let guard = AccessGuard::new(true);
        let _a = guard.write().unwrap();
        let _b = guard.write().unwrap();
        let _c = guard.read().unwrap();
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let err = HnswIndex::with_seed(0, HnswConfig::default(), 1).unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(_)));
    }

    #[test]
    fn test_vector_lookup() {
        let index = HnswIndex::with_seed(2, HnswConfig::default(), 1).unwrap();
        assert_eq!(index.vector(0), None);
        let id = index.insert(vec![0.5, 0.5]).unwrap();
        assert_eq!(index.vector(id), Some(vec![0.5, 0.5]));
    }
}
