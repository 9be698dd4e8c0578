//! Topology persistence for HNSW graphs.
//!
//! Only the graph is written: configuration, entry state and every node's
//! per-layer links with their cached distances. Vectors are not stored;
//! callers resupply them on load in handle order, so no distance is
//! recomputed.
//!
//! Layout: `[magic "SWG1"][version u32 BE][bincode payload][CRC32 BE]`,
//! the checksum covering the payload. File writes use atomic temp-file +
//! rename.

use crate::error::{IndexError, IndexResult};
use crate::hnsw::graph::{Adjacency, GraphState, GraphStore, HnswConfig, Node};
use crate::hnsw::rng::RandomGenerator;
use crate::hnsw::{DistanceMetric, HnswIndex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Leading bytes of every serialized graph.
const GRAPH_MAGIC: &[u8; 4] = b"SWG1";

/// Current format version.
const FORMAT_VERSION: u32 = 1;

/// Magic + version header, plus the CRC32 footer.
const FRAME_OVERHEAD: usize = 4 + 4 + 4;

#[derive(Debug, Serialize, Deserialize)]
struct GraphPayload {
    node_count: u64,
    dimension: u64,
    m: u64,
    level_lambda: f64,
    config: HnswConfig,
    entry_point: Option<u32>,
    max_layer: u64,
    /// Per node in handle order, its layers `0..=level`.
    nodes: Vec<Vec<Adjacency>>,
}

fn format_err(msg: impl Into<String>) -> IndexError {
    IndexError::Format(msg.into())
}

/// Wrap a payload in the magic/version header and CRC32 footer.
fn frame(payload: &[u8]) -> Vec<u8> {
    let crc = crc32fast::hash(payload);
    let mut output = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    output.extend_from_slice(GRAPH_MAGIC);
    output.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    output.extend_from_slice(payload);
    output.extend_from_slice(&crc.to_be_bytes());
    output
}

/// Check header and checksum, returning the payload slice.
fn unframe(raw: &[u8]) -> IndexResult<&[u8]> {
    if raw.len() < FRAME_OVERHEAD {
        return Err(format_err(format!(
            "truncated stream: {} bytes, need at least {FRAME_OVERHEAD}",
            raw.len()
        )));
    }
    if &raw[..4] != GRAPH_MAGIC {
        return Err(format_err("bad magic, not a smallworld graph"));
    }
    let version = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
    if version != FORMAT_VERSION {
        return Err(format_err(format!(
            "unsupported format version {version} (expected {FORMAT_VERSION})"
        )));
    }
    let n = raw.len();
    let payload = &raw[8..n - 4];
    let stored_crc = u32::from_be_bytes([raw[n - 4], raw[n - 3], raw[n - 2], raw[n - 1]]);
    let computed_crc = crc32fast::hash(payload);
    if stored_crc != computed_crc {
        return Err(format_err(format!(
            "CRC32 mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }
    tracing::debug!("Graph CRC32 verified: {:#010x}", stored_crc);
    Ok(payload)
}

impl GraphPayload {
    /// Structural checks against the supplied vectors. Anything that would
    /// leave a dangling handle or a mis-sized node is rejected.
    fn validate(&self, vectors: &[Vec<f32>]) -> IndexResult<()> {
        let n = self.nodes.len();
        if self.node_count as usize != n {
            return Err(format_err(format!(
                "header declares {} nodes, payload holds {n}",
                self.node_count
            )));
        }
        if vectors.len() != n {
            return Err(format_err(format!(
                "graph has {n} nodes but {} vectors were supplied",
                vectors.len()
            )));
        }
        let dimension = self.dimension as usize;
        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimension) {
            return Err(format_err(format!(
                "vector {i} has dimension {}, graph expects {dimension}",
                v.len()
            )));
        }
        if self.m as usize != self.config.m {
            return Err(format_err(format!(
                "header M {} disagrees with stored config M {}",
                self.m, self.config.m
            )));
        }
        if self.level_lambda.to_bits() != self.config.level_lambda().to_bits() {
            return Err(format_err("level multiplier disagrees with stored config"));
        }

        for (id, layers) in self.nodes.iter().enumerate() {
            if layers.is_empty() || layers.len() > self.config.max_layers {
                return Err(format_err(format!(
                    "node {id} has {} layers (allowed 1..={})",
                    layers.len(),
                    self.config.max_layers
                )));
            }
            for (layer, adj) in layers.iter().enumerate() {
                for link in adj.links.iter().chain(adj.overflow.iter()) {
                    let target = link.id as usize;
                    if target >= n {
                        return Err(format_err(format!(
                            "node {id} layer {layer} links to {target}, beyond {n} nodes"
                        )));
                    }
                    if self.nodes[target].len() <= layer {
                        return Err(format_err(format!(
                            "node {id} layer {layer} links to {target}, which does not reach that layer"
                        )));
                    }
                }
            }
        }

        match self.entry_point {
            None if n == 0 => {
                if self.max_layer != 0 {
                    return Err(format_err("empty graph with non-zero max layer"));
                }
            }
            None => return Err(format_err("non-empty graph without entry point")),
            Some(ep) => {
                let top = self
                    .nodes
                    .get(ep as usize)
                    .map(|layers| layers.len() - 1)
                    .ok_or_else(|| format_err(format!("entry point {ep} out of range")))?;
                if top as u64 != self.max_layer {
                    return Err(format_err(format!(
                        "entry point {ep} has level {top}, max layer is {}",
                        self.max_layer
                    )));
                }
            }
        }
        Ok(())
    }
}

impl HnswIndex {
    fn encode(&self) -> IndexResult<Vec<u8>> {
        let _ticket = self.access.read()?;
        // State first: an entry point is claimed only after its node is
        // appended, so it always falls inside the node snapshot below.
        let state = self.graph.state();
        let mut snapshot = self.graph.nodes();
        if state.entry_point.is_none() {
            snapshot.clear();
        }
        // Concurrent inserts may link into nodes appended after the snapshot
        let n = snapshot.len() as u32;
        let nodes: Vec<Vec<Adjacency>> = snapshot
            .iter()
            .map(|node| {
                (0..=node.level())
                    .filter_map(|l| node.adjacency(l))
                    .map(|mut adj| {
                        adj.links.retain(|link| link.id < n);
                        adj.overflow.retain(|link| link.id < n);
                        adj
                    })
                    .collect()
            })
            .collect();
        let payload = GraphPayload {
            node_count: nodes.len() as u64,
            dimension: self.graph.dimension() as u64,
            m: self.config.m as u64,
            level_lambda: self.level_lambda,
            config: self.config.clone(),
            entry_point: state.entry_point,
            max_layer: state.max_layer as u64,
            nodes,
        };
        let bytes = bincode::serialize(&payload).map_err(|e| format_err(e.to_string()))?;
        Ok(frame(&bytes))
    }

    /// Write the graph topology to `writer`. Vectors are not included.
    pub fn serialize<W: Write>(&self, mut writer: W) -> IndexResult<()> {
        let bytes = self.encode()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Rebuild an index from a serialized topology and the vectors it was
    /// built from, in handle order.
    ///
    /// `metric` replaces the stored metric when given; a difference is logged.
    /// `None` keeps the metric the graph was built with. Every structural
    /// problem is reported as [`IndexError::Format`] and no partial index is
    /// returned.
    pub fn deserialize<R: Read>(
        mut reader: R,
        vectors: Vec<Vec<f32>>,
        metric: Option<DistanceMetric>,
        rng: Box<dyn RandomGenerator>,
    ) -> IndexResult<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        let payload = unframe(&raw)?;
        let payload: GraphPayload = bincode::deserialize(payload)
            .map_err(|e| format_err(format!("corrupt payload: {e}")))?;
        payload.validate(&vectors)?;

        let mut config = payload.config;
        let metric = metric.unwrap_or(config.distance_metric);
        if config.distance_metric != metric {
            tracing::warn!(
                stored = %config.distance_metric,
                requested = %metric,
                "Graph was built with a different metric, using the requested one"
            );
            config.distance_metric = metric;
        }

        let nodes: Vec<Node> = vectors
            .into_iter()
            .zip(payload.nodes)
            .map(|(vector, layers)| Node::with_layers(vector, layers))
            .collect();
        let state = GraphState {
            entry_point: payload.entry_point,
            max_layer: payload.max_layer as usize,
        };
        let graph = GraphStore::from_parts(payload.dimension as usize, nodes, state);

        HnswIndex::from_graph(graph, config, rng).map_err(|e| match e {
            IndexError::InvalidConfig(msg) => format_err(format!("stored config rejected: {msg}")),
            other => other,
        })
    }
}

/// Save a graph to `path` atomically: write a sibling temp file, then rename.
pub fn save_graph(index: &HnswIndex, path: impl AsRef<Path>) -> IndexResult<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let bytes = index.encode()?;
    {
        let mut writer = BufWriter::new(fs::File::create(tmp_path)?);
        writer.write_all(&bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(tmp_path, path)?;

    tracing::info!(
        path = %path.display(),
        nodes = index.len(),
        bytes = bytes.len(),
        "Saved graph"
    );
    Ok(())
}

/// Load a graph saved by [`save_graph`], pairing it with `vectors`.
///
/// With `metric` unset the stored metric is used.
pub fn load_graph(
    path: impl AsRef<Path>,
    vectors: Vec<Vec<f32>>,
    metric: Option<DistanceMetric>,
    rng: Box<dyn RandomGenerator>,
) -> IndexResult<HnswIndex> {
    let path = path.as_ref();
    let reader = BufReader::new(fs::File::open(path)?);
    let index = HnswIndex::deserialize(reader, vectors, metric, rng)?;
    tracing::info!(
        path = %path.display(),
        nodes = index.len(),
        max_layer = index.max_layer(),
        "Loaded graph"
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::graph::Link;
    use crate::hnsw::SeededRandom;

    fn sample_vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| {
                let angle = i as f32 * 0.37;
                vec![angle.cos(), angle.sin(), (i % 7) as f32 * 0.1]
            })
            .collect()
    }

    fn build(vectors: &[Vec<f32>]) -> HnswIndex {
        let config = HnswConfig {
            m: 4,
            ef_construction: 32,
            ..HnswConfig::default()
        };
        let index = HnswIndex::with_seed(3, config, 7).unwrap();
        index.insert_batch(vectors.to_vec()).unwrap();
        index
    }

    fn to_bytes(index: &HnswIndex) -> Vec<u8> {
        let mut buf = Vec::new();
        index.serialize(&mut buf).unwrap();
        buf
    }

    fn reload(bytes: &[u8], vectors: Vec<Vec<f32>>) -> IndexResult<HnswIndex> {
        HnswIndex::deserialize(
            bytes,
            vectors,
            Some(DistanceMetric::Cosine),
            Box::new(SeededRandom::new(1)),
        )
    }

    fn assert_format_err(result: IndexResult<HnswIndex>, needle: &str) {
        match result {
            Err(IndexError::Format(msg)) => assert!(msg.contains(needle), "unexpected message: {msg}"),
            other => panic!("expected format error containing '{needle}', got {other:?}"),
        }
    }

    #[test]
    fn test_roundtrip_preserves_topology() {
        let vectors = sample_vectors(60);
        let index = build(&vectors);
        let loaded = reload(&to_bytes(&index), vectors).unwrap();

        assert_eq!(loaded.len(), index.len());
        assert_eq!(loaded.entry_point(), index.entry_point());
        assert_eq!(loaded.max_layer(), index.max_layer());
        assert_eq!(loaded.config(), index.config());
        for id in 0..index.len() as u32 {
            let (a, b) = (index.graph().node(id), loaded.graph().node(id));
            assert_eq!(a.level(), b.level());
            for layer in 0..=a.level() {
                assert_eq!(a.adjacency(layer), b.adjacency(layer));
            }
        }
    }

    #[test]
    fn test_empty_graph_roundtrip() {
        let index = HnswIndex::with_seed(3, HnswConfig::default(), 1).unwrap();
        let loaded = reload(&to_bytes(&index), Vec::new()).unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.search(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let vectors = sample_vectors(20);
        let bytes = to_bytes(&build(&vectors));
        assert_format_err(reload(&bytes[..6], vectors.clone()), "truncated");
        // Cutting the tail breaks the checksum
        assert!(matches!(
            reload(&bytes[..bytes.len() - 9], vectors),
            Err(IndexError::Format(_))
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let vectors = sample_vectors(10);
        let mut bytes = to_bytes(&build(&vectors));
        bytes[0] = b'X';
        assert_format_err(reload(&bytes, vectors), "magic");
    }

    #[test]
    fn test_unknown_version_rejected() {
        let vectors = sample_vectors(10);
        let mut bytes = to_bytes(&build(&vectors));
        bytes[7] = 9;
        assert_format_err(reload(&bytes, vectors), "version");
    }

    #[test]
    fn test_flipped_byte_fails_checksum() {
        let vectors = sample_vectors(30);
        let mut bytes = to_bytes(&build(&vectors));
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert_format_err(reload(&bytes, vectors), "CRC32");
    }

    #[test]
    fn test_vector_count_mismatch_rejected() {
        let vectors = sample_vectors(25);
        let bytes = to_bytes(&build(&vectors));
        assert_format_err(reload(&bytes, vectors[..24].to_vec()), "vectors were supplied");
    }

    #[test]
    fn test_vector_dimension_mismatch_rejected() {
        let mut vectors = sample_vectors(12);
        let bytes = to_bytes(&build(&vectors));
        vectors[5].push(1.0);
        assert_format_err(reload(&bytes, vectors), "vector 5");
    }

    #[test]
    fn test_dangling_link_rejected() {
        let payload = GraphPayload {
            node_count: 2,
            dimension: 2,
            m: 16,
            level_lambda: HnswConfig::default().level_lambda(),
            config: HnswConfig::default(),
            entry_point: Some(0),
            max_layer: 0,
            nodes: vec![
                vec![Adjacency {
                    links: vec![Link { id: 5, distance: 0.1 }],
                    overflow: Vec::new(),
                }],
                vec![Adjacency::default()],
            ],
        };
        let bytes = frame(&bincode::serialize(&payload).unwrap());
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert_format_err(reload(&bytes, vectors), "beyond 2 nodes");
    }

    #[test]
    fn test_entry_point_level_checked() {
        let payload = GraphPayload {
            node_count: 1,
            dimension: 2,
            m: 16,
            level_lambda: HnswConfig::default().level_lambda(),
            config: HnswConfig::default(),
            entry_point: Some(0),
            max_layer: 2,
            nodes: vec![vec![Adjacency::default()]],
        };
        let bytes = frame(&bincode::serialize(&payload).unwrap());
        assert_format_err(reload(&bytes, vec![vec![1.0, 0.0]]), "max layer is 2");
    }

    #[test]
    fn test_caller_metric_wins() {
        let vectors = sample_vectors(15);
        let bytes = to_bytes(&build(&vectors));
        let loaded = HnswIndex::deserialize(
            bytes.as_slice(),
            vectors,
            Some(DistanceMetric::Euclidean),
            Box::new(SeededRandom::new(1)),
        )
        .unwrap();
        assert_eq!(loaded.config().distance_metric, DistanceMetric::Euclidean);
    }

    #[test]
    fn test_stored_metric_used_by_default() {
        let vectors = sample_vectors(15);
        let config = HnswConfig {
            m: 4,
            ef_construction: 32,
            distance_metric: DistanceMetric::Euclidean,
            ..HnswConfig::default()
        };
        let index = HnswIndex::with_seed(3, config, 7).unwrap();
        index.insert_batch(vectors.clone()).unwrap();

        let loaded = HnswIndex::deserialize(
            to_bytes(&index).as_slice(),
            vectors.clone(),
            None,
            Box::new(SeededRandom::new(1)),
        )
        .unwrap();
        assert_eq!(loaded.config().distance_metric, DistanceMetric::Euclidean);
        for v in vectors.iter().take(5) {
            assert_eq!(
                index.search_with_ef(v, 4, 16).unwrap(),
                loaded.search_with_ef(v, 4, 16).unwrap()
            );
        }
    }

    #[test]
    fn test_save_during_parallel_inserts_stays_loadable() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let config = HnswConfig {
            m: 8,
            ef_construction: 32,
            thread_safe: true,
            ..HnswConfig::default()
        };
        let index = HnswIndex::with_seed(3, config, 11).unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let writers: Vec<_> = (0..4)
                .map(|t| {
                    let index = &index;
                    scope.spawn(move || {
                        for batch in 0..20 {
                            let offset = (t * 20 + batch) * 50;
                            let vectors: Vec<Vec<f32>> = (offset..offset + 50)
                                .map(|i| {
                                    let angle = i as f32 * 0.113;
                                    vec![angle.cos(), angle.sin(), (i % 13) as f32 * 0.05]
                                })
                                .collect();
                            index.insert_batch(vectors).unwrap();
                        }
                    })
                })
                .collect();
            let done = &done;
            scope.spawn(move || {
                for w in writers {
                    w.join().unwrap();
                }
                done.store(true, Ordering::SeqCst);
            });

            let mut saves = 0;
            while !done.load(Ordering::SeqCst) || saves == 0 {
                let bytes = to_bytes(&index);
                let payload: GraphPayload = bincode::deserialize(unframe(&bytes).unwrap()).unwrap();
                let vectors: Vec<Vec<f32>> = (0..payload.node_count as u32)
                    .map(|id| index.vector(id).unwrap())
                    .collect();
                let loaded = reload(&bytes, vectors).unwrap();
                assert_eq!(loaded.len() as u64, payload.node_count);
                saves += 1;
            }
        });

        assert_eq!(index.len(), 4000);
        let vectors: Vec<Vec<f32>> = (0..4000).map(|id| index.vector(id).unwrap()).collect();
        assert_eq!(reload(&to_bytes(&index), vectors).unwrap().len(), 4000);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("graph.hnsw");
        let vectors = sample_vectors(40);
        let index = build(&vectors);

        save_graph(&index, &path).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("nested").join("graph.hnsw.tmp").exists());

        let loaded = load_graph(
            &path,
            vectors.clone(),
            None,
            Box::new(SeededRandom::new(1)),
        )
        .unwrap();
        for v in vectors.iter().take(10) {
            let a = index.search_with_ef(v, 5, 16).unwrap();
            let b = loaded.search_with_ef(v, 5, 16).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_graph(
            dir.path().join("absent.hnsw"),
            Vec::new(),
            None,
            Box::new(SeededRandom::new(1)),
        );
        assert!(matches!(result, Err(IndexError::Io(_))));
    }
}
