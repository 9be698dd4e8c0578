//! ANN Benchmark: random unit vectors (cosine)
//! Measures build rate, Recall@10 against brute force and QPS per ef.
//!
//! Usage: cargo bench --bench ann_random [-- <count> <dim>]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallworld_core::hnsw::normalize;
use smallworld_core::{DistanceMetric, HnswConfig, HnswIndex};
use std::collections::HashSet;
use std::time::Instant;

fn random_unit_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            normalize(&mut v);
            v
        })
        .collect()
}

fn brute_force(data: &[Vec<f32>], query: &[f32], k: usize) -> Vec<u32> {
    let mut all: Vec<(f32, u32)> = data
        .iter()
        .enumerate()
        .map(|(i, v)| (DistanceMetric::Cosine.distance(query, v), i as u32))
        .collect();
    all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    all.into_iter().take(k).map(|(_, id)| id).collect()
}

fn recall_at_k(predicted: &[u32], truth: &[u32]) -> f64 {
    let truth: HashSet<u32> = truth.iter().copied().collect();
    let found = predicted.iter().filter(|id| truth.contains(id)).count();
    found as f64 / truth.len().max(1) as f64
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).filter(|a| !a.starts_with('-')).collect();
    let count: usize = args.first().and_then(|s| s.parse().ok()).unwrap_or(20_000);
    let dim: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(64);
    let num_queries = 200;
    let k = 10;

    println!("=== ANN Benchmark: random unit vectors ({count} x {dim}d, cosine) ===");
    println!();

    let data = random_unit_vectors(count, dim, 1);
    let queries = random_unit_vectors(num_queries, dim, 2);

    print!("Computing ground truth...");
    let truth: Vec<Vec<u32>> = queries.iter().map(|q| brute_force(&data, q, k)).collect();
    println!(" {num_queries} queries");

    for thread_safe in [false, true] {
        println!();
        println!(
            "--- Index Construction ({}) ---",
            if thread_safe { "parallel" } else { "sequential" }
        );
        let config = HnswConfig {
            thread_safe,
            ..HnswConfig::default()
        };
        println!("Config: M=16, ef_c=200, metric=Cosine");
        let index = HnswIndex::with_seed(dim, config, 42).expect("valid config");

        let t0 = Instant::now();
        for chunk in data.chunks(10_000) {
            index.insert_batch(chunk.to_vec()).expect("dimension matches");
        }
        let build_time = t0.elapsed().as_secs_f64();
        println!(
            "  Build time: {build_time:.2}s ({:.0} inserts/s)",
            count as f64 / build_time
        );
        println!("  Index nodes: {}, max layer: {}", index.len(), index.max_layer());

        println!();
        println!("  ef_search | Recall@10 |    QPS    | Avg latency");
        println!("  ----------+-----------+-----------+------------");
        for ef in [10, 20, 40, 80, 160] {
            let t0 = Instant::now();
            let mut total_recall = 0.0f64;
            for (q, t) in queries.iter().zip(&truth) {
                let hits = index.search_with_ef(q, k, ef).expect("dimension matches");
                let predicted: Vec<u32> = hits.iter().map(|h| h.id).collect();
                total_recall += recall_at_k(&predicted, t);
            }
            let elapsed = t0.elapsed().as_secs_f64();
            println!(
                "  {ef:>9} | {:>9.4} | {:>9.0} | {:>8.1} us",
                total_recall / num_queries as f64,
                num_queries as f64 / elapsed,
                elapsed * 1e6 / num_queries as f64
            );
        }
    }
}
