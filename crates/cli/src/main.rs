use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use smallworld_core::config;
use smallworld_core::hnsw::normalize;
use smallworld_core::ingest::{IngestionPipeline, Record};
use smallworld_core::storage::{load_graph, save_graph};
use smallworld_core::{DistanceMetric, HnswConfig, HnswIndex, NeighborHeuristic, SeededRandom};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smallworld", about = "Build and query HNSW graphs over embedding files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read record files, build a graph and save its topology
    Build(BuildArgs),
    /// Search a saved graph
    Query(QueryArgs),
    /// Print graph statistics as JSON
    Stats(LoadArgs),
}

/// Record files and how to read them. Files are merged in id order, so the
/// same inputs always yield the same handle order.
#[derive(Args)]
struct InputArgs {
    /// Record files (.jsonl, .ndjson, .json, .fvecs, .bin) or directories holding them
    #[arg(short, long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Reader threads (default: 75% of logical CPUs)
    #[arg(long)]
    threads: Option<usize>,

    /// Scale every vector to unit length after reading
    #[arg(long, default_value_t = false)]
    normalize: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum HeuristicArg {
    Simple,
    Diversified,
}

impl From<HeuristicArg> for NeighborHeuristic {
    fn from(h: HeuristicArg) -> Self {
        match h {
            HeuristicArg::Simple => NeighborHeuristic::Simple,
            HeuristicArg::Diversified => NeighborHeuristic::Diversified,
        }
    }
}

#[derive(Args)]
struct BuildArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Output graph file (`.hnsw` is appended when it has no extension)
    #[arg(short, long)]
    output: PathBuf,

    /// Links per node above layer 0 (layer 0 allows twice as many)
    #[arg(short, long, default_value_t = config::HNSW_DEFAULT_M)]
    m: usize,

    #[arg(long, default_value_t = config::HNSW_DEFAULT_EF_CONSTRUCTION)]
    ef_construction: usize,

    /// Default query beam width stored with the graph (default: k)
    #[arg(long)]
    ef_search: Option<usize>,

    /// Level multiplier (default: 1 / ln(m))
    #[arg(long)]
    level_lambda: Option<f64>,

    #[arg(long, default_value_t = config::HNSW_DEFAULT_MAX_LAYERS)]
    max_layers: usize,

    /// Distance metric: cosine, dot or euclidean
    #[arg(long, default_value_t = DistanceMetric::Cosine)]
    metric: DistanceMetric,

    #[arg(long, value_enum, default_value_t = HeuristicArg::Diversified)]
    heuristic: HeuristicArg,

    /// Backfill diversified selections with rejected candidates
    #[arg(long, default_value_t = false)]
    expand_best: bool,

    /// Keep pruned links in a bounded overflow set
    #[arg(long, default_value_t = false)]
    keep_pruned: bool,

    /// Connect each batch on all cores (build is then not reproducible)
    #[arg(long, default_value_t = false)]
    thread_safe: bool,

    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    seed: u64,

    /// Records per insert batch
    #[arg(long, default_value_t = config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

#[derive(Args)]
struct LoadArgs {
    #[command(flatten)]
    input: InputArgs,

    /// Saved graph file
    #[arg(short, long)]
    graph: PathBuf,

    /// Distance metric to search with (default: the one the graph was built with)
    #[arg(long)]
    metric: Option<DistanceMetric>,
}

#[derive(Args)]
struct QueryArgs {
    #[command(flatten)]
    load: LoadArgs,

    /// Query by the vector of an existing record id
    #[arg(long, conflicts_with = "vector")]
    id: Option<String>,

    /// Query vector as comma-separated floats
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    vector: Option<Vec<f32>>,

    /// Number of neighbors
    #[arg(short, long, default_value_t = 10)]
    k: usize,

    /// Beam width (default: the stored ef_search, else k)
    #[arg(long)]
    ef: Option<usize>,
}

#[derive(Serialize)]
struct Hit<'a> {
    rank: usize,
    id: &'a str,
    handle: u32,
    distance: f32,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("smallworld=info".parse().expect("valid directive literal"))
                .add_directive(
                    "smallworld_core=info"
                        .parse()
                        .expect("valid directive literal"),
                ),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Build(args) => build(args),
        Command::Query(args) => query(args),
        Command::Stats(args) => stats(args),
    }
}

/// Expand directories into the record files they hold, sorted by name.
fn expand_inputs(inputs: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in inputs {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_record_file(p))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    if files.is_empty() {
        return Err("no record files found in the given inputs".into());
    }
    Ok(files)
}

fn is_record_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jsonl" | "ndjson" | "json" | "fvecs" | "bin")
    )
}

fn read_records(input: &InputArgs, batch_size: usize) -> CliResult<(IngestionPipeline, Vec<Record>)> {
    let mut pipeline = IngestionPipeline::new().with_batch_size(batch_size);
    if let Some(threads) = input.threads {
        pipeline = pipeline.with_threads(threads);
    }
    let files = expand_inputs(&input.input)?;
    let mut records = pipeline.load_files(&files)?;
    if records.is_empty() {
        return Err("input files hold no records".into());
    }
    if input.normalize {
        for r in &mut records {
            normalize(&mut r.vector);
        }
    }
    Ok((pipeline, records))
}

fn build(args: BuildArgs) -> CliResult<()> {
    let start = Instant::now();
    let (pipeline, records) = read_records(&args.input, args.batch_size)?;
    let dimension = records[0].vector.len();
    let load_secs = start.elapsed().as_secs_f64();

    let hnsw_config = HnswConfig {
        m: args.m,
        ef_construction: args.ef_construction,
        ef_search: args.ef_search,
        level_lambda: args.level_lambda,
        max_layers: args.max_layers,
        expand_best_selection: args.expand_best,
        keep_pruned_connections: args.keep_pruned,
        neighbor_heuristic: args.heuristic.into(),
        distance_metric: args.metric,
        thread_safe: args.thread_safe,
    };
    let index = HnswIndex::with_seed(dimension, hnsw_config, args.seed)?;

    let build_start = Instant::now();
    let mut source = pipeline.source(records);
    let report = pipeline.feed(&mut source, &index)?;
    let build_secs = build_start.elapsed().as_secs_f64();

    let mut output = args.output;
    if output.extension().is_none() {
        output.set_extension(config::GRAPH_FILE_EXTENSION);
    }
    let save_start = Instant::now();
    save_graph(&index, &output)?;

    tracing::info!(
        path = %output.display(),
        nodes = report.records,
        dimension,
        max_layer = index.max_layer(),
        load_secs,
        build_secs,
        save_ms = save_start.elapsed().as_millis() as u64,
        rate = report.records as f64 / build_secs.max(1e-9),
        "Build finished"
    );
    Ok(())
}

fn open(args: &LoadArgs) -> CliResult<(Vec<Record>, HnswIndex)> {
    let start = Instant::now();
    let (_, records) = read_records(&args.input, config::DEFAULT_BATCH_SIZE)?;
    let vectors = records.iter().map(|r| r.vector.clone()).collect();
    let index = load_graph(
        &args.graph,
        vectors,
        args.metric,
        Box::new(SeededRandom::from_entropy()),
    )?;
    tracing::info!(
        nodes = index.len(),
        load_ms = start.elapsed().as_millis() as u64,
        "Graph ready"
    );
    Ok((records, index))
}

fn query(args: QueryArgs) -> CliResult<()> {
    let (records, index) = open(&args.load)?;

    let mut vector = match (&args.id, &args.vector) {
        (Some(id), _) => records
            .iter()
            .find(|r| &r.id == id)
            .map(|r| r.vector.clone())
            .ok_or_else(|| format!("no record with id '{id}'"))?,
        (None, Some(v)) => v.clone(),
        (None, None) => return Err("pass either --id or --vector".into()),
    };
    if args.load.input.normalize {
        normalize(&mut vector);
    }

    let start = Instant::now();
    let hits = match args.ef {
        Some(ef) => index.search_with_ef(&vector, args.k, ef)?,
        None => index.search(&vector, args.k)?,
    };
    tracing::info!(
        k = args.k,
        results = hits.len(),
        search_us = start.elapsed().as_micros() as u64,
        "Search completed"
    );

    let out: Vec<Hit<'_>> = hits
        .iter()
        .enumerate()
        .map(|(rank, h)| Hit {
            rank: rank + 1,
            id: &records[h.id as usize].id,
            handle: h.id,
            distance: h.distance,
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn stats(args: LoadArgs) -> CliResult<()> {
    let (_, index) = open(&args)?;
    println!("{}", serde_json::to_string_pretty(&index.stats())?);
    Ok(())
}
