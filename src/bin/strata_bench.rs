//! Workload driver for the Strata B+ tree.
//!
//! Loads a tree over the chosen page store, runs lookups against it and prints
//! timings alongside the tree's split and fast-path counters.
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use strata::storage::btree::ValueSum;
use strata::{
    BTree, BTreeOptions, CacheOptions, CachingPageStorage, FilePageStorage, MemoryPageStorage,
    OverflowPageStorage, PageStorage, StrataError, DEFAULT_PAGE_SIZE,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "strata-bench",
    version,
    about = "Load and query a Strata B+ tree"
)]
struct Cli {
    #[arg(long, default_value_t = 100_000, help = "Number of keys to insert")]
    count: u64,

    #[arg(long, value_enum, default_value_t = Workload::Sequential)]
    workload: Workload,

    #[arg(long, value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    #[arg(long, help = "Page size in bytes (overrides the config file)")]
    page_size: Option<usize>,

    #[arg(long, help = "Resident page bound of the cache (overrides the config file)")]
    cache_pages: Option<usize>,

    #[arg(
        long,
        default_value_t = 1 << 20,
        help = "Bytes kept in memory before the overflow backend moves to disk"
    )]
    overflow_bytes: u64,

    #[arg(long, value_name = "FILE", help = "TOML file with [btree] and [cache] tables")]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 0x5EED, help = "Seed for key shuffles and lookups")]
    seed: u64,

    #[arg(long, default_value_t = 10_000, help = "Lookups per query phase")]
    lookups: usize,

    #[arg(long, help = "Walk the finished tree and check every invariant")]
    verify: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Workload {
    /// Keys in increasing order.
    Sequential,
    /// Every key once, shuffled.
    Random,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Backend {
    Memory,
    File,
    Overflow,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BenchConfig {
    page_size: Option<usize>,
    btree: BTreeOptions,
    cache: CacheOptions,
}

#[derive(Debug, Error)]
enum BenchError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to create scratch directory: {0}")]
    Scratch(std::io::Error),
    #[error(transparent)]
    Store(#[from] StrataError),
    #[error("tree failed verification: {0:?}")]
    Verify(Vec<String>),
}

fn load_config(path: &Path) -> Result<BenchConfig, BenchError> {
    let contents = fs::read_to_string(path).map_err(|source| BenchError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| BenchError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

struct Phase {
    name: &'static str,
    ops: u64,
    time: Duration,
}

impl Phase {
    fn print_header() {
        println!("{:<16} {:>12} {:>14} {:>14}", "PHASE", "OPS", "TIME", "OPS/S");
    }

    fn print(&self) {
        let secs = self.time.as_secs_f64();
        let rate = if secs > 0.0 { self.ops as f64 / secs } else { 0.0 };
        println!(
            "{:<16} {:>12} {:>14} {:>14.0}",
            self.name,
            self.ops,
            format_duration(self.time),
            rate
        );
    }
}

fn format_duration(d: Duration) -> String {
    let micros = d.as_micros();
    if micros < 1_000 {
        format!("{micros} µs")
    } else if micros < 1_000_000 {
        format!("{:.2} ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.2} s", micros as f64 / 1_000_000.0)
    }
}

fn timed<F>(name: &'static str, ops: u64, f: F) -> Result<Phase, BenchError>
where
    F: FnOnce() -> Result<(), BenchError>,
{
    let start = Instant::now();
    f()?;
    Ok(Phase {
        name,
        ops,
        time: start.elapsed(),
    })
}

/// Keeps the scratch directory of file-backed stores alive for the run.
struct Store {
    _scratch: Option<tempfile::TempDir>,
    pages: Arc<dyn PageStorage>,
}

fn open_store(cli: &Cli, page_size: usize) -> Result<Store, BenchError> {
    let scratch = || tempfile::tempdir().map_err(BenchError::Scratch);
    Ok(match cli.backend {
        Backend::Memory => Store {
            _scratch: None,
            pages: Arc::new(MemoryPageStorage::new(page_size)),
        },
        Backend::File => {
            let dir = scratch()?;
            let file = FilePageStorage::open(dir.path().join("bench.strata"), page_size)?;
            Store {
                _scratch: Some(dir),
                pages: Arc::new(file),
            }
        }
        Backend::Overflow => {
            let dir = scratch()?;
            let file = FilePageStorage::open(dir.path().join("overflow.strata"), page_size)?;
            let overflow = OverflowPageStorage::new(
                Arc::new(MemoryPageStorage::new(page_size)),
                Arc::new(file),
                cli.overflow_bytes,
            )?;
            Store {
                _scratch: Some(dir),
                pages: Arc::new(overflow),
            }
        }
    })
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), BenchError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BenchConfig::default(),
    };
    if let Some(pages) = cli.cache_pages {
        config.cache.cache_pages = pages;
    }
    let page_size = cli.page_size.or(config.page_size).unwrap_or(DEFAULT_PAGE_SIZE);
    info!(
        workload = ?cli.workload,
        backend = ?cli.backend,
        count = cli.count,
        page_size,
        cache_pages = config.cache.cache_pages,
        fast_append = config.btree.fast_append,
        "starting run"
    );

    let store = open_store(&cli, page_size)?;
    let cache = CachingPageStorage::new(Arc::clone(&store.pages), config.cache.clone());
    let mut tree = BTree::<u64, u64, ValueSum>::new(cache.clone(), config.btree.clone(), Some(ValueSum))?;

    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    let mut keys: Vec<u64> = (0..cli.count).collect();
    if matches!(cli.workload, Workload::Random) {
        keys.shuffle(&mut rng);
    }

    let mut phases = Vec::new();
    phases.push(timed("insert", cli.count, || {
        for key in &keys {
            tree.insert(key, &(key % 1_000))?;
        }
        Ok(())
    })?);
    phases.push(timed("sync", 1, || Ok(tree.sync()?))?);

    let lookups: Vec<u64> = (0..cli.lookups)
        .map(|_| rng.gen_range(0..cli.count.max(1) * 2))
        .collect();
    phases.push(timed("get", lookups.len() as u64, || {
        for key in &lookups {
            std::hint::black_box(tree.get(key)?);
        }
        Ok(())
    })?);
    phases.push(timed("floor/ceiling", lookups.len() as u64, || {
        for key in &lookups {
            std::hint::black_box(tree.get_floor(key)?);
            std::hint::black_box(tree.get_ceiling(key)?);
        }
        Ok(())
    })?);
    phases.push(timed("entry_at", lookups.len() as u64, || {
        let len = tree.len().max(1);
        for key in &lookups {
            std::hint::black_box(tree.entry_at(*key as usize % len)?);
        }
        Ok(())
    })?);
    phases.push(timed("range sum", lookups.len() as u64, || {
        for key in &lookups {
            std::hint::black_box(tree.summarize_range(*key / 2..=*key)?);
        }
        Ok(())
    })?);

    Phase::print_header();
    for phase in &phases {
        phase.print();
    }

    let stats = tree.stats_snapshot();
    println!(
        "\nfast-path inserts {} | slow-path inserts {} | leaf splits {} | interior splits {} | even {} | uneven {}",
        stats.fast_path_inserts,
        stats.slow_path_inserts,
        stats.leaf_splits,
        stats.interior_splits,
        stats.even_splits,
        stats.uneven_splits
    );
    println!(
        "pages {} | resident {} of {}",
        cache.num_pages(),
        cache.resident_pages(),
        cache.cache_size()
    );
    tree.emit_stats();

    if cli.verify {
        let report = tree.verify()?;
        if !report.is_ok() {
            return Err(BenchError::Verify(report.findings));
        }
        println!(
            "verified {} entries over {} leaves and {} interior pages, depth {}",
            report.entries, report.leaf_pages, report.interior_pages, report.depth
        );
    }
    Ok(())
}
