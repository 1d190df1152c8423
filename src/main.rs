//! Tile Cache Workload Driver
//!
//! Runs a synthetic multi-threaded tile workload against a [`TileCache`] and
//! reports what the cache did.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         tilecache CLI                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Workers    │───▶│  TileCache   │───▶│  Observers   │       │
//! │  │ (get / add)  │    │              │    │  (channel)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │                             │                                    │
//! │                      Stats / Prometheus                          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tilecache::cache::{ChannelObserver, PrometheusExporter};
use tilecache::{
    IndexStrategy, OwnerRef, Raster, RasterImage, Result, SampleType, TileCache, TileCacheConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tilecache - drive a synthetic tile workload through the cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; flags below override its values
    #[arg(long, env = "TILECACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache capacity in bytes
    #[arg(long, env = "TILECACHE_CAPACITY")]
    capacity: Option<i64>,

    /// Fraction of capacity the cache is kept under
    #[arg(long, env = "TILECACHE_THRESHOLD")]
    threshold: Option<f64>,

    /// Number of store shards
    #[arg(long, env = "TILECACHE_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Fraction of the budget an eviction pass drains down to
    #[arg(long, env = "TILECACHE_EVICTION_WATERMARK")]
    eviction_watermark: Option<f64>,

    /// Enable diagnostics (observer notifications, hit/miss counts)
    #[arg(long, env = "TILECACHE_DIAGNOSTICS")]
    diagnostics: bool,

    /// Per-image bulk operation strategy
    #[arg(long, value_enum, env = "TILECACHE_STRATEGY")]
    strategy: Option<IndexStrategy>,

    /// Number of images in the workload
    #[arg(long, default_value = "4")]
    images: usize,

    /// Image width and height in pixels
    #[arg(long, default_value = "4096")]
    image_size: u32,

    /// Tile width and height in pixels
    #[arg(long, default_value = "256")]
    tile_size: u32,

    /// Worker threads
    #[arg(long, default_value = "8")]
    threads: usize,

    /// Tile requests per worker
    #[arg(long, default_value = "10000")]
    requests: usize,

    /// Random seed for the request pattern
    #[arg(long, env = "TILECACHE_SEED")]
    seed: Option<u64>,

    /// Print the Prometheus text exposition on stdout when done
    #[arg(long)]
    metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

fn main() {
    let args = Args::parse();

    init_logging(&args);

    if let Err(e) = run(args) {
        error!("Workload failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(&args)?;

    info!("Starting tile cache workload");
    info!("  Capacity: {} bytes", config.capacity);
    info!("  Threshold: {}", config.threshold);
    info!("  Concurrency level: {}", config.concurrency_level);
    info!("  Eviction watermark: {}", config.eviction_watermark);
    info!("  Strategy: {:?}", config.strategy);
    info!("  Diagnostics: {}", config.diagnostics);

    let cache: Arc<TileCache> = Arc::new(TileCache::new(config)?);

    let observer = if cache.is_diagnostics_enabled() {
        let (observer, receiver) = ChannelObserver::unbounded();
        let observer = Arc::new(observer);
        let id = cache.subscribe(observer.clone());
        Some((id, observer, receiver))
    } else {
        None
    };

    let images: Vec<OwnerRef> = (0..args.images.max(1))
        .map(|_| {
            Arc::new(RasterImage::new(
                args.image_size,
                args.image_size,
                args.tile_size,
                args.tile_size,
            )) as OwnerRef
        })
        .collect();

    let seed = args.seed.unwrap_or_else(|| rand::rng().random());
    info!(seed, threads = args.threads, requests = args.requests, "Running workload");

    let started = Instant::now();
    let handles: Vec<_> = (0..args.threads.max(1))
        .map(|worker| {
            let cache = Arc::clone(&cache);
            let images = images.clone();
            let requests = args.requests;
            let tile_size = args.tile_size;
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
                run_worker(&cache, &images, &mut rng, requests, tile_size)
            })
        })
        .collect();

    let mut computed = 0u64;
    for handle in handles {
        match handle.join() {
            Ok(count) => computed += count,
            Err(_) => error!("Worker thread panicked"),
        }
    }
    let elapsed = started.elapsed();

    let stats = cache.stats();
    let total_requests = (args.threads.max(1) * args.requests) as f64;
    info!(
        tiles = stats.tile_count,
        memory_used = stats.memory_used,
        budget = stats.budget,
        eviction_passes = stats.eviction_passes,
        computed,
        evictions = stats.metrics.evictions,
        hits = stats.metrics.hits,
        misses = stats.metrics.misses,
        hit_ratio = stats.metrics.hit_ratio,
        elapsed_ms = elapsed.as_millis() as u64,
        requests_per_sec = total_requests / elapsed.as_secs_f64().max(f64::EPSILON),
        "Workload complete"
    );

    if let Some((id, observer, receiver)) = observer {
        cache.unsubscribe(id);
        let mut tally: BTreeMap<&'static str, u64> = BTreeMap::new();
        for notification in receiver.try_iter() {
            *tally.entry(notification.action.as_str()).or_default() += 1;
        }
        for (action, count) in &tally {
            info!(action, count, "Diagnostics tally");
        }
        if observer.dropped() > 0 {
            info!(dropped = observer.dropped(), "Notifications dropped");
        }
    }

    if args.metrics {
        let exporter = PrometheusExporter::new("tilecache")?;
        exporter.update(&stats);
        print!("{}", exporter.export_text()?);
    }

    Ok(())
}

/// Resolve the configuration: file first, then explicit flags
fn load_config(args: &Args) -> Result<TileCacheConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            TileCacheConfig::from_file(path)?
        }
        None => TileCacheConfig::default(),
    };

    if let Some(capacity) = args.capacity {
        config.capacity = tilecache::cache::validate_capacity(capacity)?;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(level) = args.concurrency {
        config.concurrency_level = level;
    }
    if let Some(watermark) = args.eviction_watermark {
        config.eviction_watermark = watermark;
    }
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if args.diagnostics {
        config.diagnostics = true;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// Workload
// =============================================================================

/// Request random tiles, computing and adding every miss
///
/// Returns the number of tiles computed.
fn run_worker(
    cache: &TileCache,
    images: &[OwnerRef],
    rng: &mut StdRng,
    requests: usize,
    tile_size: u32,
) -> u64 {
    let mut computed = 0;
    for _ in 0..requests {
        let image = &images[rng.random_range(0..images.len())];
        let grid = image.tile_grid();
        let x = grid.min_tile_x + rng.random_range(0..grid.num_tiles_x.max(1)) as i32;
        let y = grid.min_tile_y + rng.random_range(0..grid.num_tiles_y.max(1)) as i32;

        if cache.get(image, x, y).is_none() {
            let tile = Raster::zeroed(SampleType::U8, tile_size, tile_size, 3);
            cache.add(image, x, y, Some(Arc::new(tile)), Some(tile_size as u64));
            computed += 1;
        }
    }
    computed
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
