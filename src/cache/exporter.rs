//! Prometheus Exporter
//!
//! Publishes [`TileCacheStats`] as Prometheus gauges in the text exposition
//! format. Each exporter owns its registry, so several caches in one process
//! never collide on metric names.

use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use super::tile_cache::TileCacheStats;
use crate::error::{Error, Result};

/// Prometheus view of a tile cache
pub struct PrometheusExporter {
    registry: Registry,
    tiles: IntGauge,
    memory_used: IntGauge,
    capacity: IntGauge,
    budget: IntGauge,
    threshold: Gauge,
    hit_ratio: Gauge,
    operations: IntGaugeVec,
}

impl PrometheusExporter {
    /// Create an exporter whose metric names start with `namespace`
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();

        let tiles = IntGauge::with_opts(
            Opts::new("tiles", "Number of cached tiles").namespace(namespace),
        )?;
        let memory_used = IntGauge::with_opts(
            Opts::new("memory_used_bytes", "Total weight of cached tiles").namespace(namespace),
        )?;
        let capacity = IntGauge::with_opts(
            Opts::new("capacity_bytes", "Configured capacity").namespace(namespace),
        )?;
        let budget = IntGauge::with_opts(
            Opts::new("budget_bytes", "Weight the cache is kept under").namespace(namespace),
        )?;
        let threshold = Gauge::with_opts(
            Opts::new("threshold_ratio", "Fraction of capacity in use before eviction")
                .namespace(namespace),
        )?;
        let hit_ratio = Gauge::with_opts(
            Opts::new("hit_ratio", "Lookup hit ratio (diagnostics only)").namespace(namespace),
        )?;
        let operations = IntGaugeVec::new(
            Opts::new("operations", "Cache operations since the last reset").namespace(namespace),
            &["kind"],
        )?;

        registry.register(Box::new(tiles.clone()))?;
        registry.register(Box::new(memory_used.clone()))?;
        registry.register(Box::new(capacity.clone()))?;
        registry.register(Box::new(budget.clone()))?;
        registry.register(Box::new(threshold.clone()))?;
        registry.register(Box::new(hit_ratio.clone()))?;
        registry.register(Box::new(operations.clone()))?;

        Ok(Self {
            registry,
            tiles,
            memory_used,
            capacity,
            budget,
            threshold,
            hit_ratio,
            operations,
        })
    }

    /// Copy `stats` into the gauges
    pub fn update(&self, stats: &TileCacheStats) {
        self.tiles.set(saturating_i64(stats.tile_count as u64));
        self.memory_used.set(saturating_i64(stats.memory_used));
        self.capacity.set(saturating_i64(stats.capacity));
        self.budget.set(saturating_i64(stats.budget));
        self.threshold.set(stats.threshold);
        self.hit_ratio.set(stats.metrics.hit_ratio);

        let m = &stats.metrics;
        for (kind, value) in [
            ("hit", m.hits),
            ("miss", m.misses),
            ("addition", m.additions),
            ("substitution", m.substitutions),
            ("removal", m.removals),
            ("eviction", m.evictions),
            ("evicted_bytes", m.evicted_bytes),
            ("eviction_pass", stats.eviction_passes),
            ("flush", m.flushes),
        ] {
            self.operations
                .with_label_values(&[kind])
                .set(saturating_i64(value));
        }
    }

    /// Render the registry in the text exposition format
    pub fn export_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Config(format!("metrics output is not UTF-8: {}", e)))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// =============================================================================
// Tests
// =============================================================================
