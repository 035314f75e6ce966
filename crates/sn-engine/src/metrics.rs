//! Adapter metrics: sliding-window latency and success/failure counters, keyed
//! by adapter name, with basic percentile reporting.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct MetricSample {
    timestamp: Instant,
    duration_ms: u64,
    success: bool,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub max_samples: usize,
    pub window: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_samples: 5000,
            window: Duration::from_secs(300),
        }
    }
}

struct AdapterCounters {
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    samples: RwLock<Vec<MetricSample>>,
}

impl AdapterCounters {
    fn new() -> Self {
        Self {
            total_sent: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            samples: RwLock::new(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AdapterMetricsSnapshot {
    pub total_sent: u64,
    pub total_failed: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Per-adapter latency/outcome collector, keyed by adapter name.
pub struct AdapterMetricsCollector {
    config: MetricsConfig,
    adapters: DashMap<String, AdapterCounters>,
}

impl AdapterMetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            adapters: DashMap::new(),
        }
    }

    pub fn record(&self, adapter: &str, duration: Duration, success: bool) {
        let counters = self
            .adapters
            .entry(adapter.to_string())
            .or_insert_with(AdapterCounters::new);

        if success {
            counters.total_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.total_failed.fetch_add(1, Ordering::Relaxed);
        }

        let mut samples = counters.samples.write();
        samples.push(MetricSample {
            timestamp: Instant::now(),
            duration_ms: duration.as_millis() as u64,
            success,
        });
        if samples.len() > self.config.max_samples {
            let excess = samples.len() - self.config.max_samples;
            samples.drain(0..excess);
        }
        let cutoff = Instant::now() - self.config.window;
        samples.retain(|s| s.timestamp > cutoff);
    }

    pub fn snapshot(&self, adapter: &str) -> Option<AdapterMetricsSnapshot> {
        let counters = self.adapters.get(adapter)?;
        let samples = counters.samples.read();
        let mut durations: Vec<u64> = samples.iter().map(|s| s.duration_ms).collect();
        durations.sort_unstable();

        Some(AdapterMetricsSnapshot {
            total_sent: counters.total_sent.load(Ordering::Relaxed),
            total_failed: counters.total_failed.load(Ordering::Relaxed),
            p50_ms: percentile(&durations, 0.50),
            p95_ms: percentile(&durations, 0.95),
            p99_ms: percentile(&durations, 0.99),
        })
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
