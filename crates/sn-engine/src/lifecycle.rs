//! Background tasks: scheduled/retry sweeps, batch-window expiry, dedup and
//! rate-limit cleanup, connection liveness, and periodic health logging.
//!
//! One `tokio::spawn` per concern, each on its own ticker, all listening on a
//! shared broadcast shutdown channel.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::health::HealthService;
use crate::processor::Processor;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub scheduled_sweep_interval: Duration,
    pub retry_sweep_interval: Duration,
    pub batch_sweep_interval: Duration,
    pub dedup_sweep_interval: Duration,
    pub idle_cleanup_interval: Duration,
    pub connection_ping_interval: Duration,
    pub connection_cleanup_interval: Duration,
    pub health_report_interval: Duration,
    pub dedup_default_ttl_secs: u64,
    pub sweep_batch_limit: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            scheduled_sweep_interval: Duration::from_secs(10),
            retry_sweep_interval: Duration::from_secs(15),
            batch_sweep_interval: Duration::from_secs(5),
            dedup_sweep_interval: Duration::from_secs(300),
            idle_cleanup_interval: Duration::from_secs(600),
            connection_ping_interval: Duration::from_secs(30),
            connection_cleanup_interval: Duration::from_secs(60),
            health_report_interval: Duration::from_secs(60),
            dedup_default_ttl_secs: 3600,
            sweep_batch_limit: 500,
        }
    }
}

pub struct LifecycleManager {
    shutdown_tx: broadcast::Sender<()>,
}

impl LifecycleManager {
    /// Starts every background task and returns a handle whose `shutdown()`
    /// stops them all.
    pub fn start(
        processor: Arc<Processor>,
        registry: Arc<ConnectionRegistry>,
        health: Arc<HealthService>,
        config: LifecycleConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        spawn_ticker("scheduled-sweep", shutdown_tx.subscribe(), config.scheduled_sweep_interval, {
            let processor = processor.clone();
            let limit = config.sweep_batch_limit;
            move || {
                let processor = processor.clone();
                async move { processor.sweep_scheduled(limit).await }
            }
        });

        spawn_ticker("retry-sweep", shutdown_tx.subscribe(), config.retry_sweep_interval, {
            let processor = processor.clone();
            let limit = config.sweep_batch_limit;
            move || {
                let processor = processor.clone();
                async move { processor.sweep_retries(limit).await }
            }
        });

        spawn_ticker("batch-sweep", shutdown_tx.subscribe(), config.batch_sweep_interval, {
            let processor = processor.clone();
            move || {
                let processor = processor.clone();
                async move { processor.sweep_batches().await }
            }
        });

        spawn_ticker("dedup-sweep", shutdown_tx.subscribe(), config.dedup_sweep_interval, {
            let processor = processor.clone();
            let ttl = config.dedup_default_ttl_secs;
            move || {
                let processor = processor.clone();
                async move { processor.dedup_sweep(ttl) }
            }
        });

        spawn_ticker("idle-cleanup", shutdown_tx.subscribe(), config.idle_cleanup_interval, {
            let processor = processor.clone();
            move || {
                let processor = processor.clone();
                async move { processor.cleanup_idle_state() }
            }
        });

        spawn_ticker("connection-ping", shutdown_tx.subscribe(), config.connection_ping_interval, {
            let registry = registry.clone();
            move || {
                let registry = registry.clone();
                async move { registry.ping_all() }
            }
        });

        spawn_ticker("connection-cleanup", shutdown_tx.subscribe(), config.connection_cleanup_interval, {
            let registry = registry.clone();
            move || {
                let registry = registry.clone();
                async move {
                    registry.sweep_idle();
                    registry.sweep_expired();
                }
            }
        });

        spawn_ticker("health-report", shutdown_tx.subscribe(), config.health_report_interval, {
            let health = health.clone();
            let processor = processor.clone();
            let registry = registry.clone();
            move || {
                let health = health.clone();
                let processor = processor.clone();
                let registry = registry.clone();
                async move {
                    let report = health.report();
                    if !report.issues.is_empty() {
                        debug!(?report, "health report has open issues");
                    }
                    crate::prom_metrics::set_open_batch_groups(processor.open_batch_group_count() as u64);
                    crate::prom_metrics::set_connected_sockets(registry.connection_count() as u64);
                }
            }
        });

        info!("lifecycle manager started");
        Self { shutdown_tx }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Spawns a `tokio::select!` loop that runs `action` on every tick of
/// `interval` until the shutdown channel fires.
fn spawn_ticker<F, Fut>(
    name: &'static str,
    mut shutdown_rx: broadcast::Receiver<()>,
    interval: Duration,
    mut action: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    action().await;
                }
                _ = shutdown_rx.recv() => {
                    info!(task = name, "lifecycle task shutting down");
                    break;
                }
            }
        }
    });
}
