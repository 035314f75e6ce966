//! Notification delivery engine — HTTP entry point.
//!
//! Wires the admission pipeline, the three channel adapters, the connection
//! registry, and the background lifecycle tasks, then serves the HTTP API
//! (ingest, read paths, preferences, devices, websocket upgrade, health,
//! stats) until told to shut down.
//!
//! Set `NOTIFICATION_DEV_MODE=true` (or `dev_mode = true` in config) to run
//! with the embedded in-memory repository and a dev-only token validator —
//! the default and only mode this binary currently supports, since a durable
//! backend and a real token validator are both out of scope for now.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sn_config::{AppConfig, ConfigLoader};
use sn_engine::adapters::ChannelAdapter;
use sn_engine::api::{router, AppState};
use sn_engine::registry::{CloseReason, ConnectionRegistry, ConnectionRegistryConfig, IdentityTokenValidator};
use sn_engine::{
    AdapterMetricsCollector, BatchEngine, DedupSet, EmailAdapter, HealthService, HealthServiceConfig,
    LifecycleConfig, LifecycleManager, Processor, ProcessorConfig, PushAdapter, RateLimiter, RuleTable,
    SocketAdapter,
};
use sn_repository::InMemoryRepository;
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    sn_common::logging::init_logging("sn-server");

    info!("starting notification delivery engine");

    let config = ConfigLoader::new().load()?;

    if config.repository.backend != "embedded" {
        warn!(
            backend = %config.repository.backend,
            "only the embedded repository backend is implemented; falling back to it"
        );
    }
    if !config.dev_mode {
        warn!("dev_mode is off but no production token validator is wired yet; socket auth accepts any non-empty token");
    }

    let repository = InMemoryRepository::new();
    let rules = Arc::new(RuleTable::new());
    let rate_limiter = Arc::new(RateLimiter::new());
    let dedup = Arc::new(DedupSet::new());
    let batches = Arc::new(BatchEngine::new());

    let connection_registry = Arc::new(ConnectionRegistry::with_config(ConnectionRegistryConfig {
        max_connections: config.socket.max_connections,
        idle_threshold: Duration::from_secs(config.socket.idle_threshold_secs),
        expiry_threshold: Duration::from_secs(config.socket.expiry_threshold_secs),
        send_queue_capacity: config.socket.per_connection_send_queue,
    }));

    let metrics = Arc::new(AdapterMetricsCollector::new(Default::default()));
    let health = Arc::new(HealthService::new(HealthServiceConfig::default(), connection_registry.clone()));

    let adapters = build_adapters(&config, repository.clone(), connection_registry.clone());

    let processor_config = ProcessorConfig {
        worker_count: config.processor.worker_count,
        queue_capacity: config.processor.queue_capacity,
        retry_max_attempts: config.processor.retry_max_attempts,
        retry_base_backoff: Duration::from_millis(config.processor.retry_base_backoff_ms),
    };

    let processor = Processor::new(
        processor_config,
        repository.clone(),
        rules,
        rate_limiter,
        dedup,
        batches,
        adapters,
        metrics.clone(),
        health.clone(),
    );
    processor.spawn_workers();

    let lifecycle = LifecycleManager::start(
        processor.clone(),
        connection_registry.clone(),
        health.clone(),
        LifecycleConfig {
            scheduled_sweep_interval: Duration::from_secs(config.processor.scheduled_release_interval_secs),
            batch_sweep_interval: Duration::from_secs(config.processor.batch_check_interval_secs),
            connection_ping_interval: Duration::from_secs(config.socket.ping_interval_secs),
            connection_cleanup_interval: Duration::from_secs(config.socket.cleanup_interval_secs),
            dedup_default_ttl_secs: config.dedup.default_ttl_secs,
            ..LifecycleConfig::default()
        },
    );

    let state = AppState {
        processor: processor.clone(),
        repository: repository.clone(),
        registry: connection_registry.clone(),
        health,
        metrics,
        token_validator: Arc::new(IdentityTokenValidator),
    };

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "http api listening");

    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "http server exited with an error");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received, draining");

    processor.shutdown();
    lifecycle.shutdown();

    let drain_deadline = Duration::from_secs(config.processor.drain_deadline_secs);
    if tokio::time::timeout(drain_deadline, server_task).await.is_err() {
        warn!("drain deadline elapsed before http server task finished, aborting in-flight work");
    }

    connection_registry.close_all(CloseReason::ServerShutdown);

    info!("notification delivery engine stopped");
    Ok(())
}

/// Constructs the email/push/socket adapters from config, each with its own
/// circuit breaker and (for email/push) its own send-rate cap.
fn build_adapters(
    config: &AppConfig,
    repository: Arc<dyn sn_repository::Repository>,
    connection_registry: Arc<ConnectionRegistry>,
) -> HashMap<sn_common::DeliveryChannel, Arc<dyn ChannelAdapter>> {
    let mut adapters: HashMap<sn_common::DeliveryChannel, Arc<dyn ChannelAdapter>> = HashMap::new();

    adapters.insert(
        sn_common::DeliveryChannel::Email,
        Arc::new(EmailAdapter::with_caps(
            format!("https://{}:{}/send", config.email.host, config.email.port),
            config.email.password.clone(),
            Duration::from_millis(config.email.send_timeout_ms),
            Some(config.email.per_minute_cap),
            Some(config.email.per_hour_cap),
        )),
    );

    adapters.insert(
        sn_common::DeliveryChannel::Push,
        Arc::new(PushAdapter::with_caps(
            config.push.gateway_url.clone(),
            config.push.gateway_project_id.clone(),
            Duration::from_secs(5),
            repository,
            Some(config.push.per_minute_cap),
            Some(config.push.per_hour_cap),
        )),
    );

    adapters.insert(
        sn_common::DeliveryChannel::InApp,
        Arc::new(SocketAdapter::new(connection_registry)),
    );

    adapters
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
