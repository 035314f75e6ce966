//! Notification engine core
//!
//! Provides:
//! - Processor: admission pipeline (preferences, dedup, rate limiting, batching)
//!   plus the delivery worker pool
//! - RuleTable: per-notification-type processing policy
//! - RateLimiter / DedupSet: sliding-window admission control
//! - BatchEngine: windowed batching/digest assembly
//! - Rendering: pure template substitution into per-channel payloads
//! - Adapters: email / push / socket channel delivery, each with its own circuit breaker
//! - ConnectionRegistry: live socket tracking and in-app fanout
//! - HealthService / AdapterMetricsCollector: rolling-window observability
//! - Lifecycle: background sweep tasks and graceful shutdown coordination
//! - API: HTTP surface for ingest, read paths, preferences, devices, websocket upgrade

pub mod adapters;
pub mod api;
pub mod batching;
pub mod circuit_breaker;
pub mod dedup;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod processor;
pub mod prom_metrics;
pub mod rate_limiter;
pub mod registry;
pub mod rendering;
pub mod rules;

pub use adapters::{AdapterOutcome, ChannelAdapter, EmailAdapter, PushAdapter, SocketAdapter};
pub use batching::BatchEngine;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitBreakerStats};
pub use dedup::DedupSet;
pub use error::EngineError;
pub use health::{HealthReport, HealthService, HealthServiceConfig};
pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use metrics::{AdapterMetricsCollector, AdapterMetricsSnapshot, MetricsConfig};
pub use processor::{AdmissionRejection, Processor, ProcessorConfig};
pub use rate_limiter::RateLimiter;
pub use registry::ConnectionRegistry;
pub use rules::RuleTable;

pub type Result<T> = std::result::Result<T, EngineError>;
