//! Notification engine configuration
//!
//! TOML-based configuration with environment variable override support, following
//! the same file-then-env layering the rest of the stack uses.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub repository: RepositoryConfig,
    pub processor: ProcessorConfig,
    pub rate_limits: RateLimitConfig,
    pub dedup: DedupConfig,
    pub batching: BatchingConfig,
    pub email: EmailConfig,
    pub push: PushConfig,
    pub socket: SocketConfig,

    /// Data directory for local storage (SQLite file, etc.)
    pub data_dir: String,

    /// Enable development mode: embedded in-memory repository, synthetic adapters.
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            repository: RepositoryConfig::default(),
            processor: ProcessorConfig::default(),
            rate_limits: RateLimitConfig::default(),
            dedup: DedupConfig::default(),
            batching: BatchingConfig::default(),
            email: EmailConfig::default(),
            push: PushConfig::default(),
            socket: SocketConfig::default(),
            data_dir: "./data".to_string(),
            dev_mode: false,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.processor.worker_count == 0 {
            return Err(ConfigError::ValidationError(
                "processor.worker_count must be at least 1".to_string(),
            ));
        }
        if self.processor.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "processor.queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:4200".to_string()],
        }
    }
}

/// Repository backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// "embedded" (in-memory) or "postgres"
    pub backend: String,
    pub postgres_url: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            backend: "embedded".to_string(),
            postgres_url: String::new(),
        }
    }
}

/// Processor core configuration (C8), per the external-interfaces contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub retry_max_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub scheduled_release_interval_secs: u64,
    pub batch_check_interval_secs: u64,
    pub drain_deadline_secs: u64,
    pub adapter_call_deadline_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            queue_capacity: 10_000,
            retry_max_attempts: 5,
            retry_base_backoff_ms: 500,
            scheduled_release_interval_secs: 1,
            batch_check_interval_secs: 5,
            drain_deadline_secs: 30,
            adapter_call_deadline_ms: 5_000,
        }
    }
}

/// Default rate-limit caps (§4.5); per-type rules and per-user preferences may override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub default_hourly_cap: u32,
    pub default_daily_cap: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_hourly_cap: 50,
            default_daily_cap: 500,
        }
    }
}

/// Default dedup TTL (§4.6); per-type rules may override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub default_ttl_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
        }
    }
}

/// Default batching window/size (§4.7); per-type rules may override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub default_window_secs: u64,
    pub default_max_batch_size: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            default_window_secs: 300,
            default_max_batch_size: 10,
        }
    }
}

/// Email adapter configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub username: String,
    pub password: String,
    pub sender_identity: String,
    pub per_minute_cap: u32,
    pub per_hour_cap: u32,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub retry_attempts: u32,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 587,
            tls: true,
            username: String::new(),
            password: String::new(),
            sender_identity: "notifications@sonet.example".to_string(),
            per_minute_cap: 100,
            per_hour_cap: 2000,
            connect_timeout_ms: 5_000,
            send_timeout_ms: 10_000,
            retry_attempts: 3,
        }
    }
}

/// Mobile/web push adapter configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub gateway_url: String,
    pub gateway_project_id: String,
    pub credentials_path: String,
    pub ios_credentials_path: String,
    pub batch_size: usize,
    pub per_minute_cap: u32,
    pub per_hour_cap: u32,
    pub token_expiry_days: i64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            gateway_url: String::new(),
            gateway_project_id: String::new(),
            credentials_path: String::new(),
            ios_credentials_path: String::new(),
            batch_size: 500,
            per_minute_cap: 1000,
            per_hour_cap: 20_000,
            token_expiry_days: 270,
        }
    }
}

/// Real-time socket adapter / connection registry configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub max_connections: usize,
    pub ping_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub idle_threshold_secs: u64,
    pub expiry_threshold_secs: u64,
    pub max_frame_bytes: usize,
    pub per_connection_send_queue: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            bind_port: 8081,
            max_connections: 100_000,
            ping_interval_secs: 30,
            cleanup_interval_secs: 60,
            idle_threshold_secs: 120,
            expiry_threshold_secs: 90,
            max_frame_bytes: 64 * 1024,
            per_connection_send_queue: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.processor.worker_count = 0;
        assert!(config.validate().is_err());
    }
}
