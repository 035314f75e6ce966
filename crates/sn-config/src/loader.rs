//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "notification-engine.toml",
    "./config/config.toml",
    "/etc/sonet/notification-engine.toml",
];

/// Configuration loader: file (if found) then environment variable overrides.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("NOTIFICATION_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("NOTIFICATION_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("NOTIFICATION_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("NOTIFICATION_CORS_ORIGINS") {
            config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(val) = env::var("NOTIFICATION_REPOSITORY_BACKEND") {
            config.repository.backend = val;
        }
        if let Ok(val) = env::var("NOTIFICATION_POSTGRES_URL") {
            config.repository.postgres_url = val;
        }

        if let Ok(val) = env::var("NOTIFICATION_WORKER_COUNT") {
            if let Ok(n) = val.parse() {
                config.processor.worker_count = n;
            }
        }
        if let Ok(val) = env::var("NOTIFICATION_QUEUE_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.processor.queue_capacity = n;
            }
        }
        if let Ok(val) = env::var("NOTIFICATION_RETRY_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.processor.retry_max_attempts = n;
            }
        }

        if let Ok(val) = env::var("NOTIFICATION_RATE_LIMIT_HOURLY") {
            if let Ok(n) = val.parse() {
                config.rate_limits.default_hourly_cap = n;
            }
        }
        if let Ok(val) = env::var("NOTIFICATION_RATE_LIMIT_DAILY") {
            if let Ok(n) = val.parse() {
                config.rate_limits.default_daily_cap = n;
            }
        }

        if let Ok(val) = env::var("NOTIFICATION_EMAIL_HOST") {
            config.email.host = val;
        }
        if let Ok(val) = env::var("NOTIFICATION_EMAIL_PORT") {
            if let Ok(p) = val.parse() {
                config.email.port = p;
            }
        }
        if let Ok(val) = env::var("NOTIFICATION_EMAIL_USERNAME") {
            config.email.username = val;
        }
        if let Ok(val) = env::var("NOTIFICATION_EMAIL_PASSWORD") {
            config.email.password = val;
        }

        if let Ok(val) = env::var("NOTIFICATION_PUSH_GATEWAY_URL") {
            config.push.gateway_url = val;
        }
        if let Ok(val) = env::var("NOTIFICATION_PUSH_PROJECT_ID") {
            config.push.gateway_project_id = val;
        }

        if let Ok(val) = env::var("NOTIFICATION_SOCKET_BIND_PORT") {
            if let Ok(p) = val.parse() {
                config.socket.bind_port = p;
            }
        }
        if let Ok(val) = env::var("NOTIFICATION_SOCKET_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.socket.max_connections = n;
            }
        }

        if let Ok(val) = env::var("NOTIFICATION_DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("NOTIFICATION_DEV_MODE") {
            config.dev_mode = val == "true" || val == "1";
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
