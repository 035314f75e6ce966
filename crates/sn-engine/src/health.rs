//! System health monitoring with rolling windows, reporting per-adapter success
//! rates, one rolling counter per adapter.

use sn_common::HealthStatus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::RwLock;

use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone)]
pub struct HealthServiceConfig {
    pub healthy_threshold: f64,
    pub warning_threshold: f64,
    pub rolling_window: Duration,
}

impl Default for HealthServiceConfig {
    fn default() -> Self {
        Self {
            healthy_threshold: 0.90,
            warning_threshold: 0.70,
            rolling_window: Duration::from_secs(30 * 60),
        }
    }
}

struct RollingCounter {
    window: Duration,
    events: RwLock<Vec<(Instant, bool)>>,
}

impl RollingCounter {
    fn new(window: Duration) -> Self {
        Self {
            window,
            events: RwLock::new(Vec::new()),
        }
    }

    fn record(&self, success: bool) {
        let mut events = self.events.write();
        events.push((Instant::now(), success));
        let cutoff = Instant::now() - self.window;
        events.retain(|(t, _)| *t > cutoff);
    }

    fn success_rate(&self) -> Option<f64> {
        let events = self.events.read();
        let cutoff = Instant::now() - self.window;
        let recent: Vec<_> = events.iter().filter(|(t, _)| *t > cutoff).collect();
        if recent.is_empty() {
            return None;
        }
        let successes = recent.iter().filter(|(_, s)| *s).count();
        Some(successes as f64 / recent.len() as f64)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub adapters: HashMap<String, f64>,
    pub active_connections: usize,
    pub issues: Vec<String>,
}

pub struct HealthService {
    config: HealthServiceConfig,
    adapter_counters: RwLock<HashMap<String, RollingCounter>>,
    registry: Arc<ConnectionRegistry>,
}

impl HealthService {
    pub fn new(config: HealthServiceConfig, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            config,
            adapter_counters: RwLock::new(HashMap::new()),
            registry,
        }
    }

    pub fn record_adapter_result(&self, adapter: &str, success: bool) {
        let mut counters = self.adapter_counters.write();
        let counter = counters
            .entry(adapter.to_string())
            .or_insert_with(|| RollingCounter::new(self.config.rolling_window));
        counter.record(success);
    }

    pub fn adapter_success_rate(&self, adapter: &str) -> Option<f64> {
        self.adapter_counters.read().get(adapter).and_then(|c| c.success_rate())
    }

    pub fn report(&self) -> HealthReport {
        let counters = self.adapter_counters.read();
        let mut issues = Vec::new();
        let mut adapters = HashMap::new();
        let mut any_unhealthy = false;
        let mut any_degraded = false;

        for (name, counter) in counters.iter() {
            if let Some(rate) = counter.success_rate() {
                adapters.insert(name.clone(), rate);
                if rate < self.config.warning_threshold {
                    any_degraded = true;
                    issues.push(format!("adapter {name} success rate {:.1}%", rate * 100.0));
                } else if rate < self.config.healthy_threshold {
                    any_unhealthy = true;
                    issues.push(format!("adapter {name} success rate {:.1}%", rate * 100.0));
                }
            }
        }

        let status = if any_degraded {
            HealthStatus::Degraded
        } else if any_unhealthy {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            adapters,
            active_connections: self.registry.connection_count(),
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_successes_report_healthy() {
        let service = HealthService::new(HealthServiceConfig::default(), Arc::new(ConnectionRegistry::new()));
        for _ in 0..10 {
            service.record_adapter_result("email", true);
        }
        assert_eq!(service.report().status, HealthStatus::Healthy);
    }

    #[test]
    fn mostly_failures_report_degraded() {
        let service = HealthService::new(HealthServiceConfig::default(), Arc::new(ConnectionRegistry::new()));
        for _ in 0..10 {
            service.record_adapter_result("push", false);
        }
        assert_eq!(service.report().status, HealthStatus::Degraded);
    }
}
