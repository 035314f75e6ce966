//! Prometheus-shaped counters/histograms alongside the in-process rolling
//! windows in `metrics.rs` — exported counters/histograms here, the windows
//! `HealthService` actually reads live in `AdapterMetricsCollector`.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub fn record_delivery_attempt(channel: &str, success: bool) {
    counter!(
        "sn_delivery_attempts_total",
        "channel" => channel.to_string(),
        "success" => success.to_string()
    )
    .increment(1);
}

pub fn record_delivery_latency(channel: &str, duration: Duration) {
    histogram!(
        "sn_delivery_duration_seconds",
        "channel" => channel.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_admission_rejection(reason: &str) {
    counter!(
        "sn_admission_rejections_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn set_open_batch_groups(count: u64) {
    gauge!("sn_open_batch_groups").set(count as f64);
}

pub fn set_connected_sockets(count: u64) {
    gauge!("sn_connected_sockets").set(count as f64);
}
