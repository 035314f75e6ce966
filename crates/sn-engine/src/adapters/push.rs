//! Push channel adapter: HTTP POST to a mobile push gateway (FCM/APNs-style),
//! one request per active device on the recipient's account.

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Serialize;
use sn_repository::Repository;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::adapters::{classify_status, AdapterOutcome, ChannelAdapter};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use sn_common::{DeliveryChannel, Notification, RenderedMessage};

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    #[serde(rename = "projectId")]
    project_id: &'a str,
    #[serde(rename = "deviceToken")]
    device_token: &'a str,
    payload: &'a serde_json::Value,
}

pub struct PushAdapter {
    client: Client,
    gateway_url: String,
    project_id: String,
    circuit_breaker: CircuitBreaker,
    timeout: Duration,
    repository: Arc<dyn Repository>,
    per_minute: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    per_hour: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl PushAdapter {
    pub fn new(
        gateway_url: String,
        project_id: String,
        timeout: Duration,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self::with_caps(gateway_url, project_id, timeout, repository, None, None)
    }

    pub fn with_caps(
        gateway_url: String,
        project_id: String,
        timeout: Duration,
        repository: Arc<dyn Repository>,
        per_minute_cap: Option<u32>,
        per_hour_cap: Option<u32>,
    ) -> Self {
        Self {
            client: Client::new(),
            gateway_url,
            project_id,
            circuit_breaker: CircuitBreaker::new("push", CircuitBreakerConfig::default()),
            timeout,
            repository,
            per_minute: per_minute_cap
                .and_then(NonZeroU32::new)
                .map(|nz| RateLimiter::direct(Quota::per_minute(nz))),
            per_hour: per_hour_cap
                .and_then(NonZeroU32::new)
                .map(|nz| RateLimiter::direct(Quota::per_hour(nz))),
        }
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Push
    }

    async fn send(&self, notification: &Notification, rendered: &RenderedMessage) -> AdapterOutcome {
        if !self.circuit_breaker.allow_request() {
            return AdapterOutcome::Transient("circuit open".to_string());
        }
        if self.per_minute.as_ref().is_some_and(|rl| rl.check().is_err())
            || self.per_hour.as_ref().is_some_and(|rl| rl.check().is_err())
        {
            return AdapterOutcome::Transient("push send rate capped".to_string());
        }

        let devices = match self.repository.list_user_devices(&notification.recipient_id).await {
            Ok(devices) => devices.into_iter().filter(|d| d.active).collect::<Vec<_>>(),
            Err(e) => return AdapterOutcome::Transient(format!("repository lookup failed: {e}")),
        };

        if devices.is_empty() {
            return AdapterOutcome::Permanent("no active devices registered".to_string());
        }

        // One gateway call per device; a single device's 4xx doesn't sink the others,
        // but any transient failure propagates so the notification retries as a whole.
        let mut any_transient = false;
        let mut delivered_any = false;

        for device in &devices {
            let request = PushRequest {
                project_id: &self.project_id,
                device_token: &device.push_token,
                payload: &rendered.push_payload,
            };
            let body = match serde_json::to_string(&request) {
                Ok(b) => b,
                Err(e) => {
                    warn!(notification_id = %notification.id, error = %e, "push payload encode failure");
                    continue;
                }
            };

            let response = self
                .client
                .post(&self.gateway_url)
                .header("content-type", "application/json")
                .timeout(self.timeout)
                .body(body)
                .send()
                .await;

            match response {
                Ok(resp) => match classify_status(resp.status()) {
                    AdapterOutcome::Delivered => delivered_any = true,
                    AdapterOutcome::Transient(_) => any_transient = true,
                    AdapterOutcome::Permanent(reason) => {
                        warn!(notification_id = %notification.id, device_id = %device.device_id, reason, "push gateway rejected device, deactivating");
                        if let Err(e) = self
                            .repository
                            .deactivate_device(&notification.recipient_id, &device.device_id)
                            .await
                        {
                            warn!(device_id = %device.device_id, error = %e, "failed to deactivate rejected device");
                        }
                    }
                },
                Err(e) if e.is_timeout() || e.is_connect() => any_transient = true,
                Err(e) => warn!(notification_id = %notification.id, error = %e, "push gateway request failed"),
            }
        }

        if delivered_any {
            self.circuit_breaker.record_success();
            AdapterOutcome::Delivered
        } else if any_transient {
            self.circuit_breaker.record_failure();
            AdapterOutcome::Transient("all device deliveries failed transiently".to_string())
        } else {
            AdapterOutcome::Permanent("all registered devices rejected delivery".to_string())
        }
    }
}
