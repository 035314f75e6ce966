//! Email channel adapter: HTTP POST to a transactional email gateway, with an
//! HMAC-SHA256 signature over the timestamp and payload.

use async_trait::async_trait;
use chrono::Utc;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Serialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::{classify_status, AdapterOutcome, ChannelAdapter};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use sn_common::{DeliveryChannel, Notification, RenderedMessage};

pub const SIGNATURE_HEADER: &str = "X-SONET-SIGNATURE";
pub const TIMESTAMP_HEADER: &str = "X-SONET-TIMESTAMP";

type HmacSha256 = Hmac<Sha256>;

fn sign(payload: &str, secret: &str) -> (String, String) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
    let signed = format!("{timestamp}{payload}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(signed.as_bytes());
    (hex::encode(mac.finalize().into_bytes()), timestamp)
}

#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    to: &'a str,
    subject: &'a str,
    #[serde(rename = "bodyText")]
    body_text: &'a str,
    #[serde(rename = "bodyHtml")]
    body_html: &'a str,
}

pub struct EmailAdapter {
    client: Client,
    gateway_url: String,
    signing_secret: String,
    circuit_breaker: CircuitBreaker,
    timeout: Duration,
    per_minute: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    per_hour: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl EmailAdapter {
    pub fn new(gateway_url: String, signing_secret: String, timeout: Duration) -> Self {
        Self::with_caps(gateway_url, signing_secret, timeout, None, None)
    }

    /// `per_minute_cap`/`per_hour_cap` of `None` leaves that horizon unbounded.
    pub fn with_caps(
        gateway_url: String,
        signing_secret: String,
        timeout: Duration,
        per_minute_cap: Option<u32>,
        per_hour_cap: Option<u32>,
    ) -> Self {
        Self {
            client: Client::new(),
            gateway_url,
            signing_secret,
            circuit_breaker: CircuitBreaker::new("email", CircuitBreakerConfig::default()),
            timeout,
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

    /// The recipient address to mail to. Email delivery is keyed off a known
    /// address rather than a push token; in this engine that address rides in
    /// on `template_vars["email"]`, populated by the caller at enqueue time.
    fn recipient_address(notification: &Notification) -> Option<&str> {
        notification.template_vars.get("email").map(|s| s.as_str())
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::Email
    }

    async fn send(&self, notification: &Notification, rendered: &RenderedMessage) -> AdapterOutcome {
        let Some(to) = Self::recipient_address(notification) else {
            return AdapterOutcome::Permanent("no email address on file".to_string());
        };

        if !self.circuit_breaker.allow_request() {
            return AdapterOutcome::Transient("circuit open".to_string());
        }
        if self.per_minute.as_ref().is_some_and(|rl| rl.check().is_err())
            || self.per_hour.as_ref().is_some_and(|rl| rl.check().is_err())
        {
            return AdapterOutcome::Transient("email send rate capped".to_string());
        }

        let payload = EmailPayload {
            to,
            subject: &rendered.subject,
            body_text: &rendered.body_text,
            body_html: &rendered.body_html,
        };
        let body = match serde_json::to_string(&payload) {
            Ok(b) => b,
            Err(e) => return AdapterOutcome::Permanent(format!("encode failure: {e}")),
        };
        let (signature, timestamp) = sign(&body, &self.signing_secret);

        let response = self
            .client
            .post(&self.gateway_url)
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, timestamp)
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let outcome = classify_status(resp.status());
                match &outcome {
                    AdapterOutcome::Delivered => self.circuit_breaker.record_success(),
                    AdapterOutcome::Transient(reason) => {
                        self.circuit_breaker.record_failure();
                        warn!(notification_id = %notification.id, reason, "email gateway transient failure");
                    }
                    AdapterOutcome::Permanent(reason) => {
                        debug!(notification_id = %notification.id, reason, "email gateway permanent failure");
                    }
                }
                outcome
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                self.circuit_breaker.record_failure();
                AdapterOutcome::Transient(e.to_string())
            }
            Err(e) => AdapterOutcome::Permanent(e.to_string()),
        }
    }
}
