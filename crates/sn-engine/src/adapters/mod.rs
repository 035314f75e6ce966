//! Channel adapters (C5): one per `DeliveryChannel`, each owning its own
//! circuit breaker for its downstream gateway.

pub mod email;
pub mod push;
pub mod socket;

use async_trait::async_trait;
use sn_common::{DeliveryChannel, Notification, RenderedMessage};

pub use email::EmailAdapter;
pub use push::PushAdapter;
pub use socket::SocketAdapter;

/// Result of handing a rendered notification to a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterOutcome {
    Delivered,
    /// Worth retrying later: timeout, 5xx, connection refused, circuit open.
    Transient(String),
    /// Not worth retrying: 4xx, unregistered device, rejected recipient.
    Permanent(String),
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> DeliveryChannel;
    async fn send(&self, notification: &Notification, rendered: &RenderedMessage) -> AdapterOutcome;
}

/// Classifies an HTTP response status: 2xx succeeds, 429/5xx/408 are
/// transient, everything else is permanent.
pub fn classify_status(status: reqwest::StatusCode) -> AdapterOutcome {
    if status.is_success() {
        AdapterOutcome::Delivered
    } else if status.as_u16() == 429 || status.as_u16() == 408 || status.is_server_error() {
        AdapterOutcome::Transient(format!("http {status}"))
    } else {
        AdapterOutcome::Permanent(format!("http {status}"))
    }
}
