//! Socket (in-app) channel adapter: fans a rendered payload out to whichever
//! live connections the recipient currently has open, via the connection registry.

use async_trait::async_trait;
use std::sync::Arc;

use crate::adapters::{AdapterOutcome, ChannelAdapter};
use crate::registry::ConnectionRegistry;
use sn_common::{DeliveryChannel, Notification, RenderedMessage};

pub struct SocketAdapter {
    registry: Arc<ConnectionRegistry>,
}

impl SocketAdapter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ChannelAdapter for SocketAdapter {
    fn channel(&self) -> DeliveryChannel {
        DeliveryChannel::InApp
    }

    async fn send(&self, notification: &Notification, rendered: &RenderedMessage) -> AdapterOutcome {
        let delivered = self.registry.send_to_user(
            &notification.recipient_id,
            notification.notification_type,
            rendered.socket_payload.clone(),
        );

        if delivered > 0 {
            AdapterOutcome::Delivered
        } else {
            // No open socket right now isn't a failure worth retrying on its own
            // schedule; the in-app item still lands for the user on next page load
            // via the read-path API, so treat it as permanent-for-this-attempt.
            AdapterOutcome::Permanent("recipient has no open connection".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sn_common::{ChannelMask, ContentRefs, DeliveryStatus, NotificationType, Priority};
    use chrono::Utc;

    fn sample() -> Notification {
        let now = Utc::now();
        Notification {
            id: "n1".to_string(),
            recipient_id: "u1".to_string(),
            sender_id: "s1".to_string(),
            notification_type: NotificationType::Like,
            title: "t".to_string(),
            body: "b".to_string(),
            action_link: None,
            content_refs: ContentRefs::default(),
            channel_mask: ChannelMask::ALL,
            priority: Priority::Normal,
            created_at: now,
            scheduled_at: now,
            expires_at: now + chrono::Duration::hours(24),
            status: DeliveryStatus::Pending,
            delivered_at: None,
            read_at: None,
            attempts: 0,
            failure_reason: None,
            next_attempt_at: None,
            group_key: None,
            batch_id: None,
            is_batched: false,
            digest_member_ids: vec![],
            template_vars: Default::default(),
            template_id: None,
            tracking_id: "tr".to_string(),
            allow_bundling: true,
            respect_quiet_hours: true,
        }
    }

    #[tokio::test]
    async fn delivers_when_recipient_connected() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = registry.accept().unwrap();
        registry.authenticate(conn.id, "u1".to_string(), Default::default());
        let adapter = SocketAdapter::new(registry);

        let rendered = crate::rendering::render_single(&sample());
        let outcome = adapter.send(&sample(), &rendered).await;
        assert_eq!(outcome, AdapterOutcome::Delivered);
    }

    #[tokio::test]
    async fn permanent_failure_when_recipient_not_connected() {
        let registry = Arc::new(ConnectionRegistry::new());
        let adapter = SocketAdapter::new(registry);

        let rendered = crate::rendering::render_single(&sample());
        let outcome = adapter.send(&sample(), &rendered).await;
        assert!(matches!(outcome, AdapterOutcome::Permanent(_)));
    }
}
