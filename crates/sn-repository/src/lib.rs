//! Durable-store contract for the notification engine (C1).
//!
//! The processor core only ever talks to this trait; a real deployment backs it
//! with Postgres or similar, but the engine ships an in-memory implementation
//! (`InMemoryRepository`) for development and for the test suite, the same role
//! an embedded queue plays alongside the durable backends in the wider stack.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sn_common::{DeliveryStatus, DeviceRegistration, FailureReason, Notification, Preferences};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Outcome of a compare-and-set status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Updated,
    PreconditionFailed,
}

/// Patch applied by `update_status`; fields left `None` are unchanged.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub attempts: Option<u32>,
    pub failure_reason: Option<FailureReason>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
    pub batch_id: Option<String>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>>;
    async fn upsert_preferences(&self, prefs: Preferences) -> Result<()>;

    async fn create_notification(&self, notification: Notification) -> Result<String>;
    async fn get_notification(&self, id: &str) -> Result<Option<Notification>>;

    /// Compare-and-set status transition. Returns `PreconditionFailed` without
    /// mutating state if the stored status does not equal `expected`.
    async fn update_status(
        &self,
        id: &str,
        expected: DeliveryStatus,
        new: DeliveryStatus,
        update: StatusUpdate,
    ) -> Result<CasOutcome>;

    /// Items whose `scheduled_at <= now` and `status == pending`.
    async fn list_scheduled_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Notification>>;

    /// Items awaiting a retry attempt whose `next_attempt_at <= now`.
    async fn list_pending_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Notification>>;

    /// Most recent notifications for a recipient, newest first.
    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>>;

    async fn register_device(&self, registration: DeviceRegistration) -> Result<()>;
    async fn deactivate_device(&self, user_id: &str, device_id: &str) -> Result<()>;
    async fn list_user_devices(&self, user_id: &str) -> Result<Vec<DeviceRegistration>>;
}

/// In-memory reference implementation. Indices are recomputed on read rather than
/// maintained incrementally — fine for dev/test scale, not for production volume.
#[derive(Default)]
pub struct InMemoryRepository {
    notifications: DashMap<String, Notification>,
    preferences: DashMap<String, Preferences>,
    devices: DashMap<(String, String), DeviceRegistration>,
}

impl InMemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_preferences(&self, user_id: &str) -> Result<Option<Preferences>> {
        Ok(self.preferences.get(user_id).map(|p| p.clone()))
    }

    async fn upsert_preferences(&self, prefs: Preferences) -> Result<()> {
        self.preferences.insert(prefs.user_id.clone(), prefs);
        Ok(())
    }

    async fn create_notification(&self, notification: Notification) -> Result<String> {
        let id = notification.id.clone();
        self.notifications.insert(id.clone(), notification);
        Ok(id)
    }

    async fn get_notification(&self, id: &str) -> Result<Option<Notification>> {
        Ok(self.notifications.get(id).map(|n| n.clone()))
    }

    async fn update_status(
        &self,
        id: &str,
        expected: DeliveryStatus,
        new: DeliveryStatus,
        update: StatusUpdate,
    ) -> Result<CasOutcome> {
        let mut entry = self.notifications.get_mut(id).ok_or(RepositoryError::NotFound)?;

        if entry.status != expected {
            return Ok(CasOutcome::PreconditionFailed);
        }
        if !entry.status.can_transition_to(new) {
            return Ok(CasOutcome::PreconditionFailed);
        }

        entry.status = new;
        if let Some(v) = update.delivered_at {
            entry.delivered_at = Some(v);
        }
        if let Some(v) = update.read_at {
            entry.read_at = Some(v);
        }
        if let Some(v) = update.attempts {
            entry.attempts = entry.attempts.max(v);
        }
        if let Some(v) = update.failure_reason {
            entry.failure_reason = Some(v);
        }
        if let Some(v) = update.next_attempt_at {
            entry.next_attempt_at = v;
        }
        if let Some(v) = update.batch_id {
            entry.batch_id = Some(v);
            entry.is_batched = true;
        }

        Ok(CasOutcome::Updated)
    }

    async fn list_scheduled_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Notification>> {
        // `next_attempt_at` is set by a transient-failure retry (processor.rs) or a
        // quiet-hours deferral, both of which leave `status == Pending` with the
        // original `scheduled_at` untouched. Excluding them here keeps this sweep to
        // items that have never been attempted; `list_pending_retries` is the one
        // gated on `next_attempt_at` elapsing.
        let mut due: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|e| e.status == DeliveryStatus::Pending && e.scheduled_at <= now && e.next_attempt_at.is_none())
            .map(|e| e.clone())
            .collect();
        due.sort_by_key(|n| n.scheduled_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn list_pending_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Notification>> {
        let mut due: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|e| {
                e.status == DeliveryStatus::Pending
                    && e.next_attempt_at.map(|t| t <= now).unwrap_or(false)
            })
            .map(|e| e.clone())
            .collect();
        due.sort_by_key(|n| n.next_attempt_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<Notification>> {
        let mut items: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|e| e.recipient_id == user_id)
            .map(|e| e.clone())
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn register_device(&self, registration: DeviceRegistration) -> Result<()> {
        let key = (registration.user_id.clone(), registration.device_id.clone());
        self.devices.insert(key, registration);
        Ok(())
    }

    async fn deactivate_device(&self, user_id: &str, device_id: &str) -> Result<()> {
        if let Some(mut device) = self.devices.get_mut(&(user_id.to_string(), device_id.to_string())) {
            device.active = false;
        }
        Ok(())
    }

    async fn list_user_devices(&self, user_id: &str) -> Result<Vec<DeviceRegistration>> {
        Ok(self
            .devices
            .iter()
            .filter(|e| e.key().0 == user_id)
            .map(|e| e.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sn_common::{ChannelMask, ContentRefs, NotificationType, Priority};

    fn sample_notification(id: &str, recipient: &str) -> Notification {
        let now = Utc::now();
        Notification {
            id: id.to_string(),
            recipient_id: recipient.to_string(),
            sender_id: "sender".to_string(),
            notification_type: NotificationType::Like,
            title: "title".to_string(),
            body: "body".to_string(),
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
            tracking_id: uuid::Uuid::new_v4().to_string(),
            allow_bundling: true,
            respect_quiet_hours: true,
        }
    }

    #[tokio::test]
    async fn cas_update_rejects_wrong_expected_status() {
        let repo = InMemoryRepository::new();
        let n = sample_notification("n1", "u1");
        repo.create_notification(n).await.unwrap();

        let outcome = repo
            .update_status("n1", DeliveryStatus::Sent, DeliveryStatus::Delivered, StatusUpdate::default())
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::PreconditionFailed);

        let outcome = repo
            .update_status("n1", DeliveryStatus::Pending, DeliveryStatus::Sent, StatusUpdate::default())
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Updated);
    }

    #[tokio::test]
    async fn cas_update_rejects_regression_past_terminal_state() {
        let repo = InMemoryRepository::new();
        let n = sample_notification("n2", "u1");
        repo.create_notification(n).await.unwrap();

        repo.update_status("n2", DeliveryStatus::Pending, DeliveryStatus::Failed, StatusUpdate::default())
            .await
            .unwrap();

        let outcome = repo
            .update_status("n2", DeliveryStatus::Failed, DeliveryStatus::Sent, StatusUpdate::default())
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::PreconditionFailed);
    }

    #[tokio::test]
    async fn list_for_user_orders_newest_first() {
        let repo = InMemoryRepository::new();
        let mut first = sample_notification("n1", "u1");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        let second = sample_notification("n2", "u1");

        repo.create_notification(first).await.unwrap();
        repo.create_notification(second).await.unwrap();

        let listed = repo.list_for_user("u1", 10).await.unwrap();
        assert_eq!(listed[0].id, "n2");
        assert_eq!(listed[1].id, "n1");
    }

    #[tokio::test]
    async fn list_scheduled_due_excludes_items_awaiting_retry_or_deferral() {
        let repo = InMemoryRepository::new();
        let mut never_attempted = sample_notification("n1", "u1");
        never_attempted.scheduled_at = Utc::now() - chrono::Duration::seconds(5);
        let mut awaiting_retry = sample_notification("n2", "u1");
        awaiting_retry.scheduled_at = Utc::now() - chrono::Duration::seconds(5);
        awaiting_retry.next_attempt_at = Some(Utc::now() + chrono::Duration::seconds(30));

        repo.create_notification(never_attempted).await.unwrap();
        repo.create_notification(awaiting_retry).await.unwrap();

        let due = repo.list_scheduled_due(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "n1");
    }

    #[tokio::test]
    async fn deactivated_device_excluded_by_active_flag() {
        let repo = InMemoryRepository::new();
        repo.register_device(DeviceRegistration {
            user_id: "u1".to_string(),
            device_id: "d1".to_string(),
            push_token: "tok".to_string(),
            platform: sn_common::Platform::Ios,
            token_updated_at: Utc::now(),
            active: true,
        })
        .await
        .unwrap();

        repo.deactivate_device("u1", "d1").await.unwrap();

        let devices = repo.list_user_devices("u1").await.unwrap();
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].active);
    }
}
