//! Windowed batching/digest engine (C2): groups batchable notifications by
//! (recipient, group key) and flushes either when the window elapses or the
//! group hits its max size, whichever comes first.
//!
//! Open groups are held in memory and flushed off a periodic sweep rather
//! than per-item timers.

use dashmap::DashMap;
use sn_common::{Notification, NotificationType};
use std::time::{Duration, Instant};
use uuid::Uuid;

type GroupKey = (String, NotificationType, String);

struct BatchGroup {
    members: Vec<Notification>,
    opened_at: Instant,
    window: Duration,
    max_size: usize,
}

/// Outcome of adding a notification to its batch group.
pub enum AddOutcome {
    /// Held open, waiting for more members or the window to elapse.
    Held,
    /// The group just hit its size cap; here are all its members to flush now.
    FlushNow(Vec<Notification>),
}

pub struct BatchEngine {
    groups: DashMap<GroupKey, BatchGroup>,
}

impl BatchEngine {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    /// Adds `notification` to the group for `(recipient_id, type, group_key)`,
    /// opening a new group if none exists yet. Keyed on type as well as
    /// recipient/group-key per §4.7 — two distinct notification types that
    /// happen to share a group key (e.g. a like and a comment on the same
    /// post) never collapse into the same digest.
    pub fn add(
        &self,
        recipient_id: &str,
        notification_type: NotificationType,
        group_key: &str,
        notification: Notification,
        window: Duration,
        max_size: usize,
    ) -> AddOutcome {
        let key = (recipient_id.to_string(), notification_type, group_key.to_string());
        let mut entry = self.groups.entry(key.clone()).or_insert_with(|| BatchGroup {
            members: Vec::new(),
            opened_at: Instant::now(),
            window,
            max_size,
        });

        entry.members.push(notification);

        if entry.members.len() >= entry.max_size {
            let members = std::mem::take(&mut entry.members);
            drop(entry);
            self.groups.remove(&key);
            return AddOutcome::FlushNow(members);
        }

        AddOutcome::Held
    }

    /// Removes and returns every group whose window has elapsed, for the
    /// periodic batch-expiry task to flush as digests.
    pub fn drain_expired(&self) -> Vec<(GroupKey, Vec<Notification>)> {
        let expired_keys: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|e| e.opened_at.elapsed() >= e.window)
            .map(|e| e.key().clone())
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|key| self.groups.remove(&key).map(|(_, group)| (key, group.members)))
            .collect()
    }

    pub fn open_group_count(&self) -> usize {
        self.groups.len()
    }
}

impl Default for BatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Generates a stable batch id to stamp on every member of a flushed group.
pub fn new_batch_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sn_common::{ChannelMask, ContentRefs, DeliveryStatus, NotificationType, Priority};
    use chrono::Utc;

    fn sample(id: &str) -> Notification {
        let now = Utc::now();
        Notification {
            id: id.to_string(),
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
            group_key: Some("post1".to_string()),
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

    #[test]
    fn flushes_immediately_once_max_size_reached() {
        let engine = BatchEngine::new();
        assert!(matches!(
            engine.add("u1", NotificationType::Like, "post1", sample("n1"), Duration::from_secs(300), 2),
            AddOutcome::Held
        ));
        match engine.add("u1", NotificationType::Like, "post1", sample("n2"), Duration::from_secs(300), 2) {
            AddOutcome::FlushNow(members) => assert_eq!(members.len(), 2),
            AddOutcome::Held => panic!("expected flush at max size"),
        }
    }

    #[test]
    fn expired_window_is_drained() {
        let engine = BatchEngine::new();
        engine.add("u1", NotificationType::Like, "post1", sample("n1"), Duration::from_millis(0), 10);
        std::thread::sleep(Duration::from_millis(5));
        let drained = engine.drain_expired();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.len(), 1);
    }

    #[test]
    fn unexpired_group_stays_open() {
        let engine = BatchEngine::new();
        engine.add("u1", NotificationType::Like, "post1", sample("n1"), Duration::from_secs(300), 10);
        assert_eq!(engine.drain_expired().len(), 0);
        assert_eq!(engine.open_group_count(), 1);
    }

    #[test]
    fn distinct_types_sharing_a_group_key_do_not_share_a_batch() {
        let engine = BatchEngine::new();
        engine.add("u1", NotificationType::Like, "post1", sample("n1"), Duration::from_secs(300), 10);
        engine.add("u1", NotificationType::Comment, "post1", sample("n2"), Duration::from_secs(300), 10);
        assert_eq!(engine.open_group_count(), 2);
    }
}
