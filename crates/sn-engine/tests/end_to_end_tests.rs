//! End-to-end scenarios exercising the admission pipeline, batching, and
//! scheduled release against the in-memory repository and the socket adapter.
//! Plain `#[tokio::test]`s with real (short) sleeps rather than a fake clock,
//! since the workspace's `tokio` dependency doesn't enable `test-util`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sn_common::{
    ChannelMask, ContentRefs, DeliveryChannel, DeliveryStatus, Notification, NotificationType,
    Priority, ProcessingRule,
};
use sn_engine::adapters::{ChannelAdapter, SocketAdapter};
use sn_engine::registry::ConnectionRegistry;
use sn_engine::{
    AdapterMetricsCollector, AdmissionRejection, BatchEngine, DedupSet, HealthService,
    HealthServiceConfig, Processor, ProcessorConfig, RateLimiter, RuleTable,
};
use sn_repository::{InMemoryRepository, Repository};

fn notification(recipient: &str, sender: &str, group_key: Option<&str>) -> Notification {
    let now = Utc::now();
    Notification {
        id: String::new(),
        recipient_id: recipient.to_string(),
        sender_id: sender.to_string(),
        notification_type: NotificationType::Like,
        title: "{{actor}} liked your post".to_string(),
        body: "liked".to_string(),
        action_link: None,
        content_refs: ContentRefs {
            content_item_id: Some("post42".to_string()),
            ..Default::default()
        },
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
        group_key: group_key.map(|s| s.to_string()),
        batch_id: None,
        is_batched: false,
        digest_member_ids: vec![],
        template_vars: Default::default(),
        template_id: None,
        tracking_id: String::new(),
        allow_bundling: true,
        respect_quiet_hours: true,
    }
}

/// Builds a processor with a connected socket as the only channel, plus a
/// rule table seeded with a single override for `Like` so each scenario can
/// tune batch/dedup/rate-limit behavior independently. Returns the concrete
/// repository handle too, so tests can assert on persisted state directly.
fn build(rule: ProcessingRule) -> (Arc<Processor>, Arc<ConnectionRegistry>, Arc<InMemoryRepository>) {
    let repository = InMemoryRepository::new();
    let registry = Arc::new(ConnectionRegistry::new());

    let mut adapters: HashMap<DeliveryChannel, Arc<dyn ChannelAdapter>> = HashMap::new();
    adapters.insert(DeliveryChannel::InApp, Arc::new(SocketAdapter::new(registry.clone())));

    let mut rules = RuleTable::new();
    rules.set(rule);

    let processor = Processor::new(
        ProcessorConfig::default(),
        repository.clone(),
        Arc::new(rules),
        Arc::new(RateLimiter::new()),
        Arc::new(DedupSet::new()),
        Arc::new(BatchEngine::new()),
        adapters,
        Arc::new(AdapterMetricsCollector::new(Default::default())),
        Arc::new(HealthService::new(HealthServiceConfig::default(), registry.clone())),
    );
    processor.spawn_workers();
    (processor, registry, repository)
}

fn connect(registry: &ConnectionRegistry, user_id: &str) {
    let (conn, _rx) = registry.accept().unwrap();
    registry.authenticate(conn.id, user_id.to_string(), Default::default());
}

/// Scenario 1: hourly cap of 3 admits the first three and rejects the rest.
#[tokio::test]
async fn rate_limit_admits_up_to_hourly_cap_then_rejects() {
    let mut rule = ProcessingRule::default_for(NotificationType::Like);
    rule.dedup = false;
    rule.batch = false;
    rule.rate_limit = true;
    rule.hourly_cap = 3;
    rule.daily_cap = 500;
    let (processor, registry, _repository) = build(rule);
    connect(&registry, "u1");

    let mut outcomes = Vec::new();
    for i in 0..5 {
        outcomes.push(processor.ingest(notification("u1", &format!("s{i}"), None)).await);
    }

    assert!(outcomes[0].is_ok());
    assert!(outcomes[1].is_ok());
    assert!(outcomes[2].is_ok());
    assert_eq!(outcomes[3], Err(AdmissionRejection::RateLimited));
    assert_eq!(outcomes[4], Err(AdmissionRejection::RateLimited));
}

/// Scenario 2: a duplicate fingerprint within the dedup TTL is rejected; the
/// same tuple after the TTL expires is admitted again.
#[tokio::test]
async fn dedup_rejects_within_ttl_then_admits_after_expiry() {
    let mut rule = ProcessingRule::default_for(NotificationType::Like);
    rule.dedup = true;
    rule.dedup_ttl_secs = 1; // smallest granularity the rule supports; expiry exercised with a 1.1s sleep
    rule.batch = false;
    rule.rate_limit = false;
    let (processor, registry, _repository) = build(rule);
    connect(&registry, "u1");

    let first = processor.ingest(notification("u1", "sender-c", None)).await;
    assert!(first.is_ok());

    let second = processor.ingest(notification("u1", "sender-c", None)).await;
    assert_eq!(second, Err(AdmissionRejection::Duplicate));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let third = processor.ingest(notification("u1", "sender-c", None)).await;
    assert!(third.is_ok(), "fingerprint should have expired by now");
}

/// Scenario 3: a batch rule with max_batch_size=3 flushes a single digest
/// covering all three members as soon as the third arrives.
#[tokio::test]
async fn batch_flushes_by_size_into_one_digest() {
    let mut rule = ProcessingRule::default_for(NotificationType::Like);
    rule.batch = true;
    rule.batch_window_secs = 600;
    rule.max_batch_size = 3;
    rule.dedup = false;
    rule.rate_limit = false;
    let (processor, registry, repository) = build(rule);
    connect(&registry, "u1");

    let mut member_ids = Vec::new();
    for i in 0..3 {
        let n = notification("u1", &format!("sender-{i}"), Some("post42"));
        member_ids.push(processor.ingest(n).await.unwrap());
    }

    // give the worker pool a moment to process the synthesized digest
    tokio::time::sleep(Duration::from_millis(50)).await;

    let listed = repository.list_for_user("u1", 10).await.unwrap();
    let digest = listed
        .iter()
        .find(|n| n.is_batched && !n.digest_member_ids.is_empty())
        .expect("expected a flushed digest notification");
    assert_eq!(digest.title, "3 new likes");
    assert_eq!(digest.digest_member_ids.len(), 3);

    for id in &member_ids {
        let member = repository.get_notification(id).await.unwrap().unwrap();
        assert_eq!(member.status, DeliveryStatus::Batched);
    }
}

/// Scenario 4: a batch rule with a short window flushes on expiry even when
/// the group never reached its size cap.
#[tokio::test]
async fn batch_flushes_by_window_elapsing() {
    let mut rule = ProcessingRule::default_for(NotificationType::Like);
    rule.batch = true;
    rule.batch_window_secs = 0; // elapses as soon as we sleep past it
    rule.max_batch_size = 10;
    rule.dedup = false;
    rule.rate_limit = false;
    let (processor, registry, repository) = build(rule);
    connect(&registry, "u1");

    processor.ingest(notification("u1", "sender-a", Some("post42"))).await.unwrap();
    processor.ingest(notification("u1", "sender-b", Some("post42"))).await.unwrap();

    assert_eq!(processor.open_batch_group_count(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    processor.sweep_batches().await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(processor.open_batch_group_count(), 0);
    let listed = repository.list_for_user("u1", 10).await.unwrap();
    let digest = listed
        .iter()
        .find(|n| n.is_batched && !n.digest_member_ids.is_empty())
        .expect("expected a window-flushed digest notification");
    assert_eq!(digest.digest_member_ids.len(), 2);
}

/// Scenario 5: a notification scheduled for the future stays pending and
/// undispatched until the scheduled-release sweep picks it up.
#[tokio::test]
async fn scheduled_release_defers_until_due() {
    let mut rule = ProcessingRule::default_for(NotificationType::Like);
    rule.batch = false;
    rule.dedup = false;
    rule.rate_limit = false;
    let (processor, registry, repository) = build(rule);
    connect(&registry, "u1");

    let mut n = notification("u1", "sender-a", None);
    n.scheduled_at = Utc::now() + chrono::Duration::milliseconds(60);
    let id = processor.ingest(n).await.unwrap();

    processor.sweep_scheduled(10).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    let stored = repository.get_notification(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Pending, "not due yet, should not have dispatched");

    tokio::time::sleep(Duration::from_millis(70)).await;
    processor.sweep_scheduled(10).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let stored = repository.get_notification(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Delivered);
}

/// Scenario 6: two connected sockets for the same user both receive a
/// fanned-out notification; closing one mid-dispatch still leaves the other
/// delivered and the overall status `delivered`.
#[tokio::test]
async fn socket_fanout_reaches_remaining_connection_after_disconnect() {
    let mut rule = ProcessingRule::default_for(NotificationType::Mention);
    rule.batch = false;
    rule.dedup = false;
    rule.rate_limit = false;
    let (processor, registry, repository) = build(rule);

    let (conn1, _rx1) = registry.accept().unwrap();
    registry.authenticate(conn1.id, "u2".to_string(), Default::default());
    let (conn2, _rx2) = registry.accept().unwrap();
    registry.authenticate(conn2.id, "u2".to_string(), Default::default());

    registry.remove(conn2.id, sn_engine::registry::CloseReason::Normal);

    let mut n = notification("u2", "sender-a", None);
    n.notification_type = NotificationType::Mention;
    let id = processor.ingest(n).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    let stored = repository.get_notification(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Delivered);
}
