//! PushAdapter integration tests against a mocked gateway: status
//! classification, rate caps, and the invalid-token device-deactivation
//! invariant from the boundary-behaviors section ("push adapter permanent-
//! error for invalid token results in device becoming inactive").

use chrono::Utc;
use sn_common::{
    ChannelMask, ContentRefs, DeliveryStatus, DeviceRegistration, Notification, NotificationType,
    Platform, Priority,
};
use sn_engine::adapters::{AdapterOutcome, ChannelAdapter, PushAdapter};
use sn_repository::{InMemoryRepository, Repository};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_notification(recipient: &str) -> Notification {
    let now = Utc::now();
    Notification {
        id: "n1".to_string(),
        recipient_id: recipient.to_string(),
        sender_id: "sender".to_string(),
        notification_type: NotificationType::Mention,
        title: "you were mentioned".to_string(),
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
        tracking_id: "t1".to_string(),
        allow_bundling: true,
        respect_quiet_hours: false,
    }
}

async fn registered_device(repository: &InMemoryRepository, user_id: &str, device_id: &str) {
    repository
        .register_device(DeviceRegistration {
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            push_token: "tok".to_string(),
            platform: Platform::Ios,
            token_updated_at: Utc::now(),
            active: true,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn delivers_to_registered_device_on_2xx() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let repository = InMemoryRepository::new();
    registered_device(&repository, "u1", "d1").await;

    let adapter = PushAdapter::new(
        format!("{}/push", mock_server.uri()),
        "proj".to_string(),
        Duration::from_secs(5),
        repository.clone(),
    );

    let notification = sample_notification("u1");
    let rendered = sn_engine::rendering::render_single(&notification);
    let outcome = adapter.send(&notification, &rendered).await;

    assert_eq!(outcome, AdapterOutcome::Delivered);
}

#[tokio::test]
async fn no_registered_devices_is_permanent_failure() {
    let repository = InMemoryRepository::new();
    let adapter = PushAdapter::new(
        "http://127.0.0.1:1/push".to_string(),
        "proj".to_string(),
        Duration::from_secs(1),
        repository,
    );

    let notification = sample_notification("u1");
    let rendered = sn_engine::rendering::render_single(&notification);
    let outcome = adapter.send(&notification, &rendered).await;

    assert!(matches!(outcome, AdapterOutcome::Permanent(_)));
}

#[tokio::test]
async fn invalid_token_deactivates_device_and_skips_it_next_send() {
    let mock_server = MockServer::start().await;
    // 404 classifies as permanent per the adopted HTTP status table (§4.2).
    Mock::given(method("POST"))
        .and(path("/push"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let repository = InMemoryRepository::new();
    registered_device(&repository, "u1", "d1").await;

    let adapter = PushAdapter::new(
        format!("{}/push", mock_server.uri()),
        "proj".to_string(),
        Duration::from_secs(5),
        repository.clone(),
    );

    let notification = sample_notification("u1");
    let rendered = sn_engine::rendering::render_single(&notification);
    let outcome = adapter.send(&notification, &rendered).await;
    assert!(matches!(outcome, AdapterOutcome::Permanent(_)));

    let devices = repository.list_user_devices("u1").await.unwrap();
    assert_eq!(devices.len(), 1);
    assert!(!devices[0].active, "device should be deactivated after a permanent gateway rejection");

    // A second send with no active devices left should also fail permanently,
    // confirming the adapter actually skips the now-inactive device rather
    // than retrying it.
    let outcome = adapter.send(&notification, &rendered).await;
    assert!(matches!(outcome, AdapterOutcome::Permanent(_)));
}

#[tokio::test]
async fn server_error_is_transient_and_leaves_device_active() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let repository = InMemoryRepository::new();
    registered_device(&repository, "u1", "d1").await;

    let adapter = PushAdapter::new(
        format!("{}/push", mock_server.uri()),
        "proj".to_string(),
        Duration::from_secs(5),
        repository.clone(),
    );

    let notification = sample_notification("u1");
    let rendered = sn_engine::rendering::render_single(&notification);
    let outcome = adapter.send(&notification, &rendered).await;

    assert!(matches!(outcome, AdapterOutcome::Transient(_)));
    let devices = repository.list_user_devices("u1").await.unwrap();
    assert!(devices[0].active);
}
