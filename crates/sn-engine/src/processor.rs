//! Processor core (C2): the admission pipeline and delivery worker pool that
//! sit between ingest and the channel adapters.
//!
//! Structurally this is a shared map of in-flight work plus a bounded channel
//! of worker tasks pulling off it with a fixed concurrency, running each
//! notification through preference/dedup/rate-limit/batch policy before
//! handing it to a channel adapter.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use sn_common::{
    ChannelMask, DeliveryChannel, DeliveryStatus, FailureReason, Notification, NotificationType,
};
use sn_repository::{CasOutcome, Repository, StatusUpdate};

use crate::adapters::{AdapterOutcome, ChannelAdapter};
use crate::batching::{self, AddOutcome, BatchEngine};
use crate::dedup::{DedupSet, Fingerprint};
use crate::health::HealthService;
use crate::metrics::AdapterMetricsCollector;
use crate::rate_limiter::{Admission, RateLimiter};
use crate::rendering;
use crate::rules::RuleTable;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub retry_max_attempts: u32,
    pub retry_base_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            queue_capacity: 10_000,
            retry_max_attempts: 5,
            retry_base_backoff: Duration::from_secs(30),
        }
    }
}

/// Why a submitted notification never reaches a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionRejection {
    Invalid(String),
    Disabled,
    BlockedSender,
    RateLimited,
    Duplicate,
    NoChannels,
    QueueFull,
}

/// Rejects malformed submissions before they touch dedup/rate-limit state or
/// the repository. Kept separate from policy admission (disabled/blocked/etc.)
/// since these are caller errors, not recipient decisions.
fn validate(notification: &Notification, now: chrono::DateTime<Utc>) -> Result<(), AdmissionRejection> {
    if notification.recipient_id.trim().is_empty() {
        return Err(AdmissionRejection::Invalid("recipient_id is required".to_string()));
    }
    if notification.title.trim().is_empty() {
        return Err(AdmissionRejection::Invalid("title is required".to_string()));
    }
    if notification.body.trim().is_empty() {
        return Err(AdmissionRejection::Invalid("body is required".to_string()));
    }
    if notification.channel_mask.is_empty() {
        return Err(AdmissionRejection::Invalid("channel_mask must name at least one channel".to_string()));
    }
    if notification.is_expired(now) {
        return Err(AdmissionRejection::Invalid("expires_at is already in the past".to_string()));
    }
    Ok(())
}

pub struct Processor {
    config: ProcessorConfig,
    repository: Arc<dyn Repository>,
    rules: Arc<RuleTable>,
    rate_limiter: Arc<RateLimiter>,
    dedup: Arc<DedupSet>,
    batches: Arc<BatchEngine>,
    adapters: HashMap<DeliveryChannel, Arc<dyn ChannelAdapter>>,
    metrics: Arc<AdapterMetricsCollector>,
    health: Arc<HealthService>,
    work_tx: mpsc::Sender<String>,
    work_rx: tokio::sync::Mutex<Option<mpsc::Receiver<String>>>,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl Processor {
    pub fn new(
        config: ProcessorConfig,
        repository: Arc<dyn Repository>,
        rules: Arc<RuleTable>,
        rate_limiter: Arc<RateLimiter>,
        dedup: Arc<DedupSet>,
        batches: Arc<BatchEngine>,
        adapters: HashMap<DeliveryChannel, Arc<dyn ChannelAdapter>>,
        metrics: Arc<AdapterMetricsCollector>,
        health: Arc<HealthService>,
    ) -> Arc<Self> {
        let (work_tx, work_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            repository,
            rules,
            rate_limiter,
            dedup,
            batches,
            adapters,
            metrics,
            health,
            work_tx,
            work_rx: tokio::sync::Mutex::new(Some(work_rx)),
            running: AtomicBool::new(true),
            shutdown_tx,
        })
    }

    pub fn shutdown_subscriber(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    /// Spawns the fixed-size worker pool pulling off the shared work queue.
    pub fn spawn_workers(self: &Arc<Self>) {
        for worker_id in 0..self.config.worker_count {
            let processor = self.clone();
            tokio::spawn(async move {
                processor.run_worker(worker_id).await;
            });
        }
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        let mut rx = self
            .work_rx
            .lock()
            .await
            .take()
            .expect("worker pool spawned more than once");
        let mut shutdown_rx = self.shutdown_subscriber();

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!(worker_id, "processor worker shutting down");
                    break;
                }
                maybe_id = rx.recv() => {
                    match maybe_id {
                        Some(id) => self.process_one(&id).await,
                        None => break,
                    }
                }
            }
        }

        *self.work_rx.lock().await = Some(rx);
    }

    /// Runs the full admission pipeline (C2) for a freshly-submitted notification,
    /// persists it, and enqueues it for delivery if it's admitted immediately.
    /// Subject to preference, dedup, rate-limit and batching policy — the
    /// default, non-blocking entry point described in §4.1.
    pub async fn ingest(&self, mut notification: Notification) -> Result<String, AdmissionRejection> {
        let now = Utc::now();
        validate(&notification, now)?;
        let rule = self.rules.get(notification.notification_type);

        let prefs = self
            .repository
            .get_preferences(&notification.recipient_id)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();

        if !prefs.type_enabled(notification.notification_type) {
            return Err(AdmissionRejection::Disabled);
        }
        if prefs.blocked_senders.contains(&notification.sender_id) {
            return Err(AdmissionRejection::BlockedSender);
        }

        let allowed_channels = notification
            .channel_mask
            .intersect(rule.allowed_channels)
            .intersect(prefs.effective_channel_mask(notification.notification_type, rule.allowed_channels));
        if allowed_channels.is_empty() {
            return Err(AdmissionRejection::NoChannels);
        }
        notification.channel_mask = allowed_channels;

        if rule.dedup {
            let fingerprint = Fingerprint {
                recipient_id: notification.recipient_id.clone(),
                notification_type: notification.notification_type,
                sender_id: notification.sender_id.clone(),
                content_key: notification.dedup_content_key().to_string(),
            };
            if !self
                .dedup
                .check_and_insert(fingerprint, Duration::from_secs(rule.dedup_ttl_secs))
            {
                return Err(AdmissionRejection::Duplicate);
            }
        }

        if rule.rate_limit {
            let admission = self.rate_limiter.check_and_record(
                &notification.recipient_id,
                notification.notification_type,
                rule.hourly_cap,
                rule.daily_cap,
            );
            if admission != Admission::Allowed {
                return Err(AdmissionRejection::RateLimited);
            }
        }

        notification.tracking_id = Uuid::new_v4().to_string();
        if notification.id.is_empty() {
            notification.id = Uuid::new_v4().to_string();
        }
        notification.created_at = now;

        let should_batch = rule.batch
            && notification.allow_bundling
            && prefs.batching_enabled
            && notification.group_key.is_some();

        let id = notification.id.clone();

        if should_batch {
            let window = Duration::from_secs(
                prefs.batching_window_override_secs.unwrap_or(rule.batch_window_secs),
            );
            let group_key = notification.group_key.clone().unwrap_or_default();
            let recipient_id = notification.recipient_id.clone();

            self.repository
                .create_notification(notification.clone())
                .await
                .map_err(|_| AdmissionRejection::NoChannels)?;

            match self.batches.add(
                &recipient_id,
                notification.notification_type,
                &group_key,
                notification,
                window,
                rule.max_batch_size,
            ) {
                AddOutcome::Held => {}
                AddOutcome::FlushNow(members) => self.flush_digest(recipient_id, members).await,
            }
        } else {
            let due_now = notification.scheduled_at <= now;
            self.repository
                .create_notification(notification)
                .await
                .map_err(|_| AdmissionRejection::NoChannels)?;
            if due_now {
                self.enqueue(&id)?;
            }
        }

        Ok(id)
    }

    /// Bypasses preference, dedup, rate-limit and batching policy entirely —
    /// the escape hatch for system alerts and other calls that must not be
    /// suppressed or folded into a digest. Still validated and still subject
    /// to the worker queue's capacity.
    pub async fn send_immediate(&self, mut notification: Notification) -> Result<String, AdmissionRejection> {
        let now = Utc::now();
        validate(&notification, now)?;

        notification.tracking_id = Uuid::new_v4().to_string();
        if notification.id.is_empty() {
            notification.id = Uuid::new_v4().to_string();
        }
        notification.created_at = now;
        notification.allow_bundling = false;
        let id = notification.id.clone();

        self.repository
            .create_notification(notification)
            .await
            .map_err(|_| AdmissionRejection::NoChannels)?;
        self.enqueue(&id)?;
        Ok(id)
    }

    /// Non-blocking enqueue onto the worker channel: a full queue rejects the
    /// caller immediately rather than applying backpressure, per §4.1.
    fn enqueue(&self, id: &str) -> Result<(), AdmissionRejection> {
        self.work_tx
            .try_send(id.to_string())
            .map_err(|_| AdmissionRejection::QueueFull)
    }

    /// Synthesizes a digest notification covering `members` and enqueues it for delivery.
    async fn flush_digest(&self, recipient_id: String, members: Vec<Notification>) {
        if members.is_empty() {
            return;
        }
        let batch_id = batching::new_batch_id();
        let rendered = rendering::render_digest(&members);
        let first = &members[0];
        let now = Utc::now();

        let mut digest = first.clone();
        digest.id = Uuid::new_v4().to_string();
        digest.title = rendered.title.clone();
        digest.body = rendered.body_text.clone();
        digest.is_batched = true;
        digest.batch_id = Some(batch_id.clone());
        digest.digest_member_ids = members.iter().map(|m| m.id.clone()).collect();
        digest.created_at = now;
        digest.priority = members.iter().map(|m| m.priority).max().unwrap_or(first.priority);

        if self.repository.create_notification(digest.clone()).await.is_ok() {
            for member in &members {
                let _ = self
                    .repository
                    .update_status(
                        &member.id,
                        DeliveryStatus::Pending,
                        DeliveryStatus::Batched,
                        StatusUpdate {
                            batch_id: Some(batch_id.clone()),
                            ..Default::default()
                        },
                    )
                    .await;
            }
            let _ = self.enqueue(&digest.id);
        }
        debug!(recipient_id, member_count = members.len(), "flushed digest");
    }

    /// Delivers one persisted notification across its channel mask and updates status.
    async fn process_one(&self, id: &str) {
        let Ok(Some(notification)) = self.repository.get_notification(id).await else {
            warn!(id, "processor could not load notification for delivery");
            return;
        };

        if notification.status.is_terminal() || notification.status == DeliveryStatus::Batched {
            return;
        }

        let now = Utc::now();
        if notification.is_expired(now) {
            let _ = self
                .repository
                .update_status(
                    id,
                    notification.status,
                    DeliveryStatus::Failed,
                    StatusUpdate {
                        failure_reason: Some(FailureReason::Expired),
                        ..Default::default()
                    },
                )
                .await;
            return;
        }

        if notification.respect_quiet_hours {
            if let Ok(Some(prefs)) = self.repository.get_preferences(&notification.recipient_id).await {
                if prefs.quiet_hours.as_ref().is_some_and(|qh| qh.contains(now)) {
                    let deferred_to = now + chrono::Duration::minutes(15);
                    let _ = self
                        .repository
                        .update_status(
                            id,
                            notification.status,
                            notification.status,
                            StatusUpdate {
                                next_attempt_at: Some(Some(deferred_to)),
                                ..Default::default()
                            },
                        )
                        .await;
                    debug!(id, "deferred delivery, recipient is in quiet hours");
                    return;
                }
            }
        }

        let rendered = rendering::render_single(&notification);
        let channels = notification.channel_mask.channels();

        let outcomes = futures::future::join_all(channels.into_iter().filter_map(|channel| {
            let adapter = self.adapters.get(&channel)?.clone();
            let notification = &notification;
            let rendered = &rendered;
            Some(async move {
                let started = std::time::Instant::now();
                let outcome = adapter.send(notification, rendered).await;
                (channel, started.elapsed(), outcome)
            })
        }))
        .await;

        let mut any_delivered = false;
        let mut any_transient = false;
        let mut permanent_reason = None;

        for (channel, elapsed, outcome) in outcomes {
            let adapter_name = channel_name(channel);
            let delivered = matches!(outcome, AdapterOutcome::Delivered);
            self.metrics.record(adapter_name, elapsed, delivered);
            self.health.record_adapter_result(adapter_name, delivered);
            crate::prom_metrics::record_delivery_attempt(adapter_name, delivered);
            crate::prom_metrics::record_delivery_latency(adapter_name, elapsed);

            match outcome {
                AdapterOutcome::Delivered => any_delivered = true,
                AdapterOutcome::Transient(_) => any_transient = true,
                AdapterOutcome::Permanent(reason) => permanent_reason = Some(reason),
            }
        }

        if any_delivered {
            let _ = self
                .repository
                .update_status(
                    id,
                    notification.status,
                    DeliveryStatus::Delivered,
                    StatusUpdate {
                        delivered_at: Some(now),
                        attempts: Some(notification.attempts + 1),
                        ..Default::default()
                    },
                )
                .await;
        } else if any_transient && notification.attempts + 1 < self.config.retry_max_attempts {
            let backoff = self.config.retry_base_backoff * 2u32.pow(notification.attempts.min(6));
            let outcome = self
                .repository
                .update_status(
                    id,
                    notification.status,
                    DeliveryStatus::Pending,
                    StatusUpdate {
                        attempts: Some(notification.attempts + 1),
                        next_attempt_at: Some(Some(now + chrono::Duration::from_std(backoff).unwrap_or_default())),
                        ..Default::default()
                    },
                )
                .await;
            if !matches!(outcome, Ok(CasOutcome::Updated)) {
                warn!(id, "retry scheduling CAS conflicted, will pick up on next sweep");
            }
        } else {
            let reason = permanent_reason
                .map(FailureReason::AdapterPermanent)
                .unwrap_or(FailureReason::PermanentAfterRetries);
            let _ = self
                .repository
                .update_status(
                    id,
                    notification.status,
                    DeliveryStatus::Failed,
                    StatusUpdate {
                        attempts: Some(notification.attempts + 1),
                        failure_reason: Some(reason),
                        ..Default::default()
                    },
                )
                .await;
        }
    }

    /// Re-enqueues notifications whose retry backoff has elapsed. Driven by a
    /// periodic lifecycle task.
    pub async fn sweep_retries(&self, limit: usize) {
        if let Ok(due) = self.repository.list_pending_retries(Utc::now(), limit).await {
            for notification in due {
                let _ = self.enqueue(&notification.id);
            }
        }
    }

    /// Re-enqueues notifications scheduled for future delivery that have come due.
    pub async fn sweep_scheduled(&self, limit: usize) {
        if let Ok(due) = self.repository.list_scheduled_due(Utc::now(), limit).await {
            for notification in due {
                let _ = self.enqueue(&notification.id);
            }
        }
    }

    /// Flushes every batch group whose window has elapsed into a digest.
    pub async fn sweep_batches(&self) {
        for ((recipient_id, _notification_type, _group_key), members) in self.batches.drain_expired() {
            self.flush_digest(recipient_id, members).await;
        }
    }

    pub fn cleanup_idle_state(&self) {
        self.rate_limiter.sweep_idle();
    }

    pub fn dedup_sweep(&self, default_ttl_secs: u64) {
        self.dedup.sweep_expired(Duration::from_secs(default_ttl_secs));
    }

    pub fn open_batch_group_count(&self) -> usize {
        self.batches.open_group_count()
    }
}

fn channel_name(channel: DeliveryChannel) -> &'static str {
    match channel {
        DeliveryChannel::InApp => "socket",
        DeliveryChannel::Push => "push",
        DeliveryChannel::Email => "email",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use sn_common::{ContentRefs, Priority};
    use sn_repository::InMemoryRepository;

    fn sample_notification(recipient: &str, group_key: Option<&str>) -> Notification {
        let now = Utc::now();
        Notification {
            id: String::new(),
            recipient_id: recipient.to_string(),
            sender_id: "sender".to_string(),
            notification_type: NotificationType::Like,
            title: "{{actor}} liked your post".to_string(),
            body: "liked".to_string(),
            action_link: None,
            content_refs: ContentRefs {
                content_item_id: Some("post1".to_string()),
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

    fn build_processor() -> Arc<Processor> {
        let repository = InMemoryRepository::new();
        let registry = Arc::new(ConnectionRegistry::new());
        let mut adapters: HashMap<DeliveryChannel, Arc<dyn ChannelAdapter>> = HashMap::new();
        adapters.insert(DeliveryChannel::InApp, Arc::new(crate::adapters::SocketAdapter::new(registry.clone())));

        Processor::new(
            ProcessorConfig::default(),
            repository,
            Arc::new(RuleTable::new()),
            Arc::new(RateLimiter::new()),
            Arc::new(DedupSet::new()),
            Arc::new(BatchEngine::new()),
            adapters,
            Arc::new(AdapterMetricsCollector::new(Default::default())),
            Arc::new(HealthService::new(Default::default(), registry)),
        )
    }

    #[tokio::test]
    async fn duplicate_submission_is_rejected() {
        let processor = build_processor();
        let first = processor.ingest(sample_notification("u1", None)).await;
        assert!(first.is_ok());

        let second = processor.ingest(sample_notification("u1", None)).await;
        assert_eq!(second, Err(AdmissionRejection::Duplicate));
    }

    #[tokio::test]
    async fn batchable_type_holds_first_member_open() {
        let processor = build_processor();
        let mut rules = RuleTable::new();
        let mut rule = sn_common::ProcessingRule::default_for(NotificationType::Like);
        rule.dedup = false;
        rules.set(rule);

        let processor = Processor::new(
            ProcessorConfig::default(),
            InMemoryRepository::new(),
            Arc::new(rules),
            Arc::new(RateLimiter::new()),
            Arc::new(DedupSet::new()),
            Arc::new(BatchEngine::new()),
            HashMap::new(),
            Arc::new(AdapterMetricsCollector::new(Default::default())),
            Arc::new(HealthService::new(Default::default(), Arc::new(ConnectionRegistry::new()))),
        );

        let id = processor.ingest(sample_notification("u1", Some("post1"))).await.unwrap();
        let stored = processor.repository.get_notification(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Pending);
        assert_eq!(processor.batches.open_group_count(), 1);
    }
}
