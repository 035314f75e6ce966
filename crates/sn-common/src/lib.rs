use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use utoipa::ToSchema;

pub mod logging;

// ============================================================================
// Notification type, priority, channel mask
// ============================================================================

/// The kind of social-platform event a notification represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Like,
    Comment,
    Follow,
    Mention,
    Reply,
    Repost,
    DirectMessage,
    SystemAlert,
}

impl NotificationType {
    /// Plural, lowercase noun used by digest titles ("3 new likes").
    pub fn plural_noun(&self) -> &'static str {
        match self {
            Self::Like => "likes",
            Self::Comment => "comments",
            Self::Follow => "follows",
            Self::Mention => "mentions",
            Self::Reply => "replies",
            Self::Repost => "reposts",
            Self::DirectMessage => "messages",
            Self::SystemAlert => "alerts",
        }
    }
}

/// A delivery path a notification can travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryChannel {
    InApp,
    Push,
    Email,
}

/// A small set over [`DeliveryChannel`], serialized as a JSON array of strings.
///
/// Kept as an explicit bit-per-channel value rather than a `HashSet` so admission
/// checks (`mask ∩ rule.allowed_channels ∩ preferences`) are cheap integer ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask(u8);

const BIT_IN_APP: u8 = 0b001;
const BIT_PUSH: u8 = 0b010;
const BIT_EMAIL: u8 = 0b100;

impl ChannelMask {
    pub const NONE: ChannelMask = ChannelMask(0);
    pub const ALL: ChannelMask = ChannelMask(BIT_IN_APP | BIT_PUSH | BIT_EMAIL);

    pub fn of(channels: &[DeliveryChannel]) -> Self {
        let mut mask = ChannelMask::NONE;
        for c in channels {
            mask.insert(*c);
        }
        mask
    }

    pub fn insert(&mut self, channel: DeliveryChannel) {
        self.0 |= Self::bit(channel);
    }

    pub fn contains(&self, channel: DeliveryChannel) -> bool {
        self.0 & Self::bit(channel) != 0
    }

    pub fn intersect(&self, other: ChannelMask) -> ChannelMask {
        ChannelMask(self.0 & other.0)
    }

    pub fn union(&self, other: ChannelMask) -> ChannelMask {
        ChannelMask(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn channels(&self) -> Vec<DeliveryChannel> {
        [DeliveryChannel::InApp, DeliveryChannel::Push, DeliveryChannel::Email]
            .into_iter()
            .filter(|c| self.contains(*c))
            .collect()
    }

    fn bit(channel: DeliveryChannel) -> u8 {
        match channel {
            DeliveryChannel::InApp => BIT_IN_APP,
            DeliveryChannel::Push => BIT_PUSH,
            DeliveryChannel::Email => BIT_EMAIL,
        }
    }
}

impl Serialize for ChannelMask {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.channels().serialize(s)
    }
}

impl<'de> Deserialize<'de> for ChannelMask {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let channels = Vec::<DeliveryChannel>::deserialize(d)?;
        Ok(ChannelMask::of(&channels))
    }
}

/// Notification priority; ordered low to urgent so batching/digest logic can take
/// the max priority of a group of members with a plain `Ord` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Delivery status lifecycle. See the state machine in the processor module for the
/// legal transition table; this type only carries the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Cancelled,
    Batched,
}

impl DeliveryStatus {
    /// True once a status can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Read)
    }

    /// Ordinal used to reject regressions along pending < sent < delivered < read.
    /// Failed/Cancelled/Batched sit outside that chain and are handled by `is_terminal`.
    fn chain_rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed | Self::Cancelled | Self::Batched => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition per §4.8.
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == *self {
            return true; // idempotent no-op write
        }
        match (self.chain_rank(), next.chain_rank()) {
            (Some(from), Some(to)) => to > from,
            _ => true, // any non-terminal state can fall into failed/cancelled/batched
        }
    }
}

/// Reason a notification terminated in `Failed`, or was deferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Expired,
    RateLimited,
    Duplicate,
    NoChannels,
    PermanentAfterRetries,
    AdapterPermanent(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::NoChannels => write!(f, "no_channels"),
            Self::PermanentAfterRetries => write!(f, "permanent_after_retries"),
            Self::AdapterPermanent(reason) => write!(f, "adapter_permanent: {reason}"),
        }
    }
}

/// Optional references to the content that triggered a notification. The most
/// specific non-empty field is used as the dedup fingerprint's content key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContentRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl ContentRefs {
    /// Most specific reference present, falling back to empty string.
    pub fn content_key(&self) -> &str {
        self.comment_id
            .as_deref()
            .or(self.content_item_id.as_deref())
            .or(self.conversation_id.as_deref())
            .unwrap_or("")
    }
}

// ============================================================================
// Notification
// ============================================================================

/// Core notification record. Immutable after enqueue except for the status
/// fields (`status`, `delivered_at`, `read_at`, `attempts`, `failure_reason`).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    /// May be the literal string "system" for platform-generated notifications.
    pub sender_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_link: Option<String>,
    #[serde(default)]
    pub content_refs: ContentRefs,
    #[schema(value_type = Vec<DeliveryChannel>)]
    pub channel_mask: ChannelMask,
    #[serde(default)]
    pub priority: Priority,

    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    /// When a transient adapter failure re-queues this item, the backoff deadline
    /// before which `ListPendingRetries` must not return it. `None` once delivered
    /// or while awaiting its first attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub is_batched: bool,
    /// Member ids folded into a digest; non-empty only on the synthesized digest itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub digest_member_ids: Vec<String>,

    #[serde(default)]
    pub template_vars: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Correlation id carried through logs, distinct from `id`; set once at creation.
    pub tracking_id: String,

    #[serde(default = "default_true")]
    pub allow_bundling: bool,
    #[serde(default = "default_true")]
    pub respect_quiet_hours: bool,
}

fn default_true() -> bool {
    true
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn dedup_content_key(&self) -> &str {
        self.content_refs.content_key()
    }
}

// ============================================================================
// Preferences
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypeOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<DeliveryChannel>>)]
    pub channel_mask: Option<ChannelMask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hourly_cap: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_cap: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    /// Minutes since local midnight, [0, 1440).
    pub start_minute: u16,
    pub end_minute: u16,
    /// IANA timezone name, e.g. "America/New_York".
    pub timezone: String,
}

impl QuietHours {
    /// Whether `now` (converted to the configured timezone) falls inside the window.
    /// Handles windows that wrap past midnight (e.g. 22:00-07:00).
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let tz: chrono_tz::Tz = self.timezone.parse().unwrap_or(chrono_tz::UTC);
        let local = now.with_timezone(&tz);
        let minute_of_day = (local.format("%H").to_string().parse::<u16>().unwrap_or(0)) * 60
            + local.format("%M").to_string().parse::<u16>().unwrap_or(0);

        if self.start_minute <= self.end_minute {
            minute_of_day >= self.start_minute && minute_of_day < self.end_minute
        } else {
            minute_of_day >= self.start_minute || minute_of_day < self.end_minute
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub user_id: String,
    #[serde(default)]
    #[schema(value_type = HashMap<String, TypeOverride>)]
    pub per_type: HashMap<NotificationType, TypeOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiet_hours: Option<QuietHours>,
    #[serde(default = "default_true")]
    pub batching_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batching_window_override_secs: Option<u64>,
    #[serde(default)]
    pub blocked_senders: std::collections::HashSet<String>,
}

impl Default for Preferences {
    /// A hand-written impl, not `#[derive(Default)]`: `batching_enabled` must
    /// default to `true` to match its `serde(default = "default_true")`, which
    /// a derived impl would silently ignore in favor of `bool::default()`.
    fn default() -> Self {
        Self {
            user_id: String::new(),
            per_type: HashMap::new(),
            quiet_hours: None,
            batching_enabled: true,
            batching_window_override_secs: None,
            blocked_senders: std::collections::HashSet::new(),
        }
    }
}

impl Preferences {
    pub fn effective_channel_mask(&self, t: NotificationType, rule_allowed: ChannelMask) -> ChannelMask {
        self.per_type
            .get(&t)
            .and_then(|o| o.channel_mask)
            .unwrap_or(ChannelMask::ALL)
            .intersect(rule_allowed)
    }

    pub fn type_enabled(&self, t: NotificationType) -> bool {
        self.per_type.get(&t).and_then(|o| o.enabled).unwrap_or(true)
    }
}

// ============================================================================
// Devices
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub user_id: String,
    pub device_id: String,
    pub push_token: String,
    pub platform: Platform,
    pub token_updated_at: DateTime<Utc>,
    pub active: bool,
}

// ============================================================================
// Processing rule
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRule {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub batch: bool,
    pub batch_window_secs: u64,
    pub max_batch_size: usize,
    pub dedup: bool,
    pub dedup_ttl_secs: u64,
    pub rate_limit: bool,
    pub hourly_cap: u32,
    pub daily_cap: u32,
    pub allowed_channels: ChannelMask,
    pub default_priority: Priority,
    pub expiry_secs: u64,
}

impl ProcessingRule {
    /// A reasonable default rule, the fallback used when a type has no explicit entry.
    pub fn default_for(t: NotificationType) -> Self {
        Self {
            notification_type: t,
            batch: matches!(t, NotificationType::Like | NotificationType::Follow),
            batch_window_secs: 300,
            max_batch_size: 10,
            dedup: true,
            dedup_ttl_secs: 3600,
            rate_limit: true,
            hourly_cap: 50,
            daily_cap: 500,
            allowed_channels: ChannelMask::ALL,
            default_priority: Priority::Normal,
            expiry_secs: 24 * 3600,
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Output of the rendering pipeline (C3): one struct carrying the per-channel
/// payload shapes so the processor can dispatch without re-rendering per adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub title: String,
    pub body_text: String,
    pub body_html: String,
    pub push_payload: serde_json::Value,
    pub socket_payload: serde_json::Value,
}

// ============================================================================
// Health / stats (shared vocabulary across adapters, registry, engine)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStats {
    pub sent: u64,
    pub delivered: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    pub rate_limited_by_gateway: u64,
}

// ============================================================================
// Errors
// ============================================================================

/// Error kinds surfaced by the processor core, per the error-handling design.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),

    #[error("policy rejected delivery: {0}")]
    Policy(String),

    #[error("transient adapter failure: {0}")]
    Transient(String),

    #[error("permanent adapter failure: {0}")]
    Permanent(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("aborted by shutdown")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, NotificationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_mask_roundtrips_through_json() {
        let mask = ChannelMask::of(&[DeliveryChannel::Push, DeliveryChannel::Email]);
        let json = serde_json::to_string(&mask).unwrap();
        let back: ChannelMask = serde_json::from_str(&json).unwrap();
        assert_eq!(mask, back);
        assert!(back.contains(DeliveryChannel::Push));
        assert!(!back.contains(DeliveryChannel::InApp));
    }

    #[test]
    fn delivery_status_rejects_regression() {
        assert!(DeliveryStatus::Pending.can_transition_to(DeliveryStatus::Sent));
        assert!(DeliveryStatus::Sent.can_transition_to(DeliveryStatus::Delivered));
        assert!(!DeliveryStatus::Delivered.can_transition_to(DeliveryStatus::Sent));
        assert!(DeliveryStatus::Delivered.can_transition_to(DeliveryStatus::Delivered));
        assert!(!DeliveryStatus::Read.can_transition_to(DeliveryStatus::Delivered));
        assert!(!DeliveryStatus::Failed.can_transition_to(DeliveryStatus::Pending));
    }

    #[test]
    fn content_key_prefers_most_specific_ref() {
        let refs = ContentRefs {
            content_item_id: Some("post42".into()),
            comment_id: None,
            conversation_id: Some("conv9".into()),
        };
        assert_eq!(refs.content_key(), "post42");
    }

    #[test]
    fn quiet_hours_handles_midnight_wrap() {
        let qh = QuietHours {
            start_minute: 22 * 60,
            end_minute: 7 * 60,
            timezone: "UTC".to_string(),
        };
        let late = Utc::now().date_naive().and_hms_opt(23, 0, 0).unwrap().and_utc();
        let early = Utc::now().date_naive().and_hms_opt(3, 0, 0).unwrap().and_utc();
        let midday = Utc::now().date_naive().and_hms_opt(13, 0, 0).unwrap().and_utc();
        assert!(qh.contains(late));
        assert!(qh.contains(early));
        assert!(!qh.contains(midday));
    }
}
