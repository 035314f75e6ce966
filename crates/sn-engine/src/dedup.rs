//! TTL fingerprint set used to suppress duplicate notifications (C2).

use dashmap::DashMap;
use sn_common::NotificationType;
use std::time::{Duration, Instant};

/// Fingerprint identifying a notification for dedup purposes: who it's for, what
/// kind it is, which sender triggered it, and which piece of content it's about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub recipient_id: String,
    pub notification_type: NotificationType,
    pub sender_id: String,
    pub content_key: String,
}

pub struct DedupSet {
    seen: DashMap<Fingerprint, Instant>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self { seen: DashMap::new() }
    }

    /// Returns `true` (and records the fingerprint) if this is the first sighting
    /// within `ttl`; returns `false` without mutating state if it's a repeat.
    pub fn check_and_insert(&self, fingerprint: Fingerprint, ttl: Duration) -> bool {
        let now = Instant::now();
        if let Some(seen_at) = self.seen.get(&fingerprint) {
            if now.duration_since(*seen_at) < ttl {
                return false;
            }
        }
        self.seen.insert(fingerprint, now);
        true
    }

    /// Evicts fingerprints older than `ttl`. Intended for a periodic background task;
    /// without it the set would grow without bound across the process lifetime.
    pub fn sweep_expired(&self, ttl: Duration) {
        let now = Instant::now();
        self.seen.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
    }
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new()
    }
}
