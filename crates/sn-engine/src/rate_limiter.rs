//! Sliding-window rate limiter (C2), one window pair per (recipient, notification type).
//!
//! Grounded in the same "bucket of recent timestamps, prune on read" approach the
//! teacher uses for rolling success-rate windows, applied here to admission control
//! instead of observability.

use dashmap::DashMap;
use parking_lot::Mutex;
use sn_common::NotificationType;
use std::time::{Duration, Instant};

struct Window {
    hourly: Vec<Instant>,
    daily: Vec<Instant>,
}

impl Window {
    fn new() -> Self {
        Self {
            hourly: Vec::new(),
            daily: Vec::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        let hour_ago = now.checked_sub(Duration::from_secs(3600)).unwrap_or(now);
        let day_ago = now.checked_sub(Duration::from_secs(24 * 3600)).unwrap_or(now);
        self.hourly.retain(|t| *t > hour_ago);
        self.daily.retain(|t| *t > day_ago);
    }
}

/// Per-(recipient, type) sliding-window limiter over a 60-minute and 24-hour horizon,
/// plus a per-user administrative throttle that overrides both windows.
pub struct RateLimiter {
    windows: DashMap<(String, NotificationType), Mutex<Window>>,
    throttled_until: DashMap<String, Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    HourlyCapExceeded,
    DailyCapExceeded,
    Throttled,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            throttled_until: DashMap::new(),
        }
    }

    /// Sets (or clears, with a past instant) an administrative throttle for a
    /// user: every admission check fails while `until` has not yet elapsed.
    /// Not touched by normal admission traffic — only by an external caller
    /// (e.g. an operator action), per §4.5.
    pub fn throttle_user(&self, user_id: &str, until: Instant) {
        self.throttled_until.insert(user_id.to_string(), until);
    }

    fn is_throttled(&self, user_id: &str) -> bool {
        self.throttled_until
            .get(user_id)
            .map(|until| Instant::now() < *until)
            .unwrap_or(false)
    }

    /// Checks the caps and, if admitted, records the attempt. Sharded by the
    /// (recipient, type) key so unrelated recipients never contend on the same lock.
    pub fn check_and_record(
        &self,
        recipient_id: &str,
        notification_type: NotificationType,
        hourly_cap: u32,
        daily_cap: u32,
    ) -> Admission {
        if self.is_throttled(recipient_id) {
            return Admission::Throttled;
        }

        let key = (recipient_id.to_string(), notification_type);
        let entry = self.windows.entry(key).or_insert_with(|| Mutex::new(Window::new()));
        let mut window = entry.lock();
        let now = Instant::now();
        window.prune(now);

        if window.hourly.len() as u32 >= hourly_cap {
            return Admission::HourlyCapExceeded;
        }
        if window.daily.len() as u32 >= daily_cap {
            return Admission::DailyCapExceeded;
        }

        window.hourly.push(now);
        window.daily.push(now);
        Admission::Allowed
    }

    /// Drops windows for recipients that have not sent anything in 24h, bounding
    /// memory for a long-running process. Intended to be called from a periodic task.
    pub fn sweep_idle(&self) {
        let day_ago = Instant::now().checked_sub(Duration::from_secs(24 * 3600));
        self.windows.retain(|_, window| {
            let mut w = window.lock();
            if let Some(cutoff) = day_ago {
                w.daily.retain(|t| *t > cutoff);
            }
            !w.daily.is_empty()
        });
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
