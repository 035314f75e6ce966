//! Per-notification-type processing rule table.
//!
//! A lookup table of plain data, consulted by the processor rather than
//! dispatched through a trait object.

use dashmap::DashMap;
use sn_common::{NotificationType, ProcessingRule};

/// Registry of processing rules keyed by notification type, falling back to
/// `ProcessingRule::default_for` when a type has no explicit override.
pub struct RuleTable {
    overrides: DashMap<NotificationType, ProcessingRule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self {
            overrides: DashMap::new(),
        }
    }

    /// Seed the table with the operator-tunable overrides loaded at startup.
    pub fn with_overrides(rules: Vec<ProcessingRule>) -> Self {
        let table = Self::new();
        for rule in rules {
            table.overrides.insert(rule.notification_type, rule);
        }
        table
    }

    pub fn get(&self, notification_type: NotificationType) -> ProcessingRule {
        self.overrides
            .get(&notification_type)
            .map(|r| r.clone())
            .unwrap_or_else(|| ProcessingRule::default_for(notification_type))
    }

    pub fn set(&self, rule: ProcessingRule) {
        self.overrides.insert(rule.notification_type, rule);
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_when_no_override_set() {
        let table = RuleTable::new();
        let rule = table.get(NotificationType::Like);
        assert_eq!(rule.notification_type, NotificationType::Like);
    }

    #[test]
    fn explicit_override_takes_precedence() {
        let table = RuleTable::new();
        let mut rule = ProcessingRule::default_for(NotificationType::Mention);
        rule.batch = false;
        table.set(rule);

        assert!(!table.get(NotificationType::Mention).batch);
    }
}
