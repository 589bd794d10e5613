use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `DedupeStrategy` values.
pub enum DedupeStrategy {
    #[default]
    Fingerprint,
    None,
}

impl DedupeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fingerprint => "fingerprint",
            Self::None => "none",
        }
    }
}

impl FromStr for DedupeStrategy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fingerprint" => Ok(Self::Fingerprint),
            "none" | "off" => Ok(Self::None),
            other => Err(format!(
                "unsupported dedupe strategy '{other}', expected fingerprint or none"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Per-invocation dedupe and suppression settings.
///
/// Zero disables `max_issues_per_workflow` and `rate_limit_hours`.
pub struct DedupePolicy {
    pub strategy: DedupeStrategy,
    pub always_create_new: bool,
    pub max_issues_per_workflow: u32,
    pub rate_limit_hours: u32,
    pub snooze_until: Option<DateTime<Utc>>,
}

impl DedupePolicy {
    /// True when an existing match must be ignored and a new issue created.
    pub fn bypasses_existing(&self) -> bool {
        self.always_create_new || self.strategy == DedupeStrategy::None
    }

    pub fn is_snoozed_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.snooze_until, Some(until) if now < until)
    }

    pub fn rate_limit_window(&self) -> Option<Duration> {
        (self.rate_limit_hours > 0).then(|| Duration::hours(i64::from(self.rate_limit_hours)))
    }

    pub fn soft_cap(&self) -> Option<usize> {
        (self.max_issues_per_workflow > 0).then_some(self.max_issues_per_workflow as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Labels applied to every created or updated failure issue.
pub struct LabelPolicy {
    pub failure_label: String,
    pub additional_labels: Vec<String>,
    pub include_category_label: bool,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            failure_label: "ci-failure".to_string(),
            additional_labels: Vec::new(),
            include_category_label: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{DedupePolicy, DedupeStrategy};

    #[test]
    fn unit_dedupe_strategy_parses_known_values() {
        assert_eq!(
            " Fingerprint ".parse::<DedupeStrategy>(),
            Ok(DedupeStrategy::Fingerprint)
        );
        assert_eq!("none".parse::<DedupeStrategy>(), Ok(DedupeStrategy::None));
        assert!("title".parse::<DedupeStrategy>().is_err());
    }

    #[test]
    fn functional_bypass_covers_escape_hatch_and_disabled_strategy() {
        let mut policy = DedupePolicy::default();
        assert!(!policy.bypasses_existing());
        policy.always_create_new = true;
        assert!(policy.bypasses_existing());
        policy.always_create_new = false;
        policy.strategy = DedupeStrategy::None;
        assert!(policy.bypasses_existing());
    }

    #[test]
    fn regression_snooze_boundary_is_exclusive() {
        let until = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        let policy = DedupePolicy {
            snooze_until: Some(until),
            ..DedupePolicy::default()
        };
        assert!(policy.is_snoozed_at(until - Duration::seconds(1)));
        assert!(!policy.is_snoozed_at(until));
        assert!(!DedupePolicy::default().is_snoozed_at(until));
    }

    #[test]
    fn unit_zero_limits_disable_rate_limit_and_soft_cap() {
        let policy = DedupePolicy::default();
        assert_eq!(policy.rate_limit_window(), None);
        assert_eq!(policy.soft_cap(), None);

        let limited = DedupePolicy {
            rate_limit_hours: 6,
            max_issues_per_workflow: 3,
            ..DedupePolicy::default()
        };
        assert_eq!(limited.rate_limit_window(), Some(Duration::hours(6)));
        assert_eq!(limited.soft_cap(), Some(3));
    }
}
