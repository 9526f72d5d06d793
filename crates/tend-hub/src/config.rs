//! Hub tunables. Every field has a default, so an empty config section is
//! valid.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tend_core::{
  activity::ActivityKind, conflict::ConflictPolicy, dependent::RelevantScope,
  permission::AccessPolicy,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
  /// Entries of the same kind closer than this may be merged or flagged.
  pub merge_window_secs:           u32,
  /// Presence older than this reads as offline.
  pub presence_stale_secs:         u32,
  /// Ceiling on an institutional caregiver's working day.
  pub institutional_session_hours: u32,
  pub invitation_ttl_days:         u32,
  /// How much history the dependents overview includes.
  pub recent_activity_hours:       u32,
  /// Per-subscriber queue depth. Notifications beyond it are dropped.
  pub subscriber_buffer:           usize,
  pub retry:                       RetryConfig,
  /// Scope for professionals whose grant does not carry one.
  pub professional_scope:          RelevantScope,
  /// Kinds included in a report export.
  pub report_kinds:                Vec<ActivityKind>,
}

impl Default for HubConfig {
  fn default() -> Self {
    Self {
      merge_window_secs:           300,
      presence_stale_secs:         90,
      institutional_session_hours: 8,
      invitation_ttl_days:         7,
      recent_activity_hours:       24,
      subscriber_buffer:           64,
      retry:                       RetryConfig::default(),
      professional_scope:          RelevantScope {
        kinds:         ActivityKind::MEDICAL.to_vec(),
        lookback_days: None,
      },
      report_kinds:                ActivityKind::MEDICAL.to_vec(),
    }
  }
}

impl HubConfig {
  pub fn conflict_policy(&self) -> ConflictPolicy {
    ConflictPolicy { window: TimeDelta::seconds(i64::from(self.merge_window_secs)) }
  }

  pub fn access_policy(&self) -> AccessPolicy {
    AccessPolicy {
      institutional_session:  TimeDelta::hours(i64::from(self.institutional_session_hours)),
      default_relevant_scope: self.professional_scope.clone(),
      report_kinds:           self.report_kinds.clone(),
    }
  }

  pub fn presence_stale_after(&self) -> TimeDelta {
    TimeDelta::seconds(i64::from(self.presence_stale_secs))
  }

  pub fn invitation_ttl(&self) -> TimeDelta { TimeDelta::days(i64::from(self.invitation_ttl_days)) }

  pub fn recent_activity(&self) -> TimeDelta {
    TimeDelta::hours(i64::from(self.recent_activity_hours))
  }
}

/// Bounded exponential backoff for transient store errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Total attempts, including the first.
  pub max_attempts:  u32,
  pub base_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self { Self { max_attempts: 3, base_delay_ms: 50 } }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_config_keeps_defaults() {
    let cfg: HubConfig = serde_json::from_str(r#"{ "merge_window_secs": 120 }"#).unwrap();
    assert_eq!(cfg.merge_window_secs, 120);
    assert_eq!(cfg.presence_stale_secs, 90);
    assert_eq!(cfg.retry.max_attempts, 3);
    assert_eq!(cfg.conflict_policy().window, TimeDelta::minutes(2));
  }
}
