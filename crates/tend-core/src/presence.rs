//! Presence: who is around, and what they are doing.
//!
//! Presence is ephemeral. Records are rebuilt from signals, and staleness is
//! derived at read time, so a client that vanishes without signing off reads
//! as offline once its last heartbeat is old enough.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::group::GroupSettings;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
  EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PresenceStatus {
  Online,
  Away,
  Caring,
  Offline,
}

/// Something a client told us about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum PresenceSignal {
  /// Periodic keep-alive. The hint, if any, replaces the current status.
  Heartbeat {
    #[serde(default)]
    status: Option<PresenceStatus>,
  },
  /// The app went to the background.
  Background,
  /// Actively caring, optionally for a specific dependent.
  Caring {
    #[serde(default)]
    dependent_id: Option<Uuid>,
    #[serde(default)]
    activity:     Option<String>,
  },
  SignOff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
  pub user_id:            Uuid,
  pub group_id:           Uuid,
  /// Status as last reported; see [`PresenceRecord::effective_status`].
  pub status:             PresenceStatus,
  pub dependent_id:       Option<Uuid>,
  pub activity:           Option<String>,
  pub last_seen:          DateTime<Utc>,
  /// First signal of the current local day. Institutional session limits
  /// count from here.
  pub session_started_at: DateTime<Utc>,
}

impl PresenceRecord {
  pub fn is_stale(&self, now: DateTime<Utc>, stale_after: TimeDelta) -> bool {
    now - self.last_seen > stale_after
  }

  pub fn effective_status(&self, now: DateTime<Utc>, stale_after: TimeDelta) -> PresenceStatus {
    if self.is_stale(now, stale_after) { PresenceStatus::Offline } else { self.status }
  }

  pub fn view(&self, now: DateTime<Utc>, stale_after: TimeDelta) -> PresenceView {
    let status = self.effective_status(now, stale_after);
    let caring = status == PresenceStatus::Caring;
    PresenceView {
      user_id: self.user_id,
      status,
      dependent_id: self.dependent_id.filter(|_| caring),
      activity: self.activity.clone().filter(|_| caring),
      last_seen: self.last_seen,
    }
  }
}

/// What other members see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceView {
  pub user_id:      Uuid,
  pub status:       PresenceStatus,
  pub dependent_id: Option<Uuid>,
  pub activity:     Option<String>,
  pub last_seen:    DateTime<Utc>,
}

/// Fold one signal into the previous record.
pub fn apply(
  prev: Option<&PresenceRecord>,
  user_id: Uuid,
  group_id: Uuid,
  signal: PresenceSignal,
  now: DateTime<Utc>,
  settings: &GroupSettings,
) -> PresenceRecord {
  let session_started_at = match prev {
    Some(p) if settings.same_day(p.session_started_at, now) => p.session_started_at,
    _ => now,
  };

  let (status, dependent_id, activity) = match signal {
    PresenceSignal::Heartbeat { status: Some(PresenceStatus::Caring) } => {
      let (dep, act) = prev
        .filter(|p| p.status == PresenceStatus::Caring)
        .map(|p| (p.dependent_id, p.activity.clone()))
        .unwrap_or_default();
      (PresenceStatus::Caring, dep, act)
    }
    PresenceSignal::Heartbeat { status: Some(PresenceStatus::Offline) }
    | PresenceSignal::SignOff => (PresenceStatus::Offline, None, None),
    PresenceSignal::Heartbeat { status: Some(hint) } => (hint, None, None),
    PresenceSignal::Heartbeat { status: None } => match prev {
      Some(p) if p.status != PresenceStatus::Offline => {
        (p.status, p.dependent_id, p.activity.clone())
      }
      _ => (PresenceStatus::Online, None, None),
    },
    PresenceSignal::Background => (PresenceStatus::Away, None, None),
    PresenceSignal::Caring { dependent_id, activity } => {
      (PresenceStatus::Caring, dependent_id, activity)
    }
  };

  PresenceRecord {
    user_id,
    group_id,
    status,
    dependent_id,
    activity,
    last_seen: now,
    session_started_at,
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  const USER: Uuid = Uuid::from_u128(1);
  const GROUP: Uuid = Uuid::from_u128(2);
  const DEP: Uuid = Uuid::from_u128(3);

  fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 4, 14, 9, 0, 0).unwrap() }

  fn step(prev: Option<&PresenceRecord>, signal: PresenceSignal, at: DateTime<Utc>) -> PresenceRecord {
    apply(prev, USER, GROUP, signal, at, &GroupSettings::default())
  }

  #[test]
  fn heartbeat_brings_user_online() {
    let r = step(None, PresenceSignal::Heartbeat { status: None }, t0());
    assert_eq!(r.status, PresenceStatus::Online);
    assert_eq!(r.session_started_at, t0());
  }

  #[test]
  fn stale_after_ninety_seconds() {
    let stale_after = TimeDelta::seconds(90);
    let r = step(None, PresenceSignal::Heartbeat { status: None }, t0());
    assert_eq!(r.effective_status(t0() + TimeDelta::seconds(90), stale_after), PresenceStatus::Online);
    assert_eq!(
      r.effective_status(t0() + TimeDelta::seconds(91), stale_after),
      PresenceStatus::Offline
    );
  }

  #[test]
  fn caring_survives_plain_heartbeats() {
    let caring = step(
      None,
      PresenceSignal::Caring { dependent_id: Some(DEP), activity: Some("bath".into()) },
      t0(),
    );
    let r = step(Some(&caring), PresenceSignal::Heartbeat { status: None }, t0() + TimeDelta::seconds(30));
    assert_eq!(r.status, PresenceStatus::Caring);
    assert_eq!(r.dependent_id, Some(DEP));
    assert_eq!(r.activity.as_deref(), Some("bath"));
  }

  #[test]
  fn background_and_sign_off() {
    let online = step(None, PresenceSignal::Heartbeat { status: None }, t0());
    let away = step(Some(&online), PresenceSignal::Background, t0() + TimeDelta::seconds(5));
    assert_eq!(away.status, PresenceStatus::Away);
    let gone = step(Some(&away), PresenceSignal::SignOff, t0() + TimeDelta::seconds(10));
    assert_eq!(gone.status, PresenceStatus::Offline);
    assert_eq!(gone.session_started_at, t0());
  }

  #[test]
  fn session_resets_on_new_day() {
    let first = step(None, PresenceSignal::Heartbeat { status: None }, t0());
    let later = step(Some(&first), PresenceSignal::Heartbeat { status: None }, t0() + TimeDelta::hours(3));
    assert_eq!(later.session_started_at, t0());

    let tomorrow = t0() + TimeDelta::days(1);
    let next = step(Some(&later), PresenceSignal::Heartbeat { status: None }, tomorrow);
    assert_eq!(next.session_started_at, tomorrow);
  }

  #[test]
  fn view_hides_dependent_when_not_caring() {
    let caring = step(None, PresenceSignal::Caring { dependent_id: Some(DEP), activity: None }, t0());
    let stale_after = TimeDelta::seconds(90);
    assert_eq!(caring.view(t0(), stale_after).dependent_id, Some(DEP));
    let stale = caring.view(t0() + TimeDelta::minutes(5), stale_after);
    assert_eq!(stale.status, PresenceStatus::Offline);
    assert_eq!(stale.dependent_id, None);
  }
}
