//! Groups ("families"): the shared coordination unit.

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

/// What kind of group this is.
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
pub enum GroupKind {
  /// Created implicitly for a single user; starts with exactly one core
  /// member.
  Personal,
  Standard,
  Institutional,
}

/// Per-group settings, stored as a JSON blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
  /// Offset from UTC used to decide where "today" starts for this group.
  #[serde(default)]
  pub utc_offset_minutes:   i32,
  /// Audit entries older than this many days may be pruned. `None` keeps
  /// them forever.
  #[serde(default)]
  pub audit_retention_days: Option<u32>,
}

impl GroupSettings {
  pub fn offset(&self) -> FixedOffset {
    FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60))
      .unwrap_or_else(|| Utc.fix())
  }

  /// The instant the group's local calendar day containing `at` began.
  pub fn day_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
    let offset = self.offset();
    let midnight = at.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    offset
      .from_local_datetime(&midnight)
      .single()
      .map(|dt| dt.with_timezone(&Utc))
      .unwrap_or(at)
  }

  /// Whether `a` and `b` fall on the same local calendar day.
  pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    let offset = self.offset();
    a.with_timezone(&offset).date_naive() == b.with_timezone(&offset).date_naive()
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
  pub group_id:    Uuid,
  pub name:        String,
  pub kind:        GroupKind,
  /// The creator. Exactly one per group; never changes.
  pub owner_id:    Uuid,
  pub created_at:  DateTime<Utc>,
  pub settings:    GroupSettings,
  /// Groups are soft-disabled, never deleted.
  pub disabled_at: Option<DateTime<Utc>>,
}

impl Group {
  pub fn is_disabled(&self) -> bool { self.disabled_at.is_some() }
}

/// Input to [`crate::store::CareStore::create_group`].
#[derive(Debug, Clone)]
pub struct NewGroup {
  pub group_id:   Uuid,
  pub name:       String,
  pub kind:       GroupKind,
  pub owner_id:   Uuid,
  pub settings:   GroupSettings,
  pub created_at: DateTime<Utc>,
}
