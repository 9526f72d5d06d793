//! Care-activity events.
//!
//! Events are immutable except for their conflict metadata, which only the
//! conflict resolver writes. Soft deletion and absorption are recorded in a
//! separate append-only table; an event's status is computed at read time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::conflict::ConflictRule;

// ─── Kind ────────────────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
  EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActivityKind {
  DiaperChange,
  Feeding,
  Sleep,
  Medication,
  Medical,
  Bath,
  Milestone,
  Note,
}

impl ActivityKind {
  pub const MEDICAL: &'static [ActivityKind] = &[Self::Medical, Self::Medication];

  /// How near-simultaneous entries of this kind are reconciled.
  pub fn conflict_rule(self) -> ConflictRule {
    match self {
      Self::DiaperChange => ConflictRule::Merge,
      // Amount and type matter; two feedings are never silently merged.
      Self::Feeding => ConflictRule::Flag,
      Self::Sleep
      | Self::Medication
      | Self::Medical
      | Self::Bath
      | Self::Milestone
      | Self::Note => ConflictRule::Independent,
    }
  }
}

// ─── Conflict metadata ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "conflict", rename_all = "snake_case")]
pub enum ConflictMeta {
  /// Set on the canonical event of a merge.
  Merged {
    merged_from:         Vec<Uuid>,
    caregivers_involved: Vec<Uuid>,
  },
  /// Set on every event of a flagged same-kind pair.
  ConcurrentSameKind { with: Vec<Uuid> },
}

// ─── Event ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
  pub activity_id:  Uuid,
  pub dependent_id: Uuid,
  /// The group the logger acted through.
  pub group_id:     Uuid,
  pub kind:         ActivityKind,
  /// When the activity happened. May be in the past.
  pub logged_at:    DateTime<Utc>,
  /// Attribution only; the event is owned by the dependent's group.
  pub logged_by:    Uuid,
  pub details:      serde_json::Value,
  pub conflict:     Option<ConflictMeta>,
  /// Store-assigned, strictly increasing in insertion order. Breaks ties
  /// between events with identical `logged_at`.
  pub sequence:     i64,
  /// Server-assigned timestamp.
  pub recorded_at:  DateTime<Utc>,
}

impl ActivityEvent {
  /// Everyone who took part: the logger, plus anyone merged into this event.
  pub fn caregivers(&self) -> Vec<Uuid> {
    let mut out = vec![self.logged_by];
    if let Some(ConflictMeta::Merged { caregivers_involved, .. }) = &self.conflict {
      for id in caregivers_involved {
        if !out.contains(id) {
          out.push(*id);
        }
      }
    }
    out
  }

  /// Ordering key for "earlier": timestamp first, then insertion order.
  pub fn order_key(&self) -> (DateTime<Utc>, i64) { (self.logged_at, self.sequence) }
}

/// Caller input for logging an activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewActivity {
  pub dependent_id: Uuid,
  pub kind:         ActivityKind,
  /// Defaults to the server time when omitted.
  pub logged_at:    Option<DateTime<Utc>>,
  #[serde(default)]
  pub details:      serde_json::Value,
}

/// A fully-specified event awaiting its store-assigned sequence number.
#[derive(Debug, Clone)]
pub struct PendingActivity {
  pub activity_id:  Uuid,
  pub dependent_id: Uuid,
  pub group_id:     Uuid,
  pub kind:         ActivityKind,
  pub logged_at:    DateTime<Utc>,
  pub logged_by:    Uuid,
  pub details:      serde_json::Value,
  pub recorded_at:  DateTime<Utc>,
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActivityStatus {
  Active,
  Removed {
    by:     Uuid,
    reason: Option<String>,
    at:     DateTime<Utc>,
  },
  /// Merged into another event by the conflict resolver.
  Absorbed { into: Uuid, at: DateTime<Utc> },
}

impl ActivityStatus {
  pub fn is_active(&self) -> bool { matches!(self, Self::Active) }
}

/// An event bundled with its computed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedActivity {
  pub event:  ActivityEvent,
  pub status: ActivityStatus,
}

impl ResolvedActivity {
  pub fn id(&self) -> Uuid { self.event.activity_id }

  pub fn is_active(&self) -> bool { self.status.is_active() }
}

/// A caregiver-initiated soft delete. Hard deletes do not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityRemoval {
  pub removal_id:  Uuid,
  pub activity_id: Uuid,
  pub removed_by:  Uuid,
  pub reason:      Option<String>,
  pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RemovalOutcome {
  Removed(ActivityRemoval),
  NotFound,
  AlreadyRemoved,
}

/// An append-only note on an event. The event itself is never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
  pub annotation_id: Uuid,
  pub activity_id:   Uuid,
  pub author_id:     Uuid,
  pub note:          String,
  pub recorded_at:   DateTime<Utc>,
}

/// Parameters for [`crate::store::CareStore::list_activities`].
#[derive(Debug, Clone, Default)]
pub struct ActivityQuery {
  /// Inclusive lower bound on `logged_at`.
  pub since:            Option<DateTime<Utc>>,
  /// Inclusive upper bound on `logged_at`.
  pub until:            Option<DateTime<Utc>>,
  /// If `false`, only active events are returned.
  pub include_inactive: bool,
  /// Order newest first, so `limit` keeps the most recent events.
  pub newest_first:     bool,
  pub limit:            Option<usize>,
}
