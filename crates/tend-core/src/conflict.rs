//! Write-time reconciliation of near-simultaneous entries.
//!
//! [`resolve`] is pure: it looks at a freshly persisted event and the
//! dependent's recent events, and describes the ledger changes to make. The
//! caller applies the [`Resolution`] while holding the dependent's write lock.
//!
//! Policy, first match wins:
//!
//! 1. [`ConflictRule::Merge`] kinds within the window: the earlier event
//!    (by `logged_at`, then insertion sequence) becomes canonical and absorbs
//!    the later one.
//! 2. [`ConflictRule::Flag`] kinds within the window: every event involved is
//!    tagged [`ConflictMeta::ConcurrentSameKind`] and kept.
//! 3. Anything else: no change.
//!
//! Only entries logged by different caregivers are compared. Running the
//! resolver again over an already reconciled pair yields an empty resolution.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::{ActivityEvent, ConflictMeta, ResolvedActivity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictRule {
  Merge,
  Flag,
  Independent,
}

#[derive(Debug, Clone, Copy)]
pub struct ConflictPolicy {
  /// Two entries further apart than this never conflict.
  pub window: TimeDelta,
}

impl Default for ConflictPolicy {
  fn default() -> Self { Self { window: TimeDelta::minutes(5) } }
}

/// New conflict metadata for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictUpdate {
  pub activity_id: Uuid,
  pub conflict:    ConflictMeta,
}

/// `absorbed` is soft-deleted with a back-reference to `into`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Absorption {
  pub absorbed: Uuid,
  pub into:     Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
  pub updates:    Vec<ConflictUpdate>,
  pub absorption: Option<Absorption>,
}

impl Resolution {
  pub fn is_noop(&self) -> bool { self.updates.is_empty() && self.absorption.is_none() }

  /// Every event this resolution writes to.
  pub fn touched(&self) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = self.updates.iter().map(|u| u.activity_id).collect();
    if let Some(a) = self.absorption {
      push_unique(&mut ids, a.absorbed);
      push_unique(&mut ids, a.into);
    }
    ids
  }
}

/// Decide how `incoming` relates to the dependent's `recent` events.
///
/// `recent` may contain `incoming` itself and inactive events; both are
/// ignored as candidates.
pub fn resolve(
  incoming: &ResolvedActivity,
  recent: &[ResolvedActivity],
  policy: &ConflictPolicy,
) -> Resolution {
  if !incoming.is_active() {
    return Resolution::default();
  }
  let inc = &incoming.event;

  let candidates: Vec<&ActivityEvent> = recent
    .iter()
    .filter(|r| r.is_active())
    .map(|r| &r.event)
    .filter(|e| is_candidate(inc, e, policy))
    .collect();

  if candidates.is_empty() {
    return Resolution::default();
  }

  match inc.kind.conflict_rule() {
    ConflictRule::Merge => merge(inc, &candidates),
    ConflictRule::Flag => flag(inc, &candidates),
    ConflictRule::Independent => Resolution::default(),
  }
}

fn is_candidate(incoming: &ActivityEvent, other: &ActivityEvent, policy: &ConflictPolicy) -> bool {
  other.activity_id != incoming.activity_id
    && other.dependent_id == incoming.dependent_id
    && other.kind == incoming.kind
    && distance_ms(incoming, other) <= policy.window.num_milliseconds()
    && !other.caregivers().contains(&incoming.logged_by)
}

fn distance_ms(a: &ActivityEvent, b: &ActivityEvent) -> i64 {
  (a.logged_at - b.logged_at).num_milliseconds().abs()
}

fn merge(incoming: &ActivityEvent, candidates: &[&ActivityEvent]) -> Resolution {
  // Pairwise against the nearest candidate. With several caregivers in one
  // window this runs once per append, always against the current canonical.
  let Some(nearest) = candidates
    .iter()
    .min_by_key(|c| (distance_ms(incoming, c), c.sequence))
  else {
    return Resolution::default();
  };

  let (canonical, absorbed) = if nearest.order_key() <= incoming.order_key() {
    (*nearest, incoming)
  } else {
    (incoming, *nearest)
  };

  let mut merged_from = merged_ids(canonical);
  push_unique(&mut merged_from, absorbed.activity_id);
  for id in merged_ids(absorbed) {
    push_unique(&mut merged_from, id);
  }

  let mut caregivers = canonical.caregivers();
  for id in absorbed.caregivers() {
    push_unique(&mut caregivers, id);
  }

  let meta = ConflictMeta::Merged { merged_from, caregivers_involved: caregivers };

  let mut resolution = Resolution {
    updates:    Vec::new(),
    absorption: Some(Absorption {
      absorbed: absorbed.activity_id,
      into:     canonical.activity_id,
    }),
  };
  if canonical.conflict.as_ref() != Some(&meta) {
    resolution.updates.push(ConflictUpdate {
      activity_id: canonical.activity_id,
      conflict:    meta,
    });
  }
  resolution
}

fn flag(incoming: &ActivityEvent, candidates: &[&ActivityEvent]) -> Resolution {
  let mut updates = Vec::new();

  let mut with = flagged_ids(incoming);
  for c in candidates {
    push_unique(&mut with, c.activity_id);
  }
  let meta = ConflictMeta::ConcurrentSameKind { with };
  if incoming.conflict.as_ref() != Some(&meta) {
    updates.push(ConflictUpdate { activity_id: incoming.activity_id, conflict: meta });
  }

  for c in candidates {
    let mut with = flagged_ids(c);
    push_unique(&mut with, incoming.activity_id);
    let meta = ConflictMeta::ConcurrentSameKind { with };
    if c.conflict.as_ref() != Some(&meta) {
      updates.push(ConflictUpdate { activity_id: c.activity_id, conflict: meta });
    }
  }

  Resolution { updates, absorption: None }
}

fn merged_ids(event: &ActivityEvent) -> Vec<Uuid> {
  match &event.conflict {
    Some(ConflictMeta::Merged { merged_from, .. }) => merged_from.clone(),
    _ => Vec::new(),
  }
}

fn flagged_ids(event: &ActivityEvent) -> Vec<Uuid> {
  match &event.conflict {
    Some(ConflictMeta::ConcurrentSameKind { with }) => with.clone(),
    _ => Vec::new(),
  }
}

fn push_unique(ids: &mut Vec<Uuid>, id: Uuid) {
  if !ids.contains(&id) {
    ids.push(id);
  }
}

#[cfg(test)]
mod tests {
  use chrono::{DateTime, TimeZone, Utc};

  use super::*;
  use crate::activity::{ActivityKind, ActivityStatus};

  struct Ledger {
    entries: Vec<ResolvedActivity>,
    next:    i64,
  }

  impl Ledger {
    fn new() -> Self { Self { entries: Vec::new(), next: 1 } }

    fn log(&mut self, kind: ActivityKind, by: Uuid, minute: i64) -> ResolvedActivity {
      let dependent_id = Uuid::from_u128(7);
      let entry = ResolvedActivity {
        event:  ActivityEvent {
          activity_id: Uuid::new_v4(),
          dependent_id,
          group_id: Uuid::nil(),
          kind,
          logged_at: base() + TimeDelta::minutes(minute),
          logged_by: by,
          details: serde_json::Value::Null,
          conflict: None,
          sequence: self.next,
          recorded_at: base(),
        },
        status: ActivityStatus::Active,
      };
      self.next += 1;
      self.entries.push(entry.clone());
      entry
    }

    fn apply(&mut self, resolution: &Resolution) {
      for u in &resolution.updates {
        if let Some(e) = self.entries.iter_mut().find(|e| e.id() == u.activity_id) {
          e.event.conflict = Some(u.conflict.clone());
        }
      }
      if let Some(a) = resolution.absorption
        && let Some(e) = self.entries.iter_mut().find(|e| e.id() == a.absorbed)
        && e.is_active()
      {
        e.status = ActivityStatus::Absorbed { into: a.into, at: base() };
      }
    }

    fn get(&self, id: Uuid) -> &ResolvedActivity {
      self.entries.iter().find(|e| e.id() == id).unwrap()
    }

    fn resolve_and_apply(&mut self, id: Uuid) -> Resolution {
      let incoming = self.get(id).clone();
      let r = resolve(&incoming, &self.entries, &ConflictPolicy::default());
      self.apply(&r);
      r
    }

    fn visible(&self) -> Vec<&ResolvedActivity> {
      self.entries.iter().filter(|e| e.is_active()).collect()
    }
  }

  fn base() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 2, 3, 8, 0, 0).unwrap() }

  fn user(n: u128) -> Uuid { Uuid::from_u128(n) }

  #[test]
  fn diaper_changes_three_minutes_apart_merge() {
    let mut ledger = Ledger::new();
    let a = ledger.log(ActivityKind::DiaperChange, user(1), 0);
    ledger.resolve_and_apply(a.id());
    let b = ledger.log(ActivityKind::DiaperChange, user(2), 3);
    ledger.resolve_and_apply(b.id());

    let visible = ledger.visible();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id(), a.id());
    assert_eq!(visible[0].event.logged_at, base());
    assert_eq!(
      visible[0].event.conflict,
      Some(ConflictMeta::Merged {
        merged_from:         vec![b.id()],
        caregivers_involved: vec![user(1), user(2)],
      })
    );
    assert_eq!(
      ledger.get(b.id()).status,
      ActivityStatus::Absorbed { into: a.id(), at: base() }
    );
  }

  #[test]
  fn retroactive_earlier_entry_becomes_canonical() {
    let mut ledger = Ledger::new();
    let late = ledger.log(ActivityKind::DiaperChange, user(1), 4);
    let early = ledger.log(ActivityKind::DiaperChange, user(2), 1);
    let r = ledger.resolve_and_apply(early.id());
    assert_eq!(r.absorption, Some(Absorption { absorbed: late.id(), into: early.id() }));
  }

  #[test]
  fn equal_timestamps_break_ties_by_insertion_order() {
    let mut ledger = Ledger::new();
    let first = ledger.log(ActivityKind::DiaperChange, user(1), 2);
    let second = ledger.log(ActivityKind::DiaperChange, user(2), 2);
    let r = ledger.resolve_and_apply(second.id());
    assert_eq!(r.absorption, Some(Absorption { absorbed: second.id(), into: first.id() }));
  }

  #[test]
  fn feedings_two_minutes_apart_are_flagged_not_merged() {
    let mut ledger = Ledger::new();
    let a = ledger.log(ActivityKind::Feeding, user(1), 0);
    ledger.resolve_and_apply(a.id());
    let b = ledger.log(ActivityKind::Feeding, user(2), 2);
    ledger.resolve_and_apply(b.id());

    let visible = ledger.visible();
    assert_eq!(visible.len(), 2);
    assert_eq!(
      ledger.get(a.id()).event.conflict,
      Some(ConflictMeta::ConcurrentSameKind { with: vec![b.id()] })
    );
    assert_eq!(
      ledger.get(b.id()).event.conflict,
      Some(ConflictMeta::ConcurrentSameKind { with: vec![a.id()] })
    );
  }

  #[test]
  fn different_kinds_do_not_conflict() {
    let mut ledger = Ledger::new();
    let a = ledger.log(ActivityKind::DiaperChange, user(1), 0);
    ledger.resolve_and_apply(a.id());
    let b = ledger.log(ActivityKind::Feeding, user(2), 1);
    let r = ledger.resolve_and_apply(b.id());
    assert!(r.is_noop());
    assert!(ledger.entries.iter().all(|e| e.is_active() && e.event.conflict.is_none()));
  }

  #[test]
  fn outside_window_does_not_conflict() {
    let mut ledger = Ledger::new();
    ledger.log(ActivityKind::DiaperChange, user(1), 0);
    let b = ledger.log(ActivityKind::DiaperChange, user(2), 6);
    assert!(ledger.resolve_and_apply(b.id()).is_noop());
  }

  #[test]
  fn same_caregiver_twice_is_not_a_duplicate() {
    let mut ledger = Ledger::new();
    ledger.log(ActivityKind::DiaperChange, user(1), 0);
    let b = ledger.log(ActivityKind::DiaperChange, user(1), 2);
    assert!(ledger.resolve_and_apply(b.id()).is_noop());
  }

  #[test]
  fn running_twice_is_idempotent() {
    for kind in [ActivityKind::DiaperChange, ActivityKind::Feeding] {
      let mut ledger = Ledger::new();
      let a = ledger.log(kind, user(1), 0);
      let b = ledger.log(kind, user(2), 1);
      ledger.resolve_and_apply(b.id());
      let once = ledger.entries.clone();

      assert!(ledger.resolve_and_apply(b.id()).is_noop());
      assert!(ledger.resolve_and_apply(a.id()).is_noop());
      assert_eq!(ledger.entries, once);
    }
  }

  #[test]
  fn three_caregivers_collapse_pairwise_into_one() {
    let mut ledger = Ledger::new();
    let a = ledger.log(ActivityKind::DiaperChange, user(1), 0);
    ledger.resolve_and_apply(a.id());
    let b = ledger.log(ActivityKind::DiaperChange, user(2), 2);
    ledger.resolve_and_apply(b.id());
    let c = ledger.log(ActivityKind::DiaperChange, user(3), 4);
    ledger.resolve_and_apply(c.id());

    let visible = ledger.visible();
    assert_eq!(visible.len(), 1);
    assert_eq!(
      visible[0].event.conflict,
      Some(ConflictMeta::Merged {
        merged_from:         vec![b.id(), c.id()],
        caregivers_involved: vec![user(1), user(2), user(3)],
      })
    );
  }

  #[test]
  fn caregiver_already_merged_is_not_merged_again() {
    let mut ledger = Ledger::new();
    let a = ledger.log(ActivityKind::DiaperChange, user(1), 0);
    let b = ledger.log(ActivityKind::DiaperChange, user(2), 1);
    ledger.resolve_and_apply(b.id());
    let again = ledger.log(ActivityKind::DiaperChange, user(2), 3);
    assert!(ledger.resolve_and_apply(again.id()).is_noop());
    assert!(ledger.get(a.id()).is_active());
  }
}
