//! End-to-end tests for the hub over an in-memory SQLite store.

mod flaky;

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures::{FutureExt as _, StreamExt as _};
use serde_json::json;
use tend_core::{
  activity::{ActivityKind, ActivityStatus, ConflictMeta, NewActivity},
  audit::AuditAction,
  clock::ManualClock,
  dependent::{AccessLevel, DependentProfile, MedicalProfile, ProfilePatch},
  group::{GroupKind, GroupSettings},
  invitation::{InvitationRestrictions, InvitationStatus},
  membership::{MembershipStatus, Role},
  permission::ExportScope,
  presence::{PresenceSignal, PresenceStatus},
  store::CareStore,
};
use tend_store_sqlite::SqliteStore;
use uuid::Uuid;

use self::flaky::FlakyStore;
use crate::{ActivityChange, ErrorKind, FeedQuery, Hub, HubConfig, Notification, RetryConfig};

fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 4, 14, 9, 0, 0).unwrap() }

fn profile(name: &str) -> DependentProfile {
  DependentProfile { display_name: name.into(), birth_date: None, medical: MedicalProfile::default() }
}

struct Family<S = SqliteStore> {
  hub:          Hub<S>,
  clock:        Arc<ManualClock>,
  owner:        Uuid,
  group_id:     Uuid,
  dependent_id: Uuid,
}

async fn sqlite() -> SqliteStore { SqliteStore::open_in_memory().await.expect("in-memory store") }

async fn family() -> Family { setup(sqlite().await, HubConfig::default()).await }

async fn setup<S: CareStore>(store: S, config: HubConfig) -> Family<S> {
  let clock = Arc::new(ManualClock::new(t0()));
  let hub = Hub::new(store, config).with_clock(clock.clone());

  let owner = Uuid::new_v4();
  let (group, _) = hub
    .create_group(owner, "Lovelace", GroupKind::Standard, GroupSettings::default())
    .await
    .unwrap();
  let (dependent, _) = hub.add_dependent(owner, group.group_id, profile("Ada")).await.unwrap();

  Family { hub, clock, owner, group_id: group.group_id, dependent_id: dependent.dependent_id }
}

/// Invite a fresh user with `role` and have them accept.
async fn join<S: CareStore>(
  f: &Family<S>,
  role: Role,
  access_expires_at: Option<DateTime<Utc>>,
) -> Uuid {
  let email = format!("{}@example.com", Uuid::new_v4().simple());
  let issued = f
    .hub
    .invite(f.owner, f.group_id, &email, role, InvitationRestrictions { access_expires_at })
    .await
    .unwrap();
  let user = Uuid::new_v4();
  f.hub.accept_invitation(user, Some(&email), &issued.token).await.unwrap();
  user
}

async fn log_with<S: CareStore>(
  f: &Family<S>,
  user: Uuid,
  kind: ActivityKind,
  at: DateTime<Utc>,
  details: serde_json::Value,
) -> crate::LoggedActivity {
  f.hub
    .log_activity(user, f.group_id, NewActivity {
      dependent_id: f.dependent_id,
      kind,
      logged_at: Some(at),
      details,
    })
    .await
    .unwrap()
}

async fn log<S: CareStore>(
  f: &Family<S>,
  user: Uuid,
  kind: ActivityKind,
  at: DateTime<Utc>,
) -> crate::LoggedActivity {
  log_with(f, user, kind, at, json!({})).await
}

// ─── Conflict resolution ─────────────────────────────────────────────────────

#[tokio::test]
async fn diaper_changes_by_two_caregivers_merge() {
  let f = family().await;
  let other = join(&f, Role::Core, None).await;

  let first = log(&f, f.owner, ActivityKind::DiaperChange, t0()).await;
  assert!(first.touched.is_empty());

  let second = log(&f, other, ActivityKind::DiaperChange, t0() + TimeDelta::minutes(2)).await;
  assert_eq!(second.activity.status, ActivityStatus::Absorbed {
    into: first.activity.id(),
    at:   t0(),
  });
  let [canonical] = &second.touched[..] else { panic!("one touched event") };
  assert_eq!(canonical.id(), first.activity.id());
  assert_eq!(
    canonical.event.conflict,
    Some(ConflictMeta::Merged {
      merged_from:         vec![second.activity.id()],
      caregivers_involved: vec![f.owner, other],
    })
  );

  let feed = f
    .hub
    .activity_feed(f.owner, f.group_id, f.dependent_id, FeedQuery::default())
    .await
    .unwrap();
  assert_eq!(feed.len(), 1);
}

#[tokio::test]
async fn feedings_are_flagged_and_kept() {
  let f = family().await;
  let other = join(&f, Role::Extended, None).await;

  let a = log(&f, f.owner, ActivityKind::Feeding, t0()).await;
  let b = log(&f, other, ActivityKind::Feeding, t0() + TimeDelta::minutes(3)).await;

  assert!(b.activity.is_active());
  assert_eq!(
    b.activity.event.conflict,
    Some(ConflictMeta::ConcurrentSameKind { with: vec![a.activity.id()] })
  );
  let [flagged] = &b.touched[..] else { panic!("one touched event") };
  assert_eq!(
    flagged.event.conflict,
    Some(ConflictMeta::ConcurrentSameKind { with: vec![b.activity.id()] })
  );
}

#[tokio::test]
async fn same_caregiver_or_kind_mismatch_never_conflicts() {
  let f = family().await;
  let other = join(&f, Role::Core, None).await;

  log(&f, f.owner, ActivityKind::DiaperChange, t0()).await;
  let again = log(&f, f.owner, ActivityKind::DiaperChange, t0() + TimeDelta::minutes(1)).await;
  assert!(again.activity.is_active() && again.touched.is_empty());

  let sleep = log(&f, other, ActivityKind::Sleep, t0() + TimeDelta::minutes(1)).await;
  assert!(sleep.activity.event.conflict.is_none() && sleep.touched.is_empty());

  let late = log(&f, other, ActivityKind::DiaperChange, t0() - TimeDelta::minutes(30)).await;
  assert!(late.activity.is_active() && late.touched.is_empty());
}

#[tokio::test]
async fn reconcile_is_idempotent() {
  let f = family().await;
  let other = join(&f, Role::Core, None).await;
  let first = log(&f, f.owner, ActivityKind::DiaperChange, t0()).await;
  let second = log(&f, other, ActivityKind::DiaperChange, t0() + TimeDelta::minutes(1)).await;

  for id in [first.activity.id(), second.activity.id()] {
    let again = f.hub.reconcile(f.owner, f.group_id, id).await.unwrap();
    assert!(again.touched.is_empty());
  }
  let canonical = f.hub.reconcile(f.owner, f.group_id, first.activity.id()).await.unwrap().activity;
  assert_eq!(canonical, second.touched[0]);
}

#[tokio::test]
async fn future_entries_are_rejected() {
  let f = family().await;
  let err = f
    .hub
    .log_activity(f.owner, f.group_id, NewActivity {
      dependent_id: f.dependent_id,
      kind:         ActivityKind::Note,
      logged_at:    Some(t0() + TimeDelta::hours(1)),
      details:      json!({}),
    })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn reconcile_needs_edit_rights() {
  let f = family().await;
  let aunt = join(&f, Role::Extended, None).await;
  let entry = log(&f, f.owner, ActivityKind::DiaperChange, t0()).await;

  let err = f.hub.reconcile(aunt, f.group_id, entry.activity.id()).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::RoleInsufficient);
  let outsider = f.hub.reconcile(Uuid::new_v4(), f.group_id, entry.activity.id()).await.unwrap_err();
  assert_eq!(outsider.kind(), ErrorKind::NotMember);
}

#[tokio::test]
async fn concurrent_diaper_changes_collapse_to_one_entry() {
  let f = family().await;
  let (b, c) = (join(&f, Role::Core, None).await, join(&f, Role::Extended, None).await);

  tokio::join!(
    log(&f, f.owner, ActivityKind::DiaperChange, t0()),
    log(&f, b, ActivityKind::DiaperChange, t0() + TimeDelta::minutes(1)),
    log(&f, c, ActivityKind::DiaperChange, t0() + TimeDelta::minutes(2)),
  );

  let feed = f
    .hub
    .activity_feed(f.owner, f.group_id, f.dependent_id, FeedQuery::default())
    .await
    .unwrap();
  let [survivor] = &feed[..] else { panic!("expected one visible entry, got {}", feed.len()) };
  let Some(ConflictMeta::Merged { merged_from, caregivers_involved }) = &survivor.event.conflict
  else {
    panic!("expected merge metadata");
  };
  assert_eq!(merged_from.len(), 2);
  let mut involved = caregivers_involved.clone();
  involved.sort();
  let mut expected = vec![f.owner, b, c];
  expected.sort();
  assert_eq!(involved, expected);
}

#[tokio::test]
async fn loggers_only_get_back_what_they_may_read() {
  let f = family().await;
  let aide = join(&f, Role::Institutional, Some(t0() + TimeDelta::days(30))).await;
  let private = json!({ "ml": 120, "note": "private" });

  // Flagged against an entry from today: visible, but without details.
  let owners = log_with(&f, f.owner, ActivityKind::Feeding, t0(), private.clone()).await;
  let mine = log_with(&f, aide, ActivityKind::Feeding, t0() + TimeDelta::minutes(2), json!({ "ml": 90 })).await;
  let [flagged] = &mine.touched[..] else { panic!("one touched event") };
  assert_eq!(flagged.id(), owners.activity.id());
  assert!(flagged.event.details.is_null());
  assert!(mine.activity.event.details.is_null());

  // Flagged against an entry from yesterday: not returned at all.
  let midnight = Utc.with_ymd_and_hms(2026, 4, 14, 0, 0, 0).unwrap();
  log_with(&f, f.owner, ActivityKind::Feeding, midnight - TimeDelta::minutes(1), private).await;
  let early = log(&f, aide, ActivityKind::Feeding, midnight + TimeDelta::minutes(1)).await;
  assert!(early.activity.event.conflict.is_some());
  assert!(early.touched.is_empty());

  // The owner still sees everything.
  let full = log(&f, f.owner, ActivityKind::Feeding, t0() + TimeDelta::minutes(3)).await;
  assert!(full.touched.iter().any(|t| t.event.details == json!({ "ml": 90 })));
}

fn fast_retry() -> HubConfig {
  HubConfig { retry: RetryConfig { max_attempts: 3, base_delay_ms: 1 }, ..HubConfig::default() }
}

#[tokio::test]
async fn busy_reads_during_reconciliation_are_retried() {
  let f = setup(FlakyStore::new(sqlite().await), fast_retry()).await;
  let other = join(&f, Role::Core, None).await;

  let first = log(&f, f.owner, ActivityKind::DiaperChange, t0()).await;
  f.hub.store().fail_lists(2);
  let second = log(&f, other, ActivityKind::DiaperChange, t0() + TimeDelta::minutes(1)).await;

  assert!(!second.activity.is_active());
  assert_eq!(second.touched[0].id(), first.activity.id());
}

#[tokio::test]
async fn committed_entry_survives_a_failed_reconciliation() {
  let f = setup(FlakyStore::new(sqlite().await), fast_retry()).await;
  let other = join(&f, Role::Core, None).await;

  log(&f, f.owner, ActivityKind::DiaperChange, t0()).await;
  f.hub.store().fail_lists(3);
  let second = log(&f, other, ActivityKind::DiaperChange, t0() + TimeDelta::minutes(1)).await;
  assert!(second.activity.is_active() && second.touched.is_empty());

  let feed = f
    .hub
    .activity_feed(f.owner, f.group_id, f.dependent_id, FeedQuery::default())
    .await
    .unwrap();
  assert_eq!(feed.len(), 2);

  // A later pass picks the entry up.
  let settled = f.hub.reconcile(f.owner, f.group_id, second.activity.id()).await.unwrap();
  assert!(!settled.activity.is_active());
}

// ─── Permissions ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn institutional_session_ends_after_the_ceiling() {
  let f = family().await;
  let aide = join(&f, Role::Institutional, Some(t0() + TimeDelta::days(30))).await;
  f.hub.update_presence(aide, f.group_id, PresenceSignal::Heartbeat { status: None }).await.unwrap();

  f.clock.advance(TimeDelta::hours(7) + TimeDelta::minutes(59));
  log(&f, aide, ActivityKind::DiaperChange, f.hub.now()).await;

  f.clock.set(t0() + TimeDelta::hours(8) + TimeDelta::minutes(1));
  let err = f
    .hub
    .log_activity(aide, f.group_id, NewActivity {
      dependent_id: f.dependent_id,
      kind:         ActivityKind::DiaperChange,
      logged_at:    None,
      details:      json!({}),
    })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::SessionExpired);
}

#[tokio::test]
async fn institutional_access_expires() {
  let f = family().await;
  let aide = join(&f, Role::Institutional, Some(t0() + TimeDelta::hours(2))).await;
  f.clock.advance(TimeDelta::hours(2));
  let err = f.hub.group_presence(aide, f.group_id).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::SessionExpired);
}

#[tokio::test]
async fn extended_members_edit_only_their_own_entries() {
  let f = family().await;
  let aunt = join(&f, Role::Extended, None).await;

  let owners = log(&f, f.owner, ActivityKind::Note, t0()).await;
  let err = f
    .hub
    .remove_activity(aunt, f.group_id, owners.activity.id(), None)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::RoleInsufficient);

  let hers = log(&f, aunt, ActivityKind::Note, t0()).await;
  let removed = f
    .hub
    .remove_activity(aunt, f.group_id, hers.activity.id(), Some("typo".into()))
    .await
    .unwrap();
  assert!(matches!(removed.status, ActivityStatus::Removed { by, .. } if by == aunt));

  let err = f
    .hub
    .remove_activity(f.owner, f.group_id, hers.activity.id(), None)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::AlreadyRemoved);
}

#[tokio::test]
async fn annotations_follow_edit_rights() {
  let f = family().await;
  let aunt = join(&f, Role::Extended, None).await;
  let entry = log(&f, f.owner, ActivityKind::Bath, t0()).await;

  let note = f.hub.annotate_activity(f.owner, f.group_id, entry.activity.id(), " warm ").await.unwrap();
  assert_eq!(note.note, "warm");
  let err = f
    .hub
    .annotate_activity(aunt, f.group_id, entry.activity.id(), "cold")
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::RoleInsufficient);
}

#[tokio::test]
async fn annotations_wait_for_the_dependent_lock() {
  let f = family().await;
  let entry = log(&f, f.owner, ActivityKind::Bath, t0()).await;

  let held = f.hub.locks.lock(f.dependent_id).await;
  let blocked = tokio::time::timeout(
    std::time::Duration::from_millis(20),
    f.hub.annotate_activity(f.owner, f.group_id, entry.activity.id(), "warm"),
  )
  .await;
  assert!(blocked.is_err());

  drop(held);
  f.hub.annotate_activity(f.owner, f.group_id, entry.activity.id(), "warm").await.unwrap();
}

#[tokio::test]
async fn professionals_see_their_relevant_scope() {
  let f = family().await;
  let doctor = join(&f, Role::Professional, None).await;
  log(&f, f.owner, ActivityKind::Feeding, t0()).await;
  let dose = log(&f, f.owner, ActivityKind::Medication, t0()).await;

  let feed = f
    .hub
    .activity_feed(doctor, f.group_id, f.dependent_id, FeedQuery::default())
    .await
    .unwrap();
  assert_eq!(feed.iter().map(|a| a.id()).collect::<Vec<_>>(), vec![dose.activity.id()]);

  let medical = ProfilePatch {
    medical: Some(MedicalProfile { allergies: vec!["peanuts".into()], ..Default::default() }),
    ..Default::default()
  };
  let updated = f.hub.update_profile(doctor, f.group_id, f.dependent_id, medical).await.unwrap();
  assert_eq!(updated.profile.medical.allergies, vec!["peanuts".to_string()]);

  let rename = ProfilePatch { display_name: Some("Augusta".into()), ..Default::default() };
  let err = f.hub.update_profile(doctor, f.group_id, f.dependent_id, rename).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::RoleInsufficient);
}

#[tokio::test]
async fn exports_are_scoped_and_audited() {
  let f = family().await;
  let doctor = join(&f, Role::Professional, None).await;
  log(&f, f.owner, ActivityKind::Medical, t0()).await;
  log(&f, f.owner, ActivityKind::Sleep, t0()).await;

  let err = f.hub.export(doctor, f.group_id, f.dependent_id, ExportScope::Full).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::RoleInsufficient);

  let report = f.hub.export(doctor, f.group_id, f.dependent_id, ExportScope::Report).await.unwrap();
  assert_eq!(report.activities.len(), 1);

  let full = f.hub.export(f.owner, f.group_id, f.dependent_id, ExportScope::Full).await.unwrap();
  assert_eq!(full.activities.len(), 2);

  let audit = f.hub.audit_log(f.owner, f.group_id, Some(2)).await.unwrap();
  assert!(audit.iter().all(|e| e.action == AuditAction::DataExported));
  assert_eq!(audit[0].actor_id, f.owner);
  assert_eq!(audit[1].actor_id, doctor);
}

#[tokio::test]
async fn grants_extend_visibility_to_other_groups() {
  let f = family().await;
  let nanny = Uuid::new_v4();
  let (agency, _) = f
    .hub
    .create_group(nanny, "Agency", GroupKind::Institutional, GroupSettings::default())
    .await
    .unwrap();

  let err = f
    .hub
    .activity_feed(nanny, agency.group_id, f.dependent_id, FeedQuery::default())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::GrantMissing);

  f.hub
    .set_grant(f.owner, f.dependent_id, agency.group_id, AccessLevel::ReadOnly, None)
    .await
    .unwrap();
  let visible = f.hub.visible_dependents(nanny, agency.group_id).await.unwrap();
  assert_eq!(visible.len(), 1);
  assert_eq!(visible[0].access_level, AccessLevel::ReadOnly);

  let err = f
    .hub
    .log_activity(nanny, agency.group_id, NewActivity {
      dependent_id: f.dependent_id,
      kind:         ActivityKind::Note,
      logged_at:    None,
      details:      json!({}),
    })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::GrantInsufficient);

  let err = f
    .hub
    .set_grant(nanny, f.dependent_id, agency.group_id, AccessLevel::Full, None)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::NotMember);
}

// ─── Membership ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn last_core_member_cannot_leave_or_step_down() {
  let f = family().await;

  let err = f.hub.remove_member(f.owner, f.group_id, f.owner).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::LastCoreMember);
  let err = f.hub.change_role(f.owner, f.group_id, f.owner, Role::Extended).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::LastCoreMember);

  let partner = join(&f, Role::Core, None).await;
  let left = f.hub.remove_member(f.owner, f.group_id, f.owner).await.unwrap();
  assert_eq!(left.status, MembershipStatus::Inactive);

  let active = f.hub.list_members(partner, f.group_id, true).await.unwrap();
  assert_eq!(active.iter().map(|m| m.user_id).collect::<Vec<_>>(), vec![partner]);
}

#[tokio::test]
async fn only_core_members_manage_others() {
  let f = family().await;
  let aunt = join(&f, Role::Extended, None).await;
  let uncle = join(&f, Role::Extended, None).await;

  let err = f.hub.remove_member(aunt, f.group_id, uncle).await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::RoleInsufficient);

  let left = f.hub.remove_member(aunt, f.group_id, aunt).await.unwrap();
  assert_eq!(left.status, MembershipStatus::Inactive);

  let err = f
    .hub
    .set_member_status(f.owner, f.group_id, uncle, MembershipStatus::Expired)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

// ─── Invitations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn invitation_tokens_are_single_use() {
  let f = family().await;
  let issued = f
    .hub
    .invite(f.owner, f.group_id, "Grace@Example.com ", Role::Extended, Default::default())
    .await
    .unwrap();
  assert_eq!(issued.invitation.email, "grace@example.com");

  let grace = Uuid::new_v4();
  let err = f
    .hub
    .accept_invitation(grace, Some("someone@else.org"), &issued.token)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::EmailMismatch);

  let membership =
    f.hub.accept_invitation(grace, Some("grace@example.com"), &issued.token).await.unwrap();
  assert_eq!(membership.role, Role::Extended);

  let err = f
    .hub
    .accept_invitation(Uuid::new_v4(), Some("grace@example.com"), &issued.token)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TokenAlreadyUsed);

  let err = f.hub.accept_invitation(grace, Some("grace@example.com"), "nope").await.unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TokenInvalid);
}

#[tokio::test]
async fn invitations_expire_and_can_be_revoked() {
  let f = family().await;
  let late = f
    .hub
    .invite(f.owner, f.group_id, "late@example.com", Role::Extended, Default::default())
    .await
    .unwrap();
  let revoked = f
    .hub
    .invite(f.owner, f.group_id, "gone@example.com", Role::Extended, Default::default())
    .await
    .unwrap();
  f.hub.revoke_invitation(f.owner, f.group_id, revoked.invitation.invitation_id).await.unwrap();

  let err = f
    .hub
    .accept_invitation(Uuid::new_v4(), Some("gone@example.com"), &revoked.token)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TokenAlreadyUsed);

  f.clock.advance(TimeDelta::days(8));
  let err = f
    .hub
    .accept_invitation(Uuid::new_v4(), Some("late@example.com"), &late.token)
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::TokenExpired);

  let listed = f.hub.list_invitations(f.owner, f.group_id).await.unwrap();
  let status_of = |id| listed.iter().find(|i| i.invitation_id == id).map(|i| i.status);
  assert_eq!(status_of(late.invitation.invitation_id), Some(InvitationStatus::Expired));
  assert_eq!(status_of(revoked.invitation.invitation_id), Some(InvitationStatus::Revoked));
}

#[tokio::test]
async fn institutional_invitations_need_an_expiry() {
  let f = family().await;
  let err = f
    .hub
    .invite(f.owner, f.group_id, "aide@daycare.org", Role::Institutional, Default::default())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

// ─── Presence ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn presence_goes_offline_after_ninety_seconds() {
  let f = family().await;
  f.hub
    .update_presence(f.owner, f.group_id, PresenceSignal::Caring {
      dependent_id: Some(f.dependent_id),
      activity:     Some("bath time".into()),
    })
    .await
    .unwrap();

  f.clock.advance(TimeDelta::seconds(90));
  let seen = f.hub.group_presence(f.owner, f.group_id).await.unwrap();
  assert_eq!(seen[0].status, PresenceStatus::Caring);
  assert_eq!(seen[0].dependent_id, Some(f.dependent_id));

  f.clock.advance(TimeDelta::seconds(1));
  let seen = f.hub.group_presence(f.owner, f.group_id).await.unwrap();
  assert_eq!(seen[0].status, PresenceStatus::Offline);
  assert_eq!(seen[0].dependent_id, None);
}

#[tokio::test]
async fn caring_for_an_invisible_dependent_is_refused() {
  let f = family().await;
  let err = f
    .hub
    .update_presence(f.owner, f.group_id, PresenceSignal::Caring {
      dependent_id: Some(Uuid::new_v4()),
      activity:     None,
    })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::GrantMissing);
}

// ─── Groups ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn personal_group_is_created_once() {
  let f = family().await;
  let me = Uuid::new_v4();
  let a = f.hub.ensure_personal_group(me).await.unwrap();
  let b = f.hub.ensure_personal_group(me).await.unwrap();
  assert_eq!(a.group_id, b.group_id);
  assert_eq!(a.kind, GroupKind::Personal);

  let err = f
    .hub
    .create_group(me, "Mine", GroupKind::Personal, GroupSettings::default())
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn disabled_groups_are_read_only() {
  let f = family().await;
  log(&f, f.owner, ActivityKind::Note, t0()).await;
  let disabled = f.hub.disable_group(f.owner, f.group_id).await.unwrap();
  assert!(disabled.is_disabled());
  assert_eq!(f.hub.disable_group(f.owner, f.group_id).await.unwrap().disabled_at, disabled.disabled_at);

  let err = f
    .hub
    .log_activity(f.owner, f.group_id, NewActivity {
      dependent_id: f.dependent_id,
      kind:         ActivityKind::Note,
      logged_at:    None,
      details:      json!({}),
    })
    .await
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidInput);

  let feed = f
    .hub
    .activity_feed(f.owner, f.group_id, f.dependent_id, FeedQuery::default())
    .await
    .unwrap();
  assert_eq!(feed.len(), 1);
}

// ─── End to end ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn institutional_observer_streams_only_today() {
  let f = family().await;
  let aide = join(&f, Role::Institutional, Some(t0() + TimeDelta::days(30))).await;
  f.hub.update_presence(aide, f.group_id, PresenceSignal::Heartbeat { status: None }).await.unwrap();
  let mut stream = f.hub.subscribe(aide, f.group_id).await.unwrap();

  f.hub
    .log_activity(f.owner, f.group_id, NewActivity {
      dependent_id: f.dependent_id,
      kind:         ActivityKind::Feeding,
      logged_at:    Some(t0() - TimeDelta::days(1)),
      details:      json!({ "ml": 120 }),
    })
    .await
    .unwrap();
  let today = f
    .hub
    .log_activity(f.owner, f.group_id, NewActivity {
      dependent_id: f.dependent_id,
      kind:         ActivityKind::DiaperChange,
      logged_at:    None,
      details:      json!({ "wet": true }),
    })
    .await
    .unwrap();

  let Some(Some(Notification::Activity { change, activity, .. })) = stream.next().now_or_never()
  else {
    panic!("expected an activity notification");
  };
  assert_eq!(change, ActivityChange::Logged);
  assert_eq!(activity.id(), today.activity.id());
  assert!(activity.event.details.is_null());
  assert!(stream.next().now_or_never().is_none());

  let feed = f
    .hub
    .activity_feed(aide, f.group_id, f.dependent_id, FeedQuery::default())
    .await
    .unwrap();
  assert_eq!(feed.len(), 1);
  assert!(feed[0].event.details.is_null());

  let owner_feed = f
    .hub
    .activity_feed(f.owner, f.group_id, f.dependent_id, FeedQuery::default())
    .await
    .unwrap();
  assert_eq!(owner_feed.len(), 2);
  assert_eq!(owner_feed[1].event.details, json!({ "wet": true }));
}
