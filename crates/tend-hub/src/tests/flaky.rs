//! A store that reports a busy database on `list_activities` a set number
//! of times before passing calls through.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use tend_core::{
  activity::{
    ActivityEvent, ActivityQuery, ActivityRemoval, Annotation, PendingActivity, RemovalOutcome,
    ResolvedActivity,
  },
  audit::AuditLogEntry,
  conflict::Resolution,
  dependent::{Dependent, DependentAccessGrant, DependentProfile, NewDependent},
  group::{Group, NewGroup},
  invitation::{Invitation, Redemption, RedemptionOutcome},
  membership::{Membership, MembershipUpdate, MembershipUpdateOutcome, NewMembership},
  store::{CareStore, StoreError},
};
use tend_store_sqlite::SqliteStore;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum FlakyError {
  #[error("database is busy")]
  Busy,
  #[error(transparent)]
  Inner(#[from] tend_store_sqlite::Error),
}

impl StoreError for FlakyError {
  fn is_transient(&self) -> bool {
    match self {
      FlakyError::Busy => true,
      FlakyError::Inner(e) => e.is_transient(),
    }
  }
}

type Result<T> = std::result::Result<T, FlakyError>;

pub struct FlakyStore {
  inner:      SqliteStore,
  busy_lists: AtomicU32,
}

impl FlakyStore {
  pub fn new(inner: SqliteStore) -> Self { Self { inner, busy_lists: AtomicU32::new(0) } }

  /// Fail the next `n` `list_activities` calls.
  pub fn fail_lists(&self, n: u32) { self.busy_lists.store(n, Ordering::SeqCst); }

  fn take_failure(&self) -> bool {
    self.busy_lists.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
  }
}

impl CareStore for FlakyStore {
  type Error = FlakyError;

  async fn create_group(&self, input: NewGroup) -> Result<(Group, Membership)> {
    Ok(self.inner.create_group(input).await?)
  }

  async fn get_group(&self, group_id: Uuid) -> Result<Option<Group>> {
    Ok(self.inner.get_group(group_id).await?)
  }

  async fn list_groups_for_user(&self, user_id: Uuid) -> Result<Vec<Group>> {
    Ok(self.inner.list_groups_for_user(user_id).await?)
  }

  async fn disable_group(
    &self,
    group_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Option<Group>> {
    Ok(self.inner.disable_group(group_id, actor_id, at).await?)
  }

  async fn add_dependent(&self, input: NewDependent) -> Result<(Dependent, DependentAccessGrant)> {
    Ok(self.inner.add_dependent(input).await?)
  }

  async fn get_dependent(&self, dependent_id: Uuid) -> Result<Option<Dependent>> {
    Ok(self.inner.get_dependent(dependent_id).await?)
  }

  async fn list_dependents(&self, group_id: Uuid) -> Result<Vec<(Dependent, DependentAccessGrant)>> {
    Ok(self.inner.list_dependents(group_id).await?)
  }

  async fn update_profile(
    &self,
    dependent_id: Uuid,
    profile: DependentProfile,
    group_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Option<Dependent>> {
    Ok(self.inner.update_profile(dependent_id, profile, group_id, actor_id, at).await?)
  }

  async fn upsert_grant(&self, grant: DependentAccessGrant) -> Result<DependentAccessGrant> {
    Ok(self.inner.upsert_grant(grant).await?)
  }

  async fn get_grant(&self, group_id: Uuid, dependent_id: Uuid) -> Result<Option<DependentAccessGrant>> {
    Ok(self.inner.get_grant(group_id, dependent_id).await?)
  }

  async fn list_grants_for_dependent(&self, dependent_id: Uuid) -> Result<Vec<DependentAccessGrant>> {
    Ok(self.inner.list_grants_for_dependent(dependent_id).await?)
  }

  async fn get_membership(&self, group_id: Uuid, user_id: Uuid) -> Result<Option<Membership>> {
    Ok(self.inner.get_membership(group_id, user_id).await?)
  }

  async fn list_memberships(&self, group_id: Uuid) -> Result<Vec<Membership>> {
    Ok(self.inner.list_memberships(group_id).await?)
  }

  async fn upsert_membership(&self, input: NewMembership) -> Result<MembershipUpdateOutcome> {
    Ok(self.inner.upsert_membership(input).await?)
  }

  async fn update_membership(&self, update: MembershipUpdate) -> Result<MembershipUpdateOutcome> {
    Ok(self.inner.update_membership(update).await?)
  }

  async fn create_invitation(&self, invitation: Invitation) -> Result<Invitation> {
    Ok(self.inner.create_invitation(invitation).await?)
  }

  async fn get_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>> {
    Ok(self.inner.get_invitation(invitation_id).await?)
  }

  async fn list_invitations(&self, group_id: Uuid) -> Result<Vec<Invitation>> {
    Ok(self.inner.list_invitations(group_id).await?)
  }

  async fn redeem_invitation(&self, redemption: Redemption) -> Result<RedemptionOutcome> {
    Ok(self.inner.redeem_invitation(redemption).await?)
  }

  async fn revoke_invitation(
    &self,
    invitation_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Option<Invitation>> {
    Ok(self.inner.revoke_invitation(invitation_id, actor_id, at).await?)
  }

  async fn insert_activity(&self, input: PendingActivity) -> Result<ActivityEvent> {
    Ok(self.inner.insert_activity(input).await?)
  }

  async fn get_activity(&self, activity_id: Uuid) -> Result<Option<ResolvedActivity>> {
    Ok(self.inner.get_activity(activity_id).await?)
  }

  async fn list_activities(
    &self,
    dependent_id: Uuid,
    query: ActivityQuery,
  ) -> Result<Vec<ResolvedActivity>> {
    if self.take_failure() {
      return Err(FlakyError::Busy);
    }
    Ok(self.inner.list_activities(dependent_id, query).await?)
  }

  async fn apply_resolution(
    &self,
    resolution: Resolution,
    at: DateTime<Utc>,
  ) -> Result<Vec<ResolvedActivity>> {
    Ok(self.inner.apply_resolution(resolution, at).await?)
  }

  async fn remove_activity(&self, removal: ActivityRemoval) -> Result<RemovalOutcome> {
    Ok(self.inner.remove_activity(removal).await?)
  }

  async fn annotate_activity(&self, annotation: Annotation) -> Result<bool> {
    Ok(self.inner.annotate_activity(annotation).await?)
  }

  async fn list_annotations(&self, activity_id: Uuid) -> Result<Vec<Annotation>> {
    Ok(self.inner.list_annotations(activity_id).await?)
  }

  async fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
    Ok(self.inner.append_audit(entry).await?)
  }

  async fn list_audit(&self, group_id: Uuid, limit: Option<usize>) -> Result<Vec<AuditLogEntry>> {
    Ok(self.inner.list_audit(group_id, limit).await?)
  }

  async fn prune_audit(&self, group_id: Uuid, before: DateTime<Utc>) -> Result<usize> {
    Ok(self.inner.prune_audit(group_id, before).await?)
  }
}
