//! The `CareStore` trait.
//!
//! Implemented by storage backends (e.g. `tend-store-sqlite`). `tend-hub`
//! depends on this abstraction, not on any concrete backend.
//!
//! Rules that must hold across concurrent writers (the last-core-member
//! invariant, single-use invitations) are enforced by the store inside one
//! transaction, using the pure rule functions from this crate. Every
//! privileged mutation appends its audit entry in the same transaction.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
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
};

/// Errors a backend can raise.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  /// Whether retrying the same call may succeed (lock contention, a busy
  /// database). Callers retry these with bounded backoff.
  fn is_transient(&self) -> bool;
}

/// Abstraction over a Tend storage backend.
///
/// Activity events are append-only; soft deletion and absorption are
/// recorded as separate removal rows. All methods return `Send` futures so
/// the trait can be used from a multi-threaded runtime.
pub trait CareStore: Send + Sync {
  type Error: StoreError;

  // ── Groups ────────────────────────────────────────────────────────────

  /// Create a group and its creator's active core membership.
  fn create_group(
    &self,
    input: NewGroup,
  ) -> impl Future<Output = Result<(Group, Membership), Self::Error>> + Send + '_;

  fn get_group(
    &self,
    group_id: Uuid,
  ) -> impl Future<Output = Result<Option<Group>, Self::Error>> + Send + '_;

  /// Groups in which `user_id` holds a membership of any status.
  fn list_groups_for_user(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Group>, Self::Error>> + Send + '_;

  /// Soft-disable a group. Returns `None` if it does not exist. Disabling an
  /// already disabled group keeps the original timestamp.
  fn disable_group(
    &self,
    group_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Group>, Self::Error>> + Send + '_;

  // ── Dependents & grants ───────────────────────────────────────────────

  /// Persist a dependent together with a `full` grant to its group.
  fn add_dependent(
    &self,
    input: NewDependent,
  ) -> impl Future<Output = Result<(Dependent, DependentAccessGrant), Self::Error>> + Send + '_;

  fn get_dependent(
    &self,
    dependent_id: Uuid,
  ) -> impl Future<Output = Result<Option<Dependent>, Self::Error>> + Send + '_;

  /// Every dependent `group_id` holds a grant on, with that grant.
  fn list_dependents(
    &self,
    group_id: Uuid,
  ) -> impl Future<Output = Result<Vec<(Dependent, DependentAccessGrant)>, Self::Error>> + Send + '_;

  /// Replace a dependent's profile, auditing the edit under `group_id`.
  /// Returns `None` if the dependent does not exist.
  fn update_profile(
    &self,
    dependent_id: Uuid,
    profile: DependentProfile,
    group_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Dependent>, Self::Error>> + Send + '_;

  /// Insert or replace the grant for (group, dependent). Audited under the
  /// grant's group.
  fn upsert_grant(
    &self,
    grant: DependentAccessGrant,
  ) -> impl Future<Output = Result<DependentAccessGrant, Self::Error>> + Send + '_;

  fn get_grant(
    &self,
    group_id: Uuid,
    dependent_id: Uuid,
  ) -> impl Future<Output = Result<Option<DependentAccessGrant>, Self::Error>> + Send + '_;

  /// Every group's grant on a dependent.
  fn list_grants_for_dependent(
    &self,
    dependent_id: Uuid,
  ) -> impl Future<Output = Result<Vec<DependentAccessGrant>, Self::Error>> + Send + '_;

  // ── Memberships ───────────────────────────────────────────────────────

  fn get_membership(
    &self,
    group_id: Uuid,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Option<Membership>, Self::Error>> + Send + '_;

  /// All memberships of a group, of any status.
  fn list_memberships(
    &self,
    group_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Membership>, Self::Error>> + Send + '_;

  /// Insert a membership, or overwrite the existing row for the same
  /// (user, group). Overwrites are refused with
  /// [`MembershipUpdateOutcome::LastCoreMember`] when they would orphan the
  /// group.
  fn upsert_membership(
    &self,
    input: NewMembership,
  ) -> impl Future<Output = Result<MembershipUpdateOutcome, Self::Error>> + Send + '_;

  /// Check-and-set role and/or status change.
  fn update_membership(
    &self,
    update: MembershipUpdate,
  ) -> impl Future<Output = Result<MembershipUpdateOutcome, Self::Error>> + Send + '_;

  // ── Invitations ───────────────────────────────────────────────────────

  fn create_invitation(
    &self,
    invitation: Invitation,
  ) -> impl Future<Output = Result<Invitation, Self::Error>> + Send + '_;

  fn get_invitation(
    &self,
    invitation_id: Uuid,
  ) -> impl Future<Output = Result<Option<Invitation>, Self::Error>> + Send + '_;

  fn list_invitations(
    &self,
    group_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Invitation>, Self::Error>> + Send + '_;

  /// Atomically validate a token and create (or update) the membership it
  /// grants. An unknown token hash yields
  /// `Rejected(InvitationError::TokenInvalid)`.
  fn redeem_invitation(
    &self,
    redemption: Redemption,
  ) -> impl Future<Output = Result<RedemptionOutcome, Self::Error>> + Send + '_;

  /// Revoke a pending invitation. Returns the invitation as it stands
  /// afterwards; a non-pending invitation is returned unchanged. `None` if
  /// it does not exist.
  fn revoke_invitation(
    &self,
    invitation_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Invitation>, Self::Error>> + Send + '_;

  // ── Activities ────────────────────────────────────────────────────────

  /// Append an event. The store assigns its sequence number.
  fn insert_activity(
    &self,
    input: PendingActivity,
  ) -> impl Future<Output = Result<ActivityEvent, Self::Error>> + Send + '_;

  fn get_activity(
    &self,
    activity_id: Uuid,
  ) -> impl Future<Output = Result<Option<ResolvedActivity>, Self::Error>> + Send + '_;

  /// Events for a dependent ordered by `logged_at`, then sequence.
  fn list_activities(
    &self,
    dependent_id: Uuid,
    query: ActivityQuery,
  ) -> impl Future<Output = Result<Vec<ResolvedActivity>, Self::Error>> + Send + '_;

  /// Write a resolver outcome in one transaction and return every touched
  /// event in its new state. Absorbing an event that already has a removal
  /// row is a no-op.
  fn apply_resolution(
    &self,
    resolution: Resolution,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<ResolvedActivity>, Self::Error>> + Send + '_;

  fn remove_activity(
    &self,
    removal: ActivityRemoval,
  ) -> impl Future<Output = Result<RemovalOutcome, Self::Error>> + Send + '_;

  /// Returns `false` if the event does not exist.
  fn annotate_activity(
    &self,
    annotation: Annotation,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn list_annotations(
    &self,
    activity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Annotation>, Self::Error>> + Send + '_;

  // ── Audit ─────────────────────────────────────────────────────────────

  fn append_audit(
    &self,
    entry: AuditLogEntry,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Newest first.
  fn list_audit(
    &self,
    group_id: Uuid,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<AuditLogEntry>, Self::Error>> + Send + '_;

  /// Delete a group's entries recorded before `before`. Returns the number
  /// removed.
  fn prune_audit(
    &self,
    group_id: Uuid,
    before: DateTime<Utc>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;
}
