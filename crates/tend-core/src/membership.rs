//! Memberships: a user's standing within a group.
//!
//! Expiry is computed, never eagerly written: a membership past its
//! `access_expires_at` reads as [`MembershipStatus::Expired`] whatever its
//! stored status says.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

/// A member's role. The capability matrix for each role lives in
/// [`crate::permission`].
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
pub enum Role {
  Core,
  Extended,
  Professional,
  Institutional,
}

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
pub enum MembershipStatus {
  Active,
  Inactive,
  Suspended,
  Expired,
}

/// A (user, group) pair. Unique per pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
  pub membership_id:     Uuid,
  pub user_id:           Uuid,
  pub group_id:          Uuid,
  pub role:              Role,
  /// The stored status. Use [`Membership::effective_status`] for decisions.
  pub status:            MembershipStatus,
  pub access_expires_at: Option<DateTime<Utc>>,
  /// Back-reference only; the inviter does not own this membership.
  pub invited_by:        Option<Uuid>,
  pub joined_at:         DateTime<Utc>,
  pub updated_at:        DateTime<Utc>,
}

impl Membership {
  pub fn effective_status(&self, now: DateTime<Utc>) -> MembershipStatus {
    match self.access_expires_at {
      Some(expires) if now >= expires => MembershipStatus::Expired,
      _ => self.status,
    }
  }

  pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
    self.effective_status(now) == MembershipStatus::Active
  }

  pub fn is_active_core_at(&self, now: DateTime<Utc>) -> bool {
    self.role == Role::Core && self.is_active_at(now)
  }
}

/// Input to [`crate::store::CareStore::upsert_membership`]. An existing row
/// for the same (user, group) is updated in place.
#[derive(Debug, Clone)]
pub struct NewMembership {
  pub user_id:           Uuid,
  pub group_id:          Uuid,
  pub role:              Role,
  pub status:            MembershipStatus,
  pub access_expires_at: Option<DateTime<Utc>>,
  pub invited_by:        Option<Uuid>,
  /// Who performed the write, for the audit log.
  pub actor_id:          Uuid,
  pub at:                DateTime<Utc>,
}

/// A check-and-set change to an existing membership.
///
/// The store applies it only if the row still has `expected_role` and
/// `expected_status`; otherwise it reports [`MembershipUpdateOutcome::Stale`].
#[derive(Debug, Clone)]
pub struct MembershipUpdate {
  pub group_id:        Uuid,
  pub user_id:         Uuid,
  pub expected_role:   Role,
  pub expected_status: MembershipStatus,
  pub role:            Option<Role>,
  pub status:          Option<MembershipStatus>,
  pub actor_id:        Uuid,
  pub at:              DateTime<Utc>,
}

impl MembershipUpdate {
  pub fn new_role(&self) -> Role { self.role.unwrap_or(self.expected_role) }

  pub fn new_status(&self) -> MembershipStatus {
    self.status.unwrap_or(self.expected_status)
  }
}

#[derive(Debug, Clone)]
pub enum MembershipUpdateOutcome {
  Updated(Membership),
  /// The row changed underneath the caller; carries the current state.
  Stale(Membership),
  /// The change would leave a group with dependents without an active core
  /// member. Nothing was written.
  LastCoreMember,
  NotFound,
}

/// Whether moving `target_user` to (`new_role`, `new_status`) would leave the
/// group without an active core member.
///
/// Only enforced once the group has at least one dependent. A group that
/// already has no active core member (for example because every core
/// membership expired) is not protected by this rule.
pub fn would_orphan_group(
  members: &[Membership],
  target_user: Uuid,
  new_role: Role,
  new_status: MembershipStatus,
  has_dependents: bool,
  now: DateTime<Utc>,
) -> bool {
  if !has_dependents {
    return false;
  }
  let Some(target) = members.iter().find(|m| m.user_id == target_user) else {
    return false;
  };
  if !target.is_active_core_at(now) {
    return false;
  }
  if new_role == Role::Core && new_status == MembershipStatus::Active {
    return false;
  }
  !members
    .iter()
    .any(|m| m.user_id != target_user && m.is_active_core_at(now))
}
