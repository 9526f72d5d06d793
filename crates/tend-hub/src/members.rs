//! Membership management.
//!
//! Changes are check-and-set against the row the caller last read. When
//! another writer got there first the change is re-read and retried, so the
//! last writer wins; the store still refuses anything that would orphan the
//! group.

use tend_core::{
  membership::{Membership, MembershipStatus, MembershipUpdate, MembershipUpdateOutcome, Role},
  permission::Action,
  store::CareStore,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{Error, Hub, Result, retry::with_retry};

impl<S: CareStore> Hub<S> {
  pub async fn list_members(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    active_only: bool,
  ) -> Result<Vec<Membership>> {
    self.check_access(user_id, group_id, &Action::ViewMembers).await?;
    let mut members = self.store.list_memberships(group_id).await.map_err(Error::store)?;
    if active_only {
      let now = self.now();
      members.retain(|m| m.is_active_at(now));
    }
    Ok(members)
  }

  pub async fn change_role(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    target: Uuid,
    role: Role,
  ) -> Result<Membership> {
    self.change_membership(user_id, group_id, target, Some(role), None).await
  }

  /// `Expired` cannot be set directly; it follows from `access_expires_at`.
  pub async fn set_member_status(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    target: Uuid,
    status: MembershipStatus,
  ) -> Result<Membership> {
    if status == MembershipStatus::Expired {
      return Err(Error::InvalidInput("expired is derived from access_expires_at".into()));
    }
    self.change_membership(user_id, group_id, target, None, Some(status)).await
  }

  /// Mark a member inactive. Anyone may remove themselves.
  pub async fn remove_member(&self, user_id: Uuid, group_id: Uuid, target: Uuid) -> Result<Membership> {
    self.set_member_status(user_id, group_id, target, MembershipStatus::Inactive).await
  }

  async fn change_membership(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    target: Uuid,
    role: Option<Role>,
    status: Option<MembershipStatus>,
  ) -> Result<Membership> {
    let leaving = target == user_id && role.is_none() && status == Some(MembershipStatus::Inactive);
    let action = if leaving { Action::LeaveGroup } else { Action::ManageMembers };
    self.authorize(user_id, group_id, &action).await?;

    let max_attempts = self.config.retry.max_attempts.max(1);
    let store = &self.store;
    for attempt in 1..=max_attempts {
      let current = store
        .get_membership(group_id, target)
        .await
        .map_err(Error::store)?
        .ok_or(Error::NotFound("membership"))?;
      let update = MembershipUpdate {
        group_id,
        user_id: target,
        expected_role: current.role,
        expected_status: current.status,
        role,
        status,
        actor_id: user_id,
        at: self.now(),
      };

      let outcome = with_retry(&self.config.retry, "update_membership", move || {
        store.update_membership(update.clone())
      })
      .await?;
      match outcome {
        MembershipUpdateOutcome::Updated(membership) => {
          info!(
            %group_id,
            member = %target,
            by = %user_id,
            role = %membership.role,
            status = %membership.status,
            "membership changed"
          );
          self.publish_membership(&membership).await;
          return Ok(membership);
        }
        MembershipUpdateOutcome::Stale(_) => {
          debug!(%group_id, member = %target, attempt, "membership changed concurrently, retrying");
        }
        MembershipUpdateOutcome::LastCoreMember => return Err(Error::LastCoreMember),
        MembershipUpdateOutcome::NotFound => return Err(Error::NotFound("membership")),
      }
    }

    Err(Error::Unavailable("membership kept changing concurrently".into()))
  }
}
