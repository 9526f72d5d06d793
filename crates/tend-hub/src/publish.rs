//! Fan-out of committed changes to live subscribers.
//!
//! Each recipient's visibility is evaluated at delivery time, so a member
//! whose session lapses or whose role changes stops seeing events on the next
//! notification. Failures here are logged and swallowed.

use std::collections::HashMap;

use tend_core::{
  activity::ResolvedActivity,
  dependent::DependentAccessGrant,
  membership::Membership,
  permission::{Action, VisibilityFilter},
  presence::PresenceView,
  store::CareStore,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  Hub, Result,
  broadcast::{ActivityChange, Delivery, Notification, Subscription},
};

impl<S: CareStore> Hub<S> {
  /// Open a live feed of a group's activity, presence and membership
  /// changes.
  pub async fn subscribe(&self, user_id: Uuid, group_id: Uuid) -> Result<Subscription> {
    self.authorize(user_id, group_id, &Action::Subscribe).await?;
    Ok(self.broadcaster.register(group_id, user_id))
  }

  /// Deliver to every group holding a grant on the event's dependent.
  pub(crate) async fn publish_activity(&self, change: ActivityChange, activity: &ResolvedActivity) {
    let dependent_id = activity.event.dependent_id;
    let grants = match self.store.list_grants_for_dependent(dependent_id).await {
      Ok(grants) => grants,
      Err(e) => {
        warn!(%dependent_id, error = %e, "could not load grants for broadcast");
        return;
      }
    };

    let action = Action::ViewActivity { dependent_id };
    for grant in &grants {
      self
        .fan_out(grant.group_id, Some(grant), &action, |filter| {
          let event = filter.apply(activity.event.clone())?;
          Some(Notification::Activity {
            group_id: grant.group_id,
            change,
            activity: ResolvedActivity { event, status: activity.status.clone() },
          })
        })
        .await;
    }
  }

  pub(crate) async fn publish_presence(&self, group_id: Uuid, presence: PresenceView) {
    self
      .fan_out(group_id, None, &Action::ViewPresence, |_| {
        Some(Notification::Presence { group_id, presence: presence.clone() })
      })
      .await;
  }

  pub(crate) async fn publish_membership(&self, membership: &Membership) {
    let group_id = membership.group_id;
    self
      .fan_out(group_id, None, &Action::ViewMembers, |_| {
        Some(Notification::Membership { group_id, membership: membership.clone() })
      })
      .await;
  }

  /// Evaluate `action` once per distinct subscribed user and deliver what
  /// `build` produces from their filter.
  async fn fan_out<F>(
    &self,
    group_id: Uuid,
    grant: Option<&DependentAccessGrant>,
    action: &Action,
    build: F,
  ) where
    F: Fn(&VisibilityFilter) -> Option<Notification> + Sync,
  {
    let recipients = self.broadcaster.recipients(group_id);
    if recipients.is_empty() {
      return;
    }

    let (group, memberships) = match self.fan_out_context(group_id).await {
      Ok(Some(ctx)) => ctx,
      Ok(None) => return,
      Err(e) => {
        warn!(%group_id, error = %e, "could not load recipients for broadcast");
        return;
      }
    };

    let now = self.now();
    let mut filters: HashMap<Uuid, Option<VisibilityFilter>> = HashMap::new();
    let (mut sent, mut skipped) = (0usize, 0usize);
    for recipient in recipients {
      let filter = filters.entry(recipient.user_id).or_insert_with(|| {
        let membership = memberships.iter().find(|m| m.user_id == recipient.user_id);
        self
          .evaluate_for(&group, recipient.user_id, membership, grant, action, now)
          .into_result()
          .ok()
      });
      let Some(notification) = filter.as_ref().and_then(&build) else {
        skipped += 1;
        continue;
      };
      match self.broadcaster.deliver(group_id, recipient.connection_id, notification) {
        Delivery::Sent => sent += 1,
        Delivery::Dropped | Delivery::Closed => skipped += 1,
      }
    }
    debug!(%group_id, sent, skipped, "broadcast");
  }

  async fn fan_out_context(
    &self,
    group_id: Uuid,
  ) -> Result<Option<(tend_core::group::Group, Vec<Membership>)>, S::Error> {
    let Some(group) = self.store.get_group(group_id).await? else {
      return Ok(None);
    };
    let memberships = self.store.list_memberships(group_id).await?;
    Ok(Some((group, memberships)))
  }
}
