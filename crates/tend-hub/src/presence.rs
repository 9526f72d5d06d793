//! In-memory presence. Nothing here is persisted; a restart forgets every
//! session, which only ever makes institutional members look fresher.
//!
//! A group's records idle for a day are dropped whenever that group
//! receives a signal. By then they are offline and their session belongs to
//! an earlier day, so nothing reads differently except that the user no
//! longer appears in the group's list.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use tend_core::{
  group::GroupSettings,
  permission::{Action, DenyReason},
  presence::{self, PresenceRecord, PresenceSignal, PresenceView},
  store::CareStore,
};
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Hub, Result};

const RETAIN: TimeDelta = TimeDelta::days(1);

/// Latest record per (group, user), sharded by group.
#[derive(Default)]
pub(crate) struct PresenceTracker {
  groups: DashMap<Uuid, HashMap<Uuid, PresenceRecord>>,
}

impl PresenceTracker {
  pub(crate) fn apply(
    &self,
    group_id: Uuid,
    user_id: Uuid,
    signal: PresenceSignal,
    now: DateTime<Utc>,
    settings: &GroupSettings,
  ) -> PresenceRecord {
    let mut members = self.groups.entry(group_id).or_default();
    members.retain(|_, r| now - r.last_seen < RETAIN);
    let record = presence::apply(members.get(&user_id), user_id, group_id, signal, now, settings);
    members.insert(user_id, record.clone());
    record
  }

  pub(crate) fn get(&self, group_id: Uuid, user_id: Uuid) -> Option<PresenceRecord> {
    self.groups.get(&group_id).and_then(|members| members.get(&user_id).cloned())
  }

  pub(crate) fn snapshot(&self, group_id: Uuid) -> Vec<PresenceRecord> {
    self
      .groups
      .get(&group_id)
      .map(|members| members.values().cloned().collect())
      .unwrap_or_default()
  }

  pub(crate) fn session_started_at(&self, group_id: Uuid, user_id: Uuid) -> Option<DateTime<Utc>> {
    self.get(group_id, user_id).map(|r| r.session_started_at)
  }
}

impl<S: CareStore> Hub<S> {
  /// Fold a client signal into the caller's presence and tell the group.
  pub async fn update_presence(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    signal: PresenceSignal,
  ) -> Result<PresenceView> {
    let auth = self.authorize(user_id, group_id, &Action::UpdatePresence).await?;

    if let PresenceSignal::Caring { dependent_id: Some(dependent_id), .. } = &signal {
      let grant = self.store.get_grant(group_id, *dependent_id).await.map_err(Error::store)?;
      if grant.is_none() {
        return Err(DenyReason::GrantMissing.into());
      }
    }

    let now = self.now();
    let record = self.presence.apply(group_id, user_id, signal, now, &auth.group.settings);
    let view = record.view(now, self.config.presence_stale_after());
    debug!(%user_id, %group_id, status = %view.status, "presence updated");

    self.publish_presence(group_id, view.clone()).await;
    Ok(view)
  }

  /// Everyone in the group with a presence record, stale entries reading as
  /// offline.
  pub async fn group_presence(&self, user_id: Uuid, group_id: Uuid) -> Result<Vec<PresenceView>> {
    self.authorize(user_id, group_id, &Action::ViewPresence).await?;

    let now = self.now();
    let stale_after = self.config.presence_stale_after();
    let mut views: Vec<PresenceView> = self
      .presence
      .snapshot(group_id)
      .iter()
      .map(|r| r.view(now, stale_after))
      .collect();
    views.sort_by_key(|v| v.user_id);
    Ok(views)
  }
}
