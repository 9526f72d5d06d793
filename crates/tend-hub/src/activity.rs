//! The activity ledger's write path and feeds.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tend_core::{
  activity::{
    ActivityQuery, ActivityRemoval, ActivityStatus, Annotation, NewActivity, PendingActivity,
    RemovalOutcome, ResolvedActivity,
  },
  audit::{AuditAction, AuditLogEntry},
  conflict,
  dependent::{AccessLevel, Dependent, MedicalProfile},
  permission::{Action, ExportScope, FieldScope, VisibilityFilter},
  store::CareStore,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Hub, Result, broadcast::ActivityChange, retry::with_retry};

/// How far ahead of the server clock a client may stamp an entry.
const MAX_CLOCK_SKEW: TimeDelta = TimeDelta::minutes(5);

#[derive(Debug, Clone, Serialize)]
pub struct LoggedActivity {
  /// The new event after reconciliation. Absorbed if it was merged into an
  /// earlier entry.
  pub activity: ResolvedActivity,
  /// Other events the resolver changed.
  pub touched:  Vec<ResolvedActivity>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedQuery {
  pub since:            Option<DateTime<Utc>>,
  pub until:            Option<DateTime<Utc>>,
  #[serde(default)]
  pub include_inactive: bool,
  /// Keep only the most recent `limit` events.
  pub limit:            Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependentOverview {
  pub dependent:    Dependent,
  pub access_level: AccessLevel,
  /// Visible activity from the recent-activity window, oldest first.
  pub recent:       Vec<ResolvedActivity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Export {
  pub dependent:    Dependent,
  pub scope:        ExportScope,
  pub generated_at: DateTime<Utc>,
  pub activities:   Vec<ResolvedActivity>,
  pub annotations:  Vec<Annotation>,
}

fn filtered(filter: &VisibilityFilter, items: Vec<ResolvedActivity>) -> Vec<ResolvedActivity> {
  items
    .into_iter()
    .filter_map(|r| {
      let status = r.status;
      filter.apply(r.event).map(|event| ResolvedActivity { event, status })
    })
    .collect()
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
  match (a, b) {
    (Some(a), Some(b)) => Some(a.max(b)),
    (a, b) => a.or(b),
  }
}

impl<S: CareStore> Hub<S> {
  // ─── Write path ────────────────────────────────────────────────────────────

  /// Record an activity, reconcile it against near-simultaneous entries and
  /// broadcast the result.
  pub async fn log_activity(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    input: NewActivity,
  ) -> Result<LoggedActivity> {
    let dependent_id = input.dependent_id;
    let auth = self
      .authorize(user_id, group_id, &Action::LogActivity { dependent_id, kind: input.kind })
      .await?;

    let now = self.now();
    // What the logger gets back is shaped by what they may read.
    let view = self
      .evaluate_for(
        &auth.group,
        user_id,
        Some(&auth.membership),
        auth.grant.as_ref(),
        &Action::ViewActivity { dependent_id },
        now,
      )
      .into_result()?;

    let logged_at = input.logged_at.unwrap_or(now);
    if logged_at > now + MAX_CLOCK_SKEW {
      return Err(Error::InvalidInput("logged_at is in the future".into()));
    }
    if !(input.details.is_null() || input.details.is_object()) {
      return Err(Error::InvalidInput("details must be a JSON object".into()));
    }

    let pending = PendingActivity {
      activity_id: Uuid::new_v4(),
      dependent_id,
      group_id,
      kind: input.kind,
      logged_at,
      logged_by: user_id,
      details: input.details,
      recorded_at: now,
    };

    let _guard = self.locks.lock(dependent_id).await;
    let store = &self.store;
    let event =
      with_retry(&self.config.retry, "insert_activity", move || store.insert_activity(pending.clone()))
        .await?;
    let activity_id = event.activity_id;
    info!(
      %activity_id,
      %dependent_id,
      kind = %event.kind,
      logged_by = %user_id,
      "activity logged"
    );

    // The entry is durable at this point. A failed reconciliation leaves it
    // unmerged rather than failing the call.
    let (activity, touched) = match self.reconcile_locked(activity_id).await {
      Ok(resolved) => resolved,
      Err(e) => {
        warn!(%activity_id, error = %e, "reconciliation failed, entry kept as logged");
        (ResolvedActivity { event, status: ActivityStatus::Active }, Vec::new())
      }
    };
    self.publish_activity(ActivityChange::Logged, &activity).await;
    for other in &touched {
      self.publish_activity(ActivityChange::Reconciled, other).await;
    }

    let activity = ResolvedActivity { event: view.redact(activity.event), status: activity.status };
    Ok(LoggedActivity { activity, touched: filtered(&view, touched) })
  }

  /// Re-run conflict resolution for an existing event, for example one whose
  /// reconciliation failed when it was logged. Requires the same rights as
  /// editing the entry. Running it again on a settled event changes nothing.
  pub async fn reconcile(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    activity_id: Uuid,
  ) -> Result<LoggedActivity> {
    let current = self.editable_activity(user_id, group_id, activity_id).await?;

    let _guard = self.locks.lock(current.event.dependent_id).await;
    let (activity, touched) = self.reconcile_locked(activity_id).await?;
    for changed in &touched {
      self.publish_activity(ActivityChange::Reconciled, changed).await;
    }
    Ok(LoggedActivity { activity, touched })
  }

  /// Resolve and apply. The caller holds the dependent's lock. Returns the
  /// event's final state and every other event that changed.
  async fn reconcile_locked(
    &self,
    activity_id: Uuid,
  ) -> Result<(ResolvedActivity, Vec<ResolvedActivity>)> {
    let incoming = self.load_activity(activity_id).await?;

    let logged_at = incoming.event.logged_at;
    let query = ActivityQuery {
      since: Some(logged_at - self.conflict.window),
      until: Some(logged_at + self.conflict.window),
      ..Default::default()
    };
    let dependent_id = incoming.event.dependent_id;
    let store = &self.store;
    let recent = with_retry(&self.config.retry, "list_activities", move || {
      store.list_activities(dependent_id, query.clone())
    })
    .await?;

    let resolution = conflict::resolve(&incoming, &recent, &self.conflict);
    if resolution.is_noop() {
      return Ok((incoming, Vec::new()));
    }

    let now = self.now();
    let expected = resolution.touched().len();
    let touched = with_retry(&self.config.retry, "apply_resolution", move || {
      store.apply_resolution(resolution.clone(), now)
    })
    .await?;
    if touched.len() != expected {
      warn!(%activity_id, expected, got = touched.len(), "resolution touched fewer events than planned");
    }

    let mut activity = incoming;
    let mut others = Vec::with_capacity(touched.len());
    for changed in touched {
      if changed.id() == activity_id {
        activity = changed;
      } else {
        others.push(changed);
      }
    }
    info!(%activity_id, touched = others.len(), active = activity.is_active(), "activity reconciled");
    Ok((activity, others))
  }

  async fn load_activity(&self, activity_id: Uuid) -> Result<ResolvedActivity> {
    let store = &self.store;
    with_retry(&self.config.retry, "get_activity", move || store.get_activity(activity_id))
      .await?
      .ok_or(Error::NotFound("activity"))
  }

  /// Soft-delete an entry. Core members may remove any entry; everyone else
  /// only their own, within their edit rights.
  pub async fn remove_activity(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    activity_id: Uuid,
    reason: Option<String>,
  ) -> Result<ResolvedActivity> {
    let current = self.editable_activity(user_id, group_id, activity_id).await?;
    if !current.is_active() {
      return Err(Error::AlreadyRemoved(activity_id));
    }

    let _guard = self.locks.lock(current.event.dependent_id).await;
    let removal = ActivityRemoval {
      removal_id: Uuid::new_v4(),
      activity_id,
      removed_by: user_id,
      reason: reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
      recorded_at: self.now(),
    };
    let store = &self.store;
    let outcome =
      with_retry(&self.config.retry, "remove_activity", move || store.remove_activity(removal.clone()))
        .await?;
    match outcome {
      RemovalOutcome::Removed(_) => {}
      RemovalOutcome::NotFound => return Err(Error::NotFound("activity")),
      RemovalOutcome::AlreadyRemoved => return Err(Error::AlreadyRemoved(activity_id)),
    }

    let removed = self
      .store
      .get_activity(activity_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("activity"))?;
    info!(%activity_id, removed_by = %user_id, "activity removed");
    self.publish_activity(ActivityChange::Removed, &removed).await;
    Ok(removed)
  }

  /// Attach a note to an entry. Same rights as removing it.
  pub async fn annotate_activity(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    activity_id: Uuid,
    note: &str,
  ) -> Result<Annotation> {
    let note = note.trim();
    if note.is_empty() {
      return Err(Error::InvalidInput("annotation must not be empty".into()));
    }
    let current = self.editable_activity(user_id, group_id, activity_id).await?;

    let _guard = self.locks.lock(current.event.dependent_id).await;
    let annotation = Annotation {
      annotation_id: Uuid::new_v4(),
      activity_id,
      author_id: user_id,
      note: note.to_string(),
      recorded_at: self.now(),
    };
    let store = &self.store;
    let ann = annotation.clone();
    let found =
      with_retry(&self.config.retry, "annotate_activity", move || store.annotate_activity(ann.clone()))
        .await?;
    if !found {
      return Err(Error::NotFound("activity"));
    }

    info!(%activity_id, author = %user_id, "activity annotated");
    self.publish_activity(ActivityChange::Annotated, &current).await;
    Ok(annotation)
  }

  async fn editable_activity(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    activity_id: Uuid,
  ) -> Result<ResolvedActivity> {
    let current = self
      .store
      .get_activity(activity_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("activity"))?;
    let event = &current.event;
    self
      .authorize(user_id, group_id, &Action::EditEntry {
        dependent_id: event.dependent_id,
        logged_by:    event.logged_by,
        logged_at:    event.logged_at,
      })
      .await?;
    Ok(current)
  }

  // ─── Reads ─────────────────────────────────────────────────────────────────

  /// A dependent's history as the caller may see it, oldest first.
  pub async fn activity_feed(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    dependent_id: Uuid,
    query: FeedQuery,
  ) -> Result<Vec<ResolvedActivity>> {
    let auth = self.authorize(user_id, group_id, &Action::ViewActivity { dependent_id }).await?;
    let filter = auth.filter;

    let rows = self
      .store
      .list_activities(dependent_id, ActivityQuery {
        since:            later(query.since, filter.since),
        until:            query.until,
        include_inactive: query.include_inactive,
        newest_first:     true,
        // A kind filter is applied after the fetch, so the limit cannot be
        // pushed down with it.
        limit:            query.limit.filter(|_| filter.kinds.is_none()),
      })
      .await
      .map_err(Error::store)?;

    let mut out = filtered(&filter, rows);
    if let Some(limit) = query.limit {
      out.truncate(limit);
    }
    out.reverse();
    debug!(%user_id, %dependent_id, count = out.len(), "activity feed");
    Ok(out)
  }

  /// Every dependent the group can see, each with its recent visible
  /// activity.
  pub async fn visible_dependents(
    &self,
    user_id: Uuid,
    group_id: Uuid,
  ) -> Result<Vec<DependentOverview>> {
    let auth = self.authorize(user_id, group_id, &Action::ViewDependents).await?;
    let now = self.now();
    let recent_since = now - self.config.recent_activity();

    let pairs = self.store.list_dependents(group_id).await.map_err(Error::store)?;
    let mut out = Vec::with_capacity(pairs.len());
    for (mut dependent, grant) in pairs {
      let dependent_id = dependent.dependent_id;
      let decision = self.evaluate_for(
        &auth.group,
        user_id,
        Some(&auth.membership),
        Some(&grant),
        &Action::ViewActivity { dependent_id },
        now,
      );
      let recent = match decision.into_result() {
        Ok(filter) => {
          let rows = self
            .store
            .list_activities(dependent_id, ActivityQuery {
              since: later(Some(recent_since), filter.since),
              ..Default::default()
            })
            .await
            .map_err(Error::store)?;
          filtered(&filter, rows)
        }
        Err(_) => Vec::new(),
      };

      if auth.filter.fields == FieldScope::Basic {
        dependent.profile.medical = MedicalProfile::default();
      }
      out.push(DependentOverview { dependent, access_level: grant.access_level, recent });
    }
    Ok(out)
  }

  /// Everything the caller may export about a dependent. Audited.
  pub async fn export(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    dependent_id: Uuid,
    scope: ExportScope,
  ) -> Result<Export> {
    let auth = self.authorize(user_id, group_id, &Action::Export { dependent_id, scope }).await?;
    let dependent = self
      .store
      .get_dependent(dependent_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("dependent"))?;

    let rows = self
      .store
      .list_activities(dependent_id, ActivityQuery {
        since: auth.filter.since,
        ..Default::default()
      })
      .await
      .map_err(Error::store)?;
    let activities = filtered(&auth.filter, rows);

    let mut annotations = Vec::new();
    for activity in &activities {
      annotations.extend(self.store.list_annotations(activity.id()).await.map_err(Error::store)?);
    }

    let now = self.now();
    let scope_name: &'static str = scope.into();
    let entry = AuditLogEntry::new(
      group_id,
      user_id,
      AuditAction::DataExported,
      Some(dependent_id),
      serde_json::json!({ "scope": scope_name, "activities": activities.len() }),
      now,
    );
    let store = &self.store;
    with_retry(&self.config.retry, "append_audit", move || store.append_audit(entry.clone())).await?;
    info!(%user_id, %dependent_id, scope = scope_name, count = activities.len(), "data exported");

    Ok(Export { dependent, scope, generated_at: now, activities, annotations })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn later_prefers_the_tighter_bound() {
    let a = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let b = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
    assert_eq!(later(Some(a), Some(b)), Some(b));
    assert_eq!(later(None, Some(a)), Some(a));
    assert_eq!(later(None, None), None);
  }
}
