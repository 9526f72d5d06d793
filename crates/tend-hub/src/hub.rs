use std::sync::Arc;

use chrono::{DateTime, Utc};
use tend_core::{
  clock::{Clock, SystemClock},
  conflict::ConflictPolicy,
  dependent::DependentAccessGrant,
  group::Group,
  membership::Membership,
  permission::{self, AccessPolicy, Action, ActionKind, Decision, DenyReason, EvalContext, VisibilityFilter},
  store::CareStore,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error, Result, broadcast::Broadcaster, config::HubConfig, locks::KeyedLocks,
  notify::{LogNotifier, Notifier}, presence::PresenceTracker,
};

/// The coordination service. Cheap to share behind an `Arc`.
pub struct Hub<S> {
  pub(crate) store:       S,
  pub(crate) clock:       Arc<dyn Clock>,
  pub(crate) config:      HubConfig,
  pub(crate) conflict:    ConflictPolicy,
  pub(crate) access:      AccessPolicy,
  /// Serialises the write path per dependent (and per user for personal
  /// group bootstrap).
  pub(crate) locks:       KeyedLocks,
  pub(crate) presence:    PresenceTracker,
  pub(crate) broadcaster: Arc<Broadcaster>,
  pub(crate) notifier:    Arc<dyn Notifier>,
}

/// What a successful authorisation hands back to the operation.
pub(crate) struct Authorized {
  pub group:      Group,
  pub membership: Membership,
  /// Loaded for dependent-scoped actions.
  pub grant:      Option<DependentAccessGrant>,
  pub filter:     VisibilityFilter,
}

impl<S: CareStore> Hub<S> {
  pub fn new(store: S, config: HubConfig) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      conflict: config.conflict_policy(),
      access: config.access_policy(),
      locks: KeyedLocks::default(),
      presence: PresenceTracker::default(),
      broadcaster: Broadcaster::new(config.subscriber_buffer),
      notifier: Arc::new(LogNotifier),
      config,
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &HubConfig { &self.config }

  pub fn now(&self) -> DateTime<Utc> { self.clock.now() }

  // ─── Authorisation ─────────────────────────────────────────────────────────

  /// Run the evaluator for one caller against already-loaded rows.
  pub(crate) fn evaluate_for(
    &self,
    group: &Group,
    user_id: Uuid,
    membership: Option<&Membership>,
    grant: Option<&DependentAccessGrant>,
    action: &Action,
    now: DateTime<Utc>,
  ) -> Decision {
    let ctx = EvalContext {
      user_id,
      membership,
      grant,
      settings: &group.settings,
      session_started_at: self.presence.session_started_at(group.group_id, user_id),
      now,
      policy: &self.access,
    };
    permission::evaluate(&ctx, action)
  }

  /// Load the caller's membership (and the grant, for dependent-scoped
  /// actions) and evaluate `action`. Does not look at whether the group is
  /// disabled.
  pub(crate) async fn check_access(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    action: &Action,
  ) -> Result<Authorized> {
    let group = self
      .store
      .get_group(group_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("group"))?;
    let membership = self.store.get_membership(group_id, user_id).await.map_err(Error::store)?;
    let grant = match action.dependent() {
      Some(dependent_id) => {
        self.store.get_grant(group_id, dependent_id).await.map_err(Error::store)?
      }
      None => None,
    };

    let decision =
      self.evaluate_for(&group, user_id, membership.as_ref(), grant.as_ref(), action, self.now());
    let kind: &'static str = ActionKind::from(action).into();
    let filter = match decision.into_result() {
      Ok(filter) => filter,
      Err(reason) => {
        debug!(%user_id, %group_id, action = kind, %reason, "denied");
        return Err(reason.into());
      }
    };
    let Some(membership) = membership else {
      return Err(DenyReason::NotMember.into());
    };
    debug!(%user_id, %group_id, action = kind, filtered = !filter.is_unrestricted(), "allowed");

    Ok(Authorized { group, membership, grant, filter })
  }

  /// [`Self::check_access`], additionally refusing writes to a disabled
  /// group.
  pub(crate) async fn authorize(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    action: &Action,
  ) -> Result<Authorized> {
    let auth = self.check_access(user_id, group_id, action).await?;
    if auth.group.is_disabled() && !action.is_read() {
      return Err(Error::InvalidInput("group is disabled".into()));
    }
    Ok(auth)
  }
}
