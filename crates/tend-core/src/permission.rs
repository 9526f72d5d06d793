//! The permission evaluator.
//!
//! [`evaluate`] is a pure decision function over an [`EvalContext`] and an
//! [`Action`]. The role capability matrix is a closed `match` in
//! [`Role::capabilities`]; adding a role or a column is a compile error until
//! every cell is filled in.
//!
//! Denials are values, never panics. Each carries a [`DenyReason`] that tells
//! the caller what access they are missing.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumDiscriminants, EnumIter, IntoStaticStr};
use uuid::Uuid;

use crate::{
  activity::{ActivityEvent, ActivityKind},
  dependent::{AccessLevel, DependentAccessGrant, RelevantScope},
  group::GroupSettings,
  membership::{Membership, MembershipStatus, Role},
};

// ─── Capability matrix ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewScope {
  Full,
  /// Basic fields only, current day only.
  BasicCurrentDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileEditRight {
  Full,
  MedicalOnly,
  None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryEditRight {
  Any,
  OwnOnly,
  /// Own entries logged during the current session.
  OwnWithinSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportRight {
  Full,
  ReportsOnly,
  None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryWindow {
  Unlimited,
  /// Bounded by the grant's [`RelevantScope`].
  RelevantScope,
  CurrentDay,
}

/// One row of the capability matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
  pub view:    ViewScope,
  pub profile: ProfileEditRight,
  pub entries: EntryEditRight,
  /// Invite members, change roles and statuses, manage grants, read the
  /// audit log.
  pub manage:  bool,
  pub export:  ExportRight,
  pub history: HistoryWindow,
}

impl Role {
  pub const fn capabilities(self) -> Capabilities {
    match self {
      Role::Core => Capabilities {
        view:    ViewScope::Full,
        profile: ProfileEditRight::Full,
        entries: EntryEditRight::Any,
        manage:  true,
        export:  ExportRight::Full,
        history: HistoryWindow::Unlimited,
      },
      Role::Extended => Capabilities {
        view:    ViewScope::Full,
        profile: ProfileEditRight::None,
        entries: EntryEditRight::OwnOnly,
        manage:  false,
        export:  ExportRight::None,
        history: HistoryWindow::Unlimited,
      },
      Role::Professional => Capabilities {
        view:    ViewScope::Full,
        profile: ProfileEditRight::MedicalOnly,
        entries: EntryEditRight::OwnOnly,
        manage:  false,
        export:  ExportRight::ReportsOnly,
        history: HistoryWindow::RelevantScope,
      },
      Role::Institutional => Capabilities {
        view:    ViewScope::BasicCurrentDay,
        profile: ProfileEditRight::None,
        entries: EntryEditRight::OwnWithinSession,
        manage:  false,
        export:  ExportRight::None,
        history: HistoryWindow::CurrentDay,
      },
    }
  }
}

// ─── Actions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFields {
  General,
  Medical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExportScope {
  Full,
  Report,
}

#[derive(Debug, Clone, PartialEq, Eq, EnumDiscriminants)]
#[strum_discriminants(name(ActionKind), derive(EnumIter, IntoStaticStr, Hash))]
pub enum Action {
  ViewDependents,
  ViewActivity { dependent_id: Uuid },
  LogActivity { dependent_id: Uuid, kind: ActivityKind },
  CreateDependent,
  EditProfile { dependent_id: Uuid, fields: ProfileFields },
  /// Soft-delete or annotate an existing entry.
  EditEntry {
    dependent_id: Uuid,
    logged_by:    Uuid,
    logged_at:    DateTime<Utc>,
  },
  ViewMembers,
  InviteMember,
  /// Change another member's role or status.
  ManageMembers,
  LeaveGroup,
  ManageGrants,
  Export { dependent_id: Uuid, scope: ExportScope },
  ViewAudit,
  ViewPresence,
  UpdatePresence,
  Subscribe,
}

impl Action {
  /// The dependent this action is scoped to, if any. Such actions require a
  /// grant.
  pub fn dependent(&self) -> Option<Uuid> {
    match self {
      Action::ViewActivity { dependent_id }
      | Action::LogActivity { dependent_id, .. }
      | Action::EditProfile { dependent_id, .. }
      | Action::EditEntry { dependent_id, .. }
      | Action::Export { dependent_id, .. } => Some(*dependent_id),
      Action::ViewDependents
      | Action::CreateDependent
      | Action::ViewMembers
      | Action::InviteMember
      | Action::ManageMembers
      | Action::LeaveGroup
      | Action::ManageGrants
      | Action::ViewAudit
      | Action::ViewPresence
      | Action::UpdatePresence
      | Action::Subscribe => None,
    }
  }

  /// Whether the action leaves durable state untouched. Disabled groups only
  /// admit these.
  pub fn is_read(&self) -> bool {
    match self {
      Action::ViewDependents
      | Action::ViewActivity { .. }
      | Action::ViewMembers
      | Action::Export { .. }
      | Action::ViewAudit
      | Action::ViewPresence
      | Action::Subscribe => true,
      Action::LogActivity { .. }
      | Action::CreateDependent
      | Action::EditProfile { .. }
      | Action::EditEntry { .. }
      | Action::InviteMember
      | Action::ManageMembers
      | Action::LeaveGroup
      | Action::ManageGrants
      | Action::UpdatePresence => false,
    }
  }
}

// ─── Decisions ───────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, IntoStaticStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DenyReason {
  NotMember,
  RoleInsufficient,
  SessionExpired,
  GrantMissing,
  /// The group's grant on the dependent is too narrow for this action.
  GrantInsufficient,
}

impl DenyReason {
  /// A user-facing explanation of what access is missing.
  pub fn explain(self) -> &'static str {
    match self {
      Self::NotMember => "you are not an active member of this group",
      Self::RoleInsufficient => "your role does not allow this action",
      Self::SessionExpired => "your access window has ended; ask a core member to extend it",
      Self::GrantMissing => "this group has no access to that dependent",
      Self::GrantInsufficient => "this group's access level for that dependent does not allow this action",
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldScope {
  #[default]
  All,
  /// Kind, timestamps and attribution only; details are withheld.
  Basic,
}

/// Which activity events (and which of their fields) a caller may see.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilityFilter {
  /// Events logged before this instant are hidden.
  pub since:  Option<DateTime<Utc>>,
  /// If set, only these kinds are visible.
  pub kinds:  Option<Vec<ActivityKind>>,
  pub fields: FieldScope,
}

impl VisibilityFilter {
  pub fn unrestricted() -> Self { Self::default() }

  pub fn is_unrestricted(&self) -> bool {
    self.since.is_none() && self.kinds.is_none() && self.fields == FieldScope::All
  }

  pub fn permits(&self, event: &ActivityEvent) -> bool {
    if let Some(since) = self.since
      && event.logged_at < since
    {
      return false;
    }
    match &self.kinds {
      Some(kinds) => kinds.contains(&event.kind),
      None => true,
    }
  }

  /// Strip fields the caller may not see. Does not check [`Self::permits`].
  pub fn redact(&self, mut event: ActivityEvent) -> ActivityEvent {
    if self.fields == FieldScope::Basic {
      event.details = serde_json::Value::Null;
    }
    event
  }

  /// `permits` then `redact`.
  pub fn apply(&self, event: ActivityEvent) -> Option<ActivityEvent> {
    self.permits(&event).then(|| self.redact(event))
  }

  fn restrict_kinds(&mut self, allowed: &[ActivityKind]) {
    let kinds = match self.kinds.take() {
      Some(current) => current.into_iter().filter(|k| allowed.contains(k)).collect(),
      None => allowed.to_vec(),
    };
    self.kinds = Some(kinds);
  }

  fn restrict_since(&mut self, since: DateTime<Utc>) {
    self.since = Some(match self.since {
      Some(current) => current.max(since),
      None => since,
    });
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
  Allow,
  Deny(DenyReason),
  AllowFiltered(VisibilityFilter),
}

impl Decision {
  fn allow_with(filter: VisibilityFilter) -> Self {
    if filter.is_unrestricted() { Self::Allow } else { Self::AllowFiltered(filter) }
  }

  pub fn is_allowed(&self) -> bool { !matches!(self, Self::Deny(_)) }

  /// The filter to apply on success; `Err` carries the denial.
  pub fn into_result(self) -> Result<VisibilityFilter, DenyReason> {
    match self {
      Self::Allow => Ok(VisibilityFilter::unrestricted()),
      Self::AllowFiltered(filter) => Ok(filter),
      Self::Deny(reason) => Err(reason),
    }
  }
}

// ─── Context ─────────────────────────────────────────────────────────────────

/// Tunables that are fixed per deployment rather than per row.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
  /// Maximum length of an institutional session, counted from the first
  /// heartbeat of the day.
  pub institutional_session: TimeDelta,
  /// Used for professionals whose grant carries no relevant scope.
  pub default_relevant_scope: RelevantScope,
  /// Kinds included in a report export.
  pub report_kinds: Vec<ActivityKind>,
}

impl Default for AccessPolicy {
  fn default() -> Self {
    Self {
      institutional_session:  TimeDelta::hours(8),
      default_relevant_scope: RelevantScope {
        kinds:         ActivityKind::MEDICAL.to_vec(),
        lookback_days: None,
      },
      report_kinds:           ActivityKind::MEDICAL.to_vec(),
    }
  }
}

/// Everything [`evaluate`] needs. Built fresh per call; nothing here is
/// cached across calls because session limits depend on the wall clock.
#[derive(Debug, Clone)]
pub struct EvalContext<'a> {
  pub user_id:            Uuid,
  pub membership:         Option<&'a Membership>,
  /// The group's grant on the action's dependent, if the action has one.
  pub grant:              Option<&'a DependentAccessGrant>,
  pub settings:           &'a GroupSettings,
  /// First heartbeat of the caller's current session.
  pub session_started_at: Option<DateTime<Utc>>,
  pub now:                DateTime<Utc>,
  pub policy:             &'a AccessPolicy,
}

impl EvalContext<'_> {
  /// Start of the caller's current session window: today's first heartbeat,
  /// or the start of today if there has been none.
  pub fn session_start(&self) -> DateTime<Utc> {
    match self.session_started_at {
      Some(start) if self.settings.same_day(start, self.now) => start,
      _ => self.settings.day_start(self.now),
    }
  }

  fn session_exceeded(&self) -> bool {
    match self.session_started_at {
      Some(start) if self.settings.same_day(start, self.now) => {
        self.now - start >= self.policy.institutional_session
      }
      _ => false,
    }
  }
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

pub fn evaluate(ctx: &EvalContext<'_>, action: &Action) -> Decision {
  let Some(membership) = ctx.membership else {
    return Decision::Deny(DenyReason::NotMember);
  };
  if membership.user_id != ctx.user_id {
    return Decision::Deny(DenyReason::NotMember);
  }
  match membership.effective_status(ctx.now) {
    MembershipStatus::Active => {}
    MembershipStatus::Expired => return Decision::Deny(DenyReason::SessionExpired),
    MembershipStatus::Inactive | MembershipStatus::Suspended => {
      return Decision::Deny(DenyReason::NotMember);
    }
  }

  let role = membership.role;
  if role == Role::Institutional && ctx.session_exceeded() {
    return Decision::Deny(DenyReason::SessionExpired);
  }

  let grant = match action.dependent() {
    Some(dependent_id) => match ctx.grant {
      Some(g) if g.dependent_id == dependent_id && g.group_id == membership.group_id => Some(g),
      _ => return Decision::Deny(DenyReason::GrantMissing),
    },
    None => None,
  };

  decide(ctx, role.capabilities(), action, grant)
}

fn decide(
  ctx: &EvalContext<'_>,
  caps: Capabilities,
  action: &Action,
  grant: Option<&DependentAccessGrant>,
) -> Decision {
  use Decision::{Allow, Deny};
  use DenyReason::{GrantInsufficient, RoleInsufficient};

  let level = grant.map(|g| g.access_level);

  match action {
    Action::ViewDependents => match caps.view {
      ViewScope::Full => Allow,
      ViewScope::BasicCurrentDay => Decision::AllowFiltered(VisibilityFilter {
        fields: FieldScope::Basic,
        ..VisibilityFilter::unrestricted()
      }),
    },

    Action::ViewActivity { .. } => Decision::allow_with(role_filter(ctx, caps, grant)),

    Action::LogActivity { .. } => {
      if level.is_some_and(AccessLevel::allows_logging) { Allow } else { Deny(GrantInsufficient) }
    }

    Action::CreateDependent => match caps.profile {
      ProfileEditRight::Full => Allow,
      ProfileEditRight::MedicalOnly | ProfileEditRight::None => Deny(RoleInsufficient),
    },

    Action::EditProfile { fields, .. } => {
      let role_ok = match caps.profile {
        ProfileEditRight::Full => true,
        ProfileEditRight::MedicalOnly => *fields == ProfileFields::Medical,
        ProfileEditRight::None => false,
      };
      if !role_ok {
        Deny(RoleInsufficient)
      } else if !level.is_some_and(AccessLevel::allows_profile_edits) {
        Deny(GrantInsufficient)
      } else {
        Allow
      }
    }

    Action::EditEntry { logged_by, logged_at, .. } => {
      let own = *logged_by == ctx.user_id;
      let role_ok = match caps.entries {
        EntryEditRight::Any => true,
        EntryEditRight::OwnOnly => own,
        EntryEditRight::OwnWithinSession => own && *logged_at >= ctx.session_start(),
      };
      if !role_ok {
        Deny(RoleInsufficient)
      } else if !level.is_some_and(AccessLevel::allows_logging) {
        Deny(GrantInsufficient)
      } else {
        Allow
      }
    }

    Action::InviteMember | Action::ManageMembers | Action::ManageGrants | Action::ViewAudit => {
      if caps.manage { Allow } else { Deny(RoleInsufficient) }
    }

    Action::Export { scope, .. } => match (caps.export, scope) {
      (ExportRight::Full, _) => Decision::allow_with(role_filter(ctx, caps, grant)),
      (ExportRight::ReportsOnly, ExportScope::Report) => {
        let mut filter = role_filter(ctx, caps, grant);
        filter.restrict_kinds(&ctx.policy.report_kinds);
        Decision::allow_with(filter)
      }
      (ExportRight::ReportsOnly, ExportScope::Full) | (ExportRight::None, _) => {
        Deny(RoleInsufficient)
      }
    },

    Action::ViewMembers
    | Action::LeaveGroup
    | Action::ViewPresence
    | Action::UpdatePresence
    | Action::Subscribe => Allow,
  }
}

/// The history/field filter a role imposes, narrowed by the grant.
fn role_filter(
  ctx: &EvalContext<'_>,
  caps: Capabilities,
  grant: Option<&DependentAccessGrant>,
) -> VisibilityFilter {
  let mut filter = VisibilityFilter::unrestricted();

  match caps.history {
    HistoryWindow::Unlimited => {}
    HistoryWindow::CurrentDay => filter.restrict_since(ctx.settings.day_start(ctx.now)),
    HistoryWindow::RelevantScope => {
      let scope = grant
        .and_then(|g| g.relevant_scope.as_ref())
        .unwrap_or(&ctx.policy.default_relevant_scope);
      filter.restrict_kinds(&scope.kinds);
      if let Some(days) = scope.lookback_days {
        filter.restrict_since(ctx.now - TimeDelta::days(i64::from(days)));
      }
    }
  }

  if caps.view == ViewScope::BasicCurrentDay {
    filter.fields = FieldScope::Basic;
    filter.restrict_since(ctx.settings.day_start(ctx.now));
  }

  if let Some(allowed) = grant.and_then(|g| g.access_level.kind_restriction()) {
    filter.restrict_kinds(allowed);
  }

  filter
}
