//! Groups, dependents, grants and the audit log.

use chrono::TimeDelta;
use tend_core::{
  audit::AuditLogEntry,
  dependent::{
    AccessLevel, Dependent, DependentAccessGrant, DependentProfile, NewDependent, ProfilePatch,
    RelevantScope,
  },
  group::{Group, GroupKind, GroupSettings, NewGroup},
  membership::Membership,
  permission::{Action, ProfileFields},
  store::CareStore,
};
use tracing::info;
use uuid::Uuid;

use crate::{Error, Hub, Result, retry::with_retry};

/// UTC offsets in use range from -12:00 to +14:00.
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

const PERSONAL_GROUP_NAME: &str = "Personal";

fn validate_name(name: &str, what: &str) -> Result<String> {
  let name = name.trim();
  if name.is_empty() {
    return Err(Error::InvalidInput(format!("{what} must not be empty")));
  }
  Ok(name.to_string())
}

fn validate_settings(settings: &GroupSettings) -> Result<()> {
  if settings.utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
    return Err(Error::InvalidInput(format!(
      "utc_offset_minutes out of range: {}",
      settings.utc_offset_minutes
    )));
  }
  Ok(())
}

impl<S: CareStore> Hub<S> {
  // ─── Groups ────────────────────────────────────────────────────────────────

  /// Create a group with the caller as its owner and sole core member.
  pub async fn create_group(
    &self,
    user_id: Uuid,
    name: &str,
    kind: GroupKind,
    settings: GroupSettings,
  ) -> Result<(Group, Membership)> {
    if kind == GroupKind::Personal {
      return Err(Error::InvalidInput("personal groups are created implicitly".into()));
    }
    let name = validate_name(name, "group name")?;
    validate_settings(&settings)?;
    self.insert_group(user_id, name, kind, settings).await
  }

  /// The caller's personal group, created on first use.
  pub async fn ensure_personal_group(&self, user_id: Uuid) -> Result<Group> {
    let _guard = self.locks.lock(user_id).await;
    let existing = self.store.list_groups_for_user(user_id).await.map_err(Error::store)?;
    if let Some(group) =
      existing.into_iter().find(|g| g.kind == GroupKind::Personal && g.owner_id == user_id)
    {
      return Ok(group);
    }
    let (group, _) = self
      .insert_group(user_id, PERSONAL_GROUP_NAME.to_string(), GroupKind::Personal, GroupSettings::default())
      .await?;
    Ok(group)
  }

  async fn insert_group(
    &self,
    user_id: Uuid,
    name: String,
    kind: GroupKind,
    settings: GroupSettings,
  ) -> Result<(Group, Membership)> {
    let input = NewGroup {
      group_id: Uuid::new_v4(),
      name,
      kind,
      owner_id: user_id,
      settings,
      created_at: self.now(),
    };
    let store = &self.store;
    let (group, membership) =
      with_retry(&self.config.retry, "create_group", move || store.create_group(input.clone())).await?;
    info!(group_id = %group.group_id, owner = %user_id, kind = %group.kind, "group created");
    Ok((group, membership))
  }

  /// Groups the caller belongs to, in any membership state.
  pub async fn my_groups(&self, user_id: Uuid) -> Result<Vec<Group>> {
    self.store.list_groups_for_user(user_id).await.map_err(Error::store)
  }

  /// Soft-disable a group. It stays readable; writes are refused.
  pub async fn disable_group(&self, user_id: Uuid, group_id: Uuid) -> Result<Group> {
    let auth = self.check_access(user_id, group_id, &Action::ManageMembers).await?;
    if auth.group.is_disabled() {
      return Ok(auth.group);
    }
    let now = self.now();
    let store = &self.store;
    let group = with_retry(&self.config.retry, "disable_group", move || {
      store.disable_group(group_id, user_id, now)
    })
    .await?
    .ok_or(Error::NotFound("group"))?;
    info!(%group_id, by = %user_id, "group disabled");
    Ok(group)
  }

  // ─── Dependents ────────────────────────────────────────────────────────────

  pub async fn add_dependent(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    mut profile: DependentProfile,
  ) -> Result<(Dependent, DependentAccessGrant)> {
    profile.display_name = validate_name(&profile.display_name, "display_name")?;
    self.authorize(user_id, group_id, &Action::CreateDependent).await?;

    let input = NewDependent {
      dependent_id: Uuid::new_v4(),
      group_id,
      profile,
      created_by: user_id,
      created_at: self.now(),
    };
    let store = &self.store;
    let (dependent, grant) =
      with_retry(&self.config.retry, "add_dependent", move || store.add_dependent(input.clone())).await?;
    info!(dependent_id = %dependent.dependent_id, %group_id, by = %user_id, "dependent added");
    Ok((dependent, grant))
  }

  /// Apply a partial profile edit. A patch that only touches medical fields
  /// needs medical edit rights; anything else needs full rights.
  pub async fn update_profile(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    dependent_id: Uuid,
    patch: ProfilePatch,
  ) -> Result<Dependent> {
    let fields = if patch.touches_general() {
      ProfileFields::General
    } else if patch.touches_medical() {
      ProfileFields::Medical
    } else {
      return Err(Error::InvalidInput("profile patch changes nothing".into()));
    };
    self.authorize(user_id, group_id, &Action::EditProfile { dependent_id, fields }).await?;

    let _guard = self.locks.lock(dependent_id).await;
    let current = self
      .store
      .get_dependent(dependent_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("dependent"))?;
    let mut profile = current.profile;
    patch.apply_to(&mut profile);
    profile.display_name = validate_name(&profile.display_name, "display_name")?;

    let now = self.now();
    let store = &self.store;
    let updated = with_retry(&self.config.retry, "update_profile", move || {
      store.update_profile(dependent_id, profile.clone(), group_id, user_id, now)
    })
    .await?
    .ok_or(Error::NotFound("dependent"))?;
    info!(%dependent_id, by = %user_id, ?fields, "profile edited");
    Ok(updated)
  }

  // ─── Grants ────────────────────────────────────────────────────────────────

  /// Give `target_group` access to a dependent, or change its access. Only
  /// core members of the dependent's own group may do this.
  pub async fn set_grant(
    &self,
    user_id: Uuid,
    dependent_id: Uuid,
    target_group: Uuid,
    access_level: AccessLevel,
    relevant_scope: Option<RelevantScope>,
  ) -> Result<DependentAccessGrant> {
    let dependent = self
      .store
      .get_dependent(dependent_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("dependent"))?;
    self.authorize(user_id, dependent.group_id, &Action::ManageGrants).await?;

    if target_group == dependent.group_id && access_level != AccessLevel::Full {
      return Err(Error::InvalidInput("the owning group always has full access".into()));
    }
    if let Some(scope) = &relevant_scope
      && scope.kinds.is_empty()
    {
      return Err(Error::InvalidInput("relevant scope must name at least one kind".into()));
    }
    let target = self
      .store
      .get_group(target_group)
      .await
      .map_err(Error::store)?
      .ok_or(Error::NotFound("group"))?;
    if target.is_disabled() {
      return Err(Error::InvalidInput("target group is disabled".into()));
    }

    let grant = DependentAccessGrant {
      group_id: target_group,
      dependent_id,
      access_level,
      relevant_scope,
      granted_by: user_id,
      granted_at: self.now(),
    };
    let store = &self.store;
    let grant =
      with_retry(&self.config.retry, "upsert_grant", move || store.upsert_grant(grant.clone())).await?;
    info!(%dependent_id, group_id = %target_group, level = %access_level, by = %user_id, "grant set");
    Ok(grant)
  }

  // ─── Audit ─────────────────────────────────────────────────────────────────

  /// Newest first.
  pub async fn audit_log(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    limit: Option<usize>,
  ) -> Result<Vec<AuditLogEntry>> {
    self.check_access(user_id, group_id, &Action::ViewAudit).await?;
    self.store.list_audit(group_id, limit).await.map_err(Error::store)
  }

  /// Drop audit entries older than the group's retention setting. Returns
  /// how many were removed.
  pub async fn prune_audit(&self, user_id: Uuid, group_id: Uuid) -> Result<usize> {
    let auth = self.authorize(user_id, group_id, &Action::ManageMembers).await?;
    let Some(days) = auth.group.settings.audit_retention_days else {
      return Ok(0);
    };
    let before = self.now() - TimeDelta::days(i64::from(days));
    let removed = self.store.prune_audit(group_id, before).await.map_err(Error::store)?;
    info!(%group_id, removed, %before, "audit pruned");
    Ok(removed)
  }
}
