//! [`SqliteStore`], the SQLite implementation of [`CareStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};
use serde_json::json;
use tend_core::{
  activity::{
    ActivityEvent, ActivityQuery, ActivityRemoval, Annotation, PendingActivity, RemovalOutcome,
    ResolvedActivity,
  },
  audit::{AuditAction, AuditLogEntry},
  conflict::Resolution,
  dependent::{AccessLevel, Dependent, DependentAccessGrant, DependentProfile, NewDependent},
  group::{Group, NewGroup},
  invitation::{Invitation, InvitationError, InvitationStatus, Redemption, RedemptionOutcome},
  membership::{
    Membership, MembershipStatus, MembershipUpdate, MembershipUpdateOutcome, NewMembership, Role,
    would_orphan_group,
  },
  store::CareStore,
};
use uuid::Uuid;

use crate::{
  Result,
  encode::{
    RawAnnotation, RawAuditEntry, RawDependent, RawGrant, RawGroup, RawInvitation,
    RawMembership, RawResolvedActivity, encode_dt, encode_enum, encode_json, encode_uuid,
  },
  error::in_call,
  schema::SCHEMA,
};

type CallResult<T> = std::result::Result<T, tokio_rusqlite::Error>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tend care store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted. All calls
/// are serialised on the connection's thread.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Statement helpers ───────────────────────────────────────────────────────
//
// These run inside `Connection::call` closures, usually on an open
// transaction, so they return `tokio_rusqlite` errors.

fn audit(
  conn: &Connection,
  group_id: Uuid,
  actor_id: Uuid,
  action: AuditAction,
  subject_id: Option<Uuid>,
  details: serde_json::Value,
  at: DateTime<Utc>,
) -> CallResult<()> {
  insert_audit(conn, &AuditLogEntry::new(group_id, actor_id, action, subject_id, details, at))
}

fn insert_audit(conn: &Connection, entry: &AuditLogEntry) -> CallResult<()> {
  let details = encode_json(&entry.details).map_err(in_call)?;
  conn.execute(
    "INSERT INTO audit_log (entry_id, group_id, actor_id, action, subject_id, details, recorded_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    params![
      encode_uuid(entry.entry_id),
      encode_uuid(entry.group_id),
      encode_uuid(entry.actor_id),
      encode_enum(entry.action),
      entry.subject_id.map(encode_uuid),
      details,
      encode_dt(entry.recorded_at),
    ],
  )?;
  Ok(())
}

fn find_group(conn: &Connection, group_id: &str) -> CallResult<Option<Group>> {
  let sql = format!("SELECT {} FROM care_groups g WHERE g.group_id = ?1", RawGroup::COLUMNS);
  let raw = conn.query_row(&sql, params![group_id], RawGroup::from_row).optional()?;
  raw.map(RawGroup::into_group).transpose().map_err(in_call)
}

fn find_dependent(conn: &Connection, dependent_id: &str) -> CallResult<Option<Dependent>> {
  let sql = format!(
    "SELECT {} FROM dependents d WHERE d.dependent_id = ?1",
    RawDependent::COLUMNS
  );
  let raw = conn.query_row(&sql, params![dependent_id], RawDependent::from_row).optional()?;
  raw.map(RawDependent::into_dependent).transpose().map_err(in_call)
}

fn find_membership(
  conn: &Connection,
  group_id: &str,
  user_id: &str,
) -> CallResult<Option<Membership>> {
  let sql = format!(
    "SELECT {} FROM memberships m WHERE m.group_id = ?1 AND m.user_id = ?2",
    RawMembership::COLUMNS
  );
  let raw = conn
    .query_row(&sql, params![group_id, user_id], RawMembership::from_row)
    .optional()?;
  raw.map(RawMembership::into_membership).transpose().map_err(in_call)
}

fn group_memberships(conn: &Connection, group_id: &str) -> CallResult<Vec<Membership>> {
  let sql = format!(
    "SELECT {} FROM memberships m WHERE m.group_id = ?1 ORDER BY m.joined_at, m.membership_id",
    RawMembership::COLUMNS
  );
  let mut stmt = conn.prepare(&sql)?;
  let raws = stmt
    .query_map(params![group_id], RawMembership::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws
    .into_iter()
    .map(|r| r.into_membership().map_err(in_call))
    .collect()
}

fn has_dependents(conn: &Connection, group_id: &str) -> CallResult<bool> {
  Ok(conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM grants WHERE group_id = ?1)",
    params![group_id],
    |r| r.get(0),
  )?)
}

/// Would moving `user_id` to (`role`, `status`) leave the group without an
/// active core member?
fn orphans_group(
  conn: &Connection,
  group_id: Uuid,
  user_id: Uuid,
  role: Role,
  status: MembershipStatus,
  at: DateTime<Utc>,
) -> CallResult<bool> {
  let group = encode_uuid(group_id);
  let members = group_memberships(conn, &group)?;
  let has_dependents = has_dependents(conn, &group)?;
  Ok(would_orphan_group(&members, user_id, role, status, has_dependents, at))
}

fn insert_membership(conn: &Connection, m: &Membership) -> CallResult<()> {
  conn.execute(
    "INSERT INTO memberships (
       membership_id, user_id, group_id, role, status,
       access_expires_at, invited_by, joined_at, updated_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    params![
      encode_uuid(m.membership_id),
      encode_uuid(m.user_id),
      encode_uuid(m.group_id),
      encode_enum(m.role),
      encode_enum(m.status),
      m.access_expires_at.map(encode_dt),
      m.invited_by.map(encode_uuid),
      encode_dt(m.joined_at),
      encode_dt(m.updated_at),
    ],
  )?;
  Ok(())
}

/// Overwrite role, status and expiry of an existing row, auditing whatever
/// changed.
fn change_membership(
  conn: &Connection,
  current: &Membership,
  role: Role,
  status: MembershipStatus,
  access_expires_at: Option<DateTime<Utc>>,
  actor_id: Uuid,
  at: DateTime<Utc>,
) -> CallResult<Membership> {
  conn.execute(
    "UPDATE memberships
     SET role = ?2, status = ?3, access_expires_at = ?4, updated_at = ?5
     WHERE membership_id = ?1",
    params![
      encode_uuid(current.membership_id),
      encode_enum(role),
      encode_enum(status),
      access_expires_at.map(encode_dt),
      encode_dt(at),
    ],
  )?;

  if role != current.role {
    audit(
      conn,
      current.group_id,
      actor_id,
      AuditAction::RoleChanged,
      Some(current.user_id),
      json!({ "from": current.role, "to": role }),
      at,
    )?;
  }
  if status != current.status {
    audit(
      conn,
      current.group_id,
      actor_id,
      AuditAction::StatusChanged,
      Some(current.user_id),
      json!({ "from": current.status, "to": status }),
      at,
    )?;
  }

  Ok(Membership {
    role,
    status,
    access_expires_at,
    updated_at: at,
    ..current.clone()
  })
}

fn read_activity(conn: &Connection, activity_id: &str) -> CallResult<Option<RawResolvedActivity>> {
  let sql = format!("{} WHERE a.activity_id = ?1", RawResolvedActivity::SELECT);
  Ok(
    conn
      .query_row(&sql, params![activity_id], RawResolvedActivity::from_row)
      .optional()?,
  )
}

fn activity_exists(conn: &Connection, activity_id: &str) -> CallResult<bool> {
  Ok(conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM activities WHERE activity_id = ?1)",
    params![activity_id],
    |r| r.get(0),
  )?)
}

// ─── CareStore impl ──────────────────────────────────────────────────────────

impl CareStore for SqliteStore {
  type Error = crate::Error;

  // ── Groups ────────────────────────────────────────────────────────────────

  async fn create_group(&self, input: NewGroup) -> Result<(Group, Membership)> {
    let group = Group {
      group_id:    input.group_id,
      name:        input.name,
      kind:        input.kind,
      owner_id:    input.owner_id,
      created_at:  input.created_at,
      settings:    input.settings,
      disabled_at: None,
    };
    let membership = Membership {
      membership_id:     Uuid::new_v4(),
      user_id:           group.owner_id,
      group_id:          group.group_id,
      role:              Role::Core,
      status:            MembershipStatus::Active,
      access_expires_at: None,
      invited_by:        None,
      joined_at:         group.created_at,
      updated_at:        group.created_at,
    };

    let settings = encode_json(&group.settings)?;
    let (g, m) = (group.clone(), membership.clone());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO care_groups (group_id, name, kind, owner_id, created_at, settings)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          params![
            encode_uuid(g.group_id),
            g.name,
            encode_enum(g.kind),
            encode_uuid(g.owner_id),
            encode_dt(g.created_at),
            settings,
          ],
        )?;
        insert_membership(&tx, &m)?;
        audit(
          &tx,
          g.group_id,
          g.owner_id,
          AuditAction::GroupCreated,
          Some(g.group_id),
          json!({ "name": g.name, "kind": g.kind }),
          g.created_at,
        )?;
        audit(
          &tx,
          g.group_id,
          g.owner_id,
          AuditAction::MembershipCreated,
          Some(m.user_id),
          json!({ "role": m.role }),
          g.created_at,
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok((group, membership))
  }

  async fn get_group(&self, group_id: Uuid) -> Result<Option<Group>> {
    let id = encode_uuid(group_id);
    Ok(self.conn.call(move |conn| find_group(conn, &id)).await?)
  }

  async fn list_groups_for_user(&self, user_id: Uuid) -> Result<Vec<Group>> {
    let user = encode_uuid(user_id);

    let raws: Vec<RawGroup> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM care_groups g
           JOIN memberships m ON m.group_id = g.group_id
           WHERE m.user_id = ?1
           ORDER BY g.created_at",
          RawGroup::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![user], RawGroup::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawGroup::into_group).collect()
  }

  async fn disable_group(
    &self,
    group_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Option<Group>> {
    let id = encode_uuid(group_id);

    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let Some(group) = find_group(&tx, &id)? else {
            return Ok(None);
          };
          if group.is_disabled() {
            return Ok(Some(group));
          }
          tx.execute(
            "UPDATE care_groups SET disabled_at = ?2 WHERE group_id = ?1",
            params![id, encode_dt(at)],
          )?;
          audit(&tx, group_id, actor_id, AuditAction::GroupDisabled, Some(group_id), json!(null), at)?;
          tx.commit()?;
          Ok(Some(Group { disabled_at: Some(at), ..group }))
        })
        .await?,
    )
  }

  // ── Dependents & grants ───────────────────────────────────────────────────

  async fn add_dependent(&self, input: NewDependent) -> Result<(Dependent, DependentAccessGrant)> {
    let dependent = Dependent {
      dependent_id: input.dependent_id,
      group_id:     input.group_id,
      profile:      input.profile,
      created_at:   input.created_at,
      created_by:   input.created_by,
    };
    let grant = DependentAccessGrant {
      group_id:       dependent.group_id,
      dependent_id:   dependent.dependent_id,
      access_level:   AccessLevel::Full,
      relevant_scope: None,
      granted_by:     dependent.created_by,
      granted_at:     dependent.created_at,
    };

    let profile = encode_json(&dependent.profile)?;
    let d = dependent.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO dependents (dependent_id, group_id, profile, created_at, created_by)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![
            encode_uuid(d.dependent_id),
            encode_uuid(d.group_id),
            profile,
            encode_dt(d.created_at),
            encode_uuid(d.created_by),
          ],
        )?;
        tx.execute(
          "INSERT INTO grants (group_id, dependent_id, access_level, granted_by, granted_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![
            encode_uuid(d.group_id),
            encode_uuid(d.dependent_id),
            encode_enum(AccessLevel::Full),
            encode_uuid(d.created_by),
            encode_dt(d.created_at),
          ],
        )?;
        audit(
          &tx,
          d.group_id,
          d.created_by,
          AuditAction::DependentAdded,
          Some(d.dependent_id),
          json!({ "display_name": d.profile.display_name }),
          d.created_at,
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok((dependent, grant))
  }

  async fn get_dependent(&self, dependent_id: Uuid) -> Result<Option<Dependent>> {
    let id = encode_uuid(dependent_id);
    Ok(self.conn.call(move |conn| find_dependent(conn, &id)).await?)
  }

  async fn list_dependents(&self, group_id: Uuid) -> Result<Vec<(Dependent, DependentAccessGrant)>> {
    let group = encode_uuid(group_id);

    let raws: Vec<(RawDependent, RawGrant)> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {}, {} FROM dependents d
           JOIN grants gr ON gr.dependent_id = d.dependent_id
           WHERE gr.group_id = ?1
           ORDER BY d.created_at",
          RawDependent::COLUMNS,
          RawGrant::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![group], |row| {
            Ok((RawDependent::from_row(row)?, RawGrant::from_row_at(row, 5)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(d, g)| Ok((d.into_dependent()?, g.into_grant()?)))
      .collect()
  }

  async fn update_profile(
    &self,
    dependent_id: Uuid,
    profile: DependentProfile,
    group_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Option<Dependent>> {
    let id = encode_uuid(dependent_id);
    let encoded = encode_json(&profile)?;

    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let changed = tx.execute(
            "UPDATE dependents SET profile = ?2 WHERE dependent_id = ?1",
            params![id, encoded],
          )?;
          if changed == 0 {
            return Ok(None);
          }
          audit(
            &tx,
            group_id,
            actor_id,
            AuditAction::ProfileEdited,
            Some(dependent_id),
            json!(null),
            at,
          )?;
          let dependent = find_dependent(&tx, &id)?;
          tx.commit()?;
          Ok(dependent)
        })
        .await?,
    )
  }

  async fn upsert_grant(&self, grant: DependentAccessGrant) -> Result<DependentAccessGrant> {
    let scope = grant.relevant_scope.as_ref().map(encode_json).transpose()?;
    let g = grant.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO grants (
             group_id, dependent_id, access_level, relevant_scope, granted_by, granted_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT (group_id, dependent_id) DO UPDATE SET
             access_level   = excluded.access_level,
             relevant_scope = excluded.relevant_scope,
             granted_by     = excluded.granted_by,
             granted_at     = excluded.granted_at",
          params![
            encode_uuid(g.group_id),
            encode_uuid(g.dependent_id),
            encode_enum(g.access_level),
            scope,
            encode_uuid(g.granted_by),
            encode_dt(g.granted_at),
          ],
        )?;
        audit(
          &tx,
          g.group_id,
          g.granted_by,
          AuditAction::GrantChanged,
          Some(g.dependent_id),
          json!({ "access_level": g.access_level, "relevant_scope": g.relevant_scope }),
          g.granted_at,
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(grant)
  }

  async fn get_grant(
    &self,
    group_id: Uuid,
    dependent_id: Uuid,
  ) -> Result<Option<DependentAccessGrant>> {
    let (group, dep) = (encode_uuid(group_id), encode_uuid(dependent_id));

    let raw: Option<RawGrant> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM grants gr WHERE gr.group_id = ?1 AND gr.dependent_id = ?2",
          RawGrant::COLUMNS
        );
        Ok(
          conn
            .query_row(&sql, params![group, dep], |row| RawGrant::from_row_at(row, 0))
            .optional()?,
        )
      })
      .await?;

    raw.map(RawGrant::into_grant).transpose()
  }

  async fn list_grants_for_dependent(&self, dependent_id: Uuid) -> Result<Vec<DependentAccessGrant>> {
    let dep = encode_uuid(dependent_id);

    let raws: Vec<RawGrant> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM grants gr WHERE gr.dependent_id = ?1 ORDER BY gr.granted_at",
          RawGrant::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![dep], |row| RawGrant::from_row_at(row, 0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawGrant::into_grant).collect()
  }

  // ── Memberships ───────────────────────────────────────────────────────────

  async fn get_membership(&self, group_id: Uuid, user_id: Uuid) -> Result<Option<Membership>> {
    let (group, user) = (encode_uuid(group_id), encode_uuid(user_id));
    Ok(self.conn.call(move |conn| find_membership(conn, &group, &user)).await?)
  }

  async fn list_memberships(&self, group_id: Uuid) -> Result<Vec<Membership>> {
    let group = encode_uuid(group_id);
    Ok(self.conn.call(move |conn| group_memberships(conn, &group)).await?)
  }

  async fn upsert_membership(&self, input: NewMembership) -> Result<MembershipUpdateOutcome> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let (group, user) = (encode_uuid(input.group_id), encode_uuid(input.user_id));

          let membership = match find_membership(&tx, &group, &user)? {
            Some(current) => {
              if orphans_group(&tx, input.group_id, input.user_id, input.role, input.status, input.at)? {
                return Ok(MembershipUpdateOutcome::LastCoreMember);
              }
              change_membership(
                &tx,
                &current,
                input.role,
                input.status,
                input.access_expires_at,
                input.actor_id,
                input.at,
              )?
            }
            None => {
              let m = Membership {
                membership_id:     Uuid::new_v4(),
                user_id:           input.user_id,
                group_id:          input.group_id,
                role:              input.role,
                status:            input.status,
                access_expires_at: input.access_expires_at,
                invited_by:        input.invited_by,
                joined_at:         input.at,
                updated_at:        input.at,
              };
              insert_membership(&tx, &m)?;
              audit(
                &tx,
                m.group_id,
                input.actor_id,
                AuditAction::MembershipCreated,
                Some(m.user_id),
                json!({ "role": m.role, "status": m.status }),
                input.at,
              )?;
              m
            }
          };

          tx.commit()?;
          Ok(MembershipUpdateOutcome::Updated(membership))
        })
        .await?,
    )
  }

  async fn update_membership(&self, update: MembershipUpdate) -> Result<MembershipUpdateOutcome> {
    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let (group, user) = (encode_uuid(update.group_id), encode_uuid(update.user_id));

          let Some(current) = find_membership(&tx, &group, &user)? else {
            return Ok(MembershipUpdateOutcome::NotFound);
          };
          if current.role != update.expected_role || current.status != update.expected_status {
            return Ok(MembershipUpdateOutcome::Stale(current));
          }

          let (role, status) = (update.new_role(), update.new_status());
          if orphans_group(&tx, update.group_id, update.user_id, role, status, update.at)? {
            return Ok(MembershipUpdateOutcome::LastCoreMember);
          }

          let updated = change_membership(
            &tx,
            &current,
            role,
            status,
            current.access_expires_at,
            update.actor_id,
            update.at,
          )?;
          tx.commit()?;
          Ok(MembershipUpdateOutcome::Updated(updated))
        })
        .await?,
    )
  }

  // ── Invitations ───────────────────────────────────────────────────────────

  async fn create_invitation(&self, invitation: Invitation) -> Result<Invitation> {
    let restrictions = encode_json(&invitation.restrictions)?;
    let inv = invitation.clone();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO invitations (
             invitation_id, token_hash, group_id, email, role, invited_by,
             created_at, expires_at, status, restrictions
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          params![
            encode_uuid(inv.invitation_id),
            inv.token_hash,
            encode_uuid(inv.group_id),
            inv.email,
            encode_enum(inv.role),
            encode_uuid(inv.invited_by),
            encode_dt(inv.created_at),
            encode_dt(inv.expires_at),
            encode_enum(inv.status),
            restrictions,
          ],
        )?;
        audit(
          &tx,
          inv.group_id,
          inv.invited_by,
          AuditAction::InvitationIssued,
          Some(inv.invitation_id),
          json!({ "email": inv.email, "role": inv.role }),
          inv.created_at,
        )?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    Ok(invitation)
  }

  async fn get_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>> {
    let id = encode_uuid(invitation_id);

    let raw: Option<RawInvitation> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM invitations i WHERE i.invitation_id = ?1",
          RawInvitation::COLUMNS
        );
        Ok(conn.query_row(&sql, params![id], RawInvitation::from_row).optional()?)
      })
      .await?;

    raw.map(RawInvitation::into_invitation).transpose()
  }

  async fn list_invitations(&self, group_id: Uuid) -> Result<Vec<Invitation>> {
    let group = encode_uuid(group_id);

    let raws: Vec<RawInvitation> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {} FROM invitations i WHERE i.group_id = ?1 ORDER BY i.created_at DESC",
          RawInvitation::COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params![group], RawInvitation::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawInvitation::into_invitation).collect()
  }

  async fn redeem_invitation(&self, redemption: Redemption) -> Result<RedemptionOutcome> {
    let Redemption { token_hash, user_id, email, at } = redemption;

    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;

          let sql = format!(
            "SELECT {} FROM invitations i WHERE i.token_hash = ?1",
            RawInvitation::COLUMNS
          );
          let Some(raw) = tx.query_row(&sql, params![token_hash], RawInvitation::from_row).optional()?
          else {
            return Ok(RedemptionOutcome::Rejected(InvitationError::TokenInvalid));
          };
          let invitation = raw.into_invitation().map_err(in_call)?;

          if let Err(e) = invitation.check_redeemable(email.as_deref(), at) {
            return Ok(RedemptionOutcome::Rejected(e));
          }

          let group = encode_uuid(invitation.group_id);
          let user = encode_uuid(user_id);
          let access_expires_at = invitation.restrictions.access_expires_at;

          let membership = match find_membership(&tx, &group, &user)? {
            Some(current) => {
              if orphans_group(
                &tx,
                invitation.group_id,
                user_id,
                invitation.role,
                MembershipStatus::Active,
                at,
              )? {
                return Ok(RedemptionOutcome::LastCoreMember);
              }
              change_membership(
                &tx,
                &current,
                invitation.role,
                MembershipStatus::Active,
                access_expires_at,
                user_id,
                at,
              )?
            }
            None => {
              let m = Membership {
                membership_id: Uuid::new_v4(),
                user_id,
                group_id: invitation.group_id,
                role: invitation.role,
                status: MembershipStatus::Active,
                access_expires_at,
                invited_by: Some(invitation.invited_by),
                joined_at: at,
                updated_at: at,
              };
              insert_membership(&tx, &m)?;
              audit(
                &tx,
                m.group_id,
                user_id,
                AuditAction::MembershipCreated,
                Some(user_id),
                json!({ "role": m.role, "invitation_id": invitation.invitation_id }),
                at,
              )?;
              m
            }
          };

          // Guard against a concurrent redemption that slipped in first.
          let claimed = tx.execute(
            "UPDATE invitations SET status = ?2, accepted_by = ?3, accepted_at = ?4
             WHERE invitation_id = ?1 AND status = ?5",
            params![
              encode_uuid(invitation.invitation_id),
              encode_enum(InvitationStatus::Accepted),
              user,
              encode_dt(at),
              encode_enum(InvitationStatus::Pending),
            ],
          )?;
          if claimed != 1 {
            return Ok(RedemptionOutcome::Rejected(InvitationError::TokenAlreadyUsed));
          }

          audit(
            &tx,
            invitation.group_id,
            user_id,
            AuditAction::InvitationAccepted,
            Some(invitation.invitation_id),
            json!({ "role": invitation.role }),
            at,
          )?;
          tx.commit()?;

          Ok(RedemptionOutcome::Accepted {
            invitation: Invitation {
              status: InvitationStatus::Accepted,
              accepted_by: Some(user_id),
              accepted_at: Some(at),
              ..invitation
            },
            membership,
          })
        })
        .await?,
    )
  }

  async fn revoke_invitation(
    &self,
    invitation_id: Uuid,
    actor_id: Uuid,
    at: DateTime<Utc>,
  ) -> Result<Option<Invitation>> {
    let id = encode_uuid(invitation_id);

    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let sql = format!(
            "SELECT {} FROM invitations i WHERE i.invitation_id = ?1",
            RawInvitation::COLUMNS
          );
          let Some(raw) = tx.query_row(&sql, params![id], RawInvitation::from_row).optional()? else {
            return Ok(None);
          };
          let invitation = raw.into_invitation().map_err(in_call)?;
          if invitation.status != InvitationStatus::Pending {
            return Ok(Some(invitation));
          }

          tx.execute(
            "UPDATE invitations SET status = ?2 WHERE invitation_id = ?1",
            params![id, encode_enum(InvitationStatus::Revoked)],
          )?;
          audit(
            &tx,
            invitation.group_id,
            actor_id,
            AuditAction::InvitationRevoked,
            Some(invitation_id),
            json!({ "email": invitation.email }),
            at,
          )?;
          tx.commit()?;
          Ok(Some(Invitation { status: InvitationStatus::Revoked, ..invitation }))
        })
        .await?,
    )
  }

  // ── Activities ────────────────────────────────────────────────────────────

  async fn insert_activity(&self, input: PendingActivity) -> Result<ActivityEvent> {
    let details = encode_json(&input.details)?;
    let p = input.clone();

    let sequence = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO activities (
             activity_id, dependent_id, group_id, kind,
             logged_at, logged_by, details, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          params![
            encode_uuid(p.activity_id),
            encode_uuid(p.dependent_id),
            encode_uuid(p.group_id),
            encode_enum(p.kind),
            encode_dt(p.logged_at),
            encode_uuid(p.logged_by),
            details,
            encode_dt(p.recorded_at),
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(ActivityEvent {
      activity_id: input.activity_id,
      dependent_id: input.dependent_id,
      group_id: input.group_id,
      kind: input.kind,
      logged_at: input.logged_at,
      logged_by: input.logged_by,
      details: input.details,
      conflict: None,
      sequence,
      recorded_at: input.recorded_at,
    })
  }

  async fn get_activity(&self, activity_id: Uuid) -> Result<Option<ResolvedActivity>> {
    let id = encode_uuid(activity_id);
    let raw = self.conn.call(move |conn| read_activity(conn, &id)).await?;
    raw.map(RawResolvedActivity::into_resolved).transpose()
  }

  async fn list_activities(
    &self,
    dependent_id: Uuid,
    query: ActivityQuery,
  ) -> Result<Vec<ResolvedActivity>> {
    let dep = encode_uuid(dependent_id);
    let since = query.since.map(encode_dt);
    let until = query.until.map(encode_dt);
    let limit = query
      .limit
      .map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let order = if query.newest_first { "DESC" } else { "ASC" };

    let raws: Vec<RawResolvedActivity> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "{}
           WHERE a.dependent_id = ?1
             AND (?2 IS NULL OR a.logged_at >= ?2)
             AND (?3 IS NULL OR a.logged_at <= ?3)
             AND (?4 OR r.removal_id IS NULL)
           ORDER BY a.logged_at {order}, a.seq {order}
           LIMIT ?5",
          RawResolvedActivity::SELECT
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            params![dep, since, until, query.include_inactive, limit],
            RawResolvedActivity::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawResolvedActivity::into_resolved).collect()
  }

  async fn apply_resolution(
    &self,
    resolution: Resolution,
    at: DateTime<Utc>,
  ) -> Result<Vec<ResolvedActivity>> {
    let touched: Vec<String> = resolution.touched().into_iter().map(encode_uuid).collect();
    let updates = resolution
      .updates
      .iter()
      .map(|u| Ok((encode_uuid(u.activity_id), encode_json(&u.conflict)?)))
      .collect::<Result<Vec<_>>>()?;
    let absorption = resolution.absorption;

    let raws: Vec<RawResolvedActivity> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for (id, conflict) in &updates {
          tx.execute(
            "UPDATE activities SET conflict = ?2 WHERE activity_id = ?1",
            params![id, conflict],
          )?;
        }
        if let Some(a) = absorption {
          tx.execute(
            "INSERT OR IGNORE INTO activity_removals (
               removal_id, activity_id, absorbed_into, recorded_at
             ) VALUES (?1, ?2, ?3, ?4)",
            params![
              encode_uuid(Uuid::new_v4()),
              encode_uuid(a.absorbed),
              encode_uuid(a.into),
              encode_dt(at),
            ],
          )?;
        }
        tx.commit()?;

        let mut rows = Vec::with_capacity(touched.len());
        for id in &touched {
          if let Some(raw) = read_activity(conn, id)? {
            rows.push(raw);
          }
        }
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawResolvedActivity::into_resolved).collect()
  }

  async fn remove_activity(&self, removal: ActivityRemoval) -> Result<RemovalOutcome> {
    let r = removal.clone();

    Ok(
      self
        .conn
        .call(move |conn| {
          let tx = conn.transaction()?;
          let id = encode_uuid(r.activity_id);
          if !activity_exists(&tx, &id)? {
            return Ok(RemovalOutcome::NotFound);
          }
          let inserted = tx.execute(
            "INSERT OR IGNORE INTO activity_removals (
               removal_id, activity_id, removed_by, reason, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
              encode_uuid(r.removal_id),
              id,
              encode_uuid(r.removed_by),
              r.reason,
              encode_dt(r.recorded_at),
            ],
          )?;
          if inserted == 0 {
            return Ok(RemovalOutcome::AlreadyRemoved);
          }
          tx.commit()?;
          Ok(RemovalOutcome::Removed(r))
        })
        .await?,
    )
  }

  async fn annotate_activity(&self, annotation: Annotation) -> Result<bool> {
    let a = annotation;

    Ok(
      self
        .conn
        .call(move |conn| {
          let id = encode_uuid(a.activity_id);
          if !activity_exists(conn, &id)? {
            return Ok(false);
          }
          conn.execute(
            "INSERT INTO activity_annotations (
               annotation_id, activity_id, author_id, note, recorded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
              encode_uuid(a.annotation_id),
              id,
              encode_uuid(a.author_id),
              a.note,
              encode_dt(a.recorded_at),
            ],
          )?;
          Ok(true)
        })
        .await?,
    )
  }

  async fn list_annotations(&self, activity_id: Uuid) -> Result<Vec<Annotation>> {
    let id = encode_uuid(activity_id);

    let raws: Vec<RawAnnotation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT annotation_id, activity_id, author_id, note, recorded_at
           FROM activity_annotations
           WHERE activity_id = ?1
           ORDER BY recorded_at, annotation_id",
        )?;
        let rows = stmt
          .query_map(params![id], |row| {
            Ok(RawAnnotation {
              annotation_id: row.get(0)?,
              activity_id:   row.get(1)?,
              author_id:     row.get(2)?,
              note:          row.get(3)?,
              recorded_at:   row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAnnotation::into_annotation).collect()
  }

  // ── Audit ─────────────────────────────────────────────────────────────────

  async fn append_audit(&self, entry: AuditLogEntry) -> Result<()> {
    self.conn.call(move |conn| insert_audit(conn, &entry)).await?;
    Ok(())
  }

  async fn list_audit(&self, group_id: Uuid, limit: Option<usize>) -> Result<Vec<AuditLogEntry>> {
    let group = encode_uuid(group_id);
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

    let raws: Vec<RawAuditEntry> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT entry_id, group_id, actor_id, action, subject_id, details, recorded_at
           FROM audit_log
           WHERE group_id = ?1
           ORDER BY recorded_at DESC, rowid DESC
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(params![group, limit], |row| {
            Ok(RawAuditEntry {
              entry_id:    row.get(0)?,
              group_id:    row.get(1)?,
              actor_id:    row.get(2)?,
              action:      row.get(3)?,
              subject_id:  row.get(4)?,
              details:     row.get(5)?,
              recorded_at: row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawAuditEntry::into_entry).collect()
  }

  async fn prune_audit(&self, group_id: Uuid, before: DateTime<Utc>) -> Result<usize> {
    let group = encode_uuid(group_id);
    let before = encode_dt(before);

    Ok(
      self
        .conn
        .call(move |conn| {
          Ok(conn.execute(
            "DELETE FROM audit_log WHERE group_id = ?1 AND recorded_at < ?2",
            params![group, before],
          )?)
        })
        .await?,
    )
  }
}
