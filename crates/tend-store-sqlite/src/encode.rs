//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings (microsecond
//! precision, `Z` suffix) so that string comparison in SQL matches
//! chronological order. Enums use their snake_case names. Structured fields
//! are compact JSON. UUIDs are hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use tend_core::{
  activity::{ActivityEvent, ActivityStatus, Annotation, ResolvedActivity},
  audit::AuditLogEntry,
  dependent::{Dependent, DependentAccessGrant},
  group::Group,
  invitation::Invitation,
  membership::Membership,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn encode_enum<T: Into<&'static str>>(value: T) -> &'static str { value.into() }

pub fn decode_enum<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| {
    Error::Core(tend_core::Error::UnknownVariant { kind, value: s.to_owned() })
  })
}

pub fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

fn decode_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────
//
// Each `Raw*` holds the strings of one row exactly as read. `COLUMNS` lists
// the select order `from_row` expects.

pub struct RawGroup {
  pub group_id:    String,
  pub name:        String,
  pub kind:        String,
  pub owner_id:    String,
  pub created_at:  String,
  pub settings:    String,
  pub disabled_at: Option<String>,
}

impl RawGroup {
  pub const COLUMNS: &'static str =
    "g.group_id, g.name, g.kind, g.owner_id, g.created_at, g.settings, g.disabled_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      group_id:    row.get(0)?,
      name:        row.get(1)?,
      kind:        row.get(2)?,
      owner_id:    row.get(3)?,
      created_at:  row.get(4)?,
      settings:    row.get(5)?,
      disabled_at: row.get(6)?,
    })
  }

  pub fn into_group(self) -> Result<Group> {
    Ok(Group {
      group_id:    decode_uuid(&self.group_id)?,
      name:        self.name,
      kind:        decode_enum("group kind", &self.kind)?,
      owner_id:    decode_uuid(&self.owner_id)?,
      created_at:  decode_dt(&self.created_at)?,
      settings:    decode_json(&self.settings)?,
      disabled_at: decode_opt_dt(self.disabled_at)?,
    })
  }
}

pub struct RawDependent {
  pub dependent_id: String,
  pub group_id:     String,
  pub profile:      String,
  pub created_at:   String,
  pub created_by:   String,
}

impl RawDependent {
  pub const COLUMNS: &'static str =
    "d.dependent_id, d.group_id, d.profile, d.created_at, d.created_by";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      dependent_id: row.get(0)?,
      group_id:     row.get(1)?,
      profile:      row.get(2)?,
      created_at:   row.get(3)?,
      created_by:   row.get(4)?,
    })
  }

  pub fn into_dependent(self) -> Result<Dependent> {
    Ok(Dependent {
      dependent_id: decode_uuid(&self.dependent_id)?,
      group_id:     decode_uuid(&self.group_id)?,
      profile:      decode_json(&self.profile)?,
      created_at:   decode_dt(&self.created_at)?,
      created_by:   decode_uuid(&self.created_by)?,
    })
  }
}

pub struct RawGrant {
  pub group_id:       String,
  pub dependent_id:   String,
  pub access_level:   String,
  pub relevant_scope: Option<String>,
  pub granted_by:     String,
  pub granted_at:     String,
}

impl RawGrant {
  pub const COLUMNS: &'static str = "gr.group_id, gr.dependent_id, gr.access_level, \
                                     gr.relevant_scope, gr.granted_by, gr.granted_at";

  /// Reads the six grant columns starting at `offset`.
  pub fn from_row_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      group_id:       row.get(offset)?,
      dependent_id:   row.get(offset + 1)?,
      access_level:   row.get(offset + 2)?,
      relevant_scope: row.get(offset + 3)?,
      granted_by:     row.get(offset + 4)?,
      granted_at:     row.get(offset + 5)?,
    })
  }

  pub fn into_grant(self) -> Result<DependentAccessGrant> {
    Ok(DependentAccessGrant {
      group_id:       decode_uuid(&self.group_id)?,
      dependent_id:   decode_uuid(&self.dependent_id)?,
      access_level:   decode_enum("access level", &self.access_level)?,
      relevant_scope: self.relevant_scope.as_deref().map(decode_json).transpose()?,
      granted_by:     decode_uuid(&self.granted_by)?,
      granted_at:     decode_dt(&self.granted_at)?,
    })
  }
}

pub struct RawMembership {
  pub membership_id:     String,
  pub user_id:           String,
  pub group_id:          String,
  pub role:              String,
  pub status:            String,
  pub access_expires_at: Option<String>,
  pub invited_by:        Option<String>,
  pub joined_at:         String,
  pub updated_at:        String,
}

impl RawMembership {
  pub const COLUMNS: &'static str = "m.membership_id, m.user_id, m.group_id, m.role, m.status, \
                                     m.access_expires_at, m.invited_by, m.joined_at, m.updated_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      membership_id:     row.get(0)?,
      user_id:           row.get(1)?,
      group_id:          row.get(2)?,
      role:              row.get(3)?,
      status:            row.get(4)?,
      access_expires_at: row.get(5)?,
      invited_by:        row.get(6)?,
      joined_at:         row.get(7)?,
      updated_at:        row.get(8)?,
    })
  }

  pub fn into_membership(self) -> Result<Membership> {
    Ok(Membership {
      membership_id:     decode_uuid(&self.membership_id)?,
      user_id:           decode_uuid(&self.user_id)?,
      group_id:          decode_uuid(&self.group_id)?,
      role:              decode_enum("role", &self.role)?,
      status:            decode_enum("membership status", &self.status)?,
      access_expires_at: decode_opt_dt(self.access_expires_at)?,
      invited_by:        decode_opt_uuid(self.invited_by)?,
      joined_at:         decode_dt(&self.joined_at)?,
      updated_at:        decode_dt(&self.updated_at)?,
    })
  }
}

pub struct RawInvitation {
  pub invitation_id: String,
  pub token_hash:    String,
  pub group_id:      String,
  pub email:         String,
  pub role:          String,
  pub invited_by:    String,
  pub created_at:    String,
  pub expires_at:    String,
  pub status:        String,
  pub restrictions:  String,
  pub accepted_by:   Option<String>,
  pub accepted_at:   Option<String>,
}

impl RawInvitation {
  pub const COLUMNS: &'static str = "i.invitation_id, i.token_hash, i.group_id, i.email, i.role, \
                                     i.invited_by, i.created_at, i.expires_at, i.status, \
                                     i.restrictions, i.accepted_by, i.accepted_at";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      invitation_id: row.get(0)?,
      token_hash:    row.get(1)?,
      group_id:      row.get(2)?,
      email:         row.get(3)?,
      role:          row.get(4)?,
      invited_by:    row.get(5)?,
      created_at:    row.get(6)?,
      expires_at:    row.get(7)?,
      status:        row.get(8)?,
      restrictions:  row.get(9)?,
      accepted_by:   row.get(10)?,
      accepted_at:   row.get(11)?,
    })
  }

  pub fn into_invitation(self) -> Result<Invitation> {
    Ok(Invitation {
      invitation_id: decode_uuid(&self.invitation_id)?,
      token_hash:    self.token_hash,
      group_id:      decode_uuid(&self.group_id)?,
      email:         self.email,
      role:          decode_enum("role", &self.role)?,
      invited_by:    decode_uuid(&self.invited_by)?,
      created_at:    decode_dt(&self.created_at)?,
      expires_at:    decode_dt(&self.expires_at)?,
      status:        decode_enum("invitation status", &self.status)?,
      restrictions:  decode_json(&self.restrictions)?,
      accepted_by:   decode_opt_uuid(self.accepted_by)?,
      accepted_at:   decode_opt_dt(self.accepted_at)?,
    })
  }
}

/// An `activities` row joined with its removal row, if any.
pub struct RawResolvedActivity {
  pub seq:           i64,
  pub activity_id:   String,
  pub dependent_id:  String,
  pub group_id:      String,
  pub kind:          String,
  pub logged_at:     String,
  pub logged_by:     String,
  pub details:       String,
  pub conflict:      Option<String>,
  pub recorded_at:   String,
  // activity_removals join
  pub removed_by:    Option<String>,
  pub reason:        Option<String>,
  pub absorbed_into: Option<String>,
  pub removed_at:    Option<String>,
}

impl RawResolvedActivity {
  /// `SELECT` prefix; callers append `WHERE` / `ORDER BY`.
  pub const SELECT: &'static str = "SELECT
       a.seq, a.activity_id, a.dependent_id, a.group_id, a.kind,
       a.logged_at, a.logged_by, a.details, a.conflict, a.recorded_at,
       r.removed_by, r.reason, r.absorbed_into, r.recorded_at AS removed_at
     FROM activities a
     LEFT JOIN activity_removals r ON r.activity_id = a.activity_id";

  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq:           row.get(0)?,
      activity_id:   row.get(1)?,
      dependent_id:  row.get(2)?,
      group_id:      row.get(3)?,
      kind:          row.get(4)?,
      logged_at:     row.get(5)?,
      logged_by:     row.get(6)?,
      details:       row.get(7)?,
      conflict:      row.get(8)?,
      recorded_at:   row.get(9)?,
      removed_by:    row.get(10)?,
      reason:        row.get(11)?,
      absorbed_into: row.get(12)?,
      removed_at:    row.get(13)?,
    })
  }

  pub fn into_resolved(self) -> Result<ResolvedActivity> {
    let event = ActivityEvent {
      activity_id:  decode_uuid(&self.activity_id)?,
      dependent_id: decode_uuid(&self.dependent_id)?,
      group_id:     decode_uuid(&self.group_id)?,
      kind:         decode_enum("activity kind", &self.kind)?,
      logged_at:    decode_dt(&self.logged_at)?,
      logged_by:    decode_uuid(&self.logged_by)?,
      details:      decode_json(&self.details)?,
      conflict:     self.conflict.as_deref().map(decode_json).transpose()?,
      sequence:     self.seq,
      recorded_at:  decode_dt(&self.recorded_at)?,
    };

    let status = match (self.absorbed_into, self.removed_by, self.removed_at) {
      (Some(into), _, Some(at)) => ActivityStatus::Absorbed {
        into: decode_uuid(&into)?,
        at:   decode_dt(&at)?,
      },
      (None, Some(by), Some(at)) => ActivityStatus::Removed {
        by:     decode_uuid(&by)?,
        reason: self.reason,
        at:     decode_dt(&at)?,
      },
      _ => ActivityStatus::Active,
    };

    Ok(ResolvedActivity { event, status })
  }
}

pub struct RawAnnotation {
  pub annotation_id: String,
  pub activity_id:   String,
  pub author_id:     String,
  pub note:          String,
  pub recorded_at:   String,
}

impl RawAnnotation {
  pub fn into_annotation(self) -> Result<Annotation> {
    Ok(Annotation {
      annotation_id: decode_uuid(&self.annotation_id)?,
      activity_id:   decode_uuid(&self.activity_id)?,
      author_id:     decode_uuid(&self.author_id)?,
      note:          self.note,
      recorded_at:   decode_dt(&self.recorded_at)?,
    })
  }
}

pub struct RawAuditEntry {
  pub entry_id:    String,
  pub group_id:    String,
  pub actor_id:    String,
  pub action:      String,
  pub subject_id:  Option<String>,
  pub details:     String,
  pub recorded_at: String,
}

impl RawAuditEntry {
  pub fn into_entry(self) -> Result<AuditLogEntry> {
    Ok(AuditLogEntry {
      entry_id:    decode_uuid(&self.entry_id)?,
      group_id:    decode_uuid(&self.group_id)?,
      actor_id:    decode_uuid(&self.actor_id)?,
      action:      decode_enum("audit action", &self.action)?,
      subject_id:  decode_opt_uuid(self.subject_id)?,
      details:     decode_json(&self.details)?,
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}
