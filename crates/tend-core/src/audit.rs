//! The append-only audit log of privileged mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
  EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditAction {
  GroupCreated,
  GroupDisabled,
  DependentAdded,
  ProfileEdited,
  MembershipCreated,
  RoleChanged,
  StatusChanged,
  GrantChanged,
  InvitationIssued,
  InvitationAccepted,
  InvitationRevoked,
  DataExported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
  pub entry_id:    Uuid,
  pub group_id:    Uuid,
  pub actor_id:    Uuid,
  pub action:      AuditAction,
  /// The row the action was applied to: a membership's user, a dependent,
  /// an invitation.
  pub subject_id:  Option<Uuid>,
  pub details:     serde_json::Value,
  pub recorded_at: DateTime<Utc>,
}

impl AuditLogEntry {
  pub fn new(
    group_id: Uuid,
    actor_id: Uuid,
    action: AuditAction,
    subject_id: Option<Uuid>,
    details: serde_json::Value,
    recorded_at: DateTime<Utc>,
  ) -> Self {
    Self {
      entry_id: Uuid::new_v4(),
      group_id,
      actor_id,
      action,
      subject_id,
      details,
      recorded_at,
    }
  }
}
