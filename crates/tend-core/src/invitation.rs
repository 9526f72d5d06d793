//! Invitations: time-boxed, single-use tokens that create memberships.
//!
//! Only the SHA-256 of a token is ever stored. Redemption is checked by
//! [`Invitation::check_redeemable`] and performed atomically by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  error::{Error, Result},
  membership::{Membership, Role},
};

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
pub enum InvitationStatus {
  Pending,
  Accepted,
  /// Computed on read once `expires_at` has passed.
  Expired,
  Revoked,
}

/// Limits carried over to the membership an invitation creates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationRestrictions {
  #[serde(default)]
  pub access_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
  pub invitation_id: Uuid,
  /// Lowercase hex SHA-256 of the plaintext token.
  #[serde(skip_serializing)]
  pub token_hash:    String,
  pub group_id:      Uuid,
  /// Normalised with [`normalize_email`].
  pub email:         String,
  pub role:          Role,
  pub invited_by:    Uuid,
  pub created_at:    DateTime<Utc>,
  pub expires_at:    DateTime<Utc>,
  /// The stored status; see [`Invitation::effective_status`].
  pub status:        InvitationStatus,
  pub restrictions:  InvitationRestrictions,
  pub accepted_by:   Option<Uuid>,
  pub accepted_at:   Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvitationError {
  #[error("the invitation token is not valid")]
  TokenInvalid,
  #[error("the invitation has expired")]
  TokenExpired,
  #[error("the invitation has already been used")]
  TokenAlreadyUsed,
  #[error("the invitation was issued to a different email address")]
  EmailMismatch,
}

impl Invitation {
  pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
    match self.status {
      InvitationStatus::Pending if now >= self.expires_at => InvitationStatus::Expired,
      status => status,
    }
  }

  /// Whether a caller with `email` may redeem this invitation at `now`.
  /// `email` must already be normalised.
  pub fn check_redeemable(
    &self,
    email: Option<&str>,
    now: DateTime<Utc>,
  ) -> Result<(), InvitationError> {
    match self.effective_status(now) {
      InvitationStatus::Pending => {}
      InvitationStatus::Accepted | InvitationStatus::Revoked => {
        return Err(InvitationError::TokenAlreadyUsed);
      }
      InvitationStatus::Expired => return Err(InvitationError::TokenExpired),
    }
    match email {
      Some(email) if email == self.email => Ok(()),
      _ => Err(InvitationError::EmailMismatch),
    }
  }
}

/// Trim and lowercase an address, rejecting anything without a local part
/// and a domain.
pub fn normalize_email(raw: &str) -> Result<String> {
  let email = raw.trim().to_lowercase();
  match email.split_once('@') {
    Some((local, domain))
      if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
    {
      Ok(email)
    }
    _ => Err(Error::InvalidEmail(raw.to_string())),
  }
}

/// Input to [`crate::store::CareStore::redeem_invitation`].
#[derive(Debug, Clone)]
pub struct Redemption {
  pub token_hash: String,
  pub user_id:    Uuid,
  /// The caller's verified, normalised email, if the identity provider
  /// supplied one.
  pub email:      Option<String>,
  pub at:         DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum RedemptionOutcome {
  Accepted {
    invitation: Invitation,
    membership: Membership,
  },
  Rejected(InvitationError),
  /// Redeeming would demote the group's last active core member.
  LastCoreMember,
}

#[cfg(test)]
mod tests {
  use chrono::{TimeDelta, TimeZone};

  use super::*;

  fn now() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap() }

  fn invitation() -> Invitation {
    Invitation {
      invitation_id: Uuid::new_v4(),
      token_hash:    "00".repeat(32),
      group_id:      Uuid::new_v4(),
      email:         "grandma@example.org".into(),
      role:          Role::Extended,
      invited_by:    Uuid::new_v4(),
      created_at:    now(),
      expires_at:    now() + TimeDelta::days(7),
      status:        InvitationStatus::Pending,
      restrictions:  InvitationRestrictions::default(),
      accepted_by:   None,
      accepted_at:   None,
    }
  }

  #[test]
  fn normalizes_email() {
    assert_eq!(normalize_email("  Grandma@Example.ORG ").unwrap(), "grandma@example.org");
    assert!(normalize_email("nobody").is_err());
    assert!(normalize_email("@example.org").is_err());
    assert!(normalize_email("a@b@c").is_err());
  }

  #[test]
  fn redeemable_while_pending() {
    let inv = invitation();
    assert_eq!(inv.check_redeemable(Some("grandma@example.org"), now()), Ok(()));
  }

  #[test]
  fn rejects_mismatched_or_missing_email() {
    let inv = invitation();
    assert_eq!(
      inv.check_redeemable(Some("someone@example.org"), now()),
      Err(InvitationError::EmailMismatch)
    );
    assert_eq!(inv.check_redeemable(None, now()), Err(InvitationError::EmailMismatch));
  }

  #[test]
  fn expiry_is_computed_on_read() {
    let inv = invitation();
    let later = now() + TimeDelta::days(7);
    assert_eq!(inv.effective_status(later), InvitationStatus::Expired);
    assert_eq!(
      inv.check_redeemable(Some("grandma@example.org"), later),
      Err(InvitationError::TokenExpired)
    );
  }

  #[test]
  fn used_and_revoked_tokens() {
    let mut inv = invitation();
    inv.status = InvitationStatus::Accepted;
    assert_eq!(
      inv.check_redeemable(Some("grandma@example.org"), now()),
      Err(InvitationError::TokenAlreadyUsed)
    );
    inv.status = InvitationStatus::Revoked;
    assert_eq!(
      inv.check_redeemable(Some("grandma@example.org"), now()),
      Err(InvitationError::TokenAlreadyUsed)
    );
  }
}
