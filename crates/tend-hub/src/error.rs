//! Error type for `tend-hub`.
//!
//! Every error maps to a stable [`ErrorKind`] that clients can match on.

use strum::{Display, IntoStaticStr};
use tend_core::{invitation::InvitationError, permission::DenyReason, store::StoreError};
use thiserror::Error;
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  NotMember,
  RoleInsufficient,
  SessionExpired,
  GrantMissing,
  GrantInsufficient,
  LastCoreMember,
  TokenInvalid,
  TokenExpired,
  TokenAlreadyUsed,
  EmailMismatch,
  NotFound,
  AlreadyRemoved,
  InvalidInput,
  Unavailable,
  Internal,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("{}", .0.explain())]
  Denied(DenyReason),

  #[error("this change would leave the group without an active core member")]
  LastCoreMember,

  #[error(transparent)]
  Invitation(#[from] InvitationError),

  #[error("{0} not found")]
  NotFound(&'static str),

  #[error("activity {0} is already removed")]
  AlreadyRemoved(Uuid),

  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// A transient store failure that outlasted the retry budget.
  #[error("storage temporarily unavailable: {0}")]
  Unavailable(#[source] BoxError),

  #[error("storage error: {0}")]
  Store(#[source] BoxError),

  #[error(transparent)]
  Core(#[from] tend_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::Denied(reason) => match reason {
        DenyReason::NotMember => ErrorKind::NotMember,
        DenyReason::RoleInsufficient => ErrorKind::RoleInsufficient,
        DenyReason::SessionExpired => ErrorKind::SessionExpired,
        DenyReason::GrantMissing => ErrorKind::GrantMissing,
        DenyReason::GrantInsufficient => ErrorKind::GrantInsufficient,
      },
      Error::LastCoreMember => ErrorKind::LastCoreMember,
      Error::Invitation(e) => match e {
        InvitationError::TokenInvalid => ErrorKind::TokenInvalid,
        InvitationError::TokenExpired => ErrorKind::TokenExpired,
        InvitationError::TokenAlreadyUsed => ErrorKind::TokenAlreadyUsed,
        InvitationError::EmailMismatch => ErrorKind::EmailMismatch,
      },
      Error::NotFound(_) => ErrorKind::NotFound,
      Error::AlreadyRemoved(_) => ErrorKind::AlreadyRemoved,
      Error::InvalidInput(_) | Error::Core(tend_core::Error::InvalidEmail(_)) => {
        ErrorKind::InvalidInput
      }
      Error::Unavailable(_) => ErrorKind::Unavailable,
      Error::Store(_) | Error::Core(_) => ErrorKind::Internal,
    }
  }

  /// Classify a backend error by whether retrying could help.
  pub(crate) fn store<E: StoreError>(e: E) -> Self {
    if e.is_transient() {
      Error::Unavailable(Box::new(e))
    } else {
      Error::Store(Box::new(e))
    }
  }
}

impl From<DenyReason> for Error {
  fn from(reason: DenyReason) -> Self { Error::Denied(reason) }
}
