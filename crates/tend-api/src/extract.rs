//! Request extractors: caller identity, and body/query/path wrappers whose
//! rejections use the API error envelope.

use axum::{
  extract::{FromRequest, FromRequestParts},
  http::{HeaderMap, request::Parts},
};
use uuid::Uuid;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The caller, as asserted by the upstream identity provider.
#[derive(Debug, Clone)]
pub struct Identity {
  pub user_id: Uuid,
  /// Verified email, when the provider supplies one. Needed to redeem
  /// invitations.
  pub email:   Option<String>,
}

/// Read the identity headers.
pub fn identify(headers: &HeaderMap) -> Result<Identity, ApiError> {
  let raw = headers
    .get(USER_ID_HEADER)
    .ok_or(ApiError::Unauthenticated("x-user-id header is required"))?;
  let user_id = raw
    .to_str()
    .ok()
    .and_then(|s| Uuid::parse_str(s.trim()).ok())
    .ok_or(ApiError::Unauthenticated("x-user-id must be a UUID"))?;

  let email = headers
    .get(USER_EMAIL_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string);

  Ok(Identity { user_id, email })
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    identify(&parts.headers)
  }
}

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct QueryParams<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct PathParams<T>(pub T);
