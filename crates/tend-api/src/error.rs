//! API error type and the response envelope.

use axum::{
  Json,
  extract::rejection::{JsonRejection, PathRejection, QueryRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use tend_hub::ErrorKind;
use thiserror::Error;
use tracing::error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("missing or malformed identity: {0}")]
  Unauthenticated(&'static str),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error(transparent)]
  Hub(#[from] tend_hub::Error),
}

impl ApiError {
  fn status_and_kind(&self) -> (StatusCode, &'static str) {
    match self {
      ApiError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
      ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorKind::InvalidInput.into()),
      ApiError::Hub(e) => {
        let kind = e.kind();
        (status_for(kind), kind.into())
      }
    }
  }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
  match kind {
    ErrorKind::NotMember
    | ErrorKind::RoleInsufficient
    | ErrorKind::SessionExpired
    | ErrorKind::GrantMissing
    | ErrorKind::GrantInsufficient
    | ErrorKind::EmailMismatch => StatusCode::FORBIDDEN,
    ErrorKind::LastCoreMember | ErrorKind::TokenAlreadyUsed | ErrorKind::AlreadyRemoved => {
      StatusCode::CONFLICT
    }
    ErrorKind::TokenInvalid | ErrorKind::NotFound => StatusCode::NOT_FOUND,
    ErrorKind::TokenExpired => StatusCode::GONE,
    ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
    ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
  kind:    &'a str,
  message: String,
}

#[derive(Serialize)]
struct Failure<'a> {
  success: bool,
  error:   ErrorBody<'a>,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, kind) = self.status_and_kind();
    if status.is_server_error() {
      error!(error = %self, kind, "request failed");
    }
    let body = Failure { success: false, error: ErrorBody { kind, message: self.to_string() } };
    (status, Json(body)).into_response()
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

impl From<QueryRejection> for ApiError {
  fn from(rejection: QueryRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

impl From<PathRejection> for ApiError {
  fn from(rejection: PathRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

// ─── Success envelope ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Success<T> {
  pub success: bool,
  pub data:    T,
}

pub fn ok<T: Serialize>(data: T) -> Json<Success<T>> { Json(Success { success: true, data }) }

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Success<T>>) {
  (StatusCode::CREATED, ok(data))
}
