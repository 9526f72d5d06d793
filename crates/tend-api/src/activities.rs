//! Handlers for the activity ledger.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/groups/{g}/dependents/{d}/activities` | `?since=&until=&include_inactive=&limit=` |
//! | `POST` | `/groups/{g}/dependents/{d}/activities` | Body: `{"kind":"feeding","details":{…}}` |
//! | `GET`  | `/groups/{g}/dependents/{d}/export` | `?scope=full\|report` |
//! | `POST` | `/groups/{g}/activities/{id}/remove` | Optional `{"reason":"…"}` |
//! | `POST` | `/groups/{g}/activities/{id}/annotations` | Body: `{"note":"…"}` |

use std::sync::Arc;

use axum::{body::Bytes, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tend_core::{
  activity::{ActivityKind, NewActivity},
  permission::ExportScope,
  store::CareStore,
};
use tend_hub::{FeedQuery, Hub};
use uuid::Uuid;

use crate::{
  error::{ApiError, created, ok},
  extract::{Identity, JsonBody, PathParams, QueryParams},
};

/// `GET /groups/{g}/dependents/{d}/activities`
pub async fn feed<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, dependent_id)): PathParams<(Uuid, Uuid)>,
  QueryParams(query): QueryParams<FeedQuery>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.activity_feed(identity.user_id, group_id, dependent_id, query).await?))
}

#[derive(Debug, Deserialize)]
pub struct LogBody {
  pub kind:      ActivityKind,
  #[serde(default)]
  pub logged_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub details:   serde_json::Value,
}

/// `POST /groups/{g}/dependents/{d}/activities`
pub async fn log<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, dependent_id)): PathParams<(Uuid, Uuid)>,
  JsonBody(body): JsonBody<LogBody>,
) -> Result<impl IntoResponse, ApiError> {
  let input = NewActivity {
    dependent_id,
    kind: body.kind,
    logged_at: body.logged_at,
    details: body.details,
  };
  Ok(created(hub.log_activity(identity.user_id, group_id, input).await?))
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
  #[serde(default = "full")]
  pub scope: ExportScope,
}

fn full() -> ExportScope { ExportScope::Full }

/// `GET /groups/{g}/dependents/{d}/export`
pub async fn export<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, dependent_id)): PathParams<(Uuid, Uuid)>,
  QueryParams(params): QueryParams<ExportParams>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.export(identity.user_id, group_id, dependent_id, params.scope).await?))
}

#[derive(Debug, Deserialize)]
pub struct RemoveBody {
  #[serde(default)]
  pub reason: Option<String>,
}

/// `POST /groups/{g}/activities/{id}/remove`
pub async fn remove<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, activity_id)): PathParams<(Uuid, Uuid)>,
  body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
  let reason = if body.is_empty() {
    None
  } else {
    serde_json::from_slice::<RemoveBody>(&body)
      .map_err(|e| ApiError::BadRequest(e.to_string()))?
      .reason
  };
  Ok(ok(hub.remove_activity(identity.user_id, group_id, activity_id, reason).await?))
}

#[derive(Debug, Deserialize)]
pub struct AnnotateBody {
  pub note: String,
}

/// `POST /groups/{g}/activities/{id}/annotations`
pub async fn annotate<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, activity_id)): PathParams<(Uuid, Uuid)>,
  JsonBody(body): JsonBody<AnnotateBody>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(created(hub.annotate_activity(identity.user_id, group_id, activity_id, &body.note).await?))
}
