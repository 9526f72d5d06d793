//! Handlers for groups, dependents, grants and the audit log.
//!
//! | Method  | Path | Notes |
//! |---------|------|-------|
//! | `GET`   | `/groups` | Groups the caller belongs to |
//! | `POST`  | `/groups` | Body: `{"name":"…","kind":"standard"}` |
//! | `POST`  | `/groups/personal` | Idempotent |
//! | `POST`  | `/groups/{g}/disable` | Core only |
//! | `GET`   | `/groups/{g}/dependents` | With recent activity |
//! | `POST`  | `/groups/{g}/dependents` | Body: a dependent profile |
//! | `PATCH` | `/groups/{g}/dependents/{d}/profile` | Partial profile |
//! | `PUT`   | `/groups/{g}/grants/{d}` | `g` is the group receiving access |
//! | `GET`   | `/groups/{g}/audit` | Optional `?limit=` |
//! | `POST`  | `/groups/{g}/audit/prune` | Applies the retention setting |

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;
use tend_core::{
  dependent::{AccessLevel, DependentProfile, ProfilePatch, RelevantScope},
  group::{GroupKind, GroupSettings},
  store::CareStore,
};
use tend_hub::Hub;
use uuid::Uuid;

use crate::{
  error::{ApiError, created, ok},
  extract::{Identity, JsonBody, PathParams, QueryParams},
};

// ─── Groups ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateGroupBody {
  pub name:     String,
  #[serde(default = "standard")]
  pub kind:     GroupKind,
  #[serde(default)]
  pub settings: GroupSettings,
}

fn standard() -> GroupKind { GroupKind::Standard }

/// `GET /groups`
pub async fn list<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.my_groups(identity.user_id).await?))
}

/// `POST /groups`
pub async fn create<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  JsonBody(body): JsonBody<CreateGroupBody>,
) -> Result<impl IntoResponse, ApiError> {
  let (group, membership) =
    hub.create_group(identity.user_id, &body.name, body.kind, body.settings).await?;
  Ok(created(json!({ "group": group, "membership": membership })))
}

/// `POST /groups/personal`
pub async fn ensure_personal<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.ensure_personal_group(identity.user_id).await?))
}

/// `POST /groups/{g}/disable`
pub async fn disable<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.disable_group(identity.user_id, group_id).await?))
}

// ─── Dependents ──────────────────────────────────────────────────────────────

/// `GET /groups/{g}/dependents`
pub async fn dependents<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.visible_dependents(identity.user_id, group_id).await?))
}

/// `POST /groups/{g}/dependents`
pub async fn add_dependent<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
  JsonBody(profile): JsonBody<DependentProfile>,
) -> Result<impl IntoResponse, ApiError> {
  let (dependent, grant) = hub.add_dependent(identity.user_id, group_id, profile).await?;
  Ok(created(json!({ "dependent": dependent, "grant": grant })))
}

/// `PATCH /groups/{g}/dependents/{d}/profile`
pub async fn edit_profile<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, dependent_id)): PathParams<(Uuid, Uuid)>,
  JsonBody(patch): JsonBody<ProfilePatch>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.update_profile(identity.user_id, group_id, dependent_id, patch).await?))
}

#[derive(Debug, Deserialize)]
pub struct GrantBody {
  pub access_level:   AccessLevel,
  #[serde(default)]
  pub relevant_scope: Option<RelevantScope>,
}

/// `PUT /groups/{g}/grants/{d}`
pub async fn set_grant<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, dependent_id)): PathParams<(Uuid, Uuid)>,
  JsonBody(body): JsonBody<GrantBody>,
) -> Result<impl IntoResponse, ApiError> {
  let grant = hub
    .set_grant(identity.user_id, dependent_id, group_id, body.access_level, body.relevant_scope)
    .await?;
  Ok(ok(grant))
}

// ─── Audit ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuditParams {
  pub limit: Option<usize>,
}

/// `GET /groups/{g}/audit[?limit=<n>]`
pub async fn audit<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
  QueryParams(params): QueryParams<AuditParams>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.audit_log(identity.user_id, group_id, params.limit).await?))
}

/// `POST /groups/{g}/audit/prune`
pub async fn prune_audit<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
  let removed = hub.prune_audit(identity.user_id, group_id).await?;
  Ok(ok(json!({ "removed": removed })))
}
