//! Handlers for memberships and invitations.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `GET`    | `/groups/{g}/members` | `?active=true` to hide inactive members |
//! | `PUT`    | `/groups/{g}/members/{u}/role` | Body: `{"role":"extended"}` |
//! | `PUT`    | `/groups/{g}/members/{u}/status` | Body: `{"status":"suspended"}` |
//! | `DELETE` | `/groups/{g}/members/{u}` | Marks the member inactive |
//! | `GET`    | `/groups/{g}/invitations` | |
//! | `POST`   | `/groups/{g}/invitations` | Body: `{"email":"…","role":"…"}` |
//! | `DELETE` | `/groups/{g}/invitations/{id}` | Pending invitations only |
//! | `POST`   | `/invitations/accept` | Body: `{"token":"…"}`; needs `x-user-email` |

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse};
use serde::Deserialize;
use tend_core::{
  invitation::InvitationRestrictions,
  membership::{MembershipStatus, Role},
  store::CareStore,
};
use tend_hub::Hub;
use uuid::Uuid;

use crate::{
  error::{ApiError, created, ok},
  extract::{Identity, JsonBody, PathParams, QueryParams},
};

// ─── Members ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  #[serde(default)]
  pub active: bool,
}

/// `GET /groups/{g}/members`
pub async fn list<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
  QueryParams(params): QueryParams<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.list_members(identity.user_id, group_id, params.active).await?))
}

#[derive(Debug, Deserialize)]
pub struct RoleBody {
  pub role: Role,
}

/// `PUT /groups/{g}/members/{u}/role`
pub async fn change_role<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, user_id)): PathParams<(Uuid, Uuid)>,
  JsonBody(body): JsonBody<RoleBody>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.change_role(identity.user_id, group_id, user_id, body.role).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
  pub status: MembershipStatus,
}

/// `PUT /groups/{g}/members/{u}/status`
pub async fn set_status<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, user_id)): PathParams<(Uuid, Uuid)>,
  JsonBody(body): JsonBody<StatusBody>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.set_member_status(identity.user_id, group_id, user_id, body.status).await?))
}

/// `DELETE /groups/{g}/members/{u}`
pub async fn remove<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, user_id)): PathParams<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.remove_member(identity.user_id, group_id, user_id).await?))
}

// ─── Invitations ─────────────────────────────────────────────────────────────

/// `GET /groups/{g}/invitations`
pub async fn invitations<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.list_invitations(identity.user_id, group_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct InviteBody {
  pub email:        String,
  pub role:         Role,
  #[serde(default)]
  pub restrictions: InvitationRestrictions,
}

/// `POST /groups/{g}/invitations`
pub async fn invite<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
  JsonBody(body): JsonBody<InviteBody>,
) -> Result<impl IntoResponse, ApiError> {
  let issued = hub
    .invite(identity.user_id, group_id, &body.email, body.role, body.restrictions)
    .await?;
  Ok(created(issued))
}

/// `DELETE /groups/{g}/invitations/{id}`
pub async fn revoke<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams((group_id, invitation_id)): PathParams<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.revoke_invitation(identity.user_id, group_id, invitation_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AcceptBody {
  pub token: String,
}

/// `POST /invitations/accept`
pub async fn accept<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  JsonBody(body): JsonBody<AcceptBody>,
) -> Result<impl IntoResponse, ApiError> {
  let membership = hub
    .accept_invitation(identity.user_id, identity.email.as_deref(), &body.token)
    .await?;
  Ok(ok(membership))
}
