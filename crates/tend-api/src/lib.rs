//! JSON REST API for Tend.
//!
//! Exposes an axum [`Router`] over a [`Hub`]. The caller's identity comes
//! from the `x-user-id` / `x-user-email` headers set by an upstream identity
//! provider; TLS and authentication are the deployment's responsibility.
//!
//! Every response uses one envelope: `{"success":true,"data":…}` or
//! `{"success":false,"error":{"kind":"…","message":"…"}}`.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tend_api::api_router(hub.clone()))
//! ```

pub mod activities;
pub mod error;
pub mod extract;
pub mod groups;
pub mod members;
pub mod presence;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{delete, get, patch, post, put},
};
use serde::Deserialize;
use tend_core::store::CareStore;
use tend_hub::{Hub, HubConfig};
use tower_http::trace::TraceLayer;

pub use error::ApiError;
pub use extract::Identity;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `TEND_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  #[serde(default)]
  pub hub:        HubConfig,
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("tend.db") }

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router for `hub`.
pub fn api_router<S>(hub: Arc<Hub<S>>) -> Router<()>
where
  S: CareStore + 'static,
{
  Router::new()
    // Groups
    .route("/groups", get(groups::list::<S>).post(groups::create::<S>))
    .route("/groups/personal", post(groups::ensure_personal::<S>))
    .route("/groups/{group_id}/disable", post(groups::disable::<S>))
    .route("/groups/{group_id}/audit", get(groups::audit::<S>))
    .route("/groups/{group_id}/audit/prune", post(groups::prune_audit::<S>))
    // Dependents & grants
    .route(
      "/groups/{group_id}/dependents",
      get(groups::dependents::<S>).post(groups::add_dependent::<S>),
    )
    .route("/groups/{group_id}/dependents/{dependent_id}/profile", patch(groups::edit_profile::<S>))
    .route("/groups/{group_id}/grants/{dependent_id}", put(groups::set_grant::<S>))
    // Activities
    .route(
      "/groups/{group_id}/dependents/{dependent_id}/activities",
      get(activities::feed::<S>).post(activities::log::<S>),
    )
    .route("/groups/{group_id}/dependents/{dependent_id}/export", get(activities::export::<S>))
    .route("/groups/{group_id}/activities/{activity_id}/remove", post(activities::remove::<S>))
    .route(
      "/groups/{group_id}/activities/{activity_id}/annotations",
      post(activities::annotate::<S>),
    )
    // Members
    .route("/groups/{group_id}/members", get(members::list::<S>))
    .route("/groups/{group_id}/members/{user_id}", delete(members::remove::<S>))
    .route("/groups/{group_id}/members/{user_id}/role", put(members::change_role::<S>))
    .route("/groups/{group_id}/members/{user_id}/status", put(members::set_status::<S>))
    // Invitations
    .route(
      "/groups/{group_id}/invitations",
      get(members::invitations::<S>).post(members::invite::<S>),
    )
    .route("/groups/{group_id}/invitations/{invitation_id}", delete(members::revoke::<S>))
    .route("/invitations/accept", post(members::accept::<S>))
    // Presence & stream
    .route(
      "/groups/{group_id}/presence",
      get(presence::list::<S>).post(presence::update::<S>),
    )
    .route("/groups/{group_id}/stream", get(presence::stream::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(hub)
}
