//! Presence and the live event stream.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/groups/{g}/presence` | |
//! | `POST` | `/groups/{g}/presence` | Body: `{"signal":"heartbeat"}` etc. |
//! | `GET`  | `/groups/{g}/stream` | Server-sent events, one per notification |

use std::{convert::Infallible, sync::Arc};

use axum::{
  extract::State,
  response::{
    IntoResponse,
    sse::{Event, KeepAlive, Sse},
  },
};
use futures::{Stream, StreamExt as _};
use tend_core::{presence::PresenceSignal, store::CareStore};
use tend_hub::{Hub, Notification};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  error::{ApiError, ok},
  extract::{Identity, JsonBody, PathParams},
};

/// `GET /groups/{g}/presence`
pub async fn list<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.group_presence(identity.user_id, group_id).await?))
}

/// `POST /groups/{g}/presence`
pub async fn update<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
  JsonBody(signal): JsonBody<PresenceSignal>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(ok(hub.update_presence(identity.user_id, group_id, signal).await?))
}

/// `GET /groups/{g}/stream`
pub async fn stream<S: CareStore + 'static>(
  State(hub): State<Arc<Hub<S>>>,
  identity: Identity,
  PathParams(group_id): PathParams<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
  let subscription = hub.subscribe(identity.user_id, group_id).await?;
  debug!(user_id = %identity.user_id, %group_id, "stream opened");
  let events = subscription.map(|n| Ok::<_, Infallible>(to_event(&n)));
  Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_event(notification: &Notification) -> Event {
  let name = notification.event_name();
  match Event::default().event(name).json_data(notification) {
    Ok(event) => event,
    Err(e) => {
      warn!(event = name, error = %e, "could not encode notification");
      Event::default().comment("dropped")
    }
  }
}
