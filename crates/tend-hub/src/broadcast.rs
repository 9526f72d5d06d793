//! Live fan-out to connected members.
//!
//! The registry is keyed by group, then by connection. Each connection owns a
//! bounded queue. Delivery never blocks: a full queue drops the notification
//! and a closed queue unregisters the connection. Visibility filtering is
//! the caller's job and happens per recipient before [`Broadcaster::deliver`].

use std::{
  collections::HashMap,
  pin::Pin,
  sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
  },
  task::{Context, Poll},
};

use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use tend_core::{activity::ResolvedActivity, membership::Membership, presence::PresenceView};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

// ─── Notifications ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityChange {
  Logged,
  /// Conflict metadata changed, or the event was absorbed by a merge.
  Reconciled,
  Removed,
  Annotated,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
  Activity {
    group_id: Uuid,
    change:   ActivityChange,
    activity: ResolvedActivity,
  },
  Presence {
    group_id: Uuid,
    presence: PresenceView,
  },
  Membership {
    group_id:   Uuid,
    membership: Membership,
  },
}

impl Notification {
  /// Short name for transports that label events.
  pub fn event_name(&self) -> &'static str {
    match self {
      Notification::Activity { .. } => "activity",
      Notification::Presence { .. } => "presence",
      Notification::Membership { .. } => "membership",
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

struct Connection {
  user_id: Uuid,
  tx:      mpsc::Sender<Notification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient {
  pub connection_id: u64,
  pub user_id:       Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
  Sent,
  /// The subscriber's queue was full.
  Dropped,
  /// The subscriber went away; it has been unregistered.
  Closed,
}

pub struct Broadcaster {
  groups:  DashMap<Uuid, HashMap<u64, Connection>>,
  next_id: AtomicU64,
  buffer:  usize,
}

impl Broadcaster {
  pub fn new(buffer: usize) -> Arc<Self> {
    Arc::new(Self {
      groups:  DashMap::new(),
      next_id: AtomicU64::new(1),
      buffer:  buffer.max(1),
    })
  }

  pub fn register(self: &Arc<Self>, group_id: Uuid, user_id: Uuid) -> Subscription {
    let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::channel(self.buffer);
    self
      .groups
      .entry(group_id)
      .or_default()
      .insert(connection_id, Connection { user_id, tx });
    debug!(%group_id, %user_id, connection_id, "subscriber registered");

    Subscription {
      group_id,
      user_id,
      connection_id,
      rx,
      registry: Arc::downgrade(self),
    }
  }

  fn unregister(&self, group_id: Uuid, connection_id: u64) {
    let now_empty = match self.groups.get_mut(&group_id) {
      Some(mut conns) => {
        conns.remove(&connection_id);
        conns.is_empty()
      }
      None => false,
    };
    if now_empty {
      self.groups.remove_if(&group_id, |_, conns| conns.is_empty());
    }
    debug!(%group_id, connection_id, "subscriber unregistered");
  }

  pub fn recipients(&self, group_id: Uuid) -> Vec<Recipient> {
    self
      .groups
      .get(&group_id)
      .map(|conns| {
        conns
          .iter()
          .map(|(&connection_id, c)| Recipient { connection_id, user_id: c.user_id })
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn has_subscribers(&self, group_id: Uuid) -> bool {
    self.groups.get(&group_id).is_some_and(|conns| !conns.is_empty())
  }

  pub fn deliver(&self, group_id: Uuid, connection_id: u64, notification: Notification) -> Delivery {
    let tx = match self.groups.get(&group_id) {
      Some(conns) => match conns.get(&connection_id) {
        Some(c) => c.tx.clone(),
        None => return Delivery::Closed,
      },
      None => return Delivery::Closed,
    };

    match tx.try_send(notification) {
      Ok(()) => Delivery::Sent,
      Err(TrySendError::Full(n)) => {
        warn!(%group_id, connection_id, event = n.event_name(), "subscriber queue full, dropping");
        Delivery::Dropped
      }
      Err(TrySendError::Closed(_)) => {
        self.unregister(group_id, connection_id);
        Delivery::Closed
      }
    }
  }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// A live feed of notifications for one group. Unregisters itself when
/// dropped.
pub struct Subscription {
  group_id:      Uuid,
  user_id:       Uuid,
  connection_id: u64,
  rx:            mpsc::Receiver<Notification>,
  registry:      Weak<Broadcaster>,
}

impl Subscription {
  pub fn group_id(&self) -> Uuid { self.group_id }

  pub fn user_id(&self) -> Uuid { self.user_id }
}

impl Stream for Subscription {
  type Item = Notification;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.rx.poll_recv(cx)
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      registry.unregister(self.group_id, self.connection_id);
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;
  use futures::{FutureExt as _, StreamExt as _};
  use tend_core::presence::PresenceStatus;

  use super::*;

  fn ping(group_id: Uuid) -> Notification {
    Notification::Presence {
      group_id,
      presence: PresenceView {
        user_id:      Uuid::new_v4(),
        status:       PresenceStatus::Online,
        dependent_id: None,
        activity:     None,
        last_seen:    Utc::now(),
      },
    }
  }

  #[tokio::test]
  async fn delivers_to_registered_connection() {
    let b = Broadcaster::new(4);
    let group = Uuid::new_v4();
    let mut sub = b.register(group, Uuid::new_v4());

    let recipients = b.recipients(group);
    assert_eq!(recipients.len(), 1);
    let r = recipients[0];
    assert_eq!(b.deliver(group, r.connection_id, ping(group)), Delivery::Sent);
    let got = sub.next().now_or_never().flatten();
    assert!(matches!(got, Some(Notification::Presence { .. })));
  }

  #[tokio::test]
  async fn full_queue_drops() {
    let b = Broadcaster::new(1);
    let group = Uuid::new_v4();
    let _sub = b.register(group, Uuid::new_v4());
    let r = b.recipients(group)[0];

    assert_eq!(b.deliver(group, r.connection_id, ping(group)), Delivery::Sent);
    assert_eq!(b.deliver(group, r.connection_id, ping(group)), Delivery::Dropped);
  }

  #[tokio::test]
  async fn drop_unregisters() {
    let b = Broadcaster::new(4);
    let group = Uuid::new_v4();
    let sub = b.register(group, Uuid::new_v4());
    assert!(b.has_subscribers(group));
    let r = b.recipients(group)[0];
    drop(sub);
    assert!(!b.has_subscribers(group));
    assert_eq!(b.deliver(group, r.connection_id, ping(group)), Delivery::Closed);
  }
}
