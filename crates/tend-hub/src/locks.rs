use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async mutex per key, created on first use and dropped again once
/// nobody holds or waits for it.
#[derive(Default)]
pub(crate) struct KeyedLocks {
  inner: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl KeyedLocks {
  pub(crate) async fn lock(&self, key: Uuid) -> KeyedGuard<'_> {
    // Clone the Arc out so no shard guard is held across the await.
    let mutex = Arc::clone(self.inner.entry(key).or_default().value());
    let guard = mutex.lock_owned().await;
    KeyedGuard { locks: self, key, guard: Some(guard) }
  }

  #[cfg(test)]
  fn len(&self) -> usize { self.inner.len() }
}

pub(crate) struct KeyedGuard<'a> {
  locks: &'a KeyedLocks,
  key:   Uuid,
  guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
  fn drop(&mut self) {
    drop(self.guard.take());
    // Holders and waiters each keep a clone; only the map's copy left means
    // the entry is idle. `entry` and `remove_if` share the shard lock.
    self.locks.inner.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn same_key_serialises() {
    let locks = KeyedLocks::default();
    let key = Uuid::new_v4();
    let held = locks.lock(key).await;
    let waiting = tokio::time::timeout(Duration::from_millis(20), locks.lock(key)).await;
    assert!(waiting.is_err());
    drop(held);
    assert!(tokio::time::timeout(Duration::from_millis(20), locks.lock(key)).await.is_ok());
  }

  #[tokio::test]
  async fn idle_entries_are_released() {
    let locks = Arc::new(KeyedLocks::default());
    let key = Uuid::new_v4();

    let held = locks.lock(key).await;
    let waiter = {
      let locks = Arc::clone(&locks);
      tokio::spawn(async move {
        let _guard = locks.lock(key).await;
      })
    };
    tokio::task::yield_now().await;
    drop(held);
    // The waiter still had a claim, so the entry survived the first release.
    waiter.await.unwrap();
    assert_eq!(locks.len(), 0);

    let _a = locks.lock(Uuid::new_v4()).await;
    assert_eq!(locks.len(), 1);
  }

  #[tokio::test]
  async fn different_keys_do_not_block() {
    let locks = KeyedLocks::default();
    let _a = locks.lock(Uuid::new_v4()).await;
    let b = tokio::time::timeout(Duration::from_millis(20), locks.lock(Uuid::new_v4())).await;
    assert!(b.is_ok());
  }
}
