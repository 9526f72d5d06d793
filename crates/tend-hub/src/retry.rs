//! Bounded retry of store calls on the durable write path.

use std::{future::Future, time::Duration};

use backon::{ExponentialBuilder, Retryable};
use tend_core::store::StoreError;
use tracing::warn;

use crate::{Error, Result, config::RetryConfig};

/// Run `op` until it succeeds, fails permanently, or exhausts
/// `cfg.max_attempts`. Delays double from `cfg.base_delay_ms`. A transient
/// error that outlasts the attempts surfaces as `Unavailable`.
pub(crate) async fn with_retry<T, E, F, Fut>(cfg: &RetryConfig, what: &'static str, op: F) -> Result<T>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
  E: StoreError,
{
  let backoff = ExponentialBuilder::default()
    .with_min_delay(Duration::from_millis(cfg.base_delay_ms))
    .with_max_times(cfg.max_attempts.saturating_sub(1) as usize);

  op.retry(backoff)
    .when(|e: &E| e.is_transient())
    .notify(|e: &E, delay: Duration| {
      warn!(what, delay_ms = delay.as_millis() as u64, error = %e, "transient store error, retrying");
    })
    .await
    .map_err(Error::store)
}
