//! Bounded exponential backoff for transient REST failures.

use crate::error::{CloudError, CloudResult};
use roboclean_core::config::defaults;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is exhausted. Delay doubles per attempt starting from
/// [`defaults::RETRY_BASE_DELAY_MS`].
pub async fn with_backoff<T, F, Fut>(label: &str, mut op: F) -> CloudResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CloudResult<T>>,
{
    let mut delay = Duration::from_millis(defaults::RETRY_BASE_DELAY_MS);
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < defaults::MAX_RETRY_ATTEMPTS => {
                warn!(
                    "{label} failed (attempt {attempt}/{}): {err}, retrying in {delay:?}",
                    defaults::MAX_RETRY_ATTEMPTS
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
