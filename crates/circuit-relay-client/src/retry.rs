//! Retry of connectivity-class failures with exponential backoff.

use std::{future::Future, time::Duration};

use backoff::ExponentialBackoff;
use tracing::info;

use crate::error::ClientError;

/// Default initial delay between reconnect attempts
pub const INITIAL_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Default cap of a single reconnect delay
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Exponential backoff that gives up once `max_elapsed` has passed
pub fn connectivity_backoff(max_elapsed: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: INITIAL_RETRY_INTERVAL.min(max_elapsed),
        max_interval: MAX_RETRY_INTERVAL,
        max_elapsed_time: Some(max_elapsed),
        ..ExponentialBackoff::default()
    }
}

/// Execute an operation, retrying only transient (connectivity) errors
pub async fn retry_transient<F, Fut, T>(
    backoff: ExponentialBackoff,
    what: &str,
    operation: F,
) -> Result<T, ClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    use backoff::{future::retry_notify, Error};

    let operation = &operation;
    retry_notify(
        backoff,
        || async move {
            operation().await.map_err(|err| {
                if err.is_transient() {
                    Error::transient(err)
                } else {
                    Error::permanent(err)
                }
            })
        },
        |err, duration| {
            info!("{} failed, retrying in {:?}: {}", what, duration, err);
        },
    )
    .await
}
