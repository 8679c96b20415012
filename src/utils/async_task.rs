use std::future::Future;

use rand::Rng;
use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::BackoffPolicy;
use crate::Error;
use crate::Result;
use crate::SystemError;

/// Runs `task` until it succeeds or `policy.max_retries` attempts are spent.
///
/// Each attempt is bounded by `policy.timeout_ms`. Delays double from
/// `base_delay_ms` up to `max_delay_ms`, with up to 10% jitter. Errors that are
/// not [`Error::is_retryable`] end the loop at once. The error of the last
/// attempt is returned so callers can still classify it.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    policy: BackoffPolicy,
) -> Result<P>
where
    F: Fn() -> T,
    T: Future<Output = Result<P>>,
{
    let mut current_delay = policy.base_delay();
    let timeout_duration = policy.timeout();
    let max_delay = policy.max_delay();

    let mut last_error: Error =
        SystemError::RetryTaskFailed("Task failed after max retries".to_string()).into();
    for attempt in 0..policy.max_retries {
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => {
                return Ok(r);
            }
            Ok(Err(error)) if !error.is_retryable() => {
                warn!(?error, attempt, "failed with non-retryable error.");
                return Err(error);
            }
            Ok(Err(error)) => {
                warn!(?error, attempt, "failed with error.");
                last_error = error;
            }
            Err(_) => {
                warn!(?timeout_duration, attempt, "Task timed out");
                last_error = SystemError::RetryTimeout.into();
            }
        };

        if attempt + 1 < policy.max_retries {
            let jitter = rand::thread_rng().gen_range(0..=current_delay.as_millis() as u64 / 10);
            let delay = current_delay + std::time::Duration::from_millis(jitter);
            debug!("Retrying in {:?}...", delay);
            sleep(delay).await;

            current_delay = (current_delay * 2).min(max_delay);
        }
    }
    warn!("Task failed after {} retries", policy.max_retries);
    Err(last_error)
}

/// Spawns a named background task and logs its failure instead of dropping it
pub(crate) fn spawn_task<Fut>(
    name: &str,
    fut: Fut,
) -> tokio::task::JoinHandle<()>
where
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!("spawned task: {name} stopped or encountered an error: {:?}", e);
        }
    })
}
