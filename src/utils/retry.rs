//! Bounded retry for metadata-store lookups.
//!
//! This module provides:
//! - [`compute_backoff`] - linear backoff (`step × attempt`).
//! - [`is_transient`] - classifies a [`WebhookIndexerError`] as retryable or not.
//! - [`retry_lookup`] - retries a keyed lookup that may transiently miss.

use crate::config::RetryConfig;
use crate::utils::error::{Result, WebhookIndexerError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Computes the delay before the next attempt.
///
/// `attempt` is 1-indexed: `attempt = 1` is the delay after the first failed
/// attempt, `attempt = 2` after the second, etc.
#[must_use]
pub fn compute_backoff(cfg: &RetryConfig, attempt: u32) -> Duration {
    Duration::from_millis(cfg.backoff_step_ms.saturating_mul(u64::from(attempt)))
}

/// Returns `true` if `err` represents a transient failure that is safe to retry.
///
/// | Error variant            | Retried | Reason                                    |
/// |--------------------------|---------|-------------------------------------------|
/// | `DatabaseError`          | ✅      | Pool timeouts, dropped connections        |
/// | `HttpError`              | ✅      | Network blip                              |
/// | `InternalError`          | ✅      | tokio task join noise                     |
/// | `UpstreamError` (5xx/429)| ✅      | Remote overload                           |
/// | `ValidationError`        | ❌      | Bad input will not self-heal              |
/// | `DecodingError`          | ❌      | Bad data will not self-heal               |
/// | `ConfigError`            | ❌      | Programmer error                          |
/// | `IndexerNotActive`       | ❌      | Status gate, not a fault                  |
#[must_use]
pub fn is_transient(err: &WebhookIndexerError) -> bool {
    match err {
        WebhookIndexerError::DatabaseError(_)
        | WebhookIndexerError::HttpError(_)
        | WebhookIndexerError::InternalError(_) => true,
        WebhookIndexerError::UpstreamError { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

/// Runs a lookup that may miss because the store has not caught up yet.
///
/// `op` is invoked up to `cfg.max_attempts` times. A `None` result or a
/// transient error triggers another attempt after `step × attempt`; permanent
/// errors are returned immediately. When every attempt missed, the result is
/// `NotFound(what)`; when the last attempt failed, `RetryExhausted`.
pub async fn retry_lookup<F, Fut, T>(cfg: &RetryConfig, what: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let max_attempts = cfg.max_attempts.max(1);
    let mut last_err: Option<WebhookIndexerError> = None;

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                last_err = None;
            }
            Err(err) if is_transient(&err) => {
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }

        if attempt < max_attempts {
            let delay = compute_backoff(cfg, attempt);
            tracing::debug!(
                what = what,
                attempt,
                max = max_attempts,
                delay_ms = delay.as_millis(),
                "Lookup missed, retrying"
            );
            sleep(delay).await;
        }
    }

    match last_err {
        Some(err) => Err(WebhookIndexerError::RetryExhausted {
            attempts: max_attempts,
            last_error: err.to_string(),
        }),
        None => Err(WebhookIndexerError::NotFound(what.to_string())),
    }
}
