//! Retry mechanics for transient signaling failures
//!
//! Publishes to the signaling service can fail locally (the service client
//! is reconnecting, a socket hiccup). Those are worth one quick retry; after
//! that the call attempt is aborted rather than retried silently forever.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for backoff growth.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_multiplier: f64,
    /// Whether to randomize delays to avoid thundering herds.
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Policy for signaling publishes: one retry, then give up. The caller
    /// aborts the attempt when this returns an error.
    pub fn publish() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run `attempt` up to `config.max_attempts` times with exponential backoff.
///
/// Returns the first success, or the error of the final attempt.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation: &str,
    config: &RetryConfig,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut delay = config.initial_delay;
    let max_attempts = config.max_attempts.max(1);

    for attempt_number in 1..=max_attempts {
        match attempt().await {
            Ok(value) => {
                if attempt_number > 1 {
                    debug!(operation, attempt_number, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if attempt_number < max_attempts => {
                let wait = if config.use_jitter {
                    delay.mul_f64(0.5 + rand::random::<f64>() * 0.5)
                } else {
                    delay
                };
                warn!(
                    operation,
                    attempt_number,
                    wait_ms = wait.as_millis() as u64,
                    %error,
                    "operation failed, retrying"
                );
                sleep(wait).await;
                delay = delay.mul_f64(config.backoff_multiplier).min(config.max_delay);
            }
            Err(error) => {
                warn!(operation, attempt_number, %error, "operation failed, giving up");
                return Err(error);
            }
        }
    }

    unreachable!("retry loop always returns within max_attempts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<u32, String> =
            retry_with_backoff("test", &RetryConfig::publish(), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn publish_policy_retries_exactly_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), String> =
            retry_with_backoff("test", &RetryConfig::publish(), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("still down".to_string())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_second_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<&str, String> =
            retry_with_backoff("test", &RetryConfig::publish(), move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err("transient".to_string())
                    } else {
                        Ok("delivered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "delivered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
