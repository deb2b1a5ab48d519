//! Bounded retries for administrative backend calls
//!
//! Only 5xx answers and transport failures are retried. A 4xx answer is
//! the backend rejecting the request and is returned at once.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::backend::wire::ErrorEnvelope;
use crate::backend::RawResponse;
use crate::error::{Error, Result, TransportError};

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    /// Default: 2
    pub max_attempts: u32,

    /// Delay before the first retry
    /// Default: 100ms
    pub initial_delay: Duration,

    /// Upper bound of a single delay
    /// Default: 5 seconds
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    /// Default: 2.0
    pub multiplier: f64,

    /// Add random jitter to delays
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_attempts` attempts starting at `backoff`
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: backoff,
            ..Default::default()
        }
    }

    /// Calculate delay for a given retry number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);

        let delay_ms = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            delay_ms * (1.0 + jitter)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Whether another attempt is allowed after `attempt` (0-indexed) failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Run a backend call until it succeeds, is rejected, or attempts run out
    ///
    /// `operation` names the call in logs.
    pub async fn execute<F, Fut>(&self, operation: &str, call: F) -> Result<RawResponse>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<RawResponse, TransportError>>,
    {
        let mut attempt = 0;

        loop {
            let error = match call().await {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    let error = backend_error(&response);
                    if response.is_client_error() {
                        return Err(error);
                    }
                    error
                }
                Err(e) => Error::Transport(e),
            };

            if !self.should_retry(attempt) {
                return Err(error);
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Backend call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Error of a non-2xx answer, using the backend's message when it sent one
pub(crate) fn backend_error(response: &RawResponse) -> Error {
    Error::Backend {
        status: response.status,
        message: ErrorEnvelope::message_of(&response.body)
            .unwrap_or_else(|| response.body.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..RetryPolicy::new(max_attempts, Duration::from_millis(1))
        }
    }

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_policy_should_retry() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        assert!(policy.should_retry(0));
        assert!(!policy.should_retry(1));
        assert!(!RetryPolicy::new(0, Duration::ZERO).should_retry(0));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(RawResponse::new(404, r#"{"error":{"message":"no such uid"}}"#)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(Error::Backend { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such uid");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_retried_until_exhausted() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .execute("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(RawResponse::new(503, "busy")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().status_code(), 503);
    }

    #[tokio::test]
    async fn test_transport_error_then_success() {
        let calls = AtomicU32::new(0);
        let result = fast(2)
            .execute("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(TransportError::Connect("refused".into()))
                    } else {
                        Ok(RawResponse::new(200, "[]"))
                    }
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.unwrap().body, "[]");
    }
}
