//! Fixed-delay retry with a per-attempt timeout.

use exchange_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy applied to baseline fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between a failed attempt and the next one.
    pub delay: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// A timed-out attempt counts as a failure. After the last failure the
    /// error is [`Error::RetryExhausted`] carrying the final cause.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.attempt_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = Error::Timeout {
                        operation: operation.to_string(),
                        after_secs: self.attempt_timeout.as_secs(),
                    }
                    .to_string()
                }
            }

            warn!(
                operation,
                attempt,
                max_attempts = attempts,
                error = %last_error,
                "Attempt failed"
            );

            if attempt < attempts {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(Error::RetryExhausted {
            attempts,
            last_error,
        })
    }
}
