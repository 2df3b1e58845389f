use std::time::Duration;

use log::{error, warn};
use tokio::time::sleep;

use crate::error::ApiError;

/// Bounded-retry policy for remote API calls.
///
/// The delay between attempts is a fixed interval, not an exponential one.
/// Transient failures are absorbed here: once the attempt budget is spent the
/// call resolves to `Ok(None)` ("no data available"), which callers must not
/// treat as success. Fatal failures abort after exactly one attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub async fn execute<F, Fut, T>(&self, label: &str, mut op: F) -> Result<Option<T>, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(err) if err.is_transient() => {
                    if attempt >= self.max_attempts {
                        error!(
                            "{} failed after {} attempt(s), giving up: {}",
                            label, attempt, err
                        );
                        return Ok(None);
                    }
                    warn!("{} attempt {} failed, retrying: {}", label, attempt, err);
                    sleep(self.base_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}
