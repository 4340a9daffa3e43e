use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::transport::{ApiErrorKind, ApiException};

const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Client errors are final. A timeout reports 408 but is still worth
    /// another attempt.
    pub fn should_retry(&self, error: &ApiException) -> bool {
        match error.kind {
            ApiErrorKind::ServerError | ApiErrorKind::Timeout => true,
            ApiErrorKind::NetworkError => !error.is_client_error(),
            _ => false,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ApiException>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiException>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.max_attempts && self.should_retry(&error) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
