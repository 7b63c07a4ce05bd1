use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::store::StoreError;

const MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff with jitter for transient store failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(200))
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self { attempts: attempts.max(1), base_delay }
    }

    /// Single attempt, no waiting. Useful where the caller already retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent).min(MAX_DELAY);
        if backoff.is_zero() {
            return backoff;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 4);
        backoff + Duration::from_millis(jitter_ms)
    }

    /// Runs `op` until it succeeds, fails with a permanent error, or the attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient store failure; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
