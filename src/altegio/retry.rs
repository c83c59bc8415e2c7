use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::errors::BotError;

/// Exponential backoff policy for remote calls. Kept as an explicit value so
/// call sites name the policy they use and tests can exercise it without any
/// network in the loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: true,
        }
    }

    /// Delay before retrying after `attempt` failures (0-based): base * 2^n,
    /// plus up to 50% jitter to spread out synchronized retries.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u32.saturating_pow(attempt.min(16));
        let base_ms = self.base_delay.as_millis() as u64;
        let mut delay_ms = base_ms.saturating_mul(u64::from(exp));

        if self.jitter && delay_ms > 0 {
            let spread = delay_ms / 2;
            delay_ms += rand::thread_rng().gen_range(0..=spread);
        }

        Duration::from_millis(delay_ms)
    }

    /// Runs `op`, retrying on `RemoteUnavailable` up to `max_attempts` total
    /// attempts. Any other error is surfaced immediately. Only safe for
    /// operations that are idempotent or carry an idempotency key.
    pub async fn run<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T, BotError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BotError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(BotError::RemoteUnavailable(reason)) => {
                    attempt += 1;
                    if attempt >= self.max_attempts.max(1) {
                        return Err(BotError::RemoteUnavailable(reason));
                    }
                    let delay = self.delay_for(attempt - 1);
                    tracing::warn!(
                        "{} transient failure (attempt {}/{}), retrying in {:?}: {}",
                        op_name,
                        attempt,
                        self.max_attempts,
                        delay,
                        reason
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
