//! One retry policy object for every storage path that used to hand-roll
//! its own loop. Only errors the caller marks transient are retried; the
//! whole budget stays on the order of a second so an abandoned claim is
//! re-claimable quickly.

use crate::errors::SentryError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    /// The claim/finish policy: up to 15 attempts, exponential to an 80 ms
    /// ceiling plus jitter, roughly a one-second total budget.
    pub fn storage() -> Self {
        Self {
            max_attempts: 15,
            base_delay: Duration::from_millis(10),
            jitter: Duration::from_millis(20),
        }
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SentryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SentryError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    debug!("Transient storage error (attempt {}): {e}; retrying in {delay:?}", attempt + 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential backoff capped at 8x base, plus uniform jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(3));
        let backoff = self.base_delay * factor;
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        backoff + jitter
    }
}
