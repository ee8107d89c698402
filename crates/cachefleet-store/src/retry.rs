//! Bounded retry for optimistic-concurrency writes
//!
//! Status writes are read-modify-compare-write cycles. When another writer
//! bumps the resource version in between, the write fails with a conflict
//! and the whole cycle is run again after a short jittered delay.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded exponential backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts, including the first
    pub steps: u32,
    /// Delay before the second attempt
    pub initial: Duration,
    /// Multiplier applied to the delay after each retry
    pub factor: f64,
    /// Random extra delay as a fraction of the current delay
    pub jitter: f64,
}

impl Backoff {
    pub fn new(steps: u32, initial: Duration) -> Self {
        Self {
            steps,
            initial,
            factor: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before attempt number `attempt + 1`
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.as_secs_f64() * self.factor.powi(attempt as i32);
        let jitter = if self.jitter > 0.0 {
            base * self.jitter * rand::thread_rng().gen::<f64>()
        } else {
            0.0
        };
        Duration::from_secs_f64(base + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            steps: 4,
            initial: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `retriable` rejects,
/// or the backoff steps are exhausted. The last error is returned.
pub async fn retry_on<T, E, F, Fut, P>(
    backoff: &Backoff,
    retriable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if retriable(&e) && attempt + 1 < steps => {
                let delay = backoff.delay(attempt);
                debug!(
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after conflict"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
