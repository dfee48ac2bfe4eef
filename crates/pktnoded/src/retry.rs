//! Bounded retry with linearly increasing backoff.
//!
//! Attempt `n` (zero based) waits `base × (n + 1)` before the recovery action
//! runs, so three attempts wait 1×, 2× and 3× the base interval.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_interval: Duration,
}

/// Result of one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Done(T),
    Retry,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_interval: Duration) -> Self {
        Self {
            attempts,
            base_interval,
        }
    }

    /// Delay before the recovery action of attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_interval.saturating_mul(attempt.saturating_add(1))
    }

    /// Sum of every backoff delay the policy can impose
    pub fn total_backoff(&self) -> Duration {
        (0..self.attempts).map(|a| self.delay_for(a)).sum()
    }

    /// Observe up to `attempts` times. When an observation asks for a retry,
    /// wait the backoff delay and, unless it was the last attempt, run
    /// `recover` before observing again. Returns `None` when every attempt
    /// asked for a retry; the last delay has then already elapsed.
    pub async fn run<T, Obs, ObsFut, Rec, RecFut>(&self, mut observe: Obs, mut recover: Rec) -> Option<T>
    where
        Obs: FnMut(u32) -> ObsFut,
        ObsFut: Future<Output = Attempt<T>>,
        Rec: FnMut(u32) -> RecFut,
        RecFut: Future<Output = ()>,
    {
        for attempt in 0..self.attempts {
            match observe(attempt).await {
                Attempt::Done(value) => return Some(value),
                Attempt::Retry => {
                    let delay = self.delay_for(attempt);
                    debug!("Attempt {} not settled, retrying after {:?}", attempt + 1, delay);
                    tokio::time::sleep(delay).await;
                    if attempt + 1 < self.attempts {
                        recover(attempt).await;
                    }
                }
            }
        }
        None
    }
}
