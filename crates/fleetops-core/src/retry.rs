//! Bounded retry policy shared by healthchecks and directory writes

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time
    Fixed,
    /// Doubles after each failure, capped at `max`
    Exponential { max: Duration },
}

/// Maximum attempts plus the delay between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
    backoff: Backoff,
}

/// Result of the final attempt together with how many attempts ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

impl RetryPolicy {
    /// `max_attempts` tries, `interval` apart
    #[must_use]
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff: Backoff::Fixed,
        }
    }

    /// `max_attempts` tries starting `initial` apart, doubling up to `max`
    #[must_use]
    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval: initial,
            backoff: Backoff::Exponential { max },
        }
    }

    /// Single attempt, no waiting
    #[must_use]
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential { max } => {
                let shift = attempt.saturating_sub(1).min(31);
                self.interval.saturating_mul(1 << shift).min(max)
            }
        }
    }

    /// Total time spent sleeping if every attempt fails
    #[must_use]
    pub fn worst_case_delay(&self) -> Duration {
        (1..self.max_attempts).map(|attempt| self.delay_for(attempt)).sum()
    }

    /// Run `op` until it succeeds or attempts run out
    ///
    /// `op` receives the 1-based attempt number. Sleeps only between
    /// attempts, never after the last one.
    ///
    /// # Errors
    /// Returns the last error with the number of attempts made
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<Attempted<T>, Attempted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) if attempt >= self.max_attempts => {
                    return Err(Attempted {
                        value: err,
                        attempts: attempt,
                    });
                }
                Err(_) => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, delay_ms = delay.as_millis(), "attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    /// 10 attempts, 2 seconds apart
    fn default() -> Self {
        Self::fixed(10, Duration::from_secs(2))
    }
}
