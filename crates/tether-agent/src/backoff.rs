//! Reconnect backoff and the sleep seam the supervisor waits through.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a floor, a ceiling and additive jitter.
///
/// Each call to [`next_delay`](Backoff::next_delay) doubles the current
/// delay (capped at the ceiling) and returns it plus a jitter sample in
/// `[0, jitter)`. The n-th consecutive delay is therefore
/// `min(floor * 2^n, ceiling) + jitter`.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    jitter: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration, jitter: Duration) -> Self {
        Self {
            floor,
            ceiling,
            jitter,
            current: floor,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn reset(&mut self) {
        self.current = self.floor;
    }

    /// Advance the backoff and return the delay without jitter.
    pub fn advance(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.ceiling);
        self.current
    }

    /// Advance the backoff and return the delay to wait, jitter included.
    pub fn next_delay(&mut self) -> Duration {
        self.advance() + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        let bound = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::rng().random_range(0..bound))
    }
}

/// Where the supervisor's backoff waits happen.
///
/// Production uses [`TokioSleeper`]; tests substitute a recorder so the state
/// machine can be stepped without real delays.
pub trait Sleeper: Send + Sync + 'static {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
