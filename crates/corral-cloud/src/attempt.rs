//! Bounded retry for eventually consistent cloud APIs
//!
//! ```ignore
//! let mut attempt = SHORT_ATTEMPT.start();
//! while attempt.next().await {
//!     match api.get_server(id).await {
//!         Err(e) if e.is_not_found() => continue,
//!         other => return other,
//!     }
//! }
//! ```

use std::time::Duration;
use tokio::time::Instant;

/// Short budget for races between a change and its visibility
pub const SHORT_ATTEMPT: AttemptStrategy =
    AttemptStrategy::new(Duration::from_secs(10), Duration::from_millis(200));

/// Long budget for slower transitions such as address propagation
pub const LONG_ATTEMPT: AttemptStrategy =
    AttemptStrategy::new(Duration::from_secs(180), Duration::from_secs(1));

/// A total time budget with a fixed delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptStrategy {
    pub total: Duration,
    pub delay: Duration,
}

impl AttemptStrategy {
    pub const fn new(total: Duration, delay: Duration) -> Self {
        Self { total, delay }
    }

    /// Begin a sequence of attempts. The clock starts now.
    pub fn start(&self) -> Attempt {
        let now = Instant::now();
        Attempt {
            strategy: *self,
            last: now,
            end: now + self.total,
            count: 0,
        }
    }
}

/// A running sequence of attempts
#[derive(Debug)]
pub struct Attempt {
    strategy: AttemptStrategy,
    last: Instant,
    end: Instant,
    count: u32,
}

impl Attempt {
    /// Wait for the next attempt slot. The first call always returns
    /// `true` immediately; later calls sleep out the remaining delay and
    /// return `false` once the budget would be exceeded.
    pub async fn next(&mut self) -> bool {
        let now = Instant::now();
        let sleep = self.next_sleep(now);
        if self.count > 0 && now + sleep >= self.end {
            return false;
        }
        let mut now = now;
        if self.count > 0 && !sleep.is_zero() {
            tokio::time::sleep(sleep).await;
            now = Instant::now();
        }
        self.count += 1;
        self.last = now;
        true
    }

    /// Whether a call to [`Attempt::next`] would grant another slot.
    pub fn has_next(&self) -> bool {
        if self.count == 0 {
            return true;
        }
        let now = Instant::now();
        now + self.next_sleep(now) < self.end
    }

    /// Number of slots granted so far
    pub fn count(&self) -> u32 {
        self.count
    }

    fn next_sleep(&self, now: Instant) -> Duration {
        self.strategy
            .delay
            .saturating_sub(now.saturating_duration_since(self.last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_grants_one_attempt() {
        let mut attempt = AttemptStrategy::new(Duration::ZERO, Duration::from_millis(100)).start();
        assert!(attempt.has_next());
        assert!(attempt.next().await);
        assert!(!attempt.has_next());
        assert!(!attempt.next().await);
        assert_eq!(attempt.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_spacing() {
        let strategy = AttemptStrategy::new(Duration::from_secs(1), Duration::from_millis(200));
        let begin = Instant::now();
        let mut attempt = strategy.start();
        let mut offsets = Vec::new();
        while attempt.next().await {
            offsets.push(begin.elapsed().as_millis());
        }
        assert_eq!(offsets, vec![0, 200, 400, 600, 800]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_work_shortens_sleep() {
        let strategy = AttemptStrategy::new(Duration::from_secs(1), Duration::from_millis(200));
        let begin = Instant::now();
        let mut attempt = strategy.start();
        assert!(attempt.next().await);
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(attempt.next().await);
        assert_eq!(begin.elapsed().as_millis(), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_and_long_budgets() {
        let mut short = SHORT_ATTEMPT.start();
        while short.next().await {}
        assert_eq!(short.count(), 50);

        let mut long = LONG_ATTEMPT.start();
        while long.next().await {}
        assert_eq!(long.count(), 180);
    }
}
