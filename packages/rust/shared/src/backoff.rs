//! Exponential backoff shared by the fetch tiers and the enrichment client.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay to wait after the `attempt`-th failure (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Sleep for [`Backoff::delay`] unless `cancel` fires first.
    ///
    /// Returns `false` when the wait was cut short by cancellation.
    pub async fn wait(&self, attempt: u32, cancel: &CancellationToken) -> bool {
        let delay = self.delay(attempt);
        if delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(16));
        assert_eq!(backoff.delay(9), Duration::from_secs(16));
        assert_eq!(backoff.delay(64), Duration::from_secs(16));
    }

    #[test]
    fn max_never_below_base() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(0), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn wait_is_cut_short_by_cancellation() {
        let backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        assert!(!backoff.wait(0, &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn zero_delay_completes() {
        let backoff = Backoff::new(Duration::ZERO, Duration::ZERO);
        assert!(backoff.wait(3, &CancellationToken::new()).await);
    }
}
