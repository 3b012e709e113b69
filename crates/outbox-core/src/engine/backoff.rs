use std::time::Duration;

use crate::config::SyncConfig;

/// Exponential retry delays with a cap and a retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    max_retries: u32,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration, max_retries: u32) -> Self {
        Self {
            base,
            max,
            max_retries,
        }
    }

    pub const fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.max_retries)
    }

    /// Delay before retry number `retry_count` (1-based):
    /// `min(base * 2^(retry_count - 1), max)`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Whether `retry_count` consecutive failures spend the budget
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 5)
    }

    #[test]
    fn test_delays_double_until_cap() {
        let backoff = backoff();
        let delays: Vec<u64> = (1..=7).map(|n| backoff.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn test_delays_never_decrease() {
        let backoff = backoff();
        let mut previous = Duration::ZERO;
        for retry_count in 1..200 {
            let delay = backoff.delay_for(retry_count);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
    }

    #[test]
    fn test_budget() {
        let backoff = backoff();
        assert!(!backoff.is_exhausted(4));
        assert!(backoff.is_exhausted(5));
        assert_eq!(
            Backoff::from_config(&SyncConfig::default()),
            Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 5)
        );
    }
}
