//! Exponential reconnection backoff shared by every collector variant
//! (§4.1: "reconnect with exponential backoff (configurable min/max, jitter
//! ±20%)").

use std::time::Duration;

use rand::Rng;
use ringcore_config::BackoffConfig;

/// Tracks the current delay for a retrying connection and advances it
/// exponentially between calls, within the configured bounds and jitter.
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    /// Creates a fresh backoff starting at `config.min`.
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.min;
        Self { config, current }
    }

    /// Resets the backoff to its initial delay, called after a successful
    /// connection.
    pub fn reset(&mut self) {
        self.current = self.config.min;
    }

    /// Returns the delay to wait before the next attempt, applying jitter,
    /// then doubles the underlying delay (capped at `config.max`) for next
    /// time.
    pub fn next_delay(&mut self) -> Duration {
        let jitter_fraction = 1.0 + rand::thread_rng().gen_range(-self.config.jitter..=self.config.jitter);
        let jittered = self.current.mul_f64(jitter_fraction.max(0.0));

        let doubled = self.current.saturating_mul(2);
        self.current = doubled.min(self.config.max);

        jittered
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delay_never_exceeds_max_after_many_attempts() {
        let mut backoff = Backoff::new(BackoffConfig {
            min: Duration::from_millis(100),
            max: Duration::from_secs(5),
            jitter: 0.2,
        });

        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(5).mul_f64(1.2));
        }
    }

    #[test]
    fn reset_returns_to_min_range() {
        let mut backoff = Backoff::new(BackoffConfig {
            min: Duration::from_millis(100),
            max: Duration::from_secs(5),
            jitter: 0.0,
        });
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
