//! Reconnection Policy
//!
//! Exponential backoff with jitter for the stream connection. The policy is
//! a small state machine: each failed attempt yields the next delay, a
//! successful connection resets it.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier applied after every attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Give up after this many attempts; 0 means never.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

/// Backoff state across reconnection attempts.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay_ms: u64,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// New policy starting at the configured initial delay.
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = delay_millis(config.initial_delay);
        Self {
            config,
            current_delay_ms: initial,
            attempt_count: 0,
        }
    }

    /// Delay to sleep before the next attempt, or `None` once the attempt
    /// budget is exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay_ms);

        let scaled = millis_f64(self.current_delay_ms) * self.config.multiplier;
        let capped = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                (scaled.round() as u64).min(delay_millis(self.config.max_delay))
            }
        } else {
            delay_millis(self.config.max_delay)
        };
        self.current_delay_ms = capped;

        Some(delay)
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.current_delay_ms = delay_millis(self.config.initial_delay);
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn apply_jitter(&self, base_ms: u64) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return Duration::from_millis(base_ms);
        }
        let base = millis_f64(base_ms);
        let range = base * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis((base + jitter).max(1.0) as u64)
    }
}

fn delay_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[allow(clippy::cast_precision_loss)]
const fn millis_f64(ms: u64) -> f64 {
    ms as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_jitter() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    #[test]
    fn delays_double_each_attempt() {
        let mut policy = ReconnectPolicy::new(config_without_jitter());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(2_000),
            multiplier: 4.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        });
        let _ = policy.next_delay();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2_000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2_000)));
    }

    #[test]
    fn attempt_budget_is_enforced() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 2,
            ..config_without_jitter()
        });
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 2);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut policy = ReconnectPolicy::new(config_without_jitter());
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1_000),
                jitter_factor: 0.1,
                ..config_without_jitter()
            });
            let ms = policy.next_delay().unwrap().as_millis();
            assert!((900..=1_100).contains(&ms), "delay {ms}ms out of bounds");
        }
    }

    #[test]
    fn zero_max_attempts_never_gives_up() {
        let mut policy = ReconnectPolicy::new(config_without_jitter());
        for _ in 0..500 {
            assert!(policy.next_delay().is_some());
        }
    }
}
