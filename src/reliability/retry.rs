use crate::app::config::serde_helpers;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the reconnect delay grows with consecutive failures.
///
/// The relay binary always uses [`FixedDelay`](Self::FixedDelay). The growing
/// strategies are opt-in for library users through
/// [`TcpForwardConfig::with_retry`](crate::sink::TcpForwardConfig::with_retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    ExponentialBackoff,
    LinearBackoff,
    #[default]
    FixedDelay,
}

/// Reconnect pacing for the TCP forwarder.
///
/// Attempts are unbounded: the forwarder keeps retrying for as long as the
/// sink lives. The default is a flat one second between attempts with no
/// jitter; exponential or linear growth and jitter only apply when a caller
/// asks for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "serde_helpers")]
    pub base_delay: Duration,
    #[serde(with = "serde_helpers")]
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            strategy: RetryStrategy::FixedDelay,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay to wait after the `attempt`-th consecutive failure (0-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = match self.config.strategy {
            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2_u32.saturating_pow(attempt);
                self.config.base_delay.saturating_mul(multiplier)
            }
            RetryStrategy::LinearBackoff => self
                .config
                .base_delay
                .saturating_mul(attempt.saturating_add(1)),
            RetryStrategy::FixedDelay => self.config.base_delay,
        };

        let capped_delay = std::cmp::min(base_delay, self.config.max_delay);

        if self.config.jitter {
            Self::apply_jitter(capped_delay)
        } else {
            capped_delay
        }
    }

    fn apply_jitter(delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let jitter_factor = rng.random_range(0.5..1.5); // ±50% jitter
        let jittered_millis = (delay.as_millis() as f64 * jitter_factor) as u64;
        Duration::from_millis(jittered_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_flat_one_second() {
        let policy = RetryPolicy::new(RetryConfig::default());
        for attempt in [0, 1, 5, 100] {
            assert_eq!(policy.calculate_delay(attempt), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: false,
        });

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(800));
        assert_eq!(policy.calculate_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            strategy: RetryStrategy::LinearBackoff,
            jitter: false,
        });

        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(2), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            jitter: true,
            ..RetryConfig::fixed(Duration::from_millis(200))
        });

        for _ in 0..50 {
            let delay = policy.calculate_delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }
}
