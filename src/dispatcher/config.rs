use super::DispatchError;
use crate::buffer::DEFAULT_CAPACITY;
use crate::domain::LogLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_IDLE_SLEEP_US: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    /// Worker back-off when the queue is empty, in microseconds.
    pub idle_sleep_us: u64,
    /// Minimum severity accepted by `log`.
    pub level: LogLevel,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_CAPACITY,
            idle_sleep_us: DEFAULT_IDLE_SLEEP_US,
            level: LogLevel::Trace,
        }
    }
}

impl DispatcherConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_us)
    }

    pub fn with_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.queue_capacity == 0 {
            return Err(DispatchError::InvalidConfig(
                "Queue capacity must be greater than 0".to_string(),
            ));
        }
        if self.idle_sleep_us > 1_000_000 {
            return Err(DispatchError::InvalidConfig(
                "Idle sleep must not exceed one second".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.idle_sleep(), Duration::from_micros(10));
        assert_eq!(config.level, LogLevel::Trace);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        let config = DispatcherConfig::default().with_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(DispatchError::InvalidConfig(_))
        ));
    }
}
