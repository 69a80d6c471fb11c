use super::ServerError;
use crate::app::config::serde_helpers;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Fixed listen backlog of the collector socket.
pub const LISTEN_BACKLOG: i32 = 10;
pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// How the collector multiplexes its connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMode {
    /// One blocking handler thread per accepted connection.
    ThreadPerConnection,
    /// Single thread driving `poll(2)`.
    #[default]
    Poll,
    /// Single thread driving level-triggered `epoll(7)`. Linux only.
    Epoll,
}

impl ServerMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            ServerMode::ThreadPerConnection => "thread-per-connection",
            ServerMode::Poll => "poll",
            ServerMode::Epoll => "epoll",
        }
    }

    pub const fn is_supported(self) -> bool {
        match self {
            ServerMode::ThreadPerConnection | ServerMode::Poll => true,
            ServerMode::Epoll => cfg!(target_os = "linux"),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port bound on `0.0.0.0`. Zero picks an ephemeral port.
    pub port: u16,
    pub mode: ServerMode,
    /// Upper bound on one wait of the control loop; also how quickly `stop`
    /// is noticed.
    #[serde(with = "serde_helpers")]
    pub poll_interval: Duration,
    pub read_buffer_size: usize,
    /// How long `stop` waits for open thread-per-connection handlers before
    /// shutting their sockets down.
    #[serde(with = "serde_helpers")]
    pub drain_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            mode: ServerMode::default(),
            poll_interval: Duration::from_secs(1),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    pub fn new(port: u16, mode: ServerMode) -> Self {
        Self {
            port,
            mode,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Poll interval as the millisecond timeout `poll`/`epoll_wait` expect.
    pub(crate) fn poll_timeout_ms(&self) -> libc::c_int {
        self.poll_interval
            .as_millis()
            .clamp(1, libc::c_int::MAX as u128) as libc::c_int
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.poll_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "Server poll interval must be greater than 0".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(ServerError::InvalidConfig(
                "Server read buffer size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_round_trip_through_clap() {
        for mode in [
            ServerMode::ThreadPerConnection,
            ServerMode::Poll,
            ServerMode::Epoll,
        ] {
            assert_eq!(ServerMode::from_str(mode.as_str(), false), Ok(mode));
        }
    }

    #[test]
    fn test_poll_timeout_is_never_zero() {
        let config = ServerConfig::default().with_poll_interval(Duration::from_micros(10));
        assert_eq!(config.poll_timeout_ms(), 1);
        assert_eq!(ServerConfig::default().poll_timeout_ms(), 1000);
    }

    #[test]
    fn test_zero_read_buffer_is_invalid() {
        let config = ServerConfig {
            read_buffer_size: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
