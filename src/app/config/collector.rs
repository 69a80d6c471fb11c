use super::{ConfigError, TracingLevel};
use crate::server::{ServerConfig, ServerMode};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of the `rask-log-collector` binary.
#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(name = "rask-log-collector", author, version, about, long_about = None)]
#[serde(default)]
pub struct CollectorConfig {
    /// TCP port to listen on (all interfaces)
    #[arg(long, short, env = "COLLECTOR_PORT", default_value = "9000")]
    pub port: u16,

    /// Connection handling strategy
    #[arg(long, short, env = "COLLECTOR_MODE", default_value = "poll")]
    pub mode: ServerMode,

    /// Upper bound on one poll/epoll wait in milliseconds
    #[arg(long, env = "COLLECTOR_POLL_INTERVAL_MS", default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Bytes read from a connection at a time
    #[arg(long, env = "COLLECTOR_READ_BUFFER_SIZE", default_value = "1024")]
    pub read_buffer_size: usize,

    /// Grace period for open connections on shutdown, in milliseconds
    #[arg(long, env = "COLLECTOR_DRAIN_TIMEOUT_MS", default_value = "5000")]
    pub drain_timeout_ms: u64,

    /// Log level of the collector's own diagnostics
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: TracingLevel,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub poll_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub drain_timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            port: 9000,
            mode: ServerMode::Poll,
            poll_interval_ms: 1000,
            read_buffer_size: 1024,
            drain_timeout_ms: 5000,
            log_level: TracingLevel::Info,
            config_file: None,
            poll_interval: Duration::from_millis(1000),
            drain_timeout: Duration::from_millis(5000),
        }
    }
}

impl CollectorConfig {
    /// Parses the command line (with env fallbacks). When `--config-file` is
    /// given, its values fill in every option left at its default.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = CollectorConfig::parse_from(args);

        if let Some(path) = config.config_file.clone() {
            let content = std::fs::read_to_string(&path)?;
            let file_config: CollectorConfig = toml::from_str(&content)?;
            config.merge_defaults_from(file_config);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: CollectorConfig = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn merge_defaults_from(&mut self, base: CollectorConfig) {
        let defaults = CollectorConfig::default();

        if self.port == defaults.port {
            self.port = base.port;
        }
        if self.mode == defaults.mode {
            self.mode = base.mode;
        }
        if self.poll_interval_ms == defaults.poll_interval_ms {
            self.poll_interval_ms = base.poll_interval_ms;
        }
        if self.read_buffer_size == defaults.read_buffer_size {
            self.read_buffer_size = base.read_buffer_size;
        }
        if self.drain_timeout_ms == defaults.drain_timeout_ms {
            self.drain_timeout_ms = base.drain_timeout_ms;
        }
        if self.log_level == defaults.log_level {
            self.log_level = base.log_level;
        }
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        // Convert milliseconds to Duration
        self.poll_interval = Duration::from_millis(self.poll_interval_ms);
        self.drain_timeout = Duration::from_millis(self.drain_timeout_ms);
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            port: self.port,
            mode: self.mode,
            poll_interval: self.poll_interval,
            read_buffer_size: self.read_buffer_size,
            drain_timeout: self.drain_timeout,
        }
    }
}
