use super::{ConfigError, TracingLevel};
use crate::dispatcher::{DEFAULT_IDLE_SLEEP_US, DispatcherConfig};
use crate::domain::LogLevel;
use crate::reliability::RetryConfig;
use crate::sink::rotating_file::{DEFAULT_MAX_FILES, DEFAULT_MAX_SIZE};
use crate::sink::{RotatingFileConfig, TcpForwardConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings of the `rask-log-relay` binary: every line read from stdin is
/// logged through a dispatcher wired to the configured sinks.
#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(name = "rask-log-relay", author, version, about, long_about = None)]
#[serde(default)]
pub struct RelayConfig {
    /// Minimum severity accepted by the pipeline
    #[arg(long, env = "RELAY_LEVEL", default_value = "trace")]
    pub level: LogLevel,

    /// Severity given to each line read from stdin
    #[arg(long, env = "RELAY_RECORD_LEVEL", default_value = "info")]
    pub record_level: LogLevel,

    /// Deliver records on the calling thread instead of the dispatch worker
    #[arg(long, env = "RELAY_SYNC")]
    pub sync: bool,

    /// Capacity of the dispatch queue
    #[arg(long, env = "RELAY_QUEUE_CAPACITY", default_value = "1024")]
    pub queue_capacity: usize,

    /// Dispatch worker sleep when the queue is empty, in microseconds
    #[arg(long, env = "RELAY_IDLE_SLEEP_US", default_value = "10")]
    pub idle_sleep_us: u64,

    /// Do not write records to stdout
    #[arg(long, env = "RELAY_NO_CONSOLE")]
    pub no_console: bool,

    /// Basename of the rotating log files (disabled when unset)
    #[arg(long, env = "RELAY_FILE")]
    pub file: Option<PathBuf>,

    /// Size in bytes at which a log file is rolled over
    #[arg(long, env = "RELAY_FILE_MAX_SIZE", default_value = "1048576")]
    pub file_max_size: u64,

    /// Number of log files kept on disk
    #[arg(long, env = "RELAY_FILE_MAX_FILES", default_value = "5")]
    pub file_max_files: usize,

    /// Collector endpoint (`host:port`) to forward records to (disabled when unset)
    #[arg(long, env = "RELAY_FORWARD")]
    pub forward: Option<String>,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, env = "RELAY_RECONNECT_BACKOFF_MS", default_value = "1000")]
    pub reconnect_backoff_ms: u64,

    /// Connect timeout in milliseconds
    #[arg(long, env = "RELAY_CONNECT_TIMEOUT_MS", default_value = "3000")]
    pub connect_timeout_ms: u64,

    /// Cap on records waiting for the collector; oldest are dropped beyond it
    #[arg(long, env = "RELAY_MAX_PENDING")]
    pub max_pending: Option<usize>,

    /// Log level of the relay's own diagnostics
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: TracingLevel,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub reconnect_backoff: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub connect_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Trace,
            record_level: LogLevel::Info,
            sync: false,
            queue_capacity: 1024,
            idle_sleep_us: DEFAULT_IDLE_SLEEP_US,
            no_console: false,
            file: None,
            file_max_size: DEFAULT_MAX_SIZE,
            file_max_files: DEFAULT_MAX_FILES,
            forward: None,
            reconnect_backoff_ms: 1000,
            connect_timeout_ms: 3000,
            max_pending: None,
            log_level: TracingLevel::Info,
            config_file: None,
            reconnect_backoff: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(3000),
        }
    }
}

impl RelayConfig {
    /// Parses the command line (with env fallbacks). When `--config-file` is
    /// given, its values fill in every option left at its default.
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = RelayConfig::parse_from(args);

        if let Some(path) = config.config_file.clone() {
            let file_config = Self::read_file(&path)?;
            config.merge_defaults_from(file_config);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn merge_defaults_from(&mut self, base: RelayConfig) {
        let defaults = RelayConfig::default();

        if self.level == defaults.level {
            self.level = base.level;
        }
        if self.record_level == defaults.record_level {
            self.record_level = base.record_level;
        }
        if !self.sync {
            self.sync = base.sync;
        }
        if self.queue_capacity == defaults.queue_capacity {
            self.queue_capacity = base.queue_capacity;
        }
        if self.idle_sleep_us == defaults.idle_sleep_us {
            self.idle_sleep_us = base.idle_sleep_us;
        }
        if !self.no_console {
            self.no_console = base.no_console;
        }
        if self.file.is_none() {
            self.file = base.file;
        }
        if self.file_max_size == defaults.file_max_size {
            self.file_max_size = base.file_max_size;
        }
        if self.file_max_files == defaults.file_max_files {
            self.file_max_files = base.file_max_files;
        }
        if self.forward.is_none() {
            self.forward = base.forward;
        }
        if self.reconnect_backoff_ms == defaults.reconnect_backoff_ms {
            self.reconnect_backoff_ms = base.reconnect_backoff_ms;
        }
        if self.connect_timeout_ms == defaults.connect_timeout_ms {
            self.connect_timeout_ms = base.connect_timeout_ms;
        }
        if self.max_pending.is_none() {
            self.max_pending = base.max_pending;
        }
        if self.log_level == defaults.log_level {
            self.log_level = base.log_level;
        }
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        // Convert milliseconds to Duration
        self.reconnect_backoff = Duration::from_millis(self.reconnect_backoff_ms);
        self.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        Ok(())
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_capacity: self.queue_capacity,
            idle_sleep_us: self.idle_sleep_us,
            level: self.level,
        }
    }

    pub fn file_config(&self) -> Option<RotatingFileConfig> {
        self.file.as_ref().map(|basename| {
            RotatingFileConfig::new(basename)
                .with_max_size(self.file_max_size)
                .with_max_files(self.file_max_files)
        })
    }

    pub fn forward_config(&self) -> Option<TcpForwardConfig> {
        self.forward.as_ref().map(|endpoint| {
            let mut config = TcpForwardConfig::new(endpoint.as_str())
                .with_retry(RetryConfig::fixed(self.reconnect_backoff));
            config.connect_timeout = self.connect_timeout;
            config.max_pending = self.max_pending;
            config
        })
    }
}
