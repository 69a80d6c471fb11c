use super::config::TracingLevel;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("Logging initialization failed: {details}")]
    LoggingInitFailed {
        details: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Output layout of the diagnostics, chosen by `RUST_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Filter string for the subscriber: `RUST_LOG` wins when present and
/// non-empty, otherwise the configured level applies to everything.
pub fn filter_directives(level: TracingLevel, rust_log: Option<&str>) -> String {
    match rust_log.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ => tracing::Level::from(level).as_str().to_ascii_lowercase(),
    }
}

/// Installs the global tracing subscriber, writing to stderr.
///
/// Stdout is left to the console sink and the collector output.
pub fn init_tracing(level: TracingLevel) -> Result<(), InitializationError> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter_string = filter_directives(level, rust_log.as_deref());
    let env_filter =
        EnvFilter::try_new(&filter_string).map_err(|e| InitializationError::LoggingInitFailed {
            details: format!("Failed to create EnvFilter with '{filter_string}'"),
            source: Box::new(e),
        })?;

    let format = LogFormat::from_env_value(std::env::var("RUST_LOG_FORMAT").ok().as_deref());
    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init(),
    };

    result.map_err(|e| InitializationError::LoggingInitFailed {
        details: "Failed to set global tracing subscriber".to_string(),
        source: Box::new(e),
    })
}
