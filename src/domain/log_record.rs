use super::log_level::LogLevel;
use chrono::{DateTime, Local};
use std::fmt;

/// Timestamp layout of a formatted record: `2025-01-10 12:00:00.123`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// A single leveled, timestamped message.
///
/// Created by the dispatcher once a message passes the level filter, rendered
/// exactly once into its line form and then discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    level: LogLevel,
    timestamp: DateTime<Local>,
    message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self::with_timestamp(level, Local::now(), message)
    }

    pub fn with_timestamp(
        level: LogLevel,
        timestamp: DateTime<Local>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            timestamp,
            message: message.into(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Renders the record as `[YYYY-MM-DD HH:MM:SS.mmm][LEVEL] message`.
    pub fn format_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}][{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.level,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_line_layout() {
        let ts = Local
            .with_ymd_and_hms(2025, 1, 10, 12, 3, 4)
            .single()
            .unwrap()
            + chrono::Duration::milliseconds(7);
        let record = LogRecord::with_timestamp(LogLevel::Warn, ts, "disk almost full");

        assert_eq!(
            record.format_line(),
            "[2025-01-10 12:03:04.007][WARN] disk almost full"
        );
    }

    #[test]
    fn test_accessors() {
        let record = LogRecord::new(LogLevel::Info, "hello");
        assert_eq!(record.level(), LogLevel::Info);
        assert_eq!(record.message(), "hello");
    }
}
