//! Domain layer for rask-log-relay.
//!
//! Contains the canonical types shared across all modules:
//! - `LogRecord`: one leveled, timestamped message flowing through the pipeline
//! - `LogLevel`: record severity (Trace/Debug/Info/Warn/Error/Fatal)
//! - `RelayError`: top-level error type

pub mod error;
pub mod log_level;
pub mod log_record;

pub use error::RelayError;
pub use log_level::LogLevel;
pub use log_record::LogRecord;
