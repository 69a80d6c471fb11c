//! Output sinks fed by the dispatcher.
//!
//! A sink receives fully formatted lines, one call per record, from a single
//! thread at a time (the dispatch worker, or a synchronous caller holding the
//! dispatcher's fan-out lock). Each sink guards its own state.

pub mod clock;
pub mod connector;
pub mod console;
pub mod rotating_file;
pub mod tcp_forward;

pub use clock::{Clock, LocalClock, ManualClock};
pub use connector::{Connector, TcpConnector};
pub use console::ConsoleSink;
pub use rotating_file::{FileSinkStats, RotatingFileConfig, RotatingFileSink};
pub use tcp_forward::{ForwardStats, TcpForwardConfig, TcpForwardSink};

use std::path::PathBuf;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Invalid sink configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn sink worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Destination for formatted log lines.
///
/// `write` never fails from the caller's point of view: I/O problems are
/// handled, counted and reported inside the sink.
#[cfg_attr(test, automock)]
pub trait Sink: Send + Sync {
    fn write(&self, line: &str);
}
