use thiserror::Error;

use crate::app::config::ConfigError;
use crate::app::shutdown::ShutdownError;
use crate::dispatcher::DispatchError;
use crate::server::ServerError;
use crate::sink::SinkError;

/// Top-level error type for the relay pipeline and the collector.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),
}
