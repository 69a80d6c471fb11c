use super::ServerMode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to bind to address {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to listen on {address}: {source}")]
    Listen {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server mode '{0}' is not supported on this platform")]
    Unsupported(ServerMode),

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Failed to spawn server thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}
