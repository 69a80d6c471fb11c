use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("Failed to install signal handler: {0}")]
    Handler(#[from] ctrlc::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM.
    Signal,
    /// The input stream reached end of file.
    InputClosed,
}

/// Cloneable handle that requests shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Sender<ShutdownReason>,
}

impl ShutdownTrigger {
    pub fn fire(&self, reason: ShutdownReason) {
        if self.tx.send(reason).is_err() {
            warn!(?reason, "Shutdown already completed");
        }
    }
}

/// Collects shutdown requests from signal handlers and worker threads.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: Sender<ShutdownReason>,
    rx: Receiver<ShutdownReason>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            tx: self.tx.clone(),
        }
    }

    /// Routes SIGINT/SIGTERM into this signal. Only one handler can be
    /// installed per process.
    pub fn install_handler(&self) -> Result<(), ShutdownError> {
        let trigger = self.trigger();
        ctrlc::set_handler(move || {
            info!("Shutdown signal received");
            trigger.fire(ShutdownReason::Signal);
        })?;
        Ok(())
    }

    /// Blocks until the first shutdown request.
    pub fn wait(&self) -> ShutdownReason {
        // `self` holds a sender, so the channel cannot disconnect.
        self.rx.recv().unwrap_or(ShutdownReason::Signal)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<ShutdownReason> {
        match self.rx.recv_timeout(timeout) {
            Ok(reason) => Some(reason),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}
