//! Binary entry points and the wiring they share.

pub mod config;
pub mod logging_system;
pub mod pipeline;
pub mod shutdown;

pub use pipeline::{Pipeline, build_pipeline, relay_lines};
pub use shutdown::{ShutdownReason, ShutdownSignal, ShutdownTrigger};

use crate::server::{CollectorServer, ConsoleOutput};
use anyhow::Context;
use config::{CollectorConfig, RelayConfig};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// `rask-log-relay`: logs each stdin line through the configured pipeline
/// until end of input or SIGINT/SIGTERM.
pub fn relay_main() -> anyhow::Result<()> {
    let config = RelayConfig::from_args(std::env::args_os())?;
    logging_system::init_tracing(config.log_level)?;
    info!(version = crate::VERSION, "Starting rask-log-relay");

    let signal = ShutdownSignal::new();
    signal.install_handler()?;

    let pipeline = build_pipeline(&config).context("Failed to build logging pipeline")?;

    let reader = {
        let dispatcher = Arc::clone(pipeline.dispatcher());
        let trigger = signal.trigger();
        let level = config.record_level;
        thread::Builder::new()
            .name("rask-stdin".to_string())
            .spawn(move || {
                let stdin = std::io::stdin().lock();
                match relay_lines(stdin, &dispatcher, level) {
                    Ok(lines) => info!(lines, "Input closed"),
                    Err(e) => error!(error = %e, "Failed to read input"),
                }
                trigger.fire(ShutdownReason::InputClosed);
            })
            .context("Failed to spawn input reader")?
    };

    let reason = signal.wait();
    info!(?reason, "Shutting down");
    pipeline.shutdown();

    // On a signal the reader may still be blocked on stdin; leave it behind.
    if reason == ShutdownReason::InputClosed && reader.join().is_err() {
        error!("Input reader panicked");
    }
    Ok(())
}

/// `rask-log-collector`: prints every received chunk until SIGINT/SIGTERM.
pub fn collector_main() -> anyhow::Result<()> {
    let config = CollectorConfig::from_args(std::env::args_os())?;
    logging_system::init_tracing(config.log_level)?;
    info!(version = crate::VERSION, "Starting rask-log-collector");

    let signal = ShutdownSignal::new();
    signal.install_handler()?;

    let mut server = CollectorServer::new(config.server_config(), Arc::new(ConsoleOutput));
    server.start().context("Failed to start collector")?;

    signal.wait();
    server.stop();
    Ok(())
}
