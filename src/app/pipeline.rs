use super::config::RelayConfig;
use crate::dispatcher::Dispatcher;
use crate::domain::{LogLevel, RelayError};
use crate::sink::{ConsoleSink, RotatingFileSink, TcpForwardSink};
use std::io::{self, BufRead};
use std::sync::Arc;
use tracing::{info, warn};

/// A dispatcher wired to its sinks, plus handles to the sinks that need an
/// explicit flush or report at shutdown.
pub struct Pipeline {
    dispatcher: Arc<Dispatcher>,
    file: Option<Arc<RotatingFileSink>>,
    forwarder: Option<Arc<TcpForwardSink>>,
}

impl Pipeline {
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn file_sink(&self) -> Option<&Arc<RotatingFileSink>> {
        self.file.as_ref()
    }

    pub fn forwarder(&self) -> Option<&Arc<TcpForwardSink>> {
        self.forwarder.as_ref()
    }

    /// Drains the dispatch queue, then gives the forwarder its final flush.
    pub fn shutdown(&self) {
        self.dispatcher.stop_async();

        if let Some(forwarder) = &self.forwarder {
            forwarder.close();
            let stats = forwarder.stats();
            info!(
                endpoint = forwarder.endpoint(),
                sent = stats.sent,
                dropped = stats.dropped,
                reconnects = stats.connects,
                "Forwarder closed"
            );
        }
        if let Some(file) = &self.file {
            let stats = file.stats();
            if stats.write_failures > 0 {
                warn!(failures = stats.write_failures, "Some records could not be written to file");
            }
        }

        let stats = self.dispatcher.stats();
        info!(
            accepted = stats.accepted,
            filtered = stats.filtered,
            rejected = stats.rejected,
            "Pipeline shut down"
        );
    }
}

/// Builds the dispatcher described by `config`: level, sinks in the order
/// console, file, forwarder, and asynchronous mode unless `sync` is set.
pub fn build_pipeline(config: &RelayConfig) -> Result<Pipeline, RelayError> {
    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher_config())?);

    if !config.no_console {
        dispatcher.add_sink(Arc::new(ConsoleSink::new()));
    }

    let file = match config.file_config() {
        Some(file_config) => {
            let sink = Arc::new(RotatingFileSink::new(file_config)?);
            dispatcher.add_sink(sink.clone());
            Some(sink)
        }
        None => None,
    };

    let forwarder = match config.forward_config() {
        Some(forward_config) => {
            let sink = Arc::new(TcpForwardSink::new(forward_config)?);
            dispatcher.add_sink(sink.clone());
            Some(sink)
        }
        None => None,
    };

    if !config.sync {
        dispatcher.start_async()?;
    }

    info!(
        level = %config.level,
        sinks = dispatcher.sink_count(),
        asynchronous = !config.sync,
        "Pipeline ready"
    );

    Ok(Pipeline {
        dispatcher,
        file,
        forwarder,
    })
}

/// Logs every line of `reader` at `level`. Returns the number of lines read.
pub fn relay_lines<R: BufRead>(
    reader: R,
    dispatcher: &Dispatcher,
    level: LogLevel,
) -> io::Result<u64> {
    let mut count = 0;
    for line in reader.lines() {
        let line = line?;
        dispatcher.log(level, line);
        count += 1;
    }
    Ok(count)
}
