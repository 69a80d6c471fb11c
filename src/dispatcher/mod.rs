//! Level filtering, formatting and fan-out of log records.
//!
//! A [`Dispatcher`] runs in one of two modes. Synchronously, `log` writes the
//! formatted line to every sink before returning. Asynchronously, `log` pushes
//! the line onto a [`BoundedQueue`] (blocking when it is full) and a single
//! worker thread drains it into the sinks.

pub mod config;

pub use config::{DEFAULT_IDLE_SLEEP_US, DispatcherConfig};

use crate::buffer::{BoundedQueue, BufferError, QueueMetrics, TryPopError};
use crate::domain::{LogLevel, LogRecord};
use crate::sink::Sink;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid dispatcher configuration: {0}")]
    InvalidConfig(String),

    #[error("Queue error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Dispatcher has already been stopped")]
    AlreadyStopped,

    #[error("Failed to spawn dispatch worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherStats {
    /// Records that passed the level filter.
    pub accepted: u64,
    pub filtered: u64,
    /// Records the stopped queue refused; they went out synchronously instead.
    pub rejected: u64,
    pub async_running: bool,
    pub queue: QueueMetrics,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    filtered: AtomicU64,
    rejected: AtomicU64,
}

struct Shared {
    level: AtomicU8,
    // Also the fan-out lock: one record reaches all sinks before the next.
    sinks: Mutex<Vec<Arc<dyn Sink>>>,
    queue: BoundedQueue<String>,
    async_running: AtomicBool,
    idle_sleep: Duration,
    counters: Counters,
}

impl Shared {
    fn fan_out(&self, line: &str) {
        let sinks = self.sinks.lock();
        for sink in &*sinks {
            sink.write(line);
        }
    }
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
        config.validate()?;
        let queue = BoundedQueue::new(config.queue_capacity)?;

        Ok(Self {
            shared: Arc::new(Shared {
                level: AtomicU8::new(config.level.as_u8()),
                sinks: Mutex::new(Vec::new()),
                queue,
                async_running: AtomicBool::new(false),
                idle_sleep: config.idle_sleep(),
                counters: Counters::default(),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn set_level(&self, level: LogLevel) {
        self.shared.level.store(level.as_u8(), Ordering::Relaxed);
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::from_u8(self.shared.level.load(Ordering::Relaxed))
    }

    /// Appends a sink. Sinks cannot be removed.
    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        self.shared.sinks.lock().push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.shared.sinks.lock().len()
    }

    /// Formats and delivers one record.
    ///
    /// Records below the configured level are discarded before any
    /// formatting. In asynchronous mode this may block while the queue is
    /// full.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        if level < self.level() {
            self.shared.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.shared.counters.accepted.fetch_add(1, Ordering::Relaxed);

        let line = LogRecord::new(level, message).format_line();

        if self.is_async() {
            if let Err(rejected) = self.shared.queue.push(line) {
                self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Dispatch queue stopped, delivering record synchronously");
                self.shared.fan_out(&rejected.into_inner());
            }
        } else {
            self.shared.fan_out(&line);
        }
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogLevel::Fatal, message);
    }

    /// Spawns the dispatch worker. Calling it again while the worker runs is a
    /// no-op; calling it after [`stop_async`](Self::stop_async) fails.
    pub fn start_async(&self) -> Result<(), DispatchError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        if self.shared.queue.is_stopped() {
            return Err(DispatchError::AlreadyStopped);
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("rask-dispatch".to_string())
            .spawn(move || run_worker(&shared))
            .map_err(DispatchError::WorkerSpawn)?;

        *worker = Some(handle);
        self.shared.async_running.store(true, Ordering::Release);
        info!(
            capacity = self.shared.queue.capacity(),
            "Asynchronous dispatch started"
        );
        Ok(())
    }

    /// Stops accepting queued records, lets the worker drain what is already
    /// queued, then joins it. Later `log` calls are delivered synchronously.
    pub fn stop_async(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.shared.async_running.store(false, Ordering::Release);
        self.shared.queue.stop();

        if handle.join().is_err() {
            error!("Dispatch worker panicked");
            return;
        }
        info!(
            delivered = self.shared.queue.metrics().popped,
            "Asynchronous dispatch stopped"
        );
    }

    pub fn is_async(&self) -> bool {
        self.shared.async_running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatcherStats {
        let counters = &self.shared.counters;
        DispatcherStats {
            accepted: counters.accepted.load(Ordering::Relaxed),
            filtered: counters.filtered.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            async_running: self.is_async(),
            queue: self.shared.queue.metrics(),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop_async();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("level", &self.level())
            .field("sinks", &self.sink_count())
            .field("async", &self.is_async())
            .field("queue", &self.shared.queue)
            .finish()
    }
}

fn run_worker(shared: &Shared) {
    debug!("Dispatch worker started");
    loop {
        match shared.queue.try_pop() {
            Ok(line) => shared.fan_out(&line),
            Err(TryPopError::Empty) => thread::sleep(shared.idle_sleep),
            Err(TryPopError::Stopped) => break,
        }
    }
    debug!("Dispatch worker drained and exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MockSink;
    use mockall::predicate::function;

    fn sync_dispatcher() -> Dispatcher {
        Dispatcher::new(DispatcherConfig::default()).unwrap()
    }

    #[test]
    fn test_filtered_record_never_reaches_sinks() {
        let dispatcher = sync_dispatcher();
        let mut sink = MockSink::new();
        sink.expect_write().times(0);
        dispatcher.add_sink(Arc::new(sink));

        dispatcher.set_level(LogLevel::Warn);
        dispatcher.info("not interesting");

        let stats = dispatcher.stats();
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.accepted, 0);
    }

    #[test]
    fn test_sync_log_writes_formatted_line_to_every_sink() {
        let dispatcher = sync_dispatcher();
        for _ in 0..2 {
            let mut sink = MockSink::new();
            sink.expect_write()
                .with(function(|line: &str| {
                    line.starts_with('[') && line.ends_with("][ERROR] disk full")
                }))
                .times(1)
                .return_const(());
            dispatcher.add_sink(Arc::new(sink));
        }

        dispatcher.error("disk full");
        assert_eq!(dispatcher.sink_count(), 2);
    }

    #[test]
    fn test_level_at_threshold_is_accepted() {
        let dispatcher = sync_dispatcher();
        let mut sink = MockSink::new();
        sink.expect_write().times(1).return_const(());
        dispatcher.add_sink(Arc::new(sink));

        dispatcher.set_level(LogLevel::Warn);
        dispatcher.warn("edge");
        assert_eq!(dispatcher.level(), LogLevel::Warn);
    }

    #[test]
    fn test_start_after_stop_fails() {
        let dispatcher = sync_dispatcher();
        dispatcher.start_async().unwrap();
        dispatcher.start_async().unwrap();
        assert!(dispatcher.is_async());

        dispatcher.stop_async();
        assert!(!dispatcher.is_async());
        assert!(matches!(
            dispatcher.start_async(),
            Err(DispatchError::AlreadyStopped)
        ));
    }

    #[test]
    fn test_log_after_stop_falls_back_to_sync() {
        let dispatcher = sync_dispatcher();
        let mut sink = MockSink::new();
        sink.expect_write().times(1).return_const(());
        dispatcher.add_sink(Arc::new(sink));

        dispatcher.start_async().unwrap();
        dispatcher.stop_async();
        dispatcher.info("late");

        assert_eq!(dispatcher.stats().accepted, 1);
    }
}
