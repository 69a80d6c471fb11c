use super::connector::{Connector, TcpConnector};
use super::{Sink, SinkError};
use crate::app::config::serde_helpers;
use crate::reliability::{RetryConfig, RetryPolicy};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpForwardConfig {
    /// `host:port` of the collector.
    pub endpoint: String,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(with = "serde_helpers", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "serde_helpers", default = "default_send_timeout")]
    pub send_timeout: Duration,
    /// Cap on queued messages. `None` means unbounded; when set, the oldest
    /// pending message is evicted to make room.
    #[serde(default)]
    pub max_pending: Option<usize>,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(5)
}

impl TcpForwardConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            retry: RetryConfig::default(),
            connect_timeout: default_connect_timeout(),
            send_timeout: default_send_timeout(),
            max_pending: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = Some(max_pending);
        self
    }

    pub fn validate(&self) -> Result<(), SinkError> {
        if self.endpoint.trim().is_empty() {
            return Err(SinkError::InvalidConfig(
                "Forward endpoint cannot be empty".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.send_timeout.is_zero() {
            return Err(SinkError::InvalidConfig(
                "Forward timeouts must be greater than 0".to_string(),
            ));
        }
        if self.max_pending == Some(0) {
            return Err(SinkError::InvalidConfig(
                "Forward max_pending must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub queued: u64,
    pub sent: u64,
    pub send_failures: u64,
    pub connects: u64,
    pub connect_failures: u64,
    /// Evicted by `max_pending` or abandoned at shutdown.
    pub dropped: u64,
    pub pending: usize,
    pub connected: bool,
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    sent: AtomicU64,
    send_failures: AtomicU64,
    connects: AtomicU64,
    connect_failures: AtomicU64,
    dropped: AtomicU64,
}

struct Outbound {
    // (sequence, newline-terminated payload)
    pending: VecDeque<(u64, String)>,
    next_seq: u64,
    stop: bool,
}

struct Shared {
    outbound: Mutex<Outbound>,
    wake: Condvar,
    connected: AtomicBool,
    counters: Counters,
}

impl Shared {
    /// Blocks until a message is pending. `None` once shutdown was requested.
    fn next_pending(&self) -> Option<(u64, String)> {
        let mut outbound = self.outbound.lock();
        while outbound.pending.is_empty() && !outbound.stop {
            self.wake.wait(&mut outbound);
        }
        if outbound.stop {
            return None;
        }
        outbound.pending.front().cloned()
    }

    fn peek(&self) -> Option<(u64, String)> {
        self.outbound.lock().pending.front().cloned()
    }

    /// Removes the message once it has been fully sent. It may already be gone
    /// if `max_pending` evicted it in the meantime.
    fn complete(&self, seq: u64) {
        let mut outbound = self.outbound.lock();
        if outbound.pending.front().is_some_and(|(front, _)| *front == seq) {
            outbound.pending.pop_front();
        }
    }

    fn is_stopping(&self) -> bool {
        self.outbound.lock().stop
    }

    /// Sleeps for `delay` unless shutdown is requested first.
    fn backoff(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut outbound = self.outbound.lock();
        while !outbound.stop {
            if self.wake.wait_until(&mut outbound, deadline).timed_out() {
                break;
            }
        }
    }
}

/// Forwards every line to a remote collector over a plain TCP stream.
///
/// `write` only queues the line and returns; a dedicated worker owns the
/// connection. The worker reconnects after any failure and resends the
/// message that was in flight, so delivery is at-least-once: a receiver may
/// see a partially sent record followed by the full record again.
pub struct TcpForwardSink {
    endpoint: String,
    max_pending: Option<usize>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TcpForwardSink {
    pub fn new(config: TcpForwardConfig) -> Result<Self, SinkError> {
        let connector = TcpConnector::new(Some(config.send_timeout));
        Self::with_connector(config, connector)
    }

    pub fn with_connector<C: Connector>(
        config: TcpForwardConfig,
        connector: C,
    ) -> Result<Self, SinkError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            outbound: Mutex::new(Outbound {
                pending: VecDeque::new(),
                next_seq: 0,
                stop: false,
            }),
            wake: Condvar::new(),
            connected: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let endpoint = config.endpoint.clone();
        let max_pending = config.max_pending;
        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("rask-tcp-forward".to_string())
                .spawn(move || run_worker(shared, connector, config))
                .map_err(SinkError::WorkerSpawn)?
        };

        Ok(Self {
            endpoint,
            max_pending,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.shared.outbound.lock().pending.len()
    }

    pub fn stats(&self) -> ForwardStats {
        let counters = &self.shared.counters;
        ForwardStats {
            queued: counters.queued.load(Ordering::Relaxed),
            sent: counters.sent.load(Ordering::Relaxed),
            send_failures: counters.send_failures.load(Ordering::Relaxed),
            connects: counters.connects.load(Ordering::Relaxed),
            connect_failures: counters.connect_failures.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            pending: self.pending(),
            connected: self.is_connected(),
        }
    }

    /// Stops the worker and closes the connection.
    ///
    /// Pending messages get one flush attempt first, over the open connection
    /// or a single fresh connect. Whatever cannot be sent is counted as
    /// dropped. Idempotent.
    pub fn close(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        self.shared.outbound.lock().stop = true;
        self.shared.wake.notify_all();

        if worker.join().is_err() {
            error!(endpoint = %self.endpoint, "TCP forward worker panicked");
        }
    }
}

impl Sink for TcpForwardSink {
    fn write(&self, line: &str) {
        let mut payload = String::with_capacity(line.len() + 1);
        payload.push_str(line);
        payload.push('\n');

        {
            let mut outbound = self.shared.outbound.lock();
            if let Some(max_pending) = self.max_pending {
                while outbound.pending.len() >= max_pending {
                    outbound.pending.pop_front();
                    self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            let seq = outbound.next_seq;
            outbound.next_seq += 1;
            outbound.pending.push_back((seq, payload));
        }

        self.shared.counters.queued.fetch_add(1, Ordering::Relaxed);
        self.shared.wake.notify_one();
    }
}

impl Drop for TcpForwardSink {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpForwardSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpForwardSink")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("pending", &self.pending())
            .finish()
    }
}

fn run_worker<C: Connector>(shared: Arc<Shared>, mut connector: C, config: TcpForwardConfig) {
    let retry = RetryPolicy::new(config.retry.clone());
    let endpoint = config.endpoint.as_str();
    let mut stream: Option<C::Stream> = None;
    let mut failed_attempts: u32 = 0;

    loop {
        let Some(conn) = stream.as_mut() else {
            if shared.is_stopping() {
                final_attempt(&shared, &mut connector, &config);
                break;
            }

            match connector.connect(endpoint, config.connect_timeout) {
                Ok(conn) => {
                    info!(endpoint, "Connected to collector");
                    shared.counters.connects.fetch_add(1, Ordering::Relaxed);
                    shared.connected.store(true, Ordering::Release);
                    failed_attempts = 0;
                    stream = Some(conn);
                }
                Err(e) => {
                    shared.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
                    let delay = retry.calculate_delay(failed_attempts);
                    failed_attempts = failed_attempts.saturating_add(1);
                    debug!(
                        endpoint,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Connect to collector failed"
                    );
                    shared.backoff(delay);
                }
            }
            continue;
        };

        let Some((seq, payload)) = shared.next_pending() else {
            flush_remaining(&shared, conn, endpoint);
            break;
        };

        match send_once(conn, payload.as_bytes()) {
            Ok(()) => {
                shared.complete(seq);
                shared.counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!(endpoint, error = %e, "Send to collector failed, reconnecting");
                shared.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                shared.connected.store(false, Ordering::Release);
                // Dropping the stream closes the socket.
                stream = None;
            }
        }
    }

    shared.connected.store(false, Ordering::Release);

    let abandoned = shared.outbound.lock().pending.len();
    if abandoned > 0 {
        shared
            .counters
            .dropped
            .fetch_add(abandoned as u64, Ordering::Relaxed);
        warn!(endpoint, abandoned, "TCP forward sink closed with unsent messages");
    }
    debug!(endpoint, "TCP forward worker stopped");
}

/// Shutdown while disconnected: one last connect, then a flush, if anything
/// is still pending.
fn final_attempt<C: Connector>(shared: &Shared, connector: &mut C, config: &TcpForwardConfig) {
    if shared.outbound.lock().pending.is_empty() {
        return;
    }
    let endpoint = config.endpoint.as_str();
    match connector.connect(endpoint, config.connect_timeout) {
        Ok(mut conn) => {
            shared.counters.connects.fetch_add(1, Ordering::Relaxed);
            flush_remaining(shared, &mut conn, endpoint);
        }
        Err(e) => {
            shared.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
            debug!(endpoint, error = %e, "Final connect to collector failed");
        }
    }
}

/// One flush pass at shutdown; gives up at the first failure.
fn flush_remaining<W: Write>(shared: &Shared, conn: &mut W, endpoint: &str) {
    while let Some((seq, payload)) = shared.peek() {
        if let Err(e) = send_once(conn, payload.as_bytes()) {
            debug!(endpoint, error = %e, "Final flush to collector failed");
            shared.counters.send_failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
        shared.complete(seq);
        shared.counters.sent.fetch_add(1, Ordering::Relaxed);
    }
}

/// A single send; anything short of the full payload counts as a failure.
fn send_once<W: Write>(conn: &mut W, payload: &[u8]) -> io::Result<()> {
    let sent = conn.write(payload)?;
    if sent != payload.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short send: {sent} of {} bytes", payload.len()),
        ));
    }
    Ok(())
}
