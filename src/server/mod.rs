//! TCP collector that surfaces whatever bytes forwarders send it.
//!
//! The listening socket is bound by [`CollectorServer::start`]; a single
//! control thread then runs the selected [`ServerMode`]. Every mode hands each
//! chunk it reads to the same [`ChunkHandler`], so the observable output does
//! not depend on the mode.

pub mod config;
pub mod error;
pub mod listener;
pub mod output;

#[cfg(target_os = "linux")]
mod epoll;
mod poll;
mod thread_per_conn;

pub use config::{LISTEN_BACKLOG, ServerConfig, ServerMode};
pub use error::ServerError;
pub use listener::bind_listener;
pub use output::{CapturedOutput, Chunk, ChunkHandler, ConsoleOutput};

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// State shared by every strategy's control loop.
pub(crate) struct LoopContext {
    pub listener: TcpListener,
    pub running: Arc<AtomicBool>,
    pub output: Arc<dyn ChunkHandler>,
    pub config: ServerConfig,
}

impl LoopContext {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn connected(&self, peer: SocketAddr) {
        debug!(%peer, "Collector accepted connection");
        self.output.on_connect(peer);
    }

    pub fn surface(&self, peer: SocketAddr, chunk: &[u8]) {
        self.output.on_chunk(peer, chunk);
    }

    pub fn disconnected(&self, peer: SocketAddr) {
        debug!(%peer, "Collector connection closed");
        self.output.on_disconnect(peer);
    }

    /// Sleeps for one poll interval after a failed wait or accept, returning
    /// early once the server is stopped.
    pub fn pause_after_error(&self) {
        let deadline = Instant::now() + self.config.poll_interval;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }
}

pub struct CollectorServer {
    config: ServerConfig,
    output: Arc<dyn ChunkHandler>,
    running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    control: Option<JoinHandle<()>>,
}

impl CollectorServer {
    pub fn new(config: ServerConfig, output: Arc<dyn ChunkHandler>) -> Self {
        Self {
            config,
            output,
            running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            control: None,
        }
    }

    pub fn mode(&self) -> ServerMode {
        self.config.mode
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address the listening socket was bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.control.is_some() && self.running.load(Ordering::Acquire)
    }

    /// Binds `0.0.0.0:{port}` and spawns the control thread.
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if self.control.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        let mode = self.config.mode;
        if !mode.is_supported() {
            return Err(ServerError::Unsupported(mode));
        }
        self.config.validate()?;

        let listener = bind_listener(self.config.port)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::Release);
        let ctx = LoopContext {
            listener,
            running: Arc::clone(&self.running),
            output: Arc::clone(&self.output),
            config: self.config.clone(),
        };

        let spawned = build_control_loop(mode, ctx).and_then(|control| {
            thread::Builder::new()
                .name(format!("rask-collector-{mode}"))
                .spawn(control)
                .map_err(ServerError::Spawn)
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(e);
            }
        };

        info!(address = %local_addr, %mode, "Collector listening");
        self.local_addr = Some(local_addr);
        self.control = Some(handle);
        Ok(local_addr)
    }

    /// Clears the running flag and joins the control thread, which closes the
    /// listening socket on its way out. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.control.take() else {
            return;
        };

        self.running.store(false, Ordering::Release);
        if handle.join().is_err() {
            error!(mode = %self.config.mode, "Collector control thread panicked");
            return;
        }
        info!(mode = %self.config.mode, "Collector stopped");
    }
}

impl Drop for CollectorServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CollectorServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorServer")
            .field("config", &self.config)
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}

type ControlLoop = Box<dyn FnOnce() + Send + 'static>;

fn build_control_loop(mode: ServerMode, ctx: LoopContext) -> Result<ControlLoop, ServerError> {
    match mode {
        ServerMode::ThreadPerConnection => {
            let acceptor = thread_per_conn::Acceptor::new(ctx)?;
            Ok(Box::new(move || acceptor.run()))
        }
        ServerMode::Poll => {
            let poller = poll::PollLoop::new(ctx)?;
            Ok(Box::new(move || poller.run()))
        }
        #[cfg(target_os = "linux")]
        ServerMode::Epoll => {
            let poller = epoll::EpollLoop::new(ctx)?;
            Ok(Box::new(move || poller.run()))
        }
        #[cfg(not(target_os = "linux"))]
        ServerMode::Epoll => Err(ServerError::Unsupported(mode)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;

    fn loop_context(poll_interval: Duration) -> LoopContext {
        LoopContext {
            listener: bind_listener(0).unwrap(),
            running: Arc::new(AtomicBool::new(true)),
            output: Arc::new(CapturedOutput::new()),
            config: ServerConfig::new(0, ServerMode::Poll).with_poll_interval(poll_interval),
        }
    }

    #[test]
    fn test_pause_after_error_waits_one_poll_interval() {
        let ctx = loop_context(Duration::from_millis(60));
        let started = Instant::now();
        ctx.pause_after_error();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_pause_after_error_returns_once_stopped() {
        let ctx = loop_context(Duration::from_secs(30));
        let running = Arc::clone(&ctx.running);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            running.store(false, Ordering::Release);
        });

        let started = Instant::now();
        ctx.pause_after_error();
        assert!(started.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    fn test_config(mode: ServerMode) -> ServerConfig {
        ServerConfig::new(0, mode).with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let output = Arc::new(CapturedOutput::new());
        let mut server = CollectorServer::new(test_config(ServerMode::Poll), output);
        server.start().unwrap();

        assert!(matches!(server.start(), Err(ServerError::AlreadyRunning)));
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_closes_listener() {
        let output = Arc::new(CapturedOutput::new());
        let mut server = CollectorServer::new(test_config(ServerMode::Poll), output);
        let addr = server.start().unwrap();
        assert!(server.is_running());

        server.stop();
        server.stop();

        let port = addr.port();
        assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
    }

    #[test]
    fn test_chunk_reaches_handler() {
        let output = Arc::new(CapturedOutput::new());
        let mut server = CollectorServer::new(
            test_config(ServerMode::ThreadPerConnection),
            output.clone(),
        );
        let addr = server.start().unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
        client.write_all(b"hello collector\n").unwrap();

        assert!(output.wait_until_contains("hello collector", Duration::from_secs(5)));
        drop(client);
        server.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let output = Arc::new(CapturedOutput::new());
        let mut server = CollectorServer::new(test_config(ServerMode::Poll), output);
        server.start().unwrap();
        server.stop();
        server.start().unwrap();
        assert!(server.is_running());
    }
}
