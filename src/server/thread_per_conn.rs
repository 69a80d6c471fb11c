use super::{LoopContext, ServerError};
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ACCEPT_IDLE: Duration = Duration::from_millis(10);

/// Accept loop spawning one blocking reader thread per connection.
///
/// The listener is non-blocking so the loop can notice `stop`. Handler threads
/// are tracked and drained on shutdown.
pub(crate) struct Acceptor {
    ctx: Arc<LoopContext>,
}

struct Handler {
    peer: SocketAddr,
    // Clone of the handler's socket, used to unblock its read on shutdown.
    stream: TcpStream,
    handle: JoinHandle<()>,
}

impl Acceptor {
    pub fn new(ctx: LoopContext) -> Result<Self, ServerError> {
        ctx.listener.set_nonblocking(true)?;
        Ok(Self { ctx: Arc::new(ctx) })
    }

    pub fn run(self) {
        let mut handlers: Vec<Handler> = Vec::new();
        let idle = ACCEPT_IDLE.min(self.ctx.config.poll_interval);

        while self.ctx.is_running() {
            match self.ctx.listener.accept() {
                Ok((stream, peer)) => {
                    if let Some(handler) = self.spawn_handler(stream, peer) {
                        handlers.push(handler);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    reap_finished(&mut handlers);
                    thread::sleep(idle);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "Collector accept failed");
                    thread::sleep(idle);
                }
            }
        }

        self.drain(handlers);
    }

    fn spawn_handler(&self, stream: TcpStream, peer: SocketAddr) -> Option<Handler> {
        // Accepted sockets may inherit the listener's non-blocking flag.
        if let Err(e) = stream.set_nonblocking(false) {
            warn!(%peer, error = %e, "Failed to configure collector connection");
            return None;
        }
        let shutdown_handle = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!(%peer, error = %e, "Failed to clone collector connection");
                return None;
            }
        };

        self.ctx.connected(peer);
        let ctx = Arc::clone(&self.ctx);
        let spawned = thread::Builder::new()
            .name(format!("rask-collector-conn-{}", peer.port()))
            .spawn(move || handle_connection(&ctx, stream, peer));

        match spawned {
            Ok(handle) => Some(Handler {
                peer,
                stream: shutdown_handle,
                handle,
            }),
            Err(e) => {
                warn!(%peer, error = %e, "Failed to spawn collector connection handler");
                self.ctx.disconnected(peer);
                None
            }
        }
    }

    /// Waits up to the drain timeout for open connections to finish, then
    /// shuts the remaining sockets down and joins every handler.
    fn drain(&self, mut handlers: Vec<Handler>) {
        reap_finished(&mut handlers);
        if handlers.is_empty() {
            return;
        }

        info!(open = handlers.len(), "Waiting for collector connections to close");
        let deadline = Instant::now() + self.ctx.config.drain_timeout;
        while Instant::now() < deadline && handlers.iter().any(|h| !h.handle.is_finished()) {
            thread::sleep(ACCEPT_IDLE);
        }

        for handler in handlers {
            if !handler.handle.is_finished() {
                debug!(peer = %handler.peer, "Forcing collector connection closed");
                let _ = handler.stream.shutdown(Shutdown::Both);
            }
            if handler.handle.join().is_err() {
                warn!(peer = %handler.peer, "Collector connection handler panicked");
            }
        }
    }
}

fn reap_finished(handlers: &mut Vec<Handler>) {
    let mut i = 0;
    while i < handlers.len() {
        if handlers[i].handle.is_finished() {
            let handler = handlers.swap_remove(i);
            if handler.handle.join().is_err() {
                warn!(peer = %handler.peer, "Collector connection handler panicked");
            }
        } else {
            i += 1;
        }
    }
}

fn handle_connection(ctx: &LoopContext, mut stream: TcpStream, peer: SocketAddr) {
    let mut buf = vec![0u8; ctx.config.read_buffer_size];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => ctx.surface(peer, &buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!(%peer, error = %e, "Collector read failed");
                break;
            }
        }
    }
    ctx.disconnected(peer);
}
