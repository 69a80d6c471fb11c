use super::{LoopContext, ServerError};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use tracing::{debug, warn};

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR;

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

/// Single-threaded `poll(2)` loop.
///
/// `fds[0]` is always the listener and `fds[i]` watches `connections[i - 1]`.
/// Both vectors are only modified between polling rounds.
pub(crate) struct PollLoop {
    ctx: LoopContext,
    fds: Vec<libc::pollfd>,
    connections: Vec<Connection>,
    buf: Vec<u8>,
}

impl PollLoop {
    pub fn new(ctx: LoopContext) -> Result<Self, ServerError> {
        ctx.listener.set_nonblocking(true)?;
        let listen_fd = libc::pollfd {
            fd: ctx.listener.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let buf = vec![0u8; ctx.config.read_buffer_size];

        Ok(Self {
            ctx,
            fds: vec![listen_fd],
            connections: Vec::new(),
            buf,
        })
    }

    pub fn run(mut self) {
        let timeout = self.ctx.config.poll_timeout_ms();

        while self.ctx.is_running() {
            // SAFETY: `fds` is a live Vec of initialised pollfd entries and the
            // length passed is its exact length; it is not touched during the call.
            let ready = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as libc::nfds_t,
                    timeout,
                )
            };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    warn!(error = %err, "poll failed");
                    self.ctx.pause_after_error();
                }
                continue;
            }
            if ready == 0 {
                continue;
            }

            let (accepted, accept_failed) = if self.fds[0].revents & libc::POLLIN != 0 {
                self.accept_pending()
            } else {
                (Vec::new(), false)
            };

            let mut closed = Vec::new();
            for i in 1..self.fds.len() {
                let revents = self.fds[i].revents;
                if revents == 0 {
                    continue;
                }
                if revents & libc::POLLNVAL != 0 || !self.read_ready(i - 1, revents) {
                    closed.push(i);
                }
            }

            self.apply_changes(closed, accepted);
            if accept_failed {
                self.ctx.pause_after_error();
            }
        }

        for conn in &self.connections {
            self.ctx.disconnected(conn.peer);
        }
        debug!(open = self.connections.len(), "poll loop exiting");
    }

    /// Accepts every connection currently queued on the listener. The flag is
    /// set when accepting stopped on a hard error such as EMFILE.
    fn accept_pending(&self) -> (Vec<Connection>, bool) {
        let mut accepted = Vec::new();
        loop {
            match self.ctx.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(%peer, error = %e, "Failed to configure collector connection");
                        continue;
                    }
                    self.ctx.connected(peer);
                    accepted.push(Connection { stream, peer });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return (accepted, false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "Collector accept failed");
                    return (accepted, true);
                }
            }
        }
    }

    /// Reads once from a ready connection. Returns `false` once it should be
    /// closed.
    fn read_ready(&mut self, index: usize, revents: libc::c_short) -> bool {
        if revents & READ_EVENTS == 0 {
            return true;
        }

        let conn = &mut self.connections[index];
        match conn.stream.read(&mut self.buf) {
            Ok(0) => false,
            Ok(n) => {
                self.ctx.surface(conn.peer, &self.buf[..n]);
                true
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                true
            }
            Err(e) => {
                debug!(peer = %conn.peer, error = %e, "Collector read failed");
                false
            }
        }
    }

    fn apply_changes(&mut self, closed: Vec<usize>, accepted: Vec<Connection>) {
        // Highest index first so earlier removals don't shift later ones.
        for &i in closed.iter().rev() {
            self.fds.remove(i);
            let conn = self.connections.remove(i - 1);
            self.ctx.disconnected(conn.peer);
        }

        for conn in accepted {
            self.fds.push(libc::pollfd {
                fd: conn.stream.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            self.connections.push(conn);
        }
    }
}
