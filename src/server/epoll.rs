use super::{LoopContext, ServerError};
use std::collections::HashMap;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::{debug, warn};

const MAX_EVENTS: usize = 64;

/// Owned epoll instance, closed on drop.
struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    fn new() -> io::Result<Self> {
        // SAFETY: plain syscall with no pointer arguments.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` was just returned by epoll_create1 and is owned by nobody else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Level-triggered read interest, keyed by the descriptor itself.
    fn add(&self, fd: RawFd) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };
        // SAFETY: `event` outlives the call and both descriptors are open.
        let rc = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn wait(&self, events: &mut [libc::epoll_event], timeout_ms: libc::c_int) -> io::Result<usize> {
        // SAFETY: the kernel writes at most `events.len()` entries into `events`.
        let n = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

/// Single-threaded `epoll(7)` loop.
///
/// Closed connections are simply dropped; closing the descriptor removes it
/// from the interest list.
pub(crate) struct EpollLoop {
    ctx: LoopContext,
    epoll: Epoll,
    connections: HashMap<RawFd, (TcpStream, SocketAddr)>,
    buf: Vec<u8>,
}

impl EpollLoop {
    pub fn new(ctx: LoopContext) -> Result<Self, ServerError> {
        ctx.listener.set_nonblocking(true)?;
        let epoll = Epoll::new()?;
        epoll.add(ctx.listener.as_raw_fd())?;
        let buf = vec![0u8; ctx.config.read_buffer_size];

        Ok(Self {
            ctx,
            epoll,
            connections: HashMap::new(),
            buf,
        })
    }

    pub fn run(mut self) {
        let timeout = self.ctx.config.poll_timeout_ms();
        let listen_fd = self.ctx.listener.as_raw_fd();
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        while self.ctx.is_running() {
            let ready = match self.epoll.wait(&mut events, timeout) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "epoll_wait failed");
                    self.ctx.pause_after_error();
                    continue;
                }
            };

            for event in &events[..ready] {
                // Copy out of the packed struct before use.
                let token = { event.u64 } as RawFd;
                if token == listen_fd {
                    if !self.accept_pending() {
                        self.ctx.pause_after_error();
                    }
                } else {
                    self.read_ready(token);
                }
            }
        }

        for (_, peer) in self.connections.values() {
            self.ctx.disconnected(*peer);
        }
        debug!(open = self.connections.len(), "epoll loop exiting");
    }

    /// Returns `false` when accepting stopped on a hard error such as EMFILE.
    fn accept_pending(&mut self) -> bool {
        loop {
            match self.ctx.listener.accept() {
                Ok((stream, peer)) => {
                    let registered = stream
                        .set_nonblocking(true)
                        .and_then(|()| self.epoll.add(stream.as_raw_fd()));
                    if let Err(e) = registered {
                        warn!(%peer, error = %e, "Failed to register collector connection");
                        continue;
                    }
                    self.ctx.connected(peer);
                    self.connections.insert(stream.as_raw_fd(), (stream, peer));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "Collector accept failed");
                    return false;
                }
            }
        }
    }

    fn read_ready(&mut self, fd: RawFd) {
        let Some((stream, peer)) = self.connections.get_mut(&fd) else {
            return;
        };
        let peer = *peer;

        let close = match stream.read(&mut self.buf) {
            Ok(0) => true,
            Ok(n) => {
                self.ctx.surface(peer, &self.buf[..n]);
                false
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                false
            }
            Err(e) => {
                debug!(%peer, error = %e, "Collector read failed");
                true
            }
        };

        if close {
            self.connections.remove(&fd);
            self.ctx.disconnected(peer);
        }
    }
}
