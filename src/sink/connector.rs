use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Opens the outbound stream used by [`TcpForwardSink`](super::TcpForwardSink).
///
/// Owned by the forward worker for its whole lifetime, so implementations may
/// keep state between attempts.
pub trait Connector: Send + 'static {
    type Stream: Write + Send + 'static;

    fn connect(&mut self, endpoint: &str, timeout: Duration) -> io::Result<Self::Stream>;
}

/// Plain TCP connector. Tries every resolved address in turn.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    write_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(write_timeout: Option<Duration>) -> Self {
        Self { write_timeout }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&mut self, endpoint: &str, timeout: Duration) -> io::Result<TcpStream> {
        let mut last_error = None;

        for addr in endpoint.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(self.write_timeout)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("endpoint '{endpoint}' resolved to no addresses"),
            )
        }))
    }
}
