use super::ServerError;
use super::config::LISTEN_BACKLOG;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};

/// Binds `0.0.0.0:{port}` with `SO_REUSEADDR` and a backlog of
/// [`LISTEN_BACKLOG`]. The returned listener is left blocking.
pub fn bind_listener(port: u16) -> Result<TcpListener, ServerError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    let address = addr.to_string();

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(|e| {
        ServerError::Bind {
            address: address.clone(),
            source: e,
        }
    })?;
    socket
        .set_reuse_address(true)
        .map_err(|e| ServerError::Bind {
            address: address.clone(),
            source: e,
        })?;
    socket.bind(&addr.into()).map_err(|e| ServerError::Bind {
        address: address.clone(),
        source: e,
    })?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| ServerError::Listen { address, source: e })?;

    Ok(TcpListener::from(socket))
}
