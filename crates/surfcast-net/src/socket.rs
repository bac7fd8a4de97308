//! Socket helpers shared by the heartbeat sender and the data receiver

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolve `host:port` and keep the first IPv4 result.
///
/// `Ok(None)` means resolution worked but produced no IPv4 address.
pub(crate) fn resolve_ipv4(host: &str, port: u16) -> io::Result<Option<SocketAddr>> {
    Ok((host, port).to_socket_addrs()?.find(SocketAddr::is_ipv4))
}

/// Errors meaning the descriptor was closed or invalidated underneath us
pub(crate) fn is_closed_descriptor(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(err.raw_os_error(), Some(libc::EBADF) | Some(libc::ENOTSOCK))
    }
    #[cfg(not(unix))]
    {
        err.kind() == io::ErrorKind::NotConnected
    }
}

/// Errors that only mean "nothing to do right now"
pub(crate) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
