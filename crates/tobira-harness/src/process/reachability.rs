//! TCP reachability checks.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Checks whether anything accepts TCP connections on `host:port`.
///
/// Every resolved address is tried, so a listener bound only to `127.0.0.1`
/// is found even when `localhost` resolves to `::1` first.
///
/// # Errors
///
/// Returns the underlying IO error when resolution fails or a connection
/// attempt fails with something other than "nothing is listening".
pub fn port_is_reachable(host: &str, port: u16, timeout: Duration) -> io::Result<bool> {
    for address in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(_) => return Ok(true),
            Err(error) if is_port_available(&error) => {}
            Err(error) => return Err(error),
        }
    }
    Ok(false)
}

/// Determines whether an IO error means that nobody listens on the port.
///
/// Unreachable networks cover hosts without IPv6 where `localhost` still
/// resolves to `::1`. `TimedOut` counts as "not yet": a backend that is still binding may let a
/// single attempt time out, and the caller bounds the overall wait anyway.
fn is_port_available(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::TimedOut
    )
}
