//! Listener Binding
//!
//! Turns a configured bind address into a listening socket.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};

const LISTEN_BACKLOG: i32 = 1024;

/// Where the listener should bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindTarget {
    /// IPv6 wildcard accepting both IPv4 and IPv6 peers
    DualStack(u16),
    /// A concrete socket address
    Addr(SocketAddr),
}

/// Resolve a bind address string
///
/// Empty selects the dual-stack wildcard. A literal IP (optionally in
/// brackets) is used as is. Anything else is treated as a hostname and the
/// first IPv4 address it resolves to is used.
pub async fn resolve_bind_target(address: &str, port: u16) -> ServerResult<BindTarget> {
    let address = address.trim();
    if address.is_empty() {
        return Ok(BindTarget::DualStack(port));
    }

    let literal = address.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        return Ok(BindTarget::Addr(SocketAddr::new(ip, port)));
    }

    debug!(host = %address, "Resolving bind hostname");
    let resolved = tokio::net::lookup_host((address, port)).await.map_err(|e| {
        warn!(host = %address, "Hostname lookup failed: {}", e);
        ServerError::Resolution { host: address.to_string() }
    })?;

    resolved
        .into_iter()
        .find(SocketAddr::is_ipv4)
        .map(BindTarget::Addr)
        .ok_or_else(|| ServerError::Resolution { host: address.to_string() })
}

/// Bind and start listening
pub fn bind(target: BindTarget) -> ServerResult<TcpListener> {
    let listener = match target {
        BindTarget::Addr(addr) => {
            bind_socket(addr, false).map_err(|source| ServerError::Bind { addr, source })?
        }
        BindTarget::DualStack(port) => {
            let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
            match bind_socket(addr, true) {
                Ok(listener) => listener,
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    return Err(ServerError::Bind { addr, source: e });
                }
                Err(e) => {
                    // Host without IPv6 support
                    warn!(
                        "Dual-stack bind on {} failed ({}), falling back to IPv4 wildcard",
                        addr, e
                    );
                    let v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
                    bind_socket(v4, false)
                        .map_err(|source| ServerError::Bind { addr: v4, source })?
                }
            }
        }
    };

    if let Ok(local) = listener.local_addr() {
        info!("Listening on {}", local);
    }
    Ok(listener)
}

fn bind_socket(addr: SocketAddr, dual_stack: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    if dual_stack {
        socket.set_only_v6(false)?;
    }
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}
