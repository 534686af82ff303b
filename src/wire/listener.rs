//! Socket listeners for both wire endpoint kinds
//!
//! TCP goes through tokio directly; Unix domain sockets go through the
//! interprocess crate. Binding is synchronous: once [`WireListener::bind`]
//! returns, the socket is in the listening state and clients can connect,
//! even before anyone calls `accept`.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::common::{Error, Result};

use super::engine::WireConnection;
use super::WireEndpoint;

/// Bytes written by the poison-pill client
pub(super) const POISON_PILL: &[u8] = b"some junk to make it fail";

#[cfg(unix)]
mod platform {
    pub use interprocess::local_socket::tokio::{prelude::*, Listener, Stream};
    pub use interprocess::local_socket::traits::tokio::{Listener as _, Stream as _};
    pub use interprocess::local_socket::{GenericFilePath, ListenerOptions};
}

#[cfg(unix)]
use platform::*;

/// A bound, listening wire socket
pub enum WireListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: Listener, path: PathBuf },
}

impl WireListener {
    /// Bind and listen on `endpoint`
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(endpoint: &WireEndpoint) -> Result<Self> {
        match endpoint {
            WireEndpoint::Tcp { host, port } => bind_tcp(host, *port)
                .map(Self::Tcp)
                .map_err(|e| Error::bind(endpoint, e)),
            #[cfg(unix)]
            WireEndpoint::Unix { path } => bind_unix(path).map_err(|e| Error::bind(endpoint, e)),
        }
    }

    /// Human-readable local address
    pub fn local_address(&self) -> String {
        match self {
            Self::Tcp(listener) => match listener.local_addr() {
                Ok(addr) => addr.to_string(),
                Err(_) => "<unknown>".to_string(),
            },
            #[cfg(unix)]
            Self::Unix { path, .. } => path.display().to_string(),
        }
    }

    /// Wait for a single client, returning the connection and a peer description
    pub async fn accept(&self) -> io::Result<(WireConnection, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                let connection: WireConnection = Box::new(stream);
                Ok((connection, peer.to_string()))
            }
            #[cfg(unix)]
            Self::Unix { listener, path } => {
                let stream = listener.accept().await?;
                let connection: WireConnection = Box::new(stream);
                Ok((connection, path.display().to_string()))
            }
        }
    }

    /// Connect to our own address and write junk, forcing a pending accept to return
    ///
    /// The resulting connection is meant to be recognised and dropped by the
    /// acceptor, never dispatched.
    pub async fn poke(&self) -> io::Result<()> {
        match self {
            Self::Tcp(listener) => {
                let mut addr = listener.local_addr()?;
                // A wildcard bind cannot be connected to everywhere; loopback can
                if addr.ip().is_unspecified() {
                    addr.set_ip(match addr.ip() {
                        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    });
                }
                let mut stream = TcpStream::connect(addr).await?;
                stream.write_all(POISON_PILL).await?;
                stream.flush().await
            }
            #[cfg(unix)]
            Self::Unix { path, .. } => {
                let name = path.to_string_lossy().into_owned();
                let name = name.to_fs_name::<GenericFilePath>()?;
                let mut stream = Stream::connect(name).await?;
                stream.write_all(POISON_PILL).await?;
                stream.flush().await
            }
        }
    }
}

fn bind_tcp(host: &str, port: u16) -> io::Result<TcpListener> {
    // Resolve rather than parse, so "localhost" works
    let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("'{}' did not resolve to any address", host),
        )
    })?;

    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> io::Result<WireListener> {
    remove_stale_socket(path)?;

    let name = path.to_string_lossy().into_owned();
    let name = name.to_fs_name::<GenericFilePath>()?;
    let listener = ListenerOptions::new().name(name).create_tokio()?;

    Ok(WireListener::Unix {
        listener,
        path: path.to_path_buf(),
    })
}

/// Remove a socket file left behind by a previous run
///
/// Only sockets nobody is listening on are removed; regular files and live
/// sockets are left in place so the bind reports them.
#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() => {
            if std::os::unix::net::UnixStream::connect(path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    "another server is listening on this socket",
                ));
            }
            tracing::debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The error from a bind that must fail
    fn bind_error(endpoint: &WireEndpoint) -> Error {
        match WireListener::bind(endpoint) {
            Ok(listener) => panic!(
                "bind to {} succeeded on {}",
                endpoint,
                listener.local_address()
            ),
            Err(e) => e,
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_bind_tcp_resolves_localhost() {
        let port = free_port();
        let listener = WireListener::bind(&WireEndpoint::tcp("localhost", port)).unwrap();
        assert!(listener.local_address().ends_with(&format!(":{}", port)));
    }

    #[tokio::test]
    async fn test_bind_tcp_port_in_use() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind_error(&WireEndpoint::tcp("127.0.0.1", port));
        assert!(matches!(err, Error::Bind { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_bind_tcp_bad_host() {
        let err = bind_error(&WireEndpoint::tcp("no such host .invalid", 3902));
        assert!(matches!(err, Error::Bind { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_poke_unblocks_accept_on_wildcard_bind() {
        let port = free_port();
        let listener = WireListener::bind(&WireEndpoint::tcp("0.0.0.0", port)).unwrap();

        let (accepted, poked) = tokio::join!(listener.accept(), listener.poke());
        poked.unwrap();
        accepted.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.sock");
        // Bound then dropped without unlinking: a stale socket file
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        let listener = WireListener::bind(&WireEndpoint::unix(&path)).unwrap();
        assert_eq!(listener.local_address(), path.display().to_string());
        std::os::unix::net::UnixStream::connect(&path).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.sock");
        let _live = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let err = bind_error(&WireEndpoint::unix(&path));
        assert!(matches!(err, Error::Bind { .. }), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_unix_leaves_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wire.sock");
        std::fs::write(&path, "precious").unwrap();

        bind_error(&WireEndpoint::unix(&path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "precious");
    }
}
