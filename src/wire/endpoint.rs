//! Wire endpoint: where the step server listens

use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;

/// Address described by a `.wire` file
///
/// Exactly one kind is ever populated; a file naming both is rejected when
/// it is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEndpoint {
    /// TCP host (name or literal address) and port
    Tcp { host: String, port: u16 },
    /// Unix domain socket path
    #[cfg(unix)]
    Unix { path: PathBuf },
}

impl WireEndpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    #[cfg(unix)]
    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Self::Unix { path: path.into() }
    }
}

impl fmt::Display for WireEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Bare IPv6 literals need brackets to stay unambiguous
            Self::Tcp { host, port } if host.contains(':') => write!(f, "[{}]:{}", host, port),
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
            #[cfg(unix)]
            Self::Unix { path } => write!(f, "socket {}", path.display()),
        }
    }
}
