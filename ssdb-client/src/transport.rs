//! # Byte-Stream Transport
//!
//! Purpose: Hide how a raw stream is established so the connection logic is
//! written once for TCP and local sockets alike.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Dialer` produces fresh streams; `Endpoint` is the
//!    built-in strategy, tests plug in in-memory ones.
//! 2. **Erased Streams**: Connections hold a `BoxedStream`, so the transport
//!    choice never leaks into their type.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::ClientError;

/// Any reliable, ordered byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased stream owned by a connection.
pub type BoxedStream = Box<dyn ByteStream>;

/// Establishes new byte streams to one fixed server.
#[async_trait]
pub trait Dialer: fmt::Debug + Send + Sync + 'static {
    async fn dial(&self) -> io::Result<BoxedStream>;
}

/// Server address: TCP host/port or a local socket path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix { path: path.into() }
    }
}

#[async_trait]
impl Dialer for Endpoint {
    async fn dial(&self) -> io::Result<BoxedStream> {
        match self {
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                // Requests are small; don't let Nagle hold them back.
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix { path } => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            Endpoint::Unix { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "local sockets are not available on this platform",
            )),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Parses `host:port`, `[ipv6]:port` or `unix:/path/to/socket`.
impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ClientError::InvalidAddress(s.to_string()));
            }
            return Ok(Endpoint::unix(path));
        }

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ClientError::InvalidAddress(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ClientError::InvalidAddress(s.to_string()))?;
        let host = match host.strip_prefix('[') {
            Some(inner) => inner
                .strip_suffix(']')
                .ok_or_else(|| ClientError::InvalidAddress(s.to_string()))?,
            None => host,
        };
        if host.is_empty() {
            return Err(ClientError::InvalidAddress(s.to_string()));
        }
        Ok(Endpoint::tcp(host, port))
    }
}
