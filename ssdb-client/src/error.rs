//! # Client Errors
//!
//! Purpose: One error type for every client operation, with enough structure
//! to tell a recoverable network hiccup from a broken request.

use std::io;

use thiserror::Error;

use ssdb_proto::ProtoError;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint could not be reached.
    #[error("dial failed: {0}")]
    Dial(#[source] io::Error),

    /// The stream closed, reset, timed out or lost its route. The connection
    /// has been torn down and recovery is running in the background.
    #[error("network error: {0}")]
    Transient(#[source] io::Error),

    /// Any other I/O failure while reading or writing.
    #[error("io error: {0}")]
    Io(#[source] io::Error),

    /// Malformed frame or compressed payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    /// Bad caller input (e.g. zero workers for a fan-out).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Well-formed reply whose status or shape the command does not expect.
    #[error("bad response: status={status:?} fields={fields:?}")]
    BadResponse { status: String, fields: Vec<String> },

    /// A command was issued while the connection is not connected.
    #[error("lost connection")]
    LostConnection,

    /// Pool is at capacity.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Address could not be parsed into an endpoint.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A fan-out worker task died before reporting.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl ClientError {
    /// Wraps an I/O error from a round trip, sorting it into `Transient` or
    /// `Io`.
    ///
    /// Matching is done on the error text as well as the kind so errors that
    /// only describe themselves in the message (proxies, wrapped errors) are
    /// still caught.
    pub fn from_io(err: io::Error) -> Self {
        if is_transient_io(&err) {
            ClientError::Transient(err)
        } else {
            ClientError::Io(err)
        }
    }

    /// True when the connection should be dropped and re-dialed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

fn is_transient_io(err: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(
        err.kind(),
        UnexpectedEof
            | BrokenPipe
            | ConnectionReset
            | ConnectionAborted
            | ConnectionRefused
            | NotConnected
            | TimedOut
    ) {
        return true;
    }

    let message = err.to_string().to_ascii_lowercase();
    message.contains("connection") || message.contains("timed out") || message.contains("route")
}
