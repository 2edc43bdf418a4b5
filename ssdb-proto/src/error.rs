//! # Codec Errors
//!
//! Every failure the codec can report. None of them carry I/O state; the
//! connection layer decides whether a codec error poisons the socket.

use thiserror::Error;

/// Result type for codec operations.
pub type ProtoResult<T> = Result<T, ProtoError>;

/// Errors raised while encoding requests or decoding replies.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// A block header was not a non-negative decimal integer.
    #[error("invalid length prefix: {0:?}")]
    InvalidLength(String),

    /// An argument cannot be represented on the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A `zip` reply carried bad base64, bad gzip, or truncated blocks.
    #[error("malformed compressed payload: {0}")]
    Compressed(String),

    /// A reply was missing a field the codec needs (e.g. the zip payload).
    #[error("missing field at index {0}")]
    MissingField(usize),
}
