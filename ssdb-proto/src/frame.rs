//! # Frame Encoding and Parsing
//!
//! Purpose: Encode requests and parse replies in the length-prefixed text
//! framing without touching any socket.
//!
//! ## Design Principles
//! 1. **Restartable Parsing**: `decode` never consumes input on its own; it
//!    reports how many bytes a complete frame used and the caller advances.
//! 2. **Buffer Reuse**: Encoding appends into a caller-owned buffer.
//! 3. **Binary-Safe**: Field payloads are raw bytes; only length headers are
//!    interpreted.
//! 4. **Fail Fast**: A malformed length header is an error immediately.
//!
//! ## Layout
//!
//! ```text
//! <len>\n<payload>\n <len>\n<payload>\n ... \n
//! |---- block ----| |---- block ----|     ^ empty line ends the frame
//! ```

use std::borrow::Cow;

use bytes::Bytes;

use crate::error::{ProtoError, ProtoResult};
use crate::value::Value;

/// Reply status for a successful command.
pub const STATUS_OK: &[u8] = b"ok";
/// Reply status for a missing key.
pub const STATUS_NOT_FOUND: &[u8] = b"not_found";
/// Reply status for a server-side failure.
pub const STATUS_ERROR: &[u8] = b"error";
/// Reply status for a request the server rejected.
pub const STATUS_CLIENT_ERROR: &[u8] = b"client_error";
/// Reply status marking a compressed payload.
pub const STATUS_ZIP: &[u8] = b"zip";

/// One complete request or reply: an ordered list of fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    fields: Vec<Bytes>,
}

impl Frame {
    /// Builds a frame from already-decoded fields.
    pub fn new(fields: Vec<Bytes>) -> Self {
        Frame { fields }
    }

    /// Borrows all fields.
    pub fn fields(&self) -> &[Bytes] {
        &self.fields
    }

    /// Consumes the frame, returning its fields.
    pub fn into_fields(self) -> Vec<Bytes> {
        self.fields
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First field of a reply (`ok`, `not_found`, ...).
    pub fn status(&self) -> Option<&[u8]> {
        self.fields.first().map(|field| field.as_ref())
    }

    /// Field at `index` as text (lossy for non UTF-8 payloads).
    pub fn text(&self, index: usize) -> Option<Cow<'_, str>> {
        self.fields
            .get(index)
            .map(|field| String::from_utf8_lossy(field))
    }

    /// All fields as owned strings.
    pub fn to_strings(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect()
    }
}

impl<S: AsRef<[u8]>> FromIterator<S> for Frame {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Frame::new(
            iter.into_iter()
                .map(|field| Bytes::copy_from_slice(field.as_ref()))
                .collect(),
        )
    }
}

/// Encodes `values` as one frame, appending to `out`.
///
/// On error `out` is restored to its original length, so a rejected argument
/// never leaves half a frame behind.
pub fn encode(values: &[Value], out: &mut Vec<u8>) -> ProtoResult<()> {
    let start = out.len();
    if let Err(err) = encode_values(values, out) {
        out.truncate(start);
        return Err(err);
    }
    out.push(b'\n');
    Ok(())
}

/// Encodes `[command] + args` as one request frame.
pub fn encode_request(command: &str, args: &[Value], out: &mut Vec<u8>) -> ProtoResult<()> {
    let start = out.len();
    push_block(out, command.as_bytes());
    if let Err(err) = encode_values(args, out) {
        out.truncate(start);
        return Err(err);
    }
    out.push(b'\n');
    Ok(())
}

fn encode_values(values: &[Value], out: &mut Vec<u8>) -> ProtoResult<()> {
    for value in values {
        match value.scalar_payload()? {
            Some(payload) => push_block(out, &payload),
            None => {
                if let Value::TextList(items) = value {
                    for item in items {
                        push_block(out, item.as_bytes());
                    }
                }
            }
        }
    }
    Ok(())
}

/// Appends one `<len>\n<payload>\n` block.
pub(crate) fn push_block(out: &mut Vec<u8>, payload: &[u8]) {
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b'\n');
    out.extend_from_slice(payload);
    out.push(b'\n');
}

/// Attempts to decode one frame from the front of `buf`.
///
/// Returns:
/// - `Ok(Some((frame, consumed)))` when a full frame is present; the caller
///   advances its buffer by `consumed`, leaving any following bytes intact.
/// - `Ok(None)` when more bytes are needed. Nothing is consumed and the next
///   call starts over from the same prefix.
/// - `Err` when a length header is not a non-negative decimal integer.
///
/// Empty lines (or a lone `\r`) before the first field are skipped.
pub fn decode(buf: &[u8]) -> ProtoResult<Option<(Frame, usize)>> {
    let mut fields = Vec::new();
    let mut offset = 0;

    loop {
        let idx = match buf[offset..].iter().position(|&b| b == b'\n') {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let line = &buf[offset..offset + idx];
        offset += idx + 1;

        if line.is_empty() || line == b"\r" {
            if fields.is_empty() {
                continue;
            }
            return Ok(Some((Frame::new(fields), offset)));
        }

        let size = parse_len(line)?;
        // Payload plus its trailing newline must be buffered.
        let block = size
            .checked_add(1)
            .ok_or_else(|| ProtoError::InvalidLength(String::from_utf8_lossy(line).into_owned()))?;
        if buf.len() - offset < block {
            return Ok(None);
        }

        fields.push(Bytes::copy_from_slice(&buf[offset..offset + size]));
        offset += block;
    }
}

/// Parses a block header.
pub(crate) fn parse_len(line: &[u8]) -> ProtoResult<usize> {
    let invalid = || ProtoError::InvalidLength(String::from_utf8_lossy(line).into_owned());
    if line.is_empty() || !line.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }
    std::str::from_utf8(line)
        .map_err(|_| invalid())?
        .parse::<usize>()
        .map_err(|_| invalid())
}
