//! # Compressed Replies
//!
//! Large replies may arrive as `["zip", <base64(gzip(blocks))>]`. The inflated
//! body is a run of `<len>\n<payload>\n` blocks with no terminating empty line.

use std::io::Read;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use flate2::read::GzDecoder;

use crate::error::{ProtoError, ProtoResult};
use crate::frame::{parse_len, Frame, STATUS_ZIP};

/// Expands a `zip` reply into the frame it stands for.
///
/// Frames with any other status are returned unchanged.
pub fn decompress(frame: Frame) -> ProtoResult<Frame> {
    if frame.status() != Some(STATUS_ZIP) {
        return Ok(frame);
    }

    let encoded = frame.fields().get(1).ok_or(ProtoError::MissingField(1))?;
    let compressed = STANDARD
        .decode(encoded)
        .map_err(|err| ProtoError::Compressed(format!("base64: {err}")))?;

    let mut inflated = Vec::with_capacity(compressed.len() * 4);
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut inflated)
        .map_err(|err| ProtoError::Compressed(format!("gzip: {err}")))?;

    parse_blocks(&inflated).map(Frame::new)
}

/// Splits an unterminated run of blocks into fields.
fn parse_blocks(mut data: &[u8]) -> ProtoResult<Vec<Bytes>> {
    let mut fields = Vec::new();
    while let Some(idx) = data.iter().position(|&b| b == b'\n') {
        let line = &data[..idx];
        data = &data[idx + 1..];
        if line.is_empty() || line == b"\r" {
            continue;
        }

        let size = parse_len(line).map_err(|_| {
            ProtoError::Compressed(format!(
                "bad block header {:?}",
                String::from_utf8_lossy(line)
            ))
        })?;
        if data.len() < size {
            return Err(ProtoError::Compressed(format!(
                "block of {size} bytes truncated to {}",
                data.len()
            )));
        }
        fields.push(Bytes::copy_from_slice(&data[..size]));
        // The trailing newline may be missing on the final block.
        data = &data[(size + 1).min(data.len())..];
    }
    Ok(fields)
}
