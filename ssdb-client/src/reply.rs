//! # Reply Classification
//!
//! Purpose: Turn a raw reply frame into a typed result based on the command
//! that produced it.
//!
//! The server answers every command with a status plus text fields; which
//! shape those fields take depends on the command, so classification needs
//! both.

use std::collections::HashMap;

use ssdb_proto::{Frame, STATUS_NOT_FOUND, STATUS_OK};

use crate::error::{ClientError, ClientResult};

/// Commands that always answer a plain `ok` pair.
const ACK_COMMANDS: &[&str] = &["set", "del"];

/// Commands whose single field is `1` or `0`.
const FLAG_COMMANDS: &[&str] = &["expire", "setnx", "auth", "exists", "hexists"];

/// Commands whose single field is a decimal integer.
const INT_COMMANDS: &[&str] = &["hsize", "incr", "hincr", "ttl"];

/// Commands whose fields alternate key, value.
const MAP_COMMANDS: &[&str] = &["hgetall", "hscan", "hrscan", "multi_hget", "scan", "rscan"];

/// Typed result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Key or field did not exist.
    Nil,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
    Map(HashMap<String, String>),
}

impl Reply {
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reply::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(value) => Some(*value),
            Reply::Text(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            _ => None,
        }
    }

    /// List payload; a single-field reply counts as a one-element list.
    pub fn into_list(self) -> Option<Vec<String>> {
        match self {
            Reply::List(items) => Some(items),
            Reply::Text(text) => Some(vec![text]),
            Reply::Nil => Some(Vec::new()),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<HashMap<String, String>> {
        match self {
            Reply::Map(map) => Some(map),
            Reply::Nil => Some(HashMap::new()),
            _ => None,
        }
    }
}

/// Classifies `frame` as the reply to `command`.
///
/// **Logic**:
/// 1. `ok` with exactly one field: ack, flag, integer or text by command.
/// 2. A lone `not_found`: `Nil`.
/// 3. `ok` with any other field count: map for scan-like commands, list
///    otherwise.
/// 4. Anything else: `BadResponse`.
pub fn classify(command: &str, frame: &Frame) -> ClientResult<Reply> {
    let status = frame.status().unwrap_or_default();

    if frame.len() == 2 && status == STATUS_OK {
        let field = frame.text(1).unwrap_or_default();
        if ACK_COMMANDS.contains(&command) {
            return Ok(Reply::Bool(true));
        }
        if FLAG_COMMANDS.contains(&command) {
            return Ok(Reply::Bool(field == "1"));
        }
        if INT_COMMANDS.contains(&command) {
            return field
                .parse::<i64>()
                .map(Reply::Int)
                .map_err(|_| bad_response(frame));
        }
        return Ok(Reply::Text(field.into_owned()));
    }

    if frame.len() == 1 && status == STATUS_NOT_FOUND {
        return Ok(Reply::Nil);
    }

    if status == STATUS_OK {
        let mut fields = frame.to_strings();
        fields.remove(0);
        if MAP_COMMANDS.contains(&command) {
            return pairs_to_map(fields).ok_or_else(|| bad_response(frame));
        }
        return Ok(Reply::List(fields));
    }

    Err(bad_response(frame))
}

fn pairs_to_map(fields: Vec<String>) -> Option<Reply> {
    if fields.len() % 2 != 0 {
        return None;
    }
    let mut map = HashMap::with_capacity(fields.len() / 2);
    let mut iter = fields.into_iter();
    while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
        map.insert(key, value);
    }
    Some(Reply::Map(map))
}

fn bad_response(frame: &Frame) -> ClientError {
    let mut fields = frame.to_strings();
    let status = if fields.is_empty() {
        String::new()
    } else {
        fields.remove(0)
    };
    ClientError::BadResponse { status, fields }
}

/// True for error replies that report a broken server-side connection, e.g.
/// `["error", "connection reset"]`.
pub(crate) fn reports_lost_connection(err: &ClientError) -> bool {
    match err {
        ClientError::BadResponse { fields, .. } => {
            fields.len() == 1 && fields[0].to_ascii_lowercase().contains("connection")
        }
        _ => false,
    }
}
