//! # Request Values
//!
//! Purpose: Model every argument kind a command may carry as a closed enum so
//! the encoder has exactly one rule per variant.
//!
//! ## Design Principles
//! 1. **Closed Set**: Unknown argument kinds are rejected at conversion time,
//!    never at the socket.
//! 2. **Borrow-Friendly Conversions**: `From` impls cover the common Rust types
//!    so call sites read as `&["key".into(), 5.into()]`.
//! 3. **Binary-Safe**: `Bytes` values are written verbatim.
//!
//! ## Wire Rendering
//!
//! ```text
//! Text("ab")            -> 2\nab\n
//! Integer(-7)           -> 2\n-7\n
//! Float(1.5)            -> 8\n1.500000\n
//! Boolean(true)         -> 1\n1\n
//! Null                  -> 0\n\n
//! TextList(["a", "bc"]) -> 1\na\n2\nbc\n
//! ```

use std::borrow::Cow;

use bytes::Bytes;

use crate::error::{ProtoError, ProtoResult};

/// A single request argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes, written as-is.
    Bytes(Bytes),
    /// Signed integer, rendered in decimal.
    Integer(i64),
    /// Floating-point number, rendered with six decimals.
    Float(f64),
    /// Rendered as `1` or `0`.
    Boolean(bool),
    /// Rendered as an empty block.
    Null,
    /// Each element becomes its own block (no nesting marker).
    TextList(Vec<String>),
}

impl Value {
    /// Returns the wire payload for scalar variants.
    ///
    /// `TextList` has no single payload and yields `None`; the encoder
    /// flattens it instead.
    pub(crate) fn scalar_payload(&self) -> ProtoResult<Option<Cow<'_, [u8]>>> {
        let payload = match self {
            Value::Text(text) => Cow::Borrowed(text.as_bytes()),
            Value::Bytes(data) => Cow::Borrowed(data.as_ref()),
            Value::Integer(value) => Cow::Owned(value.to_string().into_bytes()),
            Value::Float(value) => {
                if !value.is_finite() {
                    return Err(ProtoError::InvalidArgument(format!(
                        "non-finite float {value}"
                    )));
                }
                Cow::Owned(format!("{value:.6}").into_bytes())
            }
            Value::Boolean(true) => Cow::Borrowed(&b"1"[..]),
            Value::Boolean(false) => Cow::Borrowed(&b"0"[..]),
            Value::Null => Cow::Borrowed(&b""[..]),
            Value::TextList(_) => return Ok(None),
        };
        Ok(Some(payload))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::Text(value.clone())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Integer(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Vec<String>> for Value {
    fn from(value: Vec<String>) -> Self {
        Value::TextList(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Dynamic arguments (e.g. from a config file or a scripting layer) funnel
/// through here; objects and nested arrays have no wire form.
impl TryFrom<serde_json::Value> for Value {
    type Error = ProtoError;

    fn try_from(value: serde_json::Value) -> ProtoResult<Self> {
        use serde_json::Value as Json;

        match value {
            Json::Null => Ok(Value::Null),
            Json::Bool(flag) => Ok(Value::Boolean(flag)),
            Json::String(text) => Ok(Value::Text(text)),
            Json::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Ok(Value::Integer(int))
                } else if let Some(float) = number.as_f64().filter(|_| number.is_f64()) {
                    Ok(Value::Float(float))
                } else {
                    Err(ProtoError::InvalidArgument(format!(
                        "number out of range: {number}"
                    )))
                }
            }
            Json::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Json::String(text) => Ok(text),
                    other => Err(ProtoError::InvalidArgument(format!(
                        "list elements must be strings, got {other}"
                    ))),
                })
                .collect::<ProtoResult<Vec<_>>>()
                .map(Value::TextList),
            Json::Object(_) => Err(ProtoError::InvalidArgument(
                "objects are not supported".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: &Value) -> Vec<u8> {
        value.scalar_payload().unwrap().unwrap().into_owned()
    }

    #[test]
    fn renders_scalars() {
        assert_eq!(payload(&Value::Integer(-42)), b"-42");
        assert_eq!(payload(&Value::Float(1.5)), b"1.500000");
        assert_eq!(payload(&Value::Boolean(true)), b"1");
        assert_eq!(payload(&Value::Boolean(false)), b"0");
        assert_eq!(payload(&Value::Null), b"");
    }

    #[test]
    fn rejects_non_finite_float() {
        let err = Value::Float(f64::NAN).scalar_payload().unwrap_err();
        assert!(matches!(err, ProtoError::InvalidArgument(_)));
    }

    #[test]
    fn option_none_is_null() {
        let value: Value = Option::<&str>::None.into();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn converts_json_values() {
        assert_eq!(Value::try_from(json!("a")).unwrap(), Value::Text("a".into()));
        assert_eq!(Value::try_from(json!(7)).unwrap(), Value::Integer(7));
        assert_eq!(Value::try_from(json!(null)).unwrap(), Value::Null);
        assert_eq!(
            Value::try_from(json!(["x", "y"])).unwrap(),
            Value::TextList(vec!["x".into(), "y".into()])
        );
    }

    #[test]
    fn rejects_json_integers_beyond_i64() {
        let err = Value::try_from(json!(u64::MAX)).unwrap_err();
        assert!(matches!(err, ProtoError::InvalidArgument(_)));
        assert_eq!(Value::try_from(json!(i64::MAX)).unwrap(), Value::Integer(i64::MAX));
        assert_eq!(Value::try_from(json!(2.5)).unwrap(), Value::Float(2.5));
    }

    #[test]
    fn rejects_json_objects_and_nested_lists() {
        assert!(Value::try_from(json!({"a": 1})).is_err());
        assert!(Value::try_from(json!([["nested"]])).is_err());
        assert!(Value::try_from(json!([1, 2])).is_err());
    }
}
