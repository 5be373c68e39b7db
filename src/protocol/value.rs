//! Wire value representation.
//!
//! A [`Value`] is the universal payload of the protocol: requests arrive as
//! arrays of bulk strings, replies go out as any of the five kinds, and the
//! persistence log stores the same encoding on disk. Each kind carries a
//! one-byte wire tag:
//!
//! | kind | tag | example |
//! |---|---|---|
//! | simple string | `+` | `+OK\r\n` |
//! | error | `-` | `-ERR unknown command\r\n` |
//! | integer | `:` | `:1000\r\n` |
//! | bulk string | `$` | `$5\r\nhello\r\n` |
//! | array | `*` | `*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n` |
//! | null | `$-1` | `$-1\r\n` |
//!
//! Bulk strings are length-prefixed and binary-safe; simple strings and
//! errors must not contain CRLF. Values are built through the constructors
//! and never mutated in place.

use bytes::Bytes;
use std::fmt;

/// Line terminator used throughout the wire format.
pub const CRLF: &[u8] = b"\r\n";

/// Wire type tags.
pub mod tag {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A single protocol value, used for requests, replies, and log records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Non-binary-safe text, e.g. `+OK\r\n`.
    SimpleString(String),

    /// An error condition reported to the client, e.g. `-ERR ...\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Binary-safe, length-prefixed string. May contain raw CRLF bytes.
    BulkString(Bytes),

    /// Ordered sequence of values; elements may be of any kind.
    Array(Vec<Value>),

    /// The null sentinel, encoded as `$-1\r\n`.
    Null,
}

impl Value {
    pub fn simple(s: impl Into<String>) -> Self {
        Value::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Value::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Value::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::BulkString(data.into())
    }

    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(values)
    }

    /// The canonical `+OK` reply.
    pub fn ok() -> Self {
        Value::SimpleString("OK".to_string())
    }

    /// The canonical `+PONG` reply.
    pub fn pong() -> Self {
        Value::SimpleString("PONG".to_string())
    }

    /// Encodes this value into its exact wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes this value into an existing buffer, avoiding a fresh
    /// allocation per reply.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::SimpleString(s) => {
                buf.push(tag::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Value::Error(s) => {
                buf.push(tag::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Value::Integer(n) => {
                buf.push(tag::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Value::BulkString(data) => {
                buf.push(tag::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            Value::Array(values) => {
                buf.push(tag::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.encode_into(buf);
                }
            }
            Value::Null => {
                buf.push(tag::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// The inner text of a simple or bulk string, when valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::SimpleString(s) => Some(s),
            Value::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// The raw bytes of a bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::BulkString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::SimpleString(s) => write!(f, "\"{}\"", s),
            Value::Error(s) => write!(f, "(error) {}", s),
            Value::Integer(n) => write!(f, "(integer) {}", n),
            Value::BulkString(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary data, {} bytes)", data.len())
                }
            }
            Value::Null => write!(f, "(nil)"),
            Value::Array(values) => {
                if values.is_empty() {
                    write!(f, "(empty array)")
                } else {
                    writeln!(f)?;
                    for (i, v) in values.iter().enumerate() {
                        writeln!(f, "{}) {}", i + 1, v)?;
                    }
                    Ok(())
                }
            }
        }
    }
}
