//! Incremental wire-format decoder.
//!
//! The decoder reads from a byte buffer and returns one of:
//!
//! - `Ok(Some((value, consumed)))` — a complete value, `consumed` bytes used
//! - `Ok(None)` — the buffer holds a prefix of a value; read more and retry
//! - `Err(DecodeError)` — the bytes violate the protocol
//!
//! The caller appends incoming network data to its buffer, calls
//! [`Decoder::decode`], and on success advances the buffer by `consumed`.
//! The same decoder drives the persistence-log replay, where the "buffer"
//! is the whole log file and the loop runs until the bytes are exhausted.
//!
//! An unrecognized leading byte is a protocol violation, not an alternate
//! syntax: connections that produce one are dropped.

use crate::protocol::value::{tag, Value, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors produced while decoding wire data.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// Leading byte is not one of the five type tags.
    #[error("unknown type tag: {0:#04x}")]
    UnknownPrefix(u8),

    /// A length or integer field did not parse as a decimal integer.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A simple string, error, or length line was not valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length was negative (other than the -1 null sentinel).
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array count was negative (other than the -1 null sentinel).
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Framing violation: missing CRLF, nesting too deep, and the like.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A declared bulk length exceeds the hard cap.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// Largest accepted bulk string (512 MB, same as Redis).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth before the decoder refuses the input.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Incremental decoder for the wire format.
///
/// Stateless between complete values; the only tracked state is the
/// recursion depth within a single `decode` call.
#[derive(Debug, Default)]
pub struct Decoder {
    depth: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one value from the front of `buf`.
    pub fn decode(&mut self, buf: &[u8]) -> DecodeResult<Option<(Value, usize)>> {
        self.depth = 0;
        self.decode_value(buf)
    }

    fn decode_value(&mut self, buf: &[u8]) -> DecodeResult<Option<(Value, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }

        if self.depth > MAX_NESTING_DEPTH {
            return Err(DecodeError::Protocol(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        match buf[0] {
            tag::SIMPLE_STRING => self.decode_line(buf, Value::SimpleString),
            tag::ERROR => self.decode_line(buf, Value::Error),
            tag::INTEGER => self.decode_integer(buf),
            tag::BULK_STRING => self.decode_bulk(buf),
            tag::ARRAY => self.decode_array(buf),
            other => Err(DecodeError::UnknownPrefix(other)),
        }
    }

    /// Decodes `+<text>\r\n` / `-<text>\r\n` into the given constructor.
    fn decode_line(
        &mut self,
        buf: &[u8],
        make: fn(String) -> Value,
    ) -> DecodeResult<Option<(Value, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let text = std::str::from_utf8(&buf[1..1 + pos])
                    .map_err(|e| DecodeError::InvalidUtf8(e.to_string()))?;
                // tag byte + text + CRLF
                Ok(Some((make(text.to_string()), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    fn decode_integer(&mut self, buf: &[u8]) -> DecodeResult<Option<(Value, usize)>> {
        match find_crlf(&buf[1..]) {
            Some(pos) => {
                let n = parse_decimal(&buf[1..1 + pos])?;
                Ok(Some((Value::Integer(n), 1 + pos + 2)))
            }
            None => Ok(None),
        }
    }

    /// Decodes `$<len>\r\n<raw bytes>\r\n`. The payload is copied out of the
    /// read buffer untouched, so it may contain CRLF or any other byte.
    fn decode_bulk(&mut self, buf: &[u8]) -> DecodeResult<Option<(Value, usize)>> {
        let len_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let len = parse_decimal(&buf[1..1 + len_end])?;

        if len == -1 {
            // the $-1 null sentinel
            return Ok(Some((Value::Null, 1 + len_end + 2)));
        }
        if len < 0 {
            return Err(DecodeError::InvalidBulkLength(len));
        }

        let len = len as usize;
        if len > MAX_BULK_SIZE {
            return Err(DecodeError::MessageTooLarge {
                size: len,
                max: MAX_BULK_SIZE,
            });
        }

        let data_start = 1 + len_end + 2;
        let total = data_start + len + 2;
        if buf.len() < total {
            return Ok(None);
        }

        if &buf[data_start + len..data_start + len + 2] != CRLF {
            return Err(DecodeError::Protocol(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&buf[data_start..data_start + len]);
        Ok(Some((Value::BulkString(data), total)))
    }

    /// Decodes `*<count>\r\n` followed by `count` nested values.
    fn decode_array(&mut self, buf: &[u8]) -> DecodeResult<Option<(Value, usize)>> {
        let count_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let count = parse_decimal(&buf[1..1 + count_end])?;

        if count == -1 {
            return Ok(Some((Value::Null, 1 + count_end + 2)));
        }
        if count < 0 {
            return Err(DecodeError::InvalidArrayLength(count));
        }

        let count = count as usize;
        let mut elements = Vec::with_capacity(count);
        let mut consumed = 1 + count_end + 2;

        self.depth += 1;
        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }
            match self.decode_value(&buf[consumed..])? {
                Some((value, used)) => {
                    elements.push(value);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((Value::Array(elements), consumed)))
    }
}

fn parse_decimal(raw: &[u8]) -> DecodeResult<i64> {
    let s = std::str::from_utf8(raw).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|e: ParseIntError| DecodeError::InvalidInteger(e.to_string()))
}

/// Position of the `\r` of the first CRLF pair, if any.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// One-shot decode of a single value from a byte slice.
pub fn decode_one(buf: &[u8]) -> DecodeResult<Option<(Value, usize)>> {
    Decoder::new().decode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_string() {
        let (value, consumed) = decode_one(b"+OK\r\n").unwrap().unwrap();
        assert_eq!(value, Value::SimpleString("OK".to_string()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn simple_string_incomplete() {
        assert!(decode_one(b"+OK").unwrap().is_none());
    }

    #[test]
    fn error_value() {
        let (value, consumed) = decode_one(b"-ERR unknown command\r\n").unwrap().unwrap();
        assert_eq!(value, Value::Error("ERR unknown command".to_string()));
        assert_eq!(consumed, 22);
    }

    #[test]
    fn integers() {
        let (value, consumed) = decode_one(b":1000\r\n").unwrap().unwrap();
        assert_eq!(value, Value::Integer(1000));
        assert_eq!(consumed, 7);

        let (value, _) = decode_one(b":-42\r\n").unwrap().unwrap();
        assert_eq!(value, Value::Integer(-42));
    }

    #[test]
    fn bulk_string() {
        let (value, consumed) = decode_one(b"$5\r\nhello\r\n").unwrap().unwrap();
        assert_eq!(value, Value::bulk("hello"));
        assert_eq!(consumed, 11);
    }

    #[test]
    fn null_bulk() {
        let (value, consumed) = decode_one(b"$-1\r\n").unwrap().unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(consumed, 5);
    }

    #[test]
    fn empty_bulk() {
        let (value, consumed) = decode_one(b"$0\r\n\r\n").unwrap().unwrap();
        assert_eq!(value, Value::bulk(""));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn bulk_incomplete() {
        assert!(decode_one(b"$5\r\nhel").unwrap().is_none());
    }

    #[test]
    fn bulk_with_crlf_payload() {
        let (value, _) = decode_one(b"$5\r\nhe\r\no\r\n").unwrap().unwrap();
        assert_eq!(value, Value::BulkString(Bytes::from_static(b"he\r\no")));
    }

    #[test]
    fn binary_safe_bulk() {
        let (value, _) = decode_one(b"$5\r\nhel\x00o\r\n").unwrap().unwrap();
        assert_eq!(value, Value::BulkString(Bytes::from_static(b"hel\x00o")));
    }

    #[test]
    fn request_array() {
        let (value, consumed) = decode_one(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            value,
            Value::array(vec![Value::bulk("GET"), Value::bulk("name")])
        );
        assert_eq!(consumed, 23);
    }

    #[test]
    fn empty_array_is_not_null() {
        let (value, _) = decode_one(b"*0\r\n").unwrap().unwrap();
        assert_eq!(value, Value::Array(vec![]));
    }

    #[test]
    fn null_array() {
        let (value, _) = decode_one(b"*-1\r\n").unwrap().unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn nested_array() {
        let (value, _) = decode_one(b"*2\r\n:1\r\n*2\r\n:2\r\n:3\r\n").unwrap().unwrap();
        assert_eq!(
            value,
            Value::array(vec![
                Value::integer(1),
                Value::array(vec![Value::integer(2), Value::integer(3)]),
            ])
        );
    }

    #[test]
    fn mixed_array() {
        let (value, _) = decode_one(b"*3\r\n+OK\r\n:100\r\n$5\r\nhello\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            value,
            Value::array(vec![
                Value::simple("OK"),
                Value::integer(100),
                Value::bulk("hello"),
            ])
        );
    }

    #[test]
    fn array_incomplete() {
        assert!(decode_one(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
    }

    #[test]
    fn unknown_prefix_rejected() {
        let result = decode_one(b"@bogus\r\n");
        assert_eq!(result, Err(DecodeError::UnknownPrefix(b'@')));
    }

    #[test]
    fn invalid_length_field() {
        let result = decode_one(b"$abc\r\nxxx\r\n");
        assert!(matches!(result, Err(DecodeError::InvalidInteger(_))));
    }

    #[test]
    fn invalid_integer_value() {
        let result = decode_one(b":not_a_number\r\n");
        assert!(matches!(result, Err(DecodeError::InvalidInteger(_))));
    }

    #[test]
    fn negative_bulk_length_rejected() {
        let result = decode_one(b"$-2\r\n\r\n");
        assert_eq!(result, Err(DecodeError::InvalidBulkLength(-2)));
    }

    #[test]
    fn round_trip_all_kinds() {
        let values = vec![
            Value::simple("OK"),
            Value::error("ERR boom"),
            Value::integer(-7),
            Value::bulk(Bytes::from_static(b"with\r\nnewline")),
            Value::Null,
            Value::array(vec![
                Value::bulk("SET"),
                Value::array(vec![Value::integer(1), Value::Null]),
            ]),
        ];

        for original in values {
            let encoded = original.encode();
            let (decoded, consumed) = decode_one(&encoded).unwrap().unwrap();
            assert_eq!(decoded, original);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn decodes_back_to_back_values() {
        let buf = b"+OK\r\n:1\r\n";
        let (first, consumed) = decode_one(buf).unwrap().unwrap();
        assert_eq!(first, Value::simple("OK"));
        let (second, _) = decode_one(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(second, Value::integer(1));
    }
}
