//! Wire protocol: the [`Value`] union and its codec.
//!
//! Requests, replies, and persistence-log records all share the same
//! encoding, so this module is the single place framing is defined.
//! [`value`] owns the type and the encode path, [`codec`] the incremental
//! decode path.

pub mod codec;
pub mod value;

pub use codec::{decode_one, DecodeError, DecodeResult, Decoder};
pub use value::Value;
