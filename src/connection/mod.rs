//! Client connection management.
//!
//! One async task per accepted client, each owning its read buffer and
//! decoder. The handler is thin on purpose: framing comes from
//! [`protocol`](crate::protocol), semantics from
//! [`commands`](crate::commands), durability from
//! [`persistence`](crate::persistence) — this module just moves requests
//! and replies between the socket and those three.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
