//! # flintkv — an in-memory key-value server with an append-only log
//!
//! flintkv speaks a Redis-compatible wire protocol, keeps strings, lists,
//! and hashes in one shared keyspace, and survives restarts by replaying a
//! persisted log of every mutating request.
//!
//! ## Architecture
//!
//! ```text
//!  ┌────────────┐   ┌──────────────┐   ┌───────────────┐   ┌───────────┐
//!  │ TCP accept │──>│  Connection  │──>│ Command table │──>│   Store   │
//!  │   loop     │   │   handler    │   │  (dispatch)   │   │ (RwLock)  │
//!  └────────────┘   └──────┬───────┘   └───────▲───────┘   └───────────┘
//!                          │ mutating          │ replay
//!                          ▼                   │
//!                   ┌──────────────┐   ┌───────┴───────┐
//!                   │   AofLog     │<──│   startup     │
//!                   │ (+sync task) │   │    replay     │
//!                   └──────────────┘   └───────────────┘
//! ```
//!
//! The protocol codec sits underneath all of it: the same [`Value`]
//! encoding frames client requests, server replies, and log records.
//!
//! ## Supported commands
//!
//! - Strings: `SET`, `GET`, `SETNX`, `SETEX`, `GETEX`, `STRLEN`,
//!   `GETRANGE`, `MSET`, `MGET`, `INCR`, `DECR`
//! - Hashes: `HSET`, `HGET`, `HDEL`, `HEXISTS`, `HMGET`, `HGETALL`,
//!   `HLEN`, `HKEYS`, `HVALS`
//! - Lists: `RPUSH`, `LPUSH`, `RPUSHX`, `LPUSHX`, `RPOP`, `LPOP`,
//!   `LRANGE`, `LLEN`
//! - Generic: `DEL`, `EXPIRE`, `TTL`, `PING`
//!
//! Keys may carry an expiration deadline (`SETEX`, `GETEX`, `EXPIRE`),
//! checked lazily on access — there is no background sweep.
//!
//! ## Durability
//!
//! Mutating commands are appended to an append-only file as their exact
//! wire bytes and fsynced once per second by a background task. At startup
//! the log is replayed through the same command table before the listener
//! accepts connections, so a restarted server picks up where it left off
//! (minus at most one sync interval on a crash).
//!
//! ## Module overview
//!
//! - [`protocol`]: the wire [`Value`] and its codec
//! - [`storage`]: the locked keyspace
//! - [`commands`]: command table and handlers
//! - [`persistence`]: append-only log, sync task, replay
//! - [`connection`]: per-client read/execute/reply loop

pub mod commands;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod storage;

// Re-export the types most callers touch
pub use commands::{dispatch, lookup, CommandSpec};
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{start_sync_task, AofError, AofLog, SyncTask};
pub use protocol::{DecodeError, Decoder, Value};
pub use storage::{Object, Store};

/// Default port, same as Redis.
pub const DEFAULT_PORT: u16 = 6379;

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default persistence-log path.
pub const DEFAULT_LOG_PATH: &str = "database.aof";

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
