//! Persistence: the append-only log and its sync task.
//!
//! Durability is write-ahead in spirit but log-behind in practice: a
//! mutating request is executed first and appended after it succeeds, then
//! made durable by the next periodic sync. Startup replays the whole log
//! through the command table before the listener accepts a single
//! connection, so clients only ever observe the recovered state.

pub mod aof;
pub mod sync;

pub use aof::{AofError, AofLog};
pub use sync::{start_sync_task, SyncTask, DEFAULT_SYNC_INTERVAL};
