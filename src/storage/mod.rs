//! Storage layer: the keyspace and its locking discipline.
//!
//! One [`Store`] is shared by all connection tasks and by log replay. It
//! guards the entire keyspace with a single shared/exclusive lock; commands
//! acquire it in shared mode for reads and exclusive mode for writes through
//! the scoped `with_read`/`with_write` helpers. Expiration is lazy — see the
//! notes in [`store`].

pub mod store;

pub use store::{Keyspace, Object, Store};
