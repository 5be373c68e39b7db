//! The shared keyspace.
//!
//! All live data sits in one [`Keyspace`]: a map from key to a tagged
//! [`Object`] plus a side map of absolute expiration deadlines. Storing the
//! type tag in the object itself makes "a key holds exactly one type" a
//! structural fact rather than a convention spread across handlers.
//!
//! ## Locking
//!
//! [`Store`] wraps the keyspace in a single `RwLock` and exposes exactly two
//! ways in: [`Store::with_read`] (shared) and [`Store::with_write`]
//! (exclusive). Read-only commands take the shared form, every mutation the
//! exclusive form, with no per-handler discretion. Closures run to
//! completion while the guard is held and must never await.
//!
//! ## Expiration
//!
//! Deadlines are soft annotations checked lazily: nothing sweeps the map in
//! the background. A command that touches a key first asks whether its
//! deadline has passed; if so the key is purged from both maps before the
//! command proceeds. [`Store::expire_if_due`] does the shared-then-exclusive
//! escalation for read paths; mutating handlers call
//! [`Keyspace::purge_if_due`] inside their own exclusive section.

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::Instant;

/// A stored value and its type, as one tagged unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    /// Binary-safe string value.
    String(Bytes),
    /// Ordered list; front is the head.
    List(VecDeque<Bytes>),
    /// Field-to-value mapping.
    Hash(HashMap<Bytes, Bytes>),
}

/// The unlocked keyspace: entries plus expiration deadlines.
///
/// Only reachable through [`Store::with_read`] / [`Store::with_write`], so
/// every method here can assume the appropriate lock is already held.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<Bytes, Object>,
    expirations: HashMap<Bytes, Instant>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &[u8]) -> Option<&Object> {
        self.entries.get(key)
    }

    pub fn object_mut(&mut self, key: &[u8]) -> Option<&mut Object> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts or replaces the object at `key`. Expiration state is left
    /// untouched: a plain SET over a key with a deadline keeps the deadline.
    pub fn insert(&mut self, key: Bytes, object: Object) {
        self.entries.insert(key, object);
    }

    /// Removes the key and its deadline. Returns whether an entry existed;
    /// a stale deadline without an entry is removed but not counted.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        let existed = self.entries.remove(key).is_some();
        self.expirations.remove(key);
        existed
    }

    /// The string value at `key`, if the key holds a string.
    pub fn string(&self, key: &[u8]) -> Option<&Bytes> {
        match self.entries.get(key) {
            Some(Object::String(s)) => Some(s),
            _ => None,
        }
    }

    /// The list at `key`, if the key holds a list.
    pub fn list(&self, key: &[u8]) -> Option<&VecDeque<Bytes>> {
        match self.entries.get(key) {
            Some(Object::List(l)) => Some(l),
            _ => None,
        }
    }

    pub fn list_mut(&mut self, key: &[u8]) -> Option<&mut VecDeque<Bytes>> {
        match self.entries.get_mut(key) {
            Some(Object::List(l)) => Some(l),
            _ => None,
        }
    }

    /// The hash at `key`, if the key holds a hash.
    pub fn hash(&self, key: &[u8]) -> Option<&HashMap<Bytes, Bytes>> {
        match self.entries.get(key) {
            Some(Object::Hash(h)) => Some(h),
            _ => None,
        }
    }

    pub fn hash_mut(&mut self, key: &[u8]) -> Option<&mut HashMap<Bytes, Bytes>> {
        match self.entries.get_mut(key) {
            Some(Object::Hash(h)) => Some(h),
            _ => None,
        }
    }

    /// The list at `key`, created empty when the key is absent. `None` when
    /// the key holds an object of another type (nothing is created then).
    pub fn list_entry(&mut self, key: &Bytes) -> Option<&mut VecDeque<Bytes>> {
        let object = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Object::List(VecDeque::new()));
        match object {
            Object::List(list) => Some(list),
            _ => None,
        }
    }

    /// The hash at `key`, created empty when the key is absent. `None` when
    /// the key holds an object of another type (nothing is created then).
    pub fn hash_entry(&mut self, key: &Bytes) -> Option<&mut HashMap<Bytes, Bytes>> {
        let object = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Object::Hash(HashMap::new()));
        match object {
            Object::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    pub fn expiry(&self, key: &[u8]) -> Option<Instant> {
        self.expirations.get(key).copied()
    }

    pub fn set_expiry(&mut self, key: Bytes, deadline: Instant) {
        self.expirations.insert(key, deadline);
    }

    /// Whether `key` has a deadline that has already passed.
    pub fn expiry_due(&self, key: &[u8]) -> bool {
        self.expirations
            .get(key)
            .map(|deadline| Instant::now() >= *deadline)
            .unwrap_or(false)
    }

    /// Purges `key` from both maps if its deadline has passed. Returns
    /// whether a purge happened.
    pub fn purge_if_due(&mut self, key: &[u8]) -> bool {
        if self.expiry_due(key) {
            self.entries.remove(key);
            self.expirations.remove(key);
            true
        } else {
            false
        }
    }

    /// Number of live entries (stale-but-unpurged keys included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Thread-safe handle to the keyspace, shared by every connection task and
/// the replay path. Wrap in an `Arc` and clone freely.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Keyspace>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Keyspace::new()),
        }
    }

    /// Runs `f` under the shared lock. For read-only command paths.
    pub fn with_read<T>(&self, f: impl FnOnce(&Keyspace) -> T) -> T {
        let guard = self.inner.read().unwrap();
        f(&guard)
    }

    /// Runs `f` under the exclusive lock. For every mutation, lazy-expiry
    /// purges included.
    pub fn with_write<T>(&self, f: impl FnOnce(&mut Keyspace) -> T) -> T {
        let mut guard = self.inner.write().unwrap();
        f(&mut guard)
    }

    /// Lazy-expiry check for read paths: tests the deadline under the shared
    /// lock and escalates to the exclusive lock only when a purge is due.
    /// Returns whether the key was purged.
    pub fn expire_if_due(&self, key: &[u8]) -> bool {
        if self.with_read(|ks| ks.expiry_due(key)) {
            // Re-checked under the exclusive lock; another writer may have
            // replaced the deadline in between.
            self.with_write(|ks| ks.purge_if_due(key))
        } else {
            false
        }
    }
}
