//! Command handlers.
//!
//! Every handler validates its arguments first — wrong arity or a
//! malformed argument produces an error reply before anything is touched —
//! then runs its store access under the lock mode its table entry implies:
//! shared for reads, exclusive for writes. Lazy-expiry purges count as
//! writes; read paths route them through [`Store::expire_if_due`] while
//! mutating paths purge inline inside their own exclusive section.
//!
//! Semantics follow Redis where the supported command surface overlaps it:
//! negative indices count from the end, TTL answers -1 for "no expiry" and
//! -2 for "no key", pushes report the new length, and so on. Oddities are
//! noted on the handlers that have them.

use crate::protocol::Value;
use crate::storage::{Object, Store};
use bytes::Bytes;
use std::time::{Duration, Instant};

// ============================================================================
// Argument helpers
// ============================================================================

/// Extracts the raw bytes of a textual argument.
fn arg_bytes(arg: &Value) -> Option<Bytes> {
    match arg {
        Value::BulkString(b) => Some(b.clone()),
        Value::SimpleString(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
        _ => None,
    }
}

/// Extracts an argument as a signed 64-bit integer.
fn arg_int(arg: &Value) -> Option<i64> {
    match arg {
        Value::Integer(n) => Some(*n),
        Value::BulkString(b) => std::str::from_utf8(b).ok()?.parse().ok(),
        Value::SimpleString(s) => s.parse().ok(),
        _ => None,
    }
}

fn wrong_arity(name: &str) -> Value {
    Value::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name
    ))
}

fn not_integer() -> Value {
    Value::error("ERR value is not an integer or out of range")
}

fn wrong_type() -> Value {
    Value::error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn invalid_key() -> Value {
    Value::error("ERR invalid key")
}

fn invalid_value() -> Value {
    Value::error("ERR invalid value")
}

/// Absolute deadline `secs` from now. A non-positive count of seconds is a
/// deadline that has already passed, so it maps to "now": the next touch of
/// the key purges it.
fn deadline_after(secs: i64) -> Instant {
    if secs <= 0 {
        Instant::now()
    } else {
        Instant::now() + Duration::from_secs(secs as u64)
    }
}

// ============================================================================
// Connection commands
// ============================================================================

/// PING [message] — echoes the message, or answers PONG. Never errors;
/// surplus arguments are ignored.
pub fn ping(_store: &Store, args: &[Value]) -> Value {
    match args.first() {
        None => Value::pong(),
        Some(arg) => Value::simple(arg.as_str().unwrap_or("")),
    }
}

// ============================================================================
// String commands
// ============================================================================

/// SET key value — unconditional write. Replaces whatever object the key
/// held; an existing expiration deadline is deliberately left in place.
pub fn set(store: &Store, args: &[Value]) -> Value {
    if args.len() != 2 {
        return wrong_arity("set");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let Some(value) = arg_bytes(&args[1]) else {
        return invalid_value();
    };

    store.with_write(|ks| ks.insert(key, Object::String(value)));
    Value::ok()
}

/// GET key
pub fn get(store: &Store, args: &[Value]) -> Value {
    if args.len() != 1 {
        return wrong_arity("get");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    match store.with_read(|ks| ks.string(&key).cloned()) {
        Some(value) => Value::BulkString(value),
        None => Value::Null,
    }
}

/// SETNX key value — writes only when the key is absent; 1 on write, 0 on
/// a no-op.
pub fn setnx(store: &Store, args: &[Value]) -> Value {
    if args.len() != 2 {
        return wrong_arity("setnx");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let Some(value) = arg_bytes(&args[1]) else {
        return invalid_value();
    };

    store.with_write(|ks| {
        if ks.contains(&key) {
            Value::integer(0)
        } else {
            ks.insert(key, Object::String(value));
            Value::integer(1)
        }
    })
}

/// SETEX key seconds value — write plus a fresh deadline.
pub fn setex(store: &Store, args: &[Value]) -> Value {
    if args.len() != 3 {
        return wrong_arity("setex");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let Some(secs) = arg_int(&args[1]) else {
        return not_integer();
    };
    let Some(value) = arg_bytes(&args[2]) else {
        return invalid_value();
    };

    let deadline = deadline_after(secs);
    store.with_write(|ks| {
        ks.insert(key.clone(), Object::String(value));
        ks.set_expiry(key, deadline);
    });
    Value::ok()
}

/// GETEX key [EX seconds] — read, optionally refreshing the deadline. The
/// seconds ride positionally in the third slot; a two-argument form reads
/// without refreshing. Absent keys return null and refresh nothing.
pub fn getex(store: &Store, args: &[Value]) -> Value {
    if args.is_empty() || args.len() > 3 {
        return wrong_arity("getex");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    let Some(value) = store.with_read(|ks| ks.string(&key).cloned()) else {
        return Value::Null;
    };

    if args.len() == 3 {
        let Some(secs) = arg_int(&args[2]) else {
            return not_integer();
        };
        let deadline = deadline_after(secs);
        store.with_write(|ks| ks.set_expiry(key, deadline));
    }

    Value::BulkString(value)
}

/// STRLEN key — byte length, 0 when absent.
pub fn strlen(store: &Store, args: &[Value]) -> Value {
    if args.len() != 1 {
        return wrong_arity("strlen");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    let len = store.with_read(|ks| ks.string(&key).map(|s| s.len()).unwrap_or(0));
    Value::integer(len as i64)
}

/// GETRANGE key start end — negative-index slice over the string,
/// inclusive of `end`. A computed `start >= end`, like an absent or empty
/// value, yields the empty-array sentinel rather than an empty bulk.
pub fn getrange(store: &Store, args: &[Value]) -> Value {
    if args.len() != 3 {
        return wrong_arity("getrange");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let Some(start) = arg_int(&args[1]) else {
        return not_integer();
    };
    let Some(end) = arg_int(&args[2]) else {
        return not_integer();
    };

    store.expire_if_due(&key);
    store.with_read(|ks| {
        let Some(data) = ks.string(&key) else {
            return Value::Array(vec![]);
        };
        if data.is_empty() {
            return Value::Array(vec![]);
        }

        let len = data.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        if start < 0 {
            start = 0;
        }
        let mut end = if end < 0 { len + end } else { end };
        if start >= end {
            return Value::Array(vec![]);
        }
        if end >= len {
            end = len - 1;
        }
        if start >= len {
            return Value::Array(vec![]);
        }

        Value::BulkString(data.slice(start as usize..(end + 1) as usize))
    })
}

/// MSET key value [key value ...] — bulk unconditional writes.
pub fn mset(store: &Store, args: &[Value]) -> Value {
    if args.is_empty() || args.len() % 2 != 0 {
        return wrong_arity("mset");
    }

    let mut pairs = Vec::with_capacity(args.len() / 2);
    for chunk in args.chunks(2) {
        let Some(key) = arg_bytes(&chunk[0]) else {
            return invalid_key();
        };
        let Some(value) = arg_bytes(&chunk[1]) else {
            return invalid_value();
        };
        pairs.push((key, value));
    }

    store.with_write(|ks| {
        for (key, value) in pairs {
            ks.insert(key, Object::String(value));
        }
    });
    Value::ok()
}

/// MGET key [key ...] — one bulk-or-null slot per key. An expired key only
/// nulls its own slot; the rest of the reply is unaffected.
pub fn mget(store: &Store, args: &[Value]) -> Value {
    if args.is_empty() {
        return wrong_arity("mget");
    }

    let mut slots = Vec::with_capacity(args.len());
    for arg in args {
        let Some(key) = arg_bytes(arg) else {
            slots.push(Value::Null);
            continue;
        };
        store.expire_if_due(&key);
        match store.with_read(|ks| ks.string(&key).cloned()) {
            Some(value) => slots.push(Value::BulkString(value)),
            None => slots.push(Value::Null),
        }
    }
    Value::Array(slots)
}

/// Shared INCR/DECR body: create at `delta` when absent or expired,
/// otherwise parse the stored string and step it.
fn step_counter(store: &Store, args: &[Value], name: &str, delta: i64) -> Value {
    if args.len() != 1 {
        return wrong_arity(name);
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.with_write(|ks| {
        ks.purge_if_due(&key);

        let current = match ks.object(&key) {
            None => None,
            Some(Object::String(s)) => {
                match std::str::from_utf8(s).ok().and_then(|s| s.parse::<i64>().ok()) {
                    Some(n) => Some(n),
                    None => return not_integer(),
                }
            }
            Some(_) => return wrong_type(),
        };

        let next = match current {
            None => delta,
            Some(n) => match n.checked_add(delta) {
                Some(next) => next,
                None => return Value::error("ERR increment or decrement would overflow"),
            },
        };

        // the deadline, if any, survives the rewrite
        ks.insert(key, Object::String(Bytes::from(next.to_string())));
        Value::integer(next)
    })
}

/// INCR key
pub fn incr(store: &Store, args: &[Value]) -> Value {
    step_counter(store, args, "incr", 1)
}

/// DECR key
pub fn decr(store: &Store, args: &[Value]) -> Value {
    step_counter(store, args, "decr", -1)
}

// ============================================================================
// Hash commands
// ============================================================================

/// HSET hash field value [field value ...] — creates the hash on first
/// write; returns the number of field/value pairs written.
pub fn hset(store: &Store, args: &[Value]) -> Value {
    if args.len() < 3 || args.len() % 2 == 0 {
        return wrong_arity("hset");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    let mut pairs = Vec::with_capacity(args.len() / 2);
    for chunk in args[1..].chunks(2) {
        let Some(field) = arg_bytes(&chunk[0]) else {
            return invalid_key();
        };
        let Some(value) = arg_bytes(&chunk[1]) else {
            return invalid_value();
        };
        pairs.push((field, value));
    }

    store.with_write(|ks| match ks.hash_entry(&key) {
        Some(hash) => {
            let written = pairs.len();
            for (field, value) in pairs {
                hash.insert(field, value);
            }
            Value::integer(written as i64)
        }
        None => wrong_type(),
    })
}

/// HGET hash field
pub fn hget(store: &Store, args: &[Value]) -> Value {
    if args.len() != 2 {
        return wrong_arity("hget");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let Some(field) = arg_bytes(&args[1]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    match store.with_read(|ks| ks.hash(&key).and_then(|h| h.get(&field).cloned())) {
        Some(value) => Value::BulkString(value),
        None => Value::Null,
    }
}

/// HDEL hash field [field ...] — returns the number of fields removed. A
/// missing hash removes nothing.
pub fn hdel(store: &Store, args: &[Value]) -> Value {
    if args.len() < 2 {
        return wrong_arity("hdel");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let mut fields = Vec::with_capacity(args.len() - 1);
    for arg in &args[1..] {
        let Some(field) = arg_bytes(arg) else {
            return invalid_key();
        };
        fields.push(field);
    }

    store.with_write(|ks| {
        let Some(hash) = ks.hash_mut(&key) else {
            return Value::integer(0);
        };
        let mut removed = 0;
        for field in &fields {
            if hash.remove(field).is_some() {
                removed += 1;
            }
        }
        Value::integer(removed)
    })
}

/// HEXISTS hash field
pub fn hexists(store: &Store, args: &[Value]) -> Value {
    if args.len() < 2 {
        return wrong_arity("hexists");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let Some(field) = arg_bytes(&args[1]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    let present = store.with_read(|ks| {
        ks.hash(&key)
            .map(|h| h.contains_key(&field))
            .unwrap_or(false)
    });
    Value::integer(present as i64)
}

/// HMGET hash field [field ...] — per-field bulk-or-null; a missing hash
/// behaves as empty.
pub fn hmget(store: &Store, args: &[Value]) -> Value {
    if args.is_empty() {
        return wrong_arity("hmget");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    store.with_read(|ks| {
        let hash = ks.hash(&key);
        let mut slots = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            let value = arg_bytes(arg).and_then(|field| hash.and_then(|h| h.get(&field).cloned()));
            slots.push(match value {
                Some(v) => Value::BulkString(v),
                None => Value::Null,
            });
        }
        Value::Array(slots)
    })
}

/// HGETALL hash — flat field/value array, iteration order unspecified.
pub fn hgetall(store: &Store, args: &[Value]) -> Value {
    if args.len() != 1 {
        return wrong_arity("hgetall");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    store.with_read(|ks| {
        let Some(hash) = ks.hash(&key) else {
            return Value::Array(vec![]);
        };
        let mut items = Vec::with_capacity(hash.len() * 2);
        for (field, value) in hash {
            items.push(Value::BulkString(field.clone()));
            items.push(Value::BulkString(value.clone()));
        }
        Value::Array(items)
    })
}

/// HLEN hash
pub fn hlen(store: &Store, args: &[Value]) -> Value {
    if args.len() != 1 {
        return wrong_arity("hlen");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    let len = store.with_read(|ks| ks.hash(&key).map(|h| h.len()).unwrap_or(0));
    Value::integer(len as i64)
}

/// HKEYS hash
pub fn hkeys(store: &Store, args: &[Value]) -> Value {
    if args.len() != 1 {
        return wrong_arity("hkeys");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    store.with_read(|ks| {
        let fields = ks
            .hash(&key)
            .map(|h| h.keys().cloned().map(Value::BulkString).collect())
            .unwrap_or_default();
        Value::Array(fields)
    })
}

/// HVALS hash
pub fn hvals(store: &Store, args: &[Value]) -> Value {
    if args.len() != 1 {
        return wrong_arity("hvals");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    store.with_read(|ks| {
        let values = ks
            .hash(&key)
            .map(|h| h.values().cloned().map(Value::BulkString).collect())
            .unwrap_or_default();
        Value::Array(values)
    })
}

// ============================================================================
// List commands
// ============================================================================

/// Shared LPUSH/RPUSH body. Each argument is pushed in turn, so
/// `LPUSH k a b c` leaves the list as `[c, b, a]`.
fn push_list(store: &Store, args: &[Value], name: &str, front: bool) -> Value {
    if args.len() < 2 {
        return wrong_arity(name);
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let mut values = Vec::with_capacity(args.len() - 1);
    for arg in &args[1..] {
        let Some(value) = arg_bytes(arg) else {
            return invalid_value();
        };
        values.push(value);
    }

    store.with_write(|ks| {
        ks.purge_if_due(&key);
        match ks.list_entry(&key) {
            Some(list) => {
                for value in values {
                    if front {
                        list.push_front(value);
                    } else {
                        list.push_back(value);
                    }
                }
                Value::integer(list.len() as i64)
            }
            None => wrong_type(),
        }
    })
}

/// Shared LPUSHX/RPUSHX body: a no-op returning 0 unless the list already
/// exists.
fn push_list_existing(store: &Store, args: &[Value], name: &str, front: bool) -> Value {
    if args.len() < 2 {
        return wrong_arity(name);
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let mut values = Vec::with_capacity(args.len() - 1);
    for arg in &args[1..] {
        let Some(value) = arg_bytes(arg) else {
            return invalid_value();
        };
        values.push(value);
    }

    store.with_write(|ks| {
        ks.purge_if_due(&key);
        match ks.object_mut(&key) {
            None => Value::integer(0),
            Some(Object::List(list)) => {
                for value in values {
                    if front {
                        list.push_front(value);
                    } else {
                        list.push_back(value);
                    }
                }
                Value::integer(list.len() as i64)
            }
            Some(_) => wrong_type(),
        }
    })
}

/// RPUSH key value [value ...]
pub fn rpush(store: &Store, args: &[Value]) -> Value {
    push_list(store, args, "rpush", false)
}

/// LPUSH key value [value ...]
pub fn lpush(store: &Store, args: &[Value]) -> Value {
    push_list(store, args, "lpush", true)
}

/// RPUSHX key value [value ...]
pub fn rpushx(store: &Store, args: &[Value]) -> Value {
    push_list_existing(store, args, "rpushx", false)
}

/// LPUSHX key value [value ...]
pub fn lpushx(store: &Store, args: &[Value]) -> Value {
    push_list_existing(store, args, "lpushx", true)
}

/// Shared LPOP/RPOP body.
///
/// The single-pop form returns a bare bulk value; the count form returns an
/// array of up to `count` elements in removal order, clamped to the list
/// length. The two commands answer an absent or empty list differently
/// (empty array for LPOP, null for RPOP) — longstanding observable
/// behavior, kept as-is.
fn pop_list(store: &Store, args: &[Value], name: &str, front: bool, empty_reply: Value) -> Value {
    if args.is_empty() {
        return wrong_arity(name);
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let count = match args.get(1) {
        None => None,
        Some(arg) => match arg_int(arg) {
            Some(n) if n >= 0 => Some(n as usize),
            _ => return Value::error("ERR value is out of range, must be positive"),
        },
    };

    store.with_write(|ks| {
        ks.purge_if_due(&key);
        let list = match ks.object_mut(&key) {
            Some(Object::List(list)) if !list.is_empty() => list,
            Some(Object::List(_)) | None => return empty_reply,
            Some(_) => return wrong_type(),
        };

        match count {
            Some(count) => {
                let count = count.min(list.len());
                let mut popped = Vec::with_capacity(count);
                for _ in 0..count {
                    let value = if front {
                        list.pop_front()
                    } else {
                        list.pop_back()
                    };
                    if let Some(value) = value {
                        popped.push(Value::BulkString(value));
                    }
                }
                Value::Array(popped)
            }
            None => {
                let value = if front {
                    list.pop_front()
                } else {
                    list.pop_back()
                };
                match value {
                    Some(value) => Value::BulkString(value),
                    None => Value::Null,
                }
            }
        }
    })
}

/// LPOP key [count]
pub fn lpop(store: &Store, args: &[Value]) -> Value {
    pop_list(store, args, "lpop", true, Value::Array(vec![]))
}

/// RPOP key [count]
pub fn rpop(store: &Store, args: &[Value]) -> Value {
    pop_list(store, args, "rpop", false, Value::Null)
}

/// LRANGE key start end — negative-index slice, inclusive of `end`;
/// out-of-range indices clamp rather than error.
pub fn lrange(store: &Store, args: &[Value]) -> Value {
    if args.len() != 3 {
        return wrong_arity("lrange");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let Some(start) = arg_int(&args[1]) else {
        return not_integer();
    };
    let Some(end) = arg_int(&args[2]) else {
        return not_integer();
    };

    store.expire_if_due(&key);
    store.with_read(|ks| {
        let Some(list) = ks.list(&key) else {
            return Value::Array(vec![]);
        };
        if list.is_empty() {
            return Value::Array(vec![]);
        }

        let len = list.len() as i64;
        let mut start = if start < 0 { len + start } else { start };
        if start < 0 {
            start = 0;
        }
        let mut end = if end < 0 { len + end } else { end };
        if end >= len {
            end = len - 1;
        }
        if start > end || start >= len {
            return Value::Array(vec![]);
        }

        let items = list
            .iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .cloned()
            .map(Value::BulkString)
            .collect();
        Value::Array(items)
    })
}

/// LLEN key
pub fn llen(store: &Store, args: &[Value]) -> Value {
    if args.len() != 1 {
        return wrong_arity("llen");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    let len = store.with_read(|ks| ks.list(&key).map(|l| l.len()).unwrap_or(0));
    Value::integer(len as i64)
}

// ============================================================================
// Generic commands
// ============================================================================

/// DEL key [key ...] — removes each key and its deadline; returns the
/// number of keys that actually held something.
pub fn del(store: &Store, args: &[Value]) -> Value {
    if args.is_empty() {
        return wrong_arity("del");
    }
    let keys: Vec<Bytes> = args.iter().filter_map(arg_bytes).collect();

    let removed = store.with_write(|ks| {
        let mut removed = 0;
        for key in &keys {
            if ks.remove(key) {
                removed += 1;
            }
        }
        removed
    });
    Value::integer(removed)
}

/// EXPIRE key seconds — 1 when a deadline was set, 0 when the key does not
/// exist. An expired-but-unpurged key counts as gone, not as a candidate
/// for resurrection.
pub fn expire(store: &Store, args: &[Value]) -> Value {
    if args.len() < 2 {
        return wrong_arity("expire");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };
    let Some(secs) = arg_int(&args[1]) else {
        return not_integer();
    };

    store.with_write(|ks| {
        ks.purge_if_due(&key);
        if ks.contains(&key) {
            ks.set_expiry(key, deadline_after(secs));
            Value::integer(1)
        } else {
            Value::integer(0)
        }
    })
}

/// TTL key — remaining whole seconds; -1 when the key has no deadline, -2
/// when the key does not exist.
pub fn ttl(store: &Store, args: &[Value]) -> Value {
    if args.len() != 1 {
        return wrong_arity("ttl");
    }
    let Some(key) = arg_bytes(&args[0]) else {
        return invalid_key();
    };

    store.expire_if_due(&key);
    store.with_read(|ks| {
        if !ks.contains(&key) {
            return Value::integer(-2);
        }
        match ks.expiry(&key) {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    Value::integer((deadline - now).as_secs() as i64)
                } else {
                    Value::integer(-1)
                }
            }
            None => Value::integer(-1),
        }
    })
}
