//! The command table.
//!
//! One static mapping from uppercase command name to a handler function and
//! an is-mutating flag. Live connections and log replay both go through this
//! table, so a command executes identically no matter where its bytes came
//! from. The flag is what the connection layer consults when deciding
//! whether a request belongs in the persistence log — every mutating
//! command is logged, not a hand-picked subset.

use crate::commands::handler;
use crate::protocol::Value;
use crate::storage::Store;

/// Every handler has this shape: validate arguments, touch the store under
/// the appropriate lock, build a reply. Handlers never perform I/O.
pub type HandlerFn = fn(&Store, &[Value]) -> Value;

/// A command table entry.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub handler: HandlerFn,
    /// Whether a successful execution can change the keyspace. Mutating
    /// requests are appended to the persistence log and replayed at startup.
    pub mutating: bool,
}

const fn read_only(handler: HandlerFn) -> CommandSpec {
    CommandSpec {
        handler,
        mutating: false,
    }
}

const fn mutating(handler: HandlerFn) -> CommandSpec {
    CommandSpec {
        handler,
        mutating: true,
    }
}

/// Looks up a command by its uppercase name.
pub fn lookup(name: &str) -> Option<CommandSpec> {
    let spec = match name {
        // connection commands
        "PING" => read_only(handler::ping),
        // string commands
        "SET" => mutating(handler::set),
        "GET" => read_only(handler::get),
        "SETNX" => mutating(handler::setnx),
        "SETEX" => mutating(handler::setex),
        "GETEX" => mutating(handler::getex),
        "STRLEN" => read_only(handler::strlen),
        "GETRANGE" => read_only(handler::getrange),
        "MSET" => mutating(handler::mset),
        "MGET" => read_only(handler::mget),
        "INCR" => mutating(handler::incr),
        "DECR" => mutating(handler::decr),
        // hash commands
        "HSET" => mutating(handler::hset),
        "HGET" => read_only(handler::hget),
        "HDEL" => mutating(handler::hdel),
        "HEXISTS" => read_only(handler::hexists),
        "HMGET" => read_only(handler::hmget),
        "HGETALL" => read_only(handler::hgetall),
        "HLEN" => read_only(handler::hlen),
        "HKEYS" => read_only(handler::hkeys),
        "HVALS" => read_only(handler::hvals),
        // list commands
        "RPUSH" => mutating(handler::rpush),
        "LPUSH" => mutating(handler::lpush),
        "RPUSHX" => mutating(handler::rpushx),
        "LPUSHX" => mutating(handler::lpushx),
        "RPOP" => mutating(handler::rpop),
        "LPOP" => mutating(handler::lpop),
        "LRANGE" => read_only(handler::lrange),
        "LLEN" => read_only(handler::llen),
        // generic commands
        "DEL" => mutating(handler::del),
        "EXPIRE" => mutating(handler::expire),
        "TTL" => read_only(handler::ttl),
        _ => return None,
    };
    Some(spec)
}

/// Splits a request into its uppercase command name and argument slice.
///
/// Returns `None` when the request is not an array, is empty, or its first
/// element is not a textual value — the caller decides whether that means
/// "ignore" (live traffic) or "skip" (replay).
pub fn command_parts(request: &Value) -> Option<(String, &[Value])> {
    let items = request.as_array()?;
    let (first, args) = items.split_first()?;
    let name = first.as_str()?.to_ascii_uppercase();
    Some((name, args))
}

/// Executes a request against the store, end to end: split, look up,
/// invoke. `None` means the request was not a known command.
///
/// This is the replay entry point; the connection layer performs the same
/// steps itself because it distinguishes malformed requests (ignored)
/// from unknown commands (replied to with an empty simple string).
pub fn dispatch(store: &Store, request: &Value) -> Option<Value> {
    let (name, args) = command_parts(request)?;
    let spec = lookup(&name)?;
    Some((spec.handler)(store, args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_sensitive_on_purpose() {
        // callers uppercase via command_parts; the table itself stores
        // canonical names only
        assert!(lookup("SET").is_some());
        assert!(lookup("set").is_none());
    }

    #[test]
    fn unknown_command_not_in_table() {
        assert!(lookup("FLUSHEVERYTHING").is_none());
    }

    #[test]
    fn read_write_classification() {
        for name in ["GET", "MGET", "LRANGE", "HGETALL", "TTL", "PING"] {
            assert!(!lookup(name).unwrap().mutating, "{name} must be read-only");
        }
        for name in ["SET", "DEL", "INCR", "RPUSH", "LPOP", "HSET", "EXPIRE"] {
            assert!(lookup(name).unwrap().mutating, "{name} must be mutating");
        }
    }

    #[test]
    fn command_parts_uppercases_name() {
        let request = Value::array(vec![Value::bulk("set"), Value::bulk("k"), Value::bulk("v")]);
        let (name, args) = command_parts(&request).unwrap();
        assert_eq!(name, "SET");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn command_parts_rejects_non_arrays() {
        assert!(command_parts(&Value::bulk("SET")).is_none());
        assert!(command_parts(&Value::array(vec![])).is_none());
        assert!(command_parts(&Value::integer(1)).is_none());
    }

    #[test]
    fn dispatch_runs_a_command() {
        let store = Store::new();
        let request = Value::array(vec![Value::bulk("PING")]);
        assert_eq!(dispatch(&store, &request), Some(Value::pong()));
    }

    #[test]
    fn dispatch_returns_none_for_unknown() {
        let store = Store::new();
        let request = Value::array(vec![Value::bulk("NOSUCH")]);
        assert_eq!(dispatch(&store, &request), None);
    }
}
