pub mod generic;
pub mod string;

use bytes::Bytes;
use std::sync::Arc;

use crate::db::Db;
use crate::reply::Reply;

/// One parsed request line: command name followed by its arguments.
pub type CmdLine = Vec<Bytes>;

pub const WRONG_TYPE_ERR: &str =
    "WRONGTYPE Operation against a key holding the wrong kind of value";

/// Static description of a command: how to validate it, which keys it locks,
/// and how to run it. `exec` is always called with the command's full lock set
/// already held; `keys` is what derives that lock set.
pub struct CommandSpec {
    pub name: &'static str,
    /// Redis-style arity counting the command name: exact when positive,
    /// minimum when negative.
    pub arity: i32,
    pub exec: fn(&Arc<Db>, &[Bytes]) -> Reply,
    /// Derives (write keys, read keys) from the arguments (name excluded).
    pub keys: fn(&[Bytes]) -> (Vec<String>, Vec<String>),
}

pub fn arity_ok(arity: i32, argc: usize) -> bool {
    if arity >= 0 {
        argc == arity as usize
    } else {
        argc >= (-arity) as usize
    }
}

pub fn wrong_arity(name: &str) -> Reply {
    Reply::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name
    ))
}

pub(crate) fn key_str(arg: &Bytes) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

fn no_keys(_args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), Vec::new())
}

fn write_first_key(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (vec![key_str(&args[0])], Vec::new())
}

fn read_first_key(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), vec![key_str(&args[0])])
}

fn write_all_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (args.iter().map(key_str).collect(), Vec::new())
}

// key value [key value ...]
fn write_even_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (args.iter().step_by(2).map(key_str).collect(), Vec::new())
}

fn read_all_keys(args: &[Bytes]) -> (Vec<String>, Vec<String>) {
    (Vec::new(), args.iter().map(key_str).collect())
}

macro_rules! spec {
    ($ident:ident, $name:literal, $arity:expr, $exec:path, $keys:path) => {
        static $ident: CommandSpec = CommandSpec {
            name: $name,
            arity: $arity,
            exec: $exec,
            keys: $keys,
        };
    };
}

spec!(PING, "ping", -1, generic::ping, no_keys);
spec!(GET, "get", 2, string::get, read_first_key);
spec!(SET, "set", -3, string::set, write_first_key);
spec!(SETNX, "setnx", 3, string::setnx, write_first_key);
spec!(GETSET, "getset", 3, string::getset, write_first_key);
spec!(MGET, "mget", -2, string::mget, read_all_keys);
spec!(MSET, "mset", -3, string::mset, write_even_keys);
spec!(INCR, "incr", 2, string::incr, write_first_key);
spec!(DECR, "decr", 2, string::decr, write_first_key);
spec!(DEL, "del", -2, generic::del, write_all_keys);
spec!(EXISTS, "exists", -2, generic::exists, read_all_keys);
spec!(EXPIRE, "expire", 3, generic::expire, write_first_key);
spec!(PERSIST, "persist", 2, generic::persist, write_first_key);
spec!(TTL, "ttl", 2, generic::ttl, read_first_key);
spec!(TYPE, "type", 2, generic::type_of, read_first_key);
spec!(DBSIZE, "dbsize", 1, generic::dbsize, no_keys);
spec!(FLUSHDB, "flushdb", -1, generic::flushdb, no_keys);

/// Looks up a command by its already-lowercased name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    match name {
        "ping" => Some(&PING),
        "get" => Some(&GET),
        "set" => Some(&SET),
        "setnx" => Some(&SETNX),
        "getset" => Some(&GETSET),
        "mget" => Some(&MGET),
        "mset" => Some(&MSET),
        "incr" => Some(&INCR),
        "decr" => Some(&DECR),
        "del" => Some(&DEL),
        "exists" => Some(&EXISTS),
        "expire" => Some(&EXPIRE),
        "persist" => Some(&PERSIST),
        "ttl" => Some(&TTL),
        "type" => Some(&TYPE),
        "dbsize" => Some(&DBSIZE),
        "flushdb" => Some(&FLUSHDB),
        _ => None,
    }
}
