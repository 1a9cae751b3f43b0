use bytes::Bytes;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use crate::commands::{key_str, WRONG_TYPE_ERR};
use crate::db::Db;
use crate::entity::DataEntity;
use crate::reply::Reply;

/// GET key
///
/// Ref: <https://redis.io/docs/latest/commands/get>
pub fn get(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let key = key_str(&args[0]);
    match db.get_entity(&key) {
        Some(entity) => match entity.as_str() {
            Some(data) => Reply::Bulk(data.clone()),
            None => Reply::error(WRONG_TYPE_ERR),
        },
        None => Reply::Null,
    }
}

/// SET key value [EX seconds] [NX | XX]
///
/// A plain SET discards any TTL the key carried; a successful SET with EX
/// schedules a fresh one.
///
/// Ref: <https://redis.io/docs/latest/commands/set>
pub fn set(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let key = key_str(&args[0]);
    let value = args[1].clone();

    let mut ttl: Option<Duration> = None;
    let mut if_absent = false;
    let mut if_present = false;

    let mut option = 2;
    while option < args.len() {
        match String::from_utf8_lossy(&args[option]).to_uppercase().as_str() {
            "EX" => {
                let seconds = args
                    .get(option + 1)
                    .and_then(|raw| String::from_utf8_lossy(raw).parse::<u64>().ok());
                match seconds {
                    Some(seconds) if seconds > 0 => {
                        ttl = Some(Duration::from_secs(seconds));
                        option += 2;
                    }
                    _ => return Reply::error("ERR invalid expire time in 'set' command"),
                }
            }
            "NX" => {
                if_absent = true;
                option += 1;
            }
            "XX" => {
                if_present = true;
                option += 1;
            }
            _ => return Reply::error("ERR syntax error"),
        }
    }
    if if_absent && if_present {
        return Reply::error("ERR syntax error");
    }

    let exists = db.contains(&key);
    if (if_absent && exists) || (if_present && !exists) {
        return Reply::Null;
    }

    db.put_entity(&key, DataEntity::str(value));
    match ttl {
        Some(ttl) => db.expire_at(&key, Instant::now() + ttl),
        None => {
            db.persist(&key);
        }
    }
    Reply::Ok
}

/// SETNX key value
///
/// Ref: <https://redis.io/docs/latest/commands/setnx>
pub fn setnx(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let key = key_str(&args[0]);
    if db.contains(&key) {
        return Reply::Integer(0);
    }
    db.put_entity(&key, DataEntity::str(args[1].clone()));
    db.persist(&key);
    Reply::Integer(1)
}

/// GETSET key value — returns the old string value and discards its TTL.
///
/// Ref: <https://redis.io/docs/latest/commands/getset>
pub fn getset(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let key = key_str(&args[0]);

    let old = match db.get_entity(&key) {
        Some(entity) => match entity.as_str() {
            Some(data) => Some(data.clone()),
            None => return Reply::error(WRONG_TYPE_ERR),
        },
        None => None,
    };

    db.put_entity(&key, DataEntity::str(args[1].clone()));
    db.persist(&key);

    match old {
        Some(data) => Reply::Bulk(data),
        None => Reply::Null,
    }
}

/// INCR key
///
/// Ref: <https://redis.io/docs/latest/commands/incr>
pub fn incr(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    incr_by(db, &key_str(&args[0]), 1)
}

/// DECR key
///
/// Ref: <https://redis.io/docs/latest/commands/decr>
pub fn decr(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    incr_by(db, &key_str(&args[0]), -1)
}

/// MGET key [key ...] — missing and non-string keys read as nulls.
///
/// Ref: <https://redis.io/docs/latest/commands/mget>
pub fn mget(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let values = args
        .iter()
        .map(|arg| {
            db.get_entity(&key_str(arg))
                .and_then(|entity| entity.as_str().cloned())
        })
        .collect();
    Reply::MultiBulk(values)
}

/// MSET key value [key value ...]
///
/// Ref: <https://redis.io/docs/latest/commands/mset>
pub fn mset(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    if args.len() % 2 != 0 {
        return crate::commands::wrong_arity("mset");
    }
    for pair in args.chunks_exact(2) {
        let key = key_str(&pair[0]);
        db.put_entity(&key, DataEntity::str(pair[1].clone()));
        db.persist(&key);
    }
    Reply::Ok
}

fn incr_by(db: &Arc<Db>, key: &str, delta: i64) -> Reply {
    let current = match db.get_entity(key) {
        Some(entity) => match entity.as_str() {
            Some(data) => match std::str::from_utf8(data).ok().and_then(|s| s.parse::<i64>().ok()) {
                Some(value) => value,
                None => return Reply::error("ERR value is not an integer or out of range"),
            },
            None => return Reply::error(WRONG_TYPE_ERR),
        },
        None => 0,
    };

    match current.checked_add(delta) {
        Some(next) => {
            db.put_entity(key, DataEntity::str(next.to_string()));
            Reply::Integer(next)
        }
        None => Reply::error("ERR increment or decrement would overflow"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timewheel::TimeWheel;
    use std::sync::RwLock;
    use tokio::time::advance;

    fn make_db() -> Arc<Db> {
        let wheel = TimeWheel::new(Duration::from_secs(1), 60);
        wheel.start();
        Arc::new(Db::new(
            0,
            wheel,
            Arc::new(RwLock::new(None)),
            Arc::new(RwLock::new(None)),
        ))
    }

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|s| Bytes::from(s.to_string())).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_get() {
        let db = make_db();
        assert_eq!(set(&db, &args(&["k", "v"])), Reply::Ok);
        assert_eq!(get(&db, &args(&["k"])), Reply::bulk("v"));
        assert_eq!(get(&db, &args(&["missing"])), Reply::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn set_nx_and_xx() {
        let db = make_db();

        assert_eq!(set(&db, &args(&["k", "v", "XX"])), Reply::Null);
        assert_eq!(set(&db, &args(&["k", "v", "NX"])), Reply::Ok);
        assert_eq!(set(&db, &args(&["k", "w", "NX"])), Reply::Null);
        assert_eq!(set(&db, &args(&["k", "w", "XX"])), Reply::Ok);
        assert_eq!(get(&db, &args(&["k"])), Reply::bulk("w"));

        assert!(set(&db, &args(&["k", "v", "NX", "XX"])).is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn set_with_ex_schedules_and_plain_set_clears() {
        let db = make_db();

        assert_eq!(set(&db, &args(&["k", "v", "EX", "5"])), Reply::Ok);
        assert!(db.get_expiration("k").is_some());

        assert_eq!(set(&db, &args(&["k", "v"])), Reply::Ok);
        assert!(db.get_expiration("k").is_none());

        assert!(set(&db, &args(&["k", "v", "EX", "0"])).is_error());
        assert!(set(&db, &args(&["k", "v", "EX", "nope"])).is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn set_with_ex_expires() {
        let db = make_db();
        set(&db, &args(&["k", "v", "EX", "2"]));

        advance(Duration::from_secs(3)).await;
        assert_eq!(get(&db, &args(&["k"])), Reply::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn setnx_only_sets_absent_keys() {
        let db = make_db();
        assert_eq!(setnx(&db, &args(&["k", "v"])), Reply::Integer(1));
        assert_eq!(setnx(&db, &args(&["k", "w"])), Reply::Integer(0));
        assert_eq!(get(&db, &args(&["k"])), Reply::bulk("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn getset_returns_old_value() {
        let db = make_db();
        assert_eq!(getset(&db, &args(&["k", "v"])), Reply::Null);
        assert_eq!(getset(&db, &args(&["k", "w"])), Reply::bulk("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn mset_and_mget() {
        let db = make_db();
        assert_eq!(mset(&db, &args(&["a", "1", "b", "2"])), Reply::Ok);
        assert_eq!(
            mget(&db, &args(&["a", "missing", "b"])),
            Reply::MultiBulk(vec![Some(Bytes::from("1")), None, Some(Bytes::from("2"))])
        );
        assert!(mset(&db, &args(&["a", "1", "dangling"])).is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn incr_decr() {
        let db = make_db();
        assert_eq!(incr(&db, &args(&["n"])), Reply::Integer(1));
        assert_eq!(incr(&db, &args(&["n"])), Reply::Integer(2));
        assert_eq!(decr(&db, &args(&["n"])), Reply::Integer(1));

        set(&db, &args(&["s", "abc"]));
        assert!(incr(&db, &args(&["s"])).is_error());

        set(&db, &args(&["max", &i64::MAX.to_string()]));
        assert!(incr(&db, &args(&["max"])).is_error());
    }
}
