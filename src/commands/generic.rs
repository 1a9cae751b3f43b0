use bytes::Bytes;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use crate::commands::key_str;
use crate::db::Db;
use crate::reply::Reply;

/// PING [message]
pub fn ping(_db: &Arc<Db>, args: &[Bytes]) -> Reply {
    match args.len() {
        0 => Reply::Pong,
        1 => Reply::Bulk(args[0].clone()),
        _ => crate::commands::wrong_arity("ping"),
    }
}

/// DEL key [key ...] — returns the number of keys that existed.
pub fn del(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let mut removed = 0;
    for arg in args {
        let key = key_str(arg);
        if db.contains(&key) {
            removed += 1;
        }
        // Clears out physically-present-but-expired values too.
        db.remove(&key);
    }
    Reply::Integer(removed)
}

/// EXISTS key [key ...]
pub fn exists(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let count = args.iter().filter(|arg| db.contains(&key_str(arg))).count();
    Reply::Integer(count as i64)
}

/// EXPIRE key seconds — a non-positive TTL deletes the key outright.
///
/// Ref: <https://redis.io/docs/latest/commands/expire>
pub fn expire(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let key = key_str(&args[0]);
    let seconds = match String::from_utf8_lossy(&args[1]).parse::<i64>() {
        Ok(seconds) => seconds,
        Err(_) => return Reply::error("ERR value is not an integer or out of range"),
    };

    if !db.contains(&key) {
        return Reply::Integer(0);
    }
    if seconds <= 0 {
        db.remove(&key);
    } else {
        db.expire_at(&key, Instant::now() + Duration::from_secs(seconds as u64));
    }
    Reply::Integer(1)
}

/// PERSIST key
pub fn persist(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let key = key_str(&args[0]);
    if db.contains(&key) && db.persist(&key) {
        Reply::Integer(1)
    } else {
        Reply::Integer(0)
    }
}

/// TTL key — -2 for a missing key, -1 for a key without a TTL.
///
/// Ref: <https://redis.io/docs/latest/commands/ttl>
pub fn ttl(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    let key = key_str(&args[0]);
    if !db.contains(&key) {
        return Reply::Integer(-2);
    }
    match db.get_expiration(&key) {
        Some(at) => {
            let remaining = at.saturating_duration_since(Instant::now());
            Reply::Integer(remaining.as_secs() as i64)
        }
        None => Reply::Integer(-1),
    }
}

/// TYPE key
pub fn type_of(db: &Arc<Db>, args: &[Bytes]) -> Reply {
    match db.get_entity(&key_str(&args[0])) {
        Some(entity) => Reply::status(entity.type_name()),
        None => Reply::status("none"),
    }
}

/// DBSIZE
pub fn dbsize(db: &Arc<Db>, _args: &[Bytes]) -> Reply {
    let (keys, _) = db.size();
    Reply::Integer(keys as i64)
}

/// FLUSHDB [ASYNC | SYNC] — the flush itself is always synchronous here.
pub fn flushdb(db: &Arc<Db>, _args: &[Bytes]) -> Reply {
    db.flush();
    Reply::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::string::set;
    use crate::entity::DataEntity;
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
    async fn del_and_exists_count_keys() {
        let db = make_db();
        set(&db, &args(&["a", "1"]));
        set(&db, &args(&["b", "2"]));

        assert_eq!(exists(&db, &args(&["a", "b", "c"])), Reply::Integer(2));
        assert_eq!(del(&db, &args(&["a", "c"])), Reply::Integer(1));
        assert_eq!(exists(&db, &args(&["a", "b", "c"])), Reply::Integer(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_and_ttl() {
        let db = make_db();
        set(&db, &args(&["k", "v"]));

        assert_eq!(ttl(&db, &args(&["k"])), Reply::Integer(-1));
        assert_eq!(ttl(&db, &args(&["missing"])), Reply::Integer(-2));

        assert_eq!(expire(&db, &args(&["k", "10"])), Reply::Integer(1));
        assert_eq!(ttl(&db, &args(&["k"])), Reply::Integer(10));

        assert_eq!(expire(&db, &args(&["missing", "10"])), Reply::Integer(0));
        assert!(expire(&db, &args(&["k", "soon"])).is_error());
    }

    #[tokio::test(start_paused = true)]
    async fn expire_with_non_positive_ttl_deletes() {
        let db = make_db();
        set(&db, &args(&["k", "v"]));
        assert_eq!(expire(&db, &args(&["k", "-1"])), Reply::Integer(1));
        assert_eq!(exists(&db, &args(&["k"])), Reply::Integer(0));
    }

    #[tokio::test(start_paused = true)]
    async fn persist_reports_whether_a_ttl_was_cleared() {
        let db = make_db();
        set(&db, &args(&["k", "v"]));
        assert_eq!(persist(&db, &args(&["k"])), Reply::Integer(0));

        expire(&db, &args(&["k", "10"]));
        assert_eq!(persist(&db, &args(&["k"])), Reply::Integer(1));

        advance(Duration::from_secs(15)).await;
        assert_eq!(exists(&db, &args(&["k"])), Reply::Integer(1));
    }

    #[tokio::test(start_paused = true)]
    async fn type_reports_the_payload_kind() {
        let db = make_db();
        set(&db, &args(&["s", "v"]));
        db.put_entity(
            "l",
            DataEntity {
                data: crate::entity::Value::List(Default::default()),
            },
        );

        assert_eq!(type_of(&db, &args(&["s"])), Reply::status("string"));
        assert_eq!(type_of(&db, &args(&["l"])), Reply::status("list"));
        assert_eq!(type_of(&db, &args(&["missing"])), Reply::status("none"));
    }

    #[tokio::test(start_paused = true)]
    async fn dbsize_and_flushdb() {
        let db = make_db();
        set(&db, &args(&["a", "1"]));
        set(&db, &args(&["b", "2", "EX", "100"]));

        assert_eq!(dbsize(&db, &[]), Reply::Integer(2));
        assert_eq!(flushdb(&db, &[]), Reply::Ok);
        assert_eq!(dbsize(&db, &[]), Reply::Integer(0));
        assert_eq!(db.size(), (0, 0));
    }
}
