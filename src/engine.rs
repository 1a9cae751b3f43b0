use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::commands::{self, CmdLine, CommandSpec};
use crate::connection::Connection;
use crate::db::{Db, HookSlot, KeyEventCallback};
use crate::entity::DataEntity;
use crate::reply::Reply;
use crate::snapshot::{self, SnapshotDecoder};
use crate::timewheel::TimeWheel;

const WHEEL_INTERVAL: Duration = Duration::from_secs(1);
const WHEEL_SLOTS: usize = 3600;

/// Pre-image of one key, captured before a sub-command mutates it.
struct UndoEntry {
    key: String,
    entity: Option<DataEntity>,
    expire_at: Option<Instant>,
}

/// The command engine: owns the databases, their per-key locks, the
/// expiration wheel, and the transaction machinery.
///
/// Must be constructed inside a tokio runtime (the wheel loop is a spawned
/// task). All entry points are synchronous; concurrent callers touching
/// disjoint keys proceed in parallel, overlapping key sets serialize on the
/// striped locks.
pub struct Engine {
    dbs: Vec<Arc<Db>>,
    wheel: TimeWheel,
    inserted_hook: HookSlot,
    deleted_hook: HookSlot,
}

impl Engine {
    pub fn new(db_count: usize) -> Engine {
        let wheel = TimeWheel::new(WHEEL_INTERVAL, WHEEL_SLOTS);
        wheel.start();

        let inserted_hook: HookSlot = Arc::new(RwLock::new(None));
        let deleted_hook: HookSlot = Arc::new(RwLock::new(None));

        let dbs = (0..db_count)
            .map(|index| {
                Arc::new(Db::new(
                    index,
                    wheel.clone(),
                    inserted_hook.clone(),
                    deleted_hook.clone(),
                ))
            })
            .collect();

        Engine {
            dbs,
            wheel,
            inserted_hook,
            deleted_hook,
        }
    }

    /// Executes one command line under the engine's own locking.
    pub fn exec(&self, conn: &dyn Connection, cmd_line: &[Bytes]) -> Reply {
        if cmd_line.is_empty() {
            return Reply::error("ERR empty command");
        }
        let name = String::from_utf8_lossy(&cmd_line[0]).to_lowercase();

        match name.as_str() {
            "multi" => return self.start_multi(conn),
            "discard" => return self.discard_multi(conn),
            "exec" => return self.exec_queued(conn),
            "watch" => return self.watch(conn, &cmd_line[1..]),
            "unwatch" => return self.unwatch(conn),
            "select" => return self.select(conn, &cmd_line[1..]),
            _ => {}
        }

        if conn.in_multi_state() {
            return self.enqueue(conn, cmd_line);
        }
        self.exec_normal(conn, cmd_line)
    }

    /// Same execution logic as [`Engine::exec`] but without acquiring locks;
    /// the caller must already hold the command's full lock set.
    pub fn exec_with_lock(&self, conn: &dyn Connection, cmd_line: &[Bytes]) -> Reply {
        let spec = match validated(cmd_line) {
            Ok(spec) => spec,
            Err(reply) => return reply,
        };
        let db = match self.current_db(conn) {
            Ok(db) => db,
            Err(reply) => return reply,
        };
        (spec.exec)(db, &cmd_line[1..])
    }

    /// Executes a queued batch as one atomic unit.
    ///
    /// Aborts with `Reply::Null` (and zero effects) when any watched key's
    /// version differs from its snapshot. A sub-command error reply mid-batch
    /// rolls every prior effect back via the collected pre-images and surfaces
    /// an `EXECABORT` error.
    pub fn exec_multi(
        &self,
        conn: &dyn Connection,
        watching: &HashMap<String, u32>,
        cmd_lines: &[CmdLine],
    ) -> Reply {
        let db = match self.current_db(conn) {
            Ok(db) => db,
            Err(reply) => return reply,
        };

        let mut specs: Vec<&'static CommandSpec> = Vec::with_capacity(cmd_lines.len());
        for cmd_line in cmd_lines {
            match validated(cmd_line) {
                Ok(spec) => specs.push(spec),
                Err(reply) => return reply,
            }
        }

        // The union of every sub-command's key sets, acquired once up front in
        // the lock map's global order. Watched keys join the read set so the
        // version check cannot race a concurrent writer.
        let mut write_keys: Vec<String> = Vec::new();
        let mut read_keys: Vec<String> = Vec::new();
        for (spec, cmd_line) in specs.iter().zip(cmd_lines) {
            let (write, read) = (spec.keys)(&cmd_line[1..]);
            write_keys.extend(write);
            read_keys.extend(read);
        }
        read_keys.extend(watching.keys().cloned());

        let _guards = db.locks.rw_locks(
            write_keys.iter().map(String::as_str),
            read_keys.iter().map(String::as_str),
        );

        for (key, version) in watching {
            if db.version(key) != *version {
                debug!(key, "watched key changed, aborting transaction");
                return Reply::Null;
            }
        }

        let mut undo_logs: Vec<Vec<UndoEntry>> = Vec::with_capacity(cmd_lines.len());
        let mut replies = Vec::with_capacity(cmd_lines.len());

        for (spec, cmd_line) in specs.iter().zip(cmd_lines) {
            let args = &cmd_line[1..];

            // Pre-images for every key this sub-command may touch, captured
            // before its mutation becomes visible.
            let mut pre_images = Vec::new();
            let (write, _) = (spec.keys)(args);
            for key in write {
                pre_images.push(UndoEntry {
                    entity: db.physical_entity(&key),
                    expire_at: db.get_expiration(&key),
                    key,
                });
            }
            undo_logs.push(pre_images);

            let reply = self.exec_with_lock(conn, cmd_line);
            if reply.is_error() {
                let message = match &reply {
                    Reply::Err(message) => message.clone(),
                    _ => "unknown error".to_string(),
                };
                rollback(db, &undo_logs);
                debug!(command = spec.name, "transaction rolled back");
                return Reply::error(format!(
                    "EXECABORT Transaction discarded because of: {}",
                    message
                ));
            }
            replies.push(reply);
        }

        Reply::MultiRaw(replies)
    }

    /// Invokes `cb` once per key the command is about to mutate, with the
    /// pre-mutation entity and expiration (`None` entity when the key does
    /// not exist). Call with the command's locks held.
    pub fn get_undo_logs(
        &self,
        db_index: usize,
        cmd_line: &[Bytes],
        mut cb: impl FnMut(&str, Option<DataEntity>, Option<Instant>),
    ) {
        let Some(db) = self.dbs.get(db_index) else {
            return;
        };
        let Ok(spec) = validated(cmd_line) else {
            return;
        };
        let (write_keys, _) = (spec.keys)(&cmd_line[1..]);
        for key in write_keys {
            cb(&key, db.physical_entity(&key), db.get_expiration(&key));
        }
    }

    /// Acquires write locks for `write_keys` and read locks for `read_keys`
    /// in the engine's global lock order. Dropping the returned guards
    /// releases in reverse acquisition order.
    pub fn rw_locks<'a, 'k>(
        &'a self,
        db_index: usize,
        write_keys: impl IntoIterator<Item = &'k str>,
        read_keys: impl IntoIterator<Item = &'k str>,
    ) -> Option<crate::locks::LockGuards<'a>> {
        self.dbs
            .get(db_index)
            .map(|db| db.locks.rw_locks(write_keys, read_keys))
    }

    /// (key count, key-with-TTL count); zeros for an invalid index.
    pub fn get_db_size(&self, db_index: usize) -> (usize, usize) {
        self.dbs.get(db_index).map(|db| db.size()).unwrap_or((0, 0))
    }

    pub fn get_entity(&self, db_index: usize, key: &str) -> Option<DataEntity> {
        self.dbs.get(db_index).and_then(|db| db.get_entity(key))
    }

    pub fn get_expiration(&self, db_index: usize, key: &str) -> Option<Instant> {
        self.dbs.get(db_index).and_then(|db| db.get_expiration(key))
    }

    pub fn set_key_inserted_callback(&self, cb: KeyEventCallback) {
        *self.inserted_hook.write().unwrap_or_else(|e| e.into_inner()) = Some(cb);
    }

    pub fn set_key_deleted_callback(&self, cb: KeyEventCallback) {
        *self.deleted_hook.write().unwrap_or_else(|e| e.into_inner()) = Some(cb);
    }

    /// Releases transaction state still attributed to a closing connection.
    /// Idempotent: safe when the connection never queued or watched anything.
    pub fn after_client_close(&self, conn: &dyn Connection) {
        conn.clear_queued_cmds();
        conn.set_multi_state(false);
        conn.clear_watching();
        conn.clear_tx_errors();
        debug!(name = conn.name(), "released client transaction state");
    }

    /// Orderly shutdown: halts the expiration wheel.
    pub fn close(&self) {
        self.wheel.stop();
    }

    /// Rehydrates the keyspace from a snapshot decoder. Entries that are
    /// already expired are skipped; live TTLs are rescheduled on the wheel.
    pub fn load_rdb(&self, decoder: &mut dyn SnapshotDecoder) -> Result<(), snapshot::Error> {
        while let Some(entry) = decoder.next_entry()? {
            let db = self.dbs.get(entry.db_index).ok_or_else(|| {
                snapshot::Error::Malformed {
                    reason: format!("db index {} out of range", entry.db_index),
                }
            })?;

            let remaining = match entry.expire_at {
                Some(at) => match at.duration_since(std::time::SystemTime::now()) {
                    Ok(remaining) => Some(remaining),
                    Err(_) => continue,
                },
                None => None,
            };

            db.put_entity(&entry.key, entry.entity);
            if let Some(remaining) = remaining {
                db.expire_at(&entry.key, Instant::now() + remaining);
            }
        }
        Ok(())
    }

    fn exec_normal(&self, conn: &dyn Connection, cmd_line: &[Bytes]) -> Reply {
        let spec = match validated(cmd_line) {
            Ok(spec) => spec,
            Err(reply) => return reply,
        };
        let db = match self.current_db(conn) {
            Ok(db) => db,
            Err(reply) => return reply,
        };

        let (write_keys, read_keys) = (spec.keys)(&cmd_line[1..]);
        let _guards = db.locks.rw_locks(
            write_keys.iter().map(String::as_str),
            read_keys.iter().map(String::as_str),
        );
        (spec.exec)(db, &cmd_line[1..])
    }

    fn enqueue(&self, conn: &dyn Connection, cmd_line: &[Bytes]) -> Reply {
        match validated(cmd_line) {
            Ok(_) => {
                conn.enqueue_cmd(cmd_line.to_vec());
                Reply::Queued
            }
            Err(reply) => {
                // A bad queued command poisons the whole transaction.
                if let Reply::Err(message) = &reply {
                    conn.add_tx_error(message.clone());
                }
                reply
            }
        }
    }

    fn start_multi(&self, conn: &dyn Connection) -> Reply {
        if conn.in_multi_state() {
            return Reply::error("ERR MULTI calls can not be nested");
        }
        conn.set_multi_state(true);
        Reply::Ok
    }

    fn discard_multi(&self, conn: &dyn Connection) -> Reply {
        if !conn.in_multi_state() {
            return Reply::error("ERR DISCARD without MULTI");
        }
        conn.clear_queued_cmds();
        conn.clear_tx_errors();
        conn.clear_watching();
        conn.set_multi_state(false);
        Reply::Ok
    }

    fn exec_queued(&self, conn: &dyn Connection) -> Reply {
        if !conn.in_multi_state() {
            return Reply::error("ERR EXEC without MULTI");
        }
        conn.set_multi_state(false);

        let cmd_lines = conn.queued_cmd_lines();
        let watching = conn.watching();
        let errors = conn.tx_errors();
        conn.clear_queued_cmds();
        conn.clear_watching();
        conn.clear_tx_errors();

        if !errors.is_empty() {
            return Reply::error("EXECABORT Transaction discarded because of previous errors.");
        }
        self.exec_multi(conn, &watching, &cmd_lines)
    }

    /// Snapshots the current version of each key into the connection's watch
    /// map, under the same locks that guard mutation of those keys.
    fn watch(&self, conn: &dyn Connection, keys: &[Bytes]) -> Reply {
        if conn.in_multi_state() {
            return Reply::error("ERR WATCH inside MULTI is not allowed");
        }
        if keys.is_empty() {
            return commands::wrong_arity("watch");
        }
        let db = match self.current_db(conn) {
            Ok(db) => db,
            Err(reply) => return reply,
        };

        let names: Vec<String> = keys.iter().map(commands::key_str).collect();
        let _guards = db
            .locks
            .rw_locks(std::iter::empty(), names.iter().map(String::as_str));
        for name in names {
            let version = db.version(&name);
            conn.add_watching(name, version);
        }
        Reply::Ok
    }

    fn unwatch(&self, conn: &dyn Connection) -> Reply {
        conn.clear_watching();
        Reply::Ok
    }

    fn select(&self, conn: &dyn Connection, args: &[Bytes]) -> Reply {
        if args.len() != 1 {
            return commands::wrong_arity("select");
        }
        let index = match String::from_utf8_lossy(&args[0]).parse::<usize>() {
            Ok(index) => index,
            Err(_) => return Reply::error("ERR invalid DB index"),
        };
        if index >= self.dbs.len() {
            return Reply::error("ERR DB index is out of range");
        }
        conn.select_db(index);
        Reply::Ok
    }

    fn current_db(&self, conn: &dyn Connection) -> Result<&Arc<Db>, Reply> {
        self.dbs
            .get(conn.db_index())
            .ok_or_else(|| Reply::error("ERR DB index is out of range"))
    }
}

fn validated(cmd_line: &[Bytes]) -> Result<&'static CommandSpec, Reply> {
    if cmd_line.is_empty() {
        return Err(Reply::error("ERR empty command"));
    }
    let name = String::from_utf8_lossy(&cmd_line[0]).to_lowercase();
    let spec = commands::lookup(&name)
        .ok_or_else(|| Reply::error(format!("ERR unknown command '{}'", name)))?;
    if !commands::arity_ok(spec.arity, cmd_line.len()) {
        return Err(commands::wrong_arity(spec.name));
    }
    Ok(spec)
}

/// Replays collected pre-images newest-first, restoring every touched key to
/// its exact pre-batch state.
fn rollback(db: &Arc<Db>, undo_logs: &[Vec<UndoEntry>]) {
    for pre_images in undo_logs.iter().rev() {
        for entry in pre_images.iter().rev() {
            match &entry.entity {
                None => {
                    db.remove(&entry.key);
                }
                Some(entity) => {
                    db.put_entity(&entry.key, entity.clone());
                    match entry.expire_at {
                        Some(at) => db.expire_at(&entry.key, at),
                        None => {
                            db.persist(&entry.key);
                        }
                    }
                }
            }
        }
    }
}
