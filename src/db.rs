use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::entity::DataEntity;
use crate::locks::LockMap;
use crate::timewheel::TimeWheel;

/// Process-wide hook invoked when a key transitions into or out of existence.
pub type KeyEventCallback = Arc<dyn Fn(usize, &str, &DataEntity) + Send + Sync>;

pub(crate) type HookSlot = Arc<RwLock<Option<KeyEventCallback>>>;

/// One database: a keyspace with per-key expirations and version counters.
///
/// The maps are physically thread-safe on their own; logical atomicity across
/// a command's key set comes from `locks`, which callers acquire before
/// touching the keyspace. Version counters back the WATCH machinery: every
/// logical mutation of a key bumps its counter.
pub struct Db {
    index: usize,
    data: DashMap<String, DataEntity>,
    expirations: DashMap<String, Instant>,
    versions: DashMap<String, u32>,
    pub(crate) locks: LockMap,
    wheel: TimeWheel,
    inserted_hook: HookSlot,
    deleted_hook: HookSlot,
}

impl Db {
    pub(crate) fn new(
        index: usize,
        wheel: TimeWheel,
        inserted_hook: HookSlot,
        deleted_hook: HookSlot,
    ) -> Db {
        Db {
            index,
            data: DashMap::new(),
            expirations: DashMap::new(),
            versions: DashMap::new(),
            locks: LockMap::new(),
            wheel,
            inserted_hook,
            deleted_hook,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Point lookup. Keys whose TTL has elapsed but whose expiration job has
    /// not fired yet read as absent.
    pub fn get_entity(&self, key: &str) -> Option<DataEntity> {
        if self.is_expired(key) {
            return None;
        }
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Raw lookup ignoring expiration state, used for undo pre-images.
    pub(crate) fn physical_entity(&self, key: &str) -> Option<DataEntity> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Stores `entity` under `key`, replacing any previous value. Returns true
    /// when the key did not exist before. Leaves any existing TTL in place;
    /// commands with destroy-TTL semantics call [`Db::persist`] themselves.
    pub fn put_entity(&self, key: &str, entity: DataEntity) -> bool {
        let previous = self.data.insert(key.to_string(), entity);
        self.bump_version(key);
        if previous.is_none() {
            if let Some(hook) = self.hook(&self.inserted_hook) {
                // Clone out of the map so the hook never runs under a shard guard.
                if let Some(entity) = self.physical_entity(key) {
                    hook(self.index, key, &entity);
                }
            }
            return true;
        }
        false
    }

    /// Deletes `key`, its expiration, and any scheduled expiration job.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.data.remove(key);
        match removed {
            Some((_, entity)) => {
                self.expirations.remove(key);
                self.wheel.remove_job(&self.expire_task_key(key));
                self.bump_version(key);
                if let Some(hook) = self.hook(&self.deleted_hook) {
                    hook(self.index, key, &entity);
                }
                true
            }
            None => false,
        }
    }

    /// Sets the expiration instant for `key` and (re)schedules the wheel job
    /// that will collect it. A prior schedule for the same key is replaced.
    pub fn expire_at(self: &Arc<Self>, key: &str, at: Instant) {
        self.expirations.insert(key.to_string(), at);
        self.bump_version(key);

        let db = Arc::clone(self);
        let owned_key = key.to_string();
        let delay = at.saturating_duration_since(Instant::now());
        self.wheel.add_job(
            delay,
            self.expire_task_key(key),
            Box::new(move || db.delete_if_expired(&owned_key)),
        );
    }

    /// Clears the TTL of `key`, cancelling its expiration job. Returns true
    /// when a TTL existed.
    pub fn persist(&self, key: &str) -> bool {
        let removed = self.expirations.remove(key).is_some();
        if removed {
            self.wheel.remove_job(&self.expire_task_key(key));
            self.bump_version(key);
        }
        removed
    }

    pub fn get_expiration(&self, key: &str) -> Option<Instant> {
        self.expirations.get(key).map(|entry| *entry.value())
    }

    pub fn contains(&self, key: &str) -> bool {
        !self.is_expired(key) && self.data.contains_key(key)
    }

    pub fn version(&self, key: &str) -> u32 {
        self.versions.get(key).map(|entry| *entry.value()).unwrap_or(0)
    }

    /// (key count, key-with-TTL count)
    pub fn size(&self) -> (usize, usize) {
        (self.data.len(), self.expirations.len())
    }

    /// Drops every key. Expiration jobs are cancelled rather than left to fire
    /// on an empty keyspace.
    pub fn flush(&self) {
        for entry in self.expirations.iter() {
            self.wheel.remove_job(&self.expire_task_key(entry.key()));
        }
        self.data.clear();
        self.expirations.clear();
        self.versions.clear();
    }

    fn is_expired(&self, key: &str) -> bool {
        self.expirations
            .get(key)
            .map(|at| *at.value() <= Instant::now())
            .unwrap_or(false)
    }

    /// Deletion path driven by fired expiration jobs. Takes the key's write
    /// lock and re-checks the recorded deadline: a re-schedule or PERSIST that
    /// won the race must keep the key alive.
    fn delete_if_expired(&self, key: &str) {
        let _guard = self.locks.write_lock(key);
        let due = self
            .expirations
            .get(key)
            .map(|at| *at.value() <= Instant::now())
            .unwrap_or(false);
        if due {
            debug!(db = self.index, key, "key expired");
            self.remove(key);
        }
    }

    fn bump_version(&self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn expire_task_key(&self, key: &str) -> String {
        format!("expire:{}:{}", self.index, key)
    }

    fn hook(&self, slot: &HookSlot) -> Option<KeyEventCallback> {
        slot.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
