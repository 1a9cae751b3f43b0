use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const STRIPE_COUNT: usize = 1024;

/// Striped per-key read/write locks.
///
/// Keys map to a fixed pool of rwlock stripes by hash. Multi-key acquisition
/// deduplicates stripe indices and locks them in ascending index order, which
/// is a total order shared by every caller, so two transactions can never
/// acquire overlapping stripes in opposite orders and deadlock.
///
/// These locks guard *logical* access to keys; the physical maps underneath
/// are independently thread-safe.
pub struct LockMap {
    stripes: Vec<RwLock<()>>,
}

/// RAII set of held stripe locks, released in reverse acquisition order on
/// drop.
pub struct LockGuards<'a> {
    guards: Vec<StripeGuard<'a>>,
}

enum StripeGuard<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

impl LockMap {
    pub fn new() -> LockMap {
        LockMap {
            stripes: (0..STRIPE_COUNT).map(|_| RwLock::new(())).collect(),
        }
    }

    fn stripe_index(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.stripes.len()
    }

    /// Acquires write locks for `write_keys` and read locks for `read_keys`,
    /// blocking until all are held. When a write key and a read key collide on
    /// the same stripe, the write lock wins.
    pub fn rw_locks<'a, 'k>(
        &'a self,
        write_keys: impl IntoIterator<Item = &'k str>,
        read_keys: impl IntoIterator<Item = &'k str>,
    ) -> LockGuards<'a> {
        let write_stripes: BTreeSet<usize> = write_keys
            .into_iter()
            .map(|key| self.stripe_index(key))
            .collect();
        let all_stripes: BTreeSet<usize> = read_keys
            .into_iter()
            .map(|key| self.stripe_index(key))
            .chain(write_stripes.iter().copied())
            .collect();

        // BTreeSet iteration is ascending, which is the global lock order.
        let guards = all_stripes
            .into_iter()
            .map(|index| {
                if write_stripes.contains(&index) {
                    StripeGuard::Write(self.stripes[index].write().unwrap_or_else(|e| e.into_inner()))
                } else {
                    StripeGuard::Read(self.stripes[index].read().unwrap_or_else(|e| e.into_inner()))
                }
            })
            .collect();

        LockGuards { guards }
    }

    /// Exclusive lock on a single key's stripe.
    pub fn write_lock<'a>(&'a self, key: &str) -> LockGuards<'a> {
        let index = self.stripe_index(key);
        let guard = self.stripes[index].write().unwrap_or_else(|e| e.into_inner());
        LockGuards {
            guards: vec![StripeGuard::Write(guard)],
        }
    }
}

impl Default for LockMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockGuards<'_> {
    fn drop(&mut self) {
        // Release in reverse acquisition order.
        while self.guards.pop().is_some() {}
    }
}
