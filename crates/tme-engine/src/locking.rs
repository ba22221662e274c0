//! Per-id locking: writes to a single memory id are serialised through a
//! sharded async mutex map; multi-id operations acquire locks in
//! lexicographic `id` order to avoid deadlock.
//!
//! Grounded on the corpus's in-flight-request tracking idiom
//! (`DashMap<String, Arc<Mutex<()>>>` plus an RAII cleanup guard, seen in
//! `cache_manager.rs`), adapted here to guard writes rather than dedupe
//! concurrent reads.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Holds the lock for a single memory id for as long as the guard lives.
pub struct IdLockGuard {
    _guard: OwnedMutexGuard<()>,
}

/// An id-sharded lock map. One [`Mutex`] per memory id that has ever been
/// locked; entries are lazily created and periodically swept once nothing
/// references them.
pub struct IdLockMap {
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl IdLockMap {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    fn entry(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquire the lock for a single id.
    pub async fn lock_one(&self, id: Uuid) -> IdLockGuard {
        let mutex = self.entry(id);
        let guard = mutex.lock_owned().await;
        IdLockGuard { _guard: guard }
    }

    /// Acquire locks for several ids at once, sorted lexicographically
    /// first, so that no two callers can deadlock by acquiring the same
    /// pair of locks in opposite order.
    pub async fn lock_many(&self, ids: &[Uuid]) -> Vec<IdLockGuard> {
        let mut sorted: Vec<Uuid> = ids.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.lock_one(id).await);
        }
        guards
    }

    /// Drop lock-map entries that nothing currently references. Safe to
    /// call at any time; a benign race can recreate an entry concurrently,
    /// which is fine since the map only bounds resident memory, it is not
    /// itself a correctness invariant.
    pub fn sweep_unused(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn tracked_ids(&self) -> usize {
        self.locks.len()
    }
}

impl Default for IdLockMap {
    fn default() -> Self {
        Self::new()
    }
}
