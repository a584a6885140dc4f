//! Per-key FIFO locks serialising mutations on the same cache key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use erp_sync_core::CacheKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of one async mutex per key with waiters.
///
/// Tokio mutexes are fair, so same-key mutations run in the order they asked.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

/// Exclusive hold on one key. Dropping it wakes the next waiter.
#[derive(Debug)]
pub struct KeyGuard {
    locks: Arc<KeyLocks>,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    /// Wait for exclusive access to `key`.
    pub async fn acquire(self: &Arc<Self>, key: &CacheKey) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: Arc::clone(self),
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Returns true while some task holds or waits for `key`.
    #[must_use]
    pub fn is_locked(&self, key: &CacheKey) -> bool {
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.contains_key(key)
    }

    fn forget_if_unused(&self, key: &CacheKey) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map's own handle is the only one left: nobody holds or waits.
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }
}

impl KeyGuard {
    /// Key held by this guard.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.forget_if_unused(&self.key);
    }
}
