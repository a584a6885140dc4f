//! Read-side binding of one cache key to a consuming view.

use std::sync::Arc;

use erp_sync_core::{CacheKey, CacheValue, Entity};
use tokio::sync::mpsc;

use crate::entry_store::{CacheEntry, EntryStatus, EntryStore, Subscription};
use crate::error::ReadError;

/// What a view renders for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<E> {
    /// Key being observed.
    pub key: CacheKey,
    /// Cached value, possibly stale or optimistic.
    pub data: Option<CacheValue<E>>,
    /// A read is running and there is nothing to show yet.
    pub is_loading: bool,
    /// A read is running.
    pub is_fetching: bool,
    /// The shown value is awaiting a refetch.
    pub is_stale: bool,
    /// Error of the last read, if it failed.
    pub error: Option<ReadError>,
}

impl<E: Entity> From<&CacheEntry<E>> for QueryState<E> {
    fn from(entry: &CacheEntry<E>) -> Self {
        let is_fetching = entry.is_fetching;
        Self {
            key: entry.key.clone(),
            data: entry.value.clone(),
            is_loading: entry.value.is_none()
                && (is_fetching || entry.status == EntryStatus::Fetching),
            is_fetching,
            is_stale: entry.status.is_stale(),
            error: entry.status.error().cloned(),
        }
    }
}

/// Live view of one key.
///
/// Holds the latest state and queues every later write in order. Dropping the
/// binding unsubscribes; mutations in flight are not affected.
#[derive(Debug)]
pub struct QueryBinding<E> {
    current: QueryState<E>,
    updates: mpsc::UnboundedReceiver<QueryState<E>>,
    _subscription: Subscription,
}

impl<E: Entity> QueryBinding<E> {
    /// Subscribe to `key` in `store`.
    pub fn bind(store: &Arc<EntryStore<E>>, key: &CacheKey) -> Self {
        let (sender, updates) = mpsc::unbounded_channel();
        let (entry, subscription) = store.subscribe(key, move |entry: &CacheEntry<E>| {
            // A closed channel means the binding is being dropped.
            let _ = sender.send(QueryState::from(entry));
        });
        Self {
            current: QueryState::from(&entry),
            updates,
            _subscription: subscription,
        }
    }

    /// Key being observed.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.current.key
    }

    /// Latest state received.
    #[must_use]
    pub const fn state(&self) -> &QueryState<E> {
        &self.current
    }

    /// Latest value received.
    #[must_use]
    pub const fn data(&self) -> Option<&CacheValue<E>> {
        self.current.data.as_ref()
    }

    /// Apply every queued update and return the latest state.
    pub fn drain(&mut self) -> &QueryState<E> {
        while let Ok(next) = self.updates.try_recv() {
            self.current = next;
        }
        &self.current
    }

    async fn advance(&mut self) -> bool {
        match self.updates.recv().await {
            Some(next) => {
                self.current = next;
                true
            }
            None => false,
        }
    }

    /// Wait for the next write to the key.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<&QueryState<E>> {
        if self.advance().await {
            Some(&self.current)
        } else {
            None
        }
    }

    /// Wait until the state satisfies `predicate`, checking the current state
    /// first.
    pub async fn wait_until<F>(&mut self, mut predicate: F) -> Option<&QueryState<E>>
    where
        F: FnMut(&QueryState<E>) -> bool,
    {
        self.drain();
        loop {
            if predicate(&self.current) {
                return Some(&self.current);
            }
            if !self.advance().await {
                return None;
            }
        }
    }
}
