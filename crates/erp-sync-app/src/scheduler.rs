//! Invalidation and background refetch.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use erp_sync_core::{CacheKey, Entity};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::entry_store::{EntryStore, FetchFinish, FetchTicket};
use crate::error::ReadError;

/// Marks key families stale and refreshes the ones somebody is watching.
pub struct RefetchScheduler<E> {
    store: Arc<EntryStore<E>>,
    backend: Arc<dyn Backend<E>>,
}

impl<E> Clone for RefetchScheduler<E> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<E> fmt::Debug for RefetchScheduler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefetchScheduler").finish_non_exhaustive()
    }
}

impl<E: Entity> RefetchScheduler<E> {
    /// Scheduler reading through `backend` into `store`.
    pub fn new(store: Arc<EntryStore<E>>, backend: Arc<dyn Backend<E>>) -> Self {
        Self { store, backend }
    }

    /// Start a background read of `key`, or join the one already running.
    ///
    /// Returns the task handle when a new read was started. Read failures are
    /// recorded on the entry.
    pub fn refetch(&self, key: &CacheKey) -> Option<JoinHandle<()>> {
        let ticket = self.store.begin_fetch(key)?;
        let Ok(runtime) = Handle::try_current() else {
            warn!(%key, "No async runtime available, refetch skipped");
            self.store.finish_fetch(
                ticket,
                Err(ReadError::new(None, "no async runtime available for refetch")),
            );
            return None;
        };
        debug!(%key, "Refetch scheduled");
        Some(runtime.spawn(read_until_current(
            Arc::clone(&self.store),
            Arc::clone(&self.backend),
            ticket,
        )))
    }

    /// Invalidate every key under `prefix` and refetch the subscribed ones.
    pub fn invalidate(&self, prefix: &CacheKey) -> Vec<CacheKey> {
        let matched = self.store.invalidate(prefix);
        for key in &matched {
            if self.store.has_subscribers(key) {
                self.refetch(key);
            }
        }
        matched
    }

    /// Settle-time reconciliation for a finished mutation.
    ///
    /// Runs for success and failure alike and never touches the mutation's
    /// outcome. Returns the handles of the reads it started.
    pub fn on_settled(&self, targets: &[CacheKey]) -> Vec<JoinHandle<()>> {
        let mut seen = HashSet::new();
        let mut matched = Vec::new();
        for target in targets {
            for key in self.store.invalidate(target) {
                if seen.insert(key.clone()) {
                    matched.push(key);
                }
            }
        }
        // Refetch only after every family is stale, so no read is overtaken
        // by this settle's own invalidations.
        let started: Vec<_> = matched
            .iter()
            .filter(|key| self.store.has_subscribers(key))
            .filter_map(|key| self.refetch(key))
            .collect();
        debug!(targets = targets.len(), refetches = started.len(), "Settled");
        started
    }
}

async fn read_until_current<E: Entity>(
    store: Arc<EntryStore<E>>,
    backend: Arc<dyn Backend<E>>,
    mut ticket: FetchTicket,
) {
    loop {
        let key = ticket.key().clone();
        let result = backend.fetch(&key).await.map_err(|err| {
            warn!(%key, error = %err, "Refetch failed");
            ReadError::from(err)
        });
        match store.finish_fetch(ticket, result) {
            FetchFinish::Retry(next) => ticket = next,
            FetchFinish::Applied | FetchFinish::Discarded => return,
        }
    }
}
