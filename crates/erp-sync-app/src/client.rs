//! Session-scoped cache façade handed to views.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use erp_sync_core::{CacheKey, CacheValue, Entity, ResourceKeys, TemporaryIds};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::CacheOptions;
use crate::entry_store::{EntryStatus, EntryStore};
use crate::error::ReadError;
use crate::key_lock::KeyLocks;
use crate::mutation::MutationHandle;
use crate::notify::{SettleNotifier, TracingNotifier};
use crate::query::QueryBinding;
use crate::scheduler::RefetchScheduler;

pub(crate) struct Shared<E> {
    pub(crate) keys: ResourceKeys,
    pub(crate) store: Arc<EntryStore<E>>,
    pub(crate) scheduler: RefetchScheduler<E>,
    pub(crate) backend: Arc<dyn Backend<E>>,
    pub(crate) locks: Arc<KeyLocks>,
    pub(crate) temporary_ids: TemporaryIds,
    pub(crate) options: CacheOptions,
    pub(crate) notifier: Arc<dyn SettleNotifier>,
}

/// Cache of one entity type, created at session start and dropped at logout.
///
/// Cloning is cheap; every clone shares the same entries.
pub struct QueryClient<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for QueryClient<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E> fmt::Debug for QueryClient<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("store", &self.shared.store)
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

impl<E: Entity> QueryClient<E> {
    /// Client reporting settles through `tracing`.
    pub fn new(backend: impl Backend<E> + 'static, options: CacheOptions) -> Self {
        Self::with_notifier(backend, options, TracingNotifier)
    }

    /// Client reporting settles to `notifier`.
    pub fn with_notifier(
        backend: impl Backend<E> + 'static,
        options: CacheOptions,
        notifier: impl SettleNotifier + 'static,
    ) -> Self {
        let store = Arc::new(EntryStore::new());
        let backend: Arc<dyn Backend<E>> = Arc::new(backend);
        let scheduler = RefetchScheduler::new(Arc::clone(&store), Arc::clone(&backend));
        Self {
            shared: Arc::new(Shared {
                keys: ResourceKeys::of::<E>(),
                store,
                scheduler,
                backend,
                locks: Arc::new(KeyLocks::default()),
                temporary_ids: TemporaryIds::default(),
                options,
                notifier: Arc::new(notifier),
            }),
        }
    }

    /// Underlying entry store.
    #[must_use]
    pub fn store(&self) -> &Arc<EntryStore<E>> {
        &self.shared.store
    }

    /// Cache options in effect.
    #[must_use]
    pub fn options(&self) -> &CacheOptions {
        &self.shared.options
    }

    /// Key family of `E`.
    #[must_use]
    pub fn keys(&self) -> &ResourceKeys {
        &self.shared.keys
    }

    /// Bind a view to `key`.
    ///
    /// The binding starts with the entry as it is now. A read is started when
    /// the entry is missing, stale, failed, or older than the stale time.
    #[must_use]
    pub fn query(&self, key: &CacheKey) -> QueryBinding<E> {
        let binding = QueryBinding::bind(&self.shared.store, key);
        if self.needs_fetch(key) {
            self.shared.scheduler.refetch(key);
        }
        binding
    }

    fn needs_fetch(&self, key: &CacheKey) -> bool {
        let Some(entry) = self.shared.store.get(key) else {
            return true;
        };
        match entry.status {
            EntryStatus::Fresh => entry.last_updated_at.elapsed() >= self.shared.options.stale_time,
            EntryStatus::Fetching => false,
            EntryStatus::Absent | EntryStatus::Stale | EntryStatus::Error(_) => !entry.is_fetching,
        }
    }

    /// Bind to `key` and wait for a settled read.
    ///
    /// # Errors
    /// Returns the read error recorded on the entry, or an error when the
    /// client is dropped while waiting.
    pub async fn read(&self, key: &CacheKey) -> Result<CacheValue<E>, ReadError> {
        let mut binding = self.query(key);
        let state = binding
            .wait_until(|state| {
                !state.is_fetching && (state.data.is_some() || state.error.is_some())
            })
            .await
            .ok_or_else(|| ReadError::new(None, "cache was dropped while reading"))?;
        if let Some(err) = &state.error {
            return Err(err.clone());
        }
        state
            .data
            .clone()
            .ok_or_else(|| ReadError::new(None, "read finished without data"))
    }

    /// Mutation entry point bound to `key`.
    #[must_use]
    pub fn mutation(&self, key: &CacheKey) -> MutationHandle<E> {
        MutationHandle::new(Arc::clone(&self.shared), key)
    }

    /// Mark every key under `prefix` stale and refetch the observed ones.
    pub fn invalidate(&self, prefix: &CacheKey) -> Vec<CacheKey> {
        self.shared.scheduler.invalidate(prefix)
    }

    /// Evict entries idle for longer than the configured `gc_time`.
    pub fn evict_idle(&self) -> Vec<CacheKey> {
        self.shared.store.evict_idle(self.shared.options.gc_time)
    }

    /// Run [`Self::evict_idle`] every `period` until the client is dropped.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn spawn_eviction(&self, period: Duration) -> JoinHandle<()> {
        let shared: Weak<Shared<E>> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    debug!("Client dropped, eviction stopped");
                    return;
                };
                shared.store.evict_idle(shared.options.gc_time);
            }
        })
    }

    /// Drop every cached entry, e.g. at logout.
    pub fn clear(&self) {
        info!(resource = E::RESOURCE, "Clearing cache");
        self.shared.store.clear();
    }
}
