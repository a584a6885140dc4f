//! Keyed in-memory cache shared by query bindings and mutations.
//!
//! Every operation runs to completion under one state lock. Writes that change
//! what a subscriber would see queue a delivery while that lock is still held,
//! so deliveries leave the store in exactly the order the writes were applied.
//! Listeners run after the state lock is released, one delivery at a time
//! under a separate dispatch lock, which lets them read the store freely.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use erp_sync_core::{CacheKey, CacheValue, Entity};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{CacheError, ReadError};

/// Lifecycle state of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryStatus {
    /// Nothing has been read yet.
    Absent,
    /// First read is in flight; there is no value to show.
    Fetching,
    /// Value is authoritative.
    Fresh,
    /// Value is kept for display but a refetch is due.
    Stale,
    /// The last read failed.
    Error(ReadError),
}

impl EntryStatus {
    /// Returns true for [`EntryStatus::Stale`].
    #[must_use]
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }

    /// Read error carried by [`EntryStatus::Error`].
    #[must_use]
    pub const fn error(&self) -> Option<&ReadError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Point-in-time copy of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<E> {
    /// Key of the entry.
    pub key: CacheKey,
    /// Cached value, `None` while nothing has been loaded.
    pub value: Option<CacheValue<E>>,
    /// Lifecycle state.
    pub status: EntryStatus,
    /// Last time the value or status was written.
    pub last_updated_at: Instant,
    /// True while a read for the key is in flight.
    pub is_fetching: bool,
}

/// Result of a [`EntryStore::patch`] updater.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome<E> {
    /// Write this value.
    Replace(CacheValue<E>),
    /// Leave the entry untouched.
    Unchanged,
}

/// Permission to write one read result into the store.
#[derive(Debug, PartialEq, Eq)]
pub struct FetchTicket {
    key: CacheKey,
    id: u64,
}

impl FetchTicket {
    /// Key being fetched.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }
}

/// What happened to a finished read.
#[derive(Debug, PartialEq, Eq)]
pub enum FetchFinish {
    /// The result was written.
    Applied,
    /// The fetch was cancelled by a mutation or eviction; result dropped.
    Discarded,
    /// The key was invalidated while the read ran; read again with this ticket.
    Retry(FetchTicket),
}

/// Copy of an entry's `(value, status)` taken when a mutation begins.
///
/// Only [`EntryStore::begin_mutation`] creates one, and it is consumed by
/// either [`EntryStore::restore`] or [`EntryStore::release`].
#[derive(Debug)]
#[must_use = "a snapshot must be restored or released"]
pub struct MutationSnapshot<E> {
    key: CacheKey,
    value: Option<CacheValue<E>>,
    status: EntryStatus,
    last_updated_at: Instant,
}

impl<E> MutationSnapshot<E> {
    /// Key the snapshot belongs to.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Value at snapshot time.
    #[must_use]
    pub const fn value(&self) -> Option<&CacheValue<E>> {
        self.value.as_ref()
    }

    /// Status at snapshot time.
    #[must_use]
    pub const fn status(&self) -> &EntryStatus {
        &self.status
    }
}

/// Callback invoked with the entry after every visible write to its key.
pub type Listener<E> = Arc<dyn Fn(&CacheEntry<E>) + Send + Sync>;

/// Handle returned by [`EntryStore::subscribe`]; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop receiving deliveries.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

struct Slot<E> {
    value: Option<CacheValue<E>>,
    status: EntryStatus,
    last_updated_at: Instant,
    fetch: Option<u64>,
    refetch_requested: bool,
    mutating: bool,
    listeners: Vec<(u64, Listener<E>)>,
}

impl<E: Entity> Slot<E> {
    fn new() -> Self {
        Self {
            value: None,
            status: EntryStatus::Absent,
            last_updated_at: Instant::now(),
            fetch: None,
            refetch_requested: false,
            mutating: false,
            listeners: Vec::new(),
        }
    }

    fn entry(&self, key: &CacheKey) -> CacheEntry<E> {
        CacheEntry {
            key: key.clone(),
            value: self.value.clone(),
            status: self.status.clone(),
            last_updated_at: self.last_updated_at,
            is_fetching: self.fetch.is_some(),
        }
    }

    fn has_data(&self) -> bool {
        self.value.is_some() || self.status != EntryStatus::Absent
    }

    fn is_vacant(&self) -> bool {
        !self.has_data() && self.listeners.is_empty() && self.fetch.is_none() && !self.mutating
    }

    fn delivery(&self, key: &CacheKey) -> Option<Delivery<E>> {
        if self.listeners.is_empty() {
            return None;
        }
        Some(Delivery {
            entry: self.entry(key),
            listeners: self
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect(),
        })
    }

    fn touch(&mut self) {
        self.last_updated_at = Instant::now();
    }
}

struct Delivery<E> {
    entry: CacheEntry<E>,
    listeners: Vec<Listener<E>>,
}

struct State<E> {
    slots: HashMap<CacheKey, Slot<E>>,
    next_ticket: u64,
    next_listener: u64,
}

impl<E> State<E> {
    fn ticket(&mut self, key: &CacheKey) -> FetchTicket {
        self.next_ticket += 1;
        FetchTicket {
            key: key.clone(),
            id: self.next_ticket,
        }
    }
}

/// Shared mapping from cache keys to entries.
pub struct EntryStore<E> {
    state: Mutex<State<E>>,
    outbox: Mutex<VecDeque<Delivery<E>>>,
    dispatch: Mutex<()>,
}

impl<E> fmt::Debug for EntryStore<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EntryStore")
            .field("entries", &state.slots.len())
            .finish_non_exhaustive()
    }
}

impl<E: Entity> Default for EntryStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> EntryStore<E> {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                slots: HashMap::new(),
                next_ticket: 0,
                next_listener: 0,
            }),
            outbox: Mutex::new(VecDeque::new()),
            dispatch: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outbox(&self) -> MutexGuard<'_, VecDeque<Delivery<E>>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue deliveries while the state lock is held, then release it and
    /// dispatch.
    fn commit(
        &self,
        state: MutexGuard<'_, State<E>>,
        deliveries: impl IntoIterator<Item = Delivery<E>>,
    ) {
        self.outbox().extend(deliveries);
        drop(state);
        self.flush();
    }

    fn next_delivery(&self) -> Option<Delivery<E>> {
        self.outbox().pop_front()
    }

    fn flush(&self) {
        loop {
            let guard = match self.dispatch.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                // Whoever holds the dispatch lock drains the outbox.
                Err(TryLockError::WouldBlock) => return,
            };
            while let Some(delivery) = self.next_delivery() {
                for listener in &delivery.listeners {
                    listener(&delivery.entry);
                }
            }
            drop(guard);
            if self.outbox().is_empty() {
                return;
            }
        }
    }

    /// Current entry for `key`, or `None` when nothing is cached or pending.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<E>> {
        let state = self.lock();
        state
            .slots
            .get(key)
            .filter(|slot| slot.has_data() || slot.fetch.is_some())
            .map(|slot| slot.entry(key))
    }

    /// Current value for `key`.
    #[must_use]
    pub fn value(&self, key: &CacheKey) -> Option<CacheValue<E>> {
        let state = self.lock();
        state.slots.get(key).and_then(|slot| slot.value.clone())
    }

    /// Overwrite the entry for `key`.
    pub fn set(&self, key: &CacheKey, value: CacheValue<E>, status: EntryStatus) {
        let mut state = self.lock();
        let slot = state.slots.entry(key.clone()).or_insert_with(Slot::new);
        slot.value = Some(value);
        slot.status = status;
        slot.touch();
        let delivery = slot.delivery(key);
        self.commit(state, delivery);
    }

    /// Rewrite the value for `key` through `updater`.
    ///
    /// The updater sees the current value (or `None`) and runs under the store
    /// lock, so it must not call back into the store. A replacement clears an
    /// error status. Returns true when the value was replaced.
    pub fn patch<F>(&self, key: &CacheKey, updater: F) -> bool
    where
        F: FnOnce(Option<&CacheValue<E>>) -> PatchOutcome<E>,
    {
        let mut state = self.lock();
        let current = state.slots.get(key).and_then(|slot| slot.value.as_ref());
        let PatchOutcome::Replace(value) = updater(current) else {
            return false;
        };
        let slot = state.slots.entry(key.clone()).or_insert_with(Slot::new);
        slot.value = Some(value);
        if matches!(
            slot.status,
            EntryStatus::Absent | EntryStatus::Fetching | EntryStatus::Error(_)
        ) {
            slot.status = EntryStatus::Fresh;
        }
        slot.touch();
        let delivery = slot.delivery(key);
        self.commit(state, delivery);
        true
    }

    /// Mark every entry under `prefix` stale, keeping its value.
    ///
    /// A failed entry becomes stale too; the next read records a new error if
    /// it fails again.
    ///
    /// Entries with a read in flight are flagged so the running read retries
    /// instead of writing a result that predates the invalidation. Returns the
    /// matched keys.
    pub fn invalidate(&self, prefix: &CacheKey) -> Vec<CacheKey> {
        let mut state = self.lock();
        let mut matched = Vec::new();
        let mut deliveries = Vec::new();
        for (key, slot) in &mut state.slots {
            if !key.starts_with(prefix) {
                continue;
            }
            if slot.fetch.is_some() {
                slot.refetch_requested = true;
            }
            if matches!(slot.status, EntryStatus::Fresh | EntryStatus::Error(_)) {
                slot.status = EntryStatus::Stale;
                deliveries.extend(slot.delivery(key));
            }
            matched.push(key.clone());
        }
        debug!(%prefix, matched = matched.len(), "Invalidated");
        self.commit(state, deliveries);
        matched
    }

    /// Drop the cached value for `key`. Subscribers observe an absent entry.
    pub fn remove(&self, key: &CacheKey) {
        let mut state = self.lock();
        let Some(slot) = state.slots.get_mut(key) else {
            return;
        };
        slot.value = None;
        slot.status = EntryStatus::Absent;
        slot.touch();
        let delivery = slot.delivery(key);
        if slot.is_vacant() {
            state.slots.remove(key);
        }
        self.commit(state, delivery);
    }

    /// Returns true when at least one listener is attached to `key`.
    #[must_use]
    pub fn has_subscribers(&self, key: &CacheKey) -> bool {
        let state = self.lock();
        state
            .slots
            .get(key)
            .is_some_and(|slot| !slot.listeners.is_empty())
    }

    /// Keys currently held, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        let state = self.lock();
        state.slots.keys().cloned().collect()
    }

    /// Claim the right to read `key`.
    ///
    /// Returns `None` when a read is already running (join it) or a mutation
    /// owns the key (its settle step refetches).
    pub fn begin_fetch(&self, key: &CacheKey) -> Option<FetchTicket> {
        let mut state = self.lock();
        let ticket = state.ticket(key);
        let slot = state.slots.entry(key.clone()).or_insert_with(Slot::new);
        if slot.mutating || slot.fetch.is_some() {
            trace!(%key, mutating = slot.mutating, "Joining existing work");
            return None;
        }
        slot.fetch = Some(ticket.id);
        slot.refetch_requested = false;
        if slot.status == EntryStatus::Absent {
            slot.status = EntryStatus::Fetching;
        }
        let delivery = slot.delivery(key);
        self.commit(state, delivery);
        Some(ticket)
    }

    /// Write the result of the read identified by `ticket`.
    pub fn finish_fetch(
        &self,
        ticket: FetchTicket,
        result: Result<CacheValue<E>, ReadError>,
    ) -> FetchFinish {
        let mut state = self.lock();
        let key = ticket.key;
        let retry = state.ticket(&key);
        let Some(slot) = state
            .slots
            .get_mut(&key)
            .filter(|slot| slot.fetch == Some(ticket.id))
        else {
            trace!(%key, "Discarding cancelled read");
            return FetchFinish::Discarded;
        };
        if slot.refetch_requested {
            slot.refetch_requested = false;
            slot.fetch = Some(retry.id);
            trace!(%key, "Read overtaken by invalidation");
            return FetchFinish::Retry(retry);
        }
        slot.fetch = None;
        match result {
            Ok(value) => {
                slot.value = Some(value);
                slot.status = EntryStatus::Fresh;
                slot.touch();
            }
            Err(err) => {
                debug!(%key, error = %err, "Read failed");
                slot.status = EntryStatus::Error(err);
                slot.touch();
            }
        }
        let delivery = slot.delivery(&key);
        self.commit(state, delivery);
        FetchFinish::Applied
    }

    /// Take the snapshot for a mutation on `key`, cancelling any read in
    /// flight for it.
    ///
    /// # Errors
    /// Returns [`CacheError::SnapshotHeld`] when another mutation holds `key`.
    pub fn begin_mutation(&self, key: &CacheKey) -> Result<MutationSnapshot<E>, CacheError> {
        let mut state = self.lock();
        let slot = state.slots.entry(key.clone()).or_insert_with(Slot::new);
        if slot.mutating {
            return Err(CacheError::SnapshotHeld(key.clone()));
        }
        let mut deliveries = None;
        if slot.fetch.take().is_some() {
            slot.refetch_requested = false;
            if slot.status == EntryStatus::Fetching {
                slot.status = EntryStatus::Absent;
            }
            deliveries = slot.delivery(key);
        }
        slot.mutating = true;
        let snapshot = MutationSnapshot {
            key: key.clone(),
            value: slot.value.clone(),
            status: slot.status.clone(),
            last_updated_at: slot.last_updated_at,
        };
        self.commit(state, deliveries);
        Ok(snapshot)
    }

    /// Put the snapshot's value and status back and end the mutation.
    pub fn restore(&self, snapshot: MutationSnapshot<E>) {
        let mut state = self.lock();
        let MutationSnapshot {
            key,
            value,
            status,
            last_updated_at,
        } = snapshot;
        let slot = state.slots.entry(key.clone()).or_insert_with(Slot::new);
        slot.value = value;
        slot.status = status;
        slot.last_updated_at = last_updated_at;
        slot.mutating = false;
        let delivery = slot.delivery(&key);
        if slot.is_vacant() {
            state.slots.remove(&key);
        }
        self.commit(state, delivery);
    }

    /// Discard the snapshot and end the mutation, keeping the current value.
    pub fn release(&self, snapshot: MutationSnapshot<E>) {
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(&snapshot.key) {
            slot.mutating = false;
            if slot.is_vacant() {
                state.slots.remove(&snapshot.key);
            }
        }
    }

    /// Attach `listener` to `key`.
    ///
    /// Returns the entry as it is now together with the subscription handle;
    /// the listener then sees every later visible write, in order.
    pub fn subscribe<F>(self: &Arc<Self>, key: &CacheKey, listener: F) -> (CacheEntry<E>, Subscription)
    where
        F: Fn(&CacheEntry<E>) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        state.next_listener += 1;
        let id = state.next_listener;
        let slot = state.slots.entry(key.clone()).or_insert_with(Slot::new);
        slot.listeners.push((id, Arc::new(listener)));
        let entry = slot.entry(key);
        drop(state);
        trace!(%key, id, "Subscribed");

        let store = Arc::downgrade(self);
        let key = key.clone();
        let subscription = Subscription::new(move || {
            if let Some(store) = store.upgrade() {
                store.unsubscribe(&key, id);
            }
        });
        (entry, subscription)
    }

    fn unsubscribe(&self, key: &CacheKey, id: u64) {
        let mut state = self.lock();
        if let Some(slot) = state.slots.get_mut(key) {
            slot.listeners.retain(|(listener, _)| *listener != id);
            if slot.is_vacant() {
                state.slots.remove(key);
            }
        }
        trace!(%key, id, "Unsubscribed");
    }

    /// Remove unobserved entries not written for at least `max_idle`.
    ///
    /// Entries with listeners, a read in flight, or an active mutation stay.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<CacheKey> {
        let mut state = self.lock();
        let now = Instant::now();
        let evicted: Vec<CacheKey> = state
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.listeners.is_empty()
                    && slot.fetch.is_none()
                    && !slot.mutating
                    && now.saturating_duration_since(slot.last_updated_at) >= max_idle
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &evicted {
            state.slots.remove(key);
        }
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "Evicted idle entries");
        }
        evicted
    }

    /// Drop every cached value and cancel reads in flight.
    ///
    /// Subscribed keys stay registered and observe an absent entry.
    pub fn clear(&self) {
        let mut state = self.lock();
        let mut deliveries = Vec::new();
        for (key, slot) in &mut state.slots {
            slot.value = None;
            slot.status = EntryStatus::Absent;
            slot.fetch = None;
            slot.refetch_requested = false;
            slot.touch();
            deliveries.extend(slot.delivery(key));
        }
        state.slots.retain(|_, slot| !slot.is_vacant());
        debug!("Cleared entry store");
        self.commit(state, deliveries);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use super::*;
    use erp_sync_core::{PlanningSchedule, RecordId, ResourceKeys, Row};

    fn rows(qtys: &[i64]) -> CacheValue<PlanningSchedule> {
        CacheValue::List(
            qtys.iter()
                .zip(1..)
                .map(|(qty, id)| Row::new(RecordId::Assigned(id), PlanningSchedule::new("A1", *qty)))
                .collect(),
        )
    }

    fn list_key() -> CacheKey {
        ResourceKeys::of::<PlanningSchedule>().list("")
    }

    #[test]
    fn invalidate_keeps_value_visible() {
        let store = EntryStore::new();
        let key = list_key();
        store.set(&key, rows(&[5]), EntryStatus::Fresh);
        let detail = ResourceKeys::of::<PlanningSchedule>().detail(RecordId::Assigned(1));
        store.set(&detail, rows(&[5]), EntryStatus::Fresh);

        let mut matched = store.invalidate(&ResourceKeys::of::<PlanningSchedule>().all());
        matched.sort();
        assert_eq!(matched.len(), 2);
        let entry = store.get(&key).unwrap();
        assert_eq!(entry.status, EntryStatus::Stale);
        assert_eq!(entry.value, Some(rows(&[5])));
    }

    #[test]
    fn invalidate_during_read_requests_retry() {
        let store = EntryStore::new();
        let key = list_key();
        let ticket = store.begin_fetch(&key).unwrap();
        assert_eq!(store.get(&key).unwrap().status, EntryStatus::Fetching);
        assert!(store.begin_fetch(&key).is_none(), "second read joins the first");

        store.invalidate(&key);
        let FetchFinish::Retry(retry) = store.finish_fetch(ticket, Ok(rows(&[1]))) else {
            panic!("invalidated read must retry");
        };
        assert_eq!(store.value(&key), None);
        assert_eq!(store.finish_fetch(retry, Ok(rows(&[2]))), FetchFinish::Applied);
        let entry = store.get(&key).unwrap();
        assert_eq!(entry.status, EntryStatus::Fresh);
        assert_eq!(entry.value, Some(rows(&[2])));
        assert!(!entry.is_fetching);
    }

    #[test]
    fn read_failure_keeps_value_and_records_error() {
        let store = EntryStore::new();
        let key = list_key();
        store.set(&key, rows(&[5]), EntryStatus::Stale);
        let ticket = store.begin_fetch(&key).unwrap();
        store.finish_fetch(ticket, Err(ReadError::new(Some(500), "boom")));
        let entry = store.get(&key).unwrap();
        assert_eq!(entry.value, Some(rows(&[5])));
        assert_eq!(entry.status.error().map(|err| err.message.as_str()), Some("boom"));

        let replaced = store.patch(&key, |_| PatchOutcome::Replace(rows(&[6])));
        assert!(replaced);
        assert_eq!(store.get(&key).unwrap().status, EntryStatus::Fresh);
    }

    #[test]
    fn invalidate_turns_failed_entry_stale() {
        let store = EntryStore::new();
        let key = list_key();
        store.set(&key, rows(&[5]), EntryStatus::Stale);
        let ticket = store.begin_fetch(&key).unwrap();
        store.finish_fetch(ticket, Err(ReadError::new(Some(502), "gateway down")));
        assert!(store.get(&key).unwrap().status.error().is_some());

        assert_eq!(store.invalidate(&key), vec![key.clone()]);
        let entry = store.get(&key).unwrap();
        assert_eq!(entry.status, EntryStatus::Stale);
        assert_eq!(entry.value, Some(rows(&[5])));
    }

    #[test]
    fn mutation_cancels_read_and_holds_single_snapshot() {
        let store = EntryStore::new();
        let key = list_key();
        store.set(&key, rows(&[5]), EntryStatus::Fresh);
        store.invalidate(&key);
        let ticket = store.begin_fetch(&key).unwrap();

        let snapshot = store.begin_mutation(&key).unwrap();
        assert_eq!(
            store.begin_mutation(&key).unwrap_err(),
            CacheError::SnapshotHeld(key.clone())
        );
        assert!(store.begin_fetch(&key).is_none());
        assert_eq!(store.finish_fetch(ticket, Ok(rows(&[1]))), FetchFinish::Discarded);

        store.patch(&key, |_| PatchOutcome::Replace(rows(&[9])));
        store.restore(snapshot);
        let entry = store.get(&key).unwrap();
        assert_eq!(entry.value, Some(rows(&[5])));
        assert_eq!(entry.status, EntryStatus::Stale);
        assert!(store.begin_mutation(&key).is_ok());
    }

    #[test]
    fn restoring_absent_entry_removes_it() {
        let store = EntryStore::new();
        let key = list_key();
        let snapshot = store.begin_mutation(&key).unwrap();
        store.set(&key, rows(&[1]), EntryStatus::Fresh);
        store.restore(snapshot);
        assert!(store.get(&key).is_none());
        assert!(store.keys().is_empty());
    }

    #[test]
    fn listeners_observe_writes_in_order() {
        let store = Arc::new(EntryStore::new());
        let key = list_key();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (initial, subscription) = store.subscribe(&key, {
            let seen = Arc::clone(&seen);
            move |entry: &CacheEntry<PlanningSchedule>| {
                seen.lock().unwrap().push(entry.status.clone());
            }
        });
        assert_eq!(initial.status, EntryStatus::Absent);

        store.set(&key, rows(&[1]), EntryStatus::Fresh);
        store.invalidate(&key);
        store.remove(&key);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![EntryStatus::Fresh, EntryStatus::Stale, EntryStatus::Absent]
        );

        drop(subscription);
        store.set(&key, rows(&[2]), EntryStatus::Fresh);
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(!store.has_subscribers(&key));
    }

    #[test]
    fn listeners_may_read_and_write_the_store() {
        let store = Arc::new(EntryStore::new());
        let key = list_key();
        let other = ResourceKeys::of::<PlanningSchedule>().list("mirror");
        let (_, _subscription) = store.subscribe(&key, {
            let store = Arc::downgrade(&store);
            let other = other.clone();
            move |entry: &CacheEntry<PlanningSchedule>| {
                let Some(store) = store.upgrade() else { return };
                let current = store.get(&entry.key).and_then(|entry| entry.value);
                if let Some(value) = current {
                    store.set(&other, value, EntryStatus::Fresh);
                }
            }
        });
        store.set(&key, rows(&[4]), EntryStatus::Fresh);
        assert_eq!(store.value(&other), Some(rows(&[4])));
    }

    #[test]
    fn eviction_skips_observed_entries() {
        let store = Arc::new(EntryStore::new());
        let watched = list_key();
        let idle = ResourceKeys::of::<PlanningSchedule>().list("old");
        store.set(&watched, rows(&[1]), EntryStatus::Fresh);
        store.set(&idle, rows(&[2]), EntryStatus::Fresh);
        let (_, _subscription) = store.subscribe(&watched, |_: &CacheEntry<PlanningSchedule>| {});

        assert!(store.evict_idle(Duration::from_secs(3600)).is_empty());
        assert_eq!(store.evict_idle(Duration::ZERO), vec![idle.clone()]);
        assert!(store.get(&idle).is_none());
        assert!(store.get(&watched).is_some());
    }

    #[test]
    fn clear_resets_subscribed_entries() {
        let store = Arc::new(EntryStore::new());
        let key = list_key();
        store.set(&key, rows(&[1]), EntryStatus::Fresh);
        let (_, _subscription) = store.subscribe(&key, |_: &CacheEntry<PlanningSchedule>| {});
        store.set(&ResourceKeys::new("schedules").all(), rows(&[1]), EntryStatus::Fresh);
        store.clear();
        assert_eq!(store.keys(), vec![key.clone()]);
        assert!(store.get(&key).is_none());
    }
}
