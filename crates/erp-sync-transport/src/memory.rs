//! Scripted in-memory backend.
//!
//! Behaves like the REST collection (newest rows first, server-assigned ids,
//! `404` for unknown records) and lets callers hold requests at a gate or queue
//! failures, so optimistic windows can be observed deterministically.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use erp_sync_core::{CacheKey, CacheValue, Entity, KeyShape, RecordId, Row, TransportError};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

/// One write request received by a [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    /// `POST` with the serialized payload.
    Create(Value),
    /// `PUT <id>` with the serialized patch.
    Update {
        /// Target record.
        id: RecordId,
        /// Serialized partial payload.
        patch: Value,
    },
    /// `DELETE <id>`.
    Delete {
        /// Target record.
        id: RecordId,
    },
}

struct State<E> {
    rows: Vec<Row<E>>,
    next_id: i64,
    write_failures: VecDeque<TransportError>,
    fetch_failures: VecDeque<TransportError>,
    fetches: usize,
    writes: Vec<WriteCall>,
}

/// Holds requests while closed and counts arrivals.
struct Gate {
    held: watch::Sender<bool>,
    arrived: watch::Sender<usize>,
}

impl Gate {
    fn new() -> Self {
        Self {
            held: watch::Sender::new(false),
            arrived: watch::Sender::new(0),
        }
    }

    async fn pass(&self) {
        self.arrived.send_modify(|count| *count += 1);
        let mut held = self.held.subscribe();
        // The sender lives as long as the backend, so this only errors on drop.
        if held.wait_for(|held| !*held).await.is_err() {
            debug!("Gate dropped while waiting");
        }
    }

    fn set_held(&self, value: bool) {
        self.held.send_replace(value);
    }

    async fn wait_for(&self, count: usize) {
        let mut arrived = self.arrived.subscribe();
        if arrived.wait_for(|seen| *seen >= count).await.is_err() {
            debug!("Gate dropped while waiting");
        }
    }

    fn arrivals(&self) -> usize {
        *self.arrived.borrow()
    }
}

/// In-memory stand-in for one REST collection of `E`.
pub struct MemoryBackend<E> {
    state: Mutex<State<E>>,
    write_gate: Gate,
    fetch_gate: Gate,
}

impl<E> fmt::Debug for MemoryBackend<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryBackend")
            .field("rows", &state.rows.len())
            .field("next_id", &state.next_id)
            .field("fetches", &state.fetches)
            .field("writes", &state.writes.len())
            .finish_non_exhaustive()
    }
}

impl<E> Default for MemoryBackend<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                rows: Vec::new(),
                next_id: 1,
                write_failures: VecDeque::new(),
                fetch_failures: VecDeque::new(),
                fetches: 0,
                writes: Vec::new(),
            }),
            write_gate: Gate::new(),
            fetch_gate: Gate::new(),
        }
    }
}

impl<E> MemoryBackend<E> {
    fn state(&self) -> MutexGuard<'_, State<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collection pre-populated with `rows`, in list order.
    #[must_use]
    pub fn with_rows(rows: impl IntoIterator<Item = Row<E>>) -> Self {
        let backend = Self::new();
        backend.seed(rows);
        backend
    }

    /// Replace the stored rows. New ids continue after the largest seeded id.
    pub fn seed(&self, rows: impl IntoIterator<Item = Row<E>>) {
        let mut state = self.state();
        state.rows = rows.into_iter().collect();
        let max_id = state
            .rows
            .iter()
            .filter_map(|row| row.id.assigned())
            .max()
            .unwrap_or(0);
        state.next_id = state.next_id.max(max_id + 1);
    }

    /// Make the next write fail with `error`. Failures queue in order.
    pub fn fail_next_write(&self, error: TransportError) {
        self.state().write_failures.push_back(error);
    }

    /// Make the next fetch fail with `error`. Failures queue in order.
    pub fn fail_next_fetch(&self, error: TransportError) {
        self.state().fetch_failures.push_back(error);
    }

    /// Hold every write at the gate until [`Self::release_writes`].
    pub fn hold_writes(&self) {
        self.write_gate.set_held(true);
    }

    /// Let held and future writes through.
    pub fn release_writes(&self) {
        self.write_gate.set_held(false);
    }

    /// Wait until `count` writes have reached the gate in total.
    pub async fn wait_for_writes(&self, count: usize) {
        self.write_gate.wait_for(count).await;
    }

    /// Hold every fetch at the gate until [`Self::release_fetches`].
    pub fn hold_fetches(&self) {
        self.fetch_gate.set_held(true);
    }

    /// Let held and future fetches through.
    pub fn release_fetches(&self) {
        self.fetch_gate.set_held(false);
    }

    /// Wait until `count` fetches have reached the gate in total.
    pub async fn wait_for_fetches(&self, count: usize) {
        self.fetch_gate.wait_for(count).await;
    }

    /// Number of fetches that reached the gate.
    #[must_use]
    pub fn fetch_arrivals(&self) -> usize {
        self.fetch_gate.arrivals()
    }

    /// Number of fetches answered (successfully or not).
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    /// Write requests received so far, in arrival order.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteCall> {
        self.state().writes.clone()
    }
}

impl<E: Entity> MemoryBackend<E> {
    /// Current stored rows, newest first.
    #[must_use]
    pub fn rows(&self) -> Vec<Row<E>> {
        self.state().rows.clone()
    }

    /// Answer a read for `key`.
    ///
    /// # Errors
    /// Returns the next queued fetch failure, `404` for an unknown detail
    /// record, or a network failure for keys with no REST shape.
    pub async fn fetch(&self, key: &CacheKey) -> Result<CacheValue<E>, TransportError> {
        self.fetch_gate.pass().await;
        tokio::task::yield_now().await;
        let mut state = self.state();
        state.fetches += 1;
        if let Some(error) = state.fetch_failures.pop_front() {
            debug!(%key, %error, "Scripted fetch failure");
            return Err(error);
        }
        match KeyShape::parse(key, E::RESOURCE) {
            Some(KeyShape::All) => Ok(CacheValue::List(state.rows.clone())),
            Some(KeyShape::List { search }) => Ok(CacheValue::List(
                state
                    .rows
                    .iter()
                    .filter(|row| row.data.matches_search(search))
                    .cloned()
                    .collect(),
            )),
            Some(KeyShape::Detail { id }) => state
                .rows
                .iter()
                .find(|row| row.id == id)
                .cloned()
                .map(CacheValue::Item)
                .ok_or_else(|| not_found(id)),
            None => Err(TransportError::network(format!(
                "key {key} does not address {}",
                E::RESOURCE
            ))),
        }
    }

    /// Store a new row and return it with its assigned id.
    ///
    /// # Errors
    /// Returns the next queued write failure.
    pub async fn create(&self, payload: &E) -> Result<Value, TransportError> {
        self.write_gate.pass().await;
        let mut state = self.state();
        state.writes.push(WriteCall::Create(encode(payload)?));
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        let id = RecordId::Assigned(state.next_id);
        state.next_id += 1;
        let row = Row::new(id, payload.clone());
        let response = encode(&row)?;
        state.rows.insert(0, row);
        debug!(%id, "Created row");
        Ok(response)
    }

    /// Merge `patch` into the stored row and return it.
    ///
    /// # Errors
    /// Returns the next queued write failure, or `404` for an unknown record.
    pub async fn update(&self, id: RecordId, patch: &E::Patch) -> Result<Value, TransportError> {
        self.write_gate.pass().await;
        let mut state = self.state();
        state.writes.push(WriteCall::Update {
            id,
            patch: encode(patch)?,
        });
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        let row = state
            .rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| not_found(id))?;
        row.data.apply(patch);
        encode(&*row)
    }

    /// Remove the stored row.
    ///
    /// # Errors
    /// Returns the next queued write failure, or `404` for an unknown record.
    pub async fn delete(&self, id: RecordId) -> Result<Value, TransportError> {
        self.write_gate.pass().await;
        let mut state = self.state();
        state.writes.push(WriteCall::Delete { id });
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        let position = state
            .rows
            .iter()
            .position(|row| row.id == id)
            .ok_or_else(|| not_found(id))?;
        state.rows.remove(position);
        Ok(Value::Null)
    }
}

fn not_found(id: RecordId) -> TransportError {
    TransportError::rejected_with(404, format!("record {id} not found"))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, TransportError> {
    serde_json::to_value(value)
        .map_err(|err| TransportError::network(format!("unencodable payload: {err}")))
}
