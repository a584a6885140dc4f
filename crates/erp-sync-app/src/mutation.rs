//! Optimistic mutation coordinator.
//!
//! One run takes a mutation through
//! `Idle → Snapshotting → OptimisticallyApplied → Committed | RolledBack → Settled`:
//! it waits for the per-key lock, snapshots the bound entry, writes the
//! speculative value, awaits the backend, restores the snapshot on failure,
//! and finally invalidates the affected key families. The run happens on a
//! spawned task, so a caller that stops waiting never leaves an optimistic
//! value without an owner.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use erp_sync_core::{CacheKey, CacheValue, Entity, MutationId, RecordId, TransportError};
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::Shared;
use crate::entry_store::PatchOutcome;
use crate::error::CacheError;
use crate::notify::{SettleNotice, SettleOutcome};
use crate::optimistic::{OptimisticCreate, apply_create, apply_delete, apply_update};

/// Message shown when the backend gives no reason for a failure.
pub const DEFAULT_FAILURE_MESSAGE: &str = "The request could not be completed. Please try again.";

/// Write requested by a view.
#[derive(Debug, Clone)]
pub enum MutationOp<E: Entity> {
    /// `POST` a new record.
    Create {
        /// Full record payload.
        payload: E,
    },
    /// `PUT` a partial update.
    Update {
        /// Record to change.
        target: RecordId,
        /// Fields to change.
        patch: E::Patch,
    },
    /// `DELETE` a record.
    Delete {
        /// Record to remove.
        target: RecordId,
    },
}

impl<E: Entity> MutationOp<E> {
    /// Create operation.
    pub const fn create(payload: E) -> Self {
        Self::Create { payload }
    }

    /// Update operation.
    pub const fn update(target: RecordId, patch: E::Patch) -> Self {
        Self::Update { target, patch }
    }

    /// Delete operation.
    #[must_use]
    pub const fn delete(target: RecordId) -> Self {
        Self::Delete { target }
    }

    /// Operation kind.
    #[must_use]
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::Create { .. } => MutationKind::Create,
            Self::Update { .. } => MutationKind::Update,
            Self::Delete { .. } => MutationKind::Delete,
        }
    }

    fn speculate(
        &self,
        current: Option<&CacheValue<E>>,
        temporary_id: Option<RecordId>,
        policy: OptimisticCreate,
    ) -> PatchOutcome<E> {
        match self {
            Self::Create { payload } => temporary_id.map_or(PatchOutcome::Unchanged, |id| {
                apply_create(current, id, payload, policy)
            }),
            Self::Update { target, patch } => apply_update(current, *target, patch),
            Self::Delete { target } => apply_delete(current, *target),
        }
    }
}

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    /// Create.
    Create,
    /// Update.
    Update,
    /// Delete.
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Lifecycle phase of one mutation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// Waiting for the key.
    Idle,
    /// Copying the entry.
    Snapshotting,
    /// Speculative value written; request in flight.
    OptimisticallyApplied,
    /// Backend accepted the write.
    Committed,
    /// Backend refused or the request failed; snapshot restored.
    RolledBack,
    /// Bookkeeping discarded; terminal.
    Settled,
}

impl fmt::Display for MutationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Snapshotting => "snapshotting",
            Self::OptimisticallyApplied => "optimistically-applied",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
            Self::Settled => "settled",
        })
    }
}

/// Whether the speculative step changed the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimisticEffect {
    /// The bound entry was rewritten.
    Applied,
    /// Nothing matched; the refetch after settle shows the real state.
    NoOp,
}

/// Successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    /// Mutation identifier.
    pub mutation: MutationId,
    /// Operation kind.
    pub kind: MutationKind,
    /// Whether the cache showed the change before the server confirmed it.
    pub effect: OptimisticEffect,
    /// Identifier of the optimistic row, for creates that prepended one.
    pub temporary_id: Option<RecordId>,
    /// Server response body. It is never merged into the cache.
    pub response: Value,
}

/// Failed mutation. The cache has already been rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MutationError {
    /// The request did not complete (connection, timeout, bad body).
    #[error("{message}")]
    NetworkFailure {
        /// Mutation identifier.
        mutation: MutationId,
        /// User-visible message.
        message: String,
        /// Transport diagnostic.
        detail: String,
    },

    /// The backend answered with an error status.
    #[error("{message}")]
    ServerRejected {
        /// Mutation identifier.
        mutation: MutationId,
        /// HTTP status.
        status: u16,
        /// Server `error` text, or the default message.
        message: String,
    },

    /// The entry store refused the snapshot.
    #[error(transparent)]
    Conflict(#[from] CacheError),

    /// The coordinator task ended without a result.
    #[error("mutation task aborted: {0}")]
    Aborted(String),
}

impl MutationError {
    fn from_transport(mutation: MutationId, err: &TransportError) -> Self {
        match err {
            TransportError::Network { message } => Self::NetworkFailure {
                mutation,
                message: DEFAULT_FAILURE_MESSAGE.to_owned(),
                detail: message.clone(),
            },
            TransportError::Rejected { status, error } => Self::ServerRejected {
                mutation,
                status: *status,
                message: error
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_owned()),
            },
        }
    }

    /// HTTP status for server rejections.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::ServerRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Mutation entry point bound to one cache key.
pub struct MutationHandle<E> {
    shared: Arc<Shared<E>>,
    key: CacheKey,
    invalidates: Vec<CacheKey>,
    timeout: Option<Duration>,
    pending: Arc<AtomicUsize>,
}

impl<E> Clone for MutationHandle<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            key: self.key.clone(),
            invalidates: self.invalidates.clone(),
            timeout: self.timeout,
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<E> fmt::Debug for MutationHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationHandle")
            .field("key", &self.key)
            .field("invalidates", &self.invalidates)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<E: Entity> MutationHandle<E> {
    pub(crate) fn new(shared: Arc<Shared<E>>, key: &CacheKey) -> Self {
        let timeout = shared.options.mutation_timeout;
        Self {
            shared,
            key: key.clone(),
            invalidates: vec![key.prefix(1)],
            timeout,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bound key.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Replace the key families invalidated on settle (default: the bound
    /// key's resource root). The bound key itself is always invalidated.
    #[must_use]
    pub fn invalidates(mut self, prefixes: impl IntoIterator<Item = CacheKey>) -> Self {
        self.invalidates = prefixes.into_iter().collect();
        self
    }

    /// Bound the backend call; an elapsed timeout rolls back like a network
    /// failure.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// True while a mutation issued through this handle is queued or running.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// Start a mutation on a background task.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn spawn(&self, op: MutationOp<E>) -> JoinHandle<Result<MutationOutcome, MutationError>> {
        let pending = PendingGuard::enter(&self.pending);
        let run = Coordinator {
            shared: Arc::clone(&self.shared),
            key: self.key.clone(),
            invalidates: self.invalidates.clone(),
            timeout: self.timeout,
            mutation: MutationId::new(),
            kind: op.kind(),
            phase: MutationPhase::Idle,
        };
        tokio::spawn(async move {
            let result = run.execute(op).await;
            drop(pending);
            result
        })
    }

    /// Run a mutation and wait for it to settle.
    ///
    /// Dropping the returned future does not cancel the mutation.
    ///
    /// # Errors
    /// Returns the rolled-back failure, or [`MutationError::Aborted`] when the
    /// coordinator task panicked.
    pub async fn mutate(&self, op: MutationOp<E>) -> Result<MutationOutcome, MutationError> {
        self.spawn(op)
            .await
            .map_err(|err| MutationError::Aborted(err.to_string()))?
    }
}

struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Coordinator<E> {
    shared: Arc<Shared<E>>,
    key: CacheKey,
    invalidates: Vec<CacheKey>,
    timeout: Option<Duration>,
    mutation: MutationId,
    kind: MutationKind,
    phase: MutationPhase,
}

impl<E: Entity> Coordinator<E> {
    fn enter(&mut self, next: MutationPhase) {
        debug!(
            mutation = %self.mutation,
            kind = %self.kind,
            key = %self.key,
            from = %self.phase,
            to = %next,
            "Mutation phase"
        );
        self.phase = next;
    }

    async fn execute(mut self, op: MutationOp<E>) -> Result<MutationOutcome, MutationError> {
        let shared = Arc::clone(&self.shared);
        let guard = shared.locks.acquire(&self.key).await;

        self.enter(MutationPhase::Snapshotting);
        let snapshot = match shared.store.begin_mutation(&self.key) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                drop(guard);
                self.enter(MutationPhase::Settled);
                let err = MutationError::from(err);
                self.notify(Err(&err));
                return Err(err);
            }
        };

        let temporary_id = matches!(op, MutationOp::Create { .. })
            .then(|| shared.temporary_ids.next_id());
        let policy = shared.options.optimistic_create;
        let applied = shared
            .store
            .patch(&self.key, |current| op.speculate(current, temporary_id, policy));
        let effect = if applied {
            OptimisticEffect::Applied
        } else {
            debug!(mutation = %self.mutation, key = %self.key, "Nothing to show optimistically");
            OptimisticEffect::NoOp
        };
        self.enter(MutationPhase::OptimisticallyApplied);

        let result = self.call_backend(&op).await;
        let outcome = match result {
            Ok(response) => {
                shared.store.release(snapshot);
                self.enter(MutationPhase::Committed);
                Ok(MutationOutcome {
                    mutation: self.mutation,
                    kind: self.kind,
                    effect,
                    temporary_id: temporary_id.filter(|_| applied),
                    response,
                })
            }
            Err(err) => {
                shared.store.restore(snapshot);
                self.enter(MutationPhase::RolledBack);
                debug!(mutation = %self.mutation, error = %err, "Rolled back");
                Err(MutationError::from_transport(self.mutation, &err))
            }
        };

        let mut targets = Vec::with_capacity(self.invalidates.len() + 1);
        targets.push(self.key.clone());
        targets.extend(self.invalidates.iter().cloned());
        shared.scheduler.on_settled(&targets);
        drop(guard);
        self.enter(MutationPhase::Settled);
        self.notify(outcome.as_ref().map(|_| ()));
        outcome
    }

    async fn call_backend(&self, op: &MutationOp<E>) -> Result<Value, TransportError> {
        let backend = &self.shared.backend;
        let call = async {
            match op {
                MutationOp::Create { payload } => backend.create(payload).await,
                MutationOp::Update { target, patch } => backend.update(*target, patch).await,
                MutationOp::Delete { target } => backend.delete(*target).await,
            }
        };
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(TransportError::timeout(limit))),
            None => call.await,
        }
    }

    fn notify(&self, result: Result<(), &MutationError>) {
        let outcome = match result {
            Ok(()) => SettleOutcome::Succeeded,
            Err(err) => SettleOutcome::Failed {
                message: err.to_string(),
            },
        };
        self.shared.notifier.notify(&SettleNotice {
            mutation: self.mutation,
            kind: self.kind,
            key: self.key.clone(),
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_user_messages() {
        let mutation = MutationId::new();
        let rejected = MutationError::from_transport(
            mutation,
            &TransportError::rejected_with(500, "qty exceeds capacity"),
        );
        assert_eq!(rejected.to_string(), "qty exceeds capacity");
        assert_eq!(rejected.status(), Some(500));

        let silent = MutationError::from_transport(mutation, &TransportError::rejected(403, None));
        assert_eq!(silent.to_string(), DEFAULT_FAILURE_MESSAGE);

        let network = MutationError::from_transport(mutation, &TransportError::network("reset"));
        assert_eq!(network.to_string(), DEFAULT_FAILURE_MESSAGE);
        assert!(matches!(network, MutationError::NetworkFailure { ref detail, .. } if detail == "reset"));
    }

    #[test]
    fn phases_render_for_logs() {
        assert_eq!(MutationPhase::OptimisticallyApplied.to_string(), "optimistically-applied");
        assert_eq!(MutationKind::Delete.to_string(), "delete");
    }
}
