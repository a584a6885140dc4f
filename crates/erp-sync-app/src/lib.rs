//! Cache engine for erp-sync.
//!
//! This crate holds the entry store, the optimistic mutation coordinator, the
//! invalidation scheduler and the read-side bindings views subscribe through.

pub mod backend;
pub mod client;
pub mod config;
pub mod entry_store;
pub mod error;
pub mod key_lock;
pub mod mutation;
pub mod notify;
pub mod optimistic;
pub mod query;
pub mod scheduler;

// Re-exports for convenience
pub use backend::Backend;
pub use client::QueryClient;
pub use config::{BackendConfig, CacheConfig, CacheOptions, ClientConfig, ResourceConfig};
pub use entry_store::{
    CacheEntry, EntryStatus, EntryStore, FetchFinish, FetchTicket, MutationSnapshot, PatchOutcome,
    Subscription,
};
pub use error::{CacheError, ReadError};
pub use key_lock::{KeyGuard, KeyLocks};
pub use mutation::{
    DEFAULT_FAILURE_MESSAGE, MutationError, MutationHandle, MutationKind, MutationOp,
    MutationOutcome, MutationPhase, OptimisticEffect,
};
pub use notify::{ChannelNotifier, SettleNotice, SettleNotifier, SettleOutcome, TracingNotifier};
pub use optimistic::OptimisticCreate;
pub use query::{QueryBinding, QueryState};
pub use scheduler::RefetchScheduler;
