//! Storage seam between the cache engine and a REST collection.

use std::sync::Arc;

use async_trait::async_trait;
use erp_sync_core::{CacheKey, CacheValue, Entity, RecordId, TransportError};
use erp_sync_transport::{MemoryBackend, RestResource};
use serde_json::Value;

/// Remote collection of `E` rows.
///
/// Implementations are thin: one request per call, errors reported as
/// [`TransportError`] and never retried here.
#[async_trait]
pub trait Backend<E: Entity>: Send + Sync {
    /// Read the value addressed by `key`.
    ///
    /// # Errors
    /// Returns a transport error when the read fails.
    async fn fetch(&self, key: &CacheKey) -> Result<CacheValue<E>, TransportError>;

    /// `POST <endpoint>`; returns the server's representation.
    ///
    /// # Errors
    /// Returns a transport error when the write fails or is rejected.
    async fn create(&self, payload: &E) -> Result<Value, TransportError>;

    /// `PUT <endpoint>/<id>` with a partial payload.
    ///
    /// # Errors
    /// Returns a transport error when the write fails or is rejected.
    async fn update(&self, id: RecordId, patch: &E::Patch) -> Result<Value, TransportError>;

    /// `DELETE <endpoint>/<id>`.
    ///
    /// # Errors
    /// Returns a transport error when the write fails or is rejected.
    async fn delete(&self, id: RecordId) -> Result<Value, TransportError>;
}

#[async_trait]
impl<E: Entity> Backend<E> for RestResource<E> {
    async fn fetch(&self, key: &CacheKey) -> Result<CacheValue<E>, TransportError> {
        Self::fetch(self, key).await
    }

    async fn create(&self, payload: &E) -> Result<Value, TransportError> {
        Self::create(self, payload).await
    }

    async fn update(&self, id: RecordId, patch: &E::Patch) -> Result<Value, TransportError> {
        Self::update(self, id, patch).await
    }

    async fn delete(&self, id: RecordId) -> Result<Value, TransportError> {
        Self::delete(self, id).await
    }
}

#[async_trait]
impl<E: Entity> Backend<E> for MemoryBackend<E> {
    async fn fetch(&self, key: &CacheKey) -> Result<CacheValue<E>, TransportError> {
        Self::fetch(self, key).await
    }

    async fn create(&self, payload: &E) -> Result<Value, TransportError> {
        Self::create(self, payload).await
    }

    async fn update(&self, id: RecordId, patch: &E::Patch) -> Result<Value, TransportError> {
        Self::update(self, id, patch).await
    }

    async fn delete(&self, id: RecordId) -> Result<Value, TransportError> {
        Self::delete(self, id).await
    }
}

#[async_trait]
impl<E: Entity, B: Backend<E> + ?Sized> Backend<E> for Arc<B> {
    async fn fetch(&self, key: &CacheKey) -> Result<CacheValue<E>, TransportError> {
        (**self).fetch(key).await
    }

    async fn create(&self, payload: &E) -> Result<Value, TransportError> {
        (**self).create(payload).await
    }

    async fn update(&self, id: RecordId, patch: &E::Patch) -> Result<Value, TransportError> {
        (**self).update(id, patch).await
    }

    async fn delete(&self, id: RecordId) -> Result<Value, TransportError> {
        (**self).delete(id).await
    }
}
