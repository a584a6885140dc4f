//! Thin REST client speaking the backend's JSON conventions.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use erp_sync_core::{CacheKey, CacheValue, Entity, ErrorPayload, KeyShape, RecordId, TransportError};
use reqwest::RequestBuilder;
use serde_json::Value;
use tracing::debug;

use crate::error::SetupError;

/// Shared HTTP client bound to one backend base URL.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl fmt::Debug for RestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestClient {
    /// Build a client for `base_url` (e.g. `http://localhost:8080/api`).
    ///
    /// # Errors
    /// Returns [`SetupError::InvalidBaseUrl`] for a non-http(s) URL, or
    /// [`SetupError::Client`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SetupError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(SetupError::InvalidBaseUrl(base_url.to_owned()));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: trimmed.to_owned(),
        })
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Typed handle on one REST collection, e.g. `/planning-schedules`.
    #[must_use]
    pub fn resource<E: Entity>(&self, endpoint: &str) -> RestResource<E> {
        RestResource {
            client: self.clone(),
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            entity: PhantomData,
        }
    }
}

/// REST collection holding rows of `E`.
pub struct RestResource<E> {
    client: RestClient,
    endpoint: String,
    entity: PhantomData<fn() -> E>,
}

impl<E> Clone for RestResource<E> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            entity: PhantomData,
        }
    }
}

impl<E> fmt::Debug for RestResource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestResource")
            .field("base_url", &self.client.base_url)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl<E: Entity> RestResource<E> {
    /// Collection URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}{}", self.client.base_url, self.endpoint)
    }

    fn record_url(&self, id: RecordId) -> Result<String, TransportError> {
        id.assigned().map_or_else(
            || {
                Err(TransportError::network(format!(
                    "record {id} has no server identifier"
                )))
            },
            |id| Ok(format!("{}/{id}", self.url())),
        )
    }

    /// Read the value addressed by `key`.
    ///
    /// `[root]` and `[root, ""]` list the collection, `[root, term]` adds a
    /// `search` query parameter and `[root, "detail", id]` reads one record.
    ///
    /// # Errors
    /// Returns a [`TransportError`] when the key belongs to another resource or
    /// has no REST shape, when the request fails, or when the body does not
    /// decode.
    pub async fn fetch(&self, key: &CacheKey) -> Result<CacheValue<E>, TransportError> {
        let shape = KeyShape::parse(key, E::RESOURCE).ok_or_else(|| {
            TransportError::network(format!("key {key} does not address {}", self.endpoint))
        })?;
        let request = match shape {
            KeyShape::All | KeyShape::List { search: "" } => self.client.http.get(self.url()),
            KeyShape::List { search } => self
                .client
                .http
                .get(self.url())
                .query(&[("search", search)]),
            KeyShape::Detail { id } => self.client.http.get(self.record_url(id)?),
        };
        debug!(%key, endpoint = %self.endpoint, "Fetching");
        let body = send(request).await?;
        serde_json::from_value(body)
            .map_err(|err| TransportError::network(format!("undecodable response: {err}")))
    }

    /// `POST <endpoint>` with the full payload.
    ///
    /// # Errors
    /// Returns a [`TransportError`] for network failures and error statuses.
    pub async fn create(&self, payload: &E) -> Result<Value, TransportError> {
        debug!(endpoint = %self.endpoint, "POST");
        send(self.client.http.post(self.url()).json(payload)).await
    }

    /// `PUT <endpoint>/<id>` with a partial payload.
    ///
    /// # Errors
    /// Returns a [`TransportError`] for network failures, error statuses, and
    /// temporary identifiers.
    pub async fn update(&self, id: RecordId, patch: &E::Patch) -> Result<Value, TransportError> {
        let url = self.record_url(id)?;
        debug!(%id, endpoint = %self.endpoint, "PUT");
        send(self.client.http.put(url).json(patch)).await
    }

    /// `DELETE <endpoint>/<id>`.
    ///
    /// # Errors
    /// Returns a [`TransportError`] for network failures, error statuses, and
    /// temporary identifiers.
    pub async fn delete(&self, id: RecordId) -> Result<Value, TransportError> {
        let url = self.record_url(id)?;
        debug!(%id, endpoint = %self.endpoint, "DELETE");
        send(self.client.http.delete(url)).await
    }
}

async fn send(request: RequestBuilder) -> Result<Value, TransportError> {
    let response = request.send().await.map_err(network_error)?;
    let status = response.status();
    let body = response.bytes().await.map_err(network_error)?;
    if !status.is_success() {
        return Err(rejection(status.as_u16(), &body));
    }
    decode_body(&body)
}

fn network_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::network(format!("request timed out: {err}"))
    } else {
        TransportError::network(err.to_string())
    }
}

fn rejection(status: u16, body: &[u8]) -> TransportError {
    let error = serde_json::from_slice::<ErrorPayload>(body)
        .ok()
        .and_then(|payload| payload.error);
    TransportError::rejected(status, error)
}

fn decode_body(body: &[u8]) -> Result<Value, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|err| TransportError::network(format!("undecodable response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use erp_sync_core::{PlanningSchedule, ReportSchedule, ResourceKeys};

    fn client() -> RestClient {
        RestClient::new("http://localhost:8080/api/", Duration::from_secs(5))
            .unwrap_or_else(|err| panic!("must build client: {err}"))
    }

    #[test]
    fn base_url_is_validated_and_trimmed() {
        assert_eq!(client().base_url(), "http://localhost:8080/api");
        let err = RestClient::new("localhost:8080", Duration::from_secs(1))
            .err()
            .unwrap_or_else(|| panic!("bare host must be rejected"));
        assert!(matches!(err, SetupError::InvalidBaseUrl(_)));
    }

    #[test]
    fn record_urls_require_assigned_ids() {
        let resource = client().resource::<PlanningSchedule>("/planning-schedules/");
        assert_eq!(resource.url(), "http://localhost:8080/api/planning-schedules");
        assert_eq!(
            resource.record_url(RecordId::Assigned(12)).ok().as_deref(),
            Some("http://localhost:8080/api/planning-schedules/12")
        );
        assert!(resource.record_url(RecordId::Temporary(1)).is_err());
    }

    #[test]
    fn rejection_reads_error_field_verbatim() {
        let err = rejection(500, br#"{"error": "qty exceeds capacity"}"#);
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.server_message(), Some("qty exceeds capacity"));

        let bare = rejection(403, b"<html>forbidden</html>");
        assert_eq!(bare.status(), Some(403));
        assert_eq!(bare.server_message(), None);
    }

    #[test]
    fn empty_bodies_decode_to_null() {
        assert_eq!(decode_body(b"").ok(), Some(Value::Null));
        assert_eq!(decode_body(b"  \n").ok(), Some(Value::Null));
        assert_eq!(decode_body(br#"{"id": 3}"#).ok(), Some(serde_json::json!({"id": 3})));
        assert!(decode_body(b"{oops").is_err());
    }

    #[tokio::test]
    async fn unaddressable_keys_fail_before_any_request() {
        let resource = client().resource::<PlanningSchedule>("/planning-schedules");
        let key = ResourceKeys::of::<PlanningSchedule>()
            .all()
            .child(true)
            .child(1);
        let err = resource
            .fetch(&key)
            .await
            .err()
            .unwrap_or_else(|| panic!("odd key must fail"));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn keys_of_other_resources_are_refused() {
        let resource = client().resource::<PlanningSchedule>("/planning-schedules");
        let key = ResourceKeys::of::<ReportSchedule>().list("");
        let err = resource
            .fetch(&key)
            .await
            .err()
            .unwrap_or_else(|| panic!("foreign key must fail"));
        assert!(err.to_string().contains("does not address"));
    }
}
