//! §1, §5 — abstract client traits the core calls through. Infrastructure
//! primitives (object store, queue, tenant-config store, credential-exchange
//! service) are external collaborators; the core never depends on a concrete
//! SDK type directly, only on these seams, so unit tests can substitute
//! in-memory fakes (§A.5).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log_distributor_common::{Credentials, DeliveryConfig};
use snafu::Snafu;
use std::collections::HashMap;

/// §4.2 — fetches an object's raw body plus its server-reported modified time.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Bytes, DateTime<Utc>), ObjectStoreError>;

    /// §4.6 — server-side copy, verbatim, no decompression, using the tenant
    /// credentials the caller obtained via the credential broker.
    async fn copy_object(
        &self,
        credentials: &Credentials,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        region: &str,
    ) -> Result<(), ObjectStoreError>;
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum ObjectStoreError {
    #[snafu(display("object not found: {bucket}/{key}"))]
    NotFound { bucket: String, key: String },
    #[snafu(display("destination bucket missing: {bucket}"))]
    DestinationBucketMissing { bucket: String },
    #[snafu(display("access denied: {message}"))]
    AccessDenied { message: String },
    #[snafu(display("transient object-store error: {message}"))]
    Transient { message: String },
}

impl ObjectStoreError {
    /// Non-recoverable causes per §4.6: destination-bucket-missing or access-denied.
    pub fn is_non_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DestinationBucketMissing { .. } | Self::AccessDenied { .. }
        )
    }
}

/// §4.5 — read-only query interface over the tenant-configuration keyed store.
#[async_trait]
pub trait TenantConfigStoreClient: Send + Sync {
    /// All configs for a tenant, regardless of `enabled`/`ttl` — filtering is
    /// the resolver's job (§4.5), not the client's.
    async fn query_by_tenant(&self, tenant: &str) -> Result<Vec<DeliveryConfig>, ConfigStoreError>;
}

#[derive(Debug, Snafu)]
#[snafu(display("tenant-config store read failed: {message}"))]
pub struct ConfigStoreError {
    pub message: String,
}

/// §4.4 — the two-hop credential exchange service.
#[async_trait]
pub trait CredentialExchangeClient: Send + Sync {
    async fn exchange_for_central(&self, role: &str) -> Result<Credentials, CredentialExchangeError>;

    async fn exchange_for_tenant(
        &self,
        central_credentials: &Credentials,
        tenant_role: &str,
        external_id: &str,
        session_name: &str,
        region: &str,
    ) -> Result<Credentials, CredentialExchangeError>;
}

#[derive(Debug, Snafu)]
pub enum CredentialExchangeError {
    #[snafu(display("transient credential-exchange failure: {message}"))]
    Transient { message: String },
    #[snafu(display("principal/policy denial: {message}"))]
    Denied { message: String },
}

/// §4.9, §6 — the queue the core reads notifications from and re-enqueues to.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Sends a new message with an optional delay and message attributes
    /// (`ProcessingOffset`, `RetryCount` per §4.9).
    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        delay_seconds: u32,
        attributes: HashMap<String, String>,
    ) -> Result<(), QueueError>;

    async fn delete_message(&self, queue_url: &str, receipt: &str) -> Result<(), QueueError>;

    /// Poll-mode batch pull; returns up to `max_messages` notifications.
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
    ) -> Result<Vec<RawMessage>, QueueError>;
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub body: String,
    pub receipt: String,
}

#[derive(Debug, Snafu)]
#[snafu(display("queue operation failed: {message}"))]
pub struct QueueError {
    pub message: String,
}

/// §4.7 — the batched push API a log-service destination exposes.
#[async_trait]
pub trait LogServiceClient: Send + Sync {
    async fn ensure_log_group(
        &self,
        credentials: &Credentials,
        region: &str,
        log_group_name: &str,
    ) -> Result<(), LogServiceError>;

    async fn ensure_log_stream(
        &self,
        credentials: &Credentials,
        region: &str,
        log_group_name: &str,
        log_stream_name: &str,
    ) -> Result<(), LogServiceError>;

    /// The opaque cursor needed to push to a stream that already has events;
    /// `None` for a brand-new, empty stream.
    async fn describe_sequence_token(
        &self,
        credentials: &Credentials,
        region: &str,
        log_group_name: &str,
        log_stream_name: &str,
    ) -> Result<Option<String>, LogServiceError>;

    async fn put_log_events(
        &self,
        credentials: &Credentials,
        region: &str,
        log_group_name: &str,
        log_stream_name: &str,
        events: &[LogServiceEvent],
        sequence_token: Option<&str>,
    ) -> Result<PutLogEventsOutcome, LogServiceError>;
}

#[derive(Debug, Clone)]
pub struct LogServiceEvent {
    pub timestamp_ms: i64,
    pub message: String,
}

/// A successful push. `rejected_events` counts entries the service accepted
/// the request for but dropped individually on data-validation grounds
/// (§4.7) — these are not retried, only counted.
#[derive(Debug, Clone)]
pub struct PutLogEventsOutcome {
    pub next_sequence_token: String,
    pub rejected_events: usize,
}

#[derive(Debug, Snafu)]
pub enum LogServiceError {
    #[snafu(display("sequence token stale or missing; expected {expected:?}"))]
    InvalidSequenceToken { expected: Option<String> },
    #[snafu(display("transient log-service error: {message}"))]
    Transient { message: String },
    #[snafu(display("access denied: {message}"))]
    AccessDenied { message: String },
}

impl LogServiceError {
    pub fn is_non_recoverable(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}
