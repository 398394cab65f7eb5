//! §4.9 Re-queue Offset Protocol — never mutates in-flight state; a retry is
//! always a fresh queue message carrying an advanced processing offset.

use std::collections::HashMap;

use chrono::Utc;
use log_distributor_common::ProcessingMetadata;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

use crate::clients::{QueueClient, QueueError};

/// Ceiling on the re-enqueue delay (§4.9).
const MAX_DELAY_SECONDS: u32 = 900;

#[derive(Debug, Snafu)]
pub enum RequeueError {
    #[snafu(display("original message body is not valid JSON: {source}"))]
    MalformedBody { source: serde_json::Error },
    #[snafu(display("failed to re-enqueue: {source}"))]
    Send { source: QueueError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// A fresh message was sent; the caller should delete the original.
    Requeued,
    /// `retry_count` had already reached `max_retries`; nothing was sent.
    RetriesExhausted,
}

/// Re-enqueues the notification from `new_offset` onward, advancing
/// `processing_metadata` and attaching it both as queue message attributes
/// and back into the body's top-level JSON (§4.9, §3). Returns
/// [`RequeueOutcome::RetriesExhausted`] without sending anything once
/// `retry_count` has reached `max_retries` — the caller is then responsible
/// for treating the notification as dead.
pub async fn requeue(
    queue: &dyn QueueClient,
    queue_url: &str,
    original_body: &str,
    original_receipt: &str,
    current_metadata: &ProcessingMetadata,
    new_offset: i64,
    max_retries: u32,
) -> Result<RequeueOutcome, RequeueError> {
    if current_metadata.retry_count >= max_retries {
        return Ok(RequeueOutcome::RetriesExhausted);
    }

    let advanced = current_metadata.advanced(new_offset, original_receipt, Utc::now());
    let body = embed_metadata(original_body, &advanced).context(MalformedBodySnafu)?;

    let mut attributes = HashMap::new();
    attributes.insert("ProcessingOffset".to_owned(), advanced.offset.to_string());
    attributes.insert("RetryCount".to_owned(), advanced.retry_count.to_string());

    queue
        .send_message(queue_url, &body, backoff_delay(advanced.retry_count), attributes)
        .await
        .context(SendSnafu)?;

    Ok(RequeueOutcome::Requeued)
}

/// `min(2^(retry_count+1), 900)` seconds (§4.9).
fn backoff_delay(retry_count: u32) -> u32 {
    2u32.checked_shl(retry_count)
        .unwrap_or(u32::MAX)
        .min(MAX_DELAY_SECONDS)
}

/// Sets (or overwrites) the body's top-level `processing_metadata` field,
/// leaving every other field of the original notification untouched.
fn embed_metadata(body: &str, metadata: &ProcessingMetadata) -> Result<String, serde_json::Error> {
    let mut value: Value = serde_json::from_str(body)?;
    let metadata_value = serde_json::to_value(metadata)?;
    match value.as_object_mut() {
        Some(map) => {
            map.insert("processing_metadata".to_owned(), metadata_value);
        }
        None => {
            value = serde_json::json!({
                "processing_metadata": metadata_value,
                "original": value,
            });
        }
    }
    serde_json::to_string(&value)
}
