//! §4.8 step 1, §3, §4.1 — parses the two-layer queue-message envelope into
//! the file-creation records the orchestrator dispatches.

use log_distributor_common::ProcessingMetadata;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};

#[derive(Debug, Snafu)]
pub enum NotificationParseError {
    #[snafu(display("outer envelope is not valid JSON: {source}"))]
    OuterJson { source: serde_json::Error },
    #[snafu(display("outer envelope is missing the Message field"))]
    MissingMessage,
    #[snafu(display("inner notification-hub payload is not valid JSON: {source}"))]
    InnerJson { source: serde_json::Error },
    #[snafu(display("record {index} has no s3.bucket.name"))]
    MissingBucket { index: usize },
    #[snafu(display("record {index} has no s3.object.key"))]
    MissingKey { index: usize },
    #[snafu(display("record {index} object key is not valid percent-encoded UTF-8: {source}"))]
    KeyNotUtf8 {
        index: usize,
        source: std::str::Utf8Error,
    },
    #[snafu(display("top-level processing_metadata is malformed: {source}"))]
    MalformedMetadata { source: serde_json::Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct ParsedNotification {
    pub records: Vec<FileRecord>,
    pub processing_metadata: ProcessingMetadata,
}

#[derive(Deserialize)]
struct OuterEnvelope {
    #[serde(rename = "Message")]
    message: Option<String>,
    processing_metadata: Option<Value>,
}

#[derive(Deserialize)]
struct NotificationHubPayload {
    #[serde(rename = "Records", default)]
    records: Vec<S3Record>,
}

#[derive(Deserialize)]
struct S3Record {
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: Option<S3Bucket>,
    object: Option<S3Object>,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: Option<String>,
}

#[derive(Deserialize)]
struct S3Object {
    key: Option<String>,
}

/// Parses an outer-transport-wrapped notification-hub body into the
/// file-creation records it carries, percent-decoding each object key
/// (§4.8 step 1, §4.1).
pub fn parse_notification(body: &str) -> Result<ParsedNotification, NotificationParseError> {
    let outer: OuterEnvelope = serde_json::from_str(body).context(OuterJsonSnafu)?;
    let message = outer.message.context(MissingMessageSnafu)?;
    let payload: NotificationHubPayload =
        serde_json::from_str(&message).context(InnerJsonSnafu)?;

    let mut records = Vec::with_capacity(payload.records.len());
    for (index, record) in payload.records.into_iter().enumerate() {
        let bucket = record
            .s3
            .bucket
            .and_then(|b| b.name)
            .context(MissingBucketSnafu { index })?;
        let encoded_key = record
            .s3
            .object
            .and_then(|o| o.key)
            .context(MissingKeySnafu { index })?;
        let key = percent_decode_str(&encoded_key)
            .decode_utf8()
            .context(KeyNotUtf8Snafu { index })?
            .into_owned();
        records.push(FileRecord { bucket, key });
    }

    let processing_metadata = match outer.processing_metadata {
        Some(value) => {
            serde_json::from_value(value).context(MalformedMetadataSnafu)?
        }
        None => ProcessingMetadata::default(),
    };

    Ok(ParsedNotification {
        records,
        processing_metadata,
    })
}
