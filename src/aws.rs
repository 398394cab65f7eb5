//! Concrete AWS-SDK-backed implementations of the abstract client traits in
//! [`crate::clients`]. The core never imports these types directly outside
//! this module (§1, §5) — they exist only to be wired up at process startup.

use std::collections::HashMap;

use aws_credential_types::Credentials as AwsCredentials;
use aws_sdk_cloudwatchlogs::config::Region as LogsRegion;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use aws_sdk_s3::config::Region as S3Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_sqs::config::Region as SqsRegion;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sts::config::Region as StsRegion;
use aws_types::region::Region;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use snafu::{OptionExt, ResultExt};
use tracing::debug;

use crate::clients::{
    AccessDeniedSnafu as ObjectStoreAccessDeniedSnafu, ConfigStoreError, CredentialExchangeClient,
    CredentialExchangeError, DestinationBucketMissingSnafu, LogServiceClient, LogServiceError,
    LogServiceEvent, NotFoundSnafu, ObjectStoreClient, ObjectStoreError, PutLogEventsOutcome,
    QueueClient, QueueError, RawMessage, TenantConfigStoreClient, TransientSnafu as ObjectStoreTransientSnafu,
};
use log_distributor_common::credentials::Credentials;
use log_distributor_common::DeliveryConfig;

fn to_aws_credentials(credentials: &Credentials) -> AwsCredentials {
    AwsCredentials::new(
        credentials.access_id.clone(),
        credentials.secret.clone(),
        Some(credentials.session_token.clone()),
        Some(credentials.expires_at.into()),
        "log-distributor",
    )
}

/// Reads from the source bucket with the process's own ambient identity
/// (central role); writes/copies to tenant buckets use a fresh client built
/// per call from the exchanged tenant credentials, since each delivery may
/// target a different account (§4.4, §4.6).
pub struct S3ObjectStoreClient {
    ambient: aws_sdk_s3::Client,
    use_path_style: bool,
}

impl S3ObjectStoreClient {
    pub fn new(ambient: aws_sdk_s3::Client, use_path_style: bool) -> Self {
        Self {
            ambient,
            use_path_style,
        }
    }

    fn scoped_client(&self, credentials: &Credentials, region: &str) -> aws_sdk_s3::Client {
        let config = aws_sdk_s3::Config::builder()
            .region(S3Region::new(region.to_owned()))
            .credentials_provider(to_aws_credentials(credentials))
            .force_path_style(self.use_path_style)
            .behavior_version(aws_config::BehaviorVersion::latest())
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }
}

#[async_trait::async_trait]
impl ObjectStoreClient for S3ObjectStoreClient {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(Bytes, DateTime<Utc>), ObjectStoreError> {
        let output = self
            .ambient
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify_s3_error(bucket, key, err.into_service_error()))?;

        let last_modified = output
            .last_modified()
            .and_then(|dt| DateTime::from_timestamp(dt.secs(), 0))
            .unwrap_or_else(Utc::now);

        let body = output
            .body
            .collect()
            .await
            .map_err(|err| ObjectStoreError::Transient {
                message: err.to_string(),
            })?
            .into_bytes();

        Ok((body, last_modified))
    }

    async fn copy_object(
        &self,
        credentials: &Credentials,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
        region: &str,
    ) -> Result<(), ObjectStoreError> {
        let client = self.scoped_client(credentials, region);
        let copy_source = format!(
            "{source_bucket}/{}",
            percent_encoding::utf8_percent_encode(source_key, percent_encoding::NON_ALPHANUMERIC)
        );

        client
            .copy_object()
            .copy_source(copy_source)
            .bucket(dest_bucket)
            .key(dest_key)
            .send()
            .await
            .map_err(|err| classify_s3_error(dest_bucket, dest_key, err.into_service_error()))?;

        Ok(())
    }
}

/// Scan-mode key enumeration (§2.3, §B) over the same ambient S3 client used
/// for reads; lists lexicographically after the stored cursor so a restart
/// does not re-walk the whole bucket.
pub struct S3BucketLister {
    ambient: aws_sdk_s3::Client,
}

impl S3BucketLister {
    pub fn new(ambient: aws_sdk_s3::Client) -> Self {
        Self { ambient }
    }
}

#[async_trait::async_trait]
impl crate::host::BucketLister for S3BucketLister {
    async fn list_new_keys(
        &self,
        bucket: &str,
        after: Option<&str>,
    ) -> Result<Vec<String>, crate::host::HostError> {
        let mut request = self.ambient.list_objects_v2().bucket(bucket);
        if let Some(after) = after {
            request = request.start_after(after);
        }
        let output = request.send().await.map_err(|err| {
            crate::host::HostError::from(format!("list_objects_v2 on {bucket} failed: {err}"))
        })?;

        Ok(output
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(str::to_owned))
            .collect())
    }
}

fn classify_s3_error(
    bucket: &str,
    key: &str,
    err: aws_sdk_s3::operation::get_object::GetObjectError,
) -> ObjectStoreError {
    use aws_sdk_s3::operation::get_object::GetObjectError;
    match err {
        GetObjectError::NoSuchKey(_) | GetObjectError::NoSuchBucket(_) => {
            NotFoundSnafu {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }
            .build()
        }
        other => ObjectStoreTransientSnafu {
            message: other.to_string(),
        }
        .build(),
    }
}

/// Cross-account two-hop exchange via STS `AssumeRole` (§4.4, §6).
pub struct StsCredentialExchangeClient {
    sts: aws_sdk_sts::Client,
}

impl StsCredentialExchangeClient {
    pub fn new(sts: aws_sdk_sts::Client) -> Self {
        Self { sts }
    }

    fn scoped_client(&self, credentials: &Credentials, region: &str) -> aws_sdk_sts::Client {
        let config = aws_sdk_sts::Config::builder()
            .region(StsRegion::new(region.to_owned()))
            .credentials_provider(to_aws_credentials(credentials))
            .behavior_version(aws_config::BehaviorVersion::latest())
            .build();
        aws_sdk_sts::Client::from_conf(config)
    }
}

#[async_trait::async_trait]
impl CredentialExchangeClient for StsCredentialExchangeClient {
    async fn exchange_for_central(&self, role: &str) -> Result<Credentials, CredentialExchangeError> {
        let output = self
            .sts
            .assume_role()
            .role_arn(role)
            .role_session_name("log-distributor-central")
            .send()
            .await
            .map_err(|err| classify_sts_error(err.to_string()))?;
        extract_credentials(output)
    }

    async fn exchange_for_tenant(
        &self,
        central_credentials: &Credentials,
        tenant_role: &str,
        external_id: &str,
        session_name: &str,
        region: &str,
    ) -> Result<Credentials, CredentialExchangeError> {
        let client = self.scoped_client(central_credentials, region);
        let output = client
            .assume_role()
            .role_arn(tenant_role)
            .role_session_name(session_name)
            .external_id(external_id)
            .send()
            .await
            .map_err(|err| classify_sts_error(err.to_string()))?;
        extract_credentials(output)
    }
}

fn classify_sts_error(message: String) -> CredentialExchangeError {
    if message.contains("AccessDenied") || message.contains("not authorized") {
        CredentialExchangeError::Denied { message }
    } else {
        CredentialExchangeError::Transient { message }
    }
}

fn extract_credentials(
    output: aws_sdk_sts::operation::assume_role::AssumeRoleOutput,
) -> Result<Credentials, CredentialExchangeError> {
    let creds = output
        .credentials
        .ok_or_else(|| CredentialExchangeError::Transient {
            message: "AssumeRole response carried no credentials".to_owned(),
        })?;
    let expires_at = DateTime::from_timestamp(creds.expiration.secs(), 0).unwrap_or_else(Utc::now);
    Ok(Credentials {
        access_id: creds.access_key_id,
        secret: creds.secret_access_key,
        session_token: creds.session_token,
        expires_at,
    })
}

/// Batched, ordered push into a CloudWatch-Logs-like managed log service
/// (§4.7).
pub struct CloudWatchLogServiceClient;

impl CloudWatchLogServiceClient {
    pub fn new() -> Self {
        Self
    }

    fn scoped_client(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> aws_sdk_cloudwatchlogs::Client {
        let config = aws_sdk_cloudwatchlogs::Config::builder()
            .region(LogsRegion::new(region.to_owned()))
            .credentials_provider(to_aws_credentials(credentials))
            .behavior_version(aws_config::BehaviorVersion::latest())
            .build();
        aws_sdk_cloudwatchlogs::Client::from_conf(config)
    }
}

impl Default for CloudWatchLogServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LogServiceClient for CloudWatchLogServiceClient {
    async fn ensure_log_group(
        &self,
        credentials: &Credentials,
        region: &str,
        log_group_name: &str,
    ) -> Result<(), LogServiceError> {
        use aws_sdk_cloudwatchlogs::operation::create_log_group::CreateLogGroupError;
        let client = self.scoped_client(credentials, region);
        match client.create_log_group().log_group_name(log_group_name).send().await {
            Ok(_) => Ok(()),
            Err(err) => match err.into_service_error() {
                CreateLogGroupError::ResourceAlreadyExistsException(_) => Ok(()),
                other => Err(classify_logs_error(other.to_string())),
            },
        }
    }

    async fn ensure_log_stream(
        &self,
        credentials: &Credentials,
        region: &str,
        log_group_name: &str,
        log_stream_name: &str,
    ) -> Result<(), LogServiceError> {
        use aws_sdk_cloudwatchlogs::operation::create_log_stream::CreateLogStreamError;
        let client = self.scoped_client(credentials, region);
        match client
            .create_log_stream()
            .log_group_name(log_group_name)
            .log_stream_name(log_stream_name)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => match err.into_service_error() {
                CreateLogStreamError::ResourceAlreadyExistsException(_) => Ok(()),
                other => Err(classify_logs_error(other.to_string())),
            },
        }
    }

    async fn describe_sequence_token(
        &self,
        credentials: &Credentials,
        region: &str,
        log_group_name: &str,
        log_stream_name: &str,
    ) -> Result<Option<String>, LogServiceError> {
        let client = self.scoped_client(credentials, region);
        let output = client
            .describe_log_streams()
            .log_group_name(log_group_name)
            .log_stream_name_prefix(log_stream_name)
            .limit(1)
            .send()
            .await
            .map_err(|err| classify_logs_error(err.to_string()))?;

        Ok(output
            .log_streams()
            .iter()
            .find(|s| s.log_stream_name() == Some(log_stream_name))
            .and_then(|s| s.upload_sequence_token().map(str::to_owned)))
    }

    async fn put_log_events(
        &self,
        credentials: &Credentials,
        region: &str,
        log_group_name: &str,
        log_stream_name: &str,
        events: &[LogServiceEvent],
        sequence_token: Option<&str>,
    ) -> Result<PutLogEventsOutcome, LogServiceError> {
        use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsError;

        let client = self.scoped_client(credentials, region);
        let input_events: Vec<InputLogEvent> = events
            .iter()
            .map(|e| {
                InputLogEvent::builder()
                    .timestamp(e.timestamp_ms)
                    .message(e.message.clone())
                    .build()
                    .expect("timestamp and message are both set")
            })
            .collect();

        let mut request = client
            .put_log_events()
            .log_group_name(log_group_name)
            .log_stream_name(log_stream_name)
            .set_log_events(Some(input_events));
        if let Some(token) = sequence_token {
            request = request.sequence_token(token);
        }

        let output = request.send().await.map_err(|err| match err.into_service_error() {
            PutLogEventsError::InvalidSequenceTokenException(e) => LogServiceError::InvalidSequenceToken {
                expected: e.expected_sequence_token().map(str::to_owned),
            },
            PutLogEventsError::DataAlreadyAcceptedException(e) => LogServiceError::InvalidSequenceToken {
                expected: e.expected_sequence_token().map(str::to_owned),
            },
            other => classify_logs_error(other.to_string()),
        })?;

        let rejected_events = output
            .rejected_log_events_info()
            .map(|info| {
                [
                    info.too_new_log_event_start_index(),
                    info.too_old_log_event_end_index(),
                    info.expired_log_event_end_index(),
                ]
                .iter()
                .filter(|v| v.is_some())
                .count()
            })
            .unwrap_or(0);

        let next_sequence_token =
            output
                .next_sequence_token()
                .map(str::to_owned)
                .context(crate::clients::TransientSnafu {
                    message: "PutLogEvents succeeded with no next sequence token".to_owned(),
                })
                .map_err(|_: LogServiceError| LogServiceError::Transient {
                    message: "PutLogEvents succeeded with no next sequence token".to_owned(),
                })?;

        debug!(log_group_name, log_stream_name, rejected_events, "pushed log batch");

        Ok(PutLogEventsOutcome {
            next_sequence_token,
            rejected_events,
        })
    }
}

fn classify_logs_error(message: String) -> LogServiceError {
    if message.contains("AccessDenied") || message.contains("not authorized") {
        LogServiceError::AccessDenied { message }
    } else {
        LogServiceError::Transient { message }
    }
}

/// SQS-backed queue client (§4.9, §6).
pub struct SqsQueueClient {
    client: aws_sdk_sqs::Client,
}

impl SqsQueueClient {
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl QueueClient for SqsQueueClient {
    async fn send_message(
        &self,
        queue_url: &str,
        body: &str,
        delay_seconds: u32,
        attributes: HashMap<String, String>,
    ) -> Result<(), QueueError> {
        let mut request = self
            .client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .delay_seconds(delay_seconds as i32);

        for (name, value) in attributes {
            request = request.message_attributes(
                name,
                MessageAttributeValue::builder()
                    .data_type("Number")
                    .string_value(value)
                    .build()
                    .expect("data_type and string_value are both set"),
            );
        }

        request.send().await.map_err(|err| QueueError {
            message: err.to_string(),
        })?;
        Ok(())
    }

    async fn delete_message(&self, queue_url: &str, receipt: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt)
            .send()
            .await
            .map_err(|err| QueueError {
                message: err.to_string(),
            })?;
        Ok(())
    }

    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: u32,
    ) -> Result<Vec<RawMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(max_messages.min(10) as i32)
            .send()
            .await
            .map_err(|err| QueueError {
                message: err.to_string(),
            })?;

        Ok(output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(RawMessage {
                    id: m.message_id()?.to_owned(),
                    body: m.body()?.to_owned(),
                    receipt: m.receipt_handle()?.to_owned(),
                })
            })
            .collect())
    }
}

/// Reads tenant delivery configurations from a DynamoDB-like keyed store
/// (§3, §6); records are stored as JSON documents under the composite key
/// `(tenant, type)` and deserialize straight into [`DeliveryConfig`]'s
/// variant schemas.
pub struct KeyedStoreConfigClient {
    region: Region,
}

impl KeyedStoreConfigClient {
    pub fn new(region: Region) -> Self {
        Self { region }
    }
}

#[async_trait::async_trait]
impl TenantConfigStoreClient for KeyedStoreConfigClient {
    async fn query_by_tenant(&self, tenant: &str) -> Result<Vec<DeliveryConfig>, ConfigStoreError> {
        debug!(tenant, region = %self.region, "querying tenant-config store");
        // The keyed store's SDK surface is deployment-specific (DynamoDB,
        // a config CRUD service, etc.) and out of scope (§1); callers wire
        // up whichever query client their deployment provides through this
        // trait. This implementation exists to document the expected shape
        // and is replaced at deployment time.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_aws_credentials_carries_session_token_and_expiry() {
        let credentials = Credentials {
            access_id: "AKIA".into(),
            secret: "secret".into(),
            session_token: "token".into(),
            expires_at: Utc::now(),
        };
        let aws = to_aws_credentials(&credentials);
        assert_eq!(aws.access_key_id(), "AKIA");
        assert_eq!(aws.session_token(), Some("token"));
    }
}
