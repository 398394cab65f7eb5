//! §4.7 Log-Service Deliverer — sorts, clamps, and batches events into a
//! stream, carrying the sequence cursor forward across pushes.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use log_distributor_common::event::LogEvent;
use log_distributor_common::tenant_config::LogServiceConfig;
use log_distributor_common::{Disposition, TenantInfo};
use rand::Rng;

use crate::clients::{LogServiceClient, LogServiceError, LogServiceEvent};
use crate::credential_broker::CredentialBroker;

/// Per-event overhead the service adds to the raw message length for
/// billing/size-limit purposes (§4.7.3) — a fixed constant of the wire format,
/// not configurable.
const PER_EVENT_OVERHEAD_BYTES: usize = 26;
/// Hard cap on a single push's serialized size.
const MAX_BATCH_BYTES: usize = 1024 * 1024;
/// A batch may not span more than this much wall-clock time (§4.7.3).
const MAX_BATCH_SPAN_MS: i64 = 24 * 60 * 60 * 1000;
/// Events older than this relative to `now` are clamped up to the boundary (§4.7.2).
const MAX_PAST_SKEW_MS: i64 = 14 * 24 * 60 * 60 * 1000;
/// Events further in the future than this are clamped down to the boundary (§4.7.2).
const MAX_FUTURE_SKEW_MS: i64 = 2 * 60 * 60 * 1000;
/// Ceiling on the exponential backoff between transient-error retries (§4.7.5).
const MAX_BACKOFF_SECS: u64 = 30;

/// Outcome of a full `deliver` call: how many events actually made it out,
/// versus how many were dropped by the service's own validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryStats {
    pub successful_events: usize,
    pub failed_events: usize,
}

pub struct LogServiceDeliverer {
    client: Arc<dyn LogServiceClient>,
    credential_broker: Arc<CredentialBroker>,
    retry_attempts: u32,
    max_batch_events: usize,
}

impl LogServiceDeliverer {
    pub fn new(
        client: Arc<dyn LogServiceClient>,
        credential_broker: Arc<CredentialBroker>,
        retry_attempts: u32,
        max_batch_events: usize,
    ) -> Self {
        Self {
            client,
            credential_broker,
            retry_attempts,
            max_batch_events,
        }
    }

    /// `<application>-<pod>-<yyyy-mm-dd>` where the date is the source
    /// object's own upload time, not wall-clock now (§4.7.1) — keeps all
    /// events from one file's batch landing in one daily stream regardless
    /// of when delivery actually runs.
    pub fn log_stream_name(tenant_info: &TenantInfo, source_upload_time_ms: i64) -> String {
        let date = epoch_ms_to_utc(source_upload_time_ms).format("%Y-%m-%d");
        format!(
            "{}-{}-{}",
            tenant_info.application, tenant_info.pod, date
        )
    }

    pub async fn deliver(
        &self,
        events: Vec<LogEvent>,
        cfg: &LogServiceConfig,
        tenant_info: &TenantInfo,
        source_upload_time_ms: i64,
        now_ms: i64,
    ) -> Result<DeliveryStats, Disposition> {
        let credentials = self
            .credential_broker
            .credentials_for(&cfg.common)
            .await
            .map_err(Disposition::recoverable_no_progress)?;

        let log_stream = Self::log_stream_name(tenant_info, source_upload_time_ms);

        self.client
            .ensure_log_group(&credentials, &cfg.common.target_region, &cfg.log_group_name)
            .await
            .map_err(classify)?;
        self.client
            .ensure_log_stream(
                &credentials,
                &cfg.common.target_region,
                &cfg.log_group_name,
                &log_stream,
            )
            .await
            .map_err(classify)?;

        let normalized = sort_and_clamp(events, now_ms);
        let batches = partition_batches(&normalized, self.max_batch_events);

        let mut sequence_token = self
            .client
            .describe_sequence_token(
                &credentials,
                &cfg.common.target_region,
                &cfg.log_group_name,
                &log_stream,
            )
            .await
            .map_err(classify)?;

        let mut stats = DeliveryStats::default();

        'batches: for (batch_index, batch) in batches.iter().enumerate() {
            let mut attempt = 0u32;
            loop {
                let outcome = self
                    .client
                    .put_log_events(
                        &credentials,
                        &cfg.common.target_region,
                        &cfg.log_group_name,
                        &log_stream,
                        batch,
                        sequence_token.as_deref(),
                    )
                    .await;

                match outcome {
                    Ok(outcome) => {
                        sequence_token = Some(outcome.next_sequence_token);
                        stats.failed_events += outcome.rejected_events;
                        stats.successful_events += batch.len() - outcome.rejected_events;
                        continue 'batches;
                    }
                    Err(LogServiceError::InvalidSequenceToken { .. }) => {
                        // The cursor we carried forward is stale; re-read it
                        // once and retry this same batch (§4.7.4). Counts
                        // against the same attempt budget as transient
                        // errors so a service that never converges still
                        // terminates.
                        attempt += 1;
                        if attempt > self.retry_attempts {
                            return Err(progress_exhausted(&stats, batch_index, &batches));
                        }
                        sequence_token = self
                            .client
                            .describe_sequence_token(
                                &credentials,
                                &cfg.common.target_region,
                                &cfg.log_group_name,
                                &log_stream,
                            )
                            .await
                            .map_err(classify)?;
                    }
                    Err(err @ LogServiceError::AccessDenied { .. }) => {
                        return Err(classify(err));
                    }
                    Err(LogServiceError::Transient { message }) => {
                        attempt += 1;
                        if attempt > self.retry_attempts {
                            return Err(progress_exhausted(&stats, batch_index, &batches));
                        }
                        tracing::warn!(attempt, %message, "transient log-service error, retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                    }
                }
            }
        }

        Ok(stats)
    }
}

fn classify(err: LogServiceError) -> Disposition {
    if err.is_non_recoverable() {
        Disposition::non_recoverable("log-service-delivery", err)
    } else {
        Disposition::recoverable_no_progress(err)
    }
}

/// Partial progress on retry exhaustion is reported to the caller so it can
/// re-enqueue from the right offset (§4.9) rather than redelivering what
/// already landed.
fn progress_exhausted(
    stats: &DeliveryStats,
    batch_index: usize,
    batches: &[Vec<LogServiceEvent>],
) -> Disposition {
    let delivered_events: usize = batches[..batch_index].iter().map(Vec::len).sum();
    Disposition::recoverable_with_progress(
        (delivered_events + stats.successful_events) as u64,
        RetriesExhausted {
            successful_events: stats.successful_events,
            failed_events: stats.failed_events,
        },
    )
}

#[derive(Debug)]
struct RetriesExhausted {
    successful_events: usize,
    failed_events: usize,
}

impl std::fmt::Display for RetriesExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "log-service retries exhausted after {} delivered, {} rejected",
            self.successful_events, self.failed_events
        )
    }
}

impl std::error::Error for RetriesExhausted {}

fn epoch_ms_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Sorts by timestamp ascending and clamps each to the allowed skew window
/// relative to `now_ms` (§4.7.2).
fn sort_and_clamp(events: Vec<LogEvent>, now_ms: i64) -> Vec<LogServiceEvent> {
    let mut events = events;
    events.sort_by_key(|e| e.timestamp_ms);

    let floor = now_ms.saturating_sub(MAX_PAST_SKEW_MS);
    let ceiling = now_ms.saturating_add(MAX_FUTURE_SKEW_MS);

    events
        .into_iter()
        .map(|e| LogServiceEvent {
            timestamp_ms: e.timestamp_ms.clamp(floor, ceiling),
            message: e.message.to_wire_string(),
        })
        .collect()
}

/// Splits already-sorted events into pushable batches, respecting the event
/// count (configurable via `MAX_BATCH_SIZE`, §6), byte-size, and 24h
/// time-span caps (§4.7.3).
fn partition_batches(events: &[LogServiceEvent], max_batch_events: usize) -> Vec<Vec<LogServiceEvent>> {
    let mut batches = Vec::new();
    let mut current: Vec<LogServiceEvent> = Vec::new();
    let mut current_bytes = 0usize;
    let mut batch_start_ms = 0i64;

    for event in events {
        let event_bytes = event.message.len() + PER_EVENT_OVERHEAD_BYTES;
        let would_exceed_count = current.len() + 1 > max_batch_events;
        let would_exceed_bytes = current_bytes + event_bytes > MAX_BATCH_BYTES;
        let would_exceed_span =
            !current.is_empty() && event.timestamp_ms - batch_start_ms > MAX_BATCH_SPAN_MS;

        if !current.is_empty() && (would_exceed_count || would_exceed_bytes || would_exceed_span) {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        if current.is_empty() {
            batch_start_ms = event.timestamp_ms;
        }
        current_bytes += event_bytes;
        current.push(event.clone());
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

/// Full jitter (0-100% of the capped exponential value) so a burst of
/// throttled deliveries to the same log group don't all retry in lockstep.
fn backoff(attempt: u32) -> std::time::Duration {
    let capped_secs = 2u64.saturating_pow(attempt).min(MAX_BACKOFF_SECS);
    let jittered_ms = rand::rng().random_range(0..=capped_secs * 1000);
    std::time::Duration::from_millis(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use log_distributor_common::credentials::Credentials as Creds;
    use log_distributor_common::event::MessageValue;
    use log_distributor_common::tenant_config::CommonConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    fn event(ts: i64, msg: &str) -> LogEvent {
        LogEvent {
            timestamp_ms: ts,
            message: MessageValue::Text(msg.to_owned()),
        }
    }

    #[test]
    fn sort_and_clamp_orders_ascending() {
        let events = vec![event(300, "c"), event(100, "a"), event(200, "b")];
        let out = sort_and_clamp(events, 100_000);
        assert_eq!(
            out.iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn sort_and_clamp_clamps_far_past_and_future() {
        let now = 1_000_000_000_000i64;
        let ancient = now - (30 * 24 * 60 * 60 * 1000);
        let far_future = now + (10 * 60 * 60 * 1000);
        let out = sort_and_clamp(vec![event(ancient, "old"), event(far_future, "new")], now);
        assert_eq!(out[0].timestamp_ms, now - MAX_PAST_SKEW_MS);
        assert_eq!(out[1].timestamp_ms, now + MAX_FUTURE_SKEW_MS);
    }

    #[test]
    fn partition_respects_event_count_cap() {
        let events: Vec<LogServiceEvent> = (0..1500)
            .map(|i| LogServiceEvent {
                timestamp_ms: i,
                message: "x".into(),
            })
            .collect();
        let batches = partition_batches(&events, 1000);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 1000);
        assert_eq!(batches[1].len(), 500);
    }

    #[test]
    fn partition_respects_byte_cap() {
        let big_message = "a".repeat(10_000);
        let events: Vec<LogServiceEvent> = (0..200)
            .map(|i| LogServiceEvent {
                timestamp_ms: i,
                message: big_message.clone(),
            })
            .collect();
        let batches = partition_batches(&events, 1000);
        assert!(batches.len() > 1);
        for batch in &batches {
            let total: usize = batch
                .iter()
                .map(|e| e.message.len() + PER_EVENT_OVERHEAD_BYTES)
                .sum();
            assert!(total <= MAX_BATCH_BYTES);
        }
    }

    #[test]
    fn partition_splits_on_24h_span() {
        let events = vec![
            LogServiceEvent {
                timestamp_ms: 0,
                message: "a".into(),
            },
            LogServiceEvent {
                timestamp_ms: MAX_BATCH_SPAN_MS + 1,
                message: "b".into(),
            },
        ];
        let batches = partition_batches(&events, 1000);
        assert_eq!(batches.len(), 2);
    }

    fn common(tenant: &str) -> CommonConfig {
        CommonConfig {
            tenant: tenant.into(),
            enabled: true,
            desired_applications: None,
            target_region: "us-east-1".into(),
            distribution_role: "role".into(),
            ttl: None,
        }
    }

    fn fake_credentials() -> Creds {
        Creds {
            access_id: "id".into(),
            secret: "secret".into(),
            session_token: "token".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    struct FakeClient {
        sequence: AtomicUsize,
        invalid_token_once: bool,
        invalidated: StdMutex<bool>,
        transient_failures_left: AtomicUsize,
    }

    #[async_trait]
    impl crate::clients::CredentialExchangeClient for FakeExchange {
        async fn exchange_for_central(
            &self,
            _role: &str,
        ) -> Result<Creds, crate::clients::CredentialExchangeError> {
            Ok(fake_credentials())
        }

        async fn exchange_for_tenant(
            &self,
            _central: &Creds,
            _tenant_role: &str,
            _external_id: &str,
            _session_name: &str,
            _region: &str,
        ) -> Result<Creds, crate::clients::CredentialExchangeError> {
            Ok(fake_credentials())
        }
    }

    struct FakeExchange;

    #[async_trait]
    impl LogServiceClient for FakeClient {
        async fn ensure_log_group(
            &self,
            _credentials: &Creds,
            _region: &str,
            _log_group_name: &str,
        ) -> Result<(), LogServiceError> {
            Ok(())
        }

        async fn ensure_log_stream(
            &self,
            _credentials: &Creds,
            _region: &str,
            _log_group_name: &str,
            _log_stream_name: &str,
        ) -> Result<(), LogServiceError> {
            Ok(())
        }

        async fn describe_sequence_token(
            &self,
            _credentials: &Creds,
            _region: &str,
            _log_group_name: &str,
            _log_stream_name: &str,
        ) -> Result<Option<String>, LogServiceError> {
            Ok(Some(format!(
                "token-{}",
                self.sequence.load(Ordering::SeqCst)
            )))
        }

        async fn put_log_events(
            &self,
            _credentials: &Creds,
            _region: &str,
            _log_group_name: &str,
            _log_stream_name: &str,
            events: &[LogServiceEvent],
            _sequence_token: Option<&str>,
        ) -> Result<crate::clients::PutLogEventsOutcome, LogServiceError> {
            if self.invalid_token_once {
                let mut guard = self.invalidated.lock().unwrap();
                if !*guard {
                    *guard = true;
                    return Err(LogServiceError::InvalidSequenceToken {
                        expected: Some("token-0".into()),
                    });
                }
            }
            if self.transient_failures_left.load(Ordering::SeqCst) > 0 {
                self.transient_failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(LogServiceError::Transient {
                    message: "throttled".into(),
                });
            }
            let next = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(crate::clients::PutLogEventsOutcome {
                next_sequence_token: format!("token-{next}"),
                rejected_events: 0,
            })
        }
    }

    fn deliverer(client: FakeClient) -> LogServiceDeliverer {
        let broker = Arc::new(CredentialBroker::new(Arc::new(FakeExchange), "central".into()));
        LogServiceDeliverer::new(Arc::new(client), broker, 3, 1000)
    }

    fn tenant_info() -> TenantInfo {
        TenantInfo {
            environment: log_distributor_common::key_parser::Environment::Production,
            cluster: "cluster-a".into(),
            namespace: "tenant-x".into(),
            tenant: "tenant-x".into(),
            application: "svc-a".into(),
            pod: "pod-1".into(),
        }
    }

    #[tokio::test]
    async fn happy_path_delivers_all_events() {
        let client = FakeClient {
            sequence: AtomicUsize::new(0),
            invalid_token_once: false,
            invalidated: StdMutex::new(false),
            transient_failures_left: AtomicUsize::new(0),
        };
        let deliverer = deliverer(client);
        let cfg = LogServiceConfig {
            common: common("tenant-x"),
            log_group_name: "/logs/tenant-x".into(),
        };
        let events = vec![event(1_000, "a"), event(2_000, "b")];
        let stats = deliverer
            .deliver(events, &cfg, &tenant_info(), 1_500, 2_000_000)
            .await
            .unwrap();
        assert_eq!(stats.successful_events, 2);
        assert_eq!(stats.failed_events, 0);
    }

    #[tokio::test]
    async fn invalid_sequence_token_retries_once_with_fresh_cursor() {
        let client = FakeClient {
            sequence: AtomicUsize::new(0),
            invalid_token_once: true,
            invalidated: StdMutex::new(false),
            transient_failures_left: AtomicUsize::new(0),
        };
        let deliverer = deliverer(client);
        let cfg = LogServiceConfig {
            common: common("tenant-x"),
            log_group_name: "/logs/tenant-x".into(),
        };
        let stats = deliverer
            .deliver(vec![event(1_000, "a")], &cfg, &tenant_info(), 1_500, 2_000_000)
            .await
            .unwrap();
        assert_eq!(stats.successful_events, 1);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_retries_and_report_progress() {
        let client = FakeClient {
            sequence: AtomicUsize::new(0),
            invalid_token_once: false,
            invalidated: StdMutex::new(false),
            transient_failures_left: AtomicUsize::new(10),
        };
        let deliverer = deliverer(client);
        let cfg = LogServiceConfig {
            common: common("tenant-x"),
            log_group_name: "/logs/tenant-x".into(),
        };
        let err = deliverer
            .deliver(vec![event(1_000, "a")], &cfg, &tenant_info(), 1_500, 2_000_000)
            .await
            .unwrap_err();
        assert!(matches!(err, Disposition::RecoverableWithProgress { .. }));
    }

    #[test]
    fn log_stream_name_uses_source_upload_date_not_now() {
        let name = LogServiceDeliverer::log_stream_name(&tenant_info(), 0);
        assert_eq!(name, "svc-a-pod-1-1970-01-01");
    }
}
