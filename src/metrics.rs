//! §A.6 Metrics Emitter — per-tenant, per-config-type counters and a
//! delivery-latency histogram, published via the `metrics` facade (whichever
//! recorder the host installs).

use chrono::Utc;
use metrics::{counter, histogram};

/// Outcome label recorded alongside each file/event counter.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Delivered,
    Requeued,
    Dead,
    SurfaceRecoverable,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Requeued => "requeued",
            Self::Dead => "dead",
            Self::SurfaceRecoverable => "surface_recoverable",
        }
    }
}

/// One file handled for one tenant config, with its verdict.
pub fn record_file(tenant: &str, config_type: &str, outcome: Outcome) {
    counter!(
        "log_distributor_files_total",
        "tenant" => tenant.to_owned(),
        "config_type" => config_type.to_owned(),
        "outcome" => outcome.as_str(),
    )
    .increment(1);
}

/// `count` events accounted for under one tenant config, regardless of
/// whether they were ultimately delivered or rejected.
pub fn record_events(tenant: &str, config_type: &str, outcome: Outcome, count: u64) {
    counter!(
        "log_distributor_events_total",
        "tenant" => tenant.to_owned(),
        "config_type" => config_type.to_owned(),
        "outcome" => outcome.as_str(),
    )
    .increment(count);
}

/// End-to-end delivery latency: wall-clock now minus the source object's
/// upload time (§5).
pub fn record_delivery_latency(tenant: &str, config_type: &str, source_upload_time_ms: i64) {
    let now_ms = Utc::now().timestamp_millis();
    let latency_seconds = (now_ms - source_upload_time_ms).max(0) as f64 / 1000.0;
    histogram!(
        "log_distributor_delivery_latency_seconds",
        "tenant" => tenant.to_owned(),
        "config_type" => config_type.to_owned(),
    )
    .record(latency_seconds);
}
