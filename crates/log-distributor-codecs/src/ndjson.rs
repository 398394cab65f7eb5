//! §4.2 File Reader — decompresses an object body (if `.gz`-suffixed) and
//! parses it as newline-delimited JSON into [`LogEvent`]s.

use std::io::Read;

use flate2::read::GzDecoder;
use log_distributor_common::event::{derive_message, LogEvent};
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use tracing::warn;

use crate::timestamp::normalize_timestamp;

/// Parse errors preview only the first few failing lines (§4.2), to keep
/// logs bounded when a file is badly corrupted.
const MAX_PREVIEWED_PARSE_ERRORS: usize = 3;
/// Cap on how much of an offending line is logged in a preview.
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Snafu)]
pub enum DecodeError {
    #[snafu(display("failed to gunzip object body: {source}"))]
    Gunzip { source: std::io::Error },
    #[snafu(display("object body is not valid UTF-8: {source}"))]
    InvalidUtf8 { source: std::io::Error },
    #[snafu(display("body yielded zero events and failed to parse as a single JSON value: {source}"))]
    WholeBodyParse { source: serde_json::Error },
}

pub struct DecodeOutcome {
    pub events: Vec<LogEvent>,
    /// Count of NDJSON lines that failed to parse as JSON.
    pub parse_errors: usize,
}

/// Decodes one object's body into log events, per §4.2's algorithm:
/// gunzip if `.gz`-suffixed, parse NDJSON, and if that yields zero records
/// with at least one parse error, retry by parsing the whole buffer as a
/// single JSON value.
pub fn decode_body(key: &str, body: &[u8], now_ms: i64) -> Result<DecodeOutcome, DecodeError> {
    let text = if key.ends_with(".gz") {
        gunzip_to_string(body)?
    } else {
        String::from_utf8(body.to_vec()).context(InvalidUtf8Snafu)?
    };

    let (records, parse_errors) = parse_ndjson(&text);

    let records = if records.is_empty() && parse_errors > 0 {
        parse_whole_buffer(&text)?
    } else {
        records
    };

    let events = records
        .iter()
        .map(|record| record_to_event(record, now_ms))
        .collect();

    Ok(DecodeOutcome {
        events,
        parse_errors,
    })
}

fn gunzip_to_string(body: &[u8]) -> Result<String, DecodeError> {
    let mut decoder = GzDecoder::new(body);
    let mut out = String::new();
    decoder.read_to_string(&mut out).context(GunzipSnafu)?;
    Ok(out)
}

/// Splits on `\n`, parsing each non-empty line as a JSON value. A line may be
/// a single object or an array of objects (§4.2); either way every element
/// becomes one record.
fn parse_ndjson(text: &str) -> (Vec<Value>, usize) {
    let mut records = Vec::new();
    let mut parse_errors = 0;

    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Array(items)) => records.extend(items),
            Ok(other) => records.push(other),
            Err(err) => {
                parse_errors += 1;
                if parse_errors <= MAX_PREVIEWED_PARSE_ERRORS {
                    let preview: String = line.chars().take(PREVIEW_CHARS).collect();
                    warn!(message = "skipping unparseable NDJSON line", error = %err, preview);
                }
            }
        }
    }

    (records, parse_errors)
}

fn parse_whole_buffer(text: &str) -> Result<Vec<Value>, DecodeError> {
    let value: Value = serde_json::from_str(text.trim()).context(WholeBodyParseSnafu)?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

fn record_to_event(record: &Value, now_ms: i64) -> LogEvent {
    let timestamp_ms = normalize_timestamp(record.get("timestamp"), now_ms);
    let message = derive_message(record);
    LogEvent {
        timestamp_ms,
        message,
    }
}
