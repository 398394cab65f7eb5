//! §3 Data model — the log event derived from a parsed NDJSON record.

use serde_json::{Map, Value};

/// Envelope fields stripped from a record when it carries no `message` field
/// of its own (§3). Fixed constant, not configurable.
pub const ENVELOPE_FIELDS: &[&str] = &[
    "cluster",
    "namespace",
    "application",
    "pod",
    "ingest_timestamp",
    "timestamp",
];

/// A normalized log record ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub timestamp_ms: i64,
    pub message: MessageValue,
}

/// The event body: either the record's own `message` field verbatim, or the
/// whole record with envelope fields stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageValue {
    Text(String),
    Json(Value),
}

impl MessageValue {
    /// Renders the message as a single-line string suitable for a log-service
    /// push (CloudWatch Logs events are plain UTF-8 strings).
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Json(v) => v.to_string(),
        }
    }

    /// Approximate wire size in bytes, used by the log-service batch sizer (§4.7.3).
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Json(v) => v.to_string().len(),
        }
    }
}

/// Builds the `message` value for one parsed JSON record per the §3 rule:
/// prefer the record's own `message` field; otherwise strip envelope fields
/// and use the remaining object.
pub fn derive_message(record: &Value) -> MessageValue {
    if let Some(message) = record.get("message") {
        return match message {
            Value::String(s) => MessageValue::Text(s.clone()),
            other => MessageValue::Json(other.clone()),
        };
    }

    let mut stripped = match record {
        Value::Object(map) => map.clone(),
        other => {
            // Non-object records with no `message` field have nothing to strip.
            return MessageValue::Json(other.clone());
        }
    };
    strip_envelope_fields(&mut stripped);
    MessageValue::Json(Value::Object(stripped))
}

fn strip_envelope_fields(map: &mut Map<String, Value>) {
    for field in ENVELOPE_FIELDS {
        map.remove(*field);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_message_field() {
        let record = json!({"message": "hello", "cluster": "c", "namespace": "n"});
        assert_eq!(
            derive_message(&record),
            MessageValue::Text("hello".to_owned())
        );
    }

    #[test]
    fn strips_envelope_when_no_message() {
        let record = json!({
            "cluster": "c",
            "namespace": "n",
            "application": "a",
            "pod": "p",
            "ingest_timestamp": 123,
            "timestamp": 456,
            "level": "info",
            "detail": "boom",
        });
        let msg = derive_message(&record);
        assert_eq!(msg, MessageValue::Json(json!({"level": "info", "detail": "boom"})));
    }

    #[test]
    fn non_string_message_field_kept_as_json() {
        let record = json!({"message": {"nested": true}});
        assert_eq!(
            derive_message(&record),
            MessageValue::Json(json!({"nested": true}))
        );
    }
}
