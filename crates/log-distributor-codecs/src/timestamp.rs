//! §4.3 Timestamp Normalizer — converts whatever value sits under a record's
//! `timestamp` field into uniform epoch milliseconds.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// The seconds-vs-milliseconds split point. Strict `>` comparison: a value of
/// exactly this boundary is treated as *seconds* — a documented quirk
/// preserved to match producer expectations (§4.3, §8).
const SECONDS_MS_BOUNDARY: i64 = 1_000_000_000_000;

/// Normalizes the value found under a record's `timestamp` key to epoch
/// milliseconds. `now_ms` supplies the wall-clock fallback for unrecognized
/// values, as an injected value rather than a direct `Utc::now()` call so the
/// boundary behavior in §8 is deterministic to test.
pub fn normalize_timestamp(value: Option<&Value>, now_ms: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => normalize_number(n, now_ms),
        Some(Value::String(s)) => parse_string_timestamp(s).unwrap_or(now_ms),
        _ => now_ms,
    }
}

fn normalize_number(n: &serde_json::Number, now_ms: i64) -> i64 {
    let as_i64 = if let Some(i) = n.as_i64() {
        Some(i)
    } else if let Some(u) = n.as_u64() {
        i64::try_from(u).ok()
    } else {
        n.as_f64().map(|f| f.round() as i64)
    };

    match as_i64 {
        Some(s) if s > SECONDS_MS_BOUNDARY => s,
        Some(s) => s.saturating_mul(1000),
        None => now_ms,
    }
}

/// Parses a string timestamp "with timezone" (§3): RFC 3339 first, then
/// RFC 2822, falling back to `None` for anything unrecognized.
fn parse_string_timestamp(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn seconds_below_boundary_multiplied_by_1000() {
        assert_eq!(normalize_timestamp(Some(&json!(1_700_000_000)), 0), 1_700_000_000_000);
    }

    #[test]
    fn ms_above_boundary_kept_as_is() {
        assert_eq!(
            normalize_timestamp(Some(&json!(1_700_000_000_001_i64)), 0),
            1_700_000_000_001
        );
    }

    #[test]
    fn exact_boundary_is_treated_as_seconds() {
        assert_eq!(
            normalize_timestamp(Some(&json!(SECONDS_MS_BOUNDARY)), 0),
            SECONDS_MS_BOUNDARY * 1000
        );
    }

    #[test]
    fn rfc3339_string_is_parsed() {
        let ms = normalize_timestamp(Some(&json!("2024-01-01T00:00:00Z")), 0);
        assert_eq!(ms, 1_704_067_200_000);
    }

    #[test]
    fn unrecognized_string_falls_back_to_now() {
        assert_eq!(normalize_timestamp(Some(&json!("not a date")), 42), 42);
    }

    #[test]
    fn missing_field_falls_back_to_now() {
        assert_eq!(normalize_timestamp(None, 42), 42);
    }

    proptest! {
        #[test]
        fn seconds_split_invariant(s in 0i64..SECONDS_MS_BOUNDARY) {
            prop_assert_eq!(normalize_timestamp(Some(&json!(s)), 0), s * 1000);
        }

        #[test]
        fn ms_split_invariant(s in (SECONDS_MS_BOUNDARY + 1)..i64::MAX / 2) {
            prop_assert_eq!(normalize_timestamp(Some(&json!(s)), 0), s);
        }
    }
}
