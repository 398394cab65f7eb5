//! §3, §4.9 — the optional processing-metadata block embedded in a queue
//! message, carrying resume-from-offset state across re-enqueues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessingMetadata {
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub original_receipt: Option<String>,
    #[serde(default)]
    pub requeued_at: Option<DateTime<Utc>>,
}

impl Default for ProcessingMetadata {
    fn default() -> Self {
        Self {
            offset: 0,
            retry_count: 0,
            original_receipt: None,
            requeued_at: None,
        }
    }
}

impl ProcessingMetadata {
    /// Clips a negative offset to 0 (§4.9, §8 boundary behavior).
    pub fn non_negative_offset(&self) -> usize {
        self.offset.max(0) as usize
    }

    /// Builds the metadata for a re-enqueued message: offset advances,
    /// retry_count increments, original_receipt is carried forward (§4.9).
    pub fn advanced(
        &self,
        new_offset: i64,
        current_receipt: &str,
        now: DateTime<Utc>,
    ) -> ProcessingMetadata {
        ProcessingMetadata {
            offset: new_offset,
            retry_count: self.retry_count + 1,
            original_receipt: Some(
                self.original_receipt
                    .clone()
                    .unwrap_or_else(|| current_receipt.to_owned()),
            ),
            requeued_at: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_all_fields() {
        let meta = ProcessingMetadata {
            offset: 2000,
            retry_count: 1,
            original_receipt: Some("r1".into()),
            requeued_at: Some(Utc::now()),
        };
        let json = serde_json::to_string(&meta).unwrap();
        let back: ProcessingMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, back);
    }

    #[test]
    fn missing_block_defaults_to_zero_offset() {
        let meta: ProcessingMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(meta, ProcessingMetadata::default());
    }

    #[test]
    fn negative_offset_coerces_to_zero() {
        let meta = ProcessingMetadata {
            offset: -5,
            ..Default::default()
        };
        assert_eq!(meta.non_negative_offset(), 0);
    }

    #[test]
    fn advanced_preserves_first_original_receipt() {
        let meta = ProcessingMetadata {
            offset: 1000,
            retry_count: 0,
            original_receipt: Some("first".into()),
            requeued_at: None,
        };
        let next = meta.advanced(2000, "second-receipt", Utc::now());
        assert_eq!(next.original_receipt, Some("first".into()));
        assert_eq!(next.retry_count, 1);
        assert!(next.offset >= meta.offset);
    }
}
