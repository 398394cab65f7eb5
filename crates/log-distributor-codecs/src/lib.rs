//! NDJSON/gzip decoding (§4.2) and timestamp normalization (§4.3).

pub mod ndjson;
pub mod timestamp;

pub use ndjson::{decode_body, DecodeError, DecodeOutcome};
pub use timestamp::normalize_timestamp;
