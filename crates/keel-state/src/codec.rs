//! JSON encoding of stored entities.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::buckets::Bucket;
use crate::error::{StateError, StateResult};

pub fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StateError::Serialize(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Deserialize(e.to_string()))
}

/// Decode a record found during a scan. Malformed records are logged and
/// skipped so one bad entry cannot block a listing.
pub fn decode_or_skip<T: DeserializeOwned>(bucket: Bucket, key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(%bucket, %key, error = %e, "skipping malformed record");
            None
        }
    }
}
