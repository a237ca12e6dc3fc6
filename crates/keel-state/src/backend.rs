//! The storage contract shared by both backends.

use std::sync::Arc;
use std::time::Duration;

use keel_core::{BackendKind, StorageConfig};
use tracing::info;

use crate::buckets::Bucket;
use crate::embedded::EmbeddedBackend;
use crate::error::StateResult;
use crate::keys::{self, SortOrder};
use crate::networked::NetworkedBackend;

/// A backend shared between stores and background tasks.
pub type SharedBackend = Arc<dyn StorageBackend>;

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        bucket: Bucket,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        bucket: Bucket,
        key: String,
    },
}

/// Ordered group of puts and deletes.
///
/// The embedded backend applies a batch in one transaction. The networked
/// backend applies each op on its own, in order, and a failure part way
/// leaves the earlier ops in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(
        &mut self,
        bucket: Bucket,
        key: impl Into<String>,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> &mut Self {
        self.ops.push(WriteOp::Put {
            bucket,
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    pub fn delete(&mut self, bucket: Bucket, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Delete {
            bucket,
            key: key.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Key-value storage over named buckets.
///
/// Missing keys are `Ok(None)` / empty lists, never errors. Ordered listings
/// sort by the sequence embedded in each key (see [`keys::sort_by_sequence`]).
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether [`StorageBackend::apply`] is atomic.
    fn is_transactional(&self) -> bool;

    /// Insert or overwrite a value. `ttl` is advisory.
    fn put(&self, bucket: Bucket, key: &str, value: &[u8], ttl: Option<Duration>)
    -> StateResult<()>;

    fn get(&self, bucket: Bucket, key: &str) -> StateResult<Option<Vec<u8>>>;

    /// Remove a key. Returns true if it existed.
    fn delete(&self, bucket: Bucket, key: &str) -> StateResult<bool>;

    fn list_by_prefix(
        &self,
        bucket: Bucket,
        prefix: &str,
        order: SortOrder,
    ) -> StateResult<Vec<(String, Vec<u8>)>>;

    fn keys_by_prefix(&self, bucket: Bucket, prefix: &str, order: SortOrder)
    -> StateResult<Vec<String>>;

    /// Up to `n` most recent values of a series scope, oldest first.
    fn last_n(&self, bucket: Bucket, scope: &str, n: usize) -> StateResult<Vec<Vec<u8>>> {
        let keys = self.keys_by_prefix(bucket, &keys::series_prefix(scope), SortOrder::Ascending)?;
        let skip = keys.len().saturating_sub(n);
        let mut values = Vec::with_capacity(keys.len() - skip);
        for key in &keys[skip..] {
            if let Some(value) = self.get(bucket, key)? {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Next value of a persistent counter. Starts at 1 and never repeats.
    fn next_sequence(&self, counter: &str) -> StateResult<u64>;

    fn apply(&self, batch: WriteBatch) -> StateResult<()>;
}

/// Open the backend selected by the config.
pub fn open_backend(config: &StorageConfig) -> StateResult<SharedBackend> {
    match config.backend {
        BackendKind::Embedded => {
            let backend =
                EmbeddedBackend::open(&config.embedded.path, config.embedded.open_timeout())?;
            info!(path = ?config.embedded.path, "embedded backend opened");
            Ok(Arc::new(backend))
        }
        BackendKind::Networked => {
            let backend = NetworkedBackend::connect(&config.networked)?;
            info!(address = %config.networked.address(), "networked backend connected");
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_keeps_op_order() {
        let mut batch = WriteBatch::new();
        batch
            .put(Bucket::PodStats, "a", b"1".to_vec(), None)
            .delete(Bucket::PodStats, "b");

        assert_eq!(batch.len(), 2);
        assert!(matches!(&batch.ops()[0], WriteOp::Put { key, .. } if key == "a"));
        assert!(matches!(&batch.ops()[1], WriteOp::Delete { key, .. } if key == "b"));
    }

    #[test]
    fn open_backend_embedded() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StorageConfig::default();
        config.embedded.path = dir.path().join("nested").join("keel.redb");

        let backend = open_backend(&config).unwrap();
        assert_eq!(backend.kind(), BackendKind::Embedded);
        assert!(backend.is_transactional());
    }
}
