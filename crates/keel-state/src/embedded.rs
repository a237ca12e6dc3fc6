//! EmbeddedBackend — redb-backed storage.
//!
//! One table per [`Bucket`] plus a counter table. redb holds an exclusive
//! file lock, so only one process can have a database open; [`EmbeddedBackend::open`]
//! waits for a held lock up to a timeout before giving up. Write batches run
//! in a single write transaction.

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keel_core::BackendKind;
use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::debug;

use crate::backend::{StorageBackend, WriteBatch, WriteOp};
use crate::buckets::Bucket;
use crate::error::{StateError, StateResult};
use crate::keys::{self, SortOrder};
use crate::tables::{SEQUENCES, table};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Thread-safe storage backed by a redb database.
#[derive(Clone)]
pub struct EmbeddedBackend {
    db: Arc<Database>,
}

impl EmbeddedBackend {
    /// Open (or create) a database file, waiting up to `timeout` for another
    /// holder of the file lock to go away.
    pub fn open(path: &Path, timeout: Duration) -> StateResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }

        let deadline = Instant::now() + timeout;
        let db = loop {
            match Database::create(path) {
                Ok(db) => break db,
                Err(DatabaseError::DatabaseAlreadyOpen) if Instant::now() < deadline => {
                    debug!(?path, "database locked, retrying");
                    std::thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(e) => return Err(StateError::Open(format!("{}: {e}", path.display()))),
            }
        };

        let backend = Self { db: Arc::new(db) };
        backend.ensure_tables()?;
        debug!(?path, "embedded backend opened");
        Ok(backend)
    }

    /// Create an ephemeral in-memory backend (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let backend = Self { db: Arc::new(db) };
        backend.ensure_tables()?;
        debug!("in-memory embedded backend opened");
        Ok(backend)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for bucket in Bucket::ALL {
            txn.open_table(table(bucket)).map_err(map_err!(Table))?;
        }
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside one write transaction. The transaction commits if `f`
    /// returns `Ok` and is aborted otherwise.
    pub fn within_transaction<T, F>(&self, f: F) -> StateResult<T>
    where
        F: FnOnce(&EmbeddedTxn<'_>) -> StateResult<T>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let result = f(&EmbeddedTxn { txn: &txn });
        match result {
            Ok(value) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                Err(e)
            }
        }
    }

    /// Range scan over `prefix` in key order.
    fn scan(
        &self,
        bucket: Bucket,
        prefix: &str,
        with_values: bool,
    ) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table(bucket)).map_err(map_err!(Table))?;
        let upper = prefix_upper_bound(prefix);
        let range = table
            .range::<&str>(prefix_range(prefix, upper.as_deref()))
            .map_err(map_err!(Read))?;

        let mut results = Vec::new();
        for entry in range {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let value = if with_values {
                value.value().to_vec()
            } else {
                Vec::new()
            };
            results.push((key.value().to_string(), value));
        }
        Ok(results)
    }
}

/// Operations available inside [`EmbeddedBackend::within_transaction`].
pub struct EmbeddedTxn<'a> {
    txn: &'a WriteTransaction,
}

impl EmbeddedTxn<'_> {
    pub fn get(&self, bucket: Bucket, key: &str) -> StateResult<Option<Vec<u8>>> {
        let table = self.txn.open_table(table(bucket)).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    pub fn put(&self, bucket: Bucket, key: &str, value: &[u8]) -> StateResult<()> {
        let mut table = self.txn.open_table(table(bucket)).map_err(map_err!(Table))?;
        table.insert(key, value).map_err(map_err!(Write))?;
        Ok(())
    }

    pub fn delete(&self, bucket: Bucket, key: &str) -> StateResult<bool> {
        let mut table = self.txn.open_table(table(bucket)).map_err(map_err!(Table))?;
        let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    /// Keys under `prefix`, in key order.
    pub fn keys_by_prefix(&self, bucket: Bucket, prefix: &str) -> StateResult<Vec<String>> {
        let table = self.txn.open_table(table(bucket)).map_err(map_err!(Table))?;
        let upper = prefix_upper_bound(prefix);
        let mut keys = Vec::new();
        for entry in table
            .range::<&str>(prefix_range(prefix, upper.as_deref()))
            .map_err(map_err!(Read))?
        {
            let (key, _) = entry.map_err(map_err!(Read))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    pub fn next_sequence(&self, counter: &str) -> StateResult<u64> {
        let mut table = self.txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        let current = table
            .get(counter)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        table.insert(counter, next).map_err(map_err!(Write))?;
        Ok(next)
    }
}

impl StorageBackend for EmbeddedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn is_transactional(&self) -> bool {
        true
    }

    fn put(
        &self,
        bucket: Bucket,
        key: &str,
        value: &[u8],
        _ttl: Option<Duration>,
    ) -> StateResult<()> {
        self.within_transaction(|txn| txn.put(bucket, key, value))?;
        debug!(%bucket, %key, "record stored");
        Ok(())
    }

    fn get(&self, bucket: Bucket, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table(bucket)).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn delete(&self, bucket: Bucket, key: &str) -> StateResult<bool> {
        let existed = self.within_transaction(|txn| txn.delete(bucket, key))?;
        debug!(%bucket, %key, existed, "record deleted");
        Ok(existed)
    }

    fn list_by_prefix(
        &self,
        bucket: Bucket,
        prefix: &str,
        order: SortOrder,
    ) -> StateResult<Vec<(String, Vec<u8>)>> {
        let mut entries = self.scan(bucket, prefix, true)?;
        keys::sort_by_sequence(&mut entries, order, |(key, _)| key.as_str());
        Ok(entries)
    }

    fn keys_by_prefix(
        &self,
        bucket: Bucket,
        prefix: &str,
        order: SortOrder,
    ) -> StateResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .scan(bucket, prefix, false)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys::sort_by_sequence(&mut keys, order, |key| key.as_str());
        Ok(keys)
    }

    fn last_n(&self, bucket: Bucket, scope: &str, n: usize) -> StateResult<Vec<Vec<u8>>> {
        let prefix = keys::series_prefix(scope);
        let upper = prefix_upper_bound(&prefix);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table(bucket)).map_err(map_err!(Table))?;

        // Series keys within one scope differ only in the padded sequence,
        // so reverse key order is newest first.
        let mut values = Vec::with_capacity(n);
        for entry in table
            .range::<&str>(prefix_range(&prefix, upper.as_deref()))
            .map_err(map_err!(Read))?
            .rev()
            .take(n)
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            values.push(value.value().to_vec());
        }
        values.reverse();
        Ok(values)
    }

    fn next_sequence(&self, counter: &str) -> StateResult<u64> {
        self.within_transaction(|txn| txn.next_sequence(counter))
    }

    fn apply(&self, batch: WriteBatch) -> StateResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        self.within_transaction(|txn| {
            for op in batch.ops() {
                match op {
                    WriteOp::Put {
                        bucket, key, value, ..
                    } => txn.put(*bucket, key, value)?,
                    WriteOp::Delete { bucket, key } => {
                        txn.delete(*bucket, key)?;
                    }
                }
            }
            Ok(())
        })?;
        debug!(ops = count, "write batch committed");
        Ok(())
    }
}

/// Smallest string greater than every string starting with `prefix`.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

fn prefix_range<'a>(prefix: &'a str, upper: Option<&'a str>) -> (Bound<&'a str>, Bound<&'a str>) {
    let end = match upper {
        Some(upper) => Bound::Excluded(upper),
        None => Bound::Unbounded,
    };
    (Bound::Included(prefix), end)
}
