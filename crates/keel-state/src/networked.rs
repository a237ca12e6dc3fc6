//! NetworkedBackend — storage on a Redis/Valkey-compatible server.
//!
//! Every key lives under `{key_prefix}:{bucket}:{key}` and counters under
//! `{key_prefix}:seq:{name}`. The server has no ordered cursors, so listing
//! collects matching keys with `SCAN`, fetches values with `MGET` and sorts
//! client-side by the embedded sequence.
//!
//! A single connection is shared behind a mutex. On an I/O failure the
//! connection is dropped and the command retried once on a fresh one.
//! Server error replies are returned as [`StateError::Backend`] without
//! a retry.

use std::collections::BTreeSet;
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use keel_core::{BackendKind, NetworkedConfig};
use tracing::{debug, warn};

use crate::backend::{StorageBackend, WriteBatch, WriteOp};
use crate::buckets::Bucket;
use crate::error::{StateError, StateResult};
use crate::keys::{self, SortOrder};
use crate::resp::{self, RespValue, io_err};

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: &str = "512";

/// Keys fetched per `MGET`.
const MGET_CHUNK: usize = 256;

struct RespConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl RespConnection {
    fn call(&mut self, args: &[&[u8]]) -> StateResult<RespValue> {
        self.writer
            .write_all(&resp::encode_command(args))
            .map_err(io_err)?;
        self.writer.flush().map_err(io_err)?;
        match resp::read_value(&mut self.reader)? {
            RespValue::Error(message) => Err(StateError::Backend(message)),
            value => Ok(value),
        }
    }
}

pub struct NetworkedBackend {
    config: NetworkedConfig,
    conn: Mutex<Option<RespConnection>>,
}

impl std::fmt::Debug for NetworkedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkedBackend")
            .field("address", &self.config.address())
            .field("database", &self.config.database)
            .field("key_prefix", &self.config.key_prefix)
            .finish()
    }
}

impl NetworkedBackend {
    /// Connect and verify the server answers `PING`.
    pub fn connect(config: &NetworkedConfig) -> StateResult<Self> {
        let backend = Self {
            config: config.clone(),
            conn: Mutex::new(None),
        };
        match backend.command(&[b"PING"])? {
            RespValue::Simple(pong) if pong == "PONG" => {}
            other => {
                return Err(StateError::Protocol(format!(
                    "unexpected PING reply: {other:?}"
                )));
            }
        }
        Ok(backend)
    }

    fn open_connection(&self) -> StateResult<RespConnection> {
        let address = self.config.address();
        let addr = address
            .to_socket_addrs()
            .map_err(|e| StateError::Connect(format!("dns resolution failed for {address}: {e}")))?
            .next()
            .ok_or_else(|| StateError::Connect(format!("no address found for {address}")))?;

        let stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout())
            .map_err(|e| StateError::Connect(format!("tcp connect to {address}: {e}")))?;
        let io_timeout = Some(self.config.io_timeout()).filter(|t| !t.is_zero());
        stream.set_read_timeout(io_timeout).map_err(io_err)?;
        stream.set_write_timeout(io_timeout).map_err(io_err)?;
        let _ = stream.set_nodelay(true);

        let writer = stream.try_clone().map_err(io_err)?;
        let mut conn = RespConnection {
            reader: BufReader::new(stream),
            writer,
        };

        if let Some(password) = &self.config.password {
            let reply = match &self.config.username {
                Some(user) => conn.call(&[b"AUTH", user.as_bytes(), password.as_bytes()]),
                None => conn.call(&[b"AUTH", password.as_bytes()]),
            };
            reply
                .and_then(RespValue::expect_ok)
                .map_err(|e| StateError::Connect(format!("authentication failed: {e}")))?;
        }
        if self.config.database != 0 {
            conn.call(&[b"SELECT", self.config.database.to_string().as_bytes()])?
                .expect_ok()?;
        }

        debug!(%address, database = self.config.database, "established resp connection");
        Ok(conn)
    }

    fn command(&self, args: &[&[u8]]) -> StateResult<RespValue> {
        let mut slot = self
            .conn
            .lock()
            .map_err(|_| StateError::Io("connection mutex poisoned".to_string()))?;
        match self.call_on(&mut slot, args) {
            Err(StateError::Io(e)) => {
                warn!(error = %e, "networked backend connection lost, reconnecting");
                *slot = None;
                self.call_on(&mut slot, args)
            }
            other => other,
        }
    }

    fn call_on(
        &self,
        slot: &mut Option<RespConnection>,
        args: &[&[u8]],
    ) -> StateResult<RespValue> {
        if slot.is_none() {
            *slot = Some(self.open_connection()?);
        }
        let conn = slot
            .as_mut()
            .ok_or_else(|| StateError::Connect("no connection".to_string()))?;
        let result = conn.call(args);
        if matches!(result, Err(StateError::Io(_)) | Err(StateError::Protocol(_))) {
            // The stream position is unknown after a failed read.
            *slot = None;
        }
        result
    }

    fn bucket_prefix(&self, bucket: Bucket) -> String {
        format!("{}:{}:", self.config.key_prefix, bucket.name())
    }

    fn full_key(&self, bucket: Bucket, key: &str) -> String {
        format!("{}{key}", self.bucket_prefix(bucket))
    }

    fn sequence_key(&self, counter: &str) -> String {
        format!("{}:seq:{counter}", self.config.key_prefix)
    }

    /// Bucket-relative keys under `prefix`, unsorted.
    fn scan_keys(&self, bucket: Bucket, prefix: &str) -> StateResult<Vec<String>> {
        let bucket_prefix = self.bucket_prefix(bucket);
        let pattern = format!("{}*", resp::escape_glob(&format!("{bucket_prefix}{prefix}")));
        let mut found = BTreeSet::new();
        let mut cursor = "0".to_string();

        loop {
            let reply = self
                .command(&[
                    b"SCAN",
                    cursor.as_bytes(),
                    b"MATCH",
                    pattern.as_bytes(),
                    b"COUNT",
                    SCAN_COUNT.as_bytes(),
                ])?
                .into_array()?;
            let mut parts = reply.into_iter();
            let next = parts
                .next()
                .ok_or_else(|| StateError::Protocol("SCAN reply missing cursor".to_string()))?
                .into_bulk()?
                .unwrap_or_default();
            let batch = parts
                .next()
                .ok_or_else(|| StateError::Protocol("SCAN reply missing keys".to_string()))?
                .into_array()?;

            for item in batch {
                let Some(raw) = item.into_bulk()? else {
                    continue;
                };
                let full = String::from_utf8(raw)
                    .map_err(|e| StateError::Protocol(format!("non utf-8 key: {e}")))?;
                if let Some(key) = full.strip_prefix(&bucket_prefix) {
                    found.insert(key.to_string());
                }
            }

            cursor = String::from_utf8(next)
                .map_err(|e| StateError::Protocol(format!("non utf-8 cursor: {e}")))?;
            if cursor == "0" {
                break;
            }
        }
        Ok(found.into_iter().collect())
    }

    /// Values for `keys` in the same order; expired keys come back as `None`.
    fn mget(&self, bucket: Bucket, keys: &[String]) -> StateResult<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MGET_CHUNK) {
            let full: Vec<String> = chunk.iter().map(|k| self.full_key(bucket, k)).collect();
            let mut args: Vec<&[u8]> = Vec::with_capacity(full.len() + 1);
            args.push(b"MGET");
            args.extend(full.iter().map(|k| k.as_bytes()));

            let reply = self.command(&args)?.into_array()?;
            if reply.len() != chunk.len() {
                return Err(StateError::Protocol(format!(
                    "MGET returned {} values for {} keys",
                    reply.len(),
                    chunk.len()
                )));
            }
            for item in reply {
                values.push(item.into_bulk()?);
            }
        }
        Ok(values)
    }
}

impl StorageBackend for NetworkedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Networked
    }

    fn is_transactional(&self) -> bool {
        false
    }

    fn put(
        &self,
        bucket: Bucket,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> StateResult<()> {
        let full = self.full_key(bucket, key);
        let reply = match ttl.filter(|t| !t.is_zero()) {
            Some(ttl) => {
                let millis = ttl.as_millis().max(1).to_string();
                self.command(&[b"SET", full.as_bytes(), value, b"PX", millis.as_bytes()])?
            }
            None => self.command(&[b"SET", full.as_bytes(), value])?,
        };
        reply.expect_ok()?;
        debug!(%bucket, %key, "record stored");
        Ok(())
    }

    fn get(&self, bucket: Bucket, key: &str) -> StateResult<Option<Vec<u8>>> {
        let full = self.full_key(bucket, key);
        self.command(&[b"GET", full.as_bytes()])?.into_bulk()
    }

    fn delete(&self, bucket: Bucket, key: &str) -> StateResult<bool> {
        let full = self.full_key(bucket, key);
        let removed = self.command(&[b"DEL", full.as_bytes()])?.into_integer()?;
        debug!(%bucket, %key, existed = removed > 0, "record deleted");
        Ok(removed > 0)
    }

    fn list_by_prefix(
        &self,
        bucket: Bucket,
        prefix: &str,
        order: SortOrder,
    ) -> StateResult<Vec<(String, Vec<u8>)>> {
        let keys = self.scan_keys(bucket, prefix)?;
        let values = self.mget(bucket, &keys)?;
        let mut entries: Vec<(String, Vec<u8>)> = keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key, v)))
            .collect();
        keys::sort_by_sequence(&mut entries, order, |(key, _)| key.as_str());
        Ok(entries)
    }

    fn keys_by_prefix(
        &self,
        bucket: Bucket,
        prefix: &str,
        order: SortOrder,
    ) -> StateResult<Vec<String>> {
        let mut keys = self.scan_keys(bucket, prefix)?;
        keys::sort_by_sequence(&mut keys, order, |key| key.as_str());
        Ok(keys)
    }

    fn last_n(&self, bucket: Bucket, scope: &str, n: usize) -> StateResult<Vec<Vec<u8>>> {
        let keys = self.keys_by_prefix(bucket, &keys::series_prefix(scope), SortOrder::Ascending)?;
        let skip = keys.len().saturating_sub(n);
        Ok(self.mget(bucket, &keys[skip..])?.into_iter().flatten().collect())
    }

    fn next_sequence(&self, counter: &str) -> StateResult<u64> {
        let key = self.sequence_key(counter);
        let next = self.command(&[b"INCR", key.as_bytes()])?.into_integer()?;
        u64::try_from(next)
            .map_err(|_| StateError::Protocol(format!("counter {counter} is negative: {next}")))
    }

    fn apply(&self, batch: WriteBatch) -> StateResult<()> {
        for op in batch.into_ops() {
            match op {
                WriteOp::Put {
                    bucket,
                    key,
                    value,
                    ttl,
                } => self.put(bucket, &key, &value, ttl)?,
                WriteOp::Delete { bucket, key } => {
                    self.delete(bucket, &key)?;
                }
            }
        }
        Ok(())
    }
}
