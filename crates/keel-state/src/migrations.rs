//! One-shot data migrations.
//!
//! A migration is recorded by name once its function succeeds, and the
//! record is the only idempotency check. The work runs before the record is
//! written, so a crash between the two reruns the migration on the next
//! start: migration functions must tolerate being run again after a partial
//! run.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::SharedBackend;
use crate::buckets::Bucket;
use crate::codec;
use crate::error::{StateError, StateResult};
use crate::keys::SortOrder;

const MIGRATION_COUNTER: &str = "migrations";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub id: u64,
    pub name: String,
    pub applied_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied,
    /// Already recorded; the function was not run.
    Skipped,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {name} failed: {source}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("migration bookkeeping failed: {0}")]
    State(#[from] StateError),
}

#[derive(Clone)]
pub struct MigrationRunner {
    backend: SharedBackend,
}

impl MigrationRunner {
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    pub fn is_applied(&self, name: &str) -> StateResult<bool> {
        Ok(self.backend.get(Bucket::Migrations, name)?.is_some())
    }

    /// Run `f` unless `name` is already recorded, then record it.
    pub fn apply<F>(&self, name: &str, f: F) -> Result<MigrationOutcome, MigrationError>
    where
        F: FnOnce() -> anyhow::Result<()>,
    {
        if self.is_applied(name)? {
            info!(%name, "migration already applied");
            return Ok(MigrationOutcome::Skipped);
        }

        info!(%name, "applying migration");
        if let Err(source) = f() {
            warn!(%name, error = %source, "migration failed, not recorded");
            return Err(MigrationError::Failed {
                name: name.to_string(),
                source,
            });
        }

        let record = MigrationRecord {
            id: self.backend.next_sequence(MIGRATION_COUNTER)?,
            name: name.to_string(),
            applied_at: keel_core::epoch_secs(),
        };
        self.backend
            .put(Bucket::Migrations, name, &codec::encode(&record)?, None)?;
        info!(%name, id = record.id, "migration applied");
        Ok(MigrationOutcome::Applied)
    }

    /// All recorded migrations, in the order they were applied.
    pub fn applied(&self) -> StateResult<Vec<MigrationRecord>> {
        let mut records: Vec<MigrationRecord> = self
            .backend
            .list_by_prefix(Bucket::Migrations, "", SortOrder::None)?
            .into_iter()
            .filter_map(|(key, value)| codec::decode_or_skip(Bucket::Migrations, &key, &value))
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}
