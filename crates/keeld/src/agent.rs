//! Agent assembly: one backend shared by the build and stats stores.

use std::sync::Arc;

use anyhow::Context;
use keel_builds::{BuildJob, BuildJobStore, BuilderStatus};
use keel_core::{BackendKind, KeelConfig, SystemClock};
use keel_state::{MigrationRunner, SharedBackend, open_backend};
use keel_stats::{ControllerCache, StatsJanitor, StatsStore};
use serde::Serialize;
use tracing::{error, info};

use crate::migrations;

/// What startup changed before the agent began serving.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub migrations_applied: usize,
    pub jobs_recovered: usize,
}

/// Output of `keeld status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub backend: BackendKind,
    pub builder: BuilderStatus,
    pub pending: Vec<BuildJob>,
}

pub struct Agent {
    config: KeelConfig,
    backend: SharedBackend,
    builds: BuildJobStore,
    stats: StatsStore,
}

impl Agent {
    /// Open the configured backend and build the stores on top of it.
    pub fn open(config: KeelConfig) -> anyhow::Result<Self> {
        let backend = match open_backend(&config.storage) {
            Ok(backend) => backend,
            Err(e) => {
                error!(backend = ?config.storage.backend, error = %e, "failed to open storage backend");
                return Err(e).context("opening storage backend");
            }
        };
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: KeelConfig, backend: SharedBackend) -> Self {
        let builds = BuildJobStore::new(backend.clone(), config.builds.clone());
        let stats = StatsStore::new(
            backend.clone(),
            Arc::new(ControllerCache::default()),
            config.stats.clone(),
            Arc::new(SystemClock),
        );
        Self {
            config,
            backend,
            builds,
            stats,
        }
    }

    pub fn builds(&self) -> &BuildJobStore {
        &self.builds
    }

    pub fn stats(&self) -> &StatsStore {
        &self.stats
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Run pending migrations, then return interrupted builds to the queue.
    pub fn prepare(&self) -> anyhow::Result<StartupReport> {
        let runner = MigrationRunner::new(self.backend.clone());
        let migrations_applied = migrations::run_all(&runner, self)?;
        let jobs_recovered = self
            .builds
            .recover_interrupted_jobs()
            .context("recovering interrupted build jobs")?;

        let report = StartupReport {
            migrations_applied,
            jobs_recovered,
        };
        info!(
            migrations = report.migrations_applied,
            recovered = report.jobs_recovered,
            "agent prepared"
        );
        Ok(report)
    }

    pub fn janitor(&self) -> StatsJanitor {
        StatsJanitor::new(self.stats.clone(), self.config.stats.janitor_interval())
    }

    pub fn status(&self) -> anyhow::Result<StatusReport> {
        Ok(StatusReport {
            backend: self.backend.kind(),
            builder: self.builds.builder_status(),
            pending: self.builds.list_pending()?,
        })
    }
}
