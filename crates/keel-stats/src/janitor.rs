//! Stats janitor — periodic retention sweeps.

use std::time::Duration;

use tracing::{info, warn};

use crate::store::{EvictionReport, StatsStore};

/// Runs [`StatsStore::evict`] at startup and then on every tick.
pub struct StatsJanitor {
    store: StatsStore,
    interval: Duration,
}

impl StatsJanitor {
    pub fn new(store: StatsStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// One sweep off the async runtime. Failures are logged.
    pub async fn sweep(&self) -> Option<EvictionReport> {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.evict()).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                warn!(error = %e, "stats eviction failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "stats eviction task panicked");
                None
            }
        }
    }

    /// Sweep until the shutdown signal. A sweep in progress finishes
    /// before the loop exits.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "stats janitor started");

        self.sweep().await;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    info!("stats janitor shutting down");
                    break;
                }
            }
        }
    }
}
