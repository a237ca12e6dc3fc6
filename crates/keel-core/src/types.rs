//! Shared types and constants used across Keel crates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Stats older than this are removed by the janitor.
pub const RETENTION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Maximum number of builds returned by a history listing.
pub const HISTORY_LIMIT: usize = 20;

/// Socket connections seen this many times or fewer are not persisted.
pub const SOCKET_CONNECTION_MIN_COUNT: u64 = 5;

/// Bounds for windowed aggregation offsets, in minutes.
pub const MIN_WINDOW_MINUTES: u64 = 5;
pub const MAX_WINDOW_MINUTES: u64 = 60 * 24 * 7;

/// One week of per-minute samples.
pub const DEFAULT_MAX_DATA_POINTS: usize = 60 * 24 * 7;

/// The workload that owns a pod.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ControllerRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Source of the current time for stores that stamp entries.
pub trait Clock: Send + Sync {
    /// Seconds since the unix epoch.
    fn now_secs(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        epoch_secs()
    }
}

/// A clock that only moves when told to. Used by tests and replay tools.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_secs),
        }
    }

    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.now_secs(), 1_060);
        clock.set(5);
        assert_eq!(clock.now_secs(), 5);
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        // 2020-01-01
        assert!(epoch_secs() > 1_577_836_800);
    }
}
