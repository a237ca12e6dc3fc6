//! keel-stats — bounded telemetry time series.
//!
//! [`StatsStore`] keeps per-controller pod and interface samples, per-node
//! samples, per-pod socket connection snapshots and the cluster's CNI
//! configuration. Every series is capped at `max_data_points` entries and
//! [`StatsJanitor`] removes series that stopped receiving samples more
//! than [`keel_core::RETENTION`] ago.
//!
//! Samples are grouped by the workload owning their pod, resolved through
//! a [`ControllerCache`] in front of a [`ControllerResolver`].

pub mod aggregate;
pub mod error;
pub mod janitor;
pub mod owner_cache;
pub mod store;
pub mod types;

pub use error::{StatsError, StatsResult};
pub use janitor::StatsJanitor;
pub use owner_cache::{ControllerCache, ControllerResolver, NoResolver};
pub use store::{EvictionReport, StatsStore};
pub use types::*;
