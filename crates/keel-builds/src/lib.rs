//! keel-builds — the build-job queue and pipeline history.
//!
//! [`BuildJobStore`] owns the `build-queue`, `build-stage-log` and
//! `pod-events` buckets. It runs on any [`keel_state::StorageBackend`]:
//! the business logic lives here once and only the storage primitives vary.
//!
//! A job is created `Pending` by [`BuildJobStore::enqueue`], which rejects a
//! second in-flight job for the same controller and commit. Pipeline
//! executors move it through `Started` to a terminal state and record one
//! [`BuildJobInfoEntry`] per stage. On startup
//! [`BuildJobStore::recover_interrupted_jobs`] returns jobs left `Started`
//! by a crashed process to `Pending`.

pub mod error;
pub mod image;
pub mod store;
pub mod types;

pub use error::{BuildError, BuildResult};
pub use image::{ImageNames, commit_link, image_names};
pub use store::BuildJobStore;
pub use types::*;
