//! Build store error types.

use keel_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// An in-flight job of the same controller already builds this commit.
    #[error(
        "duplicate build for {controller}: commit {commit_hash} is already queued as build {existing_build_id}"
    )]
    DuplicateBuild {
        controller: String,
        commit_hash: String,
        existing_build_id: u64,
    },

    #[error("build not found: {0}")]
    NotFound(u64),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("failed to generate job id: {0}")]
    JobId(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type BuildResult<T> = Result<T, BuildError>;
