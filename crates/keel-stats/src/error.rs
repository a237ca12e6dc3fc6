//! Stats store error types.

use keel_state::StateError;
use thiserror::Error;

/// Errors surfaced by eviction and CNI snapshot replacement.
///
/// Appends never fail visibly; they log and drop the sample instead.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type StatsResult<T> = Result<T, StatsError>;
