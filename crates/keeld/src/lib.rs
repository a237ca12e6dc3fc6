//! keeld — the Keel agent daemon.
//!
//! Opens the configured storage backend, applies migrations, returns
//! interrupted builds to the queue and runs the stats janitor until
//! shutdown. The binary in `main.rs` is a thin CLI over [`Agent`].

pub mod agent;
pub mod migrations;

pub use agent::{Agent, StartupReport, StatusReport};
