//! keel-state — storage backends for the Keel agent.
//!
//! One [`StorageBackend`] contract, two implementations chosen at startup:
//!
//! - [`EmbeddedBackend`]: a local [redb](https://docs.rs/redb) file, one
//!   table per [`Bucket`], multi-bucket atomic [`WriteBatch`]es.
//! - [`NetworkedBackend`]: a Redis/Valkey-compatible server spoken to over
//!   RESP. Buckets are a key-prefix segment, listing is `SCAN` + `MGET`,
//!   expiry is per key and sequences are `INCR` counters.
//!
//! # Architecture
//!
//! Values are opaque bytes at this layer; the build and stats stores
//! JSON-encode their entities through [`codec`]. Keys come from [`keys`],
//! which renders sequence numbers as 20-digit zero-padded decimals so
//! lexicographic order equals numeric order. Ordered listing goes through
//! [`keys::sort_by_sequence`] on both backends so they agree on order.
//!
//! Backends are `Send + Sync` and are shared as [`SharedBackend`].

pub mod backend;
pub mod buckets;
pub mod codec;
pub mod embedded;
pub mod error;
pub mod keys;
pub mod migrations;
pub mod networked;
pub mod resp;
mod tables;

pub use backend::{SharedBackend, StorageBackend, WriteBatch, WriteOp, open_backend};
pub use buckets::Bucket;
pub use embedded::{EmbeddedBackend, EmbeddedTxn};
pub use error::{StateError, StateResult};
pub use keys::SortOrder;
pub use migrations::{MigrationError, MigrationOutcome, MigrationRecord, MigrationRunner};
pub use networked::NetworkedBackend;
