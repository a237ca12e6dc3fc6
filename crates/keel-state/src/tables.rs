//! redb table definitions for the embedded backend.
//!
//! Each bucket maps to a table of `&str` keys and `&[u8]` values. Sequence
//! counters live in their own table.

use redb::TableDefinition;

use crate::buckets::Bucket;

/// Sequence counters keyed by counter name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Table backing a bucket.
pub fn table(bucket: Bucket) -> TableDefinition<'static, &'static str, &'static [u8]> {
    TableDefinition::new(bucket.name())
}
