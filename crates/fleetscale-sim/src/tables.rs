//! redb table definitions for the simulated cloud.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized).

use redb::TableDefinition;

/// Worker records keyed by worker id.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Backend sets keyed by name.
pub const BACKEND_SETS: TableDefinition<&str, &[u8]> = TableDefinition::new("backend_sets");

/// Monotonic counters (`worker_seq`, `ip_seq`).
pub const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
