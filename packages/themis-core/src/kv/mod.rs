//! KV Engine Adapter (spec §4.1): the narrow trait every higher layer is
//! built on. Keeping storage behind a trait lets tests swap in an in-memory
//! engine without touching the rest of the stack.

mod sled_engine;

pub use sled_engine::SledEngine;

use crate::error::Result;

/// A single mutation inside a write batch. Batches commit atomically.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Storage-level snapshot. Readers that hold a `Snapshot` never observe
/// writes committed after it was taken (spec §4.8 SNAPSHOT isolation is
/// built directly on top of this).
pub trait Snapshot: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
    fn scan_range(&self, lower: &[u8], upper_exclusive: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// The embedded key-value engine. All physical state in the system --
/// entities, indexes, catalogs, the changefeed, undo logs -- is a set of
/// byte-string rows in this single keyspace (spec §4.1).
pub trait KvEngine: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Applies a batch of operations atomically with respect to crash
    /// recovery and concurrent readers.
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()>;

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn scan_range(&self, lower: &[u8], upper_exclusive: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Takes a point-in-time snapshot for SNAPSHOT-isolated reads.
    fn snapshot(&self) -> Result<Box<dyn Snapshot>>;

    /// Forces durability of everything written so far (spec §4.1 checkpoint).
    fn checkpoint(&self) -> Result<()>;
}
