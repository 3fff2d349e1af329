//! MVCC transaction manager (spec §4.8): `READ_COMMITTED` and `SNAPSHOT`
//! isolation over `themis-core`'s entity store, with SAGA-style
//! compensation tracking (spec §4.13) for multi-index atomicity.

mod manager;
mod saga;
mod batch_log;

pub use manager::{IsolationLevel, Transaction, TxManager, TxOptions};
pub use saga::CompensationStep;
pub use batch_log::{BatchLog, SignedBatch};
