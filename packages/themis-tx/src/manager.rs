//! MVCC transaction manager (spec §4.8). Writes inside a transaction are
//! buffered client-side (via `EntityStore::stage_put`/`stage_delete`) and
//! only touch the KV engine atomically at `commit`, which is what makes
//! `rollback` cheap: there is nothing to undo on the storage side, only the
//! in-memory buffer to discard. The undo log captured along the way exists
//! for SAGA compensation (spec §4.13) and crash recovery, not for rollback
//! itself.

use crate::batch_log::BatchLog;
use crate::saga::{self, CompensationStep};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use themis_core::changefeed::{self, ChangeEvent, ChangeKind, SeqAllocator};
use themis_core::entity::Entity;
use themis_core::error::{Result, ThemisError};
use themis_core::kv::{KvEngine, Snapshot, WriteOp};
use themis_core::store::entity_store::{EntityStore, UndoSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Each statement reads the latest committed state; no snapshot is held.
    ReadCommitted,
    /// The transaction reads a consistent point-in-time view taken at
    /// `begin`, and commit fails with a conflict if any key it wrote was
    /// also committed by another transaction after that point (spec §4.8
    /// "first-committer-wins").
    Snapshot,
}

#[derive(Debug, Clone, Copy)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self { isolation: IsolationLevel::ReadCommitted }
    }
}

/// Captures pre-images into the transaction's own undo buffer as the entity
/// store computes them, so they can be compensated or archived at
/// rollback/commit time.
struct TxUndoSink<'a> {
    undo: &'a mut Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl UndoSink for TxUndoSink<'_> {
    fn record(&mut self, key: Vec<u8>, previous_value: Option<Vec<u8>>) {
        self.undo.push((key, previous_value));
    }
}

pub struct Transaction {
    pub txid: u64,
    isolation: IsolationLevel,
    snapshot: Option<Box<dyn Snapshot>>,
    ops: Vec<WriteOp>,
    undo: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    /// Keys read or written, with the version observed at first touch.
    /// Only populated (and only checked at commit) under SNAPSHOT isolation.
    read_versions: HashMap<Vec<u8>, u64>,
    write_keys: HashSet<Vec<u8>>,
    changed_entities: Vec<(ChangeKind, String, String, Option<Entity>)>,
    committed: bool,
}

impl Transaction {
    fn new(txid: u64, isolation: IsolationLevel, snapshot: Option<Box<dyn Snapshot>>) -> Self {
        Self {
            txid,
            isolation,
            snapshot,
            ops: Vec::new(),
            undo: Vec::new(),
            read_versions: HashMap::new(),
            write_keys: HashSet::new(),
            changed_entities: Vec::new(),
            committed: false,
        }
    }

    fn shadowed(&self, key: &[u8]) -> Option<&WriteOp> {
        self.ops.iter().rev().find(|op| match op {
            WriteOp::Put(k, _) | WriteOp::Delete(k) => k == key,
        })
    }
}

/// Coordinates transaction lifecycle over an [`EntityStore`]: version
/// tracking for write-write conflict detection, commit sequencing, and
/// folding the commit's changefeed event and SAGA compensation record into
/// the same atomic batch.
pub struct TxManager {
    engine: Arc<dyn KvEngine>,
    store: Arc<EntityStore>,
    versions: Mutex<HashMap<Vec<u8>, u64>>,
    next_txid: AtomicU64,
    seq: SeqAllocator,
    batch_log: Mutex<BatchLog>,
}

impl TxManager {
    pub fn new(engine: Arc<dyn KvEngine>, store: Arc<EntityStore>, signing_key: Vec<u8>) -> Result<Self> {
        let next_seq = changefeed::recover_next_seq(engine.as_ref())?;
        Ok(Self {
            engine,
            store,
            versions: Mutex::new(HashMap::new()),
            next_txid: AtomicU64::new(0),
            seq: SeqAllocator::starting_at(next_seq),
            batch_log: Mutex::new(BatchLog::new(signing_key)),
        })
    }

    pub fn begin(&self, options: TxOptions) -> Result<Transaction> {
        let txid = self.next_txid.fetch_add(1, Ordering::SeqCst);
        let snapshot = match options.isolation {
            IsolationLevel::Snapshot => Some(self.engine.snapshot()?),
            IsolationLevel::ReadCommitted => None,
        };
        Ok(Transaction::new(txid, options.isolation, snapshot))
    }

    fn entity_key_version(&self, key: &[u8]) -> u64 {
        self.versions.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Reads `table/pk` as of the transaction's view: its own uncommitted
    /// writes shadow everything else, then the held snapshot (SNAPSHOT
    /// isolation) or the live engine (READ_COMMITTED).
    pub fn get(&self, tx: &mut Transaction, table: &str, pk: &str) -> Result<Option<Entity>> {
        let key = themis_core::keys::entity_key(table, pk);
        if let Some(op) = tx.shadowed(&key) {
            return Ok(match op {
                WriteOp::Put(_, v) => Some(
                    Entity::from_canonical_bytes(v)
                        .map_err(|e| ThemisError::Internal(format!("corrupt entity row: {e}")))?,
                ),
                WriteOp::Delete(_) => None,
            });
        }
        tx.read_versions.entry(key.clone()).or_insert_with(|| self.entity_key_version(&key));
        let raw = match &tx.snapshot {
            Some(snap) => snap.get(&key)?,
            None => self.engine.get(&key)?,
        };
        raw.map(|b| {
            Entity::from_canonical_bytes(&b)
                .map_err(|e| ThemisError::Internal(format!("corrupt entity row: {e}")))
        })
        .transpose()
    }

    pub fn put(&self, tx: &mut Transaction, entity: Entity) -> Result<()> {
        let key = themis_core::keys::entity_key(&entity.table, &entity.pk);
        tx.read_versions.entry(key.clone()).or_insert_with(|| self.entity_key_version(&key));
        tx.write_keys.insert(key);
        let mut sink = TxUndoSink { undo: &mut tx.undo };
        self.store.stage_put(&entity, &mut tx.ops, &mut sink)?;
        tx.changed_entities.push((ChangeKind::Put, entity.table.clone(), entity.pk.clone(), Some(entity)));
        Ok(())
    }

    pub fn delete(&self, tx: &mut Transaction, table: &str, pk: &str) -> Result<bool> {
        let key = themis_core::keys::entity_key(table, pk);
        tx.read_versions.entry(key.clone()).or_insert_with(|| self.entity_key_version(&key));
        tx.write_keys.insert(key);
        let mut sink = TxUndoSink { undo: &mut tx.undo };
        let found = self.store.stage_delete(table, pk, &mut tx.ops, &mut sink)?;
        if found {
            tx.changed_entities.push((ChangeKind::Delete, table.to_string(), pk.to_string(), None));
        }
        Ok(found)
    }

    /// Validates (SNAPSHOT isolation only), assigns a commit sequence,
    /// applies the buffered writes plus the changefeed event atomically,
    /// bumps the version map, and archives the transaction's compensation
    /// record. No-op on an empty transaction.
    pub fn commit(&self, mut tx: Transaction, now_ms: i64) -> Result<()> {
        if tx.ops.is_empty() {
            tx.committed = true;
            return Ok(());
        }

        if tx.isolation == IsolationLevel::Snapshot {
            let versions = self.versions.lock().unwrap();
            for key in &tx.write_keys {
                let observed = tx.read_versions.get(key).copied().unwrap_or(0);
                let current = versions.get(key).copied().unwrap_or(0);
                if current != observed {
                    return Err(ThemisError::Conflict {
                        tx_id: tx.txid,
                        key: String::from_utf8_lossy(key).into_owned(),
                    });
                }
            }
        }

        let mut ops = std::mem::take(&mut tx.ops);
        for (kind, table, pk, entity) in &tx.changed_entities {
            let event = ChangeEvent {
                seq: self.seq.next(),
                kind: *kind,
                table: table.clone(),
                pk: pk.clone(),
                entity: entity.clone(),
                committed_at_ms: now_ms,
            };
            ops.push(changefeed::append(&event)?);
        }

        let compensations = saga::from_undo_log(&tx.undo);
        let mut batch_log = self.batch_log.lock().unwrap();
        batch_log.record(compensations);
        if let Some(batch) = batch_log.finalize(now_ms)? {
            ops.push(BatchLog::persist_op(&batch)?);
        }
        drop(batch_log);

        self.engine.write_batch(ops)?;

        let mut versions = self.versions.lock().unwrap();
        for key in &tx.write_keys {
            *versions.entry(key.clone()).or_insert(0) += 1;
        }
        drop(versions);

        tx.committed = true;
        Ok(())
    }

    /// Discards the transaction's buffered writes. Since nothing was applied
    /// to the engine yet, there is no compensating KV write to run -- this
    /// only matters for index families with out-of-band state, which never
    /// touch `tx.ops` in the first place (spec §4.8).
    pub fn rollback(&self, mut tx: Transaction) {
        tx.ops.clear();
        tx.undo.clear();
        tx.committed = true;
    }

    /// Runs the compensation steps for an already-committed batch, e.g. when
    /// recovery finds a batch whose downstream side effects (vector/spatial
    /// blobs) never completed. Exposed for the admin facade and recovery
    /// path, not used by the common commit/rollback flow above.
    pub fn compensate(&self, steps: &[CompensationStep]) -> Result<()> {
        saga::run_compensations(self.engine.as_ref(), steps)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.committed && !self.ops.is_empty() {
            tracing::warn!(txid = self.txid, "transaction dropped without commit or rollback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use themis_core::catalog::IndexCatalog;
    use themis_core::kv::SledEngine;
    use themis_core::value::Value;

    fn manager() -> TxManager {
        let engine: Arc<dyn KvEngine> = Arc::new(SledEngine::open_temp().unwrap());
        let catalog = Arc::new(IndexCatalog::new());
        let store = Arc::new(EntityStore::new(engine.clone(), catalog));
        TxManager::new(engine, store, b"test-key".to_vec()).unwrap()
    }

    #[test]
    fn committed_write_is_visible_after_commit() {
        let mgr = manager();
        let mut tx = mgr.begin(TxOptions::default()).unwrap();
        let e = Entity::new("users", "u1", 0).with_field("n", Value::I64(1));
        mgr.put(&mut tx, e).unwrap();
        mgr.commit(tx, 1000).unwrap();

        let mut tx2 = mgr.begin(TxOptions::default()).unwrap();
        let got = mgr.get(&mut tx2, "users", "u1").unwrap().unwrap();
        assert_eq!(got.get("n"), Some(&Value::I64(1)));
    }

    #[test]
    fn rollback_leaves_no_trace() {
        let mgr = manager();
        let mut tx = mgr.begin(TxOptions::default()).unwrap();
        let e = Entity::new("users", "u1", 0).with_field("n", Value::I64(1));
        mgr.put(&mut tx, e).unwrap();
        mgr.rollback(tx);

        let mut tx2 = mgr.begin(TxOptions::default()).unwrap();
        assert!(mgr.get(&mut tx2, "users", "u1").unwrap().is_none());
    }

    #[test]
    fn own_writes_are_visible_within_the_same_transaction() {
        let mgr = manager();
        let mut tx = mgr.begin(TxOptions::default()).unwrap();
        let e = Entity::new("users", "u1", 0).with_field("n", Value::I64(1));
        mgr.put(&mut tx, e).unwrap();
        let got = mgr.get(&mut tx, "users", "u1").unwrap().unwrap();
        assert_eq!(got.get("n"), Some(&Value::I64(1)));
        mgr.rollback(tx);
    }

    #[test]
    fn snapshot_isolation_detects_write_write_conflict() {
        let mgr = manager();
        let mut seed = mgr.begin(TxOptions::default()).unwrap();
        mgr.put(&mut seed, Entity::new("users", "u1", 0).with_field("n", Value::I64(0))).unwrap();
        mgr.commit(seed, 0).unwrap();

        let opts = TxOptions { isolation: IsolationLevel::Snapshot };
        let mut tx_a = mgr.begin(opts).unwrap();
        let mut tx_b = mgr.begin(opts).unwrap();

        mgr.get(&mut tx_a, "users", "u1").unwrap();
        mgr.get(&mut tx_b, "users", "u1").unwrap();

        mgr.put(&mut tx_a, Entity::new("users", "u1", 1).with_field("n", Value::I64(1))).unwrap();
        mgr.commit(tx_a, 1).unwrap();

        mgr.put(&mut tx_b, Entity::new("users", "u1", 2).with_field("n", Value::I64(2))).unwrap();
        let result = mgr.commit(tx_b, 2);
        assert!(matches!(result, Err(ThemisError::Conflict { .. })));
    }

    #[test]
    fn snapshot_isolation_read_does_not_see_later_commits() {
        let mgr = manager();
        let mut seed = mgr.begin(TxOptions::default()).unwrap();
        mgr.put(&mut seed, Entity::new("users", "u1", 0).with_field("n", Value::I64(0))).unwrap();
        mgr.commit(seed, 0).unwrap();

        let opts = TxOptions { isolation: IsolationLevel::Snapshot };
        let mut reader = mgr.begin(opts).unwrap();

        let mut writer = mgr.begin(TxOptions::default()).unwrap();
        mgr.put(&mut writer, Entity::new("users", "u1", 1).with_field("n", Value::I64(99))).unwrap();
        mgr.commit(writer, 1).unwrap();

        let seen = mgr.get(&mut reader, "users", "u1").unwrap().unwrap();
        assert_eq!(seen.get("n"), Some(&Value::I64(0)));
        mgr.rollback(reader);
    }

    #[test]
    fn commit_appends_a_changefeed_event() {
        let mgr = manager();
        let mut tx = mgr.begin(TxOptions::default()).unwrap();
        mgr.put(&mut tx, Entity::new("users", "u1", 0).with_field("n", Value::I64(1))).unwrap();
        mgr.commit(tx, 500).unwrap();

        let events = themis_core::changefeed::read_since(mgr.engine.as_ref(), 0, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].table, "users");
        assert_eq!(events[0].pk, "u1");
    }
}
