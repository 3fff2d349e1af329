//! SAGA compensation (spec §4.8, §9 "Compensating actions"): each mutation
//! pushes a descriptor of its inverse; on rollback (or recovery from a crash
//! mid multi-step operation) the descriptors run in reverse.

use serde::{Deserialize, Serialize};
use themis_core::error::Result;
use themis_core::kv::{KvEngine, WriteOp};

/// A single compensating action. `PutBack` covers the common case -- undo a
/// KV write by restoring (or removing) its pre-image, which is how entity,
/// index, and graph-adjacency rows are compensated. `VectorTombstone` and
/// `SpatialRemove` cover the index families whose physical representation
/// is a single serialized blob rather than discrete KV rows, so undoing
/// them means re-deriving the blob rather than replaying a KV write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompensationStep {
    PutBack {
        key: Vec<u8>,
        previous_value: Option<Vec<u8>>,
    },
    VectorTombstone {
        table: String,
        column: String,
        pk: String,
    },
    SpatialRemove {
        table: String,
        column: String,
        pk: String,
    },
}

/// Runs `steps` in the order given -- callers pass them already reversed
/// relative to the order the original mutations were applied in, so the
/// last thing done is the first thing undone. Compensations are idempotent:
/// restoring an already-restored key, or tombstoning an already-tombstoned
/// vector, is a no-op (spec §9 "Compensations must be idempotent").
pub fn run_compensations(engine: &dyn KvEngine, steps: &[CompensationStep]) -> Result<()> {
    for step in steps {
        match step {
            CompensationStep::PutBack { key, previous_value } => match previous_value {
                Some(v) => engine.put(key, v)?,
                None => engine.delete(key)?,
            },
            CompensationStep::VectorTombstone { table, column, pk } => {
                if let Some(mut idx) = themis_core::vector::load(engine, table, column)? {
                    idx.remove(pk);
                    themis_core::vector::save(engine, table, column, &idx)?;
                }
            }
            CompensationStep::SpatialRemove { table, column, pk } => {
                let mut tree = themis_core::store::spatial::load(engine, table, column)?;
                tree.remove(pk);
                themis_core::store::spatial::save(engine, table, column, &tree)?;
            }
        }
    }
    Ok(())
}

/// Converts the undo pre-images captured during a transaction into
/// compensation steps in reverse application order, ready for
/// [`run_compensations`] or for archival into the SAGA batch log.
pub fn from_undo_log(undo: &[(Vec<u8>, Option<Vec<u8>>)]) -> Vec<CompensationStep> {
    undo.iter()
        .rev()
        .map(|(key, previous_value)| CompensationStep::PutBack {
            key: key.clone(),
            previous_value: previous_value.clone(),
        })
        .collect()
}

/// Applies `steps` as an ordinary write batch -- used when a caller wants
/// the compensation folded into a larger atomic commit rather than applied
/// eagerly (e.g. undoing index writes the entity store already staged).
pub fn as_write_ops(steps: &[CompensationStep]) -> Vec<WriteOp> {
    steps
        .iter()
        .filter_map(|s| match s {
            CompensationStep::PutBack { key, previous_value } => Some(match previous_value {
                Some(v) => WriteOp::Put(key.clone(), v.clone()),
                None => WriteOp::Delete(key.clone()),
            }),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use themis_core::kv::SledEngine;

    #[test]
    fn put_back_restores_prior_value_and_delete_for_inserts() {
        let engine = SledEngine::open_temp().unwrap();
        engine.put(b"k", b"old").unwrap();
        engine.put(b"k", b"new").unwrap();

        let steps = vec![CompensationStep::PutBack {
            key: b"k".to_vec(),
            previous_value: Some(b"old".to_vec()),
        }];
        run_compensations(&engine, &steps).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn put_back_deletes_keys_that_did_not_exist_before() {
        let engine = SledEngine::open_temp().unwrap();
        engine.put(b"k", b"new").unwrap();

        let steps = vec![CompensationStep::PutBack { key: b"k".to_vec(), previous_value: None }];
        run_compensations(&engine, &steps).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), None);
    }

    #[test]
    fn from_undo_log_reverses_order() {
        let undo = vec![
            (b"a".to_vec(), None),
            (b"b".to_vec(), None),
        ];
        let steps = from_undo_log(&undo);
        match &steps[0] {
            CompensationStep::PutBack { key, .. } => assert_eq!(key, b"b"),
            _ => panic!("expected PutBack"),
        }
    }
}
