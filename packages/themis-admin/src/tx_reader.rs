//! Bridges an open `themis_tx::Transaction` into `themis_query`'s
//! `EntityReader`, so `execute_aql(text, bind_vars, tx?)` can route reads
//! through a caller's in-flight transaction instead of straight to the
//! entity store (spec §6).
//!
//! `EntityReader::get_entity` takes `&self`, but `TxManager::get` needs
//! `&mut Transaction` to record the key version it observed (for SNAPSHOT
//! conflict detection). The mutex just gives that single-threaded mutation
//! an interior-mutability path through the shared reference the executor
//! holds; there's no real contention since one query owns the transaction
//! for the duration of the call.

use themis_core::entity::Entity;
use themis_core::error::Result;
use std::sync::Mutex;
use themis_query::EntityReader;
use themis_tx::{Transaction, TxManager};

pub struct TxEntityReader<'a> {
    tx_manager: &'a TxManager,
    tx: Mutex<&'a mut Transaction>,
}

impl<'a> TxEntityReader<'a> {
    pub fn new(tx_manager: &'a TxManager, tx: &'a mut Transaction) -> Self {
        Self { tx_manager, tx: Mutex::new(tx) }
    }
}

impl EntityReader for TxEntityReader<'_> {
    fn get_entity(&self, table: &str, pk: &str) -> Result<Option<Entity>> {
        let mut guard = self.tx.lock().unwrap();
        let tx: &mut Transaction = &mut **guard;
        self.tx_manager.get(tx, table, pk)
    }
}
