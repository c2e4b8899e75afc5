use super::{StoredOutput, UnspentStore};
use bitcoincore_rpc::bitcoin::OutPoint;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::{Arc, RwLock};

// In-memory unspent set, ordered by outpoint. Clones share the same set.
#[derive(Clone)]
pub struct MemoryUnspentStore {
    utxos: Arc<RwLock<BTreeMap<OutPoint, StoredOutput>>>,
}

impl MemoryUnspentStore {
    pub fn new() -> Self {
        Self {
            utxos: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn put(&self, output: StoredOutput) {
        self.utxos.write().unwrap().insert(output.outpoint, output);
    }

    pub fn spend(&self, outpoint: &OutPoint) -> Option<StoredOutput> {
        self.utxos.write().unwrap().remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.utxos.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.read().unwrap().is_empty()
    }
}

impl Default for MemoryUnspentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UnspentStore for MemoryUnspentStore {
    fn browse_all(
        &self,
        visitor: &mut dyn FnMut(&StoredOutput) -> ControlFlow<()>,
    ) -> Result<(), String> {
        // Visit a copy so the visitor may call back into `get`
        let records: Vec<StoredOutput> = self.utxos.read().unwrap().values().cloned().collect();
        for record in &records {
            if visitor(record).is_break() {
                break;
            }
        }

        Ok(())
    }

    fn get(&self, outpoint: &OutPoint) -> Result<Option<StoredOutput>, String> {
        Ok(self.utxos.read().unwrap().get(outpoint).cloned())
    }
}
