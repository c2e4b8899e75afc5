mod db;
mod memory;

pub use db::*;
pub use memory::*;

use bitcoincore_rpc::bitcoin::{OutPoint, ScriptBuf};
use std::ops::ControlFlow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOutput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub height: u32,
    pub script: ScriptBuf,
}

/// The node's set of currently unspent outputs.
pub trait UnspentStore: Send + Sync {
    // Visit every unspent record exactly once, in no particular order, until the visitor breaks
    fn browse_all(
        &self,
        visitor: &mut dyn FnMut(&StoredOutput) -> ControlFlow<()>,
    ) -> Result<(), String>;

    fn get(&self, outpoint: &OutPoint) -> Result<Option<StoredOutput>, String>;
}

pub type UnspentStoreRef = std::sync::Arc<Box<dyn UnspentStore>>;
