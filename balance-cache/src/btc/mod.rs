mod rpc;

pub use rpc::*;

use balance_util::BTCConfig;
use bitcoincore_rpc::bitcoin::Txid;
use std::sync::Arc;

/// Source of raw transaction bytes for the balance folder export.
pub trait RawTxSource: Send + Sync {
    // `height` is the height of the block the transaction was confirmed in
    fn get_raw_transaction(&self, txid: &Txid, height: u32) -> Result<Option<Vec<u8>>, String>;
}

pub type RawTxSourceRef = Arc<Box<dyn RawTxSource>>;

pub fn create_raw_tx_source(config: &BTCConfig) -> Result<RawTxSourceRef, String> {
    let client = BTCRpcClient::new(config.rpc_url(), config.auth()).map_err(|e| {
        let msg = format!("Failed to create BTC client: {}", e);
        error!("{}", msg);
        msg
    })?;

    Ok(Arc::new(Box::new(client) as Box<dyn RawTxSource>))
}
