use super::RawTxSource;
use bitcoincore_rpc::bitcoin::consensus::encode;
use bitcoincore_rpc::bitcoin::{Block, BlockHash, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi};
use std::sync::{Arc, RwLock};

pub struct BTCRpcClient {
    rpc_url: String,
    auth: Auth,
    client: RwLock<Option<Arc<Client>>>,
}

impl BTCRpcClient {
    // The client is created on first use, the node may not have written its cookie file yet
    pub fn new(rpc_url: String, auth: Auth) -> Result<Self, String> {
        Ok(Self {
            rpc_url,
            auth,
            client: RwLock::new(None),
        })
    }

    fn update_client(&self) -> Result<(), String> {
        let new_client = Client::new(&self.rpc_url, self.auth.clone()).map_err(|e| {
            let msg = format!("Failed to update BTC RPC client: {}", e);
            error!("{}", msg);
            msg
        })?;

        *self.client.write().unwrap() = Some(Arc::new(new_client));

        info!("BTC RPC client updated for {}", self.rpc_url);
        Ok(())
    }

    fn client(&self) -> Result<Arc<Client>, String> {
        if let Some(client) = &*self.client.read().unwrap() {
            return Ok(client.clone());
        }

        debug!("BTC RPC client is not initialized, creating one");
        self.update_client()?;

        match &*self.client.read().unwrap() {
            Some(client) => Ok(client.clone()),
            None => Err("Failed to initialize BTC RPC client".to_string()),
        }
    }

    fn on_error(&self, error: &bitcoincore_rpc::Error) {
        // A restarted node writes a new cookie, so reconnect on transport errors
        if let bitcoincore_rpc::Error::JsonRpc(bitcoincore_rpc::jsonrpc::Error::Transport(_)) =
            error
        {
            if matches!(self.auth, Auth::CookieFile(_)) {
                let _ = self.update_client();
            }
        }
    }

    pub fn get_latest_block_height(&self) -> Result<u64, String> {
        self.client()?.get_block_count().map_err(|error| {
            self.on_error(&error);

            let msg = format!("get_block_count failed: {}", error);
            error!("{}", msg);
            msg
        })
    }

    pub fn get_block_hash(&self, block_height: u64) -> Result<BlockHash, String> {
        self.client()?.get_block_hash(block_height).map_err(|error| {
            self.on_error(&error);

            let msg = format!("get_block_hash {} failed: {}", block_height, error);
            error!("{}", msg);
            msg
        })
    }

    pub fn get_block_by_hash(&self, block_hash: &BlockHash) -> Result<Block, String> {
        self.client()?.get_block(block_hash).map_err(|error| {
            self.on_error(&error);

            let msg = format!("get_block {} failed: {}", block_hash, error);
            error!("{}", msg);
            msg
        })
    }
}

impl RawTxSource for BTCRpcClient {
    fn get_raw_transaction(&self, txid: &Txid, height: u32) -> Result<Option<Vec<u8>>, String> {
        let hash = self.get_block_hash(height as u64)?;
        let block = self.get_block_by_hash(&hash)?;

        let Some(tx) = block.txdata.iter().find(|tx| tx.compute_txid() == *txid) else {
            warn!("Transaction {} not found in block {} at height {}", txid, hash, height);
            return Ok(None);
        };

        Ok(Some(encode::serialize(tx)))
    }
}

