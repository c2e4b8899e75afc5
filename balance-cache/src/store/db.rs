use super::{StoredOutput, UnspentStore};
use bitcoincore_rpc::bitcoin::hashes::Hash;
use bitcoincore_rpc::bitcoin::{OutPoint, ScriptBuf, Txid};
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteOptions};
use rust_rocksdb as rocksdb;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

pub const UTXO_CF: &str = "utxo";

pub const UTXO_KEY_LEN: usize = Txid::LEN + 4; // txid (32 bytes) + vout (4 bytes)
const UTXO_VALUE_HEADER_LEN: usize = 4 + 8; // height (u32) + value (u64), script follows

pub struct UnspentDB {
    file: PathBuf,
    db: DB,
}

impl UnspentDB {
    pub fn new(db_dir: &Path) -> Result<Self, String> {
        if !db_dir.exists() {
            std::fs::create_dir_all(db_dir).map_err(|e| {
                let msg = format!(
                    "Could not create database directory at {}: {}",
                    db_dir.display(),
                    e
                );
                error!("{}", msg);
                msg
            })?;
        }

        let file = db_dir.join("unspent");
        info!("Opening RocksDB at {}", file.display());

        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);

        let mut utxo_cf_options = Options::default();
        utxo_cf_options.set_level_compaction_dynamic_level_bytes(true);
        utxo_cf_options.set_compaction_style(rocksdb::DBCompactionStyle::Level);
        utxo_cf_options.create_if_missing(true);

        let cf_descriptors = vec![ColumnFamilyDescriptor::new(UTXO_CF, utxo_cf_options)];

        let db = DB::open_cf_descriptors(&options, &file, cf_descriptors).map_err(|e| {
            let msg = format!("Failed to open RocksDB at {}: {}", file.display(), e);
            error!("{}", msg);
            msg
        })?;

        Ok(Self { file, db })
    }

    pub fn close(self) {
        drop(self.db);
        info!("Closed RocksDB at {}", self.file.display());
    }

    pub fn flush(&self) -> Result<(), String> {
        self.db.flush().map_err(|e| {
            let msg = format!("Failed to flush RocksDB at {}: {}", self.file.display(), e);
            error!("{}", msg);
            msg
        })
    }

    fn make_utxo_key(outpoint: &OutPoint) -> [u8; UTXO_KEY_LEN] {
        let mut key = [0u8; UTXO_KEY_LEN];
        key[..Txid::LEN].copy_from_slice(outpoint.txid.as_ref());
        key[Txid::LEN..].copy_from_slice(&outpoint.vout.to_be_bytes());
        key
    }

    fn parse_utxo_key(key: &[u8]) -> Result<OutPoint, String> {
        if key.len() != UTXO_KEY_LEN {
            return Err(format!("Invalid UTXO key length {}", key.len()));
        }

        let txid = Txid::from_slice(&key[..Txid::LEN]).map_err(|e| e.to_string())?;
        let vout = u32::from_be_bytes(
            key[Txid::LEN..]
                .try_into()
                .map_err(|_| "Failed to parse vout".to_string())?,
        );
        Ok(OutPoint { txid, vout })
    }

    // Value format: height (u32) + value (u64) in big-endian, then the raw output script
    fn make_utxo_value(height: u32, value: u64, script: &ScriptBuf) -> Vec<u8> {
        let mut data = Vec::with_capacity(UTXO_VALUE_HEADER_LEN + script.len());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&value.to_be_bytes());
        data.extend_from_slice(script.as_bytes());
        data
    }

    fn parse_utxo_value(outpoint: OutPoint, data: &[u8]) -> Result<StoredOutput, String> {
        if data.len() < UTXO_VALUE_HEADER_LEN {
            return Err(format!(
                "Invalid UTXO value length {} for {}",
                data.len(),
                outpoint
            ));
        }

        let height = u32::from_be_bytes(
            data[0..4]
                .try_into()
                .map_err(|_| "Failed to parse height".to_string())?,
        );
        let value = u64::from_be_bytes(
            data[4..12]
                .try_into()
                .map_err(|_| "Failed to parse value".to_string())?,
        );
        let script = ScriptBuf::from(data[UTXO_VALUE_HEADER_LEN..].to_vec());

        Ok(StoredOutput {
            outpoint,
            value,
            height,
            script,
        })
    }

    pub fn put_utxo(&self, output: &StoredOutput) -> Result<(), String> {
        let cf = self.db.cf_handle(UTXO_CF).ok_or_else(|| {
            let msg = format!("Column family {} not found", UTXO_CF);
            error!("{}", msg);
            msg
        })?;

        let mut ops = WriteOptions::default();
        ops.set_sync(false);

        let key = Self::make_utxo_key(&output.outpoint);
        let value = Self::make_utxo_value(output.height, output.value, &output.script);

        self.db.put_cf_opt(cf, key, value, &ops).map_err(|e| {
            let msg = format!("Failed to put UTXO {}: {}", output.outpoint, e);
            error!("{}", msg);
            msg
        })
    }

    // Remove and return the UTXO entry for the given outpoint
    pub fn spend_utxo(&self, outpoint: &OutPoint) -> Result<Option<StoredOutput>, String> {
        let Some(output) = self.get_utxo(outpoint)? else {
            warn!("UTXO not found for outpoint: {}", outpoint);
            return Ok(None);
        };

        let cf = self.db.cf_handle(UTXO_CF).ok_or_else(|| {
            let msg = format!("Column family {} not found", UTXO_CF);
            error!("{}", msg);
            msg
        })?;

        let mut ops = WriteOptions::default();
        ops.set_sync(false);

        let key = Self::make_utxo_key(outpoint);
        self.db.delete_cf_opt(cf, key, &ops).map_err(|e| {
            let msg = format!("Failed to delete UTXO {}: {}", outpoint, e);
            error!("{}", msg);
            msg
        })?;

        Ok(Some(output))
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<StoredOutput>, String> {
        let cf = self.db.cf_handle(UTXO_CF).ok_or_else(|| {
            let msg = format!("Column family {} not found", UTXO_CF);
            error!("{}", msg);
            msg
        })?;

        let key = Self::make_utxo_key(outpoint);
        match self.db.get_cf(cf, key) {
            Ok(Some(value)) => Self::parse_utxo_value(*outpoint, &value).map(Some),
            Ok(None) => Ok(None),
            Err(e) => {
                let msg = format!("Failed to get UTXO {}: {}", outpoint, e);
                error!("{}", msg);
                Err(msg)
            }
        }
    }
}

impl UnspentStore for UnspentDB {
    fn browse_all(
        &self,
        visitor: &mut dyn FnMut(&StoredOutput) -> ControlFlow<()>,
    ) -> Result<(), String> {
        let cf = self.db.cf_handle(UTXO_CF).ok_or_else(|| {
            let msg = format!("Column family {} not found", UTXO_CF);
            error!("{}", msg);
            msg
        })?;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item.map_err(|e| {
                let msg = format!("Failed to iterate UTXO column family: {}", e);
                error!("{}", msg);
                msg
            })?;

            let outpoint = Self::parse_utxo_key(&key)?;
            let output = Self::parse_utxo_value(outpoint, &value)?;
            if visitor(&output).is_break() {
                break;
            }
        }

        Ok(())
    }

    fn get(&self, outpoint: &OutPoint) -> Result<Option<StoredOutput>, String> {
        self.get_utxo(outpoint)
    }
}
