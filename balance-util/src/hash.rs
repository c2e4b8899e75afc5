use bitcoincore_rpc::bitcoin::hashes::{self, Hash, hash160};
use bitcoincore_rpc::bitcoin::secp256k1::PublicKey;
use bitcoincore_rpc::bitcoin::{PubkeyHash, ScriptHash};

hashes::hash_newtype! {
    /// hash160 identifying a monitored address: the pubkey hash of a P2PKH address, the
    /// script hash of a P2SH address, or the hash of a stealth address's scan key.
    pub struct AddressFingerprint(hash160::Hash);
}

impl AddressFingerprint {
    /// Cheap filter key used while streaming the full unspent set. Not unique.
    pub fn prefix(&self) -> u64 {
        let bytes = self.as_byte_array();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(prefix)
    }

    pub fn from_pubkey(key: &PublicKey) -> Self {
        Self::hash(&key.serialize())
    }
}

impl From<PubkeyHash> for AddressFingerprint {
    fn from(hash: PubkeyHash) -> Self {
        Self::from_byte_array(hash.to_byte_array())
    }
}

impl From<ScriptHash> for AddressFingerprint {
    fn from(hash: ScriptHash) -> Self {
        Self::from_byte_array(hash.to_byte_array())
    }
}
