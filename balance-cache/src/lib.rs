pub mod balance;
pub mod btc;
pub mod cache;
pub mod config;
pub mod export;
pub mod output;
pub mod script;
pub mod stealth;
pub mod store;
pub mod sync;
pub mod types;

#[macro_use]
extern crate log;

pub use balance::*;
pub use cache::BalanceSnapshot;
pub use types::*;

#[cfg(test)]
pub(crate) mod test_util {
    use crate::script::{StealthIndex, p2pkh_script};
    use crate::store::StoredOutput;
    use crate::types::{StealthAddress, UnspentOutput, WalletAddress, WalletAddressRef};
    use balance_util::AddressFingerprint;
    use bitcoincore_rpc::bitcoin::hashes::Hash;
    use bitcoincore_rpc::bitcoin::secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
    use bitcoincore_rpc::bitcoin::{OutPoint, ScriptBuf, Txid};
    use sha2::{Digest, Sha256};

    pub fn fingerprint(n: u8) -> AddressFingerprint {
        AddressFingerprint::from_byte_array([n; 20])
    }

    pub fn txid(n: u8) -> Txid {
        Txid::from_byte_array([n; 32])
    }

    // Any non-zero seed is a valid key
    pub fn secret(n: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[n; 32]).unwrap();
        let public = PublicKey::from_secret_key(&secp, &secret);
        (secret, public)
    }

    pub fn stored(outpoint: OutPoint, value: u64, height: u32, script: ScriptBuf) -> StoredOutput {
        StoredOutput {
            outpoint,
            value,
            height,
            script,
        }
    }

    pub fn unspent(
        outpoint: OutPoint,
        value: u64,
        height: u32,
        address: &WalletAddressRef,
    ) -> UnspentOutput {
        UnspentOutput {
            outpoint,
            value,
            height,
            address: address.clone(),
            stealth_tweak: None,
        }
    }

    pub fn stealth_wallet_address(scan_seed: u8, spend_seed: u8, label: &str) -> WalletAddress {
        let (_, scan_key) = secret(scan_seed);
        let (_, spend_key) = secret(spend_seed);
        WalletAddress::stealth(StealthAddress::new(scan_key, spend_key), label)
    }

    /// Builds a stealth payment the way a sender would: the index record at `index_outpoint`
    /// and the paid P2PKH output right after it. With `valid` false the paid output goes to
    /// some unrelated key hash instead of the derived one-time key.
    pub fn stealth_payment(
        address: &WalletAddressRef,
        ephemeral_seed: u8,
        index_outpoint: OutPoint,
        value: u64,
        height: u32,
        valid: bool,
    ) -> (StoredOutput, StoredOutput) {
        let secp = Secp256k1::new();
        let stealth = address.stealth.as_ref().unwrap();
        let (ephemeral_secret, ephemeral_key) = secret(ephemeral_seed);

        let shared = stealth
            .scan_key
            .mul_tweak(&secp, &Scalar::from(ephemeral_secret))
            .unwrap();
        let tweak: [u8; 32] = Sha256::digest(shared.serialize()).into();
        let one_time_key = stealth
            .spend_key
            .add_exp_tweak(&secp, &Scalar::from_be_bytes(tweak).unwrap())
            .unwrap();

        let paid_fingerprint = if valid {
            AddressFingerprint::from_pubkey(&one_time_key)
        } else {
            fingerprint(0xee)
        };

        let index = StealthIndex {
            nonce: [0; 4],
            ephemeral: ephemeral_key.serialize(),
        };
        let paid_outpoint = OutPoint::new(index_outpoint.txid, index_outpoint.vout + 1);

        (
            stored(index_outpoint, 0, height, index.to_script()),
            stored(paid_outpoint, value, height, p2pkh_script(&paid_fingerprint)),
        )
    }
}
