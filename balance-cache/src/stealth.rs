use crate::script::{self, ScriptClass, StealthIndex};
use crate::store::UnspentStore;
use crate::types::{StealthAddress, StealthPrefix, UnspentOutput, WalletAddressRef};
use balance_util::AddressFingerprint;
use bitcoincore_rpc::bitcoin::OutPoint;
use bitcoincore_rpc::bitcoin::secp256k1::{All, PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct StealthMatch {
    pub address: WalletAddressRef,
    pub secret: SecretKey,
    pub fingerprint: AddressFingerprint,
}

/// Pairs stealth addresses with the wallet's private scan keys.
///
/// Matching an address is a linear search over every known secret, one public key
/// derivation per candidate, so the cost is O(addresses x secrets). Wallets are small enough
/// for that; successful matches are memoized by fingerprint.
pub struct StealthMatcher {
    secp: Secp256k1<All>,
    secrets: Vec<SecretKey>,
    matched: HashMap<AddressFingerprint, StealthMatch>,
}

impl StealthMatcher {
    pub fn new(secrets: Vec<SecretKey>) -> Self {
        Self {
            secp: Secp256k1::new(),
            secrets,
            matched: HashMap::new(),
        }
    }

    pub fn set_secrets(&mut self, secrets: Vec<SecretKey>) {
        info!("Stealth scan secrets replaced, count {}", secrets.len());
        self.secrets = secrets;
        self.matched.clear();
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    pub fn derive_public(&self, secret: &SecretKey) -> PublicKey {
        PublicKey::from_secret_key(&self.secp, secret)
    }

    /// Finds the private scan key whose public half is the address's scan key.
    pub fn match_address(&mut self, address: &WalletAddressRef) -> Option<StealthMatch> {
        let stealth = address.stealth.as_ref()?;
        let fingerprint = stealth.fingerprint();

        if let Some(found) = self.matched.get_mut(&fingerprint) {
            // Keep the latest label
            found.address = address.clone();
            return Some(found.clone());
        }

        let secret = self
            .secrets
            .iter()
            .find(|secret| self.derive_public(secret) == stealth.scan_key)
            .copied()?;

        let found = StealthMatch {
            address: address.clone(),
            secret,
            fingerprint,
        };
        self.matched.insert(fingerprint, found.clone());

        Some(found)
    }

    /// Confirms that the payment announced by a stealth index record really belongs to the
    /// matched address, by deriving the one-time key and comparing it with the paid output.
    /// The paid output is the one right after the index record in the same transaction.
    pub fn check_output(
        &self,
        found: &StealthMatch,
        index_outpoint: &OutPoint,
        index: &StealthIndex,
        store: &dyn UnspentStore,
    ) -> Result<Option<UnspentOutput>, String> {
        let Some(stealth) = found.address.stealth.as_ref() else {
            return Ok(None);
        };

        if !check_nonce(stealth.prefix.as_ref(), &index.payload()) {
            return Ok(None);
        }

        let Some(vout) = index_outpoint.vout.checked_add(1) else {
            return Ok(None);
        };
        let paid_outpoint = OutPoint::new(index_outpoint.txid, vout);
        let Some(paid) = store.get(&paid_outpoint)? else {
            debug!(
                "Stealth payment {} announced by {} is no longer unspent",
                paid_outpoint, index_outpoint
            );
            return Ok(None);
        };

        let ScriptClass::PubkeyHash(paid_fingerprint) = script::classify(&paid.script) else {
            return Ok(None);
        };

        let Some(tweak) = self.shared_secret(&index.ephemeral, &found.secret) else {
            return Ok(None);
        };
        let Some(expected) = self.one_time_key(stealth, &tweak) else {
            return Ok(None);
        };

        if AddressFingerprint::from_pubkey(&expected) != paid_fingerprint {
            return Ok(None);
        }

        Ok(Some(UnspentOutput {
            outpoint: paid_outpoint,
            value: paid.value,
            height: paid.height,
            address: found.address.clone(),
            stealth_tweak: Some(tweak),
        }))
    }

    // sha256 of the compressed point ephemeral * secret
    pub fn shared_secret(&self, ephemeral: &[u8; 33], secret: &SecretKey) -> Option<[u8; 32]> {
        let ephemeral = match PublicKey::from_slice(ephemeral) {
            Ok(key) => key,
            Err(e) => {
                debug!("Invalid ephemeral key in stealth index record: {}", e);
                return None;
            }
        };

        let point = ephemeral
            .mul_tweak(&self.secp, &Scalar::from(*secret))
            .ok()?;

        Some(Sha256::digest(point.serialize()).into())
    }

    // spend_key + tweak * G
    fn one_time_key(&self, stealth: &StealthAddress, tweak: &[u8; 32]) -> Option<PublicKey> {
        let tweak = Scalar::from_be_bytes(*tweak).ok()?;
        stealth.spend_key.add_exp_tweak(&self.secp, &tweak).ok()
    }
}

// Without a prefix every nonce matches
fn check_nonce(prefix: Option<&StealthPrefix>, payload: &[u8]) -> bool {
    let Some(prefix) = prefix else {
        return true;
    };
    if prefix.bits == 0 {
        return true;
    }

    let hash = Sha256::digest(payload);
    let bits = (prefix.bits as usize).min(32);
    let full_bytes = bits / 8;
    if hash[..full_bytes] != prefix.bytes[..full_bytes] {
        return false;
    }

    let rest = bits % 8;
    if rest == 0 {
        return true;
    }

    let mask = 0xffu8 << (8 - rest);
    hash[full_bytes] & mask == prefix.bytes[full_bytes] & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUnspentStore;
    use crate::test_util::{fingerprint, secret, stealth_payment, stealth_wallet_address, txid};
    use crate::types::WalletAddress;
    use std::sync::Arc;

    #[test]
    fn test_match_address_linear_search() {
        let (scan_secret, _) = secret(11);
        let (other_secret, _) = secret(12);
        let address = Arc::new(stealth_wallet_address(11, 21, "s"));

        let mut matcher = StealthMatcher::new(vec![other_secret, scan_secret]);
        let found = matcher.match_address(&address).unwrap();
        assert_eq!(found.secret, scan_secret);
        assert_eq!(found.fingerprint, address.fingerprint);

        // Regular addresses never match
        let regular = Arc::new(WalletAddress::pubkey_hash(fingerprint(1), ""));
        assert!(matcher.match_address(&regular).is_none());

        // No matching secret
        let unknown = Arc::new(stealth_wallet_address(13, 21, "u"));
        assert!(matcher.match_address(&unknown).is_none());
    }

    #[test]
    fn test_match_is_memoized_and_relabeled() {
        let (scan_secret, _) = secret(11);
        let address = Arc::new(stealth_wallet_address(11, 21, "old"));

        let mut matcher = StealthMatcher::new(vec![scan_secret]);
        assert!(matcher.match_address(&address).is_some());

        // The memo answers even after the secret list no longer holds the key
        matcher.secrets.clear();
        let relabeled = Arc::new(stealth_wallet_address(11, 21, "new"));
        let found = matcher.match_address(&relabeled).unwrap();
        assert_eq!(found.address.label, "new");

        // Replacing the secrets drops the memo
        matcher.set_secrets(Vec::new());
        assert!(matcher.match_address(&relabeled).is_none());
    }

    #[test]
    fn test_check_output() {
        let (scan_secret, _) = secret(11);
        let address = Arc::new(stealth_wallet_address(11, 21, "s"));
        let mut matcher = StealthMatcher::new(vec![scan_secret]);
        let found = matcher.match_address(&address).unwrap();

        let store = MemoryUnspentStore::new();
        let (index_record, paid_record) =
            stealth_payment(&address, 31, OutPoint::new(txid(4), 0), 700, 55, true);
        store.put(index_record.clone());
        store.put(paid_record.clone());

        let ScriptClass::StealthIndex(index) = script::classify(&index_record.script) else {
            panic!("Not a stealth index record");
        };
        let output = matcher
            .check_output(&found, &index_record.outpoint, &index, &store)
            .unwrap()
            .unwrap();
        assert_eq!(output.outpoint, paid_record.outpoint);
        assert_eq!(output.value, 700);
        assert_eq!(output.height, 55);
        assert!(output.stealth_tweak.is_some());
        assert!(Arc::ptr_eq(&output.address, &address));

        // Spent payment
        store.spend(&paid_record.outpoint);
        assert!(
            matcher
                .check_output(&found, &index_record.outpoint, &index, &store)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_check_output_rejects_foreign_payment() {
        let (scan_secret, _) = secret(11);
        let address = Arc::new(stealth_wallet_address(11, 21, "s"));
        let mut matcher = StealthMatcher::new(vec![scan_secret]);
        let found = matcher.match_address(&address).unwrap();

        // The paid output does not hash to the derived one-time key
        let store = MemoryUnspentStore::new();
        let (index_record, paid_record) =
            stealth_payment(&address, 31, OutPoint::new(txid(4), 0), 700, 55, false);
        store.put(index_record.clone());
        store.put(paid_record);

        let ScriptClass::StealthIndex(index) = script::classify(&index_record.script) else {
            panic!("Not a stealth index record");
        };
        assert!(
            matcher
                .check_output(&found, &index_record.outpoint, &index, &store)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_check_nonce() {
        let payload = [5u8; 37];
        let hash = Sha256::digest(payload);

        assert!(check_nonce(None, &payload));
        assert!(check_nonce(Some(&StealthPrefix { bits: 0, bytes: [0; 4] }), &payload));

        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&hash[..4]);
        assert!(check_nonce(Some(&StealthPrefix { bits: 12, bytes }), &payload));
        assert!(check_nonce(Some(&StealthPrefix { bits: 32, bytes }), &payload));

        // Flip a bit inside the first 12
        bytes[1] ^= 0x10;
        assert!(!check_nonce(Some(&StealthPrefix { bits: 12, bytes }), &payload));

        // ... but outside of the first 11 it is ignored
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&hash[..4]);
        bytes[1] ^= 0x10;
        assert!(check_nonce(Some(&StealthPrefix { bits: 11, bytes }), &payload));
    }
}
