use balance_util::AddressFingerprint;
use bitcoincore_rpc::bitcoin::secp256k1::PublicKey;
use bitcoincore_rpc::bitcoin::{Address, Amount, Network, OutPoint};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressKind {
    PubkeyHash,
    ScriptHash,
    Stealth,
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressKind::PubkeyHash => "p2pkh",
            AddressKind::ScriptHash => "p2sh",
            AddressKind::Stealth => "stealth",
        };
        f.write_str(name)
    }
}

// Optional filter on the nonce of stealth index records, `bits` leading bits of `bytes`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealthPrefix {
    pub bits: u8,
    pub bytes: [u8; 4],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthAddress {
    pub scan_key: PublicKey,
    pub spend_key: PublicKey,
    pub prefix: Option<StealthPrefix>,
}

impl StealthAddress {
    pub fn new(scan_key: PublicKey, spend_key: PublicKey) -> Self {
        Self {
            scan_key,
            spend_key,
            prefix: None,
        }
    }

    /// Parses `<scan key>:<spend key>`, both hex encoded public keys.
    pub fn from_keys_str(keys: &str) -> Result<Self, String> {
        let Some((scan, spend)) = keys.split_once(':') else {
            return Err(format!("Invalid stealth address {}, expected <scan>:<spend>", keys));
        };

        let scan_key = PublicKey::from_str(scan)
            .map_err(|e| format!("Invalid stealth scan key {}: {}", scan, e))?;
        let spend_key = PublicKey::from_str(spend)
            .map_err(|e| format!("Invalid stealth spend key {}: {}", spend, e))?;

        Ok(Self::new(scan_key, spend_key))
    }

    pub fn with_prefix(mut self, prefix: StealthPrefix) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn fingerprint(&self) -> AddressFingerprint {
        AddressFingerprint::from_pubkey(&self.scan_key)
    }
}

/// One entry of the active wallet's address list. Owned by the wallet; the cache only keeps
/// shared references and re-stamps them on every resynchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAddress {
    pub kind: AddressKind,
    pub fingerprint: AddressFingerprint,
    pub label: String,
    pub stealth: Option<StealthAddress>,
}

impl WalletAddress {
    pub fn pubkey_hash(fingerprint: AddressFingerprint, label: &str) -> Self {
        Self {
            kind: AddressKind::PubkeyHash,
            fingerprint,
            label: label.to_string(),
            stealth: None,
        }
    }

    pub fn script_hash(fingerprint: AddressFingerprint, label: &str) -> Self {
        Self {
            kind: AddressKind::ScriptHash,
            fingerprint,
            label: label.to_string(),
            stealth: None,
        }
    }

    pub fn stealth(stealth: StealthAddress, label: &str) -> Self {
        Self {
            kind: AddressKind::Stealth,
            fingerprint: stealth.fingerprint(),
            label: label.to_string(),
            stealth: Some(stealth),
        }
    }

    // Only legacy P2PKH and P2SH addresses carry a hash160 the cache can track
    pub fn from_address_str(address: &str, network: Network, label: &str) -> Result<Self, String> {
        let addr = Address::from_str(address)
            .map_err(|e| format!("Invalid address {}: {}", address, e))?
            .require_network(network)
            .map_err(|e| format!("Address network mismatch for {}: {}", address, e))?;

        if let Some(hash) = addr.pubkey_hash() {
            return Ok(Self::pubkey_hash(hash.into(), label));
        }

        if let Some(hash) = addr.script_hash() {
            return Ok(Self::script_hash(hash.into(), label));
        }

        Err(format!("Unsupported address type for {}", address))
    }

    pub fn is_stealth(&self) -> bool {
        self.stealth.is_some()
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.fingerprint)?;
        if !self.label.is_empty() {
            write!(f, " ({})", self.label)?;
        }
        Ok(())
    }
}

pub type WalletAddressRef = Arc<WalletAddress>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub height: u32,
    pub address: WalletAddressRef,

    // Shared secret of a stealth payment, needed later to derive the spending key
    pub stealth_tweak: Option<[u8; 32]>,
}

impl UnspentOutput {
    pub fn text_line(&self) -> String {
        format!(
            "{}-{:03} # {:.8} BTC @ {}, {}",
            self.outpoint.txid,
            self.outpoint.vout,
            Amount::from_sat(self.value).to_btc(),
            self.height,
            self.address
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub slots: usize,
    pub outputs: usize,
    pub in_wallet: usize,
}
