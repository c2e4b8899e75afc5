use balance_util::AddressFingerprint;
use bitcoincore_rpc::bitcoin::hashes::Hash;
use bitcoincore_rpc::bitcoin::{PubkeyHash, Script, ScriptBuf, ScriptHash};

// OP_RETURN, push 38 bytes, stealth marker 0x06, nonce (4 bytes), ephemeral pubkey (33 bytes)
pub const STEALTH_INDEX_SCRIPT_LEN: usize = 40;
const STEALTH_INDEX_HEADER: [u8; 3] = [0x6a, 0x26, 0x06];

const P2PKH_HASH_OFFSET: usize = 3;
const P2SH_HASH_OFFSET: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StealthIndex {
    pub nonce: [u8; 4],
    pub ephemeral: [u8; 33],
}

impl StealthIndex {
    // The bytes the nonce prefix filter is computed over
    pub fn payload(&self) -> [u8; 37] {
        let mut payload = [0u8; 37];
        payload[..4].copy_from_slice(&self.nonce);
        payload[4..].copy_from_slice(&self.ephemeral);
        payload
    }

    pub fn to_script(&self) -> ScriptBuf {
        let mut bytes = Vec::with_capacity(STEALTH_INDEX_SCRIPT_LEN);
        bytes.extend_from_slice(&STEALTH_INDEX_HEADER);
        bytes.extend_from_slice(&self.payload());
        ScriptBuf::from(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptClass {
    PubkeyHash(AddressFingerprint),
    ScriptHash(AddressFingerprint),
    StealthIndex(StealthIndex),
    Other,
}

fn fingerprint_at(bytes: &[u8], offset: usize) -> Option<AddressFingerprint> {
    let hash: [u8; 20] = bytes.get(offset..offset + 20)?.try_into().ok()?;
    Some(AddressFingerprint::from_byte_array(hash))
}

fn stealth_index(bytes: &[u8]) -> Option<StealthIndex> {
    if bytes.len() != STEALTH_INDEX_SCRIPT_LEN || bytes[..3] != STEALTH_INDEX_HEADER {
        return None;
    }

    Some(StealthIndex {
        nonce: bytes[3..7].try_into().ok()?,
        ephemeral: bytes[7..40].try_into().ok()?,
    })
}

pub fn classify(script: &Script) -> ScriptClass {
    let bytes = script.as_bytes();
    if script.is_p2pkh() {
        if let Some(fingerprint) = fingerprint_at(bytes, P2PKH_HASH_OFFSET) {
            return ScriptClass::PubkeyHash(fingerprint);
        }
    } else if script.is_p2sh() {
        if let Some(fingerprint) = fingerprint_at(bytes, P2SH_HASH_OFFSET) {
            return ScriptClass::ScriptHash(fingerprint);
        }
    } else if let Some(index) = stealth_index(bytes) {
        return ScriptClass::StealthIndex(index);
    }

    ScriptClass::Other
}

/// Resolves an output script to the fingerprint of the address it pays, if any.
pub fn extract_fingerprint(script: &Script) -> Option<AddressFingerprint> {
    match classify(script) {
        ScriptClass::PubkeyHash(fingerprint) | ScriptClass::ScriptHash(fingerprint) => {
            Some(fingerprint)
        }
        _ => None,
    }
}

pub fn p2pkh_script(fingerprint: &AddressFingerprint) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(fingerprint.to_byte_array()))
}

pub fn p2sh_script(fingerprint: &AddressFingerprint) -> ScriptBuf {
    ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(fingerprint.to_byte_array()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::fingerprint;

    #[test]
    fn test_classify_p2pkh_and_p2sh() {
        let fp = fingerprint(9);

        let script = p2pkh_script(&fp);
        assert_eq!(script.len(), 25);
        assert_eq!(classify(&script), ScriptClass::PubkeyHash(fp));
        assert_eq!(extract_fingerprint(&script), Some(fp));

        let script = p2sh_script(&fp);
        assert_eq!(script.len(), 23);
        assert_eq!(classify(&script), ScriptClass::ScriptHash(fp));
        assert_eq!(extract_fingerprint(&script), Some(fp));
    }

    #[test]
    fn test_classify_stealth_index() {
        let index = StealthIndex {
            nonce: [1, 2, 3, 4],
            ephemeral: [0x02; 33],
        };
        let script = index.to_script();
        assert_eq!(script.len(), STEALTH_INDEX_SCRIPT_LEN);
        assert_eq!(classify(&script), ScriptClass::StealthIndex(index));

        // A stealth index record never resolves to an address by itself
        assert_eq!(extract_fingerprint(&script), None);

        // Wrong marker byte
        let mut bytes = script.to_bytes();
        bytes[2] = 0x07;
        assert_eq!(classify(&ScriptBuf::from(bytes)), ScriptClass::Other);

        // Truncated
        let bytes = script.to_bytes();
        assert_eq!(classify(&ScriptBuf::from(bytes[..39].to_vec())), ScriptClass::Other);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify(&ScriptBuf::new()), ScriptClass::Other);
        assert_eq!(classify(&ScriptBuf::from(vec![0x6a, 0x01, 0x00])), ScriptClass::Other);
        assert_eq!(extract_fingerprint(&ScriptBuf::from(vec![0u8; 25])), None);
    }
}
