use crate::types::{CacheStats, UnspentOutput, WalletAddressRef};
use balance_util::AddressFingerprint;
use bitcoincore_rpc::bitcoin::OutPoint;
use std::collections::HashMap;

pub struct AddressSlot {
    pub address: WalletAddressRef,
    pub outputs: Vec<UnspentOutput>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBalanceRecord {
    pub in_wallet: bool,
    pub slot: usize,

    // Always the sum of the slot's output values
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLocation {
    pub slot: usize,
    pub pos: usize,
}

/// Unspent outputs of every monitored address.
///
/// Slots are appended and never reused. Each output lives in exactly one slot and has exactly
/// one reverse index entry, keyed by the full outpoint, that records where it lives.
pub struct UnspentCache {
    slots: Vec<AddressSlot>,
    records: HashMap<AddressFingerprint, AddressBalanceRecord>,
    reverse: HashMap<OutPoint, CacheLocation>,
}

impl UnspentCache {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            records: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    pub fn ensure_slot(&mut self, address: &WalletAddressRef) -> usize {
        if let Some(record) = self.records.get(&address.fingerprint) {
            return record.slot;
        }

        let slot = self.slots.len();
        self.slots.push(AddressSlot {
            address: address.clone(),
            outputs: Vec::new(),
        });
        self.records.insert(
            address.fingerprint,
            AddressBalanceRecord {
                in_wallet: false,
                slot,
                value: 0,
            },
        );

        debug!("New cache slot {} for {}", slot, address);
        slot
    }

    pub fn record(&self, fingerprint: &AddressFingerprint) -> Option<&AddressBalanceRecord> {
        self.records.get(fingerprint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.reverse.contains_key(outpoint)
    }

    pub fn location(&self, outpoint: &OutPoint) -> Option<CacheLocation> {
        self.reverse.get(outpoint).copied()
    }

    pub fn slot_address(&self, fingerprint: &AddressFingerprint) -> Option<&WalletAddressRef> {
        let record = self.records.get(fingerprint)?;
        Some(&self.slots[record.slot].address)
    }

    pub fn slot_outputs(&self, fingerprint: &AddressFingerprint) -> &[UnspentOutput] {
        match self.records.get(fingerprint) {
            Some(record) => &self.slots[record.slot].outputs,
            None => &[],
        }
    }

    /// Appends an output to the slot of `fingerprint`. The slot must exist and the outpoint
    /// must not be tracked yet; both are invariants of the callers, so a violation panics.
    pub fn add_output(&mut self, fingerprint: &AddressFingerprint, output: UnspentOutput) {
        let Some(record) = self.records.get_mut(fingerprint) else {
            panic!("No cache slot for {} when adding {}", fingerprint, output.outpoint);
        };

        let slot = &mut self.slots[record.slot];
        let location = CacheLocation {
            slot: record.slot,
            pos: slot.outputs.len(),
        };
        let ret = self.reverse.insert(output.outpoint, location);
        assert!(
            ret.is_none(),
            "Duplicate unspent output added to cache: {}",
            output.outpoint
        );

        record.value = record.value.checked_add(output.value).unwrap_or_else(|| {
            panic!("Balance overflow for {} adding {}", fingerprint, output.outpoint)
        });
        slot.outputs.push(output);
    }

    /// Removes a tracked output and returns it with the in-wallet flag of its owner.
    /// Outputs the cache does not track are ignored.
    pub fn remove_output(&mut self, outpoint: &OutPoint) -> Option<(UnspentOutput, bool)> {
        let location = self.reverse.remove(outpoint)?;

        let slot = &mut self.slots[location.slot];
        assert!(
            location.pos < slot.outputs.len() && slot.outputs[location.pos].outpoint == *outpoint,
            "Reverse index entry for {} points at slot {} pos {} holding another output",
            outpoint,
            location.slot,
            location.pos
        );

        let output = slot.outputs.swap_remove(location.pos);
        if let Some(moved) = slot.outputs.get(location.pos) {
            let Some(moved_location) = self.reverse.get_mut(&moved.outpoint) else {
                panic!("Missing reverse index entry for cached output {}", moved.outpoint);
            };
            moved_location.pos = location.pos;
        }

        let fingerprint = slot.address.fingerprint;
        let Some(record) = self.records.get_mut(&fingerprint) else {
            panic!("No balance record for {} owning {}", slot.address, outpoint);
        };
        record.value = record.value.checked_sub(output.value).unwrap_or_else(|| {
            panic!("Balance underflow for {} removing {}", fingerprint, outpoint)
        });

        Some((output, record.in_wallet))
    }

    pub fn mark_in_wallet(&mut self, fingerprint: &AddressFingerprint, flag: bool) -> bool {
        match self.records.get_mut(fingerprint) {
            Some(record) => {
                record.in_wallet = flag;
                true
            }
            None => false,
        }
    }

    pub fn clear_in_wallet(&mut self) {
        for record in self.records.values_mut() {
            record.in_wallet = false;
        }
    }

    // Point the slot and every output in it at the wallet's current entry, keeping the outputs
    pub fn restamp(&mut self, address: &WalletAddressRef) {
        let Some(record) = self.records.get(&address.fingerprint) else {
            return;
        };

        let slot = &mut self.slots[record.slot];
        slot.address = address.clone();
        for output in slot.outputs.iter_mut() {
            output.address = address.clone();
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            slots: self.slots.len(),
            outputs: self.reverse.len(),
            in_wallet: self.records.values().filter(|r| r.in_wallet).count(),
        }
    }

    // Walks every index and panics on the first broken invariant
    #[cfg(test)]
    pub fn check_consistency(&self) {
        let mut outputs = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            let record = self.records.get(&slot.address.fingerprint).unwrap();
            assert_eq!(record.slot, index);
            assert_eq!(
                record.value,
                slot.outputs.iter().map(|o| o.value).sum::<u64>(),
                "Running balance mismatch for {}",
                slot.address
            );

            for (pos, output) in slot.outputs.iter().enumerate() {
                assert_eq!(
                    self.reverse.get(&output.outpoint),
                    Some(&CacheLocation { slot: index, pos })
                );
            }
            outputs += slot.outputs.len();
        }

        assert_eq!(outputs, self.reverse.len());
        assert_eq!(self.records.len(), self.slots.len());
    }
}

impl Default for UnspentCache {
    fn default() -> Self {
        Self::new()
    }
}
