use crate::types::UnspentOutput;

/// The active wallet's unspent outputs, oldest first, with their total value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub outputs: Vec<UnspentOutput>,
    pub total: u64,
}

impl BalanceSnapshot {
    // Ties on height are ordered by outpoint so rebuilds are deterministic
    pub fn from_outputs(mut outputs: Vec<UnspentOutput>) -> Self {
        outputs.sort_by(|a, b| {
            a.height
                .cmp(&b.height)
                .then_with(|| a.outpoint.cmp(&b.outpoint))
        });
        let total = outputs.iter().map(|o| o.value).sum();

        Self { outputs, total }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{fingerprint, txid, unspent};
    use crate::types::WalletAddress;
    use bitcoincore_rpc::bitcoin::OutPoint;
    use std::sync::Arc;

    #[test]
    fn test_sorted_by_height_then_outpoint() {
        let a = Arc::new(WalletAddress::pubkey_hash(fingerprint(1), ""));
        let outputs = vec![
            unspent(OutPoint::new(txid(3), 0), 30, 300, &a),
            unspent(OutPoint::new(txid(2), 1), 21, 100, &a),
            unspent(OutPoint::new(txid(1), 0), 10, 200, &a),
            unspent(OutPoint::new(txid(2), 0), 20, 100, &a),
        ];

        let snapshot = BalanceSnapshot::from_outputs(outputs);
        let order: Vec<u64> = snapshot.outputs.iter().map(|o| o.value).collect();
        assert_eq!(order, vec![20, 21, 10, 30]);
        assert_eq!(snapshot.total, 81);
        assert_eq!(snapshot.len(), 4);

        let empty = BalanceSnapshot::from_outputs(Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.total, 0);
    }
}
