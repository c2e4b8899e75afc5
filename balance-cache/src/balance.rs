use crate::btc::RawTxSource;
use crate::cache::{BalanceSnapshot, UnspentCache};
use crate::export;
use crate::script;
use crate::stealth::StealthMatcher;
use crate::store::UnspentStoreRef;
use crate::sync::{SyncSummary, WalletSynchronizer};
use crate::types::{CacheStats, UnspentOutput, WalletAddressRef};
use balance_util::DEFAULT_DETAILS_LIMIT;
use bitcoincore_rpc::bitcoin::secp256k1::SecretKey;
use bitcoincore_rpc::bitcoin::{Amount, OutPoint, ScriptBuf};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

// A freshly created output as delivered by the chain acceptance pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifiedOutput {
    pub script: ScriptBuf,
    pub value: u64,
    pub height: u32,
}

struct BalanceState {
    cache: UnspentCache,
    matcher: StealthMatcher,
    wallet: Option<Vec<WalletAddressRef>>,
    snapshot: BalanceSnapshot,

    // Set when a notification moves the balance, cleared by whoever consumes it
    balance_changed: bool,

    // True until the first successful resync and after any aborted one
    invalid: bool,
    precaching_complete: bool,
}

/// Unspent outputs of the monitored addresses and the active wallet's balance.
///
/// One lock guards the whole state and every public method takes it for its full duration,
/// including full scans, so readers never see a half applied notification or resync.
pub struct BalanceCache {
    store: UnspentStoreRef,
    show_progress: bool,
    details_limit: usize,
    state: Mutex<BalanceState>,
}

impl BalanceCache {
    pub fn new(store: UnspentStoreRef) -> Self {
        Self {
            store,
            show_progress: false,
            details_limit: DEFAULT_DETAILS_LIMIT,
            state: Mutex::new(BalanceState {
                cache: UnspentCache::new(),
                matcher: StealthMatcher::new(Vec::new()),
                wallet: None,
                snapshot: BalanceSnapshot::default(),
                balance_changed: false,
                invalid: true,
                precaching_complete: false,
            }),
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_details_limit(mut self, limit: usize) -> Self {
        self.details_limit = limit;
        self
    }

    pub fn set_stealth_secrets(&self, secrets: Vec<SecretKey>) {
        let mut state = self.state.lock().unwrap();
        state.matcher.set_secrets(secrets);
    }

    /// Applies one output event from block acceptance: `Some` for a created output, `None`
    /// for a spent one. Events must arrive in chain order.
    pub fn notify(&self, outpoint: &OutPoint, created: Option<NotifiedOutput>) {
        let mut state = self.state.lock().unwrap();

        let update_wallet = match created {
            Some(created) => Self::add_notified(&mut state, outpoint, created),
            None => match state.cache.remove_output(outpoint) {
                Some((removed, in_wallet)) => {
                    debug!("Spent {} of {}", outpoint, removed.address);
                    in_wallet
                }
                None => false,
            },
        };

        if update_wallet {
            Self::rebuild_snapshot(&mut state);
            state.balance_changed = true;
        }
    }

    fn add_notified(state: &mut BalanceState, outpoint: &OutPoint, created: NotifiedOutput) -> bool {
        let Some(fingerprint) = script::extract_fingerprint(&created.script) else {
            return false;
        };

        // Only addresses that already own a slot are monitored
        let Some(address) = state.cache.slot_address(&fingerprint).cloned() else {
            return false;
        };

        debug!(
            "New output {} of {} for {}",
            outpoint,
            Amount::from_sat(created.value),
            address
        );
        state.cache.add_output(
            &fingerprint,
            UnspentOutput {
                outpoint: *outpoint,
                value: created.value,
                height: created.height,
                address,
                stealth_tweak: None,
            },
        );

        state
            .cache
            .record(&fingerprint)
            .is_some_and(|record| record.in_wallet)
    }

    /// Replaces the active wallet and brings the cache up to date with it.
    pub fn load_wallet(&self, addresses: Vec<WalletAddressRef>) -> Result<SyncSummary, String> {
        let mut state = self.state.lock().unwrap();
        info!("Loading wallet with {} addresses", addresses.len());

        self.resync_locked(&mut state, Some(addresses))
    }

    /// Warms the cache with the addresses of every known wallet at startup. The merged list,
    /// first occurrence of each fingerprint kept, becomes the active wallet.
    pub fn precache_wallets(&self, wallets: Vec<Vec<WalletAddressRef>>) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();

        let mut seen = HashSet::new();
        let merged: Vec<WalletAddressRef> = wallets
            .into_iter()
            .flatten()
            .filter(|address| seen.insert(address.fingerprint))
            .collect();

        let ret = if merged.is_empty() {
            Ok(())
        } else {
            info!("Fetching balance of {} addresses", merged.len());
            self.resync_locked(&mut state, Some(merged)).map(|_| {
                info!(
                    "Total cached balance: {:.8} BTC in {} unspent outputs",
                    Amount::from_sat(state.snapshot.total).to_btc(),
                    state.snapshot.len()
                );
            })
        };

        state.precaching_complete = true;
        ret
    }

    pub fn resynchronize(&self) -> Result<SyncSummary, String> {
        let mut state = self.state.lock().unwrap();
        self.resync_locked(&mut state, None)
    }

    // A new wallet list only becomes active once its resync succeeded, the in-wallet flags
    // always describe `state.wallet`
    fn resync_locked(
        &self,
        state: &mut BalanceState,
        new_wallet: Option<Vec<WalletAddressRef>>,
    ) -> Result<SyncSummary, String> {
        let wallet = match new_wallet {
            Some(wallet) => wallet,
            None => state.wallet.clone().unwrap_or_default(),
        };

        let ret = WalletSynchronizer::new(&mut state.cache, &mut state.matcher, &**self.store)
            .precaching_complete(state.precaching_complete)
            .show_progress(self.show_progress)
            .run(&wallet);

        match ret {
            Ok(summary) => {
                state.wallet = Some(wallet);
                Self::rebuild_snapshot(state);
                state.invalid = false;

                info!(
                    "Wallet synchronized: {} known, {} new regular, {} new stealth, {} outputs found, balance {:.8} BTC",
                    summary.known,
                    summary.new_regular,
                    summary.new_stealth,
                    summary.found,
                    Amount::from_sat(state.snapshot.total).to_btc()
                );
                Ok(summary)
            }
            Err(e) => {
                state.invalid = true;

                let msg = format!("Wallet synchronization failed: {}", e);
                error!("{}", msg);
                Err(msg)
            }
        }
    }

    // Wallet order, each fingerprint once, then sorted by the snapshot itself
    fn rebuild_snapshot(state: &mut BalanceState) {
        let mut seen = HashSet::new();
        let mut outputs = Vec::new();

        for address in state.wallet.iter().flatten() {
            if !seen.insert(address.fingerprint) {
                continue;
            }

            if let Some(record) = state.cache.record(&address.fingerprint) {
                if record.in_wallet {
                    outputs.extend_from_slice(state.cache.slot_outputs(&address.fingerprint));
                }
            }
        }

        state.snapshot = BalanceSnapshot::from_outputs(outputs);
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        self.state.lock().unwrap().snapshot.clone()
    }

    pub fn last_balance(&self) -> u64 {
        self.state.lock().unwrap().snapshot.total
    }

    pub fn take_balance_changed(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        std::mem::replace(&mut state.balance_changed, false)
    }

    pub fn is_invalid(&self) -> bool {
        self.state.lock().unwrap().invalid
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().unwrap().cache.stats()
    }

    pub fn dump_balance(&self, tip_height: u32, details: bool) -> String {
        let state = self.state.lock().unwrap();
        let limit = if details {
            Some(self.details_limit)
        } else {
            None
        };

        export::format_balance(&state.snapshot, tip_height, limit)
    }

    /// Writes the balance folder, resynchronizing first if the last resync did not complete.
    pub fn export_balance_folder(
        &self,
        dir: &Path,
        tx_source: &dyn RawTxSource,
    ) -> Result<(), String> {
        let mut state = self.state.lock().unwrap();
        if state.invalid {
            self.resync_locked(&mut state, None)?;
        }

        export::write_balance_folder(&state.snapshot, dir, &**self.store, tx_source)
    }
}

pub type BalanceCacheRef = Arc<BalanceCache>;
