use crate::cache::UnspentCache;
use crate::output::ScanOutput;
use crate::script::{self, ScriptClass};
use crate::stealth::{StealthMatch, StealthMatcher};
use crate::store::UnspentStore;
use crate::types::{UnspentOutput, WalletAddressRef};
use balance_util::AddressFingerprint;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub known: usize,
    pub new_regular: usize,
    pub new_stealth: usize,
    pub unmatched_stealth: usize,
    pub scanned: u64,
    pub found: usize,
    pub duplicates: usize,
}

#[derive(Default)]
struct SyncPlan {
    known: Vec<WalletAddressRef>,
    new_regular: Vec<WalletAddressRef>,

    // Fingerprint prefix -> new regular addresses sharing it
    regular_filter: HashMap<u64, Vec<WalletAddressRef>>,
    new_stealth: Vec<StealthMatch>,
    unmatched_stealth: usize,
}

impl SyncPlan {
    fn has_new(&self) -> bool {
        !self.new_regular.is_empty() || !self.new_stealth.is_empty()
    }

    // The prefix only filters, the full fingerprint decides
    fn find_regular(&self, fingerprint: &AddressFingerprint) -> Option<&WalletAddressRef> {
        self.regular_filter
            .get(&fingerprint.prefix())?
            .iter()
            .find(|address| address.fingerprint == *fingerprint)
    }
}

/// Reconciles the unspent cache with the active wallet's address list.
///
/// Addresses already cached are flagged and re-stamped. The others are collected and looked
/// up with one pass over the whole unspent set. Nothing in the cache changes until that pass
/// has succeeded, so a storage failure leaves the previous state intact.
pub struct WalletSynchronizer<'a> {
    cache: &'a mut UnspentCache,
    matcher: &'a mut StealthMatcher,
    store: &'a dyn UnspentStore,
    precaching_complete: bool,
    show_progress: bool,
}

impl<'a> WalletSynchronizer<'a> {
    pub fn new(
        cache: &'a mut UnspentCache,
        matcher: &'a mut StealthMatcher,
        store: &'a dyn UnspentStore,
    ) -> Self {
        Self {
            cache,
            matcher,
            store,
            precaching_complete: false,
            show_progress: false,
        }
    }

    pub fn precaching_complete(mut self, complete: bool) -> Self {
        self.precaching_complete = complete;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn run(mut self, wallet: &[WalletAddressRef]) -> Result<SyncSummary, String> {
        let plan = self.plan(wallet);

        let (found, scanned) = if plan.has_new() {
            self.full_scan(&plan)?
        } else {
            (Vec::new(), 0)
        };

        let mut summary = self.commit(&plan, found);
        summary.scanned = scanned;
        Ok(summary)
    }

    fn plan(&mut self, wallet: &[WalletAddressRef]) -> SyncPlan {
        let mut plan = SyncPlan::default();
        let mut seen = HashSet::new();

        for address in wallet {
            if !seen.insert(address.fingerprint) {
                debug!("Address {} listed twice in wallet, ignored", address);
                continue;
            }

            if self.cache.record(&address.fingerprint).is_some() {
                plan.known.push(address.clone());
                continue;
            }

            if !address.is_stealth() {
                plan.regular_filter
                    .entry(address.fingerprint.prefix())
                    .or_default()
                    .push(address.clone());
                plan.new_regular.push(address.clone());
                continue;
            }

            match self.matcher.match_address(address) {
                Some(found) => plan.new_stealth.push(found),
                None => {
                    plan.unmatched_stealth += 1;
                    let secrets = self.matcher.secret_count();
                    if self.precaching_complete {
                        warn!("No matching secret among {} for {}", secrets, address);
                    } else {
                        debug!("No matching secret among {} for {}", secrets, address);
                    }
                }
            }
        }

        plan
    }

    fn full_scan(&self, plan: &SyncPlan) -> Result<(Vec<UnspentOutput>, u64), String> {
        info!(
            "Fetching a new balance for {} regular and {} stealth addresses",
            plan.new_regular.len(),
            plan.new_stealth.len()
        );

        let output = ScanOutput::new(self.show_progress);
        output.set_message("scanning unspent outputs");

        let mut found = Vec::new();
        let mut failure = None;
        let ret = self.store.browse_all(&mut |record| {
            output.inc_scanned(1);

            match script::classify(&record.script) {
                ScriptClass::PubkeyHash(fingerprint) | ScriptClass::ScriptHash(fingerprint) => {
                    if let Some(address) = plan.find_regular(&fingerprint) {
                        found.push(UnspentOutput {
                            outpoint: record.outpoint,
                            value: record.value,
                            height: record.height,
                            address: address.clone(),
                            stealth_tweak: None,
                        });
                    }
                }
                ScriptClass::StealthIndex(index) => {
                    // One payment belongs to one address, stop at the first owner
                    for candidate in &plan.new_stealth {
                        match self.matcher.check_output(
                            candidate,
                            &record.outpoint,
                            &index,
                            self.store,
                        ) {
                            Ok(Some(unspent)) => {
                                found.push(unspent);
                                break;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                failure = Some(e);
                                return ControlFlow::Break(());
                            }
                        }
                    }
                }
                ScriptClass::Other => {}
            }

            ControlFlow::Continue(())
        });

        if let Err(e) = ret.and_then(|_| failure.map_or(Ok(()), Err)) {
            let msg = format!("Full scan of unspent outputs aborted: {}", e);
            error!("{}", msg);
            output.finish("aborted");
            return Err(msg);
        }

        let scanned = output.scanned();
        output.finish(&format!("found {} outputs", found.len()));
        info!(
            "Full scan visited {} unspent records, found {} outputs",
            scanned,
            found.len()
        );

        Ok((found, scanned))
    }

    fn commit(self, plan: &SyncPlan, found: Vec<UnspentOutput>) -> SyncSummary {
        self.cache.clear_in_wallet();

        for address in &plan.known {
            self.cache.mark_in_wallet(&address.fingerprint, true);
            self.cache.restamp(address);
        }

        let new_addresses = plan
            .new_regular
            .iter()
            .chain(plan.new_stealth.iter().map(|found| &found.address));
        for address in new_addresses {
            self.cache.ensure_slot(address);
            self.cache.mark_in_wallet(&address.fingerprint, true);
        }

        let mut summary = SyncSummary {
            known: plan.known.len(),
            new_regular: plan.new_regular.len(),
            new_stealth: plan.new_stealth.len(),
            unmatched_stealth: plan.unmatched_stealth,
            ..Default::default()
        };

        for output in found {
            if self.cache.contains(&output.outpoint) {
                warn!("{} - already on the list", output.outpoint);
                summary.duplicates += 1;
                continue;
            }

            let fingerprint = output.address.fingerprint;
            self.cache.add_output(&fingerprint, output);
            summary.found += 1;
        }

        summary
    }
}
