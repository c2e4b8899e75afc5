use crate::btc::RawTxSource;
use crate::cache::BalanceSnapshot;
use crate::store::UnspentStore;
use bitcoincore_rpc::bitcoin::{Amount, Txid};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

pub const UNSPENT_FILE_NAME: &str = "unspent.txt";

/// Renders the balance report. With `details_limit` set, one line per output comes first,
/// prefixed with its confirmation count at `tip_height`.
pub fn format_balance(
    snapshot: &BalanceSnapshot,
    tip_height: u32,
    details_limit: Option<usize>,
) -> String {
    let mut s = String::new();

    if let Some(limit) = details_limit {
        for output in snapshot.outputs.iter().take(limit) {
            let confirmations = (tip_height as u64 + 1).saturating_sub(output.height as u64);
            let _ = writeln!(s, "{:7} {}", confirmations, output.text_line());
        }

        if snapshot.len() > limit {
            let _ = writeln!(s, "List of unspent outputs truncated to {} records", limit);
        }
    }

    let _ = writeln!(
        s,
        "Total balance: {:.8} BTC in {} unspent outputs",
        Amount::from_sat(snapshot.total).to_btc(),
        snapshot.len()
    );

    s
}

fn create_file(path: &Path) -> Result<std::fs::File, String> {
    std::fs::File::create(path).map_err(|e| {
        let msg = format!("Cannot create {}: {}", path.display(), e);
        error!("{}", msg);
        msg
    })
}

// Removes the files of a previous export. A folder without `unspent.txt` was not written by
// us and is left untouched.
fn clear_previous_export(dir: &Path) -> Result<(), String> {
    if !dir.join(UNSPENT_FILE_NAME).is_file() {
        return Ok(());
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        let msg = format!("Failed to read balance folder {}: {}", dir.display(), e);
        error!("{}", msg);
        msg
    })?;

    let mut removed = 0;
    for entry in entries {
        let path = entry
            .map_err(|e| {
                let msg = format!("Failed to read balance folder {}: {}", dir.display(), e);
                error!("{}", msg);
                msg
            })?
            .path();

        let owned = path.is_file()
            && (path.file_name().is_some_and(|name| name == UNSPENT_FILE_NAME)
                || path.extension().is_some_and(|ext| ext == "tx"));
        if !owned {
            continue;
        }

        std::fs::remove_file(&path).map_err(|e| {
            let msg = format!("Failed to remove {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })?;
        removed += 1;
    }

    debug!("Removed {} files of the previous export in {}", removed, dir.display());
    Ok(())
}

/// Rewrites `unspent.txt` and one `<txid>.tx` file per distinct transaction of the snapshot
/// in `dir`. Files of a previous export are removed first, anything else in `dir` is kept.
/// Every output must still be present in the unspent store.
pub fn write_balance_folder(
    snapshot: &BalanceSnapshot,
    dir: &Path,
    store: &dyn UnspentStore,
    tx_source: &dyn RawTxSource,
) -> Result<(), String> {
    clear_previous_export(dir)?;
    std::fs::create_dir_all(dir).map_err(|e| {
        let msg = format!("Failed to create balance folder {}: {}", dir.display(), e);
        error!("{}", msg);
        msg
    })?;

    let unspent_path = dir.join(UNSPENT_FILE_NAME);
    let mut unspent_file = create_file(&unspent_path)?;
    let mut written: HashSet<Txid> = HashSet::new();

    for output in &snapshot.outputs {
        let Some(record) = store.get(&output.outpoint)? else {
            let msg = format!(
                "Cached output {} is missing from the unspent set, the cache needs a rescan",
                output.outpoint
            );
            error!("{}", msg);
            return Err(msg);
        };

        writeln!(unspent_file, "{}", output.text_line()).map_err(|e| {
            let msg = format!("Failed to write {}: {}", unspent_path.display(), e);
            error!("{}", msg);
            msg
        })?;

        let txid = output.outpoint.txid;
        if !written.insert(txid) {
            continue;
        }

        let Some(raw) = tx_source.get_raw_transaction(&txid, record.height)? else {
            let msg = format!("Raw transaction {} not found at height {}", txid, record.height);
            error!("{}", msg);
            return Err(msg);
        };

        let tx_path = dir.join(format!("{}.tx", txid));
        create_file(&tx_path)?.write_all(&raw).map_err(|e| {
            let msg = format!("Failed to write {}: {}", tx_path.display(), e);
            error!("{}", msg);
            msg
        })?;
    }

    info!(
        "Balance folder {} updated with {} outputs from {} transactions",
        dir.display(),
        snapshot.len(),
        written.len()
    );

    Ok(())
}
