#[macro_use]
extern crate log;

use balance_cache::btc::{BTCRpcClient, create_raw_tx_source};
use balance_cache::config::{BalanceCacheConfig, BalanceCacheConfigRef};
use balance_cache::store::{UnspentDB, UnspentStore};
use balance_cache::{BalanceCache, BalanceSnapshot, StealthAddress, WalletAddress};
use bitcoincore_rpc::bitcoin::secp256k1::SecretKey;
use balance_util::LogConfig;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "balance-cache")]
#[command(author = "buckyos")]
#[command(version = "0.1.0")]
#[command(about = "Unspent output balance of a set of Bitcoin addresses", long_about = None)]
struct BalanceCacheCli {
    /// Wallet address, legacy P2PKH or P2SH of the configured network. May be repeated.
    #[arg(short, long = "address", value_name = "ADDR", required_unless_present = "stealth")]
    addresses: Vec<String>,

    /// Stealth wallet address as hex public keys. May be repeated.
    #[arg(long, value_name = "SCAN:SPEND")]
    stealth: Vec<String>,

    /// Hex private scan key tried against the stealth addresses. May be repeated.
    #[arg(long = "scan-secret", value_name = "HEX")]
    scan_secrets: Vec<String>,

    /// Also print logs to the console
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: BalanceCacheCommands,
}

#[derive(Subcommand, Debug, Clone)]
#[command(rename_all = "kebab-case")]
enum BalanceCacheCommands {
    /// Print the wallet balance
    Balance {
        /// List the unspent outputs too
        #[arg(short, long)]
        details: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,

        /// Chain tip used for confirmation counts, queried from the node when omitted
        #[arg(long)]
        tip: Option<u32>,
    },

    /// Write unspent.txt and the raw transactions into the balance folder
    Export {
        /// Overrides the configured balance folder
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct OutputView {
    txid: String,
    vout: u32,
    value: u64,
    height: u32,
    address: String,
    label: String,
    stealth: bool,
}

#[derive(Serialize)]
struct BalanceView {
    total: u64,
    count: usize,
    outputs: Vec<OutputView>,
}

impl From<&BalanceSnapshot> for BalanceView {
    fn from(snapshot: &BalanceSnapshot) -> Self {
        let outputs = snapshot
            .outputs
            .iter()
            .map(|o| OutputView {
                txid: o.outpoint.txid.to_string(),
                vout: o.outpoint.vout,
                value: o.value,
                height: o.height,
                address: o.address.fingerprint.to_string(),
                label: o.address.label.clone(),
                stealth: o.stealth_tweak.is_some(),
            })
            .collect();

        Self {
            total: snapshot.total,
            count: snapshot.len(),
            outputs,
        }
    }
}

fn exit_with_error(msg: &str) -> ! {
    error!("{}", msg);
    eprintln!("{}", msg);
    std::process::exit(1);
}

fn main() {
    let cli = BalanceCacheCli::parse();

    let (_lock, _guard) = match balance_util::init_process_lock(balance_util::BALANCE_CACHE_SERVICE_NAME) {
        Ok(ret) => ret,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let log_config =
        LogConfig::new(balance_util::BALANCE_CACHE_SERVICE_NAME).enable_console(cli.verbose);
    if let Err(e) = balance_util::init_log(log_config) {
        eprintln!("Failed to init log: {}", e);
        std::process::exit(1);
    }

    let root_dir = balance_util::get_service_dir(balance_util::BALANCE_CACHE_SERVICE_NAME);
    info!("Using service directory: {}", root_dir.display());

    let config: BalanceCacheConfigRef = match BalanceCacheConfig::load(&root_dir) {
        Ok(config) => Arc::new(config),
        Err(e) => exit_with_error(&format!("Failed to load config: {}", e)),
    };

    let mut wallet = Vec::with_capacity(cli.addresses.len());
    for address in &cli.addresses {
        match WalletAddress::from_address_str(address, config.btc.network(), "") {
            Ok(addr) => wallet.push(Arc::new(addr)),
            Err(e) => exit_with_error(&e),
        }
    }
    for keys in &cli.stealth {
        match StealthAddress::from_keys_str(keys) {
            Ok(stealth) => wallet.push(Arc::new(WalletAddress::stealth(stealth, ""))),
            Err(e) => exit_with_error(&e),
        }
    }

    let mut secrets = Vec::with_capacity(cli.scan_secrets.len());
    for hex in &cli.scan_secrets {
        match SecretKey::from_str(hex) {
            Ok(secret) => secrets.push(secret),
            Err(e) => exit_with_error(&format!("Invalid scan secret: {}", e)),
        }
    }

    let db = match UnspentDB::new(&config.db_dir(&root_dir)) {
        Ok(db) => db,
        Err(e) => exit_with_error(&format!("Failed to open unspent database: {}", e)),
    };
    let store = Arc::new(Box::new(db) as Box<dyn UnspentStore>);

    let cache = BalanceCache::new(store)
        .with_progress(config.balance.show_progress)
        .with_details_limit(config.balance.details_limit);
    cache.set_stealth_secrets(secrets);
    if let Err(e) = cache.load_wallet(wallet) {
        exit_with_error(&format!("Failed to load wallet: {}", e));
    }

    match cli.command {
        BalanceCacheCommands::Balance { details, json, tip } => {
            if json {
                let view = BalanceView::from(&cache.snapshot());
                match serde_json::to_string_pretty(&view) {
                    Ok(s) => println!("{}", s),
                    Err(e) => exit_with_error(&format!("Failed to serialize balance: {}", e)),
                }
                return;
            }

            let tip = match tip {
                Some(tip) => tip,
                None => {
                    let client = BTCRpcClient::new(config.btc.rpc_url(), config.btc.auth())
                        .unwrap_or_else(|e| exit_with_error(&e));
                    match client.get_latest_block_height() {
                        Ok(height) => height as u32,
                        Err(e) => exit_with_error(&format!("Failed to get chain tip: {}", e)),
                    }
                }
            };

            print!("{}", cache.dump_balance(tip, details));
        }
        BalanceCacheCommands::Export { dir } => {
            let dir = dir.unwrap_or_else(|| config.export_dir(&root_dir));
            let tx_source = create_raw_tx_source(&config.btc).unwrap_or_else(|e| exit_with_error(&e));

            if let Err(e) = cache.export_balance_folder(&dir, &**tx_source) {
                exit_with_error(&format!("Failed to export balance folder: {}", e));
            }

            println!("Balance folder written to {}", dir.display());
            print!("{}", cache.dump_balance(0, false));
        }
    }
}
