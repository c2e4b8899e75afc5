use balance_util::{BALANCE_FOLDER_NAME, BTCConfig, DEFAULT_DETAILS_LIMIT, UNSPENT_DB_DIR_NAME};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    // Directory of the unspent set database, relative paths resolve against the root dir
    #[serde(default)]
    pub db_dir: Option<PathBuf>,
}

fn default_details_limit() -> usize {
    DEFAULT_DETAILS_LIMIT
}

fn default_show_progress() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceConfig {
    #[serde(default = "default_details_limit")]
    pub details_limit: usize,

    #[serde(default)]
    pub export_dir: Option<PathBuf>,

    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        BalanceConfig {
            details_limit: default_details_limit(),
            export_dir: None,
            show_progress: default_show_progress(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceCacheConfig {
    #[serde(default)]
    pub btc: BTCConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub balance: BalanceConfig,
}

impl BalanceCacheConfig {
    pub fn load(root_dir: &Path) -> Result<Self, String> {
        let path = root_dir.join("config.toml");
        if !path.exists() {
            let default_config = BalanceCacheConfig::default();
            info!(
                "Config file {} does not exist. Using default configuration.",
                path.display()
            );
            if let Ok(data) = toml::to_string_pretty(&default_config) {
                info!("Default config: {}", data);
            }
            return Ok(default_config);
        }

        info!("Loading config from {}", path.display());
        let config_data = std::fs::read_to_string(&path).map_err(|e| {
            let msg = format!("Failed to read config file {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })?;
        debug!("Config data: {}", config_data);

        toml::from_str(&config_data).map_err(|e| {
            let msg = format!("Failed to parse config file {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })
    }

    pub fn db_dir(&self, root_dir: &Path) -> PathBuf {
        match self.store.db_dir {
            Some(ref dir) => root_dir.join(dir),
            None => root_dir.join(UNSPENT_DB_DIR_NAME),
        }
    }

    pub fn export_dir(&self, root_dir: &Path) -> PathBuf {
        match self.balance.export_dir {
            Some(ref dir) => root_dir.join(dir),
            None => root_dir.join(BALANCE_FOLDER_NAME),
        }
    }
}

pub type BalanceCacheConfigRef = Arc<BalanceCacheConfig>;
