// Service names
pub const BALANCE_CACHE_SERVICE_NAME: &str = "balance-cache";

// Directory constants
pub const BALANCE_CACHE_ROOT_DIR: &str = ".balance-cache";
pub const BALANCE_FOLDER_NAME: &str = "balance";
pub const UNSPENT_DB_DIR_NAME: &str = "db";

// Max number of per-output lines in a detailed balance dump
pub const DEFAULT_DETAILS_LIMIT: usize = 100;
