use super::constants::BALANCE_CACHE_ROOT_DIR;

pub fn get_root_dir() -> std::path::PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(BALANCE_CACHE_ROOT_DIR)
    } else {
        std::path::PathBuf::from(".").join(BALANCE_CACHE_ROOT_DIR)
    }
}

pub fn get_service_dir(service_name: &str) -> std::path::PathBuf {
    get_root_dir().join(service_name)
}
