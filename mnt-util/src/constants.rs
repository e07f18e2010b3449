// Service names
pub const MNT_WALLET_SERVICE_NAME: &str = "mnt-wallet";
pub const MNT_CACHE_CLI_TOOL_NAME: &str = "mnt-cache-cli";

// Directory constants
pub const MNT_ROOT_DIR: &str = ".mnt";

// File names inside a service directory
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const WALLET_CACHE_DB_FILE: &str = "wallet_cache.db";
