use mnt_util::{CONFIG_FILE_NAME, WALLET_CACHE_DB_FILE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn default_db_file() -> String {
    WALLET_CACHE_DB_FILE.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_db_file")]
    pub db_file: String,

    // Directory holding the cache database, the root dir if not set
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            db_file: default_db_file(),
            data_dir: None,
        }
    }
}

fn default_watchdog_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_watchdog_interval_secs")]
    pub interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        WatchdogConfig {
            enabled: false,
            interval_secs: default_watchdog_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MntConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

impl MntConfig {
    pub fn load(root_dir: &Path) -> Result<Self, String> {
        let path = root_dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            let default_config = MntConfig::default();
            info!(
                "Config file {} does not exist. Using default configuration.",
                path.display()
            );
            match toml::to_string_pretty(&default_config) {
                Ok(s) => info!("Default config: {}", s),
                Err(e) => warn!("Failed to serialize default config: {}", e),
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

        let config: MntConfig = toml::from_str(&config_data).map_err(|e| {
            let msg = format!("Failed to parse config file {}: {}", path.display(), e);
            error!("{}", msg);
            msg
        })?;

        Ok(config)
    }

    pub fn data_dir(&self, root_dir: &Path) -> PathBuf {
        match &self.cache.data_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => root_dir.join(dir),
            None => root_dir.to_path_buf(),
        }
    }

    pub fn db_path(&self, root_dir: &Path) -> PathBuf {
        self.data_dir(root_dir).join(&self.cache.db_file)
    }
}

pub type MntConfigRef = Arc<MntConfig>;
