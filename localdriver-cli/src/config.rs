//! Configuration management
//!
//! Config directory: ~/.localdriver/ (cross-platform)
//!
//! Config file format (~/.localdriver/config.toml):
//! ```toml
//! [provider]
//! uri = "qemu:///system"
//! storage_pool = "default"
//! images_catalog = "/etc/localdriver/images.json"
//! templates_catalog = "/etc/localdriver/templates.json"
//!
//! [metadata]
//! tenant_id = "local"
//! lock_timeout_secs = 30
//!
//! [store]
//! backend = "sled"
//! path = "/home/me/.localdriver/data"
//! ```

use anyhow::{Context, Result};
use localdriver_metadata::MetadataConfig;
use localdriver_provider::ProviderConfig;
use localdriver_storage::StoreConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Structure of ~/.localdriver/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LocalDriverConfig {
    /// Hypervisor driver settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Metadata bucket and locking
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object store holding the metadata
    #[serde(default)]
    pub store: StoreSettings,
}

/// Object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile, for trying commands out
    Memory,
    Sled,
}

/// Object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Database directory of the sled backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

impl StoreSettings {
    pub fn store_config(&self) -> StoreConfig {
        match self.backend {
            StoreBackend::Memory => StoreConfig::Memory,
            StoreBackend::Sled => StoreConfig::Sled {
                path: self.path.clone(),
            },
        }
    }
}

fn default_backend() -> StoreBackend {
    match std::env::var("LOCALDRIVER_STORE").as_deref() {
        Ok("memory") => StoreBackend::Memory,
        _ => StoreBackend::Sled,
    }
}

fn default_store_path() -> PathBuf {
    if let Ok(path) = std::env::var("LOCALDRIVER_DATA_DIR") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .map(|home| home.join(".localdriver").join("data"))
        .unwrap_or_else(|| PathBuf::from("./localdriver_data"))
}

/// Get the config directory path (~/.localdriver/)
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let config_dir = home.join(".localdriver");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory ~/.localdriver/")?;
    }

    Ok(config_dir)
}

/// Get the config file path
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration from file
/// Falls back to defaults if file doesn't exist
pub fn load_config() -> LocalDriverConfig {
    match config_file_path() {
        Ok(path) if path.exists() => match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    LocalDriverConfig::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                LocalDriverConfig::default()
            }
        },
        _ => LocalDriverConfig::default(),
    }
}

/// Save configuration to file
pub fn save_config(config: &LocalDriverConfig) -> Result<()> {
    let path = config_file_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    fs::write(&path, content).context("Failed to write config file")?;
    Ok(())
}
