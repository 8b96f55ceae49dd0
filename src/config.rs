//! Service configuration.
//!
//! Loaded from a TOML file; a missing file means an all-default
//! configuration rather than an error.

use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct DockhandConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, serde::Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, serde::Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_update_check_interval_secs")]
    pub update_check_interval_secs: u64,
}

#[derive(Debug, serde::Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

fn default_store_path() -> String {
    "dockhand.db".to_string()
}
fn default_true() -> bool {
    true
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_sync_interval_secs() -> u64 {
    60
}
fn default_update_check_interval_secs() -> u64 {
    3600
}
fn default_cache_ttl_secs() -> u64 {
    1800
}
fn default_lookup_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: default_store_path(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            enabled: true,
            auto_reconnect: true,
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            interval_secs: default_sync_interval_secs(),
            update_check_interval_secs: default_update_check_interval_secs(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            cache_ttl_secs: default_cache_ttl_secs(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
            proxy_url: None,
        }
    }
}

impl DockhandConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no config file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.events.reconnect_delay_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn update_check_interval(&self) -> Duration {
        Duration::from_secs(self.sync.update_check_interval_secs)
    }

    pub fn registry_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.registry.cache_ttl_secs)
    }

    pub fn registry_lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.registry.lookup_timeout_secs)
    }
}
