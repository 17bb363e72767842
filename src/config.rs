//! Application configuration file
//!
//! Stored as TOML under the user's config directory. A default file is
//! written on first start so the broker settings can be edited in place.

use crate::mqtt::config::{ConnectionConfig, TlsMode, Topics, DEFAULT_SECURE_PORT};
use crate::mqtt::event_log::DEFAULT_LOG_CAPACITY;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const CONFIG_DIR: &str = "aquamon";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub tls: TlsMode,
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "broker.example.com".to_string(),
            port: DEFAULT_SECURE_PORT,
            username: "esp32".to_string(),
            password: String::new(),
            client_id: "aquamon".to_string(),
            tls: TlsMode::Verify,
            keep_alive_secs: 60,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_secs: 5,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PublishConfig {
    pub ack_timeout_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 3000,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub reconnect: ReconnectConfig,
    pub publish: PublishConfig,
    pub topics: Topics,
    pub log_capacity: usize,
    pub tick_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            reconnect: ReconnectConfig::default(),
            publish: PublishConfig::default(),
            topics: Topics::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            tick_ms: 100,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory available"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Writes the default file if none exists yet
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check for config file: {}", e))?
        {
            debug!("Config file present at {}", path.display());
            return Ok(());
        }

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(&AppConfig::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write default config: {}", e))?;

        info!("Default configuration written to {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.broker.host.clone(),
            port: self.broker.port,
            username: self.broker.username.clone(),
            password: self.broker.password.clone(),
            client_id: self.broker.client_id.clone(),
            tls: self.broker.tls,
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            max_attempts: self.reconnect.max_attempts,
            backoff: Duration::from_secs(self.reconnect.backoff_secs),
            ack_timeout: Duration::from_millis(self.publish.ack_timeout_ms),
            topics: self.topics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_file_is_written_once_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        AppConfig::ensure_default_config(&path).await.unwrap();
        let loaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(loaded, AppConfig::default());

        tokio::fs::write(&path, "[broker]\nhost = \"lab.local\"\ntls = \"skip-verify\"\n")
            .await
            .unwrap();
        AppConfig::ensure_default_config(&path).await.unwrap();
        let edited = AppConfig::load(&path).await.unwrap();
        assert_eq!(edited.broker.host, "lab.local");
        assert_eq!(edited.broker.tls, TlsMode::SkipVerify);
        assert_eq!(edited.broker.port, DEFAULT_SECURE_PORT);
        assert_eq!(edited.reconnect.backoff_secs, 5);
    }

    #[tokio::test]
    async fn broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "broker = 3").await.unwrap();
        assert!(AppConfig::load(&path).await.is_err());
    }

    #[test]
    fn connection_config_carries_policy_values() {
        let cfg = AppConfig::default().connection_config();
        assert_eq!(cfg.port, 8883);
        assert_eq!(cfg.max_attempts, 10);
        assert_eq!(cfg.backoff, Duration::from_secs(5));
        assert_eq!(cfg.topics.sensor, "esp32/sensor");
    }
}
