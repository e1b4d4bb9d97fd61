//! Adapter configuration
//!
//! Stored as TOML. Every section has defaults so a partial or missing file
//! still yields a working configuration. The device identity is written back
//! into the same file under `[discovery] uuid`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::features::FeatureId;
use crate::identity::IdentityStore;
use crate::mqtt::config::SessionSettings;
use crate::mqtt::topics::{TopicNamespace, DEFAULT_DISCOVERY_PREFIX, DEFAULT_PREFIX};

const APP_DIR: &str = "mycroft-mqtt-adapter";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    pub discovery: DiscoveryConfig,
    pub device: DeviceConfig,
    pub bus: BusConfig,
    /// Enabled features, by name
    pub features: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    /// Keep-alive interval in seconds
    pub keepalive: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub reconnect_delay_secs: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TopicConfig {
    pub prefix: String,
    pub subtopic: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub prefix: String,
    pub advertise_sensors: bool,
    /// Device identity override, also where the derived identity is persisted
    pub uuid: Option<String>,
}

/// Device block of every discovery document
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub sw_version: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    /// Language attached to injected utterances
    pub lang: String,
    pub reconnect_delay_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            topics: TopicConfig::default(),
            discovery: DiscoveryConfig::default(),
            device: DeviceConfig::default(),
            bus: BusConfig::default(),
            features: FeatureId::ALL
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let session = SessionSettings::default();
        Self {
            host: session.host,
            port: session.port,
            keepalive: session.keep_alive.as_secs(),
            username: None,
            password: None,
            client_id: session.client_id,
            reconnect_delay_secs: session.reconnect_delay.as_secs(),
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            subtopic: None,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            advertise_sensors: true,
            uuid: None,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "Mycroft".to_string(),
            model: "unknown".to_string(),
            manufacturer: "Mycroft AI, Inc".to_string(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8181/core".to_string(),
            lang: "en-us".to_string(),
            reconnect_delay_secs: 5,
        }
    }
}

impl BridgeConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self, BridgeError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads the file, falling back to defaults when it does not exist
    pub async fn load(path: &Path) -> Result<Self, BridgeError> {
        if !tokio::fs::try_exists(path).await? {
            warn!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), BridgeError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Writes a default configuration if the file is missing
    pub async fn ensure_default(path: &Path) -> Result<(), BridgeError> {
        if !tokio::fs::try_exists(path).await? {
            info!("Creating default configuration at {}", path.display());
            Self::default().save(path).await?;
        }
        Ok(())
    }

    pub fn namespace(&self) -> TopicNamespace {
        TopicNamespace::new(
            &self.topics.prefix,
            self.topics.subtopic.as_deref(),
            &self.discovery.prefix,
        )
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            host: self.broker.host.clone(),
            port: self.broker.port,
            keep_alive: Duration::from_secs(self.broker.keepalive),
            username: self.broker.username.clone().filter(|user| !user.is_empty()),
            password: self.broker.password.clone().filter(|pw| !pw.is_empty()),
            client_id: self.broker.client_id.clone(),
            reconnect_delay: Duration::from_secs(self.broker.reconnect_delay_secs),
        }
    }
}

/// Persists the device identity into the configuration file
pub struct ConfigFileStore {
    path: PathBuf,
    initial: Option<String>,
}

impl ConfigFileStore {
    pub fn new(path: PathBuf, initial: Option<String>) -> Self {
        Self { path, initial }
    }
}

impl IdentityStore for ConfigFileStore {
    fn load(&self) -> Option<String> {
        self.initial.clone()
    }

    fn persist(&self, identity: &str) -> Result<(), BridgeError> {
        let mut document: toml::Table = match std::fs::read_to_string(&self.path) {
            Ok(content) => content.parse()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
            Err(e) => return Err(BridgeError::Persistence(e.to_string())),
        };

        let section = document
            .entry("discovery")
            .or_insert_with(|| toml::Value::Table(toml::Table::new()));
        let Some(section) = section.as_table_mut() else {
            return Err(BridgeError::Persistence(
                "[discovery] is not a table".to_string(),
            ));
        };
        section.insert("uuid".to_string(), toml::Value::String(identity.to_string()));

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(&document)?)?;
        info!("Persisted device identity to {}", self.path.display());
        Ok(())
    }
}
