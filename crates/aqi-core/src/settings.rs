//! Persisted connection settings.
//!
//! The settings collaborator owns the [`ConnectionConfig`] that the data
//! sources run against. Values live in a [`KeyValueStore`] under three
//! string keys; anything missing or empty falls back to the built-in
//! default. Every change is published on a `watch` channel so a running
//! monitor can rebuild its connection.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, DEFAULT_BROKER, DEFAULT_PORT, DEFAULT_TOPIC};

/// Storage key for the broker address.
pub const BROKER_KEY: &str = "mqtt_broker_url";
/// Storage key for the broker port.
pub const PORT_KEY: &str = "mqtt_port";
/// Storage key for the topic.
pub const TOPIC_KEY: &str = "mqtt_topic";

const ALL_KEYS: [&str; 3] = [BROKER_KEY, PORT_KEY, TOPIC_KEY];

/// Errors from the settings store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Failed to write settings file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unknown settings field '{0}' (expected broker, port or topic)")]
    UnknownField(String),
}

/// String key-value persistence.
pub trait KeyValueStore: Send + Sync {
    /// Read a single value.
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;

    /// Write several values at once.
    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), SettingsError>;

    /// Remove several keys at once. Missing keys are ignored.
    fn remove_many(&self, keys: &[&str]) -> Result<(), SettingsError>;
}

/// In-memory store, used in tests and for ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.values().get(key).cloned())
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), SettingsError> {
        let mut values = self.values();
        for (key, value) in entries {
            values.insert((*key).to_string(), (*value).to_string());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), SettingsError> {
        let mut values = self.values();
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }
}

/// TOML file store.
///
/// The whole file is a flat table of strings. A missing file reads as empty.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at [`default_settings_path`].
    pub fn open_default() -> Self {
        Self::new(default_settings_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_table(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write_table(&self, table: &BTreeMap<String, String>) -> Result<(), SettingsError> {
        let content = toml::to_string_pretty(table)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, content).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.read_table()?.remove(key))
    }

    fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), SettingsError> {
        let mut table = self.read_table()?;
        for (key, value) in entries {
            table.insert((*key).to_string(), (*value).to_string());
        }
        self.write_table(&table)
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), SettingsError> {
        let mut table = self.read_table()?;
        for key in keys {
            table.remove(*key);
        }
        self.write_table(&table)
    }
}

/// Default settings file path.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aqi-monitor")
        .join("settings.toml")
}

/// A single editable setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsField {
    Broker,
    Port,
    Topic,
}

impl SettingsField {
    /// Storage key for this field.
    pub fn key(&self) -> &'static str {
        match self {
            SettingsField::Broker => BROKER_KEY,
            SettingsField::Port => PORT_KEY,
            SettingsField::Topic => TOPIC_KEY,
        }
    }
}

impl fmt::Display for SettingsField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettingsField::Broker => "broker",
            SettingsField::Port => "port",
            SettingsField::Topic => "topic",
        };
        f.write_str(name)
    }
}

impl FromStr for SettingsField {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "broker" | "broker_url" | "mqtt_broker_url" => Ok(SettingsField::Broker),
            "port" | "mqtt_port" => Ok(SettingsField::Port),
            "topic" | "mqtt_topic" => Ok(SettingsField::Topic),
            _ => Err(SettingsError::UnknownField(s.to_string())),
        }
    }
}

/// Settings collaborator backed by a [`KeyValueStore`].
pub struct Settings<S> {
    store: S,
    config_tx: watch::Sender<ConnectionConfig>,
}

impl<S: KeyValueStore> Settings<S> {
    /// Create settings holding the defaults. Call [`load`](Self::load) to
    /// pick up persisted values.
    pub fn new(store: S) -> Self {
        let (config_tx, _) = watch::channel(ConnectionConfig::default());
        Self { store, config_tx }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read persisted values, falling back to defaults.
    ///
    /// Store failures are logged and never returned.
    pub fn load(&self) -> ConnectionConfig {
        let config = ConnectionConfig {
            endpoint: self.read_or(BROKER_KEY, DEFAULT_BROKER),
            port: Some(self.read_or(PORT_KEY, DEFAULT_PORT)),
            topic: self.read_or(TOPIC_KEY, DEFAULT_TOPIC),
        };
        debug!(broker = %config.endpoint, topic = %config.topic, "Loaded settings");
        self.publish(config.clone());
        config
    }

    /// Persist a complete config and notify subscribers.
    pub fn save(&self, config: &ConnectionConfig) -> Result<(), SettingsError> {
        let port = config.port.as_deref().unwrap_or(DEFAULT_PORT);
        self.store.set_many(&[
            (BROKER_KEY, config.endpoint.as_str()),
            (PORT_KEY, port),
            (TOPIC_KEY, config.topic.as_str()),
        ])?;
        info!(broker = %config.endpoint, port, topic = %config.topic, "Saved settings");
        self.publish(config.clone());
        Ok(())
    }

    /// Change one field of the current config and persist the result.
    pub fn update(
        &self,
        field: SettingsField,
        value: impl Into<String>,
    ) -> Result<ConnectionConfig, SettingsError> {
        let value = value.into();
        let mut config = self.current();
        match field {
            SettingsField::Broker => config.endpoint = value,
            SettingsField::Port => config.port = Some(value),
            SettingsField::Topic => config.topic = value,
        }
        self.save(&config)?;
        Ok(config)
    }

    /// Remove persisted values and publish the defaults.
    pub fn reset_to_defaults(&self) -> Result<ConnectionConfig, SettingsError> {
        self.store.remove_many(&ALL_KEYS)?;
        info!("Reset settings to defaults");
        let config = ConnectionConfig::default();
        self.publish(config.clone());
        Ok(config)
    }

    /// The most recently loaded or saved config.
    pub fn current(&self) -> ConnectionConfig {
        self.config_tx.borrow().clone()
    }

    /// Receive every config change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionConfig> {
        self.config_tx.subscribe()
    }

    fn read_or(&self, key: &str, default: &str) -> String {
        match self.store.get(key) {
            Ok(Some(value)) if !value.trim().is_empty() => value,
            Ok(_) => default.to_string(),
            Err(e) => {
                warn!(key, error = %e, "Failed to load setting, using default");
                default.to_string()
            }
        }
    }

    fn publish(&self, config: ConnectionConfig) {
        self.config_tx.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, SettingsError> {
            Err(SettingsError::Read {
                path: PathBuf::from("/nonexistent"),
                source: std::io::Error::other("boom"),
            })
        }

        fn set_many(&self, _entries: &[(&str, &str)]) -> Result<(), SettingsError> {
            Err(SettingsError::Write {
                path: PathBuf::from("/nonexistent"),
                source: std::io::Error::other("boom"),
            })
        }

        fn remove_many(&self, _keys: &[&str]) -> Result<(), SettingsError> {
            Ok(())
        }
    }

    #[test]
    fn test_load_defaults_from_empty_store() {
        let settings = Settings::new(MemoryStore::new());
        let config = settings.load();
        assert_eq!(config, ConnectionConfig::default());
    }

    #[test]
    fn test_load_empty_values_fall_back() {
        let store = MemoryStore::new();
        store
            .set_many(&[(BROKER_KEY, ""), (TOPIC_KEY, "home/aqi")])
            .unwrap();
        let config = Settings::new(store).load();
        assert_eq!(config.endpoint, DEFAULT_BROKER);
        assert_eq!(config.topic, "home/aqi");
        assert_eq!(config.port.as_deref(), Some(DEFAULT_PORT));
    }

    #[test]
    fn test_load_errors_use_defaults() {
        let settings = Settings::new(FailingStore);
        assert_eq!(settings.load(), ConnectionConfig::default());
    }

    #[test]
    fn test_save_error_propagates() {
        let settings = Settings::new(FailingStore);
        let result = settings.save(&ConnectionConfig::new("host", "t"));
        assert!(matches!(result, Err(SettingsError::Write { .. })));
        assert_eq!(settings.current(), ConnectionConfig::default());
    }

    #[test]
    fn test_update_persists_and_notifies() {
        let settings = Settings::new(MemoryStore::new());
        settings.load();
        let mut rx = settings.subscribe();

        let config = settings.update(SettingsField::Topic, "kitchen/aqi").unwrap();
        assert_eq!(config.topic, "kitchen/aqi");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().topic, "kitchen/aqi");

        assert_eq!(settings.load().topic, "kitchen/aqi");
    }

    #[test]
    fn test_saving_same_config_does_not_notify() {
        let settings = Settings::new(MemoryStore::new());
        let mut rx = settings.subscribe();
        settings.save(&ConnectionConfig::default()).unwrap();
        assert!(!rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();
    }

    #[test]
    fn test_reset_to_defaults() {
        let settings = Settings::new(MemoryStore::new());
        settings.update(SettingsField::Broker, "mqtt.local").unwrap();
        let config = settings.reset_to_defaults().unwrap();
        assert_eq!(config, ConnectionConfig::default());
        assert_eq!(settings.load(), ConnectionConfig::default());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let store = FileStore::new(&path);

        assert_eq!(store.get(BROKER_KEY).unwrap(), None);
        store
            .set_many(&[(BROKER_KEY, "mqtt.local"), (PORT_KEY, "9001")])
            .unwrap();
        assert!(path.exists());

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get(BROKER_KEY).unwrap().as_deref(), Some("mqtt.local"));
        assert_eq!(reopened.get(PORT_KEY).unwrap().as_deref(), Some("9001"));

        reopened.remove_many(&[PORT_KEY, TOPIC_KEY]).unwrap();
        assert_eq!(reopened.get(PORT_KEY).unwrap(), None);
        assert_eq!(reopened.get(BROKER_KEY).unwrap().as_deref(), Some("mqtt.local"));
    }

    #[test]
    fn test_file_store_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "not [valid toml").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(store.get(BROKER_KEY), Err(SettingsError::Parse { .. })));

        let settings = Settings::new(store);
        assert_eq!(settings.load(), ConnectionConfig::default());
    }

    #[test]
    fn test_settings_field_parse() {
        assert_eq!("broker".parse::<SettingsField>().unwrap(), SettingsField::Broker);
        assert_eq!("MQTT_PORT".parse::<SettingsField>().unwrap(), SettingsField::Port);
        assert_eq!("topic".parse::<SettingsField>().unwrap(), SettingsField::Topic);
        assert!(matches!(
            "host".parse::<SettingsField>(),
            Err(SettingsError::UnknownField(_))
        ));
        assert_eq!(SettingsField::Port.key(), "mqtt_port");
        assert_eq!(SettingsField::Broker.to_string(), "broker");
    }

    #[test]
    fn test_default_settings_path() {
        let path = default_settings_path();
        assert!(path.ends_with("aqi-monitor/settings.toml"));
    }
}
