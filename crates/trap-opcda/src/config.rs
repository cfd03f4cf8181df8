// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration.
//!
//! [`ClientConfig`] carries the defaults applied to new sessions, groups and
//! items. [`ConfigLoader`] reads any validated configuration type from YAML,
//! TOML or JSON, picking the format from the file extension.
//!
//! ```yaml
//! client_name: line-3-historian
//! group:
//!   update_rate_ms: 500
//!   deadband: 0.5
//! item:
//!   requested_type: 5   # VT_R8
//! event_queue_capacity: 256
//! ```

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigurationError;
use crate::types::{VarType, LOCALE_SYSTEM_DEFAULT};

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// Default capacity of every event queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 100;

// =============================================================================
// ClientConfig
// =============================================================================

/// Settings applied by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Display name registered with the server after connecting.
    pub client_name: Option<String>,

    /// Session locale set after connecting.
    pub locale_id: Option<u32>,

    /// Defaults for new groups.
    pub group: GroupDefaults,

    /// Defaults for new items.
    pub item: ItemDefaults,

    /// Capacity of the internal event queues of each advised group.
    pub event_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: None,
            locale_id: None,
            group: GroupDefaults::default(),
            item: ItemDefaults::default(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Defaults for new groups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupDefaults {
    /// Initial active state.
    pub active: bool,
    /// Requested update rate in milliseconds.
    pub update_rate_ms: u32,
    /// Percent deadband (0 to 100).
    pub deadband: f32,
    /// Time bias in minutes.
    pub time_bias: i32,
    /// Locale ID.
    pub locale_id: u32,
}

impl Default for GroupDefaults {
    fn default() -> Self {
        Self {
            active: true,
            update_rate_ms: 1000,
            deadband: 0.0,
            time_bias: 0,
            locale_id: LOCALE_SYSTEM_DEFAULT,
        }
    }
}

/// Defaults for new items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemDefaults {
    /// Access path hint.
    pub access_path: String,
    /// Initial active state.
    pub active: bool,
    /// Requested data type; `VT_EMPTY` (0) selects the canonical type.
    pub requested_type: VarType,
}

impl Default for ItemDefaults {
    fn default() -> Self {
        Self {
            access_path: String::new(),
            active: true,
            requested_type: VarType::EMPTY,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

/// A configuration that can check itself after parsing.
pub trait Validate {
    /// Returns the first invalid field.
    fn validate(&self) -> ConfigResult<()>;
}

impl Validate for GroupDefaults {
    fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=100.0).contains(&self.deadband) {
            return Err(ConfigurationError::validation(
                "group.deadband",
                format!("{} is outside 0..=100", self.deadband),
            ));
        }
        Ok(())
    }
}

impl Validate for ClientConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.group.validate()?;
        if self.event_queue_capacity == 0 {
            return Err(ConfigurationError::validation(
                "event_queue_capacity",
                "must be greater than 0",
            ));
        }
        if self.item.requested_type.is_array() {
            return Err(ConfigurationError::validation(
                "item.requested_type",
                format!("{} is not a scalar type", self.item.requested_type),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            _ => Err(ConfigurationError::UnsupportedFormat {
                path: path.display().to_string(),
            }),
        }
    }
}

/// Loads and validates configuration files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Creates a loader.
    pub fn new() -> Self {
        Self
    }

    /// Loads a configuration file.
    pub fn load<T>(&self, path: impl AsRef<Path>) -> ConfigResult<T>
    where
        T: DeserializeOwned + Validate,
    {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|e| ConfigurationError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let config: T = Self::parse(&content, format).map_err(|message| {
            ConfigurationError::Parse {
                path: path.display().to_string(),
                message,
            }
        })?;
        config.validate()?;

        debug!(path = %path.display(), ?format, "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates configuration text.
    pub fn load_from_str<T>(&self, content: &str, format: ConfigFormat) -> ConfigResult<T>
    where
        T: DeserializeOwned + Validate,
    {
        let config: T = Self::parse(content, format).map_err(|message| {
            ConfigurationError::Parse {
                path: "<string>".to_string(),
                message,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    fn parse<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> Result<T, String> {
        match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(config.group.active);
        assert_eq!(config.group.update_rate_ms, 1000);
        assert_eq!(config.group.locale_id, 0x0800);
        assert_eq!(config.item.requested_type, VarType::EMPTY);
        assert_eq!(config.event_queue_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_yaml() {
        let yaml = "client_name: historian\ngroup:\n  update_rate_ms: 250\n  deadband: 1.5\nitem:\n  requested_type: 5\n";
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config: ClientConfig = ConfigLoader::new().load(file.path()).unwrap();
        assert_eq!(config.client_name.as_deref(), Some("historian"));
        assert_eq!(config.group.update_rate_ms, 250);
        assert!(config.group.active);
        assert_eq!(config.item.requested_type, VarType::R8);
    }

    #[test]
    fn test_load_toml_and_json() {
        let loader = ConfigLoader::new();
        let config: ClientConfig = loader
            .load_from_str("event_queue_capacity = 8\n[group]\ntime_bias = 60\n", ConfigFormat::Toml)
            .unwrap();
        assert_eq!(config.event_queue_capacity, 8);
        assert_eq!(config.group.time_bias, 60);

        let config: ClientConfig = loader
            .load_from_str(r#"{"item": {"active": false}}"#, ConfigFormat::Json)
            .unwrap();
        assert!(!config.item.active);
    }

    #[test]
    fn test_validation() {
        let loader = ConfigLoader::new();
        let err = loader
            .load_from_str::<ClientConfig>("group:\n  deadband: 150\n", ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Validation { ref field, .. } if field == "group.deadband"));

        let err = loader
            .load_from_str::<ClientConfig>("event_queue_capacity: 0\n", ConfigFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Validation { .. }));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.TOML")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("config")).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::new()
            .load::<ClientConfig>("/nonexistent/trap-opcda.yaml")
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Io { .. }));
    }
}
