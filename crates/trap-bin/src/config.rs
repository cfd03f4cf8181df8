// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Application configuration.
//!
//! ```yaml
//! prog_id: Trap.Simulator.1
//! node: ""
//! client:
//!   client_name: trap-cli
//!   group:
//!     update_rate_ms: 500
//! simulator:
//!   prog_id: Trap.Simulator.1
//!   async_delay_ms: 0
//!   tags:
//!     - id: Plant.Line1.Speed
//!       value: 1200.5
//!       eu_units: rpm
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use trap_opcda::config::ConfigResult;
use trap_opcda::sim::{TagConfig, DEFAULT_PROG_ID};
use trap_opcda::{ClientConfig, ConfigLoader, ConfigurationError, Validate};

/// Top-level configuration of the command-line client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Program ID of the server to connect to.
    pub prog_id: String,

    /// Node hosting the server; empty for this machine.
    pub node: String,

    /// Session settings.
    pub client: ClientConfig,

    /// The in-process server the client talks to.
    pub simulator: SimulatorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            prog_id: DEFAULT_PROG_ID.to_string(),
            node: String::new(),
            client: ClientConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

/// Address space and behaviour of the in-process server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Program ID the server registers under.
    pub prog_id: String,

    /// Vendor text reported in the server status.
    pub vendor: String,

    /// Delay before asynchronous completions are delivered.
    pub async_delay_ms: u64,

    /// Tags of the address space.
    pub tags: Vec<TagConfig>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            prog_id: DEFAULT_PROG_ID.to_string(),
            vendor: "trap-opcda simulator".to_string(),
            async_delay_ms: 0,
            tags: demo_tags(),
        }
    }
}

fn tag(id: &str, value: serde_json::Value, access: &str, eu_units: &str) -> TagConfig {
    TagConfig {
        id: id.to_string(),
        value,
        access: access.to_string(),
        eu_units: eu_units.to_string(),
        description: String::new(),
    }
}

fn demo_tags() -> Vec<TagConfig> {
    use serde_json::json;

    vec![
        tag("Plant.Line1.Speed", json!(1200.5), "rw", "rpm"),
        tag("Plant.Line1.Count", json!(42), "rw", ""),
        tag("Plant.Line1.Running", json!(true), "rw", ""),
        tag("Plant.Boiler.Temperature", json!(87.3), "r", "degC"),
        tag("Plant.Boiler.Mode", json!("auto"), "rw", ""),
    ]
}

impl Validate for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.prog_id.trim().is_empty() {
            return Err(ConfigurationError::validation("prog_id", "must not be empty"));
        }
        self.client.validate()?;
        self.simulator.validate()
    }
}

impl Validate for SimulatorConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.prog_id.trim().is_empty() {
            return Err(ConfigurationError::validation("simulator.prog_id", "must not be empty"));
        }
        let mut seen = HashSet::new();
        for tag in &self.tags {
            if tag.id.trim().is_empty() {
                return Err(ConfigurationError::validation("simulator.tags", "tag id must not be empty"));
            }
            if !seen.insert(tag.id.as_str()) {
                return Err(ConfigurationError::validation(
                    "simulator.tags",
                    format!("duplicate tag id '{}'", tag.id),
                ));
            }
            tag.to_tag()?;
        }
        Ok(())
    }
}

impl AppConfig {
    /// Loads and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        ConfigLoader::new().load(path)
    }

    /// Loads `path` when it exists, otherwise returns the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Applies command-line overrides.
    pub fn with_overrides(mut self, prog_id: Option<&str>, node: Option<&str>) -> Self {
        if let Some(prog_id) = prog_id {
            self.prog_id = prog_id.to_string();
        }
        if let Some(node) = node {
            self.node = node.to_string();
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.prog_id, DEFAULT_PROG_ID);
        assert_eq!(config.simulator.tags.len(), 5);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            r#"
prog_id: Vendor.Server.2
client:
  client_name: line-monitor
  group:
    update_rate_ms: 250
simulator:
  tags:
    - id: A.B
      value: 3
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.prog_id, "Vendor.Server.2");
        assert_eq!(config.client.client_name.as_deref(), Some("line-monitor"));
        assert_eq!(config.client.group.update_rate_ms, 250);
        assert_eq!(config.simulator.tags.len(), 1);
        assert!(config.node.is_empty());
    }

    #[test]
    fn test_load_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
node = "plc-gw"

[[simulator.tags]]
id = "A.B"
value = true
access = "r"
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.node, "plc-gw");
        assert_eq!(config.prog_id, DEFAULT_PROG_ID);
        assert_eq!(config.simulator.tags[0].access, "r");
    }

    #[test]
    fn test_duplicate_tags_rejected() {
        let mut config = AppConfig::default();
        config.simulator.tags.push(tag("Plant.Line1.Speed", serde_json::json!(1), "rw", ""));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_bad_access_rejected() {
        let mut config = AppConfig::default();
        config.simulator.tags = vec![tag("A.B", serde_json::json!(1), "x", "")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_prog_id_rejected() {
        let config = AppConfig::default().with_overrides(Some(" "), None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::default().with_overrides(Some("Vendor.Server.2"), Some("plc-gw"));
        assert_eq!(config.prog_id, "Vendor.Server.2");
        assert_eq!(config.node, "plc-gw");
    }
}
