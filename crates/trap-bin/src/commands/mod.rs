// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `servers`: List servers on a node
//! - `status`: Show server status
//! - `read`: Read item values
//! - `write`: Write one item value
//! - `browse`: Walk the address space
//! - `watch`: Print data changes until interrupted
//! - `validate`: Validate configuration file
//! - `version`: Show version information

mod browse;
mod read;
mod servers;
mod status;
mod validate;
mod version;
mod watch;
mod write;

pub use browse::browse;
pub use read::read;
pub use servers::servers;
pub use status::status;
pub use validate::validate;
pub use version::version;
pub use watch::watch;
pub use write::write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use trap_opcda::{OpcDaError, Quality, Variant};

use crate::cli::{Cli, Commands, OutputFormat};
use crate::error::{BinError, BinResult};
use crate::runtime::{ClientRuntime, RuntimeBuilder};

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    match &cli.command {
        Commands::Validate(args) => return validate::validate(&cli, args),
        Commands::Version => return version::version(&cli),
        _ => {}
    }

    let runtime = build_runtime(&cli)?;
    match cli.command {
        Commands::Servers(args) => servers::servers(&runtime, args).await,
        Commands::Status(args) => status::status(&runtime, args).await,
        Commands::Read(args) => read::read(&runtime, args).await,
        Commands::Write(args) => write::write(&runtime, args).await,
        Commands::Browse(args) => browse::browse(&runtime, args).await,
        Commands::Watch(args) => watch::watch(&runtime, args).await,
        Commands::Validate(_) | Commands::Version => Ok(()),
    }
}

fn build_runtime(cli: &Cli) -> BinResult<ClientRuntime> {
    RuntimeBuilder::new()
        .config_path(&cli.config)
        .prog_id(cli.prog_id.clone())
        .node(cli.node.clone())
        .build()
}

// =============================================================================
// Output
// =============================================================================

/// One item value as printed by `read` and `watch`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ValueRow {
    pub tag: String,
    pub value: String,
    pub data_type: &'static str,
    pub quality: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValueRow {
    pub(crate) fn new(tag: &str, value: &Variant, quality: u16, timestamp: DateTime<Utc>) -> Self {
        Self {
            tag: tag.to_string(),
            value: value.to_string(),
            data_type: value.type_name(),
            quality: Quality(quality).to_string(),
            timestamp: Some(timestamp),
            error: None,
        }
    }

    pub(crate) fn failed(tag: &str, error: &OpcDaError) -> Self {
        Self {
            tag: tag.to_string(),
            value: String::new(),
            data_type: "",
            quality: String::new(),
            timestamp: None,
            error: Some(error.to_string()),
        }
    }

    pub(crate) fn to_line(&self) -> String {
        match (&self.error, &self.timestamp) {
            (Some(error), _) => format!("{:<32} ERROR {}", self.tag, error),
            (None, Some(timestamp)) => format!(
                "{:<32} {:>16} {:<8} {:<18} {}",
                self.tag,
                self.value,
                self.data_type,
                self.quality,
                timestamp.format("%Y-%m-%d %H:%M:%S%.3f")
            ),
            (None, None) => format!("{:<32} {}", self.tag, self.value),
        }
    }
}

/// Prints `value` as JSON or YAML.
///
/// Text output is the caller's job; `OutputFormat::Text` falls back to JSON.
pub(crate) fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> BinResult<()> {
    let text = match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| BinError::runtime(format!("YAML serialization failed: {}", e)))?,
        OutputFormat::Json | OutputFormat::Text => serde_json::to_string_pretty(value)
            .map_err(|e| BinError::runtime(format!("JSON serialization failed: {}", e)))?,
    };
    println!("{}", text.trim_end());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_value_row_line() {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let row = ValueRow::new("Plant.Line1.Count", &Variant::I32(42), 0xC0, timestamp);
        let line = row.to_line();
        assert!(line.starts_with("Plant.Line1.Count"));
        assert!(line.contains("42"));
        assert!(line.contains("good"));
        assert!(line.contains("2024-03-01 12:00:00.000"));
    }

    #[test]
    fn test_failed_row_serializes_error() {
        let err = OpcDaError::remote("IOPCItemMgt::AddItems", trap_opcda::hresult::OPC_E_UNKNOWNITEMID);
        let row = ValueRow::failed("Missing.Tag", &err);
        assert!(row.to_line().contains("ERROR"));

        let json = serde_json::to_value(&row).unwrap();
        assert!(json["error"].as_str().is_some());
        assert!(json["timestamp"].is_null());
    }
}
