// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::commands::print_structured;
use crate::config::AppConfig;
use crate::error::{BinError, BinResult};

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: &ValidateArgs) -> BinResult<()> {
    let config_path = &cli.config;

    if !config_path.exists() {
        return Err(BinError::Configuration(format!(
            "Configuration file not found: {}",
            config_path.display()
        )));
    }

    let config = AppConfig::load(config_path)
        .map_err(|e| BinError::from(e).with_context("Configuration validation failed"))?;
    let warnings = collect_warnings(&config);

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Server: {}", config.prog_id);
            if !config.node.is_empty() {
                println!("  Node: {}", config.node);
            }
            println!(
                "  Group defaults: {} ms, deadband {}%",
                config.client.group.update_rate_ms, config.client.group.deadband
            );
            println!("  Event queue capacity: {}", config.client.event_queue_capacity);
            println!("  Simulated tags: {}", config.simulator.tags.len());

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                print_structured(&config, OutputFormat::Yaml)?;
            }
        }
        format => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "prog_id": config.prog_id,
                    "node": config.node,
                    "update_rate_ms": config.client.group.update_rate_ms,
                    "event_queue_capacity": config.client.event_queue_capacity,
                    "tag_count": config.simulator.tags.len(),
                },
                "warnings": warnings,
                "config": if args.show_config { Some(&config) } else { None },
            });
            print_structured(&output, format)?;
        }
    }

    if args.strict && !warnings.is_empty() {
        return Err(BinError::Configuration(format!(
            "Strict mode: {} warning(s) found",
            warnings.len()
        )));
    }

    Ok(())
}

fn collect_warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.simulator.tags.is_empty() {
        warnings.push("No simulated tags configured".to_string());
    }
    if config.prog_id != config.simulator.prog_id {
        warnings.push(format!(
            "prog_id '{}' differs from the simulated server '{}'; connections will fail",
            config.prog_id, config.simulator.prog_id
        ));
    }
    if config.client.group.update_rate_ms == 0 {
        warnings.push("Group update rate 0 asks for the fastest rate the server allows".to_string());
    }
    if config.client.event_queue_capacity < 4 {
        warnings.push(format!(
            "Event queue capacity {} drops data changes under load",
            config.client.event_queue_capacity
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli_for(path: &Path, extra: &[&str]) -> Cli {
        let mut argv = vec!["trap-opcda", "-c", path.to_str().unwrap(), "validate"];
        argv.extend_from_slice(extra);
        Cli::parse_from(argv)
    }

    fn args(cli: &Cli) -> ValidateArgs {
        match &cli.command {
            crate::cli::Commands::Validate(args) => args.clone(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cli = cli_for(&dir.path().join("absent.yaml"), &[]);
        let err = validate(&cli, &args(&cli)).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_validate_good_file() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "client:\n  client_name: validator\n").unwrap();
        let cli = cli_for(file.path(), &["-f", "json"]);
        assert!(validate(&cli, &args(&cli)).is_ok());
    }

    #[test]
    fn test_validate_strict_fails_on_warnings() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "prog_id: Vendor.Other.1\n").unwrap();
        let cli = cli_for(file.path(), &["--strict"]);
        let err = validate(&cli, &args(&cli)).unwrap_err();
        assert!(err.to_string().contains("Strict mode"));
    }

    #[test]
    fn test_validate_bad_file() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "client:\n  event_queue_capacity: 0\n").unwrap();
        let cli = cli_for(file.path(), &[]);
        assert!(validate(&cli, &args(&cli)).is_err());
    }

    #[test]
    fn test_validate_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".ini").unwrap();
        let cli = cli_for(file.path(), &[]);
        let err = validate(&cli, &args(&cli)).unwrap_err();
        assert!(err.to_string().contains("Unsupported config format"));
    }

    #[test]
    fn test_warnings() {
        let mut config = AppConfig::default();
        assert!(collect_warnings(&config).is_empty());
        config.simulator.tags.clear();
        assert_eq!(collect_warnings(&config).len(), 1);
    }
}
