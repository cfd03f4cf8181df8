// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! Every command except `validate` and `version` opens a session against the
//! configured server:
//!
//! - `servers`: List servers on a node
//! - `status`: Show server status
//! - `read`: Read item values
//! - `write`: Write one item value
//! - `browse`: Walk the address space
//! - `watch`: Print data changes until interrupted
//! - `validate`: Validate the configuration file
//! - `version`: Show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use trap_opcda::DataSource;

// =============================================================================
// Main CLI Structure
// =============================================================================

/// OPC DA command-line client.
///
/// Connects to a data-access server, reads and writes items, browses the
/// address space and watches data changes.
#[derive(Parser, Debug)]
#[command(
    name = "trap-opcda",
    author = "Sylvex <contact@sylvex.io>",
    version = crate::VERSION,
    about = "OPC DA command-line client",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "opcda.yaml",
        env = "TRAP_OPCDA_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        env = "TRAP_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "TRAP_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Program ID of the server, overriding the configuration
    #[arg(long, global = true)]
    pub prog_id: Option<String>,

    /// Node hosting the server, overriding the configuration
    #[arg(long, global = true)]
    pub node: Option<String>,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List data-access servers on the node
    Servers(ServersArgs),

    /// Show the server status
    Status(StatusArgs),

    /// Read item values
    ///
    /// All tags are added to one temporary group and read in one batch.
    Read(ReadArgs),

    /// Write a value to one item
    ///
    /// The text is converted to the item's canonical data type.
    Write(WriteArgs),

    /// Browse the server address space
    Browse(BrowseArgs),

    /// Print data changes of items until interrupted
    Watch(WatchArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration file without connecting.
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `servers` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ServersArgs {
    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `status` command.
#[derive(Args, Debug, Clone, Default)]
pub struct StatusArgs {
    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `read` command.
#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Item IDs to read
    #[arg(required = true)]
    pub tags: Vec<String>,

    /// Read from the server cache or the device
    #[arg(short, long, default_value = "device")]
    pub source: SourceArg,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `write` command.
#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// Item ID to write
    pub tag: String,

    /// Value text
    pub value: String,

    /// Write asynchronously and wait for the completion event
    #[arg(long)]
    pub r#async: bool,
}

/// Arguments for the `browse` command.
#[derive(Args, Debug, Clone, Default)]
pub struct BrowseArgs {
    /// Branch path to start from
    pub path: Vec<String>,

    /// List every leaf below the position with its full item ID
    #[arg(long)]
    pub flat: bool,

    /// Name filter (`*` and `?` wildcards)
    #[arg(long, default_value = "")]
    pub filter: String,
}

/// Arguments for the `watch` command.
#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Item IDs to watch
    #[arg(required = true)]
    pub tags: Vec<String>,

    /// Stop after this many seconds
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Requested update rate in milliseconds
    #[arg(short, long, default_value = "1000")]
    pub update_rate: u32,

    /// Drive simulated value changes on numeric tags
    #[arg(long)]
    pub simulate: bool,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Strict mode: treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
    /// YAML format
    Yaml,
}

/// Data source of a read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceArg {
    /// Server cache
    Cache,
    /// Physical device
    #[default]
    Device,
}

impl From<SourceArg> for DataSource {
    fn from(source: SourceArg) -> Self {
        match source {
            SourceArg::Cache => DataSource::Cache,
            SourceArg::Device => DataSource::Device,
        }
    }
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Check if verbose logging is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose && !self.quiet
    }

    /// Get the effective log level based on flags.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_required() {
        assert!(Cli::try_parse_from(["trap-opcda"]).is_err());
    }

    #[test]
    fn test_read_command() {
        let cli = Cli::parse_from(["trap-opcda", "read", "A.B", "A.C", "-s", "cache"]);
        if let Commands::Read(args) = cli.command {
            assert_eq!(args.tags, vec!["A.B", "A.C"]);
            assert_eq!(DataSource::from(args.source), DataSource::Cache);
        } else {
            panic!("Expected Read command");
        }
    }

    #[test]
    fn test_read_requires_tags() {
        assert!(Cli::try_parse_from(["trap-opcda", "read"]).is_err());
    }

    #[test]
    fn test_write_command() {
        let cli = Cli::parse_from(["trap-opcda", "write", "Line1.Speed", "12.5", "--async"]);
        if let Commands::Write(args) = cli.command {
            assert_eq!(args.tag, "Line1.Speed");
            assert_eq!(args.value, "12.5");
            assert!(args.r#async);
        } else {
            panic!("Expected Write command");
        }
    }

    #[test]
    fn test_browse_command() {
        let cli = Cli::parse_from(["trap-opcda", "browse", "Plant", "Line1", "--filter", "S*"]);
        if let Commands::Browse(args) = cli.command {
            assert_eq!(args.path, vec!["Plant", "Line1"]);
            assert_eq!(args.filter, "S*");
            assert!(!args.flat);
        } else {
            panic!("Expected Browse command");
        }
    }

    #[test]
    fn test_watch_command() {
        let cli = Cli::parse_from(["trap-opcda", "watch", "A.B", "-d", "5", "-u", "250"]);
        if let Commands::Watch(args) = cli.command {
            assert_eq!(args.duration, Some(5));
            assert_eq!(args.update_rate, 250);
        } else {
            panic!("Expected Watch command");
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["trap-opcda", "validate", "--show-config"]);
        if let Commands::Validate(args) = cli.command {
            assert!(args.show_config);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::parse_from([
            "trap-opcda",
            "status",
            "-c",
            "/etc/trap/opcda.toml",
            "--prog-id",
            "Vendor.Server.2",
            "--node",
            "plc-gw",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/trap/opcda.toml"));
        assert_eq!(cli.prog_id.as_deref(), Some("Vendor.Server.2"));
        assert_eq!(cli.node.as_deref(), Some("plc-gw"));
    }

    #[test]
    fn test_quiet_mode() {
        let cli = Cli::parse_from(["trap-opcda", "-q", "version"]);
        assert!(cli.quiet);
        assert_eq!(cli.effective_log_level(), "warn");
    }

    #[test]
    fn test_verbose_mode() {
        let cli = Cli::parse_from(["trap-opcda", "-v", "version"]);
        assert!(cli.is_verbose());
        assert_eq!(cli.effective_log_level(), "debug");
    }
}
