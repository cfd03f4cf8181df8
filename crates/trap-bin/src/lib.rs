// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # trap-bin
//!
//! Command-line client for OPC Data Access servers, built on `trap-opcda`.
//!
//! - CLI argument parsing with clap
//! - Configuration loading (YAML, TOML, JSON)
//! - Session runtime over the in-process simulated server
//! - Graceful shutdown on signals and server shutdown requests
//! - Logging initialization
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         main.rs                              │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │
//!                    ┌──────▼──────┐
//!                    │    cli.rs   │
//!                    └──────┬──────┘
//!                           │
//!               ┌───────────┼───────────┐
//!               ▼           ▼           ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │ commands │ │ runtime  │ │ logging  │
//!        └──────────┘ └────┬─────┘ └──────────┘
//!                          │
//!               ┌──────────┼──────────┐
//!               ▼          ▼          ▼
//!        ┌──────────┐ ┌──────────┐ ┌──────────┐
//!        │  config  │ │ shutdown │ │trap-opcda│
//!        └──────────┘ └──────────┘ └──────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # List servers and show status
//! trap-opcda servers
//! trap-opcda status
//!
//! # Read two items from the device
//! trap-opcda read Plant.Line1.Speed Plant.Line1.Count
//!
//! # Write a value
//! trap-opcda write Plant.Line1.Count 17
//!
//! # Browse and watch
//! trap-opcda browse Plant Line1
//! trap-opcda watch Plant.Line1.Speed --simulate -d 10
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{BinError, BinResult};
pub use logging::init_logging;
pub use runtime::{ClientRuntime, RuntimeBuilder};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
