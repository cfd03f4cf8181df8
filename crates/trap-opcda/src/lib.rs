// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC Data Access client for TRAP gateway.
//!
//! This crate lets an application discover OPC DA servers, open a session,
//! organise items into groups, read and write them synchronously or
//! asynchronously and receive data-change notifications.
//!
//! The object-activation transport is not part of this crate. It is supplied
//! through the [`ClassResolver`] and [`Activator`] traits in [`interface`].
//! The `simulator` feature (on by default) ships an in-memory server that
//! implements every interface.
//!
//! # Features
//!
//! - Three-tier server discovery and class resolution
//! - Session status, locale and client-name management
//! - Group and item collections with per-item batch statuses
//! - Synchronous and asynchronous reads and writes
//! - Bounded, non-blocking event fan-out per group
//! - Address-space browsing
//! - Reference-counted remote handles released exactly once
//!
//! # Error Handling
//!
//! ```text
//! OpcDaError
//! ├── Connection    - Discovery, activation, advise and remote calls
//! ├── Usage         - Released receivers, bad indices, unknown handles
//! ├── Item          - Per-item batch status
//! ├── Conversion    - Value codec failures
//! └── Configuration - Invalid settings
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use trap_opcda::{DataSource, OpcServer};
//! use trap_opcda::sim::{SimServer, SimTag};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sim = SimServer::builder().tag("Line1.Speed", SimTag::new(42.0_f64)).build();
//!     let server = OpcServer::connect(&sim.connector(), "Trap.Simulator.1", "").await?;
//!
//!     let group = server.groups().add("fast").await?;
//!     let item = group.items().add_item("Line1.Speed").await?;
//!     let result = item.read(DataSource::Device).await?;
//!     println!("{} = {:?}", item.tag(), result.value);
//!
//!     server.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod browser;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod group;
pub mod handle;
pub mod interface;
pub mod item;
pub mod session;
pub mod types;

#[cfg(feature = "simulator")]
pub mod sim;

// Re-export commonly used types
pub use error::{
    ConfigurationError, ConnectionError, ConversionError, ErrorCode, ErrorSeverity, ItemError,
    ItemErrors, OpcDaError, OpcDaErrorContext, OpcDaResult, UsageError,
};

pub use types::{
    hresult, property, AccessRights, BrowseDirection, BrowseType, ClassId, DataSource, EuInfo,
    Interface, ItemState, NamespaceType, Quality, ServerInfo, ServerState, ServerStatus, VarType,
    LOCALE_SYSTEM_DEFAULT, LOCALE_USER_DEFAULT,
};

pub use codec::{
    decode, encode, task_heap, ArrayValue, ForeignHeap, TrackingHeap, Variant, WireVariant,
};

pub use config::{ClientConfig, ConfigFormat, ConfigLoader, GroupDefaults, ItemDefaults, Validate};

pub use interface::{Activator, ClassResolver, Locality};

pub use discovery::DiscoveryTier;

pub use handle::RemoteHandle;

// Re-export client types
pub use browser::OpcBrowser;
pub use group::{OpcGroup, OpcGroups};
pub use item::{ItemReadResult, OpcItem, OpcItems};
pub use session::{Connector, OpcServer};

// Re-export event types
pub use events::{
    CancelCompleteEvent, DataChangeEvent, DispatchStatsSnapshot, EventKind, ItemValue,
    ReadCompleteEvent, WriteCompleteEvent, WriteOutcome,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
