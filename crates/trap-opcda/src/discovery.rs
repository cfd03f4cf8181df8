// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server discovery.
//!
//! Program IDs are resolved, and servers enumerated, by trying three
//! services in order. The first success wins; if every tier fails, the
//! error carries each tier's cause.
//!
//! ```text
//! ┌──────────────────┐  fail  ┌──────────────────┐  fail  ┌──────────────┐  fail
//! │ server list (v2) │ ─────▶ │ server list (v1) │ ─────▶ │   registry   │ ─────▶ Err(causes)
//! └──────────────────┘        └──────────────────┘        └──────────────┘
//! ```

use std::fmt;

use crate::error::{ConnectionError, OpcDaResult};
use crate::interface::ClassResolver;
use crate::types::{ClassId, ServerInfo, CATID_OPC_DA_SERVER_10, CATID_OPC_DA_SERVER_20};

/// One discovery service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryTier {
    /// IOPCServerList2.
    ServerList2,
    /// IOPCServerList.
    ServerList,
    /// Name registry.
    Registry,
}

impl DiscoveryTier {
    /// All tiers in fallback order.
    pub const ORDER: [DiscoveryTier; 3] = [Self::ServerList2, Self::ServerList, Self::Registry];
}

impl fmt::Display for DiscoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerList2 => write!(f, "server list v2"),
            Self::ServerList => write!(f, "server list v1"),
            Self::Registry => write!(f, "registry"),
        }
    }
}

/// Resolves a program ID to a class ID.
pub async fn resolve_clsid(
    resolver: &dyn ClassResolver,
    prog_id: &str,
    node: &str,
) -> OpcDaResult<ClassId> {
    let mut causes = Vec::new();

    for tier in DiscoveryTier::ORDER {
        let attempt = match tier {
            DiscoveryTier::ServerList2 => resolver.clsid_from_server_list2(prog_id, node).await,
            DiscoveryTier::ServerList => resolver.clsid_from_server_list(prog_id, node).await,
            DiscoveryTier::Registry => resolver.clsid_from_registry(prog_id, node).await,
        };
        match attempt {
            Ok(clsid) => {
                tracing::debug!(prog_id, node, %tier, %clsid, "Resolved program ID");
                return Ok(clsid);
            }
            Err(e) => {
                tracing::debug!(prog_id, node, %tier, error = %e, "Resolution tier failed");
                causes.push(format!("get clsid from {} error: {}", tier, e));
            }
        }
    }

    Err(ConnectionError::DiscoveryFailed {
        prog_id: prog_id.to_string(),
        causes,
    }
    .into())
}

/// Lists the data-access servers on `node`.
///
/// Classes whose details cannot be read are skipped.
pub async fn get_servers(resolver: &dyn ClassResolver, node: &str) -> OpcDaResult<Vec<ServerInfo>> {
    let categories = [CATID_OPC_DA_SERVER_10, CATID_OPC_DA_SERVER_20];
    let mut causes = Vec::new();

    for tier in DiscoveryTier::ORDER {
        let attempt = match tier {
            DiscoveryTier::ServerList2 | DiscoveryTier::ServerList => {
                enumerate_server_list(resolver, tier, node, &categories).await
            }
            DiscoveryTier::Registry => resolver.enum_registry_servers(node).await,
        };
        match attempt {
            Ok(servers) => {
                tracing::debug!(node, %tier, count = servers.len(), "Enumerated servers");
                return Ok(servers);
            }
            Err(e) => {
                tracing::debug!(node, %tier, error = %e, "Enumeration tier failed");
                causes.push(format!("get servers from {} error: {}", tier, e));
            }
        }
    }

    Err(ConnectionError::EnumerationFailed {
        node: node.to_string(),
        causes,
    }
    .into())
}

async fn enumerate_server_list(
    resolver: &dyn ClassResolver,
    tier: DiscoveryTier,
    node: &str,
    categories: &[uuid::Uuid],
) -> OpcDaResult<Vec<ServerInfo>> {
    let classes = if tier == DiscoveryTier::ServerList2 {
        resolver.enum_servers2(node, categories).await?
    } else {
        resolver.enum_servers(node, categories).await?
    };

    let mut servers = Vec::with_capacity(classes.len());
    for clsid in classes {
        let details = if tier == DiscoveryTier::ServerList2 {
            resolver.class_details2(node, clsid).await
        } else {
            resolver.class_details(node, clsid).await
        };
        match details {
            Ok(info) => servers.push(info),
            Err(e) => {
                tracing::debug!(node, %tier, %clsid, error = %e, "Skipping class without details");
            }
        }
    }
    Ok(servers)
}
