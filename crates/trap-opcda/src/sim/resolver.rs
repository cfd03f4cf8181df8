// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simulated discovery and activation.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::server::SimState;
use super::SimOp;
use crate::discovery::DiscoveryTier;
use crate::error::{ConnectionError, OpcDaError, OpcDaResult};
use crate::interface::{Activator, ClassResolver, Locality, ServerObject};
use crate::types::{hresult, ClassId, ServerInfo};

/// A class resolver over a fixed server list.
///
/// Each discovery tier can be switched off to exercise the fallback chain.
#[derive(Debug, Default)]
pub struct SimResolver {
    servers: RwLock<Vec<ServerInfo>>,
    failing: RwLock<HashSet<DiscoveryTier>>,
    unreachable: RwLock<HashSet<String>>,
}

impl SimResolver {
    /// Creates a resolver that knows `servers`.
    pub fn new(servers: Vec<ServerInfo>) -> Self {
        Self {
            servers: RwLock::new(servers),
            ..Self::default()
        }
    }

    /// Registers another server.
    pub fn register(&self, info: ServerInfo) {
        self.servers.write().push(info);
    }

    /// Makes a tier fail (`true`) or answer again (`false`).
    pub fn fail_tier(&self, tier: DiscoveryTier, failing: bool) {
        if failing {
            self.failing.write().insert(tier);
        } else {
            self.failing.write().remove(&tier);
        }
    }

    /// Makes every tier fail for `node`.
    pub fn set_unreachable(&self, node: &str) {
        self.unreachable.write().insert(node.to_ascii_lowercase());
    }

    fn check(&self, tier: DiscoveryTier, node: &str) -> OpcDaResult<()> {
        if self.unreachable.read().contains(&node.to_ascii_lowercase()) {
            return Err(OpcDaError::remote(
                format!("{} on '{}'", tier, node),
                hresult::RPC_S_SERVER_UNAVAILABLE,
            ));
        }
        if self.failing.read().contains(&tier) {
            return Err(OpcDaError::remote(tier.to_string(), hresult::REGDB_E_CLASSNOTREG));
        }
        Ok(())
    }

    fn lookup(&self, tier: DiscoveryTier, prog_id: &str, node: &str) -> OpcDaResult<ClassId> {
        self.check(tier, node)?;
        self.servers
            .read()
            .iter()
            .find(|info| info.prog_id == prog_id || info.ver_ind_prog_id == prog_id)
            .map(|info| info.clsid)
            .ok_or_else(|| OpcDaError::remote(format!("{} lookup of '{}'", tier, prog_id), hresult::REGDB_E_CLASSNOTREG))
    }

    fn classes(&self, tier: DiscoveryTier, node: &str) -> OpcDaResult<Vec<ClassId>> {
        self.check(tier, node)?;
        Ok(self.servers.read().iter().map(|info| info.clsid).collect())
    }

    fn details(&self, tier: DiscoveryTier, node: &str, clsid: ClassId) -> OpcDaResult<ServerInfo> {
        self.check(tier, node)?;
        self.servers
            .read()
            .iter()
            .find(|info| info.clsid == clsid)
            .cloned()
            .ok_or_else(|| OpcDaError::remote(tier.to_string(), hresult::REGDB_E_CLASSNOTREG))
    }
}

#[async_trait]
impl ClassResolver for SimResolver {
    async fn clsid_from_server_list2(&self, prog_id: &str, node: &str) -> OpcDaResult<ClassId> {
        self.lookup(DiscoveryTier::ServerList2, prog_id, node)
    }

    async fn clsid_from_server_list(&self, prog_id: &str, node: &str) -> OpcDaResult<ClassId> {
        self.lookup(DiscoveryTier::ServerList, prog_id, node)
    }

    async fn clsid_from_registry(&self, prog_id: &str, node: &str) -> OpcDaResult<ClassId> {
        self.lookup(DiscoveryTier::Registry, prog_id, node)
    }

    async fn enum_servers2(&self, node: &str, _categories: &[Uuid]) -> OpcDaResult<Vec<ClassId>> {
        self.classes(DiscoveryTier::ServerList2, node)
    }

    async fn enum_servers(&self, node: &str, _categories: &[Uuid]) -> OpcDaResult<Vec<ClassId>> {
        self.classes(DiscoveryTier::ServerList, node)
    }

    async fn enum_registry_servers(&self, node: &str) -> OpcDaResult<Vec<ServerInfo>> {
        self.check(DiscoveryTier::Registry, node)?;
        Ok(self.servers.read().clone())
    }

    async fn class_details2(&self, node: &str, clsid: ClassId) -> OpcDaResult<ServerInfo> {
        self.details(DiscoveryTier::ServerList2, node, clsid)
    }

    async fn class_details(&self, node: &str, clsid: ClassId) -> OpcDaResult<ServerInfo> {
        // The v1 service has no version-independent program ID.
        let mut info = self.details(DiscoveryTier::ServerList, node, clsid)?;
        info.ver_ind_prog_id.clear();
        Ok(info)
    }
}

/// Activates the simulated server.
pub struct SimActivator {
    state: Arc<SimState>,
}

impl SimActivator {
    pub(crate) fn new(state: Arc<SimState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Activator for SimActivator {
    async fn activate(
        &self,
        clsid: ClassId,
        locality: Locality,
        node: &str,
    ) -> OpcDaResult<Arc<dyn ServerObject>> {
        let failed = |code: i32, message: String| -> OpcDaError {
            ConnectionError::ActivationFailed {
                clsid: clsid.to_string(),
                node: node.to_string(),
                message,
                code: Some(code),
            }
            .into()
        };

        if let Err(e) = self.state.faults.check(SimOp::Activate) {
            let code = e.hresult().unwrap_or(hresult::E_FAIL);
            return Err(failed(code, e.to_string()));
        }
        if clsid != self.state.info.clsid {
            return Err(failed(hresult::REGDB_E_CLASSNOTREG, "class not registered".to_string()));
        }

        tracing::debug!(%clsid, %locality, node, "Activating simulated server");
        let server: Arc<dyn ServerObject> = self.state.open_session();
        Ok(server)
    }
}

impl std::fmt::Debug for SimActivator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimActivator")
            .field("clsid", &self.state.info.clsid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> ServerInfo {
        let clsid = ClassId(Uuid::new_v4());
        ServerInfo {
            prog_id: "Sim.Server.1".to_string(),
            cls_str: clsid.to_string(),
            ver_ind_prog_id: "Sim.Server".to_string(),
            clsid,
        }
    }

    #[tokio::test]
    async fn test_tier_failures() {
        let info = info();
        let resolver = SimResolver::new(vec![info.clone()]);
        assert_eq!(
            resolver.clsid_from_server_list2("Sim.Server", "").await.unwrap(),
            info.clsid
        );

        resolver.fail_tier(DiscoveryTier::ServerList2, true);
        assert!(resolver.clsid_from_server_list2("Sim.Server.1", "").await.is_err());
        assert!(resolver.clsid_from_server_list("Sim.Server.1", "").await.is_ok());

        resolver.fail_tier(DiscoveryTier::ServerList2, false);
        assert!(resolver.clsid_from_server_list2("Sim.Server.1", "").await.is_ok());

        resolver.set_unreachable("plc-gw");
        let err = resolver.clsid_from_registry("Sim.Server.1", "PLC-GW").await.unwrap_err();
        assert_eq!(err.hresult(), Some(hresult::RPC_S_SERVER_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_v1_details_lack_version_independent_id() {
        let info = info();
        let resolver = SimResolver::new(vec![info.clone()]);
        let v1 = resolver.class_details("", info.clsid).await.unwrap();
        assert!(v1.ver_ind_prog_id.is_empty());
        let v2 = resolver.class_details2("", info.clsid).await.unwrap();
        assert_eq!(v2.ver_ind_prog_id, "Sim.Server");
    }
}
