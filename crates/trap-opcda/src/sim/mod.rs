// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory data-access server.
//!
//! [`SimServer`] implements every remote interface of the client on top of an
//! [`AddressSpace`], so sessions, groups, subscriptions and browsing can run
//! without an activation layer.
//!
//! # Features
//!
//! - Three-tier discovery with per-tier failure injection ([`SimResolver`])
//! - Per-operation failure injection ([`SimOp`])
//! - Reference accounting of every handed-out interface ([`RefLedger`])
//! - Data-change, refresh, async read/write and cancel notifications
//! - Shutdown requests
//!
//! # Examples
//!
//! ```no_run
//! use trap_opcda::sim::{SimServer, SimTag};
//! use trap_opcda::OpcServer;
//!
//! # async fn example() -> trap_opcda::OpcDaResult<()> {
//! let sim = SimServer::builder()
//!     .prog_id("Sim.Server.1")
//!     .tag("Line1.Speed", SimTag::new(12.5f64))
//!     .build();
//!
//! let server = OpcServer::connect(&sim.connector(), "Sim.Server.1", "localhost").await?;
//! let group = server.groups().add("fast").await?;
//! let item = group.items().add_item("Line1.Speed").await?;
//! item.read(trap_opcda::DataSource::Device).await?;
//! server.disconnect().await?;
//! assert_eq!(sim.ledger().outstanding(), 0);
//! # Ok(())
//! # }
//! ```

mod address_space;
mod group;
mod ledger;
mod resolver;
mod server;

pub use address_space::{AddressSpace, SimTag, TagConfig, DELIMITER};
pub use ledger::{LedgerSnapshot, RefLedger};
pub use resolver::{SimActivator, SimResolver};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::codec::{ForeignHeap, TrackingHeap, Variant};
use crate::error::{OpcDaError, OpcDaResult};
use crate::session::Connector;
use crate::types::{hresult, ClassId, ServerInfo, ServerState};

use server::SimState;

/// Program ID used when none is configured.
pub const DEFAULT_PROG_ID: &str = "Trap.Simulator.1";

// =============================================================================
// Failure Injection
// =============================================================================

/// A simulated remote operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    /// Server activation.
    Activate,
    /// Negotiation of IOPCCommon.
    QueryCommon,
    /// Negotiation of IOPCItemProperties.
    QueryItemProperties,
    /// Negotiation of IOPCBrowseServerAddressSpace.
    QueryBrowse,
    /// Negotiation of IConnectionPointContainer.
    QueryConnectionPoints,
    /// Negotiation of IOPCSyncIO.
    QuerySyncIo,
    /// Negotiation of IOPCAsyncIO2.
    QueryAsyncIo,
    /// Negotiation of IOPCItemMgt.
    QueryItemMgt,
    /// Group creation.
    AddGroup,
    /// Group removal.
    RemoveGroup,
    /// Group rename.
    SetName,
    /// Group state update.
    SetState,
    /// Client name registration.
    SetClientName,
    /// Locale change.
    SetLocale,
    /// Error text lookup.
    GetErrorString,
    /// Sink subscription.
    Advise,
    /// Sink unsubscription.
    Unadvise,
    /// Item addition and validation.
    AddItems,
    /// Item removal.
    RemoveItems,
    /// Item activation.
    SetActiveState,
    /// Item client handle change.
    SetClientHandles,
    /// Item data type change.
    SetDatatypes,
    /// Synchronous read.
    SyncRead,
    /// Synchronous write.
    SyncWrite,
    /// Asynchronous read.
    AsyncRead,
    /// Asynchronous write.
    AsyncWrite,
    /// Refresh.
    Refresh,
    /// Cancel.
    Cancel,
}

impl SimOp {
    /// Interface method name used in errors.
    pub fn method(self) -> &'static str {
        match self {
            Self::Activate => "CoCreateInstanceEx",
            Self::QueryCommon => "QueryInterface(IOPCCommon)",
            Self::QueryItemProperties => "QueryInterface(IOPCItemProperties)",
            Self::QueryBrowse => "QueryInterface(IOPCBrowseServerAddressSpace)",
            Self::QueryConnectionPoints => "QueryInterface(IConnectionPointContainer)",
            Self::QuerySyncIo => "QueryInterface(IOPCSyncIO)",
            Self::QueryAsyncIo => "QueryInterface(IOPCAsyncIO2)",
            Self::QueryItemMgt => "QueryInterface(IOPCItemMgt)",
            Self::AddGroup => "IOPCServer::AddGroup",
            Self::RemoveGroup => "IOPCServer::RemoveGroup",
            Self::SetName => "IOPCGroupStateMgt::SetName",
            Self::SetState => "IOPCGroupStateMgt::SetState",
            Self::SetClientName => "IOPCCommon::SetClientName",
            Self::SetLocale => "IOPCCommon::SetLocaleID",
            Self::GetErrorString => "IOPCCommon::GetErrorString",
            Self::Advise => "IConnectionPoint::Advise",
            Self::Unadvise => "IConnectionPoint::Unadvise",
            Self::AddItems => "IOPCItemMgt::AddItems",
            Self::RemoveItems => "IOPCItemMgt::RemoveItems",
            Self::SetActiveState => "IOPCItemMgt::SetActiveState",
            Self::SetClientHandles => "IOPCItemMgt::SetClientHandles",
            Self::SetDatatypes => "IOPCItemMgt::SetDatatypes",
            Self::SyncRead => "IOPCSyncIO::Read",
            Self::SyncWrite => "IOPCSyncIO::Write",
            Self::AsyncRead => "IOPCAsyncIO2::Read",
            Self::AsyncWrite => "IOPCAsyncIO2::Write",
            Self::Refresh => "IOPCAsyncIO2::Refresh2",
            Self::Cancel => "IOPCAsyncIO2::Cancel2",
        }
    }
}

impl fmt::Display for SimOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.method())
    }
}

/// Injected failures.
#[derive(Debug, Default)]
pub(crate) struct Faults {
    next: Mutex<HashMap<SimOp, i32>>,
    always: Mutex<HashMap<SimOp, i32>>,
}

impl Faults {
    /// Fails with the injected status, consuming a one-shot fault.
    pub(crate) fn check(&self, op: SimOp) -> OpcDaResult<()> {
        let code = self
            .next
            .lock()
            .remove(&op)
            .or_else(|| self.always.lock().get(&op).copied());
        match code {
            Some(code) => {
                tracing::debug!(operation = %op, code = %hresult::hex(code), "Injected failure");
                Err(OpcDaError::remote(op.method(), code))
            }
            None => Ok(()),
        }
    }
}

// =============================================================================
// SimServer
// =============================================================================

/// Builder for [`SimServer`].
#[derive(Debug)]
pub struct SimServerBuilder {
    prog_id: String,
    clsid: ClassId,
    vendor: String,
    space: AddressSpace,
    heap: Option<Arc<dyn ForeignHeap>>,
}

impl SimServerBuilder {
    /// Sets the program ID.
    pub fn prog_id(mut self, prog_id: impl Into<String>) -> Self {
        self.prog_id = prog_id.into();
        self
    }

    /// Sets the class ID.
    pub fn clsid(mut self, clsid: ClassId) -> Self {
        self.clsid = clsid;
        self
    }

    /// Sets the vendor string reported in the status.
    pub fn vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    /// Adds a tag.
    pub fn tag(mut self, id: impl Into<String>, tag: SimTag) -> Self {
        self.space.insert(id, tag);
        self
    }

    /// Replaces the address space.
    pub fn address_space(mut self, space: AddressSpace) -> Self {
        self.space = space;
        self
    }

    /// Shares a heap with the client instead of a private one.
    pub fn heap(mut self, heap: Arc<dyn ForeignHeap>) -> Self {
        self.heap = Some(heap);
        self
    }

    /// Builds the server.
    pub fn build(self) -> SimServer {
        let heap = self.heap.unwrap_or_else(TrackingHeap::shared);
        let info = ServerInfo {
            cls_str: self.clsid.to_string(),
            ver_ind_prog_id: version_independent(&self.prog_id),
            prog_id: self.prog_id,
            clsid: self.clsid,
        };
        SimServer {
            state: SimState::new(info, self.vendor, self.space, heap),
        }
    }
}

fn version_independent(prog_id: &str) -> String {
    match prog_id.rsplit_once('.') {
        Some((head, version)) if version.chars().all(|c| c.is_ascii_digit()) => head.to_string(),
        _ => prog_id.to_string(),
    }
}

/// A simulated server and the services that reach it.
#[derive(Clone)]
pub struct SimServer {
    state: Arc<SimState>,
}

impl SimServer {
    /// Starts a builder.
    pub fn builder() -> SimServerBuilder {
        SimServerBuilder {
            prog_id: DEFAULT_PROG_ID.to_string(),
            clsid: ClassId(Uuid::new_v4()),
            vendor: "trap-opcda simulator".to_string(),
            space: AddressSpace::new(),
            heap: None,
        }
    }

    /// Creates a server over `space` with default identity.
    pub fn new(space: AddressSpace) -> Self {
        Self::builder().address_space(space).build()
    }

    /// Registration details.
    pub fn info(&self) -> &ServerInfo {
        &self.state.info
    }

    /// The class resolver that knows this server.
    pub fn resolver(&self) -> Arc<SimResolver> {
        Arc::clone(&self.state.resolver)
    }

    /// The activator that creates this server.
    pub fn activator(&self) -> Arc<SimActivator> {
        Arc::new(SimActivator::new(Arc::clone(&self.state)))
    }

    /// A connector wired to this server, sharing its heap.
    pub fn connector(&self) -> Connector {
        Connector::new(self.resolver(), self.activator()).with_heap(self.heap())
    }

    /// Reference accounting of every handed-out interface.
    pub fn ledger(&self) -> Arc<RefLedger> {
        Arc::clone(&self.state.ledger)
    }

    /// The heap used for encoded values.
    pub fn heap(&self) -> Arc<dyn ForeignHeap> {
        Arc::clone(&self.state.heap)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.state.sessions().len()
    }

    /// Number of groups across live sessions.
    pub fn group_count(&self) -> usize {
        self.state
            .sessions()
            .iter()
            .map(|session| session.group_count())
            .sum()
    }

    // =========================================================================
    // Address Space
    // =========================================================================

    /// Adds or replaces a tag.
    pub fn insert_tag(&self, id: impl Into<String>, tag: SimTag) {
        self.state.space.write().insert(id, tag);
    }

    /// Current value of a tag.
    pub fn value(&self, id: &str) -> Option<Variant> {
        self.state.space.read().get(id).map(|tag| tag.value.clone())
    }

    /// Changes a tag value and notifies subscribed groups.
    pub fn set_value(&self, id: &str, value: impl Into<Variant>) -> OpcDaResult<()> {
        {
            let mut space = self.state.space.write();
            let tag = space.get_mut(id).ok_or_else(|| {
                OpcDaError::remote(format!("lookup of '{}'", id), hresult::OPC_E_UNKNOWNITEMID)
            })?;
            tag.value = value.into();
            tag.timestamp = Utc::now();
        }
        self.state.notify(id);
        Ok(())
    }

    /// Changes a tag quality and notifies subscribed groups.
    pub fn set_quality(&self, id: &str, quality: u16) -> OpcDaResult<()> {
        {
            let mut space = self.state.space.write();
            let tag = space.get_mut(id).ok_or_else(|| {
                OpcDaError::remote(format!("lookup of '{}'", id), hresult::OPC_E_UNKNOWNITEMID)
            })?;
            tag.quality = quality;
            tag.timestamp = Utc::now();
        }
        self.state.notify(id);
        Ok(())
    }

    // =========================================================================
    // Behaviour
    // =========================================================================

    /// Sets the reported run state.
    pub fn set_server_state(&self, state: ServerState) {
        *self.state.server_state.write() = state;
    }

    /// Delays asynchronous completions, leaving room to cancel them.
    pub fn set_async_delay(&self, delay: Duration) {
        *self.state.async_delay.write() = delay;
    }

    /// Makes the next call of `op` fail with `code`.
    pub fn fail_next(&self, op: SimOp, code: i32) {
        self.state.faults.next.lock().insert(op, code);
    }

    /// Makes every call of `op` fail with `code`.
    pub fn fail_always(&self, op: SimOp, code: i32) {
        self.state.faults.always.lock().insert(op, code);
    }

    /// Removes every injected failure.
    pub fn clear_faults(&self) {
        self.state.faults.next.lock().clear();
        self.state.faults.always.lock().clear();
    }

    /// Sends a shutdown request to every subscribed session.
    pub fn shutdown(&self, reason: &str) -> usize {
        self.state.request_shutdown(reason)
    }
}

impl fmt::Debug for SimServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimServer")
            .field("prog_id", &self.state.info.prog_id)
            .field("clsid", &self.state.info.clsid)
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_independent_prog_id() {
        assert_eq!(version_independent("Matrikon.OPC.Simulation.1"), "Matrikon.OPC.Simulation");
        assert_eq!(version_independent("Vendor.Server"), "Vendor.Server");
    }

    #[test]
    fn test_faults_next_and_always() {
        let faults = Faults::default();
        assert!(faults.check(SimOp::SyncRead).is_ok());

        faults.next.lock().insert(SimOp::SyncRead, hresult::E_FAIL);
        let err = faults.check(SimOp::SyncRead).unwrap_err();
        assert_eq!(err.hresult(), Some(hresult::E_FAIL));
        assert!(faults.check(SimOp::SyncRead).is_ok());

        faults.always.lock().insert(SimOp::Advise, hresult::CONNECT_E_ADVISELIMIT);
        assert!(faults.check(SimOp::Advise).is_err());
        assert!(faults.check(SimOp::Advise).is_err());
    }
}
