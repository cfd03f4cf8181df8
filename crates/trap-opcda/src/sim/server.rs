// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simulated server object, its session-level interfaces and connection points.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::address_space::{join, AddressSpace};
use super::group::{revise_rate, GroupCore, GroupSettings, SimGroupObject};
use super::ledger::{counted, RefLedger, RefToken};
use super::resolver::SimResolver;
use super::{Faults, SimOp};
use crate::codec::{encode, ForeignHeap, WireVariant};
use crate::error::{OpcDaError, OpcDaResult};
use crate::interface::{
    AddGroupResult, BrowseAddressSpace, CallbackSink, CommonInterface, ConnectionPoint,
    ConnectionPointContainer, DataCallback, GroupRequest, ItemPropertiesInterface,
    PropertyDescription, ServerObject, ShutdownCallback,
};
use crate::types::{
    hresult, property, AccessRights, BrowseDirection, BrowseType, Interface, NamespaceType,
    ServerInfo, ServerState, ServerStatus, VarType, LOCALE_SYSTEM_DEFAULT, LOCALE_USER_DEFAULT,
};

/// Locales the simulator accepts.
const LOCALES: [u32; 3] = [LOCALE_SYSTEM_DEFAULT, LOCALE_USER_DEFAULT, 0x0409];

// =============================================================================
// SimState
// =============================================================================

/// State shared by every session of one simulated server.
pub(crate) struct SimState {
    pub(crate) info: ServerInfo,
    vendor: String,
    start_time: DateTime<Utc>,
    pub(crate) space: RwLock<AddressSpace>,
    pub(crate) heap: Arc<dyn ForeignHeap>,
    pub(crate) ledger: Arc<RefLedger>,
    pub(crate) faults: Faults,
    pub(crate) resolver: Arc<SimResolver>,
    pub(crate) server_state: RwLock<ServerState>,
    pub(crate) async_delay: RwLock<Duration>,
    sessions: RwLock<Vec<Weak<ServerCore>>>,
    next_group_handle: AtomicU32,
    pub(crate) next_item_handle: AtomicU32,
}

impl SimState {
    pub(crate) fn new(
        info: ServerInfo,
        vendor: String,
        space: AddressSpace,
        heap: Arc<dyn ForeignHeap>,
    ) -> Arc<Self> {
        Arc::new(Self {
            resolver: Arc::new(SimResolver::new(vec![info.clone()])),
            info,
            vendor,
            start_time: Utc::now(),
            space: RwLock::new(space),
            heap,
            ledger: RefLedger::new(),
            faults: Faults::default(),
            server_state: RwLock::new(ServerState::Running),
            async_delay: RwLock::new(Duration::ZERO),
            sessions: RwLock::new(Vec::new()),
            next_group_handle: AtomicU32::new(0),
            next_item_handle: AtomicU32::new(0),
        })
    }

    /// Text returned by the error-string service.
    pub(crate) fn error_text(&self, code: i32) -> String {
        format!("{}: {}", self.vendor, hresult::describe(code))
    }

    /// Creates a session object holding one reference.
    pub(crate) fn open_session(self: &Arc<Self>) -> Arc<ServerCore> {
        let core = Arc::new(ServerCore {
            token: self.ledger.acquire(Interface::Server.name()),
            state: Arc::clone(self),
            groups: RwLock::new(Vec::new()),
            shutdown: PointCore::new(Interface::Shutdown),
            locale_id: AtomicU32::new(LOCALE_SYSTEM_DEFAULT),
            client_name: RwLock::new(String::new()),
            last_update: RwLock::new(None),
        });
        let mut sessions = self.sessions.write();
        sessions.retain(|session| session.strong_count() > 0);
        sessions.push(Arc::downgrade(&core));
        core
    }

    /// Sessions whose server reference is still held.
    pub(crate) fn sessions(&self) -> Vec<Arc<ServerCore>> {
        self.sessions
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|session| session.token.count() > 0)
            .collect()
    }

    /// Sends data changes for `tag` to every subscribed group.
    pub(crate) fn notify(&self, tag: &str) {
        for session in self.sessions() {
            let groups: Vec<Arc<GroupCore>> = session.groups.read().clone();
            let mut delivered = false;
            for group in groups {
                delivered |= group.notify_tag(tag);
            }
            if delivered {
                *session.last_update.write() = Some(Utc::now());
            }
        }
    }

    /// Calls every shutdown sink; returns how many were called.
    pub(crate) fn request_shutdown(&self, reason: &str) -> usize {
        let mut count = 0;
        for session in self.sessions() {
            for sink in session.shutdown.shutdown_sinks() {
                sink.shutdown_request(reason);
                count += 1;
            }
        }
        count
    }

    /// Encodes a value into the shared heap; failures become `OPC_E_BADTYPE`.
    pub(crate) fn encode_value(&self, value: &crate::codec::Variant) -> (WireVariant, i32) {
        match encode(value, &self.heap) {
            Ok(wire) => (wire, hresult::S_OK),
            Err(e) => {
                tracing::debug!(error = %e, "Simulated value not encodable");
                (WireVariant::empty(), hresult::OPC_E_BADTYPE)
            }
        }
    }
}

// =============================================================================
// Connection Points
// =============================================================================

/// Sinks advised on one outgoing interface.
pub(crate) struct PointCore {
    interface: Interface,
    sinks: RwLock<BTreeMap<u32, CallbackSink>>,
    next_cookie: AtomicU32,
}

impl PointCore {
    pub(crate) fn new(interface: Interface) -> Arc<Self> {
        Arc::new(Self {
            interface,
            sinks: RwLock::new(BTreeMap::new()),
            next_cookie: AtomicU32::new(0),
        })
    }

    pub(crate) fn data_sinks(&self) -> Vec<Arc<dyn DataCallback>> {
        self.sinks
            .read()
            .values()
            .filter_map(|sink| match sink {
                CallbackSink::Data(sink) => Some(Arc::clone(sink)),
                CallbackSink::Shutdown(_) => None,
            })
            .collect()
    }

    fn shutdown_sinks(&self) -> Vec<Arc<dyn ShutdownCallback>> {
        self.sinks
            .read()
            .values()
            .filter_map(|sink| match sink {
                CallbackSink::Shutdown(sink) => Some(Arc::clone(sink)),
                CallbackSink::Data(_) => None,
            })
            .collect()
    }
}

/// IConnectionPointContainer over a fixed set of points.
pub(crate) struct SimContainer {
    state: Arc<SimState>,
    points: Vec<Arc<PointCore>>,
    token: RefToken,
}

impl SimContainer {
    pub(crate) fn new(state: &Arc<SimState>, points: Vec<Arc<PointCore>>) -> Arc<Self> {
        Arc::new(Self {
            token: state.ledger.acquire(Interface::ConnectionPointContainer.name()),
            state: Arc::clone(state),
            points,
        })
    }
}

#[async_trait]
impl ConnectionPointContainer for SimContainer {
    async fn find_connection_point(
        &self,
        interface: Interface,
    ) -> OpcDaResult<Arc<dyn ConnectionPoint>> {
        let point = self
            .points
            .iter()
            .find(|point| point.interface == interface)
            .ok_or_else(|| {
                OpcDaError::remote(
                    "IConnectionPointContainer::FindConnectionPoint",
                    hresult::CONNECT_E_NOCONNECTIONPOINT,
                )
            })?;
        Ok(Arc::new(SimPoint {
            token: self.state.ledger.acquire("IConnectionPoint"),
            state: Arc::clone(&self.state),
            core: Arc::clone(point),
        }))
    }
}

struct SimPoint {
    state: Arc<SimState>,
    core: Arc<PointCore>,
    token: RefToken,
}

#[async_trait]
impl ConnectionPoint for SimPoint {
    async fn advise(&self, sink: CallbackSink) -> OpcDaResult<u32> {
        self.state.faults.check(SimOp::Advise)?;
        if sink.interface() != self.core.interface {
            return Err(OpcDaError::remote(SimOp::Advise.method(), hresult::E_NOINTERFACE));
        }
        let cookie = self.core.next_cookie.fetch_add(1, Ordering::Relaxed) + 1;
        self.core.sinks.write().insert(cookie, sink);
        Ok(cookie)
    }

    async fn unadvise(&self, cookie: u32) -> OpcDaResult<()> {
        self.state.faults.check(SimOp::Unadvise)?;
        self.core
            .sinks
            .write()
            .remove(&cookie)
            .map(|_| ())
            .ok_or_else(|| OpcDaError::remote(SimOp::Unadvise.method(), hresult::CONNECT_E_NOCONNECTION))
    }
}

// =============================================================================
// ServerCore (IOPCServer)
// =============================================================================

/// One client session on the simulated server.
pub(crate) struct ServerCore {
    state: Arc<SimState>,
    groups: RwLock<Vec<Arc<GroupCore>>>,
    shutdown: Arc<PointCore>,
    locale_id: AtomicU32,
    client_name: RwLock<String>,
    last_update: RwLock<Option<DateTime<Utc>>>,
    token: RefToken,
}

impl ServerCore {
    pub(crate) fn group_count(&self) -> usize {
        self.groups.read().len()
    }
}

#[async_trait]
impl ServerObject for ServerCore {
    async fn get_status(&self) -> OpcDaResult<ServerStatus> {
        let now = Utc::now();
        Ok(ServerStatus {
            start_time: self.state.start_time,
            current_time: now,
            last_update_time: self.last_update.read().unwrap_or_default(),
            server_state: *self.state.server_state.read(),
            group_count: self.group_count() as u32,
            band_width: u32::MAX,
            major_version: 2,
            minor_version: 5,
            build_number: 1,
            vendor_info: self.state.vendor.clone(),
        })
    }

    async fn get_error_string(&self, code: i32, locale_id: u32) -> OpcDaResult<String> {
        self.state.faults.check(SimOp::GetErrorString)?;
        if !LOCALES.contains(&locale_id) {
            return Err(OpcDaError::remote("IOPCServer::GetErrorString", hresult::E_INVALIDARG));
        }
        Ok(self.state.error_text(code))
    }

    async fn add_group(&self, request: GroupRequest) -> OpcDaResult<AddGroupResult> {
        self.state.faults.check(SimOp::AddGroup)?;
        if !(0.0..=100.0).contains(&request.deadband) {
            return Err(OpcDaError::remote(SimOp::AddGroup.method(), hresult::E_INVALIDARG));
        }

        let server_handle = self.state.next_group_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let name = if request.name.is_empty() {
            format!("Group{}", server_handle)
        } else {
            request.name.clone()
        };

        let mut groups = self.groups.write();
        if groups.iter().any(|group| group.name() == name) {
            return Err(OpcDaError::remote(SimOp::AddGroup.method(), hresult::OPC_E_DUPLICATENAME));
        }
        let revised_update_rate = revise_rate(request.update_rate);
        let core = GroupCore::new(
            Arc::clone(&self.state),
            server_handle,
            GroupSettings {
                name,
                active: request.active,
                update_rate: revised_update_rate,
                client_handle: request.client_handle,
                time_bias: request.time_bias,
                deadband: request.deadband,
                locale_id: request.locale_id,
            },
        );
        groups.push(Arc::clone(&core));
        tracing::debug!(server_handle, revised_update_rate, "Simulated group created");

        Ok(AddGroupResult {
            server_handle,
            revised_update_rate,
            group: SimGroupObject::new(core),
        })
    }

    async fn remove_group(&self, server_handle: u32, _force: bool) -> OpcDaResult<()> {
        self.state.faults.check(SimOp::RemoveGroup)?;
        let mut groups = self.groups.write();
        let index = groups
            .iter()
            .position(|group| group.server_handle == server_handle)
            .ok_or_else(|| OpcDaError::remote(SimOp::RemoveGroup.method(), hresult::E_INVALIDARG))?;
        groups.remove(index).mark_removed();
        Ok(())
    }

    async fn query_common(&self) -> OpcDaResult<Arc<dyn CommonInterface>> {
        self.state.faults.check(SimOp::QueryCommon)?;
        Ok(Arc::new(SimCommon {
            token: self.state.ledger.acquire(Interface::Common.name()),
            state: Arc::clone(&self.state),
            session: self.session()?,
        }))
    }

    async fn query_item_properties(&self) -> OpcDaResult<Arc<dyn ItemPropertiesInterface>> {
        self.state.faults.check(SimOp::QueryItemProperties)?;
        Ok(Arc::new(SimProperties {
            token: self.state.ledger.acquire(Interface::ItemProperties.name()),
            state: Arc::clone(&self.state),
        }))
    }

    async fn query_browse(&self) -> OpcDaResult<Arc<dyn BrowseAddressSpace>> {
        self.state.faults.check(SimOp::QueryBrowse)?;
        Ok(Arc::new(SimBrowse {
            token: self.state.ledger.acquire(Interface::BrowseAddressSpace.name()),
            state: Arc::clone(&self.state),
            position: Mutex::new(Vec::new()),
        }))
    }

    async fn query_connection_points(&self) -> OpcDaResult<Arc<dyn ConnectionPointContainer>> {
        self.state.faults.check(SimOp::QueryConnectionPoints)?;
        Ok(SimContainer::new(&self.state, vec![Arc::clone(&self.shutdown)]))
    }
}

impl ServerCore {
    fn session(&self) -> OpcDaResult<Arc<ServerCore>> {
        self.state
            .sessions
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .find(|session| std::ptr::eq(session.as_ref(), self))
            .ok_or_else(|| OpcDaError::remote("IOPCServer", hresult::RPC_E_DISCONNECTED))
    }
}

// =============================================================================
// IOPCCommon
// =============================================================================

struct SimCommon {
    state: Arc<SimState>,
    session: Arc<ServerCore>,
    token: RefToken,
}

#[async_trait]
impl CommonInterface for SimCommon {
    async fn set_locale_id(&self, locale_id: u32) -> OpcDaResult<()> {
        self.state.faults.check(SimOp::SetLocale)?;
        if !LOCALES.contains(&locale_id) {
            return Err(OpcDaError::remote(SimOp::SetLocale.method(), hresult::E_INVALIDARG));
        }
        self.session.locale_id.store(locale_id, Ordering::Release);
        Ok(())
    }

    async fn get_locale_id(&self) -> OpcDaResult<u32> {
        Ok(self.session.locale_id.load(Ordering::Acquire))
    }

    async fn query_available_locale_ids(&self) -> OpcDaResult<Vec<u32>> {
        Ok(LOCALES.to_vec())
    }

    async fn get_error_string(&self, code: i32) -> OpcDaResult<String> {
        self.state.faults.check(SimOp::GetErrorString)?;
        Ok(self.state.error_text(code))
    }

    async fn set_client_name(&self, name: &str) -> OpcDaResult<()> {
        self.state.faults.check(SimOp::SetClientName)?;
        *self.session.client_name.write() = name.to_string();
        Ok(())
    }
}

// =============================================================================
// IOPCItemProperties
// =============================================================================

struct SimProperties {
    state: Arc<SimState>,
    token: RefToken,
}

fn property_description(id: u32) -> (&'static str, VarType) {
    match id {
        property::DATA_TYPE => ("Item Canonical DataType", VarType::I2),
        property::VALUE => ("Item Value", VarType::VARIANT),
        property::QUALITY => ("Item Quality", VarType::I2),
        property::TIMESTAMP => ("Item Timestamp", VarType::DATE),
        property::ACCESS_RIGHTS => ("Item Access Rights", VarType::I4),
        property::SCAN_RATE => ("Server Scan Rate", VarType::R4),
        property::EU_TYPE => ("Item EU Type", VarType::I4),
        property::EU_INFO => ("Item EUInfo", VarType::VARIANT),
        property::EU_UNITS => ("EU Units", VarType::BSTR),
        property::DESCRIPTION => ("Item Description", VarType::BSTR),
        _ => ("", VarType::EMPTY),
    }
}

#[async_trait]
impl ItemPropertiesInterface for SimProperties {
    async fn query_available_properties(
        &self,
        item_id: &str,
    ) -> OpcDaResult<Vec<PropertyDescription>> {
        let space = self.state.space.read();
        let tag = space.require(item_id)?;
        Ok(tag
            .property_ids()
            .into_iter()
            .map(|id| {
                let (description, data_type) = property_description(id);
                PropertyDescription {
                    id,
                    description: description.to_string(),
                    data_type,
                }
            })
            .collect())
    }

    async fn get_item_properties(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcDaResult<(Vec<WireVariant>, Vec<i32>)> {
        let values: Vec<Option<crate::codec::Variant>> = {
            let space = self.state.space.read();
            let tag = space.require(item_id)?;
            property_ids.iter().map(|&id| tag.property(id)).collect()
        };

        let mut wire = Vec::with_capacity(values.len());
        let mut statuses = Vec::with_capacity(values.len());
        for value in values {
            let (value, status) = match value {
                Some(value) => self.state.encode_value(&value),
                None => (WireVariant::empty(), hresult::OPC_E_INVALID_PID),
            };
            wire.push(value);
            statuses.push(status);
        }
        Ok((wire, statuses))
    }

    async fn lookup_item_ids(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcDaResult<(Vec<String>, Vec<i32>)> {
        let space = self.state.space.read();
        let tag = space.require(item_id)?;
        let exposed = tag.property_ids();

        let mut ids = Vec::with_capacity(property_ids.len());
        let mut statuses = Vec::with_capacity(property_ids.len());
        for id in property_ids {
            // Only the extended properties have an item ID of their own.
            if exposed.contains(id) && *id > property::SCAN_RATE {
                ids.push(format!("{}#{}", item_id, id));
                statuses.push(hresult::S_OK);
            } else {
                ids.push(String::new());
                statuses.push(hresult::OPC_E_INVALID_PID);
            }
        }
        Ok((ids, statuses))
    }
}

// =============================================================================
// IOPCBrowseServerAddressSpace
// =============================================================================

struct SimBrowse {
    state: Arc<SimState>,
    position: Mutex<Vec<String>>,
    token: RefToken,
}

#[async_trait]
impl BrowseAddressSpace for SimBrowse {
    async fn query_organization(&self) -> OpcDaResult<NamespaceType> {
        Ok(NamespaceType::Hierarchical)
    }

    async fn browse_item_ids(
        &self,
        browse_type: BrowseType,
        filter: &str,
        data_type: VarType,
        access_rights: AccessRights,
    ) -> OpcDaResult<Vec<String>> {
        let position = self.position.lock().clone();
        Ok(self
            .state
            .space
            .read()
            .browse(&position, browse_type, filter, data_type, access_rights))
    }

    async fn change_browse_position(
        &self,
        direction: BrowseDirection,
        name: &str,
    ) -> OpcDaResult<()> {
        const METHOD: &str = "IOPCBrowseServerAddressSpace::ChangeBrowsePosition";
        let mut position = self.position.lock();
        match direction {
            BrowseDirection::Up => {
                if position.pop().is_none() {
                    return Err(OpcDaError::remote(METHOD, hresult::E_FAIL));
                }
            }
            BrowseDirection::Down => {
                let known = self
                    .state
                    .space
                    .read()
                    .branches(&position)
                    .iter()
                    .any(|branch| branch == name);
                if !known {
                    return Err(OpcDaError::remote(METHOD, hresult::E_INVALIDARG));
                }
                position.push(name.to_string());
            }
            BrowseDirection::To => {
                let target: Vec<String> = if name.is_empty() {
                    Vec::new()
                } else {
                    name.split(super::DELIMITER).map(str::to_string).collect()
                };
                if !self.state.space.read().is_branch(&target) {
                    return Err(OpcDaError::remote(METHOD, hresult::E_INVALIDARG));
                }
                *position = target;
            }
        }
        Ok(())
    }

    async fn get_item_id(&self, leaf: &str) -> OpcDaResult<String> {
        let position = self.position.lock();
        let prefix = join(&position);
        Ok(match (prefix.is_empty(), leaf.is_empty()) {
            (_, true) => prefix,
            (true, false) => leaf.to_string(),
            (false, false) => format!("{}{}{}", prefix, super::DELIMITER, leaf),
        })
    }
}

counted!(ServerCore, SimCommon, SimProperties, SimBrowse, SimContainer, SimPoint);
