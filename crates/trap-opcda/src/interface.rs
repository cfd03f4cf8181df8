// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Remote interface abstraction layer.
//!
//! Every remote object the client talks to is reached through one of the
//! traits in this module. Each trait mirrors one fixed interface table of the
//! protocol; implementations supply the actual transport (a real activation
//! layer, the in-memory simulator, or a test stub).
//!
//! # Reference Counting
//!
//! All remote interfaces extend [`Unknown`]. A reference returned by a remote
//! call (activation, `query_*`, `add_group`, `find_connection_point`) already
//! carries one count owned by the receiver, which is why the client wraps it
//! in a [`RemoteHandle`](crate::handle::RemoteHandle) that releases exactly
//! once.
//!
//! # Object Graph
//!
//! ```text
//! Activator ──activate──▶ ServerObject ──query_common──────────▶ CommonInterface
//!                              │        ──query_item_properties▶ ItemPropertiesInterface
//!                              │        ──query_browse─────────▶ BrowseAddressSpace
//!                              │        ──query_connection_points▶ ConnectionPointContainer
//!                              │                                      │
//!                              └─add_group─▶ GroupObject              └─▶ ConnectionPoint
//!                                               ├──▶ SyncIo                  (advise sinks)
//!                                               ├──▶ AsyncIo
//!                                               ├──▶ ItemMgt
//!                                               └──▶ ConnectionPointContainer
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::WireVariant;
use crate::error::OpcDaResult;
use crate::types::{
    AccessRights, BrowseDirection, BrowseType, ClassId, DataSource, Interface, NamespaceType,
    ServerInfo, ServerStatus, VarType,
};

// =============================================================================
// Unknown
// =============================================================================

/// Reference counting shared by every remote interface.
pub trait Unknown: Send + Sync {
    /// Adds a reference and returns the new count.
    fn add_ref(&self) -> u32;

    /// Drops a reference and returns the remaining count.
    fn release(&self) -> u32;
}

// =============================================================================
// Discovery and Activation
// =============================================================================

/// Where a remote object is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    /// Out-of-process server on this machine.
    Local,
    /// Server on another node.
    Remote,
}

impl Locality {
    /// Picks the locality for `node`.
    pub fn for_node(node: &str) -> Self {
        if crate::types::is_local(node) {
            Self::Local
        } else {
            Self::Remote
        }
    }
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Resolves program IDs and enumerates servers.
///
/// Three independent services answer these questions: the v2 server-list
/// service, the v1 server-list service and the name registry. Each may be
/// missing or fail on a given node; callers try them in that order.
#[async_trait]
pub trait ClassResolver: Send + Sync {
    /// Resolves through the v2 server-list service.
    async fn clsid_from_server_list2(&self, prog_id: &str, node: &str) -> OpcDaResult<ClassId>;

    /// Resolves through the v1 server-list service.
    async fn clsid_from_server_list(&self, prog_id: &str, node: &str) -> OpcDaResult<ClassId>;

    /// Resolves through the name registry (`<ClassesRoot>/<progId>/CLSID`).
    async fn clsid_from_registry(&self, prog_id: &str, node: &str) -> OpcDaResult<ClassId>;

    /// Lists classes implementing any of `categories` through the v2 service.
    async fn enum_servers2(&self, node: &str, categories: &[Uuid]) -> OpcDaResult<Vec<ClassId>>;

    /// Lists classes implementing any of `categories` through the v1 service.
    async fn enum_servers(&self, node: &str, categories: &[Uuid]) -> OpcDaResult<Vec<ClassId>>;

    /// Lists registry entries marked as OPC servers.
    async fn enum_registry_servers(&self, node: &str) -> OpcDaResult<Vec<ServerInfo>>;

    /// Class details through the v2 service (includes the version-independent ID).
    async fn class_details2(&self, node: &str, clsid: ClassId) -> OpcDaResult<ServerInfo>;

    /// Class details through the v1 service.
    async fn class_details(&self, node: &str, clsid: ClassId) -> OpcDaResult<ServerInfo>;
}

/// Creates remote server objects.
#[async_trait]
pub trait Activator: Send + Sync {
    /// Activates `clsid` and returns its server interface.
    async fn activate(
        &self,
        clsid: ClassId,
        locality: Locality,
        node: &str,
    ) -> OpcDaResult<Arc<dyn ServerObject>>;
}

// =============================================================================
// Server
// =============================================================================

/// Parameters of a group creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRequest {
    /// Requested name; empty lets the server choose.
    pub name: String,
    /// Initial active state.
    pub active: bool,
    /// Requested update rate in milliseconds.
    pub update_rate: u32,
    /// Client handle for the group.
    pub client_handle: u32,
    /// Time bias in minutes.
    pub time_bias: i32,
    /// Percent deadband.
    pub deadband: f32,
    /// Locale ID.
    pub locale_id: u32,
}

/// A created group.
pub struct AddGroupResult {
    /// Server handle.
    pub server_handle: u32,
    /// Rate the server will actually use.
    pub revised_update_rate: u32,
    /// State management interface of the new group.
    pub group: Arc<dyn GroupObject>,
}

/// IOPCServer.
#[async_trait]
pub trait ServerObject: Unknown {
    /// Returns the server status.
    async fn get_status(&self) -> OpcDaResult<ServerStatus>;

    /// Returns the text for a status code.
    async fn get_error_string(&self, code: i32, locale_id: u32) -> OpcDaResult<String>;

    /// Creates a group.
    async fn add_group(&self, request: GroupRequest) -> OpcDaResult<AddGroupResult>;

    /// Deletes a group. Without `force` the group must have no outstanding references.
    async fn remove_group(&self, server_handle: u32, force: bool) -> OpcDaResult<()>;

    /// Negotiates IOPCCommon.
    async fn query_common(&self) -> OpcDaResult<Arc<dyn CommonInterface>>;

    /// Negotiates IOPCItemProperties.
    async fn query_item_properties(&self) -> OpcDaResult<Arc<dyn ItemPropertiesInterface>>;

    /// Negotiates IOPCBrowseServerAddressSpace.
    async fn query_browse(&self) -> OpcDaResult<Arc<dyn BrowseAddressSpace>>;

    /// Negotiates IConnectionPointContainer.
    async fn query_connection_points(&self) -> OpcDaResult<Arc<dyn ConnectionPointContainer>>;
}

/// IOPCCommon.
#[async_trait]
pub trait CommonInterface: Unknown {
    /// Sets the session locale.
    async fn set_locale_id(&self, locale_id: u32) -> OpcDaResult<()>;

    /// Returns the session locale.
    async fn get_locale_id(&self) -> OpcDaResult<u32>;

    /// Lists supported locales.
    async fn query_available_locale_ids(&self) -> OpcDaResult<Vec<u32>>;

    /// Returns the text for a status code in the session locale.
    async fn get_error_string(&self, code: i32) -> OpcDaResult<String>;

    /// Registers the client display name.
    async fn set_client_name(&self, name: &str) -> OpcDaResult<()>;
}

/// One property an item exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescription {
    /// Property ID.
    pub id: u32,
    /// Human-readable description.
    pub description: String,
    /// Property value type.
    pub data_type: VarType,
}

/// IOPCItemProperties.
#[async_trait]
pub trait ItemPropertiesInterface: Unknown {
    /// Lists the properties of `item_id`.
    async fn query_available_properties(
        &self,
        item_id: &str,
    ) -> OpcDaResult<Vec<PropertyDescription>>;

    /// Reads property values; one value and one status per ID.
    async fn get_item_properties(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcDaResult<(Vec<WireVariant>, Vec<i32>)>;

    /// Returns item IDs through which properties can be accessed directly.
    async fn lookup_item_ids(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcDaResult<(Vec<String>, Vec<i32>)>;
}

/// IOPCBrowseServerAddressSpace.
#[async_trait]
pub trait BrowseAddressSpace: Unknown {
    /// Returns the namespace shape.
    async fn query_organization(&self) -> OpcDaResult<NamespaceType>;

    /// Lists names at the current position.
    async fn browse_item_ids(
        &self,
        browse_type: BrowseType,
        filter: &str,
        data_type: VarType,
        access_rights: AccessRights,
    ) -> OpcDaResult<Vec<String>>;

    /// Moves the browse position.
    async fn change_browse_position(
        &self,
        direction: BrowseDirection,
        name: &str,
    ) -> OpcDaResult<()>;

    /// Returns the fully qualified ID of `leaf`; empty returns the current position.
    async fn get_item_id(&self, leaf: &str) -> OpcDaResult<String>;
}

// =============================================================================
// Group
// =============================================================================

/// Group state as held by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupState {
    /// Current update rate in milliseconds.
    pub update_rate: u32,
    /// Active flag.
    pub active: bool,
    /// Group name.
    pub name: String,
    /// Time bias in minutes.
    pub time_bias: i32,
    /// Percent deadband.
    pub deadband: f32,
    /// Locale ID.
    pub locale_id: u32,
    /// Client handle.
    pub client_handle: u32,
    /// Server handle.
    pub server_handle: u32,
}

/// A partial group state update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupStateChange {
    /// Requested update rate.
    pub update_rate: Option<u32>,
    /// Active flag.
    pub active: Option<bool>,
    /// Time bias.
    pub time_bias: Option<i32>,
    /// Percent deadband.
    pub deadband: Option<f32>,
    /// Locale ID.
    pub locale_id: Option<u32>,
    /// Client handle.
    pub client_handle: Option<u32>,
}

/// IOPCGroupStateMgt plus interface negotiation on the group object.
#[async_trait]
pub trait GroupObject: Unknown {
    /// Reads the group state.
    async fn get_state(&self) -> OpcDaResult<GroupState>;

    /// Applies a partial update and returns the revised update rate.
    async fn set_state(&self, change: GroupStateChange) -> OpcDaResult<u32>;

    /// Renames the group.
    async fn set_name(&self, name: &str) -> OpcDaResult<()>;

    /// Negotiates IOPCSyncIO.
    async fn query_sync_io(&self) -> OpcDaResult<Arc<dyn SyncIo>>;

    /// Negotiates IOPCAsyncIO2.
    async fn query_async_io(&self) -> OpcDaResult<Arc<dyn AsyncIo>>;

    /// Negotiates IOPCItemMgt.
    async fn query_item_mgt(&self) -> OpcDaResult<Arc<dyn ItemMgt>>;

    /// Negotiates IConnectionPointContainer.
    async fn query_connection_points(&self) -> OpcDaResult<Arc<dyn ConnectionPointContainer>>;
}

/// One item state returned by a synchronous read.
#[derive(Debug)]
pub struct WireItemState {
    /// Client handle of the item.
    pub client_handle: u32,
    /// Encoded value.
    pub value: WireVariant,
    /// Quality bitfield.
    pub quality: u16,
    /// Source timestamp.
    pub timestamp: DateTime<Utc>,
}

/// IOPCSyncIO.
#[async_trait]
pub trait SyncIo: Unknown {
    /// Reads items; one state and one status per handle.
    async fn read(
        &self,
        source: DataSource,
        server_handles: &[u32],
    ) -> OpcDaResult<(Vec<WireItemState>, Vec<i32>)>;

    /// Writes items; one status per handle.
    async fn write(&self, server_handles: &[u32], values: &[WireVariant]) -> OpcDaResult<Vec<i32>>;
}

/// IOPCAsyncIO2.
#[async_trait]
pub trait AsyncIo: Unknown {
    /// Starts a read; returns the cancel ID and one status per handle.
    async fn read(&self, server_handles: &[u32], transaction_id: u32)
        -> OpcDaResult<(u32, Vec<i32>)>;

    /// Starts a write; returns the cancel ID and one status per handle.
    async fn write(
        &self,
        server_handles: &[u32],
        values: &[WireVariant],
        transaction_id: u32,
    ) -> OpcDaResult<(u32, Vec<i32>)>;

    /// Requests a data-change event for every active item.
    async fn refresh(&self, source: DataSource, transaction_id: u32) -> OpcDaResult<u32>;

    /// Cancels an outstanding transaction.
    async fn cancel(&self, cancel_id: u32) -> OpcDaResult<()>;
}

/// One element of an add or validate batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDefinition {
    /// Access path hint.
    pub access_path: String,
    /// Item ID (tag).
    pub item_id: String,
    /// Initial active state.
    pub active: bool,
    /// Client handle.
    pub client_handle: u32,
    /// Requested data type; `VT_EMPTY` selects the canonical type.
    pub requested_type: VarType,
}

/// Server answer for one added or validated item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemResult {
    /// Server handle (0 for validation).
    pub server_handle: u32,
    /// Canonical data type.
    pub canonical_type: VarType,
    /// Access rights.
    pub access_rights: AccessRights,
}

/// IOPCItemMgt.
#[async_trait]
pub trait ItemMgt: Unknown {
    /// Adds items; one result and one status per definition.
    async fn add_items(
        &self,
        items: &[ItemDefinition],
    ) -> OpcDaResult<(Vec<ItemResult>, Vec<i32>)>;

    /// Validates items without adding them.
    async fn validate_items(
        &self,
        items: &[ItemDefinition],
        blob_update: bool,
    ) -> OpcDaResult<(Vec<ItemResult>, Vec<i32>)>;

    /// Removes items.
    async fn remove_items(&self, server_handles: &[u32]) -> OpcDaResult<Vec<i32>>;

    /// Activates or deactivates items.
    async fn set_active_state(&self, server_handles: &[u32], active: bool)
        -> OpcDaResult<Vec<i32>>;

    /// Reassigns client handles.
    async fn set_client_handles(
        &self,
        server_handles: &[u32],
        client_handles: &[u32],
    ) -> OpcDaResult<Vec<i32>>;

    /// Changes requested data types.
    async fn set_datatypes(
        &self,
        server_handles: &[u32],
        requested_types: &[VarType],
    ) -> OpcDaResult<Vec<i32>>;
}

// =============================================================================
// Connection Points and Sinks
// =============================================================================

/// IConnectionPointContainer.
#[async_trait]
pub trait ConnectionPointContainer: Unknown {
    /// Finds the connection point for an outgoing interface.
    async fn find_connection_point(
        &self,
        interface: Interface,
    ) -> OpcDaResult<Arc<dyn ConnectionPoint>>;
}

/// A client-side object the server calls back.
#[derive(Clone)]
pub enum CallbackSink {
    /// IOPCDataCallback.
    Data(Arc<dyn DataCallback>),
    /// IOPCShutdown.
    Shutdown(Arc<dyn ShutdownCallback>),
}

impl CallbackSink {
    /// Returns the interface this sink implements.
    pub fn interface(&self) -> Interface {
        match self {
            Self::Data(_) => Interface::DataCallback,
            Self::Shutdown(_) => Interface::Shutdown,
        }
    }
}

impl fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackSink({})", self.interface())
    }
}

/// IConnectionPoint.
#[async_trait]
pub trait ConnectionPoint: Unknown {
    /// Subscribes a sink and returns its cookie.
    async fn advise(&self, sink: CallbackSink) -> OpcDaResult<u32>;

    /// Cancels a subscription.
    async fn unadvise(&self, cookie: u32) -> OpcDaResult<()>;
}

/// A data-change notification as delivered by the server.
#[derive(Debug, Default)]
pub struct RawDataChange {
    /// Transaction ID (0 for subscription updates).
    pub transaction_id: u32,
    /// Client handle of the group.
    pub group_handle: u32,
    /// Worst quality in the batch.
    pub master_quality: i32,
    /// Worst status in the batch.
    pub master_error: i32,
    /// Client handles of the items.
    pub client_handles: Vec<u32>,
    /// Encoded values.
    pub values: Vec<WireVariant>,
    /// Qualities.
    pub qualities: Vec<u16>,
    /// Timestamps.
    pub timestamps: Vec<DateTime<Utc>>,
    /// Per-item statuses.
    pub errors: Vec<i32>,
}

/// An asynchronous read completion. Same layout as a data change.
pub type RawReadComplete = RawDataChange;

/// An asynchronous write completion.
#[derive(Debug, Default)]
pub struct RawWriteComplete {
    /// Transaction ID.
    pub transaction_id: u32,
    /// Client handle of the group.
    pub group_handle: u32,
    /// Worst status in the batch.
    pub master_error: i32,
    /// Client handles of the items.
    pub client_handles: Vec<u32>,
    /// Per-item statuses.
    pub errors: Vec<i32>,
}

/// A cancel completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawCancelComplete {
    /// Transaction ID.
    pub transaction_id: u32,
    /// Client handle of the group.
    pub group_handle: u32,
}

/// IOPCDataCallback.
///
/// Called on server threads; implementations must not block.
pub trait DataCallback: Send + Sync {
    /// Subscription update or refresh result.
    fn on_data_change(&self, event: RawDataChange);

    /// Asynchronous read result.
    fn on_read_complete(&self, event: RawReadComplete);

    /// Asynchronous write result.
    fn on_write_complete(&self, event: RawWriteComplete);

    /// Cancel result.
    fn on_cancel_complete(&self, event: RawCancelComplete);
}

/// IOPCShutdown.
pub trait ShutdownCallback: Send + Sync {
    /// The server is about to shut down.
    fn shutdown_request(&self, reason: &str);
}
