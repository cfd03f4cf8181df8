// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC DA protocol types and constants.
//!
//! This module provides the enumerations, bitmasks, identifiers and status
//! codes shared by every layer of the client:
//!
//! - [`VarType`]: variant type tags, including the array flag
//! - [`DataSource`], [`AccessRights`], [`Quality`]
//! - [`ServerState`] and [`ServerStatus`]
//! - [`NamespaceType`], [`BrowseDirection`], [`BrowseType`]
//! - [`ClassId`], [`Interface`] and the component category IDs
//! - [`hresult`]: status codes and their names

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::Variant;

// =============================================================================
// Locale and Property Constants
// =============================================================================

/// System default locale.
pub const LOCALE_SYSTEM_DEFAULT: u32 = 0x0800;

/// User default locale.
pub const LOCALE_USER_DEFAULT: u32 = 0x0400;

/// Well-known item property IDs.
pub mod property {
    /// Canonical data type.
    pub const DATA_TYPE: u32 = 1;
    /// Current value.
    pub const VALUE: u32 = 2;
    /// Current quality.
    pub const QUALITY: u32 = 3;
    /// Current timestamp.
    pub const TIMESTAMP: u32 = 4;
    /// Access rights.
    pub const ACCESS_RIGHTS: u32 = 5;
    /// Server scan rate.
    pub const SCAN_RATE: u32 = 6;
    /// Engineering-unit type.
    pub const EU_TYPE: u32 = 7;
    /// Engineering-unit info.
    pub const EU_INFO: u32 = 8;
    /// Engineering units.
    pub const EU_UNITS: u32 = 100;
    /// Item description.
    pub const DESCRIPTION: u32 = 101;
}

// =============================================================================
// VarType
// =============================================================================

/// A variant type tag.
///
/// Array types carry [`VarType::ARRAY`] on top of the element tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarType(pub u16);

impl VarType {
    /// No value; as a requested type it means "native".
    pub const EMPTY: Self = Self(0);
    /// SQL-style null.
    pub const NULL: Self = Self(1);
    /// 16-bit signed integer.
    pub const I2: Self = Self(2);
    /// 32-bit signed integer.
    pub const I4: Self = Self(3);
    /// 32-bit float.
    pub const R4: Self = Self(4);
    /// 64-bit float.
    pub const R8: Self = Self(5);
    /// Currency, fixed point scaled by 10 000.
    pub const CY: Self = Self(6);
    /// OLE automation date.
    pub const DATE: Self = Self(7);
    /// Length-prefixed UTF-16 string.
    pub const BSTR: Self = Self(8);
    /// Status code.
    pub const ERROR: Self = Self(10);
    /// Boolean stored as i16.
    pub const BOOL: Self = Self(11);
    /// Nested variant (array elements only).
    pub const VARIANT: Self = Self(12);
    /// 8-bit signed integer.
    pub const I1: Self = Self(16);
    /// 8-bit unsigned integer.
    pub const UI1: Self = Self(17);
    /// 16-bit unsigned integer.
    pub const UI2: Self = Self(18);
    /// 32-bit unsigned integer.
    pub const UI4: Self = Self(19);
    /// 64-bit signed integer.
    pub const I8: Self = Self(20);
    /// 64-bit unsigned integer.
    pub const UI8: Self = Self(21);
    /// Machine signed integer (32-bit on the wire).
    pub const INT: Self = Self(22);
    /// Machine unsigned integer (32-bit on the wire).
    pub const UINT: Self = Self(23);
    /// Array flag.
    pub const ARRAY: Self = Self(0x2000);

    /// Returns `true` if the array flag is set.
    pub fn is_array(self) -> bool {
        self.0 & Self::ARRAY.0 != 0
    }

    /// Returns the element tag of an array type (or the type itself).
    pub fn element(self) -> Self {
        Self(self.0 & !Self::ARRAY.0)
    }

    /// Returns the array type for this element tag.
    pub fn array_of(self) -> Self {
        Self(self.0 | Self::ARRAY.0)
    }

    /// Returns the conventional name of the tag.
    pub fn name(self) -> &'static str {
        if self.is_array() {
            return "VT_ARRAY";
        }
        match self {
            Self::EMPTY => "VT_EMPTY",
            Self::NULL => "VT_NULL",
            Self::I2 => "VT_I2",
            Self::I4 => "VT_I4",
            Self::R4 => "VT_R4",
            Self::R8 => "VT_R8",
            Self::CY => "VT_CY",
            Self::DATE => "VT_DATE",
            Self::BSTR => "VT_BSTR",
            Self::ERROR => "VT_ERROR",
            Self::BOOL => "VT_BOOL",
            Self::VARIANT => "VT_VARIANT",
            Self::I1 => "VT_I1",
            Self::UI1 => "VT_UI1",
            Self::UI2 => "VT_UI2",
            Self::UI4 => "VT_UI4",
            Self::I8 => "VT_I8",
            Self::UI8 => "VT_UI8",
            Self::INT => "VT_INT",
            Self::UINT => "VT_UINT",
            _ => "VT_UNKNOWN",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_array() {
            write!(f, "VT_ARRAY|{}", self.element().name())
        } else {
            write!(f, "{}", self.name())
        }
    }
}

impl From<u16> for VarType {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

// =============================================================================
// DataSource
// =============================================================================

/// Where a synchronous read or refresh takes its values from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum DataSource {
    /// The server's cache.
    Cache = 1,
    /// The physical device.
    Device = 2,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Device => write!(f, "device"),
        }
    }
}

// =============================================================================
// AccessRights
// =============================================================================

/// Item access rights bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessRights(pub u32);

impl AccessRights {
    /// Item can be read.
    pub const READABLE: Self = Self(1);
    /// Item can be written.
    pub const WRITEABLE: Self = Self(2);
    /// Both rights.
    pub const READ_WRITE: Self = Self(3);

    /// Returns `true` if readable.
    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    /// Returns `true` if writeable.
    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITEABLE.0 != 0
    }

    /// Returns `true` if all bits of `other` are set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AccessRights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for AccessRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => write!(f, "RW"),
            (true, false) => write!(f, "R"),
            (false, true) => write!(f, "W"),
            (false, false) => write!(f, "-"),
        }
    }
}

// =============================================================================
// Quality
// =============================================================================

/// The 16-bit quality field accompanying every value.
///
/// Bits 7..6 carry the major quality, bits 5..2 the substatus and bits 1..0
/// the limit status. The high byte is vendor specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u16);

impl Quality {
    /// Bad, non-specific.
    pub const BAD: Self = Self(0x00);
    /// Uncertain, non-specific.
    pub const UNCERTAIN: Self = Self(0x40);
    /// Good, non-specific.
    pub const GOOD: Self = Self(0xC0);
    /// Bad, not connected.
    pub const BAD_NOT_CONNECTED: Self = Self(0x08);
    /// Bad, out of service.
    pub const BAD_OUT_OF_SERVICE: Self = Self(0x1C);
    /// Bad, waiting for initial data.
    pub const BAD_WAITING_FOR_INITIAL_DATA: Self = Self(0x20);

    const MASK: u16 = 0xC0;

    /// Returns `true` for good quality.
    pub fn is_good(self) -> bool {
        self.0 & Self::MASK == Self::GOOD.0
    }

    /// Returns `true` for uncertain quality.
    pub fn is_uncertain(self) -> bool {
        self.0 & Self::MASK == Self::UNCERTAIN.0
    }

    /// Returns `true` for bad quality.
    pub fn is_bad(self) -> bool {
        self.0 & Self::MASK == Self::BAD.0
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let major = if self.is_good() {
            "good"
        } else if self.is_uncertain() {
            "uncertain"
        } else if self.is_bad() {
            "bad"
        } else {
            "invalid"
        };
        write!(f, "{} ({:#06x})", major, self.0)
    }
}

// =============================================================================
// Server State and Status
// =============================================================================

/// Run state reported by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum ServerState {
    /// Running normally.
    Running = 1,
    /// Vendor-specific fatal error.
    Failed = 2,
    /// Running but without configuration.
    NoConfig = 3,
    /// Suspended by the vendor.
    Suspended = 4,
    /// Test mode; outputs disconnected.
    Test = 5,
    /// Communication with the field devices failed.
    CommFault = 6,
}

impl ServerState {
    /// Converts the wire value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Running),
            2 => Some(Self::Failed),
            3 => Some(Self::NoConfig),
            4 => Some(Self::Suspended),
            5 => Some(Self::Test),
            6 => Some(Self::CommFault),
            _ => None,
        }
    }

    /// Returns `true` when the server can serve data.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Running | Self::Test)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Failed => write!(f, "failed"),
            Self::NoConfig => write!(f, "no_config"),
            Self::Suspended => write!(f, "suspended"),
            Self::Test => write!(f, "test"),
            Self::CommFault => write!(f, "comm_fault"),
        }
    }
}

/// A snapshot of server status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    /// When the server process started.
    pub start_time: DateTime<Utc>,
    /// Server clock at the time of the call.
    pub current_time: DateTime<Utc>,
    /// Last data update sent to this client.
    pub last_update_time: DateTime<Utc>,
    /// Run state.
    pub server_state: ServerState,
    /// Groups owned by this client.
    pub group_count: u32,
    /// Bandwidth estimate; `u32::MAX` when unknown.
    pub band_width: u32,
    /// Major version.
    pub major_version: u16,
    /// Minor version.
    pub minor_version: u16,
    /// Build number.
    pub build_number: u16,
    /// Vendor description.
    pub vendor_info: String,
}

// =============================================================================
// Browsing
// =============================================================================

/// Shape of the server address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum NamespaceType {
    /// Tree of branches and leaves.
    Hierarchical = 1,
    /// Single level of leaves.
    Flat = 2,
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hierarchical => write!(f, "hierarchical"),
            Self::Flat => write!(f, "flat"),
        }
    }
}

/// Cursor movement in the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BrowseDirection {
    /// Parent branch.
    Up = 1,
    /// Named child branch.
    Down = 2,
    /// Absolute position.
    To = 3,
}

/// What a browse call enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BrowseType {
    /// Child branches of the current position.
    Branch = 1,
    /// Leaves of the current position.
    Leaf = 2,
    /// Every leaf below the current position, fully qualified.
    Flat = 3,
}

// =============================================================================
// Identifiers
// =============================================================================

/// A class identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassId(pub Uuid);

impl ClassId {
    /// Parses the registry form, with or without braces.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim().trim_start_matches('{').trim_end_matches('}');
        Uuid::parse_str(trimmed).ok().map(Self)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.hyphenated().to_string().to_uppercase())
    }
}

/// OPC Data Access 1.0 server category.
pub const CATID_OPC_DA_SERVER_10: Uuid = uuid::uuid!("63D5F430-CFE4-11d1-B2C8-0060083BA1FB");

/// OPC Data Access 2.0 server category.
pub const CATID_OPC_DA_SERVER_20: Uuid = uuid::uuid!("63D5F432-CFE4-11d1-B2C8-0060083BA1FB");

/// The remote interfaces this client negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// IOPCServer.
    Server,
    /// IOPCCommon.
    Common,
    /// IOPCItemProperties.
    ItemProperties,
    /// IOPCBrowseServerAddressSpace.
    BrowseAddressSpace,
    /// IOPCGroupStateMgt.
    GroupStateMgt,
    /// IOPCSyncIO.
    SyncIo,
    /// IOPCAsyncIO2.
    AsyncIo2,
    /// IOPCItemMgt.
    ItemMgt,
    /// IConnectionPointContainer.
    ConnectionPointContainer,
    /// IOPCDataCallback.
    DataCallback,
    /// IOPCShutdown.
    Shutdown,
}

impl Interface {
    /// Returns the interface name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Server => "IOPCServer",
            Self::Common => "IOPCCommon",
            Self::ItemProperties => "IOPCItemProperties",
            Self::BrowseAddressSpace => "IOPCBrowseServerAddressSpace",
            Self::GroupStateMgt => "IOPCGroupStateMgt",
            Self::SyncIo => "IOPCSyncIO",
            Self::AsyncIo2 => "IOPCAsyncIO2",
            Self::ItemMgt => "IOPCItemMgt",
            Self::ConnectionPointContainer => "IConnectionPointContainer",
            Self::DataCallback => "IOPCDataCallback",
            Self::Shutdown => "IOPCShutdown",
        }
    }

    /// Returns the interface ID.
    pub fn iid(self) -> Uuid {
        match self {
            Self::Server => uuid::uuid!("39c13a4d-011e-11d0-9675-0020afd8adb3"),
            Self::Common => uuid::uuid!("F31DFDE2-07B6-11d2-B2D8-0060083BA1FB"),
            Self::ItemProperties => uuid::uuid!("39c13a72-011e-11d0-9675-0020afd8adb3"),
            Self::BrowseAddressSpace => uuid::uuid!("39c13a4f-011e-11d0-9675-0020afd8adb3"),
            Self::GroupStateMgt => uuid::uuid!("39c13a50-011e-11d0-9675-0020afd8adb3"),
            Self::SyncIo => uuid::uuid!("39c13a52-011e-11d0-9675-0020afd8adb3"),
            Self::AsyncIo2 => uuid::uuid!("39c13a71-011e-11d0-9675-0020afd8adb3"),
            Self::ItemMgt => uuid::uuid!("39c13a54-011e-11d0-9675-0020afd8adb3"),
            Self::ConnectionPointContainer => {
                uuid::uuid!("B196B284-BAB4-101A-B69C-00AA00341D07")
            }
            Self::DataCallback => uuid::uuid!("39c13a70-011e-11d0-9675-0020afd8adb3"),
            Self::Shutdown => uuid::uuid!("F31DFDE1-07B6-11d2-B2D8-0060083BA1FB"),
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A server found by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Program ID.
    pub prog_id: String,
    /// Class ID in registry string form.
    pub cls_str: String,
    /// Version-independent program ID.
    pub ver_ind_prog_id: String,
    /// Class ID.
    pub clsid: ClassId,
}

/// Returns `true` when `node` names this machine.
pub fn is_local(node: &str) -> bool {
    if node.is_empty() || node == "localhost" || node == "127.0.0.1" {
        return true;
    }
    local_host_name()
        .map(|name| name.eq_ignore_ascii_case(node))
        .unwrap_or(false)
}

fn local_host_name() -> Option<String> {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|name| !name.is_empty())
}

// =============================================================================
// Item State
// =============================================================================

/// A decoded value with its quality and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemState {
    /// Client handle of the item.
    pub client_handle: u32,
    /// Decoded value.
    pub value: Variant,
    /// Quality bitfield.
    pub quality: u16,
    /// Source timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Engineering-unit information.
#[derive(Debug, Clone, PartialEq)]
pub enum EuInfo {
    /// Analog range.
    Analog {
        /// Low limit.
        low: f64,
        /// High limit.
        high: f64,
    },
    /// Enumerated value names.
    Enumerated(Vec<String>),
    /// A property value of another shape.
    Other(Variant),
}

// =============================================================================
// Status Codes
// =============================================================================

/// Protocol status codes.
pub mod hresult {
    /// Success.
    pub const S_OK: i32 = 0;
    /// Success with a qualified result.
    pub const S_FALSE: i32 = 1;
    /// Requested update rate not supported; revised rate applies.
    pub const OPC_S_UNSUPPORTEDRATE: i32 = 0x0004_000D;
    /// Not implemented.
    pub const E_NOTIMPL: i32 = 0x8000_4001_u32 as i32;
    /// Interface not supported.
    pub const E_NOINTERFACE: i32 = 0x8000_4002_u32 as i32;
    /// Invalid pointer.
    pub const E_POINTER: i32 = 0x8000_4003_u32 as i32;
    /// Unspecified failure.
    pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
    /// Operation pending.
    pub const E_PENDING: i32 = 0x8000_000A_u32 as i32;
    /// Out of memory.
    pub const E_OUTOFMEMORY: i32 = 0x8007_000E_u32 as i32;
    /// Invalid argument.
    pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;
    /// Class not registered.
    pub const REGDB_E_CLASSNOTREG: i32 = 0x8004_0154_u32 as i32;
    /// No connection for the cookie.
    pub const CONNECT_E_NOCONNECTION: i32 = 0x8004_0200_u32 as i32;
    /// Connection point does not support more sinks.
    pub const CONNECT_E_ADVISELIMIT: i32 = 0x8004_0201_u32 as i32;
    /// Connection point not found.
    pub const CONNECT_E_NOCONNECTIONPOINT: i32 = 0x8004_0202_u32 as i32;
    /// Object disconnected from its clients.
    pub const RPC_E_DISCONNECTED: i32 = 0x8001_0108_u32 as i32;
    /// RPC server unavailable.
    pub const RPC_S_SERVER_UNAVAILABLE: i32 = 0x8007_06BA_u32 as i32;
    /// Invalid handle.
    pub const OPC_E_INVALIDHANDLE: i32 = 0xC004_0001_u32 as i32;
    /// Server cannot convert between the types.
    pub const OPC_E_BADTYPE: i32 = 0xC004_0004_u32 as i32;
    /// Requested operation on a public group.
    pub const OPC_E_PUBLIC: i32 = 0xC004_0005_u32 as i32;
    /// Item access rights do not allow the operation.
    pub const OPC_E_BADRIGHTS: i32 = 0xC004_0006_u32 as i32;
    /// Item ID not in the address space.
    pub const OPC_E_UNKNOWNITEMID: i32 = 0xC004_0007_u32 as i32;
    /// Item ID syntax invalid.
    pub const OPC_E_INVALIDITEMID: i32 = 0xC004_0008_u32 as i32;
    /// Filter string invalid.
    pub const OPC_E_INVALIDFILTER: i32 = 0xC004_0009_u32 as i32;
    /// Access path unknown.
    pub const OPC_E_UNKNOWNPATH: i32 = 0xC004_000A_u32 as i32;
    /// Value out of range.
    pub const OPC_E_RANGE: i32 = 0xC004_000B_u32 as i32;
    /// Duplicate group name.
    pub const OPC_E_DUPLICATENAME: i32 = 0xC004_000C_u32 as i32;
    /// Property ID invalid for the item.
    pub const OPC_E_INVALID_PID: i32 = 0xC004_0203_u32 as i32;

    /// Returns `true` for a success status.
    pub fn succeeded(code: i32) -> bool {
        code >= 0
    }

    /// Returns `true` for a failure status.
    pub fn failed(code: i32) -> bool {
        code < 0
    }

    /// Returns the symbolic name of a status code.
    pub fn name(code: i32) -> &'static str {
        match code {
            S_OK => "S_OK",
            S_FALSE => "S_FALSE",
            OPC_S_UNSUPPORTEDRATE => "OPC_S_UNSUPPORTEDRATE",
            E_NOTIMPL => "E_NOTIMPL",
            E_NOINTERFACE => "E_NOINTERFACE",
            E_POINTER => "E_POINTER",
            E_FAIL => "E_FAIL",
            E_PENDING => "E_PENDING",
            E_OUTOFMEMORY => "E_OUTOFMEMORY",
            E_INVALIDARG => "E_INVALIDARG",
            REGDB_E_CLASSNOTREG => "REGDB_E_CLASSNOTREG",
            CONNECT_E_NOCONNECTION => "CONNECT_E_NOCONNECTION",
            CONNECT_E_ADVISELIMIT => "CONNECT_E_ADVISELIMIT",
            CONNECT_E_NOCONNECTIONPOINT => "CONNECT_E_NOCONNECTIONPOINT",
            RPC_E_DISCONNECTED => "RPC_E_DISCONNECTED",
            RPC_S_SERVER_UNAVAILABLE => "RPC_S_SERVER_UNAVAILABLE",
            OPC_E_INVALIDHANDLE => "OPC_E_INVALIDHANDLE",
            OPC_E_BADTYPE => "OPC_E_BADTYPE",
            OPC_E_PUBLIC => "OPC_E_PUBLIC",
            OPC_E_BADRIGHTS => "OPC_E_BADRIGHTS",
            OPC_E_UNKNOWNITEMID => "OPC_E_UNKNOWNITEMID",
            OPC_E_INVALIDITEMID => "OPC_E_INVALIDITEMID",
            OPC_E_INVALIDFILTER => "OPC_E_INVALIDFILTER",
            OPC_E_UNKNOWNPATH => "OPC_E_UNKNOWNPATH",
            OPC_E_RANGE => "OPC_E_RANGE",
            OPC_E_DUPLICATENAME => "OPC_E_DUPLICATENAME",
            OPC_E_INVALID_PID => "OPC_E_INVALID_PID",
            _ => "UNKNOWN",
        }
    }

    /// Formats a status code as eight hex digits.
    pub fn hex(code: i32) -> String {
        format!("0x{:08X}", code as u32)
    }

    /// Formats a status code as `NAME (0x........)`.
    pub fn describe(code: i32) -> String {
        format!("{} ({})", name(code), hex(code))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_type_array_flag() {
        let vt = VarType::R8.array_of();
        assert!(vt.is_array());
        assert_eq!(vt.0, 0x2005);
        assert_eq!(vt.element(), VarType::R8);
        assert_eq!(vt.to_string(), "VT_ARRAY|VT_R8");
        assert_eq!(VarType::BSTR.to_string(), "VT_BSTR");
    }

    #[test]
    fn test_access_rights() {
        let rw = AccessRights::READABLE | AccessRights::WRITEABLE;
        assert_eq!(rw, AccessRights::READ_WRITE);
        assert!(rw.is_readable() && rw.is_writable());
        assert!(!AccessRights::READABLE.is_writable());
        assert_eq!(AccessRights(0).to_string(), "-");
    }

    #[test]
    fn test_quality() {
        assert!(Quality(192).is_good());
        assert!(Quality(0x44).is_uncertain());
        assert!(Quality::BAD_NOT_CONNECTED.is_bad());
    }

    #[test]
    fn test_server_state_from_u32() {
        assert_eq!(ServerState::from_u32(1), Some(ServerState::Running));
        assert_eq!(ServerState::from_u32(6), Some(ServerState::CommFault));
        assert_eq!(ServerState::from_u32(7), None);
        assert_eq!(ServerState::NoConfig.to_string(), "no_config");
    }

    #[test]
    fn test_class_id_round_trip() {
        let text = "{63D5F432-CFE4-11D1-B2C8-0060083BA1FB}";
        let clsid = ClassId::parse(text).unwrap();
        assert_eq!(clsid.0, CATID_OPC_DA_SERVER_20);
        assert_eq!(clsid.to_string(), text);
        assert!(ClassId::parse("not-a-guid").is_none());
    }

    #[test]
    fn test_is_local() {
        assert!(is_local(""));
        assert!(is_local("localhost"));
        assert!(is_local("127.0.0.1"));
        assert!(!is_local("plant-floor-7.example"));
    }

    #[test]
    fn test_hresult_names() {
        assert_eq!(hresult::name(hresult::E_FAIL), "E_FAIL");
        assert_eq!(hresult::describe(hresult::OPC_E_BADRIGHTS), "OPC_E_BADRIGHTS (0xC0040006)");
        assert!(hresult::failed(hresult::OPC_E_INVALIDHANDLE));
        assert!(hresult::succeeded(hresult::S_FALSE));
    }
}
