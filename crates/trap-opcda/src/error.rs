// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC DA error types with diagnostics.
//!
//! Errors fall into three families that callers treat differently:
//!
//! - **Call-level failures** ([`ConnectionError`]): the remote call could not
//!   be made or returned a fatal status. Always propagated, never retried by
//!   this crate.
//! - **Per-item batch statuses** ([`ItemError`]): one element of a batched
//!   call failed. Reported next to the successful elements of the same batch.
//! - **Usage errors** ([`UsageError`]): detected locally before any remote
//!   call (uninitialized handle, bad index, invalid filter combination).
//!
//! # Error Categories
//!
//! ```text
//! OpcDaError
//! ├── Connection    - Discovery, activation, negotiation, remote calls
//! ├── Usage         - Local precondition failures
//! ├── Item          - Per-item status from a batched call
//! ├── Conversion    - Value codec failures
//! └── Configuration - Invalid or unreadable settings
//! ```
//!
//! # Examples
//!
//! ```
//! use trap_opcda::error::{OpcDaError, UsageError};
//!
//! let error = OpcDaError::from(UsageError::uninitialized("server connection"));
//! assert!(!error.is_retryable());
//! assert_eq!(error.to_string(), "uninitialized server connection");
//! ```

use std::fmt;

use thiserror::Error;
use tracing::Level;

use crate::types::hresult;

// =============================================================================
// OpcDaError - Main Error Type
// =============================================================================

/// The main error type for OPC DA operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpcDaError {
    /// Call-level failures.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Local precondition failures.
    #[error("{0}")]
    Usage(#[from] UsageError),

    /// Per-item status from a batched call.
    #[error("{0}")]
    Item(#[from] ItemError),

    /// Value codec failures.
    #[error("{0}")]
    Conversion(#[from] ConversionError),

    /// Configuration failures.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

impl OpcDaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates an uninitialized-receiver error.
    #[inline]
    pub fn uninitialized(object: &'static str) -> Self {
        Self::Usage(UsageError::uninitialized(object))
    }

    /// Creates a released-receiver error.
    #[inline]
    pub fn released(object: &'static str) -> Self {
        Self::Usage(UsageError::released(object))
    }

    /// Creates a failed remote call error.
    #[inline]
    pub fn remote(operation: impl Into<String>, code: i32) -> Self {
        Self::Connection(ConnectionError::remote_call(operation, code))
    }

    /// Creates an interface negotiation error.
    #[inline]
    pub fn not_supported(interface: &'static str) -> Self {
        Self::Connection(ConnectionError::InterfaceNotSupported { interface })
    }

    /// Creates a per-item error.
    #[inline]
    pub fn item(code: i32, message: impl Into<String>) -> Self {
        Self::Item(ItemError::new(code, message))
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if a caller may reasonably retry.
    ///
    /// This is advisory only. Nothing in this crate retries automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Item(e) => e.is_retryable(),
            Self::Usage(_) | Self::Conversion(_) | Self::Configuration(_) => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(e) => e.severity(),
            Self::Usage(_) => ErrorSeverity::Warning,
            Self::Item(_) => ErrorSeverity::Warning,
            Self::Conversion(_) => ErrorSeverity::Error,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Usage(_) => "usage",
            Self::Item(_) => "item",
            Self::Conversion(_) => "conversion",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a structured error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Usage(e) => e.error_code(),
            Self::Item(_) => ErrorCode::new(3, 1),
            Self::Conversion(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
        }
    }

    /// Returns the protocol status code carried by this error, if any.
    pub fn hresult(&self) -> Option<i32> {
        match self {
            Self::Connection(e) => e.hresult(),
            Self::Item(e) => Some(e.code),
            _ => None,
        }
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Connection(e) => e.recovery_hints(),
            Self::Usage(e) => e.recovery_hints(),
            Self::Item(_) => vec![
                "Inspect the per-item status message",
                "Verify the item ID exists in the server address space",
            ],
            Self::Conversion(_) => vec![
                "Request a supported data type for the item",
                "Check the canonical data type reported by the server",
            ],
            Self::Configuration(_) => vec![
                "Check the configuration file syntax",
                "Verify the values are within their documented ranges",
            ],
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let code = self.error_code();

        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Call-level failures: discovery, activation, negotiation and remote calls.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConnectionError {
    /// Every discovery tier failed to resolve the program ID.
    #[error("Cannot resolve '{prog_id}': {}", .causes.join("; "))]
    DiscoveryFailed {
        /// The program ID being resolved.
        prog_id: String,
        /// One cause per attempted tier, in order.
        causes: Vec<String>,
    },

    /// Every discovery tier failed to enumerate servers.
    #[error("Cannot enumerate servers on '{node}': {}", .causes.join("; "))]
    EnumerationFailed {
        /// The node being enumerated.
        node: String,
        /// One cause per attempted tier, in order.
        causes: Vec<String>,
    },

    /// The remote object could not be activated.
    #[error("Failed to activate {clsid} on '{node}': {message}")]
    ActivationFailed {
        /// Class ID being activated.
        clsid: String,
        /// Target node.
        node: String,
        /// Failure description.
        message: String,
        /// Status code, if the activator reported one.
        code: Option<i32>,
    },

    /// The remote object does not implement the requested interface.
    #[error("Interface not supported: {interface}")]
    InterfaceNotSupported {
        /// Interface name.
        interface: &'static str,
    },

    /// A remote call returned a failure status.
    #[error("{operation} failed: {}", hresult::describe(*.code))]
    RemoteCall {
        /// The operation that failed.
        operation: String,
        /// The returned status code.
        code: i32,
    },

    /// The connection point refused the subscription.
    #[error("Advise failed on {point}: {}", hresult::describe(*.code))]
    AdviseFailed {
        /// Connection point description.
        point: &'static str,
        /// The returned status code.
        code: i32,
    },

    /// The remote object is unreachable.
    #[error("Server not connected")]
    NotConnected,
}

impl ConnectionError {
    /// Creates a remote call failure.
    pub fn remote_call(operation: impl Into<String>, code: i32) -> Self {
        Self::RemoteCall {
            operation: operation.into(),
            code,
        }
    }

    /// Creates an activation failure.
    pub fn activation_failed(
        clsid: impl Into<String>,
        node: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ActivationFailed {
            clsid: clsid.into(),
            node: node.into(),
            message: message.into(),
            code: None,
        }
    }

    /// Returns `true` if the failure may be transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotConnected | Self::ActivationFailed { .. } => true,
            Self::RemoteCall { code, .. } => matches!(
                *code,
                hresult::RPC_E_DISCONNECTED | hresult::RPC_S_SERVER_UNAVAILABLE
            ),
            _ => false,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::DiscoveryFailed { .. }
            | Self::EnumerationFailed { .. }
            | Self::ActivationFailed { .. } => ErrorSeverity::Critical,
            Self::InterfaceNotSupported { .. } => ErrorSeverity::Error,
            Self::RemoteCall { .. } | Self::AdviseFailed { .. } => ErrorSeverity::Error,
            Self::NotConnected => ErrorSeverity::Warning,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DiscoveryFailed { .. } => ErrorCode::new(1, 1),
            Self::EnumerationFailed { .. } => ErrorCode::new(1, 2),
            Self::ActivationFailed { .. } => ErrorCode::new(1, 3),
            Self::InterfaceNotSupported { .. } => ErrorCode::new(1, 4),
            Self::RemoteCall { .. } => ErrorCode::new(1, 5),
            Self::AdviseFailed { .. } => ErrorCode::new(1, 6),
            Self::NotConnected => ErrorCode::new(1, 7),
        }
    }

    /// Returns the protocol status code, if any.
    pub fn hresult(&self) -> Option<i32> {
        match self {
            Self::RemoteCall { code, .. } | Self::AdviseFailed { code, .. } => Some(*code),
            Self::ActivationFailed { code, .. } => *code,
            Self::InterfaceNotSupported { .. } => Some(hresult::E_NOINTERFACE),
            _ => None,
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::DiscoveryFailed { .. } | Self::EnumerationFailed { .. } => vec![
                "Verify the server is installed and registered on the node",
                "Check the program ID spelling",
                "Ensure the OPC server list service is available",
            ],
            Self::ActivationFailed { .. } => vec![
                "Check remote activation permissions on the node",
                "Verify the server process can start",
            ],
            Self::InterfaceNotSupported { .. } => vec![
                "The server does not implement this OPC DA version",
            ],
            Self::RemoteCall { .. } | Self::AdviseFailed { .. } => vec![
                "Inspect the returned status code",
                "Check the server diagnostics",
            ],
            Self::NotConnected => vec!["Reconnect to the server"],
        }
    }
}

// =============================================================================
// UsageError
// =============================================================================

/// Errors detected locally before any remote call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UsageError {
    /// The receiver was never initialized.
    #[error("uninitialized {object}")]
    Uninitialized {
        /// Object kind.
        object: &'static str,
    },

    /// The receiver has already been released.
    #[error("{object} already released")]
    Released {
        /// Object kind.
        object: &'static str,
    },

    /// Collection index out of range.
    #[error("index out of range: {index} (count {count})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Collection size.
        count: usize,
    },

    /// Browse access-rights filter without readable or writeable bits.
    #[error("access rights must include OPC_READABLE or OPC_WRITEABLE (got {rights:#x})")]
    InvalidAccessRights {
        /// The rejected mask.
        rights: u32,
    },

    /// No item with this server handle in the collection.
    #[error("item with server handle {server_handle} not found")]
    ItemNotFound {
        /// Server handle looked up.
        server_handle: u32,
    },

    /// No group matching the key in the collection.
    #[error("group '{key}' not found")]
    GroupNotFound {
        /// Name or handle looked up.
        key: String,
    },

    /// Engineering-unit type outside the defined range.
    #[error("EU type {eu_type} is not valid")]
    InvalidEuType {
        /// The reported EU type.
        eu_type: i32,
    },

    /// Parallel argument arrays differ in length.
    #[error("length mismatch: {expected} handles but {actual} values")]
    LengthMismatch {
        /// Number of handles.
        expected: usize,
        /// Number of values.
        actual: usize,
    },
}

impl UsageError {
    /// Creates an uninitialized-receiver error.
    pub fn uninitialized(object: &'static str) -> Self {
        Self::Uninitialized { object }
    }

    /// Creates a released-receiver error.
    pub fn released(object: &'static str) -> Self {
        Self::Released { object }
    }

    /// Creates an index error.
    pub fn index_out_of_range(index: usize, count: usize) -> Self {
        Self::IndexOutOfRange { index, count }
    }

    /// Creates an item lookup error.
    pub fn item_not_found(server_handle: u32) -> Self {
        Self::ItemNotFound { server_handle }
    }

    /// Creates a group lookup error.
    pub fn group_not_found(key: impl Into<String>) -> Self {
        Self::GroupNotFound { key: key.into() }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Uninitialized { .. } => ErrorCode::new(2, 1),
            Self::Released { .. } => ErrorCode::new(2, 2),
            Self::IndexOutOfRange { .. } => ErrorCode::new(2, 3),
            Self::InvalidAccessRights { .. } => ErrorCode::new(2, 4),
            Self::ItemNotFound { .. } => ErrorCode::new(2, 5),
            Self::GroupNotFound { .. } => ErrorCode::new(2, 6),
            Self::InvalidEuType { .. } => ErrorCode::new(2, 7),
            Self::LengthMismatch { .. } => ErrorCode::new(2, 8),
        }
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Uninitialized { .. } | Self::Released { .. } => {
                vec!["Obtain a fresh handle from a connected session"]
            }
            Self::IndexOutOfRange { .. } => vec!["Indexes are 0-based; check count() first"],
            Self::InvalidAccessRights { .. } => {
                vec!["Combine OPC_READABLE and/or OPC_WRITEABLE"]
            }
            Self::ItemNotFound { .. } | Self::GroupNotFound { .. } => {
                vec!["The object may have been removed"]
            }
            Self::InvalidEuType { .. } => vec!["EU types are 0 (none), 1 (analog), 2 (enumerated)"],
            Self::LengthMismatch { .. } => vec!["Pass one value per server handle"],
        }
    }
}

// =============================================================================
// ItemError
// =============================================================================

/// A failed element of a batched call.
///
/// `code` is the negative status the server returned for this element and
/// `message` its text from the server's error-string service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("{message} ({})", hresult::hex(*.code))]
pub struct ItemError {
    /// Raw protocol status.
    pub code: i32,
    /// Server-provided description.
    pub message: String,
}

impl ItemError {
    /// Creates a per-item error.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` for statuses that may clear on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, hresult::E_PENDING | hresult::RPC_E_DISCONNECTED)
    }
}

// =============================================================================
// ConversionError
// =============================================================================

/// Value codec failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// Type tag not recognized by the codec.
    #[error("unknown value type {vt:#06x}")]
    UnknownVarType {
        /// The unrecognized tag.
        vt: u16,
    },

    /// Array element type not supported.
    #[error("unsupported array element type {vt:#06x}")]
    UnsupportedArrayType {
        /// The element tag.
        vt: u16,
    },

    /// Array bounds do not describe a valid element range.
    #[error("invalid array bounds [{lower}, {upper}]")]
    InvalidBounds {
        /// Declared lower bound.
        lower: i32,
        /// Declared upper bound.
        upper: i64,
    },

    /// Payload size does not match the type tag.
    #[error("payload for {vt:#06x} has {actual} bytes, expected {expected}")]
    PayloadMismatch {
        /// Type tag.
        vt: u16,
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },

    /// Text payload is not valid UTF-16.
    #[error("invalid text payload: {message}")]
    InvalidText {
        /// Decoder message.
        message: String,
    },

    /// Date outside the representable range.
    #[error("date value {value} out of range")]
    DateOutOfRange {
        /// The OLE automation date.
        value: f64,
    },

    /// A value cannot be represented in the requested type.
    #[error("cannot convert {from} to {to}")]
    Coercion {
        /// Source type name.
        from: &'static str,
        /// Target type name.
        to: &'static str,
    },

    /// The wire value was already cleared.
    #[error("value already cleared")]
    Cleared,
}

impl ConversionError {
    /// Creates a coercion error.
    pub fn coercion(from: &'static str, to: &'static str) -> Self {
        Self::Coercion { from, to }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownVarType { .. } => ErrorCode::new(4, 1),
            Self::UnsupportedArrayType { .. } => ErrorCode::new(4, 2),
            Self::InvalidBounds { .. } => ErrorCode::new(4, 3),
            Self::PayloadMismatch { .. } => ErrorCode::new(4, 4),
            Self::InvalidText { .. } => ErrorCode::new(4, 5),
            Self::DateOutOfRange { .. } => ErrorCode::new(4, 6),
            Self::Coercion { .. } => ErrorCode::new(4, 7),
            Self::Cleared => ErrorCode::new(4, 8),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// The file could not be read.
    #[error("Failed to read config file '{path}': {message}")]
    Io {
        /// File path.
        path: String,
        /// I/O error text.
        message: String,
    },

    /// The file could not be parsed.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// File path.
        path: String,
        /// Parser error text.
        message: String,
    },

    /// The file extension is not a supported format.
    #[error("Unsupported config format: {path}")]
    UnsupportedFormat {
        /// File path.
        path: String,
    },

    /// A value failed validation.
    #[error("Validation failed for '{field}': {message}")]
    Validation {
        /// Field name.
        field: String,
        /// Error message.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Io { .. } => ErrorCode::new(5, 1),
            Self::Parse { .. } => ErrorCode::new(5, 2),
            Self::UnsupportedFormat { .. } => ErrorCode::new(5, 3),
            Self::Validation { .. } => ErrorCode::new(5, 4),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code.
///
/// Format: `DA-XXYY` where XX is the category and YY the specific error.
///
/// Categories:
/// - 1: Connection
/// - 2: Usage
/// - 3: Item
/// - 4: Conversion
/// - 5: Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1-5).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A Result type with OpcDaError.
pub type OpcDaResult<T> = Result<T, OpcDaError>;

/// Per-element outcome of a batched call; `None` at every successful index.
pub type ItemErrors = Vec<Option<OpcDaError>>;

// =============================================================================
// Error Context Extension
// =============================================================================

/// Extension trait for adding context to OPC DA errors.
pub trait OpcDaErrorContext<T> {
    /// Adds group context to errors.
    fn with_group(self, group: &str) -> Result<T, OpcDaError>;

    /// Adds item context to errors.
    fn with_item(self, tag: &str) -> Result<T, OpcDaError>;

    /// Adds a free-form context message to errors.
    fn context(self, message: &str) -> Result<T, OpcDaError>;

    /// Adds a lazily built context message to errors.
    fn with_context<F, S>(self, f: F) -> Result<T, OpcDaError>
    where
        F: FnOnce() -> S,
        S: std::fmt::Display;
}

impl<T> OpcDaErrorContext<T> for Result<T, OpcDaError> {
    fn with_group(self, group: &str) -> Result<T, OpcDaError> {
        self.map_err(|e| {
            tracing::debug!(group = group, error = %e, "OPC DA error with group context");
            e
        })
    }

    fn with_item(self, tag: &str) -> Result<T, OpcDaError> {
        self.map_err(|e| {
            tracing::debug!(item = tag, error = %e, "OPC DA error with item context");
            e
        })
    }

    fn context(self, message: &str) -> Result<T, OpcDaError> {
        self.map_err(|e| {
            tracing::debug!(context = message, error = %e, "OPC DA error");
            e
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T, OpcDaError>
    where
        F: FnOnce() -> S,
        S: std::fmt::Display,
    {
        self.map_err(|e| {
            tracing::debug!(context = %f(), error = %e, "OPC DA error");
            e
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_messages() {
        let err = OpcDaError::uninitialized("server connection");
        assert_eq!(err.to_string(), "uninitialized server connection");

        let err = OpcDaError::from(UsageError::index_out_of_range(3, 2));
        assert_eq!(err.to_string(), "index out of range: 3 (count 2)");
        assert_eq!(err.category(), "usage");
    }

    #[test]
    fn test_item_error_display() {
        let err = ItemError::new(hresult::OPC_E_UNKNOWNITEMID, "unknown item");
        assert_eq!(err.to_string(), "unknown item (0xC0040007)");

        let err = OpcDaError::from(err);
        assert_eq!(err.hresult(), Some(hresult::OPC_E_UNKNOWNITEMID));
    }

    #[test]
    fn test_remote_call_display() {
        let err = OpcDaError::remote("SyncRead", hresult::E_FAIL);
        assert_eq!(err.to_string(), "SyncRead failed: E_FAIL (0x80004005)");
        assert_eq!(err.hresult(), Some(hresult::E_FAIL));
    }

    #[test]
    fn test_discovery_failed_keeps_every_cause() {
        let err = ConnectionError::DiscoveryFailed {
            prog_id: "Vendor.Server".into(),
            causes: vec!["server list v2: a".into(), "registry: b".into()],
        };
        let text = err.to_string();
        assert!(text.contains("server list v2: a"));
        assert!(text.contains("registry: b"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::new(1, 5).to_string(), "DA-0105");
        assert_eq!(ErrorCode::new(2, 3).as_u16(), 0x0203);
        assert_eq!(
            OpcDaError::not_supported("IOPCSyncIO").error_code(),
            ErrorCode::new(1, 4)
        );
    }

    #[test]
    fn test_retryable() {
        assert!(OpcDaError::from(ConnectionError::NotConnected).is_retryable());
        assert!(!OpcDaError::uninitialized("group").is_retryable());
        assert!(OpcDaError::item(hresult::E_PENDING, "pending").is_retryable());
    }

    #[test]
    fn test_severity_levels() {
        assert_eq!(ErrorSeverity::Critical.to_tracing_level(), Level::ERROR);
        assert_eq!(
            OpcDaError::uninitialized("item").severity(),
            ErrorSeverity::Warning
        );
    }

    #[test]
    fn test_context_passes_error_through() {
        let result: OpcDaResult<()> = Err(OpcDaError::uninitialized("group"));
        let err = result.context("reading").unwrap_err();
        assert_eq!(err.category(), "usage");

        let result: OpcDaResult<u32> = Ok(7);
        assert_eq!(result.with_context(|| "never built").unwrap(), 7);
    }
}
