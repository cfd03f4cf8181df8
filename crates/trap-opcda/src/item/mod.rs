// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Items: named data points inside a group.
//!
//! Each [`OpcItem`] keeps a local cache of its last known value, quality and
//! timestamp. The cache changes only through [`OpcItem::read`], a group
//! synchronous read, or a data-change event.

mod collection;

pub use collection::OpcItems;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::codec::{decode, encode, Variant};
use crate::error::{OpcDaError, OpcDaResult, OpcDaErrorContext, UsageError};
use crate::handle::RemoteHandle;
use crate::interface::{ItemMgt, ItemResult, SyncIo};
use crate::session::ServerContext;
use crate::types::{hresult, property, AccessRights, DataSource, EuInfo, VarType};

const ITEM: &str = "item";

/// Result of a single-item read.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemReadResult {
    /// Decoded value.
    pub value: Variant,
    /// Quality bitfield.
    pub quality: u16,
    /// Source timestamp.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct ItemLocal {
    client_handle: u32,
    active: bool,
    requested_type: VarType,
    value: Variant,
    quality: u16,
    timestamp: DateTime<Utc>,
}

pub(crate) struct ItemInner {
    context: Arc<ServerContext>,
    item_mgt: Arc<RemoteHandle<dyn ItemMgt>>,
    sync_io: Arc<RemoteHandle<dyn SyncIo>>,
    server_handle: u32,
    tag: String,
    access_path: String,
    access_rights: AccessRights,
    canonical_type: VarType,
    local: RwLock<ItemLocal>,
    released: AtomicBool,
}

/// One item of a group.
///
/// The `Default` value is an uninitialized item.
#[derive(Clone, Default)]
pub struct OpcItem {
    inner: Option<Arc<ItemInner>>,
}

/// Parameters of a freshly added item.
pub(crate) struct NewItem {
    pub(crate) tag: String,
    pub(crate) access_path: String,
    pub(crate) active: bool,
    pub(crate) client_handle: u32,
    pub(crate) requested_type: VarType,
    pub(crate) result: ItemResult,
}

impl OpcItem {
    pub(crate) fn new(
        context: Arc<ServerContext>,
        item_mgt: Arc<RemoteHandle<dyn ItemMgt>>,
        sync_io: Arc<RemoteHandle<dyn SyncIo>>,
        item: NewItem,
    ) -> Self {
        Self {
            inner: Some(Arc::new(ItemInner {
                context,
                item_mgt,
                sync_io,
                server_handle: item.result.server_handle,
                tag: item.tag,
                access_path: item.access_path,
                access_rights: item.result.access_rights,
                canonical_type: item.result.canonical_type,
                local: RwLock::new(ItemLocal {
                    client_handle: item.client_handle,
                    active: item.active,
                    requested_type: item.requested_type,
                    value: Variant::Empty,
                    quality: 0,
                    timestamp: DateTime::<Utc>::default(),
                }),
                released: AtomicBool::new(false),
            })),
        }
    }

    fn inner(&self) -> OpcDaResult<&Arc<ItemInner>> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| OpcDaError::uninitialized(ITEM))?;
        if inner.released.load(Ordering::Acquire) {
            return Err(OpcDaError::released(ITEM));
        }
        Ok(inner)
    }

    /// Returns `true` for an initialized, unreleased item.
    pub fn is_valid(&self) -> bool {
        self.inner().is_ok()
    }

    fn local<R>(&self, f: impl FnOnce(&ItemLocal) -> R) -> Option<R> {
        self.inner.as_ref().map(|inner| f(&inner.local.read()))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Server handle.
    pub fn server_handle(&self) -> u32 {
        self.inner.as_ref().map(|i| i.server_handle).unwrap_or(0)
    }

    /// Client handle.
    pub fn client_handle(&self) -> u32 {
        self.local(|l| l.client_handle).unwrap_or(0)
    }

    /// Item ID.
    pub fn tag(&self) -> &str {
        self.inner.as_ref().map(|i| i.tag.as_str()).unwrap_or("")
    }

    /// Access path.
    pub fn access_path(&self) -> &str {
        self.inner.as_ref().map(|i| i.access_path.as_str()).unwrap_or("")
    }

    /// Access rights reported by the server.
    pub fn access_rights(&self) -> AccessRights {
        self.inner.as_ref().map(|i| i.access_rights).unwrap_or_default()
    }

    /// Canonical data type reported by the server.
    pub fn canonical_data_type(&self) -> VarType {
        self.inner.as_ref().map(|i| i.canonical_type).unwrap_or_default()
    }

    /// Requested data type.
    pub fn requested_data_type(&self) -> VarType {
        self.local(|l| l.requested_type).unwrap_or_default()
    }

    /// Active flag.
    pub fn is_active(&self) -> bool {
        self.local(|l| l.active).unwrap_or(false)
    }

    /// Cached value.
    pub fn value(&self) -> Variant {
        self.local(|l| l.value.clone()).unwrap_or_default()
    }

    /// Cached quality.
    pub fn quality(&self) -> u16 {
        self.local(|l| l.quality).unwrap_or(0)
    }

    /// Cached timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.local(|l| l.timestamp).unwrap_or_default()
    }

    pub(crate) fn update_cache(&self, value: &Variant, quality: u16, timestamp: DateTime<Utc>) {
        if let Some(inner) = self.inner.as_ref() {
            let mut local = inner.local.write();
            local.value = value.clone();
            local.quality = quality;
            local.timestamp = timestamp;
        }
    }

    // =========================================================================
    // I/O
    // =========================================================================

    /// Reads the item and refreshes the cache on success.
    pub async fn read(&self, source: DataSource) -> OpcDaResult<ItemReadResult> {
        let inner = self.inner()?;
        let (mut states, statuses) = inner
            .sync_io
            .get()?
            .read(source, &[inner.server_handle])
            .await
            .with_item(&inner.tag)?;

        let status = statuses.first().copied().unwrap_or(hresult::E_FAIL);
        if hresult::failed(status) {
            return Err(inner.context.error_for(status).await);
        }
        let state = states
            .pop()
            .ok_or_else(|| OpcDaError::remote("SyncIO::Read", hresult::E_FAIL))?;

        let value = decode(state.value)
            .map_err(OpcDaError::from)
            .with_item(&inner.tag)?;
        self.update_cache(&value, state.quality, state.timestamp);

        Ok(ItemReadResult {
            value,
            quality: state.quality,
            timestamp: state.timestamp,
        })
    }

    /// Writes a value to the item.
    pub async fn write(&self, value: &Variant) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let wire = encode(value, &inner.context.heap)?;
        let statuses = inner
            .sync_io
            .get()?
            .write(&[inner.server_handle], std::slice::from_ref(&wire))
            .await
            .with_item(&inner.tag)?;
        drop(wire);
        self.check_status(statuses).await
    }

    async fn check_status(&self, statuses: Vec<i32>) -> OpcDaResult<()> {
        let inner = self.inner()?;
        match statuses.first().copied() {
            Some(code) if hresult::failed(code) => Err(inner.context.error_for(code).await),
            Some(_) => Ok(()),
            None => Err(OpcDaError::remote("ItemMgt", hresult::E_FAIL)),
        }
    }

    // =========================================================================
    // Mutators
    // =========================================================================

    /// Activates or deactivates the item.
    pub async fn set_active(&self, active: bool) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let statuses = inner
            .item_mgt
            .get()?
            .set_active_state(&[inner.server_handle], active)
            .await?;
        self.check_status(statuses).await?;
        inner.local.write().active = active;
        Ok(())
    }

    /// Changes the client handle.
    pub async fn set_client_handle(&self, client_handle: u32) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let statuses = inner
            .item_mgt
            .get()?
            .set_client_handles(&[inner.server_handle], &[client_handle])
            .await?;
        self.check_status(statuses).await?;
        inner.local.write().client_handle = client_handle;
        Ok(())
    }

    /// Changes the requested data type.
    pub async fn set_requested_data_type(&self, requested_type: VarType) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let statuses = inner
            .item_mgt
            .get()?
            .set_datatypes(&[inner.server_handle], &[requested_type])
            .await?;
        self.check_status(statuses).await?;
        inner.local.write().requested_type = requested_type;
        Ok(())
    }

    // =========================================================================
    // Engineering Units
    // =========================================================================

    /// Engineering-unit type: 0 none, 1 analog, 2 enumerated.
    pub async fn eu_type(&self) -> OpcDaResult<i32> {
        let inner = self.inner()?;
        let value = inner
            .context
            .item_property(&inner.tag, property::EU_TYPE)
            .await?;
        match value {
            Variant::Empty => Ok(0),
            other => other
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| {
                    crate::error::ConversionError::coercion(other.type_name(), "VT_I4").into()
                }),
        }
    }

    /// Engineering-unit information; `None` when the item has no EU type.
    pub async fn eu_info(&self) -> OpcDaResult<Option<EuInfo>> {
        let eu_type = self.eu_type().await?;
        match eu_type {
            0 => return Ok(None),
            1 | 2 => {}
            _ => return Err(UsageError::InvalidEuType { eu_type }.into()),
        }

        let inner = self.inner()?;
        let value = inner
            .context
            .item_property(&inner.tag, property::EU_INFO)
            .await?;
        Ok(Some(eu_info_from(eu_type, value)))
    }

    pub(crate) fn release(&self) {
        if let Some(inner) = self.inner.as_ref() {
            if !inner.released.swap(true, Ordering::AcqRel) {
                tracing::trace!(tag = %inner.tag, server_handle = inner.server_handle, "Released item");
            }
        }
    }
}

fn eu_info_from(eu_type: i32, value: Variant) -> EuInfo {
    let Variant::Array(array) = &value else {
        return EuInfo::Other(value);
    };
    match eu_type {
        1 if array.len() == 2 => {
            let low = array.get(0).and_then(|v| v.as_f64());
            let high = array.get(1).and_then(|v| v.as_f64());
            match (low, high) {
                (Some(low), Some(high)) => EuInfo::Analog { low, high },
                _ => EuInfo::Other(value),
            }
        }
        2 => {
            let names: Option<Vec<String>> = (0..array.len())
                .map(|i| array.get(i).and_then(|v| v.as_str().map(str::to_string)))
                .collect();
            match names {
                Some(names) => EuInfo::Enumerated(names),
                None => EuInfo::Other(value),
            }
        }
        _ => EuInfo::Other(value),
    }
}

impl fmt::Debug for OpcItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcItem")
            .field("tag", &self.tag())
            .field("server_handle", &self.server_handle())
            .field("client_handle", &self.client_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ArrayValue;

    #[tokio::test]
    async fn test_uninitialized_item() {
        let item = OpcItem::default();
        assert!(!item.is_valid());
        assert_eq!(item.tag(), "");
        assert_eq!(item.server_handle(), 0);
        assert_eq!(item.value(), Variant::Empty);
        assert_eq!(
            item.read(DataSource::Cache).await.unwrap_err().to_string(),
            "uninitialized item"
        );
        assert!(item.set_active(false).await.is_err());
        item.release();
    }

    #[test]
    fn test_eu_info_shapes() {
        let analog = Variant::Array(ArrayValue::F64(vec![0.0, 100.0]));
        assert_eq!(
            eu_info_from(1, analog),
            EuInfo::Analog {
                low: 0.0,
                high: 100.0
            }
        );

        let names = Variant::Array(ArrayValue::String(vec!["off".into(), "on".into()]));
        assert_eq!(
            eu_info_from(2, names),
            EuInfo::Enumerated(vec!["off".into(), "on".into()])
        );

        assert_eq!(
            eu_info_from(1, Variant::F64(3.0)),
            EuInfo::Other(Variant::F64(3.0))
        );
    }
}
