// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The item collection of one group.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{NewItem, OpcItem};
use crate::codec::Variant;
use crate::config::ItemDefaults;
use crate::error::{ItemErrors, OpcDaError, OpcDaResult, UsageError};
use crate::handle::RemoteHandle;
use crate::interface::{ItemDefinition, ItemMgt, SyncIo};
use crate::session::ServerContext;
use crate::types::{hresult, VarType};

const ITEMS: &str = "item collection";

pub(crate) struct ItemsInner {
    context: Arc<ServerContext>,
    item_mgt: Arc<RemoteHandle<dyn ItemMgt>>,
    sync_io: Arc<RemoteHandle<dyn SyncIo>>,
    defaults: RwLock<ItemDefaults>,
    items: RwLock<Vec<OpcItem>>,
    next_client_handle: AtomicU32,
    released: AtomicBool,
}

/// The items of a group.
///
/// The `Default` value is an uninitialized collection.
#[derive(Clone, Default)]
pub struct OpcItems {
    inner: Option<Arc<ItemsInner>>,
}

impl OpcItems {
    pub(crate) fn new(
        context: Arc<ServerContext>,
        item_mgt: Arc<RemoteHandle<dyn ItemMgt>>,
        sync_io: Arc<RemoteHandle<dyn SyncIo>>,
    ) -> Self {
        let defaults = context.config.item.clone();
        Self {
            inner: Some(Arc::new(ItemsInner {
                context,
                item_mgt,
                sync_io,
                defaults: RwLock::new(defaults),
                items: RwLock::new(Vec::new()),
                next_client_handle: AtomicU32::new(0),
                released: AtomicBool::new(false),
            })),
        }
    }

    fn inner(&self) -> OpcDaResult<&Arc<ItemsInner>> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| OpcDaError::uninitialized(ITEMS))?;
        if inner.released.load(Ordering::Acquire) {
            return Err(OpcDaError::released(ITEMS));
        }
        Ok(inner)
    }

    fn mint_client_handle(inner: &ItemsInner) -> u32 {
        inner.next_client_handle.fetch_add(1, Ordering::Relaxed) + 1
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    /// Default requested data type for new items.
    pub fn default_requested_data_type(&self) -> VarType {
        self.inner
            .as_ref()
            .map(|i| i.defaults.read().requested_type)
            .unwrap_or_default()
    }

    /// Sets the default requested data type.
    pub fn set_default_requested_data_type(&self, requested_type: VarType) {
        if let Some(inner) = self.inner.as_ref() {
            inner.defaults.write().requested_type = requested_type;
        }
    }

    /// Default access path for new items.
    pub fn default_access_path(&self) -> String {
        self.inner
            .as_ref()
            .map(|i| i.defaults.read().access_path.clone())
            .unwrap_or_default()
    }

    /// Sets the default access path.
    pub fn set_default_access_path(&self, access_path: &str) {
        if let Some(inner) = self.inner.as_ref() {
            inner.defaults.write().access_path = access_path.to_string();
        }
    }

    /// Default active state for new items.
    pub fn default_active(&self) -> bool {
        self.inner
            .as_ref()
            .map(|i| i.defaults.read().active)
            .unwrap_or(false)
    }

    /// Sets the default active state.
    pub fn set_default_active(&self, active: bool) {
        if let Some(inner) = self.inner.as_ref() {
            inner.defaults.write().active = active;
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Number of items.
    pub fn count(&self) -> usize {
        self.inner
            .as_ref()
            .map(|i| i.items.read().len())
            .unwrap_or(0)
    }

    /// Returns the item at a 0-based index.
    pub fn item(&self, index: usize) -> OpcDaResult<OpcItem> {
        let inner = self.inner()?;
        let items = inner.items.read();
        items
            .get(index)
            .cloned()
            .ok_or_else(|| UsageError::index_out_of_range(index, items.len()).into())
    }

    /// Returns the item with the given tag.
    pub fn item_by_name(&self, tag: &str) -> OpcDaResult<OpcItem> {
        let inner = self.inner()?;
        inner
            .items
            .read()
            .iter()
            .find(|item| item.tag() == tag)
            .cloned()
            .ok_or_else(|| {
                OpcDaError::item(
                    hresult::OPC_E_UNKNOWNITEMID,
                    format!("item '{}' not found", tag),
                )
            })
    }

    /// Returns the item with the given server handle.
    pub fn get_item(&self, server_handle: u32) -> OpcDaResult<OpcItem> {
        let inner = self.inner()?;
        inner
            .items
            .read()
            .iter()
            .find(|item| item.server_handle() == server_handle)
            .cloned()
            .ok_or_else(|| UsageError::item_not_found(server_handle).into())
    }

    /// Returns every item.
    pub fn items(&self) -> Vec<OpcItem> {
        self.inner
            .as_ref()
            .map(|i| i.items.read().clone())
            .unwrap_or_default()
    }

    pub(crate) fn apply_update(
        &self,
        client_handle: u32,
        value: &Variant,
        quality: u16,
        timestamp: DateTime<Utc>,
    ) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        for item in inner.items.read().iter() {
            if item.client_handle() == client_handle {
                item.update_cache(value, quality, timestamp);
            }
        }
    }

    // =========================================================================
    // Add / Validate / Remove
    // =========================================================================

    /// Adds one item.
    pub async fn add_item(&self, tag: &str) -> OpcDaResult<OpcItem> {
        let (mut items, mut errors) = self.add_items(&[tag]).await?;
        match errors.pop().flatten() {
            Some(error) => Err(error),
            None => items
                .pop()
                .ok_or_else(|| OpcDaError::remote("ItemMgt::AddItems", hresult::E_FAIL)),
        }
    }

    /// Adds items in one batch.
    ///
    /// Both vectors are parallel to `tags`. A failed tag leaves an
    /// uninitialized [`OpcItem`] at its index and its error next to it.
    pub async fn add_items<S: AsRef<str> + Sync>(
        &self,
        tags: &[S],
    ) -> OpcDaResult<(Vec<OpcItem>, ItemErrors)> {
        let inner = self.inner()?;
        let defaults = inner.defaults.read().clone();
        let definitions: Vec<ItemDefinition> = tags
            .iter()
            .map(|tag| ItemDefinition {
                access_path: defaults.access_path.clone(),
                item_id: tag.as_ref().to_string(),
                active: defaults.active,
                client_handle: Self::mint_client_handle(inner),
                requested_type: defaults.requested_type,
            })
            .collect();

        let (results, statuses) = inner.item_mgt.get()?.add_items(&definitions).await?;
        let mut errors = inner.context.translate(&statuses).await;
        errors.resize(definitions.len(), None);

        let mut added = Vec::with_capacity(definitions.len());
        for (index, definition) in definitions.into_iter().enumerate() {
            let result = match (errors[index].is_none(), results.get(index)) {
                (true, Some(result)) => *result,
                (true, None) => {
                    errors[index] = Some(OpcDaError::remote("ItemMgt::AddItems", hresult::E_FAIL));
                    added.push(OpcItem::default());
                    continue;
                }
                (false, _) => {
                    added.push(OpcItem::default());
                    continue;
                }
            };
            added.push(OpcItem::new(
                Arc::clone(&inner.context),
                Arc::clone(&inner.item_mgt),
                Arc::clone(&inner.sync_io),
                NewItem {
                    tag: definition.item_id,
                    access_path: definition.access_path,
                    active: definition.active,
                    client_handle: definition.client_handle,
                    requested_type: definition.requested_type,
                    result,
                },
            ));
        }

        inner
            .items
            .write()
            .extend(added.iter().filter(|item| item.is_valid()).cloned());
        debug!(
            requested = tags.len(),
            added = errors.iter().filter(|e| e.is_none()).count(),
            "Added items"
        );
        Ok((added, errors))
    }

    /// Checks whether items could be added, without adding them.
    ///
    /// `requested_types` and `access_paths`, when given, are parallel to `tags`.
    pub async fn validate<S: AsRef<str> + Sync>(
        &self,
        tags: &[S],
        requested_types: Option<&[VarType]>,
        access_paths: Option<&[String]>,
    ) -> OpcDaResult<ItemErrors> {
        let inner = self.inner()?;
        for len in [requested_types.map(<[_]>::len), access_paths.map(<[_]>::len)]
            .into_iter()
            .flatten()
        {
            if len != tags.len() {
                return Err(UsageError::LengthMismatch {
                    expected: tags.len(),
                    actual: len,
                }
                .into());
            }
        }

        let default_type = inner.defaults.read().requested_type;
        let definitions: Vec<ItemDefinition> = tags
            .iter()
            .enumerate()
            .map(|(i, tag)| ItemDefinition {
                access_path: access_paths.map(|p| p[i].clone()).unwrap_or_default(),
                item_id: tag.as_ref().to_string(),
                active: false,
                client_handle: Self::mint_client_handle(inner),
                requested_type: requested_types.map(|t| t[i]).unwrap_or(default_type),
            })
            .collect();

        let (_, statuses) = inner
            .item_mgt
            .get()?
            .validate_items(&definitions, false)
            .await?;
        let mut errors = inner.context.translate(&statuses).await;
        errors.resize(definitions.len(), None);
        Ok(errors)
    }

    /// Removes items by server handle.
    ///
    /// Matching items leave the collection first; the server is asked to
    /// remove the ones found, and they are released whatever it answers.
    pub async fn remove(&self, server_handles: &[u32]) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let wanted: HashSet<u32> = server_handles.iter().copied().collect();

        let removed: Vec<OpcItem> = {
            let mut items = inner.items.write();
            let (removed, kept): (Vec<OpcItem>, Vec<OpcItem>) = items
                .drain(..)
                .partition(|item| wanted.contains(&item.server_handle()));
            *items = kept;
            removed
        };

        if !removed.is_empty() {
            let handles: Vec<u32> = removed.iter().map(OpcItem::server_handle).collect();
            match inner.item_mgt.get() {
                Ok(item_mgt) => match item_mgt.remove_items(&handles).await {
                    Ok(statuses) => {
                        let failed = statuses.iter().filter(|s| hresult::failed(**s)).count();
                        if failed > 0 {
                            warn!(failed, "Server refused to remove some items");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to remove items"),
                },
                Err(e) => warn!(error = %e, "Failed to remove items"),
            }
        }

        for item in &removed {
            item.release();
        }
        debug!(
            requested = server_handles.len(),
            removed = removed.len(),
            "Removed items"
        );
        Ok(())
    }

    // =========================================================================
    // Per-handle Mutators
    // =========================================================================

    /// Activates or deactivates items; one error slot per handle.
    pub async fn set_active(&self, server_handles: &[u32], active: bool) -> OpcDaResult<ItemErrors> {
        self.inner()?;
        let mut errors = Vec::with_capacity(server_handles.len());
        for &handle in server_handles {
            let outcome = match self.get_item(handle) {
                Ok(item) => item.set_active(active).await,
                Err(e) => Err(e),
            };
            errors.push(outcome.err());
        }
        Ok(errors)
    }

    /// Reassigns client handles; one error slot per handle.
    pub async fn set_client_handles(
        &self,
        server_handles: &[u32],
        client_handles: &[u32],
    ) -> OpcDaResult<ItemErrors> {
        self.inner()?;
        check_lengths(server_handles.len(), client_handles.len())?;
        let mut errors = Vec::with_capacity(server_handles.len());
        for (&handle, &client_handle) in server_handles.iter().zip(client_handles) {
            let outcome = match self.get_item(handle) {
                Ok(item) => item.set_client_handle(client_handle).await,
                Err(e) => Err(e),
            };
            errors.push(outcome.err());
        }
        Ok(errors)
    }

    /// Changes requested data types; one error slot per handle.
    pub async fn set_data_types(
        &self,
        server_handles: &[u32],
        requested_types: &[VarType],
    ) -> OpcDaResult<ItemErrors> {
        self.inner()?;
        check_lengths(server_handles.len(), requested_types.len())?;
        let mut errors = Vec::with_capacity(server_handles.len());
        for (&handle, &requested_type) in server_handles.iter().zip(requested_types) {
            let outcome = match self.get_item(handle) {
                Ok(item) => item.set_requested_data_type(requested_type).await,
                Err(e) => Err(e),
            };
            errors.push(outcome.err());
        }
        Ok(errors)
    }

    /// Releases every item and the item-management reference.
    pub fn release(&self) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        if inner.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let items = std::mem::take(&mut *inner.items.write());
        for item in &items {
            item.release();
        }
        inner.item_mgt.release();
    }
}

fn check_lengths(expected: usize, actual: usize) -> OpcDaResult<()> {
    if expected != actual {
        return Err(UsageError::LengthMismatch { expected, actual }.into());
    }
    Ok(())
}

impl fmt::Debug for OpcItems {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcItems")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uninitialized_collection() {
        let items = OpcItems::default();
        assert_eq!(items.count(), 0);
        assert!(!items.default_active());
        items.set_default_active(true);
        assert!(items.item(0).is_err());
        assert_eq!(
            items.add_items(&["a"]).await.unwrap_err().to_string(),
            "uninitialized item collection"
        );
        assert!(items.set_active(&[1], true).await.is_err());
        items.release();
    }
}
