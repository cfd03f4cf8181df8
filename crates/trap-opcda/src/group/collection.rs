// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The group collection of a session.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{info, warn};

use super::{GroupParts, OpcGroup};
use crate::config::GroupDefaults;
use crate::error::{OpcDaError, OpcDaResult, UsageError};
use crate::handle::RemoteHandle;
use crate::interface::GroupRequest;
use crate::item::OpcItems;
use crate::session::ServerContext;
use crate::types::Interface;

const GROUPS: &str = "group collection";

pub(crate) struct GroupsInner {
    context: Arc<ServerContext>,
    defaults: RwLock<GroupDefaults>,
    groups: RwLock<Vec<OpcGroup>>,
    next_client_handle: AtomicU32,
}

impl GroupsInner {
    /// The member list, without groups released through `OpcGroup::release`.
    fn live(&self) -> RwLockWriteGuard<'_, Vec<OpcGroup>> {
        let mut groups = self.groups.write();
        groups.retain(OpcGroup::is_valid);
        groups
    }
}

/// The groups of a session.
///
/// The `Default` value is an uninitialized collection.
#[derive(Clone, Default)]
pub struct OpcGroups {
    inner: Option<Arc<GroupsInner>>,
}

impl OpcGroups {
    pub(crate) fn new(context: Arc<ServerContext>) -> Self {
        let defaults = context.config.group;
        Self {
            inner: Some(Arc::new(GroupsInner {
                context,
                defaults: RwLock::new(defaults),
                groups: RwLock::new(Vec::new()),
                next_client_handle: AtomicU32::new(0),
            })),
        }
    }

    fn inner(&self) -> OpcDaResult<&Arc<GroupsInner>> {
        self.inner
            .as_ref()
            .ok_or_else(|| OpcDaError::uninitialized(GROUPS))
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    /// Defaults applied to new groups.
    pub fn defaults(&self) -> GroupDefaults {
        self.inner
            .as_ref()
            .map(|i| *i.defaults.read())
            .unwrap_or_default()
    }

    /// Default active state.
    pub fn default_active(&self) -> bool {
        self.defaults().active
    }

    /// Sets the default active state.
    pub fn set_default_active(&self, active: bool) {
        self.update_defaults(|d| d.active = active);
    }

    /// Default update rate in milliseconds.
    pub fn default_update_rate(&self) -> u32 {
        self.defaults().update_rate_ms
    }

    /// Sets the default update rate.
    pub fn set_default_update_rate(&self, update_rate_ms: u32) {
        self.update_defaults(|d| d.update_rate_ms = update_rate_ms);
    }

    /// Default percent deadband.
    pub fn default_deadband(&self) -> f32 {
        self.defaults().deadband
    }

    /// Sets the default deadband.
    pub fn set_default_deadband(&self, deadband: f32) {
        self.update_defaults(|d| d.deadband = deadband);
    }

    /// Default locale ID.
    pub fn default_locale_id(&self) -> u32 {
        self.defaults().locale_id
    }

    /// Sets the default locale ID.
    pub fn set_default_locale_id(&self, locale_id: u32) {
        self.update_defaults(|d| d.locale_id = locale_id);
    }

    /// Default time bias in minutes.
    pub fn default_time_bias(&self) -> i32 {
        self.defaults().time_bias
    }

    /// Sets the default time bias.
    pub fn set_default_time_bias(&self, time_bias: i32) {
        self.update_defaults(|d| d.time_bias = time_bias);
    }

    fn update_defaults(&self, f: impl FnOnce(&mut GroupDefaults)) {
        if let Some(inner) = self.inner.as_ref() {
            f(&mut inner.defaults.write());
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Number of groups.
    pub fn count(&self) -> usize {
        self.inner
            .as_ref()
            .map(|i| i.live().len())
            .unwrap_or(0)
    }

    /// Returns the group at a 0-based index.
    pub fn item(&self, index: usize) -> OpcDaResult<OpcGroup> {
        let inner = self.inner()?;
        let groups = inner.live();
        groups
            .get(index)
            .cloned()
            .ok_or_else(|| UsageError::index_out_of_range(index, groups.len()).into())
    }

    /// Returns the group with the given name.
    pub fn get_by_name(&self, name: &str) -> OpcDaResult<OpcGroup> {
        self.find(|group| group.name() == name)
            .ok_or_else(|| UsageError::group_not_found(name).into())
    }

    /// Returns the group with the given server handle.
    pub fn get_by_server_handle(&self, server_handle: u32) -> OpcDaResult<OpcGroup> {
        self.find(|group| group.server_handle() == server_handle)
            .ok_or_else(|| UsageError::group_not_found(server_handle.to_string()).into())
    }

    fn find(&self, predicate: impl Fn(&OpcGroup) -> bool) -> Option<OpcGroup> {
        let inner = self.inner.as_ref()?;
        let groups = inner.live();
        groups.iter().find(|group| predicate(group)).cloned()
    }

    // =========================================================================
    // Add / Remove
    // =========================================================================

    /// Creates a group with the collection defaults.
    ///
    /// An empty name lets the server choose one.
    pub async fn add(&self, name: &str) -> OpcDaResult<OpcGroup> {
        let inner = self.inner()?;
        let defaults = *inner.defaults.read();
        let client_handle = inner.next_client_handle.fetch_add(1, Ordering::Relaxed) + 1;

        let server = inner.context.server.get()?;
        let created = server
            .add_group(GroupRequest {
                name: name.to_string(),
                active: defaults.active,
                update_rate: defaults.update_rate_ms,
                client_handle,
                time_bias: defaults.time_bias,
                deadband: defaults.deadband,
                locale_id: defaults.locale_id,
            })
            .await?;
        let server_handle = created.server_handle;
        let state = RemoteHandle::adopt(created.group, Interface::GroupStateMgt.name());

        let parts = match Self::negotiate(&inner.context, state, name).await {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(remove) = server.remove_group(server_handle, true).await {
                    warn!(group = name, error = %remove, "Failed to remove partially created group");
                }
                return Err(e);
            }
        };

        let group = OpcGroup::new(
            Arc::clone(&inner.context),
            GroupParts {
                server_handle,
                client_handle,
                active: defaults.active,
                update_rate: created.revised_update_rate,
                ..parts
            },
        );
        inner.groups.write().push(group.clone());

        info!(
            group = %group.name(),
            server_handle,
            client_handle,
            revised_update_rate = created.revised_update_rate,
            "Added group"
        );
        Ok(group)
    }

    async fn negotiate(
        context: &Arc<ServerContext>,
        state: RemoteHandle<dyn crate::interface::GroupObject>,
        requested_name: &str,
    ) -> OpcDaResult<GroupParts> {
        // Each early return drops the handles negotiated so far.
        let object = state.get()?;
        let sync_io = RemoteHandle::adopt(object.query_sync_io().await?, Interface::SyncIo.name());
        let async_io =
            RemoteHandle::adopt(object.query_async_io().await?, Interface::AsyncIo2.name());
        let item_mgt = RemoteHandle::adopt(object.query_item_mgt().await?, Interface::ItemMgt.name());

        let name = if requested_name.is_empty() {
            object.get_state().await?.name
        } else {
            requested_name.to_string()
        };

        let sync_io = Arc::new(sync_io);
        let items = OpcItems::new(Arc::clone(context), Arc::new(item_mgt), Arc::clone(&sync_io));
        Ok(GroupParts {
            server_handle: 0,
            name,
            client_handle: 0,
            active: false,
            update_rate: 0,
            state,
            sync_io,
            async_io,
            items,
        })
    }

    /// Releases and removes the group with the given server handle.
    pub async fn remove(&self, server_handle: u32) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let group = {
            let mut groups = inner.groups.write();
            let index = groups
                .iter()
                .position(|group| group.server_handle() == server_handle)
                .ok_or_else(|| OpcDaError::from(UsageError::group_not_found(server_handle.to_string())))?;
            groups.remove(index)
        };
        group.release().await
    }

    /// Releases and removes the group with the given name.
    pub async fn remove_by_name(&self, name: &str) -> OpcDaResult<()> {
        let group = self.get_by_name(name)?;
        self.remove(group.server_handle()).await
    }

    /// Releases and removes every group.
    pub async fn remove_all(&self) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let groups = std::mem::take(&mut *inner.groups.write());
        let mut result = Ok(());
        for group in groups {
            if let Err(e) = group.release().await {
                result = Err(e);
            }
        }
        result
    }

    /// Releases every group. Errors are logged, not returned.
    pub async fn release(&self) {
        if let Err(e) = self.remove_all().await {
            if !matches!(e, OpcDaError::Usage(UsageError::Uninitialized { .. })) {
                warn!(error = %e, "Errors while releasing groups");
            }
        }
    }
}

impl fmt::Debug for OpcGroups {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcGroups")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uninitialized_collection() {
        let groups = OpcGroups::default();
        assert_eq!(groups.count(), 0);
        assert_eq!(groups.default_update_rate(), 1000);
        assert!(groups.item(0).is_err());
        assert!(groups.get_by_name("g").is_err());
        assert_eq!(
            groups.add("g").await.unwrap_err().to_string(),
            "uninitialized group collection"
        );
        groups.release().await;
    }
}
