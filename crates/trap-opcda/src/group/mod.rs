// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Groups: items sharing an update rate, deadband and active state.
//!
//! Every mutator changes the server first and the local copy only after the
//! server accepted it. The update rate, deadband, time bias and locale are
//! read back from the server; name, active flag and handles come from the
//! local copy.
//!
//! # Lifecycle
//!
//! ```text
//! OpcGroups::add ──▶ unadvised ──register_*──▶ advised ──release──▶ released
//!                        │                                             ▲
//!                        └─────────────────release─────────────────────┘
//!
//! release: stop dispatch task ─▶ unadvise ─▶ release items ─▶ release
//!          group interfaces ─▶ remove the group on the server
//! ```

mod advise;
mod collection;
mod io;

pub use collection::OpcGroups;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{OpcDaError, OpcDaResult, OpcDaErrorContext};
use crate::events::{DispatchStats, DispatchStatsSnapshot, Subscribers};
use crate::handle::{release_all, RemoteHandle};
use crate::interface::{AsyncIo, GroupObject, GroupState, GroupStateChange, SyncIo};
use crate::item::OpcItems;
use crate::session::ServerContext;

use self::advise::AdviseState;

const GROUP: &str = "group";

#[derive(Debug, Clone)]
struct GroupLocal {
    name: String,
    client_handle: u32,
    active: bool,
    update_rate: u32,
}

pub(crate) struct GroupInner {
    context: Arc<ServerContext>,
    server_handle: u32,
    local: RwLock<GroupLocal>,
    state: RemoteHandle<dyn GroupObject>,
    sync_io: Arc<RemoteHandle<dyn SyncIo>>,
    async_io: RemoteHandle<dyn AsyncIo>,
    items: OpcItems,
    subscribers: Arc<Subscribers>,
    advise: Mutex<Option<AdviseState>>,
    stats: Arc<DispatchStats>,
    queue_capacity: usize,
    released: AtomicBool,
}

/// A group of items.
///
/// The `Default` value is an uninitialized group.
#[derive(Clone, Default)]
pub struct OpcGroup {
    inner: Option<Arc<GroupInner>>,
}

/// Interfaces negotiated for a newly created group.
pub(crate) struct GroupParts {
    pub(crate) server_handle: u32,
    pub(crate) name: String,
    pub(crate) client_handle: u32,
    pub(crate) active: bool,
    pub(crate) update_rate: u32,
    pub(crate) state: RemoteHandle<dyn GroupObject>,
    pub(crate) sync_io: Arc<RemoteHandle<dyn SyncIo>>,
    pub(crate) async_io: RemoteHandle<dyn AsyncIo>,
    pub(crate) items: OpcItems,
}

impl OpcGroup {
    pub(crate) fn new(context: Arc<ServerContext>, parts: GroupParts) -> Self {
        let queue_capacity = context.config.event_queue_capacity.max(1);
        Self {
            inner: Some(Arc::new(GroupInner {
                context,
                server_handle: parts.server_handle,
                local: RwLock::new(GroupLocal {
                    name: parts.name,
                    client_handle: parts.client_handle,
                    active: parts.active,
                    update_rate: parts.update_rate,
                }),
                state: parts.state,
                sync_io: parts.sync_io,
                async_io: parts.async_io,
                items: parts.items,
                subscribers: Arc::new(Subscribers::default()),
                advise: Mutex::new(None),
                stats: Arc::new(DispatchStats::new()),
                queue_capacity,
                released: AtomicBool::new(false),
            })),
        }
    }

    fn inner(&self) -> OpcDaResult<&Arc<GroupInner>> {
        let inner = self
            .inner
            .as_ref()
            .ok_or_else(|| OpcDaError::uninitialized(GROUP))?;
        if inner.released.load(Ordering::Acquire) {
            return Err(OpcDaError::released(GROUP));
        }
        Ok(inner)
    }

    /// Returns `true` for an initialized, unreleased group.
    pub fn is_valid(&self) -> bool {
        self.inner().is_ok()
    }

    fn local<R>(&self, f: impl FnOnce(&GroupLocal) -> R) -> Option<R> {
        self.inner.as_ref().map(|inner| f(&inner.local.read()))
    }

    // =========================================================================
    // Local Accessors
    // =========================================================================

    /// Group name.
    pub fn name(&self) -> String {
        self.local(|l| l.name.clone()).unwrap_or_default()
    }

    /// Active flag.
    pub fn is_active(&self) -> bool {
        self.local(|l| l.active).unwrap_or(false)
    }

    /// Client handle.
    pub fn client_handle(&self) -> u32 {
        self.local(|l| l.client_handle).unwrap_or(0)
    }

    /// Server handle.
    pub fn server_handle(&self) -> u32 {
        self.inner.as_ref().map(|i| i.server_handle).unwrap_or(0)
    }

    /// Update rate last revised by the server.
    pub fn revised_update_rate(&self) -> u32 {
        self.local(|l| l.update_rate).unwrap_or(0)
    }

    /// The group's items.
    pub fn items(&self) -> OpcItems {
        self.inner
            .as_ref()
            .map(|i| i.items.clone())
            .unwrap_or_default()
    }

    /// Event delivery counters.
    pub fn dispatch_stats(&self) -> DispatchStatsSnapshot {
        self.inner
            .as_ref()
            .map(|i| i.stats.snapshot())
            .unwrap_or_default()
    }

    // =========================================================================
    // Remote Accessors
    // =========================================================================

    /// Reads the group state from the server.
    pub async fn state(&self) -> OpcDaResult<GroupState> {
        let inner = self.inner()?;
        let name = inner.local.read().name.clone();
        inner.state.get()?.get_state().await.with_group(&name)
    }

    /// Current update rate in milliseconds.
    pub async fn update_rate(&self) -> OpcDaResult<u32> {
        Ok(self.state().await?.update_rate)
    }

    /// Percent deadband.
    pub async fn deadband(&self) -> OpcDaResult<f32> {
        Ok(self.state().await?.deadband)
    }

    /// Time bias in minutes.
    pub async fn time_bias(&self) -> OpcDaResult<i32> {
        Ok(self.state().await?.time_bias)
    }

    /// Locale ID.
    pub async fn locale_id(&self) -> OpcDaResult<u32> {
        Ok(self.state().await?.locale_id)
    }

    // =========================================================================
    // Mutators
    // =========================================================================

    async fn set_state(&self, change: GroupStateChange) -> OpcDaResult<u32> {
        let inner = self.inner()?;
        let name = inner.local.read().name.clone();
        inner.state.get()?.set_state(change).await.with_group(&name)
    }

    /// Renames the group.
    pub async fn set_name(&self, name: &str) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let current = inner.local.read().name.clone();
        inner.state.get()?.set_name(name).await.with_group(&current)?;
        inner.local.write().name = name.to_string();
        Ok(())
    }

    /// Activates or deactivates the group.
    pub async fn set_is_active(&self, active: bool) -> OpcDaResult<()> {
        let revised = self
            .set_state(GroupStateChange {
                active: Some(active),
                ..Default::default()
            })
            .await?;
        let mut local = self.inner()?.local.write();
        local.active = active;
        local.update_rate = revised;
        Ok(())
    }

    /// Requests an update rate and returns the rate the server will use.
    pub async fn set_update_rate(&self, update_rate: u32) -> OpcDaResult<u32> {
        let revised = self
            .set_state(GroupStateChange {
                update_rate: Some(update_rate),
                ..Default::default()
            })
            .await?;
        self.inner()?.local.write().update_rate = revised;
        Ok(revised)
    }

    /// Sets the percent deadband.
    pub async fn set_deadband(&self, deadband: f32) -> OpcDaResult<()> {
        self.set_state(GroupStateChange {
            deadband: Some(deadband),
            ..Default::default()
        })
        .await
        .map(drop)
    }

    /// Sets the time bias.
    pub async fn set_time_bias(&self, time_bias: i32) -> OpcDaResult<()> {
        self.set_state(GroupStateChange {
            time_bias: Some(time_bias),
            ..Default::default()
        })
        .await
        .map(drop)
    }

    /// Sets the locale.
    pub async fn set_locale_id(&self, locale_id: u32) -> OpcDaResult<()> {
        self.set_state(GroupStateChange {
            locale_id: Some(locale_id),
            ..Default::default()
        })
        .await
        .map(drop)
    }

    /// Changes the client handle.
    pub async fn set_client_handle(&self, client_handle: u32) -> OpcDaResult<()> {
        self.set_state(GroupStateChange {
            client_handle: Some(client_handle),
            ..Default::default()
        })
        .await?;
        self.inner()?.local.write().client_handle = client_handle;
        Ok(())
    }

    // =========================================================================
    // Release
    // =========================================================================

    /// Releases the group: stops event delivery, releases its items and
    /// interfaces, then removes it from the server. Safe to call twice.
    pub async fn release(&self) -> OpcDaResult<()> {
        let Some(inner) = self.inner.as_ref() else {
            return Ok(());
        };
        if inner.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let name = inner.local.read().name.clone();

        let mut result = Ok(());
        if let Some(advise) = inner.advise.lock().await.take() {
            if let Err(e) = advise.teardown(&name).await {
                warn!(group = %name, error = %e, "Failed to unadvise group");
                result = Err(e);
            }
        }

        inner.items.release();
        release_all(&[&*inner.sync_io, &inner.async_io, &inner.state]);

        match inner.context.server.get() {
            Ok(server) => {
                if let Err(e) = server.remove_group(inner.server_handle, false).await {
                    warn!(group = %name, error = %e, "Failed to remove group");
                }
            }
            Err(e) => warn!(group = %name, error = %e, "Failed to remove group"),
        }

        info!(group = %name, server_handle = inner.server_handle, "Released group");
        result
    }
}

impl fmt::Debug for OpcGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcGroup")
            .field("name", &self.name())
            .field("server_handle", &self.server_handle())
            .field("client_handle", &self.client_handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataSource;

    #[tokio::test]
    async fn test_uninitialized_group() {
        let group = OpcGroup::default();
        assert!(!group.is_valid());
        assert_eq!(group.name(), "");
        assert_eq!(group.server_handle(), 0);
        assert_eq!(group.items().count(), 0);
        assert_eq!(group.dispatch_stats(), DispatchStatsSnapshot::default());

        let err = group.update_rate().await.unwrap_err();
        assert_eq!(err.to_string(), "uninitialized group");
        assert!(group.sync_read(DataSource::Cache, &[1]).await.is_err());
        assert!(group.release().await.is_ok());
    }
}
