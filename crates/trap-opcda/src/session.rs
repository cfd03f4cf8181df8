// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server sessions.
//!
//! A [`Connector`] resolves a program ID, activates the server and negotiates
//! the interfaces every session needs. The resulting [`OpcServer`] owns the
//! group collection and, optionally, a shutdown subscription.
//!
//! ```text
//! Connector::connect(prog_id, node)
//!     │
//!     ├─▶ discovery::resolve_clsid      (server list v2 → v1 → registry)
//!     ├─▶ Activator::activate           (local or remote by node)
//!     ├─▶ query_common                  ┐ failure of either releases
//!     └─▶ query_item_properties         ┘ everything acquired so far
//!
//! OpcServer::disconnect()
//!     unadvise shutdown ─▶ release groups (items first) ─▶ release session refs
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::browser::OpcBrowser;
use crate::codec::{decode, task_heap, ForeignHeap, Variant};
use crate::config::ClientConfig;
use crate::discovery;
use crate::error::{ConnectionError, ItemErrors, OpcDaError, OpcDaResult};
use crate::group::OpcGroups;
use crate::handle::{release_all, RemoteHandle};
use crate::interface::{
    Activator, CallbackSink, ClassResolver, CommonInterface, ConnectionPoint,
    ConnectionPointContainer, ItemPropertiesInterface, Locality, PropertyDescription,
    ServerObject, ShutdownCallback,
};
use crate::types::{hresult, ClassId, Interface, ServerInfo, ServerState, ServerStatus};

const SESSION: &str = "server connection";

// =============================================================================
// ServerContext
// =============================================================================

/// Session-wide references shared by groups, items and the dispatcher.
pub(crate) struct ServerContext {
    pub(crate) server: RemoteHandle<dyn ServerObject>,
    pub(crate) common: RemoteHandle<dyn CommonInterface>,
    pub(crate) properties: RemoteHandle<dyn ItemPropertiesInterface>,
    pub(crate) heap: Arc<dyn ForeignHeap>,
    pub(crate) config: ClientConfig,
}

impl ServerContext {
    /// Builds the per-item error for a negative status.
    pub(crate) async fn error_for(&self, code: i32) -> OpcDaError {
        let message = match self.common.get() {
            Ok(common) => common
                .get_error_string(code)
                .await
                .unwrap_or_else(|_| hresult::describe(code)),
            Err(_) => "uninitialized common interface".to_string(),
        };
        OpcDaError::item(code, message)
    }

    /// Translates a status array into per-item errors.
    pub(crate) async fn translate(&self, codes: &[i32]) -> ItemErrors {
        let mut errors = Vec::with_capacity(codes.len());
        for &code in codes {
            errors.push(if hresult::failed(code) {
                Some(self.error_for(code).await)
            } else {
                None
            });
        }
        errors
    }

    /// Reads property values of one item.
    ///
    /// A value that fails to decode is reported as a per-item conversion
    /// error and replaced by `Empty`.
    pub(crate) async fn item_properties(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcDaResult<(Vec<Variant>, ItemErrors)> {
        let (values, statuses) = self
            .properties
            .get()?
            .get_item_properties(item_id, property_ids)
            .await?;
        debug!(item_id, count = property_ids.len(), "Read item properties");

        let mut errors = self.translate(&statuses).await;
        errors.resize(property_ids.len(), None);

        let mut decoded = Vec::with_capacity(property_ids.len());
        let mut values = values.into_iter();
        for error in errors.iter_mut() {
            let value = match values.next() {
                Some(wire) if error.is_none() => decode(wire).unwrap_or_else(|e| {
                    *error = Some(e.into());
                    Variant::Empty
                }),
                _ => Variant::Empty,
            };
            decoded.push(value);
        }
        Ok((decoded, errors))
    }

    /// Reads a single property value.
    pub(crate) async fn item_property(&self, item_id: &str, property_id: u32) -> OpcDaResult<Variant> {
        let (mut values, mut errors) = self.item_properties(item_id, &[property_id]).await?;
        match errors.pop().flatten() {
            Some(error) => Err(error),
            None => Ok(values.pop().unwrap_or_default()),
        }
    }

    fn release(&self) {
        release_all(&[&self.properties, &self.common, &self.server]);
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens sessions through a resolver and an activator.
#[derive(Clone)]
pub struct Connector {
    resolver: Arc<dyn ClassResolver>,
    activator: Arc<dyn Activator>,
    config: ClientConfig,
    heap: Arc<dyn ForeignHeap>,
}

impl Connector {
    /// Creates a connector with default settings.
    pub fn new(resolver: Arc<dyn ClassResolver>, activator: Arc<dyn Activator>) -> Self {
        Self {
            resolver,
            activator,
            config: ClientConfig::default(),
            heap: task_heap(),
        }
    }

    /// Replaces the client settings.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the heap used for encoded values.
    pub fn with_heap(mut self, heap: Arc<dyn ForeignHeap>) -> Self {
        self.heap = heap;
        self
    }

    /// Returns the client settings.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Lists the data-access servers on `node`.
    pub async fn get_servers(&self, node: &str) -> OpcDaResult<Vec<ServerInfo>> {
        discovery::get_servers(self.resolver.as_ref(), node).await
    }

    /// Connects to `prog_id` on `node`.
    pub async fn connect(&self, prog_id: &str, node: &str) -> OpcDaResult<OpcServer> {
        let clsid = discovery::resolve_clsid(self.resolver.as_ref(), prog_id, node).await?;
        let locality = Locality::for_node(node);
        debug!(prog_id, node, %clsid, %locality, "Activating server");

        let server = self
            .activator
            .activate(clsid, locality, node)
            .await
            .map_err(|e| match e {
                OpcDaError::Connection(ConnectionError::ActivationFailed { .. }) => e,
                other => ConnectionError::ActivationFailed {
                    clsid: clsid.to_string(),
                    node: node.to_string(),
                    message: other.to_string(),
                    code: other.hresult(),
                }
                .into(),
            })?;
        let server = RemoteHandle::adopt(server, Interface::Server.name());

        // Early returns drop the handles acquired so far, which releases them.
        let common = RemoteHandle::adopt(
            server.get()?.query_common().await?,
            Interface::Common.name(),
        );
        let properties = RemoteHandle::adopt(
            server.get()?.query_item_properties().await?,
            Interface::ItemProperties.name(),
        );

        let context = Arc::new(ServerContext {
            server,
            common,
            properties,
            heap: Arc::clone(&self.heap),
            config: self.config.clone(),
        });

        let client_name = self.config.client_name.clone().unwrap_or_default();
        if !client_name.is_empty() {
            if let Err(e) = context.common.get()?.set_client_name(&client_name).await {
                warn!(prog_id, error = %e, "Failed to register client name");
            }
        }
        if let Some(locale_id) = self.config.locale_id {
            if let Err(e) = context.common.get()?.set_locale_id(locale_id).await {
                warn!(prog_id, locale_id, error = %e, "Failed to set session locale");
            }
        }

        info!(prog_id, node, %clsid, %locality, "Connected to server");

        Ok(OpcServer {
            inner: Some(Arc::new(SessionInner {
                prog_id: prog_id.to_string(),
                node: node.to_string(),
                clsid,
                groups: OpcGroups::new(Arc::clone(&context)),
                context,
                client_name: RwLock::new(client_name),
                shutdown: Mutex::new(None),
                shutdown_subscribers: Arc::new(RwLock::new(Vec::new())),
                disconnected: AtomicBool::new(false),
            })),
        })
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Shutdown Subscription
// =============================================================================

type ShutdownSubscribers = Arc<RwLock<Vec<mpsc::Sender<String>>>>;

/// Receives the server's shutdown request and forwards the reason.
struct ShutdownSink {
    subscribers: ShutdownSubscribers,
}

impl ShutdownCallback for ShutdownSink {
    fn shutdown_request(&self, reason: &str) {
        info!(reason, "Server requested shutdown");
        for subscriber in self.subscribers.read().iter() {
            if let Err(e) = subscriber.try_send(reason.to_string()) {
                debug!(error = %e, "Shutdown notification dropped");
            }
        }
    }
}

struct ShutdownAdvise {
    container: RemoteHandle<dyn ConnectionPointContainer>,
    point: RemoteHandle<dyn ConnectionPoint>,
    cookie: u32,
}

// =============================================================================
// OpcServer
// =============================================================================

struct SessionInner {
    prog_id: String,
    node: String,
    clsid: ClassId,
    context: Arc<ServerContext>,
    client_name: RwLock<String>,
    groups: OpcGroups,
    shutdown: Mutex<Option<ShutdownAdvise>>,
    shutdown_subscribers: ShutdownSubscribers,
    disconnected: AtomicBool,
}

/// A session with one data-access server.
///
/// The `Default` value is an uninitialized session: accessors return zero
/// values and operations return a usage error.
#[derive(Clone, Default)]
pub struct OpcServer {
    inner: Option<Arc<SessionInner>>,
}

impl OpcServer {
    /// Connects through `connector`.
    pub async fn connect(connector: &Connector, prog_id: &str, node: &str) -> OpcDaResult<Self> {
        connector.connect(prog_id, node).await
    }

    fn inner(&self) -> OpcDaResult<&Arc<SessionInner>> {
        self.inner
            .as_ref()
            .ok_or_else(|| OpcDaError::uninitialized(SESSION))
    }

    fn context(&self) -> OpcDaResult<&Arc<ServerContext>> {
        self.inner().map(|inner| &inner.context)
    }

    /// Returns `true` for a connected, not yet disconnected session.
    pub fn is_connected(&self) -> bool {
        self.inner
            .as_ref()
            .map(|inner| !inner.disconnected.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Returns the program ID.
    pub fn prog_id(&self) -> &str {
        self.inner.as_ref().map(|i| i.prog_id.as_str()).unwrap_or("")
    }

    /// Returns the node name.
    pub fn node(&self) -> &str {
        self.inner.as_ref().map(|i| i.node.as_str()).unwrap_or("")
    }

    /// Returns the resolved class ID.
    pub fn clsid(&self) -> Option<ClassId> {
        self.inner.as_ref().map(|i| i.clsid)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Reads the server status.
    pub async fn status(&self) -> OpcDaResult<ServerStatus> {
        self.context()?.server.get()?.get_status().await
    }

    /// Server start time.
    pub async fn start_time(&self) -> OpcDaResult<DateTime<Utc>> {
        Ok(self.status().await?.start_time)
    }

    /// Server clock.
    pub async fn current_time(&self) -> OpcDaResult<DateTime<Utc>> {
        Ok(self.status().await?.current_time)
    }

    /// Time of the last data update sent to this client.
    pub async fn last_update_time(&self) -> OpcDaResult<DateTime<Utc>> {
        Ok(self.status().await?.last_update_time)
    }

    /// Server state.
    pub async fn server_state(&self) -> OpcDaResult<ServerState> {
        Ok(self.status().await?.server_state)
    }

    /// Number of groups the server holds for this client.
    pub async fn group_count(&self) -> OpcDaResult<u32> {
        Ok(self.status().await?.group_count)
    }

    /// Server-specific bandwidth figure.
    pub async fn band_width(&self) -> OpcDaResult<u32> {
        Ok(self.status().await?.band_width)
    }

    /// Major version.
    pub async fn major_version(&self) -> OpcDaResult<u16> {
        Ok(self.status().await?.major_version)
    }

    /// Minor version.
    pub async fn minor_version(&self) -> OpcDaResult<u16> {
        Ok(self.status().await?.minor_version)
    }

    /// Build number.
    pub async fn build_number(&self) -> OpcDaResult<u16> {
        Ok(self.status().await?.build_number)
    }

    /// Vendor description.
    pub async fn vendor_info(&self) -> OpcDaResult<String> {
        Ok(self.status().await?.vendor_info)
    }

    // =========================================================================
    // Locale and Identity
    // =========================================================================

    /// Returns the session locale.
    pub async fn locale_id(&self) -> OpcDaResult<u32> {
        self.context()?.common.get()?.get_locale_id().await
    }

    /// Sets the session locale.
    pub async fn set_locale_id(&self, locale_id: u32) -> OpcDaResult<()> {
        self.context()?.common.get()?.set_locale_id(locale_id).await
    }

    /// Lists the locales the server supports.
    pub async fn query_available_locale_ids(&self) -> OpcDaResult<Vec<u32>> {
        self.context()?.common.get()?.query_available_locale_ids().await
    }

    /// Returns the registered client name.
    pub fn client_name(&self) -> String {
        self.inner
            .as_ref()
            .map(|inner| inner.client_name.read().clone())
            .unwrap_or_default()
    }

    /// Registers the client name; the local copy changes only on success.
    pub async fn set_client_name(&self, name: &str) -> OpcDaResult<()> {
        let inner = self.inner()?;
        inner.context.common.get()?.set_client_name(name).await?;
        *inner.client_name.write() = name.to_string();
        Ok(())
    }

    /// Returns the server text for a status code.
    pub async fn error_string(&self, code: i32) -> OpcDaResult<String> {
        self.context()?.common.get()?.get_error_string(code).await
    }

    // =========================================================================
    // Item Properties
    // =========================================================================

    /// Lists the properties of an item.
    pub async fn query_available_properties(
        &self,
        item_id: &str,
    ) -> OpcDaResult<Vec<PropertyDescription>> {
        self.context()?
            .properties
            .get()?
            .query_available_properties(item_id)
            .await
    }

    /// Reads property values of an item; one value and one error slot per ID.
    pub async fn get_item_properties(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcDaResult<(Vec<Variant>, ItemErrors)> {
        self.context()?.item_properties(item_id, property_ids).await
    }

    /// Returns the item IDs through which properties can be read directly.
    pub async fn lookup_item_ids(
        &self,
        item_id: &str,
        property_ids: &[u32],
    ) -> OpcDaResult<(Vec<String>, ItemErrors)> {
        let context = self.context()?;
        let (mut ids, statuses) = context
            .properties
            .get()?
            .lookup_item_ids(item_id, property_ids)
            .await?;
        let mut errors = context.translate(&statuses).await;
        errors.resize(property_ids.len(), None);
        ids.resize(property_ids.len(), String::new());
        for (id, error) in ids.iter_mut().zip(&errors) {
            if error.is_some() {
                id.clear();
            }
        }
        Ok((ids, errors))
    }

    // =========================================================================
    // Groups and Browsing
    // =========================================================================

    /// Returns the group collection.
    pub fn groups(&self) -> OpcGroups {
        self.inner
            .as_ref()
            .map(|inner| inner.groups.clone())
            .unwrap_or_default()
    }

    /// Creates an address-space browser.
    pub async fn create_browser(&self) -> OpcDaResult<OpcBrowser> {
        let browse = self.context()?.server.get()?.query_browse().await?;
        Ok(OpcBrowser::new(RemoteHandle::adopt(
            browse,
            Interface::BrowseAddressSpace.name(),
        )))
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Subscribes `sender` to server shutdown requests.
    ///
    /// The first call advises the server's shutdown connection point.
    pub async fn register_shutdown(&self, sender: mpsc::Sender<String>) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let mut advise = inner.shutdown.lock().await;

        if advise.is_none() {
            let container = RemoteHandle::adopt(
                inner.context.server.get()?.query_connection_points().await?,
                Interface::ConnectionPointContainer.name(),
            );
            let point = RemoteHandle::adopt(
                container
                    .get()?
                    .find_connection_point(Interface::Shutdown)
                    .await?,
                "IConnectionPoint(IOPCShutdown)",
            );
            let sink = ShutdownSink {
                subscribers: Arc::clone(&inner.shutdown_subscribers),
            };
            let cookie = point
                .get()?
                .advise(CallbackSink::Shutdown(Arc::new(sink)))
                .await
                .map_err(|e| match e {
                    OpcDaError::Connection(ConnectionError::RemoteCall { code, .. }) => {
                        ConnectionError::AdviseFailed {
                            point: "IOPCShutdown",
                            code,
                        }
                        .into()
                    }
                    other => other,
                })?;
            info!(prog_id = %inner.prog_id, cookie, "Advised shutdown notifications");
            *advise = Some(ShutdownAdvise {
                container,
                point,
                cookie,
            });
        }

        inner.shutdown_subscribers.write().push(sender);
        Ok(())
    }

    // =========================================================================
    // Disconnect
    // =========================================================================

    /// Ends the session.
    ///
    /// Releases every group and then the session references. Safe to call
    /// more than once and on an uninitialized session. Returns the error of
    /// the shutdown unadvise, if any; release continues regardless.
    pub async fn disconnect(&self) -> OpcDaResult<()> {
        let Some(inner) = self.inner.as_ref() else {
            return Ok(());
        };
        if inner.disconnected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut result = Ok(());
        if let Some(advise) = inner.shutdown.lock().await.take() {
            let unadvised = match advise.point.get() {
                Ok(point) => point.unadvise(advise.cookie).await,
                Err(e) => Err(e),
            };
            if let Err(e) = unadvised {
                warn!(prog_id = %inner.prog_id, error = %e, "Failed to unadvise shutdown");
                result = Err(e);
            }
            release_all(&[&advise.point, &advise.container]);
        }
        inner.shutdown_subscribers.write().clear();

        inner.groups.release().await;
        inner.context.release();

        info!(prog_id = %inner.prog_id, node = %inner.node, "Disconnected from server");
        result
    }
}

impl fmt::Debug for OpcServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcServer")
            .field("prog_id", &self.prog_id())
            .field("node", &self.node())
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uninitialized_session() {
        let server = OpcServer::default();
        assert!(!server.is_connected());
        assert_eq!(server.prog_id(), "");
        assert_eq!(server.client_name(), "");
        assert_eq!(server.groups().count(), 0);

        let err = server.status().await.unwrap_err();
        assert_eq!(err.to_string(), "uninitialized server connection");
        assert!(server.disconnect().await.is_ok());
        assert!(server.disconnect().await.is_ok());
    }
}
