// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Simulated group object and its item and I/O interfaces.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::ledger::{counted, RefToken};
use super::server::{PointCore, SimContainer, SimState};
use super::SimOp;
use crate::codec::{decode_borrowed, Variant, WireVariant};
use crate::error::{OpcDaError, OpcDaResult};
use crate::interface::{
    AsyncIo, ConnectionPointContainer, DataCallback, GroupObject, GroupState, GroupStateChange,
    ItemDefinition, ItemMgt, ItemResult, RawCancelComplete, RawDataChange, RawWriteComplete,
    SyncIo, WireItemState,
};
use crate::types::{hresult, DataSource, Interface, Quality, VarType};

/// Fastest update rate the simulator honours, in milliseconds.
pub(crate) const MIN_UPDATE_RATE_MS: u32 = 10;

pub(crate) fn revise_rate(requested: u32) -> u32 {
    requested.max(MIN_UPDATE_RATE_MS)
}

// =============================================================================
// GroupCore
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct GroupSettings {
    pub(crate) name: String,
    pub(crate) active: bool,
    pub(crate) update_rate: u32,
    pub(crate) client_handle: u32,
    pub(crate) time_bias: i32,
    pub(crate) deadband: f32,
    pub(crate) locale_id: u32,
}

#[derive(Debug, Clone)]
struct SimItem {
    tag: String,
    client_handle: u32,
    active: bool,
    requested_type: VarType,
}

/// One item value prepared for a callback or a read.
struct Sample {
    client_handle: u32,
    value: Variant,
    quality: u16,
    timestamp: chrono::DateTime<chrono::Utc>,
    status: i32,
}

/// State of one simulated group, shared by its interfaces.
pub(crate) struct GroupCore {
    state: Arc<SimState>,
    pub(crate) server_handle: u32,
    settings: RwLock<GroupSettings>,
    items: RwLock<BTreeMap<u32, SimItem>>,
    callbacks: Arc<PointCore>,
    pending: Mutex<HashMap<u32, u32>>,
    next_cancel_id: AtomicU32,
    removed: AtomicBool,
}

impl GroupCore {
    pub(crate) fn new(state: Arc<SimState>, server_handle: u32, settings: GroupSettings) -> Arc<Self> {
        Arc::new(Self {
            state,
            server_handle,
            settings: RwLock::new(settings),
            items: RwLock::new(BTreeMap::new()),
            callbacks: PointCore::new(Interface::DataCallback),
            pending: Mutex::new(HashMap::new()),
            next_cancel_id: AtomicU32::new(0),
            removed: AtomicBool::new(false),
        })
    }

    pub(crate) fn name(&self) -> String {
        self.settings.read().name.clone()
    }

    pub(crate) fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
        self.pending.lock().clear();
    }

    fn ensure_present(&self, method: &'static str) -> OpcDaResult<()> {
        if self.removed.load(Ordering::Acquire) {
            return Err(OpcDaError::remote(method, hresult::RPC_E_DISCONNECTED));
        }
        Ok(())
    }

    fn check_live(&self, op: SimOp) -> OpcDaResult<()> {
        self.ensure_present(op.method())?;
        self.state.faults.check(op)
    }

    fn group_handle(&self) -> u32 {
        self.settings.read().client_handle
    }

    /// Current value of `item`, converted to its requested type.
    fn sample(&self, item: &SimItem, cache: bool) -> Sample {
        let group_active = self.settings.read().active;
        let space = self.state.space.read();
        let Some(tag) = space.get(&item.tag) else {
            return Sample {
                client_handle: item.client_handle,
                value: Variant::Empty,
                quality: Quality::BAD.0,
                timestamp: chrono::Utc::now(),
                status: hresult::OPC_E_UNKNOWNITEMID,
            };
        };
        let quality = if cache && !(group_active && item.active) {
            Quality::BAD_OUT_OF_SERVICE.0
        } else {
            tag.quality
        };
        let (value, status) = match tag.value.coerce_to(item.requested_type) {
            Ok(value) => (value, hresult::S_OK),
            Err(_) => (Variant::Empty, hresult::OPC_E_BADTYPE),
        };
        Sample {
            client_handle: item.client_handle,
            value,
            quality,
            timestamp: tag.timestamp,
            status,
        }
    }

    fn data_change(&self, transaction_id: u32, samples: &[Sample]) -> RawDataChange {
        let mut change = RawDataChange {
            transaction_id,
            group_handle: self.group_handle(),
            master_quality: hresult::S_OK,
            master_error: hresult::S_OK,
            ..RawDataChange::default()
        };
        for sample in samples {
            let (wire, encoded) = if hresult::failed(sample.status) {
                (WireVariant::empty(), sample.status)
            } else {
                self.state.encode_value(&sample.value)
            };
            if hresult::failed(encoded) {
                change.master_error = hresult::S_FALSE;
            }
            if !Quality(sample.quality).is_good() {
                change.master_quality = hresult::S_FALSE;
            }
            change.client_handles.push(sample.client_handle);
            change.values.push(wire);
            change.qualities.push(sample.quality);
            change.timestamps.push(sample.timestamp);
            change.errors.push(encoded);
        }
        change
    }

    /// Sends a data change for every active item bound to `tag`.
    ///
    /// Returns `true` if at least one sink was called.
    pub(crate) fn notify_tag(&self, tag: &str) -> bool {
        if self.removed.load(Ordering::Acquire) || !self.settings.read().active {
            return false;
        }
        let sinks = self.callbacks.data_sinks();
        if sinks.is_empty() {
            return false;
        }
        let samples: Vec<Sample> = {
            let items: Vec<SimItem> = self
                .items
                .read()
                .values()
                .filter(|item| item.active && item.tag == tag)
                .cloned()
                .collect();
            items.iter().map(|item| self.sample(item, false)).collect()
        };
        if samples.is_empty() {
            return false;
        }
        for sink in sinks {
            sink.on_data_change(self.data_change(0, &samples));
        }
        true
    }

    /// Resolves handles; unknown ones yield `OPC_E_INVALIDHANDLE`.
    fn lookup(&self, server_handles: &[u32]) -> Vec<Result<SimItem, i32>> {
        let items = self.items.read();
        server_handles
            .iter()
            .map(|handle| items.get(handle).cloned().ok_or(hresult::OPC_E_INVALIDHANDLE))
            .collect()
    }

    fn readable(&self, item: &SimItem) -> Result<(), i32> {
        match self.state.space.read().get(&item.tag) {
            None => Err(hresult::OPC_E_UNKNOWNITEMID),
            Some(tag) if !tag.access_rights.is_readable() => Err(hresult::OPC_E_BADRIGHTS),
            Some(_) => Ok(()),
        }
    }

    /// Writes one value into the address space.
    fn write_one(&self, item: &SimItem, wire: &WireVariant) -> i32 {
        match decode_borrowed(wire) {
            Ok(value) => self.write_value(item, value),
            Err(_) => hresult::OPC_E_BADTYPE,
        }
    }

    fn write_value(&self, item: &SimItem, value: Variant) -> i32 {
        {
            let mut space = self.state.space.write();
            let Some(tag) = space.get_mut(&item.tag) else {
                return hresult::OPC_E_UNKNOWNITEMID;
            };
            if !tag.access_rights.is_writable() {
                return hresult::OPC_E_BADRIGHTS;
            }
            match value.coerce_to(tag.canonical_type) {
                Ok(value) => {
                    tag.value = value;
                    tag.timestamp = chrono::Utc::now();
                }
                Err(_) => return hresult::OPC_E_BADTYPE,
            }
        }
        self.state.notify(&item.tag);
        hresult::S_OK
    }

    fn require_advised(&self, op: SimOp) -> OpcDaResult<Vec<Arc<dyn DataCallback>>> {
        let sinks = self.callbacks.data_sinks();
        if sinks.is_empty() {
            return Err(OpcDaError::remote(op.method(), hresult::CONNECT_E_NOCONNECTION));
        }
        Ok(sinks)
    }

    fn start_transaction(&self, transaction_id: u32) -> u32 {
        let cancel_id = self.next_cancel_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.pending.lock().insert(cancel_id, transaction_id);
        cancel_id
    }

    /// Runs `complete` after the configured delay unless the transaction was cancelled.
    fn complete_later<F>(self: &Arc<Self>, cancel_id: u32, complete: F)
    where
        F: FnOnce(&GroupCore) + Send + 'static,
    {
        let core = Arc::clone(self);
        let delay = *self.state.async_delay.read();
        tokio::spawn(async move {
            if delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(delay).await;
            }
            if core.pending.lock().remove(&cancel_id).is_some() {
                complete(&core);
            }
        });
    }
}

// =============================================================================
// IOPCGroupStateMgt
// =============================================================================

pub(crate) struct SimGroupObject {
    core: Arc<GroupCore>,
    token: RefToken,
}

impl SimGroupObject {
    pub(crate) fn new(core: Arc<GroupCore>) -> Arc<Self> {
        Arc::new(Self {
            token: core.state.ledger.acquire(Interface::GroupStateMgt.name()),
            core,
        })
    }
}

#[async_trait]
impl GroupObject for SimGroupObject {
    async fn get_state(&self) -> OpcDaResult<GroupState> {
        self.core.ensure_present("IOPCGroupStateMgt::GetState")?;
        let settings = self.core.settings.read();
        Ok(GroupState {
            update_rate: settings.update_rate,
            active: settings.active,
            name: settings.name.clone(),
            time_bias: settings.time_bias,
            deadband: settings.deadband,
            locale_id: settings.locale_id,
            client_handle: settings.client_handle,
            server_handle: self.core.server_handle,
        })
    }

    async fn set_state(&self, change: GroupStateChange) -> OpcDaResult<u32> {
        self.core.check_live(SimOp::SetState)?;
        if let Some(deadband) = change.deadband {
            if !(0.0..=100.0).contains(&deadband) {
                return Err(OpcDaError::remote(SimOp::SetState.method(), hresult::E_INVALIDARG));
            }
        }
        let mut settings = self.core.settings.write();
        if let Some(rate) = change.update_rate {
            settings.update_rate = revise_rate(rate);
        }
        if let Some(active) = change.active {
            settings.active = active;
        }
        if let Some(time_bias) = change.time_bias {
            settings.time_bias = time_bias;
        }
        if let Some(deadband) = change.deadband {
            settings.deadband = deadband;
        }
        if let Some(locale_id) = change.locale_id {
            settings.locale_id = locale_id;
        }
        if let Some(client_handle) = change.client_handle {
            settings.client_handle = client_handle;
        }
        Ok(settings.update_rate)
    }

    async fn set_name(&self, name: &str) -> OpcDaResult<()> {
        self.core.check_live(SimOp::SetName)?;
        if name.is_empty() {
            return Err(OpcDaError::remote(SimOp::SetName.method(), hresult::E_INVALIDARG));
        }
        self.core.settings.write().name = name.to_string();
        Ok(())
    }

    async fn query_sync_io(&self) -> OpcDaResult<Arc<dyn SyncIo>> {
        self.core.check_live(SimOp::QuerySyncIo)?;
        Ok(Arc::new(SimSyncIo {
            token: self.core.state.ledger.acquire(Interface::SyncIo.name()),
            core: Arc::clone(&self.core),
        }))
    }

    async fn query_async_io(&self) -> OpcDaResult<Arc<dyn AsyncIo>> {
        self.core.check_live(SimOp::QueryAsyncIo)?;
        Ok(Arc::new(SimAsyncIo {
            token: self.core.state.ledger.acquire(Interface::AsyncIo2.name()),
            core: Arc::clone(&self.core),
        }))
    }

    async fn query_item_mgt(&self) -> OpcDaResult<Arc<dyn ItemMgt>> {
        self.core.check_live(SimOp::QueryItemMgt)?;
        Ok(Arc::new(SimItemMgt {
            token: self.core.state.ledger.acquire(Interface::ItemMgt.name()),
            core: Arc::clone(&self.core),
        }))
    }

    async fn query_connection_points(&self) -> OpcDaResult<Arc<dyn ConnectionPointContainer>> {
        self.core.check_live(SimOp::QueryConnectionPoints)?;
        Ok(SimContainer::new(&self.core.state, vec![Arc::clone(&self.core.callbacks)]))
    }
}

// =============================================================================
// IOPCItemMgt
// =============================================================================

struct SimItemMgt {
    core: Arc<GroupCore>,
    token: RefToken,
}

impl SimItemMgt {
    fn check(&self, definition: &ItemDefinition) -> Result<ItemResult, i32> {
        if definition.item_id.is_empty() {
            return Err(hresult::OPC_E_INVALIDITEMID);
        }
        let space = self.core.state.space.read();
        let tag = space.get(&definition.item_id).ok_or(hresult::OPC_E_UNKNOWNITEMID)?;
        if tag.value.coerce_to(definition.requested_type).is_err() {
            return Err(hresult::OPC_E_BADTYPE);
        }
        Ok(ItemResult {
            server_handle: 0,
            canonical_type: tag.canonical_type,
            access_rights: tag.access_rights,
        })
    }

    /// Applies `apply` per handle and returns one status each.
    fn per_handle<F>(&self, server_handles: &[u32], mut apply: F) -> Vec<i32>
    where
        F: FnMut(usize, &mut SimItem) -> i32,
    {
        let mut items = self.core.items.write();
        server_handles
            .iter()
            .enumerate()
            .map(|(index, handle)| match items.get_mut(handle) {
                Some(item) => apply(index, item),
                None => hresult::OPC_E_INVALIDHANDLE,
            })
            .collect()
    }
}

#[async_trait]
impl ItemMgt for SimItemMgt {
    async fn add_items(
        &self,
        items: &[ItemDefinition],
    ) -> OpcDaResult<(Vec<ItemResult>, Vec<i32>)> {
        self.core.check_live(SimOp::AddItems)?;
        let mut results = Vec::with_capacity(items.len());
        let mut statuses = Vec::with_capacity(items.len());
        for definition in items {
            match self.check(definition) {
                Ok(mut result) => {
                    let server_handle =
                        self.core.state.next_item_handle.fetch_add(1, Ordering::Relaxed) + 1;
                    result.server_handle = server_handle;
                    self.core.items.write().insert(
                        server_handle,
                        SimItem {
                            tag: definition.item_id.clone(),
                            client_handle: definition.client_handle,
                            active: definition.active,
                            requested_type: definition.requested_type,
                        },
                    );
                    results.push(result);
                    statuses.push(hresult::S_OK);
                }
                Err(code) => {
                    results.push(ItemResult::default());
                    statuses.push(code);
                }
            }
        }
        debug!(group = self.core.server_handle, count = items.len(), "Simulated items added");
        Ok((results, statuses))
    }

    async fn validate_items(
        &self,
        items: &[ItemDefinition],
        _blob_update: bool,
    ) -> OpcDaResult<(Vec<ItemResult>, Vec<i32>)> {
        self.core.check_live(SimOp::AddItems)?;
        Ok(items
            .iter()
            .map(|definition| match self.check(definition) {
                Ok(result) => (result, hresult::S_OK),
                Err(code) => (ItemResult::default(), code),
            })
            .unzip())
    }

    async fn remove_items(&self, server_handles: &[u32]) -> OpcDaResult<Vec<i32>> {
        self.core.check_live(SimOp::RemoveItems)?;
        let mut items = self.core.items.write();
        Ok(server_handles
            .iter()
            .map(|handle| match items.remove(handle) {
                Some(_) => hresult::S_OK,
                None => hresult::OPC_E_INVALIDHANDLE,
            })
            .collect())
    }

    async fn set_active_state(
        &self,
        server_handles: &[u32],
        active: bool,
    ) -> OpcDaResult<Vec<i32>> {
        self.core.check_live(SimOp::SetActiveState)?;
        Ok(self.per_handle(server_handles, |_, item| {
            item.active = active;
            hresult::S_OK
        }))
    }

    async fn set_client_handles(
        &self,
        server_handles: &[u32],
        client_handles: &[u32],
    ) -> OpcDaResult<Vec<i32>> {
        self.core.check_live(SimOp::SetClientHandles)?;
        if server_handles.len() != client_handles.len() {
            return Err(OpcDaError::remote(SimOp::SetClientHandles.method(), hresult::E_INVALIDARG));
        }
        Ok(self.per_handle(server_handles, |index, item| {
            item.client_handle = client_handles[index];
            hresult::S_OK
        }))
    }

    async fn set_datatypes(
        &self,
        server_handles: &[u32],
        requested_types: &[VarType],
    ) -> OpcDaResult<Vec<i32>> {
        self.core.check_live(SimOp::SetDatatypes)?;
        if server_handles.len() != requested_types.len() {
            return Err(OpcDaError::remote(SimOp::SetDatatypes.method(), hresult::E_INVALIDARG));
        }
        let convertible: Vec<bool> = {
            let resolved = self.core.lookup(server_handles);
            let space = self.core.state.space.read();
            resolved
                .iter()
                .zip(requested_types)
                .map(|(item, requested)| {
                    item.as_ref()
                        .ok()
                        .and_then(|item| space.get(&item.tag))
                        .map(|tag| tag.value.coerce_to(*requested).is_ok())
                        .unwrap_or(false)
                })
                .collect()
        };
        Ok(self.per_handle(server_handles, |index, item| {
            if convertible[index] {
                item.requested_type = requested_types[index];
                hresult::S_OK
            } else {
                hresult::OPC_E_BADTYPE
            }
        }))
    }
}

// =============================================================================
// IOPCSyncIO
// =============================================================================

struct SimSyncIo {
    core: Arc<GroupCore>,
    token: RefToken,
}

#[async_trait]
impl SyncIo for SimSyncIo {
    async fn read(
        &self,
        source: DataSource,
        server_handles: &[u32],
    ) -> OpcDaResult<(Vec<WireItemState>, Vec<i32>)> {
        self.core.check_live(SimOp::SyncRead)?;
        let cache = source == DataSource::Cache;
        let mut states = Vec::with_capacity(server_handles.len());
        let mut statuses = Vec::with_capacity(server_handles.len());

        for resolved in self.core.lookup(server_handles) {
            let sample = resolved.and_then(|item| {
                self.core.readable(&item)?;
                Ok(self.core.sample(&item, cache))
            });
            let (state, status) = match sample {
                Ok(sample) if hresult::succeeded(sample.status) => {
                    let (value, status) = self.core.state.encode_value(&sample.value);
                    (
                        WireItemState {
                            client_handle: sample.client_handle,
                            value,
                            quality: sample.quality,
                            timestamp: sample.timestamp,
                        },
                        status,
                    )
                }
                Ok(sample) => (empty_state(sample.client_handle), sample.status),
                Err(code) => (empty_state(0), code),
            };
            states.push(state);
            statuses.push(status);
        }
        Ok((states, statuses))
    }

    async fn write(&self, server_handles: &[u32], values: &[WireVariant]) -> OpcDaResult<Vec<i32>> {
        self.core.check_live(SimOp::SyncWrite)?;
        if server_handles.len() != values.len() {
            return Err(OpcDaError::remote(SimOp::SyncWrite.method(), hresult::E_INVALIDARG));
        }
        Ok(self
            .core
            .lookup(server_handles)
            .into_iter()
            .zip(values)
            .map(|(resolved, wire)| match resolved {
                Ok(item) => self.core.write_one(&item, wire),
                Err(code) => code,
            })
            .collect())
    }
}

fn empty_state(client_handle: u32) -> WireItemState {
    WireItemState {
        client_handle,
        value: WireVariant::empty(),
        quality: Quality::BAD.0,
        timestamp: chrono::DateTime::<chrono::Utc>::default(),
    }
}

// =============================================================================
// IOPCAsyncIO2
// =============================================================================

struct SimAsyncIo {
    core: Arc<GroupCore>,
    token: RefToken,
}

#[async_trait]
impl AsyncIo for SimAsyncIo {
    async fn read(
        &self,
        server_handles: &[u32],
        transaction_id: u32,
    ) -> OpcDaResult<(u32, Vec<i32>)> {
        self.core.check_live(SimOp::AsyncRead)?;
        self.core.require_advised(SimOp::AsyncRead)?;

        let mut accepted = Vec::new();
        let statuses: Vec<i32> = self
            .core
            .lookup(server_handles)
            .into_iter()
            .map(|resolved| match resolved.and_then(|item| self.core.readable(&item).map(|_| item)) {
                Ok(item) => {
                    accepted.push(item);
                    hresult::S_OK
                }
                Err(code) => code,
            })
            .collect();

        let cancel_id = self.core.start_transaction(transaction_id);
        self.core.complete_later(cancel_id, move |core| {
            let samples: Vec<Sample> = accepted.iter().map(|item| core.sample(item, false)).collect();
            for sink in core.callbacks.data_sinks() {
                sink.on_read_complete(core.data_change(transaction_id, &samples));
            }
        });
        Ok((cancel_id, statuses))
    }

    async fn write(
        &self,
        server_handles: &[u32],
        values: &[WireVariant],
        transaction_id: u32,
    ) -> OpcDaResult<(u32, Vec<i32>)> {
        self.core.check_live(SimOp::AsyncWrite)?;
        self.core.require_advised(SimOp::AsyncWrite)?;
        if server_handles.len() != values.len() {
            return Err(OpcDaError::remote(SimOp::AsyncWrite.method(), hresult::E_INVALIDARG));
        }

        // Values are decoded now; the caller frees them when this call returns.
        let mut accepted = Vec::new();
        let statuses: Vec<i32> = self
            .core
            .lookup(server_handles)
            .into_iter()
            .zip(values)
            .map(|(resolved, wire)| match resolved {
                Ok(item) => match decode_borrowed(wire) {
                    Ok(value) => {
                        accepted.push((item, value));
                        hresult::S_OK
                    }
                    Err(_) => hresult::OPC_E_BADTYPE,
                },
                Err(code) => code,
            })
            .collect();

        let cancel_id = self.core.start_transaction(transaction_id);
        self.core.complete_later(cancel_id, move |core| {
            let mut event = RawWriteComplete {
                transaction_id,
                group_handle: core.group_handle(),
                master_error: hresult::S_OK,
                ..RawWriteComplete::default()
            };
            for (item, value) in accepted {
                let status = core.write_value(&item, value);
                if hresult::failed(status) {
                    event.master_error = hresult::S_FALSE;
                }
                event.client_handles.push(item.client_handle);
                event.errors.push(status);
            }
            for sink in core.callbacks.data_sinks() {
                sink.on_write_complete(RawWriteComplete {
                    client_handles: event.client_handles.clone(),
                    errors: event.errors.clone(),
                    ..event
                });
            }
        });
        Ok((cancel_id, statuses))
    }

    async fn refresh(&self, source: DataSource, transaction_id: u32) -> OpcDaResult<u32> {
        self.core.check_live(SimOp::Refresh)?;
        self.core.require_advised(SimOp::Refresh)?;

        let active: Vec<SimItem> = if self.core.settings.read().active {
            self.core
                .items
                .read()
                .values()
                .filter(|item| item.active)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        if active.is_empty() {
            return Err(OpcDaError::remote(SimOp::Refresh.method(), hresult::E_FAIL));
        }

        let cache = source == DataSource::Cache;
        let cancel_id = self.core.start_transaction(transaction_id);
        self.core.complete_later(cancel_id, move |core| {
            let samples: Vec<Sample> = active.iter().map(|item| core.sample(item, cache)).collect();
            for sink in core.callbacks.data_sinks() {
                sink.on_data_change(core.data_change(transaction_id, &samples));
            }
        });
        Ok(cancel_id)
    }

    async fn cancel(&self, cancel_id: u32) -> OpcDaResult<()> {
        self.core.check_live(SimOp::Cancel)?;
        let transaction_id = self
            .core
            .pending
            .lock()
            .remove(&cancel_id)
            .ok_or_else(|| OpcDaError::remote(SimOp::Cancel.method(), hresult::E_FAIL))?;
        let event = RawCancelComplete {
            transaction_id,
            group_handle: self.core.group_handle(),
        };
        for sink in self.core.callbacks.data_sinks() {
            sink.on_cancel_complete(event);
        }
        Ok(())
    }
}

counted!(SimGroupObject, SimItemMgt, SimSyncIo, SimAsyncIo);
