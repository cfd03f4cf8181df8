// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Event subscription of a group.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{GroupInner, OpcGroup};
use crate::error::{ConnectionError, OpcDaError, OpcDaResult};
use crate::events::{
    CancelCompleteEvent, DataCallbackSink, DataChangeEvent, Dispatcher, ReadCompleteEvent,
    WriteCompleteEvent,
};
use crate::handle::{release_all, RemoteHandle};
use crate::interface::{CallbackSink, ConnectionPoint, ConnectionPointContainer};
use crate::types::Interface;

/// The live subscription of an advised group.
pub(crate) struct AdviseState {
    container: RemoteHandle<dyn ConnectionPointContainer>,
    point: RemoteHandle<dyn ConnectionPoint>,
    cookie: u32,
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl AdviseState {
    /// Stops the dispatch task, then unadvises and releases the point.
    pub(crate) async fn teardown(self, group: &str) -> OpcDaResult<()> {
        let AdviseState {
            container,
            point,
            cookie,
            cancel,
            task,
        } = self;

        let _ = cancel.send(());
        if let Err(e) = task.await {
            warn!(group, error = %e, "Event dispatch task ended abnormally");
        }

        let result = match point.get() {
            Ok(point) => point.unadvise(cookie).await,
            Err(e) => Err(e),
        };
        release_all(&[&point, &container]);
        debug!(group, cookie, "Unadvised group");
        result
    }
}

fn advise_error(e: OpcDaError) -> OpcDaError {
    match e {
        OpcDaError::Connection(ConnectionError::RemoteCall { code, .. }) => {
            ConnectionError::AdviseFailed {
                point: "IOPCDataCallback",
                code,
            }
            .into()
        }
        other => other,
    }
}

impl GroupInner {
    async fn ensure_advised(&self) -> OpcDaResult<()> {
        let mut advise = self.advise.lock().await;
        if advise.is_some() {
            return Ok(());
        }
        let name = self.local.read().name.clone();

        let container = RemoteHandle::adopt(
            self.state.get()?.query_connection_points().await?,
            Interface::ConnectionPointContainer.name(),
        );
        let point = RemoteHandle::adopt(
            container
                .get()?
                .find_connection_point(Interface::DataCallback)
                .await?,
            "IConnectionPoint(IOPCDataCallback)",
        );

        let (sink, raw) = DataCallbackSink::channel(self.queue_capacity, Arc::clone(&self.stats));
        let cookie = point
            .get()?
            .advise(CallbackSink::Data(Arc::new(sink)))
            .await
            .map_err(advise_error)?;

        let (cancel, cancelled) = oneshot::channel();
        let task = Dispatcher {
            group: name.clone(),
            context: Arc::clone(&self.context),
            subscribers: Arc::clone(&self.subscribers),
            stats: Arc::clone(&self.stats),
            items: self.items.clone(),
        }
        .spawn(raw, cancelled);

        info!(group = %name, cookie, capacity = self.queue_capacity, "Advised group");
        *advise = Some(AdviseState {
            container,
            point,
            cookie,
            cancel,
            task,
        });
        Ok(())
    }
}

impl OpcGroup {
    /// Subscribes to data changes (subscription updates and refreshes).
    ///
    /// The first registration of any kind advises the group.
    pub async fn register_data_change(
        &self,
        sender: mpsc::Sender<DataChangeEvent>,
    ) -> OpcDaResult<()> {
        let inner = self.inner()?;
        inner.ensure_advised().await?;
        inner.subscribers.data_change.write().push(sender);
        Ok(())
    }

    /// Subscribes to asynchronous read results.
    pub async fn register_read_complete(
        &self,
        sender: mpsc::Sender<ReadCompleteEvent>,
    ) -> OpcDaResult<()> {
        let inner = self.inner()?;
        inner.ensure_advised().await?;
        inner.subscribers.read_complete.write().push(sender);
        Ok(())
    }

    /// Subscribes to asynchronous write results.
    pub async fn register_write_complete(
        &self,
        sender: mpsc::Sender<WriteCompleteEvent>,
    ) -> OpcDaResult<()> {
        let inner = self.inner()?;
        inner.ensure_advised().await?;
        inner.subscribers.write_complete.write().push(sender);
        Ok(())
    }

    /// Subscribes to cancel results.
    pub async fn register_cancel_complete(
        &self,
        sender: mpsc::Sender<CancelCompleteEvent>,
    ) -> OpcDaResult<()> {
        let inner = self.inner()?;
        inner.ensure_advised().await?;
        inner.subscribers.cancel_complete.write().push(sender);
        Ok(())
    }

    /// Returns `true` once the group has an event subscription.
    pub async fn is_advised(&self) -> bool {
        match self.inner() {
            Ok(inner) => inner.advise.lock().await.is_some(),
            Err(_) => false,
        }
    }
}
