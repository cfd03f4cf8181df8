// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Synchronous and asynchronous I/O on a group.

use tracing::debug;

use super::OpcGroup;
use crate::codec::{decode, encode_all, Variant};
use crate::error::{ItemErrors, OpcDaResult, OpcDaErrorContext, UsageError};
use crate::interface::WireItemState;
use crate::types::{DataSource, ItemState};

fn check_lengths(handles: usize, values: usize) -> OpcDaResult<()> {
    if handles != values {
        return Err(UsageError::LengthMismatch {
            expected: handles,
            actual: values,
        }
        .into());
    }
    Ok(())
}

impl OpcGroup {
    // =========================================================================
    // Synchronous I/O
    // =========================================================================

    /// Reads items in one batch.
    ///
    /// Returns one state and one error slot per handle. A value that fails to
    /// decode is reported as a conversion error at its index.
    pub async fn sync_read(
        &self,
        source: DataSource,
        server_handles: &[u32],
    ) -> OpcDaResult<(Vec<ItemState>, ItemErrors)> {
        let inner = self.inner()?;
        let name = inner.local.read().name.clone();
        let (states, statuses) = inner
            .sync_io
            .get()?
            .read(source, server_handles)
            .await
            .with_group(&name)?;

        let mut errors = inner.context.translate(&statuses).await;
        errors.resize(server_handles.len().max(states.len()), None);

        let mut decoded = Vec::with_capacity(states.len());
        for (index, state) in states.into_iter().enumerate() {
            let WireItemState {
                client_handle,
                value,
                quality,
                timestamp,
            } = state;
            let value = match decode(value) {
                Ok(value) => {
                    if errors[index].is_none() {
                        inner
                            .items
                            .apply_update(client_handle, &value, quality, timestamp);
                    }
                    value
                }
                Err(e) => {
                    errors[index].get_or_insert(e.into());
                    Variant::Empty
                }
            };
            decoded.push(ItemState {
                client_handle,
                value,
                quality,
                timestamp,
            });
        }

        debug!(group = %name, %source, count = server_handles.len(), "Synchronous read");
        Ok((decoded, errors))
    }

    /// Writes items in one batch; one error slot per handle.
    ///
    /// Every value is encoded before the call. An encoding failure aborts the
    /// whole batch without contacting the server.
    pub async fn sync_write(
        &self,
        server_handles: &[u32],
        values: &[Variant],
    ) -> OpcDaResult<ItemErrors> {
        let inner = self.inner()?;
        check_lengths(server_handles.len(), values.len())?;
        let name = inner.local.read().name.clone();

        let wire = encode_all(values, &inner.context.heap)?;
        let outcome = inner.sync_io.get()?.write(server_handles, &wire).await;
        drop(wire);
        let statuses = outcome.with_group(&name)?;

        let mut errors = inner.context.translate(&statuses).await;
        errors.resize(server_handles.len(), None);
        debug!(group = %name, count = server_handles.len(), "Synchronous write");
        Ok(errors)
    }

    // =========================================================================
    // Asynchronous I/O
    // =========================================================================

    /// Starts a read; results arrive as read-complete events.
    ///
    /// Returns the cancel ID and one error slot per handle.
    pub async fn async_read(
        &self,
        server_handles: &[u32],
        transaction_id: u32,
    ) -> OpcDaResult<(u32, ItemErrors)> {
        let inner = self.inner()?;
        let name = inner.local.read().name.clone();
        let (cancel_id, statuses) = inner
            .async_io
            .get()?
            .read(server_handles, transaction_id)
            .await
            .with_group(&name)?;
        let mut errors = inner.context.translate(&statuses).await;
        errors.resize(server_handles.len(), None);
        debug!(group = %name, transaction_id, cancel_id, "Asynchronous read started");
        Ok((cancel_id, errors))
    }

    /// Starts a write; results arrive as write-complete events.
    pub async fn async_write(
        &self,
        server_handles: &[u32],
        values: &[Variant],
        transaction_id: u32,
    ) -> OpcDaResult<(u32, ItemErrors)> {
        let inner = self.inner()?;
        check_lengths(server_handles.len(), values.len())?;
        let name = inner.local.read().name.clone();

        let wire = encode_all(values, &inner.context.heap)?;
        let outcome = inner
            .async_io
            .get()?
            .write(server_handles, &wire, transaction_id)
            .await;
        drop(wire);
        let (cancel_id, statuses) = outcome.with_group(&name)?;

        let mut errors = inner.context.translate(&statuses).await;
        errors.resize(server_handles.len(), None);
        debug!(group = %name, transaction_id, cancel_id, "Asynchronous write started");
        Ok((cancel_id, errors))
    }

    /// Requests a data-change event for every active item.
    pub async fn async_refresh(&self, source: DataSource, transaction_id: u32) -> OpcDaResult<u32> {
        let inner = self.inner()?;
        let name = inner.local.read().name.clone();
        let cancel_id = inner
            .async_io
            .get()?
            .refresh(source, transaction_id)
            .await
            .with_group(&name)?;
        debug!(group = %name, %source, transaction_id, cancel_id, "Refresh started");
        Ok(cancel_id)
    }

    /// Cancels an outstanding asynchronous transaction.
    pub async fn async_cancel(&self, cancel_id: u32) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let name = inner.local.read().name.clone();
        inner
            .async_io
            .get()?
            .cancel(cancel_id)
            .await
            .with_group(&name)
    }
}
