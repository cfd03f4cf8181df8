// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Group event delivery.
//!
//! The server calls one raw sink per advised group. The sink never blocks:
//! it pushes into four bounded internal queues and drops on overflow. A
//! single dispatch task per group drains those queues, translates status
//! codes and decodes values, then fans each event out to every subscriber.
//!
//! ```text
//!   server thread                      dispatch task (tokio)
//! ┌───────────────┐ try_send  ┌─────────────────────────────────┐ try_send  ┌──────────────┐
//! │ DataCallback  │ ────────▶ │ select! {                       │ ────────▶ │ subscriber 1 │
//! │   Sink        │  (cap N)  │   cancel      => stop           │           ├──────────────┤
//! │  data_change  │           │   data_change => decode, cache  │ ────────▶ │ subscriber 2 │
//! │  read_done    │           │   read_done   => decode         │           └──────────────┘
//! │  write_done   │           │   write_done  => translate      │   full or closed:
//! │  cancel_done  │           │   cancel_done => forward        │   dropped for that
//! └───────────────┘           │ }                               │   subscriber only
//!                             └─────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{decode, Variant};
use crate::error::OpcDaError;
use crate::interface::{
    DataCallback, RawCancelComplete, RawDataChange, RawReadComplete, RawWriteComplete,
};
use crate::item::OpcItems;
use crate::session::ServerContext;

// =============================================================================
// Events
// =============================================================================

/// Kind of group event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Subscription update or refresh.
    DataChange,
    /// Asynchronous read result.
    ReadComplete,
    /// Asynchronous write result.
    WriteComplete,
    /// Cancel result.
    CancelComplete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataChange => write!(f, "data_change"),
            Self::ReadComplete => write!(f, "read_complete"),
            Self::WriteComplete => write!(f, "write_complete"),
            Self::CancelComplete => write!(f, "cancel_complete"),
        }
    }
}

/// One item of a value event.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemValue {
    /// Client handle of the item.
    pub client_handle: u32,
    /// Decoded value; `Empty` when `error` is set.
    pub value: Variant,
    /// Quality bitfield.
    pub quality: u16,
    /// Source timestamp.
    pub timestamp: DateTime<Utc>,
    /// Per-item failure.
    pub error: Option<OpcDaError>,
}

/// A data change (subscription update or refresh result).
#[derive(Debug, Clone, PartialEq)]
pub struct DataChangeEvent {
    /// Transaction ID; 0 for subscription updates.
    pub transaction_id: u32,
    /// Client handle of the group.
    pub group_handle: u32,
    /// Worst quality in the batch.
    pub master_quality: i32,
    /// Translated batch status.
    pub master_error: Option<OpcDaError>,
    /// Items in the batch.
    pub items: Vec<ItemValue>,
}

/// An asynchronous read result.
pub type ReadCompleteEvent = DataChangeEvent;

/// One item of a write completion.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// Client handle of the item.
    pub client_handle: u32,
    /// Per-item failure.
    pub error: Option<OpcDaError>,
}

/// An asynchronous write result.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteCompleteEvent {
    /// Transaction ID.
    pub transaction_id: u32,
    /// Client handle of the group.
    pub group_handle: u32,
    /// Translated batch status.
    pub master_error: Option<OpcDaError>,
    /// Items in the batch.
    pub items: Vec<WriteOutcome>,
}

/// A cancel result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelCompleteEvent {
    /// Transaction ID.
    pub transaction_id: u32,
    /// Client handle of the group.
    pub group_handle: u32,
}

// =============================================================================
// DispatchStats
// =============================================================================

/// Delivery counters of one group.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    queue_dropped: AtomicU64,
    processed: AtomicU64,
    delivered: AtomicU64,
    dropped_full: AtomicU64,
    dropped_closed: AtomicU64,
}

impl DispatchStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
        }
    }
}

/// Delivery counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    /// Raw events accepted into an internal queue.
    pub received: u64,
    /// Raw events dropped because an internal queue was full.
    pub queue_dropped: u64,
    /// Events handled by the dispatch task.
    pub processed: u64,
    /// Subscriber deliveries.
    pub delivered: u64,
    /// Deliveries dropped on a full subscriber queue.
    pub dropped_full: u64,
    /// Deliveries dropped on a closed subscriber queue.
    pub dropped_closed: u64,
}

// =============================================================================
// Subscribers
// =============================================================================

/// Registered subscriber queues of one group.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    pub(crate) data_change: RwLock<Vec<mpsc::Sender<DataChangeEvent>>>,
    pub(crate) read_complete: RwLock<Vec<mpsc::Sender<ReadCompleteEvent>>>,
    pub(crate) write_complete: RwLock<Vec<mpsc::Sender<WriteCompleteEvent>>>,
    pub(crate) cancel_complete: RwLock<Vec<mpsc::Sender<CancelCompleteEvent>>>,
}

fn fan_out<E: Clone>(
    subscribers: &RwLock<Vec<mpsc::Sender<E>>>,
    event: E,
    kind: EventKind,
    stats: &DispatchStats,
) {
    let mut closed = false;
    {
        let list = subscribers.read();
        for (index, subscriber) in list.iter().enumerate() {
            match subscriber.try_send(event.clone()) {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    stats.dropped_full.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(%kind, subscriber = index, "Subscriber queue full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    stats.dropped_closed.fetch_add(1, Ordering::Relaxed);
                    closed = true;
                    tracing::debug!(%kind, subscriber = index, "Subscriber queue closed, event dropped");
                }
            }
        }
    }
    if closed {
        subscribers.write().retain(|subscriber| !subscriber.is_closed());
    }
}

// =============================================================================
// DataCallbackSink
// =============================================================================

/// The raw receiver handed to the server's data-callback connection point.
#[derive(Debug)]
pub(crate) struct DataCallbackSink {
    data_change: mpsc::Sender<RawDataChange>,
    read_complete: mpsc::Sender<RawReadComplete>,
    write_complete: mpsc::Sender<RawWriteComplete>,
    cancel_complete: mpsc::Sender<RawCancelComplete>,
    stats: Arc<DispatchStats>,
}

/// Receiving ends of the internal queues.
#[derive(Debug)]
pub(crate) struct RawReceivers {
    data_change: mpsc::Receiver<RawDataChange>,
    read_complete: mpsc::Receiver<RawReadComplete>,
    write_complete: mpsc::Receiver<RawWriteComplete>,
    cancel_complete: mpsc::Receiver<RawCancelComplete>,
    /// Queue polled first on the next call.
    turn: usize,
}

/// One event taken from the internal queues.
#[derive(Debug)]
pub(crate) enum RawEvent {
    DataChange(RawDataChange),
    ReadComplete(RawReadComplete),
    WriteComplete(RawWriteComplete),
    CancelComplete(RawCancelComplete),
}

impl RawEvent {
    fn kind(&self) -> EventKind {
        match self {
            Self::DataChange(_) => EventKind::DataChange,
            Self::ReadComplete(_) => EventKind::ReadComplete,
            Self::WriteComplete(_) => EventKind::WriteComplete,
            Self::CancelComplete(_) => EventKind::CancelComplete,
        }
    }
}

impl RawReceivers {
    const QUEUES: usize = 4;

    fn try_queue(&mut self, queue: usize) -> Option<RawEvent> {
        match queue {
            0 => self.data_change.try_recv().ok().map(RawEvent::DataChange),
            1 => self.read_complete.try_recv().ok().map(RawEvent::ReadComplete),
            2 => self.write_complete.try_recv().ok().map(RawEvent::WriteComplete),
            _ => self.cancel_complete.try_recv().ok().map(RawEvent::CancelComplete),
        }
    }

    /// Takes the next event, or `None` once `cancel` fires or is dropped.
    ///
    /// Queued events are taken round-robin so a busy queue cannot starve
    /// the others. Cancellation is checked before any queue.
    pub(crate) async fn next(&mut self, cancel: &mut oneshot::Receiver<()>) -> Option<RawEvent> {
        if !matches!(cancel.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            return None;
        }
        for offset in 0..Self::QUEUES {
            let queue = (self.turn + offset) % Self::QUEUES;
            if let Some(event) = self.try_queue(queue) {
                self.turn = (queue + 1) % Self::QUEUES;
                return Some(event);
            }
        }

        tokio::select! {
            biased;

            _ = &mut *cancel => None,
            Some(event) = self.data_change.recv() => Some(RawEvent::DataChange(event)),
            Some(event) = self.read_complete.recv() => Some(RawEvent::ReadComplete(event)),
            Some(event) = self.write_complete.recv() => Some(RawEvent::WriteComplete(event)),
            Some(event) = self.cancel_complete.recv() => Some(RawEvent::CancelComplete(event)),
            else => {
                // Every sender is gone; only cancellation remains.
                let _ = (&mut *cancel).await;
                None
            }
        }
    }
}

impl DataCallbackSink {
    /// Creates a sink wired to four queues of `capacity` each.
    pub(crate) fn channel(capacity: usize, stats: Arc<DispatchStats>) -> (Self, RawReceivers) {
        let (data_tx, data_rx) = mpsc::channel(capacity);
        let (read_tx, read_rx) = mpsc::channel(capacity);
        let (write_tx, write_rx) = mpsc::channel(capacity);
        let (cancel_tx, cancel_rx) = mpsc::channel(capacity);
        (
            Self {
                data_change: data_tx,
                read_complete: read_tx,
                write_complete: write_tx,
                cancel_complete: cancel_tx,
                stats,
            },
            RawReceivers {
                data_change: data_rx,
                read_complete: read_rx,
                write_complete: write_rx,
                cancel_complete: cancel_rx,
                turn: 0,
            },
        )
    }

    fn push<E>(&self, sender: &mpsc::Sender<E>, event: E, kind: EventKind) {
        match sender.try_send(event) {
            Ok(()) => {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.queue_dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                };
                tracing::warn!(%kind, reason, "Internal event queue rejected event");
            }
        }
    }
}

impl DataCallback for DataCallbackSink {
    fn on_data_change(&self, event: RawDataChange) {
        self.push(&self.data_change, event, EventKind::DataChange);
    }

    fn on_read_complete(&self, event: RawReadComplete) {
        self.push(&self.read_complete, event, EventKind::ReadComplete);
    }

    fn on_write_complete(&self, event: RawWriteComplete) {
        self.push(&self.write_complete, event, EventKind::WriteComplete);
    }

    fn on_cancel_complete(&self, event: RawCancelComplete) {
        self.push(&self.cancel_complete, event, EventKind::CancelComplete);
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Translates raw events and delivers them to subscribers.
pub(crate) struct Dispatcher {
    pub(crate) group: String,
    pub(crate) context: Arc<ServerContext>,
    pub(crate) subscribers: Arc<Subscribers>,
    pub(crate) stats: Arc<DispatchStats>,
    pub(crate) items: OpcItems,
}

impl Dispatcher {
    /// Spawns the dispatch task. It runs until `cancel` fires or is dropped.
    pub(crate) fn spawn(
        self,
        mut raw: RawReceivers,
        mut cancel: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(group = %self.group, "Event dispatch started");
            while let Some(event) = raw.next(&mut cancel).await {
                tracing::trace!(group = %self.group, kind = %event.kind(), "Dispatching event");
                match event {
                    RawEvent::DataChange(event) => {
                        self.data_change(event, EventKind::DataChange).await;
                    }
                    RawEvent::ReadComplete(event) => {
                        self.data_change(event, EventKind::ReadComplete).await;
                    }
                    RawEvent::WriteComplete(event) => self.write_complete(event).await,
                    RawEvent::CancelComplete(event) => self.cancel_complete(event),
                }
            }
            tracing::debug!(group = %self.group, "Event dispatch stopped");
        })
    }

    async fn master_error(&self, code: i32) -> Option<OpcDaError> {
        if code < 0 {
            Some(self.context.error_for(code).await)
        } else {
            None
        }
    }

    async fn data_change(&self, raw: RawDataChange, kind: EventKind) {
        let master_error = self.master_error(raw.master_error).await;
        let statuses = self.context.translate(&raw.errors).await;

        let mut values = raw.values.into_iter();
        let mut statuses = statuses.into_iter();
        let mut items = Vec::with_capacity(raw.client_handles.len());

        for (index, client_handle) in raw.client_handles.iter().copied().enumerate() {
            let mut error = statuses.next().flatten();
            let value = match values.next().map(decode) {
                Some(Ok(value)) => value,
                Some(Err(e)) => {
                    error.get_or_insert(e.into());
                    Variant::Empty
                }
                None => Variant::Empty,
            };
            let quality = raw.qualities.get(index).copied().unwrap_or_default();
            let timestamp = raw.timestamps.get(index).copied().unwrap_or_default();

            if kind == EventKind::DataChange && error.is_none() {
                self.items
                    .apply_update(client_handle, &value, quality, timestamp);
            }

            items.push(ItemValue {
                client_handle,
                value,
                quality,
                timestamp,
                error,
            });
        }

        let event = DataChangeEvent {
            transaction_id: raw.transaction_id,
            group_handle: raw.group_handle,
            master_quality: raw.master_quality,
            master_error,
            items,
        };
        self.stats.processed.fetch_add(1, Ordering::Relaxed);

        let subscribers = match kind {
            EventKind::ReadComplete => &self.subscribers.read_complete,
            _ => &self.subscribers.data_change,
        };
        fan_out(subscribers, event, kind, &self.stats);
    }

    async fn write_complete(&self, raw: RawWriteComplete) {
        let master_error = self.master_error(raw.master_error).await;
        let mut statuses = self.context.translate(&raw.errors).await.into_iter();

        let items = raw
            .client_handles
            .iter()
            .map(|&client_handle| WriteOutcome {
                client_handle,
                error: statuses.next().flatten(),
            })
            .collect();

        let event = WriteCompleteEvent {
            transaction_id: raw.transaction_id,
            group_handle: raw.group_handle,
            master_error,
            items,
        };
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        fan_out(
            &self.subscribers.write_complete,
            event,
            EventKind::WriteComplete,
            &self.stats,
        );
    }

    fn cancel_complete(&self, raw: RawCancelComplete) {
        let event = CancelCompleteEvent {
            transaction_id: raw.transaction_id,
            group_handle: raw.group_handle,
        };
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        fan_out(
            &self.subscribers.cancel_complete,
            event,
            EventKind::CancelComplete,
            &self.stats,
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_drops_when_queue_full() {
        let stats = Arc::new(DispatchStats::new());
        let (sink, _receivers) = DataCallbackSink::channel(2, Arc::clone(&stats));

        for _ in 0..5 {
            sink.on_cancel_complete(RawCancelComplete::default());
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.queue_dropped, 3);
    }

    #[test]
    fn test_fan_out_drops_per_subscriber() {
        let stats = DispatchStats::new();
        let subscribers: RwLock<Vec<mpsc::Sender<CancelCompleteEvent>>> = RwLock::default();
        let (small_tx, mut small_rx) = mpsc::channel(1);
        let (large_tx, mut large_rx) = mpsc::channel(8);
        let (closed_tx, closed_rx) = mpsc::channel(8);
        drop(closed_rx);
        subscribers.write().extend([small_tx, large_tx, closed_tx]);

        let event = CancelCompleteEvent {
            transaction_id: 7,
            group_handle: 1,
        };
        for _ in 0..3 {
            fan_out(&subscribers, event, EventKind::CancelComplete, &stats);
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.delivered, 4);
        assert_eq!(snapshot.dropped_full, 2);
        assert_eq!(snapshot.dropped_closed, 1);
        assert_eq!(subscribers.read().len(), 2);

        assert_eq!(small_rx.try_recv().unwrap(), event);
        assert!(small_rx.try_recv().is_err());
        let mut count = 0;
        while large_rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_busy_data_change_queue_does_not_starve_completions() {
        let stats = Arc::new(DispatchStats::new());
        let (sink, mut raw) = DataCallbackSink::channel(16, Arc::clone(&stats));
        let (_cancel_tx, mut cancel) = oneshot::channel();

        for _ in 0..10 {
            sink.on_data_change(RawDataChange::default());
        }
        sink.on_write_complete(RawWriteComplete::default());
        sink.on_cancel_complete(RawCancelComplete::default());

        let mut kinds = Vec::new();
        for _ in 0..3 {
            kinds.push(raw.next(&mut cancel).await.unwrap().kind());
        }
        assert_eq!(
            kinds,
            vec![
                EventKind::DataChange,
                EventKind::WriteComplete,
                EventKind::CancelComplete
            ]
        );
        assert_eq!(raw.next(&mut cancel).await.unwrap().kind(), EventKind::DataChange);
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_queued_events() {
        let stats = Arc::new(DispatchStats::new());
        let (sink, mut raw) = DataCallbackSink::channel(4, Arc::clone(&stats));
        let (cancel_tx, mut cancel) = oneshot::channel();

        sink.on_data_change(RawDataChange::default());
        cancel_tx.send(()).unwrap();

        assert!(raw.next(&mut cancel).await.is_none());
    }

    #[tokio::test]
    async fn test_next_waits_for_an_event() {
        let stats = Arc::new(DispatchStats::new());
        let (sink, mut raw) = DataCallbackSink::channel(4, Arc::clone(&stats));
        let (cancel_tx, mut cancel) = oneshot::channel();

        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            sink.on_read_complete(RawReadComplete::default());
            sink
        });
        assert_eq!(raw.next(&mut cancel).await.unwrap().kind(), EventKind::ReadComplete);

        let _sink = producer.await.unwrap();
        drop(cancel_tx);
        assert!(raw.next(&mut cancel).await.is_none());
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(EventKind::DataChange.to_string(), "data_change");
        assert_eq!(EventKind::CancelComplete.to_string(), "cancel_complete");
    }
}
