// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Foreign heap accounting.
//!
//! Text and array payloads cross the remote boundary as allocations owned by
//! a shared task allocator: the producer allocates, the consumer frees after
//! copying. [`ForeignHeap`] models that allocator so every allocation can be
//! paired with exactly one free and leaks or double frees become observable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

// =============================================================================
// Types
// =============================================================================

/// Identifies one live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId(pub u64);

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc-{}", self.0)
    }
}

/// What an allocation holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// A length-prefixed string.
    String,
    /// An array descriptor and its element buffer.
    Array,
}

/// The allocator shared by both sides of the remote boundary.
pub trait ForeignHeap: Send + Sync + fmt::Debug {
    /// Records a new allocation of `bytes` bytes.
    fn allocate(&self, kind: AllocKind, bytes: usize) -> AllocationId;

    /// Frees an allocation. Returns `false` if `id` is not live.
    fn free(&self, id: AllocationId) -> bool;

    /// Returns a statistics snapshot.
    fn stats(&self) -> HeapStatsSnapshot;
}

// =============================================================================
// TrackingHeap
// =============================================================================

/// A [`ForeignHeap`] that tracks every live allocation.
#[derive(Debug, Default)]
pub struct TrackingHeap {
    live: DashMap<u64, (AllocKind, usize)>,
    next_id: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
    invalid_frees: AtomicU64,
}

impl TrackingHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty heap behind a trait object.
    pub fn shared() -> Arc<dyn ForeignHeap> {
        Arc::new(Self::new())
    }
}

impl ForeignHeap for TrackingHeap {
    fn allocate(&self, kind: AllocKind, bytes: usize) -> AllocationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.live.insert(id, (kind, bytes));
        self.allocations.fetch_add(1, Ordering::Relaxed);
        AllocationId(id)
    }

    fn free(&self, id: AllocationId) -> bool {
        if self.live.remove(&id.0).is_some() {
            self.frees.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.invalid_frees.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(allocation = %id, "Free of an allocation that is not live");
            false
        }
    }

    fn stats(&self) -> HeapStatsSnapshot {
        HeapStatsSnapshot {
            live_allocations: self.live.len() as u64,
            live_bytes: self.live.iter().map(|entry| entry.value().1 as u64).sum(),
            allocations: self.allocations.load(Ordering::Relaxed),
            frees: self.frees.load(Ordering::Relaxed),
            invalid_frees: self.invalid_frees.load(Ordering::Relaxed),
        }
    }
}

/// Heap counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStatsSnapshot {
    /// Allocations not yet freed.
    pub live_allocations: u64,
    /// Bytes held by live allocations.
    pub live_bytes: u64,
    /// Total allocations.
    pub allocations: u64,
    /// Total successful frees.
    pub frees: u64,
    /// Frees of unknown or already-freed allocations.
    pub invalid_frees: u64,
}

// =============================================================================
// Process Task Heap
// =============================================================================

static TASK_HEAP: Lazy<Arc<dyn ForeignHeap>> = Lazy::new(TrackingHeap::shared);

/// Returns the process-wide task allocator.
pub fn task_heap() -> Arc<dyn ForeignHeap> {
    Arc::clone(&TASK_HEAP)
}

// =============================================================================
// Tests
// =============================================================================
