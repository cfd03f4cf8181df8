// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Reference accounting for simulated objects.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Counts of every reference handed out by the simulator.
#[derive(Debug, Default)]
pub struct RefLedger {
    counts: DashMap<u64, (&'static str, Arc<AtomicI64>)>,
    next_id: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    over_released: AtomicU64,
}

impl RefLedger {
    /// Creates an empty ledger.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new object reference holding one count.
    pub(crate) fn acquire(self: &Arc<Self>, interface: &'static str) -> RefToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let count = Arc::new(AtomicI64::new(1));
        self.counts.insert(id, (interface, Arc::clone(&count)));
        self.acquired.fetch_add(1, Ordering::Relaxed);
        RefToken {
            ledger: Arc::clone(self),
            count,
        }
    }

    /// Number of counts not yet released.
    pub fn outstanding(&self) -> i64 {
        self.counts
            .iter()
            .map(|entry| entry.value().1.load(Ordering::Acquire).max(0))
            .sum()
    }

    /// Outstanding counts of one interface.
    pub fn outstanding_of(&self, interface: &str) -> i64 {
        self.counts
            .iter()
            .filter(|entry| entry.value().0 == interface)
            .map(|entry| entry.value().1.load(Ordering::Acquire).max(0))
            .sum()
    }

    /// Returns a counter snapshot.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            objects: self.counts.len() as u64,
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            over_released: self.over_released.load(Ordering::Relaxed),
            outstanding: self.outstanding(),
        }
    }
}

/// Ledger counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Objects ever handed out.
    pub objects: u64,
    /// Counts taken (initial references and `add_ref`).
    pub acquired: u64,
    /// Counts given back.
    pub released: u64,
    /// Releases of an object whose count was already zero.
    pub over_released: u64,
    /// Counts still held.
    pub outstanding: i64,
}

/// The count of one simulated object reference.
#[derive(Debug)]
pub(crate) struct RefToken {
    ledger: Arc<RefLedger>,
    count: Arc<AtomicI64>,
}

impl RefToken {
    pub(crate) fn add_ref(&self) -> u32 {
        self.ledger.acquired.fetch_add(1, Ordering::Relaxed);
        (self.count.fetch_add(1, Ordering::AcqRel) + 1).max(0) as u32
    }

    /// Counts currently held.
    pub(crate) fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }

    pub(crate) fn release(&self) -> u32 {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        if previous <= 0 {
            self.count.fetch_add(1, Ordering::AcqRel);
            self.ledger.over_released.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Release of a simulated object with no outstanding references");
            return 0;
        }
        self.ledger.released.fetch_add(1, Ordering::Relaxed);
        (previous - 1) as u32
    }
}

/// Implements `Unknown` for a type with a `token: RefToken` field.
macro_rules! counted {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl crate::interface::Unknown for $ty {
                fn add_ref(&self) -> u32 {
                    self.token.add_ref()
                }

                fn release(&self) -> u32 {
                    self.token.release()
                }
            }
        )+
    };
}

pub(crate) use counted;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_over_release() {
        let ledger = RefLedger::new();
        let token = ledger.acquire("IOPCServer");
        assert_eq!(ledger.outstanding(), 1);

        assert_eq!(token.add_ref(), 2);
        assert_eq!(token.release(), 1);
        assert_eq!(token.release(), 0);
        assert_eq!(token.release(), 0);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.outstanding, 0);
        assert_eq!(snapshot.acquired, 2);
        assert_eq!(snapshot.released, 2);
        assert_eq!(snapshot.over_released, 1);
        assert_eq!(ledger.outstanding_of("IOPCServer"), 0);
    }
}
