// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Owned references to remote interfaces.
//!
//! A [`RemoteHandle`] adopts the reference count a remote call handed to the
//! client and gives it back exactly once: on the first [`release`] or, if
//! that never happens, on drop.
//!
//! [`release`]: RemoteHandle::release

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{OpcDaError, OpcDaResult};
use crate::interface::Unknown;

/// One counted reference to a remote interface.
pub struct RemoteHandle<T: ?Sized + Unknown> {
    interface: Arc<T>,
    name: &'static str,
    released: AtomicBool,
}

impl<T: ?Sized + Unknown> RemoteHandle<T> {
    /// Takes ownership of a reference returned by a remote call.
    ///
    /// Does not add a reference; the count already belongs to the caller.
    pub fn adopt(interface: Arc<T>, name: &'static str) -> Self {
        Self {
            interface,
            name,
            released: AtomicBool::new(false),
        }
    }

    /// Adds a reference and returns a second handle owning it.
    pub fn duplicate(&self) -> OpcDaResult<Self> {
        let interface = Arc::clone(self.checked()?);
        interface.add_ref();
        Ok(Self::adopt(interface, self.name))
    }

    /// Returns the interface, or a usage error once released.
    pub fn get(&self) -> OpcDaResult<&T> {
        self.checked().map(|interface| interface.as_ref())
    }

    /// Returns the shared interface pointer, or a usage error once released.
    pub fn shared(&self) -> OpcDaResult<Arc<T>> {
        self.checked().map(Arc::clone)
    }

    /// Returns the interface name used in errors and logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` once released.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Gives the reference back.
    ///
    /// Returns `true` only for the call that actually released it.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        let remaining = self.interface.release();
        tracing::trace!(interface = self.name, remaining, "Released remote reference");
        true
    }

    fn checked(&self) -> OpcDaResult<&Arc<T>> {
        if self.is_released() {
            Err(OpcDaError::released(self.name))
        } else {
            Ok(&self.interface)
        }
    }
}

impl<T: ?Sized + Unknown> Drop for RemoteHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ?Sized + Unknown> fmt::Debug for RemoteHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("interface", &self.name)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Releases every handle in order, ignoring ones already released.
pub(crate) fn release_all(handles: &[&dyn Releasable]) {
    for handle in handles {
        handle.release_ref();
    }
}

/// Object-safe view of [`RemoteHandle::release`].
pub(crate) trait Releasable {
    fn release_ref(&self) -> bool;
}

impl<T: ?Sized + Unknown> Releasable for RemoteHandle<T> {
    fn release_ref(&self) -> bool {
        self.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Counting {
        refs: AtomicU32,
        releases: AtomicU32,
    }

    impl Unknown for Counting {
        fn add_ref(&self) -> u32 {
            self.refs.fetch_add(1, Ordering::SeqCst) + 1
        }

        fn release(&self) -> u32 {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.refs.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
        }
    }

    fn acquired() -> Arc<Counting> {
        let stub = Arc::new(Counting::default());
        stub.add_ref();
        stub
    }

    #[test]
    fn test_release_is_idempotent() {
        let stub = acquired();
        let handle = RemoteHandle::adopt(Arc::clone(&stub), "IOPCCommon");

        assert!(handle.get().is_ok());
        assert!(handle.release());
        assert!(!handle.release());
        drop(handle);

        assert_eq!(stub.releases.load(Ordering::SeqCst), 1);
        assert_eq!(stub.refs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_releases() {
        let stub = acquired();
        drop(RemoteHandle::adopt(Arc::clone(&stub), "IOPCServer"));
        assert_eq!(stub.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_get_after_release_is_usage_error() {
        let handle = RemoteHandle::adopt(acquired(), "IOPCSyncIO");
        handle.release();
        let err = handle.get().err().unwrap();
        assert_eq!(err.to_string(), "IOPCSyncIO already released");
    }

    #[test]
    fn test_duplicate_adds_reference() {
        let stub = acquired();
        let first = RemoteHandle::adopt(Arc::clone(&stub), "IOPCItemMgt");
        let second = first.duplicate().unwrap();
        assert_eq!(stub.refs.load(Ordering::SeqCst), 2);

        release_all(&[&first, &second, &first]);
        assert_eq!(stub.refs.load(Ordering::SeqCst), 0);
        assert_eq!(stub.releases.load(Ordering::SeqCst), 2);
    }
}
