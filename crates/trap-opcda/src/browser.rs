// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Address-space browser.
//!
//! [`OpcBrowser`] walks the server's namespace. `show_branches` and
//! `show_leafs` fill an internal name list that `count` and `item` read.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{OpcDaError, OpcDaResult, UsageError};
use crate::handle::RemoteHandle;
use crate::interface::BrowseAddressSpace;
use crate::types::{AccessRights, BrowseDirection, BrowseType, NamespaceType, VarType};

const BROWSER: &str = "browser";

#[derive(Debug)]
struct Filters {
    filter: String,
    data_type: VarType,
    access_rights: AccessRights,
}

struct BrowserInner {
    browse: RemoteHandle<dyn BrowseAddressSpace>,
    filters: RwLock<Filters>,
    names: RwLock<Vec<String>>,
}

/// A cursor over the server address space.
///
/// The `Default` value is an uninitialized browser.
#[derive(Clone, Default)]
pub struct OpcBrowser {
    inner: Option<Arc<BrowserInner>>,
}

impl OpcBrowser {
    pub(crate) fn new(browse: RemoteHandle<dyn BrowseAddressSpace>) -> Self {
        Self {
            inner: Some(Arc::new(BrowserInner {
                browse,
                filters: RwLock::new(Filters {
                    filter: String::new(),
                    data_type: VarType::EMPTY,
                    access_rights: AccessRights::READ_WRITE,
                }),
                names: RwLock::new(Vec::new()),
            })),
        }
    }

    fn inner(&self) -> OpcDaResult<&Arc<BrowserInner>> {
        self.inner
            .as_ref()
            .ok_or_else(|| OpcDaError::uninitialized(BROWSER))
    }

    fn browse(&self) -> OpcDaResult<&dyn BrowseAddressSpace> {
        self.inner()?.browse.get()
    }

    // =========================================================================
    // Filters
    // =========================================================================

    /// Name filter applied by `show_branches` and `show_leafs`.
    pub fn filter(&self) -> String {
        self.inner
            .as_ref()
            .map(|i| i.filters.read().filter.clone())
            .unwrap_or_default()
    }

    /// Sets the name filter.
    pub fn set_filter(&self, filter: &str) {
        if let Some(inner) = self.inner.as_ref() {
            inner.filters.write().filter = filter.to_string();
        }
    }

    /// Data-type filter applied by `show_leafs`.
    pub fn data_type(&self) -> VarType {
        self.inner
            .as_ref()
            .map(|i| i.filters.read().data_type)
            .unwrap_or_default()
    }

    /// Sets the data-type filter.
    pub fn set_data_type(&self, data_type: VarType) {
        if let Some(inner) = self.inner.as_ref() {
            inner.filters.write().data_type = data_type;
        }
    }

    /// Access-rights filter applied by `show_leafs`.
    pub fn access_rights(&self) -> AccessRights {
        self.inner
            .as_ref()
            .map(|i| i.filters.read().access_rights)
            .unwrap_or_default()
    }

    /// Sets the access-rights filter; it must include readable or writeable.
    pub fn set_access_rights(&self, access_rights: AccessRights) -> OpcDaResult<()> {
        let inner = self.inner()?;
        if !access_rights.is_readable() && !access_rights.is_writable() {
            return Err(UsageError::InvalidAccessRights {
                rights: access_rights.0,
            }
            .into());
        }
        inner.filters.write().access_rights = access_rights;
        Ok(())
    }

    // =========================================================================
    // Position
    // =========================================================================

    /// Fully qualified ID of the current position.
    pub async fn current_position(&self) -> OpcDaResult<String> {
        self.browse()?.get_item_id("").await
    }

    /// Namespace shape.
    pub async fn organization(&self) -> OpcDaResult<NamespaceType> {
        self.browse()?.query_organization().await
    }

    /// Moves up one level.
    pub async fn move_up(&self) -> OpcDaResult<()> {
        self.browse()?
            .change_browse_position(BrowseDirection::Up, "")
            .await
    }

    /// Moves down into `branch`.
    pub async fn move_down(&self, branch: &str) -> OpcDaResult<()> {
        self.browse()?
            .change_browse_position(BrowseDirection::Down, branch)
            .await
    }

    /// Moves to the root.
    ///
    /// Tries a direct move first and falls back to moving up until the
    /// server refuses or the position stops changing.
    pub async fn move_to_root(&self) -> OpcDaResult<()> {
        let browse = self.browse()?;
        if browse
            .change_browse_position(BrowseDirection::To, "")
            .await
            .is_ok()
        {
            return Ok(());
        }

        let mut position = browse.get_item_id("").await.ok();
        loop {
            if browse
                .change_browse_position(BrowseDirection::Up, "")
                .await
                .is_err()
            {
                break;
            }
            let next = browse.get_item_id("").await.ok();
            if next == position {
                break;
            }
            position = next;
        }
        Ok(())
    }

    /// Moves to an absolute position given as a branch path from the root.
    pub async fn move_to<S: AsRef<str> + Sync>(&self, branches: &[S]) -> OpcDaResult<()> {
        self.move_to_root().await?;
        for branch in branches {
            self.move_down(branch.as_ref()).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Listing
    // =========================================================================

    async fn show(&self, browse_type: BrowseType) -> OpcDaResult<()> {
        let inner = self.inner()?;
        let (filter, data_type, access_rights) = {
            let filters = inner.filters.read();
            (filters.filter.clone(), filters.data_type, filters.access_rights)
        };
        inner.names.write().clear();

        let names = inner
            .browse
            .get()?
            .browse_item_ids(browse_type, &filter, data_type, access_rights)
            .await?;
        debug!(?browse_type, count = names.len(), "Browsed address space");
        *inner.names.write() = names;
        Ok(())
    }

    /// Lists the branches at the current position.
    pub async fn show_branches(&self) -> OpcDaResult<()> {
        self.show(BrowseType::Branch).await
    }

    /// Lists the leaves at the current position, or every leaf below it when
    /// `flat` is set.
    pub async fn show_leafs(&self, flat: bool) -> OpcDaResult<()> {
        self.show(if flat { BrowseType::Flat } else { BrowseType::Leaf })
            .await
    }

    /// Number of names listed by the last `show_*` call.
    pub fn count(&self) -> usize {
        self.inner
            .as_ref()
            .map(|i| i.names.read().len())
            .unwrap_or(0)
    }

    /// Listed name at a 0-based index.
    pub fn item(&self, index: usize) -> OpcDaResult<String> {
        let inner = self.inner()?;
        let names = inner.names.read();
        names
            .get(index)
            .cloned()
            .ok_or_else(|| UsageError::index_out_of_range(index, names.len()).into())
    }

    /// Every listed name.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .as_ref()
            .map(|i| i.names.read().clone())
            .unwrap_or_default()
    }

    /// Fully qualified item ID of `leaf` at the current position.
    pub async fn item_id(&self, leaf: &str) -> OpcDaResult<String> {
        self.browse()?.get_item_id(leaf).await
    }

    /// Releases the browse interface.
    pub fn release(&self) {
        if let Some(inner) = self.inner.as_ref() {
            inner.browse.release();
        }
    }
}

impl fmt::Debug for OpcBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcBrowser")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Unknown;
    use crate::types::hresult;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// A namespace whose up-move never fails and whose move-to is unsupported.
    struct Tree {
        position: Mutex<String>,
        branches: HashMap<&'static str, Vec<&'static str>>,
        leaves: HashMap<&'static str, Vec<&'static str>>,
    }

    impl Tree {
        fn new() -> Self {
            Self {
                position: Mutex::new(String::new()),
                branches: HashMap::from([("", vec!["Folder1", "Folder2"]), ("Folder1", vec!["SubFolder1"])]),
                leaves: HashMap::from([
                    ("", vec!["RootItem1"]),
                    ("Folder1", vec!["Item1", "Item2"]),
                    ("SubFolder1", vec!["SubItem1"]),
                ]),
            }
        }
    }

    impl Unknown for Tree {
        fn add_ref(&self) -> u32 {
            1
        }

        fn release(&self) -> u32 {
            0
        }
    }

    #[async_trait]
    impl BrowseAddressSpace for Tree {
        async fn query_organization(&self) -> OpcDaResult<NamespaceType> {
            Ok(NamespaceType::Hierarchical)
        }

        async fn browse_item_ids(
            &self,
            browse_type: BrowseType,
            _filter: &str,
            _data_type: VarType,
            _access_rights: AccessRights,
        ) -> OpcDaResult<Vec<String>> {
            let position = self.position.lock().clone();
            let table = match browse_type {
                BrowseType::Branch => &self.branches,
                BrowseType::Leaf | BrowseType::Flat => &self.leaves,
            };
            Ok(table
                .get(position.as_str())
                .map(|names| names.iter().map(|n| n.to_string()).collect())
                .unwrap_or_default())
        }

        async fn change_browse_position(
            &self,
            direction: BrowseDirection,
            name: &str,
        ) -> OpcDaResult<()> {
            let mut position = self.position.lock();
            match direction {
                BrowseDirection::Up => {
                    *position = if *position == "SubFolder1" {
                        "Folder1".to_string()
                    } else {
                        String::new()
                    };
                    Ok(())
                }
                BrowseDirection::Down => {
                    let known = self
                        .branches
                        .get(position.as_str())
                        .map(|b| b.contains(&name))
                        .unwrap_or(false);
                    if !known {
                        return Err(OpcDaError::remote("ChangeBrowsePosition", hresult::E_INVALIDARG));
                    }
                    *position = name.to_string();
                    Ok(())
                }
                BrowseDirection::To => Err(OpcDaError::remote("ChangeBrowsePosition", hresult::E_NOTIMPL)),
            }
        }

        async fn get_item_id(&self, leaf: &str) -> OpcDaResult<String> {
            let position = self.position.lock().clone();
            Ok(match (position.is_empty(), leaf.is_empty()) {
                (_, true) => position,
                (true, false) => leaf.to_string(),
                (false, false) => format!("{}.{}", position, leaf),
            })
        }
    }

    fn browser() -> OpcBrowser {
        OpcBrowser::new(RemoteHandle::adopt(Arc::new(Tree::new()), "IOPCBrowseServerAddressSpace"))
    }

    #[tokio::test]
    async fn test_browse_and_resolve() {
        let browser = browser();
        assert_eq!(browser.organization().await.unwrap(), NamespaceType::Hierarchical);

        browser.show_branches().await.unwrap();
        assert_eq!(browser.names(), vec!["Folder1", "Folder2"]);

        browser.move_down("Folder1").await.unwrap();
        browser.show_leafs(false).await.unwrap();
        assert_eq!(browser.count(), 2);
        assert_eq!(browser.item(0).unwrap(), "Item1");
        assert_eq!(browser.item_id("Item1").await.unwrap(), "Folder1.Item1");
        assert!(browser.item(2).is_err());
    }

    #[tokio::test]
    async fn test_move_to_root_terminates_without_up_error() {
        let browser = browser();
        browser.move_to(&["Folder1", "SubFolder1"]).await.unwrap();
        assert_eq!(browser.current_position().await.unwrap(), "SubFolder1");

        browser.move_to_root().await.unwrap();
        assert_eq!(browser.current_position().await.unwrap(), "");

        assert!(browser.move_to(&["Missing"]).await.is_err());
    }

    #[tokio::test]
    async fn test_access_rights_filter() {
        let browser = browser();
        assert_eq!(browser.access_rights(), AccessRights::READ_WRITE);
        let err = browser.set_access_rights(AccessRights(0)).unwrap_err();
        assert!(matches!(err, OpcDaError::Usage(UsageError::InvalidAccessRights { rights: 0 })));
        browser.set_access_rights(AccessRights::READABLE).unwrap();
        assert_eq!(browser.access_rights(), AccessRights::READABLE);
    }

    #[tokio::test]
    async fn test_uninitialized_browser() {
        let browser = OpcBrowser::default();
        assert_eq!(browser.count(), 0);
        assert!(browser.show_branches().await.is_err());
        assert!(browser.set_access_rights(AccessRights::READABLE).is_err());
        browser.release();
    }
}
