// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `browse` command.

use trap_opcda::OpcServer;

use crate::cli::BrowseArgs;
use crate::error::{BinError, BinResult};
use crate::runtime::ClientRuntime;

#[derive(Debug, Default, PartialEq)]
pub(crate) struct Listing {
    pub position: String,
    pub branches: Vec<String>,
    /// Leaf name and fully qualified item ID.
    pub leaves: Vec<(String, String)>,
}

/// Lists branches and leaves at a position of the address space.
pub async fn browse(runtime: &ClientRuntime, args: BrowseArgs) -> BinResult<()> {
    let flat = args.flat;
    let listing = runtime
        .session(|server| async move { list(&server, &args).await })
        .await?;

    let position = if listing.position.is_empty() {
        "<root>"
    } else {
        listing.position.as_str()
    };
    println!("{}", position);
    for branch in &listing.branches {
        println!("  {}/", branch);
    }
    for (name, item_id) in &listing.leaves {
        if flat || name == item_id {
            println!("  {}", item_id);
        } else {
            println!("  {:<24} {}", name, item_id);
        }
    }
    Ok(())
}

pub(crate) async fn list(server: &OpcServer, args: &BrowseArgs) -> BinResult<Listing> {
    let browser = server.create_browser().await?;
    let result = async {
        if !args.path.is_empty() {
            browser.move_to(&args.path).await?;
        }
        browser.set_filter(&args.filter);
        let position = browser.current_position().await?;

        let mut listing = Listing {
            position,
            ..Listing::default()
        };
        if args.flat {
            browser.show_leafs(true).await?;
            listing.leaves = browser.names().into_iter().map(|id| (id.clone(), id)).collect();
        } else {
            browser.show_branches().await?;
            listing.branches = browser.names();
            browser.show_leafs(false).await?;
            for name in browser.names() {
                let item_id = browser.item_id(&name).await?;
                listing.leaves.push((name, item_id));
            }
        }
        Ok::<_, BinError>(listing)
    }
    .await;

    browser.release();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::runtime::RuntimeBuilder;

    fn args(path: &[&str], flat: bool, filter: &str) -> BrowseArgs {
        BrowseArgs {
            path: path.iter().map(|s| s.to_string()).collect(),
            flat,
            filter: filter.to_string(),
        }
    }

    #[tokio::test]
    async fn test_browse_branch() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let listing = runtime
            .session(|server| async move { list(&server, &args(&["Plant"], false, "")).await })
            .await
            .unwrap();

        assert_eq!(listing.position, "Plant");
        assert_eq!(listing.branches, vec!["Boiler", "Line1"]);
        assert!(listing.leaves.is_empty());
    }

    #[tokio::test]
    async fn test_browse_leaves_resolve_item_ids() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let listing = runtime
            .session(|server| async move {
                list(&server, &args(&["Plant", "Line1"], false, "S*")).await
            })
            .await
            .unwrap();

        assert_eq!(
            listing.leaves,
            vec![("Speed".to_string(), "Plant.Line1.Speed".to_string())]
        );
    }

    #[tokio::test]
    async fn test_browse_flat() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let listing = runtime
            .session(|server| async move { list(&server, &args(&[], true, "")).await })
            .await
            .unwrap();

        assert_eq!(listing.leaves.len(), 5);
        assert!(listing
            .leaves
            .iter()
            .any(|(_, id)| id == "Plant.Boiler.Temperature"));
    }

    #[tokio::test]
    async fn test_browse_unknown_branch_fails() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let result = runtime
            .session(|server| async move { list(&server, &args(&["Nowhere"], false, "")).await })
            .await;

        assert!(result.is_err());
    }
}
