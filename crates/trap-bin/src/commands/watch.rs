// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `watch` command.
//!
//! Prints one line per item per data change until Ctrl+C, the `--duration`
//! deadline, or a server shutdown request.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use trap_opcda::{DataChangeEvent, DataSource, OpcServer};

use crate::cli::WatchArgs;
use crate::commands::ValueRow;
use crate::error::{BinError, BinResult};
use crate::runtime::ClientRuntime;
use crate::shutdown::ShutdownCoordinator;

const EVENT_BUFFER: usize = 64;

/// Subscribes to the items and prints their data changes.
pub async fn watch(runtime: &ClientRuntime, args: WatchArgs) -> BinResult<()> {
    let shutdown = runtime.shutdown().clone();
    shutdown.listen_for_signals();
    if let Some(seconds) = args.duration {
        let deadline = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            deadline.initiate_shutdown("duration elapsed");
        });
    }
    let activity = args.simulate.then(|| {
        runtime.spawn_activity(
            args.tags.clone(),
            Duration::from_millis(u64::from(args.update_rate.max(10))),
        )
    });

    let events = runtime
        .session(|server| async move {
            watch_until_shutdown(&server, &args.tags, args.update_rate, &shutdown, |row| {
                println!("{}", row.to_line())
            })
            .await
        })
        .await;

    runtime.shutdown().initiate_shutdown("watch finished");
    if let Some(activity) = activity {
        if let Err(e) = activity.await {
            warn!(error = %e, "Simulated activity task failed");
        }
    }
    let events = events?;
    info!(
        events,
        reason = %runtime.shutdown().reason().unwrap_or_default(),
        "Watch stopped"
    );
    Ok(())
}

/// Runs the subscription loop; returns the number of data-change events seen.
pub(crate) async fn watch_until_shutdown<F>(
    server: &OpcServer,
    tags: &[String],
    update_rate: u32,
    shutdown: &ShutdownCoordinator,
    mut print: F,
) -> BinResult<u64>
where
    F: FnMut(&ValueRow),
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    server.register_shutdown(shutdown_tx).await?;
    shutdown.forward_server_shutdown(shutdown_rx);

    let group = server.groups().add("cli-watch").await?;
    let revised = group.set_update_rate(update_rate).await?;
    if revised != update_rate {
        info!(requested = update_rate, revised, "Server revised the update rate");
    }

    let (items, errors) = group.items().add_items(tags).await?;
    let mut names = HashMap::new();
    for ((item, error), tag) in items.iter().zip(&errors).zip(tags) {
        match error {
            Some(error) => print(&ValueRow::failed(tag, error)),
            None => {
                names.insert(item.client_handle(), tag.clone());
            }
        }
    }
    if names.is_empty() {
        server.groups().remove(group.server_handle()).await?;
        return Err(BinError::Items {
            failed: tags.len(),
            total: tags.len(),
        });
    }

    let (tx, mut rx) = mpsc::channel::<DataChangeEvent>(EVENT_BUFFER);
    group.register_data_change(tx).await?;
    group.async_refresh(DataSource::Cache, 0).await?;

    let mut signal = shutdown.shutdown_signal();
    let mut events = 0u64;
    loop {
        tokio::select! {
            _ = signal.wait() => break,
            event = rx.recv() => {
                let Some(event) = event else {
                    warn!("Data-change stream closed");
                    break;
                };
                events += 1;
                for value in &event.items {
                    let tag = names
                        .get(&value.client_handle)
                        .map(String::as_str)
                        .unwrap_or("?");
                    let row = match &value.error {
                        Some(error) => ValueRow::failed(tag, error),
                        None => ValueRow::new(tag, &value.value, value.quality, value.timestamp),
                    };
                    print(&row);
                }
            }
        }
    }

    let stats = group.dispatch_stats();
    if stats.queue_dropped + stats.dropped_full > 0 {
        warn!(
            queue_dropped = stats.queue_dropped,
            dropped_full = stats.dropped_full,
            "Some data changes were dropped"
        );
    }
    server.groups().remove(group.server_handle()).await?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::runtime::RuntimeBuilder;
    use trap_opcda::Variant;

    #[tokio::test]
    async fn test_watch_prints_refresh_and_changes() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();
        let shutdown = runtime.shutdown().clone();
        let simulator = runtime.simulator().clone();

        let driver = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                simulator.set_value("Plant.Line1.Count", Variant::I32(43)).unwrap();
                tokio::time::sleep(Duration::from_millis(50)).await;
                shutdown.initiate_shutdown("test");
            })
        };

        let tags = vec!["Plant.Line1.Count".to_string()];
        let mut rows = Vec::new();
        let events = runtime
            .session(|server| {
                let rows = &mut rows;
                async move {
                    watch_until_shutdown(&server, &tags, 10, &shutdown, |row| rows.push(row.clone()))
                        .await
                }
            })
            .await
            .unwrap();
        driver.await.unwrap();

        assert!(events >= 2);
        assert_eq!(rows[0].value, "42");
        assert!(rows.iter().any(|row| row.value == "43"));
        assert_eq!(runtime.simulator().group_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_stops_on_server_shutdown() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();
        let shutdown = runtime.shutdown().clone();
        let simulator = runtime.simulator().clone();

        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            simulator.shutdown("maintenance");
        });

        let tags = vec!["Plant.Boiler.Mode".to_string()];
        runtime
            .session(|server| async move {
                watch_until_shutdown(&server, &tags, 100, &shutdown, |_| {}).await
            })
            .await
            .unwrap();
        driver.await.unwrap();

        assert_eq!(
            runtime.shutdown().reason().as_deref(),
            Some("server shutdown: maintenance")
        );
    }

    #[tokio::test]
    async fn test_watch_fails_when_no_tag_is_known() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();
        let shutdown = runtime.shutdown().clone();

        let tags = vec!["Plant.Missing".to_string()];
        let result = runtime
            .session(|server| async move {
                watch_until_shutdown(&server, &tags, 100, &shutdown, |_| {}).await
            })
            .await;

        assert!(matches!(result, Err(BinError::Items { failed: 1, total: 1 })));
    }
}
