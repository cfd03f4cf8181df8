// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `write` command.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;
use trap_opcda::{OpcDaError, OpcServer, Variant};

use crate::cli::WriteArgs;
use crate::error::{BinError, BinResult};
use crate::runtime::ClientRuntime;

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);
const TRANSACTION_ID: u32 = 1;

/// Writes one value, converted to the item's canonical type.
pub async fn write(runtime: &ClientRuntime, args: WriteArgs) -> BinResult<()> {
    let WriteArgs { tag, value, r#async } = args;
    let written = runtime
        .session(|server| async move { write_value(&server, &tag, &value, r#async).await })
        .await?;
    println!("{} = {} ({})", written.0, written.1, written.1.type_name());
    Ok(())
}

pub(crate) async fn write_value(
    server: &OpcServer,
    tag: &str,
    text: &str,
    asynchronous: bool,
) -> BinResult<(String, Variant)> {
    let group = server.groups().add("cli-write").await?;
    let item = group.items().add_item(tag).await?;

    let value = Variant::String(text.to_string())
        .coerce_to(item.canonical_data_type())
        .map_err(OpcDaError::from)?;
    debug!(tag, canonical = %item.canonical_data_type(), "Writing value");

    let result = if asynchronous {
        let (tx, mut rx) = mpsc::channel(1);
        group.register_write_complete(tx).await?;
        let (_, errors) = group
            .async_write(&[item.server_handle()], &[value.clone()], TRANSACTION_ID)
            .await?;
        match errors.into_iter().next().flatten() {
            Some(error) => Err(error.into()),
            None => match tokio::time::timeout(COMPLETION_TIMEOUT, rx.recv()).await {
                Ok(Some(event)) => match event.items.into_iter().find_map(|outcome| outcome.error) {
                    Some(error) => Err(error.into()),
                    None => Ok(()),
                },
                Ok(None) => Err(BinError::runtime("write completion channel closed")),
                Err(_) => Err(BinError::runtime("timed out waiting for write completion")),
            },
        }
    } else {
        item.write(&value).await.map_err(BinError::from)
    };

    server.groups().remove(group.server_handle()).await?;
    result.map(|()| (tag.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::runtime::RuntimeBuilder;

    #[tokio::test]
    async fn test_write_converts_text() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let (_, value) = runtime
            .session(|server| async move {
                write_value(&server, "Plant.Line1.Count", "17", false).await
            })
            .await
            .unwrap();

        assert_eq!(value, Variant::I32(17));
        assert_eq!(runtime.simulator().value("Plant.Line1.Count"), Some(Variant::I32(17)));
    }

    #[tokio::test]
    async fn test_async_write_waits_for_completion() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        runtime
            .session(|server| async move {
                write_value(&server, "Plant.Line1.Running", "false", true).await
            })
            .await
            .unwrap();

        assert_eq!(runtime.simulator().value("Plant.Line1.Running"), Some(Variant::Bool(false)));
    }

    #[tokio::test]
    async fn test_write_rejects_unparsable_text() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let result = runtime
            .session(|server| async move {
                write_value(&server, "Plant.Line1.Count", "fast", false).await
            })
            .await;

        assert!(matches!(result, Err(BinError::Client(OpcDaError::Conversion(_)))));
    }

    #[tokio::test]
    async fn test_write_read_only_tag_fails() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();

        let result = runtime
            .session(|server| async move {
                write_value(&server, "Plant.Boiler.Temperature", "90", false).await
            })
            .await;

        assert!(result.is_err());
        assert_eq!(
            runtime.simulator().value("Plant.Boiler.Temperature"),
            Some(Variant::F64(87.3))
        );
    }
}
