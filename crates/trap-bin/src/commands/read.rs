// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `read` command.

use tracing::debug;
use trap_opcda::{hresult, DataSource, OpcDaError, OpcServer};

use crate::cli::{OutputFormat, ReadArgs};
use crate::commands::{print_structured, ValueRow};
use crate::error::{BinError, BinResult};
use crate::runtime::ClientRuntime;

/// Reads the requested items in one batch.
///
/// Unknown tags are reported next to the good ones; the command fails
/// afterwards when any item failed.
pub async fn read(runtime: &ClientRuntime, args: ReadArgs) -> BinResult<()> {
    let source = DataSource::from(args.source);
    let tags = args.tags.clone();
    let rows = runtime
        .session(|server| async move { read_rows(&server, &tags, source).await })
        .await?;

    match args.format {
        OutputFormat::Text => {
            for row in &rows {
                println!("{}", row.to_line());
            }
        }
        format => print_structured(&rows, format)?,
    }

    let failed = rows.iter().filter(|row| row.error.is_some()).count();
    if failed > 0 {
        return Err(BinError::Items {
            failed,
            total: rows.len(),
        });
    }
    Ok(())
}

pub(crate) async fn read_rows(
    server: &OpcServer,
    tags: &[String],
    source: DataSource,
) -> BinResult<Vec<ValueRow>> {
    let group = server.groups().add("cli-read").await?;
    let (items, add_errors) = group.items().add_items(tags).await?;

    let mut rows: Vec<Option<ValueRow>> = vec![None; tags.len()];
    let mut slots = Vec::new();
    let mut handles = Vec::new();
    for (index, (item, error)) in items.iter().zip(&add_errors).enumerate() {
        match error {
            Some(error) => rows[index] = Some(ValueRow::failed(&tags[index], error)),
            None => {
                slots.push(index);
                handles.push(item.server_handle());
            }
        }
    }

    if !handles.is_empty() {
        let (states, read_errors) = group.sync_read(source, &handles).await?;
        for (position, index) in slots.into_iter().enumerate() {
            let tag = &tags[index];
            let error = read_errors.get(position).and_then(Option::as_ref);
            rows[index] = Some(match (error, states.get(position)) {
                (Some(error), _) => ValueRow::failed(tag, error),
                (None, Some(state)) => {
                    ValueRow::new(tag, &state.value, state.quality, state.timestamp)
                }
                (None, None) => ValueRow::failed(
                    tag,
                    &OpcDaError::remote("IOPCSyncIO::Read", hresult::E_FAIL),
                ),
            });
        }
    }

    debug!(count = tags.len(), %source, "Read complete");
    server.groups().remove(group.server_handle()).await?;
    Ok(rows.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::runtime::RuntimeBuilder;

    #[tokio::test]
    async fn test_read_rows_mixes_good_and_bad_tags() {
        let runtime = RuntimeBuilder::new().config(AppConfig::default()).build().unwrap();
        let tags = vec![
            "Plant.Line1.Count".to_string(),
            "Plant.Missing".to_string(),
            "Plant.Boiler.Mode".to_string(),
        ];

        let rows = runtime
            .session(|server| async move { read_rows(&server, &tags, DataSource::Device).await })
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].value, "42");
        assert_eq!(rows[0].data_type, "i32");
        assert!(rows[0].error.is_none());
        assert!(rows[1].error.is_some());
        assert_eq!(rows[2].value, "auto");
    }
}
