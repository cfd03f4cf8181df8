// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `status` command.

use serde::Serialize;
use trap_opcda::ServerStatus;

use crate::cli::{OutputFormat, StatusArgs};
use crate::commands::print_structured;
use crate::error::{BinError, BinResult};
use crate::runtime::ClientRuntime;

#[derive(Serialize)]
struct StatusReport {
    prog_id: String,
    node: String,
    clsid: Option<String>,
    client_name: String,
    locale_id: u32,
    status: ServerStatus,
}

/// Connects and prints the server status.
pub async fn status(runtime: &ClientRuntime, args: StatusArgs) -> BinResult<()> {
    let report = runtime
        .session(|server| async move {
            Ok::<_, BinError>(StatusReport {
                prog_id: server.prog_id().to_string(),
                node: server.node().to_string(),
                clsid: server.clsid().map(|clsid| clsid.to_string()),
                client_name: server.client_name(),
                locale_id: server.locale_id().await?,
                status: server.status().await?,
            })
        })
        .await?;

    match args.format {
        OutputFormat::Text => {
            let status = &report.status;
            println!("Server:       {}", report.prog_id);
            if let Some(clsid) = &report.clsid {
                println!("CLSID:        {}", clsid);
            }
            if !report.node.is_empty() {
                println!("Node:         {}", report.node);
            }
            println!("Vendor:       {}", status.vendor_info);
            println!(
                "Version:      {}.{}.{}",
                status.major_version, status.minor_version, status.build_number
            );
            println!("State:        {}", status.server_state);
            println!("Started:      {}", status.start_time.to_rfc3339());
            println!("Server time:  {}", status.current_time.to_rfc3339());
            println!("Groups:       {}", status.group_count);
            if status.band_width != u32::MAX {
                println!("Bandwidth:    {}", status.band_width);
            }
            println!("Locale:       {:#06x}", report.locale_id);
            if !report.client_name.is_empty() {
                println!("Client name:  {}", report.client_name);
            }
        }
        format => print_structured(&report, format)?,
    }
    Ok(())
}
