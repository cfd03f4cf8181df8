// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `servers` command.

use crate::cli::{OutputFormat, ServersArgs};
use crate::commands::print_structured;
use crate::error::BinResult;
use crate::runtime::ClientRuntime;

/// Lists the data-access servers registered on the configured node.
pub async fn servers(runtime: &ClientRuntime, args: ServersArgs) -> BinResult<()> {
    let node = &runtime.config().node;
    let servers = runtime.connector().get_servers(node).await?;

    match args.format {
        OutputFormat::Text => {
            let host = if node.is_empty() { "localhost" } else { node.as_str() };
            println!("Servers on {} ({}):", host, servers.len());
            for info in &servers {
                println!("  {:<32} {}", info.prog_id, info.cls_str);
                if !info.ver_ind_prog_id.is_empty() && info.ver_ind_prog_id != info.prog_id {
                    println!("    version independent: {}", info.ver_ind_prog_id);
                }
            }
        }
        format => print_structured(&servers, format)?,
    }
    Ok(())
}
