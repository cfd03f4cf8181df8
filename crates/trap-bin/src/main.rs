// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Command-line client for OPC Data Access servers.

use trap_bin::cli::Cli;
use trap_bin::error::report_error_and_exit;
use trap_bin::{commands, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logging(cli.effective_log_level(), cli.log_format);

    if let Err(e) = commands::execute(cli).await {
        report_error_and_exit(e);
    }
}
