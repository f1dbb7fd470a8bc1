// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! `uacli` - command-line OPC UA client.

use clap::Parser;
use tracing::debug;
use ua_client_cli::{
    apply_cli, commands, init_logging, report_error_and_exit, Cli, ConfigLoader, NAME, VERSION,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let file = match ConfigLoader::new()
        .load_or_default(cli.config.as_deref())
        .and_then(|file| apply_cli(file, &cli))
    {
        Ok(file) => file,
        Err(e) => report_error_and_exit(e),
    };

    init_logging(&file.logging.level, file.logging.format);
    debug!(name = NAME, version = VERSION, endpoint = %file.client.endpoint, "Starting");

    if let Err(e) = commands::execute(&cli, file.client).await {
        report_error_and_exit(e);
    }
}
