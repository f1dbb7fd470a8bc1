// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! Every command except `endpoints` opens a session, runs, and closes the
//! session again whether or not the command succeeded.

mod browse;
mod call;
mod endpoints;
mod history;
mod read;
mod subscribe;
mod write;

use std::future::Future;

use tracing::{info, warn};
use ua_client::{ClientConfig, Session};

use crate::cli::{Cli, Commands};
use crate::error::CliResult;

/// Executes the command selected on the command line.
pub async fn execute(cli: &Cli, config: ClientConfig) -> CliResult<()> {
    let output = cli.output;
    match &cli.command {
        Commands::Endpoints => endpoints::endpoints(output, &config).await,
        Commands::Read(args) => with_session(config, |s| read::read(output, args, s)).await,
        Commands::Browse(args) => with_session(config, |s| browse::browse(output, args, s)).await,
        Commands::Write(args) => with_session(config, |s| write::write(output, args, s)).await,
        Commands::Call(args) => with_session(config, |s| call::call(output, args, s)).await,
        Commands::History(args) => {
            with_session(config, |s| history::history(output, args, s)).await
        }
        Commands::Subscribe(args) => {
            with_session(config, |s| subscribe::subscribe(output, args, s)).await
        }
    }
}

/// Opens a session from `config`.
pub async fn connect(config: ClientConfig) -> CliResult<Session> {
    let session = Session::from_config(config).await?;
    session.open().await?;
    info!(
        endpoint = %session.config().endpoint,
        policy = ?session.security_policy(),
        mode = ?session.security_mode(),
        identity = %session.user_identity(),
        "Session open"
    );
    Ok(session)
}

/// Runs `command` on a fresh session and closes it afterwards.
///
/// The command's own error wins over a failure to close.
pub async fn with_session<T, F, Fut>(config: ClientConfig, command: F) -> CliResult<T>
where
    F: FnOnce(Session) -> Fut,
    Fut: Future<Output = CliResult<T>>,
{
    let session = connect(config).await?;
    let result = command(session.clone()).await;
    if let Err(e) = session.close().await {
        warn!(error = %e, "Session did not close cleanly");
    }
    result
}
