// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ua-client-cli
//!
//! The `uacli` command-line client for OPC UA servers.
//!
//! This crate provides:
//!
//! - CLI argument parsing with clap
//! - Configuration loading from YAML or TOML with `UA_*` environment overrides
//! - Logging initialization
//! - One command per client service (endpoints, read, browse, write, call,
//!   history, subscribe)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   main.rs                     │
//! └──────────────────────┬───────────────────────┘
//!                        │
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!     ┌─────────┐   ┌─────────┐   ┌─────────┐
//!     │ cli.rs  │   │config.rs│   │logging  │
//!     └────┬────┘   └────┬────┘   └─────────┘
//!          └──────┬──────┘
//!          ┌──────▼──────┐
//!          │  commands   │──── value / output
//!          └──────┬──────┘
//!          ┌──────▼──────┐
//!          │  ua-client  │
//!          └─────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # List the endpoints a server offers
//! uacli -e opc.tcp://localhost:4840 endpoints
//!
//! # Read two values as JSON
//! uacli -e opc.tcp://localhost:4840 -o json read "ns=2;s=Temperature" "ns=2;s=Pressure"
//!
//! # Browse two levels below the Objects folder
//! uacli -c client.yaml browse i=85 --depth 2
//!
//! # Write a value, typed after the current one
//! uacli -c client.yaml write "ns=2;s=Setpoint" 72.5
//!
//! # Watch values and events for a minute
//! uacli -c client.yaml subscribe "ns=2;s=Temperature" --events --duration 1m
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod value;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands, LogFormat, OutputFormat};
pub use config::{apply_cli, ConfigFile, ConfigLoader};
pub use error::{report_error, report_error_and_exit, CliError, CliResult};
pub use logging::init_logging;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
