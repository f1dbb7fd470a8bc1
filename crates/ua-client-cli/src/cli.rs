// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `endpoints`: list the endpoints a server offers
//! - `read`: read attributes of one or more nodes
//! - `browse`: list the references of a node
//! - `write`: write the value of a node
//! - `call`: invoke a method
//! - `history`: read raw or aggregated historical values
//! - `subscribe`: monitor values or events until interrupted

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// Command-line OPC UA client.
#[derive(Parser, Debug)]
#[command(
    name = "uacli",
    author = "Sylvex <contact@sylvex.io>",
    version = crate::VERSION,
    about = "Command-line OPC UA client",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Client configuration file (YAML or TOML)
    #[arg(short, long, env = "UA_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server endpoint URL, e.g. opc.tcp://localhost:4840
    #[arg(short, long, global = true)]
    pub endpoint: Option<String>,

    /// Security policy (none, basic256sha256, aes128, aes256, ...)
    #[arg(long, global = true)]
    pub security_policy: Option<String>,

    /// Security mode (none, sign, sign-and-encrypt)
    #[arg(long, global = true)]
    pub security_mode: Option<String>,

    /// User name; anonymous when absent
    #[arg(short, long, global = true, requires = "password")]
    pub user: Option<String>,

    /// Password for --user
    #[arg(short, long, env = "UA_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Accept unknown server certificates and store them as trusted
    #[arg(long, global = true)]
    pub trust_server: bool,

    /// Per-request timeout, e.g. 5s or 500ms
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log format
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    /// Output format for results
    #[arg(short, long, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level after `--quiet` and `--verbose` are taken into account.
    ///
    /// `configured` is the level from the configuration file or environment.
    pub fn effective_log_level(&self, configured: &str) -> String {
        if self.quiet {
            "error".to_string()
        } else if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| configured.to_string())
        }
    }
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List the endpoints the server offers
    ///
    /// Uses an unsecured discovery channel; no session is created.
    Endpoints,

    /// Read attributes of one or more nodes
    Read(ReadArgs),

    /// List the references of a node
    ///
    /// Continuation points are followed until every reference is collected.
    Browse(BrowseArgs),

    /// Write the Value attribute of a node
    Write(WriteArgs),

    /// Call a method
    Call(CallArgs),

    /// Read raw historical values of a node
    History(HistoryArgs),

    /// Monitor data changes or events until interrupted
    Subscribe(SubscribeArgs),
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `read` command.
#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Nodes to read, e.g. ns=2;s=Temperature or i=2258
    #[arg(required = true)]
    pub nodes: Vec<String>,

    /// Attribute to read, by name (value, display-name, data-type, ...) or id
    #[arg(short, long, default_value = "value")]
    pub attribute: String,

    /// Maximum age of cached values in milliseconds
    #[arg(long, default_value_t = 0.0)]
    pub max_age: f64,

    /// Read only part of array values, e.g. 1:2
    #[arg(long)]
    pub index_range: Option<String>,
}

/// Arguments for the `browse` command.
#[derive(Args, Debug, Clone)]
pub struct BrowseArgs {
    /// Node to browse; the Objects folder when absent
    #[arg(default_value = "i=85")]
    pub node: String,

    /// References the server returns per call; 0 lets the server decide
    #[arg(long, default_value_t = 0)]
    pub max_references: u32,

    /// Browse children recursively down to this depth
    #[arg(short, long, default_value_t = 1)]
    pub depth: u32,
}

/// Arguments for the `write` command.
#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// Node to write
    pub node: String,

    /// New value; prefix with a type such as double:1.5 or int16:-3,
    /// otherwise the type of the current value is used. Arrays are
    /// comma-separated, e.g. double:41,42
    #[arg(allow_hyphen_values = true)]
    pub value: String,

    /// Replace only these array elements, e.g. 1:2
    #[arg(long)]
    pub index_range: Option<String>,
}

/// Arguments for the `call` command.
#[derive(Args, Debug, Clone)]
pub struct CallArgs {
    /// Object owning the method
    pub object: String,

    /// Method node
    pub method: String,

    /// Input arguments; prefix with a type such as uint32:7, otherwise the
    /// type is inferred
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Arguments for the `history` command.
#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Node to read history from
    pub node: String,

    /// How far back to read, e.g. 1h or 30m
    #[arg(long, default_value = "1h", value_parser = humantime::parse_duration)]
    pub since: Duration,

    /// Values the server returns per call; 0 lets the server decide
    #[arg(long, default_value_t = 0)]
    pub per_call: u32,

    /// Read an aggregate per interval instead of raw values
    #[arg(long, value_enum)]
    pub aggregate: Option<Aggregate>,

    /// Aggregate interval, e.g. 1m
    #[arg(long, default_value = "1m", value_parser = humantime::parse_duration)]
    pub interval: Duration,
}

/// Aggregate functions for processed history.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Mean of the good values in each interval
    Average,
    /// Smallest value in each interval
    Minimum,
    /// Largest value in each interval
    Maximum,
}

/// Arguments for the `subscribe` command.
#[derive(Args, Debug, Clone)]
pub struct SubscribeArgs {
    /// Nodes whose value changes are reported
    pub nodes: Vec<String>,

    /// Also report events emitted by the Server object
    #[arg(long)]
    pub events: bool,

    /// Publishing interval, e.g. 500ms
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,

    /// Sampling interval; the publishing interval when absent
    #[arg(long, value_parser = humantime::parse_duration)]
    pub sampling: Option<Duration>,

    /// Queue size of each monitored item
    #[arg(long, default_value_t = 10)]
    pub queue_size: u32,

    /// Stop after this long instead of waiting for Ctrl-C
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Stop after this many notifications
    #[arg(long)]
    pub count: Option<u64>,
}

// =============================================================================
// Value Enums
// =============================================================================

/// Log output format.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON lines
    Json,
    /// Compact single-line text
    Compact,
}

/// Result output format.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
    /// YAML
    Yaml,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_read() {
        let cli = Cli::parse_from([
            "uacli",
            "-e",
            "opc.tcp://plc:4840",
            "read",
            "ns=2;s=Temperature",
            "i=2258",
            "--attribute",
            "display-name",
        ]);
        assert_eq!(cli.endpoint.as_deref(), Some("opc.tcp://plc:4840"));
        match cli.command {
            Commands::Read(args) => {
                assert_eq!(args.nodes, vec!["ns=2;s=Temperature", "i=2258"]);
                assert_eq!(args.attribute, "display-name");
                assert_eq!(args.max_age, 0.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_global_options_after_subcommand() {
        let cli = Cli::parse_from([
            "uacli",
            "browse",
            "--depth",
            "2",
            "--security-policy",
            "basic256sha256",
            "--output",
            "json",
        ]);
        assert_eq!(cli.security_policy.as_deref(), Some("basic256sha256"));
        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::Browse(args) => {
                assert_eq!(args.node, "i=85");
                assert_eq!(args.depth, 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_index_range_and_aggregate() {
        let cli = Cli::parse_from(["uacli", "write", "ns=2;s=Array", "double:41,42", "--index-range", "1:2"]);
        match cli.command {
            Commands::Write(args) => assert_eq!(args.index_range.as_deref(), Some("1:2")),
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::parse_from([
            "uacli",
            "history",
            "ns=2;s=History",
            "--since",
            "10m",
            "--aggregate",
            "average",
        ]);
        match cli.command {
            Commands::History(args) => {
                assert_eq!(args.aggregate, Some(Aggregate::Average));
                assert_eq!(args.interval, Duration::from_secs(60));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_write_negative_value() {
        let cli = Cli::parse_from(["uacli", "write", "ns=2;s=Setpoint", "-4.5"]);
        match cli.command {
            Commands::Write(args) => assert_eq!(args.value, "-4.5"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_subscribe_durations() {
        let cli = Cli::parse_from([
            "uacli",
            "subscribe",
            "ns=2;s=Counter",
            "--interval",
            "250ms",
            "--duration",
            "10s",
            "--events",
        ]);
        match cli.command {
            Commands::Subscribe(args) => {
                assert_eq!(args.interval, Some(Duration::from_millis(250)));
                assert_eq!(args.duration, Some(Duration::from_secs(10)));
                assert!(args.events);
                assert_eq!(args.queue_size, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_user_requires_password() {
        let result = Cli::try_parse_from(["uacli", "--user", "operator", "endpoints"]);
        // UA_PASSWORD may satisfy the requirement in a developer shell.
        if std::env::var_os("UA_PASSWORD").is_none() {
            assert!(result.is_err());
        }
    }

    #[test]
    fn test_effective_log_level() {
        let cli = Cli::parse_from(["uacli", "endpoints"]);
        assert_eq!(cli.effective_log_level("warn"), "warn");

        let cli = Cli::parse_from(["uacli", "-v", "endpoints"]);
        assert_eq!(cli.effective_log_level("warn"), "debug");

        let cli = Cli::parse_from(["uacli", "-q", "-l", "trace", "endpoints"]);
        assert_eq!(cli.effective_log_level("info"), "error");

        let cli = Cli::parse_from(["uacli", "-l", "trace", "endpoints"]);
        assert_eq!(cli.effective_log_level("info"), "trace");
    }

    #[test]
    fn test_history_since_default() {
        let cli = Cli::parse_from(["uacli", "history", "ns=2;s=Temperature"]);
        match cli.command {
            Commands::History(args) => {
                assert_eq!(args.since, Duration::from_secs(3600));
                assert_eq!(args.per_call, 0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
