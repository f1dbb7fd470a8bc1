// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration file loading.
//!
//! A configuration file holds the library's [`ClientConfig`] under `client`
//! and the log settings under `logging`:
//!
//! ```yaml
//! client:
//!   endpoint: opc.tcp://plc:4840
//!   security_policy: basic256_sha256
//!   security_mode: sign_and_encrypt
//!   request_timeout: 5s
//! logging:
//!   level: debug
//!   format: json
//! ```
//!
//! The format is chosen by extension (`.yaml`, `.yml`, `.toml`). After
//! parsing, `UA_`-prefixed environment variables override the endpoint,
//! security preference and log settings; command-line flags override both.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use ua_client::{ClientConfig, IdentityConfig, SecurityMode, SecurityPolicy};

use crate::cli::{Cli, LogFormat};
use crate::error::{CliError, CliResult};

/// Default prefix of override variables.
pub const ENV_PREFIX: &str = "UA";

// =============================================================================
// ConfigFile
// =============================================================================

/// Contents of a `uacli` configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Client settings.
    #[serde(default)]
    pub client: ClientConfig,

    /// Log settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Log settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `ua_client=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> CliResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some(other) => Err(CliError::config(format!(
                "unsupported configuration format '{other}', expected yaml or toml"
            ))),
            None => Err(CliError::config(format!(
                "cannot tell the format of {} without an extension",
                path.display()
            ))),
        }
    }
}

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads configuration files and applies environment overrides.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_prefix: String,
    resolve_env_vars: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader using the `UA_` prefix.
    pub fn new() -> Self {
        Self {
            env_prefix: ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the prefix of override variables.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment overrides.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads `path`, or starts from defaults when no file is given.
    pub fn load_or_default(&self, path: Option<&Path>) -> CliResult<ConfigFile> {
        match path {
            Some(path) => self.load(path),
            None => {
                let mut file = ConfigFile::default();
                self.apply_process_env(&mut file)?;
                Ok(file)
            }
        }
    }

    /// Loads a configuration file.
    ///
    /// The result is not validated; flags may still supply missing fields.
    pub fn load(&self, path: impl AsRef<Path>) -> CliResult<ConfigFile> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(CliError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::Io(format!("{}: {e}", path.display())))?;

        let format = ConfigFormat::from_path(path)?;
        let mut file = parse_str(&content, format).map_err(|message| CliError::parse(path, message))?;
        self.apply_process_env(&mut file)?;
        Ok(file)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> CliResult<ConfigFile> {
        let mut file = parse_str(content, format).map_err(CliError::config)?;
        self.apply_process_env(&mut file)?;
        Ok(file)
    }

    fn apply_process_env(&self, file: &mut ConfigFile) -> CliResult<()> {
        if self.resolve_env_vars {
            self.apply_overrides(file, |key| env::var(key).ok())?;
        }
        Ok(())
    }

    /// Applies overrides looked up through `lookup`.
    ///
    /// Recognised variables, with the default prefix:
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `UA_ENDPOINT` | `client.endpoint` |
    /// | `UA_SECURITY_POLICY` | `client.security_policy` |
    /// | `UA_SECURITY_MODE` | `client.security_mode` |
    /// | `UA_USERNAME`, `UA_PASSWORD` | `client.identity` |
    /// | `UA_LOG_LEVEL` | `logging.level` |
    /// | `UA_LOG_FORMAT` | `logging.format` |
    pub fn apply_overrides<F>(&self, file: &mut ConfigFile, lookup: F) -> CliResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| format!("{}_{}", self.env_prefix, name);
        let get = |name: &str| lookup(&var(name)).filter(|v| !v.is_empty());

        if let Some(value) = get("ENDPOINT") {
            file.client.endpoint = value;
        }
        if let Some(value) = get("SECURITY_POLICY") {
            let policy: SecurityPolicy = value.parse().map_err(|_| {
                CliError::config(format!("{}: unknown security policy '{value}'", var("SECURITY_POLICY")))
            })?;
            file.client.security_policy = Some(policy);
        }
        if let Some(value) = get("SECURITY_MODE") {
            let mode: SecurityMode = value.parse().map_err(|_| {
                CliError::config(format!("{}: unknown security mode '{value}'", var("SECURITY_MODE")))
            })?;
            file.client.security_mode = Some(mode);
        }
        if let Some(username) = get("USERNAME") {
            let password = get("PASSWORD").unwrap_or_default();
            file.client.identity = IdentityConfig::UserName { username, password };
        }
        if let Some(value) = get("LOG_LEVEL") {
            file.logging.level = value;
        }
        if let Some(value) = get("LOG_FORMAT") {
            file.logging.format = parse_log_format(&value).ok_or_else(|| {
                CliError::config(format!(
                    "{}: expected text, json or compact, got '{value}'",
                    var("LOG_FORMAT")
                ))
            })?;
        }
        Ok(())
    }
}

/// Parses a string based on format.
fn parse_str(content: &str, format: ConfigFormat) -> Result<ConfigFile, String> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    }
}

fn parse_log_format(value: &str) -> Option<LogFormat> {
    match value.to_lowercase().as_str() {
        "text" | "pretty" => Some(LogFormat::Text),
        "json" => Some(LogFormat::Json),
        "compact" => Some(LogFormat::Compact),
        _ => None,
    }
}

// =============================================================================
// Command-line overrides
// =============================================================================

/// Applies command-line flags on top of the loaded file and validates the
/// resulting client configuration.
pub fn apply_cli(mut file: ConfigFile, cli: &Cli) -> CliResult<ConfigFile> {
    let client = &mut file.client;

    if let Some(endpoint) = &cli.endpoint {
        client.endpoint = endpoint.clone();
    }
    if let Some(policy) = &cli.security_policy {
        client.security_policy = Some(
            policy
                .parse()
                .map_err(|_| CliError::input(format!("unknown security policy '{policy}'")))?,
        );
    }
    if let Some(mode) = &cli.security_mode {
        client.security_mode = Some(
            mode.parse()
                .map_err(|_| CliError::input(format!("unknown security mode '{mode}'")))?,
        );
    }
    if let Some(username) = &cli.user {
        client.identity = IdentityConfig::UserName {
            username: username.clone(),
            password: cli.password.clone().unwrap_or_default(),
        };
    }
    if cli.trust_server {
        client.trust_on_first_use = true;
    }
    if let Some(timeout) = cli.timeout {
        client.request_timeout = timeout;
    }
    if let Some(format) = cli.log_format {
        file.logging.format = format;
    }
    file.logging.level = cli.effective_log_level(&file.logging.level);

    file.client
        .validate()
        .map_err(|e| CliError::config(e.to_string()))?;
    Ok(file)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::time::Duration;

    use clap::Parser;
    use tempfile::Builder;

    use super::*;

    const YAML: &str = r#"
client:
  endpoint: opc.tcp://plc:4840
  application_name: Line 3 Client
  security_policy: basic256_sha256
  security_mode: sign_and_encrypt
  request_timeout: 3s
  publish:
    outstanding_requests: 4
logging:
  level: debug
  format: json
"#;

    const TOML: &str = r#"
[client]
endpoint = "opc.tcp://plc:4840"
request_timeout = "750ms"
max_continuation_round_trips = 20

[client.identity]
type = "user_name"
username = "operator"
password = "secret"

[client.subscription]
publishing_interval = "250ms"
"#;

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env_vars(false)
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
        assert!(ConfigFormat::from_path(Path::new("a.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("client")).is_err());
    }

    #[test]
    fn test_load_yaml_string() {
        let file = loader().load_from_str(YAML, ConfigFormat::Yaml).unwrap();
        assert_eq!(file.client.endpoint, "opc.tcp://plc:4840");
        assert_eq!(file.client.application_name, "Line 3 Client");
        assert_eq!(file.client.security_policy, Some(SecurityPolicy::Basic256Sha256));
        assert_eq!(file.client.security_mode, Some(SecurityMode::SignAndEncrypt));
        assert_eq!(file.client.request_timeout, Duration::from_secs(3));
        assert_eq!(file.client.publish.outstanding_requests, 4);
        assert_eq!(file.logging.level, "debug");
        assert_eq!(file.logging.format, LogFormat::Json);
        file.client.validate().unwrap();
    }

    #[test]
    fn test_load_toml_file() {
        let mut tmp = Builder::new().suffix(".toml").tempfile().unwrap();
        tmp.write_all(TOML.as_bytes()).unwrap();

        let file = loader().load(tmp.path()).unwrap();
        assert_eq!(file.client.request_timeout, Duration::from_millis(750));
        assert_eq!(file.client.max_continuation_round_trips, 20);
        assert_eq!(file.client.subscription.publishing_interval, Duration::from_millis(250));
        assert_eq!(
            file.client.identity,
            IdentityConfig::UserName {
                username: "operator".to_string(),
                password: "secret".to_string(),
            }
        );
        assert_eq!(file.logging, LoggingSettings::default());
    }

    #[test]
    fn test_missing_file() {
        let err = loader().load("/nonexistent/uacli.yaml").unwrap_err();
        assert!(matches!(err, CliError::FileNotFound { .. }));
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut tmp = Builder::new().suffix(".yaml").tempfile().unwrap();
        tmp.write_all(b"client: [not, a, map]").unwrap();

        let err = loader().load(tmp.path()).unwrap_err();
        assert!(matches!(err, CliError::Parse { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_env_overrides() {
        let mut file = loader().load_from_str(YAML, ConfigFormat::Yaml).unwrap();
        loader()
            .apply_overrides(
                &mut file,
                env(&[
                    ("UA_ENDPOINT", "opc.tcp://backup:4841"),
                    ("UA_SECURITY_POLICY", "none"),
                    ("UA_SECURITY_MODE", "none"),
                    ("UA_LOG_LEVEL", "ua_client=trace"),
                    ("UA_LOG_FORMAT", "compact"),
                ]),
            )
            .unwrap();

        assert_eq!(file.client.endpoint, "opc.tcp://backup:4841");
        assert_eq!(file.client.security_policy, Some(SecurityPolicy::None));
        assert_eq!(file.client.security_mode, Some(SecurityMode::None));
        assert_eq!(file.logging.level, "ua_client=trace");
        assert_eq!(file.logging.format, LogFormat::Compact);
        // Untouched fields keep their file values.
        assert_eq!(file.client.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_env_overrides_custom_prefix() {
        let mut file = ConfigFile::default();
        ConfigLoader::new()
            .with_env_prefix("PLANT")
            .apply_overrides(
                &mut file,
                env(&[
                    ("PLANT_ENDPOINT", "opc.tcp://plant:4840"),
                    ("UA_ENDPOINT", "opc.tcp://ignored:4840"),
                    ("PLANT_USERNAME", "maint"),
                    ("PLANT_PASSWORD", "pw"),
                ]),
            )
            .unwrap();
        assert_eq!(file.client.endpoint, "opc.tcp://plant:4840");
        assert!(matches!(file.client.identity, IdentityConfig::UserName { ref username, .. } if username == "maint"));
    }

    #[test]
    fn test_env_override_rejects_bad_values() {
        let mut file = ConfigFile::default();
        let err = loader()
            .apply_overrides(&mut file, env(&[("UA_SECURITY_POLICY", "rot13")]))
            .unwrap_err();
        assert!(err.to_string().contains("UA_SECURITY_POLICY"));

        let err = loader()
            .apply_overrides(&mut file, env(&[("UA_LOG_FORMAT", "xml")]))
            .unwrap_err();
        assert!(err.to_string().contains("UA_LOG_FORMAT"));
    }

    #[test]
    fn test_endpoint_may_come_from_env_only() {
        let mut file = loader()
            .load_from_str("logging:\n  level: warn\n", ConfigFormat::Yaml)
            .unwrap();
        assert!(file.client.endpoint.is_empty());
        loader()
            .apply_overrides(&mut file, env(&[("UA_ENDPOINT", "opc.tcp://localhost:4840")]))
            .unwrap();
        file.client.validate().unwrap();
    }

    #[test]
    fn test_cli_flags_win() {
        let file = loader().load_from_str(YAML, ConfigFormat::Yaml).unwrap();
        let cli = Cli::parse_from([
            "uacli",
            "--endpoint",
            "opc.tcp://override:4840",
            "--security-policy",
            "none",
            "--security-mode",
            "none",
            "--user",
            "operator",
            "--password",
            "secret",
            "--timeout",
            "500ms",
            "--log-format",
            "text",
            "--verbose",
            "endpoints",
        ]);
        let file = apply_cli(file, &cli).unwrap();
        assert_eq!(file.client.endpoint, "opc.tcp://override:4840");
        assert_eq!(file.client.security_policy, Some(SecurityPolicy::None));
        assert_eq!(file.client.request_timeout, Duration::from_millis(500));
        assert!(matches!(file.client.identity, IdentityConfig::UserName { .. }));
        assert_eq!(file.logging.format, LogFormat::Text);
        assert_eq!(file.logging.level, "debug");
    }

    #[test]
    fn test_apply_cli_requires_endpoint() {
        let cli = Cli::parse_from(["uacli", "endpoints"]);
        let err = apply_cli(ConfigFile::default(), &cli).unwrap_err();
        assert!(matches!(err, CliError::Configuration(_)));
        assert!(err.to_string().contains("endpoint"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_apply_cli_rejects_unknown_policy() {
        let cli = Cli::parse_from([
            "uacli",
            "-e",
            "opc.tcp://plc:4840",
            "--security-policy",
            "rot13",
            "endpoints",
        ]);
        let err = apply_cli(ConfigFile::default(), &cli).unwrap_err();
        assert!(matches!(err, CliError::Input(_)));
    }
}
