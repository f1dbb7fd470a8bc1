// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the `uacli` binary.

use std::path::{Path, PathBuf};

use thiserror::Error;
use ua_client::types::StatusCode;
use ua_client::UaError;

/// Result type alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the `uacli` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The configuration file does not exist.
    #[error("Configuration file not found: {}", path.display())]
    FileNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse {}: {message}", path.display())]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A command-line argument could not be interpreted.
    #[error("Invalid input: {0}")]
    Input(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// The server rejected an individual operation.
    #[error("{operation} rejected: {status}")]
    Rejected {
        /// What was attempted.
        operation: String,
        /// Status returned for the operation.
        status: StatusCode,
    },

    /// The server or the client library reported an error.
    #[error("{0}")]
    Ua(#[from] UaError),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<CliError>,
    },
}

impl CliError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates an input error.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Creates a parse error for `path`.
    pub fn parse(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates an error for an operation the server answered with a bad status.
    pub fn rejected(operation: impl Into<String>, status: StatusCode) -> Self {
        Self::Rejected {
            operation: operation.into(),
            status,
        }
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the exit code for this error.
    ///
    /// Retryable library errors get their own code so scripts can loop on it.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::FileNotFound { .. } | Self::Parse { .. } => 1,
            Self::Input(_) => 2,
            Self::Ua(e) if e.is_retryable() => 4,
            Self::Ua(_) | Self::Rejected { .. } => 3,
            Self::Io(_) => 5,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Reports an error with its cause chain and recovery hints.
pub fn report_error(error: &CliError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }

    if let Some(ua) = root_ua_error(error) {
        eprintln!("  Code: {} ({})", ua.error_code(), ua.category());
        for hint in ua.recovery_hints() {
            eprintln!("  Hint: {}", hint);
        }
    }
}

/// Reports an error and exits with the appropriate code.
pub fn report_error_and_exit(error: CliError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

fn root_ua_error(error: &CliError) -> Option<&UaError> {
    match error {
        CliError::Ua(e) => Some(e),
        CliError::WithContext { source, .. } => root_ua_error(source),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
