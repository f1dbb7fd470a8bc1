// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the OPC UA client engine.
//!
//! Errors are grouped by the layer that detects them so callers can decide
//! how far the damage reaches:
//!
//! - **Handshake**: the channel never opened; nothing else is affected.
//! - **ChannelAborted**: the transport or a protocol check failed mid-flight;
//!   the channel is gone and every pending request fails with this error.
//! - **SessionInvalid**: the server no longer accepts the authentication token.
//!   The engine does not retry; the caller re-creates the session.
//! - **ServiceFault**: the server answered a well-formed request with a bad
//!   `ServiceResult`. Bad statuses *inside* result arrays are never turned
//!   into errors; they stay on the individual items.
//! - **Codec**: malformed or truncated wire data, fatal to the enclosing request.
//!
//! # Error Categories
//!
//! ```text
//! UaError
//! ├── Handshake       - Hello/OpenSecureChannel failures
//! ├── ChannelAborted  - Transport or protocol fault on an open channel
//! ├── SessionInvalid  - Server rejected the authentication token
//! ├── ServiceFault    - Bad ServiceResult in a response header
//! ├── Codec           - Malformed wire data
//! ├── Security        - Certificates, trust list, cryptography
//! ├── Session         - Local session/subscription state violations
//! ├── Timeout         - Request, handshake or close deadline elapsed
//! └── Configuration   - Invalid settings
//! ```
//!
//! # Examples
//!
//! ```
//! use ua_client::error::{UaError, HandshakeError, ErrorSeverity};
//!
//! let error = UaError::from(HandshakeError::unsupported_policy(
//!     "http://opcfoundation.org/UA/SecurityPolicy#Unknown",
//! ));
//!
//! assert!(!error.is_retryable());
//! assert_eq!(error.severity(), ErrorSeverity::Error);
//! assert_eq!(error.category(), "handshake");
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::types::StatusCode;

// =============================================================================
// UaError - Main Error Type
// =============================================================================

/// The main error type for client operations.
#[derive(Debug, Error)]
pub enum UaError {
    /// Channel could not be opened.
    #[error("{0}")]
    Handshake(#[from] HandshakeError),

    /// Channel was torn down while in use.
    #[error("{0}")]
    ChannelAborted(#[from] ChannelAbortedError),

    /// Session is no longer valid on the server.
    #[error("{0}")]
    SessionInvalid(#[from] SessionInvalidError),

    /// A service returned a bad ServiceResult.
    #[error("{0}")]
    ServiceFault(#[from] ServiceFault),

    /// Malformed wire data.
    #[error("{0}")]
    Codec(#[from] CodecError),

    /// Certificate, trust or crypto failure.
    #[error("{0}")]
    Security(#[from] SecurityError),

    /// Local session state violation.
    #[error("{0}")]
    Session(#[from] SessionError),

    /// Deadline elapsed.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// Invalid configuration.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),
}

impl UaError {
    // =========================================================================
    // Convenience Factory Methods
    // =========================================================================

    /// Creates a service fault error.
    pub fn service_fault(service: &'static str, status: StatusCode) -> Self {
        Self::ServiceFault(ServiceFault { service, status })
    }

    /// Creates a session invalid error.
    pub fn session_invalid(status: StatusCode) -> Self {
        Self::SessionInvalid(SessionInvalidError { status })
    }

    /// Creates a request timeout error.
    pub fn request_timeout(service: &'static str, request_handle: u32, duration: Duration) -> Self {
        Self::Timeout(TimeoutError::Request {
            service,
            request_handle,
            duration,
        })
    }

    /// Creates a "session not open" error.
    pub fn not_open(state: impl fmt::Display) -> Self {
        Self::Session(SessionError::NotOpen {
            state: state.to_string(),
        })
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if this error is retryable.
    ///
    /// The engine itself never retries; this is a hint for callers that layer
    /// a reconnect policy on top.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Handshake(e) => e.is_retryable(),
            Self::ChannelAborted(e) => e.is_retryable(),
            Self::SessionInvalid(_) => false,
            Self::ServiceFault(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::Codec(_) | Self::Security(_) | Self::Session(_) | Self::Configuration(_) => false,
        }
    }

    /// Returns `true` if the error means the channel is unusable.
    pub fn is_channel_fatal(&self) -> bool {
        matches!(self, Self::ChannelAborted(_) | Self::Handshake(_))
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Handshake(_) => ErrorSeverity::Error,
            Self::ChannelAborted(e) => e.severity(),
            Self::SessionInvalid(_) => ErrorSeverity::Error,
            Self::ServiceFault(_) => ErrorSeverity::Warning,
            Self::Codec(_) => ErrorSeverity::Error,
            Self::Security(e) => e.severity(),
            Self::Session(_) => ErrorSeverity::Warning,
            Self::Timeout(_) => ErrorSeverity::Warning,
            Self::Configuration(_) => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::ChannelAborted(_) => "channel",
            Self::SessionInvalid(_) => "session_invalid",
            Self::ServiceFault(_) => "service_fault",
            Self::Codec(_) => "codec",
            Self::Security(_) => "security",
            Self::Session(_) => "session",
            Self::Timeout(_) => "timeout",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Returns a unique error code for this error.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Handshake(e) => e.error_code(),
            Self::ChannelAborted(e) => e.error_code(),
            Self::SessionInvalid(_) => ErrorCode::new(3, 1),
            Self::ServiceFault(_) => ErrorCode::new(4, 1),
            Self::Codec(e) => e.error_code(),
            Self::Security(e) => e.error_code(),
            Self::Session(e) => e.error_code(),
            Self::Timeout(e) => e.error_code(),
            Self::Configuration(e) => e.error_code(),
        }
    }

    /// Maps the error onto the closest OPC UA status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Handshake(HandshakeError::Rejected { status, .. }) => *status,
            Self::Handshake(HandshakeError::UnsupportedPolicy { .. }) => {
                StatusCode::BAD_SECURITY_POLICY_REJECTED
            }
            Self::Handshake(_) => StatusCode::BAD_COMMUNICATION_ERROR,
            Self::ChannelAborted(ChannelAbortedError::ServerError { status, .. }) => *status,
            Self::ChannelAborted(ChannelAbortedError::SecurityCheckFailed { .. }) => {
                StatusCode::BAD_SECURITY_CHECKS_FAILED
            }
            Self::ChannelAborted(_) => StatusCode::BAD_SECURE_CHANNEL_CLOSED,
            Self::SessionInvalid(e) => e.status,
            Self::ServiceFault(e) => e.status,
            Self::Codec(_) => StatusCode::BAD_DECODING_ERROR,
            Self::Security(_) => StatusCode::BAD_SECURITY_CHECKS_FAILED,
            Self::Session(_) => StatusCode::BAD_INVALID_ARGUMENT,
            Self::Timeout(_) => StatusCode::BAD_TIMEOUT,
            Self::Configuration(_) => StatusCode::BAD_INVALID_ARGUMENT,
        }
    }

    /// Returns recovery hints for this error.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Handshake(e) => e.recovery_hints(),
            Self::ChannelAborted(_) => vec![
                "Open a new channel and re-activate the session",
                "Check network connectivity to the server",
            ],
            Self::SessionInvalid(_) => vec![
                "Create and activate a new session",
                "Re-create subscriptions on the new session",
            ],
            Self::ServiceFault(_) => vec!["Inspect the status code for the failing service"],
            Self::Codec(_) => vec!["Check that custom structures are registered in the type registry"],
            Self::Security(e) => e.recovery_hints(),
            Self::Session(_) => vec!["Open the session before issuing service calls"],
            Self::Timeout(_) => vec!["Increase the request timeout", "Check server load"],
            Self::Configuration(_) => vec!["Review the client configuration"],
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        let level = self.tracing_level();
        let code = self.error_code();

        match level {
            Level::ERROR => tracing::error!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                error_code = %code,
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

impl From<io::Error> for UaError {
    fn from(error: io::Error) -> Self {
        Self::ChannelAborted(ChannelAbortedError::from(error))
    }
}

// =============================================================================
// HandshakeError
// =============================================================================

/// Failures while opening a secure channel.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The requested security policy is not implemented.
    #[error("Unsupported security policy '{uri}'")]
    UnsupportedPolicy {
        /// Policy URI as requested.
        uri: String,
    },

    /// Policy and mode do not form a valid pair.
    #[error("Security mode '{mode}' cannot be used with policy '{policy}'")]
    PolicyMismatch {
        /// Policy name.
        policy: String,
        /// Mode name.
        mode: String,
    },

    /// A secured policy was requested without an application certificate.
    #[error("Security policy '{policy}' requires an application certificate")]
    CertificateRequired {
        /// Policy name.
        policy: String,
    },

    /// The server certificate is missing, malformed or not trusted.
    #[error("Server certificate rejected: {reason}")]
    CertificateRejected {
        /// Reason.
        reason: String,
    },

    /// The endpoint URL cannot be used.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpointUrl {
        /// The URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// TCP connect failed.
    #[error("Failed to connect to '{endpoint}'")]
    Connect {
        /// Target endpoint.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The handshake did not finish in time.
    #[error("Handshake with '{endpoint}' timed out after {duration:?}")]
    TimedOut {
        /// Target endpoint.
        endpoint: String,
        /// Timeout duration.
        duration: Duration,
    },

    /// The server answered with an ERR message or a bad OpenSecureChannel result.
    #[error("Server rejected the channel: {status} {reason}")]
    Rejected {
        /// Status reported by the server.
        status: StatusCode,
        /// Reason text reported by the server.
        reason: String,
    },

    /// The server sent a message that does not belong in the handshake.
    #[error("Unexpected '{actual}' message during handshake, expected '{expected}'")]
    UnexpectedMessage {
        /// Expected message type.
        expected: &'static str,
        /// Received message type.
        actual: String,
    },

    /// The OpenSecureChannel response failed a consistency check.
    #[error("Invalid OpenSecureChannel response: {reason}")]
    InvalidResponse {
        /// Reason.
        reason: String,
    },

    /// Discovery returned no endpoint matching the selection.
    #[error("No endpoint at '{url}' matches security policy '{policy}'")]
    NoSuitableEndpoint {
        /// Discovery URL.
        url: String,
        /// Requested policy (or `any`).
        policy: String,
    },

    /// The channel failed while the handshake was in progress.
    #[error("Channel failed during handshake: {0}")]
    Channel(#[source] ChannelAbortedError),
}

impl HandshakeError {
    /// Creates an unsupported policy error.
    pub fn unsupported_policy(uri: impl Into<String>) -> Self {
        Self::UnsupportedPolicy { uri: uri.into() }
    }

    /// Creates a certificate rejected error.
    pub fn certificate_rejected(reason: impl Into<String>) -> Self {
        Self::CertificateRejected {
            reason: reason.into(),
        }
    }

    /// Creates an invalid endpoint URL error.
    pub fn invalid_endpoint_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpointUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid response error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::TimedOut { .. } | Self::Channel(_)
        )
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::UnsupportedPolicy { .. } => 1,
            Self::PolicyMismatch { .. } => 2,
            Self::CertificateRequired { .. } => 3,
            Self::CertificateRejected { .. } => 4,
            Self::InvalidEndpointUrl { .. } => 5,
            Self::Connect { .. } => 6,
            Self::TimedOut { .. } => 7,
            Self::Rejected { .. } => 8,
            Self::UnexpectedMessage { .. } => 9,
            Self::InvalidResponse { .. } => 10,
            Self::NoSuitableEndpoint { .. } => 11,
            Self::Channel(_) => 12,
        };
        ErrorCode::new(1, code)
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::UnsupportedPolicy { .. } | Self::PolicyMismatch { .. } => vec![
                "Select an endpoint whose policy is supported by this client",
                "Use GetEndpoints to list what the server offers",
            ],
            Self::CertificateRequired { .. } => {
                vec!["Configure a PKI directory so an application certificate can be created"]
            }
            Self::CertificateRejected { .. } => vec![
                "Copy the server certificate into the trusted directory",
                "Enable trust-on-first-use for development setups",
            ],
            Self::Rejected { .. } => vec![
                "Trust the client certificate on the server",
                "Verify the server accepts this security policy and mode",
            ],
            Self::Connect { .. } | Self::TimedOut { .. } => vec![
                "Check that the server is running",
                "Verify host name and port of the endpoint URL",
            ],
            _ => vec!["Check server logs for the rejected handshake"],
        }
    }
}

// =============================================================================
// ChannelAbortedError
// =============================================================================

/// The secure channel was torn down. Cloned to every pending request.
#[derive(Debug, Clone, Error)]
pub enum ChannelAbortedError {
    /// The transport failed.
    #[error("Transport failure: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// The server sent an ERR message.
    #[error("Server closed the channel with {status}: {reason}")]
    ServerError {
        /// Status reported by the server.
        status: StatusCode,
        /// Reason text.
        reason: String,
    },

    /// A message violated the protocol (bad header, sequence gap, unknown token).
    #[error("Protocol violation: {reason}")]
    Protocol {
        /// Reason.
        reason: String,
    },

    /// Signature verification or decryption failed.
    #[error("Security check failed: {reason}")]
    SecurityCheckFailed {
        /// Reason.
        reason: String,
    },

    /// The security token expired before renewal completed.
    #[error("Security token expired before renewal completed")]
    TokenExpired,

    /// `abort()` was called.
    #[error("Channel aborted")]
    Aborted,

    /// The channel was closed normally while the request was outstanding.
    #[error("Channel closed")]
    Closed,

    /// The channel is not in a state that accepts requests.
    #[error("Channel is not open (state: {state})")]
    NotOpen {
        /// Current state.
        state: String,
    },

    /// A message was left partly written on the wire.
    #[error("Incomplete write: {reason}")]
    IncompleteWrite {
        /// Why the write stopped.
        reason: String,
    },
}

impl ChannelAbortedError {
    /// Creates a protocol violation error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Creates an incomplete write error.
    pub fn incomplete_write(reason: impl Into<String>) -> Self {
        Self::IncompleteWrite {
            reason: reason.into(),
        }
    }

    /// Creates a security check failure.
    pub fn security(reason: impl Into<String>) -> Self {
        Self::SecurityCheckFailed {
            reason: reason.into(),
        }
    }

    /// Returns `true` if reconnecting may help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::ServerError { .. }
                | Self::TokenExpired
                | Self::IncompleteWrite { .. }
        )
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Aborted | Self::Closed => ErrorSeverity::Info,
            Self::NotOpen { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Transport { .. } => 1,
            Self::ServerError { .. } => 2,
            Self::Protocol { .. } => 3,
            Self::SecurityCheckFailed { .. } => 4,
            Self::TokenExpired => 5,
            Self::Aborted => 6,
            Self::Closed => 7,
            Self::NotOpen { .. } => 8,
            Self::IncompleteWrite { .. } => 9,
        };
        ErrorCode::new(2, code)
    }
}

impl From<io::Error> for ChannelAbortedError {
    fn from(error: io::Error) -> Self {
        Self::Transport {
            message: error.to_string(),
        }
    }
}

// =============================================================================
// SessionInvalidError / ServiceFault
// =============================================================================

/// The server rejected the session's authentication token.
#[derive(Debug, Clone, Error)]
#[error("Session is no longer valid: {status}")]
pub struct SessionInvalidError {
    /// Status returned by the server.
    pub status: StatusCode,
}

/// A response whose header carried a bad ServiceResult.
#[derive(Debug, Clone, Error)]
#[error("{service} failed: {status}")]
pub struct ServiceFault {
    /// Service name.
    pub service: &'static str,
    /// ServiceResult from the response header.
    pub status: StatusCode,
}

impl ServiceFault {
    /// Returns `true` if repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status.code(),
            StatusCode::BAD_TIMEOUT
                | StatusCode::BAD_TOO_MANY_OPERATIONS
                | StatusCode::BAD_RESOURCE_UNAVAILABLE
                | StatusCode::BAD_REQUEST_TIMEOUT
        )
    }
}

// =============================================================================
// CodecError
// =============================================================================

/// Malformed or truncated wire data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    /// Not enough bytes left.
    #[error("Unexpected end of data: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        remaining: usize,
    },

    /// An encoding mask byte has an unknown value.
    #[error("Invalid encoding mask 0x{mask:02X} for {type_name}")]
    InvalidMask {
        /// Type being decoded.
        type_name: &'static str,
        /// Offending mask.
        mask: u8,
    },

    /// A value is outside its domain.
    #[error("Invalid {type_name}: {reason}")]
    InvalidValue {
        /// Type being decoded.
        type_name: &'static str,
        /// Reason.
        reason: String,
    },

    /// A length exceeds the configured decoding limits.
    #[error("{what} length {length} exceeds limit {limit}")]
    LimitExceeded {
        /// What was limited.
        what: &'static str,
        /// Observed length.
        length: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Structures nest deeper than allowed.
    #[error("Nesting depth exceeds {limit}")]
    DepthExceeded {
        /// Configured limit.
        limit: u32,
    },

    /// A message body carries a different type than expected.
    #[error("Unexpected type '{actual}', expected '{expected}'")]
    UnexpectedType {
        /// Expected type id.
        expected: String,
        /// Received type id.
        actual: String,
    },

    /// Trailing bytes after a complete message.
    #[error("{count} unread bytes after {type_name}")]
    TrailingBytes {
        /// Type just decoded.
        type_name: &'static str,
        /// Leftover bytes.
        count: usize,
    },
}

impl CodecError {
    /// Creates a truncated data error.
    pub fn truncated(needed: usize, remaining: usize) -> Self {
        Self::Truncated { needed, remaining }
    }

    /// Creates an invalid mask error.
    pub fn invalid_mask(type_name: &'static str, mask: u8) -> Self {
        Self::InvalidMask { type_name, mask }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            type_name,
            reason: reason.into(),
        }
    }

    /// Creates a limit exceeded error.
    pub fn limit_exceeded(what: &'static str, length: usize, limit: usize) -> Self {
        Self::LimitExceeded {
            what,
            length,
            limit,
        }
    }

    /// Creates an unexpected type error.
    pub fn unexpected_type(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::UnexpectedType {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::Truncated { .. } => 1,
            Self::InvalidMask { .. } => 2,
            Self::InvalidValue { .. } => 3,
            Self::LimitExceeded { .. } => 4,
            Self::DepthExceeded { .. } => 5,
            Self::UnexpectedType { .. } => 6,
            Self::TrailingBytes { .. } => 7,
        };
        ErrorCode::new(5, code)
    }
}

// =============================================================================
// SecurityError
// =============================================================================

/// Certificate store, trust list and cryptography errors.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Generating a key pair or certificate failed.
    #[error("Certificate generation failed: {reason}")]
    CertificateGeneration {
        /// Reason.
        reason: String,
    },

    /// A certificate could not be parsed.
    #[error("Invalid certificate: {reason}")]
    InvalidCertificate {
        /// Reason.
        reason: String,
    },

    /// A certificate is not in the trust list.
    #[error("Certificate '{subject}' ({thumbprint}) is not trusted")]
    Untrusted {
        /// Hex SHA-1 thumbprint.
        thumbprint: String,
        /// Subject name.
        subject: String,
    },

    /// Reading or writing the PKI directory failed.
    #[error("PKI I/O error at '{}'", .path.display())]
    Io {
        /// File or directory.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A cryptographic primitive failed.
    #[error("{operation} failed: {reason}")]
    Crypto {
        /// Operation name.
        operation: &'static str,
        /// Reason.
        reason: String,
    },

    /// A key needed for the operation is not available.
    #[error("Missing key material: {what}")]
    KeyMissing {
        /// What is missing.
        what: &'static str,
    },
}

impl SecurityError {
    /// Creates a crypto failure.
    pub fn crypto(operation: &'static str, reason: impl fmt::Display) -> Self {
        Self::Crypto {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Creates an invalid certificate error.
    pub fn invalid_certificate(reason: impl fmt::Display) -> Self {
        Self::InvalidCertificate {
            reason: reason.to_string(),
        }
    }

    /// Creates a generation failure.
    pub fn generation(reason: impl fmt::Display) -> Self {
        Self::CertificateGeneration {
            reason: reason.to_string(),
        }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Untrusted { .. } => ErrorSeverity::Warning,
            Self::Io { .. } | Self::CertificateGeneration { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::Error,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::CertificateGeneration { .. } => 1,
            Self::InvalidCertificate { .. } => 2,
            Self::Untrusted { .. } => 3,
            Self::Io { .. } => 4,
            Self::Crypto { .. } => 5,
            Self::KeyMissing { .. } => 6,
        };
        ErrorCode::new(6, code)
    }

    /// Returns recovery hints.
    pub fn recovery_hints(&self) -> Vec<&'static str> {
        match self {
            Self::Untrusted { .. } => vec![
                "Move the certificate from the rejected directory into the trusted directory",
            ],
            Self::Io { .. } => vec!["Check permissions of the PKI directory"],
            _ => vec!["Delete the application certificate so it is regenerated"],
        }
    }
}

// =============================================================================
// SessionError
// =============================================================================

/// Local session and subscription state violations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not active.
    #[error("Session is not open (state: {state})")]
    NotOpen {
        /// Current state.
        state: String,
    },

    /// `open()` was called twice.
    #[error("Session is already open")]
    AlreadyOpen,

    /// The client handle is already used in this subscription.
    #[error("Client handle {client_handle} is already used in subscription {subscription_id}")]
    DuplicateClientHandle {
        /// Subscription id.
        subscription_id: u32,
        /// Client handle.
        client_handle: u32,
    },

    /// The subscription is not known to this session.
    #[error("Unknown subscription {subscription_id}")]
    UnknownSubscription {
        /// Subscription id.
        subscription_id: u32,
    },

    /// A continuation loop hit its round-trip bound.
    #[error("{service} did not complete within {round_trips} round trips")]
    ContinuationLimit {
        /// Service name.
        service: &'static str,
        /// Round trips performed.
        round_trips: usize,
    },

    /// The endpoint does not accept the configured identity.
    #[error("Endpoint does not accept '{token_type}' user identity tokens")]
    IdentityNotSupported {
        /// Token type name.
        token_type: String,
    },

    /// A response was well-formed but inconsistent with the request.
    #[error("Unexpected response: {reason}")]
    UnexpectedResponse {
        /// Reason.
        reason: String,
    },
}

impl SessionError {
    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::NotOpen { .. } => 1,
            Self::AlreadyOpen => 2,
            Self::DuplicateClientHandle { .. } => 3,
            Self::UnknownSubscription { .. } => 4,
            Self::ContinuationLimit { .. } => 5,
            Self::IdentityNotSupported { .. } => 6,
            Self::UnexpectedResponse { .. } => 7,
        };
        ErrorCode::new(9, code)
    }
}

// =============================================================================
// TimeoutError
// =============================================================================

/// A deadline elapsed.
#[derive(Debug, Clone, Error)]
pub enum TimeoutError {
    /// A request received no response in time.
    #[error("{service} request {request_handle} timed out after {duration:?}")]
    Request {
        /// Service name.
        service: &'static str,
        /// Request handle.
        request_handle: u32,
        /// Timeout.
        duration: Duration,
    },

    /// Closing the channel took too long; it was torn down locally.
    #[error("Close timed out after {duration:?}")]
    Close {
        /// Timeout.
        duration: Duration,
    },
}

impl TimeoutError {
    /// Returns the timeout duration.
    pub fn duration(&self) -> Duration {
        match self {
            Self::Request { duration, .. } | Self::Close { duration } => *duration,
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Request { .. } => ErrorCode::new(8, 1),
            Self::Close { .. } => ErrorCode::new(8, 2),
        }
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Invalid client configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// Endpoint URL is malformed.
    #[error("Invalid endpoint URL '{url}': {reason}")]
    InvalidEndpoint {
        /// URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// A field has an invalid value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Reason.
        reason: String,
    },

    /// A node id string could not be parsed.
    #[error("Invalid node id '{input}': {reason}")]
    InvalidNodeId {
        /// Input string.
        input: String,
        /// Reason.
        reason: String,
    },

    /// Unknown security policy name.
    #[error("Invalid security policy '{value}'")]
    InvalidSecurityPolicy {
        /// Input string.
        value: String,
    },

    /// Unknown security mode name.
    #[error("Invalid security mode '{value}'")]
    InvalidSecurityMode {
        /// Input string.
        value: String,
    },

    /// A required field is missing.
    #[error("Missing required field '{field}'")]
    MissingField {
        /// Field name.
        field: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid node id error.
    pub fn invalid_node_id(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Returns the error code.
    pub fn error_code(&self) -> ErrorCode {
        let code = match self {
            Self::InvalidEndpoint { .. } => 1,
            Self::InvalidValue { .. } => 2,
            Self::InvalidNodeId { .. } => 3,
            Self::InvalidSecurityPolicy { .. } => 4,
            Self::InvalidSecurityMode { .. } => 5,
            Self::MissingField { .. } => 6,
        };
        ErrorCode::new(7, code)
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Structured error code for categorization.
///
/// Format: `UA-XXYY` where XX is category and YY is specific error.
///
/// Categories:
/// - 1: Handshake
/// - 2: Channel
/// - 3: Session invalid
/// - 4: Service fault
/// - 5: Codec
/// - 6: Security
/// - 7: Configuration
/// - 8: Timeout
/// - 9: Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Category (1-9).
    pub category: u8,
    /// Specific error within category.
    pub code: u8,
}

impl ErrorCode {
    /// Creates a new error code.
    pub const fn new(category: u8, code: u8) -> Self {
        Self { category, code }
    }

    /// Returns the full error code as a u16.
    pub fn as_u16(&self) -> u16 {
        ((self.category as u16) << 8) | (self.code as u16)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UA-{:02X}{:02X}", self.category, self.code)
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// A Result type with UaError.
pub type UaResult<T> = Result<T, UaError>;

/// A Result type for the codec.
pub type CodecResult<T> = Result<T, CodecError>;

// =============================================================================
// Error Context Extension
// =============================================================================

/// Extension trait that records context for failed results.
pub trait UaErrorContext<T> {
    /// Adds endpoint context to errors.
    fn with_endpoint(self, endpoint: &str) -> UaResult<T>;

    /// Adds session context to errors.
    fn with_session(self, session_id: &str) -> UaResult<T>;

    /// Adds service context to errors.
    fn with_service(self, service: &'static str) -> UaResult<T>;
}

impl<T> UaErrorContext<T> for UaResult<T> {
    fn with_endpoint(self, endpoint: &str) -> UaResult<T> {
        self.map_err(|e| {
            tracing::debug!(endpoint = endpoint, error = %e, "OPC UA error with endpoint context");
            e
        })
    }

    fn with_session(self, session_id: &str) -> UaResult<T> {
        self.map_err(|e| {
            tracing::debug!(session_id = session_id, error = %e, "OPC UA error with session context");
            e
        })
    }

    fn with_service(self, service: &'static str) -> UaResult<T> {
        self.map_err(|e| {
            tracing::debug!(service = service, error = %e, "OPC UA error with service context");
            e
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_error_retryable() {
        let refused = HandshakeError::Connect {
            endpoint: "opc.tcp://localhost:4840".into(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(refused.is_retryable());
        assert!(!HandshakeError::unsupported_policy("urn:x").is_retryable());
    }

    #[test]
    fn test_session_invalid_never_retryable() {
        let error = UaError::session_invalid(StatusCode::BAD_SESSION_ID_INVALID);
        assert!(!error.is_retryable());
        assert_eq!(error.status_code(), StatusCode::BAD_SESSION_ID_INVALID);
        assert_eq!(error.category(), "session_invalid");
    }

    #[test]
    fn test_channel_aborted_from_io() {
        let error: UaError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(error.is_channel_fatal());
        assert!(matches!(
            error,
            UaError::ChannelAborted(ChannelAbortedError::Transport { .. })
        ));
    }

    #[test]
    fn test_service_fault_display() {
        let error = UaError::service_fault("Read", StatusCode::BAD_TOO_MANY_OPERATIONS);
        assert!(error.to_string().contains("Read"));
        assert!(error.to_string().contains("BadTooManyOperations"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_error_code() {
        let code = ErrorCode::new(1, 5);
        assert_eq!(code.to_string(), "UA-0105");
        assert_eq!(code.as_u16(), 0x0105);
        assert_eq!(
            UaError::from(CodecError::truncated(4, 1)).error_code().to_string(),
            "UA-0501"
        );
    }

    #[test]
    fn test_recovery_hints() {
        let error = UaError::from(HandshakeError::certificate_rejected("untrusted"));
        assert!(error.recovery_hints().iter().any(|h| h.contains("trusted")));
    }

    #[test]
    fn test_timeout_error() {
        let error = UaError::request_timeout("Browse", 7, Duration::from_secs(5));
        assert!(error.is_retryable());
        assert_eq!(error.status_code(), StatusCode::BAD_TIMEOUT);
        assert!(error.to_string().contains("Browse request 7"));
    }
}
