// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client configuration.
//!
//! [`ClientConfig`] deserializes from YAML/TOML/JSON with humantime durations
//! and is validated before a session is opened.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use ua_client::config::ClientConfig;
//! use ua_client::security::{SecurityMode, SecurityPolicy};
//!
//! let config = ClientConfig::builder()
//!     .endpoint("opc.tcp://localhost:4840")
//!     .security(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt)
//!     .request_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.publish.outstanding_requests, 2);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::EndpointUrl;
use crate::error::{ConfigurationError, UaError, UaResult};
use crate::security::certificate::CertificateRequest;
use crate::security::{SecurityMode, SecurityPolicy};

// =============================================================================
// IdentityConfig
// =============================================================================

/// User identity as written in configuration files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityConfig {
    /// No user.
    #[default]
    Anonymous,
    /// User name and password.
    UserName {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// X.509 user certificate.
    Certificate {
        /// Certificate file (DER or PEM).
        certificate_path: PathBuf,
        /// PKCS#8 PEM private key file.
        private_key_path: PathBuf,
    },
}

// =============================================================================
// TransportLimits
// =============================================================================

/// Limits proposed in the Hello message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportLimits {
    /// Largest chunk the client can receive.
    pub receive_buffer_size: u32,
    /// Largest chunk the client will send.
    pub send_buffer_size: u32,
    /// Largest message the client accepts; 0 means no limit.
    pub max_message_size: u32,
    /// Most chunks per message the client accepts; 0 means no limit.
    pub max_chunk_count: u32,
}

/// Smallest buffer size a UA-TCP peer may propose.
pub const MIN_BUFFER_SIZE: u32 = 8192;

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 0,
        }
    }
}

// =============================================================================
// PublishSettings
// =============================================================================

/// Publish loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Publish requests kept outstanding while subscriptions exist.
    #[serde(default = "default_outstanding_requests")]
    pub outstanding_requests: usize,

    /// Timeout of a single Publish request.
    #[serde(default = "default_publish_timeout")]
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,

    /// Pause after the server reports BadNoSubscription.
    #[serde(default = "default_no_subscription_backoff")]
    #[serde(with = "humantime_serde")]
    pub no_subscription_backoff: Duration,

    /// Capacity of each subscription's notification queue.
    #[serde(default = "default_dispatch_queue")]
    pub dispatch_queue: usize,
}

fn default_outstanding_requests() -> usize {
    2
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_no_subscription_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_dispatch_queue() -> usize {
    1024
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            outstanding_requests: default_outstanding_requests(),
            publish_timeout: default_publish_timeout(),
            no_subscription_backoff: default_no_subscription_backoff(),
            dispatch_queue: default_dispatch_queue(),
        }
    }
}

// =============================================================================
// SubscriptionSettings
// =============================================================================

/// Parameters for new subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSettings {
    /// Publishing interval.
    #[serde(default = "default_publishing_interval")]
    #[serde(with = "humantime_serde")]
    pub publishing_interval: Duration,

    /// Lifetime in publishing intervals.
    #[serde(default = "default_lifetime_count")]
    pub lifetime_count: u32,

    /// Keep-alive count in publishing intervals.
    #[serde(default = "default_keepalive_count")]
    pub max_keepalive_count: u32,

    /// Maximum notifications per Publish response; 0 means no limit.
    #[serde(default)]
    pub max_notifications_per_publish: u32,

    /// Relative priority.
    #[serde(default)]
    pub priority: u8,

    /// Start with publishing enabled.
    #[serde(default = "default_true")]
    pub publishing_enabled: bool,
}

fn default_publishing_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_lifetime_count() -> u32 {
    60
}

fn default_keepalive_count() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            publishing_interval: default_publishing_interval(),
            lifetime_count: default_lifetime_count(),
            max_keepalive_count: default_keepalive_count(),
            max_notifications_per_publish: 0,
            priority: 0,
            publishing_enabled: true,
        }
    }
}

impl SubscriptionSettings {
    /// Settings with the given publishing interval.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            publishing_interval: interval,
            ..Default::default()
        }
    }

    /// 100 ms publishing.
    pub fn fast() -> Self {
        Self::with_interval(Duration::from_millis(100))
    }

    /// 5 s publishing.
    pub fn slow() -> Self {
        Self::with_interval(Duration::from_secs(5))
    }

    /// Publishing interval in milliseconds.
    pub fn publishing_interval_ms(&self) -> f64 {
        self.publishing_interval.as_secs_f64() * 1000.0
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Application name, also the certificate common name.
    #[serde(default = "default_application_name")]
    pub application_name: String,

    /// Application URI; derived from the name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_uri: Option<String>,

    /// Product URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_uri: Option<String>,

    /// Server endpoint or discovery URL.
    #[serde(default)]
    pub endpoint: String,

    /// Preferred security policy; the most secure offered one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_policy: Option<SecurityPolicy>,

    /// Preferred security mode; the most secure offered one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_mode: Option<SecurityMode>,

    /// User identity.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// PKI directory; a per-user data directory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pki_dir: Option<PathBuf>,

    /// Trust unknown server certificates on first contact.
    #[serde(default)]
    pub trust_on_first_use: bool,

    /// RSA key size for a generated application certificate.
    #[serde(default = "default_key_size")]
    pub certificate_key_size: usize,

    /// Session name shown by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout")]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Hello and OpenSecureChannel timeout.
    #[serde(default = "default_handshake_timeout")]
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,

    /// Default per-request timeout.
    #[serde(default = "default_request_timeout")]
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Bound on CloseSession and CloseSecureChannel.
    #[serde(default = "default_close_timeout")]
    #[serde(with = "humantime_serde")]
    pub close_timeout: Duration,

    /// Requested secure channel lifetime.
    #[serde(default = "default_channel_lifetime")]
    #[serde(with = "humantime_serde")]
    pub channel_lifetime: Duration,

    /// Requested session timeout.
    #[serde(default = "default_session_timeout")]
    #[serde(with = "humantime_serde")]
    pub session_timeout: Duration,

    /// Hello limits.
    #[serde(default)]
    pub transport: TransportLimits,

    /// Publish loop tuning.
    #[serde(default)]
    pub publish: PublishSettings,

    /// Defaults for new subscriptions.
    #[serde(default)]
    pub subscription: SubscriptionSettings,

    /// Most Next round trips a continuation loop may issue.
    #[serde(default = "default_max_continuation_round_trips")]
    pub max_continuation_round_trips: u32,
}

fn default_application_name() -> String {
    "UA Client".to_string()
}

fn default_key_size() -> usize {
    2048
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_close_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_channel_lifetime() -> Duration {
    Duration::from_secs(3600)
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_continuation_round_trips() -> u32 {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            application_uri: None,
            product_uri: None,
            endpoint: String::new(),
            security_policy: None,
            security_mode: None,
            identity: IdentityConfig::default(),
            pki_dir: None,
            trust_on_first_use: false,
            certificate_key_size: default_key_size(),
            session_name: None,
            connect_timeout: default_connect_timeout(),
            handshake_timeout: default_handshake_timeout(),
            request_timeout: default_request_timeout(),
            close_timeout: default_close_timeout(),
            channel_lifetime: default_channel_lifetime(),
            session_timeout: default_session_timeout(),
            transport: TransportLimits::default(),
            publish: PublishSettings::default(),
            subscription: SubscriptionSettings::default(),
            max_continuation_round_trips: default_max_continuation_round_trips(),
        }
    }
}

impl ClientConfig {
    /// Creates a builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Creates a configuration with defaults for everything but the endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Checks the configuration for consistency.
    pub fn validate(&self) -> UaResult<()> {
        if self.endpoint.is_empty() {
            return Err(ConfigurationError::missing_field("endpoint").into());
        }
        EndpointUrl::parse(&self.endpoint)?;

        if self.application_name.trim().is_empty() {
            return Err(
                ConfigurationError::invalid_value("application_name", "must not be empty").into(),
            );
        }

        if let (Some(policy), Some(mode)) = (self.security_policy, self.security_mode) {
            if policy.check_mode(mode).is_err() {
                return Err(ConfigurationError::invalid_value(
                    "security_mode",
                    format!("{mode} cannot be used with {}", policy.name()),
                )
                .into());
            }
        }

        if self.certificate_key_size < 2048 {
            return Err(ConfigurationError::invalid_value(
                "certificate_key_size",
                "must be at least 2048 bits",
            )
            .into());
        }

        for (field, value) in [
            ("connect_timeout", self.connect_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("request_timeout", self.request_timeout),
            ("close_timeout", self.close_timeout),
            ("channel_lifetime", self.channel_lifetime),
            ("session_timeout", self.session_timeout),
            ("publish.publish_timeout", self.publish.publish_timeout),
            ("subscription.publishing_interval", self.subscription.publishing_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigurationError::invalid_value(field, "must be greater than 0").into());
            }
        }

        if self.transport.receive_buffer_size < MIN_BUFFER_SIZE
            || self.transport.send_buffer_size < MIN_BUFFER_SIZE
        {
            return Err(ConfigurationError::invalid_value(
                "transport",
                format!("buffer sizes must be at least {MIN_BUFFER_SIZE}"),
            )
            .into());
        }

        if self.publish.outstanding_requests == 0 {
            return Err(ConfigurationError::invalid_value(
                "publish.outstanding_requests",
                "must be at least 1",
            )
            .into());
        }
        if self.publish.dispatch_queue == 0 {
            return Err(
                ConfigurationError::invalid_value("publish.dispatch_queue", "must be at least 1")
                    .into(),
            );
        }

        if self.max_continuation_round_trips == 0 {
            return Err(ConfigurationError::invalid_value(
                "max_continuation_round_trips",
                "must be at least 1",
            )
            .into());
        }

        Ok(())
    }

    /// Application URI, derived from the name when not configured.
    pub fn effective_application_uri(&self) -> String {
        self.application_uri.clone().unwrap_or_else(|| {
            let host = hostname();
            format!(
                "urn:{}:{}",
                host,
                self.application_name.replace(char::is_whitespace, "")
            )
        })
    }

    /// Product URI, derived from the application URI when not configured.
    pub fn effective_product_uri(&self) -> String {
        self.product_uri
            .clone()
            .unwrap_or_else(|| "urn:sylvex:ua-client".to_string())
    }

    /// PKI directory, falling back to the user's data directory.
    pub fn effective_pki_dir(&self) -> PathBuf {
        self.pki_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("ua-client")
                .join("pki")
        })
    }

    /// Session name, derived from the application name when not configured.
    pub fn effective_session_name(&self) -> String {
        self.session_name
            .clone()
            .unwrap_or_else(|| format!("{} Session", self.application_name))
    }

    /// Parameters for generating the application certificate.
    pub fn certificate_request(&self) -> CertificateRequest {
        CertificateRequest::new(&self.application_name, self.effective_application_uri())
            .with_hostname(hostname())
            .with_key_size(self.certificate_key_size)
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl TryFrom<ClientConfig> for ClientConfigBuilder {
    type Error = UaError;

    fn try_from(config: ClientConfig) -> Result<Self, Self::Error> {
        config.validate()?;
        Ok(Self {
            config: Some(config),
            ..Default::default()
        })
    }
}

// =============================================================================
// ClientConfigBuilder
// =============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: Option<ClientConfig>,
    endpoint: Option<String>,
}

impl ClientConfigBuilder {
    fn config(&mut self) -> &mut ClientConfig {
        self.config.get_or_insert_with(ClientConfig::default)
    }

    /// Sets the endpoint URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the application name.
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.config().application_name = name.into();
        self
    }

    /// Sets the application URI.
    pub fn application_uri(mut self, uri: impl Into<String>) -> Self {
        self.config().application_uri = Some(uri.into());
        self
    }

    /// Sets the product URI.
    pub fn product_uri(mut self, uri: impl Into<String>) -> Self {
        self.config().product_uri = Some(uri.into());
        self
    }

    /// Sets the preferred policy and mode.
    pub fn security(mut self, policy: SecurityPolicy, mode: SecurityMode) -> Self {
        let config = self.config();
        config.security_policy = Some(policy);
        config.security_mode = Some(mode);
        self
    }

    /// Requires the None policy.
    pub fn no_security(self) -> Self {
        self.security(SecurityPolicy::None, SecurityMode::None)
    }

    /// Sets the user identity.
    pub fn identity(mut self, identity: IdentityConfig) -> Self {
        self.config().identity = identity;
        self
    }

    /// Uses user name and password.
    pub fn username(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.identity(IdentityConfig::UserName {
            username: username.into(),
            password: password.into(),
        })
    }

    /// Sets the PKI directory.
    pub fn pki_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config().pki_dir = Some(dir.into());
        self
    }

    /// Enables trust-on-first-use.
    pub fn trust_on_first_use(mut self, enabled: bool) -> Self {
        self.config().trust_on_first_use = enabled;
        self
    }

    /// Sets the session name.
    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config().session_name = Some(name.into());
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config().connect_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config().handshake_timeout = timeout;
        self
    }

    /// Sets the default request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config().request_timeout = timeout;
        self
    }

    /// Sets the close timeout.
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config().close_timeout = timeout;
        self
    }

    /// Sets the requested channel lifetime.
    pub fn channel_lifetime(mut self, lifetime: Duration) -> Self {
        self.config().channel_lifetime = lifetime;
        self
    }

    /// Sets the requested session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config().session_timeout = timeout;
        self
    }

    /// Sets the transport limits.
    pub fn transport(mut self, limits: TransportLimits) -> Self {
        self.config().transport = limits;
        self
    }

    /// Sets the publish loop settings.
    pub fn publish(mut self, settings: PublishSettings) -> Self {
        self.config().publish = settings;
        self
    }

    /// Sets the number of outstanding Publish requests.
    pub fn outstanding_publish_requests(mut self, count: usize) -> Self {
        self.config().publish.outstanding_requests = count;
        self
    }

    /// Sets the default subscription settings.
    pub fn subscription(mut self, settings: SubscriptionSettings) -> Self {
        self.config().subscription = settings;
        self
    }

    /// Sets the continuation round-trip bound.
    pub fn max_continuation_round_trips(mut self, count: u32) -> Self {
        self.config().max_continuation_round_trips = count;
        self
    }

    /// Builds and validates the configuration.
    pub fn build(mut self) -> UaResult<ClientConfig> {
        let endpoint = self.endpoint.take();
        let mut config = self.config.unwrap_or_default();
        if let Some(endpoint) = endpoint {
            config.endpoint = endpoint;
        }
        config.validate()?;
        Ok(config)
    }
}
