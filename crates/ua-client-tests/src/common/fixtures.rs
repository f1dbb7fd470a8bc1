// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built certificates, configurations and requests.
//!
//! ## Design Principles
//!
//! - RSA keys are generated once per test binary and shared
//! - Client configurations use short timeouts so failures surface quickly
//! - Every client identity carries the application URI its configuration
//!   announces, so certificate stores never regenerate it

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use ua_client::codec::{ExtensionObject, TypeRegistry};
use ua_client::messages::{HistoryReadValueId, ReadProcessedDetails, ReadRawModifiedDetails};
use ua_client::security::{
    ApplicationIdentity, CertificateRequest, CertificateStore, MemoryStore, SelfSignedGenerator,
};
use ua_client::session::{EndpointSelection, Session, UserIdentity};
use ua_client::types::ids::object_ids;
use ua_client::types::{DateTime, NodeId};
use ua_client::{ClientConfig, ClientConfigBuilder, PublishSettings, SecurityMode, SecurityPolicy};

use super::mocks::{Vector, MOCK_SERVER_URI};

/// Application URI of the test client.
pub const CLIENT_URI: &str = "urn:ua-client-tests:client";

/// Application name of the test client.
pub const CLIENT_NAME: &str = "ua-client-tests";

/// Application URI carried by the X.509 user certificate.
pub const USER_URI: &str = "urn:ua-client-tests:operator";

// =============================================================================
// Certificate Fixtures
// =============================================================================

static SERVER_IDENTITY: OnceLock<ApplicationIdentity> = OnceLock::new();
static CLIENT_IDENTITY: OnceLock<ApplicationIdentity> = OnceLock::new();
static USER_IDENTITY: OnceLock<ApplicationIdentity> = OnceLock::new();

fn generate(name: &str, uri: &str) -> ApplicationIdentity {
    let request = CertificateRequest::new(name, uri).with_hostname("localhost");
    SelfSignedGenerator::new()
        .generate(&request)
        .expect("Failed to generate test certificate")
}

/// Fixture providing shared application certificates.
pub struct CertificateFixtures;

impl CertificateFixtures {
    /// Certificate and key of the mock server.
    pub fn server_identity() -> ApplicationIdentity {
        SERVER_IDENTITY
            .get_or_init(|| generate("Mock UA Server", MOCK_SERVER_URI))
            .clone()
    }

    /// Certificate and key of the test client.
    pub fn client_identity() -> ApplicationIdentity {
        CLIENT_IDENTITY
            .get_or_init(|| generate(CLIENT_NAME, CLIENT_URI))
            .clone()
    }

    /// Certificate and key of an operator authenticating with X.509.
    pub fn user_identity() -> ApplicationIdentity {
        USER_IDENTITY
            .get_or_init(|| generate("Test Operator", USER_URI))
            .clone()
    }

    /// A store that already holds the client identity and trusts any
    /// server on first contact.
    pub fn client_store() -> Arc<dyn CertificateStore> {
        Arc::new(MemoryStore::with_identity(Self::client_identity()).with_trust_on_first_use(true))
    }

    /// A store holding the client identity that trusts nothing.
    pub fn strict_store() -> Arc<dyn CertificateStore> {
        Arc::new(MemoryStore::with_identity(Self::client_identity()))
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Fixture providing client configurations.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A builder with the test application name, URI and short timeouts.
    pub fn builder(endpoint: &str) -> ClientConfigBuilder {
        ClientConfig::builder()
            .endpoint(endpoint)
            .application_name(CLIENT_NAME)
            .application_uri(CLIENT_URI)
            .connect_timeout(Duration::from_secs(2))
            .handshake_timeout(Duration::from_secs(5))
            .request_timeout(Duration::from_secs(5))
            .close_timeout(Duration::from_secs(1))
            .publish(Self::publish_settings())
    }

    /// Publish settings that keep polling quick.
    pub fn publish_settings() -> PublishSettings {
        PublishSettings {
            outstanding_requests: 2,
            publish_timeout: Duration::from_secs(5),
            no_subscription_backoff: Duration::from_millis(50),
            dispatch_queue: 256,
        }
    }

    /// Configuration for the None policy.
    pub fn insecure(endpoint: &str) -> ClientConfig {
        Self::builder(endpoint)
            .no_security()
            .build()
            .expect("Invalid insecure test config")
    }

    /// Configuration for an explicit policy and mode.
    pub fn secure(endpoint: &str, policy: SecurityPolicy, mode: SecurityMode) -> ClientConfig {
        Self::builder(endpoint)
            .security(policy, mode)
            .build()
            .expect("Invalid secure test config")
    }
}

// =============================================================================
// Session Fixtures
// =============================================================================

/// Fixture creating closed sessions wired to the test stores.
pub struct SessionFixtures;

impl SessionFixtures {
    /// Type registry that knows the demo [`Vector`] structure.
    pub fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::standard();
        registry.register::<Vector>();
        registry
    }

    /// A closed session using the client store.
    pub fn session(config: ClientConfig, identity: UserIdentity) -> Session {
        Self::session_with_store(config, identity, CertificateFixtures::client_store())
    }

    /// A closed session using `store`.
    pub fn session_with_store(
        config: ClientConfig,
        identity: UserIdentity,
        store: Arc<dyn CertificateStore>,
    ) -> Session {
        let selection = EndpointSelection::from_config(&config);
        Session::with_store(config, identity, selection, Self::registry(), store)
            .expect("Failed to create test session")
    }
}

// =============================================================================
// Identity Fixtures
// =============================================================================

/// Fixture providing user identities the mock server accepts or rejects.
pub struct IdentityFixtures;

impl IdentityFixtures {
    /// The mock server's default user.
    pub fn operator() -> UserIdentity {
        UserIdentity::user_name("operator", "secret")
    }

    /// The default user with a wrong password.
    pub fn wrong_password() -> UserIdentity {
        UserIdentity::user_name("operator", "not-the-password")
    }

    /// An X.509 user.
    pub fn certificate_user() -> UserIdentity {
        UserIdentity::x509(CertificateFixtures::user_identity())
    }
}

// =============================================================================
// History Fixtures
// =============================================================================

/// Fixture providing history requests.
pub struct HistoryFixtures;

impl HistoryFixtures {
    /// Raw details for `[start, end)` with at most `per_node` values per call.
    pub fn raw(start: DateTime, end: DateTime, per_node: u32) -> ExtensionObject {
        ExtensionObject::from_structure(ReadRawModifiedDetails {
            is_read_modified: false,
            start_time: start,
            end_time: end,
            num_values_per_node: per_node,
            return_bounds: false,
        })
    }

    /// Raw details covering the whole history of the demo node.
    pub fn everything(per_node: u32) -> ExtensionObject {
        Self::raw(DateTime::null(), DateTime::now(), per_node)
    }

    /// Averages over `[start, end)` in steps of `interval`.
    pub fn average(start: DateTime, end: DateTime, interval: Duration) -> ExtensionObject {
        ExtensionObject::from_structure(ReadProcessedDetails::new(
            start,
            end,
            interval,
            NodeId::numeric(0, object_ids::AGGREGATE_FUNCTION_AVERAGE),
        ))
    }

    /// A history read of one node.
    pub fn node(node_id: NodeId) -> HistoryReadValueId {
        HistoryReadValueId::new(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities_carry_configured_uris() {
        let client = CertificateFixtures::client_identity();
        assert_eq!(client.certificate.application_uri(), Some(CLIENT_URI));

        let server = CertificateFixtures::server_identity();
        assert_eq!(server.certificate.application_uri(), Some(MOCK_SERVER_URI));
        assert_ne!(client.certificate.der(), server.certificate.der());
    }

    #[test]
    fn test_insecure_config_matches_client_identity() {
        let config = ConfigFixtures::insecure("opc.tcp://127.0.0.1:4840/mock");
        assert_eq!(config.effective_application_uri(), CLIENT_URI);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }
}
