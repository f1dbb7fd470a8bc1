// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! A mock server plus an open client session, with teardown.
//!
//! ## Design Principles
//!
//! - One server per test, bound to its own loopback port
//! - The session is open and Active when the harness is returned
//! - `shutdown` closes the session before stopping the server

use std::future::Future;
use std::time::Duration;

use ua_client::session::{Session, SessionState, UserIdentity};
use ua_client::{ClientConfig, SecurityMode, SecurityPolicy};

use super::fixtures::{CertificateFixtures, ConfigFixtures, SessionFixtures};
use super::init_test_logging;
use super::mocks::{MockServer, MockServerConfig};

// =============================================================================
// TestHarness
// =============================================================================

/// A running mock server and a session connected to it.
pub struct TestHarness {
    /// The server.
    pub server: MockServer,
    /// An Active session.
    pub session: Session,
}

impl TestHarness {
    /// None policy, anonymous user.
    pub async fn insecure() -> Self {
        Self::builder().start().await
    }

    /// A secured server and a session using `policy` and `mode`.
    pub async fn secure(policy: SecurityPolicy, mode: SecurityMode) -> Self {
        Self::builder().security(policy, mode).start().await
    }

    /// Starts configuring a harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    /// Opens a second session against the same server.
    pub async fn open_session(&self, identity: UserIdentity) -> Session {
        let config = self.session.config().clone();
        let session = SessionFixtures::session(config, identity);
        session.open().await.expect("Failed to open additional session");
        session
    }

    /// Closes the session and stops the server.
    pub async fn shutdown(self) {
        if let Err(e) = self.session.close().await {
            tracing::debug!(error = %e, "Session close during teardown failed");
        }
        self.server.shutdown().await;
    }
}

// =============================================================================
// TestHarnessBuilder
// =============================================================================

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    server: Option<MockServerConfig>,
    security: Option<(SecurityPolicy, SecurityMode)>,
    identity: UserIdentity,
    configure: Option<Box<dyn FnOnce(ClientConfig) -> ClientConfig + Send>>,
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self {
            server: None,
            security: None,
            identity: UserIdentity::anonymous(),
            configure: None,
        }
    }
}

impl TestHarnessBuilder {
    /// Replaces the server configuration. Secured policies need a server
    /// identity in it.
    pub fn server(mut self, config: MockServerConfig) -> Self {
        self.server = Some(config);
        self
    }

    /// Requests a policy and mode; starts a secured server unless one was
    /// configured.
    pub fn security(mut self, policy: SecurityPolicy, mode: SecurityMode) -> Self {
        self.security = Some((policy, mode));
        self
    }

    /// Sets the user identity.
    pub fn identity(mut self, identity: UserIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Adjusts the client configuration after the defaults are applied.
    pub fn configure(mut self, f: impl FnOnce(ClientConfig) -> ClientConfig + Send + 'static) -> Self {
        self.configure = Some(Box::new(f));
        self
    }

    /// Starts the server without opening the session.
    pub async fn start_closed(self) -> TestHarness {
        init_test_logging();
        let (policy, mode) = self.security.unwrap_or((SecurityPolicy::None, SecurityMode::None));
        let server_config = self.server.unwrap_or_else(|| {
            if policy == SecurityPolicy::None {
                MockServerConfig::insecure()
            } else {
                MockServerConfig::secure(CertificateFixtures::server_identity())
            }
        });
        let server = MockServer::start(server_config)
            .await
            .expect("Failed to start mock server");

        let mut config = ConfigFixtures::secure(server.endpoint_url(), policy, mode);
        if let Some(configure) = self.configure {
            config = configure(config);
        }
        let session = SessionFixtures::session(config, self.identity);
        TestHarness { server, session }
    }

    /// Starts the server and opens the session.
    pub async fn start(self) -> TestHarness {
        let harness = self.start_closed().await;
        harness.session.open().await.expect("Failed to open test session");
        assert_eq!(harness.session.state(), SessionState::Active);
        harness
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Runs `future` with a deadline, panicking when it is exceeded.
pub async fn within<F: Future>(timeout: Duration, future: F) -> F::Output {
    match tokio::time::timeout(timeout, future).await {
        Ok(output) => output,
        Err(_) => panic!("Operation did not complete within {:?}", timeout),
    }
}
