// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Connection Integration Tests
//!
//! Endpoint discovery, session lifecycle and user identities against the
//! mock server.
//!
//! ## Test Categories
//!
//! - `test_discovery_*`: GetEndpoints and endpoint selection
//! - `test_lifecycle_*`: open, close, abort, reconnect
//! - `test_identity_*`: anonymous, user name and certificate users
//! - `test_security_*`: every policy and mode, certificate trust

use std::sync::Arc;
use std::time::Duration;

use ua_client::security::{CertificateStore, DirectoryStore, SecurityMode, SecurityPolicy};
use ua_client::session::{get_endpoints, select_endpoint, EndpointSelection, SessionState, UserIdentity};
use ua_client::types::StatusCode;
use ua_client::{HandshakeError, Session, SessionError, UaError};

use ua_client_tests::prelude::*;

async fn wait_for_channel_loss(harness: &TestHarness) {
    let session = &harness.session;
    eventually(Duration::from_secs(5), "channel did not notice the dropped connection", || {
        session.channel().map_or(true, |c| !c.state().is_usable())
    })
    .await;
}

// =============================================================================
// Discovery Tests
// =============================================================================

#[tokio::test]
async fn test_discovery_lists_every_endpoint() {
    init_test_logging();
    let server = MockServer::start(MockServerConfig::secure(CertificateFixtures::server_identity()))
        .await
        .unwrap();
    let config = ConfigFixtures::insecure(server.endpoint_url());

    let endpoints = get_endpoints(&config, server.endpoint_url(), Arc::new(SessionFixtures::registry()))
        .await
        .unwrap();

    assert_eq!(endpoints.len(), 11);
    let server_der = server.server_certificate().unwrap().der().to_vec();
    for endpoint in &endpoints {
        assert_eq!(endpoint.server.application_uri, MOCK_SERVER_URI);
        assert_eq!(endpoint.server_certificate.as_bytes(), server_der.as_slice());
        assert_eq!(endpoint.user_identity_tokens.as_ref().map(Vec::len), Some(3));
    }
    assert_eq!(server.stats().channels_opened(), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_discovery_selects_highest_security_level() {
    init_test_logging();
    let server = MockServer::start(MockServerConfig::secure(CertificateFixtures::server_identity()))
        .await
        .unwrap();
    let config = ConfigFixtures::insecure(server.endpoint_url());
    let endpoints = get_endpoints(&config, server.endpoint_url(), Arc::new(SessionFixtures::registry()))
        .await
        .unwrap();

    let best = select_endpoint(&endpoints, None, None).unwrap();
    let max_level = endpoints.iter().map(|e| e.security_level).max().unwrap();
    assert_eq!(best.security_level, max_level);

    let sign_only = select_endpoint(&endpoints, Some(SecurityPolicy::Basic256Sha256), Some(SecurityMode::Sign)).unwrap();
    assert_eq!(sign_only.security_policy_uri, SecurityPolicy::Basic256Sha256.uri());
    assert_eq!(sign_only.security_mode, SecurityMode::Sign.to_message_mode());
    server.shutdown().await;
}

#[tokio::test]
async fn test_discovery_only_offered_endpoints_are_selectable() {
    let server_config = MockServerConfig::secure(CertificateFixtures::server_identity())
        .with_endpoints(vec![(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt)]);
    let harness = TestHarness::builder()
        .security(SecurityPolicy::Basic256Sha256, SecurityMode::Sign)
        .server(server_config)
        .start_closed()
        .await;

    let config = harness.session.config().clone();
    let endpoints = get_endpoints(&config, harness.server.endpoint_url(), Arc::new(SessionFixtures::registry()))
        .await
        .unwrap();
    assert_eq!(endpoints.len(), 1);

    let err = harness.session.open().await.unwrap_err();
    assert!(
        matches!(err, UaError::Handshake(HandshakeError::NoSuitableEndpoint { .. })),
        "unexpected error: {err:?}"
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_discovery_without_matching_endpoint_fails() {
    let harness = TestHarness::builder()
        .security(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt)
        .server(MockServerConfig::insecure())
        .start_closed()
        .await;

    let err = harness.session.open().await.unwrap_err();
    assert!(
        matches!(err, UaError::Handshake(HandshakeError::NoSuitableEndpoint { .. })),
        "unexpected error: {err:?}"
    );
    assert_eq!(harness.session.state(), SessionState::Faulted);
    assert_eq!(harness.server.stats().sessions_created(), 0);
    harness.shutdown().await;
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_lifecycle_open_and_close() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;

    let info = session.info().unwrap();
    assert!(!info.session_id.is_null());
    assert!(info.revised_timeout >= Duration::from_secs(10));
    assert_eq!(session.security_policy(), Some(SecurityPolicy::None));
    assert_eq!(harness.server.session_count(), 1);
    assert_eq!(session.stats().creations(), 1);
    assert_eq!(session.stats().activations(), 1);

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.info().is_none());
    assert_eq!(harness.server.stats().sessions_closed(), 1);
    assert_eq!(harness.server.session_count(), 0);

    // Closing twice is a no-op.
    session.close().await.unwrap();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_open_twice_is_rejected() {
    let harness = TestHarness::insecure().await;

    let err = harness.session.open().await.unwrap_err();
    assert!(matches!(err, UaError::Session(SessionError::AlreadyOpen)));
    assert_eq!(harness.session.state(), SessionState::Active);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_services_require_open_session() {
    let harness = TestHarness::builder().start_closed().await;

    let err = harness.session.read_value(DemoNodes::temperature()).await.unwrap_err();
    assert!(matches!(err, UaError::Session(SessionError::NotOpen { .. })));
    assert_eq!(harness.server.stats().connections(), 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_state_transitions_are_observable() {
    let harness = TestHarness::builder().start_closed().await;
    let mut states = harness.session.subscribe_state();
    let initial = *states.borrow_and_update();
    let recorder = tokio::spawn(async move {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == SessionState::Active {
                break;
            }
        }
        seen
    });

    harness.session.open().await.unwrap();
    let seen = within(Duration::from_secs(5), recorder).await.unwrap();
    assert_eq!(initial, SessionState::Closed);
    assert_eq!(seen.last(), Some(&SessionState::Active));
    assert!(!seen.contains(&SessionState::Faulted));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_abort_stays_local() {
    let harness = TestHarness::insecure().await;

    harness.session.abort();
    harness.session.abort();
    assert_eq!(harness.session.state(), SessionState::Closed);
    assert!(harness.session.channel().is_none());
    // The server never heard a CloseSession.
    assert_eq!(harness.server.stats().sessions_closed(), 0);
    assert_eq!(harness.server.session_count(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_reconnect_keeps_session() {
    let harness = TestHarness::insecure().await;
    let session_id = harness.session.session_id().unwrap();

    harness.server.drop_connections();
    wait_for_channel_loss(&harness).await;
    let err = harness.session.read_value(DemoNodes::temperature()).await.unwrap_err();
    assert!(err.is_channel_fatal(), "unexpected error: {err:?}");

    harness.session.reconnect().await.unwrap();
    assert_eq!(harness.session.state(), SessionState::Active);
    assert_eq!(harness.session.session_id(), Some(session_id));
    assert_eq!(harness.session.stats().reconnections(), 1);
    assert_eq!(harness.server.stats().sessions_created(), 1);
    assert_eq!(harness.server.stats().activations(), 2);

    let value = harness.session.read_value(DemoNodes::temperature()).await.unwrap();
    value.assert_good();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_reconnect_after_server_restart_faults() {
    let harness = TestHarness::insecure().await;

    harness.server.drop_connections();
    harness.server.invalidate_sessions();
    wait_for_channel_loss(&harness).await;

    let err = harness.session.reconnect().await.unwrap_err();
    assert!(matches!(err, UaError::SessionInvalid(_)), "unexpected error: {err:?}");
    assert_eq!(harness.session.state(), SessionState::Faulted);

    // A faulted session can be opened from scratch.
    harness.session.open().await.unwrap();
    assert_eq!(harness.session.state(), SessionState::Active);
    assert_eq!(harness.server.stats().sessions_created(), 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_session_invalid_faults_session() {
    let harness = TestHarness::insecure().await;

    assert_eq!(harness.server.invalidate_sessions(), 1);
    harness
        .session
        .read_value(DemoNodes::temperature())
        .await
        .assert_session_invalid();
    assert_eq!(harness.session.state(), SessionState::Faulted);

    let err = harness.session.read_value(DemoNodes::temperature()).await.unwrap_err();
    assert!(matches!(err, UaError::Session(SessionError::NotOpen { .. })));

    // Close from Faulted skips CloseSession.
    harness.session.close().await.unwrap();
    assert_eq!(harness.session.state(), SessionState::Closed);
    assert_eq!(harness.server.stats().requests("CloseSession"), 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_lifecycle_close_after_connection_loss() {
    let harness = TestHarness::insecure().await;

    harness.server.drop_connections();
    wait_for_channel_loss(&harness).await;

    // The outcome may carry the transport failure; the state may not.
    let _ = harness.session.close().await;
    assert_eq!(harness.session.state(), SessionState::Closed);
    harness.shutdown().await;
}

// =============================================================================
// Identity Tests
// =============================================================================

#[tokio::test]
async fn test_identity_anonymous() {
    let harness = TestHarness::insecure().await;

    assert_eq!(harness.server.activated_users(), vec![None]);
    assert!(matches!(harness.session.user_identity(), UserIdentity::Anonymous));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_identity_user_name() {
    let harness = TestHarness::builder()
        .identity(IdentityFixtures::operator())
        .start()
        .await;

    assert_eq!(harness.server.activated_users(), vec![Some("operator".to_string())]);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_identity_user_name_encrypted_with_server_key() {
    let harness = TestHarness::builder()
        .security(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt)
        .identity(IdentityFixtures::operator())
        .start()
        .await;

    assert_eq!(harness.server.activated_users(), vec![Some("operator".to_string())]);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_identity_additional_user() {
    let harness = TestHarness::builder()
        .server(MockServerConfig::insecure().with_user("maintenance", "wrench"))
        .identity(UserIdentity::user_name("maintenance", "wrench"))
        .start()
        .await;

    assert_eq!(harness.server.activated_users(), vec![Some("maintenance".to_string())]);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_identity_wrong_password_is_rejected() {
    let harness = TestHarness::builder()
        .identity(IdentityFixtures::wrong_password())
        .start_closed()
        .await;

    let err = harness.session.open().await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::BAD_USER_ACCESS_DENIED);
    assert_eq!(harness.session.state(), SessionState::Faulted);
    assert!(harness.session.channel().is_none());
    assert!(harness.server.activated_users().is_empty());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_identity_certificate_user() {
    let harness = TestHarness::builder()
        .security(SecurityPolicy::Basic256Sha256, SecurityMode::Sign)
        .identity(IdentityFixtures::certificate_user())
        .start()
        .await;

    let subject = CertificateFixtures::user_identity().certificate.subject().to_string();
    assert_eq!(harness.server.activated_users(), vec![Some(subject)]);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_identity_sessions_are_independent() {
    let harness = TestHarness::insecure().await;
    let second = harness.open_session(IdentityFixtures::operator()).await;

    assert_eq!(harness.server.session_count(), 2);
    assert_ne!(second.session_id(), harness.session.session_id());

    second.close().await.unwrap();
    let value = harness.session.read_value(DemoNodes::name()).await.unwrap();
    value.assert_value(&"boiler-1".into());
    harness.shutdown().await;
}

// =============================================================================
// Security Tests
// =============================================================================

#[tokio::test]
async fn test_security_every_policy_and_mode() {
    init_test_logging();
    let server = MockServer::start(MockServerConfig::secure(CertificateFixtures::server_identity()))
        .await
        .unwrap();

    for policy in SecurityPolicy::ALL {
        let modes: &[SecurityMode] = if policy == SecurityPolicy::None {
            &[SecurityMode::None]
        } else {
            &[SecurityMode::Sign, SecurityMode::SignAndEncrypt]
        };
        for &mode in modes {
            let config = ConfigFixtures::secure(server.endpoint_url(), policy, mode);
            let session = SessionFixtures::session(config, UserIdentity::anonymous());
            session
                .open()
                .await
                .unwrap_or_else(|e| panic!("{} / {mode} failed to open: {e}", policy.name()));
            assert_eq!(session.security_policy(), Some(policy));
            assert_eq!(session.security_mode(), Some(mode));

            let written = session.write_value(DemoNodes::temperature(), 30.0f64).await.unwrap();
            assert!(written.is_good());
            let value = session.read_value(DemoNodes::temperature()).await.unwrap();
            value.assert_value_approx(30.0, f64::EPSILON);
            session.close().await.unwrap();
        }
    }
    assert_eq!(server.stats().sessions_created(), 11);
    assert_eq!(server.stats().sessions_closed(), 11);
    server.shutdown().await;
}

#[tokio::test]
async fn test_security_channel_exposes_certificates() {
    let harness = TestHarness::secure(SecurityPolicy::Aes256Sha256RsaPss, SecurityMode::SignAndEncrypt).await;
    let channel = harness.session.channel().unwrap();

    assert_eq!(channel.security_policy(), SecurityPolicy::Aes256Sha256RsaPss);
    assert_eq!(
        channel.server_certificate().unwrap().der(),
        harness.server.server_certificate().unwrap().der()
    );
    assert_eq!(
        channel.client_identity().unwrap().certificate.der(),
        CertificateFixtures::client_identity().certificate.der()
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_security_untrusted_server_is_rejected() {
    init_test_logging();
    let server = MockServer::start(MockServerConfig::secure(CertificateFixtures::server_identity()))
        .await
        .unwrap();
    let config = ConfigFixtures::secure(
        server.endpoint_url(),
        SecurityPolicy::Basic256Sha256,
        SecurityMode::SignAndEncrypt,
    );
    let session = SessionFixtures::session_with_store(
        config,
        UserIdentity::anonymous(),
        CertificateFixtures::strict_store(),
    );

    let err = session.open().await.unwrap_err();
    assert!(matches!(err, UaError::Handshake(_)), "unexpected error: {err:?}");
    assert_eq!(session.state(), SessionState::Faulted);
    // Only the discovery channel was opened.
    assert_eq!(server.stats().channels_opened(), 1);
    assert_eq!(server.stats().sessions_created(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_security_explicit_endpoint_with_unoffered_policy_is_rejected() {
    init_test_logging();
    let server = MockServer::start(
        MockServerConfig::secure(CertificateFixtures::server_identity())
            .with_endpoints(vec![(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt)]),
    )
    .await
    .unwrap();
    let config = ConfigFixtures::secure(server.endpoint_url(), SecurityPolicy::Basic256, SecurityMode::SignAndEncrypt);
    let offered = get_endpoints(&config, server.endpoint_url(), Arc::new(SessionFixtures::registry()))
        .await
        .unwrap();
    let mut endpoint = offered[0].clone();
    endpoint.endpoint_url = server.endpoint_url().to_string();
    endpoint.security_policy_uri = SecurityPolicy::Basic256.uri().to_string();

    let session = Session::with_store(
        config,
        UserIdentity::anonymous(),
        EndpointSelection::Explicit(endpoint),
        SessionFixtures::registry(),
        CertificateFixtures::client_store(),
    )
    .unwrap();
    let err = session.open().await.unwrap_err();
    match err {
        UaError::Handshake(HandshakeError::Rejected { status, .. }) => {
            assert_eq!(status, StatusCode::BAD_SECURITY_POLICY_REJECTED);
        }
        other => panic!("Expected the server to reject the policy, but got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Faulted);
    assert_eq!(server.stats().sessions_created(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_security_directory_store_persists_identity_and_trust() {
    init_test_logging();
    let pki = temp_test_dir("ua-pki");
    let server = MockServer::start(MockServerConfig::secure(CertificateFixtures::server_identity()))
        .await
        .unwrap();
    let config = ConfigFixtures::secure(
        server.endpoint_url(),
        SecurityPolicy::Basic256Sha256,
        SecurityMode::SignAndEncrypt,
    );

    let store = DirectoryStore::new(pki.path()).with_trust_on_first_use(true);
    let first = SessionFixtures::session_with_store(config.clone(), UserIdentity::anonymous(), Arc::new(store.clone()));
    first.open().await.unwrap();
    let first_thumbprint = first.channel().unwrap().client_identity().unwrap().certificate.thumbprint_hex();
    first.close().await.unwrap();

    let trusted = store.trusted_certificates().await.unwrap();
    assert_eq!(trusted.len(), 1);
    assert_eq!(
        trusted[0].thumbprint_hex(),
        server.server_certificate().unwrap().thumbprint_hex()
    );

    // The second session reuses the stored certificate and the trust decision.
    let strict = DirectoryStore::new(pki.path());
    let second = SessionFixtures::session_with_store(config, UserIdentity::anonymous(), Arc::new(strict));
    second.open().await.unwrap();
    let second_thumbprint = second.channel().unwrap().client_identity().unwrap().certificate.thumbprint_hex();
    assert_eq!(first_thumbprint, second_thumbprint);
    second.close().await.unwrap();
    server.shutdown().await;
}
