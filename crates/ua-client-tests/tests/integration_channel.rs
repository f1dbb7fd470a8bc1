// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Secure Channel Integration Tests
//!
//! Token renewal, response correlation and request deadlines on a live
//! channel.
//!
//! ## Test Categories
//!
//! - `test_renewal_*`: security token renewal
//! - `test_correlation_*`: out-of-order and concurrent responses
//! - `test_timeout_*`: request deadlines and lost connections

use std::time::Duration;

use ua_client::codec::Variant;
use ua_client::error::TimeoutError;
use ua_client::session::SessionState;
use ua_client::{ChannelState, SecurityMode, SecurityPolicy, UaError};

use ua_client_tests::prelude::*;

fn short_tokens() -> MockServerConfig {
    MockServerConfig::insecure().with_token_lifetime(Duration::from_secs(1))
}

// =============================================================================
// Renewal Tests
// =============================================================================

#[tokio::test]
async fn test_renewal_before_token_expiry() {
    let harness = TestHarness::builder().server(short_tokens()).start().await;
    let session = &harness.session;
    let channel = session.channel().unwrap();
    let first_token = channel.token();
    assert_eq!(first_token.revised_lifetime, 1000);

    let deadline = tokio::time::Instant::now() + Duration::from_millis(2600);
    while tokio::time::Instant::now() < deadline {
        session.read_value(DemoNodes::temperature()).await.unwrap().assert_good();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(channel.stats().renewals() >= 2, "renewals: {}", channel.stats().renewals());
    assert!(harness.server.stats().renewals() >= 2);
    assert!(channel.token().token_id > first_token.token_id);
    assert_eq!(channel.channel_id(), first_token.channel_id);
    assert_eq!(channel.state(), ChannelState::Open);
    assert_eq!(harness.server.stats().channels_opened(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_renewal_on_encrypted_channel() {
    let harness = TestHarness::builder()
        .server(MockServerConfig::secure(CertificateFixtures::server_identity()).with_token_lifetime(Duration::from_secs(1)))
        .security(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt)
        .start()
        .await;
    let session = &harness.session;
    let channel = session.channel().unwrap();

    let server = &harness.server;
    eventually(Duration::from_secs(5), "secured channel never renewed twice", || {
        server.stats().renewals() >= 2
    })
    .await;
    // Messages after a renewal use the new keys.
    session.write_value(DemoNodes::temperature(), 18.25f64).await.unwrap();
    session
        .read_value(DemoNodes::temperature())
        .await
        .unwrap()
        .assert_value(&Variant::Double(18.25));
    assert!(channel.state().is_usable());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_renewal_on_demand() {
    let harness = TestHarness::insecure().await;
    let channel = harness.session.channel().unwrap();
    let before = channel.token();

    channel.renew().await.unwrap();
    assert_eq!(channel.stats().renewals(), 1);
    assert_eq!(channel.token().token_id, before.token_id + 1);
    harness.session.read_value(DemoNodes::name()).await.unwrap().assert_good();
    harness.shutdown().await;
}

// =============================================================================
// Correlation Tests
// =============================================================================

#[tokio::test]
async fn test_correlation_reversed_responses() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    harness.server.hooks().reverse_next_responses(3);

    let (temperature, name, read_only) = within(Duration::from_secs(5), async {
        tokio::join!(
            session.read_value(DemoNodes::temperature()),
            session.read_value(DemoNodes::name()),
            session.read_value(DemoNodes::read_only()),
        )
    })
    .await;

    temperature.unwrap().assert_value(&Variant::Double(21.5));
    name.unwrap().assert_value(&Variant::from("boiler-1"));
    read_only.unwrap().assert_value(&Variant::Int32(42));
    assert_eq!(session.channel().unwrap().pending_requests(), 0);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_correlation_many_concurrent_requests() {
    let harness = TestHarness::insecure().await;

    let mut tasks = tokio::task::JoinSet::new();
    for index in 0..MANY_CHILDREN {
        let session = harness.session.clone();
        tasks.spawn(async move {
            let value = session.read_value(DemoNodes::many_item(index)).await.unwrap();
            (index, value)
        });
    }
    let mut seen = 0;
    while let Some(joined) = tasks.join_next().await {
        let (index, value) = joined.unwrap();
        value.assert_value(&Variant::Int32(index as i32));
        seen += 1;
    }
    assert_eq!(seen, MANY_CHILDREN);
    assert_eq!(harness.server.stats().requests("Read"), MANY_CHILDREN as u64);
    harness.shutdown().await;
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[tokio::test]
async fn test_timeout_keeps_channel_open() {
    let harness = TestHarness::builder()
        .configure(|mut config| {
            config.request_timeout = Duration::from_millis(300);
            config
        })
        .start()
        .await;
    let session = &harness.session;
    let channel = session.channel().unwrap();

    harness.server.hooks().set_silent(true);
    let err = session
        .write_value(DemoNodes::temperature(), 19.0f64)
        .await
        .unwrap_err();
    assert!(
        matches!(err, UaError::Timeout(TimeoutError::Request { service: "Write", .. })),
        "unexpected error: {err:?}"
    );
    assert!(err.is_retryable());
    // The server applied the write; only the answer was lost.
    harness.server.value(&DemoNodes::temperature()).assert_value(&Variant::Double(19.0));

    assert_eq!(channel.stats().timeouts(), 1);
    assert_eq!(channel.pending_requests(), 0);
    assert!(channel.state().is_usable());
    assert_eq!(session.state(), SessionState::Active);

    harness.server.hooks().set_silent(false);
    session
        .read_value(DemoNodes::temperature())
        .await
        .unwrap()
        .assert_value(&Variant::Double(19.0));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_timeout_connection_loss_fails_pending_requests() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    harness.server.hooks().set_silent(true);

    let (result, ()) = tokio::join!(session.read_value(DemoNodes::temperature()), async {
        let channel = session.channel().unwrap();
        let deadline = Duration::from_secs(2);
        eventually(deadline, "request never went out", || channel.pending_requests() == 1).await;
        harness.server.drop_connections();
    });

    let err = result.unwrap_err();
    assert!(err.is_channel_fatal(), "unexpected error: {err:?}");
    let channel = session.channel();
    assert!(channel.map_or(true, |c| c.pending_requests() == 0));

    harness.server.hooks().set_silent(false);
    session.reconnect().await.unwrap();
    session.read_value(DemoNodes::temperature()).await.unwrap().assert_good();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_timeout_close_completes_when_server_is_silent() {
    let harness = TestHarness::builder()
        .configure(|mut config| {
            config.request_timeout = Duration::from_millis(300);
            config
        })
        .start()
        .await;
    harness.server.hooks().set_silent(true);

    let _ = within(Duration::from_secs(5), harness.session.close()).await;
    assert_eq!(harness.session.state(), SessionState::Closed);
    assert!(harness.session.channel().is_none());
    harness.shutdown().await;
}
