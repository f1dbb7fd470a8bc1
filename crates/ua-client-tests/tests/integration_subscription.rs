// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Subscription Integration Tests
//!
//! Subscriptions, monitored items and the publish loop against the mock
//! server.
//!
//! ## Test Categories
//!
//! - `test_data_change_*`: value monitoring and acknowledgement
//! - `test_event_*`: event monitoring on the Server object
//! - `test_items_*` / `test_subscription_*`: item and subscription management
//! - `test_publish_*`: publish loop behaviour across session failures

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use ua_client::codec::{ExtensionObject, Variant};
use ua_client::messages::{MonitoredItemCreateRequest, MonitoredItemModifyRequest, MonitoringParameters, TimestampsToReturn};
use ua_client::session::SessionState;
use ua_client::types::StatusCode;
use ua_client::{
    BaseEvent, BroadcastCallback, ChannelCallback, Notification, Session, SessionError, SubscriptionInfo,
    SubscriptionSettings, UaError,
};

use ua_client_tests::prelude::*;

/// Creates a fast subscription that forwards into a channel.
async fn subscribe(session: &Session) -> (SubscriptionInfo, mpsc::Receiver<Notification>) {
    let (callback, rx) = ChannelCallback::with_channel(128);
    let info = session
        .create_subscription(SubscriptionSettings::fast(), Arc::new(callback))
        .await
        .unwrap();
    (info, rx)
}

/// Monitors the Value of `node` with `handle`; returns the monitored item id.
async fn monitor(session: &Session, subscription_id: u32, node: ua_client::types::NodeId, handle: u32) -> u32 {
    let results = session
        .create_monitored_items(
            subscription_id,
            TimestampsToReturn::Both,
            vec![MonitoredItemCreateRequest::value(node, handle, 50.0, 10)],
        )
        .await
        .unwrap();
    assert!(results[0].status_code.is_good(), "{}", results[0].status_code);
    results[0].monitored_item_id
}

fn assert_interval(actual: Duration, expected_ms: u64) {
    let diff = (actual.as_secs_f64() - expected_ms as f64 / 1000.0).abs();
    assert!(diff < 1e-6, "Expected {expected_ms} ms, but got {actual:?}");
}

fn has_value(expected: f64) -> impl FnMut(&ua_client::DataChange) -> bool {
    move |change| change.value.value.as_ref().and_then(Variant::as_f64) == Some(expected)
}

// =============================================================================
// Data Change Tests
// =============================================================================

#[tokio::test]
async fn test_data_change_initial_and_updated_value() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    assert_interval(info.publishing_interval, 100);
    assert!(info.publishing_enabled);
    monitor(session, info.subscription_id, DemoNodes::temperature(), 1).await;

    let initial = next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;
    assert_eq!(initial.subscription_id, info.subscription_id);
    assert_eq!(initial.client_handle, 1);
    assert_eq!(initial.node_id, Some(DemoNodes::temperature()));
    initial.value.assert_value_approx(21.5, f64::EPSILON);

    assert!(harness.server.set_value(&DemoNodes::temperature(), 30.0f64));
    let updated = data_change_matching(&mut rx, NOTIFICATION_TIMEOUT, has_value(30.0)).await;
    assert!(updated.sequence_number > initial.sequence_number);
    assert!(session.subscriptions().stats().data_changes() >= 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_data_change_routes_client_handle_42() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    monitor(session, info.subscription_id, DemoNodes::counter(), 42).await;

    let change = next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;
    assert_eq!(change.client_handle, 42);
    assert_eq!(change.subscription_id, info.subscription_id);
    assert_eq!(change.node_id, Some(DemoNodes::counter()));
    assert!(change.value.value.as_ref().and_then(Variant::as_i64).is_some());
    harness.shutdown().await;
}

#[tokio::test]
async fn test_data_change_is_acknowledged() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    monitor(session, info.subscription_id, DemoNodes::temperature(), 1).await;

    let change = next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;
    let server = &harness.server;
    eventually(NOTIFICATION_TIMEOUT, "sequence number never acknowledged", || {
        server
            .stats()
            .acknowledgements()
            .iter()
            .any(|ack| ack.subscription_id == info.subscription_id && ack.sequence_number == change.sequence_number)
    })
    .await;
    assert!(session.publish_stats().responses() >= 1);
    assert_eq!(session.publish_stats().depth(), 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_data_change_counter_arrives_in_order() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    monitor(session, info.subscription_id, DemoNodes::counter(), 3).await;

    let mut changes = Vec::new();
    while changes.len() < 4 {
        changes.push(next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await);
    }
    let counters: Vec<i64> = changes
        .iter()
        .filter_map(|c| c.value.value.as_ref().and_then(Variant::as_i64))
        .collect();
    assert_eq!(counters.len(), 4);
    assert!(counters.windows(2).all(|w| w[0] < w[1]), "{counters:?}");
    assert!(changes.windows(2).all(|w| w[0].sequence_number < w[1].sequence_number));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_data_change_routes_per_subscription() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (first, mut first_rx) = subscribe(session).await;
    let (second, mut second_rx) = subscribe(session).await;
    assert_ne!(first.subscription_id, second.subscription_id);
    monitor(session, first.subscription_id, DemoNodes::temperature(), 1).await;
    monitor(session, second.subscription_id, DemoNodes::name(), 1).await;

    let a = next_data_change(&mut first_rx, NOTIFICATION_TIMEOUT).await;
    let b = next_data_change(&mut second_rx, NOTIFICATION_TIMEOUT).await;
    assert_eq!(a.subscription_id, first.subscription_id);
    assert_eq!(a.node_id, Some(DemoNodes::temperature()));
    assert_eq!(b.subscription_id, second.subscription_id);
    b.value.assert_value(&Variant::from("boiler-1"));
    assert_eq!(session.subscriptions().len(), 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_data_change_broadcast_to_observers() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let callback = BroadcastCallback::new(64);
    let mut first = callback.subscribe();
    let mut second = callback.subscribe();
    let mut raw = session.subscribe_publish_responses();

    let info = session
        .create_subscription(SubscriptionSettings::fast(), Arc::new(callback.clone()))
        .await
        .unwrap();
    monitor(session, info.subscription_id, DemoNodes::read_only(), 8).await;

    for rx in [&mut first, &mut second] {
        let notification = within(NOTIFICATION_TIMEOUT, rx.recv()).await.unwrap();
        assert_eq!(notification.subscription_id(), info.subscription_id);
        assert_eq!(notification.client_handle(), Some(8));
    }
    let response = within(NOTIFICATION_TIMEOUT, raw.recv()).await.unwrap();
    assert_eq!(response.subscription_id, info.subscription_id);
    harness.shutdown().await;
}

// =============================================================================
// Event Tests
// =============================================================================

#[tokio::test]
async fn test_event_from_any_source() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    let results = session
        .create_monitored_items(
            info.subscription_id,
            TimestampsToReturn::Both,
            vec![BaseEvent::monitored_item(7, 10)],
        )
        .await
        .unwrap();
    assert!(results[0].status_code.is_good());
    assert!(!results[0].filter_result.is_null());

    assert_eq!(harness.server.fire_event(&DemoNodes::folder(), "Overheat", 700), 1);
    let event = next_event(&mut rx, NOTIFICATION_TIMEOUT).await;
    assert_eq!(event.client_handle, 7);
    let decoded = BaseEvent::from(&event);
    assert_eq!(decoded.message.text, "Overheat");
    assert_eq!(decoded.severity, 700);
    assert_eq!(decoded.source_node, DemoNodes::folder());
    assert_eq!(decoded.source_name, "Demo");
    assert!(!decoded.event_id.is_null_or_empty());
    assert_eq!(session.subscriptions().stats().events(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_event_filter_on_source_node() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    let results = session
        .create_monitored_items(
            info.subscription_id,
            TimestampsToReturn::Both,
            vec![
                MonitoredItemCreateRequest::event(DemoNodes::server(), 1, BaseEvent::filter(), 10),
                // Variables are not event notifiers.
                MonitoredItemCreateRequest::event(DemoNodes::temperature(), 2, BaseEvent::filter(), 10),
            ],
        )
        .await
        .unwrap();
    assert!(results[0].status_code.is_good());
    assert_eq!(results[1].status_code, StatusCode::BAD_ATTRIBUTE_ID_INVALID);
    assert_eq!(session.subscriptions().items(info.subscription_id).len(), 1);

    harness.server.fire_event(&DemoNodes::server(), "first", 100);
    harness.server.fire_event(&DemoNodes::server(), "second", 200);
    let first = BaseEvent::from(&next_event(&mut rx, NOTIFICATION_TIMEOUT).await);
    let second = BaseEvent::from(&next_event(&mut rx, NOTIFICATION_TIMEOUT).await);
    assert_eq!(first.message.text, "first");
    assert_eq!(second.message.text, "second");
    harness.shutdown().await;
}

// =============================================================================
// Item Management Tests
// =============================================================================

#[tokio::test]
async fn test_items_duplicate_client_handle_is_rejected() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, _rx) = subscribe(session).await;
    monitor(session, info.subscription_id, DemoNodes::temperature(), 1).await;

    let err = session
        .create_monitored_items(
            info.subscription_id,
            TimestampsToReturn::Both,
            vec![MonitoredItemCreateRequest::value(DemoNodes::name(), 1, 50.0, 1)],
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UaError::Session(SessionError::DuplicateClientHandle { client_handle: 1, .. })
    ));
    // Rejected locally.
    assert_eq!(harness.server.stats().requests("CreateMonitoredItems"), 1);
    assert_eq!(harness.server.monitored_item_count(info.subscription_id), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_items_concurrent_duplicate_handle_keeps_one() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, _rx) = subscribe(session).await;
    let create = |node| {
        session.create_monitored_items(
            info.subscription_id,
            TimestampsToReturn::Both,
            vec![MonitoredItemCreateRequest::value(node, 7, 50.0, 1)],
        )
    };

    // Both calls pass the local check before either response is routed.
    let (first, second) = tokio::join!(create(DemoNodes::temperature()), create(DemoNodes::name()));
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(UaError::Session(SessionError::DuplicateClientHandle { client_handle: 7, .. }))
    )));

    let items = session.subscriptions().items(info.subscription_id);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].client_handle, 7);
    // The losing call removed its item from the server again.
    assert_eq!(harness.server.monitored_item_count(info.subscription_id), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_items_unknown_subscription() {
    let harness = TestHarness::insecure().await;

    let err = harness
        .session
        .delete_monitored_items(4242, vec![1])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UaError::Session(SessionError::UnknownSubscription { subscription_id: 4242 })
    ));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_items_modify_rebinds_client_handle() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    let item_id = monitor(session, info.subscription_id, DemoNodes::temperature(), 1).await;
    next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;

    let results = session
        .modify_monitored_items(
            info.subscription_id,
            TimestampsToReturn::Both,
            vec![MonitoredItemModifyRequest {
                monitored_item_id: item_id,
                requested_parameters: MonitoringParameters {
                    client_handle: 5,
                    sampling_interval: 50.0,
                    filter: ExtensionObject::null(),
                    queue_size: 1,
                    discard_oldest: true,
                },
            }],
        )
        .await
        .unwrap();
    assert!(results[0].status_code.is_good());
    let items = session.subscriptions().items(info.subscription_id);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].client_handle, 5);

    harness.server.set_value(&DemoNodes::temperature(), 31.0f64);
    let change = data_change_matching(&mut rx, NOTIFICATION_TIMEOUT, has_value(31.0)).await;
    assert_eq!(change.client_handle, 5);
    assert_eq!(change.node_id, Some(DemoNodes::temperature()));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_items_delete_stops_notifications() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    let item_id = monitor(session, info.subscription_id, DemoNodes::temperature(), 1).await;
    next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;

    let results = session
        .delete_monitored_items(info.subscription_id, vec![item_id, item_id + 100])
        .await
        .unwrap();
    assert_eq!(results, vec![StatusCode::GOOD, StatusCode::BAD_MONITORED_ITEM_ID_INVALID]);
    assert!(session.subscriptions().items(info.subscription_id).is_empty());
    assert_eq!(harness.server.monitored_item_count(info.subscription_id), 0);

    harness.server.set_value(&DemoNodes::temperature(), 33.0f64);
    assert_no_notification(&mut rx, Duration::from_millis(500)).await;
    harness.shutdown().await;
}

// =============================================================================
// Subscription Management Tests
// =============================================================================

#[tokio::test]
async fn test_subscription_modify_revises_timing() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, _rx) = subscribe(session).await;

    let revised = session
        .modify_subscription(info.subscription_id, SubscriptionSettings::slow())
        .await
        .unwrap();
    assert_eq!(revised.subscription_id, info.subscription_id);
    assert_interval(revised.publishing_interval, 5000);
    assert_eq!(
        session.subscriptions().info(info.subscription_id).unwrap().requested,
        SubscriptionSettings::slow()
    );

    let fast = session
        .modify_subscription(info.subscription_id, SubscriptionSettings::with_interval(Duration::from_millis(1)))
        .await
        .unwrap();
    // The server's floor wins.
    assert_interval(fast.publishing_interval, 50);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_subscription_publishing_mode_pauses_delivery() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    monitor(session, info.subscription_id, DemoNodes::temperature(), 1).await;
    next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;

    let results = session
        .set_publishing_mode(false, vec![info.subscription_id])
        .await
        .unwrap();
    assert_eq!(results, vec![StatusCode::GOOD]);
    assert!(!session.subscriptions().info(info.subscription_id).unwrap().publishing_enabled);

    harness.server.set_value(&DemoNodes::temperature(), 40.0f64);
    let paused = tokio::time::timeout(Duration::from_millis(600), async {
        loop {
            match rx.recv().await {
                Some(Notification::DataChange(change))
                    if change.value.value.as_ref().and_then(Variant::as_f64) == Some(40.0) =>
                {
                    return change
                }
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(paused.is_err(), "data change delivered while publishing was disabled");

    session
        .set_publishing_mode(true, vec![info.subscription_id])
        .await
        .unwrap();
    data_change_matching(&mut rx, NOTIFICATION_TIMEOUT, has_value(40.0)).await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_subscription_delete() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, _rx) = subscribe(session).await;
    assert_eq!(harness.server.subscription_ids(), vec![info.subscription_id]);

    let results = session.delete_subscriptions(vec![info.subscription_id]).await.unwrap();
    assert_eq!(results, vec![StatusCode::GOOD]);
    assert!(session.subscriptions().is_empty());
    assert!(harness.server.subscription_ids().is_empty());

    let again = session.delete_subscriptions(vec![info.subscription_id]).await.unwrap();
    assert_eq!(again, vec![StatusCode::BAD_SUBSCRIPTION_ID_INVALID]);
    assert_eq!(session.state(), SessionState::Active);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_subscription_expiry_reports_status_change() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;

    assert!(harness.server.expire_subscription(info.subscription_id));
    let (subscription_id, status) = next_status_change(&mut rx, NOTIFICATION_TIMEOUT).await;
    assert_eq!(subscription_id, info.subscription_id);
    assert_eq!(status, StatusCode::BAD_TIMEOUT);

    let registry = session.subscriptions();
    eventually(NOTIFICATION_TIMEOUT, "expired subscription still registered", || {
        !registry.contains(info.subscription_id)
    })
    .await;
    assert_eq!(registry.stats().status_changes(), 1);
    assert_eq!(session.state(), SessionState::Active);
    harness.shutdown().await;
}

// =============================================================================
// Publish Loop Tests
// =============================================================================

#[tokio::test]
async fn test_publish_session_invalid_faults_session() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    monitor(session, info.subscription_id, DemoNodes::temperature(), 1).await;
    next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;

    assert_eq!(harness.server.invalidate_sessions(), 1);
    wait_for_state(session, SessionState::Faulted, NOTIFICATION_TIMEOUT).await;
    assert!(session.subscriptions().is_empty());
    session
        .read_value(DemoNodes::temperature())
        .await
        .assert_session_invalid_or_not_open();
    harness.shutdown().await;
}

#[tokio::test]
async fn test_publish_resumes_after_reconnect() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    monitor(session, info.subscription_id, DemoNodes::temperature(), 1).await;
    next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;

    harness.server.drop_connections();
    eventually(NOTIFICATION_TIMEOUT, "channel survived the dropped connection", || {
        session.channel().map_or(true, |c| !c.state().is_usable())
    })
    .await;
    session.reconnect().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert!(session.subscriptions().contains(info.subscription_id));

    harness.server.set_value(&DemoNodes::temperature(), 50.0f64);
    let change = data_change_matching(&mut rx, NOTIFICATION_TIMEOUT, has_value(50.0)).await;
    assert_eq!(change.subscription_id, info.subscription_id);
    assert_eq!(harness.server.stats().sessions_created(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_publish_depth_shrinks_to_server_limit() {
    let harness = TestHarness::builder()
        .server(MockServerConfig::insecure().with_max_publish_requests(1))
        .configure(|mut config| {
            config.publish.outstanding_requests = 3;
            config
        })
        .start()
        .await;
    let session = &harness.session;
    let (info, mut rx) = subscribe(session).await;
    monitor(session, info.subscription_id, DemoNodes::counter(), 5).await;

    let stats = session.publish_stats();
    eventually(NOTIFICATION_TIMEOUT, "publish depth did not shrink", || stats.depth() == 1).await;
    // Notifications keep flowing on the single remaining request.
    next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;
    next_data_change(&mut rx, NOTIFICATION_TIMEOUT).await;
    assert_eq!(stats.depth(), 1);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_publish_idle_subscription_receives_keep_alives() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;
    let (callback, mut rx) = ChannelCallback::with_channel(8);
    let settings = SubscriptionSettings {
        max_keepalive_count: 2,
        ..SubscriptionSettings::fast()
    };
    session.create_subscription(settings, Arc::new(callback)).await.unwrap();

    let registry = session.subscriptions();
    let stats = session.publish_stats();
    eventually(NOTIFICATION_TIMEOUT, "no keep-alive arrived", || registry.stats().keep_alives() >= 2).await;
    let requests_before = stats.requests();
    eventually(NOTIFICATION_TIMEOUT, "keep-alives stopped", || registry.stats().keep_alives() >= 4).await;

    // Each keep-alive answers a Publish that the loop replaces.
    let answered = stats.responses() + stats.faults();
    let sent = stats.requests();
    assert!(sent > requests_before, "No new Publish after {requests_before} requests");
    assert!(sent > answered, "No Publish outstanding: sent {sent}, answered {answered}");

    assert_eq!(registry.stats().data_changes(), 0);
    while let Ok(notification) = rx.try_recv() {
        assert!(
            !matches!(notification, Notification::DataChange(_)),
            "Keep-alive produced {notification:?}"
        );
    }
    // Keep-alives carry no sequence number to acknowledge.
    assert!(harness.server.stats().acknowledgements().is_empty());
    harness.shutdown().await;
}

/// SessionInvalid when the failed request raced the publish loop, NotOpen
/// when the loop faulted the session first.
trait SessionGoneAssertion {
    fn assert_session_invalid_or_not_open(self);
}

impl<T: std::fmt::Debug> SessionGoneAssertion for Result<T, UaError> {
    fn assert_session_invalid_or_not_open(self) {
        match self {
            Err(UaError::SessionInvalid(_)) | Err(UaError::Session(SessionError::NotOpen { .. })) => {}
            other => panic!("Expected the session to be gone, but got {:?}", other),
        }
    }
}
