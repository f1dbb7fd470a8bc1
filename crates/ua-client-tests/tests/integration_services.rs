// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Service Integration Tests
//!
//! Attribute, view, method and history services through an open session.
//!
//! ## Test Categories
//!
//! - `test_read_*` / `test_write_*`: attribute services
//! - `test_browse_*`: Browse, BrowseNext and continuation handling
//! - `test_call_*`: method calls, including custom structures
//! - `test_history_*`: raw history with paging

use std::collections::HashSet;
use std::time::Duration;

use ua_client::codec::{ExtensionObject, Variant};
use ua_client::messages::{
    BrowseDescription, ReadProcessedDetails, ReadValueId, ServerState, ServerStatusDataType,
    TimestampsToReturn, WriteValue,
};
use ua_client::types::ids::{attribute_ids, object_ids};
use ua_client::types::{LocalizedText, NodeId, NumericRange, StatusCode};
use ua_client::{SessionError, UaError};

use ua_client_tests::prelude::*;

fn names(references: &[ua_client::messages::ReferenceDescription]) -> Vec<String> {
    references.iter().map(|r| r.browse_name.name.clone()).collect()
}

// =============================================================================
// Read / Write Tests
// =============================================================================

#[tokio::test]
async fn test_read_mixed_attributes() {
    let harness = TestHarness::insecure().await;

    let values = harness
        .session
        .read(
            vec![
                ReadValueId::value(DemoNodes::temperature()),
                ReadValueId::attribute(DemoNodes::temperature(), attribute_ids::DISPLAY_NAME),
                ReadValueId::value(DemoNodes::missing()),
                ReadValueId::attribute(DemoNodes::folder(), attribute_ids::VALUE),
            ],
            TimestampsToReturn::Both,
            0.0,
        )
        .await
        .unwrap();

    assert_eq!(values.len(), 4);
    values[0].assert_value_approx(21.5, f64::EPSILON);
    assert!(values[0].source_timestamp.is_some());
    values[1].assert_value(&Variant::LocalizedText(Box::new(LocalizedText::new("Temperature"))));
    values[2].assert_status(StatusCode::BAD_NODE_ID_UNKNOWN);
    values[3].assert_status(StatusCode::BAD_ATTRIBUTE_ID_INVALID);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_read_honours_requested_timestamps() {
    let harness = TestHarness::insecure().await;

    let read = |timestamps| harness.session.read(vec![ReadValueId::value(DemoNodes::name())], timestamps, 0.0);
    let source = read(TimestampsToReturn::Source).await.unwrap().remove(0);
    assert!(source.source_timestamp.is_some());
    assert!(source.server_timestamp.is_none());

    let neither = read(TimestampsToReturn::Neither).await.unwrap().remove(0);
    assert!(neither.source_timestamp.is_none());
    assert!(neither.server_timestamp.is_none());
    neither.assert_value(&Variant::from("boiler-1"));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_read_counter_advances() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;

    let first = session.read_value(DemoNodes::counter()).await.unwrap();
    let start = first.value.as_ref().and_then(Variant::as_i64).unwrap();
    wait_for_or_panic(Duration::from_secs(5), Duration::from_millis(50), "counter never advanced", || async move {
        let now = session.read_value(DemoNodes::counter()).await.unwrap();
        now.value.as_ref().and_then(Variant::as_i64).unwrap() > start
    })
    .await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_read_server_status_build_info() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;

    let status = session.read_value(DemoNodes::server_status()).await.unwrap();
    assert!(status.status.unwrap_or_default().is_good());
    let decoded = status
        .value
        .as_ref()
        .and_then(Variant::as_extension_object)
        .and_then(|o| o.downcast_ref::<ServerStatusDataType>())
        .expect("ServerStatus should decode through the standard registry");
    assert_eq!(decoded.state, ServerState::Running);
    assert!(!decoded.build_info.product_name.is_empty());
    assert_eq!(decoded.build_info.product_name, MOCK_PRODUCT_NAME);

    let product = session.read_value(DemoNodes::product_name()).await.unwrap();
    product.assert_value(&Variant::from(MOCK_PRODUCT_NAME));
    let state = session.read_value(DemoNodes::server_state()).await.unwrap();
    state.assert_value(&Variant::Int32(ServerState::Running.value()));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_write_and_read_back() {
    let harness = TestHarness::insecure().await;

    let status = harness.session.write_value(DemoNodes::name(), "boiler-2").await.unwrap();
    assert_eq!(status, StatusCode::GOOD);
    harness.server.value(&DemoNodes::name()).assert_value(&Variant::from("boiler-2"));

    let value = harness.session.read_value(DemoNodes::name()).await.unwrap();
    value.assert_value(&Variant::from("boiler-2"));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_read_index_range() {
    let harness = TestHarness::insecure().await;
    let range = NumericRange::new(1, 2);

    let values = harness
        .session
        .read(
            vec![
                ReadValueId::value(DemoNodes::array()).with_index_range(&range),
                ReadValueId::value(DemoNodes::array()).with_index_range(&NumericRange::new(7, 9)),
                ReadValueId {
                    index_range: "2:1".to_string(),
                    ..ReadValueId::value(DemoNodes::array())
                },
            ],
            TimestampsToReturn::Both,
            0.0,
        )
        .await
        .unwrap();

    values[0].assert_value(&double_array(&ARRAY_INITIAL[1..=2]));
    values[1].assert_status(StatusCode::BAD_INDEX_RANGE_NO_DATA);
    values[2].assert_status(StatusCode::BAD_INDEX_RANGE_INVALID);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_write_index_range() {
    let harness = TestHarness::insecure().await;
    let range = NumericRange::new(1, 2);

    let results = harness
        .session
        .write(vec![
            WriteValue::value(DemoNodes::array(), double_array(&[41.0, 42.0])).with_index_range(&range),
            WriteValue::value(DemoNodes::array(), double_array(&[1.0])).with_index_range(&range),
            WriteValue::value(DemoNodes::array(), double_array(&[1.0, 2.0]))
                .with_index_range(&NumericRange::new(4, 5)),
        ])
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![
            StatusCode::GOOD,
            StatusCode::BAD_INDEX_RANGE_INVALID,
            StatusCode::BAD_INDEX_RANGE_NO_DATA,
        ]
    );
    harness
        .server
        .value(&DemoNodes::array())
        .assert_value(&double_array(&[1.0, 41.0, 42.0, 4.0, 5.0]));
    let slice = harness
        .session
        .read(
            vec![ReadValueId::value(DemoNodes::array()).with_index_range(&range)],
            TimestampsToReturn::Neither,
            0.0,
        )
        .await
        .unwrap();
    slice[0].assert_value(&double_array(&[41.0, 42.0]));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_write_reports_per_item_status() {
    let harness = TestHarness::insecure().await;

    let results = harness
        .session
        .write(vec![
            WriteValue::value(DemoNodes::temperature(), 25.0f64),
            WriteValue::value(DemoNodes::read_only(), 1i32),
            WriteValue::value(DemoNodes::temperature(), "hot"),
            WriteValue::value(DemoNodes::missing(), 1i32),
        ])
        .await
        .unwrap();

    assert_eq!(
        results,
        vec![
            StatusCode::GOOD,
            StatusCode::BAD_NOT_WRITABLE,
            StatusCode::BAD_TYPE_MISMATCH,
            StatusCode::BAD_NODE_ID_UNKNOWN,
        ]
    );
    harness.server.value(&DemoNodes::temperature()).assert_value_approx(25.0, f64::EPSILON);
    harness.server.value(&DemoNodes::read_only()).assert_value(&Variant::Int32(42));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_read_service_fault_keeps_session() {
    let harness = TestHarness::insecure().await;

    harness.server.hooks().fail_next_request(StatusCode::BAD_TOO_MANY_OPERATIONS);
    let result = harness.session.read_value(DemoNodes::temperature()).await;
    let err = result.as_ref().unwrap_err();
    assert!(err.is_retryable());
    result.assert_service_fault(StatusCode::BAD_TOO_MANY_OPERATIONS);

    assert_eq!(harness.session.state(), ua_client::SessionState::Active);
    harness.session.read_value(DemoNodes::temperature()).await.unwrap().assert_good();
    assert_eq!(harness.session.stats().service_faults(), 1);
    harness.shutdown().await;
}

// =============================================================================
// Browse Tests
// =============================================================================

#[tokio::test]
async fn test_browse_folder_children() {
    let harness = TestHarness::insecure().await;

    let results = harness
        .session
        .browse(vec![BrowseDescription::children(DemoNodes::folder())], 0)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].status_code.is_good());
    assert!(results[0].continuation_point.is_null_or_empty());
    let found = names(results[0].references.as_deref().unwrap_or_default());
    assert_eq!(
        found,
        vec!["Counter", "Temperature", "Name", "ReadOnly", "Array", "History", "Methods", "Many"]
    );
    harness.shutdown().await;
}

#[tokio::test]
async fn test_browse_unknown_node_reports_status() {
    let harness = TestHarness::insecure().await;

    let outcomes = harness
        .session
        .browse_all(
            vec![
                BrowseDescription::children(DemoNodes::missing()),
                BrowseDescription::children(DemoNodes::methods()),
            ],
            0,
        )
        .await
        .unwrap();

    assert_eq!(outcomes[0].status_code, StatusCode::BAD_NODE_ID_UNKNOWN);
    assert!(outcomes[0].references.is_empty());
    assert_eq!(names(&outcomes[1].references), vec!["VectorAdd", "Multiply"]);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_browse_all_follows_client_limit() {
    let harness = TestHarness::insecure().await;

    let outcomes = harness
        .session
        .browse_all(vec![BrowseDescription::children(DemoNodes::many())], 7)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    let references = &outcomes[0].references;
    assert_eq!(references.len(), MANY_CHILDREN);
    let unique: HashSet<String> = names(references).into_iter().collect();
    assert_eq!(unique.len(), MANY_CHILDREN);
    assert_eq!(references[0].browse_name.name, "Item00");
    assert_eq!(references[MANY_CHILDREN - 1].browse_name.name, format!("Item{:02}", MANY_CHILDREN - 1));
    // 7 + 7 + 7 + 4
    assert_eq!(harness.server.stats().requests("BrowseNext"), 3);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_browse_all_follows_server_limit() {
    let harness = TestHarness::builder()
        .server(MockServerConfig::insecure().with_max_references(10))
        .start()
        .await;

    let outcomes = harness
        .session
        .browse_all(
            vec![
                BrowseDescription::children(DemoNodes::many()),
                BrowseDescription::children(DemoNodes::folder()),
            ],
            0,
        )
        .await
        .unwrap();

    assert_eq!(outcomes[0].references.len(), MANY_CHILDREN);
    assert_eq!(outcomes[1].references.len(), 8);
    assert_eq!(harness.server.stats().requests("Browse"), 1);
    assert_eq!(harness.server.stats().requests("BrowseNext"), 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_browse_all_stops_at_round_trip_limit() {
    let harness = TestHarness::builder()
        .configure(|mut config| {
            config.max_continuation_round_trips = 2;
            config
        })
        .start()
        .await;

    let err = harness
        .session
        .browse_all(vec![BrowseDescription::children(DemoNodes::many())], 5)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UaError::Session(SessionError::ContinuationLimit { round_trips: 2, .. })
    ));
    // One BrowseNext to continue, one to release.
    assert_eq!(harness.server.stats().requests("BrowseNext"), 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_browse_pager_pages_and_releases() {
    let harness = TestHarness::insecure().await;
    let mut pager = harness
        .session
        .browse_pager(BrowseDescription::children(DemoNodes::many()), 10);

    let first = pager.next_page().await.unwrap().unwrap();
    assert_eq!(first.len(), 10);
    let second = pager.next_page().await.unwrap().unwrap();
    assert_eq!(second.len(), 10);
    assert_eq!(second[0].browse_name.name, "Item10");
    assert!(!pager.is_done());

    pager.release().await;
    assert!(pager.is_done());
    assert_eq!(pager.round_trips(), 2);
    assert!(pager.next_page().await.unwrap().is_none());
    // One BrowseNext to continue, one to release.
    assert_eq!(harness.server.stats().requests("BrowseNext"), 2);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_browse_next_with_stale_point() {
    let harness = TestHarness::insecure().await;

    let results = harness
        .session
        .browse_next(false, vec![vec![1u8, 2, 3].into()])
        .await
        .unwrap();

    assert_eq!(results[0].status_code, StatusCode::BAD_CONTINUATION_POINT_INVALID);
    harness.shutdown().await;
}

// =============================================================================
// Call Tests
// =============================================================================

#[tokio::test]
async fn test_call_multiply() {
    let harness = TestHarness::insecure().await;

    let result = harness
        .session
        .call_method(
            DemoNodes::methods(),
            DemoNodes::multiply(),
            vec![Variant::Double(3.0), Variant::Double(4.5)],
        )
        .await
        .unwrap();

    assert!(result.status_code.is_good());
    assert_eq!(result.output_arguments, Some(vec![Variant::Double(13.5)]));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_call_with_custom_structure() {
    let harness = TestHarness::insecure().await;
    let arg = |v: Vector| Variant::ExtensionObject(Box::new(ExtensionObject::from_structure(v)));

    let result = harness
        .session
        .call_method(
            DemoNodes::methods(),
            DemoNodes::vector_add(),
            vec![arg(Vector::new(1.0, 2.0, 3.0)), arg(Vector::new(0.5, 0.5, 0.5))],
        )
        .await
        .unwrap();

    assert!(result.status_code.is_good(), "{}", result.status_code);
    let outputs = result.output_arguments.unwrap_or_default();
    let sum = outputs[0]
        .as_extension_object()
        .and_then(|obj| obj.decode_as_with::<Vector>(harness.session.registry()).unwrap())
        .unwrap();
    assert_eq!(sum, Vector::new(1.5, 2.5, 3.5));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_call_argument_errors() {
    let harness = TestHarness::insecure().await;
    let session = &harness.session;

    let wrong_type = session
        .call_method(
            DemoNodes::methods(),
            DemoNodes::multiply(),
            vec![Variant::Double(3.0), Variant::from("four")],
        )
        .await
        .unwrap();
    assert_eq!(wrong_type.status_code, StatusCode::BAD_INVALID_ARGUMENT);
    assert_eq!(
        wrong_type.input_argument_results,
        Some(vec![StatusCode::GOOD, StatusCode::BAD_TYPE_MISMATCH])
    );

    let missing = session
        .call_method(DemoNodes::methods(), DemoNodes::multiply(), vec![Variant::Double(3.0)])
        .await
        .unwrap();
    assert_eq!(missing.status_code, StatusCode::BAD_ARGUMENTS_MISSING);

    let unknown = session
        .call_method(DemoNodes::methods(), DemoNodes::folder(), Vec::new())
        .await
        .unwrap();
    assert_eq!(unknown.status_code, StatusCode::BAD_METHOD_INVALID);
    harness.shutdown().await;
}

// =============================================================================
// History Tests
// =============================================================================

#[tokio::test]
async fn test_history_read_all_pages() {
    let harness = TestHarness::insecure().await;

    let outcomes = harness
        .session
        .history_read_all(
            HistoryFixtures::everything(30),
            TimestampsToReturn::Source,
            vec![HistoryFixtures::node(DemoNodes::history())],
        )
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].status_code.is_good());
    // 30 + 30 + 30 + 10
    assert_eq!(outcomes[0].pages.len(), 4);
    let values = outcomes[0].data_values().unwrap();
    assert_eq!(values.len(), HISTORY_SAMPLES);
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.value.as_ref()?.as_f64()).collect();
    assert_eq!(numbers.first(), Some(&0.0));
    assert_eq!(numbers.last(), Some(&((HISTORY_SAMPLES - 1) as f64)));
    assert!(numbers.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(harness.server.stats().requests("HistoryRead"), 4);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_history_server_cap_and_reverse_order() {
    let harness = TestHarness::builder()
        .server(MockServerConfig::insecure().with_max_history_values(25))
        .start()
        .await;
    let start = harness.server.history_start();
    let end = start.add(Duration::from_secs(50));

    let outcomes = harness
        .session
        .history_read_all(
            HistoryFixtures::raw(end, start, 0),
            TimestampsToReturn::Both,
            vec![HistoryFixtures::node(DemoNodes::history())],
        )
        .await
        .unwrap();

    assert_eq!(outcomes[0].pages.len(), 2);
    let numbers: Vec<f64> = outcomes[0]
        .data_values()
        .unwrap()
        .iter()
        .filter_map(|v| v.value.as_ref()?.as_f64())
        .collect();
    assert_eq!(numbers.len(), 50);
    assert_eq!(numbers.first(), Some(&49.0));
    assert_eq!(numbers.last(), Some(&0.0));
    harness.shutdown().await;
}

#[tokio::test]
async fn test_history_processed_average() {
    let harness = TestHarness::insecure().await;
    let start = harness.server.history_start();
    let end = start.add(Duration::from_secs(HISTORY_SAMPLES as u64));

    let outcomes = harness
        .session
        .history_read_all(
            HistoryFixtures::average(start, end, Duration::from_secs(10)),
            TimestampsToReturn::Source,
            vec![HistoryFixtures::node(DemoNodes::history())],
        )
        .await
        .unwrap();

    assert!(outcomes[0].status_code.is_good());
    let values = outcomes[0].data_values().unwrap();
    assert_eq!(values.len(), HISTORY_SAMPLES / 10);
    for (interval, value) in values.iter().enumerate() {
        // Samples are 0, 1, 2, ... one per second.
        value.assert_value_approx(interval as f64 * 10.0 + 4.5, 1e-9);
        assert_eq!(
            value.source_timestamp,
            Some(start.add(Duration::from_secs(interval as u64 * 10)))
        );
    }
    harness.shutdown().await;
}

#[tokio::test]
async fn test_history_processed_rejects_unknown_aggregate() {
    let harness = TestHarness::insecure().await;
    let start = harness.server.history_start();
    let mut details = ReadProcessedDetails::new(
        start,
        start.add(Duration::from_secs(30)),
        Duration::from_secs(10),
        NodeId::numeric(0, object_ids::AGGREGATE_FUNCTION_MAXIMUM),
    );

    let outcomes = harness
        .session
        .history_read_all(
            ExtensionObject::from_structure(details.clone()),
            TimestampsToReturn::Source,
            vec![HistoryFixtures::node(DemoNodes::history())],
        )
        .await
        .unwrap();
    assert_eq!(outcomes[0].status_code, StatusCode::BAD_AGGREGATE_NOT_SUPPORTED);

    details.aggregate_type = None;
    let result = harness
        .session
        .history_read_all(
            ExtensionObject::from_structure(details),
            TimestampsToReturn::Source,
            vec![HistoryFixtures::node(DemoNodes::history())],
        )
        .await;
    result.assert_service_fault(StatusCode::BAD_AGGREGATE_LIST_MISMATCH);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_history_unsupported_node() {
    let harness = TestHarness::insecure().await;

    let outcomes = harness
        .session
        .history_read_all(
            HistoryFixtures::everything(0),
            TimestampsToReturn::Both,
            vec![
                HistoryFixtures::node(DemoNodes::temperature()),
                HistoryFixtures::node(DemoNodes::history()),
            ],
        )
        .await
        .unwrap();

    assert_eq!(outcomes[0].status_code, StatusCode::BAD_HISTORY_OPERATION_UNSUPPORTED);
    assert!(outcomes[0].pages.is_empty());
    assert_eq!(outcomes[1].data_values().unwrap().len(), HISTORY_SAMPLES);
    harness.shutdown().await;
}

#[tokio::test]
async fn test_history_manual_release() {
    let harness = TestHarness::insecure().await;
    let details = HistoryFixtures::everything(10);

    let mut results = harness
        .session
        .history_read(
            details.clone(),
            TimestampsToReturn::Both,
            false,
            vec![HistoryFixtures::node(DemoNodes::history())],
        )
        .await
        .unwrap();
    let first = results.remove(0);
    assert!(!first.continuation_point.is_null_or_empty());

    let mut node = HistoryFixtures::node(DemoNodes::history());
    node.continuation_point = first.continuation_point.clone();
    harness
        .session
        .history_read(details.clone(), TimestampsToReturn::Neither, true, vec![node.clone()])
        .await
        .unwrap();

    // The released point is gone.
    let after = harness
        .session
        .history_read(details, TimestampsToReturn::Both, false, vec![node])
        .await
        .unwrap();
    assert_eq!(after[0].status_code, StatusCode::BAD_CONTINUATION_POINT_INVALID);
    harness.shutdown().await;
}
