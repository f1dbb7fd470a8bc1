// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Custom Test Assertions
//!
//! Polling helpers, notification receivers and value assertions.
//!
//! ## Design Principles
//!
//! - Provide clear, informative failure messages
//! - Never sleep for a fixed time when a condition can be polled
//! - Notification helpers skip what the test is not looking for

use std::time::Duration;

use tokio::sync::mpsc;

use ua_client::codec::{DataValue, Variant};
use ua_client::session::{Session, SessionState};
use ua_client::types::StatusCode;
use ua_client::{DataChange, EventFields, Notification, UaError};

/// Default deadline for notification helpers.
pub const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// DataValue Assertions
// =============================================================================

/// Assertion extensions for [`DataValue`].
pub trait DataValueAssertions {
    /// Assert that the status is Good.
    fn assert_good(&self);

    /// Assert a specific status.
    fn assert_status(&self, expected: StatusCode);

    /// Assert the value.
    fn assert_value(&self, expected: &Variant);

    /// Assert a numeric value within a tolerance.
    fn assert_value_approx(&self, expected: f64, tolerance: f64);
}

impl DataValueAssertions for DataValue {
    fn assert_good(&self) {
        assert!(self.is_good(), "Expected Good, but got {} for {:?}", self.status(), self.value);
    }

    fn assert_status(&self, expected: StatusCode) {
        assert_eq!(
            self.status(),
            expected,
            "Expected status {}, but got {}",
            expected,
            self.status()
        );
    }

    fn assert_value(&self, expected: &Variant) {
        assert_eq!(
            self.value.as_ref(),
            Some(expected),
            "Expected value {:?}, but got {:?}",
            expected,
            self.value
        );
    }

    fn assert_value_approx(&self, expected: f64, tolerance: f64) {
        let actual = self
            .value
            .as_ref()
            .and_then(Variant::as_f64)
            .unwrap_or_else(|| panic!("Value {:?} is not numeric", self.value));
        let diff = (actual - expected).abs();
        assert!(
            diff <= tolerance,
            "Expected value {} ± {}, but got {} (diff: {})",
            expected,
            tolerance,
            actual,
            diff
        );
    }
}

// =============================================================================
// Error Assertions
// =============================================================================

/// Assertion extensions for client results.
pub trait UaResultAssertions<T> {
    /// Assert a service fault with `status`.
    fn assert_service_fault(self, status: StatusCode);

    /// Assert that the session was rejected by the server.
    fn assert_session_invalid(self);

    /// Assert that the channel died.
    fn assert_channel_aborted(self);
}

impl<T: std::fmt::Debug> UaResultAssertions<T> for Result<T, UaError> {
    fn assert_service_fault(self, status: StatusCode) {
        match self {
            Err(UaError::ServiceFault(fault)) => assert_eq!(fault.status, status, "Wrong fault status"),
            other => panic!("Expected service fault {}, but got {:?}", status, other),
        }
    }

    fn assert_session_invalid(self) {
        match self {
            Err(UaError::SessionInvalid(_)) => {}
            other => panic!("Expected SessionInvalid, but got {:?}", other),
        }
    }

    fn assert_channel_aborted(self) {
        match self {
            Err(UaError::ChannelAborted(_)) => {}
            other => panic!("Expected ChannelAborted, but got {:?}", other),
        }
    }
}

// =============================================================================
// Notification Helpers
// =============================================================================

/// Receives the next notification, panicking after `timeout`.
pub async fn next_notification(rx: &mut mpsc::Receiver<Notification>, timeout: Duration) -> Notification {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(notification)) => notification,
        Ok(None) => panic!("Notification channel closed"),
        Err(_) => panic!("No notification within {:?}", timeout),
    }
}

/// Receives data changes until one matches `predicate`.
pub async fn data_change_matching<F>(
    rx: &mut mpsc::Receiver<Notification>,
    timeout: Duration,
    mut predicate: F,
) -> DataChange
where
    F: FnMut(&DataChange) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match next_notification(rx, remaining).await {
            Notification::DataChange(change) if predicate(&change) => return change,
            _ => continue,
        }
    }
}

/// Receives the next data change, skipping other notifications.
pub async fn next_data_change(rx: &mut mpsc::Receiver<Notification>, timeout: Duration) -> DataChange {
    data_change_matching(rx, timeout, |_| true).await
}

/// Receives the next event, skipping other notifications.
pub async fn next_event(rx: &mut mpsc::Receiver<Notification>, timeout: Duration) -> EventFields {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if let Notification::Event(event) = next_notification(rx, remaining).await {
            return event;
        }
    }
}

/// Receives the next status change as `(subscription_id, status)`.
pub async fn next_status_change(rx: &mut mpsc::Receiver<Notification>, timeout: Duration) -> (u32, StatusCode) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if let Notification::StatusChange { subscription_id, status } = next_notification(rx, remaining).await {
            return (subscription_id, status);
        }
    }
}

/// Asserts that nothing arrives for `quiet`.
pub async fn assert_no_notification(rx: &mut mpsc::Receiver<Notification>, quiet: Duration) {
    if let Ok(Some(notification)) = tokio::time::timeout(quiet, rx.recv()).await {
        panic!("Unexpected notification: {:?}", notification);
    }
}

// =============================================================================
// Async Assertion Helpers
// =============================================================================

/// Wait for a condition to become true within a timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Wait for a condition to become true, panicking if it doesn't.
pub async fn wait_for_or_panic<F, Fut>(timeout: Duration, interval: Duration, message: &str, condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    if !wait_for(timeout, interval, condition).await {
        panic!("Condition not met within {:?}: {}", timeout, message);
    }
}

/// Wait for a synchronous condition, panicking if it doesn't hold in time.
pub async fn eventually<F>(timeout: Duration, message: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    wait_for_or_panic(timeout, Duration::from_millis(10), message, || {
        let met = condition();
        async move { met }
    })
    .await;
}

/// Waits until the session reaches `state`.
pub async fn wait_for_state(session: &Session, state: SessionState, timeout: Duration) {
    let mut rx = session.subscribe_state();
    let reached = tokio::time::timeout(timeout, rx.wait_for(|s| *s == state)).await;
    match reached {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => panic!("Session dropped while waiting for {}", state),
        Err(_) => panic!("Session stayed {} instead of reaching {} within {:?}", session.state(), state, timeout),
    }
}

// =============================================================================
// Macro Assertions
// =============================================================================

/// Assert that an async operation completes within a timeout.
#[macro_export]
macro_rules! assert_completes_within {
    ($timeout:expr, $future:expr) => {{
        match tokio::time::timeout($timeout, $future).await {
            Ok(result) => result,
            Err(_) => panic!("Operation did not complete within {:?}", $timeout),
        }
    }};
}

/// Assert that a result is a service fault with the given status.
#[macro_export]
macro_rules! assert_fault {
    ($result:expr, $status:expr) => {{
        match $result {
            Err(::ua_client::UaError::ServiceFault(fault)) => assert_eq!(fault.status, $status),
            other => panic!("Expected service fault {}, got {:?}", $status, other),
        }
    }};
}
