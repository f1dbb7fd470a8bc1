// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # ua-client Integration Tests
//!
//! This crate drives the `ua-client` session engine end to end against an
//! in-process OPC UA server. The server speaks real UA-TCP over a loopback
//! socket, so every test exercises the transport, the secure channel, the
//! session services and the publish loop together.
//!
//! ## Module Structure
//!
//! - [`common`]: Shared test utilities
//!   - `mocks`: The mock server, its address space and its failure hooks
//!   - `fixtures`: Certificates, configurations and node ids
//!   - `assertions`: Polling helpers and custom assertions
//!   - `harness`: A server plus a connected session in one value
//!
//! ## Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test -p ua-client-tests
//!
//! # Run one suite
//! cargo test -p ua-client-tests --test integration_connection
//! cargo test -p ua-client-tests --test integration_services
//! cargo test -p ua-client-tests --test integration_subscription
//! cargo test -p ua-client-tests --test integration_channel
//!
//! # With logs
//! RUST_LOG=ua_client=debug cargo test -p ua-client-tests -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! ### Connection Tests (`integration_connection.rs`)
//! - Endpoint discovery and selection
//! - Session lifecycle: open, close, abort, reconnect
//! - User identities: anonymous, user name, certificate
//! - Every security policy
//!
//! ### Service Tests (`integration_services.rs`)
//! - Read and Write
//! - Browse with continuation points
//! - Method calls with custom structures
//! - History reads with paging
//!
//! ### Subscription Tests (`integration_subscription.rs`)
//! - Data change and event delivery
//! - Acknowledgements and keep-alives
//! - Monitored item management
//! - Recovery after session loss
//!
//! ### Channel Tests (`integration_channel.rs`)
//! - Token renewal
//! - Out-of-order responses
//! - Timeouts and dropped connections
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use ua_client_tests::common::{init_test_logging, TestHarness};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     init_test_logging();
//!     let harness = TestHarness::insecure().await;
//!     let value = harness.session.read_value(DemoNodes::temperature()).await.unwrap();
//!     assert!(value.is_good());
//!     harness.shutdown().await;
//! }
//! ```

pub mod common;

/// Commonly used items for test modules.
pub mod prelude {
    pub use crate::common::{
        assertions::*, fixtures::*, harness::*, init_test_logging, mocks::*, temp_test_dir,
    };
}
