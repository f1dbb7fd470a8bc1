// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session management.
//!
//! - [`engine`]: the [`Session`] and its service calls
//! - [`endpoint`]: endpoint discovery and selection
//! - [`identity`]: user identity tokens
//! - [`continuation`]: Browse and HistoryRead continuation loops
//! - [`state`]: lifecycle states and counters

pub mod continuation;
pub mod endpoint;
pub mod engine;
pub mod identity;
pub mod state;

pub use continuation::{BrowseOutcome, BrowsePager, HistoryPages};
pub use endpoint::{get_endpoints, resolve, select_endpoint, EndpointSelection, ResolvedEndpoint};
pub use engine::Session;
pub use identity::{IdentityToken, UserIdentity};
pub use state::{SessionInfo, SessionState, SessionStats};
