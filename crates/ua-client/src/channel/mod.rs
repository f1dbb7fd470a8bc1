// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! UA-TCP transport and the secure channel.
//!
//! - [`transport`]: framing, Hello/Acknowledge, endpoint URLs
//! - [`chunk`]: signing, encryption and chunking of secure conversation messages
//! - [`correlation`]: request id to waiter table
//! - [`secure`]: [`SecureChannel`] with its reader and renewal tasks

pub mod chunk;
pub mod correlation;
pub mod secure;
pub mod transport;

pub use chunk::{ChannelSecurity, Role};
pub use secure::{
    check_service_result, ChannelOptions, ChannelState, ChannelStats, PendingResponse,
    SecureChannel,
};
pub use transport::{BoxStream, EndpointUrl, NegotiatedLimits};
