// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscriptions, notification routing and the publish loop.
//!
//! ```text
//! PublishResponse ──▶ SubscriptionRegistry::dispatch
//!                        │  (subscription id, client handle)
//!                        ├──▶ queue ──▶ dispatcher ──▶ SubscriptionCallback (sub 1)
//!                        └──▶ queue ──▶ dispatcher ──▶ SubscriptionCallback (sub 2)
//! ```
//!
//! The [`Session`](crate::session::Session) owns the registry and the loop;
//! applications only supply callbacks.

pub mod callback;
pub mod event;
pub(crate) mod publish;
pub mod registry;

pub use callback::{
    BroadcastCallback, ChannelCallback, DataChange, EventFields, Notification, SubscriptionCallback,
};
pub use event::{BaseEvent, BASE_EVENT_FIELDS};
pub use publish::{PublishExit, PublishStats};
pub use registry::{DispatchStats, MonitoredItemEntry, SubscriptionInfo, SubscriptionRegistry};
