// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification types and the callbacks that receive them.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::codec::{DataValue, Variant};
use crate::types::{NodeId, StatusCode};

// =============================================================================
// Notifications
// =============================================================================

/// A new value for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    /// Subscription that reported the change.
    pub subscription_id: u32,
    /// Client handle of the monitored item.
    pub client_handle: u32,
    /// Monitored node, when the item is known to the session.
    pub node_id: Option<NodeId>,
    /// The value.
    pub value: DataValue,
    /// Sequence number of the carrying notification message.
    pub sequence_number: u32,
}

/// Fields of one event, in select-clause order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFields {
    /// Subscription that reported the event.
    pub subscription_id: u32,
    /// Client handle of the event monitored item.
    pub client_handle: u32,
    /// Field values.
    pub fields: Vec<Variant>,
    /// Sequence number of the carrying notification message.
    pub sequence_number: u32,
}

/// Everything a subscription can report, as forwarded by the channel-based
/// callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Data change.
    DataChange(DataChange),
    /// Event.
    Event(EventFields),
    /// Subscription status change, e.g. BadTimeout when it expired.
    StatusChange {
        /// Subscription.
        subscription_id: u32,
        /// New status.
        status: StatusCode,
    },
}

impl Notification {
    /// Subscription the notification belongs to.
    pub fn subscription_id(&self) -> u32 {
        match self {
            Self::DataChange(c) => c.subscription_id,
            Self::Event(e) => e.subscription_id,
            Self::StatusChange { subscription_id, .. } => *subscription_id,
        }
    }

    /// Client handle, for item notifications.
    pub fn client_handle(&self) -> Option<u32> {
        match self {
            Self::DataChange(c) => Some(c.client_handle),
            Self::Event(e) => Some(e.client_handle),
            Self::StatusChange { .. } => None,
        }
    }
}

// =============================================================================
// SubscriptionCallback
// =============================================================================

/// Receiver of one subscription's notifications.
///
/// Calls for one subscription never overlap and arrive in the order the
/// server emitted them. A slow callback delays only its own subscription.
#[async_trait]
pub trait SubscriptionCallback: Send + Sync {
    /// Called for every data change.
    async fn on_data_change(&self, change: DataChange);

    /// Called for every event.
    async fn on_event(&self, _event: EventFields) {}

    /// Called when the server reports a subscription status change.
    async fn on_status_change(&self, _subscription_id: u32, _status: StatusCode) {}

    /// Called for keep-alive messages, which carry no data.
    async fn on_keep_alive(&self, _subscription_id: u32, _sequence_number: u32) {}
}

/// Forwards notifications into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelCallback {
    sender: mpsc::Sender<Notification>,
}

impl ChannelCallback {
    /// Wraps an existing sender.
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }

    /// Creates a callback and the receiving end.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    async fn forward(&self, notification: Notification) {
        if self.sender.send(notification).await.is_err() {
            tracing::trace!("Notification receiver dropped");
        }
    }
}

#[async_trait]
impl SubscriptionCallback for ChannelCallback {
    async fn on_data_change(&self, change: DataChange) {
        self.forward(Notification::DataChange(change)).await;
    }

    async fn on_event(&self, event: EventFields) {
        self.forward(Notification::Event(event)).await;
    }

    async fn on_status_change(&self, subscription_id: u32, status: StatusCode) {
        self.forward(Notification::StatusChange {
            subscription_id,
            status,
        })
        .await;
    }
}

/// Fans notifications out to any number of receivers.
#[derive(Debug, Clone)]
pub struct BroadcastCallback {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastCallback {
    /// Creates a callback whose receivers lag after `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Adds a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    fn forward(&self, notification: Notification) {
        // No receivers is fine.
        let _ = self.sender.send(notification);
    }
}

#[async_trait]
impl SubscriptionCallback for BroadcastCallback {
    async fn on_data_change(&self, change: DataChange) {
        self.forward(Notification::DataChange(change));
    }

    async fn on_event(&self, event: EventFields) {
        self.forward(Notification::Event(event));
    }

    async fn on_status_change(&self, subscription_id: u32, status: StatusCode) {
        self.forward(Notification::StatusChange {
            subscription_id,
            status,
        });
    }
}
