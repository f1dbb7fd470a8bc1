// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification routing table.
//!
//! The registry maps subscription ids to their monitored items (keyed by
//! client handle) and to a per-subscription dispatcher task. The session
//! engine mutates it as subscriptions and items come and go; the publish
//! loop only reads it while routing a response. Each dispatcher drains its
//! own queue in order, so one slow callback never holds up another
//! subscription or the publish loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::SubscriptionSettings;
use crate::error::{SessionError, UaResult};
use crate::messages::{
    DataChangeNotification, EventNotificationList, PublishResponse, ReadValueId,
    StatusChangeNotification,
};
use crate::types::StatusCode;

use super::callback::{DataChange, EventFields, SubscriptionCallback};

// =============================================================================
// Public records
// =============================================================================

/// A subscription as granted by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    /// Server-assigned id.
    pub subscription_id: u32,
    /// Granted publishing interval.
    pub publishing_interval: Duration,
    /// Granted lifetime count.
    pub lifetime_count: u32,
    /// Granted keep-alive count.
    pub max_keep_alive_count: u32,
    /// Whether the server currently publishes.
    pub publishing_enabled: bool,
    /// Settings the subscription was requested with.
    pub requested: SubscriptionSettings,
}

/// A monitored item known to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemEntry {
    /// Routing key within the subscription.
    pub client_handle: u32,
    /// Server-assigned id.
    pub monitored_item_id: u32,
    /// What is monitored.
    pub item_to_monitor: ReadValueId,
}

// =============================================================================
// Internals
// =============================================================================

#[derive(Debug)]
enum Delivery {
    DataChange(DataChange),
    Event(EventFields),
    Status(StatusCode),
    KeepAlive(u32),
}

struct SubscriptionEntry {
    info: SubscriptionInfo,
    items: HashMap<u32, MonitoredItemEntry>,
    queue: mpsc::Sender<Delivery>,
    overflowed: Arc<AtomicBool>,
    dispatcher: JoinHandle<()>,
}

/// Dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    data_changes: AtomicU64,
    events: AtomicU64,
    keep_alives: AtomicU64,
    status_changes: AtomicU64,
    dropped: AtomicU64,
    unroutable: AtomicU64,
}

impl DispatchStats {
    /// Data changes queued for callbacks.
    pub fn data_changes(&self) -> u64 {
        self.data_changes.load(Ordering::Relaxed)
    }

    /// Events queued for callbacks.
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Keep-alive messages consumed.
    pub fn keep_alives(&self) -> u64 {
        self.keep_alives.load(Ordering::Relaxed)
    }

    /// Status changes queued for callbacks.
    pub fn status_changes(&self) -> u64 {
        self.status_changes.load(Ordering::Relaxed)
    }

    /// Notifications lost because a dispatcher queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Notifications for subscriptions or handles the session does not know.
    pub fn unroutable(&self) -> u64 {
        self.unroutable.load(Ordering::Relaxed)
    }
}

// =============================================================================
// SubscriptionRegistry
// =============================================================================

/// Routing table from subscription id and client handle to callbacks.
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<u32, SubscriptionEntry>>,
    count: watch::Sender<usize>,
    queue_capacity: usize,
    stats: DispatchStats,
}

impl SubscriptionRegistry {
    /// Creates an empty registry whose dispatcher queues hold
    /// `queue_capacity` notifications each.
    pub fn new(queue_capacity: usize) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            entries: RwLock::new(HashMap::new()),
            count,
            queue_capacity: queue_capacity.max(1),
            stats: DispatchStats::default(),
        }
    }

    /// Registers a subscription and starts its dispatcher.
    ///
    /// Must be called within a Tokio runtime.
    pub fn register(&self, info: SubscriptionInfo, callback: Arc<dyn SubscriptionCallback>) {
        let subscription_id = info.subscription_id;
        let (queue, rx) = mpsc::channel(self.queue_capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        let dispatcher = tokio::spawn(run_dispatcher(subscription_id, rx, overflowed.clone(), callback));
        let entry = SubscriptionEntry {
            info,
            items: HashMap::new(),
            queue,
            overflowed,
            dispatcher,
        };

        let mut entries = self.entries.write();
        if let Some(old) = entries.insert(subscription_id, entry) {
            old.dispatcher.abort();
        }
        self.count.send_replace(entries.len());
        tracing::debug!(subscription_id, "Subscription registered");
    }

    /// Removes a subscription. Its dispatcher finishes the queued
    /// notifications and then exits.
    pub fn unregister(&self, subscription_id: u32) -> bool {
        let mut entries = self.entries.write();
        let removed = entries.remove(&subscription_id).is_some();
        self.count.send_replace(entries.len());
        if removed {
            tracing::debug!(subscription_id, "Subscription unregistered");
        }
        removed
    }

    /// Removes every subscription, stopping the dispatchers immediately.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        for (_, entry) in entries.drain() {
            entry.dispatcher.abort();
        }
        self.count.send_replace(0);
    }

    /// Returns `true` if the subscription is registered.
    pub fn contains(&self, subscription_id: u32) -> bool {
        self.entries.read().contains_key(&subscription_id)
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if no subscription is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Watches the number of subscriptions.
    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Registered subscription ids, sorted.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.entries.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of one subscription.
    pub fn info(&self, subscription_id: u32) -> Option<SubscriptionInfo> {
        self.entries.read().get(&subscription_id).map(|e| e.info.clone())
    }

    /// Updates the stored subscription record.
    pub fn update_info(&self, subscription_id: u32, update: impl FnOnce(&mut SubscriptionInfo)) -> bool {
        match self.entries.write().get_mut(&subscription_id) {
            Some(entry) => {
                update(&mut entry.info);
                true
            }
            None => false,
        }
    }

    /// Monitored items of a subscription, sorted by client handle.
    pub fn items(&self, subscription_id: u32) -> Vec<MonitoredItemEntry> {
        let entries = self.entries.read();
        let mut items: Vec<MonitoredItemEntry> = entries
            .get(&subscription_id)
            .map(|e| e.items.values().cloned().collect())
            .unwrap_or_default();
        items.sort_unstable_by_key(|i| i.client_handle);
        items
    }

    /// Checks that `handles` are unique among themselves and not yet used
    /// in the subscription.
    pub fn check_new_handles(&self, subscription_id: u32, handles: &[u32]) -> UaResult<()> {
        let entries = self.entries.read();
        let entry = entries
            .get(&subscription_id)
            .ok_or(SessionError::UnknownSubscription { subscription_id })?;
        let mut seen = std::collections::HashSet::with_capacity(handles.len());
        for &client_handle in handles {
            if entry.items.contains_key(&client_handle) || !seen.insert(client_handle) {
                return Err(SessionError::DuplicateClientHandle {
                    subscription_id,
                    client_handle,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Adds items to the routing table.
    ///
    /// The batch is rejected as a whole if a client handle repeats within it
    /// or is already routed in the subscription.
    pub fn add_items(&self, subscription_id: u32, items: impl IntoIterator<Item = MonitoredItemEntry>) -> UaResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&subscription_id)
            .ok_or(SessionError::UnknownSubscription { subscription_id })?;
        let items: Vec<MonitoredItemEntry> = items.into_iter().collect();
        let mut seen = std::collections::HashSet::with_capacity(items.len());
        for item in &items {
            let client_handle = item.client_handle;
            if entry.items.contains_key(&client_handle) || !seen.insert(client_handle) {
                return Err(SessionError::DuplicateClientHandle {
                    subscription_id,
                    client_handle,
                }
                .into());
            }
        }
        for item in items {
            entry.items.insert(item.client_handle, item);
        }
        Ok(())
    }

    /// Moves an item to a new client handle.
    pub fn rebind_item(&self, subscription_id: u32, monitored_item_id: u32, client_handle: u32) {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&subscription_id) else {
            return;
        };
        let old = entry
            .items
            .iter()
            .find(|(_, i)| i.monitored_item_id == monitored_item_id)
            .map(|(handle, _)| *handle);
        if let Some(mut item) = old.and_then(|handle| entry.items.remove(&handle)) {
            item.client_handle = client_handle;
            entry.items.insert(client_handle, item);
        }
    }

    /// Removes items by server id.
    pub fn remove_items(&self, subscription_id: u32, monitored_item_ids: &[u32]) {
        if let Some(entry) = self.entries.write().get_mut(&subscription_id) {
            entry
                .items
                .retain(|_, i| !monitored_item_ids.contains(&i.monitored_item_id));
        }
    }

    /// Dispatch counters.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Routes one Publish response to its subscription's dispatcher.
    ///
    /// Notifications are queued in the order they appear in the message.
    /// A bad status change removes the subscription once it is queued.
    pub fn dispatch(&self, response: &PublishResponse) {
        let subscription_id = response.subscription_id;
        let message = &response.notification_message;
        let sequence_number = message.sequence_number;

        let mut expired = false;
        {
            let entries = self.entries.read();
            let Some(entry) = entries.get(&subscription_id) else {
                self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subscription_id, sequence_number, "Publish response for unknown subscription");
                return;
            };

            if message.is_keep_alive() {
                self.stats.keep_alives.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(subscription_id, sequence_number, "Keep-alive");
                self.enqueue(entry, Delivery::KeepAlive(sequence_number));
                return;
            }

            for data in message.notification_data.iter().flatten() {
                match data.decode_as::<DataChangeNotification>() {
                    Ok(Some(changes)) => {
                        for item in changes.monitored_items.unwrap_or_default() {
                            let Some(known) = entry.items.get(&item.client_handle) else {
                                self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(
                                    subscription_id,
                                    client_handle = item.client_handle,
                                    "Data change for unknown client handle"
                                );
                                continue;
                            };
                            self.stats.data_changes.fetch_add(1, Ordering::Relaxed);
                            self.enqueue(
                                entry,
                                Delivery::DataChange(DataChange {
                                    subscription_id,
                                    client_handle: item.client_handle,
                                    node_id: Some(known.item_to_monitor.node_id.clone()),
                                    value: item.value,
                                    sequence_number,
                                }),
                            );
                        }
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(subscription_id, error = %e, "Undecodable data change notification");
                        continue;
                    }
                }

                match data.decode_as::<EventNotificationList>() {
                    Ok(Some(list)) => {
                        for event in list.events.unwrap_or_default() {
                            if !entry.items.contains_key(&event.client_handle) {
                                self.stats.unroutable.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }
                            self.stats.events.fetch_add(1, Ordering::Relaxed);
                            self.enqueue(
                                entry,
                                Delivery::Event(EventFields {
                                    subscription_id,
                                    client_handle: event.client_handle,
                                    fields: event.event_fields.unwrap_or_default(),
                                    sequence_number,
                                }),
                            );
                        }
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(subscription_id, error = %e, "Undecodable event notification");
                        continue;
                    }
                }

                match data.decode_as::<StatusChangeNotification>() {
                    Ok(Some(change)) => {
                        self.stats.status_changes.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(subscription_id, status = %change.status, "Subscription status changed");
                        expired |= change.status.is_bad();
                        self.enqueue(entry, Delivery::Status(change.status));
                    }
                    Ok(None) => {
                        tracing::debug!(subscription_id, type_id = ?data.type_id, "Unknown notification type");
                    }
                    Err(e) => {
                        tracing::warn!(subscription_id, error = %e, "Undecodable status change notification");
                    }
                }
            }
        }

        if expired {
            self.unregister(subscription_id);
        }
    }

    /// Queues a delivery without blocking the publish loop.
    ///
    /// A full queue drops the delivery and flags the dispatcher, which then
    /// reports `BadMessageNotAvailable` through `on_status_change`.
    fn enqueue(&self, entry: &SubscriptionEntry, delivery: Delivery) {
        match entry.queue.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                entry.overflowed.store(true, Ordering::Release);
                tracing::warn!(
                    subscription_id = entry.info.subscription_id,
                    "Dispatcher queue full, notification dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscription_id = entry.info.subscription_id, "Dispatcher stopped, notification discarded");
            }
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.ids())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        for (_, entry) in self.entries.get_mut().drain() {
            entry.dispatcher.abort();
        }
    }
}

async fn run_dispatcher(
    subscription_id: u32,
    mut rx: mpsc::Receiver<Delivery>,
    overflowed: Arc<AtomicBool>,
    callback: Arc<dyn SubscriptionCallback>,
) {
    while let Some(delivery) = rx.recv().await {
        match delivery {
            Delivery::DataChange(change) => callback.on_data_change(change).await,
            Delivery::Event(event) => callback.on_event(event).await,
            Delivery::Status(status) => callback.on_status_change(subscription_id, status).await,
            Delivery::KeepAlive(seq) => callback.on_keep_alive(subscription_id, seq).await,
        }
        // The queue was full when the flag was set, so this loop always
        // gets another turn to report it.
        if overflowed.swap(false, Ordering::AcqRel) {
            callback
                .on_status_change(subscription_id, StatusCode::BAD_MESSAGE_NOT_AVAILABLE)
                .await;
        }
    }
    tracing::trace!(subscription_id, "Dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DataValue, ExtensionObject, Variant};
    use crate::messages::{EventFieldList, MonitoredItemNotification, NotificationMessage};
    use crate::subscription::callback::{ChannelCallback, Notification};
    use crate::types::{DateTime, NodeId};

    fn info(subscription_id: u32) -> SubscriptionInfo {
        SubscriptionInfo {
            subscription_id,
            publishing_interval: Duration::from_millis(100),
            lifetime_count: 60,
            max_keep_alive_count: 10,
            publishing_enabled: true,
            requested: SubscriptionSettings::default(),
        }
    }

    fn item(client_handle: u32, id: u32) -> MonitoredItemEntry {
        MonitoredItemEntry {
            client_handle,
            monitored_item_id: id,
            item_to_monitor: ReadValueId::value(NodeId::numeric(2, client_handle)),
        }
    }

    fn publish(subscription_id: u32, seq: u32, data: Vec<ExtensionObject>) -> PublishResponse {
        PublishResponse {
            subscription_id,
            notification_message: NotificationMessage {
                sequence_number: seq,
                publish_time: DateTime::now(),
                notification_data: Some(data),
            },
            ..Default::default()
        }
    }

    fn data_change(values: &[(u32, i32)]) -> ExtensionObject {
        ExtensionObject::from_structure(DataChangeNotification {
            monitored_items: Some(
                values
                    .iter()
                    .map(|&(client_handle, v)| MonitoredItemNotification {
                        client_handle,
                        value: DataValue::new(Variant::Int32(v)),
                    })
                    .collect(),
            ),
            diagnostic_infos: None,
        })
    }

    #[tokio::test]
    async fn test_handle_checks() {
        let registry = SubscriptionRegistry::new(16);
        let (callback, _rx) = ChannelCallback::with_channel(16);
        registry.register(info(1), Arc::new(callback));
        registry.add_items(1, vec![item(42, 100)]).unwrap();

        assert!(registry.check_new_handles(1, &[1, 2]).is_ok());
        assert!(registry.check_new_handles(1, &[42]).is_err());
        assert!(registry.check_new_handles(1, &[3, 3]).is_err());
        assert!(registry.check_new_handles(9, &[1]).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_in_order() {
        let registry = SubscriptionRegistry::new(16);
        let (callback, mut rx) = ChannelCallback::with_channel(16);
        registry.register(info(1), Arc::new(callback));
        registry.add_items(1, vec![item(42, 100), item(43, 101)]).unwrap();

        registry.dispatch(&publish(1, 1, vec![data_change(&[(42, 1), (43, 2)])]));
        registry.dispatch(&publish(1, 2, vec![data_change(&[(42, 3)])]));

        let mut seen = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                Notification::DataChange(c) => seen.push((c.client_handle, c.sequence_number)),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(seen, vec![(42, 1), (43, 1), (42, 2)]);
        assert_eq!(registry.stats().data_changes(), 3);
    }

    #[tokio::test]
    async fn test_keep_alive_is_not_data() {
        let registry = SubscriptionRegistry::new(16);
        let (callback, mut rx) = ChannelCallback::with_channel(16);
        registry.register(info(1), Arc::new(callback));

        registry.dispatch(&publish(1, 5, Vec::new()));
        registry.dispatch(&publish(1, 6, vec![data_change(&[])]));
        assert_eq!(registry.stats().keep_alives(), 1);
        assert_eq!(registry.stats().data_changes(), 0);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_handles_and_subscriptions() {
        let registry = SubscriptionRegistry::new(16);
        let (callback, _rx) = ChannelCallback::with_channel(16);
        registry.register(info(1), Arc::new(callback));
        registry.add_items(1, vec![item(42, 100)]).unwrap();

        registry.dispatch(&publish(1, 1, vec![data_change(&[(7, 1)])]));
        registry.dispatch(&publish(2, 1, vec![data_change(&[(42, 1)])]));
        assert_eq!(registry.stats().unroutable(), 2);
    }

    #[tokio::test]
    async fn test_events_routed() {
        let registry = SubscriptionRegistry::new(16);
        let (callback, mut rx) = ChannelCallback::with_channel(16);
        registry.register(info(1), Arc::new(callback));
        registry.add_items(1, vec![item(5, 100)]).unwrap();

        let events = ExtensionObject::from_structure(EventNotificationList {
            events: Some(vec![EventFieldList {
                client_handle: 5,
                event_fields: Some(vec![Variant::String("boiler".into())]),
            }]),
        });
        registry.dispatch(&publish(1, 1, vec![events]));
        match rx.recv().await.unwrap() {
            Notification::Event(e) => {
                assert_eq!(e.client_handle, 5);
                assert_eq!(e.fields, vec![Variant::String("boiler".into())]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_status_change_unregisters() {
        let registry = SubscriptionRegistry::new(16);
        let (callback, mut rx) = ChannelCallback::with_channel(16);
        registry.register(info(1), Arc::new(callback));
        let mut count = registry.subscribe_count();
        assert_eq!(*count.borrow_and_update(), 1);

        let status = ExtensionObject::from_structure(StatusChangeNotification {
            status: StatusCode::BAD_TIMEOUT,
            ..Default::default()
        });
        registry.dispatch(&publish(1, 3, vec![status]));

        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::StatusChange {
                subscription_id: 1,
                status: StatusCode::BAD_TIMEOUT
            }
        );
        assert!(!registry.contains(1));
        assert_eq!(*count.borrow_and_update(), 0);
    }

    #[tokio::test]
    async fn test_item_bookkeeping() {
        let registry = SubscriptionRegistry::new(4);
        let (callback, _rx) = ChannelCallback::with_channel(4);
        registry.register(info(3), Arc::new(callback));
        registry.add_items(3, vec![item(1, 10), item(2, 11)]).unwrap();

        registry.rebind_item(3, 11, 20);
        let handles: Vec<u32> = registry.items(3).iter().map(|i| i.client_handle).collect();
        assert_eq!(handles, vec![1, 20]);

        registry.remove_items(3, &[10]);
        assert_eq!(registry.items(3).len(), 1);

        assert!(registry.update_info(3, |i| i.publishing_enabled = false));
        assert!(!registry.info(3).unwrap().publishing_enabled);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_add_items_rejects_duplicates_atomically() {
        let registry = SubscriptionRegistry::new(4);
        let (callback, _rx) = ChannelCallback::with_channel(4);
        registry.register(info(1), Arc::new(callback));
        registry.add_items(1, vec![item(1, 10)]).unwrap();

        let err = registry.add_items(1, vec![item(2, 11), item(1, 12)]).unwrap_err();
        assert!(err.to_string().contains("Client handle 1"), "{err}");
        assert_eq!(registry.items(1).len(), 1);

        assert!(registry.add_items(1, vec![item(3, 13), item(3, 14)]).is_err());
        assert!(registry.add_items(9, vec![item(1, 10)]).is_err());
        assert_eq!(registry.items(1).len(), 1);
    }

    struct GatedCallback {
        gate: tokio::sync::Semaphore,
        forward: mpsc::UnboundedSender<Notification>,
    }

    #[async_trait::async_trait]
    impl SubscriptionCallback for GatedCallback {
        async fn on_data_change(&self, change: DataChange) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
            let _ = self.forward.send(Notification::DataChange(change));
        }

        async fn on_status_change(&self, subscription_id: u32, status: StatusCode) {
            let _ = self.forward.send(Notification::StatusChange { subscription_id, status });
        }
    }

    #[tokio::test]
    async fn test_full_queue_reports_lost_notifications() {
        let registry = SubscriptionRegistry::new(1);
        let (forward, mut rx) = mpsc::unbounded_channel();
        let callback = Arc::new(GatedCallback {
            gate: tokio::sync::Semaphore::new(0),
            forward,
        });
        registry.register(info(1), callback.clone());
        registry.add_items(1, vec![item(42, 100)]).unwrap();

        // The first change is taken by the dispatcher and blocks on the gate,
        // the second fills the queue and the third is dropped.
        registry.dispatch(&publish(1, 1, vec![data_change(&[(42, 1)])]));
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        registry.dispatch(&publish(1, 2, vec![data_change(&[(42, 2)])]));
        registry.dispatch(&publish(1, 3, vec![data_change(&[(42, 3)])]));
        assert_eq!(registry.stats().dropped(), 1);

        callback.gate.add_permits(8);
        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(rx.recv().await.unwrap());
        }
        assert!(matches!(&seen[0], Notification::DataChange(c) if c.sequence_number == 1));
        assert!(seen.contains(&Notification::StatusChange {
            subscription_id: 1,
            status: StatusCode::BAD_MESSAGE_NOT_AVAILABLE,
        }));
        assert!(seen
            .iter()
            .any(|n| matches!(n, Notification::DataChange(c) if c.sequence_number == 2)));
        assert!(registry.contains(1));
    }
}
