// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Server-side subscriptions: sampling, notification messages, keep-alives,
//! retransmission queues and the pairing with queued Publish requests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use ua_client::codec::{DataValue, ExtensionObject, Variant};
use ua_client::messages::{
    encode_body, DataChangeNotification, EventFieldList, EventNotificationList, MonitoredItemNotification,
    MonitoringMode, NotificationMessage, PublishResponse, ResponseHeader, ServiceResponse,
    StatusChangeNotification,
};
use ua_client::security::crypto::random_nonce;
use ua_client::types::ids::object_type_ids;
use ua_client::types::{ByteString, DateTime, LocalizedText, NodeId, StatusCode};

use super::address_space::{AddressSpace, DemoNodes};
use super::connection::Outgoing;
use super::state::Core;
use super::ServerState;

/// Resolution of the subscription clock.
const TICK: Duration = Duration::from_millis(10);

/// A Publish request waiting for a notification.
pub(crate) struct PendingPublish {
    pub reply: mpsc::UnboundedSender<Outgoing>,
    pub request_id: u32,
    pub request_handle: u32,
    pub results: Vec<StatusCode>,
}

// =============================================================================
// Events
// =============================================================================

/// An event raised through [`MockServer::fire_event`](super::MockServer::fire_event).
pub(crate) struct RaisedEvent {
    event_id: Vec<u8>,
    source: NodeId,
    source_name: String,
    message: String,
    severity: u16,
    time: DateTime,
}

impl RaisedEvent {
    pub fn new(source: NodeId, source_name: String, message: &str, severity: u16) -> Self {
        Self {
            event_id: random_nonce(16),
            source,
            source_name,
            message: message.to_string(),
            severity,
            time: DateTime::now(),
        }
    }

    /// Field values in select-clause order; unknown names yield Empty.
    fn fields(&self, select: &[String]) -> Vec<Variant> {
        select
            .iter()
            .map(|name| match name.as_str() {
                "EventId" => Variant::ByteString(ByteString::from(self.event_id.clone())),
                "EventType" => Variant::NodeId(Box::new(NodeId::numeric(
                    0,
                    object_type_ids::BASE_EVENT_TYPE,
                ))),
                "SourceNode" => Variant::NodeId(Box::new(self.source.clone())),
                "SourceName" => Variant::String(self.source_name.clone()),
                "Time" => Variant::DateTime(self.time),
                "ReceiveTime" => Variant::DateTime(DateTime::now()),
                "Message" => Variant::LocalizedText(Box::new(LocalizedText::new(self.message.clone()))),
                "Severity" => Variant::UInt16(self.severity),
                _ => Variant::Empty,
            })
            .collect()
    }
}

// =============================================================================
// Monitored items
// =============================================================================

pub(crate) enum ItemKind {
    Data { last: Option<DataValue> },
    Event { select: Vec<String>, queue: VecDeque<Vec<Variant>> },
}

pub(crate) struct MonitoredItem {
    pub client_handle: u32,
    pub node_id: NodeId,
    pub mode: MonitoringMode,
    pub sampling_interval: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub kind: ItemKind,
}

// =============================================================================
// MockSubscription
// =============================================================================

pub(crate) struct MockSubscription {
    pub id: u32,
    pub owner: NodeId,
    pub publishing_interval: Duration,
    pub max_keep_alive: u32,
    pub lifetime_count: u32,
    pub publishing_enabled: bool,
    pub items: BTreeMap<u32, MonitoredItem>,
    pub pending: VecDeque<NotificationMessage>,
    pub retransmission: BTreeMap<u32, NotificationMessage>,
    pub closing: bool,
    next_sequence: u32,
    next_item_id: u32,
    keep_alive_counter: u32,
    next_cycle: Instant,
}

impl MockSubscription {
    pub fn new(
        id: u32,
        owner: NodeId,
        publishing_interval: Duration,
        max_keep_alive: u32,
        lifetime_count: u32,
        publishing_enabled: bool,
    ) -> Self {
        Self {
            id,
            owner,
            publishing_interval,
            max_keep_alive,
            lifetime_count,
            publishing_enabled,
            items: BTreeMap::new(),
            pending: VecDeque::new(),
            retransmission: BTreeMap::new(),
            closing: false,
            next_sequence: 1,
            next_item_id: 1,
            // The first idle cycle sends a keep-alive straight away.
            keep_alive_counter: max_keep_alive,
            next_cycle: Instant::now(),
        }
    }

    pub fn revise(&mut self, publishing_interval: Duration, max_keep_alive: u32, lifetime_count: u32) {
        self.publishing_interval = publishing_interval;
        self.max_keep_alive = max_keep_alive;
        self.lifetime_count = lifetime_count;
    }

    pub fn add_item(&mut self, item: MonitoredItem) -> u32 {
        let id = self.next_item_id;
        self.next_item_id += 1;
        self.items.insert(id, item);
        id
    }

    /// Removes an acknowledged message from the retransmission queue.
    pub fn acknowledge(&mut self, sequence_number: u32) -> StatusCode {
        match self.retransmission.remove(&sequence_number) {
            Some(_) => StatusCode::GOOD,
            None => StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN,
        }
    }

    fn take_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.checked_add(1).unwrap_or(1);
        sequence
    }

    /// Queues an event on matching event items. Items on the Server object
    /// see every event; others only events from their own node.
    pub fn push_event(&mut self, event: &RaisedEvent) -> usize {
        if self.closing {
            return 0;
        }
        let server = DemoNodes::server();
        let mut reached = 0;
        for item in self.items.values_mut() {
            let ItemKind::Event { select, queue } = &mut item.kind else {
                continue;
            };
            if item.node_id != server && item.node_id != event.source {
                continue;
            }
            if queue.len() >= item.queue_size.max(1) as usize {
                if !item.discard_oldest {
                    continue;
                }
                queue.pop_front();
            }
            queue.push_back(event.fields(select));
            reached += 1;
        }
        reached
    }

    /// Sends a final status change and marks the subscription for removal.
    pub fn close_with(&mut self, status: StatusCode) {
        let change = StatusChangeNotification {
            status,
            diagnostic_info: Default::default(),
        };
        let message = NotificationMessage {
            sequence_number: self.take_sequence(),
            publish_time: DateTime::now(),
            notification_data: Some(vec![ExtensionObject::from_structure(change)]),
        };
        self.pending.push_back(message);
        self.closing = true;
    }

    /// Runs one publishing cycle if it is due.
    pub fn cycle(&mut self, space: &AddressSpace, now: Instant) {
        if self.closing || now < self.next_cycle {
            return;
        }
        self.next_cycle = now + self.publishing_interval;

        let mut payload = Vec::new();
        if self.publishing_enabled {
            let (data, events) = self.collect(space);
            if !data.is_empty() {
                payload.push(ExtensionObject::from_structure(DataChangeNotification {
                    monitored_items: Some(data),
                    diagnostic_infos: None,
                }));
            }
            if !events.is_empty() {
                payload.push(ExtensionObject::from_structure(EventNotificationList {
                    events: Some(events),
                }));
            }
        }

        if payload.is_empty() {
            self.keep_alive_counter += 1;
            if self.keep_alive_counter >= self.max_keep_alive && self.pending.is_empty() {
                self.keep_alive_counter = 0;
                // Keep-alives carry the next sequence number without using it.
                self.pending.push_back(NotificationMessage {
                    sequence_number: self.next_sequence,
                    publish_time: DateTime::now(),
                    notification_data: None,
                });
            }
            return;
        }

        self.keep_alive_counter = 0;
        let message = NotificationMessage {
            sequence_number: self.take_sequence(),
            publish_time: DateTime::now(),
            notification_data: Some(payload),
        };
        self.retransmission.insert(message.sequence_number, message.clone());
        self.pending.push_back(message);
    }

    fn collect(&mut self, space: &AddressSpace) -> (Vec<MonitoredItemNotification>, Vec<EventFieldList>) {
        let mut data = Vec::new();
        let mut events = Vec::new();
        for item in self.items.values_mut() {
            let reporting = item.mode == MonitoringMode::Reporting;
            match &mut item.kind {
                ItemKind::Data { last } => {
                    if item.mode == MonitoringMode::Disabled {
                        continue;
                    }
                    let sample = space.sample(&item.node_id);
                    let changed = last
                        .as_ref()
                        .map_or(true, |prev| prev.value != sample.value || prev.status != sample.status);
                    if changed {
                        *last = Some(sample.clone());
                        if reporting {
                            data.push(MonitoredItemNotification {
                                client_handle: item.client_handle,
                                value: sample,
                            });
                        }
                    }
                }
                ItemKind::Event { queue, .. } => {
                    if !reporting {
                        queue.clear();
                        continue;
                    }
                    events.extend(queue.drain(..).map(|fields| EventFieldList {
                        client_handle: item.client_handle,
                        event_fields: Some(fields),
                    }));
                }
            }
        }
        (data, events)
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Pairs queued Publish requests with pending notification messages.
pub(crate) fn deliver(core: &mut Core) {
    let Core {
        sessions,
        subscriptions,
        ..
    } = core;

    for (token, session) in sessions.iter_mut() {
        session.publish_queue.retain(|p| !p.reply.is_closed());
        while !session.publish_queue.is_empty() {
            let Some(subscription) = subscriptions
                .values_mut()
                .find(|s| &s.owner == token && !s.pending.is_empty())
            else {
                break;
            };
            let (Some(publish), Some(message)) =
                (session.publish_queue.pop_front(), subscription.pending.pop_front())
            else {
                break;
            };

            let response = PublishResponse {
                response_header: ResponseHeader::new(publish.request_handle, StatusCode::GOOD),
                subscription_id: subscription.id,
                available_sequence_numbers: Some(subscription.retransmission.keys().copied().collect()),
                more_notifications: !subscription.pending.is_empty(),
                notification_message: message,
                results: (!publish.results.is_empty()).then_some(publish.results),
                diagnostic_infos: None,
            };
            let body = match encode_body(PublishResponse::ENCODING_ID, &response) {
                Ok(body) => body,
                Err(e) => {
                    tracing::error!(error = %e, "Mock server failed to encode PublishResponse");
                    continue;
                }
            };
            let sent = publish.reply.send(Outgoing::Message {
                request_id: publish.request_id,
                body,
            });
            if sent.is_err() {
                subscription.pending.push_front(response.notification_message);
            }
        }
    }

    subscriptions.retain(|id, s| {
        let done = s.closing && s.pending.is_empty();
        if done {
            tracing::debug!(subscription_id = id, "Mock subscription removed");
        }
        !done
    });
}

/// Drives publishing cycles and the Counter variable.
pub(crate) async fn run_ticker(state: Arc<ServerState>) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut next_count = Instant::now() + state.config.counter_interval;

    loop {
        interval.tick().await;
        let now = Instant::now();
        if now >= next_count {
            state.space.write().tick();
            next_count = now + state.config.counter_interval;
        }

        let space = state.space.read();
        let mut core = state.core.lock();
        for subscription in core.subscriptions.values_mut() {
            subscription.cycle(&space, now);
        }
        drop(space);
        deliver(&mut core);
    }
}
