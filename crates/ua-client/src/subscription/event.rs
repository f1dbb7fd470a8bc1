// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Standard BaseEventType fields for event monitored items.

use crate::codec::Variant;
use crate::messages::{ContentFilter, EventFilter, MonitoredItemCreateRequest, SimpleAttributeOperand};
use crate::types::ids::{attribute_ids, object_ids, object_type_ids};
use crate::types::{ByteString, DateTime, LocalizedText, NodeId, QualifiedName};

use super::callback::EventFields;

/// Browse names of the selected fields, in select-clause order.
pub const BASE_EVENT_FIELDS: [&str; 8] = [
    "EventId",
    "EventType",
    "SourceNode",
    "SourceName",
    "Time",
    "ReceiveTime",
    "Message",
    "Severity",
];

/// The common fields of every event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BaseEvent {
    /// Server-unique event id.
    pub event_id: ByteString,
    /// Event type node.
    pub event_type: NodeId,
    /// Node that emitted the event.
    pub source_node: NodeId,
    /// Name of the source.
    pub source_name: String,
    /// When the event occurred.
    pub time: DateTime,
    /// When the server received it.
    pub receive_time: DateTime,
    /// Human-readable description.
    pub message: LocalizedText,
    /// 1 (lowest) to 1000 (highest).
    pub severity: u16,
}

impl BaseEvent {
    /// Select clauses for [`BASE_EVENT_FIELDS`].
    pub fn select_clauses() -> Vec<SimpleAttributeOperand> {
        BASE_EVENT_FIELDS
            .iter()
            .map(|name| SimpleAttributeOperand {
                type_definition_id: NodeId::numeric(0, object_type_ids::BASE_EVENT_TYPE),
                browse_path: Some(vec![QualifiedName::new(0, *name)]),
                attribute_id: attribute_ids::VALUE,
                index_range: String::new(),
            })
            .collect()
    }

    /// An event filter selecting the base fields without a where clause.
    pub fn filter() -> EventFilter {
        EventFilter {
            select_clauses: Some(Self::select_clauses()),
            where_clause: ContentFilter::default(),
        }
    }

    /// An event monitored item on the Server object.
    pub fn monitored_item(client_handle: u32, queue_size: u32) -> MonitoredItemCreateRequest {
        MonitoredItemCreateRequest::event(
            NodeId::numeric(0, object_ids::SERVER),
            client_handle,
            Self::filter(),
            queue_size,
        )
    }

    /// Decodes fields selected with [`select_clauses`](Self::select_clauses).
    ///
    /// Missing or mistyped fields keep their default.
    pub fn from_fields(fields: &[Variant]) -> Self {
        let mut event = Self::default();
        for (index, field) in fields.iter().enumerate() {
            match (index, field) {
                (0, Variant::ByteString(id)) => event.event_id = id.clone(),
                (1, Variant::NodeId(id)) => event.event_type = (**id).clone(),
                (2, Variant::NodeId(id)) => event.source_node = (**id).clone(),
                (3, Variant::String(name)) => event.source_name = name.clone(),
                (4, Variant::DateTime(time)) => event.time = *time,
                (5, Variant::DateTime(time)) => event.receive_time = *time,
                (6, Variant::LocalizedText(text)) => event.message = (**text).clone(),
                (7, Variant::UInt16(severity)) => event.severity = *severity,
                (7, other) => {
                    if let Some(v) = other.as_i64() {
                        event.severity = v.clamp(0, i64::from(u16::MAX)) as u16;
                    }
                }
                _ => {}
            }
        }
        event
    }
}

impl From<&EventFields> for BaseEvent {
    fn from(fields: &EventFields) -> Self {
        Self::from_fields(&fields.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_clauses() {
        let clauses = BaseEvent::select_clauses();
        assert_eq!(clauses.len(), BASE_EVENT_FIELDS.len());
        assert_eq!(clauses[3].browse_path.as_ref().unwrap()[0].name, "SourceName");
        assert_eq!(clauses[0].attribute_id, attribute_ids::VALUE);
    }

    #[test]
    fn test_monitored_item_targets_server_object() {
        let item = BaseEvent::monitored_item(9, 100);
        assert_eq!(item.item_to_monitor.node_id, NodeId::numeric(0, object_ids::SERVER));
        assert_eq!(item.item_to_monitor.attribute_id, attribute_ids::EVENT_NOTIFIER);
        assert_eq!(item.requested_parameters.client_handle, 9);
        let filter = item.requested_parameters.filter.decode_as::<EventFilter>().unwrap().unwrap();
        assert_eq!(filter.select_clauses.unwrap().len(), 8);
    }

    #[test]
    fn test_from_fields() {
        let fields = vec![
            Variant::ByteString(ByteString::from(vec![1u8, 2, 3])),
            Variant::NodeId(Box::new(NodeId::numeric(0, 2041))),
            Variant::NodeId(Box::new(NodeId::numeric(2, 10))),
            Variant::String("Boiler".into()),
            Variant::Empty,
            Variant::Empty,
            Variant::LocalizedText(Box::new(LocalizedText::new("Overheat"))),
            Variant::UInt16(700),
        ];
        let event = BaseEvent::from_fields(&fields);
        assert_eq!(event.source_name, "Boiler");
        assert_eq!(event.source_node, NodeId::numeric(2, 10));
        assert_eq!(event.message.text, "Overheat");
        assert_eq!(event.severity, 700);
        assert_eq!(event.event_id.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_from_short_fields() {
        let event = BaseEvent::from_fields(&[Variant::Empty, Variant::Empty, Variant::Empty, Variant::Int32(5)]);
        assert_eq!(event, BaseEvent::default());
    }
}
