// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Attribute services: Read, Write and HistoryRead.

use std::time::Duration;

use super::{EventFilter, RequestHeader, ResponseHeader};
use crate::codec::{DataValue, ExtensionObject, Variant};
use crate::types::ids::{attribute_ids, encoding_ids};
use crate::types::{
    ByteString, DateTime, DiagnosticInfo, NodeId, NumericRange, QualifiedName, StatusCode,
};

ua_enum! {
    /// Which timestamps the server returns.
    pub enum TimestampsToReturn {
        /// Source timestamp only.
        Source = 0,
        /// Server timestamp only.
        Server = 1,
        /// Both.
        Both = 2,
        /// Neither.
        Neither = 3,
        /// Invalid.
        Invalid = 4,
    }
    default = Both;
}

// =============================================================================
// Read
// =============================================================================

ua_struct! {
    /// Identifies one attribute to read.
    pub struct ReadValueId {
        /// Node.
        pub node_id: NodeId,
        /// Attribute id, see [`attribute_ids`].
        pub attribute_id: u32,
        /// Numeric range for arrays, e.g. `1:3`.
        pub index_range: String,
        /// Data encoding for structured values.
        pub data_encoding: QualifiedName,
    }
}

impl ReadValueId {
    /// Reads the Value attribute of a node.
    pub fn value(node_id: NodeId) -> Self {
        Self::attribute(node_id, attribute_ids::VALUE)
    }

    /// Reads any attribute of a node.
    pub fn attribute(node_id: NodeId, attribute_id: u32) -> Self {
        Self {
            node_id,
            attribute_id,
            ..Default::default()
        }
    }

    /// Restricts the read to part of an array value.
    pub fn with_index_range(mut self, range: &NumericRange) -> Self {
        self.index_range = range.to_string();
        self
    }
}

ua_struct! {
    /// Read request.
    pub struct ReadRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Maximum age of cached values in milliseconds.
        pub max_age: f64,
        /// Timestamps to return.
        pub timestamps_to_return: TimestampsToReturn,
        /// Attributes to read.
        pub nodes_to_read: Option<Vec<ReadValueId>>,
    }
}

ua_struct! {
    /// Read response.
    pub struct ReadResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per requested attribute, in order.
        pub results: Option<Vec<DataValue>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

// =============================================================================
// Write
// =============================================================================

ua_struct! {
    /// One attribute write.
    pub struct WriteValue {
        /// Node.
        pub node_id: NodeId,
        /// Attribute id.
        pub attribute_id: u32,
        /// Numeric range for arrays.
        pub index_range: String,
        /// New value.
        pub value: DataValue,
    }
}

impl WriteValue {
    /// Writes the Value attribute of a node.
    pub fn value(node_id: NodeId, value: impl Into<Variant>) -> Self {
        Self {
            node_id,
            attribute_id: attribute_ids::VALUE,
            index_range: String::new(),
            value: DataValue::new(value),
        }
    }

    /// Writes only the elements covered by `range`; the value must hold
    /// exactly that many elements.
    pub fn with_index_range(mut self, range: &NumericRange) -> Self {
        self.index_range = range.to_string();
        self
    }
}

ua_struct! {
    /// Write request.
    pub struct WriteRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Writes to perform.
        pub nodes_to_write: Option<Vec<WriteValue>>,
    }
}

ua_struct! {
    /// Write response.
    pub struct WriteResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One status per write, in order.
        pub results: Option<Vec<StatusCode>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

// =============================================================================
// HistoryRead
// =============================================================================

ua_struct! {
    /// One node to read history from.
    pub struct HistoryReadValueId {
        /// Node.
        pub node_id: NodeId,
        /// Numeric range.
        pub index_range: String,
        /// Data encoding.
        pub data_encoding: QualifiedName,
        /// Continuation point from a previous call; null on the first call.
        pub continuation_point: ByteString,
    }
}

impl HistoryReadValueId {
    /// A first-call entry for `node_id`.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Default::default()
        }
    }
}

ua_struct! {
    /// HistoryRead request.
    pub struct HistoryReadRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Raw, processed or event read details.
        pub history_read_details: ExtensionObject,
        /// Timestamps to return.
        pub timestamps_to_return: TimestampsToReturn,
        /// Release the continuation points instead of reading.
        pub release_continuation_points: bool,
        /// Nodes to read.
        pub nodes_to_read: Option<Vec<HistoryReadValueId>>,
    }
}

ua_struct! {
    /// Result for one node.
    pub struct HistoryReadResult {
        /// Status.
        pub status_code: StatusCode,
        /// Non-null when more data is available.
        pub continuation_point: ByteString,
        /// [`HistoryData`] or [`HistoryEvent`].
        pub history_data: ExtensionObject,
    }
}

ua_struct! {
    /// HistoryRead response.
    pub struct HistoryReadResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per node.
        pub results: Option<Vec<HistoryReadResult>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// Reads raw (or modified) values between two timestamps.
    pub struct ReadRawModifiedDetails {
        /// Read modified values instead of current ones.
        pub is_read_modified: bool,
        /// Start of the interval.
        pub start_time: DateTime,
        /// End of the interval.
        pub end_time: DateTime,
        /// Values per node per call; 0 means no limit.
        pub num_values_per_node: u32,
        /// Include bounding values.
        pub return_bounds: bool,
    }
}

ua_struct! {
    /// How aggregates treat uncertain and bad data.
    pub struct AggregateConfiguration {
        /// Use the server defaults for the remaining fields.
        pub use_server_capabilities_defaults: bool,
        /// Treat Uncertain as Bad.
        pub treat_uncertain_as_bad: bool,
        /// Percentage of bad data that makes an interval Bad.
        pub percent_data_bad: u8,
        /// Percentage of good data that makes an interval Good.
        pub percent_data_good: u8,
        /// Use sloped extrapolation.
        pub use_sloped_extrapolation: bool,
    }
}

ua_struct! {
    /// Reads aggregates over fixed intervals.
    pub struct ReadProcessedDetails {
        /// Start of the interval.
        pub start_time: DateTime,
        /// End of the interval.
        pub end_time: DateTime,
        /// Interval length in milliseconds.
        pub processing_interval: f64,
        /// Aggregate function per node.
        pub aggregate_type: Option<Vec<NodeId>>,
        /// Aggregate configuration.
        pub aggregate_configuration: AggregateConfiguration,
    }
}

impl ReadProcessedDetails {
    /// One aggregate over `[start, end)` in intervals of `interval`, with the
    /// server's default aggregate configuration.
    pub fn new(start_time: DateTime, end_time: DateTime, interval: Duration, aggregate: NodeId) -> Self {
        Self {
            start_time,
            end_time,
            processing_interval: interval.as_secs_f64() * 1000.0,
            aggregate_type: Some(vec![aggregate]),
            aggregate_configuration: AggregateConfiguration {
                use_server_capabilities_defaults: true,
                ..Default::default()
            },
        }
    }
}

ua_struct! {
    /// Reads historical events.
    pub struct ReadEventDetails {
        /// Events per node per call; 0 means no limit.
        pub num_values_per_node: u32,
        /// Start of the interval.
        pub start_time: DateTime,
        /// End of the interval.
        pub end_time: DateTime,
        /// Fields to return.
        pub filter: EventFilter,
    }
}

ua_struct! {
    /// Historical values of one node.
    pub struct HistoryData {
        /// Values in time order.
        pub data_values: Option<Vec<DataValue>>,
    }
}

ua_struct! {
    /// Fields of one historical event.
    pub struct HistoryEventFieldList {
        /// Fields in select-clause order.
        pub event_fields: Option<Vec<Variant>>,
    }
}

ua_struct! {
    /// Historical events of one node.
    pub struct HistoryEvent {
        /// Events.
        pub events: Option<Vec<HistoryEventFieldList>>,
    }
}

extension_type! {
    ReadRawModifiedDetails => encoding_ids::READ_RAW_MODIFIED_DETAILS,
    ReadProcessedDetails => encoding_ids::READ_PROCESSED_DETAILS,
    ReadEventDetails => encoding_ids::READ_EVENT_DETAILS,
    HistoryData => encoding_ids::HISTORY_DATA,
    HistoryEvent => encoding_ids::HISTORY_EVENT,
}

service! {
    "Read": ReadRequest(631) => ReadResponse(634),
    "HistoryRead": HistoryReadRequest(664) => HistoryReadResponse(667),
    "Write": WriteRequest(673) => WriteResponse(676),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_slice, encode_to_vec, TypeRegistry};

    #[test]
    fn test_history_data_resolves_through_standard_registry() {
        let result = HistoryReadResult {
            status_code: StatusCode::GOOD,
            continuation_point: ByteString::from(vec![1, 2, 3]),
            history_data: ExtensionObject::from_structure(HistoryData {
                data_values: Some(vec![DataValue::new(1.0f64), DataValue::new(2.0f64)]),
            }),
        };
        let bytes = encode_to_vec(&result).unwrap();
        let back: HistoryReadResult = decode_from_slice(&bytes, &TypeRegistry::standard()).unwrap();
        let data = back.history_data.downcast_ref::<HistoryData>().unwrap();
        assert_eq!(data.data_values.as_ref().map(Vec::len), Some(2));
        assert_eq!(back, result);
    }

    #[test]
    fn test_read_value_id_defaults() {
        let id = ReadValueId::value(NodeId::numeric(0, 2259));
        assert_eq!(id.attribute_id, 13);
        assert!(id.index_range.is_empty());

        let ranged = id.with_index_range(&NumericRange::new(1, 2));
        assert_eq!(ranged.index_range, "1:2");
        let write = WriteValue::value(NodeId::numeric(2, 7), 1.0f64).with_index_range(&NumericRange::new(3, 3));
        assert_eq!(write.index_range, "3");
    }

    #[test]
    fn test_processed_details_interval_in_ms() {
        let end = DateTime::now();
        let details = ReadProcessedDetails::new(
            end.sub(Duration::from_secs(600)),
            end,
            Duration::from_secs(60),
            NodeId::numeric(0, crate::types::ids::object_ids::AGGREGATE_FUNCTION_AVERAGE),
        );
        assert_eq!(details.processing_interval, 60_000.0);
        assert_eq!(details.aggregate_type.as_ref().map(Vec::len), Some(1));
        assert!(details.aggregate_configuration.use_server_capabilities_defaults);
    }
}
