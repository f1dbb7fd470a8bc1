// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription, monitored item and Publish services, with the notification
//! and filter structures they carry.

use super::{ReadValueId, RequestHeader, ResponseHeader, TimestampsToReturn};
use crate::codec::{DataValue, ExtensionObject, Variant};
use crate::types::ids::{attribute_ids, encoding_ids};
use crate::types::{DateTime, DiagnosticInfo, NodeId, QualifiedName, StatusCode};

ua_enum! {
    /// Monitoring mode of an item.
    pub enum MonitoringMode {
        /// Not sampling.
        Disabled = 0,
        /// Sampling without reporting.
        Sampling = 1,
        /// Sampling and reporting.
        Reporting = 2,
    }
    default = Reporting;
}

ua_enum! {
    /// What counts as a data change.
    pub enum DataChangeTrigger {
        /// Status changes only.
        Status = 0,
        /// Status or value.
        StatusValue = 1,
        /// Status, value or source timestamp.
        StatusValueTimestamp = 2,
    }
    default = StatusValue;
}

ua_enum! {
    /// Content filter operators.
    #[allow(missing_docs)]
    pub enum FilterOperator {
        Equals = 0,
        IsNull = 1,
        GreaterThan = 2,
        LessThan = 3,
        GreaterThanOrEqual = 4,
        LessThanOrEqual = 5,
        Like = 6,
        Not = 7,
        Between = 8,
        InList = 9,
        And = 10,
        Or = 11,
        Cast = 12,
        InView = 13,
        OfType = 14,
        RelatedTo = 15,
        BitwiseAnd = 16,
        BitwiseOr = 17,
    }
    default = Equals;
}

/// Deadband types for [`DataChangeFilter`].
pub mod deadband_type {
    /// No deadband.
    pub const NONE: u32 = 0;
    /// Absolute deadband.
    pub const ABSOLUTE: u32 = 1;
    /// Percent of EU range.
    pub const PERCENT: u32 = 2;
}

// =============================================================================
// Subscriptions
// =============================================================================

ua_struct! {
    /// CreateSubscription request.
    pub struct CreateSubscriptionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Publishing interval in milliseconds.
        pub requested_publishing_interval: f64,
        /// Lifetime in publishing intervals.
        pub requested_lifetime_count: u32,
        /// Keep-alive period in publishing intervals.
        pub requested_max_keep_alive_count: u32,
        /// Maximum notifications per Publish; 0 means no limit.
        pub max_notifications_per_publish: u32,
        /// Enable publishing immediately.
        pub publishing_enabled: bool,
        /// Relative priority.
        pub priority: u8,
    }
}

ua_struct! {
    /// CreateSubscription response.
    pub struct CreateSubscriptionResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Server-assigned id.
        pub subscription_id: u32,
        /// Granted interval.
        pub revised_publishing_interval: f64,
        /// Granted lifetime count.
        pub revised_lifetime_count: u32,
        /// Granted keep-alive count.
        pub revised_max_keep_alive_count: u32,
    }
}

ua_struct! {
    /// ModifySubscription request.
    pub struct ModifySubscriptionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscription.
        pub subscription_id: u32,
        /// Publishing interval in milliseconds.
        pub requested_publishing_interval: f64,
        /// Lifetime in publishing intervals.
        pub requested_lifetime_count: u32,
        /// Keep-alive period in publishing intervals.
        pub requested_max_keep_alive_count: u32,
        /// Maximum notifications per Publish.
        pub max_notifications_per_publish: u32,
        /// Relative priority.
        pub priority: u8,
    }
}

ua_struct! {
    /// ModifySubscription response.
    pub struct ModifySubscriptionResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Granted interval.
        pub revised_publishing_interval: f64,
        /// Granted lifetime count.
        pub revised_lifetime_count: u32,
        /// Granted keep-alive count.
        pub revised_max_keep_alive_count: u32,
    }
}

ua_struct! {
    /// SetPublishingMode request.
    pub struct SetPublishingModeRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Enable or disable.
        pub publishing_enabled: bool,
        /// Subscriptions.
        pub subscription_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    /// SetPublishingMode response.
    pub struct SetPublishingModeResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One status per subscription.
        pub results: Option<Vec<StatusCode>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// DeleteSubscriptions request.
    pub struct DeleteSubscriptionsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscriptions.
        pub subscription_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    /// DeleteSubscriptions response.
    pub struct DeleteSubscriptionsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One status per subscription.
        pub results: Option<Vec<StatusCode>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

// =============================================================================
// Monitored items
// =============================================================================

ua_struct! {
    /// Sampling parameters of a monitored item.
    pub struct MonitoringParameters {
        /// Client handle used to route notifications.
        pub client_handle: u32,
        /// Sampling interval in milliseconds; -1 uses the publishing interval.
        pub sampling_interval: f64,
        /// [`DataChangeFilter`], [`EventFilter`] or [`AggregateFilter`].
        pub filter: ExtensionObject,
        /// Queue size.
        pub queue_size: u32,
        /// Discard oldest when the queue overflows.
        pub discard_oldest: bool,
    }
}

ua_struct! {
    /// One item to create.
    pub struct MonitoredItemCreateRequest {
        /// Attribute to monitor.
        pub item_to_monitor: ReadValueId,
        /// Monitoring mode.
        pub monitoring_mode: MonitoringMode,
        /// Parameters.
        pub requested_parameters: MonitoringParameters,
    }
}

impl MonitoredItemCreateRequest {
    /// Reports changes of a node's Value attribute.
    pub fn value(node_id: NodeId, client_handle: u32, sampling_interval: f64, queue_size: u32) -> Self {
        Self {
            item_to_monitor: ReadValueId::value(node_id),
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle,
                sampling_interval,
                filter: ExtensionObject::null(),
                queue_size,
                discard_oldest: true,
            },
        }
    }

    /// Reports events emitted by `notifier` that pass `filter`.
    pub fn event(notifier: NodeId, client_handle: u32, filter: EventFilter, queue_size: u32) -> Self {
        Self {
            item_to_monitor: ReadValueId::attribute(notifier, attribute_ids::EVENT_NOTIFIER),
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle,
                sampling_interval: 0.0,
                filter: ExtensionObject::from_structure(filter),
                queue_size,
                discard_oldest: true,
            },
        }
    }
}

ua_struct! {
    /// Result of creating one item.
    pub struct MonitoredItemCreateResult {
        /// Status.
        pub status_code: StatusCode,
        /// Server-assigned id.
        pub monitored_item_id: u32,
        /// Granted sampling interval.
        pub revised_sampling_interval: f64,
        /// Granted queue size.
        pub revised_queue_size: u32,
        /// Filter result.
        pub filter_result: ExtensionObject,
    }
}

ua_struct! {
    /// CreateMonitoredItems request.
    pub struct CreateMonitoredItemsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscription.
        pub subscription_id: u32,
        /// Timestamps to return.
        pub timestamps_to_return: TimestampsToReturn,
        /// Items.
        pub items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
    }
}

ua_struct! {
    /// CreateMonitoredItems response.
    pub struct CreateMonitoredItemsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per item.
        pub results: Option<Vec<MonitoredItemCreateResult>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// One item to modify.
    pub struct MonitoredItemModifyRequest {
        /// Item.
        pub monitored_item_id: u32,
        /// New parameters.
        pub requested_parameters: MonitoringParameters,
    }
}

ua_struct! {
    /// Result of modifying one item.
    pub struct MonitoredItemModifyResult {
        /// Status.
        pub status_code: StatusCode,
        /// Granted sampling interval.
        pub revised_sampling_interval: f64,
        /// Granted queue size.
        pub revised_queue_size: u32,
        /// Filter result.
        pub filter_result: ExtensionObject,
    }
}

ua_struct! {
    /// ModifyMonitoredItems request.
    pub struct ModifyMonitoredItemsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscription.
        pub subscription_id: u32,
        /// Timestamps to return.
        pub timestamps_to_return: TimestampsToReturn,
        /// Items.
        pub items_to_modify: Option<Vec<MonitoredItemModifyRequest>>,
    }
}

ua_struct! {
    /// ModifyMonitoredItems response.
    pub struct ModifyMonitoredItemsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per item.
        pub results: Option<Vec<MonitoredItemModifyResult>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// DeleteMonitoredItems request.
    pub struct DeleteMonitoredItemsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Subscription.
        pub subscription_id: u32,
        /// Items.
        pub monitored_item_ids: Option<Vec<u32>>,
    }
}

ua_struct! {
    /// DeleteMonitoredItems response.
    pub struct DeleteMonitoredItemsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One status per item.
        pub results: Option<Vec<StatusCode>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

// =============================================================================
// Publish
// =============================================================================

ua_struct! {
    /// Acknowledges one notification message.
    pub struct SubscriptionAcknowledgement {
        /// Subscription.
        pub subscription_id: u32,
        /// Acknowledged sequence number.
        pub sequence_number: u32,
    }
}

ua_struct! {
    /// Publish request.
    pub struct PublishRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Acknowledgements for earlier notifications.
        pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
    }
}

ua_struct! {
    /// Notifications of one publishing cycle.
    pub struct NotificationMessage {
        /// Sequence number.
        pub sequence_number: u32,
        /// Publish time.
        pub publish_time: DateTime,
        /// [`DataChangeNotification`], [`EventNotificationList`] or
        /// [`StatusChangeNotification`] entries; empty for a keep-alive.
        pub notification_data: Option<Vec<ExtensionObject>>,
    }
}

impl NotificationMessage {
    /// Returns `true` for a keep-alive message.
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.as_ref().map_or(true, Vec::is_empty)
    }
}

ua_struct! {
    /// Publish response.
    pub struct PublishResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Subscription this message belongs to.
        pub subscription_id: u32,
        /// Sequence numbers still available for republish.
        pub available_sequence_numbers: Option<Vec<u32>>,
        /// More notifications are queued.
        pub more_notifications: bool,
        /// The notifications.
        pub notification_message: NotificationMessage,
        /// One status per acknowledgement.
        pub results: Option<Vec<StatusCode>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

// =============================================================================
// Notifications
// =============================================================================

ua_struct! {
    /// A new value for one monitored item.
    pub struct MonitoredItemNotification {
        /// Client handle of the item.
        pub client_handle: u32,
        /// Value.
        pub value: DataValue,
    }
}

ua_struct! {
    /// Data changes of one publishing cycle.
    pub struct DataChangeNotification {
        /// Changes in server order.
        pub monitored_items: Option<Vec<MonitoredItemNotification>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// Fields of one event.
    pub struct EventFieldList {
        /// Client handle of the item.
        pub client_handle: u32,
        /// Fields in select-clause order.
        pub event_fields: Option<Vec<Variant>>,
    }
}

ua_struct! {
    /// Events of one publishing cycle.
    pub struct EventNotificationList {
        /// Events in server order.
        pub events: Option<Vec<EventFieldList>>,
    }
}

ua_struct! {
    /// Subscription status change, e.g. a timeout.
    pub struct StatusChangeNotification {
        /// New status.
        pub status: StatusCode,
        /// Diagnostics.
        pub diagnostic_info: DiagnosticInfo,
    }
}

// =============================================================================
// Filters
// =============================================================================

ua_struct! {
    /// Data change filter.
    pub struct DataChangeFilter {
        /// Trigger.
        pub trigger: DataChangeTrigger,
        /// See [`deadband_type`].
        pub deadband_type: u32,
        /// Deadband value.
        pub deadband_value: f64,
    }
}

ua_struct! {
    /// Selects an attribute of an event or instance by browse path.
    pub struct SimpleAttributeOperand {
        /// Type the path starts from.
        pub type_definition_id: NodeId,
        /// Browse path.
        pub browse_path: Option<Vec<QualifiedName>>,
        /// Attribute id.
        pub attribute_id: u32,
        /// Numeric range.
        pub index_range: String,
    }
}

ua_struct! {
    /// A literal value operand.
    pub struct LiteralOperand {
        /// Value.
        pub value: Variant,
    }
}

ua_struct! {
    /// Refers to another element of the content filter.
    pub struct ElementOperand {
        /// Element index.
        pub index: u32,
    }
}

ua_struct! {
    /// One content filter element.
    pub struct ContentFilterElement {
        /// Operator.
        pub filter_operator: FilterOperator,
        /// Operands as extension objects.
        pub filter_operands: Option<Vec<ExtensionObject>>,
    }
}

ua_struct! {
    /// A where clause.
    pub struct ContentFilter {
        /// Elements; the first is the root.
        pub elements: Option<Vec<ContentFilterElement>>,
    }
}

ua_struct! {
    /// Event filter.
    pub struct EventFilter {
        /// Fields to return.
        pub select_clauses: Option<Vec<SimpleAttributeOperand>>,
        /// Which events to return.
        pub where_clause: ContentFilter,
    }
}

ua_struct! {
    /// Result of one content filter element.
    pub struct ContentFilterElementResult {
        /// Status.
        pub status_code: StatusCode,
        /// Per operand status.
        pub operand_status_codes: Option<Vec<StatusCode>>,
        /// Per operand diagnostics.
        pub operand_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// Result of a where clause.
    pub struct ContentFilterResult {
        /// Per element results.
        pub element_results: Option<Vec<ContentFilterElementResult>>,
        /// Per element diagnostics.
        pub element_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// Event filter result.
    pub struct EventFilterResult {
        /// Per select clause status.
        pub select_clause_results: Option<Vec<StatusCode>>,
        /// Per select clause diagnostics.
        pub select_clause_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
        /// Where clause result.
        pub where_clause_result: ContentFilterResult,
    }
}

ua_struct! {
    /// Aggregate filter.
    pub struct AggregateFilter {
        /// Start time.
        pub start_time: DateTime,
        /// Aggregate function.
        pub aggregate_type: NodeId,
        /// Interval in milliseconds.
        pub processing_interval: f64,
        /// Configuration.
        pub aggregate_configuration: super::AggregateConfiguration,
    }
}

extension_type! {
    DataChangeNotification => encoding_ids::DATA_CHANGE_NOTIFICATION,
    EventNotificationList => encoding_ids::EVENT_NOTIFICATION_LIST,
    StatusChangeNotification => encoding_ids::STATUS_CHANGE_NOTIFICATION,
    DataChangeFilter => encoding_ids::DATA_CHANGE_FILTER,
    EventFilter => encoding_ids::EVENT_FILTER,
    EventFilterResult => encoding_ids::EVENT_FILTER_RESULT,
    AggregateFilter => encoding_ids::AGGREGATE_FILTER,
    SimpleAttributeOperand => encoding_ids::SIMPLE_ATTRIBUTE_OPERAND,
    LiteralOperand => encoding_ids::LITERAL_OPERAND,
    ElementOperand => encoding_ids::ELEMENT_OPERAND,
}

service! {
    "CreateMonitoredItems": CreateMonitoredItemsRequest(751) => CreateMonitoredItemsResponse(754),
    "ModifyMonitoredItems": ModifyMonitoredItemsRequest(763) => ModifyMonitoredItemsResponse(766),
    "DeleteMonitoredItems": DeleteMonitoredItemsRequest(781) => DeleteMonitoredItemsResponse(784),
    "CreateSubscription": CreateSubscriptionRequest(787) => CreateSubscriptionResponse(790),
    "ModifySubscription": ModifySubscriptionRequest(793) => ModifySubscriptionResponse(796),
    "SetPublishingMode": SetPublishingModeRequest(799) => SetPublishingModeResponse(802),
    "Publish": PublishRequest(826) => PublishResponse(829),
    "DeleteSubscriptions": DeleteSubscriptionsRequest(847) => DeleteSubscriptionsResponse(850),
}
