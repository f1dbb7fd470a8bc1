// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Well-known identifiers from namespace 0.

/// Object node ids.
pub mod object_ids {
    /// Root folder.
    pub const ROOT_FOLDER: u32 = 84;
    /// Objects folder.
    pub const OBJECTS_FOLDER: u32 = 85;
    /// Types folder.
    pub const TYPES_FOLDER: u32 = 86;
    /// Views folder.
    pub const VIEWS_FOLDER: u32 = 87;
    /// Server object.
    pub const SERVER: u32 = 2253;
    /// Average aggregate function.
    pub const AGGREGATE_FUNCTION_AVERAGE: u32 = 2342;
    /// Minimum aggregate function.
    pub const AGGREGATE_FUNCTION_MINIMUM: u32 = 2346;
    /// Maximum aggregate function.
    pub const AGGREGATE_FUNCTION_MAXIMUM: u32 = 2347;
}

/// Variable node ids.
pub mod variable_ids {
    /// Server_NamespaceArray.
    pub const SERVER_NAMESPACE_ARRAY: u32 = 2255;
    /// Server_ServerStatus.
    pub const SERVER_SERVER_STATUS: u32 = 2256;
    /// Server_ServerStatus_StartTime.
    pub const SERVER_SERVER_STATUS_START_TIME: u32 = 2257;
    /// Server_ServerStatus_CurrentTime.
    pub const SERVER_SERVER_STATUS_CURRENT_TIME: u32 = 2258;
    /// Server_ServerStatus_State.
    pub const SERVER_SERVER_STATUS_STATE: u32 = 2259;
    /// Server_ServerStatus_BuildInfo.
    pub const SERVER_SERVER_STATUS_BUILD_INFO: u32 = 2260;
    /// Server_ServerStatus_BuildInfo_ProductName.
    pub const SERVER_SERVER_STATUS_BUILD_INFO_PRODUCT_NAME: u32 = 2261;
}

/// Reference type node ids.
pub mod reference_type_ids {
    /// References.
    pub const REFERENCES: u32 = 31;
    /// HierarchicalReferences.
    pub const HIERARCHICAL_REFERENCES: u32 = 33;
    /// HasComponent.
    pub const HAS_COMPONENT: u32 = 47;
    /// HasProperty.
    pub const HAS_PROPERTY: u32 = 46;
    /// Organizes.
    pub const ORGANIZES: u32 = 35;
    /// HasTypeDefinition.
    pub const HAS_TYPE_DEFINITION: u32 = 40;
}

/// Object type node ids.
pub mod object_type_ids {
    /// BaseObjectType.
    pub const BASE_OBJECT_TYPE: u32 = 58;
    /// FolderType.
    pub const FOLDER_TYPE: u32 = 61;
    /// BaseEventType.
    pub const BASE_EVENT_TYPE: u32 = 2041;
}

/// Binary encoding ids of the structures this crate understands.
pub mod encoding_ids {
    /// ServiceFault.
    pub const SERVICE_FAULT: u32 = 397;
    /// AnonymousIdentityToken.
    pub const ANONYMOUS_IDENTITY_TOKEN: u32 = 321;
    /// UserNameIdentityToken.
    pub const USER_NAME_IDENTITY_TOKEN: u32 = 324;
    /// X509IdentityToken.
    pub const X509_IDENTITY_TOKEN: u32 = 327;
    /// BuildInfo.
    pub const BUILD_INFO: u32 = 340;
    /// SimpleAttributeOperand.
    pub const SIMPLE_ATTRIBUTE_OPERAND: u32 = 603;
    /// LiteralOperand.
    pub const LITERAL_OPERAND: u32 = 597;
    /// ElementOperand.
    pub const ELEMENT_OPERAND: u32 = 594;
    /// ReadEventDetails.
    pub const READ_EVENT_DETAILS: u32 = 646;
    /// ReadRawModifiedDetails.
    pub const READ_RAW_MODIFIED_DETAILS: u32 = 649;
    /// ReadProcessedDetails.
    pub const READ_PROCESSED_DETAILS: u32 = 652;
    /// HistoryData.
    pub const HISTORY_DATA: u32 = 658;
    /// HistoryEvent.
    pub const HISTORY_EVENT: u32 = 661;
    /// DataChangeFilter.
    pub const DATA_CHANGE_FILTER: u32 = 724;
    /// EventFilter.
    pub const EVENT_FILTER: u32 = 727;
    /// AggregateFilter.
    pub const AGGREGATE_FILTER: u32 = 730;
    /// EventFilterResult.
    pub const EVENT_FILTER_RESULT: u32 = 736;
    /// DataChangeNotification.
    pub const DATA_CHANGE_NOTIFICATION: u32 = 811;
    /// StatusChangeNotification.
    pub const STATUS_CHANGE_NOTIFICATION: u32 = 820;
    /// ServerStatusDataType.
    pub const SERVER_STATUS_DATA_TYPE: u32 = 864;
    /// EventNotificationList.
    pub const EVENT_NOTIFICATION_LIST: u32 = 916;
}

/// Attribute ids.
pub mod attribute_ids {
    /// NodeId.
    pub const NODE_ID: u32 = 1;
    /// NodeClass.
    pub const NODE_CLASS: u32 = 2;
    /// BrowseName.
    pub const BROWSE_NAME: u32 = 3;
    /// DisplayName.
    pub const DISPLAY_NAME: u32 = 4;
    /// Description.
    pub const DESCRIPTION: u32 = 5;
    /// EventNotifier.
    pub const EVENT_NOTIFIER: u32 = 12;
    /// Value.
    pub const VALUE: u32 = 13;
    /// DataType.
    pub const DATA_TYPE: u32 = 14;
    /// ValueRank.
    pub const VALUE_RANK: u32 = 15;
    /// AccessLevel.
    pub const ACCESS_LEVEL: u32 = 17;
    /// UserAccessLevel.
    pub const USER_ACCESS_LEVEL: u32 = 18;
    /// Historizing.
    pub const HISTORIZING: u32 = 20;
}

/// Transport profile URIs.
pub mod transport_profiles {
    /// UA-TCP with UA-SC and UA binary encoding.
    pub const UA_TCP: &str = "http://opcfoundation.org/UA-Profile/Transport/uatcp-uasc-uabinary";
}
