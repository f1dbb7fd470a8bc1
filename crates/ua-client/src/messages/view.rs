// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! View services: Browse and BrowseNext.

use super::{RequestHeader, ResponseHeader};
use crate::types::ids::reference_type_ids;
use crate::types::{
    ByteString, DateTime, DiagnosticInfo, ExpandedNodeId, LocalizedText, NodeId, QualifiedName,
    StatusCode,
};

ua_enum! {
    /// Direction of references to follow.
    pub enum BrowseDirection {
        /// Forward references.
        Forward = 0,
        /// Inverse references.
        Inverse = 1,
        /// Both directions.
        Both = 2,
        /// Invalid.
        Invalid = 3,
    }
    default = Forward;
}

ua_enum! {
    /// Class of a node.
    pub enum NodeClass {
        /// Unspecified.
        Unspecified = 0,
        /// Object.
        Object = 1,
        /// Variable.
        Variable = 2,
        /// Method.
        Method = 4,
        /// ObjectType.
        ObjectType = 8,
        /// VariableType.
        VariableType = 16,
        /// ReferenceType.
        ReferenceType = 32,
        /// DataType.
        DataType = 64,
        /// View.
        View = 128,
    }
    default = Unspecified;
}

/// BrowseResultMask bit returning every field.
pub const BROWSE_RESULT_MASK_ALL: u32 = 0x3F;

ua_struct! {
    /// View to browse; the null view is the whole address space.
    pub struct ViewDescription {
        /// View node.
        pub view_id: NodeId,
        /// View timestamp.
        pub timestamp: DateTime,
        /// View version.
        pub view_version: u32,
    }
}

ua_struct! {
    /// A node to browse.
    pub struct BrowseDescription {
        /// Starting node.
        pub node_id: NodeId,
        /// Direction.
        pub browse_direction: BrowseDirection,
        /// Reference type filter; null means all.
        pub reference_type_id: NodeId,
        /// Include subtypes of the reference type.
        pub include_subtypes: bool,
        /// Node class filter; 0 means all.
        pub node_class_mask: u32,
        /// Fields to return.
        pub result_mask: u32,
    }
}

impl BrowseDescription {
    /// Browses forward hierarchical references of `node_id`, returning all fields.
    pub fn children(node_id: NodeId) -> Self {
        Self {
            node_id,
            browse_direction: BrowseDirection::Forward,
            reference_type_id: NodeId::numeric(0, reference_type_ids::HIERARCHICAL_REFERENCES),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BROWSE_RESULT_MASK_ALL,
        }
    }
}

ua_struct! {
    /// One reference found by Browse.
    pub struct ReferenceDescription {
        /// Reference type.
        pub reference_type_id: NodeId,
        /// Forward or inverse.
        pub is_forward: bool,
        /// Target node.
        pub node_id: ExpandedNodeId,
        /// Target browse name.
        pub browse_name: QualifiedName,
        /// Target display name.
        pub display_name: LocalizedText,
        /// Target node class.
        pub node_class: NodeClass,
        /// Target type definition.
        pub type_definition: ExpandedNodeId,
    }
}

ua_struct! {
    /// Browse result for one node.
    pub struct BrowseResult {
        /// Status.
        pub status_code: StatusCode,
        /// Non-null when more references are available.
        pub continuation_point: ByteString,
        /// References.
        pub references: Option<Vec<ReferenceDescription>>,
    }
}

ua_struct! {
    /// Browse request.
    pub struct BrowseRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// View.
        pub view: ViewDescription,
        /// Maximum references per node; 0 means no limit.
        pub requested_max_references_per_node: u32,
        /// Nodes to browse.
        pub nodes_to_browse: Option<Vec<BrowseDescription>>,
    }
}

ua_struct! {
    /// Browse response.
    pub struct BrowseResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per node.
        pub results: Option<Vec<BrowseResult>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// BrowseNext request.
    pub struct BrowseNextRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Release instead of continuing.
        pub release_continuation_points: bool,
        /// Continuation points, passed back verbatim.
        pub continuation_points: Option<Vec<ByteString>>,
    }
}

ua_struct! {
    /// BrowseNext response.
    pub struct BrowseNextResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per continuation point.
        pub results: Option<Vec<BrowseResult>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

service! {
    "Browse": BrowseRequest(527) => BrowseResponse(530),
    "BrowseNext": BrowseNextRequest(533) => BrowseNextResponse(536),
}
