// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Method service: Call.

use super::{RequestHeader, ResponseHeader};
use crate::codec::Variant;
use crate::types::{DiagnosticInfo, NodeId, StatusCode};

ua_struct! {
    /// One method invocation.
    pub struct CallMethodRequest {
        /// Object or object type owning the method.
        pub object_id: NodeId,
        /// Method node.
        pub method_id: NodeId,
        /// Input arguments.
        pub input_arguments: Option<Vec<Variant>>,
    }
}

impl CallMethodRequest {
    /// Creates a call with the given arguments.
    pub fn new(object_id: NodeId, method_id: NodeId, input_arguments: Vec<Variant>) -> Self {
        Self {
            object_id,
            method_id,
            input_arguments: Some(input_arguments),
        }
    }
}

ua_struct! {
    /// Result of one invocation.
    pub struct CallMethodResult {
        /// Status.
        pub status_code: StatusCode,
        /// Per input argument status.
        pub input_argument_results: Option<Vec<StatusCode>>,
        /// Per input argument diagnostics.
        pub input_argument_diagnostic_infos: Option<Vec<DiagnosticInfo>>,
        /// Output arguments.
        pub output_arguments: Option<Vec<Variant>>,
    }
}

ua_struct! {
    /// Call request.
    pub struct CallRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Invocations.
        pub methods_to_call: Option<Vec<CallMethodRequest>>,
    }
}

ua_struct! {
    /// Call response.
    pub struct CallResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// One result per invocation.
        pub results: Option<Vec<CallMethodResult>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

service! {
    "Call": CallRequest(712) => CallResponse(715),
}
