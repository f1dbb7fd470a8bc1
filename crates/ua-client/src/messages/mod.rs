// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service request and response structures.
//!
//! Every request carries a [`RequestHeader`] and every response a
//! [`ResponseHeader`]. On the wire a message body is the namespace-0 binary
//! encoding id of the structure followed by its fields:
//!
//! ```text
//! +-------------------+-----------------+-------------------------+
//! | NodeId (encoding) | Request/Resp    | service-specific fields |
//! |                   | Header          |                         |
//! +-------------------+-----------------+-------------------------+
//! ```
//!
//! A server that cannot process a request answers with [`ServiceFault`],
//! which carries only a response header.

pub mod attribute;
pub mod channel;
pub mod discovery;
pub mod method;
pub mod server;
pub mod session;
pub mod subscription;
pub mod view;

use std::fmt::Debug;

use crate::codec::{
    BinaryDecode, BinaryEncode, Decoder, Encoder, ExtensionObject, TypeRegistry,
};
use crate::error::{CodecError, CodecResult};
use crate::types::ids::encoding_ids;
use crate::types::{DateTime, DiagnosticInfo, NodeId, StatusCode};

pub use attribute::*;
pub use channel::*;
pub use discovery::*;
pub use method::*;
pub use server::*;
pub use session::*;
pub use subscription::*;
pub use view::*;

// =============================================================================
// Service traits
// =============================================================================

/// A service request.
pub trait ServiceRequest: BinaryEncode + BinaryDecode + Debug + Clone + Send + Sync + 'static {
    /// Binary encoding id.
    const ENCODING_ID: u32;
    /// Service name used in logs and errors.
    const NAME: &'static str;
    /// The matching response.
    type Response: ServiceResponse;

    /// Borrows the request header.
    fn request_header(&self) -> &RequestHeader;

    /// Mutably borrows the request header.
    fn request_header_mut(&mut self) -> &mut RequestHeader;
}

/// A service response.
pub trait ServiceResponse: BinaryEncode + BinaryDecode + Debug + Send + Sync + 'static {
    /// Binary encoding id.
    const ENCODING_ID: u32;

    /// Borrows the response header.
    fn response_header(&self) -> &ResponseHeader;

    /// Mutably borrows the response header.
    fn response_header_mut(&mut self) -> &mut ResponseHeader;
}

// =============================================================================
// Headers
// =============================================================================

ua_struct! {
    /// Common header of every request.
    pub struct RequestHeader {
        /// Session authentication token; null before CreateSession.
        pub authentication_token: NodeId,
        /// Time the request was sent.
        pub timestamp: DateTime,
        /// Client-assigned handle echoed in the response.
        pub request_handle: u32,
        /// Diagnostics bit mask.
        pub return_diagnostics: u32,
        /// Audit log entry id.
        pub audit_entry_id: String,
        /// Timeout hint in milliseconds; 0 means none.
        pub timeout_hint: u32,
        /// Reserved.
        pub additional_header: ExtensionObject,
    }
}

impl RequestHeader {
    /// Creates a header with the given token and handle, stamped now.
    pub fn new(authentication_token: NodeId, request_handle: u32, timeout_hint: u32) -> Self {
        Self {
            authentication_token,
            timestamp: DateTime::now(),
            request_handle,
            timeout_hint,
            ..Default::default()
        }
    }
}

ua_struct! {
    /// Common header of every response.
    pub struct ResponseHeader {
        /// Time the response was sent.
        pub timestamp: DateTime,
        /// Echo of the request handle.
        pub request_handle: u32,
        /// Overall service result.
        pub service_result: StatusCode,
        /// Service-level diagnostics.
        pub service_diagnostics: DiagnosticInfo,
        /// Strings referenced by diagnostics.
        pub string_table: Option<Vec<String>>,
        /// Reserved.
        pub additional_header: ExtensionObject,
    }
}

impl ResponseHeader {
    /// A header answering `request_handle` with `status`.
    pub fn new(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            timestamp: DateTime::now(),
            request_handle,
            service_result,
            ..Default::default()
        }
    }
}

ua_struct! {
    /// Response sent when a service fails as a whole.
    pub struct ServiceFault {
        /// Header whose service result holds the failure.
        pub response_header: ResponseHeader,
    }
}

impl ServiceResponse for ServiceFault {
    const ENCODING_ID: u32 = encoding_ids::SERVICE_FAULT;

    fn response_header(&self) -> &ResponseHeader {
        &self.response_header
    }

    fn response_header_mut(&mut self) -> &mut ResponseHeader {
        &mut self.response_header
    }
}

// =============================================================================
// Message bodies
// =============================================================================

/// Encodes a structure preceded by its encoding id.
pub fn encode_body<T: BinaryEncode>(encoding_id: u32, value: &T) -> CodecResult<Vec<u8>> {
    let mut enc = Encoder::with_capacity(256);
    NodeId::numeric(0, encoding_id).encode(&mut enc)?;
    value.encode(&mut enc)?;
    Ok(enc.into_bytes().to_vec())
}

/// Encodes a request message body.
pub fn encode_request<R: ServiceRequest>(request: &R) -> CodecResult<Vec<u8>> {
    encode_body(R::ENCODING_ID, request)
}

/// Reads the leading encoding id of a message body.
pub fn peek_encoding_id(body: &[u8]) -> CodecResult<u32> {
    let registry = TypeRegistry::empty();
    let mut dec = Decoder::new(body, &registry);
    let id = NodeId::decode(&mut dec)?;
    match (id.namespace_index, id.as_numeric()) {
        (0, Some(v)) => Ok(v),
        _ => Err(CodecError::invalid_value(
            "message body",
            format!("unexpected encoding id {}", id),
        )),
    }
}

/// A decoded response body: the expected type or a fault.
#[derive(Debug)]
pub enum ResponseBody<R> {
    /// The expected response.
    Response(R),
    /// The server answered with a ServiceFault.
    Fault(ServiceFault),
}

impl<R: ServiceResponse> ResponseBody<R> {
    /// Decodes a response body, accepting a ServiceFault in its place.
    pub fn decode(body: &[u8], registry: &TypeRegistry) -> CodecResult<Self> {
        let mut dec = Decoder::new(body, registry);
        let id = NodeId::decode(&mut dec)?;
        if id.is_standard_numeric(R::ENCODING_ID) {
            Ok(Self::Response(R::decode(&mut dec)?))
        } else if id.is_standard_numeric(encoding_ids::SERVICE_FAULT) {
            Ok(Self::Fault(ServiceFault::decode(&mut dec)?))
        } else {
            Err(CodecError::unexpected_type(
                format!("i={}", R::ENCODING_ID),
                id.to_string(),
            ))
        }
    }

    /// The response header of either form.
    pub fn response_header(&self) -> &ResponseHeader {
        match self {
            Self::Response(r) => r.response_header(),
            Self::Fault(f) => &f.response_header,
        }
    }
}

/// Decodes a request body whose encoding id was already checked.
pub fn decode_request<R: ServiceRequest>(body: &[u8], registry: &TypeRegistry) -> CodecResult<R> {
    let mut dec = Decoder::new(body, registry);
    let id = NodeId::decode(&mut dec)?;
    if !id.is_standard_numeric(R::ENCODING_ID) {
        return Err(CodecError::unexpected_type(
            format!("i={}", R::ENCODING_ID),
            id.to_string(),
        ));
    }
    R::decode(&mut dec)
}

// =============================================================================
// Registry
// =============================================================================

/// Registers every namespace-0 extension structure defined in this module.
pub fn register_standard_types(registry: &mut TypeRegistry) {
    registry
        .register::<AnonymousIdentityToken>()
        .register::<UserNameIdentityToken>()
        .register::<X509IdentityToken>()
        .register::<BuildInfo>()
        .register::<ServerStatusDataType>()
        .register::<DataChangeNotification>()
        .register::<EventNotificationList>()
        .register::<StatusChangeNotification>()
        .register::<DataChangeFilter>()
        .register::<EventFilter>()
        .register::<EventFilterResult>()
        .register::<AggregateFilter>()
        .register::<SimpleAttributeOperand>()
        .register::<LiteralOperand>()
        .register::<ElementOperand>()
        .register::<ReadRawModifiedDetails>()
        .register::<ReadProcessedDetails>()
        .register::<ReadEventDetails>()
        .register::<HistoryData>()
        .register::<HistoryEvent>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_from_slice;

    #[test]
    fn test_request_header_layout() {
        let header = RequestHeader {
            request_handle: 7,
            ..Default::default()
        };
        let bytes = crate::codec::encode_to_vec(&header).unwrap();
        // token(2) + timestamp(8) + handle(4) + diag(4) + audit(4) + hint(4) + ext(3)
        assert_eq!(bytes.len(), 29);
        assert_eq!(&bytes[10..14], &[7, 0, 0, 0]);
        let back: RequestHeader = decode_from_slice(&bytes, &TypeRegistry::empty()).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn test_response_body_accepts_fault() {
        let fault = ServiceFault {
            response_header: ResponseHeader::new(3, StatusCode::BAD_NODE_ID_UNKNOWN),
        };
        let body = encode_body(encoding_ids::SERVICE_FAULT, &fault).unwrap();
        let decoded = ResponseBody::<ReadResponse>::decode(&body, &TypeRegistry::empty()).unwrap();
        match decoded {
            ResponseBody::Fault(f) => {
                assert_eq!(f.response_header.service_result, StatusCode::BAD_NODE_ID_UNKNOWN);
                assert_eq!(f.response_header.request_handle, 3);
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_response_body_rejects_other_type() {
        let body = encode_body(BrowseResponse::ENCODING_ID, &BrowseResponse::default()).unwrap();
        let err = ResponseBody::<ReadResponse>::decode(&body, &TypeRegistry::empty()).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedType { .. }));
    }

    #[test]
    fn test_request_roundtrip_with_encoding_id() {
        let mut request = ReadRequest::default();
        request.request_header.request_handle = 11;
        let body = encode_request(&request).unwrap();
        assert_eq!(peek_encoding_id(&body).unwrap(), 631);
        let back: ReadRequest = decode_request(&body, &TypeRegistry::empty()).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_standard_registry_contents() {
        let registry = TypeRegistry::standard();
        assert!(registry.contains(&NodeId::numeric(0, encoding_ids::DATA_CHANGE_NOTIFICATION)));
        assert!(registry.contains(&NodeId::numeric(0, encoding_ids::SERVER_STATUS_DATA_TYPE)));
        assert!(!registry.contains(&NodeId::numeric(0, 1)));
    }
}
