// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA status codes.
//!
//! A status code is a 32-bit value whose two high bits carry the severity
//! (`00` good, `01` uncertain, `10` bad) and whose upper 16 bits identify the
//! condition. The low 16 bits hold info flags and are ignored by [`StatusCode::name`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 32-bit OPC UA status code.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(u32);

macro_rules! status_codes {
    ($( $(#[$meta:meta])* $konst:ident = $value:expr, $name:literal; )+) => {
        impl StatusCode {
            $(
                $(#[$meta])*
                pub const $konst: StatusCode = StatusCode($value);
            )+

            /// Returns the symbolic name of the condition, or `"Unknown"`.
            pub fn name(&self) -> &'static str {
                match self.0 & 0xFFFF_0000 {
                    $( $value => $name, )+
                    _ if self.is_good() => "Good",
                    _ if self.is_uncertain() => "Uncertain",
                    _ => "Unknown",
                }
            }
        }
    };
}

status_codes! {
    /// The operation succeeded.
    GOOD = 0x0000_0000, "Good";
    /// The subscription was transferred to another session.
    GOOD_SUBSCRIPTION_TRANSFERRED = 0x002D_0000, "GoodSubscriptionTransferred";
    /// The operation was uncertain.
    UNCERTAIN = 0x4000_0000, "Uncertain";
    /// The operation failed.
    BAD = 0x8000_0000, "Bad";
    /// An unexpected error occurred.
    BAD_UNEXPECTED_ERROR = 0x8001_0000, "BadUnexpectedError";
    /// An internal error occurred as a result of a programming or configuration error.
    BAD_INTERNAL_ERROR = 0x8002_0000, "BadInternalError";
    /// Not enough memory to complete the operation.
    BAD_OUT_OF_MEMORY = 0x8003_0000, "BadOutOfMemory";
    /// An operating system resource is not available.
    BAD_RESOURCE_UNAVAILABLE = 0x8004_0000, "BadResourceUnavailable";
    /// A low level communication error occurred.
    BAD_COMMUNICATION_ERROR = 0x8005_0000, "BadCommunicationError";
    /// Encoding halted because of invalid data in the objects being serialized.
    BAD_ENCODING_ERROR = 0x8006_0000, "BadEncodingError";
    /// Decoding halted because of invalid data in the stream.
    BAD_DECODING_ERROR = 0x8007_0000, "BadDecodingError";
    /// The message encoding/decoding limits imposed by the stack have been exceeded.
    BAD_ENCODING_LIMITS_EXCEEDED = 0x8008_0000, "BadEncodingLimitsExceeded";
    /// An unrecognized response was received from the server.
    BAD_UNKNOWN_RESPONSE = 0x8009_0000, "BadUnknownResponse";
    /// The operation timed out.
    BAD_TIMEOUT = 0x800A_0000, "BadTimeout";
    /// The server does not support the requested service.
    BAD_SERVICE_UNSUPPORTED = 0x800B_0000, "BadServiceUnsupported";
    /// The operation was cancelled because the application is shutting down.
    BAD_SHUTDOWN = 0x800C_0000, "BadShutdown";
    /// The operation could not complete because the client is not connected to the server.
    BAD_SERVER_NOT_CONNECTED = 0x800D_0000, "BadServerNotConnected";
    /// The server has stopped and cannot process any requests.
    BAD_SERVER_HALTED = 0x800E_0000, "BadServerHalted";
    /// There was nothing to do because the client passed a list of operations with no elements.
    BAD_NOTHING_TO_DO = 0x800F_0000, "BadNothingToDo";
    /// The request could not be processed because it specified too many operations.
    BAD_TOO_MANY_OPERATIONS = 0x8010_0000, "BadTooManyOperations";
    /// The certificate provided as a parameter is not valid.
    BAD_CERTIFICATE_INVALID = 0x8012_0000, "BadCertificateInvalid";
    /// An error occurred verifying security.
    BAD_SECURITY_CHECKS_FAILED = 0x8013_0000, "BadSecurityChecksFailed";
    /// The certificate has expired or is not yet valid.
    BAD_CERTIFICATE_TIME_INVALID = 0x8014_0000, "BadCertificateTimeInvalid";
    /// The certificate is not trusted.
    BAD_CERTIFICATE_UNTRUSTED = 0x801A_0000, "BadCertificateUntrusted";
    /// User does not have permission to perform the requested operation.
    BAD_USER_ACCESS_DENIED = 0x801F_0000, "BadUserAccessDenied";
    /// The user identity token is not valid.
    BAD_IDENTITY_TOKEN_INVALID = 0x8020_0000, "BadIdentityTokenInvalid";
    /// The user identity token is valid but the server has rejected it.
    BAD_IDENTITY_TOKEN_REJECTED = 0x8021_0000, "BadIdentityTokenRejected";
    /// The specified secure channel is no longer valid.
    BAD_SECURE_CHANNEL_ID_INVALID = 0x8022_0000, "BadSecureChannelIdInvalid";
    /// The nonce does appear to be not a random value or it is not the correct length.
    BAD_NONCE_INVALID = 0x8024_0000, "BadNonceInvalid";
    /// The session id is not valid.
    BAD_SESSION_ID_INVALID = 0x8025_0000, "BadSessionIdInvalid";
    /// The session was closed by the client.
    BAD_SESSION_CLOSED = 0x8026_0000, "BadSessionClosed";
    /// The session cannot be used because ActivateSession has not been called.
    BAD_SESSION_NOT_ACTIVATED = 0x8027_0000, "BadSessionNotActivated";
    /// The subscription id is not valid.
    BAD_SUBSCRIPTION_ID_INVALID = 0x8028_0000, "BadSubscriptionIdInvalid";
    /// The header for the request is missing or invalid.
    BAD_REQUEST_HEADER_INVALID = 0x802A_0000, "BadRequestHeaderInvalid";
    /// The syntax of the node id is not valid.
    BAD_NODE_ID_INVALID = 0x8033_0000, "BadNodeIdInvalid";
    /// The node id refers to a node that does not exist in the server address space.
    BAD_NODE_ID_UNKNOWN = 0x8034_0000, "BadNodeIdUnknown";
    /// The attribute is not supported for the specified node.
    BAD_ATTRIBUTE_ID_INVALID = 0x8035_0000, "BadAttributeIdInvalid";
    /// The syntax of the index range parameter is invalid.
    BAD_INDEX_RANGE_INVALID = 0x8036_0000, "BadIndexRangeInvalid";
    /// No data exists within the range of indexes specified.
    BAD_INDEX_RANGE_NO_DATA = 0x8037_0000, "BadIndexRangeNoData";
    /// The access level does not allow reading or subscribing to the node.
    BAD_NOT_READABLE = 0x803A_0000, "BadNotReadable";
    /// The access level does not allow writing to the node.
    BAD_NOT_WRITABLE = 0x803B_0000, "BadNotWritable";
    /// The value was out of range.
    BAD_OUT_OF_RANGE = 0x803C_0000, "BadOutOfRange";
    /// The requested operation is not supported.
    BAD_NOT_SUPPORTED = 0x803D_0000, "BadNotSupported";
    /// A requested item was not found or a search operation ended without success.
    BAD_NOT_FOUND = 0x803E_0000, "BadNotFound";
    /// The monitoring item id does not refer to a valid monitored item.
    BAD_MONITORED_ITEM_ID_INVALID = 0x8042_0000, "BadMonitoredItemIdInvalid";
    /// The monitored item filter parameter is not valid.
    BAD_MONITORED_ITEM_FILTER_INVALID = 0x8043_0000, "BadMonitoredItemFilterInvalid";
    /// The continuation point provided is longer valid.
    BAD_CONTINUATION_POINT_INVALID = 0x804A_0000, "BadContinuationPointInvalid";
    /// The operation could not be processed because all continuation points have been allocated.
    BAD_NO_CONTINUATION_POINTS = 0x804B_0000, "BadNoContinuationPoints";
    /// The security mode does not meet the requirements set by the server.
    BAD_SECURITY_MODE_REJECTED = 0x8054_0000, "BadSecurityModeRejected";
    /// The security policy does not meet the requirements set by the server.
    BAD_SECURITY_POLICY_REJECTED = 0x8055_0000, "BadSecurityPolicyRejected";
    /// The server has reached its maximum number of sessions.
    BAD_TOO_MANY_SESSIONS = 0x8056_0000, "BadTooManySessions";
    /// The user token signature is missing or invalid.
    BAD_USER_SIGNATURE_INVALID = 0x8057_0000, "BadUserSignatureInvalid";
    /// The signature generated with the client certificate is missing or invalid.
    BAD_APPLICATION_SIGNATURE_INVALID = 0x8058_0000, "BadApplicationSignatureInvalid";
    /// The server does not support the requested history operation.
    BAD_HISTORY_OPERATION_UNSUPPORTED = 0x8072_0000, "BadHistoryOperationUnsupported";
    /// The value supplied for the attribute is not of the same type as the attribute's value.
    BAD_TYPE_MISMATCH = 0x8074_0000, "BadTypeMismatch";
    /// The method id does not refer to a method for the specified object.
    BAD_METHOD_INVALID = 0x8075_0000, "BadMethodInvalid";
    /// The client did not specify all of the input arguments for the method.
    BAD_ARGUMENTS_MISSING = 0x8076_0000, "BadArgumentsMissing";
    /// The server has reached its maximum number of subscriptions.
    BAD_TOO_MANY_SUBSCRIPTIONS = 0x8077_0000, "BadTooManySubscriptions";
    /// The server has reached the maximum number of queued publish requests.
    BAD_TOO_MANY_PUBLISH_REQUESTS = 0x8078_0000, "BadTooManyPublishRequests";
    /// There is no subscription available for this session.
    BAD_NO_SUBSCRIPTION = 0x8079_0000, "BadNoSubscription";
    /// The sequence number is unknown to the server.
    BAD_SEQUENCE_NUMBER_UNKNOWN = 0x807A_0000, "BadSequenceNumberUnknown";
    /// The requested notification message is no longer available.
    BAD_MESSAGE_NOT_AVAILABLE = 0x807B_0000, "BadMessageNotAvailable";
    /// The type of the message specified in the header invalid.
    BAD_TCP_MESSAGE_TYPE_INVALID = 0x807E_0000, "BadTcpMessageTypeInvalid";
    /// The SecureChannelId and/or TokenId are not currently in use.
    BAD_TCP_SECURE_CHANNEL_UNKNOWN = 0x807F_0000, "BadTcpSecureChannelUnknown";
    /// The size of the message chunk specified in the header is too large.
    BAD_TCP_MESSAGE_TOO_LARGE = 0x8080_0000, "BadTcpMessageTooLarge";
    /// The server does not recognize the QueryString specified.
    BAD_TCP_ENDPOINT_URL_INVALID = 0x8083_0000, "BadTcpEndpointUrlInvalid";
    /// Timeout occurred while processing the request.
    BAD_REQUEST_TIMEOUT = 0x8085_0000, "BadRequestTimeout";
    /// The secure channel has been closed.
    BAD_SECURE_CHANNEL_CLOSED = 0x8086_0000, "BadSecureChannelClosed";
    /// The token has expired or is not recognized.
    BAD_SECURE_CHANNEL_TOKEN_UNKNOWN = 0x8087_0000, "BadSecureChannelTokenUnknown";
    /// The sequence number is not valid.
    BAD_SEQUENCE_NUMBER_INVALID = 0x8088_0000, "BadSequenceNumberInvalid";
    /// No data exists for the requested time range or event filter.
    BAD_NO_DATA = 0x809B_0000, "BadNoData";
    /// The server does not support the protocol version requested by the client.
    BAD_PROTOCOL_VERSION_UNSUPPORTED = 0x80BE_0000, "BadProtocolVersionUnsupported";
    /// One or more arguments are invalid.
    BAD_INVALID_ARGUMENT = 0x80AB_0000, "BadInvalidArgument";
    /// The request message size exceeds limits set by the server.
    BAD_REQUEST_TOO_LARGE = 0x80B8_0000, "BadRequestTooLarge";
    /// The response message size exceeds limits set by the client.
    BAD_RESPONSE_TOO_LARGE = 0x80B9_0000, "BadResponseTooLarge";
    /// The number of aggregates does not match the number of nodes.
    BAD_AGGREGATE_LIST_MISMATCH = 0x80D4_0000, "BadAggregateListMismatch";
    /// The requested aggregate is not supported by the server.
    BAD_AGGREGATE_NOT_SUPPORTED = 0x80D5_0000, "BadAggregateNotSupported";
}

impl StatusCode {
    /// Creates a status code from its raw value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw 32-bit value.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns `true` for good severity.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Returns `true` for uncertain severity.
    #[inline]
    pub const fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Returns `true` for bad severity.
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Returns the status with the info bits cleared.
    #[inline]
    pub const fn code(&self) -> StatusCode {
        StatusCode(self.0 & 0xFFFF_0000)
    }

    /// Returns `true` if this status means the server no longer knows the session.
    pub fn is_session_invalid(&self) -> bool {
        matches!(
            self.code(),
            Self::BAD_SESSION_ID_INVALID | Self::BAD_SESSION_CLOSED | Self::BAD_SESSION_NOT_ACTIVATED
        )
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<StatusCode> for u32 {
    fn from(value: StatusCode) -> Self {
        value.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08X})", self.name(), self.0)
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
