// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OpenSecureChannel and CloseSecureChannel.

use super::{RequestHeader, ResponseHeader};
use crate::types::{ByteString, DateTime};

ua_enum! {
    /// Message protection applied by a secure channel.
    pub enum MessageSecurityMode {
        /// Not a valid mode; rejected everywhere.
        Invalid = 0,
        /// No protection.
        None = 1,
        /// Signed.
        Sign = 2,
        /// Signed and encrypted.
        SignAndEncrypt = 3,
    }
    default = Invalid;
}

ua_enum! {
    /// Whether an OpenSecureChannel issues a new token or renews one.
    pub enum SecurityTokenRequestType {
        /// First token of a channel.
        Issue = 0,
        /// Replacement token on an existing channel.
        Renew = 1,
    }
    default = Issue;
}

ua_struct! {
    /// Symmetric token granted by the server.
    pub struct ChannelSecurityToken {
        /// Channel id.
        pub channel_id: u32,
        /// Token id used in MSG headers.
        pub token_id: u32,
        /// Creation time.
        pub created_at: DateTime,
        /// Lifetime in milliseconds.
        pub revised_lifetime: u32,
    }
}

ua_struct! {
    /// OpenSecureChannel request.
    pub struct OpenSecureChannelRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Protocol version, always 0.
        pub client_protocol_version: u32,
        /// Issue or renew.
        pub request_type: SecurityTokenRequestType,
        /// Requested protection.
        pub security_mode: MessageSecurityMode,
        /// Client nonce for key derivation.
        pub client_nonce: ByteString,
        /// Requested token lifetime in milliseconds.
        pub requested_lifetime: u32,
    }
}

ua_struct! {
    /// OpenSecureChannel response.
    pub struct OpenSecureChannelResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Protocol version.
        pub server_protocol_version: u32,
        /// Granted token.
        pub security_token: ChannelSecurityToken,
        /// Server nonce for key derivation.
        pub server_nonce: ByteString,
    }
}

ua_struct! {
    /// CloseSecureChannel request. The server sends no reply.
    pub struct CloseSecureChannelRequest {
        /// Header.
        pub request_header: RequestHeader,
    }
}

ua_struct! {
    /// CloseSecureChannel response, defined for completeness.
    pub struct CloseSecureChannelResponse {
        /// Header.
        pub response_header: ResponseHeader,
    }
}

service! {
    "OpenSecureChannel": OpenSecureChannelRequest(446) => OpenSecureChannelResponse(449),
    "CloseSecureChannel": CloseSecureChannelRequest(452) => CloseSecureChannelResponse(455),
}
