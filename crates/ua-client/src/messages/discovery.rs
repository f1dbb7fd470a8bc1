// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Endpoint discovery structures.

use super::{MessageSecurityMode, RequestHeader, ResponseHeader};
use crate::types::{ByteString, LocalizedText};

ua_enum! {
    /// Kind of application.
    pub enum ApplicationType {
        /// Server.
        Server = 0,
        /// Client.
        Client = 1,
        /// Client and server.
        ClientAndServer = 2,
        /// Discovery server.
        DiscoveryServer = 3,
    }
    default = Server;
}

ua_enum! {
    /// Kind of user identity token.
    pub enum UserTokenType {
        /// No user credentials.
        Anonymous = 0,
        /// User name and password.
        UserName = 1,
        /// X.509 certificate.
        Certificate = 2,
        /// WS-Security or JWT token.
        IssuedToken = 3,
    }
    default = Anonymous;
}

ua_struct! {
    /// Describes an application.
    pub struct ApplicationDescription {
        /// Globally unique application URI.
        pub application_uri: String,
        /// Product URI.
        pub product_uri: String,
        /// Display name.
        pub application_name: LocalizedText,
        /// Kind of application.
        pub application_type: ApplicationType,
        /// Gateway URI, if any.
        pub gateway_server_uri: String,
        /// Discovery profile URI.
        pub discovery_profile_uri: String,
        /// Discovery URLs.
        pub discovery_urls: Option<Vec<String>>,
    }
}

ua_struct! {
    /// A user identity token the endpoint accepts.
    pub struct UserTokenPolicy {
        /// Policy id echoed in the identity token.
        pub policy_id: String,
        /// Token kind.
        pub token_type: UserTokenType,
        /// Issued token type URI.
        pub issued_token_type: String,
        /// Issuer endpoint URL.
        pub issuer_endpoint_url: String,
        /// Security policy for encrypting the token; empty means the endpoint's.
        pub security_policy_uri: String,
    }
}

ua_struct! {
    /// A server endpoint.
    pub struct EndpointDescription {
        /// Endpoint URL.
        pub endpoint_url: String,
        /// Server description.
        pub server: ApplicationDescription,
        /// DER server certificate.
        pub server_certificate: ByteString,
        /// Message security mode.
        pub security_mode: MessageSecurityMode,
        /// Security policy URI.
        pub security_policy_uri: String,
        /// Accepted identity tokens.
        pub user_identity_tokens: Option<Vec<UserTokenPolicy>>,
        /// Transport profile URI.
        pub transport_profile_uri: String,
        /// Relative security level; higher is stronger.
        pub security_level: u8,
    }
}

impl EndpointDescription {
    /// Finds the first identity token policy of the given kind.
    pub fn find_token_policy(&self, token_type: UserTokenType) -> Option<&UserTokenPolicy> {
        self.user_identity_tokens
            .iter()
            .flatten()
            .find(|p| p.token_type == token_type)
    }
}

ua_struct! {
    /// GetEndpoints request.
    pub struct GetEndpointsRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// URL the client used.
        pub endpoint_url: String,
        /// Preferred locales.
        pub locale_ids: Option<Vec<String>>,
        /// Transport profiles to return; empty means all.
        pub profile_uris: Option<Vec<String>>,
    }
}

ua_struct! {
    /// GetEndpoints response.
    pub struct GetEndpointsResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Endpoints.
        pub endpoints: Option<Vec<EndpointDescription>>,
    }
}

service! {
    "GetEndpoints": GetEndpointsRequest(428) => GetEndpointsResponse(431),
}
