// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session services and user identity tokens.

use super::{ApplicationDescription, EndpointDescription, RequestHeader, ResponseHeader};
use crate::codec::ExtensionObject;
use crate::types::ids::encoding_ids;
use crate::types::{ByteString, DiagnosticInfo, NodeId, StatusCode};

ua_struct! {
    /// An asymmetric signature and its algorithm URI.
    pub struct SignatureData {
        /// Algorithm URI.
        pub algorithm: String,
        /// Signature bytes.
        pub signature: ByteString,
    }
}

ua_struct! {
    /// Software certificate (unused by current servers, kept for the wire layout).
    pub struct SignedSoftwareCertificate {
        /// Certificate bytes.
        pub certificate_data: ByteString,
        /// Signature bytes.
        pub signature: ByteString,
    }
}

ua_struct! {
    /// CreateSession request.
    pub struct CreateSessionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Client description.
        pub client_description: ApplicationDescription,
        /// Server URI.
        pub server_uri: String,
        /// Endpoint URL.
        pub endpoint_url: String,
        /// Human-readable session name.
        pub session_name: String,
        /// Client nonce, at least 32 bytes when secured.
        pub client_nonce: ByteString,
        /// DER client certificate.
        pub client_certificate: ByteString,
        /// Requested timeout in milliseconds.
        pub requested_session_timeout: f64,
        /// Largest response the client accepts; 0 means no limit.
        pub max_response_message_size: u32,
    }
}

ua_struct! {
    /// CreateSession response.
    pub struct CreateSessionResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Public session id.
        pub session_id: NodeId,
        /// Secret token for request headers.
        pub authentication_token: NodeId,
        /// Granted timeout in milliseconds.
        pub revised_session_timeout: f64,
        /// Server nonce.
        pub server_nonce: ByteString,
        /// DER server certificate.
        pub server_certificate: ByteString,
        /// Endpoints, used to detect downgrade attacks.
        pub server_endpoints: Option<Vec<EndpointDescription>>,
        /// Software certificates.
        pub server_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
        /// Signature over client certificate and client nonce.
        pub server_signature: SignatureData,
        /// Largest request the server accepts.
        pub max_request_message_size: u32,
    }
}

ua_struct! {
    /// ActivateSession request.
    pub struct ActivateSessionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Signature over server certificate and server nonce.
        pub client_signature: SignatureData,
        /// Software certificates.
        pub client_software_certificates: Option<Vec<SignedSoftwareCertificate>>,
        /// Preferred locales.
        pub locale_ids: Option<Vec<String>>,
        /// Identity token.
        pub user_identity_token: ExtensionObject,
        /// Signature proving possession of an X509 identity.
        pub user_token_signature: SignatureData,
    }
}

ua_struct! {
    /// ActivateSession response.
    pub struct ActivateSessionResponse {
        /// Header.
        pub response_header: ResponseHeader,
        /// Fresh server nonce.
        pub server_nonce: ByteString,
        /// Per software certificate results.
        pub results: Option<Vec<StatusCode>>,
        /// Diagnostics.
        pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
    }
}

ua_struct! {
    /// CloseSession request.
    pub struct CloseSessionRequest {
        /// Header.
        pub request_header: RequestHeader,
        /// Delete the session's subscriptions too.
        pub delete_subscriptions: bool,
    }
}

ua_struct! {
    /// CloseSession response.
    pub struct CloseSessionResponse {
        /// Header.
        pub response_header: ResponseHeader,
    }
}

service! {
    "CreateSession": CreateSessionRequest(461) => CreateSessionResponse(464),
    "ActivateSession": ActivateSessionRequest(467) => ActivateSessionResponse(470),
    "CloseSession": CloseSessionRequest(473) => CloseSessionResponse(476),
}

// =============================================================================
// Identity tokens
// =============================================================================

ua_struct! {
    /// Anonymous identity.
    pub struct AnonymousIdentityToken {
        /// Policy id from the endpoint.
        pub policy_id: String,
    }
}

ua_struct! {
    /// User name and (usually encrypted) password.
    pub struct UserNameIdentityToken {
        /// Policy id from the endpoint.
        pub policy_id: String,
        /// User name.
        pub user_name: String,
        /// Password, encrypted unless the policy is None.
        pub password: ByteString,
        /// Asymmetric encryption URI; empty for plaintext.
        pub encryption_algorithm: String,
    }
}

ua_struct! {
    /// X.509 certificate identity.
    pub struct X509IdentityToken {
        /// Policy id from the endpoint.
        pub policy_id: String,
        /// DER user certificate.
        pub certificate_data: ByteString,
    }
}

extension_type! {
    AnonymousIdentityToken => encoding_ids::ANONYMOUS_IDENTITY_TOKEN,
    UserNameIdentityToken => encoding_ids::USER_NAME_IDENTITY_TOKEN,
    X509IdentityToken => encoding_ids::X509_IDENTITY_TOKEN,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_slice, encode_to_vec, TypeRegistry};

    #[test]
    fn test_identity_token_in_extension_object() {
        let token = UserNameIdentityToken {
            policy_id: "username".into(),
            user_name: "operator".into(),
            password: ByteString::from(b"secret".to_vec()),
            encryption_algorithm: String::new(),
        };
        let obj = ExtensionObject::from_structure(token.clone());
        let bytes = encode_to_vec(&obj).unwrap();
        let back: ExtensionObject = decode_from_slice(&bytes, &TypeRegistry::standard()).unwrap();
        assert_eq!(back.downcast_ref::<UserNameIdentityToken>(), Some(&token));
    }

    #[test]
    fn test_close_session_layout() {
        let request = CloseSessionRequest {
            delete_subscriptions: true,
            ..Default::default()
        };
        let bytes = encode_to_vec(&request).unwrap();
        assert_eq!(bytes.last(), Some(&1));
    }
}
