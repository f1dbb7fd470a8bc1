// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! User identities and the identity tokens sent in ActivateSession.

use std::fmt;
use std::path::Path;

use crate::codec::ExtensionObject;
use crate::config::IdentityConfig;
use crate::error::{SecurityError, SessionError, UaResult};
use crate::messages::{
    AnonymousIdentityToken, EndpointDescription, SignatureData, UserNameIdentityToken,
    UserTokenPolicy, UserTokenType, X509IdentityToken,
};
use crate::security::{
    create_signature, encrypt_secret, ApplicationIdentity, Certificate, PrivateKey, SecurityPolicy,
};
use crate::types::ByteString;

/// The user a session acts for.
#[derive(Clone, Default)]
pub enum UserIdentity {
    /// No user credentials.
    #[default]
    Anonymous,

    /// User name and password. The password is encrypted with the server
    /// key before it leaves the process, unless the policy is None.
    UserName {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },

    /// X.509 user certificate and its private key.
    X509(ApplicationIdentity),
}

/// A token ready to be placed in ActivateSession.
#[derive(Debug, Clone)]
pub struct IdentityToken {
    /// Policy id echoed from the endpoint.
    pub policy_id: String,
    /// The encoded token.
    pub token: ExtensionObject,
    /// Proof of possession for X.509 identities; empty otherwise.
    pub signature: SignatureData,
}

impl UserIdentity {
    /// Anonymous identity.
    pub fn anonymous() -> Self {
        Self::Anonymous
    }

    /// User name identity.
    pub fn user_name(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UserName {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Certificate identity.
    pub fn x509(identity: ApplicationIdentity) -> Self {
        Self::X509(identity)
    }

    /// Builds the identity from configuration, loading certificate files.
    pub async fn from_config(config: &IdentityConfig) -> UaResult<Self> {
        match config {
            IdentityConfig::Anonymous => Ok(Self::Anonymous),
            IdentityConfig::UserName { username, password } => {
                Ok(Self::user_name(username.as_str(), password.as_str()))
            }
            IdentityConfig::Certificate {
                certificate_path,
                private_key_path,
            } => {
                let cert_bytes = read_file(certificate_path).await?;
                let key_bytes = read_file(private_key_path).await?;
                let certificate = Certificate::from_bytes(&cert_bytes)?;
                let pem = String::from_utf8(key_bytes)
                    .map_err(|e| SecurityError::crypto("load private key", e))?;
                let private_key = PrivateKey::from_pkcs8_pem(&pem)?;
                let identity = ApplicationIdentity::new(certificate, private_key)?;
                tracing::debug!(
                    subject = %identity.certificate.subject(),
                    "Loaded user certificate"
                );
                Ok(Self::X509(identity))
            }
        }
    }

    /// Token type this identity produces.
    pub fn token_type(&self) -> UserTokenType {
        match self {
            Self::Anonymous => UserTokenType::Anonymous,
            Self::UserName { .. } => UserTokenType::UserName,
            Self::X509(_) => UserTokenType::Certificate,
        }
    }

    /// Builds the identity token for `endpoint`.
    ///
    /// The token's own security policy wins over the channel policy when the
    /// endpoint names one. `server_nonce` is the nonce from the latest
    /// CreateSession or ActivateSession response.
    pub fn build_token(
        &self,
        endpoint: &EndpointDescription,
        channel_policy: SecurityPolicy,
        server_certificate: Option<&Certificate>,
        server_nonce: &[u8],
    ) -> UaResult<IdentityToken> {
        let token_type = self.token_type();
        let token_policy = find_policy(endpoint, token_type)?;
        let policy_id = token_policy
            .map(|p| p.policy_id.clone())
            .unwrap_or_else(|| "anonymous".to_string());
        let security_policy = match token_policy {
            Some(p) if !p.security_policy_uri.is_empty() => {
                SecurityPolicy::require_uri(&p.security_policy_uri)?
            }
            _ => channel_policy,
        };

        match self {
            Self::Anonymous => Ok(IdentityToken {
                token: ExtensionObject::from_structure(AnonymousIdentityToken {
                    policy_id: policy_id.clone(),
                }),
                policy_id,
                signature: SignatureData::default(),
            }),
            Self::UserName { username, password } => {
                let secret = encrypt_secret(
                    security_policy,
                    server_certificate,
                    password.as_bytes(),
                    server_nonce,
                )?;
                if secret.algorithm.is_none() {
                    tracing::warn!(
                        user = %username,
                        "Sending password without encryption (security policy None)"
                    );
                }
                Ok(IdentityToken {
                    token: ExtensionObject::from_structure(UserNameIdentityToken {
                        policy_id: policy_id.clone(),
                        user_name: username.clone(),
                        password: ByteString::from(secret.data),
                        encryption_algorithm: secret.algorithm.unwrap_or_default().to_string(),
                    }),
                    policy_id,
                    signature: SignatureData::default(),
                })
            }
            Self::X509(identity) => {
                let server_der = server_certificate.map(Certificate::der).unwrap_or_default();
                let signature = create_signature(
                    security_policy,
                    &identity.private_key,
                    server_der,
                    server_nonce,
                )?;
                Ok(IdentityToken {
                    token: ExtensionObject::from_structure(X509IdentityToken {
                        policy_id: policy_id.clone(),
                        certificate_data: ByteString::from(identity.certificate.der()),
                    }),
                    policy_id,
                    signature,
                })
            }
        }
    }
}

fn find_policy(
    endpoint: &EndpointDescription,
    token_type: UserTokenType,
) -> UaResult<Option<&UserTokenPolicy>> {
    let listed = endpoint
        .user_identity_tokens
        .as_ref()
        .is_some_and(|tokens| !tokens.is_empty());
    match endpoint.find_token_policy(token_type) {
        Some(policy) => Ok(Some(policy)),
        // Servers that list nothing are assumed to take anonymous users.
        None if !listed && token_type == UserTokenType::Anonymous => Ok(None),
        None => Err(SessionError::IdentityNotSupported {
            token_type: format!("{token_type:?}"),
        }
        .into()),
    }
}

async fn read_file(path: &Path) -> UaResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| SecurityError::io(path, e).into())
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::UserName { username, .. } => write!(f, "user '{username}'"),
            Self::X509(identity) => write!(f, "certificate '{}'", identity.certificate.subject()),
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::X509(identity) => f.debug_tuple("X509").field(identity).finish(),
        }
    }
}
