// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Endpoint discovery and selection.
//!
//! Discovery opens a throw-away channel with security None, asks the server
//! for its endpoints and closes the channel again. Selection then picks the
//! endpoint the session will use.

use std::sync::Arc;

use crate::channel::{ChannelOptions, ChannelSecurity, Role, SecureChannel};
use crate::codec::TypeRegistry;
use crate::config::ClientConfig;
use crate::error::{HandshakeError, UaResult};
use crate::messages::{EndpointDescription, GetEndpointsRequest};
use crate::security::{SecurityMode, SecurityPolicy};
use crate::types::ids::transport_profiles;

/// How a session finds its endpoint.
#[derive(Debug, Clone)]
pub enum EndpointSelection {
    /// Run GetEndpoints against `url` and pick the best match.
    Discover {
        /// Discovery URL, also used to connect.
        url: String,
        /// Required policy; `None` accepts any.
        policy: Option<SecurityPolicy>,
        /// Required mode; `None` accepts any.
        mode: Option<SecurityMode>,
    },

    /// Use this endpoint as is.
    Explicit(EndpointDescription),
}

impl EndpointSelection {
    /// Discovery driven by the endpoint and security settings of `config`.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::Discover {
            url: config.endpoint.clone(),
            policy: config.security_policy,
            mode: config.security_mode,
        }
    }

    /// Discovery accepting any supported policy.
    pub fn discover(url: impl Into<String>) -> Self {
        Self::Discover {
            url: url.into(),
            policy: None,
            mode: None,
        }
    }
}

/// An endpoint chosen for a session.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    /// The description returned by the server.
    pub description: EndpointDescription,
    /// URL the TCP connection goes to.
    pub connect_url: String,
    /// Parsed security policy.
    pub policy: SecurityPolicy,
    /// Parsed security mode.
    pub mode: SecurityMode,
}

impl ResolvedEndpoint {
    /// Validates `description` and pairs it with the URL to connect to.
    pub fn new(description: EndpointDescription, connect_url: impl Into<String>) -> UaResult<Self> {
        let policy = SecurityPolicy::require_uri(&description.security_policy_uri)?;
        let mode = SecurityMode::from_message_mode(description.security_mode).ok_or_else(|| {
            HandshakeError::PolicyMismatch {
                policy: policy.name().to_string(),
                mode: format!("{:?}", description.security_mode),
            }
        })?;
        policy.check_mode(mode)?;
        Ok(Self {
            description,
            connect_url: connect_url.into(),
            policy,
            mode,
        })
    }
}

/// Asks the server at `url` for its endpoints.
pub async fn get_endpoints(
    config: &ClientConfig,
    url: &str,
    registry: Arc<TypeRegistry>,
) -> UaResult<Vec<EndpointDescription>> {
    let options = ChannelOptions::from_config(config, url)?;
    let channel = SecureChannel::open(options, ChannelSecurity::none(Role::Client), registry).await?;

    let request = GetEndpointsRequest {
        endpoint_url: url.to_string(),
        ..Default::default()
    };
    let result = channel.send_request(request).await;
    if let Err(e) = channel.close().await {
        tracing::debug!(error = %e, "Discovery channel closed uncleanly");
        channel.abort();
    }

    let endpoints = result?.endpoints.unwrap_or_default();
    tracing::debug!(url, count = endpoints.len(), "Endpoints discovered");
    Ok(endpoints)
}

/// Picks the endpoint with the highest security level among those this
/// client supports and that match `policy` and `mode` when given.
///
/// On equal security levels the first endpoint listed wins.
pub fn select_endpoint(
    endpoints: &[EndpointDescription],
    policy: Option<SecurityPolicy>,
    mode: Option<SecurityMode>,
) -> Option<&EndpointDescription> {
    let mut best: Option<&EndpointDescription> = None;
    for endpoint in endpoints.iter().filter(|e| is_candidate(e, policy, mode)) {
        if best.map_or(true, |b| endpoint.security_level > b.security_level) {
            best = Some(endpoint);
        }
    }
    best
}

fn is_candidate(
    endpoint: &EndpointDescription,
    policy: Option<SecurityPolicy>,
    mode: Option<SecurityMode>,
) -> bool {
    let profile = &endpoint.transport_profile_uri;
    if !profile.is_empty() && profile != transport_profiles::UA_TCP {
        return false;
    }
    let Some(endpoint_policy) = SecurityPolicy::from_uri(&endpoint.security_policy_uri) else {
        return false;
    };
    let Some(endpoint_mode) = SecurityMode::from_message_mode(endpoint.security_mode) else {
        return false;
    };
    if endpoint_policy.check_mode(endpoint_mode).is_err() {
        return false;
    }
    policy.map_or(true, |p| p == endpoint_policy) && mode.map_or(true, |m| m == endpoint_mode)
}

/// Turns a selection into a concrete endpoint, running discovery if needed.
///
/// Discovered endpoints are connected through the discovery URL: servers
/// often advertise host names that only resolve on their own network.
pub async fn resolve(
    selection: &EndpointSelection,
    config: &ClientConfig,
    registry: Arc<TypeRegistry>,
) -> UaResult<ResolvedEndpoint> {
    match selection {
        EndpointSelection::Explicit(description) => {
            ResolvedEndpoint::new(description.clone(), description.endpoint_url.clone())
        }
        EndpointSelection::Discover { url, policy, mode } => {
            let endpoints = get_endpoints(config, url, registry).await?;
            let chosen = select_endpoint(&endpoints, *policy, *mode).ok_or_else(|| {
                HandshakeError::NoSuitableEndpoint {
                    url: url.clone(),
                    policy: policy.map_or_else(|| "any".to_string(), |p| p.name().to_string()),
                }
            })?;
            tracing::info!(
                url = %url,
                endpoint = %chosen.endpoint_url,
                policy = %chosen.security_policy_uri,
                security_level = chosen.security_level,
                "Endpoint selected"
            );
            ResolvedEndpoint::new(chosen.clone(), url.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageSecurityMode;

    fn endpoint(policy: SecurityPolicy, mode: MessageSecurityMode, level: u8) -> EndpointDescription {
        EndpointDescription {
            endpoint_url: "opc.tcp://server:4840".into(),
            security_mode: mode,
            security_policy_uri: policy.uri().into(),
            transport_profile_uri: transport_profiles::UA_TCP.into(),
            security_level: level,
            ..Default::default()
        }
    }

    fn offered() -> Vec<EndpointDescription> {
        vec![
            endpoint(SecurityPolicy::None, MessageSecurityMode::None, 0),
            endpoint(SecurityPolicy::Basic256Sha256, MessageSecurityMode::Sign, 5),
            endpoint(SecurityPolicy::Basic256Sha256, MessageSecurityMode::SignAndEncrypt, 10),
            endpoint(SecurityPolicy::Aes128Sha256RsaOaep, MessageSecurityMode::SignAndEncrypt, 8),
        ]
    }

    #[test]
    fn test_select_highest_security_level() {
        let endpoints = offered();
        let chosen = select_endpoint(&endpoints, None, None).unwrap();
        assert_eq!(chosen.security_level, 10);
    }

    #[test]
    fn test_select_matching_policy_and_mode() {
        let endpoints = offered();
        let chosen = select_endpoint(&endpoints, Some(SecurityPolicy::None), None).unwrap();
        assert_eq!(chosen.security_policy_uri, SecurityPolicy::None.uri());

        let chosen = select_endpoint(
            &endpoints,
            Some(SecurityPolicy::Basic256Sha256),
            Some(SecurityMode::Sign),
        )
        .unwrap();
        assert_eq!(chosen.security_level, 5);

        assert!(select_endpoint(&endpoints, Some(SecurityPolicy::Basic128Rsa15), None).is_none());
    }

    #[test]
    fn test_unsupported_endpoints_skipped() {
        let mut endpoints = offered();
        let mut https = endpoint(SecurityPolicy::Basic256Sha256, MessageSecurityMode::SignAndEncrypt, 99);
        https.transport_profile_uri =
            "http://opcfoundation.org/UA-Profile/Transport/https-uabinary".into();
        let mut unknown = endpoint(SecurityPolicy::None, MessageSecurityMode::None, 50);
        unknown.security_policy_uri = "http://example.com/UA/SecurityPolicy#Custom".into();
        endpoints.push(https);
        endpoints.push(unknown);

        let chosen = select_endpoint(&endpoints, None, None).unwrap();
        assert_eq!(chosen.security_level, 10);
    }

    #[test]
    fn test_equal_levels_keep_first() {
        let endpoints = vec![
            endpoint(SecurityPolicy::Basic256Sha256, MessageSecurityMode::SignAndEncrypt, 3),
            endpoint(SecurityPolicy::Aes256Sha256RsaPss, MessageSecurityMode::SignAndEncrypt, 3),
        ];
        let chosen = select_endpoint(&endpoints, None, None).unwrap();
        assert_eq!(chosen.security_policy_uri, SecurityPolicy::Basic256Sha256.uri());
    }

    #[test]
    fn test_resolved_endpoint_rejects_inconsistent_pair() {
        let bad = endpoint(SecurityPolicy::Basic256Sha256, MessageSecurityMode::None, 1);
        assert!(ResolvedEndpoint::new(bad, "opc.tcp://server:4840").is_err());

        let good = endpoint(SecurityPolicy::None, MessageSecurityMode::None, 0);
        let resolved = ResolvedEndpoint::new(good, "opc.tcp://127.0.0.1:4840").unwrap();
        assert_eq!(resolved.policy, SecurityPolicy::None);
        assert_eq!(resolved.mode, SecurityMode::None);
        assert_eq!(resolved.connect_url, "opc.tcp://127.0.0.1:4840");
    }

    #[tokio::test]
    async fn test_explicit_selection_skips_discovery() {
        let description = endpoint(SecurityPolicy::None, MessageSecurityMode::None, 0);
        let selection = EndpointSelection::Explicit(description);
        let config = ClientConfig::new("opc.tcp://unused:4840");
        let resolved = resolve(&selection, &config, Arc::new(TypeRegistry::standard()))
            .await
            .unwrap();
        assert_eq!(resolved.connect_url, "opc.tcp://server:4840");
    }
}
