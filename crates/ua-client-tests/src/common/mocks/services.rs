// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Service handlers of the mock server.
//!
//! Each handler takes a decoded request and returns the response or the
//! status to send back as a ServiceFault. [`ServerState::respond`] does the
//! decoding, the response header and the fault encoding around it.

use std::collections::VecDeque;
use std::time::Duration;

use ua_client::codec::{DataValue, ExtensionObject, Variant};
use ua_client::messages::{
    decode_request, encode_body, peek_encoding_id, ActivateSessionRequest, ActivateSessionResponse,
    AnonymousIdentityToken, ApplicationDescription, ApplicationType, BrowseNextRequest,
    BrowseNextResponse, BrowseRequest, BrowseResponse, BrowseResult, CallMethodRequest,
    CallMethodResult, CallRequest, CallResponse, CloseSessionRequest, CloseSessionResponse,
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSessionRequest,
    CreateSessionResponse, CreateSubscriptionRequest, CreateSubscriptionResponse,
    DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse, DeleteSubscriptionsRequest,
    DeleteSubscriptionsResponse, EndpointDescription, EventFilter, EventFilterResult,
    GetEndpointsRequest, GetEndpointsResponse, HistoryData, HistoryReadRequest,
    HistoryReadResponse, HistoryReadResult, ModifyMonitoredItemsRequest,
    ModifyMonitoredItemsResponse, ModifySubscriptionRequest, ModifySubscriptionResponse,
    MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemModifyResult, NodeClass,
    PublishRequest, ReadProcessedDetails, ReadRawModifiedDetails, ReadRequest, ReadResponse, ReferenceDescription,
    RequestHeader, ResponseHeader, ServiceFault, ServiceRequest, ServiceResponse,
    SetPublishingModeRequest, SetPublishingModeResponse, SignatureData, TimestampsToReturn,
    UserNameIdentityToken, UserTokenPolicy, UserTokenType, WriteRequest, WriteResponse,
    X509IdentityToken,
};
use ua_client::security::crypto::random_nonce;
use ua_client::security::{
    create_signature, decrypt_secret, verify_signature, Certificate, SecurityMode, SecurityPolicy,
};
use ua_client::types::ids::{attribute_ids, transport_profiles};
use ua_client::types::{ByteString, LocalizedText, StatusCode};

use super::address_space::{AddressSpace, DemoNodes, Vector};
use super::connection::ConnectionContext;
use super::publish::{deliver, ItemKind, MockSubscription, MonitoredItem, PendingPublish};
use super::state::{BrowseCursor, SessionEntry};
use super::ServerState;

/// Length of session nonces.
const SESSION_NONCE_LENGTH: usize = 32;

/// Fastest sampling interval granted to data items.
const MIN_SAMPLING_INTERVAL: f64 = 50.0;

/// Outcome of dispatching one request.
pub(crate) enum Reply {
    /// Response body to send now.
    Now(Vec<u8>),
    /// Answered later (Publish) or never (silent hook).
    Deferred,
}

/// Encodes a ServiceFault body.
pub(crate) fn encode_fault(request_handle: u32, status: StatusCode) -> Vec<u8> {
    let fault = ServiceFault {
        response_header: ResponseHeader::new(request_handle, status),
    };
    encode_body(ServiceFault::ENCODING_ID, &fault).unwrap_or_default()
}

fn rank(policy: SecurityPolicy, mode: SecurityMode) -> u8 {
    let policy_rank = SecurityPolicy::ALL
        .iter()
        .position(|p| *p == policy)
        .unwrap_or(0) as u8;
    let mode_rank = match mode {
        SecurityMode::None => 0,
        SecurityMode::Sign => 1,
        SecurityMode::SignAndEncrypt => 2,
    };
    policy_rank * 3 + mode_rank
}

/// Page size from a client request and a server cap, both 0 for "no limit".
fn effective_max(requested: u32, server: u32) -> usize {
    match (requested, server) {
        (0, 0) => usize::MAX,
        (0, s) => s as usize,
        (r, 0) => r as usize,
        (r, s) => r.min(s) as usize,
    }
}

fn page_references(session: &mut SessionEntry, mut references: Vec<ReferenceDescription>, max: usize) -> BrowseResult {
    if references.len() <= max {
        return BrowseResult {
            status_code: StatusCode::GOOD,
            continuation_point: ByteString::null(),
            references: Some(references),
        };
    }
    let remaining = references.split_off(max);
    let point = random_nonce(8);
    session
        .browse_points
        .insert(point.clone(), BrowseCursor { remaining, max });
    BrowseResult {
        status_code: StatusCode::GOOD,
        continuation_point: ByteString::from(point),
        references: Some(references),
    }
}

fn failed_call(status: StatusCode) -> CallMethodResult {
    CallMethodResult {
        status_code: status,
        ..Default::default()
    }
}

impl ServerState {
    /// Routes a request body to its handler.
    pub(crate) fn dispatch(&self, ctx: &ConnectionContext, request_id: u32, body: &[u8]) -> Reply {
        let encoding_id = match peek_encoding_id(body) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "Mock server received an undecodable request");
                return Reply::Now(encode_fault(0, StatusCode::BAD_DECODING_ERROR));
            }
        };

        let response = match encoding_id {
            GetEndpointsRequest::ENCODING_ID => {
                self.respond::<GetEndpointsRequest>(body, |_| {
                    Ok(GetEndpointsResponse {
                        endpoints: Some(self.endpoints()),
                        ..Default::default()
                    })
                })
            }
            CreateSessionRequest::ENCODING_ID => {
                self.respond::<CreateSessionRequest>(body, |r| self.create_session(ctx, r))
            }
            ActivateSessionRequest::ENCODING_ID => {
                self.respond::<ActivateSessionRequest>(body, |r| self.activate_session(ctx, r))
            }
            CloseSessionRequest::ENCODING_ID => {
                self.respond::<CloseSessionRequest>(body, |r| self.close_session(r))
            }
            ReadRequest::ENCODING_ID => self.respond::<ReadRequest>(body, |r| self.read(r)),
            WriteRequest::ENCODING_ID => self.respond::<WriteRequest>(body, |r| self.write(r)),
            BrowseRequest::ENCODING_ID => self.respond::<BrowseRequest>(body, |r| self.browse(r)),
            BrowseNextRequest::ENCODING_ID => {
                self.respond::<BrowseNextRequest>(body, |r| self.browse_next(r))
            }
            CallRequest::ENCODING_ID => self.respond::<CallRequest>(body, |r| self.call(r)),
            HistoryReadRequest::ENCODING_ID => {
                self.respond::<HistoryReadRequest>(body, |r| self.history_read(r))
            }
            CreateSubscriptionRequest::ENCODING_ID => {
                self.respond::<CreateSubscriptionRequest>(body, |r| self.create_subscription(r))
            }
            ModifySubscriptionRequest::ENCODING_ID => {
                self.respond::<ModifySubscriptionRequest>(body, |r| self.modify_subscription(r))
            }
            SetPublishingModeRequest::ENCODING_ID => {
                self.respond::<SetPublishingModeRequest>(body, |r| self.set_publishing_mode(r))
            }
            DeleteSubscriptionsRequest::ENCODING_ID => {
                self.respond::<DeleteSubscriptionsRequest>(body, |r| self.delete_subscriptions(r))
            }
            CreateMonitoredItemsRequest::ENCODING_ID => {
                self.respond::<CreateMonitoredItemsRequest>(body, |r| self.create_monitored_items(r))
            }
            ModifyMonitoredItemsRequest::ENCODING_ID => {
                self.respond::<ModifyMonitoredItemsRequest>(body, |r| self.modify_monitored_items(r))
            }
            DeleteMonitoredItemsRequest::ENCODING_ID => {
                self.respond::<DeleteMonitoredItemsRequest>(body, |r| self.delete_monitored_items(r))
            }
            PublishRequest::ENCODING_ID => return self.publish(ctx, request_id, body),
            other => {
                tracing::debug!(encoding_id = other, "Mock server does not support this service");
                encode_fault(0, StatusCode::BAD_SERVICE_UNSUPPORTED)
            }
        };

        if self.hooks.is_silent() {
            tracing::debug!(request_id, "Mock server withholding response");
            return Reply::Deferred;
        }
        Reply::Now(response)
    }

    fn respond<R: ServiceRequest>(
        &self,
        body: &[u8],
        handler: impl FnOnce(&R) -> Result<R::Response, StatusCode>,
    ) -> Vec<u8> {
        let request = match decode_request::<R>(body, &self.registry) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(service = R::NAME, error = %e, "Mock server failed to decode request");
                return encode_fault(0, StatusCode::BAD_DECODING_ERROR);
            }
        };
        self.stats.record_request(R::NAME);
        let handle = request.request_header().request_handle;

        match handler(&request) {
            Ok(mut response) => {
                *response.response_header_mut() = ResponseHeader::new(handle, StatusCode::GOOD);
                encode_body(<R::Response as ServiceResponse>::ENCODING_ID, &response).unwrap_or_else(|e| {
                    tracing::error!(service = R::NAME, error = %e, "Mock server failed to encode response");
                    encode_fault(handle, StatusCode::BAD_INTERNAL_ERROR)
                })
            }
            Err(status) => {
                tracing::debug!(service = R::NAME, %status, "Mock server answering with a fault");
                encode_fault(handle, status)
            }
        }
    }

    /// Checks the session and consumes a pending injected fault.
    fn check_session(&self, header: &RequestHeader) -> Result<(), StatusCode> {
        self.core.lock().active_session_mut(&header.authentication_token)?;
        match self.hooks.take_fault() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Discovery and session services
    // =========================================================================

    fn application_description(&self) -> ApplicationDescription {
        ApplicationDescription {
            application_uri: self.config.application_uri.clone(),
            product_uri: "urn:mock:product".to_string(),
            application_name: LocalizedText::new("Mock UA Server"),
            application_type: ApplicationType::Server,
            discovery_urls: Some(vec![self.endpoint_url.clone()]),
            ..Default::default()
        }
    }

    /// Secured user tokens use Basic256Sha256 whenever a server certificate exists.
    fn token_policy(&self) -> SecurityPolicy {
        if self.config.identity.is_some() {
            SecurityPolicy::Basic256Sha256
        } else {
            SecurityPolicy::None
        }
    }

    fn user_token_policies(&self) -> Vec<UserTokenPolicy> {
        let secured_uri = match self.token_policy() {
            SecurityPolicy::None => String::new(),
            policy => policy.uri().to_string(),
        };
        vec![
            UserTokenPolicy {
                policy_id: "anonymous".to_string(),
                token_type: UserTokenType::Anonymous,
                ..Default::default()
            },
            UserTokenPolicy {
                policy_id: "username".to_string(),
                token_type: UserTokenType::UserName,
                security_policy_uri: secured_uri.clone(),
                ..Default::default()
            },
            UserTokenPolicy {
                policy_id: "x509".to_string(),
                token_type: UserTokenType::Certificate,
                security_policy_uri: secured_uri,
                ..Default::default()
            },
        ]
    }

    pub(crate) fn endpoints(&self) -> Vec<EndpointDescription> {
        let certificate = self
            .config
            .identity
            .as_ref()
            .map(|i| ByteString::from(i.certificate.der()))
            .unwrap_or_default();
        self.config
            .endpoints
            .iter()
            .map(|(policy, mode)| EndpointDescription {
                endpoint_url: self.endpoint_url.clone(),
                server: self.application_description(),
                server_certificate: certificate.clone(),
                security_mode: mode.to_message_mode(),
                security_policy_uri: policy.uri().to_string(),
                user_identity_tokens: Some(self.user_token_policies()),
                transport_profile_uri: transport_profiles::UA_TCP.to_string(),
                security_level: rank(*policy, *mode),
            })
            .collect()
    }

    fn create_session(
        &self,
        ctx: &ConnectionContext,
        request: &CreateSessionRequest,
    ) -> Result<CreateSessionResponse, StatusCode> {
        let client_certificate = if request.client_certificate.is_null_or_empty() {
            None
        } else {
            Some(
                Certificate::from_der(request.client_certificate.as_bytes())
                    .map_err(|_| StatusCode::BAD_CERTIFICATE_INVALID)?,
            )
        };

        let server_signature = match (&self.config.identity, ctx.policy.requires_certificates()) {
            (Some(identity), true) => create_signature(
                ctx.policy,
                &identity.private_key,
                request.client_certificate.as_bytes(),
                request.client_nonce.as_bytes(),
            )
            .map_err(|_| StatusCode::BAD_INTERNAL_ERROR)?,
            _ => SignatureData::default(),
        };

        let nonce = random_nonce(SESSION_NONCE_LENGTH);
        let mut core = self.core.lock();
        let (session_id, token) = core.allocate_session();
        let mut entry = SessionEntry::new(
            session_id.clone(),
            request.session_name.clone(),
            nonce.clone(),
            ctx.channel_id,
        );
        entry.client_certificate = client_certificate;
        core.sessions.insert(token.clone(), entry);
        drop(core);

        self.stats.record_session_created();
        tracing::debug!(session = %request.session_name, "Mock session created");
        Ok(CreateSessionResponse {
            session_id,
            authentication_token: token,
            revised_session_timeout: request.requested_session_timeout.clamp(10_000.0, 3_600_000.0),
            server_nonce: ByteString::from(nonce),
            server_certificate: self
                .config
                .identity
                .as_ref()
                .map(|i| ByteString::from(i.certificate.der()))
                .unwrap_or_default(),
            server_endpoints: Some(self.endpoints()),
            server_signature,
            ..Default::default()
        })
    }

    fn activate_session(
        &self,
        ctx: &ConnectionContext,
        request: &ActivateSessionRequest,
    ) -> Result<ActivateSessionResponse, StatusCode> {
        let token = &request.request_header.authentication_token;
        let (nonce, client_certificate) = {
            let core = self.core.lock();
            let session = core.sessions.get(token).ok_or(StatusCode::BAD_SESSION_ID_INVALID)?;
            (session.nonce.clone(), session.client_certificate.clone())
        };
        let server_der = self
            .config
            .identity
            .as_ref()
            .map(|i| i.certificate.der().to_vec())
            .unwrap_or_default();

        if ctx.policy.requires_certificates() {
            let signer = ctx
                .client_certificate
                .as_ref()
                .or(client_certificate.as_ref())
                .ok_or(StatusCode::BAD_APPLICATION_SIGNATURE_INVALID)?;
            verify_signature(ctx.policy, signer, &server_der, &nonce, &request.client_signature)
                .map_err(|_| StatusCode::BAD_APPLICATION_SIGNATURE_INVALID)?;
        }

        let user = self.authenticate(request, &server_der, &nonce)?;

        let next_nonce = random_nonce(SESSION_NONCE_LENGTH);
        let mut core = self.core.lock();
        let session = core.sessions.get_mut(token).ok_or(StatusCode::BAD_SESSION_ID_INVALID)?;
        if session.activated && session.channel_id != ctx.channel_id {
            tracing::debug!(
                from = session.channel_id,
                to = ctx.channel_id,
                "Mock session moved to a new channel"
            );
        }
        session.activated = true;
        session.user = user;
        session.channel_id = ctx.channel_id;
        session.nonce = next_nonce.clone();
        tracing::debug!(
            session = %session.name,
            session_id = %session.session_id,
            user = ?session.user,
            "Mock session activated"
        );
        drop(core);

        self.stats.record_activation();
        Ok(ActivateSessionResponse {
            server_nonce: ByteString::from(next_nonce),
            ..Default::default()
        })
    }

    /// Checks the user identity token; returns the user name to record.
    fn authenticate(
        &self,
        request: &ActivateSessionRequest,
        server_der: &[u8],
        nonce: &[u8],
    ) -> Result<Option<String>, StatusCode> {
        let token = &request.user_identity_token;
        let policy = self.token_policy();

        if token.is_null() {
            return Ok(None);
        }
        if let Ok(Some(_)) = token.decode_as_with::<AnonymousIdentityToken>(&self.registry) {
            return Ok(None);
        }
        if let Ok(Some(user)) = token.decode_as_with::<UserNameIdentityToken>(&self.registry) {
            let password = match &self.config.identity {
                Some(identity) => decrypt_secret(policy, &identity.private_key, user.password.as_bytes(), nonce)
                    .map_err(|_| StatusCode::BAD_IDENTITY_TOKEN_INVALID)?,
                None => user.password.as_bytes().to_vec(),
            };
            return match self.config.users.get(&user.user_name) {
                Some(expected) if expected.as_bytes() == password.as_slice() => Ok(Some(user.user_name)),
                _ => {
                    tracing::debug!(user = %user.user_name, "Mock server rejected credentials");
                    Err(StatusCode::BAD_USER_ACCESS_DENIED)
                }
            };
        }
        if let Ok(Some(x509)) = token.decode_as_with::<X509IdentityToken>(&self.registry) {
            let certificate = Certificate::from_der(x509.certificate_data.as_bytes())
                .map_err(|_| StatusCode::BAD_IDENTITY_TOKEN_INVALID)?;
            verify_signature(policy, &certificate, server_der, nonce, &request.user_token_signature)
                .map_err(|_| StatusCode::BAD_USER_SIGNATURE_INVALID)?;
            return Ok(Some(certificate.subject().to_string()));
        }
        Err(StatusCode::BAD_IDENTITY_TOKEN_INVALID)
    }

    fn close_session(&self, request: &CloseSessionRequest) -> Result<CloseSessionResponse, StatusCode> {
        let token = &request.request_header.authentication_token;
        let mut core = self.core.lock();
        if !core.remove_session(token, StatusCode::BAD_SESSION_CLOSED, request.delete_subscriptions) {
            return Err(StatusCode::BAD_SESSION_ID_INVALID);
        }
        drop(core);
        self.stats.record_session_closed();
        Ok(CloseSessionResponse::default())
    }

    // =========================================================================
    // Attribute services
    // =========================================================================

    fn read(&self, request: &ReadRequest) -> Result<ReadResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let nodes = request.nodes_to_read.as_deref().unwrap_or_default();
        if nodes.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        if request.timestamps_to_return == TimestampsToReturn::Invalid {
            return Err(StatusCode::BAD_INVALID_ARGUMENT);
        }
        let space = self.space.read();
        Ok(ReadResponse {
            results: Some(
                nodes
                    .iter()
                    .map(|node| space.read(node, request.timestamps_to_return))
                    .collect(),
            ),
            ..Default::default()
        })
    }

    fn write(&self, request: &WriteRequest) -> Result<WriteResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let nodes = request.nodes_to_write.as_deref().unwrap_or_default();
        if nodes.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let mut space = self.space.write();
        Ok(WriteResponse {
            results: Some(nodes.iter().map(|node| space.write(node)).collect()),
            ..Default::default()
        })
    }

    fn history_read(&self, request: &HistoryReadRequest) -> Result<HistoryReadResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let nodes = request.nodes_to_read.as_deref().unwrap_or_default();
        if nodes.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let token = &request.request_header.authentication_token;

        if request.release_continuation_points {
            let mut core = self.core.lock();
            let session = core.active_session_mut(token)?;
            for node in nodes {
                session.history_points.remove(node.continuation_point.as_bytes());
            }
            return Ok(HistoryReadResponse {
                results: Some(nodes.iter().map(|_| HistoryReadResult::default()).collect()),
                ..Default::default()
            });
        }

        let details = &request.history_read_details;
        let raw = details
            .decode_as_with::<ReadRawModifiedDetails>(&self.registry)
            .ok()
            .flatten();
        let processed = details
            .decode_as_with::<ReadProcessedDetails>(&self.registry)
            .ok()
            .flatten();

        let (page_size, fresh): (usize, Vec<Option<Result<Vec<DataValue>, StatusCode>>>) = {
            let space = self.space.read();
            match (raw, processed) {
                (Some(details), _) => (
                    effective_max(details.num_values_per_node, self.config.max_history_values),
                    nodes
                        .iter()
                        .map(|node| {
                            node.continuation_point
                                .is_null_or_empty()
                                .then(|| space.history(&node.node_id, &details))
                        })
                        .collect(),
                ),
                (None, Some(details)) => {
                    let aggregates = details.aggregate_type.as_deref().unwrap_or_default();
                    if aggregates.len() != nodes.len() {
                        return Err(StatusCode::BAD_AGGREGATE_LIST_MISMATCH);
                    }
                    (
                        effective_max(0, self.config.max_history_values),
                        nodes
                            .iter()
                            .zip(aggregates)
                            .map(|(node, aggregate)| {
                                node.continuation_point
                                    .is_null_or_empty()
                                    .then(|| space.processed_history(&node.node_id, aggregate, &details))
                            })
                            .collect(),
                    )
                }
                (None, None) => return Err(StatusCode::BAD_HISTORY_OPERATION_UNSUPPORTED),
            }
        };

        let mut core = self.core.lock();
        let session = core.active_session_mut(token)?;
        let mut results = Vec::with_capacity(nodes.len());
        for (node, fresh) in nodes.iter().zip(fresh) {
            let mut values = match fresh {
                Some(Ok(values)) => values,
                Some(Err(status)) => {
                    results.push(HistoryReadResult {
                        status_code: status,
                        ..Default::default()
                    });
                    continue;
                }
                None => match session.history_points.remove(node.continuation_point.as_bytes()) {
                    Some(values) => values,
                    None => {
                        results.push(HistoryReadResult {
                            status_code: StatusCode::BAD_CONTINUATION_POINT_INVALID,
                            ..Default::default()
                        });
                        continue;
                    }
                },
            };
            let mut continuation_point = ByteString::null();
            if values.len() > page_size {
                let rest = values.split_off(page_size);
                let point = random_nonce(8);
                session.history_points.insert(point.clone(), rest);
                continuation_point = ByteString::from(point);
            }
            results.push(HistoryReadResult {
                status_code: StatusCode::GOOD,
                continuation_point,
                history_data: ExtensionObject::from_structure(HistoryData {
                    data_values: Some(values),
                }),
            });
        }
        Ok(HistoryReadResponse {
            results: Some(results),
            ..Default::default()
        })
    }

    // =========================================================================
    // View services
    // =========================================================================

    fn browse(&self, request: &BrowseRequest) -> Result<BrowseResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let nodes = request.nodes_to_browse.as_deref().unwrap_or_default();
        if nodes.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let max = effective_max(
            request.requested_max_references_per_node,
            self.config.max_references_per_node,
        );
        let found: Vec<Result<Vec<ReferenceDescription>, StatusCode>> = {
            let space = self.space.read();
            nodes.iter().map(|description| space.browse(description)).collect()
        };

        let mut core = self.core.lock();
        let session = core.active_session_mut(&request.request_header.authentication_token)?;
        let results = found
            .into_iter()
            .map(|found| match found {
                Ok(references) => page_references(session, references, max),
                Err(status) => BrowseResult {
                    status_code: status,
                    ..Default::default()
                },
            })
            .collect();
        Ok(BrowseResponse {
            results: Some(results),
            ..Default::default()
        })
    }

    fn browse_next(&self, request: &BrowseNextRequest) -> Result<BrowseNextResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let points = request.continuation_points.as_deref().unwrap_or_default();
        if points.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let mut core = self.core.lock();
        let session = core.active_session_mut(&request.request_header.authentication_token)?;
        let mut results = Vec::with_capacity(points.len());
        for point in points {
            let result = match session.browse_points.remove(point.as_bytes()) {
                None => BrowseResult {
                    status_code: StatusCode::BAD_CONTINUATION_POINT_INVALID,
                    ..Default::default()
                },
                Some(_) if request.release_continuation_points => BrowseResult::default(),
                Some(cursor) => page_references(session, cursor.remaining, cursor.max),
            };
            results.push(result);
        }
        Ok(BrowseNextResponse {
            results: Some(results),
            ..Default::default()
        })
    }

    // =========================================================================
    // Method services
    // =========================================================================

    fn call(&self, request: &CallRequest) -> Result<CallResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let methods = request.methods_to_call.as_deref().unwrap_or_default();
        if methods.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        Ok(CallResponse {
            results: Some(methods.iter().map(|m| self.call_method(m)).collect()),
            ..Default::default()
        })
    }

    fn call_method(&self, method: &CallMethodRequest) -> CallMethodResult {
        if self.space.read().get(&method.object_id).is_none() {
            return failed_call(StatusCode::BAD_NODE_ID_UNKNOWN);
        }
        if method.object_id != DemoNodes::methods() {
            return failed_call(StatusCode::BAD_METHOD_INVALID);
        }
        let args = method.input_arguments.as_deref().unwrap_or_default();
        if method.method_id == DemoNodes::vector_add() {
            self.vector_add(args)
        } else if method.method_id == DemoNodes::multiply() {
            multiply(args)
        } else {
            failed_call(StatusCode::BAD_METHOD_INVALID)
        }
    }

    fn vector_add(&self, args: &[Variant]) -> CallMethodResult {
        if let Some(status) = check_arity(args, 2) {
            return failed_call(status);
        }
        let decoded: Vec<Option<Vector>> = args
            .iter()
            .map(|arg| {
                arg.as_extension_object()
                    .and_then(|obj| obj.decode_as_with::<Vector>(&self.registry).ok().flatten())
            })
            .collect();
        match decoded.as_slice() {
            [Some(a), Some(b)] => CallMethodResult {
                status_code: StatusCode::GOOD,
                input_argument_results: Some(vec![StatusCode::GOOD; 2]),
                output_arguments: Some(vec![Variant::ExtensionObject(Box::new(
                    ExtensionObject::from_structure(Vector::new(a.x + b.x, a.y + b.y, a.z + b.z)),
                ))]),
                ..Default::default()
            },
            _ => mismatch(decoded.iter().map(Option::is_some)),
        }
    }

    // =========================================================================
    // Subscription services
    // =========================================================================

    fn revised_interval(&self, requested: f64) -> f64 {
        let min = self.config.min_publishing_interval.as_secs_f64() * 1000.0;
        if requested.is_finite() {
            requested.max(min)
        } else {
            min
        }
    }

    fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<CreateSubscriptionResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let interval = self.revised_interval(request.requested_publishing_interval);
        let keep_alive = request.requested_max_keep_alive_count.max(1);
        let lifetime = request.requested_lifetime_count.max(keep_alive * 3);

        let token = request.request_header.authentication_token.clone();
        let mut core = self.core.lock();
        let id = core.next_subscription_id();
        core.subscriptions.insert(
            id,
            MockSubscription::new(
                id,
                token,
                Duration::from_secs_f64(interval / 1000.0),
                keep_alive,
                lifetime,
                request.publishing_enabled,
            ),
        );
        tracing::debug!(subscription_id = id, interval, "Mock subscription created");
        Ok(CreateSubscriptionResponse {
            subscription_id: id,
            revised_publishing_interval: interval,
            revised_lifetime_count: lifetime,
            revised_max_keep_alive_count: keep_alive,
            ..Default::default()
        })
    }

    fn modify_subscription(
        &self,
        request: &ModifySubscriptionRequest,
    ) -> Result<ModifySubscriptionResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let interval = self.revised_interval(request.requested_publishing_interval);
        let keep_alive = request.requested_max_keep_alive_count.max(1);
        let lifetime = request.requested_lifetime_count.max(keep_alive * 3);

        let mut core = self.core.lock();
        let subscription =
            core.owned_subscription_mut(&request.request_header.authentication_token, request.subscription_id)?;
        subscription.revise(Duration::from_secs_f64(interval / 1000.0), keep_alive, lifetime);
        Ok(ModifySubscriptionResponse {
            revised_publishing_interval: interval,
            revised_lifetime_count: subscription.lifetime_count,
            revised_max_keep_alive_count: subscription.max_keep_alive,
            ..Default::default()
        })
    }

    fn set_publishing_mode(
        &self,
        request: &SetPublishingModeRequest,
    ) -> Result<SetPublishingModeResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let ids = request.subscription_ids.as_deref().unwrap_or_default();
        if ids.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let token = &request.request_header.authentication_token;
        let mut core = self.core.lock();
        let results = ids
            .iter()
            .map(|id| match core.owned_subscription_mut(token, *id) {
                Ok(subscription) => {
                    subscription.publishing_enabled = request.publishing_enabled;
                    StatusCode::GOOD
                }
                Err(status) => status,
            })
            .collect();
        Ok(SetPublishingModeResponse {
            results: Some(results),
            ..Default::default()
        })
    }

    fn delete_subscriptions(
        &self,
        request: &DeleteSubscriptionsRequest,
    ) -> Result<DeleteSubscriptionsResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let ids = request.subscription_ids.as_deref().unwrap_or_default();
        if ids.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let token = &request.request_header.authentication_token;
        let mut core = self.core.lock();
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let owned = core.owned_subscription_mut(token, *id).map(|_| ());
            let status = match owned {
                Ok(()) => {
                    core.subscriptions.remove(id);
                    StatusCode::GOOD
                }
                Err(status) => status,
            };
            results.push(status);
        }
        core.release_orphaned_publishes(token);
        Ok(DeleteSubscriptionsResponse {
            results: Some(results),
            ..Default::default()
        })
    }

    fn create_monitored_items(
        &self,
        request: &CreateMonitoredItemsRequest,
    ) -> Result<CreateMonitoredItemsResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let items = request.items_to_create.as_deref().unwrap_or_default();
        if items.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let planned: Vec<Result<ItemKind, StatusCode>> = {
            let space = self.space.read();
            items.iter().map(|item| self.plan_item(&space, item)).collect()
        };

        let mut core = self.core.lock();
        let subscription =
            core.owned_subscription_mut(&request.request_header.authentication_token, request.subscription_id)?;
        let results = items
            .iter()
            .zip(planned)
            .map(|(item, planned)| {
                let kind = match planned {
                    Ok(kind) => kind,
                    Err(status) => {
                        return MonitoredItemCreateResult {
                            status_code: status,
                            ..Default::default()
                        }
                    }
                };
                let parameters = &item.requested_parameters;
                let (sampling_interval, filter_result) = match &kind {
                    ItemKind::Data { .. } => (parameters.sampling_interval.max(MIN_SAMPLING_INTERVAL), ExtensionObject::null()),
                    ItemKind::Event { select, .. } => (
                        0.0,
                        ExtensionObject::from_structure(EventFilterResult {
                            select_clause_results: Some(vec![StatusCode::GOOD; select.len()]),
                            ..Default::default()
                        }),
                    ),
                };
                let queue_size = parameters.queue_size.max(1);
                let monitored_item_id = subscription.add_item(MonitoredItem {
                    client_handle: parameters.client_handle,
                    node_id: item.item_to_monitor.node_id.clone(),
                    mode: item.monitoring_mode,
                    sampling_interval,
                    queue_size,
                    discard_oldest: parameters.discard_oldest,
                    kind,
                });
                MonitoredItemCreateResult {
                    status_code: StatusCode::GOOD,
                    monitored_item_id,
                    revised_sampling_interval: sampling_interval,
                    revised_queue_size: queue_size,
                    filter_result,
                }
            })
            .collect();
        Ok(CreateMonitoredItemsResponse {
            results: Some(results),
            ..Default::default()
        })
    }

    fn plan_item(&self, space: &AddressSpace, item: &MonitoredItemCreateRequest) -> Result<ItemKind, StatusCode> {
        let node = space
            .get(&item.item_to_monitor.node_id)
            .ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;
        match item.item_to_monitor.attribute_id {
            attribute_ids::VALUE if node.node_class == NodeClass::Variable => Ok(ItemKind::Data { last: None }),
            attribute_ids::EVENT_NOTIFIER if node.event_notifier != 0 => {
                let filter = item
                    .requested_parameters
                    .filter
                    .decode_as_with::<EventFilter>(&self.registry)
                    .ok()
                    .flatten()
                    .ok_or(StatusCode::BAD_MONITORED_ITEM_FILTER_INVALID)?;
                let select = filter
                    .select_clauses
                    .unwrap_or_default()
                    .iter()
                    .map(|clause| {
                        clause
                            .browse_path
                            .as_ref()
                            .and_then(|path| path.last())
                            .map(|name| name.name.clone())
                            .unwrap_or_default()
                    })
                    .collect();
                Ok(ItemKind::Event {
                    select,
                    queue: VecDeque::new(),
                })
            }
            _ => Err(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
        }
    }

    fn modify_monitored_items(
        &self,
        request: &ModifyMonitoredItemsRequest,
    ) -> Result<ModifyMonitoredItemsResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let items = request.items_to_modify.as_deref().unwrap_or_default();
        if items.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let mut core = self.core.lock();
        let subscription =
            core.owned_subscription_mut(&request.request_header.authentication_token, request.subscription_id)?;
        let results = items
            .iter()
            .map(|modify| match subscription.items.get_mut(&modify.monitored_item_id) {
                Some(item) => {
                    let parameters = &modify.requested_parameters;
                    item.client_handle = parameters.client_handle;
                    item.queue_size = parameters.queue_size.max(1);
                    item.discard_oldest = parameters.discard_oldest;
                    if matches!(item.kind, ItemKind::Data { .. }) {
                        item.sampling_interval = parameters.sampling_interval.max(MIN_SAMPLING_INTERVAL);
                    }
                    MonitoredItemModifyResult {
                        status_code: StatusCode::GOOD,
                        revised_sampling_interval: item.sampling_interval,
                        revised_queue_size: item.queue_size,
                        ..Default::default()
                    }
                }
                None => MonitoredItemModifyResult {
                    status_code: StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                    ..Default::default()
                },
            })
            .collect();
        Ok(ModifyMonitoredItemsResponse {
            results: Some(results),
            ..Default::default()
        })
    }

    fn delete_monitored_items(
        &self,
        request: &DeleteMonitoredItemsRequest,
    ) -> Result<DeleteMonitoredItemsResponse, StatusCode> {
        self.check_session(&request.request_header)?;
        let ids = request.monitored_item_ids.as_deref().unwrap_or_default();
        if ids.is_empty() {
            return Err(StatusCode::BAD_NOTHING_TO_DO);
        }
        let mut core = self.core.lock();
        let subscription =
            core.owned_subscription_mut(&request.request_header.authentication_token, request.subscription_id)?;
        let results = ids
            .iter()
            .map(|id| match subscription.items.remove(id) {
                Some(_) => StatusCode::GOOD,
                None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
            })
            .collect();
        Ok(DeleteMonitoredItemsResponse {
            results: Some(results),
            ..Default::default()
        })
    }

    // =========================================================================
    // Publish
    // =========================================================================

    fn publish(&self, ctx: &ConnectionContext, request_id: u32, body: &[u8]) -> Reply {
        let request = match decode_request::<PublishRequest>(body, &self.registry) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Mock server failed to decode PublishRequest");
                return Reply::Now(encode_fault(0, StatusCode::BAD_DECODING_ERROR));
            }
        };
        let acknowledgements = request.subscription_acknowledgements.unwrap_or_default();
        self.stats.record_publish(&acknowledgements);
        let handle = request.request_header.request_handle;
        let token = request.request_header.authentication_token;

        let mut core = self.core.lock();
        if let Err(status) = core.active_session_mut(&token) {
            return Reply::Now(encode_fault(handle, status));
        }
        let results: Vec<StatusCode> = acknowledgements
            .iter()
            .map(|ack| match core.owned_subscription_mut(&token, ack.subscription_id) {
                Ok(subscription) => subscription.acknowledge(ack.sequence_number),
                Err(status) => status,
            })
            .collect();
        if !core.has_subscriptions(&token) {
            return Reply::Now(encode_fault(handle, StatusCode::BAD_NO_SUBSCRIPTION));
        }

        let max_queued = self.config.max_publish_requests;
        let Ok(session) = core.active_session_mut(&token) else {
            return Reply::Now(encode_fault(handle, StatusCode::BAD_SESSION_ID_INVALID));
        };
        if session.publish_queue.len() >= max_queued {
            return Reply::Now(encode_fault(handle, StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS));
        }
        session.publish_queue.push_back(PendingPublish {
            reply: ctx.reply.clone(),
            request_id,
            request_handle: handle,
            results,
        });
        deliver(&mut core);
        Reply::Deferred
    }
}

fn check_arity(args: &[Variant], expected: usize) -> Option<StatusCode> {
    if args.len() < expected {
        Some(StatusCode::BAD_ARGUMENTS_MISSING)
    } else if args.len() > expected {
        Some(StatusCode::BAD_INVALID_ARGUMENT)
    } else {
        None
    }
}

fn mismatch(valid: impl Iterator<Item = bool>) -> CallMethodResult {
    CallMethodResult {
        status_code: StatusCode::BAD_INVALID_ARGUMENT,
        input_argument_results: Some(
            valid
                .map(|ok| if ok { StatusCode::GOOD } else { StatusCode::BAD_TYPE_MISMATCH })
                .collect(),
        ),
        ..Default::default()
    }
}

fn multiply(args: &[Variant]) -> CallMethodResult {
    if let Some(status) = check_arity(args, 2) {
        return failed_call(status);
    }
    match args {
        [Variant::Double(a), Variant::Double(b)] => CallMethodResult {
            status_code: StatusCode::GOOD,
            input_argument_results: Some(vec![StatusCode::GOOD; 2]),
            output_arguments: Some(vec![Variant::Double(a * b)]),
            ..Default::default()
        },
        _ => mismatch(args.iter().map(|arg| matches!(arg, Variant::Double(_)))),
    }
}
