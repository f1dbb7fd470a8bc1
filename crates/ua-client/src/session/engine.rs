// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The session engine.
//!
//! A [`Session`] owns at most one [`SecureChannel`] at a time, held in a
//! `watch` slot so that [`reconnect`](Session::reconnect) can swap it without
//! touching subscriptions or the publish loop. Lifecycle operations (open,
//! reconnect, close) are serialized; service calls run concurrently with
//! each other and with the publish loop.
//!
//! ```text
//! Closed ─open─▶ Connecting ─▶ Creating ─▶ Activating ─▶ Active ─close─▶ Closing ─▶ Closed
//!                    │             │            │           │  ▲
//!                    └─────────────┴────────────┴─▶ Faulted │  │ reconnect
//!                                                   ▲       ▼  │
//!                                                   └── Reconnecting
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, watch};

use crate::channel::{ChannelOptions, ChannelSecurity, Role, SecureChannel};
use crate::codec::{DataValue, ExtensionObject, TypeRegistry, Variant};
use crate::config::{ClientConfig, SubscriptionSettings};
use crate::error::{HandshakeError, SessionError, UaError, UaResult};
use crate::messages::{
    ActivateSessionRequest, ApplicationDescription, ApplicationType, BrowseDescription,
    BrowseNextRequest, BrowseRequest, BrowseResult, CallMethodRequest, CallMethodResult,
    CallRequest, CloseSessionRequest, CreateMonitoredItemsRequest, CreateSessionRequest,
    CreateSessionResponse, CreateSubscriptionRequest, DeleteMonitoredItemsRequest,
    DeleteSubscriptionsRequest, EndpointDescription, GetEndpointsRequest, HistoryReadRequest,
    HistoryReadResult, HistoryReadValueId, ModifyMonitoredItemsRequest, ModifySubscriptionRequest,
    MonitoredItemCreateRequest, MonitoredItemCreateResult, MonitoredItemModifyRequest,
    MonitoredItemModifyResult, PublishResponse, ReadRequest, ReadValueId, RequestHeader,
    ServiceRequest, SetPublishingModeRequest, SignatureData, TimestampsToReturn, ViewDescription,
    WriteRequest, WriteValue,
};
use crate::security::crypto::random_nonce;
use crate::security::{
    create_signature, verify_signature, ApplicationIdentity, Certificate, CertificateStore,
    CertificateValidator, DirectoryStore, SecurityMode, SecurityPolicy,
};
use crate::subscription::publish::{PublishContext, PublishExit, PublishTask};
use crate::subscription::{
    MonitoredItemEntry, PublishStats, SubscriptionCallback, SubscriptionInfo, SubscriptionRegistry,
};
use crate::types::{ByteString, LocalizedText, NodeId, StatusCode};

use super::endpoint::{self, EndpointSelection, ResolvedEndpoint};
use super::identity::UserIdentity;
use super::state::{SessionInfo, SessionState, SessionStats};

const CLIENT_NONCE_LENGTH: usize = 32;
const PUBLISH_BROADCAST_CAPACITY: usize = 256;

// =============================================================================
// Session
// =============================================================================

/// A client session with one OPC UA server.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: ClientConfig,
    identity: UserIdentity,
    selection: EndpointSelection,
    registry: Arc<TypeRegistry>,
    store: Arc<dyn CertificateStore>,
    validator: CertificateValidator,

    channel: watch::Sender<Option<Arc<SecureChannel>>>,
    state: watch::Sender<SessionState>,
    info: RwLock<Option<SessionInfo>>,
    endpoint: RwLock<Option<ResolvedEndpoint>>,

    subscriptions: Arc<SubscriptionRegistry>,
    publish_responses: broadcast::Sender<Arc<PublishResponse>>,
    publisher: Mutex<Option<PublishTask>>,
    publish_stats: Arc<PublishStats>,

    lifecycle: tokio::sync::Mutex<()>,
    stats: SessionStats,
}

impl Session {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Creates a closed session that keeps its certificates in the
    /// configured PKI directory.
    pub fn new(
        config: ClientConfig,
        identity: UserIdentity,
        selection: EndpointSelection,
        registry: TypeRegistry,
    ) -> UaResult<Self> {
        let store = DirectoryStore::new(config.effective_pki_dir())
            .with_trust_on_first_use(config.trust_on_first_use);
        Self::with_store(config, identity, selection, registry, Arc::new(store))
    }

    /// Creates a closed session backed by `store`.
    pub fn with_store(
        config: ClientConfig,
        identity: UserIdentity,
        selection: EndpointSelection,
        registry: TypeRegistry,
        store: Arc<dyn CertificateStore>,
    ) -> UaResult<Self> {
        config.validate()?;
        let (channel, _) = watch::channel(None);
        let (state, _) = watch::channel(SessionState::Closed);
        let (publish_responses, _) = broadcast::channel(PUBLISH_BROADCAST_CAPACITY);
        let subscriptions = Arc::new(SubscriptionRegistry::new(config.publish.dispatch_queue));

        Ok(Self {
            inner: Arc::new(SessionInner {
                identity,
                selection,
                registry: Arc::new(registry),
                store,
                validator: CertificateValidator::default(),
                channel,
                state,
                info: RwLock::new(None),
                endpoint: RwLock::new(None),
                subscriptions,
                publish_responses,
                publisher: Mutex::new(None),
                publish_stats: Arc::new(PublishStats::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                stats: SessionStats::new(),
                config,
            }),
        })
    }

    /// Creates a session entirely from configuration: endpoint discovery,
    /// identity and certificate store.
    pub async fn from_config(config: ClientConfig) -> UaResult<Self> {
        let identity = UserIdentity::from_config(&config.identity).await?;
        let selection = EndpointSelection::from_config(&config);
        Self::new(config, identity, selection, TypeRegistry::standard())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Resolves the endpoint, opens the secure channel, creates and
    /// activates the session and starts the publish loop.
    ///
    /// Allowed from Closed or Faulted. On failure the channel is torn down
    /// and the session is Faulted.
    pub async fn open(&self) -> UaResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let state = self.state();
        if !state.is_terminal() {
            return Err(SessionError::AlreadyOpen.into());
        }

        self.inner.subscriptions.clear();
        *self.inner.info.write() = None;
        self.inner.set_state(SessionState::Connecting);

        match self.inner.establish().await {
            Ok(()) => {
                self.inner.set_state(SessionState::Active);
                self.inner.start_publisher();
                if let Some(info) = self.info() {
                    tracing::info!(
                        session_id = %info.session_id,
                        endpoint = ?self.remote_endpoint().map(|e| e.endpoint_url),
                        identity = %self.inner.identity,
                        timeout_ms = info.revised_timeout.as_millis() as u64,
                        "Session active"
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.inner.drop_channel();
                *self.inner.info.write() = None;
                self.inner.set_state(SessionState::Faulted);
                self.inner.stats.record_failure();
                e.log("session open");
                Err(e)
            }
        }
    }

    /// Moves the session onto a fresh secure channel by re-activating it.
    ///
    /// Subscriptions stay in place and the publish loop resumes on the new
    /// channel. Allowed from Active, or Reconnecting after a failed attempt.
    /// If the server rejects the session it becomes Faulted; any other
    /// failure leaves it Reconnecting so the call can be retried.
    pub async fn reconnect(&self) -> UaResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let state = self.state();
        if !matches!(state, SessionState::Active | SessionState::Reconnecting) {
            return Err(UaError::not_open(state));
        }
        let endpoint = self
            .inner
            .endpoint
            .read()
            .clone()
            .ok_or_else(|| UaError::not_open(state))?;
        let (token, server_nonce) = self
            .inner
            .info
            .read()
            .as_ref()
            .map(|i| (i.authentication_token.clone(), i.server_nonce.clone()))
            .ok_or_else(|| UaError::not_open(state))?;

        self.inner.set_state(SessionState::Reconnecting);
        let old = self.inner.channel.borrow().clone();
        if let Some(old) = old {
            old.abort();
        }
        tracing::info!(endpoint = %endpoint.connect_url, "Reconnecting session");

        let channel = match self.inner.connect(&endpoint).await {
            Ok(channel) => channel,
            Err(e) => {
                e.log("session reconnect");
                return Err(e);
            }
        };
        match self
            .inner
            .activate(&channel, &endpoint, &token, &server_nonce)
            .await
        {
            Ok(nonce) => {
                if let Some(info) = self.inner.info.write().as_mut() {
                    info.server_nonce = nonce;
                    info.activated_at = Instant::now();
                }
                self.inner.channel.send_replace(Some(channel));
                self.inner.set_state(SessionState::Active);
                self.inner.stats.record_reconnection();
                tracing::info!(
                    session_id = ?self.session_id(),
                    subscriptions = self.inner.subscriptions.len(),
                    "Session reconnected"
                );
                Ok(())
            }
            Err(e) => {
                channel.abort();
                if let UaError::SessionInvalid(invalid) = &e {
                    self.inner.on_session_invalid(invalid.status);
                }
                e.log("session reconnect");
                Err(e)
            }
        }
    }

    /// Stops the publish loop, closes the session on the server (deleting
    /// its subscriptions) and closes the channel.
    ///
    /// A transport failure on the way aborts the channel and is returned;
    /// the session ends up Closed either way. Rejections of CloseSession by
    /// the server are ignored.
    pub async fn close(&self) -> UaResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let state = self.state();
        if state == SessionState::Closed {
            return Ok(());
        }
        self.inner.set_state(SessionState::Closing);
        let publisher = self.inner.publisher.lock().take();
        if let Some(task) = publisher {
            task.stop().await;
        }

        let channel = self.inner.channel.borrow().clone();
        // A faulted session is already gone on the server.
        let token = self
            .inner
            .info
            .read()
            .as_ref()
            .filter(|_| state != SessionState::Faulted)
            .map(|i| i.authentication_token.clone());
        let mut outcome = Ok(());

        if let Some(channel) = channel {
            if let (Some(token), true) = (token, channel.state().is_usable()) {
                let request = CloseSessionRequest {
                    request_header: RequestHeader::new(
                        token,
                        0,
                        millis(self.inner.config.close_timeout),
                    ),
                    delete_subscriptions: true,
                };
                match channel.send_request(request).await {
                    Ok(_) => tracing::debug!("Session closed on server"),
                    Err(e) if e.is_channel_fatal() || matches!(e, UaError::Timeout(_)) => {
                        outcome = Err(e);
                    }
                    Err(e) => tracing::debug!(error = %e, "CloseSession rejected"),
                }
            }
            if outcome.is_ok() {
                outcome = channel.close().await;
            }
            if outcome.is_err() {
                channel.abort();
            }
        }

        self.inner.channel.send_replace(None);
        self.inner.subscriptions.clear();
        let session_id = self.inner.info.write().take().map(|i| i.session_id);
        self.inner.set_state(SessionState::Closed);
        match &outcome {
            Ok(()) => tracing::info!(session_id = ?session_id, "Session closed"),
            Err(e) => tracing::warn!(session_id = ?session_id, error = %e, "Session closed after transport failure"),
        }
        outcome
    }

    /// Tears everything down locally without talking to the server.
    /// Safe to call from any state and more than once.
    pub fn abort(&self) {
        if let Some(task) = self.inner.publisher.lock().take() {
            task.abort();
        }
        self.inner.drop_channel();
        self.inner.subscriptions.clear();
        *self.inner.info.write() = None;
        if self.state() != SessionState::Closed {
            tracing::info!(state = %self.state(), "Session aborted");
            self.inner.set_state(SessionState::Closed);
        }
    }

    // =========================================================================
    // Observables
    // =========================================================================

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watches state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Server-assigned session id while a session exists.
    pub fn session_id(&self) -> Option<NodeId> {
        self.inner.info.read().as_ref().map(|i| i.session_id.clone())
    }

    /// Session data handed out by the server.
    pub fn info(&self) -> Option<SessionInfo> {
        self.inner.info.read().clone()
    }

    /// The endpoint the session is connected to.
    pub fn remote_endpoint(&self) -> Option<EndpointDescription> {
        self.inner.endpoint.read().as_ref().map(|e| e.description.clone())
    }

    /// The user the session acts for.
    pub fn user_identity(&self) -> &UserIdentity {
        &self.inner.identity
    }

    /// Security policy of the selected endpoint.
    pub fn security_policy(&self) -> Option<SecurityPolicy> {
        self.inner.endpoint.read().as_ref().map(|e| e.policy)
    }

    /// Security mode of the selected endpoint.
    pub fn security_mode(&self) -> Option<SecurityMode> {
        self.inner.endpoint.read().as_ref().map(|e| e.mode)
    }

    /// The current secure channel.
    pub fn channel(&self) -> Option<Arc<SecureChannel>> {
        self.inner.channel.borrow().clone()
    }

    /// Subscriptions and their monitored items.
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.subscriptions
    }

    /// Receives every Publish response, keep-alives included.
    pub fn subscribe_publish_responses(&self) -> broadcast::Receiver<Arc<PublishResponse>> {
        self.inner.publish_responses.subscribe()
    }

    /// Session counters.
    pub fn stats(&self) -> &SessionStats {
        &self.inner.stats
    }

    /// Publish loop counters.
    pub fn publish_stats(&self) -> &PublishStats {
        &self.inner.publish_stats
    }

    /// Configuration the session was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Type registry used to decode responses.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    pub(crate) fn max_round_trips(&self) -> usize {
        self.inner.config.max_continuation_round_trips.max(1) as usize
    }

    // =========================================================================
    // Services
    // =========================================================================

    /// Sends any session service request and waits for its response.
    ///
    /// The authentication token is filled in. A timeout hint of 0 is
    /// replaced with the configured request timeout.
    pub async fn send<R: ServiceRequest>(&self, mut request: R) -> UaResult<R::Response> {
        let state = self.state();
        if !state.is_active() {
            return Err(UaError::not_open(state));
        }
        let channel = self.channel().ok_or_else(|| UaError::not_open(state))?;
        let token = self
            .inner
            .info
            .read()
            .as_ref()
            .map(|i| i.authentication_token.clone())
            .ok_or_else(|| UaError::not_open(state))?;

        let header = request.request_header_mut();
        header.authentication_token = token;
        if header.timeout_hint == 0 {
            header.timeout_hint = millis(self.inner.config.request_timeout);
        }

        self.inner.stats.record_call();
        let result = channel.send_request(request).await;
        if let Err(e) = &result {
            self.inner.stats.record_fault();
            if let UaError::SessionInvalid(invalid) = e {
                self.inner.on_session_invalid(invalid.status);
            }
        }
        result
    }

    /// Asks the connected server for its endpoints over the session's
    /// channel.
    pub async fn get_endpoints(&self) -> UaResult<Vec<EndpointDescription>> {
        let channel = self
            .channel()
            .filter(|c| c.state().is_usable())
            .ok_or_else(|| UaError::not_open(self.state()))?;
        let request = GetEndpointsRequest {
            endpoint_url: channel.endpoint_url().to_string(),
            ..Default::default()
        };
        let response = channel.send_request(request).await?;
        Ok(response.endpoints.unwrap_or_default())
    }

    /// Reads attributes. One value per node, in request order.
    pub async fn read(
        &self,
        nodes_to_read: Vec<ReadValueId>,
        timestamps_to_return: TimestampsToReturn,
        max_age: f64,
    ) -> UaResult<Vec<DataValue>> {
        let expected = nodes_to_read.len();
        let response = self
            .send(ReadRequest {
                max_age,
                timestamps_to_return,
                nodes_to_read: Some(nodes_to_read),
                ..Default::default()
            })
            .await?;
        expect_results("Read", response.results, expected)
    }

    /// Reads the Value attribute of one node.
    pub async fn read_value(&self, node_id: NodeId) -> UaResult<DataValue> {
        let mut values = self
            .read(vec![ReadValueId::value(node_id)], TimestampsToReturn::Both, 0.0)
            .await?;
        values.pop().ok_or_else(|| unexpected("Read returned no value"))
    }

    /// Writes attributes. One status per node, in request order.
    pub async fn write(&self, nodes_to_write: Vec<WriteValue>) -> UaResult<Vec<StatusCode>> {
        let expected = nodes_to_write.len();
        let response = self
            .send(WriteRequest {
                nodes_to_write: Some(nodes_to_write),
                ..Default::default()
            })
            .await?;
        expect_results("Write", response.results, expected)
    }

    /// Writes the Value attribute of one node.
    pub async fn write_value(&self, node_id: NodeId, value: impl Into<Variant>) -> UaResult<StatusCode> {
        let mut results = self.write(vec![WriteValue::value(node_id, value)]).await?;
        results.pop().ok_or_else(|| unexpected("Write returned no status"))
    }

    /// Browses nodes, returning at most `max_references_per_node`
    /// references each (0 lets the server decide).
    pub async fn browse(
        &self,
        nodes_to_browse: Vec<BrowseDescription>,
        max_references_per_node: u32,
    ) -> UaResult<Vec<BrowseResult>> {
        let expected = nodes_to_browse.len();
        let response = self
            .send(BrowseRequest {
                view: ViewDescription::default(),
                requested_max_references_per_node: max_references_per_node,
                nodes_to_browse: Some(nodes_to_browse),
                ..Default::default()
            })
            .await?;
        expect_results("Browse", response.results, expected)
    }

    /// Continues or releases browse results.
    pub async fn browse_next(
        &self,
        release_continuation_points: bool,
        continuation_points: Vec<ByteString>,
    ) -> UaResult<Vec<BrowseResult>> {
        let expected = continuation_points.len();
        let response = self
            .send(BrowseNextRequest {
                release_continuation_points,
                continuation_points: Some(continuation_points),
                ..Default::default()
            })
            .await?;
        let results = response.results.unwrap_or_default();
        // Servers may answer a release with no results at all.
        if release_continuation_points && results.is_empty() {
            return Ok(results);
        }
        expect_results("BrowseNext", Some(results), expected)
    }

    /// Calls methods. One result per call, in request order.
    pub async fn call(&self, methods_to_call: Vec<CallMethodRequest>) -> UaResult<Vec<CallMethodResult>> {
        let expected = methods_to_call.len();
        let response = self
            .send(CallRequest {
                methods_to_call: Some(methods_to_call),
                ..Default::default()
            })
            .await?;
        expect_results("Call", response.results, expected)
    }

    /// Calls one method.
    pub async fn call_method(
        &self,
        object_id: NodeId,
        method_id: NodeId,
        input_arguments: Vec<Variant>,
    ) -> UaResult<CallMethodResult> {
        let mut results = self
            .call(vec![CallMethodRequest::new(object_id, method_id, input_arguments)])
            .await?;
        results.pop().ok_or_else(|| unexpected("Call returned no result"))
    }

    /// Reads history. `details` is a ReadRawModifiedDetails,
    /// ReadProcessedDetails, ReadAtTimeDetails or ReadEventDetails.
    pub async fn history_read(
        &self,
        history_read_details: ExtensionObject,
        timestamps_to_return: TimestampsToReturn,
        release_continuation_points: bool,
        nodes_to_read: Vec<HistoryReadValueId>,
    ) -> UaResult<Vec<HistoryReadResult>> {
        let expected = nodes_to_read.len();
        let response = self
            .send(HistoryReadRequest {
                history_read_details,
                timestamps_to_return,
                release_continuation_points,
                nodes_to_read: Some(nodes_to_read),
                ..Default::default()
            })
            .await?;
        let results = response.results.unwrap_or_default();
        if release_continuation_points && results.is_empty() {
            return Ok(results);
        }
        expect_results("HistoryRead", Some(results), expected)
    }

    // =========================================================================
    // Subscription services
    // =========================================================================

    /// Creates a subscription whose notifications go to `callback`.
    pub async fn create_subscription(
        &self,
        settings: SubscriptionSettings,
        callback: Arc<dyn SubscriptionCallback>,
    ) -> UaResult<SubscriptionInfo> {
        let response = self
            .send(CreateSubscriptionRequest {
                requested_publishing_interval: settings.publishing_interval_ms(),
                requested_lifetime_count: settings.lifetime_count,
                requested_max_keep_alive_count: settings.max_keepalive_count,
                max_notifications_per_publish: settings.max_notifications_per_publish,
                publishing_enabled: settings.publishing_enabled,
                priority: settings.priority,
                ..Default::default()
            })
            .await?;

        let info = SubscriptionInfo {
            subscription_id: response.subscription_id,
            publishing_interval: duration_from_ms(response.revised_publishing_interval),
            lifetime_count: response.revised_lifetime_count,
            max_keep_alive_count: response.revised_max_keep_alive_count,
            publishing_enabled: settings.publishing_enabled,
            requested: settings,
        };
        self.inner.subscriptions.register(info.clone(), callback);
        tracing::info!(
            subscription_id = info.subscription_id,
            publishing_interval_ms = info.publishing_interval.as_millis() as u64,
            keep_alive_count = info.max_keep_alive_count,
            "Subscription created"
        );
        Ok(info)
    }

    /// Changes the timing parameters of a subscription.
    pub async fn modify_subscription(
        &self,
        subscription_id: u32,
        settings: SubscriptionSettings,
    ) -> UaResult<SubscriptionInfo> {
        self.require_subscription(subscription_id)?;
        let response = self
            .send(ModifySubscriptionRequest {
                subscription_id,
                requested_publishing_interval: settings.publishing_interval_ms(),
                requested_lifetime_count: settings.lifetime_count,
                requested_max_keep_alive_count: settings.max_keepalive_count,
                max_notifications_per_publish: settings.max_notifications_per_publish,
                priority: settings.priority,
                ..Default::default()
            })
            .await?;

        self.inner.subscriptions.update_info(subscription_id, |info| {
            info.publishing_interval = duration_from_ms(response.revised_publishing_interval);
            info.lifetime_count = response.revised_lifetime_count;
            info.max_keep_alive_count = response.revised_max_keep_alive_count;
            info.requested = settings;
        });
        self.inner
            .subscriptions
            .info(subscription_id)
            .ok_or_else(|| SessionError::UnknownSubscription { subscription_id }.into())
    }

    /// Enables or disables publishing. One status per subscription.
    pub async fn set_publishing_mode(
        &self,
        publishing_enabled: bool,
        subscription_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>> {
        let response = self
            .send(SetPublishingModeRequest {
                publishing_enabled,
                subscription_ids: Some(subscription_ids.clone()),
                ..Default::default()
            })
            .await?;
        let results = expect_results("SetPublishingMode", response.results, subscription_ids.len())?;
        for (id, status) in subscription_ids.iter().zip(&results) {
            if status.is_good() {
                self.inner
                    .subscriptions
                    .update_info(*id, |info| info.publishing_enabled = publishing_enabled);
            }
        }
        Ok(results)
    }

    /// Deletes subscriptions. Each one the server no longer knows is
    /// removed locally too.
    pub async fn delete_subscriptions(&self, subscription_ids: Vec<u32>) -> UaResult<Vec<StatusCode>> {
        let response = self
            .send(DeleteSubscriptionsRequest {
                subscription_ids: Some(subscription_ids.clone()),
                ..Default::default()
            })
            .await?;
        let results = expect_results("DeleteSubscriptions", response.results, subscription_ids.len())?;
        for (id, status) in subscription_ids.iter().zip(&results) {
            if status.is_good() || *status == StatusCode::BAD_SUBSCRIPTION_ID_INVALID {
                self.inner.subscriptions.unregister(*id);
            } else {
                tracing::warn!(subscription_id = id, status = %status, "Subscription not deleted");
            }
        }
        Ok(results)
    }

    /// Creates monitored items. Client handles must be unique within the
    /// subscription; items the server accepts start routing immediately.
    ///
    /// Handles are checked before the request and again when the created
    /// items are routed. If a concurrent call claimed a handle in between,
    /// the items just created are deleted on the server and the call fails
    /// with `DuplicateClientHandle`.
    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_create: Vec<MonitoredItemCreateRequest>,
    ) -> UaResult<Vec<MonitoredItemCreateResult>> {
        let handles: Vec<u32> = items_to_create
            .iter()
            .map(|i| i.requested_parameters.client_handle)
            .collect();
        self.inner
            .subscriptions
            .check_new_handles(subscription_id, &handles)?;

        let response = self
            .send(CreateMonitoredItemsRequest {
                subscription_id,
                timestamps_to_return,
                items_to_create: Some(items_to_create.clone()),
                ..Default::default()
            })
            .await?;
        let results = expect_results("CreateMonitoredItems", response.results, items_to_create.len())?;

        let created: Vec<MonitoredItemEntry> = items_to_create
            .into_iter()
            .zip(&results)
            .filter(|(_, result)| result.status_code.is_good())
            .map(|(item, result)| MonitoredItemEntry {
                client_handle: item.requested_parameters.client_handle,
                monitored_item_id: result.monitored_item_id,
                item_to_monitor: item.item_to_monitor,
            })
            .collect();
        let created_ids: Vec<u32> = created.iter().map(|i| i.monitored_item_id).collect();
        if let Err(e) = self.inner.subscriptions.add_items(subscription_id, created) {
            if !created_ids.is_empty() {
                if let Err(cleanup) = self.delete_monitored_items(subscription_id, created_ids).await {
                    tracing::warn!(subscription_id, error = %cleanup, "Could not delete unrouted monitored items");
                }
            }
            return Err(e);
        }

        for (handle, result) in handles.iter().zip(&results) {
            if result.status_code.is_bad() {
                tracing::warn!(
                    subscription_id,
                    client_handle = handle,
                    status = %result.status_code,
                    "Monitored item rejected"
                );
            }
        }
        Ok(results)
    }

    /// Changes monitored item parameters, including the client handle.
    pub async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_modify: Vec<MonitoredItemModifyRequest>,
    ) -> UaResult<Vec<MonitoredItemModifyResult>> {
        self.require_subscription(subscription_id)?;
        let existing = self.inner.subscriptions.items(subscription_id);
        for item in &items_to_modify {
            let client_handle = item.requested_parameters.client_handle;
            let taken = existing
                .iter()
                .any(|e| e.client_handle == client_handle && e.monitored_item_id != item.monitored_item_id);
            if taken {
                return Err(SessionError::DuplicateClientHandle {
                    subscription_id,
                    client_handle,
                }
                .into());
            }
        }

        let response = self
            .send(ModifyMonitoredItemsRequest {
                subscription_id,
                timestamps_to_return,
                items_to_modify: Some(items_to_modify.clone()),
                ..Default::default()
            })
            .await?;
        let results = expect_results("ModifyMonitoredItems", response.results, items_to_modify.len())?;
        for (item, result) in items_to_modify.iter().zip(&results) {
            if result.status_code.is_good() {
                self.inner.subscriptions.rebind_item(
                    subscription_id,
                    item.monitored_item_id,
                    item.requested_parameters.client_handle,
                );
            }
        }
        Ok(results)
    }

    /// Deletes monitored items; their notifications stop routing.
    pub async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        monitored_item_ids: Vec<u32>,
    ) -> UaResult<Vec<StatusCode>> {
        self.require_subscription(subscription_id)?;
        let response = self
            .send(DeleteMonitoredItemsRequest {
                subscription_id,
                monitored_item_ids: Some(monitored_item_ids.clone()),
                ..Default::default()
            })
            .await?;
        let results = expect_results("DeleteMonitoredItems", response.results, monitored_item_ids.len())?;
        let removed: Vec<u32> = monitored_item_ids
            .iter()
            .zip(&results)
            .filter(|(_, s)| s.is_good() || **s == StatusCode::BAD_MONITORED_ITEM_ID_INVALID)
            .map(|(id, _)| *id)
            .collect();
        self.inner.subscriptions.remove_items(subscription_id, &removed);
        Ok(results)
    }

    fn require_subscription(&self, subscription_id: u32) -> UaResult<()> {
        if self.inner.subscriptions.contains(subscription_id) {
            Ok(())
        } else {
            Err(SessionError::UnknownSubscription { subscription_id }.into())
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .field("endpoint", &self.inner.selection)
            .field("identity", &self.inner.identity)
            .field("subscriptions", &self.inner.subscriptions.len())
            .finish()
    }
}

// =============================================================================
// SessionInner
// =============================================================================

impl SessionInner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Session state changed");
        }
    }

    fn drop_channel(&self) {
        if let Some(channel) = self.channel.send_replace(None) {
            channel.abort();
        }
    }

    fn on_session_invalid(&self, status: StatusCode) {
        let state = *self.state.borrow();
        if matches!(state, SessionState::Closing | SessionState::Closed | SessionState::Faulted) {
            return;
        }
        tracing::warn!(status = %status, state = %state, "Server no longer accepts the session");
        self.set_state(SessionState::Faulted);
        self.stats.record_failure();
        if let Some(task) = self.publisher.lock().take() {
            task.abort();
        }
        self.subscriptions.clear();
    }

    fn start_publisher(self: &Arc<Self>) {
        let Some(token) = self
            .info
            .read()
            .as_ref()
            .map(|i| i.authentication_token.clone())
        else {
            return;
        };
        let context = PublishContext {
            channel: self.channel.subscribe(),
            authentication_token: token,
            registry: Arc::clone(&self.subscriptions),
            responses: self.publish_responses.clone(),
            settings: self.config.publish.clone(),
            stats: Arc::clone(&self.publish_stats),
        };
        let session = Arc::downgrade(self);
        let task = PublishTask::spawn(context, move |exit| {
            if let PublishExit::SessionInvalid(status) = exit {
                if let Some(inner) = session.upgrade() {
                    inner.on_session_invalid(status);
                }
            }
        });
        if let Some(old) = self.publisher.lock().replace(task) {
            old.abort();
        }
    }

    /// Connecting → Creating → Activating.
    async fn establish(&self) -> UaResult<()> {
        let endpoint = endpoint::resolve(&self.selection, &self.config, Arc::clone(&self.registry)).await?;
        *self.endpoint.write() = Some(endpoint.clone());

        let channel = self.connect(&endpoint).await?;
        self.channel.send_replace(Some(Arc::clone(&channel)));

        self.set_state(SessionState::Creating);
        let client_nonce = random_nonce(CLIENT_NONCE_LENGTH);
        let created = self.create_session(&channel, &endpoint, &client_nonce).await?;
        self.stats.record_creation();
        tracing::debug!(session_id = %created.session_id, "Session created");

        self.set_state(SessionState::Activating);
        let server_nonce = self
            .activate(&channel, &endpoint, &created.authentication_token, &created.server_nonce)
            .await?;

        let now = Instant::now();
        *self.info.write() = Some(SessionInfo {
            session_id: created.session_id,
            authentication_token: created.authentication_token,
            revised_timeout: duration_from_ms(created.revised_session_timeout),
            max_request_message_size: created.max_request_message_size,
            server_nonce,
            created_at: now,
            activated_at: now,
        });
        Ok(())
    }

    /// Checks the server certificate, loads the application certificate
    /// and opens a channel to `endpoint`.
    async fn connect(&self, endpoint: &ResolvedEndpoint) -> UaResult<Arc<SecureChannel>> {
        let options = ChannelOptions::from_config(&self.config, &endpoint.connect_url)?;
        let security = self.channel_security(endpoint).await?;
        let channel = SecureChannel::open(options, security, Arc::clone(&self.registry)).await?;
        Ok(Arc::new(channel))
    }

    async fn channel_security(&self, endpoint: &ResolvedEndpoint) -> UaResult<ChannelSecurity> {
        let policy = endpoint.policy;
        if !policy.requires_certificates() {
            return Ok(ChannelSecurity::none(Role::Client));
        }

        let server_certificate = endpoint_certificate(&endpoint.description)?.ok_or_else(|| {
            HandshakeError::certificate_rejected("endpoint carries no server certificate")
        })?;
        let expected_uri = Some(endpoint.description.server.application_uri.as_str()).filter(|u| !u.is_empty());
        let validation = self
            .validator
            .validate(&server_certificate, policy, expected_uri, Utc::now());
        for warning in &validation.warnings {
            tracing::warn!(subject = %server_certificate.subject(), warning = %warning, "Server certificate warning");
        }
        if !validation.is_valid() {
            return Err(HandshakeError::certificate_rejected(validation.summary()).into());
        }
        if !self.store.is_trusted(&server_certificate).await? {
            return Err(HandshakeError::certificate_rejected(format!(
                "server certificate {} is not trusted",
                server_certificate.thumbprint_hex()
            ))
            .into());
        }

        let own = self
            .store
            .load_or_create_application_certificate(&self.config.certificate_request())
            .await?;
        Ok(ChannelSecurity::new(
            Role::Client,
            policy,
            endpoint.mode,
            Some(own),
            Some(server_certificate),
        )?)
    }

    async fn create_session(
        &self,
        channel: &SecureChannel,
        endpoint: &ResolvedEndpoint,
        client_nonce: &[u8],
    ) -> UaResult<CreateSessionResponse> {
        let own = channel.client_identity();
        let request = CreateSessionRequest {
            request_header: RequestHeader::new(NodeId::null(), 0, millis(self.config.request_timeout)),
            client_description: self.application_description(own.as_ref()),
            server_uri: endpoint.description.server.application_uri.clone(),
            endpoint_url: endpoint.description.endpoint_url.clone(),
            session_name: self.config.effective_session_name(),
            client_nonce: ByteString::from(client_nonce),
            client_certificate: own
                .as_ref()
                .map(|o| ByteString::from(o.certificate.der()))
                .unwrap_or_default(),
            requested_session_timeout: self.config.session_timeout.as_millis() as f64,
            max_response_message_size: self.config.transport.max_message_size,
        };
        let response = channel.send_request(request).await?;
        self.verify_created(channel, endpoint, client_nonce, &response)?;
        Ok(response)
    }

    fn verify_created(
        &self,
        channel: &SecureChannel,
        endpoint: &ResolvedEndpoint,
        client_nonce: &[u8],
        response: &CreateSessionResponse,
    ) -> UaResult<()> {
        if let Some(endpoints) = response.server_endpoints.as_ref().filter(|e| !e.is_empty()) {
            let offered = endpoints.iter().any(|e| {
                e.security_policy_uri == endpoint.description.security_policy_uri
                    && e.security_mode == endpoint.description.security_mode
            });
            if !offered {
                return Err(HandshakeError::invalid_response(
                    "server endpoints do not include the selected endpoint",
                )
                .into());
            }
        }

        if !endpoint.policy.requires_certificates() {
            return Ok(());
        }
        let (Some(server), Some(own)) = (channel.server_certificate(), channel.client_identity()) else {
            return Err(HandshakeError::invalid_response("secured channel without certificates").into());
        };
        if !response.server_certificate.as_bytes().starts_with(server.der()) {
            return Err(HandshakeError::certificate_rejected(
                "CreateSession certificate differs from the endpoint certificate",
            )
            .into());
        }
        verify_signature(
            endpoint.policy,
            &server,
            own.certificate.der(),
            client_nonce,
            &response.server_signature,
        )
        .map_err(|e| HandshakeError::certificate_rejected(format!("server signature invalid: {e}")))?;
        Ok(())
    }

    /// Sends ActivateSession on `channel` and returns the new server nonce.
    async fn activate(
        &self,
        channel: &SecureChannel,
        endpoint: &ResolvedEndpoint,
        authentication_token: &NodeId,
        server_nonce: &ByteString,
    ) -> UaResult<ByteString> {
        let server_certificate = endpoint_certificate(&endpoint.description)?;
        let client_signature = match channel.client_identity() {
            Some(own) if endpoint.policy.requires_certificates() => create_signature(
                endpoint.policy,
                &own.private_key,
                server_certificate.as_ref().map(Certificate::der).unwrap_or_default(),
                server_nonce.as_bytes(),
            )?,
            _ => SignatureData::default(),
        };
        let token = self.identity.build_token(
            &endpoint.description,
            endpoint.policy,
            server_certificate.as_ref(),
            server_nonce.as_bytes(),
        )?;

        let request = ActivateSessionRequest {
            request_header: RequestHeader::new(
                authentication_token.clone(),
                0,
                millis(self.config.request_timeout),
            ),
            client_signature,
            client_software_certificates: None,
            locale_ids: None,
            user_identity_token: token.token,
            user_token_signature: token.signature,
        };
        let response = channel.send_request(request).await?;
        for status in response.results.iter().flatten().filter(|s| s.is_bad()) {
            tracing::warn!(status = %status, "Software certificate rejected");
        }
        self.stats.record_activation();
        tracing::debug!(policy_id = %token.policy_id, "Session activated");
        Ok(response.server_nonce)
    }

    fn application_description(&self, own: Option<&ApplicationIdentity>) -> ApplicationDescription {
        let application_uri = own
            .and_then(|o| o.certificate.application_uri().map(str::to_string))
            .unwrap_or_else(|| self.config.effective_application_uri());
        ApplicationDescription {
            application_uri,
            product_uri: self.config.effective_product_uri(),
            application_name: LocalizedText::new(self.config.application_name.as_str()),
            application_type: ApplicationType::Client,
            ..Default::default()
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(task) = self.publisher.get_mut().take() {
            task.abort();
        }
        if let Some(channel) = self.channel.borrow().as_ref() {
            channel.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn endpoint_certificate(endpoint: &EndpointDescription) -> UaResult<Option<Certificate>> {
    if endpoint.server_certificate.is_null_or_empty() {
        return Ok(None);
    }
    Ok(Some(Certificate::from_der(endpoint.server_certificate.as_bytes())?))
}

fn expect_results<T>(service: &'static str, results: Option<Vec<T>>, expected: usize) -> UaResult<Vec<T>> {
    let results = results.unwrap_or_default();
    if results.len() != expected {
        return Err(unexpected(format!(
            "{service} returned {} results for {expected} operations",
            results.len()
        )));
    }
    Ok(results)
}

fn unexpected(reason: impl Into<String>) -> UaError {
    SessionError::UnexpectedResponse {
        reason: reason.into(),
    }
    .into()
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

fn duration_from_ms(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::MemoryStore;

    fn session() -> Session {
        let config = ClientConfig::new("opc.tcp://127.0.0.1:1");
        Session::with_store(
            config,
            UserIdentity::anonymous(),
            EndpointSelection::discover("opc.tcp://127.0.0.1:1"),
            TypeRegistry::standard(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_expect_results() {
        assert_eq!(expect_results("Read", Some(vec![1, 2]), 2).unwrap(), vec![1, 2]);
        assert!(expect_results("Read", Some(vec![1]), 2).is_err());
        assert!(expect_results::<u8>("Read", None, 0).unwrap().is_empty());
    }

    #[test]
    fn test_duration_from_ms() {
        assert_eq!(duration_from_ms(1500.0), Duration::from_millis(1500));
        assert_eq!(duration_from_ms(-1.0), Duration::ZERO);
        assert_eq!(duration_from_ms(f64::NAN), Duration::ZERO);
        assert_eq!(millis(Duration::from_secs(u64::MAX)), u32::MAX);
    }

    #[tokio::test]
    async fn test_services_require_active_session() {
        let session = session();
        assert_eq!(session.state(), SessionState::Closed);
        let err = session.read_value(NodeId::numeric(0, 2258)).await.unwrap_err();
        assert!(matches!(err, UaError::Session(SessionError::NotOpen { .. })));
        assert!(session.session_id().is_none());
        assert!(session.channel().is_none());
    }

    #[tokio::test]
    async fn test_close_and_abort_when_closed() {
        let session = session();
        session.close().await.unwrap();
        session.abort();
        session.abort();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_reconnect_requires_active_session() {
        let session = session();
        assert!(session.reconnect().await.is_err());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_open_faults_session() {
        let session = session();
        let mut states = session.subscribe_state();
        assert!(session.open().await.is_err());
        assert_eq!(session.state(), SessionState::Faulted);
        assert_eq!(session.stats().failures(), 1);
        assert!(states.has_changed().unwrap());
        // A faulted session may be opened again.
        assert!(!matches!(
            session.open().await,
            Err(UaError::Session(SessionError::AlreadyOpen))
        ));
    }

    #[tokio::test]
    async fn test_unknown_subscription_rejected_locally() {
        let session = session();
        let err = session
            .create_monitored_items(99, TimestampsToReturn::Both, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UaError::Session(SessionError::UnknownSubscription { subscription_id: 99 })
        ));
    }
}
