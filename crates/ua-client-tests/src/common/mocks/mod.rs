// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock OPC UA Server
//!
//! A small but real OPC UA server for driving the client end to end.
//!
//! ```text
//! TcpListener ──▶ connection task (per socket)
//!                   ├─ HEL/ACK, OPN handshake, token renewal
//!                   ├─ reader: chunks ──▶ ServerState::dispatch
//!                   └─ writer: Outgoing queue ──▶ chunks (reordering hook)
//!
//! ticker ──▶ subscription cycles ──▶ queued Publish requests
//! ```
//!
//! Shared state lives in [`ServerState`]: the address space behind a
//! `RwLock` and sessions plus subscriptions behind one `Mutex`. Code that
//! needs both takes the address space first.
//!
//! [`MockHooks`] let tests inject faults: reordered responses, silence,
//! and service faults.

pub mod address_space;
mod connection;
mod publish;
mod services;
mod state;

pub use address_space::{
    double_array, DemoNodes, Vector, ARRAY_INITIAL, DEMO_NS, HISTORY_SAMPLES, MANY_CHILDREN, MOCK_PRODUCT_NAME,
};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use ua_client::codec::{DataValue, TypeRegistry, Variant};
use ua_client::messages::SubscriptionAcknowledgement;
use ua_client::security::{ApplicationIdentity, Certificate, SecurityMode, SecurityPolicy};
use ua_client::types::{DateTime, NodeId, StatusCode};

use address_space::AddressSpace;
use state::Core;

/// Application URI the mock server announces.
pub const MOCK_SERVER_URI: &str = "urn:mock:ua-server";

// =============================================================================
// MockServerConfig
// =============================================================================

/// Mock server configuration.
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Offered (policy, mode) pairs.
    pub endpoints: Vec<(SecurityPolicy, SecurityMode)>,
    /// Server certificate and key; required for secured endpoints.
    pub identity: Option<ApplicationIdentity>,
    /// Accepted user name and password pairs.
    pub users: HashMap<String, String>,
    /// Lifetime granted to each security token.
    pub token_lifetime: Duration,
    /// Server-side cap on references per Browse result (0 = none).
    pub max_references_per_node: u32,
    /// Server-side cap on values per HistoryRead result (0 = none).
    pub max_history_values: u32,
    /// Fastest publishing interval granted.
    pub min_publishing_interval: Duration,
    /// Publish requests queued per session before BadTooManyPublishRequests.
    pub max_publish_requests: usize,
    /// Application URI.
    pub application_uri: String,
    /// How often the Counter variable increments.
    pub counter_interval: Duration,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        let mut users = HashMap::new();
        users.insert("operator".to_string(), "secret".to_string());
        Self {
            endpoints: vec![(SecurityPolicy::None, SecurityMode::None)],
            identity: None,
            users,
            token_lifetime: Duration::from_secs(60),
            max_references_per_node: 0,
            max_history_values: 0,
            min_publishing_interval: Duration::from_millis(50),
            max_publish_requests: 10,
            application_uri: MOCK_SERVER_URI.to_string(),
            counter_interval: Duration::from_millis(200),
        }
    }
}

impl MockServerConfig {
    /// A server offering only the None policy.
    pub fn insecure() -> Self {
        Self::default()
    }

    /// A server offering every policy with both Sign and SignAndEncrypt.
    pub fn secure(identity: ApplicationIdentity) -> Self {
        let mut endpoints = Vec::new();
        for policy in SecurityPolicy::ALL {
            if policy == SecurityPolicy::None {
                endpoints.push((policy, SecurityMode::None));
            } else {
                endpoints.push((policy, SecurityMode::Sign));
                endpoints.push((policy, SecurityMode::SignAndEncrypt));
            }
        }
        Self {
            endpoints,
            identity: Some(identity),
            ..Self::default()
        }
    }

    /// Replaces the offered endpoints.
    pub fn with_endpoints(mut self, endpoints: Vec<(SecurityPolicy, SecurityMode)>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Accepts another user.
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(user.into(), password.into());
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Caps references per Browse result.
    pub fn with_max_references(mut self, max: u32) -> Self {
        self.max_references_per_node = max;
        self
    }

    /// Caps values per HistoryRead result.
    pub fn with_max_history_values(mut self, max: u32) -> Self {
        self.max_history_values = max;
        self
    }

    /// Caps queued Publish requests per session.
    pub fn with_max_publish_requests(mut self, max: usize) -> Self {
        self.max_publish_requests = max;
        self
    }
}

// =============================================================================
// MockHooks
// =============================================================================

/// Fault injection switches.
#[derive(Debug, Default)]
pub struct MockHooks {
    reverse: AtomicUsize,
    silent: AtomicBool,
    fault: Mutex<Option<StatusCode>>,
}

impl MockHooks {
    /// Holds the next `count` service responses and writes them in reverse order.
    pub fn reverse_next_responses(&self, count: usize) {
        self.reverse.store(count, Ordering::SeqCst);
    }

    pub(crate) fn take_reverse(&self) -> usize {
        self.reverse.swap(0, Ordering::SeqCst)
    }

    /// Stops answering requests (Publish excluded) while set.
    pub fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    /// Whether responses are withheld.
    pub fn is_silent(&self) -> bool {
        self.silent.load(Ordering::SeqCst)
    }

    /// Answers the next session service request with a ServiceFault.
    pub fn fail_next_request(&self, status: StatusCode) {
        *self.fault.lock() = Some(status);
    }

    pub(crate) fn take_fault(&self) -> Option<StatusCode> {
        self.fault.lock().take()
    }
}

// =============================================================================
// ServerStats
// =============================================================================

/// Counters observed by the mock server.
#[derive(Debug, Default)]
pub struct ServerStats {
    connections: AtomicU64,
    channels_opened: AtomicU64,
    renewals: AtomicU64,
    sessions_created: AtomicU64,
    activations: AtomicU64,
    sessions_closed: AtomicU64,
    publish_requests: AtomicU64,
    acknowledgements: Mutex<Vec<SubscriptionAcknowledgement>>,
    requests: Mutex<HashMap<&'static str, u64>>,
}

impl ServerStats {
    /// Accepted TCP connections.
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Secure channels opened.
    pub fn channels_opened(&self) -> u64 {
        self.channels_opened.load(Ordering::Relaxed)
    }

    /// Renew requests served.
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    /// CreateSession calls that succeeded.
    pub fn sessions_created(&self) -> u64 {
        self.sessions_created.load(Ordering::Relaxed)
    }

    /// ActivateSession calls that succeeded.
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    /// CloseSession calls that succeeded.
    pub fn sessions_closed(&self) -> u64 {
        self.sessions_closed.load(Ordering::Relaxed)
    }

    /// Publish requests received.
    pub fn publish_requests(&self) -> u64 {
        self.publish_requests.load(Ordering::Relaxed)
    }

    /// Every acknowledgement received, in arrival order.
    pub fn acknowledgements(&self) -> Vec<SubscriptionAcknowledgement> {
        self.acknowledgements.lock().clone()
    }

    /// Decoded requests of one service (by name, e.g. `"Read"`).
    pub fn requests(&self, service: &str) -> u64 {
        self.requests.lock().get(service).copied().unwrap_or(0)
    }

    pub(crate) fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_channel(&self) {
        self.channels_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_renewal(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish(&self, acknowledgements: &[SubscriptionAcknowledgement]) {
        self.publish_requests.fetch_add(1, Ordering::Relaxed);
        self.acknowledgements
            .lock()
            .extend(acknowledgements.iter().cloned());
    }

    pub(crate) fn record_request(&self, service: &'static str) {
        *self.requests.lock().entry(service).or_insert(0) += 1;
    }
}

// =============================================================================
// ServerState
// =============================================================================

/// State shared by connection tasks and the ticker.
pub(crate) struct ServerState {
    pub config: MockServerConfig,
    pub endpoint_url: String,
    pub registry: TypeRegistry,
    pub space: RwLock<AddressSpace>,
    pub core: Mutex<Core>,
    pub hooks: MockHooks,
    pub stats: ServerStats,
    pub generation: watch::Sender<u64>,
    next_channel_id: AtomicU32,
}

impl ServerState {
    pub(crate) fn offers_policy(&self, policy: SecurityPolicy) -> bool {
        self.config.endpoints.iter().any(|(p, _)| *p == policy)
    }

    pub(crate) fn offers(&self, policy: SecurityPolicy, mode: SecurityMode) -> bool {
        self.config
            .endpoints
            .iter()
            .any(|(p, m)| *p == policy && *m == mode)
    }

    pub(crate) fn next_channel_id(&self) -> u32 {
        self.next_channel_id.fetch_add(1, Ordering::Relaxed)
    }
}

// =============================================================================
// MockServer
// =============================================================================

/// Handle to a running mock server. Dropping it stops the server and closes
/// every connection.
pub struct MockServer {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl MockServer {
    /// Binds a loopback port and starts serving.
    pub async fn start(config: MockServerConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;
        let endpoint_url = format!("opc.tcp://127.0.0.1:{}/mock", local_addr.port());

        let mut registry = TypeRegistry::standard();
        registry.register::<Vector>();
        let (generation, _) = watch::channel(0);

        let state = Arc::new(ServerState {
            config,
            endpoint_url,
            registry,
            space: RwLock::new(AddressSpace::demo()),
            core: Mutex::new(Core::default()),
            hooks: MockHooks::default(),
            stats: ServerStats::default(),
            generation,
            next_channel_id: AtomicU32::new(1),
        });

        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&state)));
        let ticker = tokio::spawn(publish::run_ticker(Arc::clone(&state)));
        tracing::info!(url = %state.endpoint_url, "Mock server listening");

        Ok(Self {
            state,
            local_addr,
            tasks: vec![accept, ticker],
        })
    }

    /// `opc.tcp://127.0.0.1:<port>/mock`
    pub fn endpoint_url(&self) -> &str {
        &self.state.endpoint_url
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fault injection switches.
    pub fn hooks(&self) -> &MockHooks {
        &self.state.hooks
    }

    /// Server-side counters.
    pub fn stats(&self) -> &ServerStats {
        &self.state.stats
    }

    /// Server application certificate, when secured.
    pub fn server_certificate(&self) -> Option<&Certificate> {
        self.state.config.identity.as_ref().map(|i| &i.certificate)
    }

    /// Overwrites a variable's value.
    pub fn set_value(&self, node_id: &NodeId, value: impl Into<Variant>) -> bool {
        self.state.space.write().set_value(node_id, value.into())
    }

    /// Current value of a variable, as a Read would return it.
    pub fn value(&self, node_id: &NodeId) -> DataValue {
        self.state.space.read().sample(node_id)
    }

    /// Timestamp of the first sample in `Demo.History`; samples follow one
    /// second apart.
    pub fn history_start(&self) -> DateTime {
        self.state.space.read().history_start()
    }

    /// Queues an event from `source` for every event item watching it.
    /// Returns the number of items that received it.
    pub fn fire_event(&self, source: &NodeId, message: &str, severity: u16) -> usize {
        let source_name = self
            .state
            .space
            .read()
            .get(source)
            .map(|node| node.browse_name.name.clone())
            .unwrap_or_default();
        let event = publish::RaisedEvent::new(source.clone(), source_name, message, severity);
        let mut core = self.state.core.lock();
        core.subscriptions
            .values_mut()
            .map(|subscription| subscription.push_event(&event))
            .sum()
    }

    /// Forgets every session as if the server restarted; queued publishes
    /// receive BadSessionIdInvalid.
    pub fn invalidate_sessions(&self) -> usize {
        let mut core = self.state.core.lock();
        let count = core.invalidate_all();
        tracing::info!(count, "Mock server invalidated sessions");
        count
    }

    /// Closes every open connection. Sessions survive.
    pub fn drop_connections(&self) {
        self.state.generation.send_modify(|g| *g += 1);
    }

    /// Ends a subscription with a BadTimeout status change.
    pub fn expire_subscription(&self, subscription_id: u32) -> bool {
        let mut core = self.state.core.lock();
        match core.subscriptions.get_mut(&subscription_id) {
            Some(subscription) => {
                subscription.close_with(StatusCode::BAD_TIMEOUT);
                publish::deliver(&mut core);
                true
            }
            None => false,
        }
    }

    /// Live sessions.
    pub fn session_count(&self) -> usize {
        self.state.core.lock().sessions.len()
    }

    /// User names of activated sessions (`None` for anonymous or certificate users).
    pub fn activated_users(&self) -> Vec<Option<String>> {
        self.state
            .core
            .lock()
            .sessions
            .values()
            .filter(|s| s.activated)
            .map(|s| s.user.clone())
            .collect()
    }

    /// Live subscription ids.
    pub fn subscription_ids(&self) -> Vec<u32> {
        self.state.core.lock().subscriptions.keys().copied().collect()
    }

    /// Monitored items in one subscription.
    pub fn monitored_item_count(&self, subscription_id: u32) -> usize {
        self.state
            .core
            .lock()
            .subscriptions
            .get(&subscription_id)
            .map(|s| s.items.len())
            .unwrap_or(0)
    }

    /// Stops the server.
    pub async fn shutdown(self) {
        drop(self);
        tokio::task::yield_now().await;
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.drop_connections();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                state.stats.record_connection();
                let _ = stream.set_nodelay(true);
                tokio::spawn(connection::serve(Arc::clone(&state), stream, peer));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Mock server accept failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::fixtures::CertificateFixtures;

    #[test]
    fn test_secure_config_offers_every_policy() {
        let config = MockServerConfig::secure(CertificateFixtures::server_identity());
        assert_eq!(config.endpoints.len(), 11);
        assert!(config.endpoints.contains(&(SecurityPolicy::None, SecurityMode::None)));
        assert!(!config.endpoints.contains(&(SecurityPolicy::Basic256Sha256, SecurityMode::None)));
        assert_eq!(MockServerConfig::insecure().endpoints.len(), 1);
    }

    #[test]
    fn test_hooks_are_one_shot() {
        let hooks = MockHooks::default();
        hooks.fail_next_request(StatusCode::BAD_INTERNAL_ERROR);
        assert_eq!(hooks.take_fault(), Some(StatusCode::BAD_INTERNAL_ERROR));
        assert_eq!(hooks.take_fault(), None);

        hooks.reverse_next_responses(3);
        assert_eq!(hooks.take_reverse(), 3);
        assert_eq!(hooks.take_reverse(), 0);
    }

    #[test]
    fn test_stats_count_requests_by_service() {
        let stats = ServerStats::default();
        stats.record_request("Read");
        stats.record_request("Read");
        stats.record_request("Browse");
        assert_eq!(stats.requests("Read"), 2);
        assert_eq!(stats.requests("Browse"), 1);
        assert_eq!(stats.requests("Call"), 0);
    }
}
