// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The client side of a secure channel.
//!
//! # Architecture
//!
//! ```text
//!  send()/send_request()             reader task                 renew task
//!        │                                │                          │
//!        ▼                                ▼                          ▼
//!  ┌───────────┐   chunks    ┌──────────────────────┐        sleep 75% of lifetime
//!  │  writer   │────────────▶│        socket        │        then OPN(Renew)
//!  │ (mutex +  │             └──────────────────────┘
//!  │ sequence) │                        │ chunks
//!  └───────────┘                        ▼
//!        │                 verify/decrypt ─▶ reassemble ─▶ PendingRequests
//!        └── register slot ─────────────────────────────────────▲
//! ```
//!
//! Writes are serialized through one async mutex that also owns the send
//! sequence counter, so sequence numbers appear on the wire in order. A
//! single reader task demultiplexes responses by request id. Any transport,
//! protocol or security failure faults the channel and fails every pending
//! request with the same [`ChannelAbortedError`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::chunk::{Assembled, ChannelSecurity, ChunkAssembler, DecodedChunk, ReceiveSequence, SendSequence};
use super::correlation::{Completion, PendingRequests};
use super::transport::{
    self, read_chunk, BoxStream, ChunkType, EndpointUrl, ErrorMessage, MessageType,
    NegotiatedLimits, RawChunk, PROTOCOL_VERSION,
};
use crate::codec::{decode_from_slice, TypeRegistry};
use crate::config::{ClientConfig, TransportLimits};
use crate::error::{ChannelAbortedError, HandshakeError, TimeoutError, UaError, UaResult};
use crate::messages::{
    encode_request, ChannelSecurityToken, CloseSecureChannelRequest, OpenSecureChannelRequest,
    OpenSecureChannelResponse, RequestHeader, ResponseBody, ResponseHeader, SecurityTokenRequestType,
    ServiceRequest, ServiceResponse,
};
use crate::security::crypto::random_nonce;
use crate::security::{ApplicationIdentity, Certificate, SecurityMode, SecurityPolicy};
use crate::types::{ByteString, NodeId, StatusCode};

// =============================================================================
// ChannelState
// =============================================================================

/// Lifecycle of a secure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Not connected.
    #[default]
    Closed,
    /// Hello or OpenSecureChannel in progress.
    Opening,
    /// Token established, requests accepted.
    Open,
    /// A renewal is in flight; requests are still accepted.
    Renewing,
    /// CloseSecureChannel sent.
    Closing,
    /// Torn down after a failure. Terminal.
    Faulted,
}

impl ChannelState {
    /// Returns `true` if requests can be sent.
    #[inline]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Open | Self::Renewing)
    }

    /// Returns `true` for states that never change again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Opening => write!(f, "Opening"),
            Self::Open => write!(f, "Open"),
            Self::Renewing => write!(f, "Renewing"),
            Self::Closing => write!(f, "Closing"),
            Self::Faulted => write!(f, "Faulted"),
        }
    }
}

// =============================================================================
// ChannelOptions
// =============================================================================

/// Settings for one channel, usually derived from [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Endpoint to connect to.
    pub endpoint_url: EndpointUrl,
    /// Buffer sizes offered in Hello.
    pub limits: TransportLimits,
    /// TCP connect deadline.
    pub connect_timeout: Duration,
    /// Deadline for Hello plus OpenSecureChannel.
    pub handshake_timeout: Duration,
    /// Default per-request deadline.
    pub request_timeout: Duration,
    /// Deadline for CloseSecureChannel.
    pub close_timeout: Duration,
    /// Requested token lifetime.
    pub requested_lifetime: Duration,
}

impl ChannelOptions {
    /// Options for `endpoint_url` using the timeouts in `config`.
    pub fn from_config(config: &ClientConfig, endpoint_url: &str) -> UaResult<Self> {
        Ok(Self {
            endpoint_url: EndpointUrl::parse(endpoint_url)?,
            limits: config.transport.clone(),
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
            request_timeout: config.request_timeout,
            close_timeout: config.close_timeout,
            requested_lifetime: config.channel_lifetime,
        })
    }

    /// Options with default timeouts.
    pub fn new(endpoint_url: EndpointUrl) -> Self {
        let config = ClientConfig::default();
        Self {
            endpoint_url,
            limits: config.transport,
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
            request_timeout: config.request_timeout,
            close_timeout: config.close_timeout,
            requested_lifetime: config.channel_lifetime,
        }
    }

    /// Overrides the requested token lifetime.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.requested_lifetime = lifetime;
        self
    }

    /// Overrides the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// =============================================================================
// ChannelStats
// =============================================================================

/// Counters for one channel.
#[derive(Debug, Default)]
pub struct ChannelStats {
    requests: AtomicU64,
    responses: AtomicU64,
    chunks_sent: AtomicU64,
    chunks_received: AtomicU64,
    renewals: AtomicU64,
    timeouts: AtomicU64,
}

impl ChannelStats {
    /// Requests written.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Responses correlated to a waiting request.
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Relaxed)
    }

    /// Chunks written.
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent.load(Ordering::Relaxed)
    }

    /// Chunks read.
    pub fn chunks_received(&self) -> u64 {
        self.chunks_received.load(Ordering::Relaxed)
    }

    /// Completed token renewals.
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    /// Requests that timed out.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Inner
// =============================================================================

struct Writer {
    stream: WriteHalf<BoxStream>,
    sequence: SendSequence,
}

struct Inner {
    options: ChannelOptions,
    limits: NegotiatedLimits,
    registry: Arc<TypeRegistry>,
    security: Mutex<ChannelSecurity>,
    writer: tokio::sync::Mutex<Option<Writer>>,
    pending: PendingRequests,
    next_request_id: AtomicU32,
    token: RwLock<ChannelSecurityToken>,
    renewal: Mutex<Option<(u32, Vec<u8>)>>,
    state: watch::Sender<ChannelState>,
    failure: Mutex<Option<ChannelAbortedError>>,
    stats: ChannelStats,
}

impl Inner {
    fn channel_id(&self) -> u32 {
        self.token.read().channel_id
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(
                channel_id = self.channel_id(),
                from = %previous,
                to = %state,
                "Channel state changed"
            );
        }
    }

    fn next_request_id(&self) -> u32 {
        loop {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Error handed to requests that find the channel gone.
    fn closed_error(&self) -> ChannelAbortedError {
        self.failure
            .lock()
            .clone()
            .unwrap_or(ChannelAbortedError::Closed)
    }

    fn ensure_usable(&self) -> Result<(), ChannelAbortedError> {
        let state = self.state();
        if state.is_usable() {
            return Ok(());
        }
        if state == ChannelState::Faulted {
            return Err(self.closed_error());
        }
        Err(ChannelAbortedError::NotOpen {
            state: state.to_string(),
        })
    }

    /// Tears the channel down after a failure. Later calls are no-ops.
    fn fault(&self, error: ChannelAbortedError) {
        let state = self.state();
        if matches!(state, ChannelState::Closing | ChannelState::Closed) {
            self.pending.fail_all(&ChannelAbortedError::Closed);
            return;
        }
        if state == ChannelState::Faulted {
            return;
        }
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(error.clone());
            }
        }
        self.set_state(ChannelState::Faulted);
        let failed = self.pending.fail_all(&error);
        tracing::warn!(
            channel_id = self.channel_id(),
            pending = failed,
            error = %error,
            "Secure channel faulted"
        );
    }

    /// Builds and writes one message under the writer lock.
    ///
    /// The write is bounded by `deadline` and gives up as soon as the
    /// channel turns terminal. A message that is not written in full faults
    /// the channel, including when the calling future is dropped midway.
    async fn write_chunks<F>(&self, deadline: Duration, build: F) -> Result<usize, ChannelAbortedError>
    where
        F: FnOnce(&mut SendSequence) -> Result<Vec<Vec<u8>>, ChannelAbortedError>,
    {
        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = until_terminal(self.state.subscribe()) => return Err(self.closed_error()),
        };
        let Some(writer) = guard.as_mut() else {
            return Err(self.closed_error());
        };
        let chunks = build(&mut writer.sequence)?;

        let mut in_flight = WriteInFlight {
            inner: self,
            writer: Some(guard),
        };
        let outcome = tokio::select! {
            written = tokio::time::timeout(deadline, in_flight.write_all(&chunks)) => match written {
                Ok(result) => result.map_err(ChannelAbortedError::from),
                Err(_) => Err(ChannelAbortedError::incomplete_write(format!(
                    "write did not finish within {} ms",
                    deadline.as_millis()
                ))),
            },
            _ = until_terminal(self.state.subscribe()) => Err(self.closed_error()),
        };
        match outcome {
            Ok(()) => {
                in_flight.complete();
                self.stats
                    .chunks_sent
                    .fetch_add(chunks.len() as u64, Ordering::Relaxed);
                Ok(chunks.len())
            }
            Err(error) => {
                in_flight.abandon(error.clone());
                Err(error)
            }
        }
    }

    async fn write_symmetric(
        &self,
        message_type: MessageType,
        request_id: u32,
        body: &[u8],
        deadline: Duration,
    ) -> Result<usize, ChannelAbortedError> {
        let limits = self.limits;
        if limits.max_send_message_size > 0 && body.len() > limits.max_send_message_size as usize {
            return Err(ChannelAbortedError::protocol(format!(
                "message of {} bytes exceeds the server limit of {}",
                body.len(),
                limits.max_send_message_size
            )));
        }
        let channel_id = self.channel_id();
        self.write_chunks(deadline, |sequence| {
            let chunks = self.security.lock().encode_symmetric(
                message_type,
                channel_id,
                request_id,
                body,
                limits.send_buffer_size,
                &mut || sequence.next(),
            )?;
            if limits.max_send_chunk_count > 0 && chunks.len() > limits.max_send_chunk_count as usize {
                return Err(ChannelAbortedError::protocol(format!(
                    "message needs {} chunks, the server accepts {}",
                    chunks.len(),
                    limits.max_send_chunk_count
                )));
            }
            Ok(chunks)
        })
        .await
    }

    async fn write_asymmetric(
        &self,
        request_id: u32,
        body: &[u8],
        deadline: Duration,
    ) -> Result<usize, ChannelAbortedError> {
        let channel_id = self.channel_id();
        let send_buffer = self.limits.send_buffer_size;
        self.write_chunks(deadline, |sequence| {
            let chunk = self.security.lock().encode_asymmetric(
                channel_id,
                sequence.next(),
                request_id,
                body,
                send_buffer,
            )?;
            Ok(vec![chunk])
        })
        .await
    }

    // =========================================================================
    // Receive path
    // =========================================================================

    fn handle_chunk(
        &self,
        chunk: RawChunk,
        receive: &mut ReceiveSequence,
        assembler: &mut ChunkAssembler,
    ) -> Result<(), ChannelAbortedError> {
        self.stats.chunks_received.fetch_add(1, Ordering::Relaxed);
        let decoded = match chunk.header.message_type {
            MessageType::Error => {
                let message: ErrorMessage =
                    decode_from_slice(chunk.payload(), &TypeRegistry::empty())
                        .map_err(|e| ChannelAbortedError::protocol(e.to_string()))?;
                return Err(ChannelAbortedError::ServerError {
                    status: message.error,
                    reason: message.reason,
                });
            }
            MessageType::OpenSecureChannel => self.security.lock().decode_asymmetric(&chunk)?,
            MessageType::Message | MessageType::CloseSecureChannel => {
                self.security.lock().decode_symmetric(&chunk)?
            }
            other => {
                return Err(ChannelAbortedError::protocol(format!(
                    "unexpected {other} message on an open channel"
                )))
            }
        };
        self.accept(decoded, receive, assembler)
    }

    fn accept(
        &self,
        chunk: DecodedChunk,
        receive: &mut ReceiveSequence,
        assembler: &mut ChunkAssembler,
    ) -> Result<(), ChannelAbortedError> {
        let channel_id = self.channel_id();
        if chunk.channel_id != channel_id {
            return Err(ChannelAbortedError::protocol(format!(
                "chunk for channel {} on channel {channel_id}",
                chunk.channel_id
            )));
        }
        receive.check(chunk.sequence.sequence_number)?;
        let is_open = chunk.message_type == MessageType::OpenSecureChannel;

        match assembler.push(chunk) {
            Assembled::Pending => Ok(()),
            Assembled::Complete { request_id, body } => {
                if is_open {
                    self.on_open_response(request_id, &body)?;
                }
                if self.pending.complete(request_id, Ok(Bytes::from(body))) {
                    self.stats.responses.fetch_add(1, Ordering::Relaxed);
                } else {
                    tracing::debug!(channel_id, request_id, "Discarding response with no waiter");
                }
                Ok(())
            }
            Assembled::Aborted {
                request_id,
                status,
                reason,
            } => {
                let service = self.pending.service_of(request_id).unwrap_or("Unknown");
                tracing::warn!(channel_id, request_id, %status, reason = %reason, "Server aborted response");
                self.pending
                    .complete(request_id, Err(UaError::service_fault(service, status)));
                Ok(())
            }
        }
    }

    /// Installs the renewed token as soon as its response is read, before
    /// any message secured with it can arrive.
    fn on_open_response(&self, request_id: u32, body: &[u8]) -> Result<(), ChannelAbortedError> {
        let client_nonce = {
            let mut renewal = self.renewal.lock();
            match renewal.as_ref() {
                Some((id, _)) if *id == request_id => renewal.take().map(|(_, nonce)| nonce),
                _ => None,
            }
        };
        let Some(client_nonce) = client_nonce else {
            return Ok(());
        };
        let Ok(ResponseBody::Response(response)) =
            ResponseBody::<OpenSecureChannelResponse>::decode(body, &self.registry)
        else {
            return Ok(());
        };
        if !response.response_header.service_result.is_good() {
            return Ok(());
        }
        let mut security = self.security.lock();
        let token = validate_open_response(security.policy(), Some(self.channel_id()), &response)
            .map_err(|e| ChannelAbortedError::protocol(e.to_string()))?;
        security
            .install_token(token.token_id, &client_nonce, response.server_nonce.as_bytes())
            .map_err(|e| ChannelAbortedError::security(e.to_string()))?;
        drop(security);
        tracing::debug!(channel_id = token.channel_id, token_id = token.token_id, "Installed renewed token");
        *self.token.write() = token;
        Ok(())
    }

    // =========================================================================
    // Renewal
    // =========================================================================

    async fn renew(self: &Arc<Self>) -> UaResult<()> {
        if self.state() != ChannelState::Open {
            return Err(ChannelAbortedError::NotOpen {
                state: self.state().to_string(),
            }
            .into());
        }
        self.set_state(ChannelState::Renewing);
        let result = self.renew_inner().await;
        if self.state() == ChannelState::Renewing {
            self.set_state(ChannelState::Open);
        }
        result
    }

    async fn renew_inner(self: &Arc<Self>) -> UaResult<()> {
        let (policy, mode) = {
            let security = self.security.lock();
            (security.policy(), security.mode())
        };
        let client_nonce = client_nonce(policy);
        let request_id = self.next_request_id();
        let lifetime = Duration::from_millis(u64::from(self.token.read().revised_lifetime));
        let timeout = self.options.handshake_timeout.min(lifetime / 4);

        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::new(NodeId::null(), request_id, timeout.as_millis() as u32),
            client_protocol_version: PROTOCOL_VERSION,
            request_type: SecurityTokenRequestType::Renew,
            security_mode: mode.to_message_mode(),
            client_nonce: ByteString::from(client_nonce.clone()),
            requested_lifetime: self.options.requested_lifetime.as_millis() as u32,
        };
        let body = encode_request(&request)?;

        *self.renewal.lock() = Some((request_id, client_nonce));
        let pending = PendingResponse::<OpenSecureChannelResponse>::register(
            self,
            request_id,
            OpenSecureChannelRequest::NAME,
            timeout,
        )?;
        self.write_asymmetric(request_id, &body, timeout).await?;
        let response = pending.response().await?;

        let token = &response.security_token;
        self.stats.renewals.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            channel_id = token.channel_id,
            token_id = token.token_id,
            lifetime_ms = token.revised_lifetime,
            "Security token renewed"
        );
        Ok(())
    }
}

fn client_nonce(policy: SecurityPolicy) -> Vec<u8> {
    if policy == SecurityPolicy::None {
        Vec::new()
    } else {
        random_nonce(policy.nonce_length())
    }
}

/// Checks an OpenSecureChannel response and extracts its token.
fn validate_open_response(
    policy: SecurityPolicy,
    channel_id: Option<u32>,
    response: &OpenSecureChannelResponse,
) -> Result<ChannelSecurityToken, HandshakeError> {
    let token = &response.security_token;
    if let Some(expected) = channel_id {
        if token.channel_id != expected {
            return Err(HandshakeError::invalid_response(format!(
                "token for channel {} on channel {expected}",
                token.channel_id
            )));
        }
    }
    if token.channel_id == 0 {
        return Err(HandshakeError::invalid_response("server assigned channel id 0"));
    }
    if token.revised_lifetime == 0 {
        return Err(HandshakeError::invalid_response("token lifetime is zero"));
    }
    if policy != SecurityPolicy::None && response.server_nonce.len() != policy.nonce_length() {
        return Err(HandshakeError::invalid_response(format!(
            "server nonce has {} bytes, {} expects {}",
            response.server_nonce.len(),
            policy.name(),
            policy.nonce_length()
        )));
    }
    Ok(token.clone())
}

/// Maps a response header onto the error model: session-level codes become
/// [`UaError::SessionInvalid`], any other bad result a service fault.
pub fn check_service_result(service: &'static str, header: &ResponseHeader) -> UaResult<()> {
    let status = header.service_result;
    if status.is_session_invalid() {
        return Err(UaError::session_invalid(status));
    }
    if status.is_bad() {
        return Err(UaError::service_fault(service, status));
    }
    Ok(())
}

/// Resolves once the channel reaches a terminal state.
async fn until_terminal(mut state: watch::Receiver<ChannelState>) {
    let _ = state.wait_for(ChannelState::is_terminal).await;
}

/// A message being written. Unless [`complete`](Self::complete) is called,
/// dropping it discards the writer and faults the channel: the peer would
/// otherwise parse the next message from the middle of this one.
struct WriteInFlight<'a> {
    inner: &'a Inner,
    writer: Option<tokio::sync::MutexGuard<'a, Option<Writer>>>,
}

impl WriteInFlight<'_> {
    async fn write_all(&mut self, chunks: &[Vec<u8>]) -> std::io::Result<()> {
        let Some(Some(writer)) = self.writer.as_deref_mut() else {
            return Err(std::io::ErrorKind::NotConnected.into());
        };
        for chunk in chunks {
            writer.stream.write_all(chunk).await?;
        }
        writer.stream.flush().await
    }

    fn complete(mut self) {
        self.writer = None;
    }

    fn abandon(mut self, error: ChannelAbortedError) {
        if let Some(mut writer) = self.writer.take() {
            writer.take();
        }
        self.inner.fault(error);
    }
}

impl Drop for WriteInFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            writer.take();
            drop(writer);
            self.inner
                .fault(ChannelAbortedError::incomplete_write("write cancelled"));
        }
    }
}

// =============================================================================
// PendingResponse
// =============================================================================

/// A request written to the channel whose response has not been awaited yet.
///
/// Dropping it releases the correlation slot; a late response is discarded.
pub struct PendingResponse<T> {
    inner: Arc<Inner>,
    request_id: u32,
    service: &'static str,
    timeout: Duration,
    receiver: Option<oneshot::Receiver<Completion>>,
    _response: PhantomData<fn() -> T>,
}

impl<T: ServiceResponse> PendingResponse<T> {
    fn register(
        inner: &Arc<Inner>,
        request_id: u32,
        service: &'static str,
        timeout: Duration,
    ) -> Result<Self, ChannelAbortedError> {
        let receiver = inner.pending.register(request_id, service)?;
        Ok(Self {
            inner: Arc::clone(inner),
            request_id,
            service,
            timeout,
            receiver: Some(receiver),
            _response: PhantomData,
        })
    }

    /// Request id (also the request handle).
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// Waits for the raw response body.
    pub async fn body(mut self) -> UaResult<Bytes> {
        let Some(receiver) = self.receiver.take() else {
            return Err(self.inner.closed_error().into());
        };
        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.inner.closed_error().into()),
            Err(_) => {
                self.inner.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    channel_id = self.inner.channel_id(),
                    request_handle = self.request_id,
                    service = self.service,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(UaError::request_timeout(self.service, self.request_id, self.timeout))
            }
        }
    }

    /// Waits for and decodes the response, mapping a bad service result or
    /// ServiceFault onto an error.
    pub async fn response(self) -> UaResult<T> {
        let service = self.service;
        let registry = Arc::clone(&self.inner.registry);
        let body = self.body().await?;
        match ResponseBody::<T>::decode(&body, &registry)? {
            ResponseBody::Response(response) => {
                check_service_result(service, response.response_header())?;
                Ok(response)
            }
            ResponseBody::Fault(fault) => {
                check_service_result(service, &fault.response_header)?;
                Err(UaError::service_fault(service, StatusCode::BAD_UNEXPECTED_ERROR))
            }
        }
    }
}

impl<T> Drop for PendingResponse<T> {
    fn drop(&mut self) {
        self.inner.pending.remove(self.request_id);
    }
}

impl<T> fmt::Debug for PendingResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("request_id", &self.request_id)
            .field("service", &self.service)
            .finish()
    }
}

// =============================================================================
// SecureChannel
// =============================================================================

/// An open secure channel.
pub struct SecureChannel {
    inner: Arc<Inner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SecureChannel {
    /// Connects over TCP and opens the channel.
    pub async fn open(
        options: ChannelOptions,
        security: ChannelSecurity,
        registry: Arc<TypeRegistry>,
    ) -> Result<Self, HandshakeError> {
        let stream = transport::connect(&options.endpoint_url, options.connect_timeout).await?;
        Self::open_with_stream(Box::new(stream), options, security, registry).await
    }

    /// Opens the channel over an already connected stream.
    pub async fn open_with_stream(
        mut stream: BoxStream,
        options: ChannelOptions,
        mut security: ChannelSecurity,
        registry: Arc<TypeRegistry>,
    ) -> Result<Self, HandshakeError> {
        let endpoint = options.endpoint_url.to_string();
        let policy = security.policy();
        let mode = security.mode();
        tracing::info!(
            endpoint = %endpoint,
            policy = policy.name(),
            mode = %mode,
            "Opening secure channel"
        );

        let handshake = Self::handshake(&mut stream, &options, &mut security, &registry);
        let (limits, token, sequence, receive) =
            tokio::time::timeout(options.handshake_timeout, handshake)
                .await
                .map_err(|_| HandshakeError::TimedOut {
                    endpoint: endpoint.clone(),
                    duration: options.handshake_timeout,
                })??;

        let (read_half, write_half) = tokio::io::split(stream);
        let (state, _) = watch::channel(ChannelState::Open);
        let inner = Arc::new(Inner {
            options,
            limits,
            registry,
            security: Mutex::new(security),
            writer: tokio::sync::Mutex::new(Some(Writer {
                stream: write_half,
                sequence,
            })),
            pending: PendingRequests::new(),
            next_request_id: AtomicU32::new(2),
            token: RwLock::new(token.clone()),
            renewal: Mutex::new(None),
            state,
            failure: Mutex::new(None),
            stats: ChannelStats::default(),
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&inner), read_half, receive));
        let renewer = tokio::spawn(renew_loop(Arc::downgrade(&inner)));

        tracing::info!(
            endpoint = %endpoint,
            channel_id = token.channel_id,
            token_id = token.token_id,
            lifetime_ms = token.revised_lifetime,
            "Secure channel open"
        );
        Ok(Self {
            inner,
            tasks: Mutex::new(vec![reader, renewer]),
        })
    }

    async fn handshake(
        stream: &mut BoxStream,
        options: &ChannelOptions,
        security: &mut ChannelSecurity,
        registry: &TypeRegistry,
    ) -> Result<(NegotiatedLimits, ChannelSecurityToken, SendSequence, ReceiveSequence), HandshakeError>
    {
        let limits = transport::hello(stream, &options.endpoint_url, &options.limits).await?;
        let channel_error = HandshakeError::Channel;

        let nonce = client_nonce(security.policy());
        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::new(
                NodeId::null(),
                1,
                options.handshake_timeout.as_millis() as u32,
            ),
            client_protocol_version: PROTOCOL_VERSION,
            request_type: SecurityTokenRequestType::Issue,
            security_mode: security.mode().to_message_mode(),
            client_nonce: ByteString::from(nonce.clone()),
            requested_lifetime: options.requested_lifetime.as_millis() as u32,
        };
        let body = encode_request(&request).map_err(|e| HandshakeError::invalid_response(e.to_string()))?;

        let mut sequence = SendSequence::new();
        let chunk = security
            .encode_asymmetric(0, sequence.next(), 1, &body, limits.send_buffer_size)
            .map_err(channel_error)?;
        stream
            .write_all(&chunk)
            .await
            .map_err(|e| channel_error(e.into()))?;
        stream.flush().await.map_err(|e| channel_error(e.into()))?;

        let raw = read_chunk(stream, limits.receive_buffer_size)
            .await
            .map_err(channel_error)?;
        match raw.header.message_type {
            MessageType::OpenSecureChannel => {}
            MessageType::Error => {
                let message: ErrorMessage = decode_from_slice(raw.payload(), registry)
                    .map_err(|e| HandshakeError::invalid_response(e.to_string()))?;
                return Err(HandshakeError::Rejected {
                    status: message.error,
                    reason: message.reason,
                });
            }
            other => {
                return Err(HandshakeError::UnexpectedMessage {
                    expected: "OPN",
                    actual: other.to_string(),
                })
            }
        }
        let decoded = security.decode_asymmetric(&raw).map_err(channel_error)?;
        if decoded.chunk_type != ChunkType::Final || decoded.sequence.request_id != 1 {
            return Err(HandshakeError::invalid_response(
                "OpenSecureChannel response must be a single chunk answering request 1",
            ));
        }
        let mut receive = ReceiveSequence::default();
        receive
            .check(decoded.sequence.sequence_number)
            .map_err(channel_error)?;

        let response = match ResponseBody::<OpenSecureChannelResponse>::decode(&decoded.body, registry)
            .map_err(|e| HandshakeError::invalid_response(e.to_string()))?
        {
            ResponseBody::Response(response) => response,
            ResponseBody::Fault(fault) => {
                return Err(HandshakeError::Rejected {
                    status: fault.response_header.service_result,
                    reason: "OpenSecureChannel fault".to_string(),
                })
            }
        };
        let status = response.response_header.service_result;
        if status.is_bad() {
            return Err(HandshakeError::Rejected {
                status,
                reason: "OpenSecureChannel failed".to_string(),
            });
        }
        let token = validate_open_response(security.policy(), None, &response)?;
        if token.channel_id != decoded.channel_id && decoded.channel_id != 0 {
            return Err(HandshakeError::invalid_response(format!(
                "token for channel {} arrived on channel {}",
                token.channel_id, decoded.channel_id
            )));
        }
        security
            .install_token(token.token_id, &nonce, response.server_nonce.as_bytes())
            .map_err(|e| HandshakeError::Channel(ChannelAbortedError::security(e.to_string())))?;
        Ok((limits, token, sequence, receive))
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Writes `request` and returns a handle for its response.
    ///
    /// The request handle is overwritten with the channel-unique request id.
    /// The response deadline is the request's timeout hint, or the channel
    /// default when the hint is 0.
    pub async fn send<R: ServiceRequest>(&self, mut request: R) -> UaResult<PendingResponse<R::Response>> {
        self.inner.ensure_usable()?;
        let request_id = self.inner.next_request_id();
        let header = request.request_header_mut();
        header.request_handle = request_id;
        let timeout = match header.timeout_hint {
            0 => self.inner.options.request_timeout,
            ms => Duration::from_millis(u64::from(ms)),
        };
        let body = encode_request(&request)?;

        let pending = PendingResponse::register(&self.inner, request_id, R::NAME, timeout)?;
        self.inner
            .write_symmetric(MessageType::Message, request_id, &body, timeout)
            .await?;
        self.inner.stats.requests.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            channel_id = self.inner.channel_id(),
            request_handle = request_id,
            service = R::NAME,
            bytes = body.len(),
            "Request sent"
        );
        Ok(pending)
    }

    /// Sends `request` and waits for its response.
    pub async fn send_request<R: ServiceRequest>(&self, request: R) -> UaResult<R::Response> {
        self.send(request).await?.response().await
    }

    /// Renews the security token now.
    pub async fn renew(&self) -> UaResult<()> {
        self.inner.renew().await
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Sends CloseSecureChannel and releases the connection.
    ///
    /// The close is bounded by the close timeout; when it elapses the
    /// channel is torn down locally and a timeout error is returned.
    pub async fn close(&self) -> UaResult<()> {
        let state = self.inner.state();
        if state.is_terminal() || state == ChannelState::Closing {
            return Ok(());
        }
        self.inner.set_state(ChannelState::Closing);
        let channel_id = self.inner.channel_id();
        tracing::info!(channel_id, "Closing secure channel");

        let inner = Arc::clone(&self.inner);
        let timeout = self.inner.options.close_timeout;
        let send_close = async move {
            let request_id = inner.next_request_id();
            let request = CloseSecureChannelRequest {
                request_header: RequestHeader::new(NodeId::null(), request_id, 0),
            };
            let body = encode_request(&request)?;
            inner
                .write_symmetric(MessageType::CloseSecureChannel, request_id, &body, timeout)
                .await?;
            if let Some(mut writer) = inner.writer.lock().await.take() {
                let _ = writer.stream.shutdown().await;
            }
            Ok::<_, UaError>(())
        };
        let result = match tokio::time::timeout(timeout, send_close).await {
            Ok(result) => result,
            Err(_) => Err(TimeoutError::Close { duration: timeout }.into()),
        };

        self.stop_tasks();
        self.inner.pending.fail_all(&ChannelAbortedError::Closed);
        self.inner.set_state(ChannelState::Closed);
        if let Err(e) = &result {
            tracing::warn!(channel_id, error = %e, "Secure channel closed locally");
        } else {
            tracing::info!(channel_id, "Secure channel closed");
        }
        result
    }

    /// Tears the channel down immediately and fails all pending requests.
    /// Safe to call from any state and more than once.
    ///
    /// A write blocked on the transport sees the state change, gives up and
    /// releases the write half itself.
    pub fn abort(&self) {
        let state = self.inner.state();
        if state.is_terminal() {
            self.stop_tasks();
            return;
        }
        tracing::info!(channel_id = self.inner.channel_id(), state = %state, "Aborting secure channel");
        *self.inner.failure.lock() = Some(ChannelAbortedError::Aborted);
        self.inner.set_state(ChannelState::Faulted);
        self.inner.pending.fail_all(&ChannelAbortedError::Aborted);
        self.stop_tasks();
        if let Ok(mut writer) = self.inner.writer.try_lock() {
            writer.take();
        }
    }

    fn stop_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    // =========================================================================
    // Observables
    // =========================================================================

    /// Server-assigned channel id.
    pub fn channel_id(&self) -> u32 {
        self.inner.channel_id()
    }

    /// Current security token.
    pub fn token(&self) -> ChannelSecurityToken {
        self.inner.token.read().clone()
    }

    /// Negotiated security policy.
    pub fn security_policy(&self) -> SecurityPolicy {
        self.inner.security.lock().policy()
    }

    /// Negotiated security mode.
    pub fn security_mode(&self) -> SecurityMode {
        self.inner.security.lock().mode()
    }

    /// Server certificate, if the policy uses one.
    pub fn server_certificate(&self) -> Option<Certificate> {
        self.inner.security.lock().remote().cloned()
    }

    /// Own certificate and key, if the policy uses them.
    pub fn client_identity(&self) -> Option<ApplicationIdentity> {
        self.inner.security.lock().local().cloned()
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        self.inner.state()
    }

    /// Receiver notified on every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state.subscribe()
    }

    /// The failure that faulted the channel, if any.
    pub fn failure(&self) -> Option<ChannelAbortedError> {
        self.inner.failure.lock().clone()
    }

    /// Endpoint this channel is connected to.
    pub fn endpoint_url(&self) -> &EndpointUrl {
        &self.inner.options.endpoint_url
    }

    /// Limits negotiated by Hello/Acknowledge.
    pub fn limits(&self) -> NegotiatedLimits {
        self.inner.limits
    }

    /// Type registry used to decode responses.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    /// Default request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.inner.options.request_timeout
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Counters.
    pub fn stats(&self) -> &ChannelStats {
        &self.inner.stats
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        self.stop_tasks();
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("channel_id", &self.channel_id())
            .field("endpoint", &self.inner.options.endpoint_url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Background tasks
// =============================================================================

async fn read_loop(inner: Arc<Inner>, mut reader: ReadHalf<BoxStream>, mut receive: ReceiveSequence) {
    let mut assembler = ChunkAssembler::new(
        inner.limits.max_receive_message_size,
        inner.limits.max_receive_chunk_count,
    );
    let receive_buffer = inner.limits.receive_buffer_size;
    let error = loop {
        let chunk = match read_chunk(&mut reader, receive_buffer).await {
            Ok(chunk) => chunk,
            Err(e) => break e,
        };
        if let Err(e) = inner.handle_chunk(chunk, &mut receive, &mut assembler) {
            break e;
        }
    };
    inner.fault(error);
}

async fn renew_loop(inner: std::sync::Weak<Inner>) {
    loop {
        let delay = {
            let Some(inner) = inner.upgrade() else { return };
            let lifetime = u64::from(inner.token.read().revised_lifetime);
            Duration::from_millis(lifetime * 3 / 4)
        };
        tokio::time::sleep(delay).await;

        let Some(inner) = inner.upgrade() else { return };
        match inner.state() {
            ChannelState::Open => {}
            state if state.is_terminal() || state == ChannelState::Closing => return,
            _ => continue,
        }
        if let Err(e) = inner.renew().await {
            tracing::error!(channel_id = inner.channel_id(), error = %e, "Token renewal failed");
            let error = match e {
                UaError::ChannelAborted(e) => e,
                _ => ChannelAbortedError::TokenExpired,
            };
            inner.fault(error);
            return;
        }
    }
}
