// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One client connection: UA-TCP handshake, secure channel and the split
//! reader/writer tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use ua_client::channel::chunk::{peek_asymmetric_header, Assembled, ChunkAssembler, SendSequence};
use ua_client::channel::transport::{
    encode_transport_message, read_chunk, ErrorMessage, HelloMessage, MessageType,
};
use ua_client::channel::{ChannelSecurity, NegotiatedLimits, Role};
use ua_client::codec::decode_from_slice;
use ua_client::config::TransportLimits;
use ua_client::error::{ChannelAbortedError, UaResult};
use ua_client::messages::{
    decode_request, encode_body, ChannelSecurityToken, OpenSecureChannelRequest,
    OpenSecureChannelResponse, ResponseHeader, SecurityTokenRequestType, ServiceResponse,
};
use ua_client::security::crypto::random_nonce;
use ua_client::security::{Certificate, SecurityMode, SecurityPolicy};
use ua_client::types::{ByteString, DateTime, StatusCode};

use super::services::Reply;
use super::ServerState;

/// Work for the writer task.
pub(crate) enum Outgoing {
    /// A service response body.
    Message { request_id: u32, body: Vec<u8> },
    /// A token renewal; keys switch once the response is written.
    Open {
        request_id: u32,
        body: Vec<u8>,
        token: IssuedToken,
    },
}

pub(crate) struct IssuedToken {
    token_id: u32,
    server_nonce: Vec<u8>,
    client_nonce: Vec<u8>,
}

/// What services know about the channel a request arrived on.
pub(crate) struct ConnectionContext {
    pub channel_id: u32,
    pub policy: SecurityPolicy,
    pub mode: SecurityMode,
    pub client_certificate: Option<Certificate>,
    pub reply: mpsc::UnboundedSender<Outgoing>,
}

pub(crate) async fn serve(state: Arc<ServerState>, stream: TcpStream, peer: SocketAddr) {
    match run(&state, stream).await {
        Ok(()) => tracing::debug!(%peer, "Mock connection closed"),
        Err(e) => tracing::debug!(%peer, error = %e, "Mock connection ended"),
    }
}

async fn run(state: &Arc<ServerState>, stream: TcpStream) -> UaResult<()> {
    let mut generation = state.generation.subscribe();
    let (mut reader, mut writer) = stream.into_split();

    // HEL / ACK
    let hello = read_chunk(&mut reader, 0).await?;
    if hello.header.message_type != MessageType::Hello {
        return reject(&mut writer, StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID, "expected HEL").await;
    }
    let hello: HelloMessage = decode_from_slice(hello.payload(), &state.registry)?;
    let limits = NegotiatedLimits::for_server(&hello, &TransportLimits::default());
    writer
        .write_all(&encode_transport_message(MessageType::Acknowledge, &limits.acknowledge())?)
        .await?;

    // OPN (issue)
    let opn = read_chunk(&mut reader, limits.receive_buffer_size).await?;
    if opn.header.message_type != MessageType::OpenSecureChannel {
        return reject(&mut writer, StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID, "expected OPN").await;
    }
    let (_, header) = peek_asymmetric_header(&opn)?;
    let Some(policy) =
        SecurityPolicy::from_uri(&header.security_policy_uri).filter(|p| state.offers_policy(*p))
    else {
        return reject(&mut writer, StatusCode::BAD_SECURITY_POLICY_REJECTED, "policy not offered").await;
    };
    let client_certificate = if policy.requires_certificates() {
        Some(Certificate::from_der(header.sender_certificate.as_bytes())?)
    } else {
        None
    };

    // The asymmetric layer does not depend on the mode, so decode first and
    // learn the requested mode from the body.
    let provisional_mode = if policy == SecurityPolicy::None {
        SecurityMode::None
    } else {
        SecurityMode::SignAndEncrypt
    };
    let provisional = channel_security(state, policy, provisional_mode, client_certificate.clone())?;
    let decoded = provisional.decode_asymmetric(&opn)?;
    let request: OpenSecureChannelRequest = decode_request(&decoded.body, &state.registry)?;
    let Some(mode) = SecurityMode::from_message_mode(request.security_mode)
        .filter(|m| state.offers(policy, *m))
    else {
        return reject(&mut writer, StatusCode::BAD_SECURITY_MODE_REJECTED, "mode not offered").await;
    };

    let mut security = channel_security(state, policy, mode, client_certificate.clone())?;
    let channel_id = state.next_channel_id();
    let mut sequence = SendSequence::new();
    let (body, token) = issue_token(state, policy, channel_id, 1, &request)?;
    security.install_token(token.token_id, &token.server_nonce, &token.client_nonce)?;
    let chunk = security.encode_asymmetric(
        channel_id,
        sequence.next(),
        decoded.sequence.request_id,
        &body,
        limits.send_buffer_size,
    )?;
    writer.write_all(&chunk).await?;
    state.stats.record_channel();
    tracing::debug!(channel_id, policy = policy.name(), ?mode, "Mock channel opened");

    let security = Arc::new(Mutex::new(security));
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(
        writer,
        rx,
        Arc::clone(&security),
        channel_id,
        sequence,
        limits.send_buffer_size,
        Arc::clone(state),
    ));

    let ctx = ConnectionContext {
        channel_id,
        policy,
        mode,
        client_certificate,
        reply: tx,
    };
    let outcome = read_loop(state, &mut reader, &mut generation, &security, &ctx, &limits).await;

    // Queued Publish requests may still hold senders, so stop the writer directly.
    writer_task.abort();
    outcome
}

async fn read_loop(
    state: &ServerState,
    reader: &mut OwnedReadHalf,
    generation: &mut watch::Receiver<u64>,
    security: &Mutex<ChannelSecurity>,
    ctx: &ConnectionContext,
    limits: &NegotiatedLimits,
) -> UaResult<()> {
    let mut assembler = ChunkAssembler::new(limits.max_receive_message_size, limits.max_receive_chunk_count);
    let mut token_id = 1;

    loop {
        let chunk = tokio::select! {
            chunk = read_chunk(reader, limits.receive_buffer_size) => chunk?,
            _ = generation.changed() => {
                tracing::debug!(channel_id = ctx.channel_id, "Mock server dropping connection");
                return Ok(());
            }
        };

        match chunk.header.message_type {
            MessageType::OpenSecureChannel => {
                let decoded = security.lock().decode_asymmetric(&chunk)?;
                let request: OpenSecureChannelRequest = decode_request(&decoded.body, &state.registry)?;
                if request.request_type == SecurityTokenRequestType::Renew {
                    state.stats.record_renewal();
                }
                token_id += 1;
                let (body, token) = issue_token(state, ctx.policy, ctx.channel_id, token_id, &request)?;
                tracing::debug!(channel_id = ctx.channel_id, token_id, "Mock channel token renewed");
                let open = Outgoing::Open {
                    request_id: decoded.sequence.request_id,
                    body,
                    token,
                };
                if ctx.reply.send(open).is_err() {
                    return Ok(());
                }
            }
            MessageType::Message => {
                let decoded = security.lock().decode_symmetric(&chunk)?;
                match assembler.push(decoded) {
                    Assembled::Pending => {}
                    Assembled::Complete { request_id, body } => {
                        if let Reply::Now(response) = state.dispatch(ctx, request_id, &body) {
                            let message = Outgoing::Message {
                                request_id,
                                body: response,
                            };
                            if ctx.reply.send(message).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Assembled::Aborted {
                        request_id,
                        status,
                        reason,
                    } => {
                        tracing::debug!(request_id, %status, reason, "Client aborted a request");
                    }
                }
            }
            MessageType::CloseSecureChannel => {
                security.lock().decode_symmetric(&chunk)?;
                tracing::debug!(channel_id = ctx.channel_id, "Mock channel closed by client");
                return Ok(());
            }
            other => {
                return Err(ChannelAbortedError::protocol(format!("unexpected {other:?} message")).into());
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    security: Arc<Mutex<ChannelSecurity>>,
    channel_id: u32,
    mut sequence: SendSequence,
    max_chunk: u32,
    state: Arc<ServerState>,
) {
    let mut held: Vec<(u32, Vec<u8>)> = Vec::new();
    let mut hold = 0usize;

    while let Some(outgoing) = rx.recv().await {
        let result = match outgoing {
            Outgoing::Message { request_id, body } => {
                if held.is_empty() {
                    hold = state.hooks.take_reverse();
                }
                if hold > 1 {
                    held.push((request_id, body));
                    if held.len() < hold {
                        continue;
                    }
                    tracing::debug!(count = held.len(), "Mock server reversing responses");
                    let mut result = Ok(());
                    for (request_id, body) in held.drain(..).rev() {
                        result = write_message(&mut writer, &security, channel_id, &mut sequence, max_chunk, request_id, &body).await;
                        if result.is_err() {
                            break;
                        }
                    }
                    hold = 0;
                    result
                } else {
                    write_message(&mut writer, &security, channel_id, &mut sequence, max_chunk, request_id, &body).await
                }
            }
            Outgoing::Open {
                request_id,
                body,
                token,
            } => write_open(&mut writer, &security, channel_id, &mut sequence, max_chunk, request_id, &body, token).await,
        };
        if let Err(e) = result {
            tracing::debug!(channel_id, error = %e, "Mock writer stopped");
            break;
        }
    }
}

async fn write_message(
    writer: &mut OwnedWriteHalf,
    security: &Mutex<ChannelSecurity>,
    channel_id: u32,
    sequence: &mut SendSequence,
    max_chunk: u32,
    request_id: u32,
    body: &[u8],
) -> UaResult<()> {
    let chunks = security.lock().encode_symmetric(
        MessageType::Message,
        channel_id,
        request_id,
        body,
        max_chunk,
        &mut || sequence.next(),
    )?;
    for chunk in chunks {
        writer.write_all(&chunk).await?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn write_open(
    writer: &mut OwnedWriteHalf,
    security: &Mutex<ChannelSecurity>,
    channel_id: u32,
    sequence: &mut SendSequence,
    max_chunk: u32,
    request_id: u32,
    body: &[u8],
    token: IssuedToken,
) -> UaResult<()> {
    let chunk = {
        let mut security = security.lock();
        let chunk = security.encode_asymmetric(channel_id, sequence.next(), request_id, body, max_chunk)?;
        security.install_token(token.token_id, &token.server_nonce, &token.client_nonce)?;
        chunk
    };
    writer.write_all(&chunk).await?;
    Ok(())
}

fn channel_security(
    state: &ServerState,
    policy: SecurityPolicy,
    mode: SecurityMode,
    client_certificate: Option<Certificate>,
) -> UaResult<ChannelSecurity> {
    if policy == SecurityPolicy::None {
        return Ok(ChannelSecurity::none(Role::Server));
    }
    Ok(ChannelSecurity::new(
        Role::Server,
        policy,
        mode,
        state.config.identity.clone(),
        client_certificate,
    )?)
}

fn issue_token(
    state: &ServerState,
    policy: SecurityPolicy,
    channel_id: u32,
    token_id: u32,
    request: &OpenSecureChannelRequest,
) -> UaResult<(Vec<u8>, IssuedToken)> {
    let server_nonce = if policy == SecurityPolicy::None {
        Vec::new()
    } else {
        random_nonce(policy.nonce_length())
    };
    let lifetime = u32::try_from(state.config.token_lifetime.as_millis()).unwrap_or(u32::MAX);
    let response = OpenSecureChannelResponse {
        response_header: ResponseHeader::new(request.request_header.request_handle, StatusCode::GOOD),
        server_protocol_version: 0,
        security_token: ChannelSecurityToken {
            channel_id,
            token_id,
            created_at: DateTime::now(),
            revised_lifetime: lifetime,
        },
        server_nonce: ByteString::from(server_nonce.clone()),
    };
    let body = encode_body(OpenSecureChannelResponse::ENCODING_ID, &response)?;
    let token = IssuedToken {
        token_id,
        server_nonce,
        client_nonce: request.client_nonce.as_bytes().to_vec(),
    };
    Ok((body, token))
}

async fn reject(writer: &mut OwnedWriteHalf, status: StatusCode, reason: &str) -> UaResult<()> {
    let message = ErrorMessage {
        error: status,
        reason: reason.to_string(),
    };
    writer
        .write_all(&encode_transport_message(MessageType::Error, &message)?)
        .await?;
    tracing::debug!(%status, reason, "Mock server rejected connection");
    Ok(())
}
