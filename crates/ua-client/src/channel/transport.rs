// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! UA-TCP framing and the Hello/Acknowledge handshake.
//!
//! Every message starts with an 8-byte header:
//!
//! ```text
//! +-----------------+------------+------------------+
//! | type (3 bytes)  | chunk (1)  | size (u32, LE)   |
//! | HEL ACK ERR OPN | F / C / A  | incl. the header |
//! | MSG CLO         |            |                  |
//! +-----------------+------------+------------------+
//! ```

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::codec::{decode_from_slice, encode_to_vec, TypeRegistry};
use crate::config::{TransportLimits, MIN_BUFFER_SIZE};
use crate::error::{ChannelAbortedError, ConfigurationError, HandshakeError};
use crate::types::StatusCode;

/// UA-TCP protocol version spoken by this client.
pub const PROTOCOL_VERSION: u32 = 0;

/// Size of the message header.
pub const HEADER_SIZE: usize = 8;

/// Default port of `opc.tcp` endpoints.
pub const DEFAULT_PORT: u16 = 4840;

/// Longest endpoint URL a Hello may carry.
pub const MAX_URL_LENGTH: usize = 4096;

/// Byte stream carrying UA-TCP messages.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

/// Boxed stream, a TCP socket in production and an in-memory pipe in tests.
pub type BoxStream = Box<dyn Stream>;

// =============================================================================
// EndpointUrl
// =============================================================================

/// A parsed `opc.tcp://host:port/path` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointUrl {
    url: String,
    host: String,
    port: u16,
    path: String,
}

impl EndpointUrl {
    /// Parses an endpoint URL.
    pub fn parse(url: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::invalid_endpoint(url, reason);

        let rest = url
            .strip_prefix("opc.tcp://")
            .ok_or_else(|| invalid("endpoint must start with opc.tcp://"))?;
        if url.len() > MAX_URL_LENGTH {
            return Err(invalid("endpoint URL too long"));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let end = v6.find(']').ok_or_else(|| invalid("unterminated IPv6 address"))?;
            let host = &v6[..end];
            let port = match &v6[end + 1..] {
                "" => None,
                p => Some(p.strip_prefix(':').ok_or_else(|| invalid("malformed port"))?),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("malformed port"))?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            url: url.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// The URL as given.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path, possibly empty.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` for connecting.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns `true` if both URLs point at the same host and port.
    pub fn same_server(&self, other: &EndpointUrl) -> bool {
        self.host.eq_ignore_ascii_case(&other.host) && self.port == other.port
    }
}

impl fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

// =============================================================================
// Message header
// =============================================================================

/// UA-TCP message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// HEL.
    Hello,
    /// ACK.
    Acknowledge,
    /// ERR.
    Error,
    /// OPN.
    OpenSecureChannel,
    /// MSG.
    Message,
    /// CLO.
    CloseSecureChannel,
}

impl MessageType {
    /// The three tag bytes.
    pub const fn tag(self) -> &'static [u8; 3] {
        match self {
            Self::Hello => b"HEL",
            Self::Acknowledge => b"ACK",
            Self::Error => b"ERR",
            Self::OpenSecureChannel => b"OPN",
            Self::Message => b"MSG",
            Self::CloseSecureChannel => b"CLO",
        }
    }

    /// Parses the tag bytes.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"HEL" => Some(Self::Hello),
            b"ACK" => Some(Self::Acknowledge),
            b"ERR" => Some(Self::Error),
            b"OPN" => Some(Self::OpenSecureChannel),
            b"MSG" => Some(Self::Message),
            b"CLO" => Some(Self::CloseSecureChannel),
            _ => None,
        }
    }

    /// Returns `true` for message types that travel inside a secure channel.
    pub const fn is_secure(self) -> bool {
        matches!(
            self,
            Self::OpenSecureChannel | Self::Message | Self::CloseSecureChannel
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.tag()))
    }
}

/// Position of a chunk within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Last chunk ('F').
    Final,
    /// More chunks follow ('C').
    Intermediate,
    /// The sender gave up on the message ('A').
    Abort,
}

impl ChunkType {
    /// The tag byte.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Final => b'F',
            Self::Intermediate => b'C',
            Self::Abort => b'A',
        }
    }

    /// Parses the tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'F' => Some(Self::Final),
            b'C' => Some(Self::Intermediate),
            b'A' => Some(Self::Abort),
            _ => None,
        }
    }
}

/// The 8-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Message type.
    pub message_type: MessageType,
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Size of the whole chunk including this header.
    pub size: u32,
}

impl MessageHeader {
    /// Serializes the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..3].copy_from_slice(self.message_type.tag());
        out[3] = self.chunk_type.tag();
        out[4..].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    /// Parses a header.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, ChannelAbortedError> {
        let message_type = MessageType::from_tag(&bytes[..3]).ok_or_else(|| {
            ChannelAbortedError::protocol(format!(
                "unknown message type {:?}",
                String::from_utf8_lossy(&bytes[..3])
            ))
        })?;
        let chunk_type = ChunkType::from_tag(bytes[3]).ok_or_else(|| {
            ChannelAbortedError::protocol(format!("unknown chunk type 0x{:02x}", bytes[3]))
        })?;
        let size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if (size as usize) < HEADER_SIZE {
            return Err(ChannelAbortedError::protocol(format!(
                "message size {size} smaller than its header"
            )));
        }
        Ok(Self {
            message_type,
            chunk_type,
            size,
        })
    }
}

/// A complete chunk as read from the stream, header included.
#[derive(Debug, Clone)]
pub struct RawChunk {
    /// Parsed header.
    pub header: MessageHeader,
    /// Header and payload.
    pub bytes: Bytes,
}

impl RawChunk {
    /// Bytes after the header.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }
}

/// Reads one chunk, rejecting chunks larger than `max_size`.
pub async fn read_chunk<R>(reader: &mut R, max_size: u32) -> Result<RawChunk, ChannelAbortedError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = [0u8; HEADER_SIZE];
    reader.read_exact(&mut head).await?;
    let header = MessageHeader::parse(&head)?;
    if max_size > 0 && header.size > max_size {
        return Err(ChannelAbortedError::protocol(format!(
            "chunk of {} bytes exceeds the negotiated buffer size {max_size}",
            header.size
        )));
    }
    let mut bytes = vec![0u8; header.size as usize];
    bytes[..HEADER_SIZE].copy_from_slice(&head);
    reader.read_exact(&mut bytes[HEADER_SIZE..]).await?;
    Ok(RawChunk {
        header,
        bytes: Bytes::from(bytes),
    })
}

/// Frames `payload` with a header and returns the full chunk.
pub fn frame(message_type: MessageType, chunk_type: ChunkType, payload: &[u8]) -> Vec<u8> {
    let size = (HEADER_SIZE + payload.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(
        &MessageHeader {
            message_type,
            chunk_type,
            size,
        }
        .to_bytes(),
    );
    out.extend_from_slice(payload);
    out
}

// =============================================================================
// Hello / Acknowledge / Error
// =============================================================================

ua_struct! {
    /// HEL body.
    pub struct HelloMessage {
        /// Protocol version.
        pub protocol_version: u32,
        /// Largest chunk the client can receive.
        pub receive_buffer_size: u32,
        /// Largest chunk the client will send.
        pub send_buffer_size: u32,
        /// Largest message the client accepts.
        pub max_message_size: u32,
        /// Most chunks the client accepts.
        pub max_chunk_count: u32,
        /// Target endpoint.
        pub endpoint_url: String,
    }
}

ua_struct! {
    /// ACK body.
    pub struct AcknowledgeMessage {
        /// Protocol version.
        pub protocol_version: u32,
        /// Largest chunk the server can receive.
        pub receive_buffer_size: u32,
        /// Largest chunk the server will send.
        pub send_buffer_size: u32,
        /// Largest message the server accepts.
        pub max_message_size: u32,
        /// Most chunks the server accepts.
        pub max_chunk_count: u32,
    }
}

ua_struct! {
    /// ERR body.
    pub struct ErrorMessage {
        /// Error code.
        pub error: StatusCode,
        /// Reason text.
        pub reason: String,
    }
}

impl HelloMessage {
    /// Builds a Hello from the configured limits.
    pub fn new(endpoint_url: &str, limits: &TransportLimits) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: limits.receive_buffer_size,
            send_buffer_size: limits.send_buffer_size,
            max_message_size: limits.max_message_size,
            max_chunk_count: limits.max_chunk_count,
            endpoint_url: endpoint_url.to_string(),
        }
    }
}

/// Limits in force after the Hello/Acknowledge exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedLimits {
    /// Largest chunk this side sends.
    pub send_buffer_size: u32,
    /// Largest chunk this side receives.
    pub receive_buffer_size: u32,
    /// Largest message the peer accepts; 0 means no limit.
    pub max_send_message_size: u32,
    /// Most chunks the peer accepts; 0 means no limit.
    pub max_send_chunk_count: u32,
    /// Largest message this side accepts; 0 means no limit.
    pub max_receive_message_size: u32,
    /// Most chunks this side accepts; 0 means no limit.
    pub max_receive_chunk_count: u32,
}

impl NegotiatedLimits {
    /// Combines the client's Hello with the server's Acknowledge.
    pub fn from_acknowledge(
        hello: &HelloMessage,
        ack: &AcknowledgeMessage,
    ) -> Result<Self, HandshakeError> {
        if ack.receive_buffer_size < MIN_BUFFER_SIZE || ack.send_buffer_size < MIN_BUFFER_SIZE {
            return Err(HandshakeError::invalid_response(format!(
                "server buffer sizes {}/{} below the minimum of {MIN_BUFFER_SIZE}",
                ack.receive_buffer_size, ack.send_buffer_size
            )));
        }
        Ok(Self {
            send_buffer_size: hello.send_buffer_size.min(ack.receive_buffer_size),
            receive_buffer_size: hello.receive_buffer_size.min(ack.send_buffer_size),
            max_send_message_size: ack.max_message_size,
            max_send_chunk_count: ack.max_chunk_count,
            max_receive_message_size: hello.max_message_size,
            max_receive_chunk_count: hello.max_chunk_count,
        })
    }

    /// Limits for the accepting side of a connection.
    pub fn for_server(hello: &HelloMessage, own: &TransportLimits) -> Self {
        Self {
            send_buffer_size: own.send_buffer_size.min(hello.receive_buffer_size),
            receive_buffer_size: own.receive_buffer_size.min(hello.send_buffer_size),
            max_send_message_size: hello.max_message_size,
            max_send_chunk_count: hello.max_chunk_count,
            max_receive_message_size: own.max_message_size,
            max_receive_chunk_count: own.max_chunk_count,
        }
    }

    /// The Acknowledge a server sends for these limits.
    pub fn acknowledge(&self) -> AcknowledgeMessage {
        AcknowledgeMessage {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: self.receive_buffer_size,
            send_buffer_size: self.send_buffer_size,
            max_message_size: self.max_receive_message_size,
            max_chunk_count: self.max_receive_chunk_count,
        }
    }
}

/// Encodes a HEL, ACK or ERR message.
pub fn encode_transport_message<T: crate::codec::BinaryEncode>(
    message_type: MessageType,
    body: &T,
) -> Result<Vec<u8>, crate::error::CodecError> {
    Ok(frame(message_type, ChunkType::Final, &encode_to_vec(body)?))
}

/// Opens a TCP connection to `url`.
pub async fn connect(url: &EndpointUrl, timeout: Duration) -> Result<TcpStream, HandshakeError> {
    let addr = url.socket_addr();
    tracing::debug!(endpoint = %url, addr = %addr, "Connecting");
    let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| HandshakeError::TimedOut {
            endpoint: url.to_string(),
            duration: timeout,
        })?
        .map_err(|source| HandshakeError::Connect {
            endpoint: url.to_string(),
            source,
        })?;
    stream
        .set_nodelay(true)
        .map_err(|source| HandshakeError::Connect {
            endpoint: url.to_string(),
            source,
        })?;
    Ok(stream)
}

/// Sends Hello and waits for Acknowledge.
pub async fn hello<S>(
    stream: &mut S,
    url: &EndpointUrl,
    limits: &TransportLimits,
) -> Result<NegotiatedLimits, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let hello = HelloMessage::new(url.as_str(), limits);
    let bytes = encode_transport_message(MessageType::Hello, &hello)
        .map_err(|e| HandshakeError::invalid_response(e.to_string()))?;
    let io_error = |e: std::io::Error| HandshakeError::Channel(e.into());
    stream.write_all(&bytes).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)?;

    let chunk = read_chunk(stream, MIN_BUFFER_SIZE)
        .await
        .map_err(HandshakeError::Channel)?;
    let registry = TypeRegistry::empty();
    match chunk.header.message_type {
        MessageType::Acknowledge => {
            let ack: AcknowledgeMessage = decode_from_slice(chunk.payload(), &registry)
                .map_err(|e| HandshakeError::invalid_response(e.to_string()))?;
            let limits = NegotiatedLimits::from_acknowledge(&hello, &ack)?;
            tracing::debug!(
                endpoint = %url,
                send_buffer = limits.send_buffer_size,
                receive_buffer = limits.receive_buffer_size,
                max_message = limits.max_send_message_size,
                "Hello acknowledged"
            );
            Ok(limits)
        }
        MessageType::Error => {
            let err: ErrorMessage = decode_from_slice(chunk.payload(), &registry)
                .map_err(|e| HandshakeError::invalid_response(e.to_string()))?;
            Err(HandshakeError::Rejected {
                status: err.error,
                reason: err.reason,
            })
        }
        other => Err(HandshakeError::UnexpectedMessage {
            expected: "ACK",
            actual: other.to_string(),
        }),
    }
}
