// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure conversation chunks.
//!
//! OpenSecureChannel messages use the asymmetric layout, all other messages
//! the symmetric one:
//!
//! ```text
//! OPN: header | channel id | policy uri, sender cert, receiver thumbprint | sequence | body | padding | signature
//! MSG: header | channel id | token id                                    | sequence | body | padding | signature
//!                                                                         \______ encrypted if required ______/
//! ```
//!
//! Padding is one size byte followed by that many bytes of the same value
//! (plus an extra high byte when the asymmetric key is larger than 2048 bits),
//! so that the encrypted part is a multiple of the cipher block.

use std::collections::HashMap;

use super::transport::{ChunkType, MessageHeader, MessageType, RawChunk, HEADER_SIZE};
use crate::codec::{BinaryDecode, BinaryEncode, Decoder, Encoder, TypeRegistry};
use crate::error::{ChannelAbortedError, HandshakeError, SecurityError};
use crate::security::{
    ApplicationIdentity, Certificate, ChannelKeys, SecurityMode, SecurityPolicy, SymmetricKeys,
};
use crate::types::{ByteString, StatusCode};

/// Size of the sequence header.
pub const SEQUENCE_HEADER_SIZE: usize = 8;

/// Largest sequence number before the counter wraps.
pub const SEQUENCE_WRAP_LIMIT: u32 = 4_294_966_271;

/// Sequence numbers after a wrap are below this value.
pub const SEQUENCE_WRAP_MAX_RESTART: u32 = 1024;

const SYMMETRIC_HEADER_SIZE: usize = HEADER_SIZE + 8;

type ChunkResult<T> = Result<T, ChannelAbortedError>;

fn crypto_failure(error: SecurityError) -> ChannelAbortedError {
    ChannelAbortedError::security(error.to_string())
}

fn codec_failure(error: crate::error::CodecError) -> ChannelAbortedError {
    ChannelAbortedError::protocol(error.to_string())
}

// =============================================================================
// Headers
// =============================================================================

ua_struct! {
    /// Security header of OpenSecureChannel chunks.
    pub struct AsymmetricSecurityHeader {
        /// Policy URI.
        pub security_policy_uri: String,
        /// DER certificate of the sender.
        pub sender_certificate: ByteString,
        /// SHA-1 thumbprint of the receiver's certificate.
        pub receiver_certificate_thumbprint: ByteString,
    }
}

ua_struct! {
    /// Per-chunk sequence header.
    pub struct SequenceHeader {
        /// Chunk sequence number.
        pub sequence_number: u32,
        /// Request this chunk belongs to.
        pub request_id: u32,
    }
}

/// Reads the channel id and asymmetric header of an OPN chunk without
/// verifying it, so that the accepting side can select its keys.
pub fn peek_asymmetric_header(chunk: &RawChunk) -> ChunkResult<(u32, AsymmetricSecurityHeader)> {
    let registry = TypeRegistry::empty();
    let mut dec = Decoder::new(chunk.payload(), &registry);
    let channel_id = dec.read_u32().map_err(codec_failure)?;
    let header = AsymmetricSecurityHeader::decode(&mut dec).map_err(codec_failure)?;
    Ok((channel_id, header))
}

// =============================================================================
// Sequence numbers
// =============================================================================

/// Outgoing sequence number generator.
#[derive(Debug, Clone)]
pub struct SendSequence {
    next: u32,
}

impl Default for SendSequence {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl SendSequence {
    /// Starts at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts at `value`.
    pub fn starting_at(value: u32) -> Self {
        Self { next: value }
    }

    /// Returns the next number.
    pub fn next(&mut self) -> u32 {
        let value = self.next;
        self.next = if value >= SEQUENCE_WRAP_LIMIT {
            1
        } else {
            value + 1
        };
        value
    }
}

/// Incoming sequence number check.
#[derive(Debug, Clone, Default)]
pub struct ReceiveSequence {
    last: Option<u32>,
}

impl ReceiveSequence {
    /// Accepts the first number unconditionally and then only successors.
    pub fn check(&mut self, value: u32) -> ChunkResult<()> {
        if let Some(last) = self.last {
            let wrapped = last >= SEQUENCE_WRAP_LIMIT && value < SEQUENCE_WRAP_MAX_RESTART;
            if value != last.wrapping_add(1) && !wrapped {
                return Err(ChannelAbortedError::protocol(format!(
                    "sequence number {value} does not follow {last}"
                )));
            }
        }
        self.last = Some(value);
        Ok(())
    }
}

// =============================================================================
// DecodedChunk
// =============================================================================

/// A verified, decrypted chunk.
#[derive(Debug, Clone)]
pub struct DecodedChunk {
    /// Message type.
    pub message_type: MessageType,
    /// Chunk type.
    pub chunk_type: ChunkType,
    /// Secure channel id.
    pub channel_id: u32,
    /// Token id of symmetric chunks.
    pub token_id: Option<u32>,
    /// Sequence header.
    pub sequence: SequenceHeader,
    /// Message body fragment.
    pub body: Vec<u8>,
}

// =============================================================================
// ChannelSecurity
// =============================================================================

/// Which end of the channel this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens the channel.
    Client,
    /// Accepts the channel.
    Server,
}

#[derive(Debug, Clone)]
struct TokenKeys {
    token_id: u32,
    keys: Option<ChannelKeys>,
}

/// Keys and certificates of one secure channel.
#[derive(Debug, Clone)]
pub struct ChannelSecurity {
    role: Role,
    policy: SecurityPolicy,
    mode: SecurityMode,
    local: Option<ApplicationIdentity>,
    remote: Option<Certificate>,
    current: Option<TokenKeys>,
    previous: Option<TokenKeys>,
}

impl ChannelSecurity {
    /// Creates the security context, checking that the policy, mode and
    /// certificates fit together.
    pub fn new(
        role: Role,
        policy: SecurityPolicy,
        mode: SecurityMode,
        local: Option<ApplicationIdentity>,
        remote: Option<Certificate>,
    ) -> Result<Self, HandshakeError> {
        policy.check_mode(mode)?;
        if policy.requires_certificates() {
            if local.is_none() {
                return Err(HandshakeError::CertificateRequired {
                    policy: policy.name().to_string(),
                });
            }
            if remote.is_none() {
                return Err(HandshakeError::certificate_rejected(
                    "the peer did not provide a certificate",
                ));
            }
        }
        Ok(Self {
            role,
            policy,
            mode,
            local,
            remote,
            current: None,
            previous: None,
        })
    }

    /// Insecure context for the None policy.
    pub fn none(role: Role) -> Self {
        Self {
            role,
            policy: SecurityPolicy::None,
            mode: SecurityMode::None,
            local: None,
            remote: None,
            current: None,
            previous: None,
        }
    }

    /// Security policy.
    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    /// Security mode.
    pub fn mode(&self) -> SecurityMode {
        self.mode
    }

    /// Own certificate and key.
    pub fn local(&self) -> Option<&ApplicationIdentity> {
        self.local.as_ref()
    }

    /// Peer certificate.
    pub fn remote(&self) -> Option<&Certificate> {
        self.remote.as_ref()
    }

    /// Token used for sending.
    pub fn token_id(&self) -> Option<u32> {
        self.current.as_ref().map(|t| t.token_id)
    }

    /// Returns `true` while an old token is still accepted on receive.
    pub fn has_previous_token(&self) -> bool {
        self.previous.is_some()
    }

    /// Derives keys for a newly issued token and makes it current. The
    /// previous token stays valid for incoming chunks until the peer uses
    /// the new one.
    pub fn install_token(
        &mut self,
        token_id: u32,
        local_nonce: &[u8],
        remote_nonce: &[u8],
    ) -> Result<(), SecurityError> {
        let keys = if self.mode == SecurityMode::None {
            None
        } else {
            Some(match self.role {
                Role::Client => ChannelKeys::for_client(self.policy, local_nonce, remote_nonce)?,
                Role::Server => ChannelKeys::for_server(self.policy, remote_nonce, local_nonce)?,
            })
        };
        self.previous = self.current.take();
        self.current = Some(TokenKeys { token_id, keys });
        Ok(())
    }

    fn asymmetric_header(&self) -> AsymmetricSecurityHeader {
        if self.policy == SecurityPolicy::None {
            return AsymmetricSecurityHeader {
                security_policy_uri: self.policy.uri().to_string(),
                ..Default::default()
            };
        }
        AsymmetricSecurityHeader {
            security_policy_uri: self.policy.uri().to_string(),
            sender_certificate: self
                .local
                .as_ref()
                .map(|l| ByteString::from(l.certificate.der()))
                .unwrap_or_default(),
            receiver_certificate_thumbprint: self
                .remote
                .as_ref()
                .map(|r| ByteString::from(&r.thumbprint()[..]))
                .unwrap_or_default(),
        }
    }

    // =========================================================================
    // Asymmetric (OPN)
    // =========================================================================

    /// Encodes an OpenSecureChannel message as a single chunk.
    pub fn encode_asymmetric(
        &self,
        channel_id: u32,
        sequence_number: u32,
        request_id: u32,
        body: &[u8],
        max_chunk_size: u32,
    ) -> ChunkResult<Vec<u8>> {
        let mut prefix = Encoder::with_capacity(64);
        prefix.write_u32(channel_id);
        self.asymmetric_header()
            .encode(&mut prefix)
            .map_err(codec_failure)?;
        let prefix = prefix.into_bytes();
        let header_len = HEADER_SIZE + prefix.len();

        let mut plain = Vec::with_capacity(SEQUENCE_HEADER_SIZE + body.len() + 512);
        plain.extend_from_slice(&sequence_number.to_le_bytes());
        plain.extend_from_slice(&request_id.to_le_bytes());
        plain.extend_from_slice(body);

        let secured = match (&self.local, &self.remote, self.policy.asymmetric_encryption()) {
            (Some(local), Some(remote), Some(encryption)) => {
                Some((local, remote, encryption, self.policy.asymmetric_signature()))
            }
            _ => None,
        };

        let Some((local, remote, encryption, Some(signature))) = secured else {
            let size = header_len + plain.len();
            check_size(size, max_chunk_size)?;
            let mut out = Vec::with_capacity(size);
            out.extend_from_slice(&header(MessageType::OpenSecureChannel, ChunkType::Final, size));
            out.extend_from_slice(&prefix);
            out.extend_from_slice(&plain);
            return Ok(out);
        };

        let remote_key = remote.public_key();
        let plain_block = remote_key.plain_block_size(encryption);
        let cipher_block = remote_key.size();
        let signature_size = local.private_key.size();
        let extra_padding = remote_key.size() > 256;
        let padding_header = if extra_padding { 2 } else { 1 };

        let unpadded = plain.len() + padding_header + signature_size;
        let padding = (plain_block - unpadded % plain_block) % plain_block;
        push_padding(&mut plain, padding, extra_padding);

        let plain_total = plain.len() + signature_size;
        let cipher_len = plain_total / plain_block * cipher_block;
        let size = header_len + cipher_len;
        check_size(size, max_chunk_size)?;

        let mut signed = Vec::with_capacity(header_len + plain.len());
        signed.extend_from_slice(&header(MessageType::OpenSecureChannel, ChunkType::Final, size));
        signed.extend_from_slice(&prefix);
        signed.extend_from_slice(&plain);
        let sig = local
            .private_key
            .sign(signature, &signed)
            .map_err(crypto_failure)?;

        let mut to_encrypt = signed.split_off(header_len);
        to_encrypt.extend_from_slice(&sig);
        let cipher = remote_key
            .encrypt(encryption, &to_encrypt)
            .map_err(crypto_failure)?;
        debug_assert_eq!(cipher.len(), cipher_len);

        signed.extend_from_slice(&cipher);
        Ok(signed)
    }

    /// Verifies and decrypts an OpenSecureChannel chunk.
    pub fn decode_asymmetric(&self, chunk: &RawChunk) -> ChunkResult<DecodedChunk> {
        let registry = TypeRegistry::empty();
        let mut dec = Decoder::new(chunk.payload(), &registry);
        let channel_id = dec.read_u32().map_err(codec_failure)?;
        let security_header = AsymmetricSecurityHeader::decode(&mut dec).map_err(codec_failure)?;
        let header_len = HEADER_SIZE + dec.position();

        if security_header.security_policy_uri != self.policy.uri() {
            return Err(ChannelAbortedError::security(format!(
                "security policy changed to {}",
                security_header.security_policy_uri
            )));
        }

        let plain = match (&self.local, &self.remote, self.policy.asymmetric_encryption()) {
            (Some(local), Some(remote), Some(encryption)) => {
                let expected = local.certificate.thumbprint();
                if security_header.receiver_certificate_thumbprint.as_bytes() != &expected[..] {
                    return Err(ChannelAbortedError::security(
                        "chunk was encrypted for another certificate",
                    ));
                }
                if security_header.sender_certificate.as_bytes() != remote.der() {
                    return Err(ChannelAbortedError::security("sender certificate changed"));
                }

                let cipher = &chunk.bytes[header_len..];
                let mut plain = local
                    .private_key
                    .decrypt(encryption, cipher)
                    .map_err(crypto_failure)?;

                let signature_size = remote.public_key().size();
                if plain.len() < signature_size + SEQUENCE_HEADER_SIZE {
                    return Err(ChannelAbortedError::security("chunk shorter than its signature"));
                }
                let sig = plain.split_off(plain.len() - signature_size);
                let mut signed = Vec::with_capacity(header_len + plain.len());
                signed.extend_from_slice(&chunk.bytes[..header_len]);
                signed.extend_from_slice(&plain);
                let algorithm = self
                    .policy
                    .asymmetric_signature()
                    .ok_or_else(|| ChannelAbortedError::security("policy cannot sign"))?;
                remote
                    .public_key()
                    .verify(algorithm, &signed, &sig)
                    .map_err(crypto_failure)?;

                strip_padding(&mut plain, remote.public_key().size() > 256)?;
                plain
            }
            _ => chunk.bytes[header_len..].to_vec(),
        };

        split_sequence(chunk, channel_id, None, plain)
    }

    // =========================================================================
    // Symmetric (MSG, CLO)
    // =========================================================================

    fn sending_keys(&self) -> ChunkResult<(u32, Option<&SymmetricKeys>)> {
        let token = self
            .current
            .as_ref()
            .ok_or_else(|| ChannelAbortedError::protocol("no security token issued"))?;
        Ok((token.token_id, token.keys.as_ref().map(|k| &k.sending)))
    }

    /// Largest body fragment that fits in one symmetric chunk.
    pub fn max_symmetric_body(&self, max_chunk_size: u32) -> ChunkResult<usize> {
        let (_, keys) = self.sending_keys()?;
        let available = (max_chunk_size as usize).saturating_sub(SYMMETRIC_HEADER_SIZE);
        let max = match keys {
            None => available.saturating_sub(SEQUENCE_HEADER_SIZE),
            Some(keys) if self.mode.is_encrypted() => {
                let block = keys.block_size();
                (available / block * block)
                    .saturating_sub(SEQUENCE_HEADER_SIZE + keys.signature_size() + 1)
            }
            Some(keys) => available.saturating_sub(SEQUENCE_HEADER_SIZE + keys.signature_size()),
        };
        if max == 0 {
            return Err(ChannelAbortedError::protocol("buffer too small for a chunk"));
        }
        Ok(max)
    }

    /// Splits `body` into signed/encrypted chunks with consecutive sequence
    /// numbers taken from `next_sequence`.
    pub fn encode_symmetric(
        &self,
        message_type: MessageType,
        channel_id: u32,
        request_id: u32,
        body: &[u8],
        max_chunk_size: u32,
        next_sequence: &mut dyn FnMut() -> u32,
    ) -> ChunkResult<Vec<Vec<u8>>> {
        let max_body = self.max_symmetric_body(max_chunk_size)?;
        let fragments: Vec<&[u8]> = if body.is_empty() {
            vec![body]
        } else {
            body.chunks(max_body).collect()
        };
        let last = fragments.len() - 1;
        fragments
            .into_iter()
            .enumerate()
            .map(|(i, fragment)| {
                let chunk_type = if i == last {
                    ChunkType::Final
                } else {
                    ChunkType::Intermediate
                };
                self.encode_symmetric_chunk(
                    message_type,
                    chunk_type,
                    channel_id,
                    next_sequence(),
                    request_id,
                    fragment,
                )
            })
            .collect()
    }

    /// Encodes one symmetric chunk.
    pub fn encode_symmetric_chunk(
        &self,
        message_type: MessageType,
        chunk_type: ChunkType,
        channel_id: u32,
        sequence_number: u32,
        request_id: u32,
        body: &[u8],
    ) -> ChunkResult<Vec<u8>> {
        let (token_id, keys) = self.sending_keys()?;

        let mut out = Vec::with_capacity(SYMMETRIC_HEADER_SIZE + SEQUENCE_HEADER_SIZE + body.len() + 64);
        out.extend_from_slice(&[0u8; HEADER_SIZE]);
        out.extend_from_slice(&channel_id.to_le_bytes());
        out.extend_from_slice(&token_id.to_le_bytes());
        out.extend_from_slice(&sequence_number.to_le_bytes());
        out.extend_from_slice(&request_id.to_le_bytes());
        out.extend_from_slice(body);

        let Some(keys) = keys else {
            let size = out.len();
            out[..HEADER_SIZE].copy_from_slice(&header(message_type, chunk_type, size));
            return Ok(out);
        };

        let signature_size = keys.signature_size();
        if self.mode.is_encrypted() {
            let block = keys.block_size();
            let unpadded = out.len() - SYMMETRIC_HEADER_SIZE + 1 + signature_size;
            let padding = (block - unpadded % block) % block;
            push_padding(&mut out, padding, false);
        }
        let size = out.len() + signature_size;
        out[..HEADER_SIZE].copy_from_slice(&header(message_type, chunk_type, size));

        let sig = keys.sign(&out).map_err(crypto_failure)?;
        out.extend_from_slice(&sig);

        if self.mode.is_encrypted() {
            let cipher = keys
                .encrypt(&out[SYMMETRIC_HEADER_SIZE..])
                .map_err(crypto_failure)?;
            out.truncate(SYMMETRIC_HEADER_SIZE);
            out.extend_from_slice(&cipher);
        }
        Ok(out)
    }

    /// Verifies and decrypts a symmetric chunk. A chunk secured with the
    /// current token retires the previous one.
    pub fn decode_symmetric(&mut self, chunk: &RawChunk) -> ChunkResult<DecodedChunk> {
        let payload = chunk.payload();
        if payload.len() < 8 + SEQUENCE_HEADER_SIZE {
            return Err(ChannelAbortedError::protocol("symmetric chunk too short"));
        }
        let channel_id = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let token_id = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);

        let current = self
            .current
            .as_ref()
            .ok_or_else(|| ChannelAbortedError::protocol("no security token issued"))?;
        let keys = if current.token_id == token_id {
            if self.previous.take().is_some() {
                tracing::debug!(token_id, "Peer switched to the renewed security token");
            }
            self.current.as_ref().and_then(|t| t.keys.as_ref())
        } else if self.previous.as_ref().map(|t| t.token_id) == Some(token_id) {
            self.previous.as_ref().and_then(|t| t.keys.as_ref())
        } else {
            return Err(ChannelAbortedError::protocol(format!(
                "unknown security token {token_id}"
            )));
        };

        let Some(keys) = keys.map(|k| &k.receiving) else {
            let plain = chunk.bytes[SYMMETRIC_HEADER_SIZE..].to_vec();
            return split_sequence(chunk, channel_id, Some(token_id), plain);
        };

        let mut plain = if self.mode.is_encrypted() {
            keys.decrypt(&chunk.bytes[SYMMETRIC_HEADER_SIZE..])
                .map_err(crypto_failure)?
        } else {
            chunk.bytes[SYMMETRIC_HEADER_SIZE..].to_vec()
        };

        let signature_size = keys.signature_size();
        if plain.len() < signature_size + SEQUENCE_HEADER_SIZE {
            return Err(ChannelAbortedError::security("chunk shorter than its signature"));
        }
        let sig = plain.split_off(plain.len() - signature_size);
        let mut signed = Vec::with_capacity(SYMMETRIC_HEADER_SIZE + plain.len());
        signed.extend_from_slice(&chunk.bytes[..SYMMETRIC_HEADER_SIZE]);
        signed.extend_from_slice(&plain);
        keys.verify(&signed, &sig).map_err(crypto_failure)?;

        if self.mode.is_encrypted() {
            strip_padding(&mut plain, false)?;
        }
        split_sequence(chunk, channel_id, Some(token_id), plain)
    }
}

fn header(message_type: MessageType, chunk_type: ChunkType, size: usize) -> [u8; HEADER_SIZE] {
    MessageHeader {
        message_type,
        chunk_type,
        size: size as u32,
    }
    .to_bytes()
}

fn check_size(size: usize, max_chunk_size: u32) -> ChunkResult<()> {
    if max_chunk_size > 0 && size > max_chunk_size as usize {
        return Err(ChannelAbortedError::protocol(format!(
            "chunk of {size} bytes exceeds the send buffer of {max_chunk_size}"
        )));
    }
    Ok(())
}

fn push_padding(out: &mut Vec<u8>, padding: usize, extra: bool) {
    let low = (padding & 0xFF) as u8;
    out.push(low);
    out.extend(std::iter::repeat(low).take(padding));
    if extra {
        out.push((padding >> 8) as u8);
    }
}

fn strip_padding(plain: &mut Vec<u8>, extra: bool) -> ChunkResult<()> {
    let invalid = || ChannelAbortedError::security("invalid padding");
    let (padding, header_len) = if extra {
        let len = plain.len();
        if len < 2 {
            return Err(invalid());
        }
        ((usize::from(plain[len - 1]) << 8) | usize::from(plain[len - 2]), 2)
    } else {
        (usize::from(*plain.last().ok_or_else(invalid)?), 1)
    };
    let total = padding + header_len;
    if total > plain.len().saturating_sub(SEQUENCE_HEADER_SIZE) {
        return Err(invalid());
    }
    let start = plain.len() - total;
    let low = (padding & 0xFF) as u8;
    if plain[start..start + 1 + padding].iter().any(|b| *b != low) {
        return Err(invalid());
    }
    plain.truncate(start);
    Ok(())
}

fn split_sequence(
    chunk: &RawChunk,
    channel_id: u32,
    token_id: Option<u32>,
    mut plain: Vec<u8>,
) -> ChunkResult<DecodedChunk> {
    if plain.len() < SEQUENCE_HEADER_SIZE {
        return Err(ChannelAbortedError::protocol("missing sequence header"));
    }
    let sequence = SequenceHeader {
        sequence_number: u32::from_le_bytes([plain[0], plain[1], plain[2], plain[3]]),
        request_id: u32::from_le_bytes([plain[4], plain[5], plain[6], plain[7]]),
    };
    let body = plain.split_off(SEQUENCE_HEADER_SIZE);
    Ok(DecodedChunk {
        message_type: chunk.header.message_type,
        chunk_type: chunk.header.chunk_type,
        channel_id,
        token_id,
        sequence,
        body,
    })
}

// =============================================================================
// ChunkAssembler
// =============================================================================

/// Outcome of feeding a chunk to the assembler.
#[derive(Debug, PartialEq)]
pub enum Assembled {
    /// More chunks expected.
    Pending,
    /// A full message body.
    Complete {
        /// Request id.
        request_id: u32,
        /// Body.
        body: Vec<u8>,
    },
    /// The message was abandoned by the sender or exceeded a limit.
    Aborted {
        /// Request id.
        request_id: u32,
        /// Reason code.
        status: StatusCode,
        /// Reason text.
        reason: String,
    },
}

/// Reassembles multi-chunk messages per request id.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    partial: HashMap<u32, (Vec<u8>, u32)>,
    max_message_size: u32,
    max_chunk_count: u32,
}

impl ChunkAssembler {
    /// Creates an assembler with the given limits (0 means no limit).
    pub fn new(max_message_size: u32, max_chunk_count: u32) -> Self {
        Self {
            partial: HashMap::new(),
            max_message_size,
            max_chunk_count,
        }
    }

    /// Adds a decoded chunk.
    pub fn push(&mut self, chunk: DecodedChunk) -> Assembled {
        let request_id = chunk.sequence.request_id;
        match chunk.chunk_type {
            ChunkType::Abort => {
                self.partial.remove(&request_id);
                let registry = TypeRegistry::empty();
                let mut dec = Decoder::new(&chunk.body, &registry);
                let status = StatusCode::decode(&mut dec).unwrap_or(StatusCode::BAD_UNEXPECTED_ERROR);
                let reason = String::decode(&mut dec).unwrap_or_default();
                Assembled::Aborted {
                    request_id,
                    status,
                    reason,
                }
            }
            ChunkType::Intermediate | ChunkType::Final => {
                let entry = self.partial.entry(request_id).or_default();
                entry.0.extend_from_slice(&chunk.body);
                entry.1 += 1;

                let too_large =
                    self.max_message_size > 0 && entry.0.len() > self.max_message_size as usize;
                let too_many = self.max_chunk_count > 0 && entry.1 > self.max_chunk_count;
                if too_large || too_many {
                    self.partial.remove(&request_id);
                    return Assembled::Aborted {
                        request_id,
                        status: StatusCode::BAD_RESPONSE_TOO_LARGE,
                        reason: "response exceeds the negotiated limits".to_string(),
                    };
                }

                if chunk.chunk_type == ChunkType::Final {
                    let (body, _) = self.partial.remove(&request_id).unwrap_or_default();
                    Assembled::Complete { request_id, body }
                } else {
                    Assembled::Pending
                }
            }
        }
    }

    /// Drops all partial messages.
    pub fn clear(&mut self) {
        self.partial.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{CertificateRequest, SelfSignedGenerator};
    use bytes::Bytes;

    fn raw(bytes: Vec<u8>) -> RawChunk {
        let mut head = [0u8; HEADER_SIZE];
        head.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = MessageHeader::parse(&head).unwrap();
        assert_eq!(header.size as usize, bytes.len());
        RawChunk {
            header,
            bytes: Bytes::from(bytes),
        }
    }

    fn identity(uri: &str) -> ApplicationIdentity {
        SelfSignedGenerator::new()
            .generate(&CertificateRequest::new("Chunk Test", uri))
            .unwrap()
    }

    fn secured_pair(policy: SecurityPolicy, mode: SecurityMode) -> (ChannelSecurity, ChannelSecurity) {
        let client_id = identity("urn:client");
        let server_id = identity("urn:server");
        let client = ChannelSecurity::new(
            Role::Client,
            policy,
            mode,
            Some(client_id.clone()),
            Some(server_id.certificate.clone()),
        )
        .unwrap();
        let server = ChannelSecurity::new(
            Role::Server,
            policy,
            mode,
            Some(server_id),
            Some(client_id.certificate),
        )
        .unwrap();
        (client, server)
    }

    #[test]
    fn test_send_sequence_wraps() {
        let mut seq = SendSequence::starting_at(SEQUENCE_WRAP_LIMIT);
        assert_eq!(seq.next(), SEQUENCE_WRAP_LIMIT);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
    }

    #[test]
    fn test_receive_sequence() {
        let mut seq = ReceiveSequence::default();
        seq.check(51).unwrap();
        seq.check(52).unwrap();
        assert!(seq.check(54).is_err());

        let mut seq = ReceiveSequence::default();
        seq.check(SEQUENCE_WRAP_LIMIT).unwrap();
        seq.check(3).unwrap();
    }

    #[test]
    fn test_none_policy_chunks() {
        let mut client = ChannelSecurity::none(Role::Client);
        let mut server = ChannelSecurity::none(Role::Server);
        client.install_token(1, &[], &[]).unwrap();
        server.install_token(1, &[], &[]).unwrap();

        let opn = client.encode_asymmetric(0, 1, 1, b"open", 8192).unwrap();
        let decoded = server.decode_asymmetric(&raw(opn)).unwrap();
        assert_eq!(decoded.body, b"open");
        assert_eq!(decoded.sequence.request_id, 1);

        let mut n = 10;
        let mut next = || {
            n += 1;
            n
        };
        let chunks = client
            .encode_symmetric(MessageType::Message, 7, 3, &[9u8; 20_000], 8192, &mut next)
            .unwrap();
        assert_eq!(chunks.len(), 3);

        let mut assembler = ChunkAssembler::new(0, 0);
        let mut result = Assembled::Pending;
        for chunk in chunks {
            let decoded = server.decode_symmetric(&raw(chunk)).unwrap();
            assert_eq!(decoded.channel_id, 7);
            result = assembler.push(decoded);
        }
        assert_eq!(
            result,
            Assembled::Complete {
                request_id: 3,
                body: vec![9u8; 20_000]
            }
        );
    }

    #[test]
    fn test_secured_open_and_messages() {
        for (policy, mode) in [
            (SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt),
            (SecurityPolicy::Basic128Rsa15, SecurityMode::Sign),
            (SecurityPolicy::Aes256Sha256RsaPss, SecurityMode::SignAndEncrypt),
        ] {
            let (mut client, mut server) = secured_pair(policy, mode);
            let opn = client.encode_asymmetric(0, 1, 1, &[5u8; 300], 65_535).unwrap();
            let decoded = server.decode_asymmetric(&raw(opn)).unwrap();
            assert_eq!(decoded.body, vec![5u8; 300], "{policy}");

            let client_nonce = crate::security::crypto::random_nonce(policy.nonce_length());
            let server_nonce = crate::security::crypto::random_nonce(policy.nonce_length());
            client.install_token(4, &client_nonce, &server_nonce).unwrap();
            server.install_token(4, &server_nonce, &client_nonce).unwrap();

            let mut seq = SendSequence::new();
            let body: Vec<u8> = (0..30_000u32).map(|i| i as u8).collect();
            let chunks = client
                .encode_symmetric(MessageType::Message, 1, 2, &body, 8192, &mut || seq.next())
                .unwrap();
            let mut assembler = ChunkAssembler::new(0, 0);
            let mut result = Assembled::Pending;
            for chunk in chunks {
                assert!(chunk.len() <= 8192);
                result = assembler.push(server.decode_symmetric(&raw(chunk)).unwrap());
            }
            assert_eq!(result, Assembled::Complete { request_id: 2, body }, "{policy}");

            let reply = server
                .encode_symmetric_chunk(MessageType::Message, ChunkType::Final, 1, 1, 2, b"ok")
                .unwrap();
            assert_eq!(client.decode_symmetric(&raw(reply)).unwrap().body, b"ok");
        }
    }

    #[test]
    fn test_tampered_chunk_rejected() {
        let (mut client, mut server) =
            secured_pair(SecurityPolicy::Basic256Sha256, SecurityMode::Sign);
        client.install_token(1, &[1; 32], &[2; 32]).unwrap();
        server.install_token(1, &[2; 32], &[1; 32]).unwrap();
        let mut chunk = client
            .encode_symmetric_chunk(MessageType::Message, ChunkType::Final, 1, 1, 1, b"value")
            .unwrap();
        chunk[SYMMETRIC_HEADER_SIZE + SEQUENCE_HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            server.decode_symmetric(&raw(chunk)),
            Err(ChannelAbortedError::SecurityCheckFailed { .. })
        ));
    }

    #[test]
    fn test_previous_token_accepted_until_switch() {
        let (mut client, mut server) =
            secured_pair(SecurityPolicy::Basic256Sha256, SecurityMode::SignAndEncrypt);
        client.install_token(1, &[1; 32], &[2; 32]).unwrap();
        server.install_token(1, &[2; 32], &[1; 32]).unwrap();

        let old = server
            .encode_symmetric_chunk(MessageType::Message, ChunkType::Final, 1, 1, 1, b"old")
            .unwrap();
        client.install_token(2, &[3; 32], &[4; 32]).unwrap();
        assert!(client.has_previous_token());
        assert_eq!(client.decode_symmetric(&raw(old)).unwrap().body, b"old");

        server.install_token(2, &[4; 32], &[3; 32]).unwrap();
        let new = server
            .encode_symmetric_chunk(MessageType::Message, ChunkType::Final, 1, 2, 2, b"new")
            .unwrap();
        assert_eq!(client.decode_symmetric(&raw(new)).unwrap().body, b"new");
        assert!(!client.has_previous_token());

        let stale = {
            let mut s = server.clone();
            s.current = Some(TokenKeys {
                token_id: 1,
                keys: None,
            });
            s.encode_symmetric_chunk(MessageType::Message, ChunkType::Final, 1, 3, 3, b"x")
                .unwrap()
        };
        assert!(matches!(
            client.decode_symmetric(&raw(stale)),
            Err(ChannelAbortedError::Protocol { .. })
        ));
    }

    #[test]
    fn test_abort_chunk() {
        let mut enc = Encoder::new();
        StatusCode::BAD_RESPONSE_TOO_LARGE.encode(&mut enc).unwrap();
        "too big".to_string().encode(&mut enc).unwrap();
        let mut assembler = ChunkAssembler::new(0, 0);
        let first = DecodedChunk {
            message_type: MessageType::Message,
            chunk_type: ChunkType::Intermediate,
            channel_id: 1,
            token_id: Some(1),
            sequence: SequenceHeader {
                sequence_number: 1,
                request_id: 9,
            },
            body: vec![1, 2, 3],
        };
        assert_eq!(assembler.push(first.clone()), Assembled::Pending);
        let abort = DecodedChunk {
            chunk_type: ChunkType::Abort,
            body: enc.into_bytes().to_vec(),
            ..first
        };
        assert_eq!(
            assembler.push(abort),
            Assembled::Aborted {
                request_id: 9,
                status: StatusCode::BAD_RESPONSE_TOO_LARGE,
                reason: "too big".into()
            }
        );
    }

    #[test]
    fn test_chunk_count_limit() {
        let mut assembler = ChunkAssembler::new(0, 2);
        let chunk = |t| DecodedChunk {
            message_type: MessageType::Message,
            chunk_type: t,
            channel_id: 1,
            token_id: Some(1),
            sequence: SequenceHeader {
                sequence_number: 1,
                request_id: 4,
            },
            body: vec![0],
        };
        assert_eq!(assembler.push(chunk(ChunkType::Intermediate)), Assembled::Pending);
        assert_eq!(assembler.push(chunk(ChunkType::Intermediate)), Assembled::Pending);
        assert!(matches!(
            assembler.push(chunk(ChunkType::Final)),
            Assembled::Aborted { request_id: 4, .. }
        ));
    }
}
