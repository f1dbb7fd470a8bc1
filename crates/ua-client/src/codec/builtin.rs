// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Codec implementations for the built-in types in [`crate::types`].

use uuid::Uuid;

use super::{BinaryDecode, BinaryEncode, Decoder, Encoder};
use crate::error::{CodecError, CodecResult};
use crate::types::{
    ByteString, DateTime, DiagnosticInfo, ExpandedNodeId, LocalizedText, NodeId, NodeIdentifier,
    QualifiedName, StatusCode, XmlElement,
};

// =============================================================================
// Scalars
// =============================================================================

impl BinaryEncode for StatusCode {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_u32(self.bits());
        Ok(())
    }
}

impl BinaryDecode for StatusCode {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(StatusCode::new(dec.read_u32()?))
    }
}

impl BinaryEncode for DateTime {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_i64(self.ticks());
        Ok(())
    }
}

impl BinaryDecode for DateTime {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(DateTime::from_ticks(dec.read_i64()?))
    }
}

impl BinaryEncode for Uuid {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        let (d1, d2, d3, d4) = self.as_fields();
        enc.write_u32(d1);
        enc.write_u16(d2);
        enc.write_u16(d3);
        enc.write_bytes(d4);
        Ok(())
    }
}

impl BinaryDecode for Uuid {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let d1 = dec.read_u32()?;
        let d2 = dec.read_u16()?;
        let d3 = dec.read_u16()?;
        let mut d4 = [0u8; 8];
        d4.copy_from_slice(dec.read_bytes(8)?);
        Ok(Uuid::from_fields(d1, d2, d3, &d4))
    }
}

impl BinaryEncode for ByteString {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        if self.is_null() {
            return enc.write_length(None);
        }
        let bytes = self.as_bytes();
        enc.write_length(Some(bytes.len()))?;
        enc.write_bytes(bytes);
        Ok(())
    }
}

impl BinaryDecode for ByteString {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let limit = dec.limits().max_byte_string_length;
        match dec.read_length("byte string", limit, 1)? {
            None => Ok(ByteString::null()),
            Some(len) => Ok(ByteString::from(dec.read_bytes(len)?)),
        }
    }
}

impl BinaryEncode for XmlElement {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        self.0.encode(enc)
    }
}

impl BinaryDecode for XmlElement {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(XmlElement(String::decode(dec)?))
    }
}

impl BinaryEncode for QualifiedName {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_u16(self.namespace_index);
        self.name.encode(enc)
    }
}

impl BinaryDecode for QualifiedName {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(QualifiedName {
            namespace_index: dec.read_u16()?,
            name: String::decode(dec)?,
        })
    }
}

const LT_LOCALE: u8 = 0x01;
const LT_TEXT: u8 = 0x02;

impl BinaryEncode for LocalizedText {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        let mut mask = 0u8;
        if !self.locale.is_empty() {
            mask |= LT_LOCALE;
        }
        if !self.text.is_empty() {
            mask |= LT_TEXT;
        }
        enc.write_u8(mask);
        if mask & LT_LOCALE != 0 {
            self.locale.encode(enc)?;
        }
        if mask & LT_TEXT != 0 {
            self.text.encode(enc)?;
        }
        Ok(())
    }
}

impl BinaryDecode for LocalizedText {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let mask = dec.read_u8()?;
        if mask & !(LT_LOCALE | LT_TEXT) != 0 {
            return Err(CodecError::invalid_mask("LocalizedText", mask));
        }
        let locale = if mask & LT_LOCALE != 0 {
            String::decode(dec)?
        } else {
            String::new()
        };
        let text = if mask & LT_TEXT != 0 {
            String::decode(dec)?
        } else {
            String::new()
        };
        Ok(LocalizedText { locale, text })
    }
}

// =============================================================================
// NodeId
// =============================================================================

const NODE_TWO_BYTE: u8 = 0x00;
const NODE_FOUR_BYTE: u8 = 0x01;
const NODE_NUMERIC: u8 = 0x02;
const NODE_STRING: u8 = 0x03;
const NODE_GUID: u8 = 0x04;
const NODE_OPAQUE: u8 = 0x05;

const EXPANDED_SERVER_INDEX: u8 = 0x40;
const EXPANDED_NAMESPACE_URI: u8 = 0x80;

fn encode_node_id(node: &NodeId, flags: u8, enc: &mut Encoder) -> CodecResult<()> {
    let ns = node.namespace_index;
    match &node.identifier {
        NodeIdentifier::Numeric(v) if ns == 0 && *v <= 0xFF => {
            enc.write_u8(NODE_TWO_BYTE | flags);
            enc.write_u8(*v as u8);
        }
        NodeIdentifier::Numeric(v) if ns <= 0xFF && *v <= 0xFFFF => {
            enc.write_u8(NODE_FOUR_BYTE | flags);
            enc.write_u8(ns as u8);
            enc.write_u16(*v as u16);
        }
        NodeIdentifier::Numeric(v) => {
            enc.write_u8(NODE_NUMERIC | flags);
            enc.write_u16(ns);
            enc.write_u32(*v);
        }
        NodeIdentifier::String(s) => {
            enc.write_u8(NODE_STRING | flags);
            enc.write_u16(ns);
            s.encode(enc)?;
        }
        NodeIdentifier::Guid(g) => {
            enc.write_u8(NODE_GUID | flags);
            enc.write_u16(ns);
            g.encode(enc)?;
        }
        NodeIdentifier::Opaque(b) => {
            enc.write_u8(NODE_OPAQUE | flags);
            enc.write_u16(ns);
            ByteString::from(b.as_slice()).encode(enc)?;
        }
    }
    Ok(())
}

/// Returns the node id and the expanded-node-id flag bits.
fn decode_node_id(dec: &mut Decoder<'_>, allow_flags: bool) -> CodecResult<(NodeId, u8)> {
    let raw = dec.read_u8()?;
    let flags = raw & (EXPANDED_SERVER_INDEX | EXPANDED_NAMESPACE_URI);
    if flags != 0 && !allow_flags {
        return Err(CodecError::invalid_mask("NodeId", raw));
    }
    let node = match raw & 0x3F {
        NODE_TWO_BYTE => NodeId::numeric(0, u32::from(dec.read_u8()?)),
        NODE_FOUR_BYTE => {
            let ns = u16::from(dec.read_u8()?);
            NodeId::numeric(ns, u32::from(dec.read_u16()?))
        }
        NODE_NUMERIC => {
            let ns = dec.read_u16()?;
            NodeId::numeric(ns, dec.read_u32()?)
        }
        NODE_STRING => {
            let ns = dec.read_u16()?;
            NodeId::string(ns, String::decode(dec)?)
        }
        NODE_GUID => {
            let ns = dec.read_u16()?;
            NodeId::guid(ns, Uuid::decode(dec)?)
        }
        NODE_OPAQUE => {
            let ns = dec.read_u16()?;
            let bytes = ByteString::decode(dec)?.into_inner().unwrap_or_default();
            NodeId::opaque(ns, bytes)
        }
        _ => return Err(CodecError::invalid_mask("NodeId", raw)),
    };
    Ok((node, flags))
}

impl BinaryEncode for NodeId {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        encode_node_id(self, 0, enc)
    }
}

impl BinaryDecode for NodeId {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        decode_node_id(dec, false).map(|(node, _)| node)
    }
}

impl BinaryEncode for ExpandedNodeId {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        let mut flags = 0u8;
        if !self.namespace_uri.is_empty() {
            flags |= EXPANDED_NAMESPACE_URI;
        }
        if self.server_index != 0 {
            flags |= EXPANDED_SERVER_INDEX;
        }
        encode_node_id(&self.node_id, flags, enc)?;
        if flags & EXPANDED_NAMESPACE_URI != 0 {
            self.namespace_uri.encode(enc)?;
        }
        if flags & EXPANDED_SERVER_INDEX != 0 {
            enc.write_u32(self.server_index);
        }
        Ok(())
    }
}

impl BinaryDecode for ExpandedNodeId {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let (node_id, flags) = decode_node_id(dec, true)?;
        let namespace_uri = if flags & EXPANDED_NAMESPACE_URI != 0 {
            String::decode(dec)?
        } else {
            String::new()
        };
        let server_index = if flags & EXPANDED_SERVER_INDEX != 0 {
            dec.read_u32()?
        } else {
            0
        };
        Ok(ExpandedNodeId {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}

// =============================================================================
// DiagnosticInfo
// =============================================================================

const DI_SYMBOLIC_ID: u8 = 0x01;
const DI_NAMESPACE_URI: u8 = 0x02;
const DI_LOCALIZED_TEXT: u8 = 0x04;
const DI_LOCALE: u8 = 0x08;
const DI_ADDITIONAL_INFO: u8 = 0x10;
const DI_INNER_STATUS: u8 = 0x20;
const DI_INNER_DIAGNOSTIC: u8 = 0x40;

impl BinaryEncode for DiagnosticInfo {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= DI_SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            mask |= DI_NAMESPACE_URI;
        }
        if self.localized_text.is_some() {
            mask |= DI_LOCALIZED_TEXT;
        }
        if self.locale.is_some() {
            mask |= DI_LOCALE;
        }
        if self.additional_info.is_some() {
            mask |= DI_ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            mask |= DI_INNER_STATUS;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= DI_INNER_DIAGNOSTIC;
        }
        enc.write_u8(mask);

        if let Some(v) = self.symbolic_id {
            enc.write_i32(v);
        }
        if let Some(v) = self.namespace_uri {
            enc.write_i32(v);
        }
        if let Some(v) = self.locale {
            enc.write_i32(v);
        }
        if let Some(v) = self.localized_text {
            enc.write_i32(v);
        }
        if let Some(v) = &self.additional_info {
            v.encode(enc)?;
        }
        if let Some(v) = self.inner_status_code {
            v.encode(enc)?;
        }
        if let Some(v) = &self.inner_diagnostic_info {
            v.encode(enc)?;
        }
        Ok(())
    }
}

impl BinaryDecode for DiagnosticInfo {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let mask = dec.read_u8()?;
        if mask & 0x80 != 0 {
            return Err(CodecError::invalid_mask("DiagnosticInfo", mask));
        }
        let mut info = DiagnosticInfo::default();
        if mask & DI_SYMBOLIC_ID != 0 {
            info.symbolic_id = Some(dec.read_i32()?);
        }
        if mask & DI_NAMESPACE_URI != 0 {
            info.namespace_uri = Some(dec.read_i32()?);
        }
        if mask & DI_LOCALE != 0 {
            info.locale = Some(dec.read_i32()?);
        }
        if mask & DI_LOCALIZED_TEXT != 0 {
            info.localized_text = Some(dec.read_i32()?);
        }
        if mask & DI_ADDITIONAL_INFO != 0 {
            info.additional_info = Some(String::decode(dec)?);
        }
        if mask & DI_INNER_STATUS != 0 {
            info.inner_status_code = Some(StatusCode::decode(dec)?);
        }
        if mask & DI_INNER_DIAGNOSTIC != 0 {
            dec.enter()?;
            let inner = DiagnosticInfo::decode(dec);
            dec.leave();
            info.inner_diagnostic_info = Some(Box::new(inner?));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_slice, encode_to_vec, TypeRegistry};

    fn roundtrip<T: BinaryEncode + BinaryDecode + PartialEq + std::fmt::Debug>(value: &T) -> Vec<u8> {
        let bytes = encode_to_vec(value).unwrap();
        let back: T = decode_from_slice(&bytes, &TypeRegistry::empty()).unwrap();
        assert_eq!(&back, value);
        bytes
    }

    #[test]
    fn test_node_id_compact_forms() {
        assert_eq!(roundtrip(&NodeId::numeric(0, 85)), vec![0x00, 85]);
        assert_eq!(
            roundtrip(&NodeId::numeric(2, 1025)),
            vec![0x01, 2, 0x01, 0x04]
        );
        assert_eq!(
            roundtrip(&NodeId::numeric(0, 2259)),
            vec![0x01, 0, 0xD3, 0x08]
        );
        assert_eq!(
            roundtrip(&NodeId::numeric(300, 1)),
            vec![0x02, 0x2C, 0x01, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_node_id_string_guid_opaque() {
        let bytes = roundtrip(&NodeId::string(1, "Hello"));
        assert_eq!(bytes[0], NODE_STRING);
        roundtrip(&NodeId::guid(3, Uuid::from_u128(0x0102_0304_0506_0708_090A_0B0C_0D0E_0F10)));
        roundtrip(&NodeId::opaque(4, vec![1, 2, 3]));
    }

    #[test]
    fn test_guid_layout() {
        let guid = Uuid::from_fields(0x7295_0EB9, 0x4433, 0x1100, &[0xAA, 0xBB, 1, 2, 3, 4, 5, 6]);
        let bytes = roundtrip(&guid);
        assert_eq!(&bytes[..8], &[0xB9, 0x0E, 0x95, 0x72, 0x33, 0x44, 0x00, 0x11]);
        assert_eq!(&bytes[8..], &[0xAA, 0xBB, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_expanded_node_id_flags() {
        let expanded = ExpandedNodeId {
            node_id: NodeId::numeric(0, 1),
            namespace_uri: "urn:test".into(),
            server_index: 2,
        };
        let bytes = roundtrip(&expanded);
        assert_eq!(bytes[0], EXPANDED_NAMESPACE_URI | EXPANDED_SERVER_INDEX);
    }

    #[test]
    fn test_plain_node_id_rejects_expanded_flags() {
        let err = decode_from_slice::<NodeId>(&[0x80, 1], &TypeRegistry::empty()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidMask { .. }));
    }

    #[test]
    fn test_localized_text_mask() {
        assert_eq!(roundtrip(&LocalizedText::default()), vec![0]);
        let bytes = roundtrip(&LocalizedText {
            locale: "en".into(),
            text: "Hi".into(),
        });
        assert_eq!(bytes[0], 0x03);
    }

    #[test]
    fn test_byte_string_null_distinct_from_empty() {
        assert_eq!(roundtrip(&ByteString::null()), vec![0xFF; 4]);
        assert_eq!(roundtrip(&ByteString::from(Vec::new())), vec![0; 4]);
    }

    #[test]
    fn test_diagnostic_info_nested() {
        let info = DiagnosticInfo {
            symbolic_id: Some(1),
            locale: Some(2),
            additional_info: Some("detail".into()),
            inner_status_code: Some(StatusCode::BAD_TIMEOUT),
            inner_diagnostic_info: Some(Box::new(DiagnosticInfo {
                localized_text: Some(5),
                ..Default::default()
            })),
            ..Default::default()
        };
        roundtrip(&info);
        roundtrip(&DiagnosticInfo::default());
    }

    #[test]
    fn test_diagnostic_info_depth_limit() {
        let bytes = vec![DI_INNER_DIAGNOSTIC; 64];
        let err = decode_from_slice::<DiagnosticInfo>(&bytes, &TypeRegistry::empty()).unwrap_err();
        assert!(matches!(err, CodecError::DepthExceeded { .. }));
    }
}
