// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Extension objects and the type registry used to decode them.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::{BinaryDecode, BinaryEncode, Decoder, Encoder};
use crate::error::{CodecError, CodecResult};
use crate::types::NodeId;

const BODY_NONE: u8 = 0x00;
const BODY_BINARY: u8 = 0x01;
const BODY_XML: u8 = 0x02;

// =============================================================================
// Traits
// =============================================================================

/// A structure that can travel inside an [`ExtensionObject`].
///
/// Implemented for every [`ExtensionType`]; application code normally
/// implements `ExtensionType` instead.
pub trait Structure: fmt::Debug + Send + Sync + 'static {
    /// Binary encoding id of the concrete type.
    fn encoding_id(&self) -> NodeId;

    /// Encodes the body without the extension object envelope.
    fn encode_body(&self, enc: &mut Encoder) -> CodecResult<()>;

    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// A statically known structure type with a binary encoding id.
///
/// # Examples
///
/// ```ignore
/// impl ExtensionType for Vector {
///     fn binary_encoding_id() -> NodeId {
///         NodeId::numeric(2, 5001)
///     }
/// }
/// registry.register::<Vector>();
/// ```
pub trait ExtensionType: BinaryEncode + BinaryDecode + Clone + fmt::Debug + Send + Sync + 'static {
    /// Binary encoding id.
    fn binary_encoding_id() -> NodeId;
}

impl<T: ExtensionType> Structure for T {
    fn encoding_id(&self) -> NodeId {
        T::binary_encoding_id()
    }

    fn encode_body(&self, enc: &mut Encoder) -> CodecResult<()> {
        self.encode(enc)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// TypeRegistry
// =============================================================================

type DecodeFn = fn(&mut Decoder<'_>) -> CodecResult<Arc<dyn Structure>>;

fn decode_erased<T: ExtensionType>(dec: &mut Decoder<'_>) -> CodecResult<Arc<dyn Structure>> {
    let value: Arc<dyn Structure> = Arc::new(T::decode(dec)?);
    Ok(value)
}

/// Maps binary encoding ids to decoders.
///
/// Ids that are not registered decode to [`ExtensionBody::Binary`].
#[derive(Clone, Default)]
pub struct TypeRegistry {
    decoders: HashMap<NodeId, DecodeFn>,
}

impl TypeRegistry {
    /// A registry that knows no types.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every namespace-0 structure this crate defines.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        crate::messages::register_standard_types(&mut registry);
        registry
    }

    /// Registers a structure type, replacing any earlier entry for its id.
    pub fn register<T: ExtensionType>(&mut self) -> &mut Self {
        self.decoders.insert(T::binary_encoding_id(), decode_erased::<T>);
        self
    }

    /// Returns `true` if the id has a decoder.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.decoders.contains_key(id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    fn decoder(&self, id: &NodeId) -> Option<DecodeFn> {
        self.decoders.get(id).copied()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.decoders.len())
            .finish()
    }
}

fn standard_registry() -> &'static TypeRegistry {
    static STANDARD: OnceLock<TypeRegistry> = OnceLock::new();
    STANDARD.get_or_init(TypeRegistry::standard)
}

// =============================================================================
// ExtensionObject
// =============================================================================

/// Body of an [`ExtensionObject`].
#[derive(Debug, Clone, Default)]
pub enum ExtensionBody {
    /// No body.
    #[default]
    None,
    /// Binary body of a type the registry did not know.
    Binary(Vec<u8>),
    /// XML body.
    Xml(String),
    /// A decoded structure.
    Decoded(Arc<dyn Structure>),
}

/// A structure identified by its encoding id.
#[derive(Debug, Clone, Default)]
pub struct ExtensionObject {
    /// Binary (or XML) encoding id of the body.
    pub type_id: NodeId,
    /// The body.
    pub body: ExtensionBody,
}

impl ExtensionObject {
    /// The null extension object.
    pub fn null() -> Self {
        Self::default()
    }

    /// Wraps a typed structure.
    pub fn from_structure<T: ExtensionType>(value: T) -> Self {
        let structure: Arc<dyn Structure> = Arc::new(value);
        Self {
            type_id: T::binary_encoding_id(),
            body: ExtensionBody::Decoded(structure),
        }
    }

    /// Wraps a raw binary body.
    pub fn from_binary(type_id: NodeId, body: Vec<u8>) -> Self {
        Self {
            type_id,
            body: ExtensionBody::Binary(body),
        }
    }

    /// Returns `true` if there is no body.
    pub fn is_null(&self) -> bool {
        matches!(self.body, ExtensionBody::None)
    }

    /// Returns `true` if the body was left undecoded.
    pub fn is_raw(&self) -> bool {
        matches!(self.body, ExtensionBody::Binary(_))
    }

    /// Borrows the decoded structure if it has type `T`.
    pub fn downcast_ref<T: ExtensionType>(&self) -> Option<&T> {
        match &self.body {
            ExtensionBody::Decoded(s) => s.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Returns the body as `T`, decoding a raw body when the ids match.
    ///
    /// `Ok(None)` means the object carries a different type.
    pub fn decode_as<T: ExtensionType>(&self) -> CodecResult<Option<T>> {
        self.decode_as_with(standard_registry())
    }

    /// Like [`decode_as`](Self::decode_as) with an explicit registry for nested objects.
    pub fn decode_as_with<T: ExtensionType>(&self, registry: &TypeRegistry) -> CodecResult<Option<T>> {
        if let Some(value) = self.downcast_ref::<T>() {
            return Ok(Some(value.clone()));
        }
        if self.type_id != T::binary_encoding_id() {
            return Ok(None);
        }
        match &self.body {
            ExtensionBody::Binary(bytes) => {
                let mut dec = Decoder::new(bytes, registry);
                T::decode(&mut dec).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Re-decodes a raw body with a registry that may know more types.
    pub fn resolve(&self, registry: &TypeRegistry) -> CodecResult<Self> {
        match (&self.body, registry.decoder(&self.type_id)) {
            (ExtensionBody::Binary(bytes), Some(decode)) => {
                let mut dec = Decoder::new(bytes, registry);
                Ok(Self {
                    type_id: self.type_id.clone(),
                    body: ExtensionBody::Decoded(decode(&mut dec)?),
                })
            }
            _ => Ok(self.clone()),
        }
    }

    /// The binary body, encoding a decoded structure if necessary.
    pub fn binary_body(&self) -> CodecResult<Option<Vec<u8>>> {
        match &self.body {
            ExtensionBody::None | ExtensionBody::Xml(_) => Ok(None),
            ExtensionBody::Binary(bytes) => Ok(Some(bytes.clone())),
            ExtensionBody::Decoded(s) => {
                let mut enc = Encoder::new();
                s.encode_body(&mut enc)?;
                Ok(Some(enc.into_bytes().to_vec()))
            }
        }
    }
}

impl PartialEq for ExtensionObject {
    fn eq(&self, other: &Self) -> bool {
        if self.type_id != other.type_id {
            return false;
        }
        match (&self.body, &other.body) {
            (ExtensionBody::None, ExtensionBody::None) => true,
            (ExtensionBody::Xml(a), ExtensionBody::Xml(b)) => a == b,
            (ExtensionBody::None, _) | (_, ExtensionBody::None) => false,
            (ExtensionBody::Xml(_), _) | (_, ExtensionBody::Xml(_)) => false,
            _ => match (self.binary_body(), other.binary_body()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl BinaryEncode for ExtensionObject {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        match &self.body {
            ExtensionBody::None => {
                self.type_id.encode(enc)?;
                enc.write_u8(BODY_NONE);
            }
            ExtensionBody::Xml(xml) => {
                self.type_id.encode(enc)?;
                enc.write_u8(BODY_XML);
                xml.encode(enc)?;
            }
            ExtensionBody::Binary(bytes) => {
                self.type_id.encode(enc)?;
                enc.write_u8(BODY_BINARY);
                enc.write_length(Some(bytes.len()))?;
                enc.write_bytes(bytes);
            }
            ExtensionBody::Decoded(structure) => {
                structure.encoding_id().encode(enc)?;
                enc.write_u8(BODY_BINARY);
                let mut body = Encoder::new();
                structure.encode_body(&mut body)?;
                enc.write_length(Some(body.len()))?;
                enc.write_bytes(body.as_slice());
            }
        }
        Ok(())
    }
}

impl BinaryDecode for ExtensionObject {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.enter()?;
        let result = decode_extension_object(dec);
        dec.leave();
        result
    }
}

fn decode_extension_object(dec: &mut Decoder<'_>) -> CodecResult<ExtensionObject> {
    let type_id = NodeId::decode(dec)?;
    let encoding = dec.read_u8()?;
    let body = match encoding {
        BODY_NONE => ExtensionBody::None,
        BODY_XML => ExtensionBody::Xml(String::decode(dec)?),
        BODY_BINARY => {
            let limit = dec.limits().max_byte_string_length;
            let len = dec
                .read_length("extension object body", limit, 1)?
                .unwrap_or(0);
            let bytes = dec.read_bytes(len)?;
            match dec.registry().decoder(&type_id) {
                // Trailing bytes are tolerated: newer servers may append fields.
                Some(decode) => ExtensionBody::Decoded(decode(&mut dec.nested(bytes))?),
                None => ExtensionBody::Binary(bytes.to_vec()),
            }
        }
        other => return Err(CodecError::invalid_mask("ExtensionObject", other)),
    };
    Ok(ExtensionObject { type_id, body })
}
