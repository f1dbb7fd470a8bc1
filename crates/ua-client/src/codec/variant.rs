// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The `Variant` union and `DataValue`.

use std::fmt;

use uuid::Uuid;

use super::{BinaryDecode, BinaryEncode, Decoder, Encoder, ExtensionObject};
use crate::error::{CodecError, CodecResult};
use crate::types::{
    ByteString, DateTime, DiagnosticInfo, ExpandedNodeId, LocalizedText, NodeId, QualifiedName,
    StatusCode, XmlElement,
};

const ARRAY_VALUES: u8 = 0x80;
const ARRAY_DIMENSIONS: u8 = 0x40;
const TYPE_MASK: u8 = 0x3F;

// =============================================================================
// VariantTypeId
// =============================================================================

/// Built-in type ids as they appear in the variant encoding mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum VariantTypeId {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
    DiagnosticInfo = 25,
}

impl VariantTypeId {
    /// Looks up a type id from the encoding mask bits.
    pub fn from_u8(value: u8) -> Option<Self> {
        use VariantTypeId::*;
        Some(match value {
            1 => Boolean,
            2 => SByte,
            3 => Byte,
            4 => Int16,
            5 => UInt16,
            6 => Int32,
            7 => UInt32,
            8 => Int64,
            9 => UInt64,
            10 => Float,
            11 => Double,
            12 => String,
            13 => DateTime,
            14 => Guid,
            15 => ByteString,
            16 => XmlElement,
            17 => NodeId,
            18 => ExpandedNodeId,
            19 => StatusCode,
            20 => QualifiedName,
            21 => LocalizedText,
            22 => ExtensionObject,
            23 => DataValue,
            24 => Variant,
            25 => DiagnosticInfo,
            _ => return None,
        })
    }

    /// Smallest possible encoded size of one element, used to bound array allocation.
    fn min_size(self) -> usize {
        use VariantTypeId::*;
        match self {
            Boolean | SByte | Byte | DataValue | Variant | DiagnosticInfo | LocalizedText => 1,
            Int16 | UInt16 | NodeId | ExpandedNodeId => 2,
            ExtensionObject => 3,
            Int32 | UInt32 | Float | String | ByteString | XmlElement | StatusCode => 4,
            QualifiedName => 6,
            Int64 | UInt64 | Double | DateTime => 8,
            Guid => 16,
        }
    }
}

// =============================================================================
// Variant
// =============================================================================

/// A value of any built-in type, or an array of them.
///
/// Large payloads are boxed to keep the enum small.
#[derive(Debug, Clone, PartialEq, Default)]
#[allow(missing_docs)]
pub enum Variant {
    /// The null variant.
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime),
    Guid(Box<Uuid>),
    ByteString(ByteString),
    XmlElement(XmlElement),
    NodeId(Box<NodeId>),
    ExpandedNodeId(Box<ExpandedNodeId>),
    StatusCode(StatusCode),
    QualifiedName(Box<QualifiedName>),
    LocalizedText(Box<LocalizedText>),
    ExtensionObject(Box<ExtensionObject>),
    DataValue(Box<DataValue>),
    DiagnosticInfo(Box<DiagnosticInfo>),
    /// A one- or multi-dimensional array.
    Array(Box<VariantArray>),
}

/// Array payload of a [`Variant`].
#[derive(Debug, Clone, PartialEq)]
pub struct VariantArray {
    /// Type of every element. `Variant` means elements are themselves variants.
    pub element_type: VariantTypeId,
    /// Elements in row-major order; `None` is the absent array.
    pub values: Option<Vec<Variant>>,
    /// Dimension lengths for multi-dimensional arrays.
    pub dimensions: Option<Vec<i32>>,
}

impl VariantArray {
    /// Creates a one-dimensional array, checking that every element matches.
    pub fn new(element_type: VariantTypeId, values: Vec<Variant>) -> CodecResult<Self> {
        let array = Self {
            element_type,
            values: Some(values),
            dimensions: None,
        };
        array.validate()?;
        Ok(array)
    }

    /// Creates a multi-dimensional array.
    pub fn with_dimensions(
        element_type: VariantTypeId,
        values: Vec<Variant>,
        dimensions: Vec<i32>,
    ) -> CodecResult<Self> {
        let array = Self {
            element_type,
            values: Some(values),
            dimensions: Some(dimensions),
        };
        array.validate()?;
        Ok(array)
    }

    /// Number of elements; zero for the absent array.
    pub fn len(&self) -> usize {
        self.values.as_ref().map_or(0, Vec::len)
    }

    /// Returns `true` for absent or zero-length arrays.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn validate(&self) -> CodecResult<()> {
        if let Some(values) = &self.values {
            if self.element_type != VariantTypeId::Variant {
                if let Some(bad) = values
                    .iter()
                    .find(|v| v.type_id() != Some(self.element_type))
                {
                    return Err(CodecError::unexpected_type(
                        format!("{:?}", self.element_type),
                        format!("{:?}", bad.type_id()),
                    ));
                }
            }
        }
        if let Some(dims) = &self.dimensions {
            if dims.iter().any(|d| *d < 0) {
                return Err(CodecError::invalid_value(
                    "Variant",
                    "negative array dimension",
                ));
            }
            let product: i64 = dims.iter().map(|d| i64::from(*d)).product();
            if product != self.len() as i64 {
                return Err(CodecError::invalid_value(
                    "Variant",
                    format!("dimensions {:?} do not match {} elements", dims, self.len()),
                ));
            }
        }
        Ok(())
    }
}

impl Variant {
    /// Returns the built-in type id, or `None` for empty and array variants.
    pub fn type_id(&self) -> Option<VariantTypeId> {
        use VariantTypeId as T;
        Some(match self {
            Variant::Empty | Variant::Array(_) => return None,
            Variant::Boolean(_) => T::Boolean,
            Variant::SByte(_) => T::SByte,
            Variant::Byte(_) => T::Byte,
            Variant::Int16(_) => T::Int16,
            Variant::UInt16(_) => T::UInt16,
            Variant::Int32(_) => T::Int32,
            Variant::UInt32(_) => T::UInt32,
            Variant::Int64(_) => T::Int64,
            Variant::UInt64(_) => T::UInt64,
            Variant::Float(_) => T::Float,
            Variant::Double(_) => T::Double,
            Variant::String(_) => T::String,
            Variant::DateTime(_) => T::DateTime,
            Variant::Guid(_) => T::Guid,
            Variant::ByteString(_) => T::ByteString,
            Variant::XmlElement(_) => T::XmlElement,
            Variant::NodeId(_) => T::NodeId,
            Variant::ExpandedNodeId(_) => T::ExpandedNodeId,
            Variant::StatusCode(_) => T::StatusCode,
            Variant::QualifiedName(_) => T::QualifiedName,
            Variant::LocalizedText(_) => T::LocalizedText,
            Variant::ExtensionObject(_) => T::ExtensionObject,
            Variant::DataValue(_) => T::DataValue,
            Variant::DiagnosticInfo(_) => T::DiagnosticInfo,
        })
    }

    /// Returns `true` for the null variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    /// Builds an array variant, checking element types.
    pub fn array(element_type: VariantTypeId, values: Vec<Variant>) -> CodecResult<Self> {
        Ok(Variant::Array(Box::new(VariantArray::new(element_type, values)?)))
    }

    /// Borrows the array payload.
    pub fn as_array(&self) -> Option<&VariantArray> {
        match self {
            Variant::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Converts any numeric scalar to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        Some(match self {
            Variant::SByte(v) => f64::from(*v),
            Variant::Byte(v) => f64::from(*v),
            Variant::Int16(v) => f64::from(*v),
            Variant::UInt16(v) => f64::from(*v),
            Variant::Int32(v) => f64::from(*v),
            Variant::UInt32(v) => f64::from(*v),
            Variant::Int64(v) => *v as f64,
            Variant::UInt64(v) => *v as f64,
            Variant::Float(v) => f64::from(*v),
            Variant::Double(v) => *v,
            _ => return None,
        })
    }

    /// Converts any integer scalar to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        Some(match self {
            Variant::SByte(v) => i64::from(*v),
            Variant::Byte(v) => i64::from(*v),
            Variant::Int16(v) => i64::from(*v),
            Variant::UInt16(v) => i64::from(*v),
            Variant::Int32(v) => i64::from(*v),
            Variant::UInt32(v) => i64::from(*v),
            Variant::Int64(v) => *v,
            Variant::UInt64(v) => i64::try_from(*v).ok()?,
            _ => return None,
        })
    }

    /// Returns the boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Borrows the string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(v) => Some(v),
            _ => None,
        }
    }

    /// Borrows the extension object.
    pub fn as_extension_object(&self) -> Option<&ExtensionObject> {
        match self {
            Variant::ExtensionObject(v) => Some(v),
            _ => None,
        }
    }

    fn encode_value(&self, enc: &mut Encoder) -> CodecResult<()> {
        match self {
            Variant::Empty | Variant::Array(_) => Ok(()),
            Variant::Boolean(v) => v.encode(enc),
            Variant::SByte(v) => v.encode(enc),
            Variant::Byte(v) => v.encode(enc),
            Variant::Int16(v) => v.encode(enc),
            Variant::UInt16(v) => v.encode(enc),
            Variant::Int32(v) => v.encode(enc),
            Variant::UInt32(v) => v.encode(enc),
            Variant::Int64(v) => v.encode(enc),
            Variant::UInt64(v) => v.encode(enc),
            Variant::Float(v) => v.encode(enc),
            Variant::Double(v) => v.encode(enc),
            Variant::String(v) => v.encode(enc),
            Variant::DateTime(v) => v.encode(enc),
            Variant::Guid(v) => v.encode(enc),
            Variant::ByteString(v) => v.encode(enc),
            Variant::XmlElement(v) => v.encode(enc),
            Variant::NodeId(v) => v.encode(enc),
            Variant::ExpandedNodeId(v) => v.encode(enc),
            Variant::StatusCode(v) => v.encode(enc),
            Variant::QualifiedName(v) => v.encode(enc),
            Variant::LocalizedText(v) => v.encode(enc),
            Variant::ExtensionObject(v) => v.encode(enc),
            Variant::DataValue(v) => v.encode(enc),
            Variant::DiagnosticInfo(v) => v.encode(enc),
        }
    }

    fn decode_value(type_id: VariantTypeId, dec: &mut Decoder<'_>) -> CodecResult<Self> {
        use VariantTypeId as T;
        Ok(match type_id {
            T::Boolean => Variant::Boolean(bool::decode(dec)?),
            T::SByte => Variant::SByte(dec.read_i8()?),
            T::Byte => Variant::Byte(dec.read_u8()?),
            T::Int16 => Variant::Int16(dec.read_i16()?),
            T::UInt16 => Variant::UInt16(dec.read_u16()?),
            T::Int32 => Variant::Int32(dec.read_i32()?),
            T::UInt32 => Variant::UInt32(dec.read_u32()?),
            T::Int64 => Variant::Int64(dec.read_i64()?),
            T::UInt64 => Variant::UInt64(dec.read_u64()?),
            T::Float => Variant::Float(dec.read_f32()?),
            T::Double => Variant::Double(dec.read_f64()?),
            T::String => Variant::String(String::decode(dec)?),
            T::DateTime => Variant::DateTime(DateTime::decode(dec)?),
            T::Guid => Variant::Guid(Box::new(Uuid::decode(dec)?)),
            T::ByteString => Variant::ByteString(ByteString::decode(dec)?),
            T::XmlElement => Variant::XmlElement(XmlElement::decode(dec)?),
            T::NodeId => Variant::NodeId(Box::new(NodeId::decode(dec)?)),
            T::ExpandedNodeId => Variant::ExpandedNodeId(Box::new(ExpandedNodeId::decode(dec)?)),
            T::StatusCode => Variant::StatusCode(StatusCode::decode(dec)?),
            T::QualifiedName => Variant::QualifiedName(Box::new(QualifiedName::decode(dec)?)),
            T::LocalizedText => Variant::LocalizedText(Box::new(LocalizedText::decode(dec)?)),
            T::ExtensionObject => Variant::ExtensionObject(Box::new(ExtensionObject::decode(dec)?)),
            T::DataValue => Variant::DataValue(Box::new(DataValue::decode(dec)?)),
            T::DiagnosticInfo => Variant::DiagnosticInfo(Box::new(DiagnosticInfo::decode(dec)?)),
            T::Variant => Variant::decode(dec)?,
        })
    }
}

impl BinaryEncode for Variant {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        match self {
            Variant::Empty => {
                enc.write_u8(0);
                Ok(())
            }
            Variant::Array(array) => {
                array.validate()?;
                let mut mask = array.element_type as u8 | ARRAY_VALUES;
                if array.dimensions.is_some() {
                    mask |= ARRAY_DIMENSIONS;
                }
                enc.write_u8(mask);
                match &array.values {
                    None => enc.write_length(None)?,
                    Some(values) => {
                        enc.write_length(Some(values.len()))?;
                        for value in values {
                            if array.element_type == VariantTypeId::Variant {
                                value.encode(enc)?;
                            } else {
                                value.encode_value(enc)?;
                            }
                        }
                    }
                }
                if let Some(dims) = &array.dimensions {
                    Some(dims.clone()).encode(enc)?;
                }
                Ok(())
            }
            scalar => {
                // type_id is Some for every non-empty scalar
                let type_id = scalar.type_id().map_or(0, |t| t as u8);
                enc.write_u8(type_id);
                scalar.encode_value(enc)
            }
        }
    }
}

impl BinaryDecode for Variant {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        dec.enter()?;
        let result = decode_variant(dec);
        dec.leave();
        result
    }
}

fn decode_variant(dec: &mut Decoder<'_>) -> CodecResult<Variant> {
    let mask = dec.read_u8()?;
    let raw_type = mask & TYPE_MASK;
    if raw_type == 0 {
        if mask != 0 {
            return Err(CodecError::invalid_mask("Variant", mask));
        }
        return Ok(Variant::Empty);
    }
    let type_id =
        VariantTypeId::from_u8(raw_type).ok_or_else(|| CodecError::invalid_mask("Variant", mask))?;

    if mask & ARRAY_VALUES == 0 {
        if mask & ARRAY_DIMENSIONS != 0 || type_id == VariantTypeId::Variant {
            return Err(CodecError::invalid_mask("Variant", mask));
        }
        return Variant::decode_value(type_id, dec);
    }

    let limit = dec.limits().max_array_length;
    let values = match dec.read_length("variant array", limit, type_id.min_size())? {
        None => None,
        Some(len) => {
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(Variant::decode_value(type_id, dec)?);
            }
            Some(values)
        }
    };
    let dimensions = if mask & ARRAY_DIMENSIONS != 0 {
        Option::<Vec<i32>>::decode(dec)?
    } else {
        None
    };
    let array = VariantArray {
        element_type: type_id,
        values,
        dimensions,
    };
    array.validate()?;
    Ok(Variant::Array(Box::new(array)))
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => f.write_str("null"),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::SByte(v) => write!(f, "{}", v),
            Variant::Byte(v) => write!(f, "{}", v),
            Variant::Int16(v) => write!(f, "{}", v),
            Variant::UInt16(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{:?}", v),
            Variant::DateTime(v) => write!(f, "{}", v),
            Variant::Guid(v) => write!(f, "{}", v),
            Variant::ByteString(v) => write!(f, "<{} bytes>", v.len()),
            Variant::XmlElement(v) => write!(f, "{}", v.0),
            Variant::NodeId(v) => write!(f, "{}", v),
            Variant::ExpandedNodeId(v) => write!(f, "{}", v),
            Variant::StatusCode(v) => write!(f, "{}", v),
            Variant::QualifiedName(v) => write!(f, "{}", v),
            Variant::LocalizedText(v) => write!(f, "{}", v),
            Variant::ExtensionObject(v) => write!(f, "ExtensionObject({})", v.type_id),
            Variant::DataValue(v) => match &v.value {
                Some(inner) => write!(f, "{}", inner),
                None => f.write_str("null"),
            },
            Variant::DiagnosticInfo(_) => f.write_str("DiagnosticInfo"),
            Variant::Array(array) => {
                f.write_str("[")?;
                for (i, value) in array.values.iter().flatten().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                f.write_str("]")
            }
        }
    }
}

// =============================================================================
// Conversions
// =============================================================================

macro_rules! variant_from {
    ($( $ty:ty => $variant:ident $(, $wrap:path)? ; )+) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Variant::$variant($($wrap)?(value))
                }
            }

            impl From<Vec<$ty>> for Variant {
                fn from(values: Vec<$ty>) -> Self {
                    Variant::Array(Box::new(VariantArray {
                        element_type: VariantTypeId::$variant,
                        values: Some(values.into_iter().map(Variant::from).collect()),
                        dimensions: None,
                    }))
                }
            }
        )+
    };
}

variant_from! {
    bool => Boolean;
    i8 => SByte;
    u8 => Byte;
    i16 => Int16;
    u16 => UInt16;
    i32 => Int32;
    u32 => UInt32;
    i64 => Int64;
    u64 => UInt64;
    f32 => Float;
    f64 => Double;
    String => String;
    DateTime => DateTime;
    Uuid => Guid, Box::new;
    ByteString => ByteString;
    NodeId => NodeId, Box::new;
    StatusCode => StatusCode;
    QualifiedName => QualifiedName, Box::new;
    LocalizedText => LocalizedText, Box::new;
    ExtensionObject => ExtensionObject, Box::new;
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<DataValue> for Variant {
    fn from(value: DataValue) -> Self {
        Variant::DataValue(Box::new(value))
    }
}

impl From<VariantArray> for Variant {
    fn from(value: VariantArray) -> Self {
        Variant::Array(Box::new(value))
    }
}

// =============================================================================
// DataValue
// =============================================================================

const DV_VALUE: u8 = 0x01;
const DV_STATUS: u8 = 0x02;
const DV_SOURCE_TIMESTAMP: u8 = 0x04;
const DV_SERVER_TIMESTAMP: u8 = 0x08;
const DV_SOURCE_PICOSECONDS: u8 = 0x10;
const DV_SERVER_PICOSECONDS: u8 = 0x20;

/// A value with quality and timestamps.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    /// The value, if any.
    pub value: Option<Variant>,
    /// Quality; absent means Good.
    pub status: Option<StatusCode>,
    /// When the source produced the value.
    pub source_timestamp: Option<DateTime>,
    /// Sub-tick precision of the source timestamp.
    pub source_picoseconds: Option<u16>,
    /// When the server received the value.
    pub server_timestamp: Option<DateTime>,
    /// Sub-tick precision of the server timestamp.
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    /// A data value carrying only a value.
    pub fn new(value: impl Into<Variant>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// A data value carrying only a status.
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// The effective status: absent means Good.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }

    /// Returns `true` when the effective status is Good.
    pub fn is_good(&self) -> bool {
        self.status().is_good()
    }
}

impl BinaryEncode for DataValue {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= DV_VALUE;
        }
        if self.status.is_some() {
            mask |= DV_STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= DV_SOURCE_TIMESTAMP;
        }
        if self.server_timestamp.is_some() {
            mask |= DV_SERVER_TIMESTAMP;
        }
        if self.source_picoseconds.is_some() {
            mask |= DV_SOURCE_PICOSECONDS;
        }
        if self.server_picoseconds.is_some() {
            mask |= DV_SERVER_PICOSECONDS;
        }
        enc.write_u8(mask);
        if let Some(v) = &self.value {
            v.encode(enc)?;
        }
        if let Some(v) = self.status {
            v.encode(enc)?;
        }
        if let Some(v) = self.source_timestamp {
            v.encode(enc)?;
        }
        if let Some(v) = self.source_picoseconds {
            enc.write_u16(v);
        }
        if let Some(v) = self.server_timestamp {
            v.encode(enc)?;
        }
        if let Some(v) = self.server_picoseconds {
            enc.write_u16(v);
        }
        Ok(())
    }
}

impl BinaryDecode for DataValue {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let mask = dec.read_u8()?;
        if mask & 0xC0 != 0 {
            return Err(CodecError::invalid_mask("DataValue", mask));
        }
        let mut dv = DataValue::default();
        if mask & DV_VALUE != 0 {
            dv.value = Some(Variant::decode(dec)?);
        }
        if mask & DV_STATUS != 0 {
            dv.status = Some(StatusCode::decode(dec)?);
        }
        if mask & DV_SOURCE_TIMESTAMP != 0 {
            dv.source_timestamp = Some(DateTime::decode(dec)?);
        }
        if mask & DV_SOURCE_PICOSECONDS != 0 {
            dv.source_picoseconds = Some(dec.read_u16()?);
        }
        if mask & DV_SERVER_TIMESTAMP != 0 {
            dv.server_timestamp = Some(DateTime::decode(dec)?);
        }
        if mask & DV_SERVER_PICOSECONDS != 0 {
            dv.server_picoseconds = Some(dec.read_u16()?);
        }
        Ok(dv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_from_slice, encode_to_vec, TypeRegistry};

    fn roundtrip(value: &Variant) -> Vec<u8> {
        let bytes = encode_to_vec(value).unwrap();
        let back: Variant = decode_from_slice(&bytes, &TypeRegistry::standard()).unwrap();
        assert_eq!(&back, value);
        bytes
    }

    #[test]
    fn test_scalar_encoding() {
        assert_eq!(roundtrip(&Variant::Empty), vec![0]);
        assert_eq!(roundtrip(&Variant::Int32(-2)), vec![6, 0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(roundtrip(&Variant::Boolean(true)), vec![1, 1]);
        roundtrip(&Variant::from("text"));
        roundtrip(&Variant::from(NodeId::string(2, "Demo")));
        roundtrip(&Variant::from(LocalizedText::new("hello")));
        roundtrip(&Variant::from(DateTime::from_ticks(133_000_000_000_000_000)));
        roundtrip(&Variant::from(Uuid::from_u128(42)));
    }

    /// Two distinct values of every built-in type, keyed by type id.
    fn samples() -> Vec<(VariantTypeId, [Variant; 2])> {
        use VariantTypeId as T;
        let opaque = |bytes: Vec<u8>| ExtensionObject {
            type_id: NodeId::numeric(2, 5001),
            body: crate::codec::ExtensionBody::Binary(bytes),
        };
        vec![
            (T::Boolean, [Variant::Boolean(true), Variant::Boolean(false)]),
            (T::SByte, [Variant::SByte(-7), Variant::SByte(i8::MAX)]),
            (T::Byte, [Variant::Byte(0), Variant::Byte(u8::MAX)]),
            (T::Int16, [Variant::Int16(-300), Variant::Int16(i16::MIN)]),
            (T::UInt16, [Variant::UInt16(300), Variant::UInt16(u16::MAX)]),
            (T::Int32, [Variant::Int32(-70_000), Variant::Int32(i32::MAX)]),
            (T::UInt32, [Variant::UInt32(70_000), Variant::UInt32(u32::MAX)]),
            (T::Int64, [Variant::Int64(-1 << 40), Variant::Int64(i64::MIN)]),
            (T::UInt64, [Variant::UInt64(1 << 40), Variant::UInt64(u64::MAX)]),
            (T::Float, [Variant::Float(1.5), Variant::Float(-0.25)]),
            (T::Double, [Variant::Double(21.75), Variant::Double(-1e300)]),
            (T::String, [Variant::from("boiler"), Variant::from("")]),
            (
                T::DateTime,
                [
                    Variant::from(DateTime::from_ticks(133_000_000_000_000_000)),
                    Variant::from(DateTime::from_ticks(130_000_000_000_000_000)),
                ],
            ),
            (T::Guid, [Variant::from(Uuid::from_u128(42)), Variant::from(Uuid::from_u128(u128::MAX))]),
            (
                T::ByteString,
                [
                    Variant::ByteString(ByteString::from(vec![1, 2, 3])),
                    Variant::ByteString(ByteString::from(Vec::new())),
                ],
            ),
            (
                T::XmlElement,
                [
                    Variant::XmlElement(XmlElement("<a/>".into())),
                    Variant::XmlElement(XmlElement("<b>c</b>".into())),
                ],
            ),
            (
                T::NodeId,
                [
                    Variant::from(NodeId::numeric(0, 85)),
                    Variant::from(NodeId::string(2, "Demo")),
                ],
            ),
            (
                T::ExpandedNodeId,
                [
                    Variant::ExpandedNodeId(Box::new(ExpandedNodeId {
                        node_id: NodeId::numeric(1, 7),
                        namespace_uri: "urn:demo".into(),
                        server_index: 0,
                    })),
                    Variant::ExpandedNodeId(Box::new(ExpandedNodeId {
                        node_id: NodeId::string(3, "remote"),
                        namespace_uri: String::new(),
                        server_index: 2,
                    })),
                ],
            ),
            (
                T::StatusCode,
                [
                    Variant::StatusCode(StatusCode::GOOD),
                    Variant::StatusCode(StatusCode::BAD_TIMEOUT),
                ],
            ),
            (
                T::QualifiedName,
                [
                    Variant::QualifiedName(Box::new(QualifiedName::new(0, "Server"))),
                    Variant::QualifiedName(Box::new(QualifiedName::new(2, "Temperature"))),
                ],
            ),
            (
                T::LocalizedText,
                [
                    Variant::from(LocalizedText::new("hello")),
                    Variant::from(LocalizedText::new("bonjour")),
                ],
            ),
            (
                T::ExtensionObject,
                [
                    Variant::ExtensionObject(Box::new(opaque(vec![9, 8, 7]))),
                    Variant::ExtensionObject(Box::new(ExtensionObject::null())),
                ],
            ),
            (
                T::DataValue,
                [
                    Variant::from(DataValue::new(1.5f64)),
                    Variant::from(DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN)),
                ],
            ),
            (T::Variant, [Variant::Int32(1), Variant::from("mixed")]),
            (
                T::DiagnosticInfo,
                [
                    Variant::DiagnosticInfo(Box::new(DiagnosticInfo {
                        symbolic_id: Some(1),
                        additional_info: Some("detail".into()),
                        ..Default::default()
                    })),
                    Variant::DiagnosticInfo(Box::new(DiagnosticInfo {
                        inner_status_code: Some(StatusCode::BAD_TIMEOUT),
                        ..Default::default()
                    })),
                ],
            ),
        ]
    }

    #[test]
    fn test_every_builtin_type_in_every_shape() {
        let table = samples();
        assert_eq!(table.len(), 25);
        for (id, (element_type, [a, b])) in table.into_iter().enumerate() {
            assert_eq!(element_type as u8, id as u8 + 1);
            assert_eq!(VariantTypeId::from_u8(element_type as u8), Some(element_type));

            // A variant scalar is the inner value itself, so type 24 only
            // appears as an array element type.
            if element_type != VariantTypeId::Variant {
                assert_eq!(a.type_id(), Some(element_type), "{element_type:?}");
                let bytes = roundtrip(&a);
                assert_eq!(bytes[0], element_type as u8, "{element_type:?}");
                roundtrip(&b);
            }

            let populated = Variant::array(element_type, vec![a.clone(), b.clone()]).unwrap();
            assert_eq!(roundtrip(&populated)[0], element_type as u8 | ARRAY_VALUES, "{element_type:?}");

            let empty = Variant::array(element_type, Vec::new()).unwrap();
            assert_eq!(&roundtrip(&empty)[1..], &[0, 0, 0, 0], "{element_type:?}");

            let absent = Variant::Array(Box::new(VariantArray {
                element_type,
                values: None,
                dimensions: None,
            }));
            assert_eq!(&roundtrip(&absent)[1..], &[0xFF; 4], "{element_type:?}");

            let matrix = VariantArray::with_dimensions(element_type, vec![a.clone(), b.clone(), b, a], vec![2, 2]).unwrap();
            let bytes = roundtrip(&Variant::from(matrix));
            assert_eq!(bytes[0], element_type as u8 | ARRAY_VALUES | ARRAY_DIMENSIONS, "{element_type:?}");
        }
    }

    #[test]
    fn test_array_absent_vs_empty() {
        let absent = Variant::Array(Box::new(VariantArray {
            element_type: VariantTypeId::Double,
            values: None,
            dimensions: None,
        }));
        let empty = Variant::from(Vec::<f64>::new());
        let absent_bytes = roundtrip(&absent);
        let empty_bytes = roundtrip(&empty);
        assert_eq!(absent_bytes, vec![11 | 0x80, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(empty_bytes, vec![11 | 0x80, 0, 0, 0, 0]);
        assert_ne!(absent, empty);
    }

    #[test]
    fn test_matrix_dimensions_follow_values() {
        let matrix = VariantArray::with_dimensions(
            VariantTypeId::Byte,
            vec![1u8.into(), 2u8.into(), 3u8.into(), 4u8.into(), 5u8.into(), 6u8.into()],
            vec![2, 3],
        )
        .unwrap();
        let bytes = roundtrip(&Variant::from(matrix));
        assert_eq!(bytes[0], 3 | 0x80 | 0x40);
        assert_eq!(&bytes[5..11], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&bytes[11..], &[2, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = VariantArray::with_dimensions(VariantTypeId::Byte, vec![1u8.into()], vec![2, 2])
            .unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { .. }));
    }

    #[test]
    fn test_mixed_array_needs_variant_element_type() {
        assert!(Variant::array(VariantTypeId::Int32, vec![1i32.into(), "x".into()]).is_err());
        let mixed = Variant::array(VariantTypeId::Variant, vec![1i32.into(), "x".into()]).unwrap();
        roundtrip(&mixed);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = decode_from_slice::<Variant>(&[30], &TypeRegistry::empty()).unwrap_err();
        assert!(matches!(err, CodecError::InvalidMask { .. }));
    }

    #[test]
    fn test_data_value_mask_order() {
        let dv = DataValue {
            value: Some(Variant::Double(1.5)),
            status: Some(StatusCode::BAD_TIMEOUT),
            source_timestamp: Some(DateTime::from_ticks(1)),
            source_picoseconds: Some(7),
            server_timestamp: Some(DateTime::from_ticks(2)),
            server_picoseconds: Some(9),
        };
        let bytes = encode_to_vec(&dv).unwrap();
        assert_eq!(bytes[0], 0x3F);
        let back: DataValue = decode_from_slice(&bytes, &TypeRegistry::empty()).unwrap();
        assert_eq!(back, dv);

        let empty = encode_to_vec(&DataValue::default()).unwrap();
        assert_eq!(empty, vec![0]);
    }

    #[test]
    fn test_data_value_default_status_is_good() {
        assert!(DataValue::new(1i32).is_good());
        assert!(!DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN).is_good());
    }

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(Variant::UInt16(7).as_f64(), Some(7.0));
        assert_eq!(Variant::Float(1.5).as_i64(), None);
        assert_eq!(Variant::UInt64(u64::MAX).as_i64(), None);
    }
}
