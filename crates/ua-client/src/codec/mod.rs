// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA binary encoding.
//!
//! Numbers are fixed-width little-endian. Strings, byte strings and arrays
//! are prefixed with an `Int32` length where `-1` means null/absent:
//!
//! ```text
//! Option<Vec<T>>   None            -> ff ff ff ff
//!                  Some(vec![])    -> 00 00 00 00
//!                  Some(vec![a,b]) -> 02 00 00 00 <a> <b>
//! ```
//!
//! Decoding carries a [`TypeRegistry`] so extension objects whose encoding
//! id is registered come back as typed structures; everything else stays raw.
//!
//! # Examples
//!
//! ```
//! use ua_client::codec::{decode_from_slice, encode_to_vec, TypeRegistry, Variant};
//!
//! let value = Variant::from(vec![1.5f64, 2.5]);
//! let bytes = encode_to_vec(&value).unwrap();
//! let back: Variant = decode_from_slice(&bytes, &TypeRegistry::standard()).unwrap();
//! assert_eq!(back, value);
//! ```

mod builtin;
mod extension;
mod variant;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CodecError, CodecResult};

pub use extension::{ExtensionBody, ExtensionObject, ExtensionType, Structure, TypeRegistry};
pub use variant::{DataValue, Variant, VariantArray, VariantTypeId};

// =============================================================================
// Traits
// =============================================================================

/// Types that can be written in OPC UA binary form.
pub trait BinaryEncode {
    /// Appends the encoded value.
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()>;
}

/// Types that can be read from OPC UA binary form.
pub trait BinaryDecode: Sized {
    /// Reads one value.
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self>;
}

/// Encodes a value into a fresh buffer.
pub fn encode_to_vec<T: BinaryEncode + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut enc = Encoder::new();
    value.encode(&mut enc)?;
    Ok(enc.into_bytes().to_vec())
}

/// Decodes one value and requires the input to be fully consumed.
pub fn decode_from_slice<T: BinaryDecode>(data: &[u8], registry: &TypeRegistry) -> CodecResult<T> {
    let mut dec = Decoder::new(data, registry);
    let value = T::decode(&mut dec)?;
    dec.expect_end(std::any::type_name::<T>())?;
    Ok(value)
}

// =============================================================================
// Encoder
// =============================================================================

/// Append-only binary writer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrows the bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Finishes encoding.
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }

    /// Writes a byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Writes a signed byte.
    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    /// Writes a little-endian `u16`.
    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16_le(value);
    }

    /// Writes a little-endian `i16`.
    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    /// Writes a little-endian `u32`.
    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    /// Writes a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Writes a little-endian `u64`.
    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    /// Writes a little-endian `i64`.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    /// Writes a little-endian `f32`.
    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    /// Writes a little-endian `f64`.
    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Writes raw bytes without a length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Writes an `Int32` length, `-1` for `None`.
    pub fn write_length(&mut self, length: Option<usize>) -> CodecResult<()> {
        match length {
            None => self.write_i32(-1),
            Some(len) => {
                let len = i32::try_from(len)
                    .map_err(|_| CodecError::limit_exceeded("array", len, i32::MAX as usize))?;
                self.write_i32(len);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Limits applied while decoding untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodingLimits {
    /// Longest accepted string in bytes.
    pub max_string_length: usize,
    /// Longest accepted byte string.
    pub max_byte_string_length: usize,
    /// Longest accepted array.
    pub max_array_length: usize,
    /// Deepest accepted nesting of variants and extension objects.
    pub max_depth: u32,
}

impl Default for DecodingLimits {
    fn default() -> Self {
        Self {
            max_string_length: 1 << 20,
            max_byte_string_length: 16 << 20,
            max_array_length: 1 << 20,
            max_depth: 32,
        }
    }
}

/// Cursor over an encoded buffer.
#[derive(Debug)]
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    registry: &'a TypeRegistry,
    limits: DecodingLimits,
    depth: u32,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder with default limits.
    pub fn new(data: &'a [u8], registry: &'a TypeRegistry) -> Self {
        Self::with_limits(data, registry, DecodingLimits::default())
    }

    /// Creates a decoder with explicit limits.
    pub fn with_limits(data: &'a [u8], registry: &'a TypeRegistry, limits: DecodingLimits) -> Self {
        Self {
            data,
            pos: 0,
            registry,
            limits,
            depth: 0,
        }
    }

    /// Creates a decoder over a nested payload, inheriting registry, limits and depth.
    pub fn nested<'b>(&self, data: &'b [u8]) -> Decoder<'b>
    where
        'a: 'b,
    {
        Decoder {
            data,
            pos: 0,
            registry: self.registry,
            limits: self.limits,
            depth: self.depth,
        }
    }

    /// The registry used for extension objects.
    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    /// The decoding limits.
    pub fn limits(&self) -> &DecodingLimits {
        &self.limits
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns the unread tail without consuming it.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Fails if unread bytes remain.
    pub fn expect_end(&self, type_name: &'static str) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(CodecError::TrailingBytes { type_name, count }),
        }
    }

    /// Consumes `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CodecError::truncated(len, self.remaining()));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Reads a byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a signed byte.
    pub fn read_i8(&mut self) -> CodecResult<i8> {
        Ok(i8::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> CodecResult<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `i16`.
    pub fn read_i16(&mut self) -> CodecResult<i16> {
        Ok(i16::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> CodecResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64(&mut self) -> CodecResult<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `i64`.
    pub fn read_i64(&mut self) -> CodecResult<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `f32`.
    pub fn read_f32(&mut self) -> CodecResult<f32> {
        Ok(f32::from_le_bytes(self.read_array()?))
    }

    /// Reads a little-endian `f64`.
    pub fn read_f64(&mut self) -> CodecResult<f64> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Reads an `Int32` length prefix; negative values mean null.
    ///
    /// `min_element_size` lets the decoder reject lengths that cannot fit in
    /// the remaining input before anything is allocated.
    pub fn read_length(
        &mut self,
        what: &'static str,
        limit: usize,
        min_element_size: usize,
    ) -> CodecResult<Option<usize>> {
        let raw = self.read_i32()?;
        if raw < 0 {
            return Ok(None);
        }
        let len = raw as usize;
        if len > limit {
            return Err(CodecError::limit_exceeded(what, len, limit));
        }
        let needed = len.saturating_mul(min_element_size);
        if needed > self.remaining() {
            return Err(CodecError::truncated(needed, self.remaining()));
        }
        Ok(Some(len))
    }

    /// Enters one level of nesting.
    pub(crate) fn enter(&mut self) -> CodecResult<()> {
        if self.depth >= self.limits.max_depth {
            return Err(CodecError::DepthExceeded {
                limit: self.limits.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Leaves one level of nesting.
    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

// =============================================================================
// Arrays
// =============================================================================

impl<T: BinaryEncode> BinaryEncode for Option<Vec<T>> {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        match self {
            None => enc.write_length(None),
            Some(items) => {
                enc.write_length(Some(items.len()))?;
                for item in items {
                    item.encode(enc)?;
                }
                Ok(())
            }
        }
    }
}

impl<T: BinaryDecode> BinaryDecode for Option<Vec<T>> {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let limit = dec.limits().max_array_length;
        let Some(len) = dec.read_length("array", limit, 1)? else {
            return Ok(None);
        };
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(T::decode(dec)?);
        }
        Ok(Some(items))
    }
}

// =============================================================================
// Primitives
// =============================================================================

macro_rules! primitive {
    ($( $ty:ty => $write:ident, $read:ident; )+) => {
        $(
            impl BinaryEncode for $ty {
                fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
                    enc.$write(*self);
                    Ok(())
                }
            }

            impl BinaryDecode for $ty {
                fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
                    dec.$read()
                }
            }
        )+
    };
}

primitive! {
    u8 => write_u8, read_u8;
    i8 => write_i8, read_i8;
    u16 => write_u16, read_u16;
    i16 => write_i16, read_i16;
    u32 => write_u32, read_u32;
    i32 => write_i32, read_i32;
    u64 => write_u64, read_u64;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl BinaryEncode for bool {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_u8(u8::from(*self));
        Ok(())
    }
}

impl BinaryDecode for bool {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(dec.read_u8()? != 0)
    }
}

/// Strings encode empty as null; null decodes as empty.
impl BinaryEncode for String {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        if self.is_empty() {
            return enc.write_length(None);
        }
        enc.write_length(Some(self.len()))?;
        enc.write_bytes(self.as_bytes());
        Ok(())
    }
}

impl BinaryDecode for String {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        let limit = dec.limits().max_string_length;
        match dec.read_length("string", limit, 1)? {
            None => Ok(String::new()),
            Some(len) => {
                let bytes = dec.read_bytes(len)?;
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| CodecError::invalid_value("String", e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::standard()
    }

    #[test]
    fn test_integers_little_endian() {
        let bytes = encode_to_vec(&0x0102_0304u32).unwrap();
        assert_eq!(bytes, vec![0x04, 0x03, 0x02, 0x01]);
        let value: u32 = decode_from_slice(&bytes, &registry()).unwrap();
        assert_eq!(value, 0x0102_0304);
    }

    #[test]
    fn test_absent_and_empty_arrays_differ() {
        let absent: Option<Vec<u32>> = None;
        let empty: Option<Vec<u32>> = Some(vec![]);

        let absent_bytes = encode_to_vec(&absent).unwrap();
        let empty_bytes = encode_to_vec(&empty).unwrap();
        assert_eq!(absent_bytes, vec![0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(empty_bytes, vec![0, 0, 0, 0]);

        let reg = registry();
        assert_eq!(decode_from_slice::<Option<Vec<u32>>>(&absent_bytes, &reg).unwrap(), None);
        assert_eq!(
            decode_from_slice::<Option<Vec<u32>>>(&empty_bytes, &reg).unwrap(),
            Some(vec![])
        );
    }

    #[test]
    fn test_string_null_decodes_empty() {
        let reg = registry();
        let value: String = decode_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF], &reg).unwrap();
        assert!(value.is_empty());

        let bytes = encode_to_vec(&"abc".to_string()).unwrap();
        assert_eq!(bytes, vec![3, 0, 0, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn test_truncated_input() {
        let reg = registry();
        let err = decode_from_slice::<u32>(&[1, 2], &reg).unwrap_err();
        assert_eq!(err, CodecError::truncated(4, 2));
    }

    #[test]
    fn test_array_length_beyond_input_rejected() {
        let reg = registry();
        let err = decode_from_slice::<Option<Vec<u8>>>(&[0x10, 0, 0, 0, 1], &reg).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }

    #[test]
    fn test_array_limit() {
        let reg = registry();
        let limits = DecodingLimits {
            max_array_length: 2,
            ..Default::default()
        };
        let bytes = encode_to_vec(&Some(vec![1u8, 2, 3])).unwrap();
        let mut dec = Decoder::with_limits(&bytes, &reg, limits);
        let err = Option::<Vec<u8>>::decode(&mut dec).unwrap_err();
        assert!(matches!(err, CodecError::LimitExceeded { length: 3, limit: 2, .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let reg = registry();
        let err = decode_from_slice::<u8>(&[1, 2], &reg).unwrap_err();
        assert!(matches!(err, CodecError::TrailingBytes { count: 1, .. }));
    }

    #[test]
    fn test_invalid_utf8() {
        let reg = registry();
        let err = decode_from_slice::<String>(&[1, 0, 0, 0, 0xFF], &reg).unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { .. }));
    }
}
