// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Built-in value types that have no direct Rust equivalent.

use std::fmt;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use crate::types::StatusCode;

// =============================================================================
// ByteString
// =============================================================================

/// A byte string that keeps null distinct from empty.
///
/// Continuation points and nonces rely on the distinction: a null
/// continuation point means the result set is complete.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteString(Option<Vec<u8>>);

impl ByteString {
    /// The null byte string.
    pub const fn null() -> Self {
        Self(None)
    }

    /// Returns `true` for the null value.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Returns `true` for null or zero-length values.
    pub fn is_null_or_empty(&self) -> bool {
        self.0.as_ref().map_or(true, Vec::is_empty)
    }

    /// Borrows the bytes; null reads as empty.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_deref().unwrap_or(&[])
    }

    /// Returns the byte length; null counts as zero.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` when there are no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the value, returning the bytes if present.
    pub fn into_inner(self) -> Option<Vec<u8>> {
        self.0
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        Self(Some(value))
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        Self(Some(value.to_vec()))
    }
}

impl From<Option<Vec<u8>>> for ByteString {
    fn from(value: Option<Vec<u8>>) -> Self {
        Self(value)
    }
}

// =============================================================================
// DateTime
// =============================================================================

/// 100-nanosecond ticks between 1601-01-01 and 1970-01-01.
const TICKS_TO_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// An OPC UA timestamp: 100 ns ticks since 1601-01-01 UTC.
///
/// Tick 0 is the null timestamp.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DateTime {
    ticks: i64,
}

impl DateTime {
    /// The null timestamp.
    pub const fn null() -> Self {
        Self { ticks: 0 }
    }

    /// Creates a timestamp from raw ticks.
    pub const fn from_ticks(ticks: i64) -> Self {
        Self { ticks }
    }

    /// Returns the raw ticks.
    pub const fn ticks(&self) -> i64 {
        self.ticks
    }

    /// Returns `true` for the null timestamp.
    pub const fn is_null(&self) -> bool {
        self.ticks == 0
    }

    /// The current time.
    pub fn now() -> Self {
        Self::from_chrono(Utc::now())
    }

    /// Converts from a chrono timestamp, truncating to 100 ns.
    pub fn from_chrono(value: chrono::DateTime<Utc>) -> Self {
        let seconds = value.timestamp();
        let sub_ticks = i64::from(value.timestamp_subsec_nanos()) / 100;
        let ticks = seconds
            .saturating_mul(10_000_000)
            .saturating_add(sub_ticks)
            .saturating_add(TICKS_TO_UNIX_EPOCH);
        Self { ticks: ticks.max(0) }
    }

    /// Converts to a chrono timestamp; `None` for null or out-of-range values.
    pub fn to_chrono(&self) -> Option<chrono::DateTime<Utc>> {
        if self.is_null() {
            return None;
        }
        let unix_ticks = self.ticks - TICKS_TO_UNIX_EPOCH;
        let seconds = unix_ticks.div_euclid(10_000_000);
        let nanos = (unix_ticks.rem_euclid(10_000_000) * 100) as u32;
        Utc.timestamp_opt(seconds, nanos).single()
    }

    /// Returns this timestamp shifted forward.
    pub fn add(&self, duration: Duration) -> Self {
        let ticks = i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX);
        Self {
            ticks: self.ticks.saturating_add(ticks),
        }
    }

    /// Returns this timestamp shifted backward.
    pub fn sub(&self, duration: Duration) -> Self {
        let ticks = i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX);
        Self {
            ticks: self.ticks.saturating_sub(ticks).max(0),
        }
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(value: chrono::DateTime<Utc>) -> Self {
        Self::from_chrono(value)
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_chrono() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None if self.is_null() => f.write_str("null"),
            None => write!(f, "ticks:{}", self.ticks),
        }
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// =============================================================================
// XmlElement
// =============================================================================

/// An XML fragment carried as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct XmlElement(pub String);

// =============================================================================
// QualifiedName / LocalizedText
// =============================================================================

/// A name qualified by a namespace index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QualifiedName {
    /// Namespace index.
    pub namespace_index: u16,
    /// Name.
    pub name: String,
}

impl QualifiedName {
    /// Creates a qualified name.
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.namespace_index, self.name)
        }
    }
}

/// Human-readable text with an optional locale.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalizedText {
    /// Locale id such as `en-US`; empty when absent.
    pub locale: String,
    /// Text; empty when absent.
    pub text: String,
}

impl LocalizedText {
    /// Creates text without a locale.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            locale: String::new(),
            text: text.into(),
        }
    }
}

impl From<&str> for LocalizedText {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// =============================================================================
// DiagnosticInfo
// =============================================================================

/// Vendor-specific diagnostics attached to a result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticInfo {
    /// Index into the response string table.
    pub symbolic_id: Option<i32>,
    /// Index into the response string table.
    pub namespace_uri: Option<i32>,
    /// Index into the response string table.
    pub locale: Option<i32>,
    /// Index into the response string table.
    pub localized_text: Option<i32>,
    /// Free-form detail.
    pub additional_info: Option<String>,
    /// Status of a nested operation.
    pub inner_status_code: Option<StatusCode>,
    /// Diagnostics of a nested operation.
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

impl DiagnosticInfo {
    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
