// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA built-in types.
//!
//! - [`NodeId`] / [`ExpandedNodeId`]: node addresses with string parsing
//! - [`StatusCode`]: result codes with severity helpers
//! - [`NumericRange`]: index ranges over arrays and strings
//! - [`DateTime`], [`ByteString`], [`QualifiedName`], [`LocalizedText`],
//!   [`DiagnosticInfo`], [`XmlElement`]
//! - [`ids`]: well-known node, encoding and attribute identifiers
//!
//! Binary encoding for all of these lives in [`crate::codec`].

mod builtin;
pub mod ids;
mod node_id;
mod numeric_range;
mod status;

pub use builtin::{ByteString, DateTime, DiagnosticInfo, LocalizedText, QualifiedName, XmlElement};
pub use node_id::{ExpandedNodeId, NodeId, NodeIdentifier};
pub use numeric_range::{IndexBounds, NumericRange};
pub use status::StatusCode;

/// A GUID.
pub type Guid = uuid::Uuid;
