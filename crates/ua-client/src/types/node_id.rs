// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Node identifiers.
//!
//! Supports the four identifier kinds with the textual form used throughout
//! OPC UA tooling:
//!
//! - `ns=2;i=1001` (numeric)
//! - `ns=2;s=Demo.Static.Scalar.Double` (string)
//! - `ns=2;g=550e8400-e29b-41d4-a716-446655440000` (GUID)
//! - `ns=2;b=SGVsbG8=` (opaque, base64)
//!
//! The namespace prefix is optional and defaults to 0.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigurationError;

// =============================================================================
// NodeId
// =============================================================================

/// A node address in the server's address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Namespace index (0 = OPC UA standard namespace).
    pub namespace_index: u16,

    /// The node identifier.
    pub identifier: NodeIdentifier,
}

impl NodeId {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a numeric node ID.
    ///
    /// # Examples
    ///
    /// ```
    /// use ua_client::types::NodeId;
    ///
    /// let node = NodeId::numeric(0, 2259);
    /// assert_eq!(node.to_string(), "i=2259");
    /// ```
    #[inline]
    pub const fn numeric(namespace_index: u16, value: u32) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Numeric(value),
        }
    }

    /// Creates a string node ID.
    #[inline]
    pub fn string(namespace_index: u16, value: impl Into<String>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::String(value.into()),
        }
    }

    /// Creates a GUID node ID.
    #[inline]
    pub fn guid(namespace_index: u16, value: Uuid) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Guid(value),
        }
    }

    /// Creates an opaque (byte string) node ID.
    #[inline]
    pub fn opaque(namespace_index: u16, value: Vec<u8>) -> Self {
        Self {
            namespace_index,
            identifier: NodeIdentifier::Opaque(value),
        }
    }

    /// Returns the null node ID (ns=0, i=0).
    #[inline]
    pub const fn null() -> Self {
        Self::numeric(0, 0)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns `true` if this is a null node ID (ns=0, i=0).
    #[inline]
    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && matches!(self.identifier, NodeIdentifier::Numeric(0))
    }

    /// Returns the numeric value if this is a numeric identifier.
    #[inline]
    pub fn as_numeric(&self) -> Option<u32> {
        match &self.identifier {
            NodeIdentifier::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string value if this is a string identifier.
    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match &self.identifier {
            NodeIdentifier::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` when this is `ns=0;i=<value>`.
    #[inline]
    pub fn is_standard_numeric(&self, value: u32) -> bool {
        self.namespace_index == 0 && self.as_numeric() == Some(value)
    }

    /// Formats as the OPC UA string form, omitting `ns=0;`.
    pub fn to_opc_string(&self) -> String {
        if self.namespace_index == 0 {
            self.identifier.to_string()
        } else {
            format!("ns={};{}", self.namespace_index, self.identifier)
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::null()
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self::numeric(0, value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_opc_string())
    }
}

impl FromStr for NodeId {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (namespace_index, identifier_part) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns_str, id) = rest.split_once(';').ok_or_else(|| {
                    ConfigurationError::invalid_node_id(s, "Missing identifier after namespace")
                })?;
                let ns: u16 = ns_str.parse().map_err(|_| {
                    ConfigurationError::invalid_node_id(s, "Invalid namespace index")
                })?;
                (ns, id)
            }
            None => (0, s),
        };

        let identifier = identifier_part.parse::<NodeIdentifier>().map_err(|reason| {
            ConfigurationError::invalid_node_id(s, reason)
        })?;

        Ok(Self {
            namespace_index,
            identifier,
        })
    }
}

// =============================================================================
// NodeIdentifier
// =============================================================================

/// The four kinds of node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum NodeIdentifier {
    /// Numeric identifier.
    Numeric(u32),

    /// String identifier.
    String(String),

    /// GUID identifier.
    Guid(Uuid),

    /// Opaque identifier.
    Opaque(Vec<u8>),
}

impl fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "i={}", v),
            Self::String(v) => write!(f, "s={}", v),
            Self::Guid(v) => write!(f, "g={}", v),
            Self::Opaque(v) => write!(f, "b={}", BASE64.encode(v)),
        }
    }
}

impl FromStr for NodeIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("i=") {
            id.parse()
                .map(Self::Numeric)
                .map_err(|_| "Invalid numeric identifier".to_string())
        } else if let Some(id) = s.strip_prefix("s=") {
            Ok(Self::String(id.to_string()))
        } else if let Some(id) = s.strip_prefix("g=") {
            Uuid::parse_str(id)
                .map(Self::Guid)
                .map_err(|e| format!("Invalid GUID: {}", e))
        } else if let Some(id) = s.strip_prefix("b=") {
            BASE64
                .decode(id)
                .map(Self::Opaque)
                .map_err(|e| format!("Invalid base64: {}", e))
        } else {
            Err("Unknown identifier type. Expected i=, s=, g=, or b=".to_string())
        }
    }
}

// =============================================================================
// ExpandedNodeId
// =============================================================================

/// A node id that may carry a namespace URI and a server index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExpandedNodeId {
    /// The local node id.
    pub node_id: NodeId,
    /// Namespace URI; replaces the namespace index when non-empty.
    pub namespace_uri: String,
    /// Index into the server array; 0 is the local server.
    pub server_index: u32,
}

impl ExpandedNodeId {
    /// Returns `true` if the node lives on the local server and has no URI.
    pub fn is_local(&self) -> bool {
        self.namespace_uri.is_empty() && self.server_index == 0
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: String::new(),
            server_index: 0,
        }
    }
}

impl fmt::Display for ExpandedNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.server_index != 0 {
            write!(f, "svr={};", self.server_index)?;
        }
        if self.namespace_uri.is_empty() {
            write!(f, "{}", self.node_id)
        } else {
            write!(f, "nsu={};{}", self.namespace_uri, self.node_id.identifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numeric() {
        let node: NodeId = "i=2259".parse().unwrap();
        assert_eq!(node, NodeId::numeric(0, 2259));

        let node: NodeId = "ns=2;i=1001".parse().unwrap();
        assert_eq!(node.namespace_index, 2);
        assert_eq!(node.as_numeric(), Some(1001));
    }

    #[test]
    fn test_parse_string_keeps_semicolons() {
        let node: NodeId = "ns=2;s=Demo.Static;Scalar".parse().unwrap();
        assert_eq!(node.as_string(), Some("Demo.Static;Scalar"));
    }

    #[test]
    fn test_parse_errors() {
        assert!("ns=x;i=1".parse::<NodeId>().is_err());
        assert!("ns=1".parse::<NodeId>().is_err());
        assert!("q=1".parse::<NodeId>().is_err());
        assert!("i=abc".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for text in [
            "i=85",
            "ns=2;s=Demo.Dynamic.Scalar.Double",
            "ns=3;g=550e8400-e29b-41d4-a716-446655440000",
            "ns=1;b=SGVsbG8=",
        ] {
            let node: NodeId = text.parse().unwrap();
            assert_eq!(node.to_string(), text);
        }
    }

    #[test]
    fn test_expanded_display() {
        let expanded = ExpandedNodeId {
            node_id: NodeId::numeric(0, 5054),
            namespace_uri: "http://www.unifiedautomation.com/DemoServer/".into(),
            server_index: 0,
        };
        assert_eq!(
            expanded.to_string(),
            "nsu=http://www.unifiedautomation.com/DemoServer/;i=5054"
        );
        assert!(!expanded.is_local());
        assert!(ExpandedNodeId::from(NodeId::numeric(0, 1)).is_local());
    }
}
