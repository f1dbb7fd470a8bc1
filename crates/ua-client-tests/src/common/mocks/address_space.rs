// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Mock Address Space
//!
//! A small fixed node set:
//!
//! ```text
//! Root (i=84)
//! └── Objects (i=85)
//!     ├── Server (i=2253)            event notifier
//!     │   ├── ServerStatus (i=2256)  ServerStatusDataType
//!     │   │   ├── State (i=2259)     Int32, Running
//!     │   │   └── BuildInfo (i=2260) BuildInfo
//!     │   │       └── ProductName (i=2261)
//!     │   └── CurrentTime (i=2258)
//!     └── Demo (ns=2;s=Demo)
//!         ├── Counter                Int32, ticks while the server runs
//!         ├── Temperature            Double, writable
//!         ├── Name                   String, writable
//!         ├── ReadOnly               Int32
//!         ├── Array                  Double[5], writable, index ranges
//!         ├── History                Double, 100 historical samples
//!         ├── Methods
//!         │   ├── VectorAdd          (Vector, Vector) -> Vector
//!         │   └── Multiply           (Double, Double) -> Double
//!         └── Many                   25 children, for browse paging
//! ```

use std::collections::HashMap;
use std::time::Duration;

use ua_client::codec::{
    BinaryDecode, BinaryEncode, DataValue, Decoder, Encoder, ExtensionObject, ExtensionType,
    Variant, VariantArray, VariantTypeId,
};
use ua_client::error::CodecResult;
use ua_client::messages::{
    BrowseDescription, BrowseDirection, BuildInfo, NodeClass, ReadProcessedDetails, ReadRawModifiedDetails,
    ReadValueId,
    ReferenceDescription, ServerState, ServerStatusDataType, TimestampsToReturn, WriteValue,
};
use ua_client::types::ids::{
    attribute_ids, object_ids, object_type_ids, reference_type_ids, variable_ids,
};
use ua_client::types::{
    DateTime, ExpandedNodeId, LocalizedText, NodeId, NumericRange, QualifiedName, StatusCode,
};

/// Namespace of the demo nodes.
pub const DEMO_NS: u16 = 2;

/// Number of children under `Demo.Many`.
pub const MANY_CHILDREN: usize = 25;

/// Number of samples in the history of `Demo.History`.
pub const HISTORY_SAMPLES: usize = 100;

// =============================================================================
// Vector
// =============================================================================

/// Custom structure of the demo namespace.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl BinaryEncode for Vector {
    fn encode(&self, enc: &mut Encoder) -> CodecResult<()> {
        enc.write_f64(self.x);
        enc.write_f64(self.y);
        enc.write_f64(self.z);
        Ok(())
    }
}

impl BinaryDecode for Vector {
    fn decode(dec: &mut Decoder<'_>) -> CodecResult<Self> {
        Ok(Self {
            x: dec.read_f64()?,
            y: dec.read_f64()?,
            z: dec.read_f64()?,
        })
    }
}

impl ExtensionType for Vector {
    fn binary_encoding_id() -> NodeId {
        NodeId::numeric(DEMO_NS, 5001)
    }
}

// =============================================================================
// Node ids
// =============================================================================

/// Node ids of the demo nodes.
pub struct DemoNodes;

impl DemoNodes {
    pub fn folder() -> NodeId {
        NodeId::string(DEMO_NS, "Demo")
    }

    pub fn counter() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.Counter")
    }

    pub fn temperature() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.Temperature")
    }

    pub fn name() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.Name")
    }

    pub fn read_only() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.ReadOnly")
    }

    pub fn array() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.Array")
    }

    pub fn history() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.History")
    }

    pub fn methods() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.Methods")
    }

    pub fn vector_add() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.Methods.VectorAdd")
    }

    pub fn multiply() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.Methods.Multiply")
    }

    pub fn many() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.Many")
    }

    pub fn many_item(index: usize) -> NodeId {
        NodeId::string(DEMO_NS, format!("Demo.Many.Item{index:02}"))
    }

    pub fn missing() -> NodeId {
        NodeId::string(DEMO_NS, "Demo.DoesNotExist")
    }

    pub fn server() -> NodeId {
        NodeId::numeric(0, object_ids::SERVER)
    }

    pub fn current_time() -> NodeId {
        NodeId::numeric(0, variable_ids::SERVER_SERVER_STATUS_CURRENT_TIME)
    }

    pub fn server_status() -> NodeId {
        NodeId::numeric(0, variable_ids::SERVER_SERVER_STATUS)
    }

    pub fn server_state() -> NodeId {
        NodeId::numeric(0, variable_ids::SERVER_SERVER_STATUS_STATE)
    }

    pub fn build_info() -> NodeId {
        NodeId::numeric(0, variable_ids::SERVER_SERVER_STATUS_BUILD_INFO)
    }

    pub fn product_name() -> NodeId {
        NodeId::numeric(0, variable_ids::SERVER_SERVER_STATUS_BUILD_INFO_PRODUCT_NAME)
    }
}

/// Initial contents of `Demo.Array`.
pub const ARRAY_INITIAL: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

/// `values` as a Double array variant.
pub fn double_array(values: &[f64]) -> Variant {
    Variant::Array(Box::new(VariantArray {
        element_type: VariantTypeId::Double,
        values: Some(values.iter().copied().map(Variant::Double).collect()),
        dimensions: None,
    }))
}

fn array_initial() -> Variant {
    double_array(&ARRAY_INITIAL)
}

/// Product name in the mock server's BuildInfo.
pub const MOCK_PRODUCT_NAME: &str = "Mock UA Server";

fn build_info() -> BuildInfo {
    BuildInfo {
        product_uri: "urn:mock:ua-server:product".to_string(),
        manufacturer_name: "ua-client-tests".to_string(),
        product_name: MOCK_PRODUCT_NAME.to_string(),
        software_version: env!("CARGO_PKG_VERSION").to_string(),
        build_number: "1".to_string(),
        build_date: DateTime::now(),
    }
}

// =============================================================================
// Nodes
// =============================================================================

#[derive(Debug, Clone)]
struct Reference {
    reference_type: NodeId,
    target: NodeId,
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub node_id: NodeId,
    pub node_class: NodeClass,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub type_definition: NodeId,
    pub value: Option<DataValue>,
    pub writable: bool,
    pub event_notifier: u8,
    pub history: Vec<DataValue>,
    children: Vec<Reference>,
    parent: Option<Reference>,
}

impl Node {
    fn new(node_id: NodeId, node_class: NodeClass, name: &str) -> Self {
        let type_definition = match node_class {
            NodeClass::Object => NodeId::numeric(0, object_type_ids::FOLDER_TYPE),
            NodeClass::Variable => NodeId::numeric(0, 63),
            _ => NodeId::null(),
        };
        Self {
            browse_name: QualifiedName::new(node_id.namespace_index, name),
            display_name: LocalizedText::new(name),
            node_id,
            node_class,
            type_definition,
            value: None,
            writable: false,
            event_notifier: 0,
            history: Vec::new(),
            children: Vec::new(),
            parent: None,
        }
    }

    fn variable(node_id: NodeId, name: &str, value: impl Into<Variant>) -> Self {
        let mut node = Self::new(node_id, NodeClass::Variable, name);
        node.value = Some(stamped(value.into()));
        node
    }

    fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    fn access_level(&self) -> u8 {
        let mut level = 0x01;
        if self.writable {
            level |= 0x02;
        }
        if !self.history.is_empty() {
            level |= 0x04;
        }
        level
    }

    fn describe(&self, reference: &Reference, is_forward: bool) -> ReferenceDescription {
        ReferenceDescription {
            reference_type_id: reference.reference_type.clone(),
            is_forward,
            node_id: ExpandedNodeId::from(self.node_id.clone()),
            browse_name: self.browse_name.clone(),
            display_name: self.display_name.clone(),
            node_class: self.node_class,
            type_definition: ExpandedNodeId::from(self.type_definition.clone()),
        }
    }
}

fn stamped(value: Variant) -> DataValue {
    let now = DateTime::now();
    DataValue {
        value: Some(value),
        source_timestamp: Some(now),
        server_timestamp: Some(now),
        ..Default::default()
    }
}

// =============================================================================
// AddressSpace
// =============================================================================

/// The mock server's nodes.
#[derive(Debug, Default)]
pub(crate) struct AddressSpace {
    nodes: HashMap<NodeId, Node>,
    /// Start of the generated history.
    history_start: DateTime,
}

impl AddressSpace {
    /// Builds the demo node set.
    pub fn demo() -> Self {
        let mut space = Self::default();
        let organizes = NodeId::numeric(0, reference_type_ids::ORGANIZES);
        let component = NodeId::numeric(0, reference_type_ids::HAS_COMPONENT);

        space.insert(Node::new(NodeId::numeric(0, object_ids::ROOT_FOLDER), NodeClass::Object, "Root"), None);
        space.insert(
            Node::new(NodeId::numeric(0, object_ids::OBJECTS_FOLDER), NodeClass::Object, "Objects"),
            Some((NodeId::numeric(0, object_ids::ROOT_FOLDER), organizes.clone())),
        );

        let mut server = Node::new(DemoNodes::server(), NodeClass::Object, "Server");
        server.event_notifier = 1;
        space.insert(server, Some((NodeId::numeric(0, object_ids::OBJECTS_FOLDER), organizes.clone())));
        space.insert(
            Node::variable(DemoNodes::current_time(), "CurrentTime", DateTime::now()),
            Some((DemoNodes::server(), component.clone())),
        );
        let status = ServerStatusDataType {
            start_time: DateTime::now(),
            current_time: DateTime::now(),
            state: ServerState::Running,
            build_info: build_info(),
            ..Default::default()
        };
        space.insert(
            Node::variable(DemoNodes::server_status(), "ServerStatus", ExtensionObject::from_structure(status)),
            Some((DemoNodes::server(), component.clone())),
        );
        let in_status = Some((DemoNodes::server_status(), component.clone()));
        space.insert(
            Node::variable(DemoNodes::server_state(), "State", ServerState::Running.value()),
            in_status.clone(),
        );
        space.insert(
            Node::variable(DemoNodes::build_info(), "BuildInfo", ExtensionObject::from_structure(build_info())),
            in_status,
        );
        space.insert(
            Node::variable(DemoNodes::product_name(), "ProductName", MOCK_PRODUCT_NAME),
            Some((DemoNodes::build_info(), component.clone())),
        );

        space.insert(
            Node::new(DemoNodes::folder(), NodeClass::Object, "Demo"),
            Some((NodeId::numeric(0, object_ids::OBJECTS_FOLDER), organizes.clone())),
        );
        let demo = Some((DemoNodes::folder(), organizes.clone()));
        space.insert(Node::variable(DemoNodes::counter(), "Counter", 0i32), demo.clone());
        space.insert(Node::variable(DemoNodes::temperature(), "Temperature", 21.5f64).writable(), demo.clone());
        space.insert(Node::variable(DemoNodes::name(), "Name", "boiler-1").writable(), demo.clone());
        space.insert(Node::variable(DemoNodes::read_only(), "ReadOnly", 42i32), demo.clone());
        space.insert(Node::variable(DemoNodes::array(), "Array", array_initial()).writable(), demo.clone());

        let mut history = Node::variable(DemoNodes::history(), "History", 0.0f64);
        let end = DateTime::now();
        let start = end.sub(Duration::from_secs(HISTORY_SAMPLES as u64));
        history.history = (0..HISTORY_SAMPLES)
            .map(|i| DataValue {
                value: Some(Variant::Double(i as f64)),
                source_timestamp: Some(start.add(Duration::from_secs(i as u64))),
                server_timestamp: Some(start.add(Duration::from_secs(i as u64))),
                ..Default::default()
            })
            .collect();
        space.history_start = start;
        space.insert(history, demo.clone());

        space.insert(Node::new(DemoNodes::methods(), NodeClass::Object, "Methods"), demo.clone());
        let methods = Some((DemoNodes::methods(), component.clone()));
        space.insert(Node::new(DemoNodes::vector_add(), NodeClass::Method, "VectorAdd"), methods.clone());
        space.insert(Node::new(DemoNodes::multiply(), NodeClass::Method, "Multiply"), methods);

        space.insert(Node::new(DemoNodes::many(), NodeClass::Object, "Many"), demo);
        for index in 0..MANY_CHILDREN {
            space.insert(
                Node::variable(DemoNodes::many_item(index), &format!("Item{index:02}"), index as i32),
                Some((DemoNodes::many(), component.clone())),
            );
        }
        space
    }

    fn insert(&mut self, mut node: Node, parent: Option<(NodeId, NodeId)>) {
        if let Some((parent_id, reference_type)) = parent {
            if let Some(p) = self.nodes.get_mut(&parent_id) {
                p.children.push(Reference {
                    reference_type: reference_type.clone(),
                    target: node.node_id.clone(),
                });
            }
            node.parent = Some(Reference {
                reference_type,
                target: parent_id,
            });
        }
        self.nodes.insert(node.node_id.clone(), node);
    }

    pub fn get(&self, node_id: &NodeId) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Start time of the generated history.
    pub fn history_start(&self) -> DateTime {
        self.history_start
    }

    /// Advances `Demo.Counter`.
    pub fn tick(&mut self) {
        if let Some(node) = self.nodes.get_mut(&DemoNodes::counter()) {
            let next = node
                .value
                .as_ref()
                .and_then(|v| v.value.as_ref())
                .and_then(Variant::as_i64)
                .unwrap_or(0)
                + 1;
            node.value = Some(stamped(Variant::Int32(next as i32)));
        }
    }

    /// Replaces a value from the server side, bypassing access checks.
    pub fn set_value(&mut self, node_id: &NodeId, value: Variant) -> bool {
        match self.nodes.get_mut(node_id) {
            Some(node) if node.node_class == NodeClass::Variable => {
                node.value = Some(stamped(value));
                true
            }
            _ => false,
        }
    }

    /// Current value of a variable, as sampled by monitored items.
    pub fn sample(&self, node_id: &NodeId) -> DataValue {
        if *node_id == DemoNodes::current_time() {
            return stamped(Variant::DateTime(DateTime::now()));
        }
        match self.nodes.get(node_id).and_then(|n| n.value.clone()) {
            Some(value) => value,
            None => DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN),
        }
    }

    // =========================================================================
    // Attribute services
    // =========================================================================

    pub fn read(&self, item: &ReadValueId, timestamps: TimestampsToReturn) -> DataValue {
        let Some(node) = self.nodes.get(&item.node_id) else {
            return DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN);
        };
        let value: Variant = match item.attribute_id {
            attribute_ids::NODE_ID => node.node_id.clone().into(),
            attribute_ids::NODE_CLASS => node.node_class.value().into(),
            attribute_ids::BROWSE_NAME => node.browse_name.clone().into(),
            attribute_ids::DISPLAY_NAME => node.display_name.clone().into(),
            attribute_ids::EVENT_NOTIFIER if node.node_class == NodeClass::Object => {
                node.event_notifier.into()
            }
            attribute_ids::VALUE if node.node_class == NodeClass::Variable => {
                let sample = self.sample(&item.node_id);
                if item.index_range.is_empty() {
                    return with_timestamps(sample, timestamps);
                }
                return match index_range(&item.index_range)
                    .and_then(|range| range.slice(sample.value.as_ref().unwrap_or(&Variant::Empty)))
                {
                    Ok(slice) => with_timestamps(DataValue { value: Some(slice), ..sample }, timestamps),
                    Err(status) => DataValue::from_status(status),
                };
            }
            attribute_ids::ACCESS_LEVEL | attribute_ids::USER_ACCESS_LEVEL
                if node.node_class == NodeClass::Variable =>
            {
                node.access_level().into()
            }
            attribute_ids::HISTORIZING if node.node_class == NodeClass::Variable => {
                (!node.history.is_empty()).into()
            }
            _ => return DataValue::from_status(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
        };
        DataValue::new(value)
    }

    pub fn write(&mut self, item: &WriteValue) -> StatusCode {
        let Some(node) = self.nodes.get_mut(&item.node_id) else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };
        if item.attribute_id != attribute_ids::VALUE || node.node_class != NodeClass::Variable {
            return StatusCode::BAD_NOT_WRITABLE;
        }
        if !node.writable {
            return StatusCode::BAD_NOT_WRITABLE;
        }
        let Some(mut new_value) = item.value.value.clone() else {
            return StatusCode::BAD_TYPE_MISMATCH;
        };
        if !item.index_range.is_empty() {
            let current = node.value.as_ref().and_then(|v| v.value.as_ref()).unwrap_or(&Variant::Empty);
            new_value = match index_range(&item.index_range).and_then(|range| range.splice(current, &new_value)) {
                Ok(spliced) => spliced,
                Err(status) => return status,
            };
        }
        let current_type = node
            .value
            .as_ref()
            .and_then(|v| v.value.as_ref())
            .and_then(Variant::type_id);
        if current_type.is_some() && new_value.type_id() != current_type {
            return StatusCode::BAD_TYPE_MISMATCH;
        }
        let current_element = node
            .value
            .as_ref()
            .and_then(|v| v.value.as_ref())
            .and_then(Variant::as_array)
            .map(|a| a.element_type);
        if current_element.is_some() && new_value.as_array().map(|a| a.element_type) != current_element {
            return StatusCode::BAD_TYPE_MISMATCH;
        }
        node.value = Some(stamped(new_value));
        StatusCode::GOOD
    }

    /// Raw history of `node_id` within the details' time range.
    pub fn history(
        &self,
        node_id: &NodeId,
        details: &ReadRawModifiedDetails,
    ) -> Result<Vec<DataValue>, StatusCode> {
        let node = self.nodes.get(node_id).ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;
        if node.history.is_empty() || details.is_read_modified {
            return Err(StatusCode::BAD_HISTORY_OPERATION_UNSUPPORTED);
        }
        let (start, end) = (details.start_time, details.end_time);
        let reverse = !start.is_null() && !end.is_null() && start > end;
        let (low, high) = if reverse { (end, start) } else { (start, end) };
        let mut values: Vec<DataValue> = node
            .history
            .iter()
            .filter(|v| {
                let ts = v.source_timestamp.unwrap_or_default();
                (low.is_null() || ts >= low) && (high.is_null() || ts < high)
            })
            .cloned()
            .collect();
        if reverse {
            values.reverse();
        }
        Ok(values)
    }

    /// Aggregates the history of `node_id` over the details' intervals.
    ///
    /// Only the Average aggregate is computed. Each interval yields one value
    /// stamped with the interval start; intervals without samples are
    /// `BadNoData`.
    pub fn processed_history(
        &self,
        node_id: &NodeId,
        aggregate: &NodeId,
        details: &ReadProcessedDetails,
    ) -> Result<Vec<DataValue>, StatusCode> {
        let node = self.nodes.get(node_id).ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;
        if node.history.is_empty() {
            return Err(StatusCode::BAD_HISTORY_OPERATION_UNSUPPORTED);
        }
        if !aggregate.is_standard_numeric(object_ids::AGGREGATE_FUNCTION_AVERAGE) {
            return Err(StatusCode::BAD_AGGREGATE_NOT_SUPPORTED);
        }
        let (start, end) = (details.start_time, details.end_time);
        if details.processing_interval <= 0.0 || start.is_null() || end.is_null() || start >= end {
            return Err(StatusCode::BAD_INVALID_ARGUMENT);
        }
        let interval = Duration::from_secs_f64(details.processing_interval / 1000.0);

        let mut values = Vec::new();
        let mut low = start;
        while low < end {
            let next = low.add(interval);
            let high = if next < end { next } else { end };
            let samples: Vec<f64> = node
                .history
                .iter()
                .filter(|v| v.source_timestamp.is_some_and(|ts| ts >= low && ts < high))
                .filter_map(|v| v.value.as_ref().and_then(Variant::as_f64))
                .collect();
            let mut value = if samples.is_empty() {
                DataValue::from_status(StatusCode::BAD_NO_DATA)
            } else {
                DataValue::new(samples.iter().sum::<f64>() / samples.len() as f64)
            };
            value.source_timestamp = Some(low);
            values.push(value);
            low = next;
        }
        Ok(values)
    }

    // =========================================================================
    // View services
    // =========================================================================

    /// All references of a node that pass the description's filters.
    pub fn browse(&self, description: &BrowseDescription) -> Result<Vec<ReferenceDescription>, StatusCode> {
        let node = self
            .nodes
            .get(&description.node_id)
            .ok_or(StatusCode::BAD_NODE_ID_UNKNOWN)?;

        let mut found = Vec::new();
        if matches!(description.browse_direction, BrowseDirection::Forward | BrowseDirection::Both) {
            for reference in &node.children {
                if let Some(target) = self.nodes.get(&reference.target) {
                    found.push(target.describe(reference, true));
                }
            }
        }
        if matches!(description.browse_direction, BrowseDirection::Inverse | BrowseDirection::Both) {
            if let Some(reference) = &node.parent {
                if let Some(target) = self.nodes.get(&reference.target) {
                    found.push(target.describe(reference, false));
                }
            }
        }
        if description.browse_direction == BrowseDirection::Invalid {
            return Err(StatusCode::BAD_INVALID_ARGUMENT);
        }

        found.retain(|r| {
            reference_matches(description, &r.reference_type_id)
                && (description.node_class_mask == 0
                    || description.node_class_mask & r.node_class.value() as u32 != 0)
        });
        Ok(found)
    }
}

fn reference_matches(description: &BrowseDescription, reference_type: &NodeId) -> bool {
    let wanted = &description.reference_type_id;
    if wanted.is_null() || wanted == reference_type {
        return true;
    }
    description.include_subtypes
        && (wanted.is_standard_numeric(reference_type_ids::HIERARCHICAL_REFERENCES)
            || wanted.is_standard_numeric(reference_type_ids::REFERENCES))
}

fn index_range(text: &str) -> Result<NumericRange, StatusCode> {
    text.parse().map_err(|_| StatusCode::BAD_INDEX_RANGE_INVALID)
}

/// Drops the timestamps the client did not ask for.
pub(crate) fn with_timestamps(mut value: DataValue, timestamps: TimestampsToReturn) -> DataValue {
    match timestamps {
        TimestampsToReturn::Source => value.server_timestamp = None,
        TimestampsToReturn::Server => value.source_timestamp = None,
        TimestampsToReturn::Neither | TimestampsToReturn::Invalid => {
            value.source_timestamp = None;
            value.server_timestamp = None;
        }
        TimestampsToReturn::Both => {
            value.server_timestamp = Some(DateTime::now());
        }
    }
    value
}
