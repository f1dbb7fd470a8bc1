// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Parsing command-line text into node ids, attributes and variants.
//!
//! Values may carry a type prefix (`double:1.5`, `uint16:7`, `nodeid:ns=2;s=X`).
//! Without a prefix the type is inferred, or taken from a reference value.
//! Array values are comma-separated (`double:41,42`).

use ua_client::codec::{Variant, VariantTypeId};
use ua_client::types::ids::attribute_ids;
use ua_client::types::{LocalizedText, NodeId, NumericRange, QualifiedName};

use crate::error::{CliError, CliResult};

/// Parses a node id in its text form, e.g. `ns=2;s=Temperature`.
pub fn parse_node_id(text: &str) -> CliResult<NodeId> {
    text.parse()
        .map_err(|e| CliError::input(format!("invalid node id '{text}': {e}")))
}

/// Parses an index range such as `1:2`.
pub fn parse_index_range(text: &str) -> CliResult<NumericRange> {
    text.parse().map_err(|e| CliError::input(format!("{e}")))
}

/// Parses an attribute name or numeric id.
pub fn parse_attribute(text: &str) -> CliResult<u32> {
    if let Ok(id) = text.parse::<u32>() {
        return Ok(id);
    }
    let id = match text.to_lowercase().replace(['-', '_'], "").as_str() {
        "nodeid" => attribute_ids::NODE_ID,
        "nodeclass" => attribute_ids::NODE_CLASS,
        "browsename" => attribute_ids::BROWSE_NAME,
        "displayname" => attribute_ids::DISPLAY_NAME,
        "description" => attribute_ids::DESCRIPTION,
        "eventnotifier" => attribute_ids::EVENT_NOTIFIER,
        "value" => attribute_ids::VALUE,
        "datatype" => attribute_ids::DATA_TYPE,
        "valuerank" => attribute_ids::VALUE_RANK,
        "accesslevel" => attribute_ids::ACCESS_LEVEL,
        "useraccesslevel" => attribute_ids::USER_ACCESS_LEVEL,
        "historizing" => attribute_ids::HISTORIZING,
        _ => return Err(CliError::input(format!("unknown attribute '{text}'"))),
    };
    Ok(id)
}

/// Maps a type name to its built-in type id.
pub fn parse_type_name(name: &str) -> Option<VariantTypeId> {
    use VariantTypeId as T;
    Some(match name.to_lowercase().as_str() {
        "bool" | "boolean" => T::Boolean,
        "sbyte" | "i8" => T::SByte,
        "byte" | "u8" => T::Byte,
        "int16" | "i16" => T::Int16,
        "uint16" | "u16" => T::UInt16,
        "int32" | "i32" | "int" => T::Int32,
        "uint32" | "u32" => T::UInt32,
        "int64" | "i64" => T::Int64,
        "uint64" | "u64" => T::UInt64,
        "float" | "f32" => T::Float,
        "double" | "f64" => T::Double,
        "string" | "str" => T::String,
        "nodeid" => T::NodeId,
        "qualifiedname" => T::QualifiedName,
        "localizedtext" | "text" => T::LocalizedText,
        _ => return None,
    })
}

/// Parses `text` as a value of the given type.
pub fn parse_as(type_id: VariantTypeId, text: &str) -> CliResult<Variant> {
    let invalid = || CliError::input(format!("'{text}' is not a valid {type_id:?}"));
    let trimmed = text.trim();
    let value = match type_id {
        VariantTypeId::Boolean => Variant::Boolean(parse_bool(trimmed).ok_or_else(invalid)?),
        VariantTypeId::SByte => Variant::SByte(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::Byte => Variant::Byte(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::Int16 => Variant::Int16(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::UInt16 => Variant::UInt16(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::Int32 => Variant::Int32(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::UInt32 => Variant::UInt32(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::Int64 => Variant::Int64(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::UInt64 => Variant::UInt64(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::Float => Variant::Float(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::Double => Variant::Double(trimmed.parse().map_err(|_| invalid())?),
        VariantTypeId::String => Variant::String(text.to_string()),
        VariantTypeId::NodeId => Variant::from(parse_node_id(trimmed)?),
        VariantTypeId::QualifiedName => Variant::from(parse_qualified_name(trimmed)?),
        VariantTypeId::LocalizedText => Variant::from(LocalizedText::new(text)),
        other => {
            return Err(CliError::input(format!(
                "values of type {other:?} cannot be entered on the command line"
            )))
        }
    };
    Ok(value)
}

/// Parses `text`, honouring a type prefix or inferring the type.
///
/// Inference picks Boolean, then Int32, Int64, Double and finally String.
pub fn parse_variant(text: &str) -> CliResult<Variant> {
    if let Some((type_id, rest)) = split_prefix(text) {
        return parse_as(type_id, rest);
    }
    let trimmed = text.trim();
    if let Some(b) = parse_bool(trimmed) {
        return Ok(Variant::Boolean(b));
    }
    if let Ok(v) = trimmed.parse::<i32>() {
        return Ok(Variant::Int32(v));
    }
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(Variant::Int64(v));
    }
    if let Ok(v) = trimmed.parse::<f64>() {
        return Ok(Variant::Double(v));
    }
    Ok(Variant::String(text.to_string()))
}

/// Parses `text` as a value of the same type as `current`.
///
/// A type prefix wins. An array reference value makes `text` a
/// comma-separated list of its element type; a null one falls back to
/// inference.
pub fn parse_like(text: &str, current: &Variant) -> CliResult<Variant> {
    if let Some((type_id, rest)) = split_prefix(text) {
        return parse_as(type_id, rest);
    }
    if let Some(array) = current.as_array() {
        return parse_array(array.element_type, text);
    }
    match current.type_id() {
        Some(type_id) => parse_as(type_id, text),
        None => parse_variant(text),
    }
}

/// Parses a comma-separated list as an array. The element type comes from
/// a type prefix or from the array `current`.
pub fn parse_array_like(text: &str, current: &Variant) -> CliResult<Variant> {
    if let Some((type_id, rest)) = split_prefix(text) {
        return parse_array(type_id, rest);
    }
    match current.as_array() {
        Some(array) => parse_array(array.element_type, text),
        None => Err(CliError::input(format!(
            "cannot tell the element type of '{text}'; prefix it, e.g. double:{text}"
        ))),
    }
}

fn parse_array(element_type: VariantTypeId, text: &str) -> CliResult<Variant> {
    let values = text
        .split(',')
        .map(|item| parse_as(element_type, item))
        .collect::<CliResult<Vec<_>>>()?;
    Variant::array(element_type, values).map_err(|e| CliError::input(e.to_string()))
}

/// Returns `true` if `text` starts with a known type prefix.
pub fn has_type_prefix(text: &str) -> bool {
    split_prefix(text).is_some()
}

fn split_prefix(text: &str) -> Option<(VariantTypeId, &str)> {
    let (prefix, rest) = text.split_once(':')?;
    parse_type_name(prefix).map(|type_id| (type_id, rest))
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_qualified_name(text: &str) -> CliResult<QualifiedName> {
    match text.split_once(':') {
        Some((ns, name)) if ns.chars().all(|c| c.is_ascii_digit()) && !ns.is_empty() => {
            let ns = ns
                .parse()
                .map_err(|_| CliError::input(format!("invalid namespace index in '{text}'")))?;
            Ok(QualifiedName::new(ns, name))
        }
        _ => Ok(QualifiedName::new(0, text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_node_id() {
        assert_eq!(parse_node_id("i=85").unwrap(), NodeId::numeric(0, 85));
        assert_eq!(
            parse_node_id("ns=2;s=Temperature").unwrap(),
            NodeId::string(2, "Temperature")
        );
        assert!(matches!(parse_node_id("Temperature"), Err(CliError::Input(_))));
    }

    #[test]
    fn test_parse_attribute() {
        assert_eq!(parse_attribute("value").unwrap(), attribute_ids::VALUE);
        assert_eq!(parse_attribute("display-name").unwrap(), attribute_ids::DISPLAY_NAME);
        assert_eq!(parse_attribute("DataType").unwrap(), attribute_ids::DATA_TYPE);
        assert_eq!(parse_attribute("3").unwrap(), attribute_ids::BROWSE_NAME);
        assert!(parse_attribute("colour").is_err());
    }

    #[test]
    fn test_parse_variant_inference() {
        assert_eq!(parse_variant("true").unwrap(), Variant::Boolean(true));
        assert_eq!(parse_variant("42").unwrap(), Variant::Int32(42));
        assert_eq!(parse_variant("-7").unwrap(), Variant::Int32(-7));
        assert_eq!(parse_variant("5000000000").unwrap(), Variant::Int64(5_000_000_000));
        assert_eq!(parse_variant("2.5").unwrap(), Variant::Double(2.5));
        assert_eq!(parse_variant("boiler-1").unwrap(), Variant::from("boiler-1"));
        // Not a type prefix, so the colon is part of the string.
        assert_eq!(
            parse_variant("http://example.com").unwrap(),
            Variant::from("http://example.com")
        );
    }

    #[test]
    fn test_parse_variant_prefix() {
        assert_eq!(parse_variant("double:3").unwrap(), Variant::Double(3.0));
        assert_eq!(parse_variant("uint16:7").unwrap(), Variant::UInt16(7));
        assert_eq!(parse_variant("float:1.5").unwrap(), Variant::Float(1.5));
        assert_eq!(parse_variant("string:42").unwrap(), Variant::from("42"));
        assert_eq!(
            parse_variant("nodeid:ns=2;i=7").unwrap(),
            Variant::from(NodeId::numeric(2, 7))
        );
        assert_eq!(
            parse_variant("qualifiedname:2:Pump").unwrap(),
            Variant::from(QualifiedName::new(2, "Pump"))
        );
        assert!(parse_variant("byte:300").is_err());
        assert!(has_type_prefix("int32:1"));
        assert!(!has_type_prefix("opc.tcp://host:4840"));
        assert!(parse_variant("bool:maybe").is_err());
    }

    #[test]
    fn test_parse_arrays() {
        let current = Variant::array(VariantTypeId::Double, vec![Variant::Double(1.0)]).unwrap();
        let expected =
            Variant::array(VariantTypeId::Double, vec![Variant::Double(41.0), Variant::Double(42.0)]).unwrap();
        assert_eq!(parse_array_like("41,42", &current).unwrap(), expected);
        assert_eq!(parse_array_like("double:41,42", &Variant::Empty).unwrap(), expected);
        assert_eq!(parse_like("41, 42", &current).unwrap(), expected);
        assert!(parse_array_like("41,42", &Variant::Empty).is_err());
        assert!(parse_array_like("41,x", &current).is_err());

        assert_eq!(parse_index_range("1:2").unwrap(), NumericRange::new(1, 2));
        assert!(matches!(parse_index_range("2:1"), Err(CliError::Input(_))));
    }

    #[test]
    fn test_parse_like_current_value() {
        assert_eq!(parse_like("3", &Variant::Double(1.0)).unwrap(), Variant::Double(3.0));
        assert_eq!(parse_like("3", &Variant::UInt32(1)).unwrap(), Variant::UInt32(3));
        assert_eq!(parse_like("3", &Variant::from("x")).unwrap(), Variant::from("3"));
        assert_eq!(parse_like("3", &Variant::Empty).unwrap(), Variant::Int32(3));
        assert_eq!(parse_like("int64:3", &Variant::Double(1.0)).unwrap(), Variant::Int64(3));
        assert!(parse_like("-1", &Variant::Byte(0)).is_err());
    }
}
