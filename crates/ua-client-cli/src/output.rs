// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Rendering command results as text, JSON or YAML.

use serde_json::{json, Value};
use ua_client::codec::{DataValue, Variant};
use ua_client::types::{DateTime, StatusCode};

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};

/// Prints a report: `text` for text output, `report` otherwise.
pub fn emit(format: OutputFormat, report: &Value, text: impl FnOnce() -> String) -> CliResult<()> {
    println!("{}", render(format, report, text)?);
    Ok(())
}

/// Renders a report without printing it.
pub fn render(format: OutputFormat, report: &Value, text: impl FnOnce() -> String) -> CliResult<String> {
    match format {
        OutputFormat::Text => Ok(text()),
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| CliError::Io(format!("failed to render JSON: {e}"))),
        OutputFormat::Yaml => serde_yaml::to_string(report)
            .map(|s| s.trim_end().to_string())
            .map_err(|e| CliError::Io(format!("failed to render YAML: {e}"))),
    }
}

/// Prints one record of a stream: a JSON line, a YAML document or text.
pub fn emit_record(format: OutputFormat, record: &Value, text: impl FnOnce() -> String) -> CliResult<()> {
    let line = match format {
        OutputFormat::Text => text(),
        OutputFormat::Json => serde_json::to_string(record)
            .map_err(|e| CliError::Io(format!("failed to render JSON: {e}")))?,
        OutputFormat::Yaml => format!("---\n{}", render(format, record, String::new)?),
    };
    println!("{line}");
    Ok(())
}

/// Converts a variant into the closest JSON value.
pub fn variant_json(value: &Variant) -> Value {
    match value {
        Variant::Empty => Value::Null,
        Variant::Boolean(v) => json!(v),
        Variant::SByte(v) => json!(v),
        Variant::Byte(v) => json!(v),
        Variant::Int16(v) => json!(v),
        Variant::UInt16(v) => json!(v),
        Variant::Int32(v) => json!(v),
        Variant::UInt32(v) => json!(v),
        Variant::Int64(v) => json!(v),
        Variant::UInt64(v) => json!(v),
        Variant::Float(v) => json!(v),
        Variant::Double(v) => json!(v),
        Variant::String(v) => json!(v),
        Variant::DataValue(v) => data_value_json(v),
        Variant::Array(array) => Value::Array(
            array
                .values
                .iter()
                .flatten()
                .map(variant_json)
                .collect(),
        ),
        other => json!(other.to_string()),
    }
}

/// Converts a data value into a JSON object.
pub fn data_value_json(value: &DataValue) -> Value {
    json!({
        "value": value.value.as_ref().map(variant_json).unwrap_or(Value::Null),
        "status": status_json(value.status()),
        "source_timestamp": value.source_timestamp.as_ref().map(timestamp_json),
        "server_timestamp": value.server_timestamp.as_ref().map(timestamp_json),
    })
}

/// A status code as its symbolic name.
pub fn status_json(status: StatusCode) -> Value {
    json!(status.name())
}

fn timestamp_json(time: &DateTime) -> Value {
    json!(time.to_string())
}

/// One-line text form of a data value.
pub fn data_value_text(value: &DataValue) -> String {
    let shown = value
        .value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string());
    let mut line = shown;
    if !value.is_good() {
        line.push_str(&format!("  [{}]", value.status()));
    }
    if let Some(ts) = &value.source_timestamp {
        line.push_str(&format!("  @ {}", ts));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use ua_client::codec::VariantTypeId;

    #[test]
    fn test_variant_json() {
        assert_eq!(variant_json(&Variant::Double(1.5)), json!(1.5));
        assert_eq!(variant_json(&Variant::from("x")), json!("x"));
        assert_eq!(variant_json(&Variant::Empty), Value::Null);
        let array = Variant::array(VariantTypeId::Int32, vec![Variant::Int32(1), Variant::Int32(2)])
            .unwrap();
        assert_eq!(variant_json(&array), json!([1, 2]));
    }

    #[test]
    fn test_data_value_json_bad_status() {
        let value = DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN);
        let report = data_value_json(&value);
        assert_eq!(report["value"], Value::Null);
        assert_eq!(report["status"], json!(StatusCode::BAD_NODE_ID_UNKNOWN.name()));
    }

    #[test]
    fn test_data_value_text() {
        assert_eq!(data_value_text(&DataValue::new(21.5f64)), "21.5");
        let bad = data_value_text(&DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN));
        assert!(bad.starts_with("null  ["));
    }

    #[test]
    fn test_render_formats() {
        let report = json!({ "node": "i=2258", "value": 3 });
        assert_eq!(render(OutputFormat::Text, &report, || "plain".to_string()).unwrap(), "plain");
        let out = render(OutputFormat::Json, &report, String::new).unwrap();
        assert!(out.contains("\"node\": \"i=2258\""));
        let out = render(OutputFormat::Yaml, &report, String::new).unwrap();
        assert!(out.contains("node: i=2258"));
    }
}
