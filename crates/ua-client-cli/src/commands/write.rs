// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `write` command.

use serde_json::json;
use tracing::debug;
use ua_client::codec::Variant;
use ua_client::messages::WriteValue;
use ua_client::types::StatusCode;
use ua_client::Session;

use crate::cli::{OutputFormat, WriteArgs};
use crate::error::{CliError, CliResult};
use crate::output::{emit, status_json, variant_json};
use crate::value::{has_type_prefix, parse_array_like, parse_index_range, parse_like, parse_node_id};

/// Writes the Value attribute of one node, or the elements of it covered
/// by `--index-range`.
///
/// Without a type prefix the current value is read first and the new value
/// is parsed as the same type, since servers reject mistyped writes.
pub async fn write(output: OutputFormat, args: &WriteArgs, session: Session) -> CliResult<()> {
    let node = parse_node_id(&args.node)?;
    let range = args.index_range.as_deref().map(parse_index_range).transpose()?;

    let current = if has_type_prefix(&args.value) {
        Variant::Empty
    } else {
        let current = session.read_value(node.clone()).await?;
        if current.status().is_bad() {
            return Err(CliError::rejected(format!("read {node}"), current.status()));
        }
        let current = current.value.unwrap_or_default();
        debug!(node = %node, current = %current, "Typing the new value after the current one");
        current
    };
    let value = match &range {
        Some(_) => parse_array_like(&args.value, &current)?,
        None => parse_like(&args.value, &current)?,
    };

    let mut request = WriteValue::value(node.clone(), value.clone());
    if let Some(range) = &range {
        request = request.with_index_range(range);
    }
    let status = session
        .write(vec![request])
        .await?
        .pop()
        .unwrap_or(StatusCode::BAD_UNEXPECTED_ERROR);
    if status.is_bad() {
        return Err(CliError::rejected(format!("write {node}"), status));
    }

    let report = json!({
        "node": node.to_string(),
        "index_range": args.index_range,
        "value": variant_json(&value),
        "status": status_json(status),
    });
    let target = match &range {
        Some(range) => format!("{node}[{range}]"),
        None => node.to_string(),
    };
    emit(output, &report, || format!("{target} <- {value}  [{status}]"))
}
