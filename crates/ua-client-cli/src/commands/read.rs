// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `read` command.

use serde_json::{json, Value};
use ua_client::messages::{ReadValueId, TimestampsToReturn};
use ua_client::Session;

use crate::cli::{OutputFormat, ReadArgs};
use crate::error::CliResult;
use crate::output::{data_value_json, data_value_text, emit};
use crate::value::{parse_attribute, parse_index_range, parse_node_id};

/// Reads one attribute of every node in a single Read call, optionally
/// limited to an index range.
///
/// Per-node failures are shown with their status; they do not fail the
/// command.
pub async fn read(output: OutputFormat, args: &ReadArgs, session: Session) -> CliResult<()> {
    let attribute_id = parse_attribute(&args.attribute)?;
    let range = args.index_range.as_deref().map(parse_index_range).transpose()?;
    let nodes = args
        .nodes
        .iter()
        .map(|n| parse_node_id(n))
        .collect::<CliResult<Vec<_>>>()?;

    let requests = nodes
        .iter()
        .cloned()
        .map(|node| {
            let request = ReadValueId::attribute(node, attribute_id);
            match &range {
                Some(range) => request.with_index_range(range),
                None => request,
            }
        })
        .collect();
    let values = session
        .read(requests, TimestampsToReturn::Both, args.max_age)
        .await?;

    let report = Value::Array(
        nodes
            .iter()
            .zip(&values)
            .map(|(node, value)| json!({ "node": node.to_string(), "result": data_value_json(value) }))
            .collect(),
    );
    emit(output, &report, || {
        nodes
            .iter()
            .zip(&values)
            .map(|(node, value)| format!("{node} = {}", data_value_text(value)))
            .collect::<Vec<_>>()
            .join("\n")
    })
}
