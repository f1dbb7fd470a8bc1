// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `history` command.

use serde_json::{json, Value};
use tracing::debug;
use ua_client::codec::ExtensionObject;
use ua_client::messages::{HistoryReadValueId, ReadProcessedDetails, ReadRawModifiedDetails, TimestampsToReturn};
use ua_client::types::ids::object_ids;
use ua_client::types::{DateTime, NodeId};
use ua_client::Session;

use crate::cli::{Aggregate, HistoryArgs, OutputFormat};
use crate::error::{CliError, CliResult};
use crate::output::{data_value_json, data_value_text, emit};
use crate::value::parse_node_id;

/// Reads the history of one node over `[now - since, now]`, following
/// continuation points until the server has returned everything.
///
/// With `--aggregate` the server computes one value per `--interval`
/// instead of returning raw samples.
pub async fn history(output: OutputFormat, args: &HistoryArgs, session: Session) -> CliResult<()> {
    let node = parse_node_id(&args.node)?;
    let end = DateTime::now();
    let start = end.sub(args.since);
    let details = match args.aggregate {
        Some(aggregate) => {
            if args.interval.is_zero() {
                return Err(CliError::input("--interval must be greater than zero"));
            }
            ExtensionObject::from_structure(ReadProcessedDetails::new(
                start,
                end,
                args.interval,
                aggregate_function(aggregate),
            ))
        }
        None => ExtensionObject::from_structure(ReadRawModifiedDetails {
            is_read_modified: false,
            start_time: start,
            end_time: end,
            num_values_per_node: args.per_call,
            return_bounds: false,
        }),
    };

    let mut outcomes = session
        .history_read_all(
            details,
            TimestampsToReturn::Source,
            vec![HistoryReadValueId::new(node.clone())],
        )
        .await?;
    let Some(pages) = outcomes.pop() else {
        return Err(CliError::input(format!("no history result for {node}")));
    };
    if pages.status_code.is_bad() {
        return Err(CliError::rejected(format!("history {node}"), pages.status_code));
    }
    let values = pages.data_values()?;
    debug!(node = %node, pages = pages.pages.len(), values = values.len(), "History read");

    let report = json!({
        "node": node.to_string(),
        "aggregate": args.aggregate.map(|a| format!("{a:?}")),
        "start": start.to_string(),
        "end": end.to_string(),
        "pages": pages.pages.len(),
        "values": values.iter().map(data_value_json).collect::<Vec<Value>>(),
    });
    emit(output, &report, || {
        let mut lines: Vec<String> = values.iter().map(data_value_text).collect();
        lines.push(format!(
            "{} values in {} page(s) from {start} to {end}",
            values.len(),
            pages.pages.len()
        ));
        lines.join("\n")
    })
}

fn aggregate_function(aggregate: Aggregate) -> NodeId {
    let id = match aggregate {
        Aggregate::Average => object_ids::AGGREGATE_FUNCTION_AVERAGE,
        Aggregate::Minimum => object_ids::AGGREGATE_FUNCTION_MINIMUM,
        Aggregate::Maximum => object_ids::AGGREGATE_FUNCTION_MAXIMUM,
    };
    NodeId::numeric(0, id)
}
