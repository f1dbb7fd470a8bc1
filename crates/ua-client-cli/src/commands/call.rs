// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `call` command.

use std::fmt::Write as _;

use serde_json::{json, Value};
use ua_client::messages::CallMethodResult;
use ua_client::Session;

use crate::cli::{CallArgs, OutputFormat};
use crate::error::{CliError, CliResult};
use crate::output::{emit, status_json, variant_json};
use crate::value::{parse_node_id, parse_variant};

/// Calls one method and prints its output arguments.
pub async fn call(output: OutputFormat, args: &CallArgs, session: Session) -> CliResult<()> {
    let object = parse_node_id(&args.object)?;
    let method = parse_node_id(&args.method)?;
    let inputs = args
        .args
        .iter()
        .map(|a| parse_variant(a))
        .collect::<CliResult<Vec<_>>>()?;

    let result = session.call_method(object, method.clone(), inputs).await?;

    let report = result_json(&result);
    emit(output, &report, || result_text(&result))?;
    if result.status_code.is_bad() {
        return Err(CliError::rejected(format!("call {method}"), result.status_code));
    }
    Ok(())
}

fn result_json(result: &CallMethodResult) -> Value {
    json!({
        "status": status_json(result.status_code),
        "input_argument_results": result
            .input_argument_results
            .iter()
            .flatten()
            .map(|s| status_json(*s))
            .collect::<Vec<_>>(),
        "output_arguments": result
            .output_arguments
            .iter()
            .flatten()
            .map(variant_json)
            .collect::<Vec<_>>(),
    })
}

fn result_text(result: &CallMethodResult) -> String {
    let mut out = format!("status: {}", result.status_code);
    for (index, status) in result.input_argument_results.iter().flatten().enumerate() {
        if status.is_bad() {
            let _ = write!(out, "\ninput[{index}]: {status}");
        }
    }
    for (index, value) in result.output_arguments.iter().flatten().enumerate() {
        let _ = write!(out, "\noutput[{index}] = {value}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ua_client::codec::Variant;
    use ua_client::types::StatusCode;

    #[test]
    fn test_result_text_lists_outputs_and_bad_inputs() {
        let result = CallMethodResult {
            status_code: StatusCode::BAD_INVALID_ARGUMENT,
            input_argument_results: Some(vec![StatusCode::GOOD, StatusCode::BAD_TYPE_MISMATCH]),
            output_arguments: Some(vec![Variant::Double(13.5)]),
            ..Default::default()
        };
        let text = result_text(&result);
        assert!(text.contains("input[1]"));
        assert!(!text.contains("input[0]"));
        assert!(text.contains("output[0] = 13.5"));

        let report = result_json(&result);
        assert_eq!(report["output_arguments"], json!([13.5]));
        assert_eq!(report["input_argument_results"].as_array().map(Vec::len), Some(2));
    }
}
