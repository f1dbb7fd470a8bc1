// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `endpoints` command.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{json, Value};
use ua_client::codec::TypeRegistry;
use ua_client::messages::EndpointDescription;
use ua_client::session::get_endpoints;
use ua_client::{ClientConfig, SecurityPolicy};

use crate::cli::OutputFormat;
use crate::error::CliResult;
use crate::output::emit;

/// Lists the endpoints of the configured server over an unsecured
/// discovery channel.
pub async fn endpoints(output: OutputFormat, config: &ClientConfig) -> CliResult<()> {
    let registry = Arc::new(TypeRegistry::standard());
    let mut endpoints = get_endpoints(config, &config.endpoint, registry).await?;
    endpoints.sort_by(|a, b| b.security_level.cmp(&a.security_level));

    let report = Value::Array(endpoints.iter().map(endpoint_json).collect());
    emit(output, &report, || endpoints_text(&endpoints))
}

fn policy_name(uri: &str) -> String {
    SecurityPolicy::from_uri(uri)
        .map(|p| p.name().to_string())
        .unwrap_or_else(|| uri.to_string())
}

fn token_types(endpoint: &EndpointDescription) -> Vec<String> {
    endpoint
        .user_identity_tokens
        .iter()
        .flatten()
        .map(|t| format!("{:?}", t.token_type))
        .collect()
}

fn endpoint_json(endpoint: &EndpointDescription) -> Value {
    json!({
        "url": endpoint.endpoint_url,
        "server": endpoint.server.application_name.text,
        "application_uri": endpoint.server.application_uri,
        "security_policy": policy_name(&endpoint.security_policy_uri),
        "security_mode": format!("{:?}", endpoint.security_mode),
        "security_level": endpoint.security_level,
        "user_tokens": token_types(endpoint),
        "certificate_bytes": endpoint.server_certificate.len(),
    })
}

fn endpoints_text(endpoints: &[EndpointDescription]) -> String {
    let mut out = String::new();
    for (index, endpoint) in endpoints.iter().enumerate() {
        let _ = writeln!(out, "[{index}] {}", endpoint.endpoint_url);
        let _ = writeln!(out, "    server:   {}", endpoint.server.application_name);
        let _ = writeln!(
            out,
            "    security: {} / {:?} (level {})",
            policy_name(&endpoint.security_policy_uri),
            endpoint.security_mode,
            endpoint.security_level
        );
        let _ = writeln!(out, "    tokens:   {}", token_types(endpoint).join(", "));
    }
    if endpoints.is_empty() {
        out.push_str("no endpoints");
    }
    out.trim_end().to_string()
}
