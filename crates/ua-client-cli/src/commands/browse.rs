// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `browse` command.

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::warn;
use ua_client::messages::{BrowseDescription, ReferenceDescription};
use ua_client::types::NodeId;
use ua_client::Session;

use crate::cli::{BrowseArgs, OutputFormat};
use crate::error::{CliError, CliResult};
use crate::output::emit;
use crate::value::parse_node_id;

/// A reference found at some depth below the starting node.
struct Found {
    depth: u32,
    parent: NodeId,
    reference: ReferenceDescription,
}

/// Browses the hierarchy below a node level by level.
///
/// Each level is one `browse_all` call, so continuation points are followed
/// for every node of the level before descending. Nodes already visited are
/// not browsed again.
pub async fn browse(output: OutputFormat, args: &BrowseArgs, session: Session) -> CliResult<()> {
    let start = parse_node_id(&args.node)?;
    let mut visited: HashSet<NodeId> = HashSet::from([start.clone()]);
    let mut level = vec![start.clone()];
    let mut found: Vec<Found> = Vec::new();

    for depth in 1..=args.depth.max(1) {
        if level.is_empty() {
            break;
        }
        let descriptions = level.iter().cloned().map(BrowseDescription::children).collect();
        let outcomes = session.browse_all(descriptions, args.max_references).await?;

        let mut next = Vec::new();
        for outcome in outcomes {
            if outcome.status_code.is_bad() {
                if depth == 1 {
                    return Err(CliError::rejected(format!("browse {}", outcome.node_id), outcome.status_code));
                }
                warn!(node = %outcome.node_id, status = %outcome.status_code, "Browse failed");
                continue;
            }
            for reference in outcome.references {
                let target = &reference.node_id;
                if target.is_local() && visited.insert(target.node_id.clone()) {
                    next.push(target.node_id.clone());
                }
                found.push(Found {
                    depth,
                    parent: outcome.node_id.clone(),
                    reference,
                });
            }
        }
        level = next;
    }

    let report = json!({
        "node": start.to_string(),
        "references": found.iter().map(found_json).collect::<Vec<_>>(),
    });
    emit(output, &report, || tree_text(&start, &found))
}

fn found_json(found: &Found) -> Value {
    let r = &found.reference;
    json!({
        "depth": found.depth,
        "parent": found.parent.to_string(),
        "node": r.node_id.to_string(),
        "browse_name": r.browse_name.to_string(),
        "display_name": r.display_name.text,
        "node_class": format!("{:?}", r.node_class),
        "reference_type": r.reference_type_id.to_string(),
        "is_forward": r.is_forward,
        "type_definition": r.type_definition.to_string(),
    })
}

/// Indented tree in browse order, children listed under their parent.
fn tree_text(start: &NodeId, found: &[Found]) -> String {
    let mut lines = vec![start.to_string()];
    write_children(start, 1, found, &mut lines);
    if found.is_empty() {
        lines.push("  (no references)".to_string());
    }
    lines.join("\n")
}

fn write_children(parent: &NodeId, depth: u32, found: &[Found], lines: &mut Vec<String>) {
    for entry in found.iter().filter(|f| f.depth == depth && &f.parent == parent) {
        let r = &entry.reference;
        lines.push(format!(
            "{}{}  {}  [{:?}]",
            "  ".repeat(depth as usize),
            r.display_name,
            r.node_id,
            r.node_class
        ));
        if r.node_id.is_local() {
            write_children(&r.node_id.node_id, depth + 1, found, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ua_client::messages::NodeClass;
    use ua_client::types::{ExpandedNodeId, LocalizedText};

    fn reference(ns: u16, name: &str) -> ReferenceDescription {
        ReferenceDescription {
            node_id: ExpandedNodeId::from(NodeId::string(ns, name)),
            display_name: LocalizedText::new(name),
            node_class: NodeClass::Object,
            is_forward: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_tree_text_nests_children() {
        let root = NodeId::numeric(0, 85);
        let found = vec![
            Found { depth: 1, parent: root.clone(), reference: reference(2, "Boiler") },
            Found { depth: 1, parent: root.clone(), reference: reference(2, "Pump") },
            Found { depth: 2, parent: NodeId::string(2, "Boiler"), reference: reference(2, "Temperature") },
        ];
        let text = tree_text(&root, &found);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("  Boiler"));
        assert!(lines[2].starts_with("    Temperature"));
        assert!(lines[3].starts_with("  Pump"));
    }

    #[test]
    fn test_tree_text_empty() {
        let text = tree_text(&NodeId::numeric(0, 85), &[]);
        assert!(text.ends_with("(no references)"));
    }
}
