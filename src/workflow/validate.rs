//! Structural validation of a workflow graph.
//!
//! Errors make a workflow invalid; warnings are advisory only.

use std::collections::HashMap;

use serde::Serialize;

use crate::workflow::model::{NodeType, Workflow};

/// Outcome of `validate_workflow`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Errors joined for embedding in an error message.
    pub fn error_text(&self) -> String {
        self.errors.join("; ")
    }
}

/// Validate a workflow: cycles, node config, orphans, and entry points.
pub fn validate_workflow(workflow: &Workflow) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for conn in &workflow.connections {
        for endpoint in [&conn.source_node_id, &conn.target_node_id] {
            if workflow.node(endpoint).is_none() {
                errors.push(format!("Connection references unknown node '{endpoint}'"));
            }
        }
    }

    // One cycle report is enough.
    if let Some(node_id) = find_cycle(workflow) {
        errors.push(format!(
            "Circular dependency detected involving node '{node_id}'"
        ));
    }

    for node in &workflow.nodes {
        match node.node_type {
            NodeType::Process if node.config.prompt().is_none() => {
                errors.push(format!("Process node '{}' is missing a prompt", node.id));
            }
            NodeType::Condition if node.config.condition().is_none() => {
                errors.push(format!("Condition node '{}' is missing a condition", node.id));
            }
            _ => {}
        }
    }

    if workflow.nodes.len() > 1 {
        for node in &workflow.nodes {
            let connected = workflow
                .connections
                .iter()
                .any(|c| c.source_node_id == node.id || c.target_node_id == node.id);
            if !connected && node.node_type != NodeType::Input {
                warnings.push(format!("Node '{}' is not connected to any other node", node.id));
            }
        }
    }

    if !workflow.nodes.is_empty()
        && !workflow.nodes.iter().any(|n| n.node_type == NodeType::Input)
    {
        warnings.push("Workflow has no input node, so it has no designated entry point".to_string());
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    OnStack,
    Done,
}

/// Depth-first search with an explicit stack. Returns the node at which a
/// back edge was found.
pub(crate) fn find_cycle(workflow: &Workflow) -> Option<String> {
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for conn in &workflow.connections {
        successors
            .entry(conn.source_node_id.as_str())
            .or_default()
            .push(conn.target_node_id.as_str());
    }

    let mut state: HashMap<&str, Visit> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), Visit::Unvisited))
        .collect();

    for start in workflow.nodes.iter().map(|n| n.id.as_str()) {
        if state.get(start) != Some(&Visit::Unvisited) {
            continue;
        }

        state.insert(start, Visit::OnStack);
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];

        while let Some(top) = stack.len().checked_sub(1) {
            let (node, next_edge) = stack[top];
            let edges = successors.get(node).map(Vec::as_slice).unwrap_or(&[]);

            if next_edge < edges.len() {
                stack[top].1 += 1;
                let next = edges[next_edge];
                match state.get(next) {
                    Some(Visit::OnStack) => return Some(next.to_string()),
                    Some(Visit::Unvisited) => {
                        state.insert(next, Visit::OnStack);
                        stack.push((next, 0));
                    }
                    // Done, or an endpoint that is not a node.
                    _ => {}
                }
            } else {
                state.insert(node, Visit::Done);
                stack.pop();
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{Connection, WorkflowNode};

    fn graph(nodes: Vec<WorkflowNode>, edges: &[(&str, &str)]) -> Workflow {
        let mut wf = Workflow::new("test");
        wf.nodes = nodes;
        for (s, t) in edges {
            wf.attach(Connection::between(*s, *t));
        }
        wf
    }

    #[test]
    fn valid_chain() {
        let wf = graph(
            vec![
                WorkflowNode::input("in"),
                WorkflowNode::process("p", "summarize"),
                WorkflowNode::output("out"),
            ],
            &[("in", "p"), ("p", "out")],
        );
        let report = validate_workflow(&wf);
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn detects_cycle_once() {
        let wf = graph(
            vec![
                WorkflowNode::input("a"),
                WorkflowNode::process("b", "x"),
                WorkflowNode::process("c", "y"),
            ],
            &[("a", "b"), ("b", "c"), ("c", "b"), ("c", "a")],
        );
        let report = validate_workflow(&wf);
        assert!(!report.is_valid);
        let cycles = report
            .errors
            .iter()
            .filter(|e| e.contains("Circular dependency"))
            .count();
        assert_eq!(cycles, 1);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let wf = graph(vec![WorkflowNode::process("p", "x")], &[("p", "p")]);
        assert!(find_cycle(&wf).is_some());
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let n = 5_000;
        let mut wf = Workflow::new("deep");
        wf.nodes = (0..n).map(|i| WorkflowNode::input(i.to_string())).collect();
        for i in 1..n {
            wf.attach(Connection::between((i - 1).to_string(), i.to_string()));
        }
        assert!(find_cycle(&wf).is_none());
    }

    #[test]
    fn missing_config_names_node_and_field() {
        let wf = graph(
            vec![
                WorkflowNode::input("in"),
                WorkflowNode::new("worker", NodeType::Process),
                WorkflowNode::new("gate", NodeType::Condition),
            ],
            &[("in", "worker"), ("worker", "gate")],
        );
        let report = validate_workflow(&wf);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("worker") && e.contains("prompt")));
        assert!(report.errors.iter().any(|e| e.contains("gate") && e.contains("condition")));
    }

    #[test]
    fn orphans_and_missing_entry_are_warnings() {
        let wf = graph(
            vec![
                WorkflowNode::process("p", "x"),
                WorkflowNode::output("out"),
                WorkflowNode::output("stray"),
            ],
            &[("p", "out")],
        );
        let report = validate_workflow(&wf);
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("stray")));
        assert!(report.warnings.iter().any(|w| w.contains("entry point")));
    }

    #[test]
    fn single_node_is_not_an_orphan() {
        let wf = graph(vec![WorkflowNode::output("only")], &[]);
        let report = validate_workflow(&wf);
        assert!(!report.warnings.iter().any(|w| w.contains("not connected")));
    }

    #[test]
    fn unconnected_input_is_fine() {
        let wf = graph(
            vec![WorkflowNode::input("in"), WorkflowNode::input("other")],
            &[],
        );
        assert!(validate_workflow(&wf).warnings.is_empty());
    }

    #[test]
    fn empty_workflow_is_valid_without_warnings() {
        let report = validate_workflow(&Workflow::new("empty"));
        assert!(report.is_valid);
        assert!(report.warnings.is_empty());
    }
}
