//! Execution order via Kahn's algorithm.

use std::collections::{HashMap, VecDeque};

use crate::error::WorkflowError;
use crate::workflow::model::Workflow;

/// Topologically order the workflow's nodes.
///
/// Ready nodes are taken in node insertion order, so the result is stable for
/// a given graph. Fails with `CircularDependency` if any node is left over.
pub fn calculate_execution_order(workflow: &Workflow) -> Result<Vec<String>, WorkflowError> {
    let mut in_degree: HashMap<&str, usize> = workflow
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), 0))
        .collect();

    for conn in &workflow.connections {
        if let Some(deg) = in_degree.get_mut(conn.target_node_id.as_str()) {
            *deg += 1;
        }
    }

    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut order = Vec::with_capacity(workflow.nodes.len());

    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());

        for conn in workflow.outgoing(node) {
            if let Some(deg) = in_degree.get_mut(conn.target_node_id.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(conn.target_node_id.as_str());
                }
            }
        }
    }

    if order.len() < workflow.nodes.len() {
        return Err(WorkflowError::CircularDependency {
            workflow_id: workflow.id.clone(),
        });
    }

    Ok(order)
}
