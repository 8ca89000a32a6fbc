//! Per-run execution state.

use std::collections::HashMap;

use serde::Serialize;

use crate::workflow::model::WorkflowStatus;
use crate::workflow::node::NodeOutput;

/// State carried through one workflow run.
///
/// Owned by the run; nothing else reads or writes it while the run is in
/// progress.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    workflow_id: String,
    execution_order: Vec<String>,
    cursor: usize,
    node_results: HashMap<String, NodeOutput>,
    errors: Vec<String>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>, execution_order: Vec<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_order,
            cursor: 0,
            node_results: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Index of the next node to run.
    pub fn current_node_index(&self) -> usize {
        self.cursor
    }

    /// Take the next node id and move the cursor past it.
    pub fn advance(&mut self) -> Option<String> {
        let id = self.execution_order.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(id)
    }

    pub fn result(&self, node_id: &str) -> Option<&NodeOutput> {
        self.node_results.get(node_id)
    }

    pub fn record_result(&mut self, output: NodeOutput) {
        self.node_results.insert(output.node_id.clone(), output);
    }

    /// Note a failure against the run. Failed runs do not produce a report,
    /// so these only surface through the failure log.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Close the run out into a report.
    pub fn into_report(self, status: WorkflowStatus) -> ExecutionReport {
        let mut node_results = Vec::with_capacity(self.node_results.len());
        let mut results = self.node_results;
        for id in &self.execution_order {
            if let Some(output) = results.remove(id) {
                node_results.push(output);
            }
        }

        ExecutionReport {
            workflow_id: self.workflow_id,
            status,
            execution_order: self.execution_order,
            node_results,
        }
    }
}

/// Outcome of a completed workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub execution_order: Vec<String>,
    /// Node results in execution order.
    pub node_results: Vec<NodeOutput>,
}

impl ExecutionReport {
    pub fn result(&self, node_id: &str) -> Option<&NodeOutput> {
        self.node_results.iter().find(|r| r.node_id == node_id)
    }

    /// Outputs of the terminal output nodes.
    pub fn final_results(&self) -> impl Iterator<Item = &NodeOutput> {
        self.node_results.iter().filter(|r| r.final_result)
    }
}
