//! Per-type node execution.
//!
//! Input, condition and output nodes are pure functions of the node and the
//! results gathered so far. Process nodes submit a task to the scheduler and
//! wait for it to finish.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{NodeError, TaskError};
use crate::tasks::{Task, TaskKind, TaskScheduler, TaskStatus, generate_task_id};
use crate::workflow::context::ExecutionContext;
use crate::workflow::model::{NodeType, WorkflowNode};

/// Payload produced by a node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NodeData {
    Bool(bool),
    Text(String),
    Collected(Vec<NodeOutput>),
}

impl NodeData {
    /// Render the payload as plain text for prompts and condition checks.
    pub fn as_text(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Text(s) => s.clone(),
            Self::Collected(items) => items
                .iter()
                .map(|i| i.data.as_text())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bool(_) => false,
            Self::Text(s) => s.trim().is_empty(),
            Self::Collected(items) => items.is_empty(),
        }
    }
}

/// Result recorded for one executed node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeOutput {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub node_id: String,
    pub data: NodeData,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_data: Vec<NodeOutput>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub final_result: bool,
}

impl NodeOutput {
    fn new(node: &WorkflowNode, data: NodeData) -> Self {
        Self {
            node_type: node.node_type,
            node_id: node.id.clone(),
            data,
            input_data: Vec::new(),
            final_result: false,
        }
    }

    fn with_inputs(mut self, inputs: Vec<NodeOutput>) -> Self {
        self.input_data = inputs;
        self
    }
}

/// Gather the results of every upstream node feeding `node`.
///
/// Edges whose source has not produced a result yet contribute nothing.
pub fn collect_input_data(node: &WorkflowNode, context: &ExecutionContext) -> Vec<NodeOutput> {
    node.inputs
        .iter()
        .filter_map(|conn| context.result(&conn.source_node_id).cloned())
        .collect()
}

/// Evaluate a condition rule against upstream results.
///
/// Recognized rules: `true`/`always`, `false`/`never`, `has_input`/`not_empty`,
/// `empty`. Anything else is a case-insensitive substring test against the
/// upstream data.
pub fn evaluate_condition(condition: &str, inputs: &[NodeOutput]) -> bool {
    let rule = condition.trim().to_lowercase();
    match rule.as_str() {
        "true" | "always" => true,
        "false" | "never" => false,
        "has_input" | "not_empty" => inputs.iter().any(|i| !i.data.is_empty()),
        "empty" => inputs.iter().all(|i| i.data.is_empty()),
        _ => inputs
            .iter()
            .any(|i| i.data.as_text().to_lowercase().contains(&rule)),
    }
}

/// The node's prompt followed by the upstream results.
pub fn build_process_prompt(prompt: &str, inputs: &[NodeOutput]) -> String {
    if inputs.is_empty() {
        return prompt.to_string();
    }

    let mut full = format!("{prompt}\n\nInput data:");
    for input in inputs {
        full.push_str(&format!("\n[{}] {}", input.node_id, input.data.as_text()));
    }
    full
}

/// Runs nodes, submitting process-node work to the task scheduler.
pub struct NodeExecutor {
    scheduler: Arc<TaskScheduler>,
    task_priority: i32,
}

impl NodeExecutor {
    pub fn new(scheduler: Arc<TaskScheduler>, task_priority: i32) -> Self {
        Self {
            scheduler,
            task_priority,
        }
    }

    /// Execute one node against the results gathered so far.
    pub async fn execute(
        &self,
        node: &WorkflowNode,
        context: &ExecutionContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<NodeOutput, NodeError> {
        match node.node_type {
            NodeType::Input => {
                let seed = node.config.prompt.clone().unwrap_or_default();
                Ok(NodeOutput::new(node, NodeData::Text(seed)))
            }
            NodeType::Process => self.execute_process(node, context, cancel).await,
            NodeType::Condition => {
                let condition = node
                    .config
                    .condition()
                    .ok_or_else(|| missing(node, "condition"))?;
                let inputs = collect_input_data(node, context);
                let verdict = evaluate_condition(condition, &inputs);
                Ok(NodeOutput::new(node, NodeData::Bool(verdict)).with_inputs(inputs))
            }
            NodeType::Output => {
                let inputs = collect_input_data(node, context);
                let mut output = NodeOutput::new(node, NodeData::Collected(inputs));
                output.final_result = true;
                Ok(output)
            }
        }
    }

    async fn execute_process(
        &self,
        node: &WorkflowNode,
        context: &ExecutionContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<NodeOutput, NodeError> {
        let prompt = node.config.prompt().ok_or_else(|| missing(node, "prompt"))?;
        let inputs = collect_input_data(node, context);

        let task = Task::new(generate_task_id(), build_process_prompt(prompt, &inputs))
            .with_priority(self.task_priority)
            .with_kind(TaskKind::Workflow);
        let task_id = task.id.clone();

        self.scheduler.enqueue(task).await?;
        debug!(node_id = %node.id, task_id = %task_id, "Process node waiting on task");

        let done = match self.scheduler.wait_for_terminal(&task_id).await {
            Ok(rx) => rx,
            Err(TaskError::NotFound { .. }) => return Err(NodeError::TaskVanished { task_id }),
            Err(e) => return Err(e.into()),
        };

        let task = tokio::select! {
            outcome = done => outcome.map_err(|_| NodeError::TaskVanished { task_id: task_id.clone() })?,
            _ = cancel.changed() => return Err(NodeError::Cancelled { task_id }),
        };

        match task.status {
            TaskStatus::Completed => {
                let result = task.result.unwrap_or_default();
                Ok(NodeOutput::new(node, NodeData::Text(result)).with_inputs(inputs))
            }
            _ => Err(NodeError::TaskFailed {
                message: task
                    .error
                    .unwrap_or_else(|| format!("task ended as {}", task.status)),
                task_id,
            }),
        }
    }
}

fn missing(node: &WorkflowNode, field: &str) -> NodeError {
    NodeError::MissingConfiguration {
        node_id: node.id.clone(),
        field: field.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Connection;

    fn text(node_id: &str, s: &str) -> NodeOutput {
        NodeOutput {
            node_type: NodeType::Process,
            node_id: node_id.to_string(),
            data: NodeData::Text(s.to_string()),
            input_data: Vec::new(),
            final_result: false,
        }
    }

    fn context_with(results: Vec<NodeOutput>) -> ExecutionContext {
        let mut ctx = ExecutionContext::new("wf", results.iter().map(|r| r.node_id.clone()).collect());
        for r in results {
            ctx.record_result(r);
        }
        ctx
    }

    #[test]
    fn conditions() {
        let inputs = vec![text("a", "Status: APPROVED")];
        assert!(evaluate_condition("true", &[]));
        assert!(!evaluate_condition("never", &inputs));
        assert!(evaluate_condition("has_input", &inputs));
        assert!(!evaluate_condition("has_input", &[]));
        assert!(evaluate_condition("approved", &inputs));
        assert!(!evaluate_condition("rejected", &inputs));
        assert!(evaluate_condition("empty", &[text("a", " ")]));
    }

    #[test]
    fn prompt_includes_upstream_text() {
        let prompt = build_process_prompt("Summarize", &[text("a", "one"), text("b", "two")]);
        assert_eq!(prompt, "Summarize\n\nInput data:\n[a] one\n[b] two");
        assert_eq!(build_process_prompt("Summarize", &[]), "Summarize");
    }

    #[test]
    fn collect_skips_missing_sources() {
        let mut node = WorkflowNode::output("out");
        node.inputs.push(Connection::between("a", "out"));
        node.inputs.push(Connection::between("ghost", "out"));

        let ctx = context_with(vec![text("a", "hello")]);
        let inputs = collect_input_data(&node, &ctx);
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].node_id, "a");
    }

    #[tokio::test]
    async fn pure_nodes() {
        let executor = NodeExecutor::new(Arc::new(TaskScheduler::default()), 5);
        let (_tx, mut cancel) = watch::channel(false);
        let ctx = context_with(vec![text("a", "ok")]);

        let input = executor
            .execute(&WorkflowNode::input("in").with_prompt("seed"), &ctx, &mut cancel)
            .await
            .unwrap();
        assert_eq!(input.data, NodeData::Text("seed".to_string()));

        let mut gate = WorkflowNode::condition("gate", "ok");
        gate.inputs.push(Connection::between("a", "gate"));
        let verdict = executor.execute(&gate, &ctx, &mut cancel).await.unwrap();
        assert_eq!(verdict.data, NodeData::Bool(true));
        assert_eq!(verdict.input_data.len(), 1);

        let mut out = WorkflowNode::output("out");
        out.inputs.push(Connection::between("a", "out"));
        let result = executor.execute(&out, &ctx, &mut cancel).await.unwrap();
        assert!(result.final_result);
        assert!(matches!(result.data, NodeData::Collected(ref v) if v.len() == 1));
    }

    #[tokio::test]
    async fn process_without_prompt_fails() {
        let executor = NodeExecutor::new(Arc::new(TaskScheduler::default()), 5);
        let (_tx, mut cancel) = watch::channel(false);
        let ctx = context_with(vec![]);
        let err = executor
            .execute(&WorkflowNode::new("p", NodeType::Process), &ctx, &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::MissingConfiguration { ref field, .. } if field == "prompt"));
    }

    #[tokio::test]
    async fn process_returns_task_result() {
        let scheduler = Arc::new(TaskScheduler::default());
        let executor = NodeExecutor::new(Arc::clone(&scheduler), 7);
        let (_tx, mut cancel) = watch::channel(false);
        let ctx = context_with(vec![]);

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                loop {
                    if let Some(task) = scheduler.next_task().await {
                        assert_eq!(task.priority, 7);
                        assert_eq!(task.kind, TaskKind::Workflow);
                        scheduler.update_task_status(&task.id, TaskStatus::Running).await.unwrap();
                        scheduler.complete_task(&task.id, "summary").await.unwrap();
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let output = executor
            .execute(&WorkflowNode::process("p", "Summarize"), &ctx, &mut cancel)
            .await
            .unwrap();
        worker.await.unwrap();
        assert_eq!(output.data, NodeData::Text("summary".to_string()));
    }

    #[tokio::test]
    async fn process_reports_vanished_task() {
        let scheduler = Arc::new(TaskScheduler::default());
        let executor = NodeExecutor::new(Arc::clone(&scheduler), 5);
        let (_tx, mut cancel) = watch::channel(false);
        let ctx = context_with(vec![]);

        let thief = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                loop {
                    if scheduler.dequeue().await.is_some() {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let err = executor
            .execute(&WorkflowNode::process("p", "x"), &ctx, &mut cancel)
            .await
            .unwrap_err();
        thief.await.unwrap();
        assert!(matches!(err, NodeError::TaskVanished { .. }));
    }
}
