//! Workflow engine: graph editing and fail-fast execution.
//!
//! Structural edits go through the engine so the node `inputs`/`outputs`
//! mirrors stay in sync and the graph stays acyclic. A connection is applied,
//! the graph re-validated, and the connection rolled back if validation fails.
//!
//! Store writes happen while the workflow map is locked, so they land in the
//! same order as the changes they record.
//!
//! Execution runs against a snapshot taken when the workflow enters
//! `running`. Edits and second runs are rejected with `Busy` until the run
//! ends, and the final status is always written back.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::{NodeError, WorkflowError};
use crate::store::Store;
use crate::tasks::TaskScheduler;
use crate::workflow::context::{ExecutionContext, ExecutionReport};
use crate::workflow::model::{Connection, Workflow, WorkflowNode, WorkflowStatus};
use crate::workflow::node::NodeExecutor;
use crate::workflow::order::calculate_execution_order;
use crate::workflow::validate::{ValidationReport, validate_workflow};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Priority of tasks submitted by process nodes unless configured otherwise.
const DEFAULT_TASK_PRIORITY: i32 = 5;

/// Progress notifications for subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    StatusChanged {
        workflow_id: String,
        status: WorkflowStatus,
    },
    NodeStarted {
        workflow_id: String,
        node_id: String,
    },
    NodeCompleted {
        workflow_id: String,
        node_id: String,
    },
    NodeFailed {
        workflow_id: String,
        node_id: String,
        error: String,
    },
}

/// Owns every workflow and runs them against the shared task scheduler.
pub struct WorkflowEngine {
    workflows: RwLock<HashMap<String, Workflow>>,
    /// Cancel signals for in-flight runs, keyed by workflow id.
    runs: RwLock<HashMap<String, watch::Sender<bool>>>,
    executor: NodeExecutor,
    store: Option<Arc<dyn Store>>,
    tx: broadcast::Sender<WorkflowEvent>,
}

impl WorkflowEngine {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self::with_task_priority(scheduler, DEFAULT_TASK_PRIORITY)
    }

    /// Create an engine whose process nodes submit tasks at `priority`.
    pub fn with_task_priority(scheduler: Arc<TaskScheduler>, priority: i32) -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            workflows: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            executor: NodeExecutor::new(scheduler, priority),
            store: None,
            tx,
        }
    }

    /// Attach a persistence backend.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Subscribe to workflow and node events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.tx.subscribe()
    }

    // ── Graph editing ───────────────────────────────────────────────

    /// Create and store an empty draft workflow.
    pub async fn create_workflow(&self, name: impl Into<String>) -> Workflow {
        let workflow = Workflow::new(name);
        {
            let mut workflows = self.workflows.write().await;
            workflows.insert(workflow.id.clone(), workflow.clone());
            self.persist(&workflow).await;
        }

        info!(workflow_id = %workflow.id, name = %workflow.name, "Workflow created");
        workflow
    }

    /// Add a node. Its `inputs`/`outputs` are reset; only `connect_nodes`
    /// fills them.
    pub async fn add_node(
        &self,
        workflow_id: &str,
        mut node: WorkflowNode,
    ) -> Result<WorkflowNode, WorkflowError> {
        node.inputs.clear();
        node.outputs.clear();

        {
            let mut workflows = self.workflows.write().await;
            let workflow = editable(&mut workflows, workflow_id)?;

            if workflow.node(&node.id).is_some() {
                return Err(WorkflowError::DuplicateNodeId {
                    workflow_id: workflow_id.to_string(),
                    node_id: node.id,
                });
            }

            workflow.nodes.push(node.clone());
            workflow.touch();
            self.persist(workflow).await;
        }

        debug!(workflow_id = %workflow_id, node_id = %node.id, node_type = %node.node_type, "Node added");
        Ok(node)
    }

    /// Add a connection, rejecting it if the graph would become invalid.
    pub async fn connect_nodes(
        &self,
        workflow_id: &str,
        connection: Connection,
    ) -> Result<Connection, WorkflowError> {
        if connection.source_port.is_empty() || connection.target_port.is_empty() {
            return Err(WorkflowError::InvalidConnection {
                reason: "ports must be non-empty".to_string(),
            });
        }

        {
            let mut workflows = self.workflows.write().await;
            let workflow = editable(&mut workflows, workflow_id)?;

            for endpoint in [&connection.source_node_id, &connection.target_node_id] {
                if workflow.node(endpoint).is_none() {
                    return Err(WorkflowError::NodeNotFound {
                        workflow_id: workflow_id.to_string(),
                        node_id: endpoint.clone(),
                    });
                }
            }

            if workflow.connections.contains(&connection) {
                return Err(WorkflowError::DuplicateConnection {
                    source_node: connection.source_node_id,
                    source_port: connection.source_port,
                    target_node: connection.target_node_id,
                    target_port: connection.target_port,
                });
            }

            workflow.attach(connection.clone());
            let report = validate_workflow(workflow);
            if !report.is_valid {
                workflow.detach(&connection);
                let reason = report.error_text();
                warn!(workflow_id = %workflow_id, reason = %reason, "Connection rejected");
                return Err(WorkflowError::InvalidConnection { reason });
            }

            workflow.touch();
            self.persist(workflow).await;
        }

        debug!(
            workflow_id = %workflow_id,
            source = %connection.source_node_id,
            target = %connection.target_node_id,
            "Nodes connected"
        );
        Ok(connection)
    }

    /// Validate the stored graph.
    pub async fn validate_workflow(&self, workflow_id: &str) -> Result<ValidationReport, WorkflowError> {
        let workflows = self.workflows.read().await;
        let workflow = workflows
            .get(workflow_id)
            .ok_or_else(|| not_found(workflow_id))?;
        Ok(validate_workflow(workflow))
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Run every node in topological order, stopping at the first failure.
    pub async fn execute_workflow(&self, workflow_id: &str) -> Result<ExecutionReport, WorkflowError> {
        let (snapshot, mut cancel) = {
            let mut workflows = self.workflows.write().await;
            let workflow = workflows
                .get_mut(workflow_id)
                .ok_or_else(|| not_found(workflow_id))?;

            if workflow.status == WorkflowStatus::Running {
                return Err(WorkflowError::Busy {
                    id: workflow_id.to_string(),
                });
            }

            let report = validate_workflow(workflow);
            if !report.is_valid {
                return Err(WorkflowError::InvalidWorkflow {
                    id: workflow_id.to_string(),
                    errors: report.error_text(),
                });
            }

            workflow.status = WorkflowStatus::Running;
            workflow.touch();

            let (cancel_tx, cancel_rx) = watch::channel(false);
            self.runs
                .write()
                .await
                .insert(workflow_id.to_string(), cancel_tx);

            self.persist(workflow).await;
            (workflow.clone(), cancel_rx)
        };

        info!(workflow_id = %workflow_id, nodes = snapshot.nodes.len(), "Workflow execution started");
        self.emit(WorkflowEvent::StatusChanged {
            workflow_id: workflow_id.to_string(),
            status: WorkflowStatus::Running,
        });

        let outcome = match calculate_execution_order(&snapshot) {
            Ok(order) => {
                let mut context = ExecutionContext::new(&snapshot.id, order);
                match self.run_nodes(&snapshot, &mut context, &mut cancel).await {
                    Ok(()) => Ok(context),
                    Err(e) => {
                        warn!(
                            workflow_id = %context.workflow_id(),
                            completed = context.current_node_index().saturating_sub(1),
                            errors = ?context.errors(),
                            "Run halted"
                        );
                        Err(e)
                    }
                }
            }
            Err(e) => Err(e),
        };
        self.runs.write().await.remove(workflow_id);

        let status = match outcome {
            Ok(_) => WorkflowStatus::Completed,
            Err(_) => WorkflowStatus::Failed,
        };
        self.finish(workflow_id, status).await;

        match outcome {
            Ok(context) => {
                info!(workflow_id = %workflow_id, "Workflow execution completed");
                Ok(context.into_report(status))
            }
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "Workflow execution failed");
                Err(e)
            }
        }
    }

    async fn run_nodes(
        &self,
        workflow: &Workflow,
        context: &mut ExecutionContext,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), WorkflowError> {
        while let Some(node_id) = context.advance() {
            if *cancel.borrow() {
                context.record_error(format!("cancelled before {node_id}"));
                return Err(WorkflowError::Cancelled {
                    id: workflow.id.clone(),
                });
            }

            let node = workflow
                .node(&node_id)
                .ok_or_else(|| WorkflowError::NodeNotFound {
                    workflow_id: workflow.id.clone(),
                    node_id: node_id.clone(),
                })?;

            self.emit(WorkflowEvent::NodeStarted {
                workflow_id: workflow.id.clone(),
                node_id: node_id.clone(),
            });

            match self.executor.execute(node, context, cancel).await {
                Ok(output) => {
                    context.record_result(output);
                    self.emit(WorkflowEvent::NodeCompleted {
                        workflow_id: workflow.id.clone(),
                        node_id,
                    });
                }
                Err(NodeError::Cancelled { task_id }) => {
                    debug!(workflow_id = %workflow.id, task_id = %task_id, "Run cancelled mid-node");
                    context.record_error(format!("{node_id}: cancelled"));
                    return Err(WorkflowError::Cancelled {
                        id: workflow.id.clone(),
                    });
                }
                Err(source) => {
                    context.record_error(format!("{node_id}: {source}"));
                    self.emit(WorkflowEvent::NodeFailed {
                        workflow_id: workflow.id.clone(),
                        node_id: node_id.clone(),
                        error: source.to_string(),
                    });
                    return Err(WorkflowError::NodeExecutionFailed { node_id, source });
                }
            }
        }

        Ok(())
    }

    /// Write the terminal status unless the workflow was deleted mid-run.
    async fn finish(&self, workflow_id: &str, status: WorkflowStatus) {
        {
            let mut workflows = self.workflows.write().await;
            let Some(workflow) = workflows.get_mut(workflow_id) else {
                debug!(workflow_id = %workflow_id, "Workflow deleted during run, skipping final status");
                return;
            };
            workflow.status = status;
            workflow.touch();
            self.persist(workflow).await;
        }

        self.emit(WorkflowEvent::StatusChanged {
            workflow_id: workflow_id.to_string(),
            status,
        });
    }

    // ── Lookup & lifecycle ──────────────────────────────────────────

    pub async fn get_workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    /// All workflows, oldest first.
    pub async fn list_workflows(&self) -> Vec<Workflow> {
        let mut all: Vec<Workflow> = self.workflows.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Remove a workflow. A run in progress stops before its next node, and
    /// a process node waiting on its task gives up.
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<Workflow, WorkflowError> {
        let removed = {
            let mut workflows = self.workflows.write().await;
            let removed = workflows
                .remove(workflow_id)
                .ok_or_else(|| not_found(workflow_id))?;

            if let Some(ref store) = self.store {
                if let Err(e) = store.delete_workflow(workflow_id).await {
                    warn!(workflow_id = %workflow_id, error = %e, "Failed to delete workflow from store");
                }
            }
            removed
        };

        if let Some(cancel) = self.runs.write().await.remove(workflow_id) {
            let _ = cancel.send(true);
            info!(workflow_id = %workflow_id, "Cancelling in-flight run");
        }

        info!(workflow_id = %workflow_id, "Workflow deleted");
        Ok(removed)
    }

    /// Reload workflows from the store.
    ///
    /// Workflows that were `running` when the process stopped are marked
    /// failed. Returns the number loaded.
    pub async fn restore(&self) -> usize {
        let Some(ref store) = self.store else {
            return 0;
        };

        let loaded = match store.load_workflows().await {
            Ok(workflows) => workflows,
            Err(e) => {
                warn!(error = %e, "Failed to load workflows from store");
                return 0;
            }
        };

        let count = loaded.len();
        let mut interrupted = 0;
        {
            let mut workflows = self.workflows.write().await;
            for mut workflow in loaded {
                if workflow.status == WorkflowStatus::Running {
                    workflow.status = WorkflowStatus::Failed;
                    workflow.touch();
                    self.persist(&workflow).await;
                    interrupted += 1;
                }
                workflows.insert(workflow.id.clone(), workflow);
            }
        }

        if interrupted > 0 {
            warn!(count = interrupted, "Failed workflows interrupted by restart");
        }

        info!(count, "Restored workflows from store");
        count
    }

    async fn persist(&self, workflow: &Workflow) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.save_workflow(workflow).await {
                warn!(workflow_id = %workflow.id, error = %e, "Failed to persist workflow");
            }
        }
    }

    fn emit(&self, event: WorkflowEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

fn not_found(workflow_id: &str) -> WorkflowError {
    WorkflowError::NotFound {
        id: workflow_id.to_string(),
    }
}

/// The workflow, if it exists and is not running.
fn editable<'a>(
    workflows: &'a mut HashMap<String, Workflow>,
    workflow_id: &str,
) -> Result<&'a mut Workflow, WorkflowError> {
    let workflow = workflows
        .get_mut(workflow_id)
        .ok_or_else(|| not_found(workflow_id))?;
    if workflow.status == WorkflowStatus::Running {
        return Err(WorkflowError::Busy {
            id: workflow_id.to_string(),
        });
    }
    Ok(workflow)
}
