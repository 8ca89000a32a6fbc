//! JSON export and import of workflow definitions.

use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::model::Workflow;

impl WorkflowEngine {
    /// Serialize a workflow as pretty-printed JSON.
    pub async fn export_workflow(&self, workflow_id: &str) -> Result<String, WorkflowError> {
        let workflow = self
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound {
                id: workflow_id.to_string(),
            })?;

        serde_json::to_string_pretty(&workflow).map_err(|e| WorkflowError::Import(e.to_string()))
    }

    /// Rebuild an exported workflow under a fresh id.
    ///
    /// Nodes and connections are replayed through `add_node` and
    /// `connect_nodes`, so a document carrying a cycle or dangling edge is
    /// rejected and nothing is kept.
    pub async fn import_workflow(&self, json: &str) -> Result<Workflow, WorkflowError> {
        let source: Workflow =
            serde_json::from_str(json).map_err(|e| WorkflowError::Import(e.to_string()))?;

        let created = self.create_workflow(source.name.clone()).await;
        if let Err(e) = self.replay(&created.id, source).await {
            warn!(workflow_id = %created.id, error = %e, "Import failed, discarding partial workflow");
            let _ = self.delete_workflow(&created.id).await;
            return Err(WorkflowError::Import(e.to_string()));
        }

        info!(workflow_id = %created.id, "Workflow imported");
        self.get_workflow(&created.id)
            .await
            .ok_or(WorkflowError::NotFound { id: created.id })
    }

    async fn replay(&self, workflow_id: &str, source: Workflow) -> Result<(), WorkflowError> {
        for node in source.nodes {
            self.add_node(workflow_id, node).await?;
        }
        for connection in source.connections {
            self.connect_nodes(workflow_id, connection).await?;
        }
        Ok(())
    }
}
