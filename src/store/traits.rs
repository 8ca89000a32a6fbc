//! `Store` trait: optional persistence for workflows and tasks.
//!
//! The engine never depends on a save succeeding: callers log failures and
//! carry on.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::tasks::Task;
use crate::workflow::Workflow;

/// Backend-agnostic persistence for workflows and tasks.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Workflows ───────────────────────────────────────────────────

    /// Load every persisted workflow.
    async fn load_workflows(&self) -> Result<Vec<Workflow>, StoreError>;

    /// Insert or replace a workflow.
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Remove a workflow. Missing records are not an error.
    async fn delete_workflow(&self, id: &str) -> Result<(), StoreError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Load every persisted task.
    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Insert or replace a task.
    async fn save_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Remove a task. Missing records are not an error.
    async fn delete_task(&self, id: &str) -> Result<(), StoreError>;
}
