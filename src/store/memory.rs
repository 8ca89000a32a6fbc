//! In-memory store, used by tests and when no data directory is configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::Store;
use crate::error::StoreError;
use crate::tasks::Task;
use crate::workflow::Workflow;

/// Store backed by two hash maps.
#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
    tasks: RwLock<HashMap<String, Task>>,
    /// When set, every write fails with an IO error.
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Io(std::io::Error::other("writes disabled")));
        }
        Ok(())
    }

    /// Get a persisted workflow by id.
    pub async fn workflow(&self, id: &str) -> Option<Workflow> {
        self.workflows.read().await.get(id).cloned()
    }

    /// Get a persisted task by id.
    pub async fn task(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.check_writable()?;
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.workflows.write().await.remove(id);
        Ok(())
    }

    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.tasks.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_tasks() {
        let store = MemoryStore::new();
        store.save_task(&Task::new("t1", "first")).await.unwrap();
        store.save_task(&Task::new("t2", "second")).await.unwrap();

        let mut loaded = store.load_tasks().await.unwrap();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].prompt, "first");

        store.delete_task("t1").await.unwrap();
        assert!(store.task("t1").await.is_none());
    }

    #[tokio::test]
    async fn failing_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.save_task(&Task::new("t1", "x")).await.is_err());
        assert!(store.load_tasks().await.unwrap().is_empty());
    }
}
