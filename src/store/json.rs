//! JSON-file store: one pretty-printed file per record.
//!
//! Layout under the root directory:
//! - `workflows/<id>.json`
//! - `tasks/<id>.json`

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::traits::Store;
use crate::error::StoreError;
use crate::tasks::Task;
use crate::workflow::Workflow;

const WORKFLOWS_DIR: &str = "workflows";
const TASKS_DIR: &str = "tasks";

/// Store that keeps records as JSON files on local disk.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(WORKFLOWS_DIR)).await?;
        tokio::fs::create_dir_all(root.join(TASKS_DIR)).await?;
        Ok(Self { root })
    }

    fn record_path(&self, dir: &str, id: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", file_stem(id)))
    }

    async fn write_record<T: Serialize>(
        &self,
        dir: &str,
        id: &str,
        record: &T,
    ) -> Result<(), StoreError> {
        let path = self.record_path(dir, id);
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove_record(&self, dir: &str, id: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.record_path(dir, id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, StoreError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join(dir)).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let body = tokio::fs::read(&path).await?;
            match serde_json::from_slice(&body) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable record");
                }
            }
        }

        Ok(records)
    }
}

/// Map an id onto a safe file name.
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl Store for JsonFileStore {
    async fn load_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        self.read_all(WORKFLOWS_DIR).await
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.write_record(WORKFLOWS_DIR, &workflow.id, workflow).await
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), StoreError> {
        self.remove_record(WORKFLOWS_DIR, id).await
    }

    async fn load_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.read_all(TASKS_DIR).await
    }

    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        self.write_record(TASKS_DIR, &task.id, task).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        self.remove_record(TASKS_DIR, id).await
    }
}
