//! Task scheduler: in-memory priority backlog with bounded retry.
//!
//! Ordering is priority (highest first), then `created_at` (oldest first),
//! then enqueue sequence. All operations go through one lock so callers never
//! observe a half-applied change.
//!
//! Store writes are queued while that lock is held and applied by a single
//! writer task, so the store sees changes in the order they happened.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::store::Store;
use crate::tasks::model::{QueueStats, Task, TaskStatus};

/// A task plus its position in enqueue order.
#[derive(Debug)]
struct QueuedTask {
    task: Task,
    seq: u64,
}

#[derive(Debug, Default)]
struct Backlog {
    tasks: HashMap<String, QueuedTask>,
    /// One-shot listeners notified on the next terminal transition.
    waiters: HashMap<String, Vec<oneshot::Sender<Task>>>,
    next_seq: u64,
}

impl Backlog {
    fn next_pending_id(&self) -> Option<String> {
        self.tasks
            .values()
            .filter(|q| q.task.status == TaskStatus::Pending)
            .min_by_key(|q| (Reverse(q.task.priority), q.task.created_at, q.seq))
            .map(|q| q.task.id.clone())
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Task, TaskError> {
        self.tasks
            .get_mut(id)
            .map(|q| &mut q.task)
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })
    }

    fn remove(&mut self, id: &str) -> Option<Task> {
        // Dropping the senders tells waiters the task is gone.
        self.waiters.remove(id);
        self.tasks.remove(id).map(|q| q.task)
    }

    fn notify_terminal(&mut self, task: &Task) {
        if let Some(senders) = self.waiters.remove(&task.id) {
            for tx in senders {
                let _ = tx.send(task.clone());
            }
        }
    }
}

/// A store write, queued in mutation order.
enum StoreWrite {
    Save(Task),
    Delete(String),
    Flush(oneshot::Sender<()>),
}

/// Priority task scheduler shared by the dispatch loop and workflow runs.
pub struct TaskScheduler {
    max_retries: u32,
    backlog: RwLock<Backlog>,
    store: Option<Arc<dyn Store>>,
    writes: Option<mpsc::UnboundedSender<StoreWrite>>,
}

impl TaskScheduler {
    /// Create a scheduler with the given retry ceiling.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backlog: RwLock::new(Backlog::default()),
            store: None,
            writes: None,
        }
    }

    /// Persist every task change to `store`.
    ///
    /// Spawns the writer task, so this must be called inside a Tokio runtime.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.writes = Some(spawn_store_writer(Arc::clone(&store)));
        self.store = Some(store);
        self
    }

    /// Add a task to the backlog. A task with an existing id replaces it.
    pub async fn enqueue(&self, task: Task) -> Result<(), TaskError> {
        if task.id.trim().is_empty() {
            return Err(TaskError::InvalidTask {
                reason: "task id must not be empty".to_string(),
            });
        }
        if task.retry_count > self.max_retries {
            return Err(TaskError::InvalidTask {
                reason: format!(
                    "retry count {} exceeds the limit of {}",
                    task.retry_count, self.max_retries
                ),
            });
        }

        {
            let mut backlog = self.backlog.write().await;
            let seq = backlog.next_seq;
            backlog.next_seq += 1;
            if backlog
                .tasks
                .insert(task.id.clone(), QueuedTask { task: task.clone(), seq })
                .is_some()
            {
                warn!(task_id = %task.id, "Enqueued task replaced an existing task with the same id");
            }
            self.persist(task.clone());
        }

        info!(
            task_id = %task.id,
            priority = task.priority,
            kind = ?task.kind,
            "Task enqueued"
        );
        Ok(())
    }

    /// The pending task that would be dequeued next, without removing it.
    pub async fn next_task(&self) -> Option<Task> {
        let backlog = self.backlog.read().await;
        let id = backlog.next_pending_id()?;
        backlog.tasks.get(&id).map(|q| q.task.clone())
    }

    /// Remove and return the next pending task.
    pub async fn dequeue(&self) -> Option<Task> {
        let task = {
            let mut backlog = self.backlog.write().await;
            let id = backlog.next_pending_id()?;
            let task = backlog.remove(&id)?;
            self.forget(task.id.clone());
            task
        };

        debug!(task_id = %task.id, "Task dequeued");
        Some(task)
    }

    /// Get a task by id.
    pub async fn get_task(&self, id: &str) -> Option<Task> {
        self.backlog
            .read()
            .await
            .tasks
            .get(id)
            .map(|q| q.task.clone())
    }

    /// All tasks in dispatch order.
    pub async fn list_tasks(&self) -> Vec<Task> {
        let backlog = self.backlog.read().await;
        let mut queued: Vec<&QueuedTask> = backlog.tasks.values().collect();
        queued.sort_by_key(|q| (Reverse(q.task.priority), q.task.created_at, q.seq));
        queued.into_iter().map(|q| q.task.clone()).collect()
    }

    /// Move a task to `status`, stamping `started_at`/`completed_at`.
    pub async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<Task, TaskError> {
        self.transition(id, status, |_| {}).await
    }

    /// Mark a running task completed with its result.
    pub async fn complete_task(&self, id: &str, result: impl Into<String>) -> Result<Task, TaskError> {
        let result = result.into();
        self.transition(id, TaskStatus::Completed, move |task| {
            task.result = Some(result);
            task.error = None;
        })
        .await
    }

    /// Mark a running task failed with an error message.
    pub async fn fail_task(&self, id: &str, error: impl Into<String>) -> Result<Task, TaskError> {
        let error = error.into();
        self.transition(id, TaskStatus::Failed, move |task| {
            task.error = Some(error);
            task.result = None;
        })
        .await
    }

    async fn transition<F>(&self, id: &str, status: TaskStatus, apply: F) -> Result<Task, TaskError>
    where
        F: FnOnce(&mut Task),
    {
        let task = {
            let mut backlog = self.backlog.write().await;
            let task = backlog.get_mut(id)?;
            let from = task.status;
            task.transition_to(status)
                .map_err(|_| TaskError::InvalidTransition {
                    id: id.to_string(),
                    from: from.to_string(),
                    to: status.to_string(),
                })?;
            apply(&mut *task);
            let snapshot = task.clone();
            if status.is_terminal() {
                backlog.notify_terminal(&snapshot);
            }
            self.persist(snapshot.clone());
            snapshot
        };

        info!(task_id = %id, status = %status, "Task status updated");
        Ok(task)
    }

    /// Put a failed task back in the queue.
    pub async fn retry_task(&self, id: &str) -> Result<Task, TaskError> {
        let task = {
            let mut backlog = self.backlog.write().await;
            let task = backlog.get_mut(id)?;
            if task.retry_count >= self.max_retries {
                return Err(TaskError::RetryLimitExceeded {
                    id: id.to_string(),
                    max: self.max_retries,
                });
            }
            if task.status != TaskStatus::Failed {
                return Err(TaskError::InvalidTransition {
                    id: id.to_string(),
                    from: task.status.to_string(),
                    to: TaskStatus::Pending.to_string(),
                });
            }
            task.reset_for_retry();
            let snapshot = task.clone();
            self.persist(snapshot.clone());
            snapshot
        };

        info!(task_id = %id, retry_count = task.retry_count, "Task queued for retry");
        Ok(task)
    }

    /// Wait for a task's next terminal state.
    ///
    /// Resolves immediately if the task is already terminal. The receiver
    /// errors if the task is removed before it finishes.
    pub async fn wait_for_terminal(&self, id: &str) -> Result<oneshot::Receiver<Task>, TaskError> {
        let (tx, rx) = oneshot::channel();
        let mut backlog = self.backlog.write().await;
        let task = backlog
            .tasks
            .get(id)
            .map(|q| q.task.clone())
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() })?;

        if task.status.is_terminal() {
            let _ = tx.send(task);
        } else {
            backlog.waiters.entry(id.to_string()).or_default().push(tx);
        }
        Ok(rx)
    }

    /// Remove a task regardless of its state.
    pub async fn remove_task(&self, id: &str) -> Option<Task> {
        let mut backlog = self.backlog.write().await;
        let task = backlog.remove(id)?;
        self.forget(task.id.clone());
        Some(task)
    }

    /// Drop every completed or failed task. Returns how many were removed.
    pub async fn clear_finished(&self) -> usize {
        let removed: Vec<String> = {
            let mut backlog = self.backlog.write().await;
            let ids: Vec<String> = backlog
                .tasks
                .values()
                .filter(|q| q.task.status.is_terminal())
                .map(|q| q.task.id.clone())
                .collect();
            for id in &ids {
                backlog.remove(id);
                self.forget(id.clone());
            }
            ids
        };

        if !removed.is_empty() {
            info!(count = removed.len(), "Cleared finished tasks");
        }
        removed.len()
    }

    /// Counts of tasks by status.
    pub async fn queue_stats(&self) -> QueueStats {
        let backlog = self.backlog.read().await;

        let mut stats = QueueStats::default();
        for q in backlog.tasks.values() {
            match q.task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }

        stats.total = backlog.tasks.len();
        stats
    }

    /// Reload tasks from the store.
    ///
    /// Tasks that were `running` when the process stopped cannot be resumed
    /// and are marked failed. Returns the number of tasks loaded.
    pub async fn restore(&self) -> usize {
        let Some(store) = self.store.as_ref() else {
            return 0;
        };

        let tasks = match store.load_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Failed to load tasks from store");
                return 0;
            }
        };

        let mut interrupted = 0;
        let count = tasks.len();
        {
            let mut backlog = self.backlog.write().await;
            let mut tasks = tasks;
            tasks.sort_by_key(|t| t.created_at);
            for mut task in tasks {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Failed;
                    task.error = Some("interrupted by restart".to_string());
                    task.completed_at = Some(chrono::Utc::now());
                    self.persist(task.clone());
                    interrupted += 1;
                }
                let seq = backlog.next_seq;
                backlog.next_seq += 1;
                backlog.tasks.insert(task.id.clone(), QueuedTask { task, seq });
            }
        }

        if interrupted > 0 {
            warn!(count = interrupted, "Failed tasks interrupted by restart");
        }

        info!(count, "Restored tasks from store");
        count
    }

    /// Wait until every store write queued so far has been applied.
    pub async fn flush(&self) {
        let Some(ref writes) = self.writes else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writes.send(StoreWrite::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn persist(&self, task: Task) {
        self.queue_write(StoreWrite::Save(task));
    }

    fn forget(&self, id: String) {
        self.queue_write(StoreWrite::Delete(id));
    }

    fn queue_write(&self, write: StoreWrite) {
        if let Some(ref writes) = self.writes {
            if writes.send(write).is_err() {
                warn!("Task store writer has stopped, dropping write");
            }
        }
    }
}

/// Apply queued writes one at a time. Stops when the scheduler is dropped.
fn spawn_store_writer(store: Arc<dyn Store>) -> mpsc::UnboundedSender<StoreWrite> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(write) = rx.recv().await {
            match write {
                StoreWrite::Save(task) => {
                    if let Err(e) = store.save_task(&task).await {
                        warn!(task_id = %task.id, error = %e, "Failed to persist task");
                    }
                }
                StoreWrite::Delete(id) => {
                    if let Err(e) = store.delete_task(&id).await {
                        warn!(task_id = %id, error = %e, "Failed to delete persisted task");
                    }
                }
                StoreWrite::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Task store writer stopped");
    });

    tx
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn fail(scheduler: &TaskScheduler, id: &str) {
        scheduler.update_task_status(id, TaskStatus::Running).await.unwrap();
        scheduler.fail_task(id, "boom").await.unwrap();
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_id() {
        let scheduler = TaskScheduler::default();
        let err = scheduler.enqueue(Task::new("  ", "x")).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTask { .. }));
        assert_eq!(scheduler.queue_stats().await.total, 0);
    }

    #[tokio::test]
    async fn priority_then_age_ordering() {
        let scheduler = TaskScheduler::default();
        scheduler
            .enqueue(Task::new("A", "a").with_priority(5).with_created_at(at(100)))
            .await
            .unwrap();
        scheduler
            .enqueue(Task::new("B", "b").with_priority(1).with_created_at(at(50)))
            .await
            .unwrap();
        scheduler
            .enqueue(Task::new("C", "c").with_priority(5).with_created_at(at(90)))
            .await
            .unwrap();

        let mut order = Vec::new();
        while let Some(next) = scheduler.next_task().await {
            let taken = scheduler.dequeue().await.unwrap();
            assert_eq!(next.id, taken.id);
            order.push(taken.id);
        }
        assert_eq!(order, vec!["C", "A", "B"]);
        assert!(scheduler.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn equal_keys_fall_back_to_enqueue_order() {
        let scheduler = TaskScheduler::default();
        for id in ["first", "second", "third"] {
            scheduler
                .enqueue(Task::new(id, "x").with_created_at(at(10)))
                .await
                .unwrap();
        }
        assert_eq!(scheduler.dequeue().await.unwrap().id, "first");
        assert_eq!(scheduler.dequeue().await.unwrap().id, "second");
    }

    #[tokio::test]
    async fn next_task_skips_non_pending() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("hi", "x").with_priority(9)).await.unwrap();
        scheduler.enqueue(Task::new("lo", "x").with_priority(1)).await.unwrap();
        scheduler.update_task_status("hi", TaskStatus::Running).await.unwrap();

        assert_eq!(scheduler.next_task().await.unwrap().id, "lo");
        // Pure read: still there.
        assert_eq!(scheduler.queue_stats().await.total, 2);
    }

    #[tokio::test]
    async fn status_updates_stamp_timestamps() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("t", "x")).await.unwrap();

        let running = scheduler.update_task_status("t", TaskStatus::Running).await.unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let done = scheduler.complete_task("t", "ok").await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("ok"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn illegal_transitions_fail_loudly() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("t", "x")).await.unwrap();

        let err = scheduler
            .update_task_status("t", TaskStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert_eq!(scheduler.get_task("t").await.unwrap().status, TaskStatus::Pending);

        let err = scheduler
            .update_task_status("missing", TaskStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound { .. }));
    }

    #[tokio::test]
    async fn retry_ceiling() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("t", "x")).await.unwrap();

        for attempt in 1..=3 {
            fail(&scheduler, "t").await;
            let retried = scheduler.retry_task("t").await.unwrap();
            assert_eq!(retried.retry_count, attempt);
            assert_eq!(retried.status, TaskStatus::Pending);
            assert!(retried.error.is_none());
            assert!(retried.started_at.is_none());
        }

        fail(&scheduler, "t").await;
        let err = scheduler.retry_task("t").await.unwrap_err();
        assert!(matches!(err, TaskError::RetryLimitExceeded { max: 3, .. }));

        let task = scheduler.get_task("t").await.unwrap();
        assert_eq!(task.retry_count, 3);
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn retry_requires_failed_task() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("t", "x")).await.unwrap();
        let err = scheduler.retry_task("t").await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
        assert!(matches!(
            scheduler.retry_task("nope").await.unwrap_err(),
            TaskError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn stats_always_sum_to_total() {
        let scheduler = TaskScheduler::default();
        for id in ["a", "b", "c", "d"] {
            scheduler.enqueue(Task::new(id, "x")).await.unwrap();
        }
        scheduler.update_task_status("a", TaskStatus::Running).await.unwrap();
        fail(&scheduler, "b").await;
        scheduler.update_task_status("c", TaskStatus::Running).await.unwrap();
        scheduler.complete_task("c", "ok").await.unwrap();

        let stats = scheduler.queue_stats().await;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(
            stats.pending + stats.running + stats.completed + stats.failed,
            stats.total
        );
    }

    #[tokio::test]
    async fn waiters_receive_terminal_snapshot() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("t", "x")).await.unwrap();
        let rx = scheduler.wait_for_terminal("t").await.unwrap();

        scheduler.update_task_status("t", TaskStatus::Running).await.unwrap();
        scheduler.fail_task("t", "rate limited").await.unwrap();

        let task = rx.await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("rate limited"));
    }

    #[tokio::test]
    async fn waiter_resolves_immediately_for_terminal_task() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("t", "x")).await.unwrap();
        scheduler.update_task_status("t", TaskStatus::Running).await.unwrap();
        scheduler.complete_task("t", "42").await.unwrap();

        let task = scheduler.wait_for_terminal("t").await.unwrap().await.unwrap();
        assert_eq!(task.result.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn removing_a_task_closes_waiters() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("t", "x")).await.unwrap();
        let rx = scheduler.wait_for_terminal("t").await.unwrap();

        scheduler.dequeue().await.unwrap();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn clear_finished_keeps_live_tasks() {
        let scheduler = TaskScheduler::default();
        scheduler.enqueue(Task::new("done", "x")).await.unwrap();
        scheduler.enqueue(Task::new("waiting", "x")).await.unwrap();
        scheduler.update_task_status("done", TaskStatus::Running).await.unwrap();
        scheduler.complete_task("done", "ok").await.unwrap();

        assert_eq!(scheduler.clear_finished().await, 1);
        assert!(scheduler.get_task("done").await.is_none());
        assert!(scheduler.get_task("waiting").await.is_some());
    }

    #[tokio::test]
    async fn restore_fails_interrupted_tasks() {
        let store = Arc::new(crate::store::MemoryStore::new());
        let mut running = Task::new("was-running", "x");
        running.status = TaskStatus::Running;
        store.save_task(&running).await.unwrap();
        store.save_task(&Task::new("was-pending", "x")).await.unwrap();

        let scheduler = TaskScheduler::new(3).with_store(store);
        assert_eq!(scheduler.restore().await, 2);

        let task = scheduler.get_task("was-running").await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("interrupted by restart"));
        assert_eq!(scheduler.next_task().await.unwrap().id, "was-pending");
    }
}
