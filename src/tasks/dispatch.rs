//! Dispatch loop: hands pending tasks to idle agents.
//!
//! Each tick pulls the next pending task while an idle agent exists, assigns
//! it, marks it running, and runs it in the background. When no agent is free
//! the task stays queued for the next tick.
//!
//! Tests drive `run_dispatch_cycle()` directly instead of spawning the loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentPool, AgentRunner, AgentStatus};
use crate::tasks::model::{Task, TaskStatus};
use crate::tasks::queue::TaskScheduler;

/// Spawn the background dispatch loop.
///
/// Returns the loop handle and a shutdown flag; set the flag to stop the loop
/// after its current tick.
pub fn spawn_dispatch_loop(
    scheduler: Arc<TaskScheduler>,
    pool: Arc<dyn AgentPool>,
    runner: Arc<dyn AgentRunner>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Dispatch loop started (interval: {}ms)", interval.as_millis());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Dispatch loop shutting down");
                return;
            }

            run_dispatch_cycle(&scheduler, &pool, &runner).await;
        }
    });

    (handle, shutdown_flag)
}

/// Single dispatch pass. Returns handles to the task runs it started.
pub async fn run_dispatch_cycle(
    scheduler: &Arc<TaskScheduler>,
    pool: &Arc<dyn AgentPool>,
    runner: &Arc<dyn AgentRunner>,
) -> Vec<JoinHandle<()>> {
    let mut started = Vec::new();

    loop {
        let available = pool.list_available().await;
        let Some(agent_id) = available.into_iter().next() else {
            debug!("No idle agents, leaving tasks queued");
            break;
        };

        let Some(task) = scheduler.next_task().await else {
            break;
        };

        if let Err(e) = pool.assign(&agent_id, &task.id).await {
            warn!(agent_id = %agent_id, task_id = %task.id, error = %e, "Agent assignment failed, will retry next tick");
            break;
        }

        let task = match scheduler.update_task_status(&task.id, TaskStatus::Running).await {
            Ok(task) => task,
            Err(e) => {
                // The task changed under us (removed or already claimed).
                warn!(task_id = %task.id, error = %e, "Could not start task");
                release(pool, &agent_id).await;
                continue;
            }
        };

        info!(agent_id = %agent_id, task_id = %task.id, "Dispatched task");
        started.push(spawn_run(
            Arc::clone(scheduler),
            Arc::clone(pool),
            Arc::clone(runner),
            agent_id,
            task,
        ));
    }

    started
}

fn spawn_run(
    scheduler: Arc<TaskScheduler>,
    pool: Arc<dyn AgentPool>,
    runner: Arc<dyn AgentRunner>,
    agent_id: String,
    task: Task,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let outcome = match runner.run(&agent_id, &task).await {
            Ok(output) => scheduler.complete_task(&task.id, output).await,
            Err(e) => {
                warn!(agent_id = %agent_id, task_id = %task.id, error = %e, "Agent run failed");
                scheduler.fail_task(&task.id, e.to_string()).await
            }
        };

        if let Err(e) = outcome {
            error!(task_id = %task.id, error = %e, "Could not record task outcome");
        }

        release(&pool, &agent_id).await;
    })
}

async fn release(pool: &Arc<dyn AgentPool>, agent_id: &str) {
    if let Err(e) = pool.set_status(agent_id, AgentStatus::Idle).await {
        warn!(agent_id = %agent_id, error = %e, "Failed to release agent");
    }
}
