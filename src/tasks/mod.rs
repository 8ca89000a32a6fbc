//! Task system: priority backlog, retry, and agent dispatch.
//!
//! Core components:
//! - `model`: Task record and state machine (Pending → Running → Completed/Failed)
//! - `queue`: `TaskScheduler`, the shared backlog
//! - `dispatch`: background loop handing pending tasks to idle agents

pub mod dispatch;
pub mod model;
pub mod queue;

pub use dispatch::{run_dispatch_cycle, spawn_dispatch_loop};
pub use model::{QueueStats, Task, TaskKind, TaskStatus, generate_task_id};
pub use queue::TaskScheduler;
