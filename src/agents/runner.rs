//! Agent runner: the opaque capability that actually works a task's prompt.

use async_trait::async_trait;

use crate::error::AgentError;
use crate::tasks::Task;

/// Executes a task's prompt on behalf of an agent.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run `task` on `agent_id`, returning the produced text.
    async fn run(&self, agent_id: &str, task: &Task) -> Result<String, AgentError>;
}

/// Runner that answers with the prompt it was given. Used by the demo binary.
pub struct EchoRunner;

#[async_trait]
impl AgentRunner for EchoRunner {
    async fn run(&self, agent_id: &str, task: &Task) -> Result<String, AgentError> {
        Ok(format!("[{agent_id}] {}", task.prompt))
    }
}
