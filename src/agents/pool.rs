//! Agent pool: a bounded set of workers the dispatch loop assigns tasks to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::AgentError;

/// Status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Error,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// A worker in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    /// Task currently assigned, if busy.
    pub current_task: Option<String>,
}

impl Agent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: AgentStatus::Idle,
            current_task: None,
        }
    }
}

/// The narrow contract the scheduler needs from an agent pool.
#[async_trait]
pub trait AgentPool: Send + Sync {
    /// Ids of every idle agent, in pool order.
    async fn list_available(&self) -> Vec<String>;

    /// Hand a task to an idle agent, marking it busy.
    async fn assign(&self, agent_id: &str, task_id: &str) -> Result<(), AgentError>;

    /// Set an agent's status. Moving to idle clears its current task.
    async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), AgentError>;

    /// Snapshot of every agent.
    async fn agents(&self) -> Vec<Agent>;
}

/// Pool held entirely in memory.
pub struct InMemoryAgentPool {
    agents: RwLock<Vec<Agent>>,
}

impl InMemoryAgentPool {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self {
            agents: RwLock::new(agents),
        }
    }

    /// Pool of `count` idle agents named `agent-1..=count`.
    pub fn with_capacity(count: usize) -> Self {
        let agents = (1..=count)
            .map(|i| Agent::new(format!("agent-{i}"), format!("Agent {i}")))
            .collect();
        Self::new(agents)
    }
}

#[async_trait]
impl AgentPool for InMemoryAgentPool {
    async fn list_available(&self) -> Vec<String> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|a| a.status == AgentStatus::Idle)
            .map(|a| a.id.clone())
            .collect()
    }

    async fn assign(&self, agent_id: &str, task_id: &str) -> Result<(), AgentError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .iter_mut()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| AgentError::NotFound {
                id: agent_id.to_string(),
            })?;

        if agent.status != AgentStatus::Idle {
            return Err(AgentError::NotIdle {
                id: agent_id.to_string(),
                status: agent.status.to_string(),
            });
        }

        agent.status = AgentStatus::Busy;
        agent.current_task = Some(task_id.to_string());
        info!(agent_id = %agent_id, task_id = %task_id, "Task assigned to agent");
        Ok(())
    }

    async fn set_status(&self, agent_id: &str, status: AgentStatus) -> Result<(), AgentError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .iter_mut()
            .find(|a| a.id == agent_id)
            .ok_or_else(|| AgentError::NotFound {
                id: agent_id.to_string(),
            })?;

        agent.status = status;
        if status == AgentStatus::Idle {
            agent.current_task = None;
        }
        debug!(agent_id = %agent_id, status = %status, "Agent status set");
        Ok(())
    }

    async fn agents(&self) -> Vec<Agent> {
        self.agents.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    async fn assert_available_matches_idle(pool: &InMemoryAgentPool) {
        let available: HashSet<String> = pool.list_available().await.into_iter().collect();
        let idle: HashSet<String> = pool
            .agents()
            .await
            .into_iter()
            .filter(|a| a.status == AgentStatus::Idle)
            .map(|a| a.id)
            .collect();
        assert_eq!(available, idle);
    }

    #[tokio::test]
    async fn available_equals_idle() {
        let pool = InMemoryAgentPool::with_capacity(3);
        assert_eq!(pool.list_available().await.len(), 3);
        assert_available_matches_idle(&pool).await;

        pool.assign("agent-1", "t1").await.unwrap();
        assert_available_matches_idle(&pool).await;

        pool.set_status("agent-2", AgentStatus::Error).await.unwrap();
        assert_available_matches_idle(&pool).await;
        assert_eq!(pool.list_available().await, vec!["agent-3".to_string()]);

        pool.set_status("agent-1", AgentStatus::Idle).await.unwrap();
        assert_available_matches_idle(&pool).await;
    }

    #[tokio::test]
    async fn assign_requires_idle() {
        let pool = InMemoryAgentPool::with_capacity(1);
        pool.assign("agent-1", "t1").await.unwrap();

        let err = pool.assign("agent-1", "t2").await.unwrap_err();
        assert!(matches!(err, AgentError::NotIdle { .. }));

        let agents = pool.agents().await;
        assert_eq!(agents[0].current_task.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn idle_clears_current_task() {
        let pool = InMemoryAgentPool::with_capacity(1);
        pool.assign("agent-1", "t1").await.unwrap();
        pool.set_status("agent-1", AgentStatus::Idle).await.unwrap();
        assert!(pool.agents().await[0].current_task.is_none());
    }

    #[tokio::test]
    async fn unknown_agent() {
        let pool = InMemoryAgentPool::with_capacity(1);
        assert!(matches!(
            pool.assign("ghost", "t1").await.unwrap_err(),
            AgentError::NotFound { .. }
        ));
    }
}
