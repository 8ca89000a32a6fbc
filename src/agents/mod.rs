//! Agent collaborators: the worker pool and the runner that executes prompts.

pub mod pool;
pub mod runner;

pub use pool::{Agent, AgentPool, AgentStatus, InMemoryAgentPool};
pub use runner::{AgentRunner, EchoRunner};
