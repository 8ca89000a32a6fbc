//! Agent Flow: priority task scheduling and workflow graphs for AI agents.

pub mod agents;
pub mod config;
pub mod error;
pub mod store;
pub mod tasks;
pub mod workflow;
