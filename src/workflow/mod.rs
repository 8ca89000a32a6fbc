//! Workflow graphs: editing, validation, ordering and execution.
//!
//! A workflow is a directed acyclic graph of typed nodes. Process nodes hand
//! their prompt to the task scheduler and wait for an agent to finish it;
//! the other node types are evaluated in place.

pub mod context;
pub mod engine;
pub mod model;
pub mod node;
pub mod order;
mod transfer;
pub mod validate;

pub use context::{ExecutionContext, ExecutionReport};
pub use engine::{WorkflowEngine, WorkflowEvent};
pub use model::{
    Connection, NodeConfig, NodeType, Position, Workflow, WorkflowNode, WorkflowStatus,
    generate_workflow_id,
};
pub use node::{NodeData, NodeOutput, collect_input_data, evaluate_condition};
pub use order::calculate_execution_order;
pub use validate::{ValidationReport, validate_workflow};
