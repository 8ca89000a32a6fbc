//! Workflow graph types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Kind of step a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Input,
    Process,
    Condition,
    Output,
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Process => "process",
            Self::Condition => "condition",
            Self::Output => "output",
        };
        write!(f, "{s}")
    }
}

/// Canvas position. The engine ignores it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Type-dependent node settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Prompt for process nodes; seed data for input nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Rule evaluated by condition nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl NodeConfig {
    /// The prompt, if present and not blank.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// The condition, if present and not blank.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().filter(|c| !c.trim().is_empty())
    }
}

/// A directed, ported edge between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub source_node_id: String,
    pub source_port: String,
    pub target_node_id: String,
    pub target_port: String,
}

impl Connection {
    pub fn new(
        source_node_id: impl Into<String>,
        source_port: impl Into<String>,
        target_node_id: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source_node_id: source_node_id.into(),
            source_port: source_port.into(),
            target_node_id: target_node_id.into(),
            target_port: target_port.into(),
        }
    }

    /// Connect `source` to `target` using the default `out`/`in` ports.
    pub fn between(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(source, "out", target, "in")
    }
}

/// One step in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub config: NodeConfig,
    /// Mirror of the connections targeting this node. Maintained by the engine.
    #[serde(default)]
    pub inputs: Vec<Connection>,
    /// Mirror of the connections leaving this node. Maintained by the engine.
    #[serde(default)]
    pub outputs: Vec<Connection>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            position: Position::default(),
            config: NodeConfig::default(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(id: impl Into<String>) -> Self {
        Self::new(id, NodeType::Input)
    }

    pub fn process(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(id, NodeType::Process).with_prompt(prompt)
    }

    pub fn condition(id: impl Into<String>, condition: impl Into<String>) -> Self {
        let mut node = Self::new(id, NodeType::Condition);
        node.config.condition = Some(condition.into());
        node
    }

    pub fn output(id: impl Into<String>) -> Self {
        Self::new(id, NodeType::Output)
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }
}

/// A named directed graph of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an empty draft workflow with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_workflow_id(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
            status: WorkflowStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub(crate) fn node_mut(&mut self, id: &str) -> Option<&mut WorkflowNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Connections leaving `node_id`, in insertion order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections
            .iter()
            .filter(move |c| c.source_node_id == node_id)
    }

    /// Append a connection and mirror it into both endpoint nodes.
    pub(crate) fn attach(&mut self, connection: Connection) {
        if let Some(source) = self.node_mut(&connection.source_node_id) {
            source.outputs.push(connection.clone());
        }
        if let Some(target) = self.node_mut(&connection.target_node_id) {
            target.inputs.push(connection.clone());
        }
        self.connections.push(connection);
    }

    /// Undo `attach` for one connection.
    pub(crate) fn detach(&mut self, connection: &Connection) {
        fn drop_last(list: &mut Vec<Connection>, connection: &Connection) {
            if let Some(pos) = list.iter().rposition(|c| c == connection) {
                list.remove(pos);
            }
        }

        drop_last(&mut self.connections, connection);
        if let Some(source) = self.node_mut(&connection.source_node_id) {
            drop_last(&mut source.outputs, connection);
        }
        if let Some(target) = self.node_mut(&connection.target_node_id) {
            drop_last(&mut target.inputs, connection);
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Generate a unique workflow id.
pub fn generate_workflow_id() -> String {
    format!("workflow_{}", Uuid::new_v4().simple())
}
