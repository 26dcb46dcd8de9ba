//! Task types

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gantry_core::{Node, NodeId, NodeKind};

use crate::version::Version;

/// The kind of work a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Build a module
    Build,
    /// Deploy a service
    Deploy,
    /// Run a task definition
    Run,
    /// Run a test suite
    Test,
}

impl TaskKind {
    /// The natural task kind of a node kind
    pub fn for_node(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Module => Self::Build,
            NodeKind::Service => Self::Deploy,
            NodeKind::Task => Self::Run,
            NodeKind::Test => Self::Test,
        }
    }

    /// The node kind this task kind operates on
    pub fn node_kind(&self) -> NodeKind {
        match self {
            Self::Build => NodeKind::Module,
            Self::Deploy => NodeKind::Service,
            Self::Run => NodeKind::Task,
            Self::Test => NodeKind::Test,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Deploy => "deploy",
            Self::Run => "run",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deduplication key of a task: kind, target name and version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub kind: TaskKind,
    pub name: String,
    pub version: Version,
}

impl TaskKey {
    pub fn new(kind: TaskKind, name: impl Into<String>, version: impl Into<Version>) -> Self {
        Self {
            kind,
            name: name.into(),
            version: version.into(),
        }
    }

    /// The graph node this task targets
    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.kind.node_kind(), &self.name)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.kind, self.name, self.version)
    }
}

/// Kind-specific execution data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TaskAction {
    /// Modules without a build command have nothing to build
    Build { command: Option<String> },
    Deploy { command: String },
    Run { command: String },
    Test { command: String },
}

impl TaskAction {
    /// Action for a task of `kind`, taking the command from the node
    pub fn new(kind: TaskKind, command: Option<String>) -> Self {
        match kind {
            TaskKind::Build => Self::Build { command },
            TaskKind::Deploy => Self::Deploy {
                command: command.unwrap_or_default(),
            },
            TaskKind::Run => Self::Run {
                command: command.unwrap_or_default(),
            },
            TaskKind::Test => Self::Test {
                command: command.unwrap_or_default(),
            },
        }
    }

    /// Shell command to run, if any
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Build { command } => command.as_deref(),
            Self::Deploy { command } | Self::Run { command } | Self::Test { command } => {
                Some(command.as_str())
            }
        }
    }

    /// Short description for progress output
    pub fn describe(&self) -> String {
        self.command()
            .map(str::to_string)
            .unwrap_or_else(|| "<nothing to build>".to_string())
    }
}

/// A unit of work on one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Deduplication key
    pub key: TaskKey,
    /// Keys of the tasks that must have a successful result first
    pub dependencies: Vec<TaskKey>,
    /// Bypass any cached result for this key
    pub force: bool,
    /// What to execute
    pub action: TaskAction,
    /// Working directory for the action
    pub working_dir: PathBuf,
    /// Extra environment for the action
    pub env: BTreeMap<String, String>,
    /// Optional timeout for the action
    pub timeout: Option<Duration>,
}

impl Task {
    /// Create a task with no dependencies and no command
    pub fn new(key: TaskKey) -> Self {
        let action = TaskAction::new(key.kind, None);
        Self {
            key,
            dependencies: Vec::new(),
            force: false,
            action,
            working_dir: PathBuf::from("."),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Create the natural task of a graph node
    pub fn for_node(node: &Node, version: Version) -> Self {
        let kind = TaskKind::for_node(node.kind());
        Self {
            key: TaskKey::new(kind, node.name(), version),
            dependencies: Vec::new(),
            force: false,
            action: TaskAction::new(kind, node.action.command.clone()),
            working_dir: node.action.working_dir.clone(),
            env: node.action.env.clone(),
            timeout: node.action.timeout,
        }
    }

    /// Add a dependency
    pub fn with_dependency(mut self, key: TaskKey) -> Self {
        self.dependencies.push(key);
        self
    }

    /// Set the force flag
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.action = TaskAction::new(self.key.kind, Some(command.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_key_display() {
        let key = TaskKey::new(TaskKind::Build, "api", "v-0123456789");
        assert_eq!(key.to_string(), "build.api@v-0123456789");
        assert_eq!(key.node_id().to_string(), "module.api");
    }

    #[test]
    fn test_kind_mapping_round_trips() {
        for kind in NodeKind::ALL {
            assert_eq!(TaskKind::for_node(kind).node_kind(), kind);
        }
    }

    #[test]
    fn test_task_for_node() {
        let node = Node::new(NodeKind::Service, "api", "hash")
            .with_command("./deploy.sh")
            .with_working_dir("/srv/api")
            .with_timeout(Duration::from_secs(30));
        let task = Task::for_node(&node, Version::from("v-1"));

        assert_eq!(task.key.kind, TaskKind::Deploy);
        assert_eq!(task.action.command(), Some("./deploy.sh"));
        assert_eq!(task.working_dir, PathBuf::from("/srv/api"));
        assert_eq!(task.timeout, Some(Duration::from_secs(30)));
        assert!(!task.force);
    }

    #[test]
    fn test_build_without_command() {
        let node = Node::new(NodeKind::Module, "docs", "hash");
        let task = Task::for_node(&node, Version::from("v-1"));
        assert_eq!(task.action, TaskAction::Build { command: None });
        assert_eq!(task.action.describe(), "<nothing to build>");
    }

    #[test]
    fn test_task_builder() {
        let dep = TaskKey::new(TaskKind::Build, "common", "v-1");
        let task = Task::new(TaskKey::new(TaskKind::Build, "api", "v-2"))
            .with_command("cargo build")
            .with_dependency(dep.clone())
            .with_force(true);

        assert_eq!(task.dependencies, vec![dep]);
        assert!(task.force);
        assert_eq!(task.action.command(), Some("cargo build"));
    }
}
