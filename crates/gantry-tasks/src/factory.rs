//! Task factory: derives versioned tasks from a graph snapshot

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use gantry_core::{DependencyGraph, DependencyQuery, NodeFilter, NodeId};

use crate::task::{Task, TaskKey, TaskKind};
use crate::version::VersionMap;

/// Errors while deriving tasks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FactoryError {
    /// The requested node is not in the graph
    #[error("Unknown node '{0}'")]
    UnknownNode(String),
}

/// Builds tasks against one immutable graph snapshot
#[derive(Debug, Clone)]
pub struct TaskFactory {
    graph: Arc<DependencyGraph>,
    versions: VersionMap,
}

impl TaskFactory {
    pub fn new(graph: Arc<DependencyGraph>) -> Self {
        let versions = VersionMap::compute(&graph);
        Self { graph, versions }
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn versions(&self) -> &VersionMap {
        &self.versions
    }

    /// Key of the natural task of a node
    pub fn key_for(&self, id: &NodeId) -> Result<TaskKey, FactoryError> {
        let version = self
            .versions
            .get(id)
            .ok_or_else(|| FactoryError::UnknownNode(id.to_string()))?;
        Ok(TaskKey::new(TaskKind::for_node(id.kind), &id.name, version.clone()))
    }

    /// The natural task of a node, depending on the tasks of its direct
    /// dependencies (any edge purpose)
    pub fn task_for(&self, id: &NodeId, force: bool) -> Result<Task, FactoryError> {
        let node = self
            .graph
            .get(id)
            .ok_or_else(|| FactoryError::UnknownNode(id.to_string()))?;
        let mut task = Task::for_node(node, self.key_for(id)?.version).with_force(force);

        let deps: BTreeSet<&NodeId> = self
            .graph
            .direct_dependencies(id)
            .iter()
            .map(|(dep, _)| dep)
            .collect();
        for dep in deps {
            task.dependencies.push(self.key_for(dep)?);
        }
        Ok(task)
    }

    /// Tasks for `requested` plus everything they transitively depend on, in
    /// topological order. Only the requested tasks carry `force`.
    #[instrument(skip_all, fields(requested = requested.len(), force = force))]
    pub fn tasks_for(&self, requested: &[NodeId], force: bool) -> Result<Vec<Task>, FactoryError> {
        let roots: BTreeSet<&NodeId> = requested.iter().collect();
        let mut closure: BTreeSet<NodeId> = BTreeSet::new();

        for id in &roots {
            if !self.graph.contains(id) {
                return Err(FactoryError::UnknownNode(id.to_string()));
            }
            closure.insert((*id).clone());
            for dep in self.graph.get_dependencies(id, &DependencyQuery::recursive()) {
                closure.insert(dep.id.clone());
            }
        }

        let tasks = self
            .graph
            .sorted()
            .iter()
            .filter(|id| closure.contains(*id))
            .map(|id| self.task_for(id, force && roots.contains(id)))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(tasks = tasks.len(), "tasks derived");
        Ok(tasks)
    }

    /// Node ids of `kind` named in `names`, or every node of that kind when
    /// `names` is empty
    pub fn resolve(&self, kind: TaskKind, names: &[String]) -> Result<Vec<NodeId>, FactoryError> {
        if names.is_empty() {
            let filter = NodeFilter::all().with_kinds([kind.node_kind()]);
            return Ok(self
                .graph
                .get_nodes(&filter)
                .into_iter()
                .map(|node| node.id.clone())
                .collect());
        }

        names
            .iter()
            .map(|name| {
                let id = NodeId::new(kind.node_kind(), name);
                if self.graph.contains(&id) {
                    Ok(id)
                } else {
                    Err(FactoryError::UnknownNode(id.to_string()))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{EdgePurpose, GraphBuilder, Node, NodeKind};

    fn id(kind: NodeKind, name: &str) -> NodeId {
        NodeId::new(kind, name)
    }

    /// module a -> module b -> module c; service api needs module a and service db
    fn graph() -> Arc<DependencyGraph> {
        let graph = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Module, "a", "ha").with_command("make a"))
            .with_node(Node::new(NodeKind::Module, "b", "hb"))
            .with_node(Node::new(NodeKind::Module, "c", "hc"))
            .with_node(Node::new(NodeKind::Module, "db", "hdb"))
            .with_node(Node::new(NodeKind::Service, "api", "hapi").with_command("./deploy.sh"))
            .with_node(Node::new(NodeKind::Service, "db", "hsdb").with_command("./db.sh"))
            .with_edge(id(NodeKind::Module, "a"), id(NodeKind::Module, "b"), EdgePurpose::Build)
            .with_edge(id(NodeKind::Module, "b"), id(NodeKind::Module, "c"), EdgePurpose::Build)
            .with_edge(id(NodeKind::Service, "api"), id(NodeKind::Module, "a"), EdgePurpose::Build)
            .with_edge(
                id(NodeKind::Service, "api"),
                id(NodeKind::Service, "db"),
                EdgePurpose::Runtime,
            )
            .with_edge(id(NodeKind::Service, "db"), id(NodeKind::Module, "db"), EdgePurpose::Build)
            .build()
            .unwrap();
        Arc::new(graph)
    }

    #[test]
    fn test_task_dependencies_are_direct_keys() {
        let factory = TaskFactory::new(graph());
        let task = factory.task_for(&id(NodeKind::Module, "a"), false).unwrap();

        assert_eq!(task.key.kind, TaskKind::Build);
        assert_eq!(task.action.command(), Some("make a"));
        assert_eq!(
            task.dependencies,
            vec![factory.key_for(&id(NodeKind::Module, "b")).unwrap()]
        );
    }

    #[test]
    fn test_deploy_depends_on_build_and_runtime() {
        let factory = TaskFactory::new(graph());
        let task = factory.task_for(&id(NodeKind::Service, "api"), false).unwrap();

        let deps: Vec<String> = task
            .dependencies
            .iter()
            .map(|k| format!("{}.{}", k.kind, k.name))
            .collect();
        assert_eq!(deps, vec!["build.a", "deploy.db"]);
    }

    #[test]
    fn test_tasks_for_closure_in_order() {
        let factory = TaskFactory::new(graph());
        let tasks = factory
            .tasks_for(&[id(NodeKind::Module, "a")], true)
            .unwrap();

        let names: Vec<&str> = tasks.iter().map(|t| t.key.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
        assert!(tasks[2].force);
        assert!(!tasks[0].force && !tasks[1].force);
    }

    #[test]
    fn test_tasks_for_unknown_node() {
        let factory = TaskFactory::new(graph());
        let err = factory
            .tasks_for(&[id(NodeKind::Module, "ghost")], false)
            .unwrap_err();
        assert_eq!(err, FactoryError::UnknownNode("module.ghost".to_string()));
    }

    #[test]
    fn test_resolve_names() {
        let factory = TaskFactory::new(graph());

        let all = factory.resolve(TaskKind::Deploy, &[]).unwrap();
        assert_eq!(all, vec![id(NodeKind::Service, "api"), id(NodeKind::Service, "db")]);

        let one = factory.resolve(TaskKind::Build, &["b".to_string()]).unwrap();
        assert_eq!(one, vec![id(NodeKind::Module, "b")]);

        assert!(factory.resolve(TaskKind::Test, &["b".to_string()]).is_err());
    }
}
