//! Dependency graph over project nodes
//!
//! A [`DependencyGraph`] is an immutable snapshot of the project: nodes
//! (modules, services, tasks, tests) and the directed edges between them.
//! A changed project produces a new snapshot through [`GraphBuilder`]; a
//! snapshot is never edited in place.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::GraphError;

/// Kind of project node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A buildable source module
    Module,
    /// A deployable service
    Service,
    /// A one-off task definition
    Task,
    /// A test suite definition
    Test,
}

impl NodeKind {
    /// All node kinds, in declaration order
    pub const ALL: [NodeKind; 4] = [Self::Module, Self::Service, Self::Task, Self::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Service => "service",
            Self::Task => "task",
            Self::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "module" => Some(Self::Module),
            "service" => Some(Self::Service),
            "task" => Some(Self::Task),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one node depends on another
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgePurpose {
    /// Needed to build
    Build,
    /// Needed at runtime (deploy / run)
    Runtime,
    /// Needed to run tests
    Test,
}

impl EdgePurpose {
    /// All edge purposes, in declaration order
    pub const ALL: [EdgePurpose; 3] = [Self::Build, Self::Runtime, Self::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Runtime => "runtime",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for EdgePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a node: its kind and name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    /// Node kind
    pub kind: NodeKind,
    /// Node name, unique within its kind
    pub name: String,
}

impl NodeId {
    /// Create a new node ID
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Parse a node ID from "kind.name" format
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, name) = s.split_once('.')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(NodeKind::parse(kind)?, name))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

/// What it takes to perform the action attached to a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAction {
    /// Shell command, if the node has one
    pub command: Option<String>,
    /// Directory the command runs in
    pub working_dir: PathBuf,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Upper bound on the action's run time
    pub timeout: Option<Duration>,
}

/// A node in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node identity
    pub id: NodeId,
    /// Hash of the node's own configuration and content
    pub content_hash: String,
    /// Action payload
    pub action: NodeAction,
}

impl Node {
    /// Create a node with an empty action
    pub fn new(kind: NodeKind, name: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(kind, name),
            content_hash: content_hash.into(),
            action: NodeAction::default(),
        }
    }

    /// Set the command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.action.command = Some(command.into());
        self
    }

    /// Set the working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.action.working_dir = dir.into();
        self
    }

    /// Set the environment
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.action.env = env;
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.action.timeout = Some(timeout);
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.id.kind
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }
}

/// A directed dependency: `from` depends on `to` for `purpose`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// The dependant
    pub from: NodeId,
    /// The dependency
    pub to: NodeId,
    /// Why the dependency exists
    pub purpose: EdgePurpose,
}

/// Filter for [`DependencyGraph::get_nodes`]
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Only nodes of these kinds (all kinds when `None`)
    pub kinds: Option<BTreeSet<NodeKind>>,
    /// Only nodes with these names (all names when `None`)
    pub names: Option<BTreeSet<String>>,
}

impl NodeFilter {
    /// Match every node
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to the given kinds
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = NodeKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Restrict to the given names
    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&node.id.kind))
            && self.names.as_ref().map_or(true, |n| n.contains(&node.id.name))
    }
}

/// Options for dependency / dependent queries
#[derive(Debug, Clone, Default)]
pub struct DependencyQuery {
    /// Only report nodes of these kinds; traversal still passes through others
    pub kinds: Option<BTreeSet<NodeKind>>,
    /// Only follow edges of these purposes
    pub purposes: Option<BTreeSet<EdgePurpose>>,
    /// Follow edges transitively
    pub recursive: bool,
}

impl DependencyQuery {
    /// Direct neighbours only
    pub fn direct() -> Self {
        Self::default()
    }

    /// Full transitive closure
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    /// Report only nodes of the given kinds
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = NodeKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Follow only edges of the given purposes
    pub fn with_purposes(mut self, purposes: impl IntoIterator<Item = EdgePurpose>) -> Self {
        self.purposes = Some(purposes.into_iter().collect());
        self
    }

    fn follows(&self, purpose: EdgePurpose) -> bool {
        self.purposes.as_ref().map_or(true, |p| p.contains(&purpose))
    }

    fn reports(&self, kind: NodeKind) -> bool {
        self.kinds.as_ref().map_or(true, |k| k.contains(&kind))
    }
}

/// Collects nodes and edges and validates them into a [`DependencyGraph`]
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node
    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.push(node);
        self
    }

    /// Add an edge: `from` depends on `to`
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, purpose: EdgePurpose) -> &mut Self {
        self.edges.push(Edge { from, to, purpose });
        self
    }

    /// Chaining form of [`GraphBuilder::add_node`]
    pub fn with_node(mut self, node: Node) -> Self {
        self.add_node(node);
        self
    }

    /// Chaining form of [`GraphBuilder::add_edge`]
    pub fn with_edge(mut self, from: NodeId, to: NodeId, purpose: EdgePurpose) -> Self {
        self.add_edge(from, to, purpose);
        self
    }

    /// Validate and freeze the graph.
    ///
    /// Fails on duplicate nodes, edges pointing at unknown nodes, a cycle
    /// among the edges of any single purpose, or a cycle that only appears
    /// when purposes are combined.
    #[instrument(skip_all, fields(nodes = self.nodes.len(), edges = self.edges.len()))]
    pub fn build(self) -> Result<DependencyGraph, GraphError> {
        let mut nodes: BTreeMap<NodeId, Node> = BTreeMap::new();
        for node in self.nodes {
            if nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id.to_string()));
            }
            nodes.insert(node.id.clone(), node);
        }

        let mut edges: BTreeSet<Edge> = BTreeSet::new();
        for edge in self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !nodes.contains_key(endpoint) {
                    return Err(GraphError::MissingDependency {
                        from: edge.from.to_string(),
                        to: endpoint.to_string(),
                    });
                }
            }
            edges.insert(edge);
        }
        let edges: Vec<Edge> = edges.into_iter().collect();

        let mut dependencies: HashMap<NodeId, Vec<(NodeId, EdgePurpose)>> = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<(NodeId, EdgePurpose)>> = HashMap::new();
        for edge in &edges {
            dependencies
                .entry(edge.from.clone())
                .or_default()
                .push((edge.to.clone(), edge.purpose));
            dependents
                .entry(edge.to.clone())
                .or_default()
                .push((edge.from.clone(), edge.purpose));
        }

        let mut graph = DependencyGraph {
            nodes,
            edges,
            dependencies,
            dependents,
            sorted_order: Vec::new(),
        };

        for purpose in EdgePurpose::ALL {
            graph.topological_sort(Some(purpose))?;
        }
        graph.sorted_order = graph.topological_sort(None)?;

        debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "dependency graph built"
        );
        Ok(graph)
    }
}

/// Immutable snapshot of the project's nodes and dependency edges
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Nodes indexed (and ordered) by id
    nodes: BTreeMap<NodeId, Node>,
    /// All edges, deduplicated
    edges: Vec<Edge>,
    /// Outgoing edges: node -> what it depends on
    dependencies: HashMap<NodeId, Vec<(NodeId, EdgePurpose)>>,
    /// Incoming edges: node -> what depends on it
    dependents: HashMap<NodeId, Vec<(NodeId, EdgePurpose)>>,
    /// Topological order over all edges (dependencies first)
    sorted_order: Vec<NodeId>,
}

impl DependencyGraph {
    /// Topological sort using Kahn's algorithm, over the edges of one
    /// purpose or of all purposes when `purpose` is `None`.
    fn topological_sort(&self, purpose: Option<EdgePurpose>) -> Result<Vec<NodeId>, GraphError> {
        let follows = |p: EdgePurpose| purpose.map_or(true, |only| only == p);

        let mut in_degree: HashMap<&NodeId, usize> = HashMap::new();
        let mut queue: VecDeque<&NodeId> = VecDeque::new();
        let mut sorted: Vec<NodeId> = Vec::with_capacity(self.nodes.len());

        for id in self.nodes.keys() {
            let degree = self
                .dependencies
                .get(id)
                .map(|deps| deps.iter().filter(|(_, p)| follows(*p)).count())
                .unwrap_or(0);
            in_degree.insert(id, degree);
            if degree == 0 {
                queue.push_back(id);
            }
        }

        while let Some(id) = queue.pop_front() {
            sorted.push(id.clone());

            for (dependent, p) in self.dependents.get(id).into_iter().flatten() {
                if !follows(*p) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if sorted.len() != self.nodes.len() {
            let in_sorted: HashSet<&NodeId> = sorted.iter().collect();
            let remaining: BTreeSet<&NodeId> = self
                .nodes
                .keys()
                .filter(|id| !in_sorted.contains(id))
                .collect();
            let nodes = self.find_cycle(&remaining, purpose);
            return Err(GraphError::Cycle {
                purpose: purpose.map_or("mixed", |p| p.as_str()).to_string(),
                nodes,
            });
        }

        Ok(sorted)
    }

    /// Walk dependency edges inside the unsortable remainder until a node
    /// repeats. Every remaining node still has a remaining dependency, so the
    /// walk always closes a cycle.
    fn find_cycle(&self, remaining: &BTreeSet<&NodeId>, purpose: Option<EdgePurpose>) -> Vec<String> {
        let mut path: Vec<&NodeId> = Vec::new();
        let mut position: HashMap<&NodeId, usize> = HashMap::new();
        let mut current = match remaining.iter().next() {
            Some(id) => *id,
            None => return Vec::new(),
        };

        loop {
            if let Some(&start) = position.get(current) {
                let mut cycle: Vec<String> = path[start..].iter().map(|id| id.to_string()).collect();
                cycle.push(current.to_string());
                return cycle;
            }
            position.insert(current, path.len());
            path.push(current);

            let next = self
                .dependencies
                .get(current)
                .into_iter()
                .flatten()
                .filter(|(_, p)| purpose.map_or(true, |only| only == *p))
                .map(|(dep, _)| dep)
                .filter(|dep| remaining.contains(dep))
                .min();

            match next {
                Some(dep) => current = dep,
                None => return path.iter().map(|id| id.to_string()).collect(),
            }
        }
    }

    /// Nodes matching the filter, ordered by id
    pub fn get_nodes(&self, filter: &NodeFilter) -> Vec<&Node> {
        self.nodes.values().filter(|n| filter.matches(n)).collect()
    }

    /// Get a specific node
    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Check whether a node exists
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes that `id` depends on, ordered by id
    pub fn get_dependencies(&self, id: &NodeId, query: &DependencyQuery) -> Vec<&Node> {
        self.traverse(id, &self.dependencies, query)
    }

    /// Nodes that depend on `id`, ordered by id.
    ///
    /// With `recursive` set this is the reachability closure along reversed
    /// edges; visited nodes are never expanded twice.
    pub fn get_dependents(&self, id: &NodeId, query: &DependencyQuery) -> Vec<&Node> {
        self.traverse(id, &self.dependents, query)
    }

    fn traverse(
        &self,
        start: &NodeId,
        adjacency: &HashMap<NodeId, Vec<(NodeId, EdgePurpose)>>,
        query: &DependencyQuery,
    ) -> Vec<&Node> {
        let mut visited: BTreeSet<&NodeId> = BTreeSet::new();
        let mut queue: VecDeque<&NodeId> = VecDeque::new();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            for (next, purpose) in adjacency.get(current).into_iter().flatten() {
                if !query.follows(*purpose) || next == start {
                    continue;
                }
                if visited.insert(next) && query.recursive {
                    queue.push_back(next);
                }
            }
        }

        visited
            .into_iter()
            .filter(|id| query.reports(id.kind))
            .filter_map(|id| self.nodes.get(id))
            .collect()
    }

    /// Direct dependencies of a node with the purpose of each edge
    pub fn direct_dependencies(&self, id: &NodeId) -> &[(NodeId, EdgePurpose)] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Node ids in topological order (dependencies first)
    pub fn sorted(&self) -> &[NodeId] {
        &self.sorted_order
    }

    /// All nodes, ordered by id
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All edges
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Get the total number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str) -> NodeId {
        NodeId::new(NodeKind::Module, name)
    }

    fn service(name: &str) -> NodeId {
        NodeId::new(NodeKind::Service, name)
    }

    /// common <- utils <- app (build), api service built from app, api needs db at runtime
    fn create_graph() -> DependencyGraph {
        GraphBuilder::new()
            .with_node(Node::new(NodeKind::Module, "common", "h-common"))
            .with_node(Node::new(NodeKind::Module, "utils", "h-utils"))
            .with_node(Node::new(NodeKind::Module, "app", "h-app"))
            .with_node(Node::new(NodeKind::Service, "api", "h-api"))
            .with_node(Node::new(NodeKind::Service, "db", "h-db"))
            .with_edge(module("utils"), module("common"), EdgePurpose::Build)
            .with_edge(module("app"), module("utils"), EdgePurpose::Build)
            .with_edge(module("app"), module("common"), EdgePurpose::Build)
            .with_edge(service("api"), module("app"), EdgePurpose::Build)
            .with_edge(service("api"), service("db"), EdgePurpose::Runtime)
            .build()
            .unwrap()
    }

    fn names(nodes: Vec<&Node>) -> Vec<String> {
        nodes.into_iter().map(|n| n.id.to_string()).collect()
    }

    #[test]
    fn test_node_id_display_and_parse() {
        let id = service("api");
        assert_eq!(id.to_string(), "service.api");
        assert_eq!(NodeId::parse("service.api"), Some(id));
        assert!(NodeId::parse("widget.api").is_none());
        assert!(NodeId::parse("service.").is_none());
        assert!(NodeId::parse("api").is_none());
    }

    #[test]
    fn test_build_graph() {
        let graph = create_graph();
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.edges().len(), 5);
    }

    #[test]
    fn test_topological_order() {
        let graph = create_graph();
        let sorted = graph.sorted();
        let pos = |id: &NodeId| sorted.iter().position(|s| s == id).unwrap();

        assert!(pos(&module("common")) < pos(&module("utils")));
        assert!(pos(&module("utils")) < pos(&module("app")));
        assert!(pos(&module("app")) < pos(&service("api")));
        assert!(pos(&service("db")) < pos(&service("api")));
    }

    #[test]
    fn test_get_nodes_filters() {
        let graph = create_graph();

        let modules = graph.get_nodes(&NodeFilter::all().with_kinds([NodeKind::Module]));
        assert_eq!(names(modules), vec!["module.app", "module.common", "module.utils"]);

        let named = graph.get_nodes(&NodeFilter::all().with_names(["api", "app"]));
        assert_eq!(names(named), vec!["module.app", "service.api"]);

        let both = graph.get_nodes(
            &NodeFilter::all()
                .with_kinds([NodeKind::Service])
                .with_names(["app", "db"]),
        );
        assert_eq!(names(both), vec!["service.db"]);
    }

    #[test]
    fn test_direct_dependents() {
        let graph = create_graph();
        let dependents = graph.get_dependents(&module("common"), &DependencyQuery::direct());
        assert_eq!(names(dependents), vec!["module.app", "module.utils"]);
    }

    #[test]
    fn test_recursive_dependents() {
        let graph = create_graph();
        let dependents = graph.get_dependents(&module("common"), &DependencyQuery::recursive());
        assert_eq!(
            names(dependents),
            vec!["module.app", "module.utils", "service.api"]
        );

        let dependents = graph.get_dependents(&service("api"), &DependencyQuery::recursive());
        assert!(dependents.is_empty());
    }

    #[test]
    fn test_dependents_kind_filter_traverses_other_kinds() {
        let graph = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Module, "lib", "1"))
            .with_node(Node::new(NodeKind::Service, "api", "2"))
            .with_node(Node::new(NodeKind::Test, "e2e", "3"))
            .with_edge(service("api"), module("lib"), EdgePurpose::Build)
            .with_edge(NodeId::new(NodeKind::Test, "e2e"), service("api"), EdgePurpose::Test)
            .build()
            .unwrap();

        let tests = graph.get_dependents(
            &module("lib"),
            &DependencyQuery::recursive().with_kinds([NodeKind::Test]),
        );
        assert_eq!(names(tests), vec!["test.e2e"]);
    }

    #[test]
    fn test_dependents_purpose_filter() {
        let graph = create_graph();
        let runtime = graph.get_dependents(
            &service("db"),
            &DependencyQuery::recursive().with_purposes([EdgePurpose::Runtime]),
        );
        assert_eq!(names(runtime), vec!["service.api"]);

        let build_only = graph.get_dependents(
            &service("db"),
            &DependencyQuery::recursive().with_purposes([EdgePurpose::Build]),
        );
        assert!(build_only.is_empty());
    }

    #[test]
    fn test_recursive_dependencies() {
        let graph = create_graph();
        let deps = graph.get_dependencies(
            &service("api"),
            &DependencyQuery::recursive().with_kinds([NodeKind::Module]),
        );
        assert_eq!(names(deps), vec!["module.app", "module.common", "module.utils"]);
    }

    #[test]
    fn test_duplicate_node() {
        let result = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Module, "a", "1"))
            .with_node(Node::new(NodeKind::Module, "a", "2"))
            .build();
        assert_eq!(
            result.unwrap_err(),
            GraphError::DuplicateNode("module.a".to_string())
        );
    }

    #[test]
    fn test_same_name_different_kind_is_allowed() {
        let graph = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Module, "api", "1"))
            .with_node(Node::new(NodeKind::Service, "api", "2"))
            .build()
            .unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_missing_dependency() {
        let result = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Module, "a", "1"))
            .with_edge(module("a"), module("ghost"), EdgePurpose::Build)
            .build();
        assert!(matches!(
            result,
            Err(GraphError::MissingDependency { ref to, .. }) if to == "module.ghost"
        ));
    }

    #[test]
    fn test_cycle_detection_names_participants() {
        let result = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Module, "a", "1"))
            .with_node(Node::new(NodeKind::Module, "b", "2"))
            .with_node(Node::new(NodeKind::Module, "c", "3"))
            .with_node(Node::new(NodeKind::Module, "d", "4"))
            .with_edge(module("a"), module("b"), EdgePurpose::Build)
            .with_edge(module("b"), module("c"), EdgePurpose::Build)
            .with_edge(module("c"), module("a"), EdgePurpose::Build)
            .with_edge(module("d"), module("a"), EdgePurpose::Build)
            .build();

        match result {
            Err(GraphError::Cycle { purpose, nodes }) => {
                assert_eq!(purpose, "build");
                assert_eq!(
                    nodes,
                    vec!["module.a", "module.b", "module.c", "module.a"]
                );
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let result = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Service, "a", "1"))
            .with_edge(service("a"), service("a"), EdgePurpose::Runtime)
            .build();
        assert!(matches!(result, Err(GraphError::Cycle { ref purpose, .. }) if purpose == "runtime"));
    }

    #[test]
    fn test_cross_purpose_cycle_is_rejected() {
        let result = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Service, "a", "1"))
            .with_node(Node::new(NodeKind::Service, "b", "2"))
            .with_edge(service("a"), service("b"), EdgePurpose::Runtime)
            .with_edge(service("b"), service("a"), EdgePurpose::Test)
            .build();
        assert!(matches!(result, Err(GraphError::Cycle { ref purpose, .. }) if purpose == "mixed"));
    }

    #[test]
    fn test_parallel_edges_of_different_purposes() {
        let graph = GraphBuilder::new()
            .with_node(Node::new(NodeKind::Service, "a", "1"))
            .with_node(Node::new(NodeKind::Service, "b", "2"))
            .with_edge(service("a"), service("b"), EdgePurpose::Runtime)
            .with_edge(service("a"), service("b"), EdgePurpose::Test)
            .with_edge(service("a"), service("b"), EdgePurpose::Test)
            .build()
            .unwrap();

        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.direct_dependencies(&service("a")).len(), 2);
        assert_eq!(graph.sorted(), &[service("b"), service("a")]);
    }
}
