//! Project model: turns configuration into dependency graph snapshots
//!
//! Every call to [`Project::graph`] hashes module content afresh and returns
//! a new, independent [`DependencyGraph`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::config::{is_config_file_name, load_config_from_dir, ActionConfig, Config, ModuleConfig};
use crate::error::{ConfigError, GantryError, GraphError, Result};
use crate::graph::{DependencyGraph, EdgePurpose, GraphBuilder, Node, NodeId, NodeKind};

/// What a changed path corresponds to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    /// The project configuration file
    Config,
    /// Content of one or more modules
    Nodes(Vec<NodeId>),
    /// Nothing the project tracks
    Unmatched,
}

/// Content selection for one module
#[derive(Debug, Clone)]
struct ModuleSource {
    name: String,
    dir: PathBuf,
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl ModuleSource {
    fn new(root: &Path, index: usize, module: &ModuleConfig) -> Result<Self> {
        let include = if module.include.is_empty() {
            None
        } else {
            Some(build_globset(&format!("modules[{}].include", index), &module.include)?)
        };
        let exclude = build_globset(&format!("modules[{}].exclude", index), &module.exclude)?;

        Ok(Self {
            name: module.name.clone(),
            dir: root.join(&module.path),
            include,
            exclude,
        })
    }

    fn matches(&self, relative: &Path) -> bool {
        if relative.components().any(|c| c.as_os_str() == ".git") || self.exclude.is_match(relative) {
            return false;
        }
        self.include.as_ref().map_or(true, |set| set.is_match(relative))
    }

    /// Hash of the module's configuration plus every selected file, in path order
    fn content_hash(&self, module: &ModuleConfig) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(module)?);

        if self.dir.exists() {
            let walker = WalkDir::new(&self.dir)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git");

            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(&self.dir).unwrap_or(entry.path());
                if !self.matches(relative) {
                    continue;
                }
                match std::fs::read(entry.path()) {
                    Ok(contents) => {
                        hasher.update(relative.to_string_lossy().as_bytes());
                        hasher.update(Sha256::digest(&contents));
                    }
                    Err(e) => {
                        debug!(path = %entry.path().display(), error = %e, "skipping unreadable file");
                    }
                }
            }
        }

        Ok(format!("{:x}", hasher.finalize()))
    }
}

fn build_globset(field: &str, patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| ConfigError::InvalidGlob {
            field: field.to_string(),
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| {
        ConfigError::InvalidGlob {
            field: field.to_string(),
            pattern: patterns.join(", "),
            message: e.to_string(),
        }
        .into()
    })
}

fn config_hash<T: Serialize>(kind: NodeKind, module: &str, value: &T) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(module.as_bytes());
    hasher.update(serde_json::to_vec(value)?);
    Ok(format!("{:x}", hasher.finalize()))
}

/// A loaded project: configuration plus the root it is relative to
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    config_path: Option<PathBuf>,
    config: Config,
    sources: Vec<ModuleSource>,
}

impl Project {
    /// Find and load the configuration for `dir`; the project root is the
    /// directory holding the config file.
    pub fn load(dir: &Path) -> Result<Self> {
        let (config, path) = load_config_from_dir(dir)?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.to_path_buf());
        let mut project = Self::from_config(root, config)?;
        project.config_path = Some(path);
        Ok(project)
    }

    /// Build a project from an already loaded configuration
    pub fn from_config(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let root = root.into();
        let sources = config
            .modules
            .iter()
            .enumerate()
            .map(|(i, m)| ModuleSource::new(&root, i, m))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            root,
            config_path: None,
            config,
            sources,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Hash all module content and build a fresh graph snapshot
    #[instrument(skip_all, fields(root = %self.root.display(), modules = self.config.modules.len()))]
    pub fn graph(&self) -> Result<DependencyGraph> {
        let mut builder = GraphBuilder::new();

        for (module, source) in self.config.modules.iter().zip(&self.sources) {
            let module_id = NodeId::new(NodeKind::Module, &module.name);
            let mut node = Node::new(NodeKind::Module, &module.name, source.content_hash(module)?)
                .with_working_dir(&source.dir)
                .with_env(module.build.env.clone());
            node.action.command = module.build.command.clone();
            node.action.timeout = module.build.timeout_secs.map(Duration::from_secs);
            builder.add_node(node);

            for dep in &module.build.dependencies {
                builder.add_edge(
                    module_id.clone(),
                    NodeId::new(NodeKind::Module, dep),
                    EdgePurpose::Build,
                );
            }

            for (kind, actions) in [
                (NodeKind::Service, &module.services),
                (NodeKind::Task, &module.tasks),
                (NodeKind::Test, &module.tests),
            ] {
                for action in actions {
                    builder.add_node(self.action_node(kind, module, &source.dir, action)?);
                    builder.add_edge(
                        NodeId::new(kind, &action.name),
                        module_id.clone(),
                        EdgePurpose::Build,
                    );
                }
            }
        }

        for module in &self.config.modules {
            for (kind, purpose, actions) in [
                (NodeKind::Service, EdgePurpose::Runtime, &module.services),
                (NodeKind::Task, EdgePurpose::Runtime, &module.tasks),
                (NodeKind::Test, EdgePurpose::Test, &module.tests),
            ] {
                for action in actions {
                    let from = NodeId::new(kind, &action.name);
                    for dep in &action.dependencies {
                        let to = self.resolve_runtime_dependency(&from, dep)?;
                        builder.add_edge(from.clone(), to, purpose);
                    }
                }
            }
        }

        Ok(builder.build()?)
    }

    fn action_node(
        &self,
        kind: NodeKind,
        module: &ModuleConfig,
        dir: &Path,
        action: &ActionConfig,
    ) -> Result<Node> {
        let mut node = Node::new(kind, &action.name, config_hash(kind, &module.name, action)?)
            .with_command(&action.command)
            .with_working_dir(dir)
            .with_env(action.env.clone());
        node.action.timeout = action.timeout_secs.map(Duration::from_secs);
        Ok(node)
    }

    /// Runtime and test dependencies name a service or a task
    fn resolve_runtime_dependency(&self, from: &NodeId, name: &str) -> Result<NodeId> {
        let mut candidates = Vec::new();
        for module in &self.config.modules {
            if module.services.iter().any(|s| s.name == name) {
                candidates.push(NodeId::new(NodeKind::Service, name));
            }
            if module.tasks.iter().any(|t| t.name == name) {
                candidates.push(NodeId::new(NodeKind::Task, name));
            }
        }

        match candidates.len() {
            1 => Ok(candidates.remove(0)),
            0 => Err(GantryError::Graph(GraphError::MissingDependency {
                from: from.to_string(),
                to: name.to_string(),
            })),
            _ => Err(GantryError::Graph(GraphError::AmbiguousDependency {
                from: from.to_string(),
                name: name.to_string(),
                candidates: candidates
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })),
        }
    }

    /// Map a changed path to the nodes whose content it belongs to
    pub fn resolve_path(&self, path: &Path) -> PathMatch {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let is_config = match &self.config_path {
            Some(config_path) => &path == config_path,
            None => {
                path.parent() == Some(self.root.as_path())
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(is_config_file_name)
            }
        };
        if is_config {
            return PathMatch::Config;
        }

        let nodes: Vec<NodeId> = self
            .sources
            .iter()
            .filter(|source| {
                path.strip_prefix(&source.dir)
                    .is_ok_and(|relative| source.matches(relative))
            })
            .map(|source| NodeId::new(NodeKind::Module, &source.name))
            .collect();

        if nodes.is_empty() {
            PathMatch::Unmatched
        } else {
            PathMatch::Nodes(nodes)
        }
    }

    /// Directories worth watching for changes: the project root plus module
    /// directories outside it, with nested directories collapsed
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<&PathBuf> = self.sources.iter().map(|s| &s.dir).collect();
        dirs.push(&self.root);
        dirs.sort();

        let mut roots: Vec<PathBuf> = Vec::new();
        for dir in dirs {
            if roots.iter().any(|r| dir.starts_with(r)) {
                continue;
            }
            roots.push(dir.clone());
        }
        roots
    }
}
