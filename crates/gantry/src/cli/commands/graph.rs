//! Graph command

use std::collections::HashMap;

use clap::Args;
use console::style;
use serde_json::json;
use tracing::info;

use gantry_core::{DependencyGraph, DependencyQuery, Node, NodeFilter, NodeId, NodeKind, Project};
use gantry_tasks::VersionMap;

use crate::cli::{output, Cli, OutputFormat};

/// Inspect the dependency graph
#[derive(Debug, Args)]
pub struct GraphCommand {
    /// Only show nodes of this kind (module, service, task, test)
    #[arg(long, value_parser = parse_node_kind)]
    pub kind: Option<NodeKind>,

    /// Show the nodes that depend on NODE (e.g. module.common)
    #[arg(long, value_name = "NODE")]
    pub dependents: Option<String>,

    /// Include indirect dependents
    #[arg(long, requires = "dependents")]
    pub recursive: bool,
}

fn parse_node_kind(s: &str) -> Result<NodeKind, String> {
    NodeKind::parse(s).ok_or_else(|| {
        let kinds: Vec<&str> = NodeKind::ALL.iter().map(NodeKind::as_str).collect();
        format!("unknown node kind '{}' (expected one of: {})", s, kinds.join(", "))
    })
}

impl GraphCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            kind = ?self.kind,
            dependents = ?self.dependents,
            recursive = self.recursive,
            "executing graph command"
        );
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd)?;
        let graph = project.graph()?;
        let versions = VersionMap::compute(&graph);

        let nodes = self.select(&graph)?;

        match cli.format {
            OutputFormat::Json => {
                let nodes: Vec<serde_json::Value> = nodes
                    .iter()
                    .map(|node| node_json(&graph, &versions, node))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json!({ "nodes": nodes }))?);
            }
            OutputFormat::Text => {
                if let Some(target) = &self.dependents {
                    println!(
                        "{} of {}",
                        output::header(if self.recursive { "Dependents (recursive)" } else { "Dependents" }),
                        output::id_style().apply_to(target)
                    );
                } else {
                    println!("{}", output::header("Dependency graph"));
                }
                println!();

                for node in &nodes {
                    print_node(&graph, &versions, node);
                }
                if !cli.quiet {
                    println!();
                    println!("{}", style(output::plural(nodes.len(), "node")).dim());
                }
            }
        }
        Ok(())
    }

    /// Nodes to show, in topological order
    fn select<'g>(&self, graph: &'g DependencyGraph) -> anyhow::Result<Vec<&'g Node>> {
        let Some(target) = &self.dependents else {
            let filter = match self.kind {
                Some(kind) => NodeFilter::all().with_kinds([kind]),
                None => NodeFilter::all(),
            };
            let mut nodes = graph.get_nodes(&filter);
            sort_topologically(graph, &mut nodes);
            return Ok(nodes);
        };

        let id = NodeId::parse(target)
            .ok_or_else(|| anyhow::anyhow!("Invalid node '{}': expected <kind>.<name>", target))?;
        if !graph.contains(&id) {
            anyhow::bail!("Unknown node '{}'", id);
        }

        let mut query = if self.recursive {
            DependencyQuery::recursive()
        } else {
            DependencyQuery::direct()
        };
        if let Some(kind) = self.kind {
            query = query.with_kinds([kind]);
        }
        let mut nodes = graph.get_dependents(&id, &query);
        sort_topologically(graph, &mut nodes);
        Ok(nodes)
    }
}

fn sort_topologically(graph: &DependencyGraph, nodes: &mut [&Node]) {
    let sorted = graph.sorted();
    let position: HashMap<&NodeId, usize> = sorted.iter().enumerate().map(|(i, id)| (id, i)).collect();
    nodes.sort_by_key(|node| position.get(&node.id).copied().unwrap_or(usize::MAX));
}

fn print_node(graph: &DependencyGraph, versions: &VersionMap, node: &Node) {
    let version = versions
        .get(&node.id)
        .map(|v| v.to_string())
        .unwrap_or_default();
    println!(
        "  {} {}",
        output::id_style().apply_to(&node.id),
        style(version).dim()
    );
    for (dep, purpose) in graph.direct_dependencies(&node.id) {
        println!("      {} {} {}", style("→").dim(), dep, style(format!("({})", purpose)).dim());
    }
}

fn node_json(graph: &DependencyGraph, versions: &VersionMap, node: &Node) -> serde_json::Value {
    let dependencies: Vec<serde_json::Value> = graph
        .direct_dependencies(&node.id)
        .iter()
        .map(|(dep, purpose)| json!({ "node": dep.to_string(), "purpose": purpose.as_str() }))
        .collect();

    json!({
        "id": node.id.to_string(),
        "kind": node.kind().as_str(),
        "name": node.name(),
        "version": versions.get(&node.id).map(|v| v.to_string()),
        "content_hash": node.content_hash,
        "command": node.action.command,
        "dependencies": dependencies,
    })
}
