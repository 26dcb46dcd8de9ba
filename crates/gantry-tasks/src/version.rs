//! Content-addressed task versions

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use gantry_core::{DependencyGraph, NodeId};

/// Number of hex digits kept from the digest
const VERSION_HEX_LEN: usize = 10;

/// Fingerprint of a node's content and of everything it depends on
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// `v-` + the first hex digits of SHA-256(content hash, sorted dependency versions)
    pub fn compute<'a>(content_hash: &str, dependencies: impl IntoIterator<Item = &'a Version>) -> Self {
        let mut deps: Vec<&Version> = dependencies.into_iter().collect();
        deps.sort();
        deps.dedup();

        let mut hasher = Sha256::new();
        hasher.update(content_hash.as_bytes());
        for dep in deps {
            hasher.update(b"\n");
            hasher.update(dep.0.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());
        Self(format!("v-{}", &digest[..VERSION_HEX_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Version {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Versions of every node of one graph snapshot
#[derive(Debug, Clone, Default)]
pub struct VersionMap {
    versions: HashMap<NodeId, Version>,
}

impl VersionMap {
    /// Compute versions in topological order so dependencies are known first
    pub fn compute(graph: &DependencyGraph) -> Self {
        let mut versions: HashMap<NodeId, Version> = HashMap::with_capacity(graph.len());

        for id in graph.sorted() {
            let Some(node) = graph.get(id) else {
                continue;
            };
            let deps: BTreeSet<&NodeId> = graph
                .direct_dependencies(id)
                .iter()
                .map(|(dep, _)| dep)
                .collect();
            let version = Version::compute(
                &node.content_hash,
                deps.into_iter().filter_map(|dep| versions.get(dep)),
            );
            versions.insert(id.clone(), version);
        }

        debug!(nodes = versions.len(), "versions computed");
        Self { versions }
    }

    pub fn get(&self, id: &NodeId) -> Option<&Version> {
        self.versions.get(id)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Nodes that are new here or whose version differs from `previous`
    pub fn changed_since(&self, previous: &VersionMap) -> BTreeSet<NodeId> {
        self.versions
            .iter()
            .filter(|(id, version)| previous.get(id) != Some(*version))
            .map(|(id, _)| id.clone())
            .collect()
    }
}
