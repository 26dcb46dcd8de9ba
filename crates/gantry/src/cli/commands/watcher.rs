//! File watching for `--watch`
//!
//! A debounced `notify` watcher maps changed paths to change events; the
//! watch loop turns each batch into a new round on the shared scheduler.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use gantry_core::{DependencyGraph, NodeId, PathMatch, Project};
use gantry_tasks::{ChangeEvent, SnapshotSource, TaskScheduler, WatchLoop};

use crate::cli::{output, Cli};
use crate::exit_codes::Exit;

/// The live project, shared by the file watcher and the watch loop
pub struct ProjectSource {
    project: RwLock<Project>,
}

impl ProjectSource {
    pub fn new(project: Project) -> Self {
        Self {
            project: RwLock::new(project),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Project> {
        self.project.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn watch_roots(&self) -> Vec<PathBuf> {
        self.read().watch_roots()
    }

    /// Change events for a batch of changed paths, one per node
    pub fn changes_for<P: AsRef<Path>>(&self, paths: impl IntoIterator<Item = P>) -> Vec<ChangeEvent> {
        let project = self.read();
        let mut nodes: BTreeSet<NodeId> = BTreeSet::new();
        let mut reload = false;

        for path in paths {
            match project.resolve_path(path.as_ref()) {
                PathMatch::Config => reload = true,
                PathMatch::Nodes(ids) => nodes.extend(ids),
                PathMatch::Unmatched => {}
            }
        }

        let mut changes: Vec<ChangeEvent> = nodes.into_iter().map(ChangeEvent::NodeChanged).collect();
        if reload {
            changes.push(ChangeEvent::Reload);
        }
        changes
    }
}

impl SnapshotSource for ProjectSource {
    fn reload(&self) -> gantry_core::Result<()> {
        let root = self.read().root().to_path_buf();
        let project = Project::load(&root)?;
        info!(modules = project.config().modules.len(), "configuration reloaded");
        *self.project.write().unwrap_or_else(PoisonError::into_inner) = project;
        Ok(())
    }

    fn snapshot(&self) -> gantry_core::Result<DependencyGraph> {
        self.read().graph()
    }
}

/// Run `requested` once, then again for every change, until Ctrl-C
pub async fn watch(
    cli: &Cli,
    project: Project,
    scheduler: Arc<TaskScheduler>,
    requested: Vec<NodeId>,
    force: bool,
) -> anyhow::Result<()> {
    let debounce = project.config().watch.debounce();
    let source = Arc::new(ProjectSource::new(project));
    let watch_loop = WatchLoop::new(scheduler, source.clone(), requested, force)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let resolver = source.clone();
    let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
        match result {
            Ok(events) => {
                let paths = events
                    .iter()
                    .filter(|e| !e.event.kind.is_access())
                    .flat_map(|e| e.event.paths.iter());
                for change in resolver.changes_for(paths) {
                    debug!(?change, "change event");
                    if tx.send(change).is_err() {
                        break;
                    }
                }
            }
            Err(errors) => {
                for e in errors {
                    error!(error = %e, "watch error");
                }
            }
        }
    })?;

    for root in source.watch_roots() {
        info!(path = %root.display(), "watching");
        debouncer.watch(&root, RecursiveMode::Recursive)?;
    }

    if cli.shows_text() {
        output::info("Watching for changes (Ctrl-C to stop)");
    }

    tokio::select! {
        summary = watch_loop.run(rx) => {
            let summary = summary?;
            info!(rounds = summary.rounds, failed = summary.failed_rounds, "watch stopped");
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => Err(Exit::Interrupted.into()),
    }
}
