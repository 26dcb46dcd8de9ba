//! Watch loop: change-driven re-entry into a live scheduler
//!
//! Each change produces a fresh graph snapshot. Changed nodes inside the
//! requested scope (or its dependency closure) are forced together with their
//! in-scope dependents; everything else is served from the scheduler's memo.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use gantry_core::{DependencyGraph, DependencyQuery, GantryError, NodeId, NodeKind};

use crate::factory::{FactoryError, TaskFactory};
use crate::reporter::TaskEvent;
use crate::scheduler::{ProcessResults, TaskScheduler};
use crate::task::Task;

/// Something that changed in the watched project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Content belonging to this node changed
    NodeChanged(NodeId),
    /// The project configuration changed
    Reload,
}

/// Produces graph snapshots for the watch loop
pub trait SnapshotSource: Send + Sync {
    /// Re-read the configuration the snapshots are built from
    fn reload(&self) -> gantry_core::Result<()> {
        Ok(())
    }

    /// Build a new, independent snapshot
    fn snapshot(&self) -> gantry_core::Result<DependencyGraph>;
}

impl<T: SnapshotSource + ?Sized> SnapshotSource for Arc<T> {
    fn reload(&self) -> gantry_core::Result<()> {
        (**self).reload()
    }

    fn snapshot(&self) -> gantry_core::Result<DependencyGraph> {
        (**self).snapshot()
    }
}

impl SnapshotSource for gantry_core::Project {
    fn snapshot(&self) -> gantry_core::Result<DependencyGraph> {
        self.graph()
    }
}

/// Watch loop errors
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The first snapshot could not be built
    #[error("Failed to build the dependency graph: {0}")]
    Snapshot(#[from] GantryError),

    /// A requested node does not exist
    #[error(transparent)]
    Factory(#[from] FactoryError),
}

/// Totals over the lifetime of a watch loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Rounds that ran to completion
    pub rounds: usize,
    /// Rounds with at least one failed or skipped task
    pub failed_rounds: usize,
}

impl WatchSummary {
    fn tally(&mut self, results: &ProcessResults) {
        self.rounds += 1;
        if !results.is_success() {
            self.failed_rounds += 1;
        }
    }
}

/// Persistent mode: re-plans and re-enters the scheduler on every change
pub struct WatchLoop<S> {
    scheduler: Arc<TaskScheduler>,
    source: Arc<S>,
    requested: BTreeSet<NodeId>,
    kinds: BTreeSet<NodeKind>,
    force: bool,
    factory: Arc<TaskFactory>,
}

impl<S: SnapshotSource + 'static> WatchLoop<S> {
    /// Take the first snapshot and check that every requested node exists
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        source: S,
        requested: Vec<NodeId>,
        force: bool,
    ) -> Result<Self, WatchError> {
        let factory = Arc::new(TaskFactory::new(Arc::new(source.snapshot()?)));
        for id in &requested {
            factory.key_for(id)?;
        }

        let kinds = requested.iter().map(|id| id.kind).collect();
        Ok(Self {
            scheduler,
            source: Arc::new(source),
            requested: requested.into_iter().collect(),
            kinds,
            force,
            factory,
        })
    }

    /// The current snapshot
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        self.factory.graph()
    }

    /// Tasks for the first round: the requested nodes and their dependencies
    pub fn initial_tasks(&self) -> Result<Vec<Task>, WatchError> {
        let requested: Vec<NodeId> = self.requested.iter().cloned().collect();
        Ok(self.factory.tasks_for(&requested, self.force)?)
    }

    /// Coalesce a batch of change events into the tasks of the next round.
    ///
    /// Swaps in a fresh snapshot first; when it cannot be built the previous
    /// one stays and no tasks are produced.
    pub async fn plan_changes(&mut self, events: Vec<ChangeEvent>) -> Vec<Task> {
        let mut changed: BTreeSet<NodeId> = BTreeSet::new();
        let mut reload = false;
        for event in events {
            match event {
                ChangeEvent::NodeChanged(id) => {
                    changed.insert(id);
                }
                ChangeEvent::Reload => reload = true,
            }
        }

        match self.rebuild(reload).await {
            Ok(graph) => self.plan(graph, changed, reload),
            Err(e) => {
                error!(error = %e, "failed to rebuild dependency graph; keeping previous snapshot");
                Vec::new()
            }
        }
    }

    /// Reload and snapshot on the blocking pool; both walk and hash files
    async fn rebuild(&self, reload: bool) -> gantry_core::Result<DependencyGraph> {
        let source = self.source.clone();
        tokio::task::spawn_blocking(move || {
            if reload {
                source.reload()?;
            }
            source.snapshot()
        })
        .await
        .map_err(|e| GantryError::other(format!("snapshot rebuild did not finish: {}", e)))?
    }

    /// Swap in `graph` and derive the forced tasks for `changed`
    fn plan(
        &mut self,
        graph: DependencyGraph,
        mut changed: BTreeSet<NodeId>,
        reload: bool,
    ) -> Vec<Task> {
        let factory = Arc::new(TaskFactory::new(Arc::new(graph)));
        if reload {
            changed.extend(factory.versions().changed_since(self.factory.versions()));
        }
        self.factory = factory;

        let graph = self.factory.graph();
        let scope: BTreeSet<&NodeId> = self.requested.iter().filter(|id| graph.contains(id)).collect();
        let mut closure: BTreeSet<&NodeId> = scope.clone();
        for id in &scope {
            closure.extend(
                graph
                    .get_dependencies(id, &DependencyQuery::recursive())
                    .into_iter()
                    .map(|node| &node.id),
            );
        }

        let dependents = DependencyQuery::recursive().with_kinds(self.kinds.iter().copied());
        let mut relevant: Vec<NodeId> = Vec::new();
        let mut forced: BTreeSet<NodeId> = BTreeSet::new();
        for id in &changed {
            if !closure.contains(id) {
                debug!(node = %id, "change outside the requested scope ignored");
                continue;
            }
            relevant.push(id.clone());
            forced.insert(id.clone());
            for node in graph.get_dependents(id, &dependents) {
                if scope.contains(&node.id) {
                    forced.insert(node.id.clone());
                }
            }
        }

        if forced.is_empty() {
            return Vec::new();
        }

        self.scheduler
            .reporter()
            .report(&TaskEvent::ChangeDetected { nodes: relevant });

        let roots: Vec<NodeId> = forced.into_iter().collect();
        match self.factory.tasks_for(&roots, true) {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "failed to derive tasks for changed nodes");
                Vec::new()
            }
        }
    }

    /// Run the first round, then a round per batch of changes, until the
    /// event channel closes and every round has finished. Rounds run
    /// concurrently on the shared scheduler; failures never stop the loop.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    ) -> Result<WatchSummary, WatchError> {
        let mut summary = WatchSummary::default();
        let mut rounds: JoinSet<ProcessResults> = JoinSet::new();

        let initial = self.initial_tasks()?;
        self.spawn_round(&mut rounds, initial);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        let mut batch = vec![event];
                        while let Ok(more) = events.try_recv() {
                            batch.push(more);
                        }
                        let tasks = self.plan_changes(batch).await;
                        if !tasks.is_empty() {
                            self.spawn_round(&mut rounds, tasks);
                        }
                    }
                    None => break,
                },
                Some(joined) = rounds.join_next(), if !rounds.is_empty() => {
                    self.finish_round(&mut summary, joined);
                }
            }
        }

        while let Some(joined) = rounds.join_next().await {
            self.finish_round(&mut summary, joined);
        }

        info!(rounds = summary.rounds, failed = summary.failed_rounds, "watch loop finished");
        Ok(summary)
    }

    fn spawn_round(&self, rounds: &mut JoinSet<ProcessResults>, tasks: Vec<Task>) {
        let scheduler = self.scheduler.clone();
        rounds.spawn(async move { scheduler.process(tasks).await });
    }

    fn finish_round(
        &self,
        summary: &mut WatchSummary,
        joined: Result<ProcessResults, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(results) => {
                summary.tally(&results);
                if !results.is_success() {
                    warn!(failed = results.failed(), skipped = results.skipped(), "round finished with failures; waiting for changes");
                }
            }
            Err(e) => {
                error!(error = %e, "round did not finish");
                summary.rounds += 1;
                summary.failed_rounds += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread::{self, ThreadId};

    use gantry_core::{EdgePurpose, GraphBuilder, Node};

    use crate::reporter::CollectingReporter;
    use crate::scheduler::{SchedulerOptions, TaskStatus};
    use crate::testing::RecordingExecutor;

    fn module(name: &str) -> NodeId {
        NodeId::new(NodeKind::Module, name)
    }

    /// a -> b -> c, and a -> d
    fn graph(c_hash: &str) -> DependencyGraph {
        GraphBuilder::new()
            .with_node(Node::new(NodeKind::Module, "a", "ha"))
            .with_node(Node::new(NodeKind::Module, "b", "hb"))
            .with_node(Node::new(NodeKind::Module, "c", c_hash))
            .with_node(Node::new(NodeKind::Module, "d", "hd"))
            .with_edge(module("a"), module("b"), EdgePurpose::Build)
            .with_edge(module("b"), module("c"), EdgePurpose::Build)
            .with_edge(module("a"), module("d"), EdgePurpose::Build)
            .build()
            .unwrap()
    }

    /// Snapshot source whose graph tests can swap or break
    struct TestSource {
        graph: Mutex<Option<DependencyGraph>>,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl TestSource {
        fn new(graph: DependencyGraph) -> Arc<Self> {
            Arc::new(Self {
                graph: Mutex::new(Some(graph)),
                threads: Mutex::new(Vec::new()),
            })
        }

        fn set(&self, graph: Option<DependencyGraph>) {
            *self.graph.lock().unwrap() = graph;
        }
    }

    impl SnapshotSource for TestSource {
        fn snapshot(&self) -> gantry_core::Result<DependencyGraph> {
            self.threads.lock().unwrap().push(thread::current().id());
            self.graph
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| GantryError::other("configuration is broken"))
        }
    }

    fn scheduler(executor: Arc<RecordingExecutor>) -> Arc<TaskScheduler> {
        Arc::new(TaskScheduler::new(
            SchedulerOptions::default(),
            executor,
            Arc::new(CollectingReporter::default()),
        ))
    }

    fn names(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.key.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_change_reruns_in_scope_dependents_only() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let scheduler = scheduler(executor.clone());
        let mut watch =
            WatchLoop::new(scheduler.clone(), source.clone(), vec![module("b"), module("c")], false).unwrap();

        let initial = scheduler.process(watch.initial_tasks().unwrap()).await;
        assert!(initial.is_success());
        assert_eq!(executor.calls(), vec!["c", "b"]);

        source.set(Some(graph("hc-2")));
        let tasks = watch.plan_changes(vec![ChangeEvent::NodeChanged(module("c"))]).await;
        assert_eq!(names(&tasks), vec!["c", "b"]);
        assert!(tasks.iter().all(|t| t.force));

        let round = scheduler.process(tasks).await;
        assert!(round.is_success());
        assert_eq!(executor.calls(), vec!["c", "b", "c", "b"]);
        assert!(round.by_name("a").is_none());
    }

    #[tokio::test]
    async fn test_change_reruns_whole_requested_chain() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let scheduler = scheduler(executor.clone());
        let requested = vec![module("a"), module("b"), module("c"), module("d")];
        let mut watch = WatchLoop::new(scheduler.clone(), source.clone(), requested, false).unwrap();

        scheduler.process(watch.initial_tasks().unwrap()).await;
        assert_eq!(executor.calls().len(), 4);

        source.set(Some(graph("hc-2")));
        let tasks = watch.plan_changes(vec![ChangeEvent::NodeChanged(module("c"))]).await;
        let round = scheduler.process(tasks).await;

        assert_eq!(&executor.calls()[4..], &["c", "b", "a"]);
        assert_eq!(round.by_name("d").unwrap().status, TaskStatus::CacheHit);
        assert_eq!(round.executed(), 3);
    }

    #[tokio::test]
    async fn test_unforced_dependency_with_new_version_runs() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let scheduler = scheduler(executor.clone());
        let mut watch = WatchLoop::new(scheduler.clone(), source.clone(), vec![module("a")], false).unwrap();

        scheduler.process(watch.initial_tasks().unwrap()).await;
        source.set(Some(graph("hc-2")));
        let tasks = watch.plan_changes(vec![ChangeEvent::NodeChanged(module("c"))]).await;

        let forced: Vec<&str> = tasks.iter().filter(|t| t.force).map(|t| t.key.name.as_str()).collect();
        assert_eq!(forced, vec!["c", "a"]);

        let round = scheduler.process(tasks).await;
        assert_eq!(round.by_name("b").unwrap().status, TaskStatus::Success);
        assert_eq!(round.by_name("d").unwrap().status, TaskStatus::CacheHit);
    }

    #[tokio::test]
    async fn test_change_outside_scope_is_ignored() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let mut watch = WatchLoop::new(scheduler(executor), source, vec![module("c")], false).unwrap();

        let tasks = watch.plan_changes(vec![ChangeEvent::NodeChanged(module("a"))]).await;
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_events_are_coalesced() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let requested = vec![module("a"), module("b"), module("c"), module("d")];
        let mut watch = WatchLoop::new(scheduler(executor), source, requested, false).unwrap();

        let tasks = watch
            .plan_changes(vec![
                ChangeEvent::NodeChanged(module("c")),
                ChangeEvent::NodeChanged(module("c")),
                ChangeEvent::NodeChanged(module("d")),
            ])
            .await;
        assert_eq!(names(&tasks), vec!["c", "d", "b", "a"]);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_snapshot() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let mut watch =
            WatchLoop::new(scheduler(executor), source.clone(), vec![module("a")], false).unwrap();
        let before = watch.graph().clone();

        source.set(None);
        assert!(watch.plan_changes(vec![ChangeEvent::NodeChanged(module("c"))]).await.is_empty());
        assert!(Arc::ptr_eq(&before, watch.graph()));

        source.set(Some(graph("hc-2")));
        assert!(!watch.plan_changes(vec![ChangeEvent::NodeChanged(module("c"))]).await.is_empty());
    }

    #[tokio::test]
    async fn test_rebuild_runs_off_the_runtime_thread() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let mut watch =
            WatchLoop::new(scheduler(executor), source.clone(), vec![module("a")], false).unwrap();

        source.set(Some(graph("hc-2")));
        let tasks = watch.plan_changes(vec![ChangeEvent::NodeChanged(module("c"))]).await;
        assert!(!tasks.is_empty());

        let threads = source.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0], thread::current().id());
        assert_ne!(threads[1], thread::current().id());
    }

    #[tokio::test]
    async fn test_reload_forces_nodes_with_new_versions() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let mut watch = WatchLoop::new(
            scheduler(executor),
            source.clone(),
            vec![module("b"), module("c")],
            false,
        )
        .unwrap();

        assert!(watch.plan_changes(vec![ChangeEvent::Reload]).await.is_empty());

        source.set(Some(graph("hc-2")));
        let tasks = watch.plan_changes(vec![ChangeEvent::Reload]).await;
        assert_eq!(names(&tasks), vec!["c", "b"]);
    }

    #[test]
    fn test_unknown_requested_node() {
        let executor = Arc::new(RecordingExecutor::default());
        let source = TestSource::new(graph("hc"));
        let result = WatchLoop::new(scheduler(executor), source, vec![module("ghost")], false);
        assert!(matches!(result, Err(WatchError::Factory(_))));
    }

    #[tokio::test]
    async fn test_run_until_channel_closes() {
        let executor = Arc::new(RecordingExecutor::default().failing("c"));
        let source = TestSource::new(graph("hc"));
        let watch = WatchLoop::new(
            scheduler(executor.clone()),
            source.clone(),
            vec![module("b"), module("c")],
            false,
        )
        .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        source.set(Some(graph("hc-2")));
        tx.send(ChangeEvent::NodeChanged(module("c"))).unwrap();
        drop(tx);

        let summary = watch.run(rx).await.unwrap();
        assert_eq!(
            summary,
            WatchSummary {
                rounds: 2,
                failed_rounds: 2
            }
        );
        assert!(!executor.calls().contains(&"b".to_string()));
    }
}
