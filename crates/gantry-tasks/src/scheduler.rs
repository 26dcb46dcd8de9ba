//! Task scheduler: re-entrant execution engine using tokio
//!
//! One [`TaskScheduler`] owns the result memo, the in-flight table and the
//! concurrency bound. Every call to [`TaskScheduler::process`] is a round:
//! it drives its tasks to completion, starting each one only after all of its
//! dependencies have a recorded result. Rounds may overlap; a key that is
//! already executing in another round is joined, never started twice.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{watch, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, instrument, warn};

use gantry_core::config::DEFAULT_CONCURRENCY;
use gantry_core::NodeId;

use crate::executor::{TaskExecutor, TaskOutput};
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{Task, TaskKey};
use crate::version::Version;

/// Result of a single task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    /// Task the result belongs to
    pub key: TaskKey,
    /// Outcome
    pub status: TaskStatus,
    /// Captured output
    pub output: TaskOutput,
    /// How long the action ran; zero when it never ran
    pub duration: Duration,
    /// When the result was produced or the action started
    pub started_at: DateTime<Utc>,
    /// A newer version of the same node was requested while this one ran
    pub superseded: bool,
    /// The result came from a run another round started
    pub joined: bool,
}

impl TaskResult {
    fn new(key: TaskKey, status: TaskStatus) -> Self {
        Self {
            key,
            status,
            output: TaskOutput::default(),
            duration: Duration::ZERO,
            started_at: Utc::now(),
            superseded: false,
            joined: false,
        }
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum TaskStatus {
    /// The action ran and succeeded
    Success,
    /// A previous successful result for the same key was reused
    CacheHit,
    /// The action ran and failed
    Failed(String),
    /// Not attempted because this dependency did not succeed
    DependencyFailed(TaskKey),
}

impl TaskStatus {
    /// Check if this status represents success
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::CacheHit)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::DependencyFailed(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::CacheHit => "cached",
            Self::Failed(_) => "failed",
            Self::DependencyFailed(_) => "skipped",
        }
    }
}

/// Options for the task scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrently executing actions, across all rounds
    pub concurrency: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// All results of one processing round
#[derive(Debug, Clone, Default)]
pub struct ProcessResults {
    results: HashMap<TaskKey, TaskResult>,
    order: Vec<TaskKey>,
    duration: Duration,
}

impl ProcessResults {
    pub fn get(&self, key: &TaskKey) -> Option<&TaskResult> {
        self.results.get(key)
    }

    /// Result for the task targeting `name`, whatever its kind and version
    pub fn by_name(&self, name: &str) -> Option<&TaskResult> {
        self.iter().find(|r| r.key.name == name)
    }

    /// Results in the order they were recorded
    pub fn iter(&self) -> impl Iterator<Item = &TaskResult> {
        self.order.iter().filter_map(|key| self.results.get(key))
    }

    /// Keys in the order their results were recorded
    pub fn order(&self) -> &[TaskKey] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn count(&self, f: impl Fn(&TaskStatus) -> bool) -> usize {
        self.results.values().filter(|r| f(&r.status)).count()
    }

    /// Results whose action this round ran itself
    pub fn executed(&self) -> usize {
        self.results
            .values()
            .filter(|r| !r.joined && matches!(r.status, TaskStatus::Success | TaskStatus::Failed(_)))
            .count()
    }

    /// Results taken over from a run another round started
    pub fn joined(&self) -> usize {
        self.results.values().filter(|r| r.joined).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(TaskStatus::is_success)
    }

    pub fn failed(&self) -> usize {
        self.count(TaskStatus::is_failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(TaskStatus::is_skipped)
    }

    pub fn cached(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::CacheHit))
    }

    /// Whether every task succeeded
    pub fn is_success(&self) -> bool {
        self.results.values().all(|r| r.status.is_success())
    }

    /// Machine-readable summary
    pub fn to_json(&self) -> serde_json::Value {
        let tasks: Vec<serde_json::Value> = self
            .iter()
            .map(|r| {
                let (error, blocked_by) = match &r.status {
                    TaskStatus::Failed(message) => (Some(message.clone()), None),
                    TaskStatus::DependencyFailed(dep) => (None, Some(dep.to_string())),
                    _ => (None, None),
                };
                json!({
                    "task": r.key.to_string(),
                    "status": r.status.as_str(),
                    "duration_ms": r.duration.as_millis() as u64,
                    "started_at": r.started_at.to_rfc3339(),
                    "superseded": r.superseded,
                    "joined": r.joined,
                    "error": error,
                    "blocked_by": blocked_by,
                })
            })
            .collect();

        json!({
            "success": self.is_success(),
            "total": self.len(),
            "executed": self.executed(),
            "succeeded": self.succeeded(),
            "failed": self.failed(),
            "skipped": self.skipped(),
            "cached": self.cached(),
            "joined": self.joined(),
            "duration_ms": self.duration.as_millis() as u64,
            "tasks": tasks,
        })
    }
}

type ResultSlot = watch::Receiver<Option<TaskResult>>;

/// Engine-wide bookkeeping, shared by all rounds
#[derive(Debug, Default)]
struct EngineState {
    /// Successful results by key
    memo: HashMap<TaskKey, TaskResult>,
    /// Runs in progress; later requests for the key wait on the slot
    in_flight: HashMap<TaskKey, ResultSlot>,
    /// Keys pending or running in some round, with the number of rounds
    active: HashMap<TaskKey, usize>,
    /// Newest version requested for each node
    latest: HashMap<NodeId, Version>,
}

/// How a ready task gets its result
enum Start {
    Cached(TaskResult),
    Join(ResultSlot),
    Run(watch::Sender<Option<TaskResult>>),
}

/// Where a task stands with respect to its dependencies
enum Readiness {
    Ready,
    Waiting,
    Blocked(TaskKey),
    Missing(TaskKey),
}

/// Task scheduler: executes task rounds with bounded parallelism
pub struct TaskScheduler {
    executor: Arc<dyn TaskExecutor>,
    reporter: Arc<dyn TaskReporter>,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<EngineState>>,
    rounds: AtomicUsize,
}

impl TaskScheduler {
    /// Create a new scheduler
    pub fn new(
        options: SchedulerOptions,
        executor: Arc<dyn TaskExecutor>,
        reporter: Arc<dyn TaskReporter>,
    ) -> Self {
        Self {
            executor,
            reporter,
            semaphore: Arc::new(Semaphore::new(options.concurrency.max(1))),
            state: Arc::new(Mutex::new(EngineState::default())),
            rounds: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        lock_state(&self.state)
    }

    pub fn reporter(&self) -> &Arc<dyn TaskReporter> {
        &self.reporter
    }

    /// Forget every memoized result
    pub fn reset(&self) {
        self.lock().memo.clear();
        debug!("result memo cleared");
    }

    /// Whether `key` is pending or running in any round
    pub fn is_active(&self, key: &TaskKey) -> bool {
        self.lock().active.contains_key(key)
    }

    /// Memoized successful result for `key`
    pub fn cached_result(&self, key: &TaskKey) -> Option<TaskResult> {
        self.lock().memo.get(key).cloned()
    }

    /// Run one round: every task gets exactly one recorded result.
    ///
    /// Tasks sharing a key are merged (force wins). A task whose dependency
    /// failed or was skipped is recorded as `DependencyFailed` without running.
    /// Action failures and panics are recorded, never propagated.
    #[instrument(skip_all, fields(round = tracing::field::Empty, tasks = tasks.len()))]
    pub async fn process(&self, tasks: Vec<Task>) -> ProcessResults {
        let start = Instant::now();
        let round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("round", round);

        let mut pending: BTreeMap<TaskKey, Task> = BTreeMap::new();
        for task in tasks {
            match pending.get_mut(&task.key) {
                Some(existing) => existing.force |= task.force,
                None => {
                    pending.insert(task.key.clone(), task);
                }
            }
        }

        self.reporter.report(&TaskEvent::RoundStarted {
            round,
            task_count: pending.len(),
        });

        let mut active = ActiveKeys::register(&self.state, pending.keys());
        let mut results = ProcessResults::default();
        let mut running = Runs::default();

        loop {
            self.start_ready(&mut pending, &mut results, &mut running, &mut active);

            match running.next().await {
                Some(Ok(result)) => record(&mut results, &mut active, result),
                Some(Err((key, e))) => {
                    warn!(task = %key, error = %e, "task runner did not finish");
                    let status = TaskStatus::Failed(format!("task runner did not finish: {}", e));
                    let result = TaskResult::new(key, status);
                    self.report_result(&result);
                    record(&mut results, &mut active, result);
                }
                None => break,
            }
        }

        // Tasks stuck behind each other
        if !pending.is_empty() {
            let stuck: Vec<String> = pending.keys().map(ToString::to_string).collect();
            let message = format!("dependency cycle among {}", stuck.join(", "));
            for key in pending.into_keys() {
                let result = TaskResult::new(key, TaskStatus::Failed(message.clone()));
                self.report_result(&result);
                record(&mut results, &mut active, result);
            }
        }

        results.duration = start.elapsed();
        self.reporter.report(&TaskEvent::AllCompleted {
            round,
            total: results.len(),
            succeeded: results.succeeded(),
            failed: results.failed(),
            skipped: results.skipped(),
            cached: results.cached(),
            duration: results.duration,
        });

        results
    }

    /// Start or resolve every pending task whose dependencies are settled,
    /// repeating until nothing more can move without awaiting a runner
    fn start_ready(
        &self,
        pending: &mut BTreeMap<TaskKey, Task>,
        results: &mut ProcessResults,
        running: &mut Runs,
        active: &mut ActiveKeys<'_>,
    ) {
        loop {
            let mut progressed = false;
            let keys: Vec<TaskKey> = pending.keys().cloned().collect();

            for key in keys {
                let readiness = match pending.get(&key) {
                    Some(task) => self.readiness(task, pending, results, running),
                    None => continue,
                };

                let status = match readiness {
                    Readiness::Waiting => continue,
                    Readiness::Blocked(dep) => TaskStatus::DependencyFailed(dep),
                    Readiness::Missing(dep) => {
                        TaskStatus::Failed(format!("dependency {} was not scheduled", dep))
                    }
                    Readiness::Ready => {
                        if let Some(task) = pending.remove(&key) {
                            if let Some(result) = self.start(task, running) {
                                record(results, active, result);
                            }
                        }
                        progressed = true;
                        continue;
                    }
                };

                pending.remove(&key);
                let result = TaskResult::new(key, status);
                self.report_result(&result);
                record(results, active, result);
                progressed = true;
            }

            if !progressed {
                return;
            }
        }
    }

    fn readiness(
        &self,
        task: &Task,
        pending: &BTreeMap<TaskKey, Task>,
        results: &ProcessResults,
        running: &Runs,
    ) -> Readiness {
        let mut waiting = false;
        for dep in &task.dependencies {
            if let Some(result) = results.get(dep) {
                if !result.status.is_success() {
                    return Readiness::Blocked(dep.clone());
                }
            } else if pending.contains_key(dep) || running.contains(dep) {
                waiting = true;
            } else if !self.lock().memo.contains_key(dep) {
                return Readiness::Missing(dep.clone());
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    /// Resolve a ready task from the memo, or hand it to a runner. Returns the
    /// result when it is known without waiting.
    fn start(&self, task: Task, running: &mut Runs) -> Option<TaskResult> {
        let claim = {
            let mut state = self.lock();
            let cached = if task.force {
                None
            } else {
                state.memo.get(&task.key).cloned()
            };

            match cached {
                Some(previous) => Start::Cached(previous),
                None => match state.in_flight.get(&task.key) {
                    Some(slot) if !is_abandoned(slot) => Start::Join(slot.clone()),
                    _ => {
                        let (tx, rx) = watch::channel(None);
                        state.in_flight.insert(task.key.clone(), rx);
                        Start::Run(tx)
                    }
                },
            }
        };

        match claim {
            Start::Cached(previous) => {
                let result = TaskResult {
                    status: TaskStatus::CacheHit,
                    duration: Duration::ZERO,
                    started_at: Utc::now(),
                    superseded: false,
                    joined: false,
                    ..previous
                };
                self.report_result(&result);
                Some(result)
            }
            Start::Join(mut slot) => {
                debug!(task = %task.key, "joining in-flight run");
                let key = task.key;
                running.spawn(key.clone(), async move {
                    let result = match slot.wait_for(Option::is_some).await {
                        Ok(result) => (*result).clone(),
                        Err(_) => None,
                    };
                    // The time was spent by the round that started the run
                    TaskResult {
                        duration: Duration::ZERO,
                        joined: true,
                        ..result.unwrap_or_else(|| abandoned(key))
                    }
                });
                None
            }
            Start::Run(tx) => {
                let runner = Runner {
                    executor: self.executor.clone(),
                    reporter: self.reporter.clone(),
                    semaphore: self.semaphore.clone(),
                    state: self.state.clone(),
                };
                running.spawn(task.key.clone(), runner.run(task, tx));
                None
            }
        }
    }

    fn report_result(&self, result: &TaskResult) {
        report_result(&*self.reporter, result);
    }
}

/// Runners and joins spawned by one round, by the key they resolve
#[derive(Default)]
struct Runs {
    set: JoinSet<TaskResult>,
    ids: HashMap<Id, TaskKey>,
    keys: HashSet<TaskKey>,
}

impl Runs {
    fn spawn<F>(&mut self, key: TaskKey, future: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let handle = self.set.spawn(future);
        self.ids.insert(handle.id(), key.clone());
        self.keys.insert(key);
    }

    fn contains(&self, key: &TaskKey) -> bool {
        self.keys.contains(key)
    }

    /// Next settled key; `None` once nothing is running
    async fn next(&mut self) -> Option<Result<TaskResult, (TaskKey, JoinError)>> {
        loop {
            let joined = self.set.join_next_with_id().await?;
            let id = match &joined {
                Ok((id, _)) => *id,
                Err(e) => e.id(),
            };
            let Some(key) = self.ids.remove(&id) else {
                continue;
            };
            self.keys.remove(&key);
            return Some(match joined {
                Ok((_, result)) => Ok(result),
                Err(e) => Err((key, e)),
            });
        }
    }
}

/// Everything a spawned run needs from the engine
struct Runner {
    executor: Arc<dyn TaskExecutor>,
    reporter: Arc<dyn TaskReporter>,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<EngineState>>,
}

impl Runner {
    async fn run(self, task: Task, slot: watch::Sender<Option<TaskResult>>) -> TaskResult {
        let key = task.key.clone();

        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                let status = TaskStatus::Failed("scheduler is shut down".to_string());
                let result = TaskResult::new(key, status);
                return self.finish(result, slot);
            }
        };

        let started_at = Utc::now();
        let start = Instant::now();
        self.reporter.report(&TaskEvent::Started {
            key: key.clone(),
            command: task.action.describe(),
        });

        // A separate task so a panicking action becomes a failed result
        let executor = self.executor.clone();
        let outcome = tokio::spawn(async move { executor.execute(&task).await }).await;
        drop(permit);

        let (status, output) = match outcome {
            Ok(Ok(output)) => (TaskStatus::Success, output),
            Ok(Err(e)) => {
                let output = e.output().cloned().unwrap_or_default();
                (TaskStatus::Failed(e.to_string()), output)
            }
            Err(e) if e.is_panic() => (
                TaskStatus::Failed("task panicked".to_string()),
                TaskOutput::default(),
            ),
            Err(e) => (TaskStatus::Failed(e.to_string()), TaskOutput::default()),
        };

        let result = TaskResult {
            key,
            status,
            output,
            duration: start.elapsed(),
            started_at,
            superseded: false,
            joined: false,
        };
        self.finish(result, slot)
    }

    /// Publish the result: drop the in-flight entry, memoize current
    /// successes, wake joiners
    fn finish(&self, mut result: TaskResult, slot: watch::Sender<Option<TaskResult>>) -> TaskResult {
        {
            let mut state = lock_state(&self.state);
            state.in_flight.remove(&result.key);
            result.superseded = state
                .latest
                .get(&result.key.node_id())
                .is_some_and(|newest| newest != &result.key.version);
            if result.status == TaskStatus::Success && !result.superseded {
                state.memo.insert(result.key.clone(), result.clone());
            }
        }

        if result.superseded {
            debug!(task = %result.key, "result superseded by a newer version");
        }
        report_result(&*self.reporter, &result);
        slot.send_replace(Some(result.clone()));
        result
    }
}

/// Keys this round has registered as active, released as results land
struct ActiveKeys<'a> {
    state: &'a Mutex<EngineState>,
    keys: HashSet<TaskKey>,
}

impl<'a> ActiveKeys<'a> {
    fn register<'k>(state: &'a Mutex<EngineState>, keys: impl Iterator<Item = &'k TaskKey>) -> Self {
        let keys: HashSet<TaskKey> = keys.cloned().collect();
        let mut guard = lock_state(state);
        for key in &keys {
            *guard.active.entry(key.clone()).or_default() += 1;
            guard.latest.insert(key.node_id(), key.version.clone());
        }
        drop(guard);
        Self { state, keys }
    }

    fn release(&mut self, key: &TaskKey) {
        if self.keys.remove(key) {
            release_key(&mut lock_state(self.state), key);
        }
    }
}

impl Drop for ActiveKeys<'_> {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let mut state = lock_state(self.state);
        for key in self.keys.drain() {
            release_key(&mut state, &key);
        }
    }
}

fn release_key(state: &mut EngineState, key: &TaskKey) {
    if let Some(count) = state.active.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            state.active.remove(key);
        }
    }
}

fn lock_state(state: &Mutex<EngineState>) -> MutexGuard<'_, EngineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record(results: &mut ProcessResults, active: &mut ActiveKeys<'_>, result: TaskResult) {
    active.release(&result.key);
    if results.results.contains_key(&result.key) {
        return;
    }
    results.order.push(result.key.clone());
    results.results.insert(result.key.clone(), result);
}

/// A slot whose runner went away without publishing a result
fn is_abandoned(slot: &ResultSlot) -> bool {
    slot.has_changed().is_err() && slot.borrow().is_none()
}

fn abandoned(key: TaskKey) -> TaskResult {
    TaskResult::new(key, TaskStatus::Failed("in-flight run was abandoned".to_string()))
}

fn report_result(reporter: &dyn TaskReporter, result: &TaskResult) {
    let key = result.key.clone();
    match &result.status {
        TaskStatus::Success => reporter.report(&TaskEvent::Completed {
            key,
            duration: result.duration,
            cached: false,
        }),
        TaskStatus::CacheHit => reporter.report(&TaskEvent::Completed {
            key,
            duration: Duration::ZERO,
            cached: true,
        }),
        TaskStatus::Failed(error) => reporter.report(&TaskEvent::Failed {
            key,
            duration: result.duration,
            error: error.clone(),
        }),
        TaskStatus::DependencyFailed(dep) => reporter.report(&TaskEvent::Skipped {
            key,
            reason: format!("dependency {} did not succeed", dep),
        }),
    }
}
