//! Task execution reporting

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gantry_core::NodeId;

use crate::task::TaskKey;

/// Events emitted during task execution
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// A task is starting execution
    Started { key: TaskKey, command: String },
    /// A task produced output
    Output {
        key: TaskKey,
        line: String,
        is_stderr: bool,
    },
    /// A task completed successfully, or was served from the result memo
    Completed {
        key: TaskKey,
        duration: Duration,
        cached: bool,
    },
    /// A task failed
    Failed {
        key: TaskKey,
        duration: Duration,
        error: String,
    },
    /// A task was not attempted because a dependency failed
    Skipped { key: TaskKey, reason: String },
    /// A processing round is starting
    RoundStarted { round: usize, task_count: usize },
    /// A processing round finished
    AllCompleted {
        round: usize,
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
        cached: usize,
        duration: Duration,
    },
    /// Watched nodes changed and a new round is being planned
    ChangeDetected { nodes: Vec<NodeId> },
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { key, command } => {
                tracing::info!(task = %key, "Starting {}: {}", key, command);
            }
            TaskEvent::Output {
                key,
                line,
                is_stderr,
            } => {
                if *is_stderr {
                    tracing::debug!(task = %key, stream = "stderr", "{}", line);
                } else {
                    tracing::debug!(task = %key, stream = "stdout", "{}", line);
                }
            }
            TaskEvent::Completed {
                key,
                duration,
                cached,
            } => {
                if *cached {
                    tracing::info!(task = %key, "{} reused cached result", key);
                } else {
                    tracing::info!(task = %key, "{} completed in {:.1}s", key, duration.as_secs_f64());
                }
            }
            TaskEvent::Failed {
                key,
                duration,
                error,
            } => {
                tracing::error!(
                    task = %key,
                    "{} failed after {:.1}s: {}",
                    key,
                    duration.as_secs_f64(),
                    error
                );
            }
            TaskEvent::Skipped { key, reason } => {
                tracing::warn!(task = %key, "{} skipped: {}", key, reason);
            }
            TaskEvent::RoundStarted { round, task_count } => {
                tracing::info!(round, "Starting round {} ({} tasks)", round, task_count);
            }
            TaskEvent::AllCompleted {
                round,
                total,
                succeeded,
                failed,
                skipped,
                cached,
                duration,
            } => {
                tracing::info!(
                    round,
                    "Round {} complete: {}/{} succeeded, {} failed, {} skipped, {} cached ({:.1}s)",
                    round,
                    succeeded,
                    total,
                    failed,
                    skipped,
                    cached,
                    duration.as_secs_f64()
                );
            }
            TaskEvent::ChangeDetected { nodes } => {
                let names: Vec<String> = nodes.iter().map(ToString::to_string).collect();
                tracing::info!("Change detected: {}", names.join(", "));
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Reporter that fans events out to every registered reporter
pub struct TaskReporterRegistry {
    reporters: Vec<Arc<dyn TaskReporter>>,
}

impl TaskReporterRegistry {
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: TaskReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    /// Register a reporter that is also held elsewhere
    pub fn register_shared(&mut self, reporter: Arc<dyn TaskReporter>) {
        self.reporters.push(reporter);
    }

    pub fn all(&self) -> &[Arc<dyn TaskReporter>] {
        &self.reporters
    }
}

impl Default for TaskReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskReporter for TaskReporterRegistry {
    fn report(&self, event: &TaskEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}
