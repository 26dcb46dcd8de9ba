//! Gantry Tasks - Task graph execution engine
//!
//! This crate turns dependency graph snapshots into versioned tasks, runs them
//! with bounded parallelism and per-key deduplication, and re-enters the same
//! engine incrementally when watched sources change.

pub mod executor;
pub mod factory;
pub mod plan;
pub mod reporter;
pub mod scheduler;
pub mod task;
pub mod version;
pub mod watch;

#[cfg(test)]
mod testing;

pub use executor::{ShellExecutor, TaskExecutionError, TaskExecutor, TaskOutput};
pub use factory::{FactoryError, TaskFactory};
pub use plan::{PlanError, TaskPlan};
pub use reporter::{TaskEvent, TaskReporter, TaskReporterRegistry, TracingReporter};
pub use scheduler::{ProcessResults, SchedulerOptions, TaskResult, TaskScheduler, TaskStatus};
pub use task::{Task, TaskAction, TaskKey, TaskKind};
pub use version::{Version, VersionMap};
pub use watch::{ChangeEvent, SnapshotSource, WatchError, WatchLoop, WatchSummary};
