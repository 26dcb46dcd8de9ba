//! Shared fixtures for engine tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::executor::{TaskExecutionError, TaskExecutor, TaskOutput};
use crate::task::{Task, TaskKey, TaskKind};

pub fn key(name: &str) -> TaskKey {
    TaskKey::new(TaskKind::Build, name, "v-1")
}

/// Build task `name` at version `v-1` depending on the named build tasks
pub fn build_task(name: &str, deps: &[&str]) -> Task {
    deps.iter()
        .fold(Task::new(key(name)), |task, dep| task.with_dependency(key(dep)))
}

/// Records every invocation; can be told to fail or panic for given names
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<String>>,
    failing: HashSet<String>,
    panicking: HashSet<String>,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl RecordingExecutor {
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn panicking(mut self, name: &str) -> Self {
        self.panicking.insert(name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Names of executed tasks, in start order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for RecordingExecutor {
    async fn execute(&self, task: &Task) -> Result<TaskOutput, TaskExecutionError> {
        let name = task.key.name.clone();
        self.calls.lock().unwrap().push(name.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(&name) {
            panic!("action for {} exploded", name);
        }
        if self.failing.contains(&name) {
            return Err(TaskExecutionError::Action(format!("{} failed", name)));
        }
        Ok(TaskOutput::new(format!("ran {}", name), ""))
    }
}
