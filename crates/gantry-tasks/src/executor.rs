//! Action dispatch: the hook the engine calls for every task it runs

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{Task, TaskKey};

/// Captured output of an action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub stdout: String,
    pub stderr: String,
}

impl TaskOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Failure of a wrapped action
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskExecutionError {
    /// The command could not be started
    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    /// The command exited unsuccessfully
    #[error("Command exited with code {code}: {}", .output.stderr)]
    ExitStatus { code: i32, output: TaskOutput },

    /// The action ran past its timeout
    #[error("Timed out after {after:?}")]
    Timeout { after: Duration, output: TaskOutput },

    /// Any other action failure
    #[error("{0}")]
    Action(String),
}

impl TaskExecutionError {
    /// Output the action produced before it failed
    pub fn output(&self) -> Option<&TaskOutput> {
        match self {
            Self::ExitStatus { output, .. } | Self::Timeout { output, .. } => Some(output),
            Self::Spawn { .. } | Self::Action(_) => None,
        }
    }
}

/// Performs the domain work of a task
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> Result<TaskOutput, TaskExecutionError>;
}

/// Runs each task's command through `sh -c`
pub struct ShellExecutor {
    reporter: Arc<dyn TaskReporter>,
}

impl ShellExecutor {
    pub fn new(reporter: Arc<dyn TaskReporter>) -> Self {
        Self { reporter }
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    async fn execute(&self, task: &Task) -> Result<TaskOutput, TaskExecutionError> {
        let Some(command) = task.action.command() else {
            debug!(task = %task.key, "nothing to build");
            return Ok(TaskOutput::new("nothing to build", ""));
        };

        run_shell_command(task, command, &*self.reporter).await
    }
}

/// Run a shell command and capture output
async fn run_shell_command(
    task: &Task,
    cmd: &str,
    reporter: &dyn TaskReporter,
) -> Result<TaskOutput, TaskExecutionError> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .envs(&task.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !task.working_dir.as_os_str().is_empty() {
        command.current_dir(&task.working_dir);
    }

    let mut child = command.spawn().map_err(|e| TaskExecutionError::Spawn {
        command: cmd.to_string(),
        message: e.to_string(),
    })?;

    let mut stdout_lines = Vec::new();
    let mut stderr_lines = Vec::new();
    let finished = {
        let collect = async {
            tokio::join!(
                read_lines(child.stdout.take(), &task.key, false, reporter, &mut stdout_lines),
                read_lines(child.stderr.take(), &task.key, true, reporter, &mut stderr_lines),
            );
            child.wait().await
        };
        match task.timeout {
            Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        }
    };

    // Lines read before a timeout are kept; the child is killed on drop
    let output = TaskOutput::new(stdout_lines.join("\n"), stderr_lines.join("\n"));
    let status = match finished {
        Some(status) => {
            status.map_err(|e| TaskExecutionError::Action(format!("Failed to wait: {}", e)))?
        }
        None => {
            return Err(TaskExecutionError::Timeout {
                after: task.timeout.unwrap_or_default(),
                output,
            })
        }
    };

    if status.success() {
        Ok(output)
    } else {
        Err(TaskExecutionError::ExitStatus {
            code: status.code().unwrap_or(-1),
            output,
        })
    }
}

async fn read_lines<R: AsyncRead + Unpin>(
    stream: Option<R>,
    key: &TaskKey,
    is_stderr: bool,
    reporter: &dyn TaskReporter,
    collected: &mut Vec<String>,
) {
    let Some(stream) = stream else {
        return;
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        reporter.report(&TaskEvent::Output {
            key: key.clone(),
            line: line.clone(),
            is_stderr,
        });
        collected.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use crate::task::{TaskKey, TaskKind};
    use tempfile::TempDir;

    fn shell_task(kind: TaskKind, command: &str) -> Task {
        Task::new(TaskKey::new(kind, "sample", "v-1")).with_command(command)
    }

    #[tokio::test]
    async fn test_captures_output() {
        let reporter = Arc::new(CollectingReporter::default());
        let executor = ShellExecutor::new(reporter.clone());

        let output = executor
            .execute(&shell_task(TaskKind::Run, "echo hello; echo oops >&2"))
            .await
            .unwrap();

        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr, "oops");
        let streamed = reporter
            .events()
            .iter()
            .filter(|e| matches!(e, TaskEvent::Output { .. }))
            .count();
        assert_eq!(streamed, 2);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let executor = ShellExecutor::new(Arc::new(CollectingReporter::default()));
        let err = executor
            .execute(&shell_task(TaskKind::Test, "echo partial; echo broken >&2; exit 3"))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Command exited with code 3: broken");
        match err {
            TaskExecutionError::ExitStatus { code, output } => {
                assert_eq!(code, 3);
                assert_eq!(output.stdout, "partial");
                assert_eq!(output.stderr, "broken");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_build_without_command_succeeds() {
        let executor = ShellExecutor::new(Arc::new(CollectingReporter::default()));
        let task = Task::new(TaskKey::new(TaskKind::Build, "docs", "v-1"));

        let output = executor.execute(&task).await.unwrap();
        assert_eq!(output.stdout, "nothing to build");
    }

    #[tokio::test]
    async fn test_working_dir_and_env() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "present").unwrap();

        let mut task = shell_task(TaskKind::Deploy, "cat marker.txt; echo \" $TARGET\"");
        task.working_dir = temp.path().to_path_buf();
        task.env.insert("TARGET".to_string(), "staging".to_string());

        let executor = ShellExecutor::new(Arc::new(CollectingReporter::default()));
        let output = executor.execute(&task).await.unwrap();
        assert_eq!(output.stdout, "present staging");
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut task = shell_task(TaskKind::Run, "echo started; sleep 5");
        task.timeout = Some(Duration::from_millis(500));

        let executor = ShellExecutor::new(Arc::new(CollectingReporter::default()));
        let err = executor.execute(&task).await.unwrap_err();
        match err {
            TaskExecutionError::Timeout { after, output } => {
                assert_eq!(after, Duration::from_millis(500));
                assert_eq!(output.stdout, "started");
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
