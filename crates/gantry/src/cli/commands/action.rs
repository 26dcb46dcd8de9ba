//! Build, deploy, test and run commands: derive tasks for the named targets
//! and drive them through the scheduler

use std::sync::Arc;

use clap::Args;
use console::style;
use tracing::info;

use gantry_core::Project;
use gantry_tasks::{
    ProcessResults, SchedulerOptions, ShellExecutor, Task, TaskEvent, TaskFactory, TaskKey,
    TaskKind, TaskPlan, TaskReporter, TaskReporterRegistry, TaskScheduler, TaskStatus,
};

use super::watcher;
use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes::Exit;

/// Act on targets of one kind and everything they depend on
#[derive(Debug, Args)]
pub struct ActionCommand {
    /// Targets to act on (default: every target of this kind)
    pub names: Vec<String>,

    /// Re-run the named targets even when a result for their version exists
    #[arg(long)]
    pub force: bool,

    /// Keep running and re-run affected tasks when sources change
    #[arg(short, long)]
    pub watch: bool,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Show execution plan without running
    #[arg(long, conflicts_with = "watch")]
    pub dry_run: bool,
}

impl ActionCommand {
    pub fn execute(&self, cli: &Cli, kind: TaskKind) -> anyhow::Result<()> {
        info!(
            kind = %kind,
            names = ?self.names,
            force = self.force,
            watch = self.watch,
            dry_run = self.dry_run,
            "executing action command"
        );
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli, kind))
    }

    async fn execute_async(&self, cli: &Cli, kind: TaskKind) -> anyhow::Result<()> {
        let cwd = std::env::current_dir()?;
        let project = Project::load(&cwd)?;

        let concurrency = self
            .concurrency
            .unwrap_or(project.config().scheduler.concurrency);
        if concurrency == 0 {
            anyhow::bail!("--concurrency must be at least 1");
        }

        let factory = TaskFactory::new(Arc::new(project.graph()?));
        let requested = factory.resolve(kind, &self.names)?;
        if requested.is_empty() {
            if cli.shows_text() {
                output::warning(&format!("No {} targets defined", kind.node_kind()));
            }
            return Ok(());
        }

        if self.dry_run {
            let tasks = factory.tasks_for(&requested, self.force)?;
            return print_plan(cli, &tasks);
        }

        let reporter = reporter(cli);
        let executor = Arc::new(ShellExecutor::new(reporter.clone()));
        let scheduler = Arc::new(TaskScheduler::new(
            SchedulerOptions { concurrency },
            executor,
            reporter,
        ));

        if self.watch {
            return watcher::watch(cli, project, scheduler, requested, self.force).await;
        }

        let tasks = factory.tasks_for(&requested, self.force)?;
        if cli.shows_text() {
            println!();
            output::info(&format!(
                "{} {} ({} including dependencies)",
                style(kind).bold(),
                output::plural(requested.len(), "target"),
                output::plural(tasks.len(), "task"),
            ));
            println!();
        }

        let results = tokio::select! {
            results = scheduler.process(tasks) => results,
            _ = tokio::signal::ctrl_c() => return Err(Exit::Interrupted.into()),
        };
        report_results(cli, &results)
    }
}

/// Reporter fan-out: tracing always, the console in text mode
fn reporter(cli: &Cli) -> Arc<dyn TaskReporter> {
    let mut registry = TaskReporterRegistry::new();
    if cli.shows_text() {
        registry.register(ConsoleReporter::new(cli.verbose));
    }
    Arc::new(registry)
}

fn print_plan(cli: &Cli, tasks: &[Task]) -> anyhow::Result<()> {
    let plan = TaskPlan::new(tasks)?;

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&plan.to_json())?);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!();
                println!(
                    "{} {} in {}",
                    style("→").blue(),
                    output::plural(plan.len(), "task"),
                    output::plural(plan.waves().len(), "wave"),
                );
                println!();
                println!("{}", plan.execution_plan());
                println!("{}", style("[DRY RUN - no tasks will be executed]").yellow().bold());
            }
        }
    }
    Ok(())
}

/// Print the outcome of a round; errors when any task did not succeed
pub(super) fn report_results(cli: &Cli, results: &ProcessResults) -> anyhow::Result<()> {
    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&results.to_json())?);
    }

    if results.is_success() {
        return Ok(());
    }

    let unsuccessful = results.failed() + results.skipped();
    if cli.shows_text() {
        println!();
        println!(
            "  {} {}/{} tasks did not succeed:",
            style("✗").red().bold(),
            unsuccessful,
            results.len()
        );
        for r in results.iter() {
            match &r.status {
                TaskStatus::Failed(err) => {
                    println!("    {} {}: {}", style("✗").red(), r.key, err);
                }
                TaskStatus::DependencyFailed(dep) => {
                    println!(
                        "    {} {}: blocked by {}",
                        style("○").yellow(),
                        r.key,
                        dep
                    );
                }
                _ => {}
            }
        }
    }
    Err(Exit::TaskFailed(unsuccessful).into())
}

/// `kind.name`, with the version appended when verbose
fn label(key: &TaskKey, verbose: bool) -> String {
    if verbose {
        key.to_string()
    } else {
        format!("{}.{}", key.kind, key.name)
    }
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { key, command } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(label(key, self.verbose)).bold(),
                    if self.verbose {
                        style(format!("({})", command)).dim().to_string()
                    } else {
                        String::new()
                    }
                );
            }
            TaskEvent::Output {
                key,
                line,
                is_stderr,
            } => {
                if self.verbose {
                    let prefix = format!("[{}]", label(key, false));
                    if *is_stderr {
                        println!("    {} {}", style(prefix).red().dim(), line);
                    } else {
                        println!("    {} {}", style(prefix).dim(), line);
                    }
                }
            }
            TaskEvent::Completed {
                key,
                duration,
                cached,
            } => {
                if *cached {
                    if self.verbose {
                        println!(
                            "  {} {} {}",
                            style("✓").green(),
                            style(label(key, true)).green(),
                            style("(cached)").cyan(),
                        );
                    }
                } else {
                    println!(
                        "  {} {} {}",
                        style("✓").green(),
                        style(label(key, self.verbose)).green(),
                        output::duration(duration)
                    );
                }
            }
            TaskEvent::Failed {
                key,
                duration,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(label(key, self.verbose)).red(),
                    output::duration(duration),
                    style(error).red().dim()
                );
            }
            TaskEvent::Skipped { key, reason } => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(label(key, self.verbose)).yellow(),
                    style(format!("({})", reason)).dim()
                );
            }
            TaskEvent::RoundStarted { round, task_count } => {
                if self.verbose {
                    println!(
                        "  {} Round {} ({})",
                        style("─").dim(),
                        round,
                        output::plural(*task_count, "task")
                    );
                }
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                cached,
                duration,
                ..
            } => {
                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} skipped, {} cached ({:.1}s)",
                    if *failed == 0 && *skipped == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    skipped,
                    cached,
                    duration.as_secs_f64()
                );
            }
            TaskEvent::ChangeDetected { nodes } => {
                let names: Vec<String> = nodes
                    .iter()
                    .map(|id| output::id_style().apply_to(id).to_string())
                    .collect();
                println!();
                println!("{} Changed: {}", style("↻").blue().bold(), names.join(", "));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::exit_codes::{for_error, TASK_FAILED};

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(["gantry"].iter().chain(args))
    }

    #[test]
    fn test_label() {
        let key = TaskKey::new(TaskKind::Deploy, "api", "v-0123456789");
        assert_eq!(label(&key, false), "deploy.api");
        assert_eq!(label(&key, true), "deploy.api@v-0123456789");
    }

    #[test]
    fn test_dry_run_conflicts_with_watch() {
        assert!(Cli::try_parse_from(["gantry", "build", "--dry-run", "--watch"]).is_err());
    }

    #[test]
    fn test_print_plan_json() {
        let cli = cli(&["--format", "json", "build"]);
        let task = Task::new(TaskKey::new(TaskKind::Build, "api", "v-1")).with_command("make");
        assert!(print_plan(&cli, &[task]).is_ok());
    }

    #[tokio::test]
    async fn test_failed_round_maps_to_task_exit_code() {
        let cli = cli(&["--format", "json", "build"]);
        let reporter: Arc<dyn TaskReporter> = Arc::new(TaskReporterRegistry::empty());
        let scheduler = TaskScheduler::new(
            SchedulerOptions::default(),
            Arc::new(ShellExecutor::new(reporter.clone())),
            reporter,
        );

        let ok = Task::new(TaskKey::new(TaskKind::Build, "lib", "v-1")).with_command("true");
        let broken = Task::new(TaskKey::new(TaskKind::Build, "app", "v-1"))
            .with_command("exit 3")
            .with_dependency(ok.key.clone());
        let results = scheduler.process(vec![ok, broken]).await;

        let err = report_results(&cli, &results).unwrap_err();
        assert!(matches!(err.downcast_ref::<Exit>(), Some(Exit::TaskFailed(1))));
        assert_eq!(for_error(&err), TASK_FAILED);
    }

    #[tokio::test]
    async fn test_successful_round_reports_ok() {
        let cli = cli(&["-q", "build"]);
        let reporter: Arc<dyn TaskReporter> = Arc::new(TaskReporterRegistry::empty());
        let scheduler = TaskScheduler::new(
            SchedulerOptions::default(),
            Arc::new(ShellExecutor::new(reporter.clone())),
            reporter,
        );

        let results = scheduler
            .process(vec![Task::new(TaskKey::new(TaskKind::Build, "lib", "v-1"))])
            .await;
        assert!(report_results(&cli, &results).is_ok());
    }
}
