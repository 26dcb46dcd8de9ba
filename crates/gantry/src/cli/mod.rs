//! CLI definition and command handling

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

use gantry_tasks::TaskKind;

use commands::{ActionCommand, CompletionsCommand, GraphCommand, ValidateCommand};

/// Gantry - dependency-aware build, deploy and test orchestrator
#[derive(Debug, Parser)]
#[command(name = "gantry")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

impl Cli {
    /// Whether human-readable progress should be printed
    pub fn shows_text(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Build modules and everything they depend on
    Build(ActionCommand),

    /// Deploy services, building what they need first
    Deploy(ActionCommand),

    /// Run tests
    Test(ActionCommand),

    /// Run one-off tasks
    Run(ActionCommand),

    /// Inspect the dependency graph
    Graph(GraphCommand),

    /// Validate the configuration and dependency graph
    Validate(ValidateCommand),

    /// Generate shell completions
    Completions(CompletionsCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(&self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Build(ref cmd) => cmd.execute(self, TaskKind::Build),
            Commands::Deploy(ref cmd) => cmd.execute(self, TaskKind::Deploy),
            Commands::Test(ref cmd) => cmd.execute(self, TaskKind::Test),
            Commands::Run(ref cmd) => cmd.execute(self, TaskKind::Run),
            Commands::Graph(ref cmd) => cmd.execute(self),
            Commands::Validate(ref cmd) => cmd.execute(self),
            Commands::Completions(ref cmd) => cmd.execute(self),
        }
    }
}
