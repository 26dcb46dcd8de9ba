//! Shell completions command

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};
use tracing::info;

use crate::cli::{output, Cli};

/// Print a completion script for gantry
#[derive(Debug, Args)]
pub struct CompletionsCommand {
    /// Target shell; taken from $SHELL when omitted
    #[arg(value_enum)]
    pub shell: Option<Shell>,

    /// Write the script to this file
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

impl CompletionsCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let shell = self
            .shell
            .or_else(Shell::from_env)
            .context("Could not detect the shell from $SHELL; pass one explicitly")?;
        info!(%shell, output = ?self.output, "executing completions command");

        let Some(path) = &self.output else {
            return render(shell, &mut io::stdout().lock());
        };

        let mut file = File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        render(shell, &mut file)?;
        if !cli.quiet {
            output::success(&format!("{} completions written to {}", shell, path.display()));
        }
        Ok(())
    }
}

fn render(shell: Shell, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    let bin = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin, out);
    out.flush()?;
    Ok(())
}
