//! Validate command

use clap::Args;
use console::style;
use tracing::info;

use gantry_core::config::load_config_from_dir;
use gantry_core::{GantryError, Project};

use crate::cli::{Cli, OutputFormat};
use crate::exit_codes::{self, Exit};

/// Validate the configuration and dependency graph
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Strict mode - treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

/// Findings of one validation pass
#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
    /// Exit code of the first error
    code: Option<i32>,
}

impl Findings {
    fn error(&mut self, context: &str, err: &GantryError) {
        self.errors.push(format!("{}: {}", context, err));
        self.code.get_or_insert(exit_codes::for_gantry_error(err));
    }
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(strict = self.strict, "executing validate command");
        let cwd = std::env::current_dir()?;

        let mut findings = Findings::default();
        let mut config_path = None;
        let mut node_count = 0;

        match load_config_from_dir(&cwd) {
            Ok((config, path)) => {
                let root = path.parent().unwrap_or(cwd.as_path()).to_path_buf();
                for module in &config.modules {
                    if !root.join(&module.path).is_dir() {
                        findings.warnings.push(format!(
                            "Module '{}': directory '{}' does not exist",
                            module.name,
                            module.path.display()
                        ));
                    }
                }
                if config.modules.is_empty() {
                    findings.warnings.push("No modules defined".to_string());
                }

                match Project::from_config(root, config).and_then(|project| project.graph()) {
                    Ok(graph) => node_count = graph.len(),
                    Err(e) => findings.error("Dependency graph", &e),
                }
                config_path = Some(path);
            }
            Err(e) => findings.error("Configuration", &e),
        }

        if self.strict && !findings.warnings.is_empty() {
            findings.code.get_or_insert(exit_codes::ERROR);
            let mut warnings = std::mem::take(&mut findings.warnings);
            findings.errors.append(&mut warnings);
        }

        let passed = findings.errors.is_empty();

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "valid": passed,
                    "config_path": config_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                    "nodes": node_count,
                    "errors": findings.errors,
                    "warnings": findings.warnings
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", style("Validation Results").bold());
                    println!();

                    if let Some(path) = &config_path {
                        println!("Config: {}", style(path.display()).cyan());
                        println!("Nodes:  {}", node_count);
                        println!();
                    }

                    if !findings.errors.is_empty() {
                        println!("{}", style("Errors:").red().bold());
                        for error in &findings.errors {
                            println!("  {} {}", style("✗").red(), error);
                        }
                        println!();
                    }

                    if !findings.warnings.is_empty() {
                        println!("{}", style("Warnings:").yellow().bold());
                        for warning in &findings.warnings {
                            println!("  {} {}", style("!").yellow(), warning);
                        }
                        println!();
                    }

                    if passed {
                        if findings.warnings.is_empty() {
                            println!("{}", style("✓ All checks passed").green().bold());
                        } else {
                            println!(
                                "{} with {} warning(s)",
                                style("✓ Validation passed").green().bold(),
                                findings.warnings.len()
                            );
                        }
                    } else {
                        println!(
                            "{} with {} error(s)",
                            style("✗ Validation failed").red().bold(),
                            findings.errors.len()
                        );
                    }
                }
            }
        }

        if !passed {
            return Err(Exit::Invalid(findings.code.unwrap_or(exit_codes::ERROR)).into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{ConfigError, GraphError};

    #[test]
    fn test_first_error_decides_code() {
        let mut findings = Findings::default();
        findings.error(
            "Dependency graph",
            &GantryError::from(GraphError::DuplicateNode("module.api".to_string())),
        );
        findings.error(
            "Configuration",
            &GantryError::from(ConfigError::NotFound(std::path::PathBuf::from("."))),
        );

        assert_eq!(findings.errors.len(), 2);
        assert!(findings.errors[0].starts_with("Dependency graph: "));
        assert_eq!(findings.code, Some(exit_codes::GRAPH_ERROR));
    }
}
