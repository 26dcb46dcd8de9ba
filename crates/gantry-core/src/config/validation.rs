//! Configuration validation

use std::collections::HashSet;

use globset::Glob;
use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{ActionConfig, Config};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_scheduler(config)?;
    validate_modules(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_scheduler(config: &Config) -> Result<()> {
    if config.scheduler.concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "scheduler.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }
    Ok(())
}

fn validate_modules(config: &Config) -> Result<()> {
    let mut modules = HashSet::new();
    let mut services = HashSet::new();
    let mut tasks = HashSet::new();
    let mut tests = HashSet::new();

    for (i, module) in config.modules.iter().enumerate() {
        if module.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("modules[{}].name", i),
                message: "module name cannot be empty".to_string(),
            }
            .into());
        }
        if !modules.insert(module.name.as_str()) {
            return Err(duplicate("module", &module.name));
        }

        for (field, patterns) in [("include", &module.include), ("exclude", &module.exclude)] {
            for pattern in patterns {
                if let Err(e) = Glob::new(pattern) {
                    return Err(ConfigError::InvalidGlob {
                        field: format!("modules[{}].{}", i, field),
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    }
                    .into());
                }
            }
        }

        validate_actions(&format!("modules[{}].services", i), "service", &module.services, &mut services)?;
        validate_actions(&format!("modules[{}].tasks", i), "task", &module.tasks, &mut tasks)?;
        validate_actions(&format!("modules[{}].tests", i), "test", &module.tests, &mut tests)?;
    }

    Ok(())
}

fn validate_actions<'a>(
    field: &str,
    kind: &str,
    actions: &'a [ActionConfig],
    seen: &mut HashSet<&'a str>,
) -> Result<()> {
    for (i, action) in actions.iter().enumerate() {
        if action.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}[{}].name", field, i),
                message: format!("{} name cannot be empty", kind),
            }
            .into());
        }
        if action.command.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}[{}].command", field, i),
                message: format!("{} '{}' needs a command", kind, action.name),
            }
            .into());
        }
        if !seen.insert(action.name.as_str()) {
            return Err(duplicate(kind, &action.name));
        }
    }
    Ok(())
}

fn duplicate(kind: &str, name: &str) -> crate::error::GantryError {
    ConfigError::DuplicateName {
        kind: kind.to_string(),
        name: name.to_string(),
    }
    .into()
}
