//! Exit codes for the CLI

use gantry_core::GantryError;
use gantry_tasks::PlanError;

/// Success
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration error
pub const CONFIG_ERROR: i32 = 2;

/// Malformed dependency graph
pub const GRAPH_ERROR: i32 = 3;

/// At least one task failed or was skipped
pub const TASK_FAILED: i32 = 4;

/// Interrupted by the user
pub const INTERRUPTED: i32 = 130;

/// Failures the command has already reported to the user
#[derive(Debug, thiserror::Error)]
pub enum Exit {
    /// Tasks did not succeed
    #[error("{0} task(s) did not succeed")]
    TaskFailed(usize),

    /// Ctrl-C
    #[error("interrupted")]
    Interrupted,

    /// Validation failed with the given exit code
    #[error("validation failed")]
    Invalid(i32),
}

impl Exit {
    pub fn code(&self) -> i32 {
        match self {
            Self::TaskFailed(_) => TASK_FAILED,
            Self::Interrupted => INTERRUPTED,
            Self::Invalid(code) => *code,
        }
    }
}

/// Exit code for a gantry error
pub fn for_gantry_error(err: &GantryError) -> i32 {
    match err {
        GantryError::Config(_) | GantryError::Toml(_) | GantryError::Yaml(_) => CONFIG_ERROR,
        GantryError::Graph(_) => GRAPH_ERROR,
        _ => ERROR,
    }
}

/// Exit code for the first recognised error in the chain
pub fn for_error(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(exit) = cause.downcast_ref::<Exit>() {
            return exit.code();
        }
        if let Some(gantry) = cause.downcast_ref::<GantryError>() {
            return for_gantry_error(gantry);
        }
        if cause.downcast_ref::<PlanError>().is_some() {
            return GRAPH_ERROR;
        }
    }
    ERROR
}
