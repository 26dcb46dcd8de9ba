//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::{DEFAULT_CONCURRENCY, DEFAULT_DEBOUNCE_MS};

/// Main configuration for Gantry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project name
    pub name: Option<String>,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Watch mode configuration
    pub watch: WatchConfig,

    /// Module definitions
    pub modules: Vec<ModuleConfig>,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum concurrent tasks
    pub concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window for file system events, in milliseconds
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// A source module and everything defined inside it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Module name
    pub name: String,

    /// Module directory, relative to the project root
    pub path: PathBuf,

    /// Glob patterns (relative to the module directory) of files that make up
    /// the module's content. Empty means every file.
    pub include: Vec<String>,

    /// Glob patterns of files to leave out of the module's content
    pub exclude: Vec<String>,

    /// How to build the module
    pub build: BuildConfig,

    /// Services deployed from this module
    pub services: Vec<ActionConfig>,

    /// Task definitions run from this module
    pub tasks: Vec<ActionConfig>,

    /// Test suites run from this module
    pub tests: Vec<ActionConfig>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            path: PathBuf::from("."),
            include: Vec::new(),
            exclude: Vec::new(),
            build: BuildConfig::default(),
            services: Vec::new(),
            tasks: Vec::new(),
            tests: Vec::new(),
        }
    }
}

/// Build step of a module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Shell command; modules without one have nothing to build
    pub command: Option<String>,

    /// Modules that must be built first
    pub dependencies: Vec<String>,

    /// Environment variables
    pub env: BTreeMap<String, String>,

    /// Timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// A service, task or test definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Name, unique among entries of the same kind
    pub name: String,

    /// Shell command
    pub command: String,

    /// Services or tasks this entry needs
    pub dependencies: Vec<String>,

    /// Environment variables
    pub env: BTreeMap<String, String>,

    /// Timeout in seconds
    pub timeout_secs: Option<u64>,
}

impl ActionConfig {
    /// Create a new action definition
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            ..Self::default()
        }
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }
}

impl ModuleConfig {
    /// Create a new module rooted at `path`
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Set the build command
    pub fn with_build_command(mut self, command: impl Into<String>) -> Self {
        self.build.command = Some(command.into());
        self
    }

    /// Add a build dependency on another module
    pub fn with_build_dependency(mut self, dep: impl Into<String>) -> Self {
        self.build.dependencies.push(dep.into());
        self
    }

    /// Add a service
    pub fn with_service(mut self, service: ActionConfig) -> Self {
        self.services.push(service);
        self
    }

    /// Add a task definition
    pub fn with_task(mut self, task: ActionConfig) -> Self {
        self.tasks.push(task);
        self
    }

    /// Add a test suite
    pub fn with_test(mut self, test: ActionConfig) -> Self {
        self.tests.push(test);
        self
    }
}
