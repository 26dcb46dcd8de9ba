//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed dependency configuration
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found in {0} or any parent directory")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// Two entries of the same kind share a name
    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: String, name: String },

    /// Invalid glob pattern
    #[error("Invalid glob pattern '{pattern}' in {field}: {message}")]
    InvalidGlob {
        field: String,
        pattern: String,
        message: String,
    },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Dependency graph construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// A dependency cycle was found among edges of one purpose
    #[error("Circular {purpose} dependency detected: {}", .nodes.join(" -> "))]
    Cycle { purpose: String, nodes: Vec<String> },

    /// An edge points at a node that does not exist
    #[error("'{from}' depends on '{to}', which is not defined")]
    MissingDependency { from: String, to: String },

    /// Two nodes share the same kind and name
    #[error("Node '{0}' is defined more than once")]
    DuplicateNode(String),

    /// A dependency name matches more than one node
    #[error("Dependency '{name}' of '{from}' is ambiguous: matches {candidates}")]
    AmbiguousDependency {
        from: String,
        name: String,
        candidates: String,
    },
}

impl GantryError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}
