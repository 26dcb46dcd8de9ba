//! Default configuration values

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gantry.yaml";

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gantry.toml";

/// Alternative configuration file name
pub const ALT_CONFIG_FILE: &str = ".gantry.yaml";

/// Default maximum number of concurrently executing tasks
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default debounce window for file change events
pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_YAML,
        DEFAULT_CONFIG_TOML,
        ALT_CONFIG_FILE,
        ".gantry.toml",
    ]
}

/// Check whether a file name is one of the config file names
pub fn is_config_file_name(name: &str) -> bool {
    config_file_names().contains(&name)
}
