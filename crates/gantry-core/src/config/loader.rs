//! Configuration loading

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::Config;
use super::validation::validate_config;

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let config: Config = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    validate_config(&config)?;
    debug!(path = %path.display(), modules = config.modules.len(), "config loaded and validated");
    Ok(config)
}

/// Find configuration file in directory or parent directories.
///
/// The first match wins. Parents are walked until the filesystem root.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load configuration from directory (searching parent directories)
pub fn load_config_from_dir(dir: &Path) -> Result<(Config, PathBuf)> {
    let config_path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;

    let config = load_config(&config_path)?;
    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GantryError;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.yaml");
        std::fs::write(&config_path, "name: shop\n").unwrap();

        let found = find_config(temp.path());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_prefers_yaml_over_toml() {
        let temp = TempDir::new().unwrap();
        let yaml_path = temp.path().join("gantry.yaml");
        let toml_path = temp.path().join("gantry.toml");
        std::fs::write(&yaml_path, "name: shop\n").unwrap();
        std::fs::write(&toml_path, "name = \"shop\"\n").unwrap();

        let found = find_config(temp.path()).unwrap();
        assert_eq!(found, yaml_path);
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(&config_path, "name = \"shop\"\n").unwrap();
        let nested = temp.path().join("services").join("api");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config(&nested).unwrap();
        assert_eq!(found, config_path);
    }

    #[test]
    fn test_load_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.yaml");
        std::fs::write(
            &config_path,
            r#"
name: shop
scheduler:
  concurrency: 8
modules:
  - name: api
    path: services/api
    include: ["src/**"]
    build:
      command: cargo build
      dependencies: [common]
    services:
      - name: api
        command: ./deploy.sh
        dependencies: [db]
      - name: db
        command: ./db.sh
  - name: common
    path: libs/common
"#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.name.as_deref(), Some("shop"));
        assert_eq!(config.scheduler.concurrency, 8);
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.modules.len(), 2);
        assert_eq!(config.modules[0].build.dependencies, vec!["common"]);
        assert_eq!(config.modules[0].services[0].dependencies, vec!["db"]);
        assert!(config.modules[1].build.command.is_none());
    }

    #[test]
    fn test_load_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(
            &config_path,
            r#"
[scheduler]
concurrency = 2

[[modules]]
name = "web"
path = "web"

[modules.build]
command = "npm run build"

[[modules.tests]]
name = "web-unit"
command = "npm test"
"#,
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.scheduler.concurrency, 2);
        assert_eq!(config.modules[0].tests[0].name, "web-unit");
    }

    #[test]
    fn test_load_config_from_dir_not_found() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("empty");
        std::fs::create_dir_all(&nested).unwrap();

        // Parents of a temp dir are not expected to carry a gantry config
        match load_config_from_dir(&nested) {
            Err(GantryError::Config(ConfigError::NotFound(_))) => {}
            Ok((_, path)) => assert!(!path.starts_with(temp.path())),
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_load_config_rejects_invalid() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.yaml");
        std::fs::write(&config_path, "scheduler:\n  concurrency: 0\n").unwrap();

        assert!(load_config(&config_path).is_err());
    }
}
