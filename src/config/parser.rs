//! Configuration parser for loading `firelet.yaml`.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, FireletError, Result};

use super::spec::FireletConfig;

/// Configuration parser for loading Firelet configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<FireletConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(FireletError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FireletError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// An empty document yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<FireletConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(FireletConfig::default());
        }

        let config: FireletConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            FireletError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed configuration '{}'", config.title);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// override has the wrong type.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<FireletConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Returns the defaults with environment variable overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has the wrong type.
    pub fn defaults_with_env(&self) -> Result<FireletConfig> {
        let mut config = FireletConfig::default();
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `FIRELET_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns a parse error for a non-numeric timeout.
    pub fn apply_env_overrides(
        config: &mut FireletConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(path) = lookup("FIRELET_REPOSITORY_PATH") {
            debug!("Overriding repository.path from environment");
            config.repository.path = PathBuf::from(path);
        }

        if let Some(user) = lookup("FIRELET_DEPLOY_SSH_USER") {
            debug!("Overriding deploy.ssh_user from environment");
            config.deploy.ssh_user = user;
        }

        if let Some(secs) = lookup("FIRELET_DEPLOY_TIMEOUT_SECS") {
            debug!("Overriding deploy.timeout_secs from environment");
            config.deploy.timeout_secs = secs.trim().parse().map_err(|e| {
                FireletError::Config(ConfigError::ParseError {
                    message: format!("FIRELET_DEPLOY_TIMEOUT_SECS must be a number: {e}"),
                    location: None,
                })
            })?;
        }

        if let Some(author) = lookup("FIRELET_AUTHOR") {
            debug!("Overriding author from environment");
            config.author = author;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                FireletError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["firelet.yaml", "firelet.yml"];

/// Finds the configuration file in `start_dir` or its parents, then in the
/// user configuration directory.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    if let Some(user_dir) = dirs::config_dir() {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = user_dir.join("firelet").join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }
    } else {
        warn!("No user configuration directory on this platform");
    }

    Err(FireletError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;
    use crate::compiler::DefaultPolicy;
    use crate::config::RepositoryBackend;

    #[test]
    fn test_parse_empty_config() {
        let config = ConfigParser::new().parse_yaml("", None).expect("parse");
        assert_eq!(config, FireletConfig::default());
        assert_eq!(config.deploy.ssh_port, 22);
        assert_eq!(config.messages.capacity, 10);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
title: Lab firewall
repository:
  backend: memory
  path: /var/lib/firelet
deploy:
  ssh_user: root
  ssh_port: 2222
  timeout_secs: 5
  parallelism: 2
  apply_command: /sbin/iptables-restore
compiler:
  default_policy: accept
messages:
  capacity: 50
author: ops
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("parse");
        assert_eq!(config.title, "Lab firewall");
        assert_eq!(config.repository.backend, RepositoryBackend::Memory);
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/firelet"));
        assert_eq!(config.deploy.ssh_port, 2222);
        assert_eq!(config.deploy.timeout().as_secs(), 5);
        assert_eq!(config.compiler.default_policy, DefaultPolicy::Accept);
        assert_eq!(config.messages.capacity, 50);
        assert_eq!(config.author, "ops");
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new()
            .parse_yaml("deploy: [", Some(Path::new("firelet.yaml")))
            .expect_err("invalid yaml");
        assert!(matches!(
            err,
            FireletError::Config(ConfigError::ParseError { location: Some(ref l), .. }) if l == "firelet.yaml"
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FIRELET_REPOSITORY_PATH", "/srv/policy"),
            ("FIRELET_DEPLOY_SSH_USER", "admin"),
            ("FIRELET_DEPLOY_TIMEOUT_SECS", "12"),
            ("FIRELET_AUTHOR", "jdoe"),
        ]);
        let mut config = FireletConfig::default();
        ConfigParser::apply_env_overrides(&mut config, |k| env.get(k).map(ToString::to_string))
            .expect("overrides");

        assert_eq!(config.repository.path, PathBuf::from("/srv/policy"));
        assert_eq!(config.deploy.ssh_user, "admin");
        assert_eq!(config.deploy.timeout_secs, 12);
        assert_eq!(config.author, "jdoe");

        let bad = ConfigParser::apply_env_overrides(&mut config, |k| {
            (k == "FIRELET_DEPLOY_TIMEOUT_SECS").then(|| String::from("soon"))
        });
        assert!(bad.is_err());
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(temp.path().join("firelet.yaml"), "title: x\n").expect("write");

        let found = find_config_file(&nested).expect("found");
        assert_eq!(found, temp.path().join("firelet.yaml"));
    }
}
