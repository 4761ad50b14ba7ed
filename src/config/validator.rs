//! Configuration validation.
//!
//! Checks that deploy, repository and message settings are usable before
//! any store or transport is built.

use tracing::debug;

use crate::error::{ConfigError, FireletError, Result};

use super::spec::{DeploySettings, FireletConfig, RepositoryBackend, RepositoryConfig};

/// Validator for Firelet configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &FireletConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_repository(&config.repository, &mut result);
        Self::validate_deploy(&config.deploy, &mut result);

        if config.messages.capacity == 0 {
            result.errors.push(ValidationError {
                field: String::from("messages.capacity"),
                message: String::from("Message capacity must be at least 1"),
            });
        }

        if config.author.trim().is_empty() {
            result
                .warnings
                .push(String::from("No default author; commits need an explicit author"));
        }

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(FireletError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_repository(repository: &RepositoryConfig, result: &mut ValidationResult) {
        match repository.backend {
            RepositoryBackend::Git => {
                if repository.path.as_os_str().is_empty() {
                    result.errors.push(ValidationError {
                        field: String::from("repository.path"),
                        message: String::from(
                            "Repository path is required when using the git backend",
                        ),
                    });
                }
            }
            RepositoryBackend::Memory => {
                result
                    .warnings
                    .push(String::from("Memory backend: changes are lost on exit"));
            }
        }
    }

    fn validate_deploy(deploy: &DeploySettings, result: &mut ValidationResult) {
        if deploy.ssh_user.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("deploy.ssh_user"),
                message: String::from("SSH user cannot be empty"),
            });
        }

        if deploy.ssh_port == 0 {
            result.errors.push(ValidationError {
                field: String::from("deploy.ssh_port"),
                message: String::from("SSH port cannot be 0"),
            });
        }

        if deploy.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("deploy.timeout_secs"),
                message: String::from("Deploy timeout must be at least 1 second"),
            });
        }

        if deploy.parallelism == 0 {
            result.errors.push(ValidationError {
                field: String::from("deploy.parallelism"),
                message: String::from("Deploy parallelism must be at least 1"),
            });
        }

        if deploy.apply_command.trim().is_empty() {
            result.errors.push(ValidationError {
                field: String::from("deploy.apply_command"),
                message: String::from("Apply command cannot be empty"),
            });
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn valid() -> FireletConfig {
        let mut config = FireletConfig::default();
        config.repository.path = PathBuf::from("/srv/firelet");
        config
    }

    fn failing_field(config: &FireletConfig) -> Option<String> {
        match ConfigValidator::new().validate(config) {
            Err(FireletError::Config(ConfigError::ValidationError { field, .. })) => field,
            _ => None,
        }
    }

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::new().validate(&valid()).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_git_backend_needs_path() {
        let config = FireletConfig::default();
        assert_eq!(failing_field(&config).as_deref(), Some("repository.path"));

        let mut memory = FireletConfig::default();
        memory.repository.backend = RepositoryBackend::Memory;
        let result = ConfigValidator::new().validate(&memory).expect("memory needs no path");
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_rejects_zero_values() {
        let mut config = valid();
        config.deploy.timeout_secs = 0;
        assert_eq!(failing_field(&config).as_deref(), Some("deploy.timeout_secs"));

        let mut config = valid();
        config.deploy.parallelism = 0;
        assert_eq!(failing_field(&config).as_deref(), Some("deploy.parallelism"));

        let mut config = valid();
        config.messages.capacity = 0;
        assert_eq!(failing_field(&config).as_deref(), Some("messages.capacity"));

        let mut config = valid();
        config.deploy.ssh_user = String::from("  ");
        assert_eq!(failing_field(&config).as_deref(), Some("deploy.ssh_user"));
    }

    #[test]
    fn test_display() {
        let err = ValidationError {
            field: String::from("deploy.ssh_port"),
            message: String::from("SSH port cannot be 0"),
        };
        assert_eq!(err.to_string(), "deploy.ssh_port: SSH port cannot be 0");
    }
}
