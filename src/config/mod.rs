//! Configuration module for Firelet.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `firelet.yaml`
//! - Environment and `.env` overrides
//! - Validation of configuration values

mod parser;
mod spec;
mod validator;

pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES};
pub use spec::{
    CompilerConfig, DeploySettings, FireletConfig, MessagesConfig, RepositoryBackend,
    RepositoryConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
