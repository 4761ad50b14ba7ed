//! Configuration specification types for the Firelet daemon and CLI.
//!
//! This module defines the structs that map to `firelet.yaml`. Every field
//! has a default so an empty file is a valid configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compiler::DefaultPolicy;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FireletConfig {
    /// Title shown by front ends.
    pub title: String,
    /// Policy repository settings.
    pub repository: RepositoryConfig,
    /// Fleet deployment settings.
    pub deploy: DeploySettings,
    /// Rule compiler settings.
    pub compiler: CompilerConfig,
    /// Operator message log settings.
    pub messages: MessagesConfig,
    /// Default commit author.
    pub author: String,
}

impl Default for FireletConfig {
    fn default() -> Self {
        Self {
            title: String::from("Firelet"),
            repository: RepositoryConfig::default(),
            deploy: DeploySettings::default(),
            compiler: CompilerConfig::default(),
            messages: MessagesConfig::default(),
            author: String::from("firelet"),
        }
    }
}

impl FireletConfig {
    /// Directory holding the tables, the deployed baseline and the users.
    ///
    /// Falls back to the platform data directory when no path is set.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        if self.repository.path.as_os_str().is_empty() {
            dirs::data_local_dir()
                .map_or_else(|| PathBuf::from(".firelet"), |d| d.join("firelet"))
        } else {
            self.repository.path.clone()
        }
    }
}

/// Policy repository settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Backend type.
    pub backend: RepositoryBackend,
    /// Data directory.
    pub path: PathBuf,
}

/// Repository backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryBackend {
    /// Tables versioned in a git working tree.
    #[default]
    Git,
    /// In-memory tables, lost on exit (demo mode).
    Memory,
}

/// Fleet deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeploySettings {
    /// Remote user for ssh.
    pub ssh_user: String,
    /// Remote ssh port.
    pub ssh_port: u16,
    /// Bound on a single host push, in seconds.
    pub timeout_secs: u64,
    /// Concurrent host pushes.
    pub parallelism: usize,
    /// Remote command reading the ruleset on stdin.
    pub apply_command: String,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            ssh_user: String::from("firelet"),
            ssh_port: default_ssh_port(),
            timeout_secs: default_timeout_secs(),
            parallelism: default_parallelism(),
            apply_command: String::from("sudo /sbin/iptables-restore"),
        }
    }
}

impl DeploySettings {
    /// Push timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Rule compiler settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CompilerConfig {
    /// Policy of the INPUT and FORWARD chains.
    pub default_policy: DefaultPolicy,
}

/// Operator message log settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MessagesConfig {
    /// Messages kept.
    pub capacity: usize,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            capacity: crate::messages::DEFAULT_CAPACITY,
        }
    }
}

const fn default_ssh_port() -> u16 {
    22
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_parallelism() -> usize {
    8
}
