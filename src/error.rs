//! Error types for the Firelet policy manager.
//!
//! This module provides the error hierarchy for every stage of the policy
//! lifecycle: configuration, the entity store, rule compilation, fleet
//! deployment and the access boundary.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Firelet.
#[derive(Debug, Error)]
pub enum FireletError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Entity store errors.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Rule compilation errors.
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Deployment errors.
    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    /// Access boundary errors.
    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    /// User-facing summary wrapping another error.
    #[error("{message}")]
    Alert {
        /// Short message shown to the operator.
        message: String,
        /// The underlying failure.
        #[source]
        source: Box<FireletError>,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },
}

/// Entity store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this rid exists in the table.
    #[error("No {table} record with rid {rid}")]
    NotFound {
        /// Table name.
        table: String,
        /// Requested row id.
        rid: u32,
    },

    /// A commit reference did not resolve.
    #[error("Commit not found: {reference}")]
    CommitNotFound {
        /// The reference that failed to resolve (commit id or offset).
        reference: String,
    },

    /// A record violates a table invariant.
    #[error("Invalid {table} field '{field}': {message}")]
    Validation {
        /// Table name.
        table: String,
        /// Offending field.
        field: String,
        /// Violated constraint.
        message: String,
    },

    /// Deleting or renaming would orphan references.
    #[error("{table} '{name}' is still referenced by: {}", referrers.join(", "))]
    Referential {
        /// Table name.
        table: String,
        /// Name of the referenced record.
        name: String,
        /// Records that reference it.
        referrers: Vec<String>,
    },

    /// The presented token is stale.
    #[error("{table} record {rid} was modified by someone else; fetch it again")]
    Conflict {
        /// Table name.
        table: String,
        /// Row id of the contended record.
        rid: u32,
    },

    /// Working state equals the last commit.
    #[error("Nothing to save: working state matches the last commit")]
    NothingToSave,

    /// The underlying repository failed.
    #[error("Repository error: {message}")]
    Repository {
        /// Description of the failure.
        message: String,
    },

    /// Stored content could not be decoded.
    #[error("Stored data is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Lock acquisition failed.
    #[error("Failed to acquire repository lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// The repository is locked by another process.
    #[error("Repository is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },
}

/// Rule compilation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A rule names an endpoint or service that does not exist.
    #[error("Rule '{rule}' references unknown {kind} '{reference}'")]
    DanglingReference {
        /// Rule name.
        rule: String,
        /// Kind of reference (endpoint, service, group member).
        kind: String,
        /// The unresolved name.
        reference: String,
    },

    /// A host group contains itself.
    #[error("Host group cycle detected: {cycle}")]
    CyclicGroup {
        /// The membership path, e.g. `g1 -> g2 -> g1`.
        cycle: String,
    },

    /// Source and destination services use different protocols.
    #[error("Rule '{rule}' mixes protocols {source_protocol} and {destination_protocol}")]
    ProtocolMismatch {
        /// Rule name.
        rule: String,
        /// Protocol of the source service.
        source_protocol: String,
        /// Protocol of the destination service.
        destination_protocol: String,
    },
}

/// Deployment errors raised by a host transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeployError {
    /// The host could not be contacted.
    #[error("Host {host} is unreachable: {message}")]
    Unreachable {
        /// Hostname.
        host: String,
        /// Transport failure description.
        message: String,
    },

    /// The host refused or failed to apply the ruleset.
    #[error("Host {host} rejected the ruleset: {reason}")]
    Rejected {
        /// Hostname.
        host: String,
        /// Reason reported by the host.
        reason: String,
    },

    /// The push did not complete in time.
    #[error("Host {host} did not answer within {secs}s")]
    Timeout {
        /// Hostname.
        host: String,
        /// Timeout in seconds.
        secs: u64,
    },

    /// The deployed-state baseline could not be read or written.
    #[error("Deployed state error: {message}")]
    StateCorrupted {
        /// Description of the failure.
        message: String,
    },
}

/// Access boundary errors.
#[derive(Debug, Error)]
pub enum AccessError {
    /// Credentials did not match.
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed {
        /// User name.
        user: String,
    },

    /// The caller's role is too low for the action.
    #[error("An account with '{required}' level or higher is required (current: {actual})")]
    InsufficientRole {
        /// Required role.
        required: String,
        /// Caller's role.
        actual: String,
    },

    /// The user does not exist.
    #[error("Unknown user '{user}'")]
    UnknownUser {
        /// User name.
        user: String,
    },

    /// A user with this name already exists.
    #[error("User '{user}' already exists")]
    DuplicateUser {
        /// User name.
        user: String,
    },
}

/// Result type alias for Firelet operations.
pub type Result<T> = std::result::Result<T, FireletError>;

impl FireletError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wraps an error into a user-facing alert.
    #[must_use]
    pub fn alert(message: impl Into<String>, source: impl Into<Self>) -> Self {
        Self::Alert {
            message: message.into(),
            source: Box::new(source.into()),
        }
    }

    /// Returns the innermost error, looking through alerts.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Alert { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if this is a stale-token conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self.root(), Self::Store(StoreError::Conflict { .. }))
    }

    /// Returns true if a record or commit was not found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            Self::Store(StoreError::NotFound { .. } | StoreError::CommitNotFound { .. })
        )
    }

    /// Returns true if a delete or rename would orphan references.
    #[must_use]
    pub fn is_referential(&self) -> bool {
        matches!(self.root(), Self::Store(StoreError::Referential { .. }))
    }

    /// Returns true if a record failed validation.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Store(StoreError::Validation { .. }))
    }

    /// Returns true if compilation failed.
    #[must_use]
    pub fn is_compile(&self) -> bool {
        matches!(self.root(), Self::Compile(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StoreError {
    /// Creates a validation error for a table field.
    #[must_use]
    pub fn validation(
        table: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            table: table.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a repository error with the given message.
    #[must_use]
    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

impl DeployError {
    /// Returns the host this error concerns.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Unreachable { host, .. }
            | Self::Rejected { host, .. }
            | Self::Timeout { host, .. } => Some(host),
            Self::StateCorrupted { .. } => None,
        }
    }
}
