//! Access boundary: roles, action classes and the user directory.
//!
//! The core never authenticates; callers resolve a [`Session`] through an
//! [`Authenticator`] and gate each operation with [`Session::require`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AccessError, FireletError, Result};

/// User directory file name inside the data directory.
pub const USERS_FILE: &str = "users.yaml";

/// Role hierarchy; each role includes the ones below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// May read tables, history and check results.
    Readonly,
    /// May edit the working state and save or reset it.
    Editor,
    /// May roll back history and deploy.
    Admin,
}

impl Role {
    /// Lowercase role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Readonly => "readonly",
            Self::Editor => "editor",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "readonly" => Ok(Self::Readonly),
            "editor" => Ok(Self::Editor),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}' (expected readonly, editor or admin)")),
        }
    }
}

/// Class of a boundary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// list, fetch, `version_list`, `version_diff`, `save_needed`, check, compile.
    Read,
    /// add, update, delete, enable, disable, reorder, save, reset.
    Edit,
    /// rollback, deploy, user management.
    Admin,
}

impl ActionClass {
    /// Lowest role allowed to perform this class of action.
    #[must_use]
    pub const fn required_role(self) -> Role {
        match self {
            Self::Read => Role::Readonly,
            Self::Edit => Role::Editor,
            Self::Admin => Role::Admin,
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// User name.
    pub user: String,
    /// Granted role.
    pub role: Role,
}

impl Session {
    /// Creates a session.
    #[must_use]
    pub fn new(user: impl Into<String>, role: Role) -> Self {
        Self {
            user: user.into(),
            role,
        }
    }

    /// Checks that the session may perform `class`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientRole` if the role is too low.
    pub fn require(&self, class: ActionClass) -> std::result::Result<(), AccessError> {
        let required = class.required_role();
        if self.role >= required {
            return Ok(());
        }
        warn!(
            "User {} ({}) denied {class:?} action",
            self.user, self.role
        );
        Err(AccessError::InsufficientRole {
            required: required.to_string(),
            actual: self.role.to_string(),
        })
    }
}

/// Resolves credentials to a role.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Checks `secret` for `name` and returns the user's role.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if the user is unknown or the secret
    /// does not match.
    async fn authenticate(&self, name: &str, secret: &str) -> Result<Role>;
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    /// Role.
    pub role: Role,
    /// Per-user random salt.
    pub salt: String,
    /// Hex SHA-256 of salt and secret.
    pub secret_hash: String,
    /// Contact address.
    #[serde(default)]
    pub email: String,
}

impl UserEntry {
    fn new(role: Role, secret: &str, email: &str) -> Self {
        let salt = Uuid::new_v4().simple().to_string();
        let secret_hash = hash_secret(&salt, secret);
        Self {
            role,
            salt,
            secret_hash,
            email: email.to_string(),
        }
    }

    fn matches(&self, secret: &str) -> bool {
        crate::store::TokenHasher::tokens_match(&self.secret_hash, &hash_secret(&self.salt, secret))
    }
}

fn hash_secret(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update([0]);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Users persisted in `users.yaml`.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    path: PathBuf,
}

impl UserDirectory {
    /// Creates a directory backed by `users.yaml` inside `dir`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(USERS_FILE),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, UserEntry>> {
        if !self.path.exists() {
            debug!("No user directory at {}", self.path.display());
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&self.path).await?;
        serde_yaml::from_str(&content).map_err(|e| {
            FireletError::internal(format!("Failed to parse {}: {e}", self.path.display()))
        })
    }

    async fn store(&self, users: &BTreeMap<String, UserEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_yaml::to_string(users)
            .map_err(|e| FireletError::internal(format!("Failed to serialize users: {e}")))?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    /// Lists users with their role and email.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn list(&self) -> Result<Vec<(String, Role, String)>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .map(|(name, entry)| (name, entry.role, entry.email))
            .collect())
    }

    /// Creates a user.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateUser` if the name is taken.
    pub async fn add(&self, name: &str, role: Role, secret: &str, email: &str) -> Result<()> {
        let mut users = self.load().await?;
        if users.contains_key(name) {
            return Err(AccessError::DuplicateUser {
                user: name.to_string(),
            }
            .into());
        }
        users.insert(name.to_string(), UserEntry::new(role, secret, email));
        self.store(&users).await?;
        info!("Added user {name} ({role})");
        Ok(())
    }

    /// Deletes a user.
    ///
    /// # Errors
    ///
    /// Returns `UnknownUser` if there is no such user.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut users = self.load().await?;
        if users.remove(name).is_none() {
            return Err(AccessError::UnknownUser {
                user: name.to_string(),
            }
            .into());
        }
        self.store(&users).await?;
        info!("Deleted user {name}");
        Ok(())
    }

    /// Authenticates and opens a session.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` on bad credentials.
    pub async fn login(&self, name: &str, secret: &str) -> Result<Session> {
        let role = self.authenticate(name, secret).await?;
        Ok(Session::new(name, role))
    }
}

#[async_trait]
impl Authenticator for UserDirectory {
    async fn authenticate(&self, name: &str, secret: &str) -> Result<Role> {
        let users = self.load().await?;
        match users.get(name) {
            Some(entry) if entry.matches(secret) => {
                debug!("User {name} authenticated as {}", entry.role);
                Ok(entry.role)
            }
            _ => {
                warn!("Authentication failed for {name}");
                Err(AccessError::AuthenticationFailed {
                    user: name.to_string(),
                }
                .into())
            }
        }
    }
}
