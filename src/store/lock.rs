//! Repository locking across processes.
//!
//! Mutating CLI invocations hold a lock file in the data directory so two
//! processes never interleave writes to the same working tree. Within one
//! process the [`EntityStore`](super::EntityStore) serializes writers itself.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300; // 5 minutes

/// Lock file name.
const LOCK_FILE: &str = "firelet.lock";

/// Information about a repository lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock info.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// A held lock on a data directory. Release it with [`RepositoryLock::release`].
#[derive(Debug)]
pub struct RepositoryLock {
    path: PathBuf,
    info: LockInfo,
}

impl RepositoryLock {
    /// Acquires the lock in `dir`, taking over an expired one.
    ///
    /// # Errors
    ///
    /// Returns `LockedByOther` if a live lock exists, or `LockFailed` if the
    /// lock file cannot be written.
    pub async fn acquire(dir: &Path, holder: &str) -> Result<Self> {
        let path = dir.join(LOCK_FILE);

        if let Some(existing) = read_lock_file(&path).await? {
            if !existing.is_expired() {
                return Err(StoreError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock held by {} found, taking over", existing.holder);
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let info = LockInfo::new(&holder_id);
        write_lock_file(dir, &path, &info).await?;

        info!(
            "Acquired repository lock: {} (expires in {}s)",
            info.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(Self { path, info })
    }

    /// Acquires the lock in `dir` for this process, identified as
    /// `hostname-pid-uuid`.
    ///
    /// # Errors
    ///
    /// Same as [`RepositoryLock::acquire`].
    pub async fn acquire_for_process(dir: &Path) -> Result<Self> {
        Self::acquire(dir, &generate_holder_id()).await
    }

    /// Gets the lock info.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Releases the lock if this process still holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be read or removed.
    pub async fn release(self) -> Result<()> {
        match read_lock_file(&self.path).await? {
            Some(existing) if existing.lock_id == self.info.lock_id => {
                fs::remove_file(&self.path).await.map_err(|e| StoreError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })?;
                info!("Released repository lock: {}", self.info.lock_id);
            }
            Some(existing) => {
                debug!(
                    "Lock ID mismatch: expected {}, found {}",
                    self.info.lock_id, existing.lock_id
                );
            }
            None => {}
        }
        Ok(())
    }
}

async fn read_lock_file(path: &Path) -> Result<Option<LockInfo>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::corrupted(format!("Failed to read lock file: {e}")))?;
    let info = serde_json::from_str(&content)
        .map_err(|e| StoreError::corrupted(format!("Failed to parse lock file: {e}")))?;
    Ok(Some(info))
}

async fn write_lock_file(dir: &Path, path: &Path, info: &LockInfo) -> Result<()> {
    let failed = |what: &str, e: &dyn std::fmt::Display| StoreError::LockFailed {
        message: format!("Failed to {what} lock file: {e}"),
    };

    fs::create_dir_all(dir).await.map_err(|e| failed("create directory for", &e))?;
    let content = serde_json::to_string_pretty(info).map_err(|e| failed("serialize", &e))?;

    let mut file = fs::File::create(path).await.map_err(|e| failed("create", &e))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| failed("write", &e))?;
    file.sync_all().await.map_err(|e| failed("sync", &e))?;
    Ok(())
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}
