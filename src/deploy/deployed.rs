//! Deployed-state baseline.
//!
//! Records the ruleset last applied to each host, plus a bounded history of
//! deploy attempts. The file lives next to the policy tables as
//! `deployed.json` and is written atomically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DeployError, Result};

/// Baseline file name inside the data directory.
pub const DEPLOYED_FILE: &str = "deployed.json";

/// History entries kept in the baseline.
const MAX_HISTORY: usize = 100;

/// One deploy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployHistoryEntry {
    /// When the deploy ran.
    pub timestamp: DateTime<Utc>,
    /// Hosts that applied their ruleset.
    pub applied: Vec<String>,
    /// Hosts that failed, with the reason.
    #[serde(default)]
    pub failed: BTreeMap<String, String>,
}

impl DeployHistoryEntry {
    /// Returns true if every host applied.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Last applied ruleset per host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedState {
    /// Rendered ruleset by hostname.
    #[serde(default)]
    pub rulesets: BTreeMap<String, String>,
    /// Recent deploy attempts, oldest first.
    #[serde(default)]
    pub history: Vec<DeployHistoryEntry>,
}

impl DeployedState {
    /// Records that `hostname` now runs `ruleset`.
    pub fn record_applied(&mut self, hostname: &str, ruleset: &str) {
        self.rulesets
            .insert(hostname.to_string(), ruleset.to_string());
    }

    /// Drops the rulesets of hosts for which `keep` is false.
    pub fn retain_hosts(&mut self, keep: impl Fn(&str) -> bool) {
        self.rulesets.retain(|host, _| {
            let kept = keep(host);
            if !kept {
                info!("Host {host} left the fleet, dropping it from the baseline");
            }
            kept
        });
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: DeployHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

/// File-backed store for [`DeployedState`].
#[derive(Debug, Clone)]
pub struct DeployedStore {
    path: PathBuf,
}

impl DeployedStore {
    /// Creates a store for `deployed.json` inside `dir`.
    #[must_use]
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(DEPLOYED_FILE),
        }
    }

    /// Path of the baseline file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the baseline; a missing file is an empty baseline.
    ///
    /// # Errors
    ///
    /// Returns `StateCorrupted` if the file cannot be read or parsed.
    pub async fn load(&self) -> Result<DeployedState> {
        if !self.path.exists() {
            debug!("No deployed baseline at {}", self.path.display());
            return Ok(DeployedState::default());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| corrupted(format!("Failed to read {}: {e}", self.path.display())))?;
        let state = serde_json::from_str(&content)
            .map_err(|e| corrupted(format!("Failed to parse {}: {e}", self.path.display())))?;
        Ok(state)
    }

    /// Writes the baseline through a temporary file and a rename.
    ///
    /// # Errors
    ///
    /// Returns `StateCorrupted` if the file cannot be written.
    pub async fn save(&self, state: &DeployedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| corrupted(format!("Failed to create {}: {e}", parent.display())))?;
        }

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| corrupted(format!("Failed to serialize baseline: {e}")))?;

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| corrupted(format!("Failed to create temp baseline: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| corrupted(format!("Failed to write baseline: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| corrupted(format!("Failed to sync baseline: {e}")))?;

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| corrupted(format!("Failed to rename baseline: {e}")))?;

        info!(
            "Deployed baseline saved ({} hosts) to {}",
            state.rulesets.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn corrupted(message: String) -> DeployError {
    DeployError::StateCorrupted { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_baseline() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = DeployedStore::in_dir(temp.path());

        let state = store.load().await.expect("load");
        assert_eq!(state, DeployedState::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = DeployedStore::in_dir(temp.path());

        let mut state = DeployedState::default();
        state.record_applied("fw1", "*filter\nCOMMIT\n");
        state.add_history(DeployHistoryEntry {
            timestamp: Utc::now(),
            applied: vec![String::from("fw1")],
            failed: BTreeMap::new(),
        });
        store.save(&state).await.expect("save");

        let loaded = store.load().await.expect("load");
        assert_eq!(loaded, state);
        assert!(loaded.history[0].success());
        let files = std::fs::read_dir(temp.path()).expect("read dir").count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_corrupted_file() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = DeployedStore::in_dir(temp.path());
        std::fs::write(store.path(), "{ not json").expect("write");

        let err = store.load().await.expect_err("must fail");
        assert!(err.to_string().contains("Deployed state error"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = DeployedState::default();
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(DeployHistoryEntry {
                timestamp: Utc::now(),
                applied: vec![format!("h{i}")],
                failed: BTreeMap::new(),
            });
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].applied, vec![String::from("h5")]);
    }

    #[test]
    fn test_retain_hosts() {
        let mut state = DeployedState::default();
        state.record_applied("fw1", "a");
        state.record_applied("fw2", "b");

        state.retain_hosts(|host| host == "fw1");
        assert_eq!(state.rulesets.keys().collect::<Vec<_>>(), vec!["fw1"]);
    }
}
