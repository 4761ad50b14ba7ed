//! In-memory policy repository.
//!
//! Used for demo mode and tests. History lives only as long as the process.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::repository::{CommitInfo, PolicyRepository};
use crate::error::{Result, StoreError};
use crate::model::FireSet;

#[derive(Debug, Default)]
struct Inner {
    working: FireSet,
    /// Oldest first.
    commits: Vec<(CommitInfo, FireSet)>,
}

/// A repository held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    /// Creates an empty repository with no commits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository whose first commit holds `set`.
    #[must_use]
    pub fn with_snapshot(set: FireSet, author: &str, message: &str) -> Self {
        let info = new_commit(author, message);
        Self {
            inner: Mutex::new(Inner {
                working: set.clone(),
                commits: vec![(info, set)],
            }),
        }
    }
}

fn new_commit(author: &str, message: &str) -> CommitInfo {
    CommitInfo {
        commit_id: Uuid::new_v4().simple().to_string(),
        author: author.to_string(),
        timestamp: Utc::now(),
        message: message.to_string(),
    }
}

#[async_trait]
impl PolicyRepository for MemoryRepository {
    async fn load_working(&self) -> Result<FireSet> {
        Ok(self.inner.lock().await.working.clone())
    }

    async fn store_working(&self, set: &FireSet) -> Result<()> {
        self.inner.lock().await.working = set.clone();
        Ok(())
    }

    async fn commit(&self, set: &FireSet, author: &str, message: &str) -> Result<CommitInfo> {
        let info = new_commit(author, message);
        let mut inner = self.inner.lock().await;
        inner.working = set.clone();
        inner.commits.push((info.clone(), set.clone()));
        debug!("Recorded in-memory commit {}", info.commit_id);
        Ok(info)
    }

    async fn load_commit(&self, commit_id: &str) -> Result<FireSet> {
        let inner = self.inner.lock().await;
        inner
            .commits
            .iter()
            .find(|(info, _)| info.commit_id == commit_id)
            .map(|(_, set)| set.clone())
            .ok_or_else(|| {
                StoreError::CommitNotFound {
                    reference: commit_id.to_string(),
                }
                .into()
            })
    }

    async fn log(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .commits
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_is_newest_first() {
        let repo = MemoryRepository::new();
        assert!(repo.log(None).await.expect("log").is_empty());

        let first = repo.commit(&FireSet::new(), "alice", "one").await.expect("commit");
        let second = repo.commit(&FireSet::new(), "bob", "two").await.expect("commit");

        let log = repo.log(None).await.expect("log");
        assert_eq!(log, vec![second.clone(), first]);
        assert_eq!(repo.log(Some(1)).await.expect("log"), vec![second]);
    }

    #[tokio::test]
    async fn test_unknown_commit() {
        let repo = MemoryRepository::new();
        let err = repo.load_commit("nope").await.expect_err("unknown");
        assert!(err.is_not_found());
    }
}
