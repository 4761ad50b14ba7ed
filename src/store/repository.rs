//! Policy repository trait and the on-disk table encoding.
//!
//! Each table is stored as one file with one JSON object per line, so the
//! version-control tooling can diff individual records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::model::{Entity, FireSet, Host, HostGroup, Network, Row, Rule, Service, Table, TableKind};

/// Metadata of one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Commit identifier.
    pub commit_id: String,
    /// Author identity.
    pub author: String,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Commit message.
    pub message: String,
}

impl CommitInfo {
    /// First eight characters of the commit id.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.commit_id.get(..8).unwrap_or(&self.commit_id)
    }
}

/// Versioned storage for policy snapshots.
///
/// The working state is the uncommitted overlay; commits are immutable
/// snapshots listed newest first by [`PolicyRepository::log`].
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Loads the uncommitted working state.
    async fn load_working(&self) -> Result<FireSet>;

    /// Persists the working state without committing it.
    async fn store_working(&self, set: &FireSet) -> Result<()>;

    /// Records `set` as a new commit and makes it the working state.
    ///
    /// A commit is created even if the content equals the previous one.
    async fn commit(&self, set: &FireSet, author: &str, message: &str) -> Result<CommitInfo>;

    /// Loads the snapshot recorded by a commit.
    async fn load_commit(&self, commit_id: &str) -> Result<FireSet>;

    /// Lists commits, most recent first, up to `limit` entries.
    async fn log(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl PolicyRepository for Box<dyn PolicyRepository> {
    async fn load_working(&self) -> Result<FireSet> {
        (**self).load_working().await
    }

    async fn store_working(&self, set: &FireSet) -> Result<()> {
        (**self).store_working(set).await
    }

    async fn commit(&self, set: &FireSet, author: &str, message: &str) -> Result<CommitInfo> {
        (**self).commit(set, author, message).await
    }

    async fn load_commit(&self, commit_id: &str) -> Result<FireSet> {
        (**self).load_commit(commit_id).await
    }

    async fn log(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        (**self).log(limit).await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// File name holding a table inside the repository.
#[must_use]
pub fn table_file(kind: TableKind) -> String {
    format!("{}.jsonl", kind.as_str())
}

fn encode_table<E: Entity>(table: &Table<E>) -> Result<String> {
    let mut out = String::new();
    for row in table.rows() {
        let line = serde_json::to_string(row).map_err(|e| {
            StoreError::corrupted(format!("Failed to encode {} row {}: {e}", E::KIND, row.rid))
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn decode_table<E: Entity>(text: &str) -> Result<Table<E>> {
    let mut rows: Vec<Row<E>> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row: Row<E> = serde_json::from_str(line).map_err(|e| {
            StoreError::corrupted(format!("{} line {}: {e}", table_file(E::KIND), idx + 1))
        })?;
        if rows.iter().any(|r| r.rid == row.rid) {
            return Err(StoreError::corrupted(format!(
                "{} line {}: duplicate rid {}",
                table_file(E::KIND),
                idx + 1,
                row.rid
            ))
            .into());
        }
        rows.push(row);
    }
    Ok(Table::from_rows(rows))
}

/// Encodes every table of a snapshot, in storage order.
///
/// # Errors
///
/// Returns an error if a record cannot be serialized.
pub fn encode_fireset(set: &FireSet) -> Result<Vec<(TableKind, String)>> {
    Ok(vec![
        (TableKind::Hosts, encode_table(&set.hosts)?),
        (TableKind::Networks, encode_table(&set.networks)?),
        (TableKind::HostGroups, encode_table(&set.hostgroups)?),
        (TableKind::Services, encode_table(&set.services)?),
        (TableKind::Rules, encode_table(&set.rules)?),
    ])
}

/// Decodes a snapshot from per-table file contents.
///
/// A table whose content is `None` is empty.
///
/// # Errors
///
/// Returns a corruption error naming the file and line that failed.
pub fn decode_fireset(mut content: impl FnMut(TableKind) -> Option<String>) -> Result<FireSet> {
    let mut text = |kind| content(kind).unwrap_or_default();
    Ok(FireSet {
        hosts: decode_table::<Host>(&text(TableKind::Hosts))?,
        networks: decode_table::<Network>(&text(TableKind::Networks))?,
        hostgroups: decode_table::<HostGroup>(&text(TableKind::HostGroups))?,
        services: decode_table::<Service>(&text(TableKind::Services))?,
        rules: decode_table::<Rule>(&text(TableKind::Rules))?,
    })
}
