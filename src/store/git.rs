//! Git-backed policy repository.
//!
//! The working tree holds the uncommitted working state as one `.jsonl`
//! file per table; every save or rollback is one git commit. The `git`
//! binary is driven through `tokio::process`, so the repository stays
//! usable with the usual git tooling for audits.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::repository::{
    decode_fireset, encode_fireset, table_file, CommitInfo, PolicyRepository,
};
use crate::error::{FireletError, Result, StoreError};
use crate::model::{FireSet, TableKind};

/// Identity recorded as committer.
const COMMITTER: &str = "firelet";

/// Field separator used in `git log` output.
const FIELD_SEP: char = '\u{1f}';

/// Record separator used in `git log` output.
const RECORD_SEP: char = '\u{1e}';

/// A policy repository stored in a git working tree.
#[derive(Debug, Clone)]
pub struct GitRepository {
    /// Repository directory.
    dir: PathBuf,
}

impl GitRepository {
    /// Opens a repository at `dir`, initializing it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or `git init`
    /// fails.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let repo = Self { dir: dir.into() };

        if !repo.dir.exists() {
            debug!("Creating repository directory: {}", repo.dir.display());
            fs::create_dir_all(&repo.dir).await.map_err(|e| {
                StoreError::repository(format!(
                    "Failed to create {}: {e}",
                    repo.dir.display()
                ))
            })?;
        }

        if !repo.dir.join(".git").exists() {
            info!("Initializing policy repository in {}", repo.dir.display());
            repo.git(&["init", "-q"]).await?;
        }

        Ok(repo)
    }

    /// Repository directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Runs a git command in the repository and returns its stdout.
    async fn git(&self, args: &[&str]) -> Result<String> {
        debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| StoreError::repository(format!("Failed to run git: {e}")))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(StoreError::repository(format!(
                "git {} failed: {}",
                Self::subcommand(args),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
            .into())
        }
    }

    /// First argument that is neither an option nor an option value.
    fn subcommand<'a>(args: &[&'a str]) -> &'a str {
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match *arg {
                "-c" | "-C" => {
                    iter.next();
                }
                option if option.starts_with('-') => {}
                command => return command,
            }
        }
        ""
    }

    async fn has_commits(&self) -> bool {
        self.git(&["rev-parse", "--verify", "-q", "HEAD"]).await.is_ok()
    }

    /// Resolves a commit id or prefix to a full id.
    async fn resolve(&self, commit_id: &str) -> Result<String> {
        let spec = format!("{commit_id}^{{commit}}");
        self.git(&["rev-parse", "--verify", "-q", &spec])
            .await
            .map(|out| out.trim().to_string())
            .map_err(|_| {
                StoreError::CommitNotFound {
                    reference: commit_id.to_string(),
                }
                .into()
            })
    }

    /// Writes a file via a temporary file and rename.
    async fn write_atomic(&self, name: &str, content: &str) -> Result<()> {
        let path = self.dir.join(name);
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StoreError::repository(format!("Failed to create {}: {e}", temp_path.display()))
        })?;
        file.write_all(content.as_bytes()).await.map_err(|e| {
            StoreError::repository(format!("Failed to write {}: {e}", temp_path.display()))
        })?;
        file.sync_all().await.map_err(|e| {
            StoreError::repository(format!("Failed to sync {}: {e}", temp_path.display()))
        })?;

        fs::rename(&temp_path, &path).await.map_err(|e| {
            StoreError::repository(format!("Failed to rename {}: {e}", path.display()))
        })?;
        Ok(())
    }

    fn parse_log(output: &str) -> Result<Vec<CommitInfo>> {
        output
            .split(RECORD_SEP)
            .map(str::trim)
            .filter(|record| !record.is_empty())
            .map(|record| {
                let fields: Vec<&str> = record.split(FIELD_SEP).collect();
                let [commit_id, author, date, message] = fields.as_slice() else {
                    return Err(FireletError::from(StoreError::corrupted(format!(
                        "Unexpected git log record: {record}"
                    ))));
                };
                let timestamp = DateTime::parse_from_rfc3339(date)
                    .map_err(|e| StoreError::corrupted(format!("Bad commit date '{date}': {e}")))?
                    .with_timezone(&Utc);
                Ok(CommitInfo {
                    commit_id: (*commit_id).to_string(),
                    author: (*author).to_string(),
                    timestamp,
                    message: (*message).to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl PolicyRepository for GitRepository {
    async fn load_working(&self) -> Result<FireSet> {
        let mut files = Vec::with_capacity(TableKind::ALL.len());
        for kind in TableKind::ALL {
            let path = self.dir.join(table_file(kind));
            let content = if path.exists() {
                Some(fs::read_to_string(&path).await.map_err(|e| {
                    StoreError::repository(format!("Failed to read {}: {e}", path.display()))
                })?)
            } else {
                None
            };
            files.push((kind, content));
        }

        decode_fireset(|kind| {
            files
                .iter()
                .find(|(k, _)| *k == kind)
                .and_then(|(_, content)| content.clone())
        })
    }

    async fn store_working(&self, set: &FireSet) -> Result<()> {
        for (kind, content) in encode_fireset(set)? {
            self.write_atomic(&table_file(kind), &content).await?;
        }
        debug!("Working state written to {}", self.dir.display());
        Ok(())
    }

    async fn commit(&self, set: &FireSet, author: &str, message: &str) -> Result<CommitInfo> {
        self.store_working(set).await?;

        let files: Vec<String> = TableKind::ALL.into_iter().map(table_file).collect();
        let mut add = vec!["add", "--"];
        add.extend(files.iter().map(String::as_str));
        self.git(&add).await?;

        let name = format!("user.name={COMMITTER}");
        let email = format!("user.email={COMMITTER}@localhost");
        let author_arg = format!("--author={author} <{author}@{COMMITTER}>");
        self.git(&[
            "-c",
            &name,
            "-c",
            &email,
            "commit",
            "-q",
            "--allow-empty",
            &author_arg,
            "-m",
            message,
        ])
        .await?;

        let mut head = self.log(Some(1)).await?;
        let info = head
            .pop()
            .ok_or_else(|| StoreError::repository("Commit did not produce a HEAD"))?;
        info!("Committed {} by {author}: {message}", info.short_id());
        Ok(info)
    }

    async fn load_commit(&self, commit_id: &str) -> Result<FireSet> {
        let full_id = self.resolve(commit_id).await?;
        let listing = self.git(&["ls-tree", "--name-only", &full_id]).await?;

        let mut files = Vec::with_capacity(TableKind::ALL.len());
        for kind in TableKind::ALL {
            let name = table_file(kind);
            if listing.lines().any(|line| line == name) {
                let object = format!("{full_id}:{name}");
                files.push((kind, self.git(&["show", &object]).await?));
            }
        }

        decode_fireset(|kind| {
            files
                .iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, content)| content.clone())
        })
    }

    async fn log(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        if !self.has_commits().await {
            return Ok(Vec::new());
        }

        let format = format!("--format=%H{FIELD_SEP}%an{FIELD_SEP}%aI{FIELD_SEP}%s{RECORD_SEP}");
        let count = limit.map(|n| format!("-n{n}"));
        let mut args = vec!["log", format.as_str()];
        if let Some(count) = &count {
            args.push(count);
        }
        let output = self.git(&args).await?;
        Self::parse_log(&output)
    }

    fn backend_type(&self) -> &'static str {
        "git"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log() {
        let output = "abc\u{1f}alice\u{1f}2024-05-01T10:00:00+02:00\u{1f}Add dmz\u{1e}\n\
                      def\u{1f}bob\u{1f}2024-04-30T09:00:00+00:00\u{1f}Initial\u{1e}\n";
        let log = GitRepository::parse_log(output).expect("parse");

        assert_eq!(log.len(), 2);
        assert_eq!(log[0].commit_id, "abc");
        assert_eq!(log[0].author, "alice");
        assert_eq!(log[0].message, "Add dmz");
        assert_eq!(log[0].timestamp.to_rfc3339(), "2024-05-01T08:00:00+00:00");
    }

    #[test]
    fn test_subcommand_skips_config_options() {
        let args = ["-c", "user.name=x", "-c", "user.email=y", "commit", "-q", "-m", "msg"];
        assert_eq!(GitRepository::subcommand(&args), "commit");
        assert_eq!(GitRepository::subcommand(&["rev-parse", "HEAD"]), "rev-parse");
        assert_eq!(GitRepository::subcommand(&[]), "");
    }

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success())
    }

    #[tokio::test]
    async fn test_commit_and_reload() {
        if !git_available() {
            return;
        }
        let temp = tempfile::TempDir::new().expect("Failed to create temp dir");
        let repo = GitRepository::open(temp.path().join("policy"))
            .await
            .expect("Failed to open repository");
        assert!(repo.log(None).await.expect("log").is_empty());

        let mut set = FireSet::new();
        set.networks.push(crate::model::Network {
            name: String::from("lan"),
            ip_addr: std::net::Ipv4Addr::new(10, 0, 0, 0),
            masklen: 8,
        });
        let first = repo.commit(&set, "alice", "Add lan").await.expect("commit");
        let second = repo.commit(&FireSet::new(), "bob", "Empty").await.expect("commit");

        let log = repo.log(None).await.expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].commit_id, second.commit_id);
        assert_eq!(log[1].author, "alice");

        assert_eq!(repo.load_commit(&first.commit_id).await.expect("load"), set);
        assert_eq!(repo.load_commit(first.short_id()).await.expect("load"), set);
        assert_eq!(repo.load_working().await.expect("working"), FireSet::new());
        assert!(repo.load_commit("feedface").await.is_err());
    }

    #[test]
    fn test_parse_log_rejects_garbage() {
        assert!(GitRepository::parse_log("only-one-field\u{1e}").is_err());
        assert!(GitRepository::parse_log("").expect("empty log").is_empty());
    }
}
