//! The versioned entity store.
//!
//! Holds two tiers: the last committed snapshot and the mutable working
//! overlay. Every mutation is applied to a copy of the working state, made
//! durable through the repository, and only then swapped in, so a failed
//! call leaves the working state untouched. A single `RwLock` serializes
//! writers, which also makes `save` and `reset` exclusive with record edits.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::repository::{CommitInfo, PolicyRepository};
use super::token::TokenHasher;
use crate::error::{Result, StoreError};
use crate::model::{
    Entity, FireSet, Host, HostGroup, Network, Rid, Rule, Service, TableKind,
};

/// Longest reference treated as an offset from head rather than a commit id.
const MAX_OFFSET_DIGITS: usize = 6;

/// A record as exposed to callers: fields plus rid and token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record<E> {
    /// Row id.
    pub rid: Rid,
    /// Concurrency token for the current content.
    pub token: String,
    /// Record fields.
    #[serde(flatten)]
    pub fields: E,
}

/// How a record differs between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Present only in the newer snapshot.
    Added,
    /// Present only in the older snapshot.
    Removed,
    /// Present in both with different content.
    Modified,
}

/// One changed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordChange {
    /// Table of the record.
    pub table: TableKind,
    /// Row id.
    pub rid: Rid,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Reference name of the record (new name when modified).
    pub name: String,
}

/// Differences introduced by a commit relative to its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionDiff {
    /// The inspected commit.
    pub commit_id: String,
    /// Its predecessor, if any.
    pub parent_id: Option<String>,
    /// Changed records, grouped by table in storage order.
    pub changes: Vec<RecordChange>,
}

impl VersionDiff {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Computes the record-level differences between two snapshots.
    #[must_use]
    pub fn between(older: &FireSet, newer: &FireSet) -> Vec<RecordChange> {
        let mut changes = Vec::new();
        diff_table::<Host>(older, newer, &mut changes);
        diff_table::<Network>(older, newer, &mut changes);
        diff_table::<HostGroup>(older, newer, &mut changes);
        diff_table::<Service>(older, newer, &mut changes);
        diff_table::<Rule>(older, newer, &mut changes);
        changes
    }
}

fn diff_table<E: Entity>(older: &FireSet, newer: &FireSet, out: &mut Vec<RecordChange>) {
    let old = older.keyed::<E>();
    let new = newer.keyed::<E>();
    let rids: BTreeSet<Rid> = old.keys().chain(new.keys()).copied().collect();

    for rid in rids {
        let change = match (old.get(&rid), new.get(&rid)) {
            (None, Some(added)) => Some((ChangeKind::Added, added.name())),
            (Some(removed), None) => Some((ChangeKind::Removed, removed.name())),
            (Some(before), Some(after)) if before != after => {
                Some((ChangeKind::Modified, after.name()))
            }
            _ => None,
        };
        if let Some((kind, name)) = change {
            out.push(RecordChange {
                table: E::KIND,
                rid,
                kind,
                name,
            });
        }
    }
}

#[derive(Debug)]
struct Tiers {
    committed: FireSet,
    working: FireSet,
}

/// Durable, versioned storage of the five policy tables.
pub struct EntityStore {
    repo: Arc<dyn PolicyRepository>,
    tiers: RwLock<Tiers>,
    tokens: TokenHasher,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("backend", &self.repo.backend_type())
            .finish_non_exhaustive()
    }
}

impl EntityStore {
    /// Opens the store on top of a repository.
    ///
    /// The committed tier is the repository head (empty if there are no
    /// commits yet); the working tier is whatever the repository holds as
    /// uncommitted state.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be read.
    pub async fn open(repo: Arc<dyn PolicyRepository>) -> Result<Self> {
        let committed = match repo.log(Some(1)).await?.first() {
            Some(head) => repo.load_commit(&head.commit_id).await?,
            None => FireSet::new(),
        };
        let working = repo.load_working().await?;

        info!(
            "Opened {} policy store ({} rules, {} hosts)",
            repo.backend_type(),
            working.rules.len(),
            working.hosts.len()
        );

        Ok(Self {
            repo,
            tiers: RwLock::new(Tiers { committed, working }),
            tokens: TokenHasher::new(),
        })
    }

    /// Gets the backend type name.
    #[must_use]
    pub fn backend_type(&self) -> &'static str {
        self.repo.backend_type()
    }

    /// Returns a copy of the working state.
    pub async fn working(&self) -> FireSet {
        self.tiers.read().await.working.clone()
    }

    /// Returns a copy of the last committed state.
    pub async fn committed(&self) -> FireSet {
        self.tiers.read().await.committed.clone()
    }

    fn record<E: Entity>(&self, rid: Rid, fields: &E) -> Record<E> {
        Record {
            rid,
            token: self.tokens.token(fields),
            fields: fields.clone(),
        }
    }

    fn not_found<E: Entity>(rid: Rid) -> StoreError {
        StoreError::NotFound {
            table: E::KIND.to_string(),
            rid,
        }
    }

    /// Fetches one record with its current token.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the rid is absent.
    pub async fn fetch<E: Entity>(&self, rid: Rid) -> Result<Record<E>> {
        let tiers = self.tiers.read().await;
        let fields = E::table(&tiers.working)
            .get(rid)
            .ok_or_else(|| Self::not_found::<E>(rid))?;
        Ok(self.record(rid, fields))
    }

    /// Lists a table in table order.
    pub async fn list<E: Entity>(&self) -> Vec<Record<E>> {
        let tiers = self.tiers.read().await;
        E::table(&tiers.working)
            .rows()
            .iter()
            .map(|row| self.record(row.rid, &row.record))
            .collect()
    }

    /// Applies `change` to a copy of the working state, persists it and
    /// swaps it in.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut FireSet) -> std::result::Result<T, StoreError>,
    ) -> Result<T> {
        let mut tiers = self.tiers.write().await;
        let mut next = tiers.working.clone();
        let out = change(&mut next)?;
        self.repo.store_working(&next).await?;
        tiers.working = next;
        Ok(out)
    }

    fn check_token<E: Entity>(&self, set: &FireSet, rid: Rid, token: &str) -> std::result::Result<(), StoreError> {
        let current = E::table(set)
            .get(rid)
            .ok_or_else(|| Self::not_found::<E>(rid))?;
        if TokenHasher::tokens_match(token, &self.tokens.token(current)) {
            Ok(())
        } else {
            warn!("Stale token for {} rid {rid}", E::KIND);
            Err(StoreError::Conflict {
                table: E::KIND.to_string(),
                rid,
            })
        }
    }

    /// Adds a record and returns its rid.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the record breaks an invariant.
    pub async fn add<E: Entity>(&self, fields: E) -> Result<Rid> {
        let name = fields.name();
        let rid = self.mutate(|set| set.insert(fields)).await?;
        info!("Added {} '{name}' as rid {rid}", E::KIND.singular());
        Ok(rid)
    }

    /// Replaces a record, guarded by the token the caller last saw.
    ///
    /// Returns the token of the new content.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Conflict` on a stale token, `Referential` when
    /// renaming a referenced record, or a validation error.
    pub async fn update<E: Entity>(&self, rid: Rid, fields: E, token: &str) -> Result<String> {
        let new_token = self.tokens.token(&fields);
        self.mutate(|set| {
            self.check_token::<E>(set, rid, token)?;
            set.replace(rid, fields).map(|_| ())
        })
        .await?;
        info!("Updated {} rid {rid}", E::KIND.singular());
        Ok(new_token)
    }

    /// Deletes a record, guarded by the token the caller last saw.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Conflict` on a stale token, or `Referential` if
    /// other records still reference it.
    pub async fn delete<E: Entity>(&self, rid: Rid, token: &str) -> Result<()> {
        let removed = self
            .mutate(|set| {
                self.check_token::<E>(set, rid, token)?;
                set.remove::<E>(rid)
            })
            .await?;
        info!("Deleted {} '{}' (rid {rid})", E::KIND.singular(), removed.name());
        Ok(())
    }

    async fn set_enabled(&self, rid: Rid, enabled: bool) -> Result<()> {
        self.mutate(|set| {
            let rule = set
                .rules
                .get_mut(rid)
                .ok_or_else(|| Self::not_found::<Rule>(rid))?;
            rule.enabled = enabled;
            Ok(())
        })
        .await?;
        info!(
            "Rule rid {rid} {}",
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Enables a rule. Enabling an enabled rule is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the rule is absent.
    pub async fn enable(&self, rid: Rid) -> Result<()> {
        self.set_enabled(rid, true).await
    }

    /// Disables a rule without changing its position.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the rule is absent.
    pub async fn disable(&self, rid: Rid) -> Result<()> {
        self.set_enabled(rid, false).await
    }

    async fn shift(&self, rid: Rid, up: bool) -> Result<()> {
        self.mutate(|set| {
            let pos = set
                .rules
                .position(rid)
                .ok_or_else(|| Self::not_found::<Rule>(rid))?;
            let target = if up {
                pos.checked_sub(1)
            } else {
                Some(pos + 1).filter(|next| *next < set.rules.len())
            };
            let Some(target) = target else {
                let edge = if up { "first" } else { "last" };
                return Err(StoreError::validation(
                    TableKind::Rules.as_str(),
                    "position",
                    format!("rule {rid} is already the {edge} in the chain"),
                ));
            };
            set.rules.swap(pos, target);
            Ok(())
        })
        .await?;
        debug!("Moved rule rid {rid} {}", if up { "up" } else { "down" });
        Ok(())
    }

    /// Moves a rule one position earlier in the chain.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or a validation error for the first rule.
    pub async fn moveup(&self, rid: Rid) -> Result<()> {
        self.shift(rid, true).await
    }

    /// Moves a rule one position later in the chain.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, or a validation error for the last rule.
    pub async fn movedown(&self, rid: Rid) -> Result<()> {
        self.shift(rid, false).await
    }

    /// Commits the working state.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a blank message, `NothingToSave` if
    /// the working state equals the last commit, or a repository error.
    pub async fn save(&self, author: &str, message: &str) -> Result<CommitInfo> {
        if message.trim().is_empty() {
            return Err(StoreError::validation("commits", "message", "must not be empty").into());
        }
        let mut tiers = self.tiers.write().await;
        if tiers.working == tiers.committed {
            return Err(StoreError::NothingToSave.into());
        }

        let info = self.repo.commit(&tiers.working, author, message).await?;
        tiers.committed = tiers.working.clone();
        info!("Saved {} by {author}: {message}", info.short_id());
        Ok(info)
    }

    /// Discards uncommitted changes. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the restored state cannot be persisted.
    pub async fn reset(&self) -> Result<()> {
        let mut tiers = self.tiers.write().await;
        self.repo.store_working(&tiers.committed).await?;
        tiers.working = tiers.committed.clone();
        info!("Working state reset to last commit");
        Ok(())
    }

    /// Returns true if the working state differs from the last commit.
    pub async fn save_needed(&self) -> bool {
        let tiers = self.tiers.read().await;
        tiers.working != tiers.committed
    }

    /// Lists commits, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository log cannot be read.
    pub async fn version_list(&self, limit: Option<usize>) -> Result<Vec<CommitInfo>> {
        self.repo.log(limit).await
    }

    /// Resolves a commit id, id prefix, or offset from head (`0` = head).
    async fn resolve(&self, reference: &str) -> Result<(usize, Vec<CommitInfo>)> {
        let history = self.repo.log(None).await?;
        let reference = reference.trim();

        let index = if !reference.is_empty()
            && reference.len() <= MAX_OFFSET_DIGITS
            && reference.bytes().all(|b| b.is_ascii_digit())
        {
            reference
                .parse::<usize>()
                .ok()
                .filter(|n| *n < history.len())
        } else if reference.is_empty() {
            None
        } else {
            history
                .iter()
                .position(|c| c.commit_id.starts_with(reference))
        };

        match index {
            Some(index) => Ok((index, history)),
            None => Err(StoreError::CommitNotFound {
                reference: reference.to_string(),
            }
            .into()),
        }
    }

    /// Diffs a commit against its predecessor.
    ///
    /// The diff is empty for the first commit.
    ///
    /// # Errors
    ///
    /// Returns `CommitNotFound` if the reference does not resolve.
    pub async fn version_diff(&self, reference: &str) -> Result<VersionDiff> {
        let (index, history) = self.resolve(reference).await?;
        let commit = &history[index];

        let Some(parent) = history.get(index + 1) else {
            return Ok(VersionDiff {
                commit_id: commit.commit_id.clone(),
                parent_id: None,
                changes: Vec::new(),
            });
        };

        let newer = self.repo.load_commit(&commit.commit_id).await?;
        let older = self.repo.load_commit(&parent.commit_id).await?;
        Ok(VersionDiff {
            commit_id: commit.commit_id.clone(),
            parent_id: Some(parent.commit_id.clone()),
            changes: VersionDiff::between(&older, &newer),
        })
    }

    /// Restores the content of an earlier commit as a new commit.
    ///
    /// History is never rewritten. Uncommitted edits are discarded.
    ///
    /// # Errors
    ///
    /// Returns `CommitNotFound` if the reference does not resolve.
    pub async fn rollback(&self, reference: &str, author: &str) -> Result<CommitInfo> {
        let (index, history) = self.resolve(reference).await?;
        let target = &history[index];
        let snapshot = self.repo.load_commit(&target.commit_id).await?;

        let mut tiers = self.tiers.write().await;
        if tiers.working != tiers.committed {
            warn!("Rollback discards uncommitted changes");
        }
        let message = format!("Rollback to {}", target.short_id());
        let info = self.repo.commit(&snapshot, author, &message).await?;
        tiers.committed = snapshot.clone();
        tiers.working = snapshot;
        info!("Rolled back to {} as {}", target.short_id(), info.short_id());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::model::{Action, Protocol};
    use crate::store::MemoryRepository;

    async fn create_test_store() -> EntityStore {
        EntityStore::open(Arc::new(MemoryRepository::new()))
            .await
            .expect("Failed to open store")
    }

    fn network(name: &str, third: u8) -> Network {
        Network {
            name: name.to_string(),
            ip_addr: Ipv4Addr::new(10, 0, third, 0),
            masklen: 24,
        }
    }

    fn rule(name: &str, src: &str) -> Rule {
        Rule {
            name: name.to_string(),
            src: src.to_string(),
            src_serv: String::from("*"),
            dst: String::from("*"),
            dst_serv: String::from("*"),
            action: Action::Accept,
            log_level: None,
            desc: String::new(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_add_then_fetch() {
        let store = create_test_store().await;
        let svc = Service {
            name: String::from("ssh"),
            protocol: Protocol::Tcp,
            ports: String::from("22"),
        };

        let rid = store.add(svc.clone()).await.expect("add");
        let record = store.fetch::<Service>(rid).await.expect("fetch");

        assert_eq!(record.rid, rid);
        assert_eq!(record.fields, svc);
        assert_eq!(record.token, TokenHasher::new().token(&svc));
    }

    #[tokio::test]
    async fn test_stale_token_conflicts() {
        let store = create_test_store().await;
        let rid = store.add(network("lan", 0)).await.expect("add");

        let token_a = store.fetch::<Network>(rid).await.expect("fetch").token;
        let token_b = token_a.clone();

        let fresh = store
            .update(rid, network("lan", 1), &token_a)
            .await
            .expect("first writer wins");

        let err = store
            .update(rid, network("lan", 2), &token_b)
            .await
            .expect_err("second writer has a stale token");
        assert!(err.is_conflict());

        store
            .update(rid, network("lan", 2), &fresh)
            .await
            .expect("latest token succeeds");
    }

    #[tokio::test]
    async fn test_delete_referenced_then_unreferenced() {
        let store = create_test_store().await;
        let lan = store.add(network("lan", 0)).await.expect("add network");
        let r1 = store.add(rule("r1", "lan")).await.expect("add rule");

        let token = store.fetch::<Network>(lan).await.expect("fetch").token;
        let err = store.delete::<Network>(lan, &token).await.expect_err("referenced");
        assert!(err.is_referential());

        let rule_token = store.fetch::<Rule>(r1).await.expect("fetch").token;
        store.delete::<Rule>(r1, &rule_token).await.expect("delete rule");
        store.delete::<Network>(lan, &token).await.expect("delete network");

        let err = store.fetch::<Network>(lan).await.expect_err("gone");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failed_call_leaves_working_state_intact() {
        let store = create_test_store().await;
        store.add(network("lan", 0)).await.expect("add");
        let before = store.working().await;

        assert!(store.add(rule("r1", "nowhere")).await.is_err());
        assert_eq!(store.working().await, before);
    }

    #[tokio::test]
    async fn test_save_reset_and_save_needed() {
        let store = create_test_store().await;
        assert!(!store.save_needed().await);

        store.add(network("lan", 0)).await.expect("add");
        assert!(store.save_needed().await);
        store.save("alice", "Add lan").await.expect("save");
        assert!(!store.save_needed().await);

        store.add(network("dmz", 1)).await.expect("add");
        let err = store.save("alice", "  ").await.expect_err("blank message");
        assert!(err.is_validation());
        assert!(store.save_needed().await);
        store.reset().await.expect("reset");

        let err = store.save("alice", "again").await.expect_err("nothing to save");
        assert!(matches!(
            err,
            crate::error::FireletError::Store(StoreError::NothingToSave)
        ));

        let committed = store.committed().await;
        store.add(network("dmz", 1)).await.expect("add");
        let rid = store.add(rule("r1", "dmz")).await.expect("add");
        store.disable(rid).await.expect("disable");
        assert!(store.save_needed().await);

        store.reset().await.expect("reset");
        assert!(!store.save_needed().await);
        assert_eq!(store.working().await, committed);
        store.reset().await.expect("reset is idempotent");
    }

    #[tokio::test]
    async fn test_chain_operations() {
        let store = create_test_store().await;
        let r1 = store.add(rule("r1", "*")).await.expect("add");
        let r2 = store.add(rule("r2", "*")).await.expect("add");

        store.disable(r1).await.expect("first rule can be disabled");
        assert!(!store.fetch::<Rule>(r1).await.expect("fetch").fields.enabled);
        store.enable(r1).await.expect("enable");
        store.enable(r1).await.expect("enable twice");

        assert!(store.moveup(r1).await.expect_err("already first").is_validation());
        assert!(store.movedown(r2).await.expect_err("already last").is_validation());

        store.movedown(r1).await.expect("move down");
        let order: Vec<Rid> = store.list::<Rule>().await.iter().map(|r| r.rid).collect();
        assert_eq!(order, vec![r2, r1]);

        store.moveup(r1).await.expect("move up");
        let order: Vec<Rid> = store.list::<Rule>().await.iter().map(|r| r.rid).collect();
        assert_eq!(order, vec![r1, r2]);
    }

    #[tokio::test]
    async fn test_version_diff() {
        let store = create_test_store().await;
        let lan = store.add(network("lan", 0)).await.expect("add");
        let first = store.save("alice", "Add lan").await.expect("save");

        let token = store.fetch::<Network>(lan).await.expect("fetch").token;
        store.update(lan, network("lan", 5), &token).await.expect("update");
        store.add(network("dmz", 1)).await.expect("add");
        let second = store.save("bob", "Move lan, add dmz").await.expect("save");

        let diff = store.version_diff(&second.commit_id).await.expect("diff");
        assert_eq!(diff.parent_id.as_deref(), Some(first.commit_id.as_str()));
        let kinds: Vec<_> = diff.changes.iter().map(|c| (c.name.as_str(), c.kind)).collect();
        assert_eq!(kinds, vec![("lan", ChangeKind::Modified), ("dmz", ChangeKind::Added)]);

        let oldest = store.version_diff(&first.commit_id).await.expect("diff");
        assert!(oldest.is_empty());
        assert!(oldest.parent_id.is_none());
    }

    #[tokio::test]
    async fn test_rollback_is_a_new_commit() {
        let store = create_test_store().await;
        store.add(network("lan", 0)).await.expect("add");
        let first = store.save("alice", "Add lan").await.expect("save");
        let first_content = store.committed().await;

        store.add(network("dmz", 1)).await.expect("add");
        store.save("alice", "Add dmz").await.expect("save");
        store.add(network("wan", 2)).await.expect("uncommitted edit");

        let rollback = store.rollback("1", "admin").await.expect("rollback");

        let log = store.version_list(None).await.expect("log");
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].commit_id, rollback.commit_id);
        assert_eq!(log[2].commit_id, first.commit_id);
        assert_eq!(store.working().await, first_content);
        assert!(!store.save_needed().await);

        let err = store.rollback("42", "admin").await.expect_err("no such offset");
        assert!(err.is_not_found());
        let err = store.rollback("deadbeefcafe", "admin").await.expect_err("no such id");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_different_rids() {
        let store = Arc::new(create_test_store().await);
        let lan = store.add(network("lan", 0)).await.expect("add");
        let dmz = store.add(network("dmz", 1)).await.expect("add");
        let lan_token = store.fetch::<Network>(lan).await.expect("fetch").token;
        let dmz_token = store.fetch::<Network>(dmz).await.expect("fetch").token;

        let (first, second) = tokio::join!(
            store.update(lan, network("lan", 100), &lan_token),
            store.update(dmz, network("dmz", 101), &dmz_token),
        );
        first.expect("update lan");
        second.expect("update dmz");

        let mut tasks = tokio::task::JoinSet::new();
        for third in 10u8..30 {
            let store = Arc::clone(&store);
            tasks.spawn(async move { store.add(network(&format!("n{third}"), third)).await });
        }
        let mut rids = BTreeSet::new();
        while let Some(joined) = tasks.join_next().await {
            let rid = joined.expect("task").expect("add");
            assert!(rids.insert(rid), "rid {rid} assigned twice");
        }

        let networks = store.list::<Network>().await;
        assert_eq!(networks.len(), 22);
        assert_eq!(
            store.fetch::<Network>(lan).await.expect("fetch").fields,
            network("lan", 100)
        );
        assert_eq!(
            store.fetch::<Network>(dmz).await.expect("fetch").fields,
            network("dmz", 101)
        );
    }

    #[tokio::test]
    async fn test_save_and_reset_exclude_inflight_mutations() {
        let store = Arc::new(create_test_store().await);
        store.add(network("lan", 0)).await.expect("add");

        let (added, saved) = tokio::join!(
            store.add(network("dmz", 1)),
            store.save("alice", "Add lan"),
        );
        added.expect("add");
        saved.expect("save");
        let committed = store.committed().await;
        let dmz_committed = committed.networks.rows().len() == 2;
        assert_eq!(store.save_needed().await, !dmz_committed);
        assert_eq!(store.working().await.networks.rows().len(), 2);

        let (added, reset) = tokio::join!(store.add(network("wan", 2)), store.reset());
        added.expect("add");
        reset.expect("reset");
        let working = store.working().await;
        let wan_kept = working.networks.rows().iter().any(|row| row.record.name == "wan");
        let committed = store.committed().await;
        if wan_kept {
            assert_eq!(working.networks.rows().len(), committed.networks.rows().len() + 1);
        } else {
            assert_eq!(working, committed);
        }
    }
}
