//! Operator-facing pipeline: the save → check → deploy workflow.
//!
//! [`Pipeline`] ties the entity store, the check engine and the deployer
//! together behind role-gated operations, and reports progress to the
//! injected [`MessageLog`].

use std::sync::Arc;

use tracing::debug;

use crate::access::{ActionClass, Session};
use crate::check::{CheckEngine, CheckReport};
use crate::compiler::CompiledPolicy;
use crate::deploy::{DeployReport, Deployer};
use crate::error::{FireletError, Result};
use crate::messages::MessageLog;
use crate::model::{Entity, Rid};
use crate::store::{CommitInfo, EntityStore, Record, VersionDiff};

/// Role-gated facade over the policy lifecycle.
#[derive(Debug)]
pub struct Pipeline {
    store: Arc<EntityStore>,
    check: CheckEngine,
    deployer: Deployer,
    messages: MessageLog,
}

impl Pipeline {
    /// Assembles a pipeline.
    #[must_use]
    pub const fn new(
        store: Arc<EntityStore>,
        check: CheckEngine,
        deployer: Deployer,
        messages: MessageLog,
    ) -> Self {
        Self {
            store,
            check,
            deployer,
            messages,
        }
    }

    /// The underlying entity store.
    #[must_use]
    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// The operator message log.
    #[must_use]
    pub const fn messages(&self) -> &MessageLog {
        &self.messages
    }

    /// Records a failure as an alert and passes it on.
    fn report<T>(&self, action: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.messages.alert(format!("Unable to {action}: {e}"));
        }
        result
    }

    /// Lists a table.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientRole` if the session may not read.
    pub async fn list<E: Entity>(&self, session: &Session) -> Result<Vec<Record<E>>> {
        session.require(ActionClass::Read)?;
        Ok(self.store.list::<E>().await)
    }

    /// Fetches one record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rid.
    pub async fn fetch<E: Entity>(&self, session: &Session, rid: Rid) -> Result<Record<E>> {
        session.require(ActionClass::Read)?;
        self.store.fetch(rid).await
    }

    /// Adds a record.
    ///
    /// # Errors
    ///
    /// Returns a validation or naming error from the store.
    pub async fn add<E: Entity>(&self, session: &Session, fields: E) -> Result<Rid> {
        session.require(ActionClass::Edit)?;
        let name = fields.name();
        let rid = self.report("add", self.store.add(fields).await)?;
        self.messages
            .success(format!("{} {name} added.", capitalized(E::KIND.singular())));
        Ok(rid)
    }

    /// Updates a record under its token.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` for a stale token, or a validation error.
    pub async fn update<E: Entity>(
        &self,
        session: &Session,
        rid: Rid,
        fields: E,
        token: &str,
    ) -> Result<String> {
        session.require(ActionClass::Edit)?;
        let name = fields.name();
        let token = self.report("update", self.store.update(rid, fields, token).await)?;
        self.messages
            .success(format!("{} {name} updated.", capitalized(E::KIND.singular())));
        Ok(token)
    }

    /// Deletes a record under its token.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` for a stale token or `Referential` if the record
    /// is still referenced.
    pub async fn delete<E: Entity>(&self, session: &Session, rid: Rid, token: &str) -> Result<()> {
        session.require(ActionClass::Edit)?;
        self.report("delete", self.store.delete::<E>(rid, token).await)?;
        self.messages.success(format!(
            "{} {rid} deleted.",
            capitalized(E::KIND.singular())
        ));
        Ok(())
    }

    /// Enables a rule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rid.
    pub async fn enable(&self, session: &Session, rid: Rid) -> Result<()> {
        session.require(ActionClass::Edit)?;
        self.report("enable rule", self.store.enable(rid).await)
    }

    /// Disables a rule.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rid.
    pub async fn disable(&self, session: &Session, rid: Rid) -> Result<()> {
        session.require(ActionClass::Edit)?;
        self.report("disable rule", self.store.disable(rid).await)
    }

    /// Moves a rule one position up.
    ///
    /// # Errors
    ///
    /// Returns a validation error for the first rule.
    pub async fn moveup(&self, session: &Session, rid: Rid) -> Result<()> {
        session.require(ActionClass::Edit)?;
        self.report("move rule", self.store.moveup(rid).await)
    }

    /// Moves a rule one position down.
    ///
    /// # Errors
    ///
    /// Returns a validation error for the last rule.
    pub async fn movedown(&self, session: &Session, rid: Rid) -> Result<()> {
        session.require(ActionClass::Edit)?;
        self.report("move rule", self.store.movedown(rid).await)
    }

    /// Commits the working state, authored by the session user.
    ///
    /// # Errors
    ///
    /// Returns `NothingToSave` if there are no uncommitted changes.
    pub async fn save(&self, session: &Session, message: &str) -> Result<CommitInfo> {
        session.require(ActionClass::Edit)?;
        if self.store.save_needed().await {
            self.messages
                .info(format!("Commit msg: \"{message}\". Saving configuration..."));
        } else {
            self.messages.warning("Save not needed.");
        }
        let commit = self.report("save", self.store.save(&session.user, message).await)?;
        self.messages
            .success(format!("Configuration saved: \"{message}\""));
        Ok(commit)
    }

    /// Discards uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be written.
    pub async fn reset(&self, session: &Session) -> Result<()> {
        session.require(ActionClass::Edit)?;
        if !self.store.save_needed().await {
            self.messages.warning("Reset not needed.");
            return Ok(());
        }
        self.messages.info("Resetting configuration changes...");
        self.report("reset", self.store.reset().await)?;
        self.messages.success("Configuration reset.");
        Ok(())
    }

    /// Returns true if there are uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientRole` if the session may not read.
    pub async fn save_needed(&self, session: &Session) -> Result<bool> {
        session.require(ActionClass::Read)?;
        Ok(self.store.save_needed().await)
    }

    /// Commit history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository log cannot be read.
    pub async fn version_list(
        &self,
        session: &Session,
        limit: Option<usize>,
    ) -> Result<Vec<CommitInfo>> {
        session.require(ActionClass::Read)?;
        self.store.version_list(limit).await
    }

    /// Record changes introduced by a commit.
    ///
    /// # Errors
    ///
    /// Returns `CommitNotFound` for an unknown reference.
    pub async fn version_diff(&self, session: &Session, reference: &str) -> Result<VersionDiff> {
        session.require(ActionClass::Read)?;
        self.store.version_diff(reference).await
    }

    /// Rolls back to an earlier commit by id or offset.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientRole` unless the session is admin, or
    /// `CommitNotFound` for an unknown reference.
    pub async fn rollback(&self, session: &Session, reference: &str) -> Result<CommitInfo> {
        session.require(ActionClass::Admin)?;
        let commit = self.report(
            "roll back",
            self.store.rollback(reference, &session.user).await,
        )?;
        self.messages
            .success(format!("Configuration rolled back: {}", commit.message));
        Ok(commit)
    }

    /// Compiles the working state without diffing or deploying.
    ///
    /// # Errors
    ///
    /// Returns an `Alert` wrapping the `CompileError`.
    pub async fn compile(&self, session: &Session) -> Result<CompiledPolicy> {
        session.require(ActionClass::Read)?;
        let working = self.store.working().await;
        self.check.compile(&working).inspect_err(|e| {
            self.messages.alert(e.to_string());
        })
    }

    /// Diffs the compiled working state against the deployed baseline.
    ///
    /// # Errors
    ///
    /// Returns an `Alert` if compilation fails.
    pub async fn check(&self, session: &Session) -> Result<CheckReport> {
        session.require(ActionClass::Read)?;
        self.messages.info("Configuration check started...");

        let baseline = self.deployer.baseline().load().await?;
        let working = self.store.working().await;
        match self.check.check(&working, &baseline.rulesets) {
            Ok(report) => {
                debug!(
                    "Check found {} changed hosts",
                    report.changed_hosts().count()
                );
                self.messages.success("Configuration check successful.");
                Ok(report)
            }
            Err(e) => {
                self.messages.alert(e.to_string());
                Err(e)
            }
        }
    }

    /// Deploys the working state to the fleet.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientRole` unless the session is admin, an `Alert` if
    /// compilation fails, or an error if the baseline cannot be written.
    /// Per-host failures are reported in the returned [`DeployReport`].
    pub async fn deploy(&self, session: &Session) -> Result<DeployReport> {
        session.require(ActionClass::Admin)?;
        self.messages.info("Configuration deployment started...");
        self.messages.info("Compiling firewall rules...");

        let working = self.store.working().await;
        let report = self.deployer.deploy(&working).await.inspect_err(|e| {
            let message = match e {
                FireletError::Alert { source, .. } => format!("Compilation failed: {source}"),
                other => other.to_string(),
            };
            self.messages.alert(message);
        })?;

        if report.success {
            self.messages.success("Configuration deployed.");
        } else {
            for alert in report.alerts() {
                self.messages.alert(alert);
            }
            self.messages.warning(format!(
                "Configuration deployed to {} of {} hosts.",
                report.applied().count(),
                report.outcomes.len()
            ));
        }
        Ok(report)
    }
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::access::Role;
    use crate::compiler::RuleCompiler;
    use crate::deploy::{DeployedStore, HostTransport};
    use crate::error::DeployError;
    use crate::messages::MessageLevel;
    use crate::model::Host;
    use crate::store::MemoryRepository;

    struct AlwaysApplies;

    #[async_trait]
    impl HostTransport for AlwaysApplies {
        async fn apply(
            &self,
            _hostname: &str,
            _address: Ipv4Addr,
            _ruleset: &str,
        ) -> std::result::Result<(), DeployError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "test"
        }
    }

    async fn pipeline(dir: &TempDir) -> Pipeline {
        let repo = Arc::new(MemoryRepository::new());
        let store = EntityStore::open(repo).await.expect("open");
        Pipeline::new(
            Arc::new(store),
            CheckEngine::default(),
            Deployer::new(
                RuleCompiler::default(),
                Arc::new(AlwaysApplies),
                DeployedStore::in_dir(dir.path()),
            ),
            MessageLog::new(20),
        )
    }

    fn host() -> Host {
        Host {
            hostname: String::from("fw"),
            iface: String::from("eth0"),
            ip_addr: Ipv4Addr::new(10, 0, 0, 1),
            masklen: 24,
            local_fw: true,
            network_fw: false,
            mng: true,
            routed: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_roles_gate_operations() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let pipeline = pipeline(&temp).await;
        let reader = Session::new("ro", Role::Readonly);
        let editor = Session::new("ed", Role::Editor);

        assert!(pipeline.add(&reader, host()).await.is_err());
        pipeline.add(&editor, host()).await.expect("editor may add");
        pipeline.save(&editor, "first").await.expect("editor may save");

        assert!(pipeline.deploy(&editor).await.is_err());
        assert!(pipeline.rollback(&editor, "0").await.is_err());
        assert!(pipeline.check(&reader).await.is_ok());
    }

    #[tokio::test]
    async fn test_messages_follow_workflow() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let pipeline = pipeline(&temp).await;
        let admin = Session::new("admin", Role::Admin);

        pipeline.add(&admin, host()).await.expect("add");
        pipeline.save(&admin, "add fw").await.expect("save");
        pipeline.check(&admin).await.expect("check");
        let report = pipeline.deploy(&admin).await.expect("deploy");
        assert!(report.success);

        let log = pipeline.messages().snapshot();
        let last = log.last().expect("messages");
        assert_eq!(last.level, MessageLevel::Success);
        assert_eq!(last.text, "Configuration deployed.");
        assert!(log.iter().any(|m| m.text == "Configuration check successful."));

        let after = pipeline.check(&admin).await.expect("check");
        assert!(after.is_clean());
    }

    #[tokio::test]
    async fn test_store_errors_become_alerts() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let pipeline = pipeline(&temp).await;
        let admin = Session::new("admin", Role::Admin);

        let rid = pipeline.add(&admin, host()).await.expect("add");
        let err = pipeline
            .delete::<Host>(&admin, rid, "stale")
            .await
            .expect_err("stale token");
        assert!(err.is_conflict());

        let last = pipeline.messages().snapshot().pop().expect("message");
        assert_eq!(last.level, MessageLevel::Alert);
        assert!(last.text.starts_with("Unable to delete:"));
    }
}
