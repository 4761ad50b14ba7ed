//! Fleet-wide deployment of compiled rulesets.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::compiler::{CompiledPolicy, RuleCompiler};
use crate::error::{DeployError, FireletError, Result};
use crate::model::FireSet;

use super::deployed::{DeployHistoryEntry, DeployedStore};
use super::transport::HostTransport;

/// Default number of concurrent host pushes.
pub const DEFAULT_PARALLELISM: usize = 8;

/// Default bound on a single host push.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of pushing to one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HostOutcome {
    /// The host replaced its ruleset.
    Applied,
    /// The host could not be contacted in time.
    Unreachable(String),
    /// The host refused the ruleset.
    Rejected(String),
}

impl HostOutcome {
    /// Returns true if the ruleset was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

impl fmt::Display for HostOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => f.write_str("applied"),
            Self::Unreachable(reason) => write!(f, "unreachable: {reason}"),
            Self::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

impl From<DeployError> for HostOutcome {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::Rejected { reason, .. } => Self::Rejected(reason),
            other => Self::Unreachable(other.to_string()),
        }
    }
}

/// Per-host outcomes of one deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    /// Outcome by hostname.
    pub outcomes: BTreeMap<String, HostOutcome>,
    /// True only if every host applied.
    pub success: bool,
}

impl DeployReport {
    fn new(outcomes: BTreeMap<String, HostOutcome>) -> Self {
        let success = outcomes.values().all(HostOutcome::is_applied);
        Self { outcomes, success }
    }

    /// Hosts that applied their ruleset.
    pub fn applied(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_applied())
            .map(|(host, _)| host.as_str())
    }

    /// One alert line per failed host.
    #[must_use]
    pub fn alerts(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_applied())
            .map(|(host, outcome)| format!("Deployment to {host} failed: {outcome}"))
            .collect()
    }
}

/// Compiles the working state and pushes every host's ruleset.
pub struct Deployer {
    compiler: RuleCompiler,
    transport: Arc<dyn HostTransport>,
    baseline: DeployedStore,
    parallelism: usize,
    timeout: Duration,
    in_flight: Mutex<()>,
}

impl fmt::Debug for Deployer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployer")
            .field("compiler", &self.compiler)
            .field("transport", &self.transport.name())
            .field("baseline", &self.baseline)
            .field("parallelism", &self.parallelism)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Deployer {
    /// Creates a deployer with default parallelism and timeout.
    #[must_use]
    pub fn new(
        compiler: RuleCompiler,
        transport: Arc<dyn HostTransport>,
        baseline: DeployedStore,
    ) -> Self {
        Self {
            compiler,
            transport,
            baseline,
            parallelism: DEFAULT_PARALLELISM,
            timeout: DEFAULT_TIMEOUT,
            in_flight: Mutex::new(()),
        }
    }

    /// Sets the number of concurrent host pushes (at least one).
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the bound on a single host push.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The baseline store this deployer updates.
    #[must_use]
    pub const fn baseline(&self) -> &DeployedStore {
        &self.baseline
    }

    /// Deploys `working` to the fleet.
    ///
    /// Compilation happens first; if it fails no host is contacted. Each
    /// host is then pushed independently and never retried. Hosts that
    /// applied become the new baseline and hosts no longer compiled leave
    /// it. Concurrent deploys through one deployer run one after another.
    ///
    /// # Errors
    ///
    /// Returns an `Alert` wrapping the `CompileError` if compilation fails,
    /// or an error if the baseline cannot be updated.
    pub async fn deploy(&self, working: &FireSet) -> Result<DeployReport> {
        let compiled = self.compiler.compile(working).map_err(|e| {
            error!("Deployment aborted, compilation failed: {e}");
            FireletError::alert(format!("Deployment aborted: {e}"), e)
        })?;

        let _in_flight = self.in_flight.lock().await;
        info!(
            "Deploying to {} hosts via {} (parallelism {})",
            compiled.hosts.len(),
            self.transport.name(),
            self.parallelism
        );

        let rendered = compiled.rendered();
        let report = DeployReport::new(self.push_all(&compiled, &rendered).await);

        let mut state = self.baseline.load().await?;
        state.retain_hosts(|host| compiled.hosts.contains_key(host));
        for host in report.applied() {
            if let Some(text) = rendered.get(host) {
                state.record_applied(host, text);
            }
        }
        state.add_history(DeployHistoryEntry {
            timestamp: Utc::now(),
            applied: report.applied().map(String::from).collect(),
            failed: report
                .outcomes
                .iter()
                .filter(|(_, outcome)| !outcome.is_applied())
                .map(|(host, outcome)| (host.clone(), outcome.to_string()))
                .collect(),
        });
        self.baseline.save(&state).await?;

        if report.success {
            info!("Deployment applied on all {} hosts", report.outcomes.len());
        } else {
            for alert in report.alerts() {
                warn!("{alert}");
            }
        }
        Ok(report)
    }

    async fn push_all(
        &self,
        compiled: &CompiledPolicy,
        rendered: &BTreeMap<String, String>,
    ) -> BTreeMap<String, HostOutcome> {
        let permits = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for (hostname, ruleset) in &compiled.hosts {
            let transport = Arc::clone(&self.transport);
            let permits = Arc::clone(&permits);
            let hostname = hostname.clone();
            let address = ruleset.mng_addr;
            let text = rendered.get(&hostname).cloned().unwrap_or_default();
            let limit = self.timeout;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (hostname, HostOutcome::Unreachable(String::from("deploy cancelled")));
                };
                let outcome =
                    match tokio::time::timeout(limit, transport.apply(&hostname, address, &text))
                        .await
                    {
                        Ok(Ok(())) => HostOutcome::Applied,
                        Ok(Err(e)) => HostOutcome::from(e),
                        Err(_) => HostOutcome::from(DeployError::Timeout {
                            host: hostname.clone(),
                            secs: limit.as_secs(),
                        }),
                    };
                info!("Host {hostname}: {outcome}");
                (hostname, outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((hostname, outcome)) => {
                    outcomes.insert(hostname, outcome);
                }
                Err(e) => error!("Host push task failed: {e}"),
            }
        }
        for hostname in compiled.hosts.keys() {
            outcomes
                .entry(hostname.clone())
                .or_insert_with(|| HostOutcome::Unreachable(String::from("push task failed")));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;

    use async_trait::async_trait;
    use mockall::predicate::{always, eq, function};
    use tempfile::TempDir;

    use super::*;
    use crate::check::CheckEngine;
    use crate::deploy::transport::MockHostTransport;
    use crate::model::{Action, Host, HostGroup, Rule};

    fn fleet() -> FireSet {
        let mut set = FireSet::new();
        for (name, last) in [("alpha", 1), ("beta", 2), ("gamma", 3)] {
            set.hosts.push(Host {
                hostname: name.to_string(),
                iface: String::from("eth0"),
                ip_addr: Ipv4Addr::new(10, 0, 0, last),
                masklen: 24,
                local_fw: true,
                network_fw: false,
                mng: true,
                routed: BTreeSet::new(),
            });
        }
        set.rules.push(Rule {
            name: String::from("allow-all"),
            src: String::from("*"),
            src_serv: String::from("*"),
            dst: String::from("*"),
            dst_serv: String::from("*"),
            action: Action::Accept,
            log_level: None,
            desc: String::new(),
            enabled: true,
        });
        set
    }

    fn deployer(transport: impl HostTransport + 'static, dir: &TempDir) -> Deployer {
        Deployer::new(
            RuleCompiler::default(),
            Arc::new(transport),
            DeployedStore::in_dir(dir.path()),
        )
    }

    #[tokio::test]
    async fn test_one_unreachable_host_of_three() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut transport = MockHostTransport::new();
        transport.expect_name().return_const("mock");
        transport
            .expect_apply()
            .with(eq("beta"), always(), always())
            .times(1)
            .returning(|host, _, _| {
                Err(DeployError::Unreachable {
                    host: host.to_string(),
                    message: String::from("connection refused"),
                })
            });
        transport
            .expect_apply()
            .with(function(|host: &str| host != "beta"), always(), always())
            .times(2)
            .returning(|_, _, _| Ok(()));

        let deployer = deployer(transport, &temp);
        let report = deployer.deploy(&fleet()).await.expect("deploy");

        assert!(!report.success);
        assert_eq!(report.outcomes["alpha"], HostOutcome::Applied);
        assert_eq!(report.outcomes["gamma"], HostOutcome::Applied);
        assert!(matches!(report.outcomes["beta"], HostOutcome::Unreachable(_)));
        assert_eq!(report.alerts().len(), 1);

        let baseline = deployer.baseline().load().await.expect("baseline");
        assert_eq!(
            baseline.rulesets.keys().collect::<Vec<_>>(),
            vec!["alpha", "gamma"]
        );
        assert_eq!(baseline.history.len(), 1);
        assert!(!baseline.history[0].success());
    }

    #[tokio::test]
    async fn test_rejected_host_keeps_reason() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut transport = MockHostTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_apply().returning(|host, _, _| {
            if host == "gamma" {
                Err(DeployError::Rejected {
                    host: host.to_string(),
                    reason: String::from("line 7 failed"),
                })
            } else {
                Ok(())
            }
        });

        let report = deployer(transport, &temp)
            .deploy(&fleet())
            .await
            .expect("deploy");

        assert_eq!(
            report.outcomes["gamma"],
            HostOutcome::Rejected(String::from("line 7 failed"))
        );
        assert_eq!(report.applied().count(), 2);
    }

    #[tokio::test]
    async fn test_compile_failure_contacts_no_host() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut transport = MockHostTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_apply().never();

        let mut set = fleet();
        set.hostgroups.push(HostGroup {
            name: String::from("loop"),
            childs: vec![String::from("loop")],
        });
        let template = set.rules.rows()[0].record.clone();
        set.rules.push(Rule {
            name: String::from("bad"),
            src: String::from("loop"),
            ..template
        });

        let err = deployer(transport, &temp)
            .deploy(&set)
            .await
            .expect_err("compile must fail");
        assert!(err.is_compile());
        assert!(!temp.path().join("deployed.json").exists());
    }

    struct StalledTransport;

    #[async_trait]
    impl HostTransport for StalledTransport {
        async fn apply(
            &self,
            _hostname: &str,
            _address: Ipv4Addr,
            _ruleset: &str,
        ) -> std::result::Result<(), DeployError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_timeout_is_unreachable() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let report = deployer(StalledTransport, &temp)
            .with_timeout(Duration::from_millis(20))
            .with_parallelism(3)
            .deploy(&fleet())
            .await
            .expect("deploy");

        assert!(!report.success);
        assert!(
            report
                .outcomes
                .values()
                .all(|o| matches!(o, HostOutcome::Unreachable(_)))
        );
    }

    #[tokio::test]
    async fn test_success_updates_baseline_to_compiled_output() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut transport = MockHostTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_apply().times(3).returning(|_, _, _| Ok(()));

        let deployer = deployer(transport, &temp);
        let set = fleet();
        let report = deployer.deploy(&set).await.expect("deploy");
        assert!(report.success);

        let baseline = deployer.baseline().load().await.expect("baseline");
        let compiled = RuleCompiler::default().compile(&set).expect("compile");
        assert_eq!(baseline.rulesets, compiled.rendered());
    }

    #[tokio::test]
    async fn test_host_leaving_fleet_leaves_baseline() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let mut transport = MockHostTransport::new();
        transport.expect_name().return_const("mock");
        transport.expect_apply().times(5).returning(|_, _, _| Ok(()));

        let deployer = deployer(transport, &temp);
        let mut set = fleet();
        deployer.deploy(&set).await.expect("first deploy");

        let beta = set.hosts.rows()[1].rid;
        if let Some(host) = set.hosts.get_mut(beta) {
            host.mng = false;
        }
        let report = deployer.deploy(&set).await.expect("second deploy");
        assert!(report.success);
        assert_eq!(report.outcomes.len(), 2);

        let baseline = deployer.baseline().load().await.expect("baseline");
        assert_eq!(
            baseline.rulesets.keys().collect::<Vec<_>>(),
            vec!["alpha", "gamma"]
        );
        let check = CheckEngine::default()
            .check(&set, &baseline.rulesets)
            .expect("check");
        assert!(check.is_clean());
    }

    struct SlowTransport;

    #[async_trait]
    impl HostTransport for SlowTransport {
        async fn apply(
            &self,
            _hostname: &str,
            _address: Ipv4Addr,
            _ruleset: &str,
        ) -> std::result::Result<(), DeployError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_concurrent_deploys_keep_both_history_entries() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let deployer = deployer(SlowTransport, &temp);
        let set = fleet();

        let (first, second) = tokio::join!(deployer.deploy(&set), deployer.deploy(&set));
        assert!(first.expect("first deploy").success);
        assert!(second.expect("second deploy").success);

        let baseline = deployer.baseline().load().await.expect("baseline");
        assert_eq!(baseline.history.len(), 2);
        assert_eq!(baseline.rulesets.len(), 3);
    }
}
