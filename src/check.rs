//! Check engine.
//!
//! Compiles the working state and diffs every host's rendered ruleset
//! against the ruleset last applied to it, line by line. Check is read-only;
//! it never contacts a host.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use tracing::{info, warn};

use crate::compiler::{CompiledPolicy, RuleCompiler};
use crate::error::{FireletError, Result};
use crate::model::FireSet;

/// Direction of a changed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineChange {
    /// Line only in the new ruleset.
    Added,
    /// Line only in the deployed ruleset.
    Removed,
}

/// One changed line of a host ruleset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    /// Added or removed.
    pub change: LineChange,
    /// Line text without the trailing newline.
    pub text: String,
}

/// Old and new ruleset of one host plus the changed lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostDiff {
    /// Deployed ruleset lines (empty if never deployed).
    pub old: Vec<String>,
    /// Newly compiled ruleset lines (empty if the host is no longer managed).
    pub new: Vec<String>,
    /// Changed lines in diff order; empty when nothing changed.
    pub changes: Vec<DiffLine>,
}

impl HostDiff {
    /// Returns true if the host ruleset is unchanged.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.changes.is_empty()
    }

    /// Computes the line diff between two rendered rulesets.
    #[must_use]
    pub fn between(old: &str, new: &str) -> Self {
        let changes = TextDiff::from_lines(old, new)
            .iter_all_changes()
            .filter_map(|change| {
                let kind = match change.tag() {
                    ChangeTag::Delete => LineChange::Removed,
                    ChangeTag::Insert => LineChange::Added,
                    ChangeTag::Equal => return None,
                };
                Some(DiffLine {
                    change: kind,
                    text: change.value().trim_end_matches('\n').to_string(),
                })
            })
            .collect();

        Self {
            old: old.lines().map(String::from).collect(),
            new: new.lines().map(String::from).collect(),
            changes,
        }
    }
}

/// Per-host check result, keyed by hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Diffs by hostname.
    pub hosts: BTreeMap<String, HostDiff>,
}

impl CheckReport {
    /// Hosts whose ruleset would change.
    pub fn changed_hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts
            .iter()
            .filter(|(_, diff)| !diff.is_unchanged())
            .map(|(name, _)| name.as_str())
    }

    /// Returns true if a deploy would change nothing.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.changed_hosts().next().is_none()
    }
}

/// Compares compiled output against the deployed baseline.
#[derive(Debug, Default, Clone, Copy)]
pub struct CheckEngine {
    compiler: RuleCompiler,
}

impl CheckEngine {
    /// Creates a check engine using `compiler`.
    #[must_use]
    pub const fn new(compiler: RuleCompiler) -> Self {
        Self { compiler }
    }

    /// Compiles `working` and diffs it against `deployed` (rendered rulesets
    /// by hostname).
    ///
    /// # Errors
    ///
    /// Returns an `Alert` wrapping the `CompileError` if compilation fails.
    pub fn check(
        &self,
        working: &FireSet,
        deployed: &BTreeMap<String, String>,
    ) -> Result<CheckReport> {
        let compiled = self.compile(working)?;
        Ok(Self::diff(&compiled, deployed))
    }

    /// Compiles `working`, wrapping a failure into an operator alert.
    ///
    /// # Errors
    ///
    /// Returns an `Alert` wrapping the `CompileError`.
    pub fn compile(&self, working: &FireSet) -> Result<CompiledPolicy> {
        self.compiler.compile(working).map_err(|e| {
            warn!("Check failed: {e}");
            FireletError::alert(format!("Check failed: {e}"), e)
        })
    }

    /// Diffs already compiled output against the baseline.
    #[must_use]
    pub fn diff(compiled: &CompiledPolicy, deployed: &BTreeMap<String, String>) -> CheckReport {
        let rendered = compiled.rendered();
        let hostnames: BTreeSet<&String> = rendered.keys().chain(deployed.keys()).collect();

        let hosts: BTreeMap<String, HostDiff> = hostnames
            .into_iter()
            .map(|name| {
                let old = deployed.get(name).map_or("", String::as_str);
                let new = rendered.get(name).map_or("", String::as_str);
                (name.clone(), HostDiff::between(old, new))
            })
            .collect();

        let report = CheckReport { hosts };
        info!(
            "Check complete: {} of {} hosts would change",
            report.changed_hosts().count(),
            report.hosts.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;

    use super::*;
    use crate::model::{Action, Host, HostGroup, Rule};

    fn fixture() -> FireSet {
        let mut set = FireSet::new();
        for (name, last) in [("a", 1), ("b", 2)] {
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
            name: String::from("ping"),
            src: String::from("a:eth0"),
            src_serv: String::from("*"),
            dst: String::from("b:eth0"),
            dst_serv: String::from("*"),
            action: Action::Accept,
            log_level: None,
            desc: String::new(),
            enabled: true,
        });
        set
    }

    #[test]
    fn test_first_check_shows_everything_added() {
        let report = CheckEngine::default()
            .check(&fixture(), &BTreeMap::new())
            .expect("check");

        assert_eq!(report.hosts.len(), 2);
        let b = &report.hosts["b"];
        assert!(b.old.is_empty());
        assert_eq!(b.changes.len(), b.new.len());
        assert!(b.changes.iter().all(|l| l.change == LineChange::Added));
    }

    #[test]
    fn test_unchanged_hosts_have_empty_diff() {
        let engine = CheckEngine::default();
        let set = fixture();
        let deployed = engine.compile(&set).expect("compile").rendered();

        let report = engine.check(&set, &deployed).expect("check");
        assert!(report.is_clean());
        assert!(report.hosts.values().all(HostDiff::is_unchanged));
    }

    #[test]
    fn test_changed_rule_shows_line_diff() {
        let engine = CheckEngine::default();
        let mut set = fixture();
        let deployed = engine.compile(&set).expect("compile").rendered();

        let rid = set.rules.rows()[0].rid;
        if let Some(rule) = set.rules.get_mut(rid) {
            rule.action = Action::Drop;
        }
        let report = engine.check(&set, &deployed).expect("check");

        let b = &report.hosts["b"];
        assert_eq!(
            b.changes,
            vec![
                DiffLine {
                    change: LineChange::Removed,
                    text: String::from("-A INPUT -i eth0 -s 10.0.0.1/32 -d 10.0.0.2/32 -j ACCEPT"),
                },
                DiffLine {
                    change: LineChange::Added,
                    text: String::from("-A INPUT -i eth0 -s 10.0.0.1/32 -d 10.0.0.2/32 -j DROP"),
                },
            ]
        );
        assert_eq!(report.changed_hosts().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_compile_failure_is_an_alert() {
        let mut set = fixture();
        set.hostgroups.push(HostGroup {
            name: String::from("g1"),
            childs: vec![String::from("g1")],
        });
        let template = set.rules.rows()[0].record.clone();
        set.rules.push(Rule {
            name: String::from("loop"),
            src: String::from("g1"),
            ..template
        });

        let err = CheckEngine::default()
            .check(&set, &BTreeMap::new())
            .expect_err("cycle must fail");
        assert!(matches!(err, FireletError::Alert { .. }));
        assert!(err.is_compile());
        assert!(err.to_string().starts_with("Check failed: Host group cycle detected"));
    }
}
