//! Rule compiler.
//!
//! Turns the declarative tables into per-host instruction lists. Each
//! enabled rule, in chain order, has its endpoints expanded to concrete
//! host interfaces and emits instructions on every host whose filtering
//! capability covers the traffic:
//!
//! - `local_fw` on the destination: an INPUT instruction there
//! - `local_fw` on the source: an OUTPUT instruction there
//! - `network_fw` on a router that routes the source or destination:
//!   a FORWARD instruction there
//!
//! Rule order is preserved per host, so earlier rules win for overlapping
//! traffic exactly as in a packet-filter chain.

mod instruction;
mod resolve;

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use instruction::{Chain, Instruction};
pub use resolve::{Endpoints, Resolver, ServiceMatch};

use crate::error::CompileError;
use crate::model::{Action, Entity, FireSet, Host, Rule};

/// Default verdict of the INPUT and FORWARD chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultPolicy {
    /// Drop traffic no rule accepted.
    #[default]
    Drop,
    /// Accept traffic no rule dropped.
    Accept,
}

impl DefaultPolicy {
    /// iptables chain policy name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "DROP",
            Self::Accept => "ACCEPT",
        }
    }
}

/// The compiled ruleset of one managed host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRuleset {
    /// Host name.
    pub hostname: String,
    /// Address used to reach the host for deployment.
    pub mng_addr: Ipv4Addr,
    /// Default policy for INPUT and FORWARD.
    pub default_policy: DefaultPolicy,
    /// Instructions in chain order.
    pub instructions: Vec<Instruction>,
}

impl HostRuleset {
    /// Renders the ruleset as `iptables-restore` input.
    ///
    /// Loopback and established traffic are accepted ahead of the compiled
    /// instructions.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let policy = self.default_policy.as_str();
        let mut lines = vec![
            format!("# firelet ruleset for {}", self.hostname),
            String::from("*filter"),
            format!(":INPUT {policy} [0:0]"),
            format!(":FORWARD {policy} [0:0]"),
            String::from(":OUTPUT ACCEPT [0:0]"),
            String::from("-A INPUT -i lo -j ACCEPT"),
            String::from("-A INPUT -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT"),
            String::from("-A FORWARD -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT"),
        ];
        lines.extend(self.instructions.iter().flat_map(Instruction::render));
        lines.push(String::from("COMMIT"));
        lines
    }

    /// Renders the ruleset as one newline-terminated text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = self.lines().join("\n");
        text.push('\n');
        text
    }
}

/// Compiler output: one ruleset per managed host, keyed by hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompiledPolicy {
    /// Rulesets by hostname.
    pub hosts: BTreeMap<String, HostRuleset>,
}

impl CompiledPolicy {
    /// Rendered rulesets by hostname.
    #[must_use]
    pub fn rendered(&self) -> BTreeMap<String, String> {
        self.hosts
            .iter()
            .map(|(name, ruleset)| (name.clone(), ruleset.render()))
            .collect()
    }

    /// Instructions compiled for a host, empty if it is not managed.
    #[must_use]
    pub fn instructions(&self, hostname: &str) -> &[Instruction] {
        self.hosts
            .get(hostname)
            .map_or(&[], |ruleset| ruleset.instructions.as_slice())
    }
}

/// Compiles snapshots into per-host rulesets.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleCompiler {
    default_policy: DefaultPolicy,
}

/// Address pair of one instruction; `None` is any.
type Pair = (Option<Ipv4Addr>, Option<Ipv4Addr>);

impl RuleCompiler {
    /// Creates a compiler with the given default chain policy.
    #[must_use]
    pub const fn new(default_policy: DefaultPolicy) -> Self {
        Self { default_policy }
    }

    /// Compiles a snapshot.
    ///
    /// Only hosts that are managed and carry at least one filtering flag
    /// receive a ruleset. Disabled rules are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first `CompileError` met; nothing is produced for any host
    /// in that case.
    pub fn compile(&self, set: &FireSet) -> Result<CompiledPolicy, CompileError> {
        let resolver = Resolver::new(set);
        let interfaces: BTreeMap<String, &Host> =
            set.hosts.records().map(|h| (h.name(), h)).collect();
        let routes: BTreeMap<String, BTreeSet<String>> = interfaces
            .iter()
            .filter(|(_, h)| h.network_fw)
            .map(|(key, h)| (key.clone(), resolver.routed_by(h)))
            .collect();

        let mut emitted: BTreeMap<String, Vec<Instruction>> = BTreeMap::new();
        for rule in set.rules.records() {
            if !rule.enabled {
                debug!("Skipping disabled rule '{}'", rule.name);
                continue;
            }
            let src = resolver.endpoint(&rule.name, &rule.src)?;
            let dst = resolver.endpoint(&rule.name, &rule.dst)?;
            let service = resolver.services(rule)?;

            let mut emit = |host: &Host, chain: Chain, (s, d): Pair| {
                let iface = (chain != Chain::Forward).then(|| host.iface.clone());
                emitted
                    .entry(host.hostname.clone())
                    .or_default()
                    .push(Self::instruction(rule, &service, chain, iface, s, d));
            };

            match (&src, &dst) {
                (Endpoints::Any, Endpoints::Any) => {
                    for &host in interfaces.values() {
                        if host.local_fw {
                            emit(host, Chain::Input, (None, None));
                            emit(host, Chain::Output, (None, None));
                        }
                        if host.network_fw {
                            emit(host, Chain::Forward, (None, None));
                        }
                    }
                }
                _ => {
                    let sources = Self::peers(&src, &interfaces);
                    let destinations = Self::peers(&dst, &interfaces);
                    for s in &sources {
                        for d in &destinations {
                            if s.is_some() && s == d {
                                continue;
                            }
                            let src_host = s.and_then(|k| interfaces.get(k).copied());
                            let dst_host = d.and_then(|k| interfaces.get(k).copied());
                            let pair = (src_host.map(|h| h.ip_addr), dst_host.map(|h| h.ip_addr));
                            if let Some(host) = dst_host
                                && host.local_fw
                            {
                                emit(host, Chain::Input, pair);
                            }
                            if let Some(host) = src_host
                                && host.local_fw
                            {
                                emit(host, Chain::Output, pair);
                            }
                            for (key, routed) in &routes {
                                let endpoint = |side: Option<&String>| {
                                    side.is_some_and(|k| routed.contains(k))
                                };
                                let involved = Some(key) == *s || Some(key) == *d;
                                if !involved
                                    && (endpoint(*s) || endpoint(*d))
                                    && let Some(router) = interfaces.get(key).copied()
                                {
                                    emit(router, Chain::Forward, pair);
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut hosts = BTreeMap::new();
        for host in interfaces.values() {
            if !host.mng || !(host.local_fw || host.network_fw) {
                continue;
            }
            // the first managed interface is the deployment address
            hosts.entry(host.hostname.clone()).or_insert_with(|| HostRuleset {
                hostname: host.hostname.clone(),
                mng_addr: host.ip_addr,
                default_policy: self.default_policy,
                instructions: Vec::new(),
            });
        }
        for (hostname, instructions) in emitted {
            if let Some(ruleset) = hosts.get_mut(&hostname) {
                ruleset.instructions = dedup(instructions);
            }
        }

        let total: usize = hosts.values().map(|r| r.instructions.len()).sum();
        info!("Compiled {} rules into {total} instructions for {} hosts", set.rules.len(), hosts.len());
        Ok(CompiledPolicy { hosts })
    }

    /// Interface keys of one side; `None` stands for any address.
    fn peers<'k>(
        endpoints: &'k Endpoints,
        interfaces: &BTreeMap<String, &Host>,
    ) -> Vec<Option<&'k String>> {
        match endpoints {
            Endpoints::Any => vec![None],
            Endpoints::Hosts(keys) => keys
                .iter()
                .filter(|k| interfaces.contains_key(*k))
                .map(Some)
                .collect(),
        }
    }

    fn instruction(
        rule: &Rule,
        service: &ServiceMatch,
        chain: Chain,
        iface: Option<String>,
        src: Option<Ipv4Addr>,
        dst: Option<Ipv4Addr>,
    ) -> Instruction {
        Instruction {
            rule: rule.name(),
            chain,
            iface,
            src,
            dst,
            protocol: service.protocol,
            src_ports: service.src_ports.clone(),
            dst_ports: service.dst_ports.clone(),
            icmp_type: service.icmp_type,
            action: rule.action,
            log_level: rule.log_level,
        }
    }
}

/// Removes repeated instructions, keeping the first occurrence.
fn dedup(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let mut seen = std::collections::HashSet::new();
    instructions
        .into_iter()
        .filter(|ins| seen.insert(ins.clone()))
        .collect()
}

/// Verdict of the first instruction on `chain` matching a packet.
///
/// Used to reason about chain semantics; `None` means the chain policy
/// applies.
#[must_use]
pub fn first_match(
    instructions: &[Instruction],
    chain: Chain,
    src: Ipv4Addr,
    dst: Ipv4Addr,
) -> Option<Action> {
    instructions
        .iter()
        .find(|ins| {
            ins.chain == chain
                && ins.src.is_none_or(|s| s == src)
                && ins.dst.is_none_or(|d| d == dst)
        })
        .map(|ins| ins.action)
}
