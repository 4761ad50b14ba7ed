//! Resolution of symbolic endpoint and service references.

use std::collections::BTreeSet;

use tracing::warn;

use crate::error::CompileError;
use crate::model::{is_wildcard, Entity, FireSet, Host, PortSpec, Protocol, Rule, Service};

/// Concrete host interfaces an endpoint reference denotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoints {
    /// The wildcard: any address.
    Any,
    /// A set of host interface keys (`hostname:iface`).
    Hosts(BTreeSet<String>),
}

/// Protocol and ports a rule matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceMatch {
    /// Protocol, `None` for any.
    pub protocol: Option<Protocol>,
    /// Source ports.
    pub src_ports: Option<PortSpec>,
    /// Destination ports.
    pub dst_ports: Option<PortSpec>,
    /// ICMP type.
    pub icmp_type: Option<u8>,
}

/// Resolves references against one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    set: &'a FireSet,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over a snapshot.
    #[must_use]
    pub const fn new(set: &'a FireSet) -> Self {
        Self { set }
    }

    /// Resolves an endpoint reference of `rule`.
    ///
    /// # Errors
    ///
    /// Returns `DanglingReference` for an unknown name and `CyclicGroup`
    /// when group membership loops back on itself.
    pub fn endpoint(&self, rule: &str, name: &str) -> Result<Endpoints, CompileError> {
        if is_wildcard(name) {
            return Ok(Endpoints::Any);
        }
        let mut out = BTreeSet::new();
        let mut path = Vec::new();
        self.expand(rule, "endpoint", name, &mut path, &mut out)?;
        Ok(Endpoints::Hosts(out))
    }

    /// Depth-first expansion tracking the current membership path.
    fn expand(
        &self,
        rule: &str,
        kind: &str,
        name: &str,
        path: &mut Vec<String>,
        out: &mut BTreeSet<String>,
    ) -> Result<(), CompileError> {
        if let Some(host) = self.set.host(name) {
            out.insert(host.name());
            return Ok(());
        }

        if let Some(net) = self.set.network(name) {
            if let Some(prefix) = net.network() {
                out.extend(
                    self.set
                        .hosts
                        .records()
                        .filter(|h| prefix.contains(h.ip_addr))
                        .map(Host::name),
                );
            }
            return Ok(());
        }

        let Some(group) = self.set.group(name) else {
            return Err(CompileError::DanglingReference {
                rule: rule.to_string(),
                kind: kind.to_string(),
                reference: name.to_string(),
            });
        };

        if let Some(pos) = path.iter().position(|p| p == name) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(CompileError::CyclicGroup {
                cycle: cycle.join(" -> "),
            });
        }

        path.push(name.to_string());
        for child in &group.childs {
            self.expand(rule, "group member", child, path, out)?;
        }
        path.pop();
        Ok(())
    }

    /// Host interfaces a router forwards traffic for.
    ///
    /// Entries that no longer resolve are skipped with a warning.
    #[must_use]
    pub fn routed_by(&self, router: &Host) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for entry in &router.routed {
            let mut path = Vec::new();
            if let Err(e) = self.expand(&router.name(), "routed", entry, &mut path, &mut out) {
                warn!("Ignoring routed entry '{entry}' of {}: {e}", router.name());
            }
        }
        out
    }

    fn service(&self, rule: &str, name: &str) -> Result<Option<&'a Service>, CompileError> {
        if is_wildcard(name) {
            return Ok(None);
        }
        self.set
            .service(name)
            .map(Some)
            .ok_or_else(|| CompileError::DanglingReference {
                rule: rule.to_string(),
                kind: String::from("service"),
                reference: name.to_string(),
            })
    }

    /// Resolves the source and destination services of a rule.
    ///
    /// # Errors
    ///
    /// Returns `DanglingReference` for an unknown service and
    /// `ProtocolMismatch` when the two services use different protocols.
    pub fn services(&self, rule: &Rule) -> Result<ServiceMatch, CompileError> {
        let src = self.service(&rule.name, &rule.src_serv)?;
        let dst = self.service(&rule.name, &rule.dst_serv)?;

        let protocol_of = |svc: Option<&Service>| {
            svc.map(|s| s.protocol).filter(|p| *p != Protocol::Any)
        };
        let protocol = match (protocol_of(src), protocol_of(dst)) {
            (Some(a), Some(b)) if a != b => {
                return Err(CompileError::ProtocolMismatch {
                    rule: rule.name.clone(),
                    source_protocol: a.to_string(),
                    destination_protocol: b.to_string(),
                });
            }
            (a, b) => a.or(b),
        };

        let ports = |svc: Option<&Service>| -> Result<Option<PortSpec>, CompileError> {
            svc.map_or(Ok(None), |s| {
                s.port_spec().map_err(|_| CompileError::DanglingReference {
                    rule: rule.name.clone(),
                    kind: String::from("port specification of service"),
                    reference: s.name.clone(),
                })
            })
        };
        let icmp_type = [dst, src]
            .into_iter()
            .flatten()
            .find_map(|s| s.icmp_type().ok().flatten());

        Ok(ServiceMatch {
            protocol,
            src_ports: ports(src)?,
            dst_ports: ports(dst)?,
            icmp_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::model::{Action, HostGroup, Network};

    fn host(name: &str, last: u8) -> Host {
        Host {
            hostname: name.to_string(),
            iface: String::from("eth0"),
            ip_addr: Ipv4Addr::new(10, 0, 0, last),
            masklen: 24,
            local_fw: true,
            network_fw: false,
            mng: true,
            routed: BTreeSet::new(),
        }
    }

    fn fixture() -> FireSet {
        let mut set = FireSet::new();
        set.hosts.push(host("a", 1));
        set.hosts.push(host("b", 2));
        let mut far = host("c", 1);
        far.ip_addr = Ipv4Addr::new(192, 168, 0, 1);
        set.hosts.push(far);
        set.networks.push(Network {
            name: String::from("lan"),
            ip_addr: Ipv4Addr::new(10, 0, 0, 0),
            masklen: 24,
        });
        set
    }

    fn keys(names: &[&str]) -> Endpoints {
        Endpoints::Hosts(names.iter().map(ToString::to_string).collect())
    }

    #[test]
    fn test_network_resolves_to_contained_hosts() {
        let set = fixture();
        let resolver = Resolver::new(&set);
        assert_eq!(resolver.endpoint("r", "lan"), Ok(keys(&["a:eth0", "b:eth0"])));
        assert_eq!(resolver.endpoint("r", "c:eth0"), Ok(keys(&["c:eth0"])));
        assert_eq!(resolver.endpoint("r", "any"), Ok(Endpoints::Any));
    }

    #[test]
    fn test_nested_groups_union() {
        let mut set = fixture();
        set.hostgroups.push(HostGroup {
            name: String::from("inner"),
            childs: vec![String::from("c:eth0")],
        });
        set.hostgroups.push(HostGroup {
            name: String::from("outer"),
            childs: vec![String::from("inner"), String::from("a:eth0")],
        });

        let resolver = Resolver::new(&set);
        assert_eq!(resolver.endpoint("r", "outer"), Ok(keys(&["a:eth0", "c:eth0"])));
    }

    #[test]
    fn test_cycle_is_a_compile_error() {
        let mut set = fixture();
        set.hostgroups.push(HostGroup {
            name: String::from("g1"),
            childs: vec![String::from("g2")],
        });
        set.hostgroups.push(HostGroup {
            name: String::from("g2"),
            childs: vec![String::from("g1")],
        });

        let err = Resolver::new(&set).endpoint("r", "g1").expect_err("cycle");
        assert_eq!(
            err,
            CompileError::CyclicGroup {
                cycle: String::from("g1 -> g2 -> g1")
            }
        );
    }

    #[test]
    fn test_dangling_member() {
        let mut set = fixture();
        set.hostgroups.push(HostGroup {
            name: String::from("g"),
            childs: vec![String::from("gone")],
        });

        let err = Resolver::new(&set).endpoint("r1", "g").expect_err("dangling");
        assert!(matches!(err, CompileError::DanglingReference { ref reference, .. } if reference == "gone"));
    }

    #[test]
    fn test_service_protocol_mismatch() {
        let mut set = fixture();
        set.services.push(Service {
            name: String::from("dns"),
            protocol: Protocol::Udp,
            ports: String::from("53"),
        });
        set.services.push(Service {
            name: String::from("ssh"),
            protocol: Protocol::Tcp,
            ports: String::from("22"),
        });
        let mut rule = Rule {
            name: String::from("r"),
            src: String::from("*"),
            src_serv: String::from("dns"),
            dst: String::from("*"),
            dst_serv: String::from("ssh"),
            action: Action::Accept,
            log_level: None,
            desc: String::new(),
            enabled: true,
        };

        let resolver = Resolver::new(&set);
        assert!(matches!(
            resolver.services(&rule),
            Err(CompileError::ProtocolMismatch { .. })
        ));

        rule.src_serv = String::from("*");
        let matched = resolver.services(&rule).expect("resolves");
        assert_eq!(matched.protocol, Some(Protocol::Tcp));
        assert_eq!(matched.dst_ports.map(|p| p.to_string()), Some(String::from("22")));
        assert!(matched.src_ports.is_none());
    }
}
