//! The five record kinds and their per-record invariants.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::fireset::{FireSet, Reference};
use super::ports::{PortSpec, MULTIPORT_MAX};
use super::table::Table;
use crate::error::StoreError;

/// Wildcard endpoint or service name.
pub const WILDCARD: &str = "*";

/// Returns true if `name` is the wildcard (`*` or `any`).
#[must_use]
pub fn is_wildcard(name: &str) -> bool {
    name == WILDCARD || name.eq_ignore_ascii_case("any")
}

/// Identifies one of the five tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// Host interfaces.
    Hosts,
    /// IPv4 networks.
    Networks,
    /// Named groups of hosts, networks and groups.
    HostGroups,
    /// Protocol and port definitions.
    Services,
    /// The ordered rule chain.
    Rules,
}

impl TableKind {
    /// All tables, in storage order.
    pub const ALL: [Self; 5] = [
        Self::Hosts,
        Self::Networks,
        Self::HostGroups,
        Self::Services,
        Self::Rules,
    ];

    /// Table name as used in file names and messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hosts => "hosts",
            Self::Networks => "networks",
            Self::HostGroups => "hostgroups",
            Self::Services => "services",
            Self::Rules => "rules",
        }
    }

    /// Singular noun for a record of this table.
    #[must_use]
    pub const fn singular(self) -> &'static str {
        match self {
            Self::Hosts => "host",
            Self::Networks => "network",
            Self::HostGroups => "hostgroup",
            Self::Services => "service",
            Self::Rules => "rule",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hosts" | "host" => Ok(Self::Hosts),
            "networks" | "network" | "net" => Ok(Self::Networks),
            "hostgroups" | "hostgroup" | "group" => Ok(Self::HostGroups),
            "services" | "service" => Ok(Self::Services),
            "rules" | "rule" => Ok(Self::Rules),
            other => Err(format!(
                "unknown table '{other}' (expected hosts, networks, hostgroups, services or rules)"
            )),
        }
    }
}

/// Behaviour shared by every record kind.
///
/// `name` is the identifier other records use to reference this one.
/// `digest` feeds every field into the hasher in a fixed order so the
/// resulting token only depends on content.
pub trait Entity:
    fmt::Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The table this record kind lives in.
    const KIND: TableKind;

    /// Reference name of the record.
    fn name(&self) -> String;

    /// Checks the invariants local to this record.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field.
    fn validate(&self) -> Result<(), StoreError>;

    /// Feeds the record content into a hasher.
    fn digest(&self, hasher: &mut Sha256);

    /// Names this record refers to.
    fn references(&self) -> Vec<Reference>;

    /// Selects this kind's table in a snapshot.
    fn table(set: &FireSet) -> &Table<Self>;

    /// Selects this kind's table in a snapshot, mutably.
    fn table_mut(set: &mut FireSet) -> &mut Table<Self>;
}

/// A host interface.
///
/// A host with several interfaces has one record per interface; its
/// reference name is `hostname:iface`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Host name.
    pub hostname: String,
    /// Interface name.
    pub iface: String,
    /// Interface address.
    pub ip_addr: Ipv4Addr,
    /// Prefix length of the attached network.
    pub masklen: u8,
    /// The host filters its own traffic.
    #[serde(default)]
    pub local_fw: bool,
    /// The host filters transit traffic.
    #[serde(default)]
    pub network_fw: bool,
    /// The host is centrally managed.
    #[serde(default)]
    pub mng: bool,
    /// Networks or hosts this interface routes traffic for.
    #[serde(default)]
    pub routed: BTreeSet<String>,
}

/// An IPv4 network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network name.
    pub name: String,
    /// Network base address.
    pub ip_addr: Ipv4Addr,
    /// Prefix length.
    pub masklen: u8,
}

/// A named set of hosts, networks and other groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostGroup {
    /// Group name.
    pub name: String,
    /// Member reference names.
    #[serde(default)]
    pub childs: Vec<String>,
}

/// Transport protocol of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP with a port specification.
    Tcp,
    /// UDP with a port specification.
    Udp,
    /// ICMP with an optional type.
    Icmp,
    /// Any IP protocol.
    #[serde(alias = "IP", alias = "OTHER")]
    Any,
}

impl Protocol {
    /// Lowercase name as used by iptables.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::Any => "all",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protocol plus its protocol-dependent payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service name.
    pub name: String,
    /// Protocol.
    pub protocol: Protocol,
    /// Port specification (TCP/UDP), ICMP type, or empty.
    #[serde(default)]
    pub ports: String,
}

impl Service {
    /// Parsed port specification, `None` when the service covers all ports.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not parse.
    pub fn port_spec(&self) -> Result<Option<PortSpec>, String> {
        match self.protocol {
            Protocol::Tcp | Protocol::Udp if !self.ports.trim().is_empty() => {
                self.ports.parse().map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Parsed ICMP type, `None` when any type matches.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a valid ICMP type.
    pub fn icmp_type(&self) -> Result<Option<u8>, String> {
        match self.protocol {
            Protocol::Icmp if !self.ports.trim().is_empty() => self
                .ports
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| format!("'{}' is not an ICMP type", self.ports.trim())),
            _ => Ok(None),
        }
    }
}

/// Rule action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Let matching traffic through.
    Accept,
    /// Silently discard matching traffic.
    #[serde(alias = "DENY")]
    Drop,
}

impl Action {
    /// iptables target name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "ACCEPT",
            Self::Drop => "DROP",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_enabled() -> bool {
    true
}

/// One entry of the fleet-wide rule chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name.
    pub name: String,
    /// Source endpoint reference.
    pub src: String,
    /// Source service reference.
    pub src_serv: String,
    /// Destination endpoint reference.
    pub dst: String,
    /// Destination service reference.
    pub dst_serv: String,
    /// Action taken on match.
    pub action: Action,
    /// Syslog level for logging matches, if logged.
    #[serde(default)]
    pub log_level: Option<u8>,
    /// Free-text description.
    #[serde(default)]
    pub desc: String,
    /// Disabled rules are skipped by the compiler.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn require_name(table: TableKind, field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(table.as_str(), field, "must not be empty"));
    }
    if value.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(StoreError::validation(
            table.as_str(),
            field,
            format!("'{value}' must not contain whitespace or commas"),
        ));
    }
    if is_wildcard(value) {
        return Err(StoreError::validation(
            table.as_str(),
            field,
            format!("'{value}' is reserved for the wildcard"),
        ));
    }
    Ok(())
}

fn prefix(table: TableKind, ip: Ipv4Addr, masklen: u8) -> Result<Ipv4Network, StoreError> {
    Ipv4Network::new(ip, masklen).map_err(|e| {
        StoreError::validation(table.as_str(), "masklen", format!("invalid prefix: {e}"))
    })
}

fn feed(hasher: &mut Sha256, value: &[u8]) {
    hasher.update(value);
    hasher.update([0x1f]);
}

impl Host {
    /// Reference name of an interface.
    #[must_use]
    pub fn key(hostname: &str, iface: &str) -> String {
        format!("{hostname}:{iface}")
    }

    /// The network this interface is attached to.
    #[must_use]
    pub fn attached_network(&self) -> Option<Ipv4Network> {
        Ipv4Network::new(self.ip_addr, self.masklen).ok()
    }
}

impl Entity for Host {
    const KIND: TableKind = TableKind::Hosts;

    fn name(&self) -> String {
        Self::key(&self.hostname, &self.iface)
    }

    fn validate(&self) -> Result<(), StoreError> {
        require_name(Self::KIND, "hostname", &self.hostname)?;
        require_name(Self::KIND, "iface", &self.iface)?;
        if self.hostname.contains(':') || self.iface.contains(':') {
            return Err(StoreError::validation(
                Self::KIND.as_str(),
                "hostname",
                "hostname and iface must not contain ':'",
            ));
        }

        let net = prefix(Self::KIND, self.ip_addr, self.masklen)?;
        if self.masklen < 31 && (self.ip_addr == net.network() || self.ip_addr == net.broadcast())
        {
            return Err(StoreError::validation(
                Self::KIND.as_str(),
                "ip_addr",
                format!(
                    "{}/{} is a network or broadcast address, not a host address",
                    self.ip_addr, self.masklen
                ),
            ));
        }

        if let Some(own) = self.routed.iter().find(|r| **r == self.name()) {
            return Err(StoreError::validation(
                Self::KIND.as_str(),
                "routed",
                format!("interface cannot route for itself ({own})"),
            ));
        }
        Ok(())
    }

    fn digest(&self, hasher: &mut Sha256) {
        feed(hasher, self.hostname.as_bytes());
        feed(hasher, self.iface.as_bytes());
        feed(hasher, &self.ip_addr.octets());
        feed(hasher, &[self.masklen]);
        feed(
            hasher,
            &[
                u8::from(self.local_fw),
                u8::from(self.network_fw),
                u8::from(self.mng),
            ],
        );
        // BTreeSet iterates in sorted order
        for routed in &self.routed {
            feed(hasher, routed.as_bytes());
        }
    }

    fn references(&self) -> Vec<Reference> {
        self.routed
            .iter()
            .map(|name| Reference::endpoint("routed", name))
            .collect()
    }

    fn table(set: &FireSet) -> &Table<Self> {
        &set.hosts
    }

    fn table_mut(set: &mut FireSet) -> &mut Table<Self> {
        &mut set.hosts
    }
}

impl Network {
    /// The network as a prefix, if the address and length are consistent.
    #[must_use]
    pub fn network(&self) -> Option<Ipv4Network> {
        Ipv4Network::new(self.ip_addr, self.masklen).ok()
    }
}

impl Entity for Network {
    const KIND: TableKind = TableKind::Networks;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> Result<(), StoreError> {
        require_name(Self::KIND, "name", &self.name)?;
        let net = prefix(Self::KIND, self.ip_addr, self.masklen)?;
        if net.network() != self.ip_addr {
            return Err(StoreError::validation(
                Self::KIND.as_str(),
                "ip_addr",
                format!(
                    "{}/{} is not a network base address (expected {})",
                    self.ip_addr,
                    self.masklen,
                    net.network()
                ),
            ));
        }
        Ok(())
    }

    fn digest(&self, hasher: &mut Sha256) {
        feed(hasher, self.name.as_bytes());
        feed(hasher, &self.ip_addr.octets());
        feed(hasher, &[self.masklen]);
    }

    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }

    fn table(set: &FireSet) -> &Table<Self> {
        &set.networks
    }

    fn table_mut(set: &mut FireSet) -> &mut Table<Self> {
        &mut set.networks
    }
}

impl Entity for HostGroup {
    const KIND: TableKind = TableKind::HostGroups;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> Result<(), StoreError> {
        require_name(Self::KIND, "name", &self.name)?;
        if self.childs.is_empty() {
            return Err(StoreError::validation(
                Self::KIND.as_str(),
                "childs",
                "a host group needs at least one member",
            ));
        }
        let mut seen = BTreeSet::new();
        for child in &self.childs {
            if is_wildcard(child) {
                return Err(StoreError::validation(
                    Self::KIND.as_str(),
                    "childs",
                    "the wildcard cannot be a group member",
                ));
            }
            if !seen.insert(child.as_str()) {
                return Err(StoreError::validation(
                    Self::KIND.as_str(),
                    "childs",
                    format!("duplicate member '{child}'"),
                ));
            }
        }
        if seen.contains(self.name.as_str()) {
            return Err(StoreError::validation(
                Self::KIND.as_str(),
                "childs",
                format!("group '{}' cannot contain itself", self.name),
            ));
        }
        Ok(())
    }

    fn digest(&self, hasher: &mut Sha256) {
        feed(hasher, self.name.as_bytes());
        for child in &self.childs {
            feed(hasher, child.as_bytes());
        }
    }

    fn references(&self) -> Vec<Reference> {
        self.childs
            .iter()
            .map(|child| Reference::endpoint("childs", child))
            .collect()
    }

    fn table(set: &FireSet) -> &Table<Self> {
        &set.hostgroups
    }

    fn table_mut(set: &mut FireSet) -> &mut Table<Self> {
        &mut set.hostgroups
    }
}

impl Entity for Service {
    const KIND: TableKind = TableKind::Services;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> Result<(), StoreError> {
        require_name(Self::KIND, "name", &self.name)?;
        let invalid = |message: String| StoreError::validation(Self::KIND.as_str(), "ports", message);
        match self.protocol {
            Protocol::Tcp | Protocol::Udp => {
                if let Some(spec) = self.port_spec().map_err(invalid)?
                    && !spec.is_simple()
                    && spec.slots() > MULTIPORT_MAX
                {
                    return Err(invalid(format!(
                        "'{}' needs {} multiport slots, at most {MULTIPORT_MAX} are allowed",
                        self.ports.trim(),
                        spec.slots()
                    )));
                }
            }
            Protocol::Icmp => {
                self.icmp_type().map_err(invalid)?;
            }
            Protocol::Any => {
                if !self.ports.trim().is_empty() {
                    return Err(invalid(String::from(
                        "a service matching any protocol cannot specify ports",
                    )));
                }
            }
        }
        Ok(())
    }

    fn digest(&self, hasher: &mut Sha256) {
        feed(hasher, self.name.as_bytes());
        feed(hasher, self.protocol.as_str().as_bytes());
        feed(hasher, self.ports.trim().as_bytes());
    }

    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }

    fn table(set: &FireSet) -> &Table<Self> {
        &set.services
    }

    fn table_mut(set: &mut FireSet) -> &mut Table<Self> {
        &mut set.services
    }
}

impl Entity for Rule {
    const KIND: TableKind = TableKind::Rules;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::validation(Self::KIND.as_str(), "name", "must not be empty"));
        }
        if self.name.chars().any(|c| c.is_control() || c == '"') {
            return Err(StoreError::validation(
                Self::KIND.as_str(),
                "name",
                "must not contain control characters or double quotes",
            ));
        }
        for (field, value) in [
            ("src", &self.src),
            ("src_serv", &self.src_serv),
            ("dst", &self.dst),
            ("dst_serv", &self.dst_serv),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::validation(
                    Self::KIND.as_str(),
                    field,
                    "must name a record or the wildcard",
                ));
            }
        }
        if let Some(level) = self.log_level
            && level > 7
        {
            return Err(StoreError::validation(
                Self::KIND.as_str(),
                "log_level",
                format!("{level} is not a syslog level (0-7)"),
            ));
        }
        Ok(())
    }

    fn digest(&self, hasher: &mut Sha256) {
        feed(hasher, self.name.as_bytes());
        feed(hasher, self.src.as_bytes());
        feed(hasher, self.src_serv.as_bytes());
        feed(hasher, self.dst.as_bytes());
        feed(hasher, self.dst_serv.as_bytes());
        feed(hasher, self.action.as_str().as_bytes());
        match self.log_level {
            Some(level) => feed(hasher, &[1, level]),
            None => feed(hasher, &[0]),
        }
        feed(hasher, self.desc.as_bytes());
        feed(hasher, &[u8::from(self.enabled)]);
    }

    fn references(&self) -> Vec<Reference> {
        let mut refs = Vec::with_capacity(4);
        for (field, name) in [("src", &self.src), ("dst", &self.dst)] {
            if !is_wildcard(name) {
                refs.push(Reference::endpoint(field, name));
            }
        }
        for (field, name) in [("src_serv", &self.src_serv), ("dst_serv", &self.dst_serv)] {
            if !is_wildcard(name) {
                refs.push(Reference::service(field, name));
            }
        }
        refs
    }

    fn table(set: &FireSet) -> &Table<Self> {
        &set.rules
    }

    fn table_mut(set: &mut FireSet) -> &mut Table<Self> {
        &mut set.rules
    }
}
