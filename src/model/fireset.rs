//! A complete snapshot of the five tables.
//!
//! [`FireSet`] enforces the invariants that span records: unique names,
//! references that resolve, no orphaned references on delete or rename,
//! and no host group that contains itself.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::records::{Entity, Host, HostGroup, Network, Rule, Service, TableKind, is_wildcard};
use super::table::{Rid, Table};
use crate::error::StoreError;

/// What a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// A host, network or host group.
    Endpoint,
    /// A service.
    Service,
}

/// A name one record uses to refer to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Field holding the reference.
    pub field: &'static str,
    /// Target kind.
    pub kind: ReferenceKind,
    /// Target name.
    pub name: String,
}

impl Reference {
    /// An endpoint reference.
    #[must_use]
    pub fn endpoint(field: &'static str, name: &str) -> Self {
        Self {
            field,
            kind: ReferenceKind::Endpoint,
            name: name.to_string(),
        }
    }

    /// A service reference.
    #[must_use]
    pub fn service(field: &'static str, name: &str) -> Self {
        Self {
            field,
            kind: ReferenceKind::Service,
            name: name.to_string(),
        }
    }
}

/// All five tables at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireSet {
    /// Host interfaces.
    #[serde(default)]
    pub hosts: Table<Host>,
    /// Networks.
    #[serde(default)]
    pub networks: Table<Network>,
    /// Host groups.
    #[serde(default)]
    pub hostgroups: Table<HostGroup>,
    /// Services.
    #[serde(default)]
    pub services: Table<Service>,
    /// The rule chain, in chain order.
    #[serde(default)]
    pub rules: Table<Rule>,
}

impl FireSet {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table.
    #[must_use]
    pub fn len_of(&self, kind: TableKind) -> usize {
        match kind {
            TableKind::Hosts => self.hosts.len(),
            TableKind::Networks => self.networks.len(),
            TableKind::HostGroups => self.hostgroups.len(),
            TableKind::Services => self.services.len(),
            TableKind::Rules => self.rules.len(),
        }
    }

    /// Finds which endpoint table a name belongs to.
    #[must_use]
    pub fn endpoint_kind(&self, name: &str) -> Option<TableKind> {
        if self.hosts.records().any(|h| h.name() == name) {
            Some(TableKind::Hosts)
        } else if self.networks.records().any(|n| n.name == name) {
            Some(TableKind::Networks)
        } else if self.hostgroups.records().any(|g| g.name == name) {
            Some(TableKind::HostGroups)
        } else {
            None
        }
    }

    /// Looks up a host group by name.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&HostGroup> {
        self.hostgroups.records().find(|g| g.name == name)
    }

    /// Looks up a network by name.
    #[must_use]
    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.records().find(|n| n.name == name)
    }

    /// Looks up a host interface by its `hostname:iface` key.
    #[must_use]
    pub fn host(&self, key: &str) -> Option<&Host> {
        self.hosts.records().find(|h| h.name() == key)
    }

    /// Looks up a service by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.records().find(|s| s.name == name)
    }

    fn resolves(&self, reference: &Reference) -> bool {
        match reference.kind {
            ReferenceKind::Endpoint => self.endpoint_kind(&reference.name).is_some(),
            ReferenceKind::Service => self.service(&reference.name).is_some(),
        }
    }

    /// Lists the records that reference `name`, as `"<kind> <name>"`.
    #[must_use]
    pub fn referrers(&self, kind: ReferenceKind, name: &str) -> Vec<String> {
        let mut found = Vec::new();
        let mut scan = |table: TableKind, owner: String, refs: Vec<Reference>| {
            if refs.iter().any(|r| r.kind == kind && r.name == name) {
                found.push(format!("{} {owner}", table.singular()));
            }
        };

        for host in self.hosts.records() {
            scan(TableKind::Hosts, host.name(), host.references());
        }
        for group in self.hostgroups.records() {
            scan(TableKind::HostGroups, group.name(), group.references());
        }
        for rule in self.rules.records() {
            scan(TableKind::Rules, rule.name(), rule.references());
        }
        found
    }

    /// Searches the group graph for a cycle reachable from `start`.
    ///
    /// Returns the offending membership path, e.g. `g1 -> g2 -> g1`.
    #[must_use]
    pub fn group_cycle_from(&self, start: &str) -> Option<String> {
        let mut path = Vec::new();
        let mut done = BTreeSet::new();
        self.walk_groups(start, &mut path, &mut done)
    }

    /// Searches every group for a membership cycle.
    #[must_use]
    pub fn find_group_cycle(&self) -> Option<String> {
        let mut done = BTreeSet::new();
        self.hostgroups.records().find_map(|group| {
            let mut path = Vec::new();
            self.walk_groups(&group.name, &mut path, &mut done)
        })
    }

    fn walk_groups<'a>(
        &'a self,
        name: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
    ) -> Option<String> {
        if let Some(pos) = path.iter().position(|p| *p == name) {
            let mut cycle: Vec<&str> = path[pos..].to_vec();
            cycle.push(name);
            return Some(cycle.join(" -> "));
        }
        if done.contains(name) {
            return None;
        }
        let group = self.group(name)?;

        path.push(name);
        for child in &group.childs {
            if let Some(cycle) = self.walk_groups(child, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(name);
        None
    }

    fn name_taken<E: Entity>(&self, name: &str, except: Option<Rid>) -> bool {
        let others = |rid: Rid| except != Some(rid);
        match E::KIND {
            TableKind::Services => self
                .services
                .rows()
                .iter()
                .any(|row| others(row.rid) && row.record.name == name),
            TableKind::Rules => false,
            TableKind::Hosts | TableKind::Networks | TableKind::HostGroups => {
                let same_table = |kind: TableKind| kind == E::KIND;
                self.hosts.rows().iter().any(|row| {
                    (!same_table(TableKind::Hosts) || others(row.rid)) && row.record.name() == name
                }) || self.networks.rows().iter().any(|row| {
                    (!same_table(TableKind::Networks) || others(row.rid))
                        && row.record.name == name
                }) || self.hostgroups.rows().iter().any(|row| {
                    (!same_table(TableKind::HostGroups) || others(row.rid))
                        && row.record.name == name
                })
            }
        }
    }

    fn check_write<E: Entity>(&self, record: &E, except: Option<Rid>) -> Result<(), StoreError> {
        record.validate()?;

        let name = record.name();
        if self.name_taken::<E>(&name, except) {
            let field = if E::KIND == TableKind::Hosts { "iface" } else { "name" };
            return Err(StoreError::validation(
                E::KIND.as_str(),
                field,
                format!("the name '{name}' is already in use"),
            ));
        }

        for reference in record.references() {
            if !self.resolves(&reference) {
                return Err(StoreError::validation(
                    E::KIND.as_str(),
                    reference.field,
                    format!("'{}' does not exist", reference.name),
                ));
            }
        }
        Ok(())
    }

    fn kind_of_reference<E: Entity>() -> ReferenceKind {
        if E::KIND == TableKind::Services {
            ReferenceKind::Service
        } else {
            ReferenceKind::Endpoint
        }
    }

    fn reject_cycles<E: Entity>(&self, record: &E) -> Result<(), StoreError> {
        if E::KIND != TableKind::HostGroups {
            return Ok(());
        }
        match self.group_cycle_from(&record.name()) {
            Some(cycle) => Err(StoreError::validation(
                E::KIND.as_str(),
                "childs",
                format!("membership cycle: {cycle}"),
            )),
            None => Ok(()),
        }
    }

    /// Validates and appends a record, returning its new rid.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the record is malformed, its name is
    /// taken, a reference does not resolve, or it closes a group cycle.
    pub fn insert<E: Entity>(&mut self, record: E) -> Result<Rid, StoreError> {
        self.check_write(&record, None)?;
        let rid = E::table_mut(self).push(record.clone());
        if let Err(e) = self.reject_cycles(&record) {
            E::table_mut(self).remove(rid);
            return Err(e);
        }
        Ok(rid)
    }

    /// Validates and replaces the record at `rid`, returning the old one.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rid, `Referential` if a referenced
    /// record would be renamed, or a validation error as for [`Self::insert`].
    pub fn replace<E: Entity>(&mut self, rid: Rid, record: E) -> Result<E, StoreError> {
        let current = E::table(self).get(rid).ok_or_else(|| StoreError::NotFound {
            table: E::KIND.to_string(),
            rid,
        })?;

        let old_name = current.name();
        if old_name != record.name() {
            let referrers = self.referrers(Self::kind_of_reference::<E>(), &old_name);
            if !referrers.is_empty() {
                return Err(StoreError::Referential {
                    table: E::KIND.to_string(),
                    name: old_name,
                    referrers,
                });
            }
        }
        self.check_write(&record, Some(rid))?;

        let previous = E::table_mut(self)
            .replace(rid, record.clone())
            .ok_or_else(|| StoreError::NotFound {
                table: E::KIND.to_string(),
                rid,
            })?;
        if let Err(e) = self.reject_cycles(&record) {
            E::table_mut(self).replace(rid, previous);
            return Err(e);
        }
        Ok(previous)
    }

    /// Removes the record at `rid` if nothing references it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown rid or `Referential` listing the
    /// records that still reference it.
    pub fn remove<E: Entity>(&mut self, rid: Rid) -> Result<E, StoreError> {
        let current = E::table(self).get(rid).ok_or_else(|| StoreError::NotFound {
            table: E::KIND.to_string(),
            rid,
        })?;

        if E::KIND != TableKind::Rules {
            let name = current.name();
            let referrers = self.referrers(Self::kind_of_reference::<E>(), &name);
            if !referrers.is_empty() {
                return Err(StoreError::Referential {
                    table: E::KIND.to_string(),
                    name,
                    referrers,
                });
            }
        }

        E::table_mut(self).remove(rid).ok_or_else(|| StoreError::NotFound {
            table: E::KIND.to_string(),
            rid,
        })
    }

    /// Row ids and records of one table, keyed by rid.
    pub(crate) fn keyed<E: Entity>(&self) -> BTreeMap<Rid, &E> {
        E::table(self)
            .rows()
            .iter()
            .map(|row| (row.rid, &row.record))
            .collect()
    }

    /// Returns true if a reference is the wildcard or resolves to an endpoint.
    #[must_use]
    pub fn is_endpoint(&self, name: &str) -> bool {
        is_wildcard(name) || self.endpoint_kind(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::model::{Action, Protocol};

    fn network(name: &str) -> Network {
        Network {
            name: name.to_string(),
            ip_addr: Ipv4Addr::new(10, 0, 0, 0),
            masklen: 24,
        }
    }

    fn group(name: &str, childs: &[&str]) -> HostGroup {
        HostGroup {
            name: name.to_string(),
            childs: childs.iter().map(ToString::to_string).collect(),
        }
    }

    fn rule(name: &str, src: &str, dst_serv: &str) -> Rule {
        Rule {
            name: name.to_string(),
            src: src.to_string(),
            src_serv: String::from("*"),
            dst: String::from("*"),
            dst_serv: dst_serv.to_string(),
            action: Action::Accept,
            log_level: None,
            desc: String::new(),
            enabled: true,
        }
    }

    #[test]
    fn test_names_are_global_across_endpoints() {
        let mut set = FireSet::new();
        set.insert(network("lan")).expect("insert network");
        let mut dmz = network("dmz");
        dmz.ip_addr = Ipv4Addr::new(10, 9, 0, 0);
        set.insert(dmz).expect("insert network");

        let err = set.insert(group("lan", &["dmz"])).expect_err("duplicate name");
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let mut set = FireSet::new();
        let err = set.insert(rule("r1", "nowhere", "*")).expect_err("dangling");
        assert!(matches!(err, StoreError::Validation { ref field, .. } if field == "src"));
    }

    #[test]
    fn test_group_cycle_rejected_at_write_time() {
        let mut set = FireSet::new();
        set.insert(network("lan")).expect("insert network");
        let g1 = set.insert(group("g1", &["lan"])).expect("insert g1");
        set.insert(group("g2", &["g1"])).expect("insert g2");

        let err = set
            .replace(g1, group("g1", &["g2"]))
            .expect_err("cycle must be rejected");
        assert!(err.to_string().contains("g1 -> g2 -> g1"));

        // the previous membership is kept
        assert_eq!(set.group("g1").map(|g| g.childs.clone()), Some(vec![String::from("lan")]));
        assert!(set.find_group_cycle().is_none());
    }

    #[test]
    fn test_cycle_detection_on_raw_tables() {
        let mut set = FireSet::new();
        set.hostgroups.push(group("a", &["b"]));
        set.hostgroups.push(group("b", &["c"]));
        set.hostgroups.push(group("c", &["a"]));

        assert_eq!(set.find_group_cycle().as_deref(), Some("a -> b -> c -> a"));
    }

    #[test]
    fn test_remove_referenced_record() {
        let mut set = FireSet::new();
        let lan = set.insert(network("lan")).expect("insert network");
        let svc = set
            .insert(Service {
                name: String::from("ssh"),
                protocol: Protocol::Tcp,
                ports: String::from("22"),
            })
            .expect("insert service");
        let r1 = set.insert(rule("r1", "lan", "ssh")).expect("insert rule");

        let err = set.remove::<Network>(lan).expect_err("referenced");
        assert_eq!(err.to_string(), "networks 'lan' is still referenced by: rule r1");
        assert!(matches!(set.remove::<Service>(svc), Err(StoreError::Referential { .. })));

        set.remove::<Rule>(r1).expect("remove rule");
        set.remove::<Network>(lan).expect("remove network");
        assert!(matches!(set.remove::<Network>(lan), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_rename_of_referenced_record() {
        let mut set = FireSet::new();
        let lan = set.insert(network("lan")).expect("insert network");
        set.insert(group("inside", &["lan"])).expect("insert group");

        let err = set.replace(lan, network("office")).expect_err("rename");
        assert!(matches!(err, StoreError::Referential { .. }));

        let mut moved = network("lan");
        moved.ip_addr = Ipv4Addr::new(10, 1, 0, 0);
        set.replace(lan, moved).expect("same name is fine");
    }
}
