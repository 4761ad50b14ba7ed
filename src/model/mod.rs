//! Policy data model.
//!
//! This module defines the five record kinds operators edit (hosts, networks,
//! host groups, services and rules), the row-id addressed tables that hold
//! them, and [`FireSet`], a complete snapshot of all five tables together
//! with the cross-record invariants enforced at write time.

mod fireset;
mod ports;
mod records;
mod table;

pub use fireset::{FireSet, Reference, ReferenceKind};
pub use ports::{PortRange, PortSpec, MULTIPORT_MAX};
pub use records::{
    is_wildcard, Action, Entity, Host, HostGroup, Network, Protocol, Rule, Service, TableKind,
    WILDCARD,
};
pub use table::{Rid, Row, Table};
