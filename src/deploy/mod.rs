//! Deployer: pushes compiled rulesets to the fleet.
//!
//! This module provides the [`Deployer`], the [`HostTransport`] seam with
//! its ssh implementation, and the deployed-state baseline that the check
//! engine diffs against.

mod deployed;
mod deployer;
mod transport;

pub use deployed::{DeployHistoryEntry, DeployedState, DeployedStore, DEPLOYED_FILE};
pub use deployer::{DeployReport, Deployer, HostOutcome, DEFAULT_PARALLELISM, DEFAULT_TIMEOUT};
pub use transport::{HostTransport, SshTransport};
