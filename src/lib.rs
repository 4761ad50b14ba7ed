// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Firelet
//!
//! Distributed firewall management: a versioned policy store, a rule
//! compiler and a fleet deployer for iptables hosts.
//!
//! ## Overview
//!
//! Operators edit five declarative tables (hosts, networks, host groups,
//! services and an ordered rule chain). Edits accumulate in a working state
//! and are committed with `save`. The working state is compiled into one
//! `iptables-restore` ruleset per managed host, diffed against what was last
//! deployed with `check`, and pushed to the fleet with `deploy`.
//!
//! ## Architecture
//!
//! 1. **Entity Store**: working state plus commit history, optimistic
//!    concurrency tokens on every record
//! 2. **Rule Compiler**: resolves endpoints and services and emits per-host
//!    instructions in chain order
//! 3. **Check Engine**: per-host line diff against the deployed baseline
//! 4. **Deployer**: best-effort parallel push, one outcome per host
//!
//! ## Modules
//!
//! - [`model`]: Record types and the five-table snapshot
//! - [`store`]: Entity store, tokens, repository backends, lock
//! - [`compiler`]: Endpoint resolution and ruleset rendering
//! - [`check`]: Check engine
//! - [`deploy`]: Deployer, host transports, deployed baseline
//! - [`pipeline`]: Role-gated save / check / deploy facade
//! - [`access`]: Roles, sessions and the user directory
//! - [`messages`]: Bounded operator message log
//! - [`config`]: Configuration parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! repository:
//!   backend: git
//!   path: /var/lib/firelet
//! deploy:
//!   ssh_user: firelet
//!   timeout_secs: 30
//! compiler:
//!   default_policy: drop
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod access;
pub mod check;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod deploy;
pub mod error;
pub mod messages;
pub mod model;
pub mod pipeline;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use access::{ActionClass, Authenticator, Role, Session, UserDirectory};
pub use check::{CheckEngine, CheckReport};
pub use cli::{Cli, Commands, OutputFormatter};
pub use compiler::{CompiledPolicy, DefaultPolicy, RuleCompiler};
pub use config::{ConfigParser, ConfigValidator, FireletConfig};
pub use deploy::{DeployReport, Deployer, HostOutcome, HostTransport, SshTransport};
pub use error::{FireletError, Result};
pub use messages::MessageLog;
pub use model::{FireSet, Host, HostGroup, Network, Rule, Service, TableKind};
pub use pipeline::Pipeline;
pub use store::{EntityStore, GitRepository, MemoryRepository, PolicyRepository};
