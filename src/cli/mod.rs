//! CLI module for the Firelet policy manager.
//!
//! This module provides the command-line interface for editing, checking
//! and deploying firewall policy.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, RuleCommands, UserCommands, VersionCommands};
pub use output::{OutputFormatter, Summary};
