//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::access::Role;
use crate::model::{Rid, TableKind};

/// Firelet - distributed firewall policy manager.
#[derive(Parser, Debug)]
#[command(name = "firelet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "FIRELET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Policy repository directory (overrides the configuration).
    #[arg(short, long, global = true)]
    pub repository: Option<PathBuf>,

    /// Commit author (overrides the configuration).
    #[arg(long, global = true)]
    pub author: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Commit the working state.
    Save {
        /// Commit message.
        message: String,
    },

    /// Discard uncommitted changes.
    Reset,

    /// Report whether there are uncommitted changes.
    SaveNeeded,

    /// Browse and restore the commit history.
    Version {
        /// Version subcommand.
        #[command(subcommand)]
        command: VersionCommands,
    },

    /// Compile the working state and print the rulesets.
    Compile {
        /// Only print this host.
        host: Option<String>,
    },

    /// Diff the compiled working state against what is deployed.
    Check,

    /// Deploy the working state to the fleet.
    Deploy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List the records of a table.
    List {
        /// Table (hosts, networks, hostgroups, services, rules).
        table: TableKind,
    },

    /// Show one record and its token.
    Show {
        /// Table.
        table: TableKind,
        /// Row id.
        rid: Rid,
    },

    /// Add a record from a YAML or JSON file.
    Add {
        /// Table.
        table: TableKind,
        /// File holding the record fields.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Replace a record from a YAML or JSON file.
    Update {
        /// Table.
        table: TableKind,
        /// Row id.
        rid: Rid,
        /// Token returned by `show` or `list`.
        #[arg(short, long)]
        token: String,
        /// File holding the new record fields.
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Delete a record.
    Delete {
        /// Table.
        table: TableKind,
        /// Row id.
        rid: Rid,
        /// Token returned by `show` or `list`.
        #[arg(short, long)]
        token: String,
    },

    /// Enable, disable and reorder rules.
    Rule {
        /// Rule subcommand.
        #[command(subcommand)]
        command: RuleCommands,
    },

    /// Manage front-end users.
    User {
        /// User subcommand.
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Validate the configuration file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },
}

/// Commit history subcommands.
#[derive(Subcommand, Debug)]
pub enum VersionCommands {
    /// List commits, newest first.
    List {
        /// Maximum number of commits.
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },

    /// Show the record changes of a commit.
    Diff {
        /// Commit id (or prefix) or offset from the head.
        reference: String,
    },

    /// Restore an earlier commit as a new commit.
    Rollback {
        /// Commit id (or prefix) or offset from the head.
        reference: String,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Rule chain subcommands.
#[derive(Subcommand, Debug, Clone, Copy)]
pub enum RuleCommands {
    /// Enable a rule.
    Enable {
        /// Row id.
        rid: Rid,
    },
    /// Disable a rule.
    Disable {
        /// Row id.
        rid: Rid,
    },
    /// Move a rule one position up.
    Moveup {
        /// Row id.
        rid: Rid,
    },
    /// Move a rule one position down.
    Movedown {
        /// Row id.
        rid: Rid,
    },
}

/// User management subcommands.
#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// List users.
    List,

    /// Add a user.
    Add {
        /// User name.
        name: String,
        /// Role (readonly, editor, admin).
        role: Role,
        /// Secret; read from the environment if omitted.
        #[arg(long, env = "FIRELET_USER_SECRET", hide_env_values = true)]
        secret: String,
        /// Contact address.
        #[arg(long, default_value = "")]
        email: String,
    },

    /// Delete a user.
    Del {
        /// User name.
        name: String,
    },

    /// Check a user's secret.
    Validate {
        /// User name.
        name: String,
        /// Secret; read from the environment if omitted.
        #[arg(long, env = "FIRELET_USER_SECRET", hide_env_values = true)]
        secret: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update() {
        let cli = Cli::try_parse_from([
            "firelet", "update", "hosts", "3", "--token", "abc", "--file", "host.yaml",
        ])
        .expect("parse");

        match cli.command {
            Commands::Update {
                table, rid, token, ..
            } => {
                assert_eq!(table, TableKind::Hosts);
                assert_eq!(rid, 3);
                assert_eq!(token, "abc");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_rollback_offset() {
        let cli = Cli::try_parse_from(["firelet", "--output", "json", "version", "rollback", "2", "-y"])
            .expect("parse");
        assert!(matches!(cli.output, OutputFormat::Json));
        assert!(matches!(
            cli.command,
            Commands::Version {
                command: VersionCommands::Rollback { ref reference, yes: true }
            } if reference == "2"
        ));
    }

    #[test]
    fn test_rejects_unknown_table() {
        assert!(Cli::try_parse_from(["firelet", "list", "routers"]).is_err());
    }

    #[test]
    fn test_parse_user_add_role() {
        let cli = Cli::try_parse_from([
            "firelet", "user", "add", "bob", "editor", "--secret", "pw",
        ])
        .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::User {
                command: UserCommands::Add { role: Role::Editor, .. }
            }
        ));
    }
}
