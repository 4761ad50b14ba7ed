//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use std::collections::BTreeMap;
use std::fmt::Write;

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::access::Role;
use crate::check::{CheckReport, LineChange};
use crate::compiler::CompiledPolicy;
use crate::deploy::{DeployReport, HostOutcome};
use crate::model::{Host, HostGroup, Network, Rule, Service};
use crate::store::{ChangeKind, CommitInfo, Record, VersionDiff};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Rid")]
    rid: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Details")]
    details: String,
    #[tabled(rename = "Token")]
    token: String,
}

/// Commit row for table display.
#[derive(Tabled)]
struct CommitRow {
    #[tabled(rename = "#")]
    offset: usize,
    #[tabled(rename = "Commit")]
    commit: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Author")]
    author: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Deploy outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// User row for table display.
#[derive(Tabled)]
struct UserRow {
    #[tabled(rename = "User")]
    name: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Email")]
    email: String,
}

/// One-line description of a record for tables.
pub trait Summary {
    /// Name shown in the Name column.
    fn title(&self) -> String;
    /// Remaining fields, compact.
    fn details(&self) -> String;
}

impl Summary for Host {
    fn title(&self) -> String {
        Self::key(&self.hostname, &self.iface)
    }

    fn details(&self) -> String {
        let mut flags = Vec::new();
        if self.local_fw {
            flags.push("local_fw");
        }
        if self.network_fw {
            flags.push("network_fw");
        }
        if self.mng {
            flags.push("mng");
        }
        let mut out = format!("{}/{}", self.ip_addr, self.masklen);
        if !flags.is_empty() {
            let _ = write!(out, " [{}]", flags.join(","));
        }
        if !self.routed.is_empty() {
            let routed: Vec<&str> = self.routed.iter().map(String::as_str).collect();
            let _ = write!(out, " routes {}", routed.join(","));
        }
        out
    }
}

impl Summary for Network {
    fn title(&self) -> String {
        self.name.clone()
    }

    fn details(&self) -> String {
        format!("{}/{}", self.ip_addr, self.masklen)
    }
}

impl Summary for HostGroup {
    fn title(&self) -> String {
        self.name.clone()
    }

    fn details(&self) -> String {
        self.childs.join(", ")
    }
}

impl Summary for Service {
    fn title(&self) -> String {
        self.name.clone()
    }

    fn details(&self) -> String {
        if self.ports.is_empty() {
            self.protocol.as_str().to_string()
        } else {
            format!("{} {}", self.protocol.as_str(), self.ports)
        }
    }
}

impl Summary for Rule {
    fn title(&self) -> String {
        self.name.clone()
    }

    fn details(&self) -> String {
        let mut out = format!(
            "{}:{} -> {}:{} {}",
            self.src, self.src_serv, self.dst, self.dst_serv, self.action
        );
        if let Some(level) = self.log_level {
            let _ = write!(out, " log {level}");
        }
        if !self.enabled {
            out = format!("{} {out}", "(disabled)".dimmed());
        }
        out
    }
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn json(value: &impl Serialize) -> String {
        serde_json::to_string_pretty(value).unwrap_or_default()
    }

    /// Formats the records of a table.
    #[must_use]
    pub fn format_records<E: Summary + Serialize>(&self, records: &[Record<E>]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&records),
            OutputFormat::Text => {
                if records.is_empty() {
                    return String::from("   No records.\n");
                }
                let rows: Vec<RecordRow> = records
                    .iter()
                    .map(|r| RecordRow {
                        rid: r.rid,
                        name: r.fields.title(),
                        details: Self::truncate(&r.fields.details(), 60),
                        token: r.token.chars().take(8).collect(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats one record with its full token.
    #[must_use]
    pub fn format_record<E: Summary + Serialize>(&self, record: &Record<E>) -> String {
        match self.format {
            OutputFormat::Json => Self::json(record),
            OutputFormat::Text => {
                let fields = serde_yaml::to_string(&record.fields).unwrap_or_default();
                format!(
                    "{} {} (rid {})\n{fields}token: {}\n",
                    "●".cyan(),
                    record.fields.title().bold(),
                    record.rid,
                    record.token
                )
            }
        }
    }

    /// Formats the commit history.
    #[must_use]
    pub fn format_commits(&self, commits: &[CommitInfo]) -> String {
        match self.format {
            OutputFormat::Json => Self::json(&commits),
            OutputFormat::Text => {
                if commits.is_empty() {
                    return String::from("   No commits yet.\n");
                }
                let rows: Vec<CommitRow> = commits
                    .iter()
                    .enumerate()
                    .map(|(i, c)| CommitRow {
                        offset: i,
                        commit: c.short_id().to_string(),
                        date: c.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                        author: c.author.clone(),
                        message: Self::truncate(&c.message, 50),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the record changes of one commit.
    #[must_use]
    pub fn format_version_diff(&self, diff: &VersionDiff) -> String {
        match self.format {
            OutputFormat::Json => Self::json(diff),
            OutputFormat::Text => {
                let mut output = format!("\nCommit {}\n", diff.commit_id);
                if diff.is_empty() {
                    output.push_str("   No record changes.\n");
                    return output;
                }
                for change in &diff.changes {
                    let marker = match change.kind {
                        ChangeKind::Added => "+".green(),
                        ChangeKind::Removed => "-".red(),
                        ChangeKind::Modified => "~".yellow(),
                    };
                    let _ = writeln!(
                        output,
                        "   {marker} {} {} (rid {})",
                        change.table.singular(),
                        change.name,
                        change.rid
                    );
                }
                output
            }
        }
    }

    /// Formats compiled rulesets, optionally for one host.
    #[must_use]
    pub fn format_compiled(&self, compiled: &CompiledPolicy, host: Option<&str>) -> String {
        let rendered: Vec<(String, String)> = compiled
            .rendered()
            .into_iter()
            .filter(|(name, _)| host.is_none_or(|h| name == h))
            .collect();

        match self.format {
            OutputFormat::Json => {
                let by_host: BTreeMap<String, String> = rendered.into_iter().collect();
                Self::json(&by_host)
            }
            OutputFormat::Text => {
                if rendered.is_empty() {
                    return String::from("   No managed hosts.\n");
                }
                let mut output = String::new();
                for (name, text) in rendered {
                    let _ = writeln!(output, "{} {}", "▶".cyan(), name.bold());
                    output.push_str(&text);
                    output.push('\n');
                }
                output
            }
        }
    }

    /// Formats a check report as per-host diffs.
    #[must_use]
    pub fn format_check(&self, report: &CheckReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => {
                if report.is_clean() {
                    return format!(
                        "{} No changes - deployed rulesets are up to date.\n",
                        "✓".green()
                    );
                }
                let mut output = String::new();
                for (host, diff) in &report.hosts {
                    if diff.is_unchanged() {
                        continue;
                    }
                    let _ = writeln!(output, "\n{} {}", "▶".cyan(), host.bold());
                    for line in &diff.changes {
                        let text = match line.change {
                            LineChange::Added => format!("+ {}", line.text).green(),
                            LineChange::Removed => format!("- {}", line.text).red(),
                        };
                        let _ = writeln!(output, "  {text}");
                    }
                }
                let _ = write!(
                    output,
                    "\nCheck: {} of {} hosts would change\n",
                    report.changed_hosts().count().to_string().yellow(),
                    report.hosts.len()
                );
                output
            }
        }
    }

    /// Formats per-host deploy outcomes.
    #[must_use]
    pub fn format_deploy(&self, report: &DeployReport) -> String {
        match self.format {
            OutputFormat::Json => Self::json(report),
            OutputFormat::Text => {
                if report.outcomes.is_empty() {
                    return String::from("   No managed hosts to deploy.\n");
                }
                let rows: Vec<OutcomeRow> = report
                    .outcomes
                    .iter()
                    .map(|(host, outcome)| OutcomeRow {
                        host: host.clone(),
                        outcome: Self::format_outcome(outcome),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                let status = if report.success {
                    "success".green().to_string()
                } else {
                    "partial".yellow().to_string()
                };
                let _ = write!(
                    output,
                    "\nDeploy: {status} ({} of {} hosts applied)\n",
                    report.applied().count(),
                    report.outcomes.len()
                );
                output
            }
        }
    }

    /// Formats the user list.
    #[must_use]
    pub fn format_users(&self, users: &[(String, Role, String)]) -> String {
        match self.format {
            OutputFormat::Json => {
                let value: Vec<serde_json::Value> = users
                    .iter()
                    .map(|(name, role, email)| {
                        serde_json::json!({ "name": name, "role": role, "email": email })
                    })
                    .collect();
                Self::json(&value)
            }
            OutputFormat::Text => {
                if users.is_empty() {
                    return String::from("   No users.\n");
                }
                let rows: Vec<UserRow> = users
                    .iter()
                    .map(|(name, role, email)| UserRow {
                        name: name.clone(),
                        role: role.to_string(),
                        email: email.clone(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats a deploy outcome with color.
    fn format_outcome(outcome: &HostOutcome) -> String {
        match outcome {
            HostOutcome::Applied => "applied".green().to_string(),
            HostOutcome::Unreachable(reason) => {
                format!("{} {}", "unreachable".red(), Self::truncate(reason, 50))
            }
            HostOutcome::Rejected(reason) => {
                format!("{} {}", "rejected".red(), Self::truncate(reason, 50))
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.status_line("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.status_line("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.status_line("warning", &"⚠".yellow().to_string(), message)
    }

    fn status_line(&self, status: &str, symbol: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                Self::json(&serde_json::json!({ "status": status, "message": message }))
            }
            OutputFormat::Text => format!("{symbol} {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::HostDiff;
    use crate::model::{Action, Protocol};

    fn plain() -> OutputFormatter {
        colored::control::set_override(false);
        OutputFormatter::new(OutputFormat::Text)
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a long message", 8), "a lon...");
    }

    #[test]
    fn test_rule_summary() {
        let rule = Rule {
            name: String::from("ssh"),
            src: String::from("admins"),
            src_serv: String::from("*"),
            dst: String::from("web:eth0"),
            dst_serv: String::from("ssh"),
            action: Action::Accept,
            log_level: Some(4),
            desc: String::new(),
            enabled: true,
        };
        assert_eq!(rule.details(), "admins:* -> web:eth0:ssh ACCEPT log 4");

        let svc = Service {
            name: String::from("dns"),
            protocol: Protocol::Udp,
            ports: String::from("53"),
        };
        assert_eq!(svc.details(), "udp 53");
    }

    #[test]
    fn test_check_text_lists_changed_hosts_only() {
        let mut hosts = BTreeMap::new();
        hosts.insert(String::from("a"), HostDiff::between("x\n", "x\n"));
        hosts.insert(String::from("b"), HostDiff::between("x\n", "y\n"));
        let report = CheckReport { hosts };

        let text = plain().format_check(&report);
        assert!(text.contains("- x"));
        assert!(text.contains("+ y"));
        assert!(!text.contains("▶ a"));
        assert!(text.contains("1 of 2 hosts"));
    }

    #[test]
    fn test_json_status_line() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let value: serde_json::Value =
            serde_json::from_str(&formatter.success("saved")).expect("json");
        assert_eq!(value["status"], "success");
        assert_eq!(value["message"], "saved");
    }
}
