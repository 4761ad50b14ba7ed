//! Host transports: how a rendered ruleset reaches a host.

use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::DeployError;

/// Exit status ssh reserves for its own connection failures.
const SSH_CONNECT_FAILURE: i32 = 255;

/// Pushes a ruleset to one host and applies it atomically.
///
/// Implementations must either replace the host's filter table with
/// `ruleset` or leave it untouched. They must not retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Applies `ruleset` on `hostname`, reachable at `address`.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` if the host cannot be contacted and `Rejected`
    /// if it refuses the ruleset.
    async fn apply(
        &self,
        hostname: &str,
        address: Ipv4Addr,
        ruleset: &str,
    ) -> std::result::Result<(), DeployError>;

    /// Human-readable transport name.
    fn name(&self) -> &'static str;
}

/// Applies rulesets over ssh by piping them into `iptables-restore`.
#[derive(Debug, Clone)]
pub struct SshTransport {
    user: String,
    port: u16,
    connect_timeout: Duration,
    apply_command: String,
}

impl SshTransport {
    /// Creates an ssh transport.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        apply_command: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            port,
            connect_timeout,
            apply_command: apply_command.into(),
        }
    }

    /// Arguments passed to the `ssh` binary.
    fn args(&self, address: Ipv4Addr) -> Vec<String> {
        vec![
            String::from("-o"),
            String::from("BatchMode=yes"),
            String::from("-o"),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            String::from("-p"),
            self.port.to_string(),
            format!("{}@{address}", self.user),
            self.apply_command.clone(),
        ]
    }
}

#[async_trait]
impl HostTransport for SshTransport {
    async fn apply(
        &self,
        hostname: &str,
        address: Ipv4Addr,
        ruleset: &str,
    ) -> std::result::Result<(), DeployError> {
        debug!("Pushing ruleset to {hostname} ({address}) over ssh");

        let unreachable = |message: String| DeployError::Unreachable {
            host: hostname.to_string(),
            message,
        };

        let mut child = Command::new("ssh")
            .args(self.args(address))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unreachable(format!("Failed to spawn ssh: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(ruleset.as_bytes())
                .await
                .map_err(|e| unreachable(format!("Failed to write ruleset: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| unreachable(format!("ssh failed: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!("Ruleset push to {hostname} failed: {stderr}");
        match output.status.code() {
            Some(SSH_CONNECT_FAILURE) | None => Err(unreachable(stderr)),
            Some(code) => Err(DeployError::Rejected {
                host: hostname.to_string(),
                reason: if stderr.is_empty() {
                    format!("apply command exited with status {code}")
                } else {
                    stderr
                },
            }),
        }
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}
