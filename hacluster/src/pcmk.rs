//! Client boundary to the cluster manager's control plane.
//!
//! All writes go through `crm` with the `-F` force qualifier so they are
//! idempotent at the manager level; the reconciler nevertheless performs its
//! own existence checks before every mutating call.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time;

use crate::error::{HaError, HaResult};

/// Default number of operational poll attempts
pub const DEFAULT_OPERATIONAL_ATTEMPTS: u32 = 30;

/// Interval between operational poll attempts
pub const OPERATIONAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Command/query boundary to the cluster manager
#[async_trait]
pub trait ClusterManager: Send + Sync {
    /// Run a mutating control-plane command
    async fn commit(&self, cmd: &str) -> HaResult<()>;

    /// Whether a configuration object with this name exists
    async fn resource_exists(&self, name: &str) -> HaResult<bool>;

    /// Whether the named resource is currently running somewhere in the cluster
    async fn is_resource_running(&self, name: &str) -> HaResult<bool>;

    /// Node names in the cluster manager's own membership view
    async fn list_nodes(&self) -> HaResult<Vec<String>>;

    /// Poll until the manager answers on its control interface, bounded by
    /// the given attempt budget
    async fn wait_until_operational(&self, attempts: u32) -> HaResult<()>;
}

/// Production implementation driving the `crm` command-line shell
#[derive(Debug, Clone)]
pub struct CrmShell {
    hostname: String,
}

impl CrmShell {
    /// Create a shell client that recognises the local node by `hostname`
    pub fn with_hostname(hostname: impl Into<String>) -> Self {
        CrmShell {
            hostname: hostname.into(),
        }
    }

    /// Create a shell client, detecting the local hostname
    pub async fn detect() -> HaResult<Self> {
        let output = Command::new("hostname").output().await?;
        if !output.status.success() {
            return Err(HaError::Configuration(
                "could not determine local hostname".to_string(),
            ));
        }
        let hostname = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Self::with_hostname(hostname))
    }

    async fn run(&self, cmd: &str) -> HaResult<std::process::Output> {
        Ok(Command::new("sh").arg("-c").arg(cmd).output().await?)
    }
}

#[async_trait]
impl ClusterManager for CrmShell {
    async fn commit(&self, cmd: &str) -> HaResult<()> {
        let output = self.run(cmd).await?;
        if !output.status.success() {
            return Err(HaError::CommandFailed {
                cmd: cmd.to_string(),
                detail: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        log::debug!("Committed: {}", cmd);
        Ok(())
    }

    async fn resource_exists(&self, name: &str) -> HaResult<bool> {
        let output = self.run(&format!("crm configure show {}", name)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(output.status.success() && !stdout.trim().is_empty())
    }

    async fn is_resource_running(&self, name: &str) -> HaResult<bool> {
        let output = self.run(&format!("crm resource status {}", name)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.contains("is running"))
    }

    async fn list_nodes(&self) -> HaResult<Vec<String>> {
        let output = self.run("crm node list").await?;
        if !output.status.success() {
            return Err(HaError::CommandFailed {
                cmd: "crm node list".to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_node_list(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn wait_until_operational(&self, attempts: u32) -> HaResult<()> {
        for attempt in 1..=attempts {
            let output = self.run("crm node list").await?;
            let stdout = String::from_utf8_lossy(&output.stdout);
            if output.status.success() && stdout.contains(&self.hostname) {
                log::debug!("Cluster manager operational after {} attempts", attempt);
                return Ok(());
            }
            log::debug!(
                "Cluster manager not answering yet (attempt {}/{})",
                attempt,
                attempts
            );
            time::sleep(OPERATIONAL_POLL_INTERVAL).await;
        }
        Err(HaError::NotOperational { attempts })
    }
}

/// Parse `crm node list` output into bare node names.
///
/// Lines look like `node1: normal` or `node1(1001): member`.
fn parse_node_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let name = line
                .split(|c| c == ':' || c == '(')
                .next()
                .unwrap_or("")
                .trim();
            if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            }
        })
        .collect()
}
