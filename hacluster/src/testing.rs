//! Recording mock collaborators for tests and integration tests.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{HaError, HaResult};
use crate::host::{PackageInstaller, ServiceControl};
use crate::inventory::{InventoryNode, InventoryProvider};
use crate::pcmk::ClusterManager;
use crate::relay::{Relay, RelationId};

/// Mock cluster manager recording every issued command.
///
/// Names created through `crm -F configure <kind> <name> ...` commands are
/// registered so subsequent existence checks see them, mirroring the real
/// control plane.
#[derive(Debug, Default)]
pub struct MockClusterManager {
    commands: Mutex<Vec<String>>,
    existing: Mutex<BTreeSet<String>>,
    running: Mutex<BTreeSet<String>>,
    nodes: Mutex<Vec<String>>,
    operational: Mutex<bool>,
    fail_commits: Mutex<bool>,
}

impl MockClusterManager {
    /// Create an operational mock with no resources
    pub fn new() -> Self {
        MockClusterManager {
            operational: Mutex::new(true),
            ..Default::default()
        }
    }

    /// Pre-register an existing configuration object
    pub fn preexisting(&self, name: &str) {
        self.existing.lock().insert(name.to_string());
    }

    /// Mark a resource as running
    pub fn set_running(&self, name: &str) {
        self.running.lock().insert(name.to_string());
    }

    /// Set the manager's membership view
    pub fn set_nodes(&self, nodes: &[&str]) {
        *self.nodes.lock() = nodes.iter().map(|n| n.to_string()).collect();
    }

    /// Make the manager never become operational
    pub fn set_not_operational(&self) {
        *self.operational.lock() = false;
    }

    /// Make every commit fail
    pub fn fail_commits(&self) {
        *self.fail_commits.lock() = true;
    }

    /// Every command issued so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    /// Commands that mutate cluster state (configure and cleanup)
    pub fn mutating_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|cmd| cmd.contains("configure") || cmd.contains("cleanup"))
            .collect()
    }

    /// Index of the first recorded command containing `needle`
    pub fn command_index(&self, needle: &str) -> Option<usize> {
        self.commands().iter().position(|cmd| cmd.contains(needle))
    }
}

#[async_trait]
impl ClusterManager for MockClusterManager {
    async fn commit(&self, cmd: &str) -> HaResult<()> {
        if *self.fail_commits.lock() {
            return Err(HaError::CommandFailed {
                cmd: cmd.to_string(),
                detail: "mock failure".to_string(),
            });
        }
        self.commands.lock().push(cmd.to_string());

        // register names created via `crm -F configure <kind> <name> ...`
        let tokens: Vec<&str> = cmd.split_whitespace().collect();
        if let ["crm", "-F", "configure", _kind, name, ..] = tokens.as_slice() {
            self.existing.lock().insert(name.to_string());
        }
        Ok(())
    }

    async fn resource_exists(&self, name: &str) -> HaResult<bool> {
        Ok(self.existing.lock().contains(name))
    }

    async fn is_resource_running(&self, name: &str) -> HaResult<bool> {
        Ok(self.running.lock().contains(name))
    }

    async fn list_nodes(&self) -> HaResult<Vec<String>> {
        Ok(self.nodes.lock().clone())
    }

    async fn wait_until_operational(&self, attempts: u32) -> HaResult<()> {
        if *self.operational.lock() {
            Ok(())
        } else {
            Err(HaError::NotOperational { attempts })
        }
    }
}

/// Mock package installer recording install requests
#[derive(Debug, Default)]
pub struct MockPackages {
    installed: Mutex<Vec<String>>,
}

impl MockPackages {
    /// Create an empty mock installer
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages requested so far, in order
    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().clone()
    }
}

#[async_trait]
impl PackageInstaller for MockPackages {
    async fn ensure_installed(&self, package: &str) -> HaResult<()> {
        self.installed.lock().push(package.to_string());
        Ok(())
    }
}

/// Mock service controller recording operations against a running-set
#[derive(Debug, Default)]
pub struct MockServices {
    ops: Mutex<Vec<(String, String)>>,
    running: Mutex<BTreeSet<String>>,
}

impl MockServices {
    /// Create a mock with no services running
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a service as running
    pub fn set_running(&self, service: &str) {
        self.running.lock().insert(service.to_string());
    }

    /// Operations performed so far as `(op, service)` pairs
    pub fn ops(&self) -> Vec<(String, String)> {
        self.ops.lock().clone()
    }

    fn record(&self, op: &str, service: &str) {
        self.ops.lock().push((op.to_string(), service.to_string()));
    }
}

#[async_trait]
impl ServiceControl for MockServices {
    async fn disable(&self, service: &str) -> HaResult<()> {
        self.record("disable", service);
        Ok(())
    }

    async fn enable(&self, service: &str) -> HaResult<()> {
        self.record("enable", service);
        Ok(())
    }

    async fn start(&self, service: &str) -> HaResult<()> {
        self.record("start", service);
        self.running.lock().insert(service.to_string());
        Ok(())
    }

    async fn stop(&self, service: &str) -> HaResult<()> {
        self.record("stop", service);
        self.running.lock().remove(service);
        Ok(())
    }

    async fn restart(&self, service: &str) -> HaResult<()> {
        self.record("restart", service);
        self.running.lock().insert(service.to_string());
        Ok(())
    }

    async fn is_running(&self, service: &str) -> HaResult<bool> {
        self.record("is_running", service);
        Ok(self.running.lock().contains(service))
    }
}

/// Mock inventory returning a fixed node list
#[derive(Debug, Default)]
pub struct MockInventory {
    nodes: Vec<InventoryNode>,
    unreachable: bool,
}

impl MockInventory {
    /// Inventory returning the given nodes
    pub fn with_nodes(nodes: Vec<InventoryNode>) -> Self {
        MockInventory {
            nodes,
            unreachable: false,
        }
    }

    /// Inventory whose queries always fail
    pub fn unreachable() -> Self {
        MockInventory {
            nodes: Vec::new(),
            unreachable: true,
        }
    }
}

#[async_trait]
impl InventoryProvider for MockInventory {
    async fn list_nodes(&self) -> HaResult<Vec<InventoryNode>> {
        if self.unreachable {
            return Err(HaError::Inventory("mock inventory unreachable".to_string()));
        }
        Ok(self.nodes.clone())
    }
}

// Forwarding impls so tests can keep an Arc handle to a mock while handing
// the same instance to the charm as a boxed trait object.

#[async_trait]
impl<T: ClusterManager + ?Sized> ClusterManager for Arc<T> {
    async fn commit(&self, cmd: &str) -> HaResult<()> {
        (**self).commit(cmd).await
    }

    async fn resource_exists(&self, name: &str) -> HaResult<bool> {
        (**self).resource_exists(name).await
    }

    async fn is_resource_running(&self, name: &str) -> HaResult<bool> {
        (**self).is_resource_running(name).await
    }

    async fn list_nodes(&self) -> HaResult<Vec<String>> {
        (**self).list_nodes().await
    }

    async fn wait_until_operational(&self, attempts: u32) -> HaResult<()> {
        (**self).wait_until_operational(attempts).await
    }
}

#[async_trait]
impl<T: PackageInstaller + ?Sized> PackageInstaller for Arc<T> {
    async fn ensure_installed(&self, package: &str) -> HaResult<()> {
        (**self).ensure_installed(package).await
    }
}

#[async_trait]
impl<T: ServiceControl + ?Sized> ServiceControl for Arc<T> {
    async fn disable(&self, service: &str) -> HaResult<()> {
        (**self).disable(service).await
    }

    async fn enable(&self, service: &str) -> HaResult<()> {
        (**self).enable(service).await
    }

    async fn start(&self, service: &str) -> HaResult<()> {
        (**self).start(service).await
    }

    async fn stop(&self, service: &str) -> HaResult<()> {
        (**self).stop(service).await
    }

    async fn restart(&self, service: &str) -> HaResult<()> {
        (**self).restart(service).await
    }

    async fn is_running(&self, service: &str) -> HaResult<bool> {
        (**self).is_running(service).await
    }
}

#[async_trait]
impl<T: InventoryProvider + ?Sized> InventoryProvider for Arc<T> {
    async fn list_nodes(&self) -> HaResult<Vec<InventoryNode>> {
        (**self).list_nodes().await
    }
}

#[async_trait]
impl<T: Relay + ?Sized> Relay for Arc<T> {
    async fn relation_ids(&self, name: &str) -> HaResult<Vec<RelationId>> {
        (**self).relation_ids(name).await
    }

    async fn relation_units(&self, rid: &RelationId) -> HaResult<Vec<String>> {
        (**self).relation_units(rid).await
    }

    async fn get(&self, rid: &RelationId, unit: &str, key: &str) -> HaResult<Option<String>> {
        (**self).get(rid, unit, key).await
    }

    async fn set(&self, rid: &RelationId, key: &str, value: &str) -> HaResult<()> {
        (**self).set(rid, key, value).await
    }

    async fn local_address(&self) -> HaResult<String> {
        (**self).local_address().await
    }
}
