//! Top-level event dispatch.
//!
//! Every externally triggered event runs the same level-triggered pipeline:
//! readiness gate, resource reconciliation, fencing bootstrap. The
//! dispatcher is the single recovery boundary; a failed pass surfaces as an
//! error and the whole idempotent pipeline re-runs on the next event.

use std::path::PathBuf;

use crate::config::CharmConfig;
use crate::corosync::CorosyncLayer;
use crate::error::{HaError, HaResult};
use crate::fencing::FencingConfigurator;
use crate::host::{ensure_file_installed, PackageInstaller, ServiceControl};
use crate::inventory::InventoryProvider;
use crate::pcmk::ClusterManager;
use crate::reconcile::{Outcome, ResourceReconciler};
use crate::relay::Relay;
use crate::state::StateStore;

/// Packages required on every cluster node
pub const BASE_PACKAGES: &[&str] = &["corosync", "pacemaker", "ipmitool"];

/// Destination of the bundled ceph rbd resource agent
pub const CEPH_OCF_AGENT: &str = "/usr/lib/ocf/resource.d/ceph/rbd";

/// Externally triggered events understood by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// First-time installation
    Install,
    /// Local configuration changed
    ConfigChanged,
    /// Charm code upgraded in place
    UpgradeCharm,
    /// A declaring peer joined the ha relation
    HaRelationJoined,
    /// A declaring peer updated the ha relation
    HaRelationChanged,
    /// A member joined the peer relation
    HanodeRelationJoined,
    /// A member updated the peer relation
    HanodeRelationChanged,
}

impl Hook {
    /// Resolve a hook from its external (hyphenated) name
    pub fn from_name(name: &str) -> Option<Hook> {
        match name {
            "install" => Some(Hook::Install),
            "config-changed" => Some(Hook::ConfigChanged),
            "upgrade-charm" => Some(Hook::UpgradeCharm),
            "ha-relation-joined" => Some(Hook::HaRelationJoined),
            "ha-relation-changed" => Some(Hook::HaRelationChanged),
            "hanode-relation-joined" => Some(Hook::HanodeRelationJoined),
            "hanode-relation-changed" => Some(Hook::HanodeRelationChanged),
            _ => None,
        }
    }

    /// External name of the hook
    pub fn name(&self) -> &'static str {
        match self {
            Hook::Install => "install",
            Hook::ConfigChanged => "config-changed",
            Hook::UpgradeCharm => "upgrade-charm",
            Hook::HaRelationJoined => "ha-relation-joined",
            Hook::HaRelationChanged => "ha-relation-changed",
            Hook::HanodeRelationJoined => "hanode-relation-joined",
            Hook::HanodeRelationChanged => "hanode-relation-changed",
        }
    }
}

/// The assembled agent: local configuration plus every collaborator
pub struct Charm {
    config: CharmConfig,
    relay: Box<dyn Relay>,
    manager: Box<dyn ClusterManager>,
    packages: Box<dyn PackageInstaller>,
    services: Box<dyn ServiceControl>,
    inventory: Option<Box<dyn InventoryProvider>>,
    corosync: CorosyncLayer,
    state: StateStore,
    bundled_ocf_dir: PathBuf,
}

impl Charm {
    /// Assemble the agent from its collaborators
    pub fn new(
        config: CharmConfig,
        relay: Box<dyn Relay>,
        manager: Box<dyn ClusterManager>,
        packages: Box<dyn PackageInstaller>,
        services: Box<dyn ServiceControl>,
        inventory: Option<Box<dyn InventoryProvider>>,
    ) -> Self {
        Charm {
            config,
            relay,
            manager,
            packages,
            services,
            inventory,
            corosync: CorosyncLayer::new(),
            state: StateStore::new(),
            bundled_ocf_dir: PathBuf::from("ocf"),
        }
    }

    /// Override the corosync artifact locations (used by tests)
    pub fn with_corosync_layer(mut self, layer: CorosyncLayer) -> Self {
        self.corosync = layer;
        self
    }

    /// Override the marker store (used by tests)
    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.state = store;
        self
    }

    /// Override the directory holding bundled OCF agents
    pub fn with_bundled_ocf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundled_ocf_dir = dir.into();
        self
    }

    /// Dispatch one event through the pipeline
    pub async fn dispatch(&self, hook: Hook) -> HaResult<Outcome> {
        log::info!("Begin {} hook", hook.name());
        let outcome = match hook {
            Hook::Install => self.install().await?,
            Hook::ConfigChanged => self.config_changed().await?,
            Hook::UpgradeCharm => {
                self.install().await?;
                self.config_changed().await?
            }
            Hook::HaRelationJoined
            | Hook::HaRelationChanged
            | Hook::HanodeRelationJoined
            | Hook::HanodeRelationChanged => self.converge().await?,
        };
        log::info!("End {} hook: {}", hook.name(), outcome);
        Ok(outcome)
    }

    async fn install(&self) -> HaResult<Outcome> {
        for package in BASE_PACKAGES {
            self.packages.ensure_installed(package).await?;
        }
        // rbd agent is only shipped by newer ceph resource-agent packages;
        // carry a bundled copy until then
        ensure_file_installed(
            &self.bundled_ocf_dir.join("ceph/rbd"),
            std::path::Path::new(CEPH_OCF_AGENT),
        )
        .await?;
        Ok(Outcome::Completed)
    }

    async fn config_changed(&self) -> HaResult<Outcome> {
        let key = self.config.corosync_key.as_deref().ok_or_else(|| {
            HaError::Configuration("no corosync key supplied, cannot proceed".to_string())
        })?;

        if self.config.corosync_pcmk_ver == 1 {
            self.services.enable("pacemaker").await?;
        } else {
            self.services.disable("pacemaker").await?;
        }

        self.corosync.emit_base(true)?;
        self.corosync.write_authkey(key)?;

        self.converge().await
    }

    /// The common convergence pass: reconcile resources, then refresh
    /// fencing coverage, each stage short-circuiting on its own
    /// preconditions
    async fn converge(&self) -> HaResult<Outcome> {
        let reconciler = ResourceReconciler::new(
            &*self.relay,
            &*self.manager,
            &*self.packages,
            &*self.services,
            &self.corosync,
            &self.state,
            &self.config,
        );
        let reconciled = reconciler.reconcile().await?;

        let fencing = FencingConfigurator::new(
            &self.config,
            &*self.manager,
            self.inventory.as_deref(),
            &self.state,
        );
        let fenced = fencing.configure().await?;

        Ok(match (&reconciled, &fenced) {
            (Outcome::Completed, _) => reconciled,
            (_, Outcome::Completed) => fenced,
            _ => reconciled,
        })
    }
}
