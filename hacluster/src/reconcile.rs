//! The core reconciliation algorithm.
//!
//! Given the declarative bundle published by the declaring peer, drive the
//! cluster manager to the declared state: packages, local service handover,
//! messaging-layer bootstrap, baseline properties, then every entity kind in
//! dependency order, each guarded by an existence check so the whole pass is
//! idempotent and safe to re-run on every event.

use std::fmt;

use crate::config::CharmConfig;
use crate::corosync::CorosyncLayer;
use crate::error::HaResult;
use crate::gate::{ReadinessGate, HA_RELATION};
use crate::host::{PackageInstaller, ServiceControl};
use crate::pcmk::{ClusterManager, DEFAULT_OPERATIONAL_ATTEMPTS};
use crate::relay::Relay;
use crate::resources::ResourceSet;
use crate::state::{ClusterState, StateStore};

/// Result of one pipeline stage for the current event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Preconditions unmet; wait for the next event and retry
    Deferred(String),
    /// Nothing to do: the target state is already satisfied or the feature
    /// is disabled
    Skipped(String),
    /// The pass ran to completion
    Completed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Deferred(reason) => write!(f, "deferred: {}", reason),
            Outcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            Outcome::Completed => write!(f, "completed"),
        }
    }
}

/// Drives the cluster manager to the declared state
pub struct ResourceReconciler<'a> {
    relay: &'a dyn Relay,
    manager: &'a dyn ClusterManager,
    packages: &'a dyn PackageInstaller,
    services: &'a dyn ServiceControl,
    corosync: &'a CorosyncLayer,
    state: &'a StateStore,
    config: &'a CharmConfig,
}

impl<'a> ResourceReconciler<'a> {
    /// Create a reconciler over the given collaborators
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        relay: &'a dyn Relay,
        manager: &'a dyn ClusterManager,
        packages: &'a dyn PackageInstaller,
        services: &'a dyn ServiceControl,
        corosync: &'a CorosyncLayer,
        state: &'a StateStore,
        config: &'a CharmConfig,
    ) -> Self {
        ResourceReconciler {
            relay,
            manager,
            packages,
            services,
            corosync,
            state,
            config,
        }
    }

    /// Run one reconciliation pass
    pub async fn reconcile(&self) -> HaResult<Outcome> {
        if self.state.load()? == ClusterState::Configured {
            log::info!("Cluster already configured, not reconfiguring");
            return Ok(Outcome::Skipped("already configured".to_string()));
        }

        let gate = ReadinessGate::new(self.relay, self.config);
        let settings = match gate.corosync_settings().await? {
            Some(settings) => settings,
            None => {
                log::warn!("Unable to configure cluster right now, deferring");
                return Ok(Outcome::Deferred(
                    "principal configuration incomplete".to_string(),
                ));
            }
        };
        gate.announce_ready().await?;

        let nodes = gate.cluster_nodes().await?;
        if (nodes.len() as u32) < self.config.cluster_count {
            log::warn!(
                "Not enough nodes in cluster ({} of {}), deferring",
                nodes.len(),
                self.config.cluster_count
            );
            return Ok(Outcome::Deferred("insufficient members".to_string()));
        }

        let rids = self.relay.relation_ids(HA_RELATION).await?;
        if rids.len() != 1 {
            // More than one declaring peer is ambiguous; there is no merge
            // policy, so wait for the operator to resolve it.
            log::warn!("Related to {} declaring services, deferring", rids.len());
            return Ok(Outcome::Deferred(format!(
                "{} declaring services",
                rids.len()
            )));
        }
        let rid = &rids[0];
        let units = self.relay.relation_units(rid).await?;
        let unit = match units.first() {
            Some(unit) => unit,
            None => {
                log::warn!("No declaring unit on {}, deferring", rid);
                return Ok(Outcome::Deferred("no declaring unit".to_string()));
            }
        };
        log::info!("Using declaring unit {} on {}", unit, rid);

        let spec = ResourceSet::from_relation(self.relay, rid, unit).await?;
        spec.validate()?;

        for package in spec.required_packages() {
            self.packages.ensure_installed(package).await?;
        }

        self.hand_over_services(&spec).await?;

        log::info!("Configuring and restarting the messaging layer");
        self.corosync.emit_conf(&settings)?;
        self.corosync
            .restart(self.services, settings.pcmk_version)
            .await?;

        log::info!("Waiting for the cluster manager to become operational");
        self.manager
            .wait_until_operational(DEFAULT_OPERATIONAL_ATTEMPTS)
            .await?;

        log::info!("Applying baseline cluster properties");
        self.manager
            .commit("crm configure property stonith-enabled=false")
            .await?;
        self.manager
            .commit("crm configure property no-quorum-policy=ignore")
            .await?;
        self.manager
            .commit("crm configure rsc_defaults $id=\"rsc-options\" resource-stickiness=\"100\"")
            .await?;

        self.configure_primitives(&spec).await?;
        self.configure_entities("group", &spec.groups).await?;
        self.configure_entities("ms", &spec.ms).await?;
        self.configure_entities("order", &spec.orders).await?;
        self.configure_entities("colocation", &spec.colocations).await?;
        self.configure_entities("clone", &spec.clones).await?;

        self.converge_resources(&spec).await?;

        for rid in self.relay.relation_ids(HA_RELATION).await? {
            self.relay.set(&rid, "clustered", "true").await?;
        }
        self.state.mark_configured()?;

        Ok(Outcome::Completed)
    }

    /// Disable and stop every local service the cluster manager is about to
    /// take ownership of
    async fn hand_over_services(&self, spec: &ResourceSet) -> HaResult<()> {
        for (name, agent) in &spec.resources {
            let service = if agent.is_lsb() {
                Some(agent.kind.as_str())
            } else {
                spec.init_services
                    .get(name)
                    .map(String::as_str)
                    .filter(|svc| !svc.is_empty())
            };
            if let Some(service) = service {
                self.services.disable(service).await?;
                if self.services.is_running(service).await? {
                    self.services.stop(service).await?;
                }
            }
        }
        Ok(())
    }

    async fn configure_primitives(&self, spec: &ResourceSet) -> HaResult<()> {
        log::info!("Configuring primitives: {:?}", spec.resources.keys());
        for (name, agent) in &spec.resources {
            if self.manager.resource_exists(name).await? {
                continue;
            }
            let cmd = match spec.resource_params.get(name) {
                Some(params) => {
                    format!("crm -F configure primitive {} {} {}", name, agent, params)
                }
                None => format!("crm -F configure primitive {} {}", name, agent),
            };
            self.manager.commit(&cmd).await?;
            log::info!("{}", cmd);
        }
        Ok(())
    }

    async fn configure_entities(
        &self,
        kind: &str,
        entities: &std::collections::BTreeMap<String, String>,
    ) -> HaResult<()> {
        log::info!("Configuring {}s: {:?}", kind, entities.keys());
        for (name, params) in entities {
            if self.manager.resource_exists(name).await? {
                continue;
            }
            let cmd = format!("crm -F configure {} {} {}", kind, name, params);
            self.manager.commit(&cmd).await?;
            log::info!("{}", cmd);
        }
        Ok(())
    }

    /// Recover resources that failed to start for transient reasons. Clones
    /// and groups are cleaned as a whole; standalone primitives only when
    /// they are init-bound and observed stopped.
    async fn converge_resources(&self, spec: &ResourceSet) -> HaResult<()> {
        for name in spec.resources.keys() {
            if spec.init_services.contains_key(name)
                && !spec.in_group_or_clone(name)
                && !self.manager.is_resource_running(name).await?
            {
                self.manager
                    .commit(&format!("crm resource cleanup {}", name))
                    .await?;
            }
        }
        for name in spec.clones.keys() {
            self.manager
                .commit(&format!("crm resource cleanup {}", name))
                .await?;
        }
        for name in spec.groups.keys() {
            self.manager
                .commit(&format!("crm resource cleanup {}", name))
                .await?;
        }
        Ok(())
    }
}
