//! STONITH fencing bootstrap.
//!
//! Runs last in the pipeline, after resources exist, and re-runs on every
//! convergence pass so fencing coverage self-heals as membership grows.
//! Coverage is all-or-nothing: fencing is only armed once every current
//! member has a primitive.

use crate::config::CharmConfig;
use crate::error::{HaError, HaResult};
use crate::inventory::{InventoryNode, InventoryProvider};
use crate::pcmk::ClusterManager;
use crate::reconcile::Outcome;
use crate::state::{ClusterState, StateStore};

/// A derived fencing primitive and its optional placement constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencingRule {
    /// Primitive name, unique per fenced node
    pub name: String,
    /// Full primitive definition for the cluster manager
    pub primitive: String,
    /// Location constraint keeping the primitive off its own target
    pub constraint: Option<String>,
}

/// Derive the fencing rule for one cluster member from the inventory
pub fn derive_fencing_rule(inventory: &[InventoryNode], node: &str) -> Option<FencingRule> {
    let entry = inventory.iter().find(|candidate| candidate.matches(node))?;
    let power = &entry.power_parameters;
    let (address, user, pass) = (
        power.power_address.as_deref()?,
        power.power_user.as_deref()?,
        power.power_pass.as_deref()?,
    );

    let name = format!("res-stonith-{}", node);
    let primitive = format!(
        "primitive {} stonith:external/ipmi params hostname={} ipaddr={} userid={} \
         passwd={} interface=lanplus op monitor interval=25s timeout=25s",
        name, node, address, user, pass
    );
    let constraint = Some(format!("location loc-{} {} -inf: {}", name, name, node));
    Some(FencingRule {
        name,
        primitive,
        constraint,
    })
}

/// Derives and applies fencing primitives for every cluster member
pub struct FencingConfigurator<'a> {
    config: &'a CharmConfig,
    manager: &'a dyn ClusterManager,
    inventory: Option<&'a dyn InventoryProvider>,
    state: &'a StateStore,
}

impl<'a> FencingConfigurator<'a> {
    /// Create a configurator; `inventory` is `None` when no endpoint or
    /// credentials are configured
    pub fn new(
        config: &'a CharmConfig,
        manager: &'a dyn ClusterManager,
        inventory: Option<&'a dyn InventoryProvider>,
        state: &'a StateStore,
    ) -> Self {
        FencingConfigurator {
            config,
            manager,
            inventory,
            state,
        }
    }

    /// Configure fencing for every current member, then arm it cluster-wide
    pub async fn configure(&self) -> HaResult<Outcome> {
        if !self.config.stonith_enabled {
            return Ok(Outcome::Skipped("fencing disabled".to_string()));
        }
        if self.state.load()? == ClusterState::Unconfigured {
            log::info!("Cluster not yet configured, skipping fencing setup");
            return Ok(Outcome::Skipped("cluster not configured".to_string()));
        }

        let inventory = self.inventory.ok_or_else(|| {
            HaError::Configuration(
                "maas_url and maas_credentials must be set to enable fencing".to_string(),
            )
        })?;

        log::info!("Configuring fencing for all nodes in cluster");
        let nodes = inventory.list_nodes().await?;
        if nodes.is_empty() {
            return Err(HaError::Inventory(
                "node inventory is empty, cannot derive fencing".to_string(),
            ));
        }

        // Derive every rule before creating anything so missing coverage
        // aborts with no primitives added this pass.
        let members = self.manager.list_nodes().await?;
        let mut rules = Vec::with_capacity(members.len());
        for member in &members {
            match derive_fencing_rule(&nodes, member) {
                Some(rule) => rules.push(rule),
                None => {
                    log::error!("Failed to determine fencing primitive for node {}", member);
                    return Err(HaError::FencingDerivation(member.clone()));
                }
            }
        }

        for rule in &rules {
            if self.manager.resource_exists(&rule.name).await? {
                log::info!("Fencing primitive {} already exists", rule.name);
                continue;
            }
            log::info!("Creating fencing primitive {}", rule.name);
            self.manager
                .commit(&format!("crm -F configure {}", rule.primitive))
                .await?;
            if let Some(constraint) = &rule.constraint {
                self.manager
                    .commit(&format!("crm -F configure {}", constraint))
                    .await?;
            }
        }

        self.manager
            .commit("crm configure property stonith-enabled=true")
            .await?;
        Ok(Outcome::Completed)
    }
}
