//! Cluster readiness gating.
//!
//! Configuration only proceeds once a complete connection tuple is
//! obtainable from a declaring peer and enough members have announced
//! themselves ready. The gate is level-triggered: a not-ready verdict is not
//! an error, the same checks simply re-run on the next event.

use crate::config::CharmConfig;
use crate::corosync::CorosyncSettings;
use crate::error::HaResult;
use crate::relay::Relay;

/// Name of the relation carrying the declaring peer's configuration
pub const HA_RELATION: &str = "ha";

/// Name of the peer relation carrying membership announcements
pub const PEER_RELATION: &str = "hanode";

/// Determines whether enough information and members are present to proceed
pub struct ReadinessGate<'a> {
    relay: &'a dyn Relay,
    config: &'a CharmConfig,
}

impl<'a> ReadinessGate<'a> {
    /// Create a gate over the given relay and local configuration
    pub fn new(relay: &'a dyn Relay, config: &'a CharmConfig) -> Self {
        ReadinessGate { relay, config }
    }

    /// Assemble the connection tuple from the first declaring peer that has
    /// published a complete one. Incomplete tuples are not an error.
    pub async fn corosync_settings(&self) -> HaResult<Option<CorosyncSettings>> {
        for rid in self.relay.relation_ids(HA_RELATION).await? {
            for unit in self.relay.relation_units(&rid).await? {
                let bind_address = self
                    .relay
                    .get(&rid, &unit, "corosync_bindnetaddr")
                    .await?;
                let mcast_port = self
                    .relay
                    .get_port(&rid, &unit, "corosync_mcastport")
                    .await?;

                match (bind_address, mcast_port) {
                    (Some(bind_address), Some(mcast_port)) => {
                        return Ok(Some(CorosyncSettings {
                            bind_address,
                            mcast_port,
                            mcast_address: self.config.corosync_mcastaddr.clone(),
                            pcmk_version: self.config.corosync_pcmk_ver,
                        }));
                    }
                    _ => {
                        log::info!(
                            "Principal configuration from {} on {} is incomplete",
                            unit,
                            rid
                        );
                    }
                }
            }
        }
        Ok(None)
    }

    /// Sorted membership view: the local address plus every peer that has
    /// declared itself ready
    pub async fn cluster_nodes(&self) -> HaResult<Vec<String>> {
        let mut hosts = vec![self.relay.local_address().await?];
        for rid in self.relay.relation_ids(PEER_RELATION).await? {
            for unit in self.relay.relation_units(&rid).await? {
                if self.relay.get_bool(&rid, &unit, "ready").await? == Some(true) {
                    if let Some(address) =
                        self.relay.get(&rid, &unit, "private-address").await?
                    {
                        hosts.push(address);
                    }
                }
            }
        }
        hosts.sort();
        hosts.dedup();
        Ok(hosts)
    }

    /// Announce local readiness to peers. Idempotent; safe to re-announce on
    /// every event once the connection tuple is obtainable.
    pub async fn announce_ready(&self) -> HaResult<()> {
        if let Some(rid) = self.relay.relation_ids(PEER_RELATION).await?.first() {
            log::info!("Ready to form cluster - informing peers on {}", rid);
            self.relay.set(rid, "ready", "true").await?;
        }
        Ok(())
    }

    /// Whether configuration may proceed
    pub async fn is_ready(&self) -> HaResult<bool> {
        if self.corosync_settings().await?.is_none() {
            log::info!("Principal configuration not yet complete, deferring");
            return Ok(false);
        }
        self.announce_ready().await?;

        let nodes = self.cluster_nodes().await?;
        if (nodes.len() as u32) < self.config.cluster_count {
            log::warn!(
                "Not enough nodes in cluster ({} of {}), deferring",
                nodes.len(),
                self.config.cluster_count
            );
            return Ok(false);
        }
        Ok(true)
    }
}
