//! Declarative resource model exchanged with the declaring peer.
//!
//! The declaring peer publishes a bundle of named mappings (resources,
//! parameters, groups, master/slave sets, orders, colocations, clones and
//! init-service bindings) as JSON text blobs. This module deserializes the
//! bundle strictly into typed form; malformed input surfaces as
//! [`HaError::SpecParse`] rather than being silently evaluated.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{HaError, HaResult};
use crate::relay::{Relay, RelationId};

/// Resource-agent package required by the `ocf:openstack` namespace
pub const OPENSTACK_AGENT_PACKAGE: &str = "openstack-resource-agents";

/// Resource-agent package required by the `ocf:ceph` namespace
pub const CEPH_AGENT_PACKAGE: &str = "ceph-resource-agents";

/// A parsed resource-agent type in `class[:provider]:type` form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentType {
    /// Agent class, e.g. `ocf` or `lsb`
    pub class: String,
    /// Agent provider for three-part forms, e.g. `ceph` in `ocf:ceph:rbd`
    pub provider: Option<String>,
    /// Concrete agent type, e.g. `rbd` or an init script name
    pub kind: String,
}

impl AgentType {
    /// Whether the agent is backed by a local LSB init script
    pub fn is_lsb(&self) -> bool {
        self.class == "lsb"
    }

    /// Resource-agent package the agent's namespace requires, if any
    pub fn required_package(&self) -> Option<&'static str> {
        if self.class != "ocf" {
            return None;
        }
        match self.provider.as_deref() {
            Some("openstack") => Some(OPENSTACK_AGENT_PACKAGE),
            Some("ceph") => Some(CEPH_AGENT_PACKAGE),
            _ => None,
        }
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (class, provider, kind) = match parts.as_slice() {
            [class, kind] => (*class, None, *kind),
            [class, provider, kind] => (*class, Some(provider.to_string()), *kind),
            _ => return Err(format!("expected class[:provider]:type, got '{}'", s)),
        };
        if class.is_empty() || kind.is_empty() || provider.as_deref() == Some("") {
            return Err(format!("empty segment in agent type '{}'", s));
        }
        Ok(AgentType {
            class: class.to_string(),
            provider,
            kind: kind.to_string(),
        })
    }
}

impl TryFrom<String> for AgentType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AgentType> for String {
    fn from(agent: AgentType) -> String {
        agent.to_string()
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "{}:{}:{}", self.class, provider, self.kind),
            None => write!(f, "{}:{}", self.class, self.kind),
        }
    }
}

/// The full declarative bundle published by the declaring peer.
///
/// Maps are ordered so reconciliation walks entities deterministically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSet {
    /// Primitive name to resource-agent type
    pub resources: BTreeMap<String, AgentType>,
    /// Primitive name to verbatim parameter string
    pub resource_params: BTreeMap<String, String>,
    /// Group name to verbatim member/parameter string
    pub groups: BTreeMap<String, String>,
    /// Master/slave set name to verbatim parameter string
    pub ms: BTreeMap<String, String>,
    /// Order constraint name to verbatim parameter string
    pub orders: BTreeMap<String, String>,
    /// Colocation constraint name to verbatim parameter string
    pub colocations: BTreeMap<String, String>,
    /// Clone name to verbatim parameter string
    pub clones: BTreeMap<String, String>,
    /// Primitive name to local init service that must be handed over
    pub init_services: BTreeMap<String, String>,
}

impl ResourceSet {
    /// Read and strictly deserialize the bundle published by `unit` on the
    /// declaring relation. Absent keys deserialize to empty mappings.
    pub async fn from_relation(
        relay: &dyn Relay,
        rid: &RelationId,
        unit: &str,
    ) -> HaResult<Self> {
        Ok(ResourceSet {
            resources: read_map(relay, rid, unit, "resources").await?,
            resource_params: read_map(relay, rid, unit, "resource_params").await?,
            groups: read_map(relay, rid, unit, "groups").await?,
            ms: read_map(relay, rid, unit, "ms").await?,
            orders: read_map(relay, rid, unit, "orders").await?,
            colocations: read_map(relay, rid, unit, "colocations").await?,
            clones: read_map(relay, rid, unit, "clones").await?,
            init_services: read_map(relay, rid, unit, "init_services").await?,
        })
    }

    /// Validate entity names across the bundle
    pub fn validate(&self) -> HaResult<()> {
        let named = self
            .resources
            .keys()
            .chain(self.groups.keys())
            .chain(self.ms.keys())
            .chain(self.orders.keys())
            .chain(self.colocations.keys())
            .chain(self.clones.keys());
        for name in named {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(HaError::Configuration(format!(
                    "invalid resource entity name '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Resource-agent packages required by the declared agent namespaces
    pub fn required_packages(&self) -> BTreeSet<&'static str> {
        self.resources
            .values()
            .filter_map(AgentType::required_package)
            .collect()
    }

    /// Whether a primitive is referenced by any group or clone definition
    pub fn in_group_or_clone(&self, name: &str) -> bool {
        self.groups
            .values()
            .chain(self.clones.values())
            .any(|params| params.split_whitespace().any(|token| token == name))
    }
}

async fn read_map<V>(
    relay: &dyn Relay,
    rid: &RelationId,
    unit: &str,
    key: &str,
) -> HaResult<BTreeMap<String, V>>
where
    V: for<'de> Deserialize<'de>,
{
    match relay.get(rid, unit, key).await? {
        Some(blob) => serde_json::from_str(&blob).map_err(|source| HaError::SpecParse {
            key: key.to_string(),
            source,
        }),
        None => Ok(BTreeMap::new()),
    }
}
