//! Typed access to peer-exchanged configuration data.
//!
//! The hosting environment provides a publish/subscribe relation bus; the
//! convergence pipeline only ever needs three operations against it: read a
//! typed field from a link, write a field to a link, and enumerate links.
//! [`Relay`] captures exactly that surface. [`ToolRelay`] drives the host's
//! relation tools, [`MemoryRelay`] backs tests.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{HaError, HaResult};

/// Identifier of one relation link, e.g. `ha:0`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub String);

impl RelationId {
    /// Create a relation id from its textual form
    pub fn new(id: impl Into<String>) -> Self {
        RelationId(id.into())
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read/write access to the peer configuration relay
#[async_trait]
pub trait Relay: Send + Sync {
    /// Enumerate active relation links with the given name
    async fn relation_ids(&self, name: &str) -> HaResult<Vec<RelationId>>;

    /// List remote units present on a link
    async fn relation_units(&self, rid: &RelationId) -> HaResult<Vec<String>>;

    /// Read a raw field published by a unit on a link
    async fn get(&self, rid: &RelationId, unit: &str, key: &str) -> HaResult<Option<String>>;

    /// Publish a field on a link, visible to every peer on it
    async fn set(&self, rid: &RelationId, key: &str, value: &str) -> HaResult<()>;

    /// Address of the local unit
    async fn local_address(&self) -> HaResult<String>;

    /// Read a field and interpret it as a boolean flag
    async fn get_bool(&self, rid: &RelationId, unit: &str, key: &str) -> HaResult<Option<bool>> {
        Ok(self
            .get(rid, unit, key)
            .await?
            .map(|v| matches!(v.trim(), "true" | "True" | "yes" | "1")))
    }

    /// Read a field and parse it as a port number
    async fn get_port(&self, rid: &RelationId, unit: &str, key: &str) -> HaResult<Option<u16>> {
        match self.get(rid, unit, key).await? {
            Some(v) => match v.trim().parse::<u16>() {
                Ok(port) => Ok(Some(port)),
                Err(_) => {
                    log::warn!("Ignoring unparseable port value '{}' for key {}", v, key);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

/// Relay implementation shelling out to the host environment's relation
/// tools (`relation-ids`, `relation-list`, `relation-get`, `relation-set`,
/// `unit-get`, `config-get`)
#[derive(Debug, Default)]
pub struct ToolRelay;

impl ToolRelay {
    /// Create a new tool-backed relay
    pub fn new() -> Self {
        ToolRelay
    }

    async fn run(&self, tool: &str, args: &[&str]) -> HaResult<String> {
        let output = Command::new(tool)
            .args(args)
            .output()
            .await
            .map_err(|e| HaError::Relay(format!("failed to spawn {}: {}", tool, e)))?;
        if !output.status.success() {
            return Err(HaError::Relay(format!(
                "{} {} failed: {}",
                tool,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run_json(&self, tool: &str, args: &[&str]) -> HaResult<serde_json::Value> {
        let stdout = self.run(tool, args).await?;
        if stdout.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Fetch the full local configuration document
    pub async fn config_json(&self) -> HaResult<serde_json::Value> {
        self.run_json("config-get", &["--format=json"]).await
    }
}

#[async_trait]
impl Relay for ToolRelay {
    async fn relation_ids(&self, name: &str) -> HaResult<Vec<RelationId>> {
        let value = self.run_json("relation-ids", &["--format=json", name]).await?;
        let ids: Vec<String> = match value {
            serde_json::Value::Null => Vec::new(),
            other => serde_json::from_value(other)?,
        };
        Ok(ids.into_iter().map(RelationId).collect())
    }

    async fn relation_units(&self, rid: &RelationId) -> HaResult<Vec<String>> {
        let value = self
            .run_json("relation-list", &["--format=json", "-r", rid.0.as_str()])
            .await?;
        match value {
            serde_json::Value::Null => Ok(Vec::new()),
            other => Ok(serde_json::from_value(other)?),
        }
    }

    async fn get(&self, rid: &RelationId, unit: &str, key: &str) -> HaResult<Option<String>> {
        let value = self
            .run_json(
                "relation-get",
                &["--format=json", "-r", rid.0.as_str(), key, unit],
            )
            .await?;
        Ok(match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    async fn set(&self, rid: &RelationId, key: &str, value: &str) -> HaResult<()> {
        let assignment = format!("{}={}", key, value);
        self.run("relation-set", &["-r", rid.0.as_str(), assignment.as_str()])
            .await?;
        Ok(())
    }

    async fn local_address(&self) -> HaResult<String> {
        let address = self.run("unit-get", &["private-address"]).await?;
        Ok(address.trim().to_string())
    }
}

type UnitData = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Default)]
struct MemoryRelayInner {
    /// relation name -> relation ids carrying it
    names: BTreeMap<String, Vec<RelationId>>,
    /// relation id -> remote unit -> key/value data
    remote: BTreeMap<RelationId, UnitData>,
    /// relation id -> locally published key/value data
    published: BTreeMap<RelationId, BTreeMap<String, String>>,
}

/// In-memory relay for tests and dry runs
#[derive(Debug)]
pub struct MemoryRelay {
    local_address: String,
    inner: RwLock<MemoryRelayInner>,
}

impl MemoryRelay {
    /// Create an in-memory relay for a local unit with the given address
    pub fn new(local_address: impl Into<String>) -> Self {
        MemoryRelay {
            local_address: local_address.into(),
            inner: RwLock::new(MemoryRelayInner::default()),
        }
    }

    /// Register a relation link under a relation name
    pub fn add_relation(&self, name: &str, rid: &str) -> RelationId {
        let rid = RelationId::new(rid);
        let mut inner = self.inner.write();
        inner
            .names
            .entry(name.to_string())
            .or_default()
            .push(rid.clone());
        inner.remote.entry(rid.clone()).or_default();
        rid
    }

    /// Publish remote unit data on a link
    pub fn set_unit_data(&self, rid: &RelationId, unit: &str, key: &str, value: &str) {
        let mut inner = self.inner.write();
        inner
            .remote
            .entry(rid.clone())
            .or_default()
            .entry(unit.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Data the local unit has published on a link
    pub fn published(&self, rid: &RelationId) -> BTreeMap<String, String> {
        self.inner
            .read()
            .published
            .get(rid)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn relation_ids(&self, name: &str) -> HaResult<Vec<RelationId>> {
        Ok(self
            .inner
            .read()
            .names
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn relation_units(&self, rid: &RelationId) -> HaResult<Vec<String>> {
        Ok(self
            .inner
            .read()
            .remote
            .get(rid)
            .map(|units| units.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, rid: &RelationId, unit: &str, key: &str) -> HaResult<Option<String>> {
        Ok(self
            .inner
            .read()
            .remote
            .get(rid)
            .and_then(|units| units.get(unit))
            .and_then(|data| data.get(key))
            .cloned())
    }

    async fn set(&self, rid: &RelationId, key: &str, value: &str) -> HaResult<()> {
        self.inner
            .write()
            .published
            .entry(rid.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn local_address(&self) -> HaResult<String> {
        Ok(self.local_address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_relay_roundtrip() {
        let relay = MemoryRelay::new("10.0.0.1");
        let rid = relay.add_relation("hanode", "hanode:1");
        relay.set_unit_data(&rid, "hacluster/1", "ready", "true");
        relay.set_unit_data(&rid, "hacluster/1", "private-address", "10.0.0.2");

        assert_eq!(
            relay.relation_ids("hanode").await.unwrap(),
            vec![RelationId::new("hanode:1")]
        );
        assert_eq!(
            relay.relation_units(&rid).await.unwrap(),
            vec!["hacluster/1".to_string()]
        );
        assert_eq!(
            relay.get(&rid, "hacluster/1", "ready").await.unwrap(),
            Some("true".to_string())
        );
        assert_eq!(
            relay.get_bool(&rid, "hacluster/1", "ready").await.unwrap(),
            Some(true)
        );
        assert_eq!(relay.get(&rid, "hacluster/1", "missing").await.unwrap(), None);
        assert_eq!(relay.local_address().await.unwrap(), "10.0.0.1");
    }

    #[tokio::test]
    async fn test_memory_relay_publish() {
        let relay = MemoryRelay::new("10.0.0.1");
        let rid = relay.add_relation("ha", "ha:0");
        relay.set(&rid, "clustered", "true").await.unwrap();

        let published = relay.published(&rid);
        assert_eq!(published.get("clustered").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_get_port_rejects_garbage() {
        let relay = MemoryRelay::new("10.0.0.1");
        let rid = relay.add_relation("ha", "ha:0");
        relay.set_unit_data(&rid, "principal/0", "corosync_mcastport", "not-a-port");
        relay.set_unit_data(&rid, "principal/0", "good_port", "5405");

        assert_eq!(
            relay
                .get_port(&rid, "principal/0", "corosync_mcastport")
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            relay.get_port(&rid, "principal/0", "good_port").await.unwrap(),
            Some(5405)
        );
    }
}
