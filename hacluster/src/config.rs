//! Local charm configuration.
//!
//! Every component receives its configuration through a [`CharmConfig`]
//! value passed into its constructor; there are no ambient config accessors.

use std::net::Ipv4Addr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{HaError, HaResult};

/// Default minimum number of ready members before the cluster is formed
pub const DEFAULT_CLUSTER_COUNT: u32 = 2;

/// Default corosync multicast address
pub const DEFAULT_MCAST_ADDR: &str = "226.94.1.1";

/// Default pacemaker service scheme version used by corosync
pub const DEFAULT_PCMK_VERSION: u32 = 1;

/// Local configuration consumed by the convergence pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CharmConfig {
    /// Minimum number of ready members (local node included) required
    /// before any cluster configuration is attempted
    pub cluster_count: u32,

    /// Whether STONITH fencing should be bootstrapped once the cluster
    /// is configured
    #[serde(deserialize_with = "flexible_bool")]
    pub stonith_enabled: bool,

    /// Node inventory (MAAS) endpoint URL
    #[serde(deserialize_with = "empty_as_none")]
    pub maas_url: Option<String>,

    /// Node inventory credentials, `consumer_key:token_key:token_secret`
    #[serde(deserialize_with = "empty_as_none")]
    pub maas_credentials: Option<String>,

    /// Corosync multicast address
    pub corosync_mcastaddr: String,

    /// Corosync pacemaker service scheme version (1 starts pacemaker as a
    /// separate init service, 0 lets corosync spawn it)
    pub corosync_pcmk_ver: u32,

    /// Base64-encoded corosync authentication key
    #[serde(deserialize_with = "empty_as_none")]
    pub corosync_key: Option<String>,
}

impl Default for CharmConfig {
    fn default() -> Self {
        CharmConfig {
            cluster_count: DEFAULT_CLUSTER_COUNT,
            stonith_enabled: false,
            maas_url: None,
            maas_credentials: None,
            corosync_mcastaddr: DEFAULT_MCAST_ADDR.to_string(),
            corosync_pcmk_ver: DEFAULT_PCMK_VERSION,
            corosync_key: None,
        }
    }
}

impl CharmConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum cluster size
    pub fn cluster_count(mut self, count: u32) -> Self {
        self.cluster_count = count;
        self
    }

    /// Enable or disable STONITH fencing
    pub fn stonith_enabled(mut self, enabled: bool) -> Self {
        self.stonith_enabled = enabled;
        self
    }

    /// Set the node inventory endpoint and credentials
    pub fn inventory(mut self, url: impl Into<String>, credentials: impl Into<String>) -> Self {
        self.maas_url = Some(url.into());
        self.maas_credentials = Some(credentials.into());
        self
    }

    /// Set the corosync multicast address
    pub fn mcast_addr(mut self, addr: impl Into<String>) -> Self {
        self.corosync_mcastaddr = addr.into();
        self
    }

    /// Set the pacemaker service scheme version
    pub fn pcmk_version(mut self, version: u32) -> Self {
        self.corosync_pcmk_ver = version;
        self
    }

    /// Set the base64-encoded corosync authentication key
    pub fn corosync_key(mut self, key: impl Into<String>) -> Self {
        self.corosync_key = Some(key.into());
        self
    }

    /// Parse a configuration from the JSON document produced by the host
    /// environment's `config-get --format=json`
    pub fn from_json(value: serde_json::Value) -> HaResult<Self> {
        let config: CharmConfig = serde_json::from_value(value)?;
        config.build()
    }

    /// Validate and build the configuration
    pub fn build(self) -> HaResult<Self> {
        if self.cluster_count < 2 {
            return Err(HaError::Configuration(format!(
                "cluster_count must be at least 2, got {}",
                self.cluster_count
            )));
        }

        match self.corosync_mcastaddr.parse::<Ipv4Addr>() {
            Ok(addr) if addr.is_multicast() => {}
            Ok(addr) => {
                return Err(HaError::Configuration(format!(
                    "corosync_mcastaddr {} is not a multicast address",
                    addr
                )));
            }
            Err(_) => {
                return Err(HaError::Configuration(format!(
                    "corosync_mcastaddr {} is not a valid IPv4 address",
                    self.corosync_mcastaddr
                )));
            }
        }

        if self.corosync_pcmk_ver > 1 {
            return Err(HaError::Configuration(format!(
                "corosync_pcmk_ver must be 0 or 1, got {}",
                self.corosync_pcmk_ver
            )));
        }

        Ok(self)
    }
}

// Host environments publish booleans either natively or as "True"/"False"
// strings, depending on the option schema.
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Text(String),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Bool(b) => Ok(b),
        Flexible::Text(s) => Ok(matches!(s.trim(), "true" | "True" | "yes" | "1")),
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_config() {
        let config = CharmConfig::default();
        assert_eq!(config.cluster_count, DEFAULT_CLUSTER_COUNT);
        assert!(!config.stonith_enabled);
        assert_eq!(config.corosync_mcastaddr, DEFAULT_MCAST_ADDR);
        assert_eq!(config.corosync_pcmk_ver, DEFAULT_PCMK_VERSION);
        assert!(config.corosync_key.is_none());
    }

    #[test]
    fn test_from_json_with_string_booleans() {
        let config = CharmConfig::from_json(json!({
            "cluster_count": 3,
            "stonith_enabled": "True",
            "maas_url": "http://maas.example.com/MAAS",
            "maas_credentials": "a:b:c",
            "corosync_key": "c2VjcmV0",
        }))
        .unwrap();

        assert_eq!(config.cluster_count, 3);
        assert!(config.stonith_enabled);
        assert_eq!(config.maas_url.as_deref(), Some("http://maas.example.com/MAAS"));
        assert_eq!(config.corosync_key.as_deref(), Some("c2VjcmV0"));
    }

    #[test]
    fn test_empty_strings_become_none() {
        let config = CharmConfig::from_json(json!({
            "maas_url": "",
            "maas_credentials": "",
            "corosync_key": "c2VjcmV0",
        }))
        .unwrap();

        assert!(config.maas_url.is_none());
        assert!(config.maas_credentials.is_none());
    }

    #[test]
    fn test_cluster_count_too_small_fails() {
        let err = CharmConfig::new().cluster_count(1).build().unwrap_err();
        match err {
            HaError::Configuration(msg) => assert!(msg.contains("cluster_count")),
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_multicast_addr_fails() {
        let err = CharmConfig::new().mcast_addr("10.0.0.1").build().unwrap_err();
        match err {
            HaError::Configuration(msg) => assert!(msg.contains("multicast")),
            other => panic!("Expected Configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_roundtrip() {
        let config = CharmConfig::new()
            .cluster_count(3)
            .stonith_enabled(true)
            .inventory("http://maas", "k:t:s")
            .corosync_key("c2VjcmV0")
            .build()
            .unwrap();

        assert_eq!(config.cluster_count, 3);
        assert!(config.stonith_enabled);
        assert_eq!(config.maas_credentials.as_deref(), Some("k:t:s"));
    }
}
