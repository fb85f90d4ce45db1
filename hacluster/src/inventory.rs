//! Node inventory client.
//!
//! Fencing primitives are derived from an external inventory service (a
//! MAAS-style API) that knows each node's power-management metadata.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{HaError, HaResult};

/// Power-management metadata attached to an inventory node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerParameters {
    /// Management (BMC) address
    #[serde(default)]
    pub power_address: Option<String>,
    /// Management user
    #[serde(default)]
    pub power_user: Option<String>,
    /// Management password or credential reference
    #[serde(default)]
    pub power_pass: Option<String>,
}

/// One node as reported by the inventory service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryNode {
    /// Node hostname, matched against the cluster's membership view
    pub hostname: String,
    /// Inventory-assigned identifier
    #[serde(default)]
    pub system_id: Option<String>,
    /// Power driver type
    #[serde(default)]
    pub power_type: Option<String>,
    /// Power-management metadata
    #[serde(default)]
    pub power_parameters: PowerParameters,
}

impl InventoryNode {
    /// Whether this entry matches a cluster member name. Inventory hostnames
    /// are often fully qualified while the cluster manager reports short
    /// names.
    pub fn matches(&self, node: &str) -> bool {
        self.hostname == node || self.hostname.split('.').next() == Some(node)
    }
}

/// Queries the external node inventory
#[async_trait]
pub trait InventoryProvider: Send + Sync {
    /// Fetch the full node inventory
    async fn list_nodes(&self) -> HaResult<Vec<InventoryNode>>;
}

/// MAAS-style inventory client
pub struct MaasClient {
    base_url: String,
    credentials: OauthCredentials,
    client: reqwest::Client,
}

/// OAuth 1.0 credentials in the inventory service's three-part form
#[derive(Debug, Clone, PartialEq)]
pub struct OauthCredentials {
    consumer_key: String,
    token_key: String,
    token_secret: String,
}

impl OauthCredentials {
    /// Parse `consumer_key:token_key:token_secret`
    pub fn parse(credentials: &str) -> HaResult<Self> {
        let parts: Vec<&str> = credentials.split(':').collect();
        match parts.as_slice() {
            [consumer_key, token_key, token_secret]
                if !consumer_key.is_empty()
                    && !token_key.is_empty()
                    && !token_secret.is_empty() =>
            {
                Ok(OauthCredentials {
                    consumer_key: consumer_key.to_string(),
                    token_key: token_key.to_string(),
                    token_secret: token_secret.to_string(),
                })
            }
            _ => Err(HaError::Configuration(
                "inventory credentials must be consumer_key:token_key:token_secret".to_string(),
            )),
        }
    }

    /// Build an OAuth 1.0 PLAINTEXT Authorization header value
    pub fn authorization_header(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        format!(
            "OAuth oauth_version=\"1.0\", oauth_signature_method=\"PLAINTEXT\", \
             oauth_consumer_key=\"{}\", oauth_token=\"{}\", oauth_signature=\"&{}\", \
             oauth_nonce=\"{}\", oauth_timestamp=\"{}\"",
            self.consumer_key,
            self.token_key,
            self.token_secret,
            now.subsec_nanos(),
            now.as_secs(),
        )
    }
}

impl MaasClient {
    /// Create a client for the given endpoint and three-part credentials
    pub fn new(url: &str, credentials: &str) -> HaResult<Self> {
        Ok(MaasClient {
            base_url: url.trim_end_matches('/').to_string(),
            credentials: OauthCredentials::parse(credentials)?,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl InventoryProvider for MaasClient {
    async fn list_nodes(&self) -> HaResult<Vec<InventoryNode>> {
        let url = format!("{}/api/1.0/nodes/?op=list", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.credentials.authorization_header())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HaError::Inventory(format!(
                "inventory request to {} failed: {}",
                url,
                response.status()
            )));
        }

        let nodes: Vec<InventoryNode> = response.json().await?;
        log::debug!("Inventory returned {} nodes", nodes.len());
        Ok(nodes)
    }
}
