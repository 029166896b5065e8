//! Pinata pinning API client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::PublishError;
use crate::publisher::Publisher;

/// Pinata endpoints and credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinataConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// JWT for the pinning API. Required.
    #[serde(default)]
    pub jwt: Option<String>,
}

fn default_api_url() -> String {
    "https://api.pinata.cloud".to_string()
}

fn default_gateway_url() -> String {
    "https://gateway.pinata.cloud".to_string()
}

impl Default for PinataConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            gateway_url: default_gateway_url(),
            jwt: None,
        }
    }
}

impl PinataConfig {
    /// The configured JWT, if present and non-blank.
    pub fn credential(&self) -> Result<&str, PublishError> {
        self.jwt
            .as_deref()
            .map(str::trim)
            .filter(|jwt| !jwt.is_empty())
            .ok_or(PublishError::MissingCredential)
    }
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Authenticated client for pinning JSON documents.
#[derive(Clone)]
pub struct PinataClient {
    http: reqwest::Client,
    api_url: String,
    gateway_url: String,
    jwt: String,
}

impl std::fmt::Debug for PinataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinataClient")
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .finish_non_exhaustive()
    }
}

impl PinataClient {
    /// Build a client. Fails with [`PublishError::MissingCredential`] if no JWT is configured.
    pub fn new(config: &PinataConfig) -> Result<Self, PublishError> {
        let jwt = config.credential()?.to_string();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PublishError::Upload(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            jwt,
        })
    }
}

#[async_trait]
impl Publisher for PinataClient {
    async fn publish(&self, document: &Value) -> Result<String, PublishError> {
        let body = json!({
            "pinataOptions": { "cidVersion": 1 },
            "pinataContent": document,
        });

        tracing::debug!("uploading document to Pinata");
        let response = self
            .http
            .post(format!("{}/pinning/pinJSONToIPFS", self.api_url))
            .bearer_auth(&self.jwt)
            .json(&body)
            .send()
            .await
            .map_err(|e| PublishError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Upload(format!("Pinata returned HTTP {status}")));
        }

        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;
        tracing::info!(cid = %pinned.ipfs_hash, "document pinned");
        Ok(pinned.ipfs_hash)
    }

    async fn retrieve(&self, content_hash: &str) -> Result<Value, PublishError> {
        let url = format!("{}/ipfs/{}", self.gateway_url, content_hash);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.jwt)
            .send()
            .await
            .map_err(|e| PublishError::Retrieve(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Retrieve(format!("gateway returned HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))
    }

    fn gateway_url(&self, content_hash: &str) -> Option<String> {
        Some(format!("{}/ipfs/{}", self.gateway_url, content_hash))
    }
}
