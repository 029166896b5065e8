//! The publication capability.

use async_trait::async_trait;
use serde_json::{json, Value};

use tally_types::Timestamp;

use crate::error::PublishError;

/// A content-addressed document store.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Store `document` and return its content hash.
    async fn publish(&self, document: &Value) -> Result<String, PublishError>;

    /// Fetch the document addressed by `content_hash`.
    async fn retrieve(&self, content_hash: &str) -> Result<Value, PublishError>;

    /// Public URL for a content hash, if the store has one.
    fn gateway_url(&self, _content_hash: &str) -> Option<String> {
        None
    }
}

/// Upload a probe document and read it back. Returns the probe's content hash.
pub async fn test_connection(
    publisher: &dyn Publisher,
    now: Timestamp,
) -> Result<String, PublishError> {
    let probe = json!({
        "test": "Hello Pinata IPFS",
        "timestamp": now.as_secs(),
    });
    let hash = publisher.publish(&probe).await?;
    let retrieved = publisher.retrieve(&hash).await?;
    if retrieved != probe {
        return Err(PublishError::InvalidResponse(format!(
            "probe {hash} came back altered"
        )));
    }
    tracing::info!(%hash, "publication round-trip succeeded");
    Ok(hash)
}
