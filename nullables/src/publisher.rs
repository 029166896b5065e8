//! Nullable publisher: an in-memory content-addressed store.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tally_publish::{PublishError, Publisher};

#[derive(Default)]
struct Store {
    documents: HashMap<String, Value>,
    publish_count: usize,
    fail_publish: Option<PublishError>,
    fail_retrieve: Option<PublishError>,
}

/// Stores documents in memory, addressed by the SHA-256 of their JSON encoding.
#[derive(Default)]
pub struct NullPublisher {
    store: Mutex<Store>,
}

impl NullPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The content hash `document` would be stored under.
    pub fn hash_of(document: &Value) -> String {
        let digest = Sha256::digest(document.to_string().as_bytes());
        format!("bafk{}", hex::encode(digest))
    }

    /// The next publish fails with `error`.
    pub fn fail_next_publish(&self, error: PublishError) {
        self.store().fail_publish = Some(error);
    }

    /// The next retrieve fails with `error`.
    pub fn fail_next_retrieve(&self, error: PublishError) {
        self.store().fail_retrieve = Some(error);
    }

    /// Number of publish attempts, failed ones included.
    pub fn publish_count(&self) -> usize {
        self.store().publish_count
    }

    pub fn document(&self, content_hash: &str) -> Option<Value> {
        self.store().documents.get(content_hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.store().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Publisher for NullPublisher {
    async fn publish(&self, document: &Value) -> Result<String, PublishError> {
        let mut store = self.store();
        store.publish_count += 1;
        if let Some(err) = store.fail_publish.take() {
            return Err(err);
        }
        let hash = Self::hash_of(document);
        store.documents.insert(hash.clone(), document.clone());
        Ok(hash)
    }

    async fn retrieve(&self, content_hash: &str) -> Result<Value, PublishError> {
        let mut store = self.store();
        if let Some(err) = store.fail_retrieve.take() {
            return Err(err);
        }
        store
            .documents
            .get(content_hash)
            .cloned()
            .ok_or_else(|| PublishError::Retrieve(format!("{content_hash} not found")))
    }

    fn gateway_url(&self, content_hash: &str) -> Option<String> {
        Some(format!("null://ipfs/{content_hash}"))
    }
}
