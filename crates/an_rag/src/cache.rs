use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use an_core::Result;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::engine::ChatEngine;

/// Hex sha256 of an API key, so the raw key never sits in a map key.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Everything an engine depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineKey {
    pub topic: String,
    pub collection_name: String,
    pub api_key_hash: String,
}

impl EngineKey {
    pub fn new(topic: &str, collection_name: &str, api_key: Option<&str>) -> Self {
        Self {
            topic: topic.to_string(),
            collection_name: collection_name.to_string(),
            api_key_hash: hash_api_key(api_key.unwrap_or_default()),
        }
    }
}

/// Engines built so far, keyed by their configuration.
///
/// Construction runs under the map lock, so two callers asking for the same
/// key in one process never build twice.
#[derive(Default)]
pub struct EngineCache {
    engines: Mutex<HashMap<EngineKey, Arc<ChatEngine>>>,
}

impl EngineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &EngineKey) -> Option<Arc<ChatEngine>> {
        self.engines.lock().await.get(key).cloned()
    }

    /// Returns the cached engine or builds one with `init`. Failures are not cached.
    pub async fn get_or_try_insert_with<F, Fut>(
        &self,
        key: EngineKey,
        init: F,
    ) -> Result<Arc<ChatEngine>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ChatEngine>>,
    {
        let mut engines = self.engines.lock().await;
        if let Some(engine) = engines.get(&key) {
            return Ok(engine.clone());
        }
        tracing::debug!("Building chat engine for {}", key.collection_name);
        let engine = Arc::new(init().await?);
        engines.insert(key, engine.clone());
        Ok(engine)
    }

    /// Drops one engine; the next lookup rebuilds it.
    pub async fn invalidate(&self, key: &EngineKey) -> bool {
        self.engines.lock().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.engines.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.engines.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.engines.lock().await.is_empty()
    }
}
