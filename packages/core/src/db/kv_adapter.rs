//! KvAdapter - Point Operations on the Embedded Key-Value Engine
//!
//! The embedded engine takes no statements: the command's statement is the
//! key (or a key pattern for `scan`) and values are JSON documents. Every
//! call leases the target's handle from the [`ConnectionManager`] and runs the
//! blocking engine call on the blocking pool, releasing the lease there.

use crate::db::connection_manager::ConnectionManager;
use crate::db::kv_store::KvStore;
use crate::db::{GatewayError, GatewayResult};
use regex::Regex;
use serde_json::Value;

#[derive(Clone)]
pub struct KvAdapter {
    manager: ConnectionManager,
}

impl KvAdapter {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Document stored under `key`
    pub async fn get(&self, target: &str, key: &str) -> GatewayResult<Value> {
        let key = checked_key(key)?;
        self.run(target, move |store| store.get(&key).map(|raw| decode(&raw)))
            .await
    }

    /// Create `key`; fails with `Conflict` if it exists
    pub async fn put(&self, target: &str, key: &str, document: &Value) -> GatewayResult<()> {
        let key = checked_key(key)?;
        let raw = encode(document)?;
        self.run(target, move |store| store.insert(&key, &raw)).await
    }

    /// Replace an existing `key`; fails with `NotFound` if absent
    pub async fn update(&self, target: &str, key: &str, document: &Value) -> GatewayResult<()> {
        let key = checked_key(key)?;
        let raw = encode(document)?;
        self.run(target, move |store| store.update(&key, &raw)).await
    }

    /// Remove `key` whether or not it exists
    pub async fn delete(&self, target: &str, key: &str) -> GatewayResult<()> {
        let key = checked_key(key)?;
        self.run(target, move |store| store.delete(&key)).await
    }

    /// Entries whose key matches `pattern` (all entries for an empty pattern)
    pub async fn scan(&self, target: &str, pattern: &str) -> GatewayResult<Vec<(String, Value)>> {
        let pattern = Regex::new(pattern)
            .map_err(|e| GatewayError::bad_request(format!("invalid key pattern: {}", e)))?;
        self.run(target, move |store| {
            Ok(store
                .scan(&pattern)?
                .into_iter()
                .map(|(key, raw)| (key, decode(&raw)))
                .collect())
        })
        .await
    }

    async fn run<T, F>(&self, target: &str, op: F) -> GatewayResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&KvStore) -> GatewayResult<T> + Send + 'static,
    {
        let lease = self.manager.acquire(target).await?;
        tokio::task::spawn_blocking(move || op(&*lease)).await?
    }
}

fn checked_key(key: &str) -> GatewayResult<String> {
    if key.is_empty() {
        return Err(GatewayError::bad_request("key must not be empty"));
    }
    Ok(key.to_string())
}

fn encode(document: &Value) -> GatewayResult<Vec<u8>> {
    serde_json::to_vec(document)
        .map_err(|e| GatewayError::bad_request(format!("document is not serializable: {}", e)))
}

/// Stored bytes as a document; values written by other tools come back as text
fn decode(raw: &[u8]) -> Value {
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}
