//! Persistent key-value storage for jobs, backups, locks and the analysis cache.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Minimal key-value contract.
///
/// Values are opaque strings (the engine stores JSON). A record written with
/// a TTL must not be returned by `get` or `list_by_prefix` once it expires.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Returns whether a record was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All live records whose key starts with `prefix`, sorted by key.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Write only if the key is absent. Returns whether the write happened.
    ///
    /// The default is not atomic; backends that can should override it.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        if self.get(key).await?.is_some() {
            return Ok(false);
        }
        self.set(key, value, ttl).await?;
        Ok(true)
    }
}

/// Read and decode a JSON record.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON record.
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, raw, ttl).await
}

/// Decode every JSON record under a prefix, in key order.
pub async fn list_json<T: DeserializeOwned>(store: &dyn KvStore, prefix: &str) -> Result<Vec<(String, T)>> {
    store
        .list_by_prefix(prefix)
        .await?
        .into_iter()
        .map(|(key, raw)| -> Result<(String, T)> { Ok((key, serde_json::from_str(&raw)?)) })
        .collect()
}
