//! Key-value store persisted to a single JSON file.
//!
//! The whole map is held in memory and rewritten (temp file + rename) after
//! every mutation. Suited to the CLI and small sites, not to concurrent
//! processes sharing one file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{CleanupError, Result};
use crate::traits::kv::KvStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
        Self { value, expires_at }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

pub struct FileKvStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, FileRecord>>,
}

impl FileKvStore {
    /// Open (or create on first write) the store at `path`.
    ///
    /// Expired records are dropped on load.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut records: BTreeMap<String, FileRecord> = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(CleanupError::storage(e)),
        };

        let now = Utc::now();
        records.retain(|_, r| r.is_live(now));
        debug!(path = %path.display(), records = records.len(), "Opened file state store");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush(&self, records: &BTreeMap<String, FileRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(CleanupError::storage)?;
        }

        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(CleanupError::storage)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(CleanupError::storage)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now();
        let records = self.records.lock().await;
        Ok(records
            .get(key)
            .filter(|r| r.is_live(now))
            .map(|r| r.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut records = self.records.lock().await;
        let previous = records.insert(key.to_string(), FileRecord::new(value, ttl));
        if let Err(e) = self.flush(&records).await {
            restore(&mut records, key, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let Some(record) = records.remove(key) else {
            return Ok(false);
        };
        let live = record.is_live(now);
        if let Err(e) = self.flush(&records).await {
            records.insert(key.to_string(), record);
            return Err(e);
        }
        Ok(live)
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let now = Utc::now();
        let records = self.records.lock().await;
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, r)| r.is_live(now))
            .map(|(key, r)| (key.clone(), r.value.clone()))
            .collect())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        if records.get(key).is_some_and(|r| r.is_live(now)) {
            return Ok(false);
        }
        let previous = records.insert(key.to_string(), FileRecord::new(value, ttl));
        if let Err(e) = self.flush(&records).await {
            restore(&mut records, key, previous);
            return Err(e);
        }
        Ok(true)
    }
}

/// Undo an in-memory insert whose flush failed.
fn restore(records: &mut BTreeMap<String, FileRecord>, key: &str, previous: Option<FileRecord>) {
    match previous {
        Some(record) => {
            records.insert(key.to_string(), record);
        }
        None => {
            records.remove(key);
        }
    }
}
