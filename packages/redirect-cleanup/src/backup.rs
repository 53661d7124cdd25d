//! Per-job snapshots of content taken before the first live write.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::keys;
use crate::traits::kv::{self, KvStore};
use crate::types::backup::BackupSnapshot;
use crate::types::content::ContentItem;

pub struct BackupManager {
    kv: Arc<dyn KvStore>,
    config: Arc<EngineConfig>,
}

impl BackupManager {
    pub fn new(kv: Arc<dyn KvStore>, config: Arc<EngineConfig>) -> Self {
        Self { kv, config }
    }

    /// Snapshot `item` for `job_id` unless one already exists.
    ///
    /// Returns whether a new snapshot was written.
    pub async fn snapshot_once(&self, job_id: Uuid, item: &ContentItem) -> Result<bool> {
        let key = keys::backup(job_id, &item.id);
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.config.retention_chrono())
            .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC);

        let snapshot = BackupSnapshot {
            job_id,
            content_id: item.id.clone(),
            original_value: item.value.clone(),
            created_at: now,
            expires_at,
        };

        let created = self
            .kv
            .set_if_absent(
                &key,
                serde_json::to_string(&snapshot)?,
                Some(self.config.backup_retention),
            )
            .await?;

        if created {
            debug!(job_id = %job_id, content_id = %item.id, "Backed up content item");
        }
        Ok(created)
    }

    /// Every snapshot of a job, in key order.
    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<BackupSnapshot>> {
        let snapshots = kv::list_json(self.kv.as_ref(), &keys::backup_prefix(job_id)).await?;
        Ok(snapshots.into_iter().map(|(_, s)| s).collect())
    }

    /// Remove every snapshot of a job. Returns how many were removed.
    pub async fn delete_for_job(&self, job_id: Uuid) -> Result<usize> {
        let mut removed = 0;
        for (key, _) in self.kv.list_by_prefix(&keys::backup_prefix(job_id)).await? {
            if self.kv.delete(&key).await? {
                removed += 1;
            }
        }
        debug!(job_id = %job_id, removed, "Deleted job backups");
        Ok(removed)
    }

    /// Delete snapshots past their retention, for stores that ignore TTLs.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut purged = 0;

        let snapshots: Vec<(String, BackupSnapshot)> =
            kv::list_json(self.kv.as_ref(), keys::BACKUP_PREFIX).await?;
        for (key, snapshot) in snapshots {
            if snapshot.is_expired(now) && self.kv.delete(&key).await? {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(purged, "Purged expired backups");
        }
        Ok(purged)
    }
}
