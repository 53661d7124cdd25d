//! Restores a completed job's content from its backups.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::backup::BackupManager;
use crate::config::EngineConfig;
use crate::coordinator::JobCoordinator;
use crate::error::{Result, RollbackError};
use crate::traits::content::ContentStore;
use crate::types::backup::BackupSnapshot;
use crate::types::content::ContentId;
use crate::types::job::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub success: bool,
    pub restored_count: usize,
}

pub struct RollbackEngine {
    content: Arc<dyn ContentStore>,
    backups: Arc<BackupManager>,
    jobs: Arc<JobCoordinator>,
    config: Arc<EngineConfig>,
}

impl RollbackEngine {
    pub fn new(
        content: Arc<dyn ContentStore>,
        backups: Arc<BackupManager>,
        jobs: Arc<JobCoordinator>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            content,
            backups,
            jobs,
            config,
        }
    }

    /// Put every item the job touched back to its snapshotted value.
    ///
    /// All-or-nothing: on any error the content is left as it was before
    /// the call and the job keeps its status.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn rollback_changes(&self, job_id: Uuid) -> Result<RollbackOutcome> {
        let mut job = self.jobs.load_job(job_id).await?;
        match job.status {
            JobStatus::Completed => {}
            JobStatus::RolledBack => return Err(RollbackError::AlreadyRolledBack { job_id }.into()),
            status => return Err(RollbackError::InvalidState { job_id, status }.into()),
        }

        job.transition(JobStatus::RolledBack)?;

        let snapshots = self.backups.list_for_job(job_id).await?;
        if snapshots.is_empty() {
            return Err(RollbackError::NoBackups { job_id }.into());
        }

        // Current values, read before any write so a missing item aborts cleanly.
        let mut current = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            let item = self
                .content
                .get_item(&snapshot.content_id)
                .await?
                .ok_or_else(|| RollbackError::ItemMissing {
                    content_id: snapshot.content_id.clone(),
                })?;
            current.push(item.value);
        }

        for (restored, snapshot) in snapshots.iter().enumerate() {
            if let Err(e) = self
                .content
                .persist_item(&snapshot.content_id, &snapshot.original_value)
                .await
            {
                self.compensate(&snapshots[..restored], &current).await;
                return Err(RollbackError::RestoreFailed {
                    content_id: snapshot.content_id.clone(),
                    reason: e.to_string(),
                }
                .into());
            }
        }

        match self.first_mismatch(&snapshots).await {
            Ok(None) => {}
            Ok(Some(content_id)) => {
                self.compensate(&snapshots, &current).await;
                return Err(RollbackError::VerificationFailed { content_id }.into());
            }
            Err(e) => {
                self.compensate(&snapshots, &current).await;
                return Err(e);
            }
        }

        job.push_log(
            format!("Rolled back {} items", snapshots.len()),
            self.config.max_log_entries,
        );
        if let Err(e) = self.jobs.save_job(&job).await {
            self.compensate(&snapshots, &current).await;
            return Err(e);
        }

        // The job is already RolledBack; leftover snapshots expire with retention.
        let removed = match self.backups.delete_for_job(job_id).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to delete backups after rollback");
                0
            }
        };

        info!(job_id = %job_id, restored = snapshots.len(), backups_removed = removed, "Job rolled back");

        Ok(RollbackOutcome {
            success: true,
            restored_count: snapshots.len(),
        })
    }

    async fn first_mismatch(&self, snapshots: &[BackupSnapshot]) -> Result<Option<ContentId>> {
        for snapshot in snapshots {
            let restored = self.content.get_item(&snapshot.content_id).await?;
            if restored.map(|item| item.value).as_deref() != Some(snapshot.original_value.as_str()) {
                return Ok(Some(snapshot.content_id.clone()));
            }
        }
        Ok(None)
    }

    /// Re-write the pre-rollback values of `restored`.
    async fn compensate(&self, restored: &[BackupSnapshot], current: &[String]) {
        for (snapshot, value) in restored.iter().zip(current) {
            if let Err(e) = self.content.persist_item(&snapshot.content_id, value).await {
                warn!(
                    content_id = %snapshot.content_id,
                    error = %e,
                    "Failed to undo partial rollback"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::engine::CleanupEngine;
    use crate::error::CleanupError;
    use crate::keys;
    use crate::stores::{MemoryContentStore, MemoryKvStore, MemoryRuleSource};
    use crate::testing;
    use crate::traits::kv::KvStore;
    use crate::types::content::{ContentItem, ContentType};
    use crate::types::job::JobOptions;

    /// Reads fail once `reads_left` runs out.
    struct FlakyReads {
        inner: Arc<MemoryContentStore>,
        reads_left: AtomicUsize,
    }

    #[async_trait]
    impl ContentStore for FlakyReads {
        async fn list_items(
            &self,
            content_type: ContentType,
            offset: usize,
            limit: usize,
        ) -> Result<Vec<ContentItem>> {
            self.inner.list_items(content_type, offset, limit).await
        }

        async fn get_item(&self, id: &ContentId) -> Result<Option<ContentItem>> {
            let allowed = self
                .reads_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(CleanupError::content("read unavailable"));
            }
            self.inner.get_item(id).await
        }

        async fn persist_item(&self, id: &ContentId, value: &str) -> Result<()> {
            self.inner.persist_item(id, value).await
        }
    }

    /// Rejects job record writes while `armed`.
    #[derive(Default)]
    struct JobWritesFail {
        inner: MemoryKvStore,
        armed: AtomicBool,
    }

    #[async_trait]
    impl KvStore for JobWritesFail {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
            if self.armed.load(Ordering::SeqCst) && key.starts_with(keys::JOB_PREFIX) {
                return Err(CleanupError::storage("job writes unavailable"));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }

        async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
            self.inner.list_by_prefix(prefix).await
        }
    }

    async fn completed_job(engine: &CleanupEngine) -> Uuid {
        engine.analyze_redirections().await.unwrap();
        engine.run_cleanup(JobOptions::live()).await.unwrap().id
    }

    #[tokio::test]
    async fn verification_read_error_is_undone() {
        let memory = Arc::new(MemoryContentStore::with_items(testing::chain_content()));
        let content = Arc::new(FlakyReads {
            inner: memory.clone(),
            reads_left: AtomicUsize::new(usize::MAX),
        });
        let engine = CleanupEngine::new(
            Arc::new(MemoryRuleSource::new(testing::chain_rules())),
            content.clone(),
            Arc::new(MemoryKvStore::new()),
            testing::default_config(),
        );
        let job_id = completed_job(&engine).await;
        let before = memory.snapshot();

        // three snapshots: the pre-read passes, the first verification read fails
        content.reads_left.store(3, Ordering::SeqCst);
        let err = engine.rollback_changes(job_id).await.unwrap_err();

        assert!(matches!(err, CleanupError::Content(_)));
        assert_eq!(memory.snapshot(), before);
        assert_eq!(
            engine.get_job_details(job_id).await.unwrap().status,
            JobStatus::Completed
        );

        content.reads_left.store(usize::MAX, Ordering::SeqCst);
        assert!(engine.rollback_changes(job_id).await.unwrap().success);
    }

    #[tokio::test]
    async fn failed_job_save_keeps_backups_and_content() {
        let memory = Arc::new(MemoryContentStore::with_items(testing::chain_content()));
        let kv = Arc::new(JobWritesFail::default());
        let engine = CleanupEngine::new(
            Arc::new(MemoryRuleSource::new(testing::chain_rules())),
            memory.clone(),
            kv.clone(),
            testing::default_config(),
        );
        let job_id = completed_job(&engine).await;
        let before = memory.snapshot();

        kv.armed.store(true, Ordering::SeqCst);
        let err = engine.rollback_changes(job_id).await.unwrap_err();

        assert!(matches!(err, CleanupError::Storage(_)));
        assert_eq!(memory.snapshot(), before);
        assert_eq!(
            engine.get_job_details(job_id).await.unwrap().status,
            JobStatus::Completed
        );

        kv.armed.store(false, Ordering::SeqCst);
        let outcome = engine.rollback_changes(job_id).await.unwrap();
        assert_eq!(outcome.restored_count, 3);
        assert_eq!(
            engine.get_job_details(job_id).await.unwrap().status,
            JobStatus::RolledBack
        );
        assert_eq!(memory.snapshot(), MemoryContentStore::with_items(testing::chain_content()).snapshot());
    }
}
