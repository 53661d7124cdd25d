//! Applies one window of a job's pinned mapping across content.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::backup::BackupManager;
use crate::config::EngineConfig;
use crate::error::{CleanupError, Result};
use crate::keys;
use crate::rewriter::{ContentRewriter, PreparedMapping};
use crate::traits::content::ContentStore;
use crate::traits::kv::{self, KvStore};
use crate::types::content::{ContentItem, ContentType};
use crate::types::job::{BatchResult, Job};
use crate::types::mapping::ResolvedMapping;

pub struct BatchProcessor {
    content: Arc<dyn ContentStore>,
    kv: Arc<dyn KvStore>,
    backups: Arc<BackupManager>,
    config: Arc<EngineConfig>,
    rewriter: ContentRewriter,
}

/// What happened to a single item.
enum ItemOutcome {
    Untouched,
    Updated { replaced: usize, backed_up: bool },
    Failed,
}

impl BatchProcessor {
    pub fn new(
        content: Arc<dyn ContentStore>,
        kv: Arc<dyn KvStore>,
        backups: Arc<BackupManager>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let rewriter = ContentRewriter::new(config.site_hosts.clone());
        Self {
            content,
            kv,
            backups,
            config,
            rewriter,
        }
    }

    /// Apply mapping entries `[batch_start, batch_start + batch_limit)`.
    ///
    /// Item failures are tallied in `failed_items`; only store errors while
    /// loading the job, its mapping or a content page abort the batch.
    pub async fn process_batch(
        &self,
        job_id: Uuid,
        batch_start: usize,
        batch_limit: usize,
    ) -> Result<BatchResult> {
        let job: Job = kv::get_json(self.kv.as_ref(), &keys::job(job_id))
            .await?
            .ok_or(CleanupError::JobNotFound { job_id })?;
        let mapping = self.pinned_mapping(job_id).await?;

        let total = mapping.len();
        let window = mapping.window(batch_start, batch_limit);
        let mut result = BatchResult::empty(batch_start, total);
        result.batch_end = batch_start.saturating_add(batch_limit).min(total);
        result.is_complete = result.batch_end >= total;

        if window.is_empty() {
            debug!(job_id = %job_id, batch_start, total, "Empty batch window");
            return Ok(result);
        }

        let prepared = PreparedMapping::new(&window);
        let content_types = if job.options.content_types.is_empty() {
            self.config.default_content_types.clone()
        } else {
            job.options.content_types.clone()
        };

        for content_type in content_types {
            self.process_content_type(&job, content_type, &prepared, &mut result)
                .await?;
        }

        debug!(
            job_id = %job_id,
            batch_start = result.batch_start,
            batch_end = result.batch_end,
            items_updated = result.items_updated(),
            urls_replaced = result.urls_replaced,
            failed_items = result.failed_items,
            dry_run = job.options.dry_run,
            "Processed batch"
        );

        Ok(result)
    }

    async fn pinned_mapping(&self, job_id: Uuid) -> Result<ResolvedMapping> {
        kv::get_json(self.kv.as_ref(), &keys::job_mapping(job_id))
            .await?
            .ok_or_else(|| CleanupError::storage(format!("mapping for job {job_id} is missing")))
    }

    async fn process_content_type(
        &self,
        job: &Job,
        content_type: ContentType,
        prepared: &PreparedMapping,
        result: &mut BatchResult,
    ) -> Result<()> {
        let page_size = self.config.scan_page_size.max(1);
        let mut offset = 0;

        loop {
            let page = self.content.list_items(content_type, offset, page_size).await?;
            let fetched = page.len();

            for item in &page {
                match self.process_item(job, item, prepared).await {
                    ItemOutcome::Untouched => {}
                    ItemOutcome::Updated { replaced, backed_up } => {
                        result.record_update(content_type, replaced);
                        if backed_up {
                            result.backups_created += 1;
                        }
                    }
                    ItemOutcome::Failed => result.failed_items += 1,
                }
            }

            if fetched < page_size {
                return Ok(());
            }
            offset += fetched;
        }
    }

    async fn process_item(
        &self,
        job: &Job,
        item: &ContentItem,
        prepared: &PreparedMapping,
    ) -> ItemOutcome {
        let (rewritten, replaced) = if self.config.repair_malformed_urls {
            self.rewriter.replace_and_repair(&item.value, prepared)
        } else {
            self.rewriter.replace_prepared(&item.value, prepared)
        };
        if replaced == 0 {
            return ItemOutcome::Untouched;
        }

        if job.options.dry_run {
            return ItemOutcome::Updated {
                replaced,
                backed_up: false,
            };
        }

        let mut backed_up = false;
        if job.options.create_backup {
            match self.backups.snapshot_once(job.id, item).await {
                Ok(created) => backed_up = created,
                Err(e) => {
                    warn!(job_id = %job.id, content_id = %item.id, error = %e, "Backup failed, skipping item");
                    return ItemOutcome::Failed;
                }
            }
        }

        if let Err(e) = self.content.persist_item(&item.id, &rewritten).await {
            warn!(job_id = %job.id, content_id = %item.id, error = %e, "Failed to persist rewritten item");
            return ItemOutcome::Failed;
        }

        ItemOutcome::Updated { replaced, backed_up }
    }
}
