//! Job lifecycle: start, drive batches to completion, report progress.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::analyzer::RedirectAnalyzer;
use crate::batch::BatchProcessor;
use crate::config::EngineConfig;
use crate::error::{CleanupError, Result};
use crate::keys;
use crate::traits::kv::{self, KvStore};
use crate::types::job::{Job, JobOptions, JobProgress, JobStatus};

pub struct JobCoordinator {
    kv: Arc<dyn KvStore>,
    analyzer: Arc<RedirectAnalyzer>,
    batches: Arc<BatchProcessor>,
    config: Arc<EngineConfig>,
}

impl JobCoordinator {
    pub fn new(
        kv: Arc<dyn KvStore>,
        analyzer: Arc<RedirectAnalyzer>,
        batches: Arc<BatchProcessor>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            kv,
            analyzer,
            batches,
            config,
        }
    }

    /// Create a `Pending` job against the cached analysis.
    ///
    /// Fails with `AnalysisMissing` (and writes nothing) when no fresh
    /// analysis is cached.
    pub async fn start_cleanup_process(&self, options: JobOptions) -> Result<Uuid> {
        let options = self.validate_options(options)?;
        let analysis = self
            .analyzer
            .cached_analysis()
            .await?
            .ok_or(CleanupError::AnalysisMissing)?;

        let mut job = Job::new(options, analysis.url_mapping.len());
        job.push_log(
            format!(
                "Job created: {} mappings, types [{}], batch size {}, {}",
                job.total_mappings,
                job.options
                    .content_types
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.batch_size(&job),
                if job.options.dry_run { "dry run" } else { "live" }
            ),
            self.config.max_log_entries,
        );

        kv::set_json(
            self.kv.as_ref(),
            &keys::job_mapping(job.id),
            &analysis.url_mapping,
            None,
        )
        .await?;
        self.save_job(&job).await?;

        info!(
            job_id = %job.id,
            total_mappings = job.total_mappings,
            dry_run = job.options.dry_run,
            "Cleanup job created"
        );
        Ok(job.id)
    }

    /// Run every remaining batch of a job.
    ///
    /// Resumes from `next_offset` when the job was interrupted while
    /// `Running`. On a fatal error the job is persisted as `Failed` with its
    /// partial results and the error is returned.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn process_cleanup_job(&self, job_id: Uuid) -> Result<Job> {
        let mut job = self.load_job(job_id).await?;
        if !job.status.can_transition_to(JobStatus::Running) {
            return Err(CleanupError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Running,
            });
        }

        let locked = job.is_live() && self.config.exclusive_live_jobs;
        if locked {
            self.acquire_live_lock(job_id).await?;
        }

        let outcome = self.drive(&mut job).await;

        if locked {
            if let Err(e) = self.release_live_lock(job_id).await {
                warn!(job_id = %job_id, error = %e, "Failed to release live job lock");
            }
        }

        outcome.map(|()| job)
    }

    async fn drive(&self, job: &mut Job) -> Result<()> {
        let resumed = job.status == JobStatus::Running;
        job.transition(JobStatus::Running)?;
        let cap = self.config.max_log_entries;
        if resumed {
            job.push_log(format!("Resuming at mapping {}", job.next_offset), cap);
        } else {
            job.push_log("Job started", cap);
        }
        self.save_job(job).await?;
        info!(job_id = %job.id, resumed, next_offset = job.next_offset, "Cleanup job running");

        loop {
            let batch = match self
                .batches
                .process_batch(job.id, job.next_offset, self.batch_size(job))
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    self.fail(job, &e).await;
                    return Err(e);
                }
            };

            job.results.absorb(&batch);
            job.next_offset = batch.batch_end;
            job.push_log(
                format!(
                    "Batch {}-{}: {} items updated, {} urls replaced, {} failed",
                    batch.batch_start,
                    batch.batch_end,
                    batch.items_updated(),
                    batch.urls_replaced,
                    batch.failed_items
                ),
                cap,
            );

            if batch.is_complete {
                break;
            }
            if let Err(e) = self.save_job(job).await {
                self.fail(job, &e).await;
                return Err(e);
            }
        }

        job.transition(JobStatus::Completed)?;
        job.push_log("Job completed", cap);
        self.save_job(job).await?;
        self.drop_mapping_pin(job.id).await;

        info!(
            job_id = %job.id,
            posts_updated = job.results.posts_updated,
            meta_updated = job.results.meta_updated,
            options_updated = job.results.options_updated,
            urls_replaced = job.results.urls_replaced,
            failed_items = job.results.failed_items,
            "Cleanup job completed"
        );
        Ok(())
    }

    /// Record a fatal error. A failure to persist it is only logged.
    async fn fail(&self, job: &mut Job, error: &CleanupError) {
        warn!(job_id = %job.id, error = %error, "Cleanup job failed");
        if job.transition(JobStatus::Failed).is_err() {
            return;
        }
        job.error = Some(error.to_string());
        job.push_log(format!("Job failed: {error}"), self.config.max_log_entries);
        if let Err(e) = self.save_job(job).await {
            warn!(job_id = %job.id, error = %e, "Failed to persist failed job");
            return;
        }
        self.drop_mapping_pin(job.id).await;
    }

    /// A finished job never reads its pinned mapping again.
    async fn drop_mapping_pin(&self, job_id: Uuid) {
        if let Err(e) = self.kv.delete(&keys::job_mapping(job_id)).await {
            warn!(job_id = %job_id, error = %e, "Failed to delete pinned mapping");
        }
    }

    pub async fn get_job_progress(&self, job_id: Uuid) -> Result<JobProgress> {
        Ok(self.load_job(job_id).await?.progress())
    }

    pub async fn get_job_details(&self, job_id: Uuid) -> Result<Job> {
        self.load_job(job_id).await
    }

    /// The `limit` most recently started jobs, newest first.
    pub async fn get_recent_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = kv::list_json(self.kv.as_ref(), keys::JOB_PREFIX)
            .await?
            .into_iter()
            .map(|(_, job)| job)
            .collect();

        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Add a timestamped entry to a job's log.
    pub async fn append_log(&self, job_id: Uuid, message: &str) -> Result<()> {
        let mut job = self.load_job(job_id).await?;
        job.push_log(message, self.config.max_log_entries);
        self.save_job(&job).await
    }

    pub(crate) async fn load_job(&self, job_id: Uuid) -> Result<Job> {
        kv::get_json(self.kv.as_ref(), &keys::job(job_id))
            .await?
            .ok_or(CleanupError::JobNotFound { job_id })
    }

    pub(crate) async fn save_job(&self, job: &Job) -> Result<()> {
        kv::set_json(self.kv.as_ref(), &keys::job(job.id), job, None).await
    }

    /// Set at start; older records without one use the configured default.
    fn batch_size(&self, job: &Job) -> usize {
        job.options.batch_size.unwrap_or(self.config.default_batch_size)
    }

    fn validate_options(&self, mut options: JobOptions) -> Result<JobOptions> {
        let batch_size = options.batch_size.unwrap_or(self.config.default_batch_size);
        if batch_size == 0 {
            return Err(CleanupError::InvalidOptions {
                reason: "batch_size must be greater than zero".to_string(),
            });
        }
        options.batch_size = Some(batch_size);
        if options.content_types.is_empty() {
            options.content_types = self.config.default_content_types.clone();
        }
        if options.content_types.is_empty() {
            return Err(CleanupError::InvalidOptions {
                reason: "no content types selected".to_string(),
            });
        }
        options.content_types.sort();
        options.content_types.dedup();
        Ok(options)
    }

    async fn acquire_live_lock(&self, job_id: Uuid) -> Result<()> {
        let value = job_id.to_string();
        if self
            .kv
            .set_if_absent(keys::LIVE_LOCK, value.clone(), None)
            .await?
        {
            debug!(job_id = %job_id, "Acquired live job lock");
            return Ok(());
        }

        let holder = match self.kv.get(keys::LIVE_LOCK).await? {
            Some(raw) => raw.parse::<Uuid>().ok(),
            // released between the two calls
            None => None,
        };

        if let Some(holder) = holder {
            if holder == job_id {
                return Ok(());
            }
            let running = match self.load_job(holder).await {
                Ok(job) => job.status == JobStatus::Running,
                Err(CleanupError::JobNotFound { .. }) => false,
                Err(e) => return Err(e),
            };
            if running {
                return Err(CleanupError::LiveJobActive { holder });
            }
            warn!(job_id = %job_id, stale_holder = %holder, "Replacing stale live job lock");
        }

        // Stale or unreadable: take it over, then re-check ownership.
        self.kv.delete(keys::LIVE_LOCK).await?;
        if self.kv.set_if_absent(keys::LIVE_LOCK, value, None).await? {
            return Ok(());
        }
        match self.kv.get(keys::LIVE_LOCK).await?.and_then(|raw| raw.parse::<Uuid>().ok()) {
            Some(holder) if holder != job_id => Err(CleanupError::LiveJobActive { holder }),
            _ => Ok(()),
        }
    }

    async fn release_live_lock(&self, job_id: Uuid) -> Result<()> {
        let held_by_us = self
            .kv
            .get(keys::LIVE_LOCK)
            .await?
            .is_some_and(|raw| raw == job_id.to_string());
        if held_by_us {
            self.kv.delete(keys::LIVE_LOCK).await?;
            debug!(job_id = %job_id, "Released live job lock");
        }
        Ok(())
    }
}
