//! Entry point wiring the analyzer, coordinator, batch processor and rollback.

use std::sync::Arc;

use uuid::Uuid;

use crate::analyzer::RedirectAnalyzer;
use crate::backup::BackupManager;
use crate::batch::BatchProcessor;
use crate::config::EngineConfig;
use crate::coordinator::JobCoordinator;
use crate::error::Result;
use crate::rewriter;
use crate::rollback::{RollbackEngine, RollbackOutcome};
use crate::traits::content::ContentStore;
use crate::traits::kv::KvStore;
use crate::traits::rules::RedirectRuleSource;
use crate::types::analysis::AnalysisResult;
use crate::types::job::{BatchResult, Job, JobOptions, JobProgress};

/// The redirect cleanup engine.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use redirect_cleanup::{CleanupEngine, EngineConfig, JobOptions};
/// use redirect_cleanup::stores::{MemoryContentStore, MemoryKvStore, MemoryRuleSource};
///
/// let engine = CleanupEngine::new(
///     Arc::new(MemoryRuleSource::new(rules)),
///     Arc::new(MemoryContentStore::new()),
///     Arc::new(MemoryKvStore::new()),
///     EngineConfig::default().with_site_hosts(["example.com"]),
/// );
///
/// engine.analyze_redirections().await?;
/// let job = engine.run_cleanup(JobOptions::live()).await?;
/// ```
pub struct CleanupEngine {
    config: Arc<EngineConfig>,
    analyzer: Arc<RedirectAnalyzer>,
    batches: Arc<BatchProcessor>,
    backups: Arc<BackupManager>,
    jobs: Arc<JobCoordinator>,
    rollback: RollbackEngine,
}

impl CleanupEngine {
    pub fn new(
        rules: Arc<dyn RedirectRuleSource>,
        content: Arc<dyn ContentStore>,
        kv: Arc<dyn KvStore>,
        config: EngineConfig,
    ) -> Self {
        let config = Arc::new(config);
        let analyzer = Arc::new(RedirectAnalyzer::new(
            rules,
            content.clone(),
            kv.clone(),
            config.clone(),
        ));
        let backups = Arc::new(BackupManager::new(kv.clone(), config.clone()));
        let batches = Arc::new(BatchProcessor::new(
            content.clone(),
            kv.clone(),
            backups.clone(),
            config.clone(),
        ));
        let jobs = Arc::new(JobCoordinator::new(
            kv,
            analyzer.clone(),
            batches.clone(),
            config.clone(),
        ));
        let rollback = RollbackEngine::new(content, backups.clone(), jobs.clone(), config.clone());

        Self {
            config,
            analyzer,
            batches,
            backups,
            jobs,
            rollback,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // Analysis

    pub async fn analyze_redirections(&self) -> Result<AnalysisResult> {
        self.analyzer.analyze_redirections().await
    }

    pub async fn get_analysis_data(&self) -> Result<AnalysisResult> {
        self.analyzer.get_analysis_data().await
    }

    pub async fn invalidate_cache(&self) -> Result<()> {
        self.analyzer.invalidate_cache().await
    }

    // Jobs

    pub async fn start_cleanup_process(&self, options: JobOptions) -> Result<Uuid> {
        self.jobs.start_cleanup_process(options).await
    }

    pub async fn process_cleanup_job(&self, job_id: Uuid) -> Result<Job> {
        self.jobs.process_cleanup_job(job_id).await
    }

    /// Start a job and run it to the end.
    pub async fn run_cleanup(&self, options: JobOptions) -> Result<Job> {
        let job_id = self.start_cleanup_process(options).await?;
        self.process_cleanup_job(job_id).await
    }

    pub async fn process_batch(
        &self,
        job_id: Uuid,
        batch_start: usize,
        batch_limit: usize,
    ) -> Result<BatchResult> {
        self.batches.process_batch(job_id, batch_start, batch_limit).await
    }

    pub async fn get_job_progress(&self, job_id: Uuid) -> Result<JobProgress> {
        self.jobs.get_job_progress(job_id).await
    }

    pub async fn get_job_details(&self, job_id: Uuid) -> Result<Job> {
        self.jobs.get_job_details(job_id).await
    }

    pub async fn get_recent_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.jobs.get_recent_jobs(limit).await
    }

    pub async fn append_log(&self, job_id: Uuid, message: &str) -> Result<()> {
        self.jobs.append_log(job_id, message).await
    }

    // Backups

    pub async fn rollback_changes(&self, job_id: Uuid) -> Result<RollbackOutcome> {
        self.rollback.rollback_changes(job_id).await
    }

    pub async fn purge_expired_backups(&self) -> Result<usize> {
        self.backups.purge_expired().await
    }

    // Repair

    pub fn fix_malformed_urls(&self, content: &str) -> (String, usize) {
        rewriter::fix_malformed_urls(content)
    }
}
