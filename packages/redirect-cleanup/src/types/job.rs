//! Cleanup job model and its state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::content::ContentType;
use crate::error::{CleanupError, Result};

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    RolledBack,
}

impl JobStatus {
    /// Forward-only edges plus the one `Completed -> RolledBack` edge.
    ///
    /// `Running -> Running` is the resume of an interrupted job.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Completed, RolledBack)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Options & results
// ============================================================================

/// Options a caller supplies when starting a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobOptions {
    /// Empty means the engine's configured default content types
    #[builder(default)]
    pub content_types: Vec<ContentType>,
    /// Mapping entries per batch; `None` means the engine's configured default
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[builder(default = false)]
    pub dry_run: bool,
    #[builder(default = true)]
    pub create_backup: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl JobOptions {
    /// Preview run: counts replacements, writes nothing.
    pub fn dry_run() -> Self {
        Self::builder().dry_run(true).create_backup(false).build()
    }

    /// Live run with backups.
    pub fn live() -> Self {
        Self::builder().build()
    }
}

/// Counters for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_start: usize,
    pub batch_end: usize,
    pub posts_updated: usize,
    pub meta_updated: usize,
    pub options_updated: usize,
    pub urls_replaced: usize,
    pub failed_items: usize,
    pub backups_created: usize,
    pub total_mappings: usize,
    pub is_complete: bool,
}

impl BatchResult {
    pub fn empty(batch_start: usize, total_mappings: usize) -> Self {
        let batch_end = batch_start.min(total_mappings);
        Self {
            batch_start,
            batch_end,
            posts_updated: 0,
            meta_updated: 0,
            options_updated: 0,
            urls_replaced: 0,
            failed_items: 0,
            backups_created: 0,
            total_mappings,
            is_complete: batch_end >= total_mappings,
        }
    }

    pub fn items_updated(&self) -> usize {
        self.posts_updated + self.meta_updated + self.options_updated
    }

    pub(crate) fn record_update(&mut self, content_type: ContentType, replaced: usize) {
        match content_type {
            ContentType::Posts => self.posts_updated += 1,
            ContentType::Meta => self.meta_updated += 1,
            ContentType::Options => self.options_updated += 1,
        }
        self.urls_replaced += replaced;
    }
}

/// Totals accumulated across a job's batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResults {
    pub posts_updated: usize,
    pub meta_updated: usize,
    pub options_updated: usize,
    pub urls_replaced: usize,
    #[serde(default)]
    pub failed_items: usize,
    #[serde(default)]
    pub backups_created: usize,
}

impl JobResults {
    pub fn absorb(&mut self, batch: &BatchResult) {
        self.posts_updated += batch.posts_updated;
        self.meta_updated += batch.meta_updated;
        self.options_updated += batch.options_updated;
        self.urls_replaced += batch.urls_replaced;
        self.failed_items += batch.failed_items;
        self.backups_created += batch.backups_created;
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub options: JobOptions,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Start of the next batch to run
    #[serde(default)]
    pub next_offset: usize,
    pub total_mappings: usize,
    #[serde(default)]
    pub results: JobResults,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl Job {
    pub fn new(options: JobOptions, total_mappings: usize) -> Self {
        Self {
            id: Uuid::now_v7(),
            status: JobStatus::Pending,
            options,
            started_at: Utc::now(),
            finished_at: None,
            next_offset: 0,
            total_mappings,
            results: JobResults::default(),
            error: None,
            logs: Vec::new(),
        }
    }

    /// Move to `next` or fail with `InvalidTransition`.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CleanupError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if matches!(next, JobStatus::Completed | JobStatus::Failed) {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Append a timestamped entry, dropping the oldest past `cap`.
    pub fn push_log(&mut self, message: impl fmt::Display, cap: usize) {
        self.logs
            .push(format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), message));
        if self.logs.len() > cap {
            let excess = self.logs.len() - cap;
            self.logs.drain(..excess);
        }
    }

    pub fn is_live(&self) -> bool {
        !self.options.dry_run
    }

    pub fn progress(&self) -> JobProgress {
        let processed = self.next_offset.min(self.total_mappings);
        let percent_complete = if self.total_mappings == 0 {
            if matches!(self.status, JobStatus::Pending) { 0.0 } else { 100.0 }
        } else {
            processed as f64 * 100.0 / self.total_mappings as f64
        };

        JobProgress {
            job_id: self.id,
            status: self.status,
            processed_mappings: processed,
            total_mappings: self.total_mappings,
            percent_complete,
            results: self.results,
        }
    }
}

/// Read-only progress view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub processed_mappings: usize,
    pub total_mappings: usize,
    pub percent_complete: f64,
    pub results: JobResults,
}
