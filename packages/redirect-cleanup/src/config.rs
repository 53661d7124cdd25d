//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::content::ContentType;

/// Tunables shared by every engine component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a cached analysis stays fresh.
    ///
    /// Default: 5 minutes.
    pub analysis_cache_ttl: Duration,

    /// Hops followed before a chain is declared unresolved.
    ///
    /// Default: 10.
    pub max_redirect_hops: usize,

    /// Mapping entries per batch when a job does not say.
    pub default_batch_size: usize,

    /// Content types scanned when a job does not list any.
    pub default_content_types: Vec<ContentType>,

    /// Items fetched per content-store page while scanning.
    pub scan_page_size: usize,

    /// How long backups are kept for rollback.
    ///
    /// Default: 30 days.
    pub backup_retention: Duration,

    /// Hosts whose absolute URLs are treated as site-relative paths.
    ///
    /// Compared case-insensitively, without port. Empty means every
    /// absolute URL is kept as-is.
    #[serde(default)]
    pub site_hosts: Vec<String>,

    /// Allow only one live job to mutate content at a time.
    pub exclusive_live_jobs: bool,

    /// Run the malformed-URL repair on every rewritten item.
    pub repair_malformed_urls: bool,

    /// Log entries kept per job (oldest dropped).
    pub max_log_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis_cache_ttl: Duration::from_secs(5 * 60),
            max_redirect_hops: 10,
            default_batch_size: 10,
            default_content_types: ContentType::ALL.to_vec(),
            scan_page_size: 100,
            backup_retention: Duration::from_secs(30 * 24 * 60 * 60),
            site_hosts: Vec::new(),
            exclusive_live_jobs: true,
            repair_malformed_urls: true,
            max_log_entries: 500,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.analysis_cache_ttl = ttl;
        self
    }

    pub fn with_max_hops(mut self, hops: usize) -> Self {
        self.max_redirect_hops = hops;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size;
        self
    }

    pub fn with_content_types(mut self, types: impl IntoIterator<Item = ContentType>) -> Self {
        self.default_content_types = types.into_iter().collect();
        self
    }

    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size;
        self
    }

    pub fn with_backup_retention(mut self, retention: Duration) -> Self {
        self.backup_retention = retention;
        self
    }

    /// Add hosts that belong to this site.
    pub fn with_site_hosts(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.site_hosts = hosts
            .into_iter()
            .map(|h| h.into().trim().to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        self
    }

    pub fn with_exclusive_live_jobs(mut self, exclusive: bool) -> Self {
        self.exclusive_live_jobs = exclusive;
        self
    }

    pub fn with_repair(mut self, repair: bool) -> Self {
        self.repair_malformed_urls = repair;
        self
    }

    pub fn with_max_log_entries(mut self, max: usize) -> Self {
        self.max_log_entries = max;
        self
    }

    pub(crate) fn cache_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.analysis_cache_ttl).unwrap_or(chrono::Duration::MAX)
    }

    pub(crate) fn retention_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.backup_retention).unwrap_or(chrono::Duration::MAX)
    }
}
