use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON file holding jobs, backups and the analysis cache
    pub state_path: PathBuf,
    /// JSON site file with redirect rules and content
    pub site_path: Option<PathBuf>,
    /// Hosts whose absolute URLs count as site-relative
    pub site_hosts: Vec<String>,
    pub batch_size: Option<usize>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            state_path: env::var("REDIRECT_CLEANUP_STATE")
                .unwrap_or_else(|_| ".redirect-cleanup/state.json".to_string())
                .into(),
            site_path: env::var("REDIRECT_CLEANUP_SITE").ok().map(PathBuf::from),
            site_hosts: env::var("REDIRECT_CLEANUP_HOSTS")
                .map(|hosts| parse_hosts(&hosts))
                .unwrap_or_default(),
            batch_size: env::var("REDIRECT_CLEANUP_BATCH_SIZE")
                .ok()
                .map(|size| size.parse())
                .transpose()
                .context("REDIRECT_CLEANUP_BATCH_SIZE must be a valid number")?,
        })
    }
}

/// Split a comma-separated host list.
pub fn parse_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect()
}
