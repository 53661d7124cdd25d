//! Redirect cleanup engine
//!
//! Analyzes a table of URL redirect rules, collapses multi-hop chains into a
//! canonical `source -> destination` mapping, and rewrites every occurrence
//! of superseded URLs across site content in bounded, resumable batches.
//!
//! Jobs can run as a preview (dry run) or live. Live jobs back up every item
//! before its first write and can be rolled back as a whole.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use redirect_cleanup::{CleanupEngine, EngineConfig, JobOptions, RedirectRule};
//! use redirect_cleanup::stores::{MemoryContentStore, MemoryKvStore, MemoryRuleSource};
//!
//! let rules = MemoryRuleSource::new(vec![
//!     RedirectRule::new("/old-page", "/new-page"),
//!     RedirectRule::new("/new-page", "/final-page"),
//! ]);
//! let engine = CleanupEngine::new(
//!     Arc::new(rules),
//!     Arc::new(MemoryContentStore::new()),
//!     Arc::new(MemoryKvStore::new()),
//!     EngineConfig::default(),
//! );
//!
//! let analysis = engine.analyze_redirections().await?;
//! let preview = engine.run_cleanup(JobOptions::dry_run()).await?;
//! let job = engine.run_cleanup(JobOptions::live()).await?;
//! engine.rollback_changes(job.id).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - rule source, content store and key-value store seams
//! - [`types`] - rules, mappings, analysis, jobs, content and backups
//! - [`stores`] - in-memory, JSON-file and PostgreSQL backends
//! - [`testing`] - fixtures over in-memory stores

pub mod analyzer;
pub mod backup;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod keys;
pub mod normalize;
pub mod rewriter;
pub mod rollback;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub use analyzer::{resolve_chains, ChainResolution, RedirectAnalyzer};
pub use backup::BackupManager;
pub use batch::BatchProcessor;
pub use config::EngineConfig;
pub use coordinator::JobCoordinator;
pub use engine::CleanupEngine;
pub use error::{CleanupError, Result, RollbackError};
pub use normalize::normalize_url;
pub use rewriter::{fix_malformed_urls, ContentRewriter, PreparedMapping};
pub use rollback::{RollbackEngine, RollbackOutcome};
pub use traits::{content::ContentStore, kv::KvStore, rules::RedirectRuleSource};
pub use types::{
    analysis::{AnalysisResult, ContentAnalysis, ContentTypeAnalysis, UnresolvedReason, UnresolvedRedirect},
    backup::BackupSnapshot,
    content::{ContentId, ContentItem, ContentType},
    job::{BatchResult, Job, JobOptions, JobProgress, JobResults, JobStatus},
    mapping::ResolvedMapping,
    rule::{ComparisonKind, RedirectRule, RuleStatus, UrlPattern},
};

pub use stores::{FileKvStore, MemoryContentStore, MemoryKvStore, MemoryRuleSource};

#[cfg(feature = "postgres")]
pub use stores::PostgresKvStore;
