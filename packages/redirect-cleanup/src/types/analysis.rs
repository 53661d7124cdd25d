//! Output of a redirect analysis.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::content::ContentType;
use super::mapping::ResolvedMapping;

/// Occurrence counts for one content type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTypeAnalysis {
    pub items_scanned: usize,
    pub items_with_matches: usize,
    pub occurrences: usize,
}

pub type ContentAnalysis = BTreeMap<ContentType, ContentTypeAnalysis>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// Source and destination normalize to the same URL
    SelfRedirect,
    /// Following the chain revisits a URL
    Cycle,
    /// Chain is longer than the configured hop limit
    HopLimit,
}

/// A source that was left out of the mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedRedirect {
    pub source: String,
    pub destination: String,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Active redirect rules considered
    pub total_redirections: usize,
    pub url_mapping: ResolvedMapping,
    pub content_analysis: ContentAnalysis,
    /// Entries whose destination needed at least one extra hop
    pub redirect_chains_resolved: usize,
    #[serde(default)]
    pub unresolved: Vec<UnresolvedRedirect>,
    /// Regex/contains patterns that cannot be substituted literally
    #[serde(default)]
    pub skipped_patterns: usize,
    pub computed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn empty(computed_at: DateTime<Utc>) -> Self {
        Self {
            total_redirections: 0,
            url_mapping: ResolvedMapping::new(),
            content_analysis: ContentAnalysis::new(),
            redirect_chains_resolved: 0,
            unresolved: Vec::new(),
            skipped_patterns: 0,
            computed_at,
        }
    }

    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.computed_at < ttl
    }

    pub fn total_occurrences(&self) -> usize {
        self.content_analysis.values().map(|a| a.occurrences).sum()
    }
}
