//! Redirect rule analysis and chain collapse.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::keys;
use crate::normalize::normalize_url;
use crate::rewriter::{ContentRewriter, PreparedMapping};
use crate::traits::content::ContentStore;
use crate::traits::kv::{self, KvStore};
use crate::traits::rules::RedirectRuleSource;
use crate::types::analysis::{
    AnalysisResult, ContentAnalysis, ContentTypeAnalysis, UnresolvedReason, UnresolvedRedirect,
};
use crate::types::mapping::ResolvedMapping;
use crate::types::rule::RedirectRule;

/// Chain resolution output.
#[derive(Debug, Clone, Default)]
pub struct ChainResolution {
    pub mapping: ResolvedMapping,
    pub unresolved: Vec<UnresolvedRedirect>,
    pub chains_resolved: usize,
}

/// Collapse `source -> destination` edges so no destination is a source.
///
/// Entries that point at themselves, enter a cycle, or need more than
/// `max_hops` extra lookups are left out and reported.
pub fn resolve_chains(edges: &IndexMap<String, String>, max_hops: usize) -> ChainResolution {
    let mut resolution = ChainResolution::default();

    for (source, destination) in edges {
        if source == destination {
            resolution.unresolved.push(UnresolvedRedirect {
                source: source.clone(),
                destination: destination.clone(),
                reason: UnresolvedReason::SelfRedirect,
            });
            continue;
        }

        let mut seen: HashSet<&str> = HashSet::from([source.as_str()]);
        let mut current = destination.as_str();
        let mut hops = 0;

        let outcome = loop {
            let Some(next) = edges.get(current) else {
                break Ok(current);
            };
            if !seen.insert(current) {
                break Err(UnresolvedReason::Cycle);
            }
            hops += 1;
            if hops > max_hops {
                break Err(UnresolvedReason::HopLimit);
            }
            current = next.as_str();
        };

        match outcome {
            Ok(resolved) => {
                if hops > 0 {
                    resolution.chains_resolved += 1;
                }
                resolution.mapping.insert(source.clone(), resolved.to_string());
            }
            Err(reason) => resolution.unresolved.push(UnresolvedRedirect {
                source: source.clone(),
                destination: destination.clone(),
                reason,
            }),
        }
    }

    resolution
}

/// Loads rules, resolves chains and keeps the result cached.
pub struct RedirectAnalyzer {
    rules: Arc<dyn RedirectRuleSource>,
    content: Arc<dyn ContentStore>,
    kv: Arc<dyn KvStore>,
    config: Arc<EngineConfig>,
    rewriter: ContentRewriter,
}

impl RedirectAnalyzer {
    pub fn new(
        rules: Arc<dyn RedirectRuleSource>,
        content: Arc<dyn ContentStore>,
        kv: Arc<dyn KvStore>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let rewriter = ContentRewriter::new(config.site_hosts.clone());
        Self {
            rules,
            content,
            kv,
            config,
            rewriter,
        }
    }

    /// Recompute the analysis from the rule store and cache it.
    pub async fn analyze_redirections(&self) -> Result<AnalysisResult> {
        let rules = self.rules.load_rules().await?;
        let active: Vec<&RedirectRule> = rules
            .iter()
            .filter(|r| r.is_active() && r.is_redirect())
            .collect();

        let (edges, skipped_patterns) = self.build_edges(&active);
        let resolution = resolve_chains(&edges, self.config.max_redirect_hops);

        for entry in &resolution.unresolved {
            warn!(
                source = %entry.source,
                destination = %entry.destination,
                reason = ?entry.reason,
                "Dropping unresolved redirect"
            );
        }

        let content_analysis = self.analyze_content(&resolution.mapping).await?;

        let result = AnalysisResult {
            total_redirections: active.len(),
            url_mapping: resolution.mapping,
            content_analysis,
            redirect_chains_resolved: resolution.chains_resolved,
            unresolved: resolution.unresolved,
            skipped_patterns,
            computed_at: Utc::now(),
        };

        kv::set_json(
            self.kv.as_ref(),
            keys::ANALYSIS,
            &result,
            Some(self.config.analysis_cache_ttl),
        )
        .await?;

        info!(
            total_redirections = result.total_redirections,
            mappings = result.url_mapping.len(),
            chains_resolved = result.redirect_chains_resolved,
            unresolved = result.unresolved.len(),
            skipped_patterns = result.skipped_patterns,
            occurrences = result.total_occurrences(),
            "Redirect analysis completed"
        );

        Ok(result)
    }

    /// Cached analysis if still fresh, otherwise a new one.
    pub async fn get_analysis_data(&self) -> Result<AnalysisResult> {
        if let Some(cached) = self.cached_analysis().await? {
            debug!(computed_at = %cached.computed_at, "Using cached redirect analysis");
            return Ok(cached);
        }
        self.analyze_redirections().await
    }

    /// Cached analysis if still fresh. Never recomputes.
    pub async fn cached_analysis(&self) -> Result<Option<AnalysisResult>> {
        let cached: Option<AnalysisResult> = kv::get_json(self.kv.as_ref(), keys::ANALYSIS).await?;
        let ttl = self.config.cache_ttl_chrono();
        let now = Utc::now();
        Ok(cached.filter(|r| r.is_fresh(ttl, now)))
    }

    pub async fn invalidate_cache(&self) -> Result<()> {
        if self.kv.delete(keys::ANALYSIS).await? {
            info!("Invalidated cached redirect analysis");
        }
        Ok(())
    }

    fn build_edges(&self, rules: &[&RedirectRule]) -> (IndexMap<String, String>, usize) {
        let hosts = &self.config.site_hosts;
        let mut edges = IndexMap::new();
        let mut skipped = 0;

        for rule in rules {
            let destination = normalize_url(&rule.destination, hosts);
            if destination.is_empty() {
                continue;
            }

            for pattern in &rule.patterns {
                if !pattern.is_literal() {
                    skipped += 1;
                    continue;
                }
                let source = normalize_url(&pattern.value, hosts);
                if source.is_empty() {
                    continue;
                }
                if edges.contains_key(&source) {
                    debug!(source = %source, rule_id = ?rule.id, "Ignoring duplicate redirect source");
                    continue;
                }
                edges.insert(source, destination.clone());
            }
        }

        (edges, skipped)
    }

    async fn analyze_content(&self, mapping: &ResolvedMapping) -> Result<ContentAnalysis> {
        let mut analysis = ContentAnalysis::new();
        let prepared = PreparedMapping::new(mapping);

        for &content_type in &self.config.default_content_types {
            let items = self
                .content
                .all_items(content_type, self.config.scan_page_size)
                .await?;

            let mut stats = ContentTypeAnalysis {
                items_scanned: items.len(),
                ..Default::default()
            };
            if !prepared.is_empty() {
                for item in &items {
                    let occurrences = self.rewriter.count_prepared(&item.value, &prepared);
                    if occurrences > 0 {
                        stats.items_with_matches += 1;
                        stats.occurrences += occurrences;
                    }
                }
            }
            analysis.insert(content_type, stats);
        }

        Ok(analysis)
    }
}
