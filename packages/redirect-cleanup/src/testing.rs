//! Test fixtures.
//!
//! Ready-made engines over in-memory stores, for tests of this crate and of
//! applications built on it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::engine::CleanupEngine;
use crate::error::{CleanupError, Result};
use crate::stores::{MemoryContentStore, MemoryKvStore, MemoryRuleSource};
use crate::traits::content::ContentStore;
use crate::types::content::{ContentId, ContentItem, ContentType};
use crate::types::rule::RedirectRule;

/// Site host used by the fixture content.
pub const SITE_HOST: &str = "example.com";

/// An engine with handles to its stores.
pub struct TestScenario {
    pub engine: CleanupEngine,
    pub rules: Arc<MemoryRuleSource>,
    pub content: Arc<MemoryContentStore>,
    pub kv: Arc<MemoryKvStore>,
}

impl TestScenario {
    pub fn new(rules: Vec<RedirectRule>, items: Vec<ContentItem>, config: EngineConfig) -> Self {
        let rules = Arc::new(MemoryRuleSource::new(rules));
        let content = Arc::new(MemoryContentStore::with_items(items));
        let kv = Arc::new(MemoryKvStore::new());
        let engine = CleanupEngine::new(rules.clone(), content.clone(), kv.clone(), config);
        Self {
            engine,
            rules,
            content,
            kv,
        }
    }

    /// `/old-page -> /new-page -> /final-page` with content referencing
    /// both hops, already analyzed.
    pub async fn chain() -> Self {
        let scenario = Self::new(chain_rules(), chain_content(), default_config());
        scenario
            .engine
            .analyze_redirections()
            .await
            .expect("fixture analysis");
        scenario
    }

    /// Current value of every item.
    pub fn content_snapshot(&self) -> Vec<ContentItem> {
        self.content.snapshot()
    }
}

pub fn default_config() -> EngineConfig {
    EngineConfig::default().with_site_hosts([SITE_HOST])
}

pub fn chain_rules() -> Vec<RedirectRule> {
    vec![
        RedirectRule::new("/old-page", "/new-page").with_id("1"),
        RedirectRule::new("/new-page", "/final-page").with_id("2"),
    ]
}

pub fn chain_content() -> Vec<ContentItem> {
    vec![
        ContentItem::new(
            ContentId::post("1"),
            r#"<p>Read <a href="/old-page">this</a> and <a href="https://example.com/new-page/">that</a>.</p>"#,
        ),
        ContentItem::new(ContentId::post("2"), "<p>Nothing to see at /old-page-archive</p>"),
        ContentItem::new(ContentId::meta("1:cta_link"), "/old-page"),
        ContentItem::new(ContentId::option("footer_html"), r#"<a href="/new-page">Next</a>"#),
    ]
}

/// Content store wrapper that fails listing a content type after a number
/// of successful calls.
pub struct FailingContentStore {
    inner: Arc<MemoryContentStore>,
    content_type: ContentType,
    remaining: AtomicUsize,
}

impl FailingContentStore {
    /// Fail every `list_items` for `content_type` after `successes` calls.
    pub fn new(inner: Arc<MemoryContentStore>, content_type: ContentType, successes: usize) -> Self {
        Self {
            inner,
            content_type,
            remaining: AtomicUsize::new(successes),
        }
    }
}

#[async_trait]
impl ContentStore for FailingContentStore {
    async fn list_items(
        &self,
        content_type: ContentType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        if content_type == self.content_type {
            let allowed = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if !allowed {
                return Err(CleanupError::content(format!("{content_type} listing unavailable")));
            }
        }
        self.inner.list_items(content_type, offset, limit).await
    }

    async fn get_item(&self, id: &ContentId) -> Result<Option<ContentItem>> {
        self.inner.get_item(id).await
    }

    async fn persist_item(&self, id: &ContentId, value: &str) -> Result<()> {
        self.inner.persist_item(id, value).await
    }
}
