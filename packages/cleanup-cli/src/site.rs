//! JSON site file: the rule table plus every content item.
//!
//! ```json
//! {
//!   "rules": [{ "patterns": [{ "value": "/old" }], "destination": "/new" }],
//!   "posts": { "12": "<p>...</p>" },
//!   "meta": { "12:cta_link": "/old" },
//!   "options": { "footer_html": "..." }
//! }
//! ```
//!
//! Writes go back to the same file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use redirect_cleanup::{
    CleanupError, ContentId, ContentItem, ContentStore, ContentType, RedirectRule,
    RedirectRuleSource,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteFile {
    #[serde(default)]
    pub rules: Vec<RedirectRule>,
    #[serde(default)]
    pub posts: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl SiteFile {
    fn section(&self, content_type: ContentType) -> &BTreeMap<String, String> {
        match content_type {
            ContentType::Posts => &self.posts,
            ContentType::Meta => &self.meta,
            ContentType::Options => &self.options,
        }
    }

    fn section_mut(&mut self, content_type: ContentType) -> &mut BTreeMap<String, String> {
        match content_type {
            ContentType::Posts => &mut self.posts,
            ContentType::Meta => &mut self.meta,
            ContentType::Options => &mut self.options,
        }
    }
}

pub struct SiteStore {
    path: PathBuf,
    site: Mutex<SiteFile>,
}

impl SiteStore {
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read site file {}", path.display()))?;
        let site: SiteFile = serde_json::from_slice(&raw)
            .with_context(|| format!("Invalid site file {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            rules = site.rules.len(),
            posts = site.posts.len(),
            meta = site.meta.len(),
            options = site.options.len(),
            "Loaded site file"
        );

        Ok(Self {
            path,
            site: Mutex::new(site),
        })
    }

    async fn flush(&self, site: &SiteFile) -> redirect_cleanup::Result<()> {
        let bytes = serde_json::to_vec_pretty(site)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(CleanupError::content)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(CleanupError::content)
    }
}

#[async_trait]
impl RedirectRuleSource for SiteStore {
    async fn load_rules(&self) -> redirect_cleanup::Result<Vec<RedirectRule>> {
        Ok(self.site.lock().await.rules.clone())
    }
}

#[async_trait]
impl ContentStore for SiteStore {
    async fn list_items(
        &self,
        content_type: ContentType,
        offset: usize,
        limit: usize,
    ) -> redirect_cleanup::Result<Vec<ContentItem>> {
        let site = self.site.lock().await;
        Ok(site
            .section(content_type)
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(key, value)| ContentItem::new(ContentId::new(content_type, key.clone()), value.clone()))
            .collect())
    }

    async fn get_item(&self, id: &ContentId) -> redirect_cleanup::Result<Option<ContentItem>> {
        let site = self.site.lock().await;
        Ok(site
            .section(id.content_type)
            .get(&id.key)
            .map(|value| ContentItem::new(id.clone(), value.clone())))
    }

    async fn persist_item(&self, id: &ContentId, value: &str) -> redirect_cleanup::Result<()> {
        let mut site = self.site.lock().await;
        let previous = match site.section_mut(id.content_type).get_mut(&id.key) {
            Some(existing) => std::mem::replace(existing, value.to_string()),
            None => return Err(CleanupError::content(format!("no content item {id}"))),
        };

        if let Err(e) = self.flush(&site).await {
            site.section_mut(id.content_type).insert(id.key.clone(), previous);
            return Err(e);
        }
        Ok(())
    }
}
