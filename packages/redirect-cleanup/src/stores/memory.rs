//! In-memory backends for tests and short-lived runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{CleanupError, Result};
use crate::traits::content::ContentStore;
use crate::traits::kv::KvStore;
use crate::traits::rules::RedirectRuleSource;
use crate::types::content::{ContentId, ContentItem, ContentType};
use crate::types::rule::RedirectRule;

// ============================================================================
// Key-value
// ============================================================================

struct Record {
    value: String,
    expires_at: Option<Instant>,
}

impl Record {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Key-value store held in a `BTreeMap`, honoring TTLs.
///
/// Data is lost on drop.
#[derive(Default)]
pub struct MemoryKvStore {
    records: RwLock<BTreeMap<String, Record>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|r| r.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .get(key)
            .filter(|r| r.is_live(now))
            .map(|r| r.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Record::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let removed = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(removed.is_some_and(|r| r.is_live(now)))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let now = Instant::now();
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, r)| r.is_live(now))
            .map(|(key, r)| (key.clone(), r.value.clone()))
            .collect())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<bool> {
        let now = Instant::now();
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.get(key).is_some_and(|r| r.is_live(now)) {
            return Ok(false);
        }
        records.insert(key.to_string(), Record::new(value, ttl));
        Ok(true)
    }
}

// ============================================================================
// Content
// ============================================================================

/// Content items ordered by `(content_type, key)`.
///
/// Keys listed with [`fail_writes_for`](Self::fail_writes_for) reject
/// `persist_item`, for exercising partial-failure paths.
#[derive(Default)]
pub struct MemoryContentStore {
    items: RwLock<BTreeMap<ContentId, String>>,
    failing: RwLock<HashSet<ContentId>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = ContentItem>) -> Self {
        let store = Self::new();
        for item in items {
            store.insert(item.id, item.value);
        }
        store
    }

    pub fn insert(&self, id: ContentId, value: impl Into<String>) {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, value.into());
    }

    pub fn remove(&self, id: &ContentId) -> Option<String> {
        self.items
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn value(&self, id: &ContentId) -> Option<String> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Every item, in store order.
    pub fn snapshot(&self) -> Vec<ContentItem> {
        self.items
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, value)| ContentItem::new(id.clone(), value.clone()))
            .collect()
    }

    pub fn fail_writes_for(&self, id: ContentId) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    pub fn clear_failures(&self) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn list_items(
        &self,
        content_type: ContentType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items
            .iter()
            .filter(|(id, _)| id.content_type == content_type)
            .skip(offset)
            .take(limit)
            .map(|(id, value)| ContentItem::new(id.clone(), value.clone()))
            .collect())
    }

    async fn get_item(&self, id: &ContentId) -> Result<Option<ContentItem>> {
        Ok(self
            .value(id)
            .map(|value| ContentItem::new(id.clone(), value)))
    }

    async fn persist_item(&self, id: &ContentId, value: &str) -> Result<()> {
        let failing = self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id);
        if failing {
            return Err(CleanupError::content(format!("write rejected for {id}")));
        }

        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        match items.get_mut(id) {
            Some(existing) => {
                *existing = value.to_string();
                Ok(())
            }
            None => Err(CleanupError::content(format!("no content item {id}"))),
        }
    }
}

// ============================================================================
// Rules
// ============================================================================

/// Fixed redirect rule table.
#[derive(Default)]
pub struct MemoryRuleSource {
    rules: RwLock<Vec<RedirectRule>>,
}

impl MemoryRuleSource {
    pub fn new(rules: Vec<RedirectRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn set_rules(&self, rules: Vec<RedirectRule>) {
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
    }

    pub fn push(&self, rule: RedirectRule) {
        self.rules
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(rule);
    }
}

#[async_trait]
impl RedirectRuleSource for MemoryRuleSource {
    async fn load_rules(&self) -> Result<Vec<RedirectRule>> {
        Ok(self
            .rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
