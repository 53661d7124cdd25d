//! Content repository abstraction.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::content::{ContentId, ContentItem, ContentType};

/// Documents, metadata and site configuration the engine scans and rewrites.
///
/// `persist_item` must be all-or-nothing for a single item.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// One page of items of a type, in a stable order.
    async fn list_items(
        &self,
        content_type: ContentType,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ContentItem>>;

    /// Fetch a single item.
    async fn get_item(&self, id: &ContentId) -> Result<Option<ContentItem>>;

    /// Replace an item's value.
    async fn persist_item(&self, id: &ContentId, value: &str) -> Result<()>;

    /// Walk every item of a type, `page_size` at a time.
    async fn all_items(&self, content_type: ContentType, page_size: usize) -> Result<Vec<ContentItem>> {
        let page_size = page_size.max(1);
        let mut items = Vec::new();
        let mut offset = 0;
        loop {
            let page = self.list_items(content_type, offset, page_size).await?;
            let fetched = page.len();
            items.extend(page);
            if fetched < page_size {
                break;
            }
            offset += fetched;
        }
        Ok(items)
    }
}
