//! Content items scanned and rewritten by the batch processor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The content sources a job can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Document bodies
    Posts,
    /// Per-document metadata values
    Meta,
    /// Site configuration values
    Options,
}

impl ContentType {
    pub const ALL: [ContentType; 3] = [ContentType::Posts, ContentType::Meta, ContentType::Options];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Posts => "posts",
            ContentType::Meta => "meta",
            ContentType::Options => "options",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "posts" | "post" => Ok(ContentType::Posts),
            "meta" | "postmeta" => Ok(ContentType::Meta),
            "options" | "option" => Ok(ContentType::Options),
            other => Err(format!("unknown content type: {other}")),
        }
    }
}

/// Identity of one content item: its source plus a store-specific key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId {
    pub content_type: ContentType,
    pub key: String,
}

impl ContentId {
    pub fn new(content_type: ContentType, key: impl Into<String>) -> Self {
        Self {
            content_type,
            key: key.into(),
        }
    }

    pub fn post(key: impl Into<String>) -> Self {
        Self::new(ContentType::Posts, key)
    }

    pub fn meta(key: impl Into<String>) -> Self {
        Self::new(ContentType::Meta, key)
    }

    pub fn option(key: impl Into<String>) -> Self {
        Self::new(ContentType::Options, key)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_type, self.key)
    }
}

/// A content item as read from the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub value: String,
}

impl ContentItem {
    pub fn new(id: ContentId, value: impl Into<String>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}
