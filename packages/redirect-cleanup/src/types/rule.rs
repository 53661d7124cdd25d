//! Redirect rules as supplied by the external rule store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    #[default]
    Active,
    Inactive,
}

/// How a pattern is compared against a request URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    #[default]
    Exact,
    Regex,
    Contains,
}

/// One source pattern of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPattern {
    pub value: String,
    #[serde(default)]
    pub comparison: ComparisonKind,
}

impl UrlPattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            comparison: ComparisonKind::Exact,
        }
    }

    pub fn regex(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            comparison: ComparisonKind::Regex,
        }
    }

    pub fn contains(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            comparison: ComparisonKind::Contains,
        }
    }

    /// Only exact patterns name a concrete URL that can be substituted.
    pub fn is_literal(&self) -> bool {
        self.comparison == ComparisonKind::Exact
    }
}

/// A redirect rule. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectRule {
    #[serde(default)]
    pub id: Option<String>,
    pub patterns: Vec<UrlPattern>,
    pub destination: String,
    #[serde(default = "default_header_code")]
    pub header_code: u16,
    #[serde(default)]
    pub hits: u64,
    #[serde(default)]
    pub status: RuleStatus,
}

fn default_header_code() -> u16 {
    301
}

impl RedirectRule {
    /// Active permanent redirect from one exact source.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            id: None,
            patterns: vec![UrlPattern::exact(source)],
            destination: destination.into(),
            header_code: default_header_code(),
            hits: 0,
            status: RuleStatus::Active,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_pattern(mut self, pattern: UrlPattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn with_header_code(mut self, code: u16) -> Self {
        self.header_code = code;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.status = RuleStatus::Inactive;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    /// 3xx codes send the client elsewhere; 404/410 style rules have no target.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.header_code) && !self.destination.trim().is_empty()
    }
}
