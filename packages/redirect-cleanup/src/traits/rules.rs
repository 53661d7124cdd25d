use async_trait::async_trait;

use crate::error::Result;
use crate::types::rule::RedirectRule;

/// Read-only source of redirect rules.
#[async_trait]
pub trait RedirectRuleSource: Send + Sync {
    /// Load every rule, active or not, in the store's natural order.
    async fn load_rules(&self) -> Result<Vec<RedirectRule>>;
}
