//! Resolved source -> destination URL mapping.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Chain-collapsed mapping in rule order.
///
/// Keys are normalized URLs; no value is itself a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedMapping {
    entries: IndexMap<String, String>,
}

impl ResolvedMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<String>, destination: impl Into<String>) {
        self.entries.insert(source.into(), destination.into());
    }

    pub fn get(&self, source: &str) -> Option<&str> {
        self.entries.get(source).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries `[start, start + limit)` in mapping order.
    pub fn window(&self, start: usize, limit: usize) -> ResolvedMapping {
        self.entries
            .iter()
            .skip(start)
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// True when no destination is also a source.
    pub fn is_fully_resolved(&self) -> bool {
        self.entries.values().all(|dest| !self.entries.contains_key(dest))
    }
}

impl FromIterator<(String, String)> for ResolvedMapping {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResolvedMapping {
        ["/a", "/b", "/c", "/d"]
            .iter()
            .map(|s| (s.to_string(), format!("{s}-new")))
            .collect()
    }

    #[test]
    fn window_keeps_order_and_clamps() {
        let mapping = sample();

        let window = mapping.window(1, 2);
        let keys: Vec<_> = window.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["/b", "/c"]);

        assert_eq!(mapping.window(3, 10).len(), 1);
        assert!(mapping.window(10, 10).is_empty());
    }

    #[test]
    fn detects_residual_hops() {
        let mut mapping = sample();
        assert!(mapping.is_fully_resolved());

        mapping.insert("/e", "/a");
        assert!(!mapping.is_fully_resolved());
    }

    #[test]
    fn serializes_as_plain_object_in_order() {
        let json = serde_json::to_string(&sample().window(0, 2)).unwrap();
        assert_eq!(json, r#"{"/a":"/a-new","/b":"/b-new"}"#);
    }
}
