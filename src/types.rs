//! Value types shared by the monitor, scheduler, and collaborators.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use url::Url;

// ============================================================================
// Feed Identity
// ============================================================================

/// Stable key of a watched feed.
///
/// Scopes per-feed monitor state and names the feed's output log
/// (`section_au_category_80`, `section_zv`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId(Arc<str>);

impl FeedId {
    /// Id for a whole section, or for one category inside it.
    pub fn new(section: &str, category: Option<u32>) -> Self {
        match category {
            Some(cat) => Self(format!("section_{section}_category_{cat}").into()),
            None => Self(format!("section_{section}").into()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved feed from the configuration catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSpec {
    pub id: FeedId,
    pub url: Url,
    /// Human-readable category name, if the feed covers a single category.
    pub label: Option<String>,
}

// ============================================================================
// Entries
// ============================================================================

/// One published listing. Ordered by `published`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub title: String,
    pub summary: String,
    pub link: String,
    pub published: DateTime<Utc>,
    pub category: Option<String>,
}
