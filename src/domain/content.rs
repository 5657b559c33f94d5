//! Content items as the purge computation sees them.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::types::ContentStatus;

/// Content type whose items are ordered by publish date.
pub const DATED_CONTENT_TYPE: &str = "post";

pub const CATEGORY_TAXONOMY: &str = "category";
pub const TAG_TAXONOMY: &str = "post_tag";

/// A taxonomy term attached to a content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRef {
    pub taxonomy: String,
    pub term_id: u64,
    pub slug: String,
}

/// Everything the platform knows about one content item that matters for
/// invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: u64,
    pub status: ContentStatus,
    /// Platform content type, e.g. `post`, `page` or a custom type.
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Canonical address, relative to the site root.
    pub permalink: String,
    pub author_id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
    #[serde(default)]
    pub terms: Vec<TermRef>,
    /// Next older item of the same dated type.
    #[serde(default)]
    pub previous_id: Option<u64>,
    /// Next newer item of the same dated type.
    #[serde(default)]
    pub next_id: Option<u64>,
    /// Whether the content type's archive resolves to a page.
    #[serde(default)]
    pub has_type_archive: bool,
}

fn default_content_type() -> String {
    DATED_CONTENT_TYPE.to_string()
}

impl ContentRecord {
    pub fn is_dated(&self) -> bool {
        self.content_type == DATED_CONTENT_TYPE
    }

    pub fn term_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.terms.iter().map(|term| term.term_id)
    }
}
