//! Site directory lookups.
//!
//! The purge computation needs a handful of facts the request does not carry:
//! content records by id, term ids by slug and the tenant listing of a
//! multi-tenant deployment. Platform adapters implement [`SiteDirectory`];
//! [`StaticDirectory`] keeps everything in memory for scenarios and tests.

use serde::{Deserialize, Serialize};

use crate::domain::content::{CATEGORY_TAXONOMY, ContentRecord, TAG_TAXONOMY};

/// Read-only lookups into the content platform.
pub trait SiteDirectory: Send + Sync {
    fn content(&self, id: u64) -> Option<ContentRecord>;

    /// Resolve a term slug within a taxonomy to its id.
    fn term_id_by_slug(&self, taxonomy: &str, slug: &str) -> Option<u64>;

    /// Every tenant id in the deployment.
    fn tenant_ids(&self) -> Vec<u64>;

    fn category_by_slug(&self, slug: &str) -> Option<u64> {
        self.term_id_by_slug(CATEGORY_TAXONOMY, slug)
    }

    fn tag_by_slug(&self, slug: &str) -> Option<u64> {
        self.term_id_by_slug(TAG_TAXONOMY, slug)
    }
}

/// Standalone term, for terms no content record references yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermEntry {
    pub taxonomy: String,
    pub term_id: u64,
    pub slug: String,
}

/// In-memory directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticDirectory {
    pub contents: Vec<ContentRecord>,
    pub terms: Vec<TermEntry>,
    pub tenants: Vec<u64>,
}

impl StaticDirectory {
    pub fn with_contents(contents: Vec<ContentRecord>) -> Self {
        Self {
            contents,
            ..Default::default()
        }
    }
}

impl SiteDirectory for StaticDirectory {
    fn content(&self, id: u64) -> Option<ContentRecord> {
        self.contents.iter().find(|record| record.id == id).cloned()
    }

    fn term_id_by_slug(&self, taxonomy: &str, slug: &str) -> Option<u64> {
        let standalone = self
            .terms
            .iter()
            .find(|term| term.taxonomy == taxonomy && term.slug == slug)
            .map(|term| term.term_id);

        standalone.or_else(|| {
            self.contents
                .iter()
                .flat_map(|record| record.terms.iter())
                .find(|term| term.taxonomy == taxonomy && term.slug == slug)
                .map(|term| term.term_id)
        })
    }

    fn tenant_ids(&self) -> Vec<u64> {
        self.tenants.clone()
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::content::TermRef;
    use crate::domain::types::ContentStatus;

    fn record() -> ContentRecord {
        ContentRecord {
            id: 10,
            status: ContentStatus::Published,
            content_type: "post".to_string(),
            permalink: "/hello/".to_string(),
            author_id: 2,
            published_at: datetime!(2024-05-01 08:00 UTC),
            terms: vec![TermRef {
                taxonomy: CATEGORY_TAXONOMY.to_string(),
                term_id: 5,
                slug: "news".to_string(),
            }],
            previous_id: None,
            next_id: None,
            has_type_archive: false,
        }
    }

    #[test]
    fn terms_resolve_from_content_records() {
        let directory = StaticDirectory::with_contents(vec![record()]);
        assert_eq!(directory.category_by_slug("news"), Some(5));
        assert_eq!(directory.tag_by_slug("news"), None);
        assert_eq!(directory.category_by_slug("sports"), None);
    }

    #[test]
    fn standalone_terms_take_precedence() {
        let mut directory = StaticDirectory::with_contents(vec![record()]);
        directory.terms.push(TermEntry {
            taxonomy: TAG_TAXONOMY.to_string(),
            term_id: 9,
            slug: "rust".to_string(),
        });
        assert_eq!(directory.tag_by_slug("rust"), Some(9));
    }

    #[test]
    fn content_lookup_by_id() {
        let directory = StaticDirectory::with_contents(vec![record()]);
        assert!(directory.content(10).is_some());
        assert!(directory.content(11).is_none());
        assert!(directory.tenant_ids().is_empty());
    }
}
