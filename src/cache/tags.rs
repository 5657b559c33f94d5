//! Tag aggregation, prefixing and purge scoping.
//!
//! Two disjoint tag sets are collected per request: cache tags identify the
//! current response, purge tags identify cached responses to drop. Both are
//! prefixed with the configured tag prefix and the tenant token before they
//! reach the wire.

use tracing::{debug, warn};

use super::DIAGNOSTICS;
use super::config::CacheConfig;
use super::directory::SiteDirectory;
use crate::domain::request::{RequestFacts, View};
use crate::domain::tags::{Tag, TagKind, decode_uri};
use crate::domain::types::DateGranularity;

/// Deduplicating tag collection that keeps first-insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<Tag>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag; returns `false` when it was already present.
    pub fn insert(&mut self, tag: Tag) -> bool {
        if self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    pub fn extend<I: IntoIterator<Item = Tag>>(&mut self, tags: I) {
        for tag in tags {
            self.insert(tag);
        }
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    pub fn has_wildcard(&self) -> bool {
        self.tags.iter().any(Tag::is_wildcard)
    }

    pub fn first(&self) -> Option<&Tag> {
        self.tags.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut set = TagSet::new();
        set.extend(iter);
        set
    }
}

impl IntoIterator for TagSet {
    type Item = Tag;
    type IntoIter = std::vec::IntoIter<Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.tags.into_iter()
    }
}

/// Accumulates cache tags and purge tags for one request.
#[derive(Debug, Clone, Default)]
pub struct TagAggregator {
    purge: TagSet,
    cache: TagSet,
}

impl TagAggregator {
    pub fn add_purge_tag(&mut self, tag: Tag) {
        self.purge.insert(tag);
    }

    pub fn add_purge_tags<I: IntoIterator<Item = Tag>>(&mut self, tags: I) {
        self.purge.extend(tags);
    }

    pub fn add_cache_tag(&mut self, tag: Tag) {
        self.cache.insert(tag);
    }

    pub fn add_cache_tags<I: IntoIterator<Item = Tag>>(&mut self, tags: I) {
        self.cache.extend(tags);
    }

    pub fn purge_tags(&self) -> &TagSet {
        &self.purge
    }

    /// Tags contributed by extensions, not derived from the request.
    pub fn cache_tags(&self) -> &TagSet {
        &self.cache
    }
}

/// Prefix placed in front of every tag on the wire: `{prefix}B{tenant}_`.
///
/// Computed once when the request state is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPrefix {
    configured: String,
    scoped: String,
}

impl TagPrefix {
    pub fn new(configured: &str, tenant_id: u64) -> Self {
        Self {
            configured: configured.to_string(),
            scoped: tenant_token(configured, tenant_id),
        }
    }

    pub fn apply(&self, tag: &Tag) -> String {
        format!("{}{}", self.scoped, tag)
    }

    /// Token matching every tag of the current tenant.
    pub fn root(&self) -> &str {
        &self.scoped
    }

    /// Root token of another tenant under the same configured prefix.
    pub fn root_for(&self, tenant_id: u64) -> String {
        tenant_token(&self.configured, tenant_id)
    }
}

fn tenant_token(configured: &str, tenant_id: u64) -> String {
    format!("{configured}B{tenant_id}_")
}

/// Reach of a wildcard purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeScope {
    SingleTenant,
    AllTenants,
}

impl PurgeScope {
    /// Network administrators, and callers holding a trusted network token,
    /// purge every tenant of a multi-tenant deployment.
    pub fn resolve(facts: &RequestFacts) -> Self {
        let network_caller = facts.admin.network_admin || facts.network_token.is_some();
        if facts.tenant.multi_tenant && network_caller {
            PurgeScope::AllTenants
        } else {
            PurgeScope::SingleTenant
        }
    }
}

/// Wire-ready purge tags, or `None` when no purge directive should be sent.
///
/// A wildcard never reaches the wire as a literal `*`: it becomes the tenant
/// root token, or one root token per tenant for network-wide purges.
pub fn scoped_purge_tags(
    purge: &TagSet,
    prefix: &TagPrefix,
    scope: PurgeScope,
    directory: &dyn SiteDirectory,
) -> Option<Vec<String>> {
    if purge.is_empty() {
        return None;
    }

    if !purge.has_wildcard() {
        return Some(purge.iter().map(|tag| prefix.apply(tag)).collect());
    }

    match scope {
        PurgeScope::SingleTenant => Some(vec![prefix.root().to_string()]),
        PurgeScope::AllTenants => {
            let tenants = directory.tenant_ids();
            if tenants.is_empty() {
                warn!("network purge requested but the tenant list is empty");
                return None;
            }
            Some(tenants.into_iter().map(|id| prefix.root_for(id)).collect())
        }
    }
}

/// Tags of every cached response a change to `content_id` invalidates.
pub fn purge_tags_for(
    config: &CacheConfig,
    directory: &dyn SiteDirectory,
    content_id: u64,
) -> TagSet {
    let mut tags = TagSet::new();

    if config.purge_all_on_change {
        tags.insert(Tag::wildcard());
        return tags;
    }

    tags.insert(Tag::post(content_id));

    let Some(record) = directory.content(content_id) else {
        debug!(content_id, "content record not found, purging its own tag only");
        return tags;
    };

    if let Some(url) = Tag::url(&link_relative(&record.permalink)) {
        tags.insert(url);
    }

    if record.is_dated() {
        for adjacent in [record.previous_id, record.next_id].into_iter().flatten() {
            if config.diagnostics {
                debug!(target: DIAGNOSTICS, content_id, adjacent, "purging adjacent content");
            }
            tags.insert(Tag::post(adjacent));
        }
    }

    let triggers = &config.purge_triggers;
    if triggers.terms {
        tags.extend(record.term_ids().map(Tag::term));
    }
    if config.caches_feeds() {
        tags.insert(TagKind::Feed.into());
    }
    if triggers.author {
        tags.insert(Tag::author(record.author_id));
    }
    if triggers.post_type && record.has_type_archive {
        tags.insert(Tag::post_type(&record.content_type));
    }
    if triggers.front_page {
        tags.insert(TagKind::FrontPage.into());
    }
    if triggers.home_page {
        tags.insert(TagKind::Home.into());
    }
    if triggers.pages {
        tags.insert(TagKind::Pages.into());
    }
    if triggers.pages_with_recent_posts {
        tags.insert(TagKind::PagesWithRecentPosts.into());
    }

    let published = record.published_at.date();
    for (enabled, granularity) in [
        (triggers.date, DateGranularity::Day),
        (triggers.month, DateGranularity::Month),
        (triggers.year, DateGranularity::Year),
    ] {
        if enabled {
            tags.insert(Tag::archive_date(published, granularity));
        }
    }

    tags
}

/// Tags identifying the response being rendered for `facts`.
pub fn cache_tags_for_request(facts: &RequestFacts, error_status: Option<u16>) -> TagSet {
    let mut tags = TagSet::new();

    if let Some(url) = Tag::url(&decode_uri(&facts.uri)) {
        tags.insert(url);
    }

    if facts.page.front_page {
        tags.insert(TagKind::FrontPage.into());
    } else if matches!(facts.page.view, View::Home) {
        tags.insert(TagKind::Home.into());
    }

    if let Some(status) = error_status {
        tags.insert(Tag::error(status));
    }

    match &facts.page.view {
        View::TermArchive { term_id } => {
            tags.insert(Tag::term(*term_id));
        }
        View::PostTypeArchive { post_type } => {
            tags.insert(Tag::post_type(post_type));
        }
        View::AuthorArchive { author_id } => {
            tags.insert(Tag::author(*author_id));
        }
        View::DateArchive { granularity, date } => {
            tags.insert(Tag::archive_date(*date, *granularity));
        }
        View::Singular { id, page } => {
            tags.insert(Tag::post(*id));
            if *page {
                tags.insert(TagKind::Pages.into());
            }
        }
        View::Feed => {
            tags.insert(TagKind::Feed.into());
        }
        View::Home
        | View::Search
        | View::Trackback
        | View::NotFound
        | View::Login
        | View::Other => {}
    }

    tags
}

/// Strip scheme and host from an absolute link.
fn link_relative(link: &str) -> String {
    match link.split_once("://") {
        Some((_, rest)) => match rest.find('/') {
            Some(index) => rest[index..].to_string(),
            None => "/".to_string(),
        },
        None => link.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, datetime};

    use super::*;
    use crate::cache::directory::StaticDirectory;
    use crate::domain::content::{CATEGORY_TAXONOMY, ContentRecord, TermRef};
    use crate::domain::types::ContentStatus;

    fn record(id: u64) -> ContentRecord {
        ContentRecord {
            id,
            status: ContentStatus::Published,
            content_type: "post".to_string(),
            permalink: "https://example.test/2024/03/hello/".to_string(),
            author_id: 4,
            published_at: datetime!(2024-03-09 10:30 UTC),
            terms: vec![TermRef {
                taxonomy: CATEGORY_TAXONOMY.to_string(),
                term_id: 12,
                slug: "news".to_string(),
            }],
            previous_id: Some(id - 1),
            next_id: None,
            has_type_archive: false,
        }
    }

    fn strings(tags: &TagSet) -> Vec<&str> {
        tags.iter().map(Tag::as_str).collect()
    }

    #[test]
    fn adding_existing_tag_is_a_no_op() {
        let mut aggregator = TagAggregator::default();
        aggregator.add_purge_tags([Tag::post(1), Tag::post(2)]);
        aggregator.add_purge_tags([Tag::post(1), Tag::post(2)]);
        aggregator.add_purge_tag(Tag::post(2));
        assert_eq!(aggregator.purge_tags().len(), 2);
        assert!(aggregator.cache_tags().is_empty());
    }

    #[test]
    fn purge_all_on_change_short_circuits() {
        let config = CacheConfig {
            purge_all_on_change: true,
            ..Default::default()
        };
        let directory = StaticDirectory::with_contents(vec![record(7)]);
        let tags = purge_tags_for(&config, &directory, 7);
        assert_eq!(strings(&tags), vec!["*"]);
    }

    #[test]
    fn purge_tags_follow_default_toggles() {
        let config = CacheConfig::default();
        let directory = StaticDirectory::with_contents(vec![record(7)]);
        let tags = purge_tags_for(&config, &directory, 7);

        let url = Tag::url("/2024/03/hello/").expect("url tag");
        assert_eq!(
            strings(&tags),
            vec!["P.7", url.as_str(), "P.6", "T.12", "A.4", "F", "H", "PG", "PR"]
        );
    }

    #[test]
    fn purge_tags_include_feed_dates_and_type_archive_when_enabled() {
        let mut config = CacheConfig {
            feed_ttl: 600,
            ..Default::default()
        };
        config.purge_triggers.date = true;
        config.purge_triggers.month = true;
        config.purge_triggers.year = true;

        let mut item = record(7);
        item.has_type_archive = true;
        let directory = StaticDirectory::with_contents(vec![item]);
        let tags = purge_tags_for(&config, &directory, 7);

        for expected in ["FD", "PT.post", "D.20240309", "D.202403", "D.2024"] {
            assert!(tags.contains(&Tag::raw(expected)), "missing {expected}");
        }
    }

    #[test]
    fn undated_content_skips_adjacent_items() {
        let mut item = record(7);
        item.content_type = "page".to_string();
        let directory = StaticDirectory::with_contents(vec![item]);
        let tags = purge_tags_for(&CacheConfig::default(), &directory, 7);
        assert!(!tags.contains(&Tag::post(6)));
    }

    #[test]
    fn unknown_content_purges_its_own_tag() {
        let directory = StaticDirectory::default();
        let tags = purge_tags_for(&CacheConfig::default(), &directory, 99);
        assert_eq!(strings(&tags), vec!["P.99"]);
    }

    #[test]
    fn prefix_is_applied_with_tenant_token() {
        let prefix = TagPrefix::new("site1", 3);
        assert_eq!(prefix.root(), "site1B3_");
        assert_eq!(prefix.apply(&Tag::post(5)), "site1B3_P.5");
        assert_eq!(prefix.root_for(8), "site1B8_");
    }

    #[test]
    fn wildcard_resolves_to_tenant_root() {
        let prefix = TagPrefix::new("", 1);
        let directory = StaticDirectory::default();
        let purge: TagSet = [Tag::post(1), Tag::wildcard(), Tag::post(2)]
            .into_iter()
            .collect();

        let scoped = scoped_purge_tags(&purge, &prefix, PurgeScope::SingleTenant, &directory);
        assert_eq!(scoped, Some(vec!["B1_".to_string()]));
    }

    #[test]
    fn network_wildcard_lists_every_tenant() {
        let prefix = TagPrefix::new("p", 1);
        let directory = StaticDirectory {
            tenants: vec![1, 2, 5],
            ..Default::default()
        };
        let purge: TagSet = [Tag::wildcard()].into_iter().collect();

        let scoped = scoped_purge_tags(&purge, &prefix, PurgeScope::AllTenants, &directory)
            .expect("tenant tokens");
        assert_eq!(scoped, vec!["pB1_", "pB2_", "pB5_"]);
        assert!(scoped.iter().all(|token| !token.contains('*')));
    }

    #[test]
    fn network_wildcard_without_tenants_emits_nothing() {
        let prefix = TagPrefix::new("", 1);
        let purge: TagSet = [Tag::wildcard()].into_iter().collect();
        let scoped = scoped_purge_tags(
            &purge,
            &prefix,
            PurgeScope::AllTenants,
            &StaticDirectory::default(),
        );
        assert_eq!(scoped, None);
    }

    #[test]
    fn purge_scope_requires_multi_tenant_network_caller() {
        let mut facts = RequestFacts::get("/");
        facts.admin.network_admin = true;
        assert_eq!(PurgeScope::resolve(&facts), PurgeScope::SingleTenant);

        facts.tenant.multi_tenant = true;
        assert_eq!(PurgeScope::resolve(&facts), PurgeScope::AllTenants);

        facts.admin.network_admin = false;
        assert_eq!(PurgeScope::resolve(&facts), PurgeScope::SingleTenant);

        facts.network_token = Some(crate::domain::types::NetworkToken::CoreUpdates);
        assert_eq!(PurgeScope::resolve(&facts), PurgeScope::AllTenants);
    }

    #[test]
    fn request_tags_for_front_page() {
        let mut facts = RequestFacts::get("/");
        facts.page.front_page = true;
        facts.page.view = View::Home;
        let tags = cache_tags_for_request(&facts, None);

        let url = Tag::url("/").expect("url tag");
        assert_eq!(strings(&tags), vec![url.as_str(), "F"]);
    }

    #[test]
    fn request_tags_for_views() {
        let mut facts = RequestFacts::get("/about/");
        facts.page.view = View::Singular { id: 3, page: true };
        let tags = cache_tags_for_request(&facts, Some(404));
        assert!(tags.contains(&Tag::post(3)));
        assert!(tags.contains(&TagKind::Pages.into()));
        assert!(tags.contains(&Tag::error(404)));

        facts.page.view = View::DateArchive {
            granularity: DateGranularity::Month,
            date: date!(2023 - 11 - 02),
        };
        let tags = cache_tags_for_request(&facts, None);
        assert!(tags.contains(&Tag::raw("D.202311")));

        facts.page.view = View::Home;
        let tags = cache_tags_for_request(&facts, None);
        assert!(tags.contains(&TagKind::Home.into()));
    }

    #[test]
    fn request_url_tag_is_percent_decoded() {
        let encoded = cache_tags_for_request(&RequestFacts::get("/caf%C3%A9/"), None);
        let decoded = cache_tags_for_request(&RequestFacts::get("/café/"), None);
        assert_eq!(encoded.first(), decoded.first());
    }

    #[test]
    fn link_relative_strips_origin() {
        assert_eq!(link_relative("https://example.test/a/b/"), "/a/b/");
        assert_eq!(link_relative("https://example.test"), "/");
        assert_eq!(link_relative("/already/"), "/already/");
    }
}
