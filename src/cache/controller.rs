//! Per-request orchestration.
//!
//! [`RequestCache`] owns everything one request needs: the cache-control
//! state, the vary-cookie coordinator and the collected third-party votes.
//! Adapters call [`RequestCache::begin`] once the request facts are known,
//! feed platform events through [`RequestCache::dispatch`] and finish with
//! [`RequestCache::finish`] when the response is ready.

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, info, instrument};

use super::config::CacheConfig;
use super::directory::SiteDirectory;
use super::emitter::{Emission, HeaderProtocolEmitter};
use super::evaluator::{CacheabilityEvaluator, Rejection, ThirdPartyVeto, Verdict};
use super::events::CacheEvent;
use super::mode::{CacheMode, ModeContext, resolve_mode};
use super::purge::{Notice, apply_action};
use super::state::CacheControlState;
use super::tags::{PurgeScope, TagPrefix, purge_tags_for};
use super::vary::{VaryCookieCoordinator, reconcile};
use crate::domain::request::{COMMENT_AUTHOR_COOKIE_PREFIX, RequestFacts, View};
use crate::domain::tags::{Tag, TagKind};
use crate::domain::types::ContentStatus;

pub const METRIC_DECISION_TOTAL: &str = "edgecache_decision_total";
pub const METRIC_PURGE_TAGS_TOTAL: &str = "edgecache_purge_tags_total";
pub const METRIC_VARY_MISMATCH_TOTAL: &str = "edgecache_vary_mismatch_total";

/// Decision pipeline for one request.
pub struct RequestCache<'a> {
    config: &'a CacheConfig,
    directory: &'a dyn SiteDirectory,
    facts: RequestFacts,
    state: CacheControlState,
    vary: VaryCookieCoordinator,
    veto: ThirdPartyVeto,
    notices: Vec<Notice>,
    scope: PurgeScope,
    /// Visitor passed the vary, login and commenter checks.
    anonymous: bool,
    evaluated: bool,
    rejection: Option<Rejection>,
    now: OffsetDateTime,
}

impl<'a> RequestCache<'a> {
    /// Set up the request: vary reconciliation, control action, visitor
    /// checks and status capture.
    #[instrument(skip_all, fields(uri = %facts.uri, method = %facts.method))]
    pub fn begin(
        config: &'a CacheConfig,
        directory: &'a dyn SiteDirectory,
        mut facts: RequestFacts,
        now: OffsetDateTime,
    ) -> Self {
        let mut notices = Vec::new();

        let reconciliation = reconcile(
            facts.upstream.vary_cookie.as_deref(),
            config.custom_login_cookie(),
        );
        if reconciliation.bad_cookie {
            counter!(METRIC_VARY_MISMATCH_TOTAL).increment(1);
            if facts.admin.any() {
                notices.push(Notice::warning(
                    "The proxy does not vary on the configured login cookie; \
                     check the vary cookie setting of the proxy.",
                ));
            }
        }

        let sent = facts.cookie(&reconciliation.cookie_name).map(str::to_string);
        let mut vary = VaryCookieCoordinator::new(
            reconciliation,
            sent.as_deref(),
            &config.cookie_path,
            config.cookie_domain.as_deref(),
            now,
        );

        let prefix = TagPrefix::new(&config.tag_prefix, facts.tenant.id);
        let mut state = CacheControlState::new(prefix, vary.name());

        if let Some(action) = &facts.action {
            state.set_mode(CacheMode::NoCache);
            notices.extend(apply_action(action, &mut state, directory));
        }

        let anonymous = !vary.is_bad()
            && !vary.sync_login(facts.logged_in, facts.secure)
            && !Self::sync_commenter(config, &mut vary, &mut facts);

        if anonymous && let Some(code) = facts.status {
            state.record_status(code, config);
        }

        let scope = PurgeScope::resolve(&facts);
        debug!(
            vary_cookie = vary.name(),
            anonymous,
            ?scope,
            "request cache started"
        );

        Self {
            config,
            directory,
            facts,
            state,
            vary,
            veto: ThirdPartyVeto::default(),
            notices,
            scope,
            anonymous,
            evaluated: false,
            rejection: None,
            now,
        }
    }

    /// Commenter handling; cached commenters are served as plain visitors,
    /// so their comment cookies are ignored for the rest of the request.
    fn sync_commenter(
        config: &CacheConfig,
        vary: &mut VaryCookieCoordinator,
        facts: &mut RequestFacts,
    ) -> bool {
        let non_cacheable =
            vary.sync_commenter(config.cache_commenters, facts.has_comment_author_cookie());
        if config.cache_commenters {
            let vary_name = vary.name().to_string();
            facts.cookies.retain(|name, _| {
                !name.starts_with(COMMENT_AUTHOR_COOKIE_PREFIX) && *name != vary_name
            });
        }
        non_cacheable
    }

    /// Apply one platform event.
    pub fn dispatch(&mut self, event: CacheEvent) {
        debug!(event_kind = ?event, "cache event dispatched");

        match event {
            CacheEvent::ContentChanged { content_id } => self.purge_content(content_id),
            CacheEvent::SingleContentPurged { content_id } => self.purge_single(content_id),
            CacheEvent::CommentCountChanged => {
                if self.config.caches_feeds() {
                    self.state.tags_mut().add_purge_tag(TagKind::Feed.into());
                }
            }
            CacheEvent::LoginStateChanged { logged_in } => {
                self.vary.record_login_change(logged_in, self.facts.secure);
            }
            CacheEvent::CommentPosted { registered } => {
                if !self.config.cache_commenters {
                    self.vary.record_comment(registered);
                }
            }
            CacheEvent::RecentPostsWidgetRendered => {
                self.state
                    .tags_mut()
                    .add_cache_tag(TagKind::PagesWithRecentPosts.into());
            }
            CacheEvent::AddCacheTags { tags } => {
                self.state.tags_mut().add_cache_tags(raw_tags(tags));
            }
            CacheEvent::AddPurgeTags { tags } => {
                self.state.tags_mut().add_purge_tags(raw_tags(tags));
            }
            CacheEvent::AddVaryCookie { name } => {
                if !name.trim().is_empty() {
                    self.state.add_vary_cookie(name.trim());
                }
            }
            CacheEvent::Veto { handler, cacheable } => self.veto.register(handler, cacheable),
            CacheEvent::MarkNonCacheable => self.state.mark_non_cacheable(),
            CacheEvent::UseFrontPageTtl => self.state.request_front_page_ttl(),
            CacheEvent::MarkMobile => self.state.mark_mobile(),
        }
    }

    pub fn dispatch_all<I: IntoIterator<Item = CacheEvent>>(&mut self, events: I) {
        for event in events {
            self.dispatch(event);
        }
    }

    /// Run cacheability evaluation and promote the request to CACHE when it
    /// passes. Runs at most once; [`finish`](Self::finish) calls it if the
    /// adapter did not.
    pub fn check_cacheable(&mut self) {
        if self.evaluated {
            return;
        }
        self.evaluated = true;

        if !self.anonymous || self.facts.action.is_some() {
            return;
        }
        if matches!(self.facts.page.view, View::Login) && !self.config.cache_login_page {
            return;
        }
        if self.state.is_non_cacheable() {
            debug!("request flagged non-cacheable before evaluation");
            return;
        }

        let verdict = CacheabilityEvaluator::new(self.config).evaluate(&self.facts, &self.veto);
        if let Verdict::NotCacheable(rejection) = verdict {
            self.rejection = Some(rejection);
            return;
        }

        if matches!(self.facts.page.view, View::Login) {
            if self.facts.has_query() {
                self.rejection = Some(Rejection::LoginQueryString);
                return;
            }
            self.state.tags_mut().add_cache_tag(TagKind::Login.into());
        }

        self.state.set_mode(CacheMode::Cache);
    }

    /// Resolve the final mode and render the response directives.
    #[instrument(skip_all, fields(uri = %self.facts.uri))]
    pub fn finish(mut self) -> Emission {
        self.check_cacheable();

        let context = ModeContext {
            admin: self.facts.admin.any(),
            forced_no_cache: self.facts.forced_no_cache,
            non_cacheable: self.state.is_non_cacheable(),
            platform_mobile: self.facts.mobile || self.state.is_platform_mobile(),
            agent_mobile: self.facts.is_mobile_agent(),
            upstream_expects_mobile: self.facts.upstream.expects_mobile(),
            mobile_view: self.config.mobile_view,
        };
        let control = resolve_mode(self.state.control(), &context);

        let mut emission = HeaderProtocolEmitter::new(self.config, self.directory).emit(
            control,
            &self.state,
            &self.facts,
            self.scope,
            self.now,
        );
        emission.cookies = self.vary.into_update().into_iter().collect();
        emission.notices = self.notices;
        emission.reason = self.rejection.map(|rejection| rejection.to_string());

        counter!(METRIC_DECISION_TOTAL, "mode" => emission.mode.as_str()).increment(1);
        if !emission.purge_tags.is_empty() {
            counter!(METRIC_PURGE_TAGS_TOTAL).increment(emission.purge_tags.len() as u64);
        }

        info!(
            mode = %emission.mode,
            headers = emission.headers.len(),
            purge_tags = emission.purge_tags.len(),
            reason = emission.reason.as_deref().unwrap_or(""),
            "cache decision emitted"
        );
        emission
    }

    fn purge_content(&mut self, content_id: u64) {
        let Some(record) = self.directory.content(content_id) else {
            debug!(content_id, "changed content not found, skipping purge");
            return;
        };
        if !matches!(
            record.status,
            ContentStatus::Published | ContentStatus::Trash | ContentStatus::Private
        ) {
            debug!(content_id, status = record.status.as_str(), "content status ignored");
            return;
        }

        let tags = purge_tags_for(self.config, self.directory, content_id);
        if tags.is_empty() {
            return;
        }
        if self.config.diagnostics {
            let listed: Vec<&str> = tags.iter().map(Tag::as_str).collect();
            debug!(
                target: super::DIAGNOSTICS,
                content_id,
                tags = ?listed,
                "purge tags for changed content"
            );
        }

        let purge = self.state.tags_mut();
        if tags.has_wildcard() {
            purge.add_purge_tag(Tag::wildcard());
        } else {
            purge.add_purge_tags(tags);
        }
        self.state.mark_stale();
    }

    fn purge_single(&mut self, content_id: u64) {
        let purgeable = self.directory.content(content_id).is_some_and(|record| {
            matches!(record.status, ContentStatus::Published | ContentStatus::Trash)
        });
        if purgeable {
            self.state.tags_mut().add_purge_tag(Tag::post(content_id));
        }
    }

    pub fn facts(&self) -> &RequestFacts {
        &self.facts
    }

    pub fn state(&self) -> &CacheControlState {
        &self.state
    }

    pub fn vary(&self) -> &VaryCookieCoordinator {
        &self.vary
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        self.rejection.as_ref()
    }
}

fn raw_tags(tags: Vec<String>) -> impl Iterator<Item = Tag> {
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .map(Tag::raw)
}
