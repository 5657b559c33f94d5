//! Header protocol emitter.
//!
//! Renders the final request state into the header lines the proxy reads,
//! or into a single debug header when the operator asked to see them.

use time::OffsetDateTime;
use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::debug;

use super::DIAGNOSTICS;
use super::config::CacheConfig;
use super::directory::SiteDirectory;
use super::mode::{CacheControl, CacheMode};
use super::purge::Notice;
use super::state::CacheControlState;
use super::tags::{PurgeScope, TagSet, cache_tags_for_request, scoped_purge_tags};
use super::vary::CookieUpdate;
use crate::domain::request::RequestFacts;

pub const HEADER_CACHE_CONTROL: &str = "X-LiteSpeed-Cache-Control";
pub const HEADER_PURGE: &str = "X-LiteSpeed-Purge";
pub const HEADER_TAG: &str = "X-LiteSpeed-Tag";
pub const HEADER_VARY: &str = "X-LiteSpeed-Vary";
pub const HEADER_DEBUG: &str = "X-LiteSpeed-Debug";

const NO_CACHE: &str = "no-cache";
const STALE_PREFIX: &str = "stale,";

const FOOTER_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Everything the adapter has to write for one response.
#[derive(Debug, Clone, Default)]
pub struct Emission {
    /// Final primary mode after resolution.
    pub mode: CacheMode,
    pub headers: Vec<(&'static str, String)>,
    pub cookies: Vec<CookieUpdate>,
    /// Purge tags as sent on the wire, prefixed and scoped.
    pub purge_tags: Vec<String>,
    /// Comment appended to HTML bodies.
    pub footer: Option<String>,
    pub notices: Vec<Notice>,
    /// Why the request was not cached, when evaluation rejected it.
    pub reason: Option<String>,
}

impl Emission {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `Name: value` lines, in emission order.
    pub fn lines(&self) -> Vec<String> {
        self.headers
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect()
    }
}

enum VaryHeader {
    Absent,
    Value(String),
    /// The visitor already holds the password cookie.
    Blocked,
}

/// Directive values before they are laid out as headers.
#[derive(Default)]
struct Directives {
    purge_tags: Vec<String>,
    cache_control: Option<String>,
    purge: Option<String>,
    tag: Option<String>,
    vary: Option<String>,
}

impl Directives {
    fn set_purge(&mut self, tags: Vec<String>, stale: bool) {
        if !tags.is_empty() {
            let stale = if stale { STALE_PREFIX } else { "" };
            self.purge = Some(format!("{stale}tag={}", tags.join(",")));
        }
        self.purge_tags = tags;
    }

    fn named(&self) -> Vec<(&'static str, String)> {
        [
            (HEADER_CACHE_CONTROL, &self.cache_control),
            (HEADER_PURGE, &self.purge),
            (HEADER_TAG, &self.tag),
            (HEADER_VARY, &self.vary),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|value| (name, value)))
        .collect()
    }
}

/// Renders [`CacheControlState`] into protocol headers.
pub struct HeaderProtocolEmitter<'a> {
    config: &'a CacheConfig,
    directory: &'a dyn SiteDirectory,
}

impl<'a> HeaderProtocolEmitter<'a> {
    pub fn new(config: &'a CacheConfig, directory: &'a dyn SiteDirectory) -> Self {
        Self { config, directory }
    }

    /// `control` is the already-resolved mode with its flags.
    pub fn emit(
        &self,
        control: CacheControl,
        state: &CacheControlState,
        facts: &RequestFacts,
        scope: PurgeScope,
        now: OffsetDateTime,
    ) -> Emission {
        let mode = control.mode;
        let stale = control.flags.stale;
        let mut purge = state.tags().purge_tags().clone();
        let mut directives = Directives::default();

        let mut vary = VaryHeader::Absent;
        let mut cache_tags = TagSet::new();
        if mode != CacheMode::NoCache {
            vary = self.vary_header(state, facts);
            cache_tags = cache_tags_for_request(facts, state.error_status());
            cache_tags.extend(state.tags().cache_tags().iter().cloned());
        }

        let blocked = matches!(vary, VaryHeader::Blocked);
        if cache_tags.is_empty() || blocked {
            if blocked {
                debug!("visitor holds the password cookie, not caching");
            }
            directives.cache_control = Some(NO_CACHE.to_string());
            directives.set_purge(self.scoped_purge(&purge, state, scope), stale);
            return self.finish(CacheMode::NoCache, control, directives, facts, now);
        }

        match mode {
            CacheMode::Cache => {
                let ttl = self.select_ttl(state, facts);
                directives.cache_control = Some(format!("public,max-age={ttl}"));

                let prefix = state.prefix();
                let mut wire: Vec<String> =
                    cache_tags.iter().map(|tag| prefix.apply(tag)).collect();
                wire.push(prefix.root().to_string());
                directives.tag = Some(wire.join(","));

                if let VaryHeader::Value(value) = vary {
                    directives.vary = Some(value);
                }
            }
            CacheMode::PurgeSingle => {
                directives.cache_control = Some(NO_CACHE.to_string());
                if let Some(first) = cache_tags.first() {
                    purge.insert(first.clone());
                }
            }
            CacheMode::Purge => {
                directives.cache_control = Some(NO_CACHE.to_string());
                purge.extend(cache_tags);
            }
            CacheMode::NoCache => {}
        }

        directives.set_purge(self.scoped_purge(&purge, state, scope), stale);
        self.finish(mode, control, directives, facts, now)
    }

    /// TTL priority: front page, feed, 404, recorded error, public default.
    fn select_ttl(&self, state: &CacheControlState, facts: &RequestFacts) -> u32 {
        let config = self.config;
        if state.uses_front_page_ttl() || facts.page.front_page {
            config.front_page_ttl
        } else if facts.is_feed() && config.feed_ttl > 0 {
            config.feed_ttl
        } else if facts.is_not_found() && config.not_found_ttl > 0 {
            config.not_found_ttl
        } else if state.error_status() == Some(403) {
            config.forbidden_ttl
        } else if state.error_status().is_some_and(|code| code >= 500) {
            config.server_error_ttl
        } else {
            config.public_ttl
        }
    }

    fn vary_header(&self, state: &CacheControlState, facts: &RequestFacts) -> VaryHeader {
        let mut entries: Vec<String> = state
            .vary_cookies()
            .iter()
            .map(|name| format!("cookie={name}"))
            .collect();

        let protected = facts
            .page
            .entity
            .as_ref()
            .is_some_and(|entity| entity.password_protected);
        if protected {
            let password_cookie = self.config.password_cookie.as_str();
            if facts.cookie(password_cookie).is_some() {
                return VaryHeader::Blocked;
            }
            entries.push(format!("cookie={password_cookie}"));
        }

        if entries.is_empty() {
            VaryHeader::Absent
        } else {
            VaryHeader::Value(entries.join(","))
        }
    }

    fn scoped_purge(
        &self,
        purge: &TagSet,
        state: &CacheControlState,
        scope: PurgeScope,
    ) -> Vec<String> {
        scoped_purge_tags(purge, state.prefix(), scope, self.directory).unwrap_or_default()
    }

    fn finish(
        &self,
        mode: CacheMode,
        control: CacheControl,
        directives: Directives,
        facts: &RequestFacts,
        now: OffsetDateTime,
    ) -> Emission {
        let named = directives.named();
        let lines: Vec<String> = named
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect();

        let headers = if control.flags.show_headers && !named.is_empty() {
            vec![(HEADER_DEBUG, lines.join("; "))]
        } else {
            named
        };

        if self.config.diagnostics {
            for line in &lines {
                debug!(target: DIAGNOSTICS, directive = %line, "header emitted");
            }
            debug!(target: DIAGNOSTICS, "end response");
        }

        let footer = self.footer(&directives, facts, now);
        Emission {
            mode,
            headers,
            purge_tags: directives.purge_tags,
            footer,
            ..Default::default()
        }
    }

    fn footer(
        &self,
        directives: &Directives,
        facts: &RequestFacts,
        now: OffsetDateTime,
    ) -> Option<String> {
        if facts.ajax {
            return None;
        }

        let stamp = now
            .format(FOOTER_TIME_FORMAT)
            .unwrap_or_default();
        let mut footer = format!("<!-- Page generated by edgecache on {stamp} -->");

        if self.config.diagnostics {
            for (name, value) in [
                (HEADER_TAG, &directives.tag),
                (HEADER_CACHE_CONTROL, &directives.cache_control),
                (HEADER_PURGE, &directives.purge),
            ] {
                if let Some(value) = value {
                    footer.push_str(&format!("\n<!-- {name}: {value} -->"));
                }
            }
        }
        Some(footer)
    }
}
