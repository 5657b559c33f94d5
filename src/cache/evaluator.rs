//! Cacheability evaluation.
//!
//! An ordered rule pipeline over request facts and configuration. The first
//! failing rule decides; its [`Rejection`] is kept for diagnostics only.

use std::fmt;

use tracing::debug;

use super::DIAGNOSTICS;
use super::config::CacheConfig;
use crate::domain::request::{RequestFacts, View};

/// Why a response is not a cache candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotSafeMethod,
    Feed,
    Trackback,
    NotFound,
    Search,
    /// An extension vetoed caching; `handlers` is filled only when
    /// diagnostics are on.
    ThirdParty { handlers: Vec<String> },
    ExcludedUri(String),
    ExcludedCategory,
    ExcludedTag,
    ExcludedCookie(String),
    ExcludedUserAgent,
    /// Login page requested with a query string.
    LoginQueryString,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotSafeMethod => f.write_str("not a safe method"),
            Rejection::Feed => f.write_str("feed"),
            Rejection::Trackback => f.write_str("trackback"),
            Rejection::NotFound => f.write_str("404 pages"),
            Rejection::Search => f.write_str("search"),
            Rejection::ThirdParty { handlers } if handlers.is_empty() => {
                f.write_str("third-party handler determined not cacheable")
            }
            Rejection::ThirdParty { handlers } => write!(
                f,
                "one of the following handlers determined not cacheable: {}",
                handlers.join(", ")
            ),
            Rejection::ExcludedUri(uri) => write!(f, "configured URI exclusion: {uri}"),
            Rejection::ExcludedCategory => f.write_str("configured category exclusion"),
            Rejection::ExcludedTag => f.write_str("configured tag exclusion"),
            Rejection::ExcludedCookie(name) => write!(f, "configured cookie exclusion: {name}"),
            Rejection::ExcludedUserAgent => f.write_str("configured user agent exclusion"),
            Rejection::LoginQueryString => f.write_str("login page with query string"),
        }
    }
}

/// Evaluation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Cacheable,
    NotCacheable(Rejection),
}

impl Verdict {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Verdict::Cacheable)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Verdict::Cacheable => None,
            Verdict::NotCacheable(rejection) => Some(rejection),
        }
    }
}

/// Cacheability votes collected from extensions before evaluation.
#[derive(Debug, Clone, Default)]
pub struct ThirdPartyVeto {
    handlers: Vec<String>,
    rejected: bool,
}

impl ThirdPartyVeto {
    /// Record one handler's vote.
    pub fn register(&mut self, handler: impl Into<String>, cacheable: bool) {
        self.handlers.push(handler.into());
        if !cacheable {
            self.rejected = true;
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    pub fn handlers(&self) -> &[String] {
        &self.handlers
    }
}

/// The cacheability rule pipeline.
pub struct CacheabilityEvaluator<'a> {
    config: &'a CacheConfig,
}

impl<'a> CacheabilityEvaluator<'a> {
    pub fn new(config: &'a CacheConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, facts: &RequestFacts, veto: &ThirdPartyVeto) -> Verdict {
        let verdict = match self.first_rejection(facts, veto) {
            Some(rejection) => Verdict::NotCacheable(rejection),
            None => Verdict::Cacheable,
        };

        if self.config.diagnostics
            && let Verdict::NotCacheable(rejection) = &verdict
        {
            debug!(target: DIAGNOSTICS, reason = %rejection, "do not cache");
        }
        verdict
    }

    fn first_rejection(&self, facts: &RequestFacts, veto: &ThirdPartyVeto) -> Option<Rejection> {
        let config = self.config;

        if !facts.is_safe_method() {
            return Some(Rejection::NotSafeMethod);
        }
        if facts.is_feed() && !config.caches_feeds() {
            return Some(Rejection::Feed);
        }
        if matches!(facts.page.view, View::Trackback) {
            return Some(Rejection::Trackback);
        }
        if facts.is_not_found() && !config.caches_not_found() {
            return Some(Rejection::NotFound);
        }
        if matches!(facts.page.view, View::Search) {
            return Some(Rejection::Search);
        }

        if veto.is_rejected() {
            let handlers = if config.diagnostics {
                veto.handlers().to_vec()
            } else {
                Vec::new()
            };
            return Some(Rejection::ThirdParty { handlers });
        }

        let path = facts.tenant_relative_path();
        if is_uri_excluded(path, &config.excluded_uris) {
            return Some(Rejection::ExcludedUri(facts.uri.clone()));
        }

        if let Some(entity) = &facts.page.entity {
            if entity
                .categories
                .iter()
                .any(|slug| config.excluded_categories.contains(slug))
            {
                return Some(Rejection::ExcludedCategory);
            }
            if entity
                .tags
                .iter()
                .any(|slug| config.excluded_tags.contains(slug))
            {
                return Some(Rejection::ExcludedTag);
            }
        }

        if let Some(name) = facts
            .cookies
            .keys()
            .find(|name| config.excluded_cookies.contains(name))
        {
            return Some(Rejection::ExcludedCookie(name.clone()));
        }

        if let (Some(pattern), Some(agent)) = (&config.excluded_user_agents, &facts.user_agent)
            && pattern.is_match(agent)
        {
            return Some(Rejection::ExcludedUserAgent);
        }

        None
    }
}

/// Test a path against URI exclusion rules.
///
/// Rules are literal prefixes; a trailing `$` requires the path to match the
/// rest of the rule exactly. Blank rules are skipped.
pub fn is_uri_excluded(path: &str, rules: &[String]) -> bool {
    rules
        .iter()
        .map(|rule| rule.trim())
        .filter(|rule| !rule.is_empty())
        .any(|rule| match rule.strip_suffix('$') {
            Some(exact) => path == exact,
            None => path.starts_with(rule),
        })
}
