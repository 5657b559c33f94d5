//! Cache configuration.
//!
//! Read-only view over the administrator-configured options. One instance is
//! shared by every request; nothing in the core mutates it.

use regex::Regex;

// Default values for cache configuration
const DEFAULT_PUBLIC_TTL: u32 = 28_800;
const DEFAULT_FRONT_PAGE_TTL: u32 = 1_800;
const DEFAULT_FEED_TTL: u32 = 0;
const DEFAULT_NOT_FOUND_TTL: u32 = 3_600;
const DEFAULT_FORBIDDEN_TTL: u32 = 3_600;
const DEFAULT_SERVER_ERROR_TTL: u32 = 3_600;
pub const DEFAULT_PASSWORD_COOKIE: &str = "wp-postpass";
pub const DEFAULT_COOKIE_PATH: &str = "/";

/// Error responses with a TTL at or below this are never cached.
pub const MIN_ERROR_TTL: u32 = 30;

/// Which related listings a content change purges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeTriggers {
    pub front_page: bool,
    pub home_page: bool,
    pub pages: bool,
    pub pages_with_recent_posts: bool,
    pub author: bool,
    pub terms: bool,
    pub post_type: bool,
    pub date: bool,
    pub month: bool,
    pub year: bool,
}

impl Default for PurgeTriggers {
    fn default() -> Self {
        Self {
            front_page: true,
            home_page: true,
            pages: true,
            pages_with_recent_posts: true,
            author: true,
            terms: true,
            post_type: true,
            date: false,
            month: false,
            year: false,
        }
    }
}

/// Cache configuration consumed by every component of the core.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default public TTL in seconds.
    pub public_ttl: u32,
    pub front_page_ttl: u32,
    /// Feed TTL; 0 disables feed caching.
    pub feed_ttl: u32,
    /// 404 TTL; 0 disables caching of not-found pages.
    pub not_found_ttl: u32,
    pub forbidden_ttl: u32,
    pub server_error_ttl: u32,
    /// URI exclusion rules: literal prefixes, `$`-terminated for exact match.
    pub excluded_uris: Vec<String>,
    pub excluded_categories: Vec<String>,
    pub excluded_tags: Vec<String>,
    pub excluded_cookies: Vec<String>,
    pub excluded_user_agents: Option<Regex>,
    /// Site-configured login cookie name, if customised.
    pub login_cookie: Option<String>,
    pub tag_prefix: String,
    pub mobile_view: bool,
    /// Any content change purges the whole tenant.
    pub purge_all_on_change: bool,
    pub purge_triggers: PurgeTriggers,
    pub cache_commenters: bool,
    pub cache_login_page: bool,
    /// Cookie granting access to password-protected content.
    pub password_cookie: String,
    pub cookie_path: String,
    pub cookie_domain: Option<String>,
    /// Send rejection reasons and emitted directives to the diagnostic log.
    pub diagnostics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            public_ttl: DEFAULT_PUBLIC_TTL,
            front_page_ttl: DEFAULT_FRONT_PAGE_TTL,
            feed_ttl: DEFAULT_FEED_TTL,
            not_found_ttl: DEFAULT_NOT_FOUND_TTL,
            forbidden_ttl: DEFAULT_FORBIDDEN_TTL,
            server_error_ttl: DEFAULT_SERVER_ERROR_TTL,
            excluded_uris: Vec::new(),
            excluded_categories: Vec::new(),
            excluded_tags: Vec::new(),
            excluded_cookies: Vec::new(),
            excluded_user_agents: None,
            login_cookie: None,
            tag_prefix: String::new(),
            mobile_view: false,
            purge_all_on_change: false,
            purge_triggers: PurgeTriggers::default(),
            cache_commenters: true,
            cache_login_page: true,
            password_cookie: DEFAULT_PASSWORD_COOKIE.to_string(),
            cookie_path: DEFAULT_COOKIE_PATH.to_string(),
            cookie_domain: None,
            diagnostics: false,
        }
    }
}

impl CacheConfig {
    pub fn caches_feeds(&self) -> bool {
        self.feed_ttl > 0
    }

    pub fn caches_not_found(&self) -> bool {
        self.not_found_ttl > 0
    }

    /// Returns the configured login cookie, treating blank names as unset.
    pub fn custom_login_cookie(&self) -> Option<&str> {
        self.login_cookie
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
