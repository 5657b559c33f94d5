//! Per-request cache-control state.

use tracing::debug;

use super::config::{CacheConfig, MIN_ERROR_TTL};
use super::mode::{CacheControl, CacheMode};
use super::tags::{TagAggregator, TagPrefix};

/// Mutable state one request accumulates until its headers are emitted.
#[derive(Debug, Clone)]
pub struct CacheControlState {
    control: CacheControl,
    error_status: Option<u16>,
    non_cacheable: bool,
    use_front_page_ttl: bool,
    platform_mobile: bool,
    tags: TagAggregator,
    vary_cookies: Vec<String>,
    prefix: TagPrefix,
    vary_cookie_name: String,
}

impl CacheControlState {
    pub fn new(prefix: TagPrefix, vary_cookie_name: impl Into<String>) -> Self {
        Self {
            control: CacheControl::default(),
            error_status: None,
            non_cacheable: false,
            use_front_page_ttl: false,
            platform_mobile: false,
            tags: TagAggregator::default(),
            vary_cookies: Vec::new(),
            prefix,
            vary_cookie_name: vary_cookie_name.into(),
        }
    }

    pub fn control(&self) -> CacheControl {
        self.control
    }

    pub fn mode(&self) -> CacheMode {
        self.control.mode
    }

    /// Replace the primary mode, keeping the flags.
    pub fn set_mode(&mut self, mode: CacheMode) {
        self.control.mode = mode;
    }

    pub fn show_headers(&mut self) {
        self.control.flags.show_headers = true;
    }

    pub fn mark_stale(&mut self) {
        self.control.flags.stale = true;
    }

    /// Capture the status the platform set on the response.
    ///
    /// Error classes whose TTL is too short to be worth caching make the
    /// request non-cacheable instead.
    pub fn record_status(&mut self, code: u16, config: &CacheConfig) {
        match code {
            403 if config.forbidden_ttl <= MIN_ERROR_TTL => self.mark_non_cacheable(),
            500..=599 if config.server_error_ttl <= MIN_ERROR_TTL => self.mark_non_cacheable(),
            403 | 500..=599 => self.error_status = Some(code),
            code if code > 400 => self.error_status = Some(code),
            _ => {}
        }
        debug!(code, error_status = ?self.error_status, non_cacheable = self.non_cacheable, "response status recorded");
    }

    pub fn error_status(&self) -> Option<u16> {
        self.error_status
    }

    pub fn mark_non_cacheable(&mut self) {
        self.non_cacheable = true;
    }

    pub fn is_non_cacheable(&self) -> bool {
        self.non_cacheable
    }

    /// An extension asked for the front-page TTL on this response.
    pub fn request_front_page_ttl(&mut self) {
        self.use_front_page_ttl = true;
    }

    pub fn uses_front_page_ttl(&self) -> bool {
        self.use_front_page_ttl
    }

    pub fn mark_mobile(&mut self) {
        self.platform_mobile = true;
    }

    pub fn is_platform_mobile(&self) -> bool {
        self.platform_mobile
    }

    pub fn tags(&self) -> &TagAggregator {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagAggregator {
        &mut self.tags
    }

    pub fn add_vary_cookie(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.vary_cookies.contains(&name) {
            self.vary_cookies.push(name);
        }
    }

    pub fn vary_cookies(&self) -> &[String] {
        &self.vary_cookies
    }

    pub fn prefix(&self) -> &TagPrefix {
        &self.prefix
    }

    pub fn vary_cookie_name(&self) -> &str {
        &self.vary_cookie_name
    }
}
