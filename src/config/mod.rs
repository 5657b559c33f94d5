//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, PurgeTriggers};

mod cli;

pub use cli::{CliArgs, Command, DecideArgs, PurgeTagsArgs, SettingsOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "edgecache";
const ENV_PREFIX: &str = "EDGECACHE";
const LIST_KEYS: [&str; 4] = [
    "cache.excluded_uris",
    "cache.excluded_categories",
    "cache.excluded_tags",
    "cache.excluded_cookies",
];

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    let mut environment = Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
        .list_separator(",");
    for key in LIST_KEYS {
        environment = environment.with_list_parse_key(key);
    }
    builder = builder.add_source(environment);

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &SettingsOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(prefix) = overrides.tag_prefix.as_ref() {
            self.cache.tag_prefix = Some(prefix.clone());
        }
        if let Some(diagnostics) = overrides.diagnostics {
            self.cache.diagnostics = Some(diagnostics);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();
    let default_triggers = PurgeTriggers::default();

    let excluded_user_agents = match non_blank(cache.excluded_user_agents) {
        Some(pattern) => Some(Regex::new(&pattern).map_err(|err| {
            LoadError::invalid("cache.excluded_user_agents", format!("invalid pattern: {err}"))
        })?),
        None => None,
    };

    let cookie_path = non_blank(cache.cookie_path).unwrap_or(defaults.cookie_path);
    if !cookie_path.starts_with('/') {
        return Err(LoadError::invalid(
            "cache.cookie_path",
            "must start with `/`",
        ));
    }

    let password_cookie = non_blank(cache.password_cookie).unwrap_or(defaults.password_cookie);
    if password_cookie.contains(['=', ';', ' ']) {
        return Err(LoadError::invalid(
            "cache.password_cookie",
            "must be a plain cookie name",
        ));
    }

    let purge_triggers = PurgeTriggers {
        front_page: cache.purge_front_page.unwrap_or(default_triggers.front_page),
        home_page: cache.purge_home_page.unwrap_or(default_triggers.home_page),
        pages: cache.purge_pages.unwrap_or(default_triggers.pages),
        pages_with_recent_posts: cache
            .purge_pages_with_recent_posts
            .unwrap_or(default_triggers.pages_with_recent_posts),
        author: cache.purge_author.unwrap_or(default_triggers.author),
        terms: cache.purge_terms.unwrap_or(default_triggers.terms),
        post_type: cache.purge_post_type.unwrap_or(default_triggers.post_type),
        date: cache.purge_date.unwrap_or(default_triggers.date),
        month: cache.purge_month.unwrap_or(default_triggers.month),
        year: cache.purge_year.unwrap_or(default_triggers.year),
    };

    Ok(CacheConfig {
        public_ttl: cache.public_ttl.unwrap_or(defaults.public_ttl),
        front_page_ttl: cache.front_page_ttl.unwrap_or(defaults.front_page_ttl),
        feed_ttl: cache.feed_ttl.unwrap_or(defaults.feed_ttl),
        not_found_ttl: cache.not_found_ttl.unwrap_or(defaults.not_found_ttl),
        forbidden_ttl: cache.forbidden_ttl.unwrap_or(defaults.forbidden_ttl),
        server_error_ttl: cache.server_error_ttl.unwrap_or(defaults.server_error_ttl),
        excluded_uris: clean_list(cache.excluded_uris),
        excluded_categories: clean_list(cache.excluded_categories),
        excluded_tags: clean_list(cache.excluded_tags),
        excluded_cookies: clean_list(cache.excluded_cookies),
        excluded_user_agents,
        login_cookie: non_blank(cache.login_cookie),
        tag_prefix: cache
            .tag_prefix
            .map(|prefix| prefix.trim().to_string())
            .unwrap_or(defaults.tag_prefix),
        mobile_view: cache.mobile_view.unwrap_or(defaults.mobile_view),
        purge_all_on_change: cache
            .purge_all_on_change
            .unwrap_or(defaults.purge_all_on_change),
        purge_triggers,
        cache_commenters: cache.cache_commenters.unwrap_or(defaults.cache_commenters),
        cache_login_page: cache.cache_login_page.unwrap_or(defaults.cache_login_page),
        password_cookie,
        cookie_path,
        cookie_domain: non_blank(cache.cookie_domain),
        diagnostics: cache.diagnostics.unwrap_or(defaults.diagnostics),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    public_ttl: Option<u32>,
    front_page_ttl: Option<u32>,
    feed_ttl: Option<u32>,
    not_found_ttl: Option<u32>,
    forbidden_ttl: Option<u32>,
    server_error_ttl: Option<u32>,
    excluded_uris: Vec<String>,
    excluded_categories: Vec<String>,
    excluded_tags: Vec<String>,
    excluded_cookies: Vec<String>,
    excluded_user_agents: Option<String>,
    login_cookie: Option<String>,
    tag_prefix: Option<String>,
    mobile_view: Option<bool>,
    purge_all_on_change: Option<bool>,
    purge_front_page: Option<bool>,
    purge_home_page: Option<bool>,
    purge_pages: Option<bool>,
    purge_pages_with_recent_posts: Option<bool>,
    purge_author: Option<bool>,
    purge_terms: Option<bool>,
    purge_post_type: Option<bool>,
    purge_date: Option<bool>,
    purge_month: Option<bool>,
    purge_year: Option<bool>,
    cache_commenters: Option<bool>,
    cache_login_page: Option<bool>,
    password_cookie: Option<String>,
    cookie_path: Option<String>,
    cookie_domain: Option<String>,
    diagnostics: Option<bool>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn clean_list(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
