//! Request scenarios.
//!
//! A scenario file describes one request end to end: the facts the platform
//! would report, the content directory behind the site and the events raised
//! while rendering. The binary replays scenarios through [`RequestCache`] so
//! a configuration can be checked without a proxy in front of it.
//!
//! ```toml
//! now = "2024-06-01T12:00:00Z"
//!
//! [request]
//! uri = "/hello-world/"
//! page = { view = { type = "singular", id = 7 } }
//!
//! [[events]]
//! kind = "content_changed"
//! content_id = 7
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::cache::{
    CacheConfig, CacheEvent, CacheMode, Emission, Notice, RequestCache, StaticDirectory, TagSet,
    purge_tags_for,
};
use crate::domain::request::RequestFacts;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One request replayed through the decision pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Clock used for cookie expiry and the footer; defaults to the wall clock.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub now: Option<OffsetDateTime>,
    pub request: RequestFacts,
    #[serde(default)]
    pub directory: StaticDirectory,
    #[serde(default)]
    pub events: Vec<CacheEvent>,
}

impl Scenario {
    pub fn from_path(path: &Path) -> Result<Self, ScenarioError> {
        let raw = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(raw)?)
    }

    /// Run the request and return what would be written to the response.
    pub fn decide(&self, config: &CacheConfig) -> Emission {
        let now = self.now.unwrap_or_else(OffsetDateTime::now_utc);
        debug!(uri = %self.request.uri, events = self.events.len(), "replaying scenario");

        let mut cache = RequestCache::begin(config, &self.directory, self.request.clone(), now);
        cache.dispatch_all(self.events.iter().cloned());
        cache.finish()
    }

    /// Purge tags a change to `content_id` would produce, unprefixed.
    pub fn purge_tags(&self, config: &CacheConfig, content_id: u64) -> TagSet {
        purge_tags_for(config, &self.directory, content_id)
    }
}

/// Printable summary of an [`Emission`].
#[derive(Debug, Clone, Serialize)]
pub struct DecisionReport {
    pub mode: String,
    pub headers: Vec<String>,
    pub cookies: Vec<String>,
    pub footer: Option<String>,
    pub notices: Vec<Notice>,
    pub reason: Option<String>,
}

impl From<&Emission> for DecisionReport {
    fn from(emission: &Emission) -> Self {
        Self {
            mode: emission.mode.as_str().to_string(),
            headers: emission.lines(),
            cookies: emission
                .cookies
                .iter()
                .map(|cookie| format!("Set-Cookie: {}", cookie.to_header_value()))
                .collect(),
            footer: emission.footer.clone(),
            notices: emission.notices.clone(),
            reason: emission.reason.clone(),
        }
    }
}

impl DecisionReport {
    pub fn is_cached(&self) -> bool {
        self.mode == CacheMode::Cache.as_str()
    }

    /// Plain-text rendering: header lines, cookies, then the footer.
    pub fn to_text(&self) -> String {
        let mut lines = self.headers.clone();
        lines.extend(self.cookies.iter().cloned());
        if let Some(reason) = &self.reason {
            lines.push(format!("# not cached: {reason}"));
        }
        for notice in &self.notices {
            lines.push(format!("# {:?}: {}", notice.level, notice.message));
        }
        if let Some(footer) = &self.footer {
            lines.push(footer.clone());
        }
        lines.join("\n")
    }
}
