//! Request facts handed to the decision core.
//!
//! The platform adapter fills a [`RequestFacts`] once per request. The core
//! never reaches for ambient state: anything it needs to know about the
//! request, the rendered view or the visitor lives here.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::Date;

use super::types::{DateGranularity, NetworkToken, PurgeBySelector};

/// Prefix of the cookies the platform leaves on anonymous commenters.
pub const COMMENT_AUTHOR_COOKIE_PREFIX: &str = "comment_author_";

const SAFE_METHOD: &str = "GET";

static MOBILE_AGENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Mobile|Android|Silk/|Kindle|BlackBerry|Opera Mini|Opera Mobi")
        .expect("valid mobile agent pattern")
});

/// What kind of view the platform rendered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum View {
    /// A single content item; `page` marks hierarchical pages.
    Singular {
        id: u64,
        #[serde(default)]
        page: bool,
    },
    /// Category, tag or custom taxonomy archive.
    TermArchive { term_id: u64 },
    PostTypeArchive { post_type: String },
    AuthorArchive { author_id: u64 },
    DateArchive {
        granularity: DateGranularity,
        date: Date,
    },
    /// The posts index.
    Home,
    Feed,
    Search,
    Trackback,
    NotFound,
    Login,
    #[default]
    Other,
}

/// Taxonomy and access facts about the entity being rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitySummary {
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub password_protected: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageContext {
    pub view: View,
    /// The site's designated front page, whatever its view.
    pub front_page: bool,
    pub entity: Option<EntitySummary>,
}

/// Hints the proxy forwards about its own vary configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamHints {
    /// Comma-separated cookie names the proxy already varies on.
    pub vary_cookie: Option<String>,
    /// Explicit vary discriminator, `ismobile` for the mobile partition.
    pub vary_value: Option<String>,
}

impl UpstreamHints {
    pub fn expects_mobile(&self) -> bool {
        self.vary_value.as_deref() == Some("ismobile")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminContext {
    pub site_admin: bool,
    pub network_admin: bool,
}

impl AdminContext {
    pub fn any(self) -> bool {
        self.site_admin || self.network_admin
    }
}

/// Multi-tenant identity of the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantContext {
    pub id: u64,
    /// Sub-path the tenant is mounted on.
    pub path: String,
    pub multi_tenant: bool,
}

impl Default for TenantContext {
    fn default() -> Self {
        Self {
            id: 1,
            path: "/".to_string(),
            multi_tenant: false,
        }
    }
}

/// Operator control action carried by the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    Purge,
    PurgeSingle,
    ShowHeaders,
    NoCache,
    PurgeFront,
    PurgePages,
    PurgeErrors {
        #[serde(default)]
        include: Vec<u16>,
    },
    PurgeAll,
    PurgeEmptyCache,
    PurgeBy {
        selector: PurgeBySelector,
        list: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFacts {
    #[serde(default = "default_method")]
    pub method: String,
    /// Request target as received: path plus optional query.
    pub uri: String,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub page: PageContext,
    /// Status the platform set on the response, if any.
    #[serde(default)]
    pub status: Option<u16>,
    /// Platform or extension flagged a device-specific body.
    #[serde(default)]
    pub mobile: bool,
    #[serde(default)]
    pub upstream: UpstreamHints,
    #[serde(default)]
    pub admin: AdminContext,
    #[serde(default)]
    pub tenant: TenantContext,
    #[serde(default)]
    pub logged_in: bool,
    /// Internal subrequest (ajax-style); no footer comment is written.
    #[serde(default)]
    pub ajax: bool,
    /// Served over TLS; vary cookies are marked secure.
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub forced_no_cache: bool,
    #[serde(default)]
    pub action: Option<ControlAction>,
    #[serde(default)]
    pub network_token: Option<NetworkToken>,
}

fn default_method() -> String {
    SAFE_METHOD.to_string()
}

impl RequestFacts {
    /// Facts for a plain anonymous request to `uri`.
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            uri: uri.into(),
            cookies: BTreeMap::new(),
            user_agent: None,
            page: PageContext::default(),
            status: None,
            mobile: false,
            upstream: UpstreamHints::default(),
            admin: AdminContext::default(),
            tenant: TenantContext::default(),
            logged_in: false,
            ajax: false,
            secure: false,
            forced_no_cache: false,
            action: None,
            network_token: None,
        }
    }

    pub fn is_safe_method(&self) -> bool {
        self.method == SAFE_METHOD
    }

    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or_default()
    }

    pub fn has_query(&self) -> bool {
        self.uri
            .split_once('?')
            .is_some_and(|(_, query)| !query.is_empty())
    }

    /// Path with the tenant's mount point folded back to `/`.
    pub fn tenant_relative_path(&self) -> &str {
        let path = self.path();
        if !self.tenant.multi_tenant {
            return path;
        }
        let mount = self.tenant.path.trim_end_matches('/');
        if mount.is_empty() {
            return path;
        }
        match path.strip_prefix(mount) {
            Some("") => "/",
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        }
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn has_comment_author_cookie(&self) -> bool {
        self.cookies
            .keys()
            .any(|name| name.starts_with(COMMENT_AUTHOR_COOKIE_PREFIX))
    }

    pub fn is_feed(&self) -> bool {
        matches!(self.page.view, View::Feed)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.page.view, View::NotFound) || self.status == Some(404)
    }

    pub fn is_mobile_agent(&self) -> bool {
        self.user_agent
            .as_deref()
            .is_some_and(|agent| MOBILE_AGENT.is_match(agent))
    }
}

/// Split a `Cookie` request header into name/value pairs.
///
/// Pairs without `=` are kept with an empty value; later duplicates win.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
