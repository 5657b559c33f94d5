//! Edge cache decision core.
//!
//! Decides, per request, how an upstream caching proxy should treat the
//! response:
//!
//! - **Cacheability**: configured exclusions, third-party votes and visitor
//!   state decide whether the response is a cache candidate
//! - **Tags**: responses are tagged by the content they show; content changes
//!   map to the tags that must be purged
//! - **Vary**: a bitmask cookie partitions logged-in visitors and commenters
//!   away from the anonymous cache
//!
//! The outcome is rendered as `X-LiteSpeed-*` response headers.
//!
//! ## Configuration
//!
//! Cache behavior is controlled via `edgecache.toml`:
//!
//! ```toml
//! [cache]
//! public_ttl = 28800
//! front_page_ttl = 1800
//! excluded_uris = ["/cart/", "/checkout$"]
//! # ... see config.rs for all options
//! ```

mod config;
mod controller;
mod directory;
mod emitter;
mod evaluator;
mod events;
mod middleware;
mod mode;
mod purge;
mod state;
mod tags;
mod vary;

/// Tracing target for the per-request diagnostic trail.
pub(crate) const DIAGNOSTICS: &str = "edgecache::diagnostics";

pub use config::{CacheConfig, MIN_ERROR_TTL, PurgeTriggers};
pub use controller::{
    METRIC_DECISION_TOTAL, METRIC_PURGE_TAGS_TOTAL, METRIC_VARY_MISMATCH_TOTAL, RequestCache,
};
pub use directory::{SiteDirectory, StaticDirectory, TermEntry};
pub use emitter::{
    Emission, HEADER_CACHE_CONTROL, HEADER_DEBUG, HEADER_PURGE, HEADER_TAG, HEADER_VARY,
    HeaderProtocolEmitter,
};
pub use evaluator::{CacheabilityEvaluator, Rejection, ThirdPartyVeto, Verdict, is_uri_excluded};
pub use events::{CacheEvent, CacheEvents};
pub use middleware::{
    EdgeCacheState, HEADER_VARY_COOKIE, HEADER_VARY_VALUE, PageFacts, edge_cache_layer,
    facts_from_request,
};
pub use mode::{CacheControl, CacheMode, ModeContext, ModeFlags, resolve_mode};
pub use purge::{
    Notice, NoticeLevel, PurgeByError, PurgeByOutcome, apply_action, resolve_purge_by,
};
pub use state::CacheControlState;
pub use tags::{
    PurgeScope, TagAggregator, TagPrefix, TagSet, cache_tags_for_request, purge_tags_for,
    scoped_purge_tags,
};
pub use vary::{
    BitUpdate, COMMENTER_BIT, CookieUpdate, DEFAULT_VARY_COOKIE, LOGGED_IN_BIT, Reconciliation,
    VaryCookieCoordinator, reconcile,
};
