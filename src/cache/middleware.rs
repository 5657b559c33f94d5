//! Edge cache response middleware.
//!
//! Runs the handler, gathers the request facts from the request headers and
//! the [`PageFacts`] / [`CacheEvents`] the handler left in the response
//! extensions, then writes the cache directives onto the response.

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{
        HeaderMap, HeaderValue, Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use super::{CacheConfig, CacheEvents, RequestCache, SiteDirectory};
use crate::domain::request::{
    AdminContext, ControlAction, PageContext, RequestFacts, TenantContext, parse_cookie_header,
};
use crate::domain::types::NetworkToken;

/// Upstream-supplied list of cookies the proxy varies on.
pub const HEADER_VARY_COOKIE: &str = "x-lscache-vary-cookie";
/// Upstream-supplied vary discriminator.
pub const HEADER_VARY_VALUE: &str = "x-lscache-vary-value";
const HEADER_REQUESTED_WITH: &str = "x-requested-with";
const HEADER_FORWARDED_PROTO: &str = "x-forwarded-proto";

const BODY_LIMIT: usize = 1024 * 1024;

/// Shared state for the middleware.
#[derive(Clone)]
pub struct EdgeCacheState {
    pub config: Arc<CacheConfig>,
    pub directory: Arc<dyn SiteDirectory>,
}

/// What the handler knows about the rendered page and its visitor.
///
/// Handlers insert this into the response extensions; absent fields keep
/// their anonymous defaults.
#[derive(Debug, Clone, Default)]
pub struct PageFacts {
    pub page: PageContext,
    pub logged_in: bool,
    pub admin: AdminContext,
    pub tenant: TenantContext,
    pub mobile: bool,
    pub forced_no_cache: bool,
    pub action: Option<ControlAction>,
    pub network_token: Option<NetworkToken>,
}

/// Middleware writing the edge cache directives.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn edge_cache_layer(
    State(cache): State<EdgeCacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut facts = facts_from_request(&request);

    let mut response = next.run(request).await;

    if let Some(page) = response.extensions_mut().remove::<PageFacts>() {
        merge_page_facts(&mut facts, page);
    }
    let events = response
        .extensions_mut()
        .remove::<CacheEvents>()
        .unwrap_or_default();
    facts.status = Some(response.status().as_u16());

    let mut request_cache = RequestCache::begin(
        &cache.config,
        cache.directory.as_ref(),
        facts,
        OffsetDateTime::now_utc(),
    );
    request_cache.dispatch_all(events);
    let emission = request_cache.finish();

    let headers = response.headers_mut();
    for (name, value) in &emission.headers {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.append(*name, value);
            }
            Err(_) => warn!(header = *name, "dropping directive with invalid header value"),
        }
    }
    for cookie in &emission.cookies {
        if let Ok(value) = HeaderValue::from_str(&cookie.to_header_value()) {
            headers.append(SET_COOKIE, value);
        }
    }

    match emission.footer {
        Some(footer) if is_html(response.headers()) && footer_fits(response.body()) => {
            append_footer(response, &footer).await
        }
        Some(_) => {
            debug!("footer skipped");
            response
        }
        None => response,
    }
}

/// Facts readable from the request alone.
pub fn facts_from_request<B>(request: &Request<B>) -> RequestFacts {
    let headers = request.headers();
    let uri = request
        .uri()
        .path_and_query()
        .map(|target| target.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut facts = RequestFacts::get(uri);
    facts.method = request.method().as_str().to_string();
    facts.cookies = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(parse_cookie_header)
        .collect();
    facts.user_agent = header_str(headers, USER_AGENT.as_str()).map(str::to_string);
    facts.upstream.vary_cookie = header_str(headers, HEADER_VARY_COOKIE).map(str::to_string);
    facts.upstream.vary_value = header_str(headers, HEADER_VARY_VALUE).map(str::to_string);
    facts.ajax = header_str(headers, HEADER_REQUESTED_WITH)
        .is_some_and(|value| value.eq_ignore_ascii_case("xmlhttprequest"));
    facts.secure = header_str(headers, HEADER_FORWARDED_PROTO)
        .is_some_and(|value| value.eq_ignore_ascii_case("https"));
    facts
}

fn merge_page_facts(facts: &mut RequestFacts, page: PageFacts) {
    facts.page = page.page;
    facts.logged_in = page.logged_in;
    facts.admin = page.admin;
    facts.tenant = page.tenant;
    facts.mobile = page.mobile;
    facts.forced_no_cache = page.forced_no_cache;
    facts.action = page.action;
    facts.network_token = page.network_token;
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn is_html(headers: &HeaderMap) -> bool {
    header_str(headers, CONTENT_TYPE.as_str()).is_some_and(|value| value.starts_with("text/html"))
}

/// Bodies of unknown or oversized length are streamed through untouched.
fn footer_fits(body: &Body) -> bool {
    body.size_hint()
        .upper()
        .is_some_and(|upper| upper <= BODY_LIMIT as u64)
}

async fn append_footer(response: Response, footer: &str) -> Response {
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to buffer body for footer");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut body = bytes.to_vec();
    body.extend_from_slice(footer.as_bytes());
    parts.headers.remove(CONTENT_LENGTH);
    debug!(bytes = body.len(), "footer appended");

    Response::from_parts(parts, Body::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facts_read_proxy_and_visitor_headers() {
        let request = Request::builder()
            .method("POST")
            .uri("/shop/?page=2")
            .header("cookie", "a=1; _lscache_vary=3")
            .header("user-agent", "Mozilla/5.0 (Linux; Android 14) Mobile")
            .header("x-lscache-vary-cookie", "_lscache_vary,custom")
            .header("x-lscache-vary-value", "ismobile")
            .header("x-requested-with", "XMLHttpRequest")
            .header("x-forwarded-proto", "https")
            .body(())
            .unwrap();

        let facts = facts_from_request(&request);
        assert_eq!(facts.method, "POST");
        assert_eq!(facts.uri, "/shop/?page=2");
        assert_eq!(facts.cookie("_lscache_vary"), Some("3"));
        assert_eq!(facts.cookie("a"), Some("1"));
        assert!(facts.is_mobile_agent());
        assert!(facts.upstream.expects_mobile());
        assert_eq!(
            facts.upstream.vary_cookie.as_deref(),
            Some("_lscache_vary,custom")
        );
        assert!(facts.ajax);
        assert!(facts.secure);
    }

    #[test]
    fn bare_request_is_anonymous_get() {
        let request = Request::builder().uri("/").body(()).unwrap();
        let facts = facts_from_request(&request);
        assert_eq!(facts, RequestFacts::get("/"));
    }

    #[test]
    fn html_detection_ignores_parameters() {
        let mut headers = HeaderMap::new();
        assert!(!is_html(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
        assert!(is_html(&headers));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_html(&headers));
    }

    #[test]
    fn footer_only_fits_bounded_bodies() {
        assert!(footer_fits(&Body::from("<p>hi</p>")));
        assert!(footer_fits(&Body::from(vec![b'x'; BODY_LIMIT])));
        assert!(!footer_fits(&Body::from(vec![b'x'; BODY_LIMIT + 1])));
    }
}
