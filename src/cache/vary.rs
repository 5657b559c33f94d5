//! Vary-cookie coordination.
//!
//! The proxy partitions its cache by the value of one cookie holding a small
//! bitmask: bit 1 marks an authenticated visitor, bit 2 a commenter. The
//! server never stores this value; it only reads what the client sent and
//! instructs the client how to update it.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};
use tracing::debug;

/// Vary cookie used when the site configures none, or a mismatched one.
pub const DEFAULT_VARY_COOKIE: &str = "_lscache_vary";

pub const LOGGED_IN_BIT: u32 = 1;
pub const COMMENTER_BIT: u32 = 2;

/// Expiry used to delete a cookie; a full year back covers skewed clocks.
const EXPIRED_OFFSET: Duration = Duration::seconds(31_536_001);

/// Lifetime of anonymous-visitor cookie updates.
pub const VISITOR_COOKIE_LIFETIME: Duration = Duration::seconds(30_000_000);
pub const LOGIN_COOKIE_LIFETIME: Duration = Duration::days(2);
pub const COMMENTER_RESET_LIFETIME: Duration = Duration::days(14);

const COOKIE_DATE_FORMAT: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Outcome of reconciling the proxy's vary list with the site configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub cookie_name: String,
    /// The proxy does not vary on the configured login cookie.
    pub bad_cookie: bool,
}

/// Decide which cookie name is in effect for this request.
///
/// `server_vary` is the comma-separated list of cookie names the proxy
/// reported, `None` when it reported nothing. `configured` is the site's
/// custom login cookie. A mismatch is soft: the default name is used and the
/// request carries on.
pub fn reconcile(server_vary: Option<&str>, configured: Option<&str>) -> Reconciliation {
    let configured = configured.map(str::trim).filter(|name| !name.is_empty());

    let Some(server_vary) = server_vary else {
        return Reconciliation {
            cookie_name: DEFAULT_VARY_COOKIE.to_string(),
            bad_cookie: configured.is_some(),
        };
    };

    let Some(configured) = configured else {
        return Reconciliation {
            cookie_name: DEFAULT_VARY_COOKIE.to_string(),
            bad_cookie: false,
        };
    };

    if server_vary.split(',').map(str::trim).any(|name| name == configured) {
        Reconciliation {
            cookie_name: configured.to_string(),
            bad_cookie: false,
        }
    } else {
        Reconciliation {
            cookie_name: DEFAULT_VARY_COOKIE.to_string(),
            bad_cookie: true,
        }
    }
}

/// One bitmask change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitUpdate {
    Set(u32),
    Clear(u32),
}

impl BitUpdate {
    /// New value, and whether the cookie should be deleted instead of written.
    pub fn apply(self, current: u32) -> (u32, bool) {
        match self {
            BitUpdate::Set(bits) => (current | bits, false),
            BitUpdate::Clear(bits) => {
                let value = current & !bits;
                (value, value == 0)
            }
        }
    }
}

/// Instruction for the client to write or delete the vary cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieUpdate {
    pub name: String,
    pub value: u32,
    pub expires: OffsetDateTime,
    pub secure: bool,
    pub http_only: bool,
    pub path: String,
    pub domain: Option<String>,
    /// The expiry lies in the past; the client drops the cookie.
    pub deleted: bool,
}

impl CookieUpdate {
    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut header = format!("{}={}", self.name, self.value);
        if let Ok(stamp) = self
            .expires
            .to_offset(UtcOffset::UTC)
            .format(COOKIE_DATE_FORMAT)
        {
            header.push_str("; Expires=");
            header.push_str(&stamp);
        }
        header.push_str("; Path=");
        header.push_str(&self.path);
        if let Some(domain) = &self.domain {
            header.push_str("; Domain=");
            header.push_str(domain);
        }
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header
    }
}

/// Read a cookie value the way the platform does: leading digits, else 0.
pub fn parse_cookie_value(raw: &str) -> u32 {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

/// Per-request owner of the vary cookie.
#[derive(Debug, Clone)]
pub struct VaryCookieCoordinator {
    name: String,
    bad_cookie: bool,
    current: Option<u32>,
    pending: Option<CookieUpdate>,
    path: String,
    domain: Option<String>,
    now: OffsetDateTime,
}

impl VaryCookieCoordinator {
    /// `sent` is the raw value the client sent for the effective cookie name.
    pub fn new(
        reconciliation: Reconciliation,
        sent: Option<&str>,
        path: &str,
        domain: Option<&str>,
        now: OffsetDateTime,
    ) -> Self {
        if reconciliation.bad_cookie {
            debug!(
                cookie = %reconciliation.cookie_name,
                "proxy does not vary on the configured login cookie"
            );
        }
        Self {
            current: sent.map(parse_cookie_value),
            name: reconciliation.cookie_name,
            bad_cookie: reconciliation.bad_cookie,
            pending: None,
            path: path.to_string(),
            domain: domain.map(str::to_string),
            now,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bad(&self) -> bool {
        self.bad_cookie
    }

    pub fn is_present(&self) -> bool {
        self.current.is_some()
    }

    pub fn value(&self) -> u32 {
        self.current.unwrap_or(0)
    }

    pub fn has_bit(&self, bit: u32) -> bool {
        self.value() & bit != 0
    }

    /// Apply one update and queue the matching cookie instruction.
    ///
    /// Clearing down to zero deletes the cookie rather than writing `0`: a
    /// zero-valued cookie would still count as present to the proxy.
    pub fn set_bit(
        &mut self,
        update: BitUpdate,
        expires: OffsetDateTime,
        secure: bool,
        http_only: bool,
    ) -> &CookieUpdate {
        let (value, deleted) = update.apply(self.value());
        let expires = if deleted {
            self.now - EXPIRED_OFFSET
        } else {
            expires
        };

        debug!(cookie = %self.name, ?update, value, deleted, "vary cookie updated");

        self.current = if deleted { None } else { Some(value) };
        self.pending.insert(CookieUpdate {
            name: self.name.clone(),
            value,
            expires,
            secure,
            http_only,
            path: self.path.clone(),
            domain: self.domain.clone(),
            deleted,
        })
    }

    /// Drop the local view of the cookie for the rest of the request.
    pub fn forget(&mut self) {
        self.current = None;
    }

    /// Keep the logged-in bit in line with the visitor's session.
    ///
    /// Returns whether the visitor is logged in.
    pub fn sync_login(&mut self, logged_in: bool, secure: bool) -> bool {
        if !logged_in {
            if self.has_bit(LOGGED_IN_BIT) {
                let expires = self.now + VISITOR_COOKIE_LIFETIME;
                self.set_bit(BitUpdate::Clear(LOGGED_IN_BIT), expires, false, false);
            }
            return false;
        }

        if !self.is_present() {
            let expires = self.now + LOGIN_COOKIE_LIFETIME;
            self.set_bit(BitUpdate::Set(LOGGED_IN_BIT), expires, secure, true);
        }
        true
    }

    /// Commenter handling for a logged-out visitor.
    ///
    /// Returns `true` when the visitor is a commenter and commenters are not
    /// cached.
    pub fn sync_commenter(&mut self, cache_commenters: bool, comment_author_cookie: bool) -> bool {
        if !cache_commenters {
            if self.has_bit(COMMENTER_BIT) {
                return true;
            }
            if comment_author_cookie {
                self.record_comment(false);
                return true;
            }
            return false;
        }

        if self.is_present() {
            let expires = self.now + COMMENTER_RESET_LIFETIME;
            self.set_bit(BitUpdate::Clear(COMMENTER_BIT), expires, false, false);
            self.forget();
        }
        false
    }

    /// Login or logout completed during this request.
    pub fn record_login_change(&mut self, logged_in: bool, secure: bool) {
        if logged_in {
            let expires = self.now + LOGIN_COOKIE_LIFETIME;
            self.set_bit(BitUpdate::Set(LOGGED_IN_BIT), expires, secure, true);
        } else {
            let expires = self.now + VISITOR_COOKIE_LIFETIME;
            self.set_bit(BitUpdate::Clear(LOGGED_IN_BIT), expires, false, false);
        }
    }

    /// A comment was posted; registered users are already partitioned.
    pub fn record_comment(&mut self, registered: bool) {
        if registered {
            return;
        }
        let expires = self.now + VISITOR_COOKIE_LIFETIME;
        self.set_bit(BitUpdate::Set(COMMENTER_BIT), expires, false, false);
    }

    pub fn pending(&self) -> Option<&CookieUpdate> {
        self.pending.as_ref()
    }

    pub fn into_update(self) -> Option<CookieUpdate> {
        self.pending
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    fn coordinator(sent: Option<&str>) -> VaryCookieCoordinator {
        VaryCookieCoordinator::new(reconcile(None, None), sent, "/", None, NOW)
    }

    #[test]
    fn reconcile_without_server_header() {
        assert_eq!(
            reconcile(None, None),
            Reconciliation {
                cookie_name: DEFAULT_VARY_COOKIE.to_string(),
                bad_cookie: false,
            }
        );
        assert_eq!(
            reconcile(None, Some("wp_login")),
            Reconciliation {
                cookie_name: DEFAULT_VARY_COOKIE.to_string(),
                bad_cookie: true,
            }
        );
        // blank configured names count as unconfigured
        assert!(!reconcile(None, Some("  ")).bad_cookie);
    }

    #[test]
    fn mismatch_does_not_log_warnings_per_request() {
        use std::sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        };
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

        struct WarningCounter(Arc<AtomicUsize>);

        impl<S: Subscriber> Layer<S> for WarningCounter {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                if *event.metadata().level() <= Level::WARN {
                    self.0.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarningCounter(warnings.clone()));
        let coordinator = tracing::subscriber::with_default(subscriber, || {
            VaryCookieCoordinator::new(reconcile(None, Some("wp_login")), None, "/", None, NOW)
        });

        assert!(coordinator.is_bad());
        assert_eq!(warnings.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reconcile_with_server_header_and_no_configured_name() {
        for server in ["", "_lscache_vary", "a,b"] {
            let result = reconcile(Some(server), None);
            assert_eq!(result.cookie_name, DEFAULT_VARY_COOKIE);
            assert!(!result.bad_cookie, "server list {server:?}");
        }
    }

    #[test]
    fn reconcile_with_matching_list() {
        let result = reconcile(Some("_lscache_vary, wp_login"), Some("wp_login"));
        assert_eq!(result.cookie_name, "wp_login");
        assert!(!result.bad_cookie);

        let result = reconcile(Some("wp_login"), Some("wp_login"));
        assert_eq!(result.cookie_name, "wp_login");
        assert!(!result.bad_cookie);
    }

    #[test]
    fn reconcile_with_mismatched_list() {
        for server in ["", "_lscache_vary", "wp_login_other,x"] {
            let result = reconcile(Some(server), Some("wp_login"));
            assert_eq!(result.cookie_name, DEFAULT_VARY_COOKIE);
            assert!(result.bad_cookie, "server list {server:?}");
        }
    }

    #[test]
    fn cookie_values_parse_like_the_platform() {
        assert_eq!(parse_cookie_value("3"), 3);
        assert_eq!(parse_cookie_value("2abc"), 2);
        assert_eq!(parse_cookie_value("abc"), 0);
        assert_eq!(parse_cookie_value(""), 0);
        assert_eq!(parse_cookie_value("-1"), 0);
    }

    #[test]
    fn set_then_clear_round_trip() {
        for initial in [4_u32, 5, 8, 12] {
            let (set, deleted) = BitUpdate::Set(COMMENTER_BIT).apply(initial);
            assert!(!deleted);
            let (cleared, deleted) = BitUpdate::Clear(COMMENTER_BIT).apply(set);
            assert_eq!(cleared, initial);
            assert!(!deleted);
        }
    }

    #[test]
    fn clearing_to_zero_deletes() {
        let (value, deleted) = BitUpdate::Clear(LOGGED_IN_BIT).apply(LOGGED_IN_BIT);
        assert_eq!(value, 0);
        assert!(deleted);

        let (_, deleted) = BitUpdate::Clear(LOGGED_IN_BIT).apply(0);
        assert!(deleted);
    }

    #[test]
    fn deleted_cookie_expires_in_the_past() {
        let mut vary = coordinator(Some("1"));
        let update = vary
            .set_bit(
                BitUpdate::Clear(LOGGED_IN_BIT),
                NOW + VISITOR_COOKIE_LIFETIME,
                false,
                false,
            )
            .clone();
        assert!(update.deleted);
        assert_eq!(update.expires, NOW - EXPIRED_OFFSET);
        assert!(!vary.is_present());
    }

    #[test]
    fn logged_out_visitor_loses_logged_in_bit() {
        let mut vary = coordinator(Some("3"));
        assert!(!vary.sync_login(false, false));

        let update = vary.pending().expect("cookie update");
        assert_eq!(update.value, COMMENTER_BIT);
        assert!(!update.deleted);
        assert_eq!(update.expires, NOW + VISITOR_COOKIE_LIFETIME);
        assert_eq!(vary.value(), COMMENTER_BIT);
    }

    #[test]
    fn logged_in_visitor_without_cookie_gets_one() {
        let mut vary = coordinator(None);
        assert!(vary.sync_login(true, true));

        let update = vary.pending().expect("cookie update");
        assert_eq!(update.value, LOGGED_IN_BIT);
        assert!(update.secure);
        assert!(update.http_only);
        assert_eq!(update.expires, NOW + LOGIN_COOKIE_LIFETIME);

        let mut vary = coordinator(Some("1"));
        assert!(vary.sync_login(true, true));
        assert!(vary.pending().is_none());
    }

    #[test]
    fn uncached_commenters_are_detected() {
        let mut vary = coordinator(Some("2"));
        assert!(vary.sync_commenter(false, false));
        assert!(vary.pending().is_none());

        let mut vary = coordinator(None);
        assert!(vary.sync_commenter(false, true));
        assert_eq!(vary.pending().map(|update| update.value), Some(COMMENTER_BIT));

        let mut vary = coordinator(None);
        assert!(!vary.sync_commenter(false, false));
    }

    #[test]
    fn cached_commenters_have_the_bit_removed() {
        let mut vary = coordinator(Some("2"));
        assert!(!vary.sync_commenter(true, true));
        let update = vary.pending().expect("cookie update");
        assert!(update.deleted);
        assert!(!vary.is_present());
    }

    #[test]
    fn registered_commenters_are_not_marked() {
        let mut vary = coordinator(None);
        vary.record_comment(true);
        assert!(vary.pending().is_none());
    }

    #[test]
    fn header_value_formatting() {
        let update = CookieUpdate {
            name: DEFAULT_VARY_COOKIE.to_string(),
            value: 1,
            expires: datetime!(2024-06-03 12:00 UTC),
            secure: true,
            http_only: true,
            path: "/".to_string(),
            domain: Some("example.test".to_string()),
            deleted: false,
        };
        assert_eq!(
            update.to_header_value(),
            "_lscache_vary=1; Expires=Mon, 03 Jun 2024 12:00:00 GMT; Path=/; \
             Domain=example.test; Secure; HttpOnly"
        );
    }
}
