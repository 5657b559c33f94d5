//! Cache event channel.
//!
//! Platform hooks become typed events. Adapters collect them while the
//! request is handled and hand them to the request cache, which applies them
//! in order.

use serde::{Deserialize, Serialize};

/// Something the platform or an extension reported during the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheEvent {
    // Content
    /// A content item was created, edited, trashed or deleted.
    ContentChanged { content_id: u64 },
    /// An extension asked for one content item to be purged by its own tag.
    SingleContentPurged { content_id: u64 },
    /// A comment count changed; feeds list comment counts.
    CommentCountChanged,

    // Visitor
    /// Login or logout completed during this request.
    LoginStateChanged { logged_in: bool },
    CommentPosted {
        #[serde(default)]
        registered: bool,
    },

    // Extensions
    /// A recent-posts widget was rendered into the page.
    RecentPostsWidgetRendered,
    AddCacheTags { tags: Vec<String> },
    AddPurgeTags { tags: Vec<String> },
    /// The response varies on an extension-owned cookie.
    AddVaryCookie { name: String },
    /// A cacheability vote from a named handler.
    Veto { handler: String, cacheable: bool },
    MarkNonCacheable,
    UseFrontPageTtl,
    /// The body is device-specific.
    MarkMobile,
}

/// Events collected for one request, in arrival order.
///
/// Handlers attach this to their response extensions for the middleware.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEvents(Vec<CacheEvent>);

impl CacheEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: CacheEvent) {
        self.0.push(event);
    }

    pub fn with(mut self, event: CacheEvent) -> Self {
        self.push(event);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl IntoIterator for CacheEvents {
    type Item = CacheEvent;
    type IntoIter = std::vec::IntoIter<CacheEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<CacheEvent> for CacheEvents {
    fn from_iter<I: IntoIterator<Item = CacheEvent>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
