//! Invalidation tags.
//!
//! A tag is a short type code followed by an identifier. The proxy stores the
//! tags of every cached response and drops all responses carrying a tag named
//! in a purge directive. Tags are plain values: two tags are the same tag when
//! their strings are equal.

use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Date, format_description::FormatItem, macros::format_description};

use super::types::DateGranularity;

/// Raw value of the "everything for this tenant" tag.
pub const WILDCARD: &str = "*";

const DAY_FORMAT: &[FormatItem<'static>] = format_description!("[year][month][day]");
const MONTH_FORMAT: &[FormatItem<'static>] = format_description!("[year][month]");
const YEAR_FORMAT: &[FormatItem<'static>] = format_description!("[year]");

/// Number of digest bytes kept for URL tags.
const URI_HASH_BYTES: usize = 16;

/// Tag type codes understood by the proxy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Post,
    Pages,
    FrontPage,
    Home,
    ArchiveTerm,
    ArchiveDate,
    ArchivePostType,
    Author,
    Feed,
    Error,
    Url,
    Login,
    PagesWithRecentPosts,
}

impl TagKind {
    pub fn code(self) -> &'static str {
        match self {
            TagKind::Post => "P.",
            TagKind::Pages => "PG",
            TagKind::FrontPage => "F",
            TagKind::Home => "H",
            TagKind::ArchiveTerm => "T.",
            TagKind::ArchiveDate => "D.",
            TagKind::ArchivePostType => "PT.",
            TagKind::Author => "A.",
            TagKind::Feed => "FD",
            TagKind::Error => "E.",
            TagKind::Url => "U.",
            TagKind::Login => "L",
            TagKind::PagesWithRecentPosts => "PR",
        }
    }
}

/// A single invalidation tag, unprefixed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Wrap an arbitrary tag supplied by an extension or an operator list.
    pub fn raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    /// A tag that carries only its type code.
    pub fn bare(kind: TagKind) -> Self {
        Self(kind.code().to_string())
    }

    pub fn with_id(kind: TagKind, id: impl fmt::Display) -> Self {
        Self(format!("{}{id}", kind.code()))
    }

    pub fn post(id: u64) -> Self {
        Self::with_id(TagKind::Post, id)
    }

    pub fn term(term_id: u64) -> Self {
        Self::with_id(TagKind::ArchiveTerm, term_id)
    }

    pub fn author(author_id: u64) -> Self {
        Self::with_id(TagKind::Author, author_id)
    }

    pub fn post_type(post_type: &str) -> Self {
        Self::with_id(TagKind::ArchivePostType, post_type)
    }

    pub fn error(status: u16) -> Self {
        Self::with_id(TagKind::Error, status)
    }

    /// URL tag for an address, or `None` when the address has no path part.
    pub fn url(uri: &str) -> Option<Self> {
        uri_hash(uri).map(|hash| Self::with_id(TagKind::Url, hash))
    }

    pub fn archive_date(date: Date, granularity: DateGranularity) -> Self {
        let format = match granularity {
            DateGranularity::Day => DAY_FORMAT,
            DateGranularity::Month => MONTH_FORMAT,
            DateGranularity::Year => YEAR_FORMAT,
        };
        // Formatting a calendar date with numeric components cannot fail.
        let stamp = date.format(format).unwrap_or_default();
        Self::with_id(TagKind::ArchiveDate, stamp)
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TagKind> for Tag {
    fn from(kind: TagKind) -> Self {
        Self::bare(kind)
    }
}

/// Hash an address the way URL tags expect it.
///
/// The query string is dropped and a trailing slash is enforced so `/a`,
/// `/a/` and `/a/?x=1` all hash alike. Returns `None` when nothing is left
/// once the query is removed.
pub fn uri_hash(uri: &str) -> Option<String> {
    let path = uri.split('?').next().unwrap_or_default();
    if path.is_empty() {
        return None;
    }

    let mut slashed = path.to_string();
    if !slashed.ends_with('/') {
        slashed.push('/');
    }

    let digest = Sha256::digest(slashed.as_bytes());
    Some(hex::encode(&digest[..URI_HASH_BYTES]))
}

/// Percent-decode a request URI before hashing it.
///
/// Invalid UTF-8 after decoding falls back to the raw input.
pub fn decode_uri(uri: &str) -> String {
    percent_decode_str(uri)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| uri.to_string())
}
