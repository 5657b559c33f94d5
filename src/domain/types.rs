//! Shared domain enumerations.

use serde::{Deserialize, Serialize};

/// Publication state of a content item as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Published,
    Draft,
    Pending,
    Private,
    Trash,
}

impl ContentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentStatus::Published => "published",
            ContentStatus::Draft => "draft",
            ContentStatus::Pending => "pending",
            ContentStatus::Private => "private",
            ContentStatus::Trash => "trash",
        }
    }
}

/// Resolution of a date archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateGranularity {
    Day,
    Month,
    Year,
}

/// Trusted verification tokens that widen a wildcard purge to every tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkToken {
    /// Core update request issued from the network updates screen.
    CoreUpdates,
    /// Explicit "purge all sites" request from a network administrator.
    NetworkPurgeAll,
}

/// Which list an operator purge-by request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeBySelector {
    Category,
    PostId,
    Tag,
    Url,
}

impl PurgeBySelector {
    pub fn as_str(self) -> &'static str {
        match self {
            PurgeBySelector::Category => "category",
            PurgeBySelector::PostId => "post_id",
            PurgeBySelector::Tag => "tag",
            PurgeBySelector::Url => "url",
        }
    }
}
