//! Operator purge actions.
//!
//! Control actions arrive with the request and translate into purge tags or
//! mode changes. Validation problems never fail the request; they surface as
//! [`Notice`]s for the operator.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::directory::SiteDirectory;
use super::mode::CacheMode;
use super::state::CacheControlState;
use crate::domain::request::ControlAction;
use crate::domain::tags::{Tag, TagKind};
use crate::domain::types::{ContentStatus, PurgeBySelector};

/// Error pages an operator may purge individually.
const PURGEABLE_ERROR_CODES: [u16; 3] = [403, 404, 500];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Operator-visible message produced while handling a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Rejected purge-by entry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PurgeByError {
    #[error("the purge-by list is empty")]
    EmptyList,
    #[error("`{0}` is not a valid category slug")]
    InvalidCategory(String),
    #[error("category `{0}` does not exist")]
    UnknownCategory(String),
    #[error("post id `{0}` is not numeric")]
    NonNumericPostId(String),
    #[error("post {0} does not exist or is not published")]
    UnpublishedPost(u64),
    #[error("`{0}` is not a valid tag slug")]
    InvalidTag(String),
    #[error("tag `{0}` does not exist")]
    UnknownTag(String),
    #[error("url `{0}` contains markup")]
    MarkupInUrl(String),
    #[error("url `{0}` has no path to purge")]
    InvalidUrl(String),
}

/// Apply a control action to the request state.
///
/// The caller has already forced the mode to NOCACHE.
pub fn apply_action(
    action: &ControlAction,
    state: &mut CacheControlState,
    directory: &dyn SiteDirectory,
) -> Vec<Notice> {
    let mut notices = Vec::new();

    match action {
        ControlAction::Purge => state.set_mode(CacheMode::Purge),
        ControlAction::PurgeSingle => state.set_mode(CacheMode::PurgeSingle),
        ControlAction::ShowHeaders => state.show_headers(),
        ControlAction::NoCache => {}
        ControlAction::PurgeFront => {
            state.tags_mut().add_purge_tag(TagKind::FrontPage.into());
            notices.push(Notice::info("Notified the proxy to purge the front page."));
        }
        ControlAction::PurgePages => {
            state.tags_mut().add_purge_tag(TagKind::Pages.into());
            notices.push(Notice::info("Notified the proxy to purge pages."));
        }
        ControlAction::PurgeErrors { include } => {
            let tags = state.tags_mut();
            tags.add_purge_tag(TagKind::Error.into());
            tags.add_purge_tags(
                PURGEABLE_ERROR_CODES
                    .into_iter()
                    .filter(|code| include.contains(code))
                    .map(Tag::error),
            );
            notices.push(Notice::info("Notified the proxy to purge error pages."));
        }
        ControlAction::PurgeAll => {
            state.tags_mut().add_purge_tag(Tag::wildcard());
            notices.push(Notice::info("Notified the proxy to purge the public cache."));
        }
        ControlAction::PurgeEmptyCache => {
            state.tags_mut().add_purge_tag(Tag::wildcard());
            notices.push(Notice::info("Notified the proxy to purge everything."));
        }
        ControlAction::PurgeBy { selector, list } => {
            let outcome = resolve_purge_by(*selector, list, directory);
            state.tags_mut().add_purge_tags(outcome.tags);
            notices.extend(outcome.notices);
            notices.push(Notice::info("Notified the proxy to purge the list."));
        }
    }

    info!(?action, notices = notices.len(), "control action applied");
    notices
}

/// Tags and notices resolved from a purge-by list.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PurgeByOutcome {
    pub tags: Vec<Tag>,
    pub notices: Vec<Notice>,
}

/// Resolve a newline-separated purge-by list.
///
/// Entries are trimmed and blank ones skipped. Every invalid entry becomes an
/// error notice; the valid ones still produce tags.
pub fn resolve_purge_by(
    selector: PurgeBySelector,
    list: &str,
    directory: &dyn SiteDirectory,
) -> PurgeByOutcome {
    let mut outcome = PurgeByOutcome::default();

    if list.trim().is_empty() {
        outcome
            .notices
            .push(Notice::error(PurgeByError::EmptyList.to_string()));
        return outcome;
    }

    for entry in list.lines().map(str::trim).filter(|entry| !entry.is_empty()) {
        match resolve_entry(selector, entry, directory) {
            Ok(tag) => {
                outcome
                    .notices
                    .push(Notice::info(format!("Purge {} {entry}", selector.as_str())));
                outcome.tags.push(tag);
            }
            Err(err) => outcome.notices.push(Notice::error(err.to_string())),
        }
    }

    outcome
}

fn resolve_entry(
    selector: PurgeBySelector,
    entry: &str,
    directory: &dyn SiteDirectory,
) -> Result<Tag, PurgeByError> {
    match selector {
        PurgeBySelector::Category => {
            if !is_valid_slug(entry) {
                return Err(PurgeByError::InvalidCategory(entry.to_string()));
            }
            directory
                .category_by_slug(entry)
                .map(Tag::term)
                .ok_or_else(|| PurgeByError::UnknownCategory(entry.to_string()))
        }
        PurgeBySelector::Tag => {
            if !is_valid_slug(entry) {
                return Err(PurgeByError::InvalidTag(entry.to_string()));
            }
            directory
                .tag_by_slug(entry)
                .map(Tag::term)
                .ok_or_else(|| PurgeByError::UnknownTag(entry.to_string()))
        }
        PurgeBySelector::PostId => {
            let id: u64 = entry
                .parse()
                .map_err(|_| PurgeByError::NonNumericPostId(entry.to_string()))?;
            match directory.content(id) {
                Some(record) if record.status == ContentStatus::Published => Ok(Tag::post(id)),
                _ => Err(PurgeByError::UnpublishedPost(id)),
            }
        }
        PurgeBySelector::Url => {
            if entry.contains('<') {
                return Err(PurgeByError::MarkupInUrl(entry.to_string()));
            }
            Tag::url(entry).ok_or_else(|| PurgeByError::InvalidUrl(entry.to_string()))
        }
    }
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::cache::directory::{StaticDirectory, TermEntry};
    use crate::cache::tags::TagPrefix;
    use crate::domain::content::{CATEGORY_TAXONOMY, ContentRecord, TAG_TAXONOMY};

    fn directory() -> StaticDirectory {
        let published = ContentRecord {
            id: 5,
            status: ContentStatus::Published,
            content_type: "post".to_string(),
            permalink: "/five/".to_string(),
            author_id: 1,
            published_at: datetime!(2024-01-01 0:00 UTC),
            terms: Vec::new(),
            previous_id: None,
            next_id: None,
            has_type_archive: false,
        };
        let draft = ContentRecord {
            id: 6,
            status: ContentStatus::Draft,
            ..published.clone()
        };
        StaticDirectory {
            contents: vec![published, draft],
            terms: vec![
                TermEntry {
                    taxonomy: CATEGORY_TAXONOMY.to_string(),
                    term_id: 11,
                    slug: "news".to_string(),
                },
                TermEntry {
                    taxonomy: TAG_TAXONOMY.to_string(),
                    term_id: 21,
                    slug: "rust-lang".to_string(),
                },
            ],
            tenants: Vec::new(),
        }
    }

    fn fresh_state() -> CacheControlState {
        CacheControlState::new(TagPrefix::new("", 1), "_lscache_vary")
    }

    fn errors(outcome: &PurgeByOutcome) -> usize {
        outcome
            .notices
            .iter()
            .filter(|notice| notice.level == NoticeLevel::Error)
            .count()
    }

    #[test]
    fn category_list_skips_blank_and_invalid_entries() {
        let outcome = resolve_purge_by(
            PurgeBySelector::Category,
            "news\n\n  \nbad slug!\nmissing\n",
            &directory(),
        );
        assert_eq!(outcome.tags, vec![Tag::term(11)]);
        assert_eq!(errors(&outcome), 2);
    }

    #[test]
    fn tag_list_resolves_by_slug() {
        let outcome = resolve_purge_by(PurgeBySelector::Tag, " rust-lang ", &directory());
        assert_eq!(outcome.tags, vec![Tag::term(21)]);
        assert_eq!(errors(&outcome), 0);
    }

    #[test]
    fn post_ids_must_be_numeric_and_published() {
        let outcome = resolve_purge_by(PurgeBySelector::PostId, "5\n6\nseven\n99", &directory());
        assert_eq!(outcome.tags, vec![Tag::post(5)]);
        assert_eq!(errors(&outcome), 3);
    }

    #[test]
    fn urls_reject_markup() {
        let outcome = resolve_purge_by(
            PurgeBySelector::Url,
            "/about/\n/<script>/\n?only=query",
            &directory(),
        );
        assert_eq!(outcome.tags.len(), 1);
        assert_eq!(outcome.tags[0], Tag::url("/about").expect("url tag"));
        assert_eq!(errors(&outcome), 2);
    }

    #[test]
    fn empty_list_is_reported() {
        let outcome = resolve_purge_by(PurgeBySelector::Url, "  \n", &directory());
        assert!(outcome.tags.is_empty());
        assert_eq!(
            outcome.notices,
            vec![Notice::error("the purge-by list is empty")]
        );
    }

    #[test]
    fn purge_errors_includes_selected_codes() {
        let mut state = fresh_state();
        let notices = apply_action(
            &ControlAction::PurgeErrors {
                include: vec![404, 500, 418],
            },
            &mut state,
            &directory(),
        );
        let purge: Vec<&str> = state.tags().purge_tags().iter().map(Tag::as_str).collect();
        assert_eq!(purge, vec!["E.", "E.404", "E.500"]);
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn mode_actions_change_mode_without_tags() {
        let mut state = fresh_state();
        apply_action(&ControlAction::PurgeSingle, &mut state, &directory());
        assert_eq!(state.mode(), CacheMode::PurgeSingle);
        assert!(state.tags().purge_tags().is_empty());

        let mut state = fresh_state();
        apply_action(&ControlAction::ShowHeaders, &mut state, &directory());
        assert_eq!(state.mode(), CacheMode::NoCache);
        assert!(state.control().flags.show_headers);
    }

    #[test]
    fn purge_all_adds_wildcard() {
        let mut state = fresh_state();
        let notices = apply_action(&ControlAction::PurgeAll, &mut state, &directory());
        assert!(state.tags().purge_tags().has_wildcard());
        assert_eq!(notices[0].level, NoticeLevel::Info);
    }
}
