use std::io::Write;

use edgecache::cache::CacheConfig;
use edgecache::domain::tags::Tag;
use edgecache::scenario::{DecisionReport, Scenario, ScenarioError};
use tempfile::NamedTempFile;

const ARTICLE: &str = r#"
now = "2024-06-01T12:00:00Z"

[request]
uri = "/2024/05/launch/"
page = { view = { type = "singular", id = 42 }, entity = { categories = ["news"] } }

[[directory.contents]]
id = 42
status = "published"
permalink = "/2024/05/launch/"
author_id = 5
published_at = "2024-05-30T08:00:00Z"
previous_id = 41
terms = [{ taxonomy = "category", term_id = 3, slug = "news" }]

[[events]]
kind = "recent_posts_widget_rendered"

[[events]]
kind = "add_cache_tags"
tags = ["shop.featured"]
"#;

fn scenario_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("tmp file");
    file.write_all(contents.as_bytes()).expect("write scenario");
    file
}

#[test]
fn article_scenario_is_cached_with_event_tags() {
    let file = scenario_file(ARTICLE);
    let scenario = Scenario::from_path(file.path()).expect("scenario loads");

    let report = DecisionReport::from(&scenario.decide(&CacheConfig::default()));
    assert!(report.is_cached());

    let tag_line = report
        .headers
        .iter()
        .find(|line| line.starts_with("X-LiteSpeed-Tag: "))
        .expect("tag line");
    for tag in ["B1_P.42", "B1_PR", "B1_shop.featured"] {
        assert!(tag_line.contains(tag), "missing {tag} in {tag_line}");
    }
    assert!(report.to_text().ends_with("2024-06-01 12:00:00 -->"));
}

#[test]
fn excluded_category_rejects_scenario() {
    let file = scenario_file(ARTICLE);
    let scenario = Scenario::from_path(file.path()).expect("scenario loads");
    let config = CacheConfig {
        excluded_categories: vec!["news".to_string()],
        ..Default::default()
    };

    let report = DecisionReport::from(&scenario.decide(&config));
    assert!(!report.is_cached());
    assert_eq!(report.reason.as_deref(), Some("configured category exclusion"));
    assert!(report.to_text().contains("# not cached: configured category exclusion"));
}

#[test]
fn purge_tags_follow_triggers() {
    let file = scenario_file(ARTICLE);
    let scenario = Scenario::from_path(file.path()).expect("scenario loads");

    let tags = scenario.purge_tags(&CacheConfig::default(), 42);
    assert_eq!(tags.first(), Some(&Tag::post(42)));
    assert!(tags.contains(&Tag::post(41)));
    assert!(tags.contains(&Tag::term(3)));
    assert!(tags.contains(&Tag::author(5)));

    let all = scenario.purge_tags(
        &CacheConfig {
            purge_all_on_change: true,
            ..Default::default()
        },
        42,
    );
    assert_eq!(all.len(), 1);
    assert!(all.has_wildcard());
}

#[test]
fn malformed_scenario_is_a_parse_error() {
    let file = scenario_file("[request\nuri = ");
    let err = Scenario::from_path(file.path()).expect_err("malformed file");
    assert!(matches!(err, ScenarioError::Parse(_)));
}

#[test]
fn report_serializes_to_json() {
    let scenario = Scenario::parse(ARTICLE).expect("scenario parses");
    let report = DecisionReport::from(&scenario.decide(&CacheConfig::default()));

    let json = serde_json::to_value(&report).expect("report serializes");
    assert_eq!(json["mode"], "cache");
    assert!(json["headers"].as_array().is_some_and(|lines| !lines.is_empty()));
}
