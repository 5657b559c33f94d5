use std::collections::HashSet;

use edgecache::cache::{
    CacheConfig, METRIC_DECISION_TOTAL, METRIC_PURGE_TAGS_TOTAL, METRIC_VARY_MISMATCH_TOTAL,
    RequestCache, StaticDirectory,
};
use edgecache::domain::request::{ControlAction, RequestFacts};
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use time::macros::datetime;

#[test]
fn decisions_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let now = datetime!(2024-06-01 12:00 UTC);
    let directory = StaticDirectory::default();

    // Cached anonymous request
    let config = CacheConfig::default();
    let emission = RequestCache::begin(&config, &directory, RequestFacts::get("/about/"), now).finish();
    assert_eq!(emission.mode.as_str(), "cache");

    // Operator purge of the front page
    let mut facts = RequestFacts::get("/");
    facts.action = Some(ControlAction::PurgeFront);
    let emission = RequestCache::begin(&config, &directory, facts, now).finish();
    assert_eq!(emission.purge_tags, vec!["B1_F".to_string()]);

    // Proxy not varying on the configured login cookie
    let mismatched = CacheConfig {
        login_cookie: Some("site_login".to_string()),
        ..Default::default()
    };
    let mut facts = RequestFacts::get("/");
    facts.upstream.vary_cookie = Some("_lscache_vary".to_string());
    RequestCache::begin(&mismatched, &directory, facts, now).finish();

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        METRIC_DECISION_TOTAL,
        METRIC_PURGE_TAGS_TOTAL,
        METRIC_VARY_MISMATCH_TOTAL,
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let cache_decisions = snapshot
        .into_iter()
        .find(|(composite_key, _, _, _)| {
            let key = composite_key.key();
            key.name() == METRIC_DECISION_TOTAL
                && key
                    .labels()
                    .any(|label| label.key() == "mode" && label.value() == "cache")
        })
        .map(|(_, _, _, value)| value);
    assert_eq!(cache_decisions, Some(DebugValue::Counter(1)));
}
