use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use serde_json::{json, Value};

use crate::cache::{CacheStore, RawRecord};
use crate::jira::{JiraClient, JiraError};
use crate::progress::ProgressReporter;

/// Cursor used when the cache is empty; predates any real issue.
pub const DEFAULT_EPOCH: &str = "1979-04-04";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("jira error: {0}")]
    Jira(#[from] JiraError),
    #[error("cache error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("jira response violated the expected shape: {0}")]
    Protocol(String),
}

/// Incrementally mirrors remote issues into the raw cache.
///
/// The cursor is `MAX(updated)` over already-committed rows, recomputed on
/// every iteration, so a crashed or interrupted run resumes correctly with
/// no separate checkpoint. Each fetched page commits as one transaction.
pub fn sync(
    jira: &JiraClient,
    cache: &mut CacheStore,
    reporter: &ProgressReporter,
) -> Result<(), SyncError> {
    let mut start_at: usize = 0;

    loop {
        let start_date = cache
            .max_updated()?
            .unwrap_or_else(|| DEFAULT_EPOCH.to_string());

        let jql = format!("updated >= \"{start_date}\" ORDER BY updated ASC");
        let page = jira.search(&jql, start_at, "*all")?;

        let issues = page
            .issues
            .ok_or_else(|| SyncError::Protocol("search response missing 'issues'".to_string()))?;
        if issues.is_empty() {
            break;
        }

        let total = page
            .total
            .ok_or_else(|| SyncError::Protocol("search response missing 'total'".to_string()))?;
        let max_results = page.max_results.ok_or_else(|| {
            SyncError::Protocol("search response missing 'maxResults'".to_string())
        })?;

        let mut records = Vec::with_capacity(issues.len());
        let mut end_date = start_date.clone();
        for issue in &issues {
            let key = issue
                .get("key")
                .and_then(Value::as_str)
                .ok_or_else(|| SyncError::Protocol("record missing 'key'".to_string()))?;
            let raw_updated = issue
                .pointer("/fields/updated")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SyncError::Protocol(format!("record {key} missing 'fields.updated'"))
                })?;

            end_date = normalize_updated(raw_updated);
            records.push(RawRecord {
                key: key.to_string(),
                updated: end_date.clone(),
                content: issue.to_string(),
            });
        }

        let page_len = records.len();
        cache.commit_page(&records)?;

        reporter.report(
            "total: {total} ({start_date} ... {end_date} ) {start_at}",
            &[
                ("total", json!(total - start_at as i64)),
                ("start_date", json!(start_date)),
                ("end_date", json!(end_date)),
                ("start_at", json!(start_at)),
            ],
        );

        if total < max_results {
            break;
        }

        // A whole page of records tied at the cursor minute would refetch
        // forever with a reset offset; page through the tie instead.
        if end_date == start_date {
            start_at += page_len;
        } else {
            start_at = 0;
        }
    }

    Ok(())
}

/// Normalizes a remote update timestamp to minute precision, the only
/// granularity the search endpoint accepts back in comparisons.
/// `2026-02-21T10:15:30.000+0000` becomes `2026-02-21 10:15`.
pub fn normalize_updated(raw: &str) -> String {
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return parsed.format("%Y-%m-%d %H:%M").to_string();
    }

    // Nonstandard suffix: strip everything past the minute textually.
    static MINUTE: OnceLock<Regex> = OnceLock::new();
    let minute = MINUTE.get_or_init(|| Regex::new(r"T(\d+):(\d+).*").expect("static regex"));
    minute.replace(raw, " ${1}:${2}").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use std::path::Path;

    const EPOCH_JQL: &str = "updated >= \"1979-04-04\" ORDER BY updated ASC";

    fn issue(key: &str, updated: &str) -> Value {
        json!({"key": key, "fields": {"updated": updated}})
    }

    fn page_body(total: i64, max_results: i64, issues: Vec<Value>) -> Value {
        json!({"total": total, "maxResults": max_results, "issues": issues})
    }

    fn client(server: &MockServer) -> JiraClient {
        JiraClient::new(server.base_url(), "u".into(), "p".into()).expect("client")
    }

    fn dump_cache(cache: &CacheStore) -> Vec<(String, String, String)> {
        let conn = cache.conn();
        let mut stmt = conn
            .prepare("SELECT key, updated, content FROM IssueCache ORDER BY key")
            .expect("prepare");
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .expect("query");
        rows.collect::<Result<_, _>>().expect("collect")
    }

    #[test]
    fn normalizes_timestamps_to_minute_precision() {
        assert_eq!(
            normalize_updated("2026-02-21T10:15:30.000+0000"),
            "2026-02-21 10:15"
        );
        assert_eq!(
            normalize_updated("2026-02-21T10:15:30+0100"),
            "2026-02-21 10:15"
        );
        // Unparseable offsets fall back to textual stripping.
        assert_eq!(normalize_updated("2026-02-21T10:15:30Z[UTC]"), "2026-02-21 10:15");
        assert_eq!(normalize_updated("2026-02-21"), "2026-02-21");
    }

    #[test]
    fn single_short_page_syncs_and_stops() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", EPOCH_JQL)
                .query_param("startAt", "0");
            then.status(200).json_body_obj(&page_body(
                1,
                50,
                vec![issue("PROJ-1", "2026-02-21T10:15:30.000+0000")],
            ));
        });

        let mut cache = CacheStore::open(Path::new(":memory:")).expect("cache");
        sync(&client(&server), &mut cache, &ProgressReporter::new(false)).expect("sync");

        mock.assert_hits(1);
        assert_eq!(cache.record_count().expect("count"), 1);
        assert_eq!(
            cache.max_updated().expect("max"),
            Some("2026-02-21 10:15".to_string())
        );
    }

    #[test]
    fn missing_issues_marker_is_a_protocol_error() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/rest/api/3/search");
            then.status(200).json_body_obj(&json!({"total": 0}));
        });

        let mut cache = CacheStore::open(Path::new(":memory:")).expect("cache");
        let err = sync(&client(&server), &mut cache, &ProgressReporter::new(false))
            .expect_err("shape violation is fatal");

        assert!(matches!(err, SyncError::Protocol(_)));
        assert_eq!(cache.record_count().expect("count"), 0);
    }

    /// More than a page's worth of records tied at one minute must not loop:
    /// the offset pages through the tie instead of resetting.
    #[test]
    fn terminates_on_tie_boundary_wider_than_a_page() {
        let server = MockServer::start();
        let tied = "2026-02-21T10:15:00.000+0000";
        let tied_jql = "updated >= \"2026-02-21 10:15\" ORDER BY updated ASC";

        let _first = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", EPOCH_JQL)
                .query_param("startAt", "0");
            then.status(200).json_body_obj(&page_body(
                4,
                2,
                vec![issue("PROJ-1", tied), issue("PROJ-2", tied)],
            ));
        });
        let _tied_0 = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", tied_jql)
                .query_param("startAt", "0");
            then.status(200).json_body_obj(&page_body(
                4,
                2,
                vec![issue("PROJ-1", tied), issue("PROJ-2", tied)],
            ));
        });
        let _tied_2 = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", tied_jql)
                .query_param("startAt", "2");
            then.status(200).json_body_obj(&page_body(
                4,
                2,
                vec![issue("PROJ-3", tied), issue("PROJ-4", tied)],
            ));
        });
        let exhausted = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", tied_jql)
                .query_param("startAt", "4");
            then.status(200).json_body_obj(&page_body(4, 2, vec![]));
        });

        let mut cache = CacheStore::open(Path::new(":memory:")).expect("cache");
        sync(&client(&server), &mut cache, &ProgressReporter::new(false)).expect("sync");

        exhausted.assert_hits(1);
        assert_eq!(cache.record_count().expect("count"), 4);
        for key in ["PROJ-1", "PROJ-2", "PROJ-3", "PROJ-4"] {
            assert!(cache.content(key).expect("lookup").is_some(), "{key} cached");
        }
    }

    #[test]
    fn resync_against_unchanged_remote_is_idempotent() {
        let server = MockServer::start();
        let tied = "2026-02-21T10:15:00.000+0000";
        let tied_jql = "updated >= \"2026-02-21 10:15\" ORDER BY updated ASC";

        let _first = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", EPOCH_JQL)
                .query_param("startAt", "0");
            then.status(200).json_body_obj(&page_body(
                2,
                2,
                vec![issue("PROJ-1", tied), issue("PROJ-2", tied)],
            ));
        });
        let _tied_0 = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", tied_jql)
                .query_param("startAt", "0");
            then.status(200).json_body_obj(&page_body(
                2,
                2,
                vec![issue("PROJ-1", tied), issue("PROJ-2", tied)],
            ));
        });
        let _tied_2 = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", tied_jql)
                .query_param("startAt", "2");
            then.status(200).json_body_obj(&page_body(2, 2, vec![]));
        });

        let jira = client(&server);
        let reporter = ProgressReporter::new(false);
        let mut cache = CacheStore::open(Path::new(":memory:")).expect("cache");

        sync(&jira, &mut cache, &reporter).expect("first sync");
        let after_first = dump_cache(&cache);

        sync(&jira, &mut cache, &reporter).expect("second sync");
        let after_second = dump_cache(&cache);

        assert_eq!(after_first, after_second);
    }

    /// Once a page advances past its cursor, the next query runs with a
    /// strictly newer cursor and a reset offset.
    #[test]
    fn cursor_advances_and_offset_resets_after_untied_page() {
        let server = MockServer::start();
        let later_jql = "updated >= \"2026-02-22 08:00\" ORDER BY updated ASC";

        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", EPOCH_JQL)
                .query_param("startAt", "0");
            then.status(200).json_body_obj(&page_body(
                3,
                2,
                vec![
                    issue("PROJ-1", "2026-02-21T10:15:00.000+0000"),
                    issue("PROJ-2", "2026-02-22T08:00:00.000+0000"),
                ],
            ));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/rest/api/3/search")
                .query_param("jql", later_jql)
                .query_param("startAt", "0");
            then.status(200).json_body_obj(&page_body(
                1,
                2,
                vec![issue("PROJ-3", "2026-02-22T09:30:00.000+0000")],
            ));
        });

        let mut cache = CacheStore::open(Path::new(":memory:")).expect("cache");
        sync(&client(&server), &mut cache, &ProgressReporter::new(false)).expect("sync");

        first.assert_hits(1);
        second.assert_hits(1);
        assert_eq!(cache.record_count().expect("count"), 3);
        assert_eq!(
            cache.max_updated().expect("max"),
            Some("2026-02-22 09:30".to_string())
        );
    }
}
