use serde_json::{json, Value};

use crate::cache::CacheStore;
use crate::progress::ProgressReporter;

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("cache error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("cached payload for {key} is not valid JSON: {source}")]
    Parse {
        key: String,
        source: serde_json::Error,
    },
}

/// Null-safe nested lookup. Traversal stops with `None` the moment a key is
/// missing or the value at any step is falsy: null, `false`, zero, an empty
/// string, array, or object. A value this returns is therefore never empty.
pub fn pluck<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        let next = current.as_object()?.get(*key)?;
        if is_falsy(next) {
            return None;
        }
        current = next;
    }
    Some(current)
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// `pluck` with an SQL-friendly result: the plucked value, or null.
fn field(value: &Value, path: &[&str]) -> Value {
    pluck(value, path).cloned().unwrap_or(Value::Null)
}

/// Re-derives Issues, Users, Worklog, and IssueLinks from the raw cache.
///
/// The tables are dropped and recreated, then every cached payload streams
/// through one projection pass. Every write replaces by primary key, so the
/// rebuild is idempotent and a crash mid-rebuild recovers by rerunning.
pub fn rebuild(
    cache: &CacheStore,
    reporter: &ProgressReporter,
    story_points_field: &str,
) -> Result<(), NormalizeError> {
    let total = cache.record_count()?;
    reporter.report("Rebuilding data tables {total}", &[("total", json!(total))]);

    cache.reset_derived_tables()?;

    let mut count: i64 = 0;
    let mut percentage: i64 = 0;
    cache.with_records(|key, content| {
        let parsed: Value =
            serde_json::from_str(&content).map_err(|source| NormalizeError::Parse {
                key: key.clone(),
                source,
            })?;
        project_record(cache, &parsed, story_points_field)?;

        count += 1;
        let current_percentage = 10 * count / total;
        if current_percentage != percentage {
            percentage = current_percentage;
            reporter.report(
                "Progress {percentage}%",
                &[("percentage", json!(10 * percentage))],
            );
        }
        Ok(())
    })
}

/// Projects one raw payload into the four derived tables.
fn project_record(
    cache: &CacheStore,
    content: &Value,
    story_points_field: &str,
) -> Result<(), NormalizeError> {
    if is_falsy(content) {
        return Ok(());
    }

    let assignee = upsert_user(cache, pluck(content, &["fields", "assignee"]))?;
    let creator = upsert_user(cache, pluck(content, &["fields", "creator"]))?;

    upsert_worklogs(cache, pluck(content, &["fields", "worklog", "worklogs"]))?;

    let issue_key = field(content, &["key"]);
    cache.set_row(
        "Issues",
        &[
            ("id", field(content, &["id"])),
            ("key", issue_key.clone()),
            ("summary", field(content, &["fields", "summary"])),
            ("assignee", assignee),
            ("creator", creator),
            ("updated", field(content, &["fields", "updated"])),
            ("status", field(content, &["fields", "status", "name"])),
            (
                "timeoriginalestimate",
                field(content, &["fields", "timeoriginalestimate"]),
            ),
            ("type", field(content, &["fields", "issuetype", "name"])),
            ("storypoints", field(content, &["fields", story_points_field])),
            ("priority", field(content, &["fields", "priority", "name"])),
            (
                "resolutiondate",
                field(content, &["fields", "resolutiondate"]),
            ),
        ],
    )?;

    // Parent/subtask references arrive asymmetric; store both directions so
    // the renderer can walk either way.
    if let Some(parent_key) = pluck(content, &["fields", "parent", "key"]) {
        link_pair(cache, &issue_key, "has parent", parent_key, "parent of")?;
    }

    if let Some(subtasks) = pluck(content, &["fields", "subtasks"]).and_then(Value::as_array) {
        for subtask in subtasks {
            if let Some(subtask_key) = pluck(subtask, &["key"]) {
                link_pair(cache, &issue_key, "has subtask", subtask_key, "subtask of")?;
            }
        }
    }

    if let Some(links) = pluck(content, &["fields", "issuelinks"]).and_then(Value::as_array) {
        for link in links {
            let link_id = link.get("id").cloned().unwrap_or(Value::Null);
            if link.get("outwardIssue").is_some() {
                cache.set_row(
                    "IssueLinks",
                    &[
                        ("id", link_id.clone()),
                        ("source", issue_key.clone()),
                        ("relation", field(link, &["type", "outward"])),
                        ("destination", field(link, &["outwardIssue", "key"])),
                    ],
                )?;
            }
            if link.get("inwardIssue").is_some() {
                cache.set_row(
                    "IssueLinks",
                    &[
                        ("id", link_id),
                        ("source", issue_key.clone()),
                        ("relation", field(link, &["type", "inward"])),
                        ("destination", field(link, &["inwardIssue", "key"])),
                    ],
                )?;
            }
        }
    }

    Ok(())
}

/// Upserts a referenced user, returning its id for the Issue row. Absent
/// references produce no row and a null id.
fn upsert_user(cache: &CacheStore, content: Option<&Value>) -> Result<Value, rusqlite::Error> {
    let Some(content) = content else {
        return Ok(Value::Null);
    };

    let id = field(content, &["accountId"]);
    cache.set_row(
        "Users",
        &[
            ("id", id.clone()),
            ("type", field(content, &["accountType"])),
            ("active", field(content, &["active"])),
            ("displayName", field(content, &["displayName"])),
            ("emailAddress", field(content, &["emailAddress"])),
            ("timeZone", field(content, &["timeZone"])),
        ],
    )?;
    Ok(id)
}

fn upsert_worklogs(cache: &CacheStore, content: Option<&Value>) -> Result<(), rusqlite::Error> {
    let Some(entries) = content.and_then(Value::as_array) else {
        return Ok(());
    };

    for entry in entries {
        cache.set_row(
            "Worklog",
            &[
                ("issueId", field(entry, &["issueId"])),
                ("authorId", field(entry, &["author", "accountId"])),
                ("started", field(entry, &["started"])),
                ("timeSpent", field(entry, &["timeSpentSeconds"])),
            ],
        )?;
    }
    Ok(())
}

fn link_pair(
    cache: &CacheStore,
    source: &Value,
    relation: &str,
    destination: &Value,
    inverse: &str,
) -> Result<(), rusqlite::Error> {
    cache.set_row(
        "IssueLinks",
        &[
            ("source", source.clone()),
            ("relation", json!(relation)),
            ("destination", destination.clone()),
        ],
    )?;
    cache.set_row(
        "IssueLinks",
        &[
            ("source", destination.clone()),
            ("relation", json!(inverse)),
            ("destination", source.clone()),
        ],
    )
}
