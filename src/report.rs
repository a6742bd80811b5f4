use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::cache::CacheStore;
use crate::logging;
use crate::normalize::pluck;

/// Relations followed when expanding a node into its subtree.
const WALKABLE_RELATIONS: [&str; 3] = ["blocked by", "has subtask", "parent of"];

/// Relations that point from an issue to its container.
const PARENT_RELATIONS: [&str; 2] = ["has parent", "subtask of"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ReportFormat {
    Summary,
    Markdown,
    Branch,
}

/// Display attributes per status category. Only the symbol is used by the
/// text formats; the colors are kept for graph-style consumers.
#[derive(Debug)]
pub struct StatusCategoryStyle {
    pub color: &'static str,
    pub fontcolor: &'static str,
    pub fillcolor: &'static str,
    pub symbol: &'static str,
}

pub fn status_category_style(category: &str) -> &'static StatusCategoryStyle {
    match category {
        "indeterminate" => &StatusCategoryStyle {
            color: "#1F46A0",
            fontcolor: "#1F46A0",
            fillcolor: "#E0EBFD",
            symbol: "🔶",
        },
        "done" => &StatusCategoryStyle {
            color: "#2A6447",
            fontcolor: "#2A6447",
            fillcolor: "#E8FBF0",
            symbol: "🟩",
        },
        // "new", plus anything unrecognized.
        _ => &StatusCategoryStyle {
            color: "#44516B",
            fontcolor: "#44516B",
            fillcolor: "#DFE1E5",
            symbol: "🔴",
        },
    }
}

/// Named canned queries usable instead of free-form JQL.
pub const CANNED_FILTERS: [(&str, &str); 7] = [
    (
        "my_open_issues",
        "assignee IN (currentUser()) AND statusCategory in (\"To Do\", \"In Progress\") ORDER BY created DESC",
    ),
    ("reported_by_me", "reporter IN (currentUser()) ORDER BY created DESC"),
    (
        "open_issues",
        "statusCategory in (\"To Do\", \"In Progress\") ORDER BY updated DESC",
    ),
    ("done_issues", "statusCategory = \"Done\" ORDER BY created DESC"),
    ("viewed_recently", "ORDER BY lastviewed DESC"),
    ("resolved_recently", "resolved >= -1w ORDER BY updated DESC"),
    ("updated_recently", "ORDER BY updated DESC"),
];

pub fn canned_filter(name: &str) -> Option<&'static str> {
    CANNED_FILTERS
        .iter()
        .find(|(filter, _)| *filter == name)
        .map(|(_, jql)| *jql)
}

/// Renders a set of result keys as an indented forest.
///
/// Roots are the keys whose resolved parent is absent or not itself in the
/// result set; every other key appears nested under its parent instead of
/// duplicated at top level. The walk follows child and blocking edges past
/// the result set, with a visited set guaranteeing termination even on a
/// malformed cyclic link graph. A key with no cached payload is a non-fatal
/// gap: a warning goes to stderr and that branch is skipped.
#[derive(Debug)]
pub struct HierarchyReport<'a> {
    cache: &'a CacheStore,
    base_url: String,
    format: ReportFormat,
}

impl<'a> HierarchyReport<'a> {
    pub fn new(cache: &'a CacheStore, base_url: impl Into<String>, format: ReportFormat) -> Self {
        Self {
            cache,
            base_url: base_url.into(),
            format,
        }
    }

    pub fn render(&self, keys: &[String]) -> Result<Vec<String>, rusqlite::Error> {
        let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();

        let mut parents: HashMap<&str, Option<String>> = HashMap::new();
        for key in keys {
            let mut parent = None;
            for (relation, destination) in self.cache.link_rows(key)? {
                if PARENT_RELATIONS.contains(&relation.as_str()) {
                    parent = Some(destination);
                    break;
                }
            }
            parents.insert(key, parent);
        }

        let mut visited = HashSet::new();
        let mut lines = Vec::new();
        for key in keys {
            let is_root = match &parents[key.as_str()] {
                None => true,
                Some(parent) => !key_set.contains(parent.as_str()),
            };
            if is_root {
                self.walk(key, 0, &mut visited, &mut lines)?;
            }
        }
        Ok(lines)
    }

    fn walk(
        &self,
        key: &str,
        depth: usize,
        visited: &mut HashSet<String>,
        lines: &mut Vec<String>,
    ) -> Result<(), rusqlite::Error> {
        if !visited.insert(key.to_string()) {
            return Ok(());
        }

        let Some(content) = self.cache.content(key)? else {
            logging::warn(format!("Missing issue, update the cache: {key}"));
            return Ok(());
        };
        let issue: Value = match serde_json::from_str(&content) {
            Ok(parsed) => parsed,
            Err(err) => {
                logging::warn(format!("Unreadable cached payload for {key}: {err}"));
                return Ok(());
            }
        };

        let summary = pluck(&issue, &["fields", "summary"])
            .and_then(Value::as_str)
            .unwrap_or("");
        let category = pluck(&issue, &["fields", "status", "statusCategory", "key"])
            .and_then(Value::as_str)
            .unwrap_or("new");
        let symbol = status_category_style(category).symbol;
        let indent = "  ".repeat(depth);

        match self.format {
            ReportFormat::Summary => {
                lines.push(format!("{indent}{symbol} {key} {summary}"));
            }
            ReportFormat::Markdown => {
                lines.push(format!(
                    "{indent}- {symbol} [{key}]({}/browse/{key}) {summary}",
                    self.base_url
                ));
            }
            ReportFormat::Branch => {
                // No assignee email means no branch to suggest; the subtree
                // is skipped along with the node.
                let Some(email) = pluck(&issue, &["fields", "assignee", "emailAddress"])
                    .and_then(Value::as_str)
                else {
                    return Ok(());
                };
                let local_part = email_local_part(email);
                let slug = branch_slug(key, summary);
                lines.push(format!("{indent}{symbol} {local_part}/{slug}"));
            }
        }

        // One relation per destination, first-seen destination order.
        let mut order: Vec<String> = Vec::new();
        let mut relations: HashMap<String, String> = HashMap::new();
        for (relation, destination) in self.cache.link_rows(key)? {
            if !relations.contains_key(&destination) {
                order.push(destination.clone());
            }
            relations.insert(destination, relation);
        }

        for destination in order {
            if WALKABLE_RELATIONS.contains(&relations[&destination].as_str()) {
                self.walk(&destination, depth + 1, visited, lines)?;
            }
        }
        Ok(())
    }
}

/// `jane.doe@example.com` -> `jane`.
fn email_local_part(email: &str) -> String {
    static CUT: OnceLock<Regex> = OnceLock::new();
    let cut = CUT.get_or_init(|| Regex::new(r"[\.@].*").expect("static regex"));
    cut.replace(email, "").into_owned()
}

/// `PROJ-3` + `Fix [URGENT] login bug` -> `PROJ-3-fix-login-bug`: bracketed
/// tags dropped, everything lowercased, non-alphanumeric runs collapsed.
fn branch_slug(key: &str, summary: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"\[[^\]]+\]").expect("static regex"));
    let non_alnum = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-zA-Z0-9]+").expect("static regex"));

    let branch = format!("{key}-{}", summary.to_lowercase());
    let branch = tags.replace_all(&branch, "");
    non_alnum.replace_all(&branch, "-").into_owned()
}
