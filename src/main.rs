use clap::{Parser, Subcommand};
use serde_json::Value;

use jira_cache::cache::CacheStore;
use jira_cache::config::{self, AppConfigOverrides};
use jira_cache::jira::JiraClient;
use jira_cache::normalize;
use jira_cache::progress::ProgressReporter;
use jira_cache::report::{canned_filter, HierarchyReport, ReportFormat, CANNED_FILTERS};
use jira_cache::sync;

#[derive(Debug, Parser)]
#[command(name = "jira-cache", version, about = "Mirror JIRA issues into a local cache and report on them")]
struct Cli {
    /// JIRA base URL (overrides config)
    #[arg(long = "jira-url", global = true)]
    jira_url: Option<String>,

    /// Username to access JIRA (overrides config)
    #[arg(long = "jira-user", global = true)]
    jira_user: Option<String>,

    /// Password or API token to access JIRA (overrides config)
    #[arg(long = "jira-password", global = true)]
    jira_password: Option<String>,

    /// Path of the cache database (overrides config)
    #[arg(long = "cache-path", global = true)]
    cache_path: Option<String>,

    /// Output progress as JSON fragments
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Incrementally sync the cache, then rebuild the derived tables
    Sync,
    /// Dump one search response to stdout as pretty JSON
    Dump {
        /// JQL to search for
        #[arg(long)]
        query: String,

        /// Field selector passed to the search endpoint
        #[arg(long, default_value = "*all")]
        fields: String,
    },
    /// List issues hierarchically, using the cache to attach subtasks
    List {
        /// JQL to search for
        #[arg(long, required_unless_present = "filter", conflicts_with = "filter")]
        query: Option<String>,

        /// Built-in query name
        #[arg(long)]
        filter: Option<String>,

        /// Field selector passed to the search endpoint
        #[arg(long, default_value = "*all")]
        fields: String,

        /// Display format
        #[arg(long, value_enum, default_value = "summary")]
        format: ReportFormat,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut cfg = config::load()?;
    cfg.apply_overrides(&AppConfigOverrides {
        jira_base_url: cli.jira_url.clone(),
        jira_user: cli.jira_user.clone(),
        jira_password: cli.jira_password.clone(),
        cache_db_path: cli.cache_path.clone(),
    })?;

    let reporter = ProgressReporter::new(cli.json);
    let jira = JiraClient::new(
        cfg.jira.base_url.clone(),
        cfg.jira.user.clone(),
        cfg.jira.password.clone(),
    )?;

    match cli.command {
        Command::Sync => {
            let mut cache = CacheStore::open(&cfg.cache_path())?;
            sync::sync(&jira, &mut cache, &reporter)?;
            normalize::rebuild(&cache, &reporter, &cfg.sync.story_points_field)?;
        }
        Command::Dump { query, fields } => {
            let response = jira.search_raw(&query, &fields)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::List {
            query,
            filter,
            fields,
            format,
        } => {
            let jql = match (query, filter) {
                (Some(query), _) => query,
                (None, Some(filter)) => canned_filter(&filter)
                    .ok_or_else(|| {
                        format!(
                            "unknown filter '{filter}'; expected one of: {}",
                            CANNED_FILTERS
                                .iter()
                                .map(|(name, _)| *name)
                                .collect::<Vec<_>>()
                                .join(", ")
                        )
                    })?
                    .to_string(),
                (None, None) => unreachable!("clap requires --query or --filter"),
            };

            let issues = jira.search_all(&jql, &fields)?;
            if issues.is_empty() {
                return Ok(());
            }

            let keys: Vec<String> = issues
                .iter()
                .filter_map(|issue| issue.get("key").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect();

            let cache = CacheStore::open(&cfg.cache_path())?;
            let report = HierarchyReport::new(&cache, jira.base_url.clone(), format);
            for line in report.render(&keys)? {
                println!("{line}");
            }
        }
    }

    Ok(())
}
