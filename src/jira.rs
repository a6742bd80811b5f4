use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::logging;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// One page of a JQL search. `issues` stays optional so callers can detect
/// a response that violates the expected shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub total: Option<i64>,
    #[serde(default)]
    pub max_results: Option<i64>,
    #[serde(default)]
    pub issues: Option<Vec<Value>>,
}

#[derive(Debug, thiserror::Error)]
pub enum JiraError {
    #[error("jira request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("jira returned HTTP {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode jira response: {source}; body: {body}")]
    Decode {
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid jira base url '{0}'")]
    InvalidBaseUrl(String),
}

#[derive(Debug, Clone)]
pub struct JiraClient {
    pub base_url: String,
    user: String,
    password: String,
    http: Client,
}

impl JiraClient {
    pub fn new(base_url: String, user: String, password: String) -> Result<Self, JiraError> {
        let http = Client::builder().build()?;
        let normalized_base_url = normalize_base_url(&base_url)?;
        Ok(Self {
            base_url: normalized_base_url,
            user,
            password,
            http,
        })
    }

    /// Sends one request, sleeping through rate limiting. A 429 waits for
    /// the server's `Retry-After` (60s when absent) and retries the same
    /// request with no retry cap; every other outcome is returned as-is.
    fn request_through_rate_limit<F>(&self, mut send: F) -> Result<Response, JiraError>
    where
        F: FnMut() -> Result<Response, reqwest::Error>,
    {
        loop {
            let response = send()?;
            if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            let wait = retry_after(&response);
            logging::warn(format!(
                "jira rate limited, retrying in {}s",
                wait.as_secs()
            ));
            thread::sleep(wait);
        }
    }

    fn search_body(&self, jql: &str, start_at: usize, fields: &str) -> Result<String, JiraError> {
        let url = format!("{}/rest/api/3/search", self.base_url);
        let start_at = start_at.to_string();
        let response = self.request_through_rate_limit(|| {
            self.http
                .get(&url)
                .basic_auth(&self.user, Some(&self.password))
                .header("Content-Type", "application/json")
                .query(&[
                    ("jql", jql),
                    ("fields", fields),
                    ("startAt", start_at.as_str()),
                ])
                .send()
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(JiraError::Http { status, body });
        }

        Ok(response.text()?)
    }

    /// Fetches one page of search results starting at `start_at`.
    pub fn search(&self, jql: &str, start_at: usize, fields: &str) -> Result<SearchPage, JiraError> {
        let body = self.search_body(jql, start_at, fields)?;
        serde_json::from_str(&body).map_err(|source| decode_error(source, body))
    }

    /// Same request as `search`, but the response is kept as raw JSON.
    pub fn search_raw(&self, jql: &str, fields: &str) -> Result<Value, JiraError> {
        let body = self.search_body(jql, 0, fields)?;
        serde_json::from_str(&body).map_err(|source| decode_error(source, body))
    }

    /// Paginates a search until every matching record is retrieved.
    pub fn search_all(&self, jql: &str, fields: &str) -> Result<Vec<Value>, JiraError> {
        let mut issues: Vec<Value> = Vec::new();
        loop {
            let page = self.search(jql, issues.len(), fields)?;
            match page.issues {
                Some(batch) if !batch.is_empty() => {
                    issues.extend(batch);
                    if let Some(total) = page.total {
                        if issues.len() as i64 >= total {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(issues)
    }
}

fn decode_error(source: serde_json::Error, body: String) -> JiraError {
    let short_body = if body.len() > 1000 {
        format!("{}...", &body[..1000])
    } else {
        body
    };
    logging::warn(format!(
        "failed decoding jira search response: {}",
        short_body
    ));
    JiraError::Decode {
        source,
        body: short_body,
    }
}

fn normalize_base_url(raw: &str) -> Result<String, JiraError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(JiraError::InvalidBaseUrl(raw.to_string()));
    }

    let mut candidate = trimmed.to_string();

    if candidate.starts_with("https://https//") {
        candidate = candidate.replacen("https://https//", "https://", 1);
    } else if candidate.starts_with("http://http//") {
        candidate = candidate.replacen("http://http//", "http://", 1);
    }

    if candidate.starts_with("https//") {
        candidate = format!("https://{}", candidate.trim_start_matches("https//"));
    } else if candidate.starts_with("http//") {
        candidate = format!("http://{}", candidate.trim_start_matches("http//"));
    } else if !candidate.starts_with("https://") && !candidate.starts_with("http://") {
        candidate = format!("https://{candidate}");
    }

    let parsed =
        reqwest::Url::parse(&candidate).map_err(|_| JiraError::InvalidBaseUrl(raw.to_string()))?;
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn retry_after(response: &Response) -> Duration {
    if let Some(header) = response.headers().get("Retry-After") {
        if let Ok(value) = header.to_str() {
            if let Ok(seconds) = value.parse::<u64>() {
                return Duration::from_secs(seconds);
            }
        }
    }
    DEFAULT_RETRY_AFTER
}
