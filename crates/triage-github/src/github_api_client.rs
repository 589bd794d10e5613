use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use triage_core::RepoRef;
use triage_issues::{
    IssueHandle, IssueQuery, IssueState, IssueTracker, NewIssue, TrackedIssue, TrackerError,
};

use crate::github_search_query::{render_search_query, SEARCH_PAGE_SIZE, SEARCH_RESULT_LIMIT};
use crate::github_transport_helpers::{
    is_retryable_github_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";
const RETRY_ATTEMPT_HEADER: &str = "x-ci-triage-retry-attempt";
const LABEL_DESCRIPTION: &str = "Managed by ci-triage";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Connection settings for [`GithubIssueTracker`].
///
/// `retry_max_attempts` counts the first attempt, so 1 disables retries.
pub struct GithubTrackerConfig {
    pub api_base: String,
    pub token: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl GithubTrackerConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            token: token.into(),
            request_timeout_ms: 15_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubSearchResponse {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    items: Vec<GithubIssue>,
}

#[derive(Debug, Deserialize)]
struct GithubIssueLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GithubIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    html_url: String,
    #[serde(default)]
    labels: Vec<GithubIssueLabel>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl GithubIssue {
    fn into_tracked(self) -> TrackedIssue {
        let state = if self.state.eq_ignore_ascii_case("open") {
            IssueState::Open
        } else {
            IssueState::Closed
        };
        TrackedIssue {
            number: self.number,
            title: self.title,
            body: self.body,
            state,
            created_at: self.created_at,
            url: self.html_url,
            labels: self.labels.into_iter().map(|label| label.name).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GithubIssueRef {
    number: u64,
    #[serde(default)]
    html_url: String,
}

impl From<GithubIssueRef> for IssueHandle {
    fn from(value: GithubIssueRef) -> Self {
        Self {
            number: value.number,
            url: value.html_url,
        }
    }
}

/// Stable six-digit hex color derived from the label name.
pub fn label_color(name: &str) -> String {
    let digest = Sha256::digest(name.trim().to_ascii_lowercase().as_bytes());
    digest[..3].iter().map(|byte| format!("{byte:02x}")).collect()
}

#[derive(Clone)]
/// [`IssueTracker`] adapter for the GitHub REST API.
pub struct GithubIssueTracker {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl GithubIssueTracker {
    pub fn new(config: GithubTrackerConfig) -> Result<Self, TrackerError> {
        let token = config.token.trim();
        if token.is_empty() {
            return Err(TrackerError::Configuration(
                "github token is required".to_string(),
            ));
        }
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("ci-triage"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {token}");
        let mut auth_value = reqwest::header::HeaderValue::from_str(&auth_header).map_err(|_| {
            TrackerError::Configuration("invalid github authorization header".to_string())
        })?;
        auth_value.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth_value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                TrackerError::Configuration(format!("failed to create github api client: {error}"))
            })?;
        Ok(Self {
            http,
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    fn repo_url(&self, scope: &RepoRef, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{suffix}",
            self.api_base, scope.owner, scope.name
        )
    }

    async fn send<F>(
        &self,
        operation: &str,
        mut request_builder: F,
    ) -> Result<reqwest::Response, TrackerError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_github_status(status.as_u16())
                    {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, retry_after);
                        warn!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying github api request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(TrackerError::Status {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        let delay = retry_delay(self.retry_base_delay_ms, attempt, None);
                        warn!(operation, attempt, "retrying github api request after transport error");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(TrackerError::Transport {
                        operation: operation.to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }
    }

    async fn request_json<T, F>(&self, operation: &str, request_builder: F) -> Result<T, TrackerError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send(operation, request_builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| TrackerError::Decode {
                operation: operation.to_string(),
                message: error.to_string(),
            })
    }
}

#[async_trait]
impl IssueTracker for GithubIssueTracker {
    async fn search(
        &self,
        scope: &RepoRef,
        query: &IssueQuery,
    ) -> Result<Vec<TrackedIssue>, TrackerError> {
        let q = render_search_query(scope, query);
        let url = format!("{}/search/issues", self.api_base);
        let per_page = SEARCH_PAGE_SIZE.to_string();
        let mut page = 1_u32;
        let mut rows = Vec::new();
        let mut fetched = 0_usize;
        loop {
            let page_value = page.to_string();
            let chunk: GithubSearchResponse = self
                .request_json("search issues", || {
                    self.http.get(&url).query(&[
                        ("q", q.as_str()),
                        ("per_page", per_page.as_str()),
                        ("page", page_value.as_str()),
                    ])
                })
                .await?;
            let chunk_len = chunk.items.len();
            fetched = fetched.saturating_add(chunk_len);
            rows.extend(
                chunk
                    .items
                    .into_iter()
                    .filter(|issue| issue.pull_request.is_none())
                    .map(GithubIssue::into_tracked),
            );
            if chunk_len < SEARCH_PAGE_SIZE
                || fetched as u64 >= chunk.total_count
                || fetched >= SEARCH_RESULT_LIMIT
            {
                break;
            }
            page = page.saturating_add(1);
        }
        debug!(query = %q, matches = rows.len(), "github issue search finished");
        Ok(rows)
    }

    async fn create(&self, scope: &RepoRef, issue: &NewIssue) -> Result<IssueHandle, TrackerError> {
        let payload = json!({
            "title": issue.title,
            "body": issue.body,
            "labels": issue.labels,
        });
        let url = self.repo_url(scope, "issues");
        let created: GithubIssueRef = self
            .request_json("create issue", || self.http.post(&url).json(&payload))
            .await?;
        Ok(created.into())
    }

    async fn update(
        &self,
        scope: &RepoRef,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<IssueHandle, TrackerError> {
        let payload = json!({ "title": title, "body": body });
        let url = self.repo_url(scope, &format!("issues/{number}"));
        let updated: GithubIssueRef = self
            .request_json("update issue", || self.http.patch(&url).json(&payload))
            .await?;
        Ok(updated.into())
    }

    async fn close(&self, scope: &RepoRef, number: u64) -> Result<IssueHandle, TrackerError> {
        let payload = json!({ "state": "closed", "state_reason": "completed" });
        let url = self.repo_url(scope, &format!("issues/{number}"));
        let closed: GithubIssueRef = self
            .request_json("close issue", || self.http.patch(&url).json(&payload))
            .await?;
        Ok(closed.into())
    }

    async fn ensure_label(&self, scope: &RepoRef, name: &str) -> Result<(), TrackerError> {
        let payload = json!({
            "name": name,
            "color": label_color(name),
            "description": LABEL_DESCRIPTION,
        });
        let url = self.repo_url(scope, "labels");
        match self
            .send("create label", || self.http.post(&url).json(&payload))
            .await
        {
            Ok(_) => {
                debug!(label = name, "created issue label");
                Ok(())
            }
            Err(TrackerError::Status { status: 422, .. }) => {
                debug!(label = name, "issue label already exists");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    async fn add_labels(
        &self,
        scope: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> Result<(), TrackerError> {
        if labels.is_empty() {
            return Ok(());
        }
        let payload = json!({ "labels": labels });
        let url = self.repo_url(scope, &format!("issues/{number}/labels"));
        self.send("add issue labels", || self.http.post(&url).json(&payload))
            .await?;
        Ok(())
    }
}
