use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use triage_core::RepoRef;

#[derive(Debug, Error)]
/// Enumerates supported `TrackerError` values.
pub enum TrackerError {
    #[error("tracker {operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("tracker {operation} request failed: {message}")]
    Transport { operation: String, message: String },
    #[error("failed to decode tracker {operation} response: {message}")]
    Decode { operation: String, message: String },
    #[error("tracker issue #{0} not found")]
    NotFound(u64),
    #[error("invalid tracker configuration: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `IssueState` values.
pub enum IssueState {
    Open,
    Closed,
}

impl IssueState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Enumerates supported `IssueStateFilter` values.
pub enum IssueStateFilter {
    #[default]
    Open,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Tracked work item as returned by a tracker search.
pub struct TrackedIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: IssueState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl TrackedIssue {
    pub fn is_open(&self) -> bool {
        self.state == IssueState::Open
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Search request: every term must appear in the title or body and every
/// label must be present.
pub struct IssueQuery {
    pub terms: Vec<String>,
    pub labels: Vec<String>,
    pub state: IssueStateFilter,
}

impl IssueQuery {
    pub fn open_with_term(term: impl Into<String>) -> Self {
        Self {
            terms: vec![term.into()],
            labels: Vec::new(),
            state: IssueStateFilter::Open,
        }
    }

    pub fn any_state_with_term(term: impl Into<String>) -> Self {
        Self {
            state: IssueStateFilter::Any,
            ..Self::open_with_term(term)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `NewIssue` used across CI triage components.
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Identifier and link of an issue after a mutation.
pub struct IssueHandle {
    pub number: u64,
    pub url: String,
}

#[async_trait]
/// Capability contract every tracker adapter must satisfy.
///
/// The reconciler only ever talks to the tracker through this trait, so the
/// tracker's own records stay the single source of truth.
pub trait IssueTracker: Send + Sync {
    async fn search(
        &self,
        scope: &RepoRef,
        query: &IssueQuery,
    ) -> Result<Vec<TrackedIssue>, TrackerError>;

    async fn create(&self, scope: &RepoRef, issue: &NewIssue) -> Result<IssueHandle, TrackerError>;

    async fn update(
        &self,
        scope: &RepoRef,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<IssueHandle, TrackerError>;

    async fn close(&self, scope: &RepoRef, number: u64) -> Result<IssueHandle, TrackerError>;

    /// Create the label when missing. Must succeed when it already exists.
    async fn ensure_label(&self, scope: &RepoRef, name: &str) -> Result<(), TrackerError>;

    async fn add_labels(
        &self,
        scope: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> Result<(), TrackerError>;
}

#[cfg(test)]
mod tests {
    use super::{IssueQuery, IssueState, IssueStateFilter, TrackerError};

    #[test]
    fn unit_issue_query_builders_set_state_and_labels() {
        let open = IssueQuery::open_with_term("fp-0123456789ab").with_label("ci-failure");
        assert_eq!(open.state, IssueStateFilter::Open);
        assert_eq!(open.terms, vec!["fp-0123456789ab".to_string()]);
        assert_eq!(open.labels, vec!["ci-failure".to_string()]);

        let any = IssueQuery::any_state_with_term("fp-0123456789ab");
        assert_eq!(any.state, IssueStateFilter::Any);
        assert!(any.labels.is_empty());
    }

    #[test]
    fn unit_tracker_error_messages_surface_operation_and_status() {
        let error = TrackerError::Status {
            operation: "create issue".to_string(),
            status: 403,
            body: "Resource not accessible by integration".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "tracker create issue failed with status 403: Resource not accessible by integration"
        );
        assert_eq!(
            TrackerError::NotFound(7).to_string(),
            "tracker issue #7 not found"
        );
        assert_eq!(IssueState::Closed.as_str(), "closed");
    }
}
