//! In-process [`IssueTracker`] used by tests and local dry runs.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use triage_core::RepoRef;

use crate::issue_markers::normalize_issue_label;
use crate::tracker::{
    IssueHandle, IssueQuery, IssueState, IssueStateFilter, IssueTracker, NewIssue, TrackedIssue,
    TrackerError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `TrackerCall` values.
pub enum TrackerCall {
    Search(IssueQuery),
    Create { title: String, labels: Vec<String> },
    Update { number: u64, title: String },
    Close { number: u64 },
    EnsureLabel(String),
    AddLabels { number: u64, labels: Vec<String> },
}

impl TrackerCall {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Search(_))
    }

    fn operation(&self) -> &'static str {
        match self {
            Self::Search(_) => "search",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Close { .. } => "close",
            Self::EnsureLabel(_) => "ensure_label",
            Self::AddLabels { .. } => "add_labels",
        }
    }
}

#[derive(Debug, Clone)]
struct StoredIssue {
    scope: RepoRef,
    issue: TrackedIssue,
}

#[derive(Debug, Default)]
struct TrackerState {
    issues: Vec<StoredIssue>,
    labels: HashSet<(String, String)>,
    calls: Vec<TrackerCall>,
    now: Option<DateTime<Utc>>,
    failing_operation: Option<&'static str>,
}

#[derive(Debug, Default)]
/// Tracker backed by a mutex-guarded vector.
pub struct InMemoryTracker {
    state: Mutex<TrackerState>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creation timestamp stamped on issues created from now on.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.lock().now = Some(now);
    }

    /// Make every later call of `operation` fail with HTTP 500.
    pub fn fail_operation(&self, operation: &'static str) {
        self.lock().failing_operation = Some(operation);
    }

    pub fn seed_issue(
        &self,
        scope: &RepoRef,
        title: &str,
        body: Option<&str>,
        state: IssueState,
        created_at: DateTime<Utc>,
        labels: &[&str],
    ) -> u64 {
        let mut guard = self.lock();
        let number = next_issue_number(&guard);
        guard.issues.push(StoredIssue {
            scope: scope.clone(),
            issue: TrackedIssue {
                number,
                title: title.to_string(),
                body: body.map(ToOwned::to_owned),
                state,
                created_at,
                url: issue_url(scope, number),
                labels: labels.iter().map(|label| label.to_string()).collect(),
            },
        });
        number
    }

    pub fn issue(&self, scope: &RepoRef, number: u64) -> Option<TrackedIssue> {
        self.lock()
            .issues
            .iter()
            .find(|stored| &stored.scope == scope && stored.issue.number == number)
            .map(|stored| stored.issue.clone())
    }

    pub fn issues(&self, scope: &RepoRef) -> Vec<TrackedIssue> {
        self.lock()
            .issues
            .iter()
            .filter(|stored| &stored.scope == scope)
            .map(|stored| stored.issue.clone())
            .collect()
    }

    pub fn open_issue_count(&self, scope: &RepoRef) -> usize {
        self.issues(scope)
            .iter()
            .filter(|issue| issue.is_open())
            .count()
    }

    pub fn has_label(&self, scope: &RepoRef, name: &str) -> bool {
        self.lock()
            .labels
            .contains(&(scope.as_slug(), normalize_issue_label(name)))
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        self.lock().calls.clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn record(&self, call: TrackerCall) -> Result<MutexGuard<'_, TrackerState>, TrackerError> {
        let mut guard = self.lock();
        let operation = call.operation();
        guard.calls.push(call);
        if guard.failing_operation == Some(operation) {
            return Err(TrackerError::Status {
                operation: operation.to_string(),
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        Ok(guard)
    }
}

fn next_issue_number(state: &TrackerState) -> u64 {
    state
        .issues
        .iter()
        .map(|stored| stored.issue.number)
        .max()
        .unwrap_or(0)
        .saturating_add(1)
}

fn issue_url(scope: &RepoRef, number: u64) -> String {
    format!("https://tracker.invalid/{}/issues/{number}", scope.as_slug())
}

fn matches_query(issue: &TrackedIssue, query: &IssueQuery) -> bool {
    if query.state == IssueStateFilter::Open && !issue.is_open() {
        return false;
    }
    let haystack = format!(
        "{}\n{}",
        issue.title.to_lowercase(),
        issue.body.as_deref().unwrap_or_default().to_lowercase()
    );
    let terms_match = query
        .terms
        .iter()
        .all(|term| haystack.contains(&term.to_lowercase()));
    let issue_labels = issue
        .labels
        .iter()
        .map(|label| normalize_issue_label(label))
        .collect::<HashSet<_>>();
    let labels_match = query
        .labels
        .iter()
        .all(|label| issue_labels.contains(&normalize_issue_label(label)));
    terms_match && labels_match
}

#[async_trait]
impl IssueTracker for InMemoryTracker {
    async fn search(
        &self,
        scope: &RepoRef,
        query: &IssueQuery,
    ) -> Result<Vec<TrackedIssue>, TrackerError> {
        let guard = self.record(TrackerCall::Search(query.clone()))?;
        Ok(guard
            .issues
            .iter()
            .filter(|stored| &stored.scope == scope && matches_query(&stored.issue, query))
            .map(|stored| stored.issue.clone())
            .collect())
    }

    async fn create(&self, scope: &RepoRef, issue: &NewIssue) -> Result<IssueHandle, TrackerError> {
        let mut guard = self.record(TrackerCall::Create {
            title: issue.title.clone(),
            labels: issue.labels.clone(),
        })?;
        let number = next_issue_number(&guard);
        let created_at = guard.now.unwrap_or_else(Utc::now);
        let url = issue_url(scope, number);
        guard.issues.push(StoredIssue {
            scope: scope.clone(),
            issue: TrackedIssue {
                number,
                title: issue.title.clone(),
                body: Some(issue.body.clone()),
                state: IssueState::Open,
                created_at,
                url: url.clone(),
                labels: issue.labels.clone(),
            },
        });
        Ok(IssueHandle { number, url })
    }

    async fn update(
        &self,
        scope: &RepoRef,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<IssueHandle, TrackerError> {
        let mut guard = self.record(TrackerCall::Update {
            number,
            title: title.to_string(),
        })?;
        let stored = guard
            .issues
            .iter_mut()
            .find(|stored| &stored.scope == scope && stored.issue.number == number)
            .ok_or(TrackerError::NotFound(number))?;
        stored.issue.title = title.to_string();
        stored.issue.body = Some(body.to_string());
        Ok(IssueHandle {
            number,
            url: stored.issue.url.clone(),
        })
    }

    async fn close(&self, scope: &RepoRef, number: u64) -> Result<IssueHandle, TrackerError> {
        let mut guard = self.record(TrackerCall::Close { number })?;
        let stored = guard
            .issues
            .iter_mut()
            .find(|stored| &stored.scope == scope && stored.issue.number == number)
            .ok_or(TrackerError::NotFound(number))?;
        stored.issue.state = IssueState::Closed;
        Ok(IssueHandle {
            number,
            url: stored.issue.url.clone(),
        })
    }

    async fn ensure_label(&self, scope: &RepoRef, name: &str) -> Result<(), TrackerError> {
        let mut guard = self.record(TrackerCall::EnsureLabel(name.to_string()))?;
        guard
            .labels
            .insert((scope.as_slug(), normalize_issue_label(name)));
        Ok(())
    }

    async fn add_labels(
        &self,
        scope: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> Result<(), TrackerError> {
        let mut guard = self.record(TrackerCall::AddLabels {
            number,
            labels: labels.to_vec(),
        })?;
        let stored = guard
            .issues
            .iter_mut()
            .find(|stored| &stored.scope == scope && stored.issue.number == number)
            .ok_or(TrackerError::NotFound(number))?;
        for label in labels {
            let normalized = normalize_issue_label(label);
            let present = stored
                .issue
                .labels
                .iter()
                .any(|existing| normalize_issue_label(existing) == normalized);
            if !present {
                stored.issue.labels.push(label.clone());
            }
        }
        Ok(())
    }
}
