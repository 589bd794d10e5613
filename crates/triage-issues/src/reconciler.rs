//! Issue lifecycle reconciliation keyed by failure fingerprint.
//!
//! Each invocation searches the tracker fresh and then creates, updates,
//! suppresses, or closes. There is no local index and no lock: two concurrent
//! invocations with the same fingerprint can both miss the search and both
//! create, which is accepted as a known limitation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use triage_core::{Category, Fingerprint, JobIdentity, RepoRef};

use crate::dedupe_policy::{DedupePolicy, LabelPolicy};
use crate::issue_markers::{
    append_fingerprint_marker, append_job_identity_marker, build_issue_labels, clamp_issue_body,
    clamp_issue_title, issue_carries_fingerprint, issue_carries_job_identity, render_issue_title,
    title_belongs_to_workflow, workflow_title_head, DEFAULT_TITLE_PREFIX,
};
use crate::tracker::{IssueHandle, IssueQuery, IssueTracker, NewIssue, TrackedIssue, TrackerError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
/// Enumerates supported `SuppressionReason` values.
pub enum SuppressionReason {
    Snoozed {
        until: DateTime<Utc>,
    },
    RateLimited {
        issue_number: u64,
        created_at: DateTime<Utc>,
        window_hours: u32,
    },
    SoftCapReached {
        open_count: usize,
        cap: usize,
    },
}

impl SuppressionReason {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Snoozed { .. } => "snoozed",
            Self::RateLimited { .. } => "rate_limited",
            Self::SoftCapReached { .. } => "soft_cap_reached",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Snoozed { until } => {
                format!("issue creation snoozed until {}", until.to_rfc3339())
            }
            Self::RateLimited {
                issue_number,
                created_at,
                window_hours,
            } => format!(
                "issue #{issue_number} for this fingerprint was created at {} (within {window_hours}h rate limit)",
                created_at.to_rfc3339()
            ),
            Self::SoftCapReached { open_count, cap } => format!(
                "{open_count} open failure issues for this workflow already meet the cap of {cap}"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
/// Enumerates supported `ReconcileOutcome` values.
pub enum ReconcileOutcome {
    Created(IssueHandle),
    Updated(IssueHandle),
    Suppressed(SuppressionReason),
}

impl ReconcileOutcome {
    pub fn issue(&self) -> Option<&IssueHandle> {
        match self {
            Self::Created(handle) | Self::Updated(handle) => Some(handle),
            Self::Suppressed(_) => None,
        }
    }

    pub fn suppression(&self) -> Option<&SuppressionReason> {
        match self {
            Self::Suppressed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Created(_) => "issue_created",
            Self::Updated(_) => "issue_updated",
            Self::Suppressed(reason) => reason.reason_code(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Failure description handed to the reconciler. `body` is already rendered
/// and redacted.
pub struct FailureDraft {
    pub fingerprint: Fingerprint,
    pub job_identity: JobIdentity,
    pub category: Category,
    pub workflow_name: String,
    pub job_name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Input of [`IssueReconciler::create_or_update`].
pub struct IssueRequest {
    pub existing: Option<TrackedIssue>,
    pub title: String,
    pub body: String,
    pub fingerprint: Fingerprint,
    pub job_identity: JobIdentity,
    pub category: Category,
    pub workflow_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Result of a full create-mode invocation.
pub struct FailureReport {
    pub fingerprint: Fingerprint,
    pub category: Category,
    pub deduped: bool,
    pub matched_issue: Option<u64>,
    pub outcome: ReconcileOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ReconcilerConfig` used across CI triage components.
pub struct ReconcilerConfig {
    pub scope: RepoRef,
    pub policy: DedupePolicy,
    pub labels: LabelPolicy,
    pub title_prefix: String,
}

impl ReconcilerConfig {
    pub fn new(scope: RepoRef) -> Self {
        Self {
            scope,
            policy: DedupePolicy::default(),
            labels: LabelPolicy::default(),
            title_prefix: DEFAULT_TITLE_PREFIX.to_string(),
        }
    }
}

#[derive(Clone)]
/// Drives create/update/suppress/close decisions against one tracker scope.
pub struct IssueReconciler {
    tracker: Arc<dyn IssueTracker>,
    config: ReconcilerConfig,
}

impl IssueReconciler {
    pub fn new(tracker: Arc<dyn IssueTracker>, config: ReconcilerConfig) -> Self {
        Self { tracker, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn render_title(&self, draft: &FailureDraft) -> String {
        render_issue_title(
            &self.config.title_prefix,
            &draft.workflow_name,
            &draft.job_name,
            &draft.category,
            &draft.fingerprint,
        )
    }

    /// Oldest open issue carrying the fingerprint in its title or body marker.
    pub async fn find_existing_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<TrackedIssue>, TrackerError> {
        let mut matches = self.open_issues_with_fingerprint(fingerprint).await?;
        if matches.len() > 1 {
            warn!(
                fingerprint = %fingerprint,
                count = matches.len(),
                "multiple open issues share one fingerprint; using the oldest"
            );
        }
        matches.sort_by_key(|issue| issue.number);
        Ok(matches.into_iter().next())
    }

    async fn open_issues_with_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Vec<TrackedIssue>, TrackerError> {
        let query = IssueQuery::open_with_term(fingerprint.as_str());
        let found = self.tracker.search(&self.config.scope, &query).await?;
        Ok(found
            .into_iter()
            .filter(|issue| {
                issue.is_open()
                    && issue_carries_fingerprint(&issue.title, issue.body.as_deref(), fingerprint)
            })
            .collect())
    }

    /// Full create-mode flow: snooze gate, lookup, then create or update.
    pub async fn report_failure(
        &self,
        draft: FailureDraft,
        now: DateTime<Utc>,
    ) -> Result<FailureReport, TrackerError> {
        if let Some(until) = self.config.policy.snooze_until.filter(|_| {
            self.config.policy.is_snoozed_at(now)
        }) {
            info!(
                fingerprint = %draft.fingerprint,
                until = %until.to_rfc3339(),
                "failure reporting snoozed; no tracker calls made"
            );
            return Ok(FailureReport {
                fingerprint: draft.fingerprint,
                category: draft.category,
                deduped: false,
                matched_issue: None,
                outcome: ReconcileOutcome::Suppressed(SuppressionReason::Snoozed { until }),
            });
        }

        let existing = self.find_existing_by_fingerprint(&draft.fingerprint).await?;
        let matched_issue = existing.as_ref().map(|issue| issue.number);
        debug!(
            fingerprint = %draft.fingerprint,
            matched_issue = ?matched_issue,
            "fingerprint lookup finished"
        );
        let request = IssueRequest {
            existing,
            title: self.render_title(&draft),
            body: draft.body,
            fingerprint: draft.fingerprint.clone(),
            job_identity: draft.job_identity,
            category: draft.category.clone(),
            workflow_name: draft.workflow_name,
        };
        let outcome = self.create_or_update(request, now).await?;
        let deduped = matches!(outcome, ReconcileOutcome::Updated(_));
        Ok(FailureReport {
            fingerprint: draft.fingerprint,
            category: draft.category,
            deduped,
            matched_issue,
            outcome,
        })
    }

    pub async fn create_or_update(
        &self,
        request: IssueRequest,
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome, TrackerError> {
        let title = clamp_issue_title(
            &title_with_fingerprint(&request.title, &request.fingerprint),
            &request.fingerprint,
        );
        let body = append_job_identity_marker(
            &append_fingerprint_marker(&clamp_issue_body(&request.body), &request.fingerprint),
            &request.job_identity,
        );
        let labels = build_issue_labels(
            &self.config.labels.failure_label,
            self.config
                .labels
                .additional_labels
                .iter()
                .map(String::as_str),
            self.config
                .labels
                .include_category_label
                .then_some(&request.category),
        );

        if let Some(existing) = request
            .existing
            .as_ref()
            .filter(|_| !self.config.policy.bypasses_existing())
        {
            let handle = self
                .tracker
                .update(&self.config.scope, existing.number, &title, &body)
                .await?;
            self.ensure_labels(&labels).await?;
            if !labels.is_empty() {
                self.tracker
                    .add_labels(&self.config.scope, existing.number, &labels)
                    .await?;
            }
            info!(
                fingerprint = %request.fingerprint,
                issue_number = handle.number,
                "updated existing failure issue"
            );
            return Ok(ReconcileOutcome::Updated(handle));
        }

        if let Some(reason) = self
            .creation_suppression(&request.fingerprint, &request.workflow_name, now)
            .await?
        {
            info!(
                fingerprint = %request.fingerprint,
                reason_code = reason.reason_code(),
                "suppressed failure issue creation: {}",
                reason.describe()
            );
            return Ok(ReconcileOutcome::Suppressed(reason));
        }

        self.ensure_labels(&labels).await?;
        let handle = self
            .tracker
            .create(
                &self.config.scope,
                &NewIssue {
                    title,
                    body,
                    labels,
                },
            )
            .await?;
        info!(
            fingerprint = %request.fingerprint,
            issue_number = handle.number,
            "created failure issue"
        );
        Ok(ReconcileOutcome::Created(handle))
    }

    async fn creation_suppression(
        &self,
        fingerprint: &Fingerprint,
        workflow_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SuppressionReason>, TrackerError> {
        let policy = &self.config.policy;
        if let Some(until) = policy.snooze_until.filter(|_| policy.is_snoozed_at(now)) {
            return Ok(Some(SuppressionReason::Snoozed { until }));
        }

        if let Some(window) = policy.rate_limit_window() {
            let query = IssueQuery::any_state_with_term(fingerprint.as_str());
            let latest = self
                .tracker
                .search(&self.config.scope, &query)
                .await?
                .into_iter()
                .filter(|issue| {
                    issue_carries_fingerprint(&issue.title, issue.body.as_deref(), fingerprint)
                })
                .max_by_key(|issue| issue.created_at);
            if let Some(latest) = latest {
                if now.signed_duration_since(latest.created_at) < window {
                    return Ok(Some(SuppressionReason::RateLimited {
                        issue_number: latest.number,
                        created_at: latest.created_at,
                        window_hours: policy.rate_limit_hours,
                    }));
                }
            }
        }

        if let Some(cap) = policy.soft_cap() {
            let head = workflow_title_head(&self.config.title_prefix, workflow_name);
            let query = IssueQuery::open_with_term(head)
                .with_label(self.config.labels.failure_label.clone());
            let open_count = self
                .tracker
                .search(&self.config.scope, &query)
                .await?
                .iter()
                .filter(|issue| {
                    issue.is_open()
                        && title_belongs_to_workflow(
                            &issue.title,
                            &self.config.title_prefix,
                            workflow_name,
                        )
                })
                .count();
            if open_count >= cap {
                return Ok(Some(SuppressionReason::SoftCapReached { open_count, cap }));
            }
        }

        Ok(None)
    }

    async fn ensure_labels(&self, labels: &[String]) -> Result<(), TrackerError> {
        for label in labels {
            self.tracker.ensure_label(&self.config.scope, label).await?;
        }
        Ok(())
    }

    /// Close-on-success: close every open issue for the fingerprint.
    ///
    /// Returns false without mutating anything when none is open.
    pub async fn close_if_open_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<bool, TrackerError> {
        let mut matches = self.open_issues_with_fingerprint(fingerprint).await?;
        if matches.is_empty() {
            debug!(fingerprint = %fingerprint, "no open failure issue to close");
            return Ok(false);
        }
        matches.sort_by_key(|issue| issue.number);
        for issue in &matches {
            self.tracker.close(&self.config.scope, issue.number).await?;
            info!(
                fingerprint = %fingerprint,
                issue_number = issue.number,
                "closed failure issue after successful run"
            );
        }
        Ok(true)
    }

    /// Close-on-success for a green run: close every open issue whose body
    /// carries the job identity, whatever errors the failing run reported.
    ///
    /// Returns the closed issue numbers in ascending order.
    pub async fn close_open_by_job_identity(
        &self,
        identity: &JobIdentity,
    ) -> Result<Vec<u64>, TrackerError> {
        let query = IssueQuery::open_with_term(identity.as_str());
        let mut numbers = self
            .tracker
            .search(&self.config.scope, &query)
            .await?
            .into_iter()
            .filter(|issue| {
                issue.is_open() && issue_carries_job_identity(issue.body.as_deref(), identity)
            })
            .map(|issue| issue.number)
            .collect::<Vec<_>>();
        if numbers.is_empty() {
            debug!(job_identity = %identity, "no open failure issue for this job");
            return Ok(numbers);
        }
        numbers.sort_unstable();
        numbers.dedup();
        for number in &numbers {
            self.tracker.close(&self.config.scope, *number).await?;
            info!(
                job_identity = %identity,
                issue_number = *number,
                "closed failure issue after successful run"
            );
        }
        Ok(numbers)
    }
}

fn title_with_fingerprint(title: &str, fingerprint: &Fingerprint) -> String {
    if title.contains(fingerprint.as_str()) {
        title.trim().to_string()
    } else {
        format!("{} [{fingerprint}]", title.trim())
    }
}
