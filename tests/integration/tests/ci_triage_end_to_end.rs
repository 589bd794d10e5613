use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use clap::Parser;
use httpmock::prelude::*;
use serde_json::json;
use triage_cli::{run_triage, Cli, TriageSettings};
use triage_core::RepoRef;
use triage_github::{GithubIssueTracker, GithubTrackerConfig};
use triage_issues::{
    DedupePolicy, FailureDraft, InMemoryTracker, IssueHandle, IssueQuery, IssueReconciler,
    IssueState, IssueTracker, NewIssue, ReconcileOutcome, ReconcilerConfig, TrackedIssue,
    TrackerError,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
}

fn actions_env(key: &str) -> Option<String> {
    let env = HashMap::from([
        ("GITHUB_REPOSITORY", "acme/widgets"),
        ("GITHUB_WORKFLOW", "Release"),
        ("GITHUB_JOB", "deploy-prod"),
        ("GITHUB_RUN_ID", "777"),
        ("GITHUB_RUN_ATTEMPT", "1"),
        ("GITHUB_SHA", "feedfacecafe1234"),
        ("GITHUB_REF_NAME", "main"),
        ("GITHUB_SERVER_URL", "https://github.com"),
    ]);
    env.get(key).map(|value| value.to_string())
}

fn settings(args: &[&str]) -> TriageSettings {
    let mut argv = vec!["ci-triage"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv).expect("parse cli");
    TriageSettings::from_cli(&cli, actions_env).expect("settings")
}

fn github_tracker(server: &MockServer) -> Arc<dyn IssueTracker> {
    Arc::new(
        GithubIssueTracker::new(GithubTrackerConfig {
            api_base: server.base_url(),
            token: "test-token".to_string(),
            request_timeout_ms: 2_000,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
        })
        .expect("github tracker"),
    )
}

#[tokio::test]
async fn integration_first_failure_creates_labelled_issue_on_github() {
    let settings = settings(&["--error-signature", "Error: helm upgrade timed out after 300s"]);
    assert_eq!(settings.category.as_str(), "deployment");
    let fingerprint = settings.fingerprint.to_string();

    let server = MockServer::start();
    let search = server.mock(|when, then| {
        when.method(GET).path("/search/issues");
        then.status(200)
            .json_body(json!({ "total_count": 0, "items": [] }));
    });
    let labels = server.mock(|when, then| {
        when.method(POST).path("/repos/acme/widgets/labels");
        then.status(201).json_body(json!({ "name": "label" }));
    });
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/issues")
            .body_includes(format!("[{fingerprint}]"))
            .body_includes("Deployment failure in Release")
            .body_includes(format!("ci-triage:fingerprint:{fingerprint}"));
        then.status(201).json_body(json!({
            "number": 88,
            "html_url": "https://github.com/acme/widgets/issues/88"
        }));
    });

    let outputs = run_triage(&settings, github_tracker(&server), now())
        .await
        .expect("run triage");

    search.assert_calls(1);
    labels.assert_calls(2);
    create.assert_calls(1);
    assert_eq!(outputs.issue_number, Some(88));
    assert_eq!(
        outputs.issue_url.as_deref(),
        Some("https://github.com/acme/widgets/issues/88")
    );
    assert!(!outputs.deduped);
    assert!(!outputs.suppressed);
}

#[tokio::test]
async fn integration_repeat_failure_updates_existing_github_issue() {
    let settings = settings(&[]);
    let fingerprint = settings.fingerprint.to_string();

    let server = MockServer::start();
    let search = server.mock(|when, then| {
        when.method(GET).path("/search/issues");
        then.status(200).json_body(json!({
            "total_count": 1,
            "items": [{
                "number": 5,
                "title": format!("CI failure: Release / deploy-prod [deployment] [{fingerprint}]"),
                "body": "old body",
                "state": "open",
                "created_at": "2026-03-13T08:00:00Z",
                "html_url": "https://github.com/acme/widgets/issues/5",
                "labels": [{ "name": "ci-failure" }]
            }]
        }));
    });
    let update = server.mock(|when, then| {
        when.method(PATCH)
            .path("/repos/acme/widgets/issues/5")
            .body_includes(format!("ci-triage:fingerprint:{fingerprint}"));
        then.status(200).json_body(json!({
            "number": 5,
            "html_url": "https://github.com/acme/widgets/issues/5"
        }));
    });
    let ensure = server.mock(|when, then| {
        when.method(POST).path("/repos/acme/widgets/labels");
        then.status(422).json_body(json!({ "message": "Validation Failed" }));
    });
    let add_labels = server.mock(|when, then| {
        when.method(POST)
            .path("/repos/acme/widgets/issues/5/labels")
            .body_includes("deployment");
        then.status(200).json_body(json!([{ "name": "ci-failure" }, { "name": "deployment" }]));
    });
    let create = server.mock(|when, then| {
        when.method(POST).path("/repos/acme/widgets/issues");
        then.status(201).json_body(json!({ "number": 6 }));
    });

    let outputs = run_triage(&settings, github_tracker(&server), now())
        .await
        .expect("run triage");

    search.assert_calls(1);
    update.assert_calls(1);
    ensure.assert_calls(2);
    add_labels.assert_calls(1);
    create.assert_calls(0);
    assert!(outputs.deduped);
    assert_eq!(outputs.issue_number, Some(5));
}

#[tokio::test]
async fn integration_close_on_success_closes_matching_github_issue() {
    let failing = settings(&["--error-signature", "Error: helm upgrade timed out after 300s"]);
    let settings = settings(&["--mode", "close-on-success"]);
    assert_ne!(settings.fingerprint, failing.fingerprint);
    let fingerprint = failing.fingerprint.to_string();
    let job_identity = settings.job_identity.to_string();

    let server = MockServer::start();
    let search = server.mock(|when, then| {
        when.method(GET)
            .path("/search/issues")
            .query_param(
                "q",
                format!("repo:acme/widgets is:issue is:open \"{job_identity}\" in:title,body"),
            );
        then.status(200).json_body(json!({
            "total_count": 1,
            "items": [{
                "number": 5,
                "title": format!("CI failure: Release / deploy-prod [deployment] [{fingerprint}]"),
                "body": format!(
                    "details\n\n<!-- ci-triage:fingerprint:{fingerprint} -->\n\n<!-- ci-triage:job:{job_identity} -->"
                ),
                "state": "open",
                "created_at": "2026-03-13T08:00:00Z"
            }]
        }));
    });
    let close = server.mock(|when, then| {
        when.method(PATCH)
            .path("/repos/acme/widgets/issues/5")
            .body_includes("\"state\":\"closed\"");
        then.status(200).json_body(json!({ "number": 5 }));
    });

    let outputs = run_triage(&settings, github_tracker(&server), now())
        .await
        .expect("run triage");
    search.assert_calls(1);
    close.assert_calls(1);
    assert!(outputs.resolved);
    assert_eq!(outputs.issue_number, Some(5));
}

#[tokio::test]
async fn integration_tracker_failure_surfaces_as_error() {
    let settings = settings(&[]);
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/search/issues");
        then.status(403).body("rate limited");
    });

    let error = run_triage(&settings, github_tracker(&server), now())
        .await
        .expect_err("search failure");
    let chain = format!("{error:#}");
    assert!(chain.contains("failed to reconcile failure issue"));
    assert!(chain.contains("status 403"));
}

/// Search that lags behind writes, like a tracker search index.
struct LaggingSearchTracker {
    inner: InMemoryTracker,
    visible_up_to: Mutex<u64>,
}

impl LaggingSearchTracker {
    fn new() -> Self {
        let inner = InMemoryTracker::new();
        inner.set_now(now());
        Self {
            inner,
            visible_up_to: Mutex::new(0),
        }
    }

    fn catch_up(&self, number: u64) {
        if let Ok(mut visible) = self.visible_up_to.lock() {
            *visible = number;
        }
    }
}

#[async_trait]
impl IssueTracker for LaggingSearchTracker {
    async fn search(
        &self,
        scope: &RepoRef,
        query: &IssueQuery,
    ) -> Result<Vec<TrackedIssue>, TrackerError> {
        let visible = self.visible_up_to.lock().map(|value| *value).unwrap_or(0);
        let found = self.inner.search(scope, query).await?;
        Ok(found
            .into_iter()
            .filter(|issue| issue.number <= visible)
            .collect())
    }

    async fn create(&self, scope: &RepoRef, issue: &NewIssue) -> Result<IssueHandle, TrackerError> {
        self.inner.create(scope, issue).await
    }

    async fn update(
        &self,
        scope: &RepoRef,
        number: u64,
        title: &str,
        body: &str,
    ) -> Result<IssueHandle, TrackerError> {
        self.inner.update(scope, number, title, body).await
    }

    async fn close(&self, scope: &RepoRef, number: u64) -> Result<IssueHandle, TrackerError> {
        self.inner.close(scope, number).await
    }

    async fn ensure_label(&self, scope: &RepoRef, name: &str) -> Result<(), TrackerError> {
        self.inner.ensure_label(scope, name).await
    }

    async fn add_labels(
        &self,
        scope: &RepoRef,
        number: u64,
        labels: &[String],
    ) -> Result<(), TrackerError> {
        self.inner.add_labels(scope, number, labels).await
    }
}

#[tokio::test]
async fn regression_lagging_search_duplicates_converge_on_oldest_issue() {
    let settings = settings(&[]);
    let scope = RepoRef::new("acme", "widgets");
    let tracker = Arc::new(LaggingSearchTracker::new());
    let reconciler = IssueReconciler::new(
        tracker.clone(),
        ReconcilerConfig {
            policy: DedupePolicy::default(),
            ..ReconcilerConfig::new(scope.clone())
        },
    );
    let draft = FailureDraft {
        fingerprint: settings.fingerprint.clone(),
        job_identity: settings.job_identity.clone(),
        category: settings.category.clone(),
        workflow_name: "Release".to_string(),
        job_name: "deploy-prod".to_string(),
        body: "body".to_string(),
    };

    let first = reconciler
        .report_failure(draft.clone(), now())
        .await
        .expect("first");
    let second = reconciler
        .report_failure(draft.clone(), now())
        .await
        .expect("second");
    assert!(matches!(first.outcome, ReconcileOutcome::Created(_)));
    assert!(matches!(second.outcome, ReconcileOutcome::Created(_)));
    assert_eq!(tracker.inner.open_issue_count(&scope), 2);

    tracker.catch_up(2);
    let third = reconciler
        .report_failure(draft.clone(), now())
        .await
        .expect("third");
    assert_eq!(third.matched_issue, Some(1));
    assert!(third.deduped);

    assert!(reconciler
        .close_if_open_by_fingerprint(&draft.fingerprint)
        .await
        .expect("close"));
    assert_eq!(tracker.inner.open_issue_count(&scope), 0);
    assert_eq!(
        tracker.inner.issue(&scope, 2).map(|issue| issue.state),
        Some(IssueState::Closed)
    );
}
