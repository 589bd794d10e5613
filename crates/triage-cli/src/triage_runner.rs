use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;
use triage_core::{
    compute_fingerprint, compute_job_identity, Category, CategoryClassifier, Fingerprint,
    JobIdentity, RepoRef, RunContext,
};
use triage_issues::{
    DedupePolicy, FailureDraft, IssueReconciler, IssueTracker, LabelPolicy, ReconcileOutcome,
    ReconcilerConfig,
};
use triage_render::{IssueBodyRenderer, SecretRedactor};

use crate::action_outputs::ActionOutputs;
use crate::cli_args::{Cli, CliTriageMode};
use crate::run_context_env::{collect_error_signatures, run_context_from_env};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Fully resolved inputs of one invocation.
pub struct TriageSettings {
    pub mode: CliTriageMode,
    pub context: RunContext,
    pub category: Category,
    pub fingerprint: Fingerprint,
    pub job_identity: JobIdentity,
    /// Operator-supplied fingerprint that narrows close-on-success.
    pub close_fingerprint: Option<Fingerprint>,
    pub reconciler: ReconcilerConfig,
    pub template_file: Option<PathBuf>,
    pub secrets: Vec<String>,
}

/// Explicit category first, then the classifier, then `general`.
pub fn resolve_category(cli: &Cli, context: &RunContext) -> Result<Category> {
    if let Some(raw) = cli.category.as_deref().filter(|raw| !raw.trim().is_empty()) {
        return Category::parse(raw).with_context(|| format!("invalid --category '{raw}'"));
    }
    if !cli.auto_detect_category {
        return Ok(Category::general());
    }
    let classifier = CategoryClassifier::with_default_rules()
        .with_operator_rules(cli.category_rules.iter().map(String::as_str))
        .context("invalid --category-rule")?;
    Ok(classifier.classify(
        &context.workflow_name,
        &context.job_name,
        &cli.labels.join(" "),
    ))
}

impl TriageSettings {
    pub fn from_cli<F>(cli: &Cli, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut context = run_context_from_env(&lookup);
        let file_contents = match cli.error_signatures_file.as_deref() {
            Some(path) => Some(std::fs::read_to_string(path).with_context(|| {
                format!("failed to read error signatures file {}", path.display())
            })?),
            None => None,
        };
        context.error_signatures =
            collect_error_signatures(&cli.error_signatures, file_contents.as_deref());

        if let Some(raw) = cli.target_repo.as_deref().filter(|raw| !raw.trim().is_empty()) {
            let target = RepoRef::parse(raw).context("invalid --target-repo")?;
            context.target_owner = Some(target.owner);
            context.target_repo = Some(target.name);
        }
        let scope = context.effective_tracker_repo();
        if !scope.is_complete() {
            bail!("tracker repository is unknown; set GITHUB_REPOSITORY or --target-repo");
        }

        if cli.fingerprint.is_some() && cli.mode != CliTriageMode::CloseOnSuccess {
            bail!("--fingerprint is only valid with --mode close-on-success");
        }

        let category = resolve_category(cli, &context)?;
        let fingerprint = compute_fingerprint(&context, &category);
        let job_identity = compute_job_identity(&context);
        let reconciler = ReconcilerConfig {
            scope,
            policy: DedupePolicy {
                strategy: cli.dedupe_strategy.into(),
                always_create_new: cli.always_create_new,
                max_issues_per_workflow: cli.max_issues_per_workflow,
                rate_limit_hours: cli.rate_limit_hours,
                snooze_until: cli.snooze_until,
            },
            labels: LabelPolicy {
                failure_label: cli.failure_label.trim().to_string(),
                additional_labels: cli.labels.clone(),
                include_category_label: cli.category_label,
            },
            title_prefix: cli.title_prefix.clone(),
        };
        Ok(Self {
            mode: cli.mode,
            context,
            category,
            fingerprint,
            job_identity,
            close_fingerprint: cli.fingerprint.clone(),
            reconciler,
            template_file: cli.template_file.clone(),
            secrets: cli.secrets.clone(),
        })
    }

    fn base_outputs(&self, mode: &str) -> ActionOutputs {
        ActionOutputs {
            mode: mode.to_string(),
            category: self.category.to_string(),
            fingerprint: self.fingerprint.to_string(),
            job_identity: self.job_identity.to_string(),
            ..ActionOutputs::default()
        }
    }
}

/// Execute the configured mode against `tracker`.
pub async fn run_triage(
    settings: &TriageSettings,
    tracker: Arc<dyn IssueTracker>,
    now: DateTime<Utc>,
) -> Result<ActionOutputs> {
    info!(
        mode = ?settings.mode,
        repository = %settings.reconciler.scope.as_slug(),
        category = %settings.category,
        fingerprint = %settings.fingerprint,
        job_identity = %settings.job_identity,
        "starting ci triage"
    );
    match settings.mode {
        CliTriageMode::Create => report_failure(settings, tracker, now).await,
        CliTriageMode::CloseOnSuccess => close_on_success(settings, tracker).await,
    }
}

async fn report_failure(
    settings: &TriageSettings,
    tracker: Arc<dyn IssueTracker>,
    now: DateTime<Utc>,
) -> Result<ActionOutputs> {
    let redactor = SecretRedactor::new(&settings.secrets)?;
    let mut renderer = IssueBodyRenderer::new()?;
    if let Some(path) = settings.template_file.as_deref() {
        renderer = renderer.with_template_file(path)?;
    }
    let body = renderer.render_issue_body(&settings.context, &settings.category, &settings.fingerprint)?;

    let mut config = settings.reconciler.clone();
    config.title_prefix = redactor.redact(&config.title_prefix);
    let reconciler = IssueReconciler::new(tracker, config);
    let draft = FailureDraft {
        fingerprint: settings.fingerprint.clone(),
        job_identity: settings.job_identity.clone(),
        category: settings.category.clone(),
        workflow_name: redactor.redact(&settings.context.workflow_name),
        job_name: redactor.redact(&settings.context.job_name),
        body: redactor.redact(&body),
    };
    let report = reconciler
        .report_failure(draft, now)
        .await
        .context("failed to reconcile failure issue")?;

    let mut outputs = settings.base_outputs("create");
    outputs.deduped = report.deduped;
    match &report.outcome {
        ReconcileOutcome::Created(handle) | ReconcileOutcome::Updated(handle) => {
            outputs.issue_number = Some(handle.number);
            outputs.issue_url = Some(handle.url.clone()).filter(|url| !url.is_empty());
        }
        ReconcileOutcome::Suppressed(reason) => {
            outputs.suppressed = true;
            outputs.suppression_reason = Some(reason.reason_code().to_string());
            outputs.issue_number = report.matched_issue;
        }
    }
    Ok(outputs)
}

async fn close_on_success(
    settings: &TriageSettings,
    tracker: Arc<dyn IssueTracker>,
) -> Result<ActionOutputs> {
    let reconciler = IssueReconciler::new(tracker, settings.reconciler.clone());
    let mut outputs = settings.base_outputs("close-on-success");
    match settings.close_fingerprint.as_ref() {
        Some(fingerprint) => {
            outputs.fingerprint = fingerprint.to_string();
            outputs.resolved = reconciler
                .close_if_open_by_fingerprint(fingerprint)
                .await
                .context("failed to close failure issue")?;
        }
        None => {
            let closed = reconciler
                .close_open_by_job_identity(&settings.job_identity)
                .await
                .context("failed to close failure issues")?;
            outputs.resolved = !closed.is_empty();
            outputs.issue_number = closed.first().copied();
        }
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use clap::Parser;
    use std::io::Write;

    use triage_core::RepoRef;
    use triage_issues::{
        InMemoryTracker, IssueState, TrackerCall, MAX_ISSUE_BODY_BYTES, MAX_ISSUE_TITLE_CHARS,
    };

    use super::{resolve_category, run_triage, TriageSettings};
    use crate::cli_args::Cli;

    fn lookup(key: &str) -> Option<String> {
        let env = HashMap::from([
            ("GITHUB_REPOSITORY", "acme/widgets"),
            ("GITHUB_WORKFLOW", "CI"),
            ("GITHUB_JOB", "build"),
            ("GITHUB_RUN_ID", "1001"),
            ("GITHUB_SHA", "0123456789abcdef"),
        ]);
        env.get(key).map(|value| value.to_string())
    }

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["ci-triage"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("parse cli")
    }

    #[test]
    fn unit_resolve_category_prefers_explicit_then_rules() {
        let settings = TriageSettings::from_cli(&cli(&[]), lookup).expect("settings");
        assert_eq!(settings.category.as_str(), "general");

        let explicit = cli(&["--category", "Security_Scan"]);
        assert_eq!(
            resolve_category(&explicit, &settings.context)
                .expect("category")
                .as_str(),
            "security-scan"
        );

        let rule = cli(&["--category-rule", "^ci build$=flaky-tests"]);
        assert_eq!(
            resolve_category(&rule, &settings.context)
                .expect("category")
                .as_str(),
            "flaky-tests"
        );

        assert!(resolve_category(&cli(&["--category-rule", "no-separator"]), &settings.context).is_err());
    }

    #[test]
    fn functional_from_cli_applies_target_repo_override() {
        let settings =
            TriageSettings::from_cli(&cli(&["--target-repo", "acme/ops"]), lookup).expect("settings");
        assert_eq!(settings.reconciler.scope, RepoRef::new("acme", "ops"));
        assert!(settings.context.is_cross_repo());
    }

    #[test]
    fn regression_from_cli_requires_known_repository() {
        let error = TriageSettings::from_cli(&cli(&[]), |_| None).expect_err("no repository");
        assert!(error.to_string().contains("tracker repository is unknown"));
    }

    #[tokio::test]
    async fn integration_create_then_close_round_trip() {
        let tracker = Arc::new(InMemoryTracker::new());
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let scope = RepoRef::new("acme", "widgets");

        let create = TriageSettings::from_cli(
            &cli(&["--error-signature", "error: token=hunter22 rejected"]),
            lookup,
        )
        .expect("settings");
        let first = run_triage(&create, tracker.clone(), now).await.expect("create");
        let second = run_triage(&create, tracker.clone(), now).await.expect("update");
        assert!(!first.deduped);
        assert!(second.deduped);
        assert_eq!(first.issue_number, second.issue_number);
        let number = first.issue_number.expect("issue number");
        let body = tracker
            .issue(&scope, number)
            .and_then(|issue| issue.body)
            .expect("body");
        assert!(body.contains("token=***"));
        assert!(!body.contains("hunter22"));

        let close = TriageSettings::from_cli(&cli(&["--mode", "close-on-success"]), lookup)
            .expect("settings");
        assert_ne!(close.fingerprint, create.fingerprint);
        assert_eq!(close.job_identity, create.job_identity);
        let closed = run_triage(&close, tracker.clone(), now).await.expect("close");
        assert!(closed.resolved);
        assert_eq!(closed.issue_number, Some(number));
        assert_eq!(
            tracker.issue(&scope, number).map(|issue| issue.state),
            Some(IssueState::Closed)
        );
    }

    #[tokio::test]
    async fn functional_snoozed_create_reports_suppression_without_calls() {
        let tracker = Arc::new(InMemoryTracker::new());
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let settings = TriageSettings::from_cli(
            &cli(&["--snooze-until", "2026-03-15T00:00:00Z"]),
            lookup,
        )
        .expect("settings");

        let outputs = run_triage(&settings, tracker.clone(), now).await.expect("run");
        assert!(outputs.suppressed);
        assert_eq!(outputs.suppression_reason.as_deref(), Some("snoozed"));
        assert_eq!(outputs.issue_number, None);
        assert!(!tracker
            .calls()
            .iter()
            .any(|call| matches!(call, TrackerCall::Search(_))));
    }

    #[tokio::test]
    async fn regression_green_run_without_signatures_closes_every_failure_of_the_job() {
        let tracker = Arc::new(InMemoryTracker::new());
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let scope = RepoRef::new("acme", "widgets");
        let mut numbers = Vec::new();
        for signature in ["error: linker failed", "error: disk full"] {
            let settings =
                TriageSettings::from_cli(&cli(&["--error-signature", signature]), lookup)
                    .expect("settings");
            let outputs = run_triage(&settings, tracker.clone(), now).await.expect("create");
            numbers.push(outputs.issue_number.expect("issue number"));
        }
        assert_eq!(tracker.open_issue_count(&scope), 2);

        let green = TriageSettings::from_cli(&cli(&["--mode", "close-on-success"]), lookup)
            .expect("settings");
        let outputs = run_triage(&green, tracker.clone(), now).await.expect("close");
        assert!(outputs.resolved);
        assert_eq!(outputs.issue_number, numbers.iter().min().copied());
        assert_eq!(tracker.open_issue_count(&scope), 0);

        let again = run_triage(&green, tracker.clone(), now).await.expect("close again");
        assert!(!again.resolved);
        assert_eq!(again.issue_number, None);
    }

    #[tokio::test]
    async fn functional_explicit_fingerprint_narrows_close_on_success() {
        let tracker = Arc::new(InMemoryTracker::new());
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let scope = RepoRef::new("acme", "widgets");
        let linker = TriageSettings::from_cli(
            &cli(&["--error-signature", "error: linker failed"]),
            lookup,
        )
        .expect("settings");
        let disk = TriageSettings::from_cli(&cli(&["--error-signature", "error: disk full"]), lookup)
            .expect("settings");
        let linker_issue = run_triage(&linker, tracker.clone(), now)
            .await
            .expect("create")
            .issue_number
            .expect("number");
        let disk_issue = run_triage(&disk, tracker.clone(), now)
            .await
            .expect("create")
            .issue_number
            .expect("number");

        let fingerprint = linker.fingerprint.to_string();
        let close = TriageSettings::from_cli(
            &cli(&["--mode", "close-on-success", "--fingerprint", &fingerprint]),
            lookup,
        )
        .expect("settings");
        let outputs = run_triage(&close, tracker.clone(), now).await.expect("close");
        assert!(outputs.resolved);
        assert_eq!(outputs.fingerprint, fingerprint);
        assert_eq!(
            tracker.issue(&scope, linker_issue).map(|issue| issue.state),
            Some(IssueState::Closed)
        );
        assert_eq!(
            tracker.issue(&scope, disk_issue).map(|issue| issue.state),
            Some(IssueState::Open)
        );
    }

    #[test]
    fn regression_fingerprint_flag_rejected_in_create_mode() {
        let error = TriageSettings::from_cli(&cli(&["--fingerprint", "fp-0123456789ab"]), lookup)
            .expect_err("create mode");
        assert!(error.to_string().contains("only valid with --mode close-on-success"));
    }

    #[tokio::test]
    async fn regression_oversized_signatures_file_still_files_issue_within_limits() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        for index in 0..1_200 {
            writeln!(file, "error[{index}]: assertion failed in module_{index}: {}", "z".repeat(40))
                .expect("write signature");
        }
        writeln!(file, "{}", "q".repeat(20_000)).expect("write long line");
        assert!(file.as_file().metadata().expect("metadata").len() > 70_000);
        let path = file.path().to_string_lossy().to_string();
        let long_job = "j".repeat(300);

        let tracker = Arc::new(InMemoryTracker::new());
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let settings = TriageSettings::from_cli(
            &cli(&["--error-signatures-file", &path]),
            |key: &str| match key {
                "GITHUB_JOB" => Some(long_job.clone()),
                other => lookup(other),
            },
        )
        .expect("settings");
        let outputs = run_triage(&settings, tracker.clone(), now).await.expect("create");
        let issue = tracker
            .issue(&RepoRef::new("acme", "widgets"), outputs.issue_number.expect("number"))
            .expect("stored issue");
        let body = issue.body.expect("body");
        assert!(body.len() <= MAX_ISSUE_BODY_BYTES);
        assert!(body.contains("more signature lines omitted"));
        assert!(body.ends_with(&format!("<!-- ci-triage:job:{} -->", settings.job_identity)));
        assert!(issue.title.chars().count() <= MAX_ISSUE_TITLE_CHARS);
        assert!(issue.title.ends_with(&format!("[{}]", settings.fingerprint)));
    }
}
