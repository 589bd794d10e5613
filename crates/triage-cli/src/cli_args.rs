use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, ValueEnum};
use triage_core::Fingerprint;
use triage_issues::DedupeStrategy;

fn parse_rfc3339_utc(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| format!("expected RFC3339 timestamp: {error}"))
}

fn parse_fingerprint(value: &str) -> Result<Fingerprint, String> {
    Fingerprint::from_token(value).ok_or_else(|| "expected fp- followed by 12 hex digits".to_string())
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Enumerates supported `CliTriageMode` values.
pub enum CliTriageMode {
    Create,
    CloseOnSuccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Enumerates supported `CliDedupeStrategy` values.
pub enum CliDedupeStrategy {
    Fingerprint,
    None,
}

impl From<CliDedupeStrategy> for DedupeStrategy {
    fn from(value: CliDedupeStrategy) -> Self {
        match value {
            CliDedupeStrategy::Fingerprint => Self::Fingerprint,
            CliDedupeStrategy::None => Self::None,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "ci-triage",
    about = "Turn a failed CI run into exactly one tracked issue per failure fingerprint",
    version
)]
/// Public struct `Cli` used across CI triage components.
pub struct Cli {
    #[arg(
        long,
        env = "CI_TRIAGE_MODE",
        value_enum,
        default_value_t = CliTriageMode::Create,
        help = "create reports a failure; close-on-success closes the open issues of this job"
    )]
    pub mode: CliTriageMode,

    #[arg(
        long = "github-token",
        env = "CI_TRIAGE_GITHUB_TOKEN",
        hide_env_values = true,
        help = "GitHub token with issues:write. Falls back to GITHUB_TOKEN"
    )]
    pub github_token: Option<String>,

    #[arg(
        long = "github-api-base",
        env = "CI_TRIAGE_GITHUB_API_BASE",
        help = "GitHub REST API base URL. Falls back to GITHUB_API_URL, then https://api.github.com"
    )]
    pub github_api_base: Option<String>,

    #[arg(
        long,
        env = "CI_TRIAGE_CATEGORY",
        help = "Explicit failure category; takes precedence over auto detection"
    )]
    pub category: Option<String>,

    #[arg(
        long = "auto-detect-category",
        env = "CI_TRIAGE_AUTO_DETECT_CATEGORY",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Derive the category from workflow and job names when --category is not set"
    )]
    pub auto_detect_category: bool,

    #[arg(
        long = "category-rule",
        env = "CI_TRIAGE_CATEGORY_RULES",
        value_delimiter = '\n',
        help = "Extra classifier rule as regex=category. Repeatable; one rule per line in the environment variable. Operator rules win over built-ins"
    )]
    pub category_rules: Vec<String>,

    #[arg(
        long,
        env = "CI_TRIAGE_LABELS",
        value_delimiter = ',',
        help = "Additional labels applied to created or updated issues"
    )]
    pub labels: Vec<String>,

    #[arg(
        long = "failure-label",
        env = "CI_TRIAGE_FAILURE_LABEL",
        default_value = "ci-failure",
        help = "Label marking issues managed by ci-triage"
    )]
    pub failure_label: String,

    #[arg(
        long = "category-label",
        env = "CI_TRIAGE_CATEGORY_LABEL",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Also label issues with the category slug"
    )]
    pub category_label: bool,

    #[arg(
        long = "dedupe-strategy",
        env = "CI_TRIAGE_DEDUPE_STRATEGY",
        value_enum,
        default_value_t = CliDedupeStrategy::Fingerprint,
        help = "fingerprint updates the open issue for a repeated failure; none always creates"
    )]
    pub dedupe_strategy: CliDedupeStrategy,

    #[arg(
        long = "always-create-new",
        env = "CI_TRIAGE_ALWAYS_CREATE_NEW",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Ignore an existing open issue and create a new one"
    )]
    pub always_create_new: bool,

    #[arg(
        long = "target-repo",
        env = "CI_TRIAGE_TARGET_REPO",
        help = "Report into owner/repo instead of the repository that ran the workflow"
    )]
    pub target_repo: Option<String>,

    #[arg(
        long = "snooze-until",
        env = "CI_TRIAGE_SNOOZE_UNTIL",
        value_parser = parse_rfc3339_utc,
        help = "Suppress all reporting until this RFC3339 timestamp"
    )]
    pub snooze_until: Option<DateTime<Utc>>,

    #[arg(
        long = "rate-limit-hours",
        env = "CI_TRIAGE_RATE_LIMIT_HOURS",
        default_value_t = 0,
        help = "Skip creating an issue when one for the same fingerprint was created within this many hours (0 disables)"
    )]
    pub rate_limit_hours: u32,

    #[arg(
        long = "max-issues-per-workflow",
        env = "CI_TRIAGE_MAX_ISSUES_PER_WORKFLOW",
        default_value_t = 0,
        help = "Soft cap on open failure issues per workflow (0 disables)"
    )]
    pub max_issues_per_workflow: u32,

    #[arg(
        long = "title-prefix",
        env = "CI_TRIAGE_TITLE_PREFIX",
        default_value = "CI failure:",
        help = "Prefix of every issue title"
    )]
    pub title_prefix: String,

    #[arg(
        long = "template-file",
        env = "CI_TRIAGE_TEMPLATE_FILE",
        help = "minijinja template replacing the built-in issue body"
    )]
    pub template_file: Option<PathBuf>,

    #[arg(
        long = "error-signature",
        env = "CI_TRIAGE_ERROR_SIGNATURES",
        value_delimiter = '\n',
        help = "Error line that identifies the failure. Repeatable"
    )]
    pub error_signatures: Vec<String>,

    #[arg(
        long = "error-signatures-file",
        env = "CI_TRIAGE_ERROR_SIGNATURES_FILE",
        help = "File with one error signature per line"
    )]
    pub error_signatures_file: Option<PathBuf>,

    #[arg(
        long = "secret",
        env = "CI_TRIAGE_SECRETS",
        value_delimiter = ',',
        hide_env_values = true,
        help = "Literal value to mask in issue titles and bodies. Repeatable"
    )]
    pub secrets: Vec<String>,

    #[arg(
        long = "request-timeout-ms",
        env = "CI_TRIAGE_REQUEST_TIMEOUT_MS",
        default_value_t = 15_000,
        help = "Timeout in milliseconds for each GitHub API request"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "retry-max-attempts",
        env = "CI_TRIAGE_RETRY_MAX_ATTEMPTS",
        default_value_t = 1,
        value_parser = parse_positive_usize,
        help = "Attempts per GitHub request, including the first. 1 disables retries"
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long = "retry-base-delay-ms",
        env = "CI_TRIAGE_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        help = "Base delay for exponential retry backoff"
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long = "output-file",
        env = "CI_TRIAGE_OUTPUT_FILE",
        help = "Append key=value outputs to this file. Falls back to GITHUB_OUTPUT"
    )]
    pub output_file: Option<PathBuf>,

    #[arg(
        long = "fingerprint",
        env = "CI_TRIAGE_FINGERPRINT",
        value_parser = parse_fingerprint,
        help = "close-on-success only: close the issues carrying this fingerprint instead of every open issue of the job"
    )]
    pub fingerprint: Option<Fingerprint>,
}
