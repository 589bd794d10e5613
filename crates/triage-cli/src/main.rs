use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;
use triage_cli::{init_tracing, run_triage, Cli, TriageSettings};
use triage_github::{GithubIssueTracker, GithubTrackerConfig, DEFAULT_GITHUB_API_BASE};

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    if let Err(error) = run(Cli::parse()).await {
        eprintln!("ci-triage: {error:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = TriageSettings::from_cli(&cli, env_value)?;

    let token = cli
        .github_token
        .clone()
        .or_else(|| env_value("GITHUB_TOKEN"))
        .context("missing GitHub token; set --github-token or GITHUB_TOKEN")?;
    let api_base = cli
        .github_api_base
        .clone()
        .or_else(|| env_value("GITHUB_API_URL"))
        .unwrap_or_else(|| DEFAULT_GITHUB_API_BASE.to_string());
    let tracker = GithubIssueTracker::new(GithubTrackerConfig {
        api_base,
        token,
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
    })?;

    let outputs = run_triage(&settings, Arc::new(tracker), Utc::now()).await?;

    let output_file = cli
        .output_file
        .clone()
        .or_else(|| env_value("GITHUB_OUTPUT").map(PathBuf::from));
    if let Some(path) = output_file.as_deref() {
        outputs.append_to_file(path)?;
        info!(path = %path.display(), "wrote step outputs");
    }
    println!("{}", outputs.to_json_summary()?);
    Ok(())
}
