//! Builds a [`RunContext`] from GitHub Actions environment variables.

use triage_core::{RepoRef, RunContext};

pub const DEFAULT_SERVER_URL: &str = "https://github.com";

fn lookup_trimmed<F>(lookup: &F, key: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Read the run context through `lookup`, usually `std::env::var(..).ok()`.
///
/// `GITHUB_REPOSITORY` supplies both owner and name; `GITHUB_REPOSITORY_OWNER`
/// only fills the owner when the slug is missing or malformed.
pub fn run_context_from_env<F>(lookup: F) -> RunContext
where
    F: Fn(&str) -> Option<String>,
{
    let repository = lookup_trimmed(&lookup, "GITHUB_REPOSITORY");
    let (repository_owner, repository_name) = match RepoRef::parse(&repository) {
        Ok(repo) => (repo.owner, repo.name),
        Err(_) => (
            lookup_trimmed(&lookup, "GITHUB_REPOSITORY_OWNER"),
            String::new(),
        ),
    };
    let server_url = match lookup_trimmed(&lookup, "GITHUB_SERVER_URL") {
        value if value.is_empty() => DEFAULT_SERVER_URL.to_string(),
        value => value,
    };
    RunContext {
        repository_owner,
        repository_name,
        workflow_name: lookup_trimmed(&lookup, "GITHUB_WORKFLOW"),
        job_name: lookup_trimmed(&lookup, "GITHUB_JOB"),
        run_identifier: lookup_trimmed(&lookup, "GITHUB_RUN_ID"),
        run_attempt: lookup_trimmed(&lookup, "GITHUB_RUN_ATTEMPT"),
        commit_sha: lookup_trimmed(&lookup, "GITHUB_SHA"),
        ref_name: lookup_trimmed(&lookup, "GITHUB_REF_NAME"),
        actor: lookup_trimmed(&lookup, "GITHUB_ACTOR"),
        event_name: lookup_trimmed(&lookup, "GITHUB_EVENT_NAME"),
        server_url,
        ..RunContext::default()
    }
}

/// Collect error signatures from flags and an optional file body.
pub fn collect_error_signatures(flag_values: &[String], file_contents: Option<&str>) -> Vec<String> {
    flag_values
        .iter()
        .map(String::as_str)
        .chain(file_contents.into_iter().flat_map(str::lines))
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
