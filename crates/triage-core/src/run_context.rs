use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `RepoRefError` values.
pub enum RepoRefError {
    #[error("invalid repository '{0}', expected owner/repo")]
    InvalidSlug(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Owner/name pair addressing one repository on the tracker.
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, RepoRefError> {
        let trimmed = raw.trim();
        let (owner, name) = trimmed
            .split_once('/')
            .ok_or_else(|| RepoRefError::InvalidSlug(raw.to_string()))?;
        let owner = owner.trim();
        let name = name.trim();
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(RepoRefError::InvalidSlug(raw.to_string()));
        }
        Ok(Self::new(owner, name))
    }

    pub fn as_slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn is_complete(&self) -> bool {
        !self.owner.trim().is_empty() && !self.name.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Snapshot of the CI run that triggered this invocation.
///
/// Built once from the hosting environment and treated as read-only
/// afterwards. String fields are empty rather than absent when the
/// environment does not provide them.
pub struct RunContext {
    pub repository_owner: String,
    pub repository_name: String,
    pub workflow_name: String,
    pub job_name: String,
    /// Opaque run id. Only used to build links, never part of the fingerprint.
    pub run_identifier: String,
    pub run_attempt: String,
    pub commit_sha: String,
    pub ref_name: String,
    pub actor: String,
    pub event_name: String,
    pub server_url: String,
    /// Raw error lines in the order they were reported.
    pub error_signatures: Vec<String>,
    pub target_owner: Option<String>,
    pub target_repo: Option<String>,
}

impl RunContext {
    pub fn source_repo(&self) -> RepoRef {
        RepoRef::new(self.repository_owner.clone(), self.repository_name.clone())
    }

    /// Repository that receives tracker operations.
    ///
    /// The cross-repository override only applies when both halves are set.
    pub fn effective_tracker_repo(&self) -> RepoRef {
        let target_owner = non_blank(self.target_owner.as_deref());
        let target_repo = non_blank(self.target_repo.as_deref());
        match (target_owner, target_repo) {
            (Some(owner), Some(repo)) => RepoRef::new(owner, repo),
            _ => self.source_repo(),
        }
    }

    pub fn is_cross_repo(&self) -> bool {
        self.effective_tracker_repo() != self.source_repo()
    }

    pub fn run_url(&self) -> Option<String> {
        let server = self.server_url.trim().trim_end_matches('/');
        let run_id = self.run_identifier.trim();
        if server.is_empty() || run_id.is_empty() || !self.source_repo().is_complete() {
            return None;
        }
        let mut url = format!(
            "{server}/{}/{}/actions/runs/{run_id}",
            self.repository_owner, self.repository_name
        );
        let attempt = self.run_attempt.trim();
        if !attempt.is_empty() && attempt != "1" {
            url.push_str(&format!("/attempts/{attempt}"));
        }
        Some(url)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
