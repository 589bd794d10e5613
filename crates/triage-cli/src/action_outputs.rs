use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Structured result of one invocation, exposed as step outputs.
pub struct ActionOutputs {
    pub mode: String,
    pub category: String,
    pub fingerprint: String,
    pub job_identity: String,
    pub deduped: bool,
    pub issue_number: Option<u64>,
    pub issue_url: Option<String>,
    pub suppressed: bool,
    pub suppression_reason: Option<String>,
    pub resolved: bool,
}

fn single_line(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl ActionOutputs {
    pub fn to_output_lines(&self) -> Vec<String> {
        let issue_number = self
            .issue_number
            .map(|number| number.to_string())
            .unwrap_or_default();
        let pairs = [
            ("category", self.category.clone()),
            ("fingerprint", self.fingerprint.clone()),
            ("job-identity", self.job_identity.clone()),
            ("deduped", self.deduped.to_string()),
            ("issue-number", issue_number),
            ("issue-url", self.issue_url.clone().unwrap_or_default()),
            ("suppressed", self.suppressed.to_string()),
            (
                "suppression-reason",
                self.suppression_reason.clone().unwrap_or_default(),
            ),
            ("resolved", self.resolved.to_string()),
        ];
        pairs
            .into_iter()
            .map(|(key, value)| format!("{key}={}", single_line(&value)))
            .collect()
    }

    /// Append `key=value` lines, creating the file when missing.
    pub fn append_to_file(&self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open outputs file {}", path.display()))?;
        let mut payload = self.to_output_lines().join("\n");
        payload.push('\n');
        file.write_all(payload.as_bytes())
            .with_context(|| format!("failed to write outputs file {}", path.display()))?;
        Ok(())
    }

    pub fn to_json_summary(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize outputs summary")
    }
}
