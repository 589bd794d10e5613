use std::path::{Path, PathBuf};

use minijinja::Environment;
use serde::Serialize;
use thiserror::Error;
use triage_core::{Category, Fingerprint, RunContext};

/// Error signature lines rendered into a body; the rest are counted as omitted.
pub const MAX_RENDERED_SIGNATURES: usize = 100;
pub const MAX_SIGNATURE_LINE_CHARS: usize = 240;
const MAX_RENDERED_SIGNATURE_BYTES: usize = 24_000;

const BUILT_IN_TEMPLATES: [(&str, &str); 7] = [
    (
        "_run_details.md.j2",
        include_str!("templates/_run_details.md.j2"),
    ),
    (
        "_error_signatures.md.j2",
        include_str!("templates/_error_signatures.md.j2"),
    ),
    (Category::GENERAL, include_str!("templates/general.md.j2")),
    (Category::DEPLOYMENT, include_str!("templates/deployment.md.j2")),
    (
        Category::SECURITY_SCAN,
        include_str!("templates/security-scan.md.j2"),
    ),
    (
        Category::TERRAFORM_VALIDATION,
        include_str!("templates/terraform-validation.md.j2"),
    ),
    (
        Category::CODE_QUALITY,
        include_str!("templates/code-quality.md.j2"),
    ),
];

#[derive(Debug, Error)]
/// Enumerates supported `RenderError` values.
pub enum RenderError {
    #[error("failed to render issue body template '{name}': {source}")]
    Template {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("failed to read issue body template {}: {source}", path.display())]
    ReadTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Values exposed to issue body templates.
pub struct IssueBodyContext {
    pub repository: String,
    pub source_repository: String,
    pub is_cross_repo: bool,
    pub workflow: String,
    pub job: String,
    pub category: String,
    pub fingerprint: String,
    pub run_id: String,
    pub run_attempt: String,
    pub run_url: Option<String>,
    pub commit_sha: String,
    pub short_sha: String,
    pub ref_name: String,
    pub actor: String,
    pub event_name: String,
    pub error_signatures: Vec<String>,
    pub omitted_signatures: usize,
}

impl IssueBodyContext {
    pub fn from_run(context: &RunContext, category: &Category, fingerprint: &Fingerprint) -> Self {
        let commit_sha = context.commit_sha.trim().to_string();
        let short_sha = commit_sha.chars().take(7).collect();
        let (error_signatures, omitted_signatures) = bounded_signatures(&context.error_signatures);
        Self {
            repository: context.effective_tracker_repo().as_slug(),
            source_repository: context.source_repo().as_slug(),
            is_cross_repo: context.is_cross_repo(),
            workflow: inert(context.workflow_name.trim()),
            job: inert(context.job_name.trim()),
            category: category.to_string(),
            fingerprint: fingerprint.to_string(),
            run_id: context.run_identifier.trim().to_string(),
            run_attempt: context.run_attempt.trim().to_string(),
            run_url: context.run_url(),
            commit_sha,
            short_sha,
            ref_name: context.ref_name.trim().to_string(),
            actor: context.actor.trim().to_string(),
            event_name: context.event_name.trim().to_string(),
            error_signatures,
            omitted_signatures,
        }
    }
}

/// Marker-shaped text in run data must not reach the body verbatim.
fn inert(text: &str) -> String {
    text.replace("<!--", "<! --")
}

fn shorten_line(line: &str) -> String {
    if line.chars().count() <= MAX_SIGNATURE_LINE_CHARS {
        return line.to_string();
    }
    let mut shortened = line
        .chars()
        .take(MAX_SIGNATURE_LINE_CHARS - 1)
        .collect::<String>();
    shortened.push('\u{2026}');
    shortened
}

/// Bounded, marker-free signature lines plus the count left out.
fn bounded_signatures(signatures: &[String]) -> (Vec<String>, usize) {
    let lines = signatures
        .iter()
        .map(|line| line.trim_end())
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>();
    let mut kept = Vec::new();
    let mut used_bytes = 0;
    for line in &lines {
        let line = inert(&shorten_line(line));
        if kept.len() == MAX_RENDERED_SIGNATURES
            || used_bytes + line.len() > MAX_RENDERED_SIGNATURE_BYTES
        {
            break;
        }
        used_bytes += line.len() + 1;
        kept.push(line);
    }
    let omitted = lines.len() - kept.len();
    (kept, omitted)
}

/// Renders issue bodies from the built-in category templates or an
/// operator-supplied override.
pub struct IssueBodyRenderer {
    env: Environment<'static>,
    override_source: Option<String>,
}

impl IssueBodyRenderer {
    pub fn new() -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in BUILT_IN_TEMPLATES {
            env.add_template(name, source)
                .map_err(|source| RenderError::Template {
                    name: name.to_string(),
                    source,
                })?;
        }
        Ok(Self {
            env,
            override_source: None,
        })
    }

    pub fn with_template_override(mut self, source: impl Into<String>) -> Self {
        self.override_source = Some(source.into());
        self
    }

    pub fn with_template_file(self, path: &Path) -> Result<Self, RenderError> {
        let source = std::fs::read_to_string(path).map_err(|source| RenderError::ReadTemplate {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.with_template_override(source))
    }

    pub fn has_override(&self) -> bool {
        self.override_source.is_some()
    }

    /// Built-in template for the category; custom categories use `general`.
    pub fn template_name_for(category: &Category) -> &'static str {
        BUILT_IN_TEMPLATES
            .iter()
            .skip(2)
            .map(|(name, _)| *name)
            .find(|name| *name == category.as_str())
            .unwrap_or(Category::GENERAL)
    }

    pub fn render(&self, context: &IssueBodyContext, category: &Category) -> Result<String, RenderError> {
        let rendered = match self.override_source.as_deref() {
            Some(source) => self
                .env
                .render_str(source, context)
                .map_err(|source| RenderError::Template {
                    name: "override".to_string(),
                    source,
                })?,
            None => {
                let name = Self::template_name_for(category);
                let template = self
                    .env
                    .get_template(name)
                    .map_err(|source| RenderError::Template {
                        name: name.to_string(),
                        source,
                    })?;
                template
                    .render(context)
                    .map_err(|source| RenderError::Template {
                        name: name.to_string(),
                        source,
                    })?
            }
        };
        Ok(collapse_blank_runs(&rendered))
    }

    pub fn render_issue_body(
        &self,
        run: &RunContext,
        category: &Category,
        fingerprint: &Fingerprint,
    ) -> Result<String, RenderError> {
        self.render(&IssueBodyContext::from_run(run, category, fingerprint), category)
    }
}

fn collapse_blank_runs(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut previous_blank = true;
    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        output.push_str(line.trim_end());
        output.push('\n');
        previous_blank = blank;
    }
    output.trim_end().to_string()
}
