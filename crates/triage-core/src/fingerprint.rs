//! Stable failure identity.
//!
//! A fingerprint is a pure function of the repository, workflow, job,
//! category and the normalized error digest. Volatile substrings inside error
//! text (timestamps, hashes, counters, runner paths) are replaced with fixed
//! placeholders before hashing, and signature order is discarded, so repeat
//! occurrences of the same failure map to the same token across processes.
//!
//! A job identity is the digest-free counterpart: it names the job a failure
//! came from, so a later green run of that job can find the issue without
//! knowing which errors caused it.

use std::fmt;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::category::Category;
use crate::run_context::RunContext;

pub const FINGERPRINT_PREFIX: &str = "fp-";
pub const JOB_IDENTITY_PREFIX: &str = "job-";
pub const NO_SIGNATURES_SENTINEL: &str = "no-signatures";

const FINGERPRINT_HASH_BYTES: usize = 6;
const CANONICAL_VERSION: &str = "ci-triage/v1";
const JOB_IDENTITY_VERSION: &str = "ci-triage/job/v1";
const FIELD_SEPARATOR: char = '\u{1f}';
const LINE_SEPARATOR: char = '\u{1e}';
const HEX_ALWAYS_VOLATILE_LEN: usize = 12;

static TIMESTAMP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{4}-\d{2}-\d{2}(?:[T ]\d{2}:\d{2}(?::\d{2}(?:[.,]\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?\b|\b\d{2}:\d{2}:\d{2}(?:[.,]\d+)?\b",
    )
    .expect("timestamp pattern compiles")
});

static UUID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
        .expect("uuid pattern compiles")
});

static ABSOLUTE_PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s'"=(\[])((?:[A-Za-z]:[\\/]|/)(?:[^\s/\\:'"()\[\]<>]+[\\/])+)"#)
        .expect("absolute path pattern compiles")
});

static HEX_RUN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{6,}\b").expect("hex pattern compiles"));

static NUMBER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d+(?:\.\d+)?(?:ms|s)?\b").expect("number pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Short deterministic identifier used as the dedupe join key.
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept a previously rendered token, e.g. one read back from an issue title.
    pub fn from_token(raw: &str) -> Option<Self> {
        parse_hashed_token(raw, FINGERPRINT_PREFIX).map(Self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier of the (repository, workflow, job) a failure came from.
pub struct JobIdentity(String);

impl JobIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_token(raw: &str) -> Option<Self> {
        parse_hashed_token(raw, JOB_IDENTITY_PREFIX).map(Self)
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_hashed_token(raw: &str, prefix: &str) -> Option<String> {
    let token = raw.trim();
    let hex = token.strip_prefix(prefix)?;
    let well_formed = hex.len() == FINGERPRINT_HASH_BYTES * 2
        && hex
            .chars()
            .all(|ch| ch.is_ascii_digit() || matches!(ch, 'a'..='f'));
    well_formed.then(|| token.to_string())
}

fn hashed_token(prefix: &str, canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    let hex = digest[..FINGERPRINT_HASH_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("{prefix}{hex}")
}

/// Replace volatile substrings in one raw error line with fixed placeholders.
pub fn normalize_error_signature(raw: &str) -> String {
    let stripped = TIMESTAMP_PATTERN.replace_all(raw, "<ts>");
    let stripped = UUID_PATTERN.replace_all(&stripped, "<uuid>");
    let stripped = ABSOLUTE_PATH_PATTERN.replace_all(&stripped, "${1}<path>/");
    let stripped = HEX_RUN_PATTERN.replace_all(&stripped, |captures: &Captures<'_>| {
        let token = &captures[0];
        if token.chars().all(|ch| ch.is_ascii_digit()) {
            "<n>".to_string()
        } else if token.chars().any(|ch| ch.is_ascii_digit())
            || token.len() >= HEX_ALWAYS_VOLATILE_LEN
        {
            "<hex>".to_string()
        } else {
            token.to_string()
        }
    });
    let stripped = NUMBER_PATTERN.replace_all(&stripped, "<n>");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sorted, deduplicated normalized signatures, or the empty sentinel.
pub fn normalized_error_digest<S: AsRef<str>>(signatures: &[S]) -> String {
    let mut lines = signatures
        .iter()
        .map(|signature| normalize_error_signature(signature.as_ref()))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    if lines.is_empty() {
        return NO_SIGNATURES_SENTINEL.to_string();
    }
    lines.sort();
    lines.dedup();
    lines.join(&LINE_SEPARATOR.to_string())
}

fn identity_field(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn canonical_string(context: &RunContext, category: &Category) -> String {
    let fields = [
        CANONICAL_VERSION.to_string(),
        identity_field(&context.repository_owner),
        identity_field(&context.repository_name),
        identity_field(&context.workflow_name),
        identity_field(&context.job_name),
        identity_field(category.as_str()),
        normalized_error_digest(context.error_signatures.as_slice()),
    ];
    fields.join(&FIELD_SEPARATOR.to_string())
}

pub fn compute_fingerprint(context: &RunContext, category: &Category) -> Fingerprint {
    Fingerprint(hashed_token(
        FINGERPRINT_PREFIX,
        &canonical_string(context, category),
    ))
}

/// Digest-free identity of the job; error signatures and category are ignored.
pub fn compute_job_identity(context: &RunContext) -> JobIdentity {
    let canonical = [
        JOB_IDENTITY_VERSION.to_string(),
        identity_field(&context.repository_owner),
        identity_field(&context.repository_name),
        identity_field(&context.workflow_name),
        identity_field(&context.job_name),
    ]
    .join(&FIELD_SEPARATOR.to_string());
    JobIdentity(hashed_token(JOB_IDENTITY_PREFIX, &canonical))
}
