use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, MatchKind};
use regex::Regex;
use thiserror::Error;

pub const REDACTION_MASK: &str = "***";
/// Shorter literals would mask ordinary words.
pub const MIN_LITERAL_SECRET_CHARS: usize = 4;

static GITHUB_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:gh[pousr]_[A-Za-z0-9]{20,}|github_pat_[A-Za-z0-9_]{20,})\b")
        .expect("github token pattern")
});

static AWS_ACCESS_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b").expect("aws key pattern"));

static BEARER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(bearer\s+)[A-Za-z0-9\-._~+/]+=*").expect("bearer pattern")
});

static KEY_VALUE_SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b((?:password|passwd|secret|token|api[_-]?key|access[_-]?key|client[_-]?secret)\s*[=:]\s*)("[^"]*"|'[^']*'|[^\s,;]+)"#,
    )
    .expect("key value secret pattern")
});

#[derive(Debug, Error)]
/// Enumerates supported `RedactionError` values.
pub enum RedactionError {
    #[error("failed to build literal secret matcher: {0}")]
    Matcher(#[from] aho_corasick::BuildError),
}

#[derive(Debug, Clone, Default)]
/// Masks credential-shaped substrings and operator-declared literal secrets.
pub struct SecretRedactor {
    literals: Option<AhoCorasick>,
    literal_count: usize,
}

impl SecretRedactor {
    pub fn new<I, S>(literal_secrets: I) -> Result<Self, RedactionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut literals = literal_secrets
            .into_iter()
            .map(|secret| secret.as_ref().trim().to_string())
            .filter(|secret| secret.chars().count() >= MIN_LITERAL_SECRET_CHARS)
            .collect::<Vec<_>>();
        literals.sort();
        literals.dedup();
        if literals.is_empty() {
            return Ok(Self::default());
        }
        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&literals)?;
        Ok(Self {
            literals: Some(matcher),
            literal_count: literals.len(),
        })
    }

    pub fn literal_count(&self) -> usize {
        self.literal_count
    }

    pub fn redact(&self, text: &str) -> String {
        let mut redacted = match self.literals.as_ref() {
            Some(matcher) => {
                let masks = vec![REDACTION_MASK; self.literal_count];
                matcher.replace_all(text, &masks)
            }
            None => text.to_string(),
        };
        redacted = GITHUB_TOKEN_RE
            .replace_all(&redacted, REDACTION_MASK)
            .into_owned();
        redacted = AWS_ACCESS_KEY_RE
            .replace_all(&redacted, REDACTION_MASK)
            .into_owned();
        redacted = BEARER_RE
            .replace_all(&redacted, format!("${{1}}{REDACTION_MASK}"))
            .into_owned();
        KEY_VALUE_SECRET_RE
            .replace_all(&redacted, format!("${{1}}{REDACTION_MASK}"))
            .into_owned()
    }
}
