//! Issue body rendering and secret redaction for CI triage.
//! Bodies are rendered from built-in minijinja templates keyed by category,
//! and every rendered title or body passes through [`SecretRedactor`] before
//! it reaches the tracker.

pub mod issue_body;
pub mod redaction;

pub use issue_body::{IssueBodyContext, IssueBodyRenderer, RenderError};
pub use redaction::{RedactionError, SecretRedactor, MIN_LITERAL_SECRET_CHARS, REDACTION_MASK};
