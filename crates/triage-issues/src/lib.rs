//! Tracker-agnostic issue lifecycle for CI failures.
//! This crate provides the tracker capability trait, dedupe and label
//! policies, fingerprint markers, and the reconciler that turns one failed
//! run into exactly one open issue per fingerprint.

pub mod dedupe_policy;
pub mod issue_markers;
pub mod memory_tracker;
pub mod reconciler;
pub mod tracker;

pub use dedupe_policy::{DedupePolicy, DedupeStrategy, LabelPolicy};
pub use issue_markers::{
    append_fingerprint_marker, append_job_identity_marker, build_issue_labels, clamp_issue_body,
    clamp_issue_title, extract_fingerprint_markers, issue_carries_fingerprint,
    issue_carries_job_identity, neutralize_markers, normalize_issue_label,
    render_fingerprint_marker, render_issue_title, render_job_identity_marker,
    title_belongs_to_workflow, truncate_chars, workflow_title_head, DEFAULT_TITLE_PREFIX,
    FINGERPRINT_MARKER_PREFIX, FINGERPRINT_MARKER_SUFFIX, JOB_IDENTITY_MARKER_PREFIX,
    MAX_ISSUE_BODY_BYTES, MAX_ISSUE_TITLE_CHARS,
};
pub use memory_tracker::{InMemoryTracker, TrackerCall};
pub use reconciler::{
    FailureDraft, FailureReport, IssueReconciler, IssueRequest, ReconcileOutcome,
    ReconcilerConfig, SuppressionReason,
};
pub use tracker::{
    IssueHandle, IssueQuery, IssueState, IssueStateFilter, IssueTracker, NewIssue, TrackedIssue,
    TrackerError,
};
