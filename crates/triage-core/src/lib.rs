//! Pure failure-identity primitives shared across CI triage crates.
//!
//! Provides the run context snapshot, the validated category tag with its
//! rule-based classifier, and the fingerprint engine used as the dedupe key
//! by the issue reconciler.

pub mod category;
pub mod category_classifier;
pub mod fingerprint;
pub mod run_context;

pub use category::{Category, CategoryError};
pub use category_classifier::{CategoryClassifier, ClassifierRule, ClassifierRuleError};
pub use fingerprint::{
    compute_fingerprint, compute_job_identity, normalize_error_signature, normalized_error_digest,
    Fingerprint, JobIdentity, FINGERPRINT_PREFIX, JOB_IDENTITY_PREFIX, NO_SIGNATURES_SENTINEL,
};
pub use run_context::{RepoRef, RepoRefError, RunContext};
