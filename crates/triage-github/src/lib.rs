//! GitHub Issues adapter for the CI triage reconciler.
//! This crate provides the REST transport with optional retry, the search
//! query renderer, and the `IssueTracker` implementation backed by them.

pub mod github_api_client;
pub mod github_search_query;
pub mod github_transport_helpers;

pub use github_api_client::{
    label_color, GithubIssueTracker, GithubTrackerConfig, DEFAULT_GITHUB_API_BASE,
};
pub use github_search_query::render_search_query;
