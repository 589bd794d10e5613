//! Command-line surface of the CI triage action.
//! This crate maps flags and GitHub Actions environment variables onto the
//! reconciler, renders the issue body, and reports step outputs.

pub mod action_outputs;
pub mod bootstrap_helpers;
pub mod cli_args;
pub mod run_context_env;
pub mod triage_runner;

pub use action_outputs::ActionOutputs;
pub use bootstrap_helpers::init_tracing;
pub use cli_args::{Cli, CliDedupeStrategy, CliTriageMode};
pub use run_context_env::{collect_error_signatures, run_context_from_env};
pub use triage_runner::{resolve_category, run_triage, TriageSettings};
