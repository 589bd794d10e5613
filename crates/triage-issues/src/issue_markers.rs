use std::collections::HashSet;

use triage_core::{Category, Fingerprint, JobIdentity};

pub const FINGERPRINT_MARKER_PREFIX: &str = "<!-- ci-triage:fingerprint:";
pub const JOB_IDENTITY_MARKER_PREFIX: &str = "<!-- ci-triage:job:";
pub const FINGERPRINT_MARKER_SUFFIX: &str = " -->";
pub const DEFAULT_TITLE_PREFIX: &str = "CI failure:";

/// GitHub rejects issue titles above this many characters.
pub const MAX_ISSUE_TITLE_CHARS: usize = 256;
/// GitHub rejects issue bodies above this size.
pub const MAX_ISSUE_BODY_BYTES: usize = 65_536;

const UNKNOWN_WORKFLOW: &str = "unknown workflow";
const MAX_TITLE_PREFIX_CHARS: usize = 32;
const MAX_TITLE_NAME_CHARS: usize = 72;
const BODY_MARKER_RESERVE_BYTES: usize = 512;
const BODY_TRUNCATION_NOTICE: &str = "\n\n_Issue body truncated to fit the tracker size limit._";
const ELLIPSIS: char = '\u{2026}';

/// Cut `text` to at most `max_chars` characters, ending in an ellipsis when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut shortened = text
        .chars()
        .take(max_chars.saturating_sub(1))
        .collect::<String>()
        .trim_end()
        .to_string();
    shortened.push(ELLIPSIS);
    shortened
}

/// Normalize label names for case-insensitive comparison.
pub fn normalize_issue_label(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Ordered label list: failure label, additional labels, then the category.
///
/// Blank entries are dropped and duplicates are removed case-insensitively,
/// keeping the first spelling.
pub fn build_issue_labels<'a>(
    failure_label: &str,
    additional_labels: impl IntoIterator<Item = &'a str>,
    category: Option<&Category>,
) -> Vec<String> {
    let category_label = category.map(Category::label_slug);
    let mut candidates: Vec<&str> = vec![failure_label];
    for label in additional_labels {
        candidates.push(label);
    }
    if let Some(label) = category_label.as_deref() {
        candidates.push(label);
    }
    let mut seen = HashSet::new();
    let mut labels = Vec::new();
    for candidate in candidates {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(normalize_issue_label(trimmed)) {
            labels.push(trimmed.to_string());
        }
    }
    labels
}

fn workflow_display(workflow_name: &str) -> String {
    let trimmed = workflow_name.trim();
    if trimmed.is_empty() {
        UNKNOWN_WORKFLOW.to_string()
    } else {
        truncate_chars(trimmed, MAX_TITLE_NAME_CHARS)
    }
}

/// Title head shared by every issue of one workflow; used for soft-cap counting.
pub fn workflow_title_head(title_prefix: &str, workflow_name: &str) -> String {
    format!(
        "{} {}",
        truncate_chars(title_prefix.trim(), MAX_TITLE_PREFIX_CHARS),
        workflow_display(workflow_name)
    )
}

/// Issue title. The fingerprint token is always the bracketed suffix so
/// lookups keep matching after the body changes. Prefix, workflow and job are
/// shortened so the title stays within [`MAX_ISSUE_TITLE_CHARS`].
pub fn render_issue_title(
    title_prefix: &str,
    workflow_name: &str,
    job_name: &str,
    category: &Category,
    fingerprint: &Fingerprint,
) -> String {
    let head = workflow_title_head(title_prefix, workflow_name);
    let job = truncate_chars(job_name.trim(), MAX_TITLE_NAME_CHARS);
    if job.is_empty() {
        format!("{head} [{category}] [{fingerprint}]")
    } else {
        format!("{head} / {job} [{category}] [{fingerprint}]")
    }
}

pub fn title_belongs_to_workflow(title: &str, title_prefix: &str, workflow_name: &str) -> bool {
    let head = workflow_title_head(title_prefix, workflow_name);
    title
        .strip_prefix(head.as_str())
        .map(|rest| rest.starts_with(" /") || rest.starts_with(" ["))
        .unwrap_or(false)
}

pub fn render_fingerprint_marker(fingerprint: &Fingerprint) -> String {
    format!("{FINGERPRINT_MARKER_PREFIX}{fingerprint}{FINGERPRINT_MARKER_SUFFIX}")
}

pub fn render_job_identity_marker(identity: &JobIdentity) -> String {
    format!("{JOB_IDENTITY_MARKER_PREFIX}{identity}{FINGERPRINT_MARKER_SUFFIX}")
}

fn append_marker(body: &str, prefix: &str, token: &str, marker: String) -> String {
    if last_marker_token(body, prefix).as_deref() == Some(token) {
        return body.to_string();
    }
    let trimmed = body.trim_end();
    if trimmed.is_empty() {
        marker
    } else {
        format!("{trimmed}\n\n{marker}")
    }
}

/// Append the hidden fingerprint marker unless it is already the last one.
pub fn append_fingerprint_marker(body: &str, fingerprint: &Fingerprint) -> String {
    append_marker(
        body,
        FINGERPRINT_MARKER_PREFIX,
        fingerprint.as_str(),
        render_fingerprint_marker(fingerprint),
    )
}

pub fn append_job_identity_marker(body: &str, identity: &JobIdentity) -> String {
    append_marker(
        body,
        JOB_IDENTITY_MARKER_PREFIX,
        identity.as_str(),
        render_job_identity_marker(identity),
    )
}

fn extract_marker_tokens(text: &str, prefix: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cursor = text;
    while let Some(start) = cursor.find(prefix) {
        let after_start = &cursor[start + prefix.len()..];
        let Some(end) = after_start.find(FINGERPRINT_MARKER_SUFFIX) else {
            break;
        };
        let token = after_start[..end].trim();
        if token.is_empty() || token.contains(|ch: char| ch.is_whitespace() || ch == '<') {
            // Unterminated marker; rescan from just past its prefix.
            cursor = after_start;
            continue;
        }
        tokens.push(token.to_string());
        cursor = &after_start[end + FINGERPRINT_MARKER_SUFFIX.len()..];
    }
    tokens
}

fn last_marker_token(text: &str, prefix: &str) -> Option<String> {
    extract_marker_tokens(text, prefix).pop()
}

pub fn extract_fingerprint_markers(text: &str) -> Vec<String> {
    extract_marker_tokens(text, FINGERPRINT_MARKER_PREFIX)
}

/// Make marker-shaped text inert so untrusted content cannot claim an identity.
pub fn neutralize_markers(text: &str) -> String {
    text.replace("<!--", "<! --")
}

/// True when the title or the body's last fingerprint marker carries the token.
///
/// Markers earlier in the body are ignored; the reconciler always appends its
/// own marker after any rendered content.
pub fn issue_carries_fingerprint(title: &str, body: Option<&str>, fingerprint: &Fingerprint) -> bool {
    if title.contains(fingerprint.as_str()) {
        return true;
    }
    body.and_then(|body| last_marker_token(body, FINGERPRINT_MARKER_PREFIX))
        .is_some_and(|token| token == fingerprint.as_str())
}

pub fn issue_carries_job_identity(body: Option<&str>, identity: &JobIdentity) -> bool {
    body.and_then(|body| last_marker_token(body, JOB_IDENTITY_MARKER_PREFIX))
        .is_some_and(|token| token == identity.as_str())
}

/// Shorten a body so it plus the hidden markers fit [`MAX_ISSUE_BODY_BYTES`].
pub fn clamp_issue_body(body: &str) -> String {
    let budget = MAX_ISSUE_BODY_BYTES - BODY_MARKER_RESERVE_BYTES;
    if body.len() <= budget {
        return body.to_string();
    }
    let mut cut = budget - BODY_TRUNCATION_NOTICE.len();
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{BODY_TRUNCATION_NOTICE}", body[..cut].trim_end())
}

/// Shorten a free-form title while keeping its fingerprint suffix.
pub fn clamp_issue_title(title: &str, fingerprint: &Fingerprint) -> String {
    let title = title.trim();
    if title.chars().count() <= MAX_ISSUE_TITLE_CHARS {
        return title.to_string();
    }
    let suffix = format!(" [{fingerprint}]");
    let head = title
        .strip_suffix(suffix.as_str())
        .unwrap_or(title)
        .trim_end();
    let room = MAX_ISSUE_TITLE_CHARS - suffix.chars().count();
    format!("{}{suffix}", truncate_chars(head, room))
}

#[cfg(test)]
mod tests {
    use triage_core::{compute_fingerprint, Category, Fingerprint, JobIdentity, RunContext};

    use super::{
        append_fingerprint_marker, append_job_identity_marker, build_issue_labels,
        clamp_issue_body, clamp_issue_title, extract_fingerprint_markers,
        issue_carries_fingerprint, issue_carries_job_identity, neutralize_markers,
        normalize_issue_label, render_fingerprint_marker, render_issue_title,
        title_belongs_to_workflow, DEFAULT_TITLE_PREFIX, MAX_ISSUE_BODY_BYTES,
        MAX_ISSUE_TITLE_CHARS,
    };

    fn fingerprint() -> Fingerprint {
        Fingerprint::from_token("fp-0123456789ab").expect("well-formed token")
    }

    fn category(raw: &str) -> Category {
        Category::parse(raw).expect("valid category")
    }

    #[test]
    fn unit_normalize_issue_label_trims_and_lowercases() {
        assert_eq!(normalize_issue_label("  CI-Failure  "), "ci-failure");
    }

    #[test]
    fn functional_build_issue_labels_orders_and_deduplicates() {
        let labels = build_issue_labels(
            "ci-failure",
            ["  Bug ", "", "CI-FAILURE", "bug", "needs-triage"],
            Some(&category("code-quality")),
        );
        assert_eq!(
            labels,
            vec!["ci-failure", "Bug", "needs-triage", "code-quality"]
        );
        assert_eq!(build_issue_labels(" ", [], None), Vec::<String>::new());
    }

    #[test]
    fn unit_render_issue_title_embeds_category_and_fingerprint() {
        let title = render_issue_title(
            DEFAULT_TITLE_PREFIX,
            "CI",
            "build",
            &category("general"),
            &fingerprint(),
        );
        assert_eq!(title, "CI failure: CI / build [general] [fp-0123456789ab]");

        let no_job = render_issue_title(
            "[ci]",
            "  ",
            "",
            &category("deployment"),
            &fingerprint(),
        );
        assert_eq!(no_job, "[ci] unknown workflow [deployment] [fp-0123456789ab]");
    }

    #[test]
    fn regression_title_belongs_to_workflow_rejects_prefix_collisions() {
        let title = render_issue_title(
            DEFAULT_TITLE_PREFIX,
            "CI",
            "build",
            &category("general"),
            &fingerprint(),
        );
        assert!(title_belongs_to_workflow(&title, DEFAULT_TITLE_PREFIX, "CI"));
        assert!(!title_belongs_to_workflow(&title, DEFAULT_TITLE_PREFIX, "C"));
        assert!(!title_belongs_to_workflow(
            "CI failure: CI Nightly / e2e [general] [fp-0123456789ab]",
            DEFAULT_TITLE_PREFIX,
            "CI"
        ));
    }

    #[test]
    fn functional_append_fingerprint_marker_is_idempotent() {
        let once = append_fingerprint_marker("Build failed.\n\n", &fingerprint());
        assert_eq!(
            once,
            "Build failed.\n\n<!-- ci-triage:fingerprint:fp-0123456789ab -->"
        );
        assert_eq!(append_fingerprint_marker(&once, &fingerprint()), once);
        assert_eq!(
            append_fingerprint_marker("", &fingerprint()),
            render_fingerprint_marker(&fingerprint())
        );
    }

    #[test]
    fn integration_issue_carries_fingerprint_via_title_or_marker() {
        let context = RunContext::default();
        let other = compute_fingerprint(&context, &Category::general());
        let body = append_fingerprint_marker("details", &fingerprint());
        assert!(issue_carries_fingerprint("Unrelated title", Some(&body), &fingerprint()));
        assert!(issue_carries_fingerprint(
            "CI failure: CI [general] [fp-0123456789ab]",
            None,
            &fingerprint()
        ));
        assert!(!issue_carries_fingerprint("Unrelated title", Some(&body), &other));
        assert!(!issue_carries_fingerprint("Unrelated", None, &fingerprint()));
    }

    #[test]
    fn regression_extract_fingerprint_markers_stops_at_unterminated_marker() {
        let text = "a <!-- ci-triage:fingerprint:fp-1 --> b <!-- ci-triage:fingerprint:broken";
        assert_eq!(extract_fingerprint_markers(text), vec!["fp-1".to_string()]);
    }

    fn identity() -> JobIdentity {
        JobIdentity::from_token("job-0123456789ab").expect("well-formed identity")
    }

    #[test]
    fn regression_marker_inside_rendered_content_does_not_match() {
        let other = Fingerprint::from_token("fp-ffffffffffff").expect("token");
        let injected = format!(
            "error: saw {} in the log",
            render_fingerprint_marker(&other)
        );
        let body = append_fingerprint_marker(&injected, &fingerprint());
        assert!(issue_carries_fingerprint("Unrelated", Some(&body), &fingerprint()));
        assert!(!issue_carries_fingerprint("Unrelated", Some(&body), &other));

        let neutral = neutralize_markers(&injected);
        assert!(extract_fingerprint_markers(&neutral).is_empty());
    }

    #[test]
    fn functional_job_identity_marker_follows_fingerprint_marker() {
        let body = append_job_identity_marker(
            &append_fingerprint_marker("details", &fingerprint()),
            &identity(),
        );
        assert_eq!(
            body,
            "details\n\n<!-- ci-triage:fingerprint:fp-0123456789ab -->\n\n<!-- ci-triage:job:job-0123456789ab -->"
        );
        assert!(issue_carries_fingerprint("Unrelated", Some(&body), &fingerprint()));
        assert!(issue_carries_job_identity(Some(&body), &identity()));
        assert!(!issue_carries_job_identity(Some("details"), &identity()));
        assert!(!issue_carries_job_identity(None, &identity()));
        assert_eq!(append_job_identity_marker(&body, &identity()), body);
    }

    #[test]
    fn regression_long_names_keep_title_within_limit_and_fingerprint_suffix() {
        let long = "w".repeat(400);
        let title = render_issue_title(
            &"p".repeat(100),
            &long,
            &long,
            &category(&"c".repeat(50)),
            &fingerprint(),
        );
        assert!(title.chars().count() <= MAX_ISSUE_TITLE_CHARS);
        assert!(title.ends_with("[fp-0123456789ab]"));
        assert!(title_belongs_to_workflow(&title, &"p".repeat(100), &long));

        let custom = clamp_issue_title(&format!("{} [fp-0123456789ab]", "x".repeat(300)), &fingerprint());
        assert_eq!(custom.chars().count(), MAX_ISSUE_TITLE_CHARS);
        assert!(custom.ends_with("\u{2026} [fp-0123456789ab]"));
        assert_eq!(clamp_issue_title(" short ", &fingerprint()), "short");
    }

    #[test]
    fn regression_unterminated_marker_does_not_swallow_appended_marker() {
        let body = append_fingerprint_marker("<!-- ci-triage:fingerprint:dangling", &fingerprint());
        assert_eq!(
            extract_fingerprint_markers(&body),
            vec!["fp-0123456789ab".to_string()]
        );
        assert!(issue_carries_fingerprint("Unrelated", Some(&body), &fingerprint()));
        assert_eq!(append_fingerprint_marker(&body, &fingerprint()), body);
    }

    #[test]
    fn regression_oversized_body_is_clamped_below_tracker_limit() {
        let body = "é".repeat(MAX_ISSUE_BODY_BYTES);
        let clamped = clamp_issue_body(&body);
        let with_markers = append_job_identity_marker(
            &append_fingerprint_marker(&clamped, &fingerprint()),
            &identity(),
        );
        assert!(with_markers.len() <= MAX_ISSUE_BODY_BYTES);
        assert!(clamped.ends_with("_Issue body truncated to fit the tracker size limit._"));
        assert_eq!(clamp_issue_body("small"), "small");
    }
}
