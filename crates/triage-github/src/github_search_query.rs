use triage_core::RepoRef;
use triage_issues::{IssueQuery, IssueStateFilter};

/// Most results the search API will page through for one query.
pub const SEARCH_RESULT_LIMIT: usize = 1_000;
pub const SEARCH_PAGE_SIZE: usize = 100;

fn quote_search_value(raw: &str) -> String {
    let cleaned = raw.replace('"', " ");
    format!("\"{}\"", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Render an [`IssueQuery`] as a GitHub issue search `q` string.
pub fn render_search_query(scope: &RepoRef, query: &IssueQuery) -> String {
    let mut parts = vec![format!("repo:{}", scope.as_slug()), "is:issue".to_string()];
    if query.state == IssueStateFilter::Open {
        parts.push("is:open".to_string());
    }
    for label in &query.labels {
        if !label.trim().is_empty() {
            parts.push(format!("label:{}", quote_search_value(label)));
        }
    }
    for term in &query.terms {
        if !term.trim().is_empty() {
            parts.push(quote_search_value(term));
        }
    }
    parts.push("in:title,body".to_string());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use triage_core::RepoRef;
    use triage_issues::IssueQuery;

    use super::render_search_query;

    #[test]
    fn unit_render_search_query_scopes_open_issues_with_labels() {
        let query = IssueQuery::open_with_term("CI failure: CI").with_label("ci-failure");
        assert_eq!(
            render_search_query(&RepoRef::new("acme", "widgets"), &query),
            "repo:acme/widgets is:issue is:open label:\"ci-failure\" \"CI failure: CI\" in:title,body"
        );
    }

    #[test]
    fn regression_render_search_query_strips_embedded_quotes() {
        let query = IssueQuery::any_state_with_term("say \"hi\"  there");
        assert_eq!(
            render_search_query(&RepoRef::new("o", "r"), &query),
            "repo:o/r is:issue \"say hi there\" in:title,body"
        );
    }
}
