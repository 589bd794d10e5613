use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::category::{Category, CategoryError};

#[derive(Debug, Error)]
/// Enumerates supported `ClassifierRuleError` values.
pub enum ClassifierRuleError {
    #[error("category rule '{0}' must use the form pattern=category")]
    MissingSeparator(String),
    #[error("category rule '{rule}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
    #[error("category rule '{rule}' has an invalid category: {source}")]
    InvalidCategory {
        rule: String,
        #[source]
        source: CategoryError,
    },
}

#[derive(Debug, Clone)]
/// One ordered classification rule.
///
/// `patterns` run against the lower-cased workflow and job names. `hint_patterns`
/// are only consulted when no rule matched the names directly.
pub struct ClassifierRule {
    category: Category,
    patterns: Vec<Regex>,
    hint_patterns: Vec<Regex>,
}

impl ClassifierRule {
    pub fn new(category: Category, patterns: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            category,
            patterns: compile_patterns(patterns)?,
            hint_patterns: Vec::new(),
        })
    }

    pub fn with_hints(mut self, hint_patterns: &[&str]) -> Result<Self, regex::Error> {
        self.hint_patterns = compile_patterns(hint_patterns)?;
        Ok(self)
    }

    /// Parse an operator rule written as `pattern=category`.
    pub fn parse_operator_rule(raw: &str) -> Result<Self, ClassifierRuleError> {
        let (pattern, category) = raw
            .rsplit_once('=')
            .map(|(pattern, category)| (pattern.trim(), category.trim()))
            .filter(|(pattern, category)| !pattern.is_empty() && !category.is_empty())
            .ok_or_else(|| ClassifierRuleError::MissingSeparator(raw.to_string()))?;
        let category =
            Category::parse(category).map_err(|source| ClassifierRuleError::InvalidCategory {
                rule: raw.to_string(),
                source,
            })?;
        Self::new(category, &[pattern]).map_err(|source| ClassifierRuleError::InvalidPattern {
            rule: raw.to_string(),
            source,
        })
    }

    pub fn category(&self) -> &Category {
        &self.category
    }

    fn matches_names(&self, haystack: &str) -> bool {
        !haystack.is_empty() && self.patterns.iter().any(|pattern| pattern.is_match(haystack))
    }

    fn matches_hint(&self, hint: &str) -> bool {
        !hint.is_empty()
            && self
                .hint_patterns
                .iter()
                .any(|pattern| pattern.is_match(hint))
    }
}

fn compile_patterns(patterns: &[&str]) -> Result<Vec<Regex>, regex::Error> {
    patterns
        .iter()
        .map(|pattern| RegexBuilder::new(pattern).case_insensitive(true).build())
        .collect()
}

#[derive(Debug, Clone)]
/// Ordered rule registry mapping workflow/job names to a [`Category`].
pub struct CategoryClassifier {
    rules: Vec<ClassifierRule>,
}

impl CategoryClassifier {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_default_rules() -> Self {
        let mut classifier = Self::empty();
        for rule in default_rules() {
            classifier.push_rule(rule);
        }
        classifier
    }

    /// Insert a rule ahead of every existing rule.
    pub fn prepend_rule(&mut self, rule: ClassifierRule) {
        self.rules.insert(0, rule);
    }

    pub fn push_rule(&mut self, rule: ClassifierRule) {
        self.rules.push(rule);
    }

    /// Prepend operator rules so they win over the built-ins, keeping their
    /// relative order.
    pub fn with_operator_rules<'a>(
        mut self,
        raw_rules: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ClassifierRuleError> {
        let parsed = raw_rules
            .into_iter()
            .filter(|raw| !raw.trim().is_empty())
            .map(ClassifierRule::parse_operator_rule)
            .collect::<Result<Vec<_>, _>>()?;
        for rule in parsed.into_iter().rev() {
            self.prepend_rule(rule);
        }
        Ok(self)
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    pub fn classify(
        &self,
        workflow_name: &str,
        job_name: &str,
        additional_labels_hint: &str,
    ) -> Category {
        let haystack = format!("{} {}", workflow_name.trim(), job_name.trim())
            .trim()
            .to_ascii_lowercase();
        if let Some(rule) = self.rules.iter().find(|rule| rule.matches_names(&haystack)) {
            return rule.category.clone();
        }
        let hint = additional_labels_hint.trim().to_ascii_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches_hint(&hint))
            .map(|rule| rule.category.clone())
            .unwrap_or_else(Category::general)
    }
}

impl Default for CategoryClassifier {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

fn default_rules() -> Vec<ClassifierRule> {
    let specs: [(&str, &[&str], &[&str]); 4] = [
        (
            Category::SECURITY_SCAN,
            &[
                r"security",
                r"codeql",
                r"\bsnyk\b",
                r"\btrivy\b",
                r"\bsast\b",
                r"\bdast\b",
                r"vuln",
                r"gitleaks|secret[-_ ]?scan",
                r"\baudit\b",
                r"dependency[-_ ]?review",
            ],
            &[r"security", r"vuln"],
        ),
        (
            Category::TERRAFORM_VALIDATION,
            &[r"terraform", r"\btf[-_ ]?(validate|plan|lint|fmt)\b", r"tflint", r"opentofu"],
            &[r"terraform"],
        ),
        (
            Category::DEPLOYMENT,
            &[
                r"deploy",
                r"release",
                r"publish",
                r"rollout",
                r"\bhelm\b",
                r"\bk8s\b|kubernetes",
            ],
            &[r"deploy", r"release"],
        ),
        (
            Category::CODE_QUALITY,
            &[
                r"lint",
                r"\b(?:fmt|format(?:ting|ter)?)\b",
                r"clippy",
                r"prettier",
                r"quality",
                r"sonar",
                r"\bstyle\b",
            ],
            &[r"lint", r"quality"],
        ),
    ];

    specs
        .into_iter()
        .filter_map(|(category, patterns, hints)| {
            let category = Category::parse(category).ok()?;
            ClassifierRule::new(category, patterns)
                .and_then(|rule| rule.with_hints(hints))
                .ok()
        })
        .collect()
}
