use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const CATEGORY_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `CategoryError` values.
pub enum CategoryError {
    #[error("category must not be empty")]
    Empty,
    #[error("category '{0}' exceeds {CATEGORY_MAX_CHARS} characters")]
    TooLong(String),
    #[error("category '{0}' may only contain lowercase letters, digits and '-'")]
    InvalidCharacters(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
/// Validated failure category tag.
///
/// The built-in values cover common CI job kinds, but any slug that passes
/// validation is a legal category so operators can declare their own.
pub struct Category(String);

impl Category {
    pub const GENERAL: &'static str = "general";
    pub const DEPLOYMENT: &'static str = "deployment";
    pub const SECURITY_SCAN: &'static str = "security-scan";
    pub const TERRAFORM_VALIDATION: &'static str = "terraform-validation";
    pub const CODE_QUALITY: &'static str = "code-quality";

    pub const BUILT_IN: [&'static str; 5] = [
        Self::GENERAL,
        Self::DEPLOYMENT,
        Self::SECURITY_SCAN,
        Self::TERRAFORM_VALIDATION,
        Self::CODE_QUALITY,
    ];

    /// Parse an operator-supplied category, folding case and separators.
    pub fn parse(raw: &str) -> Result<Self, CategoryError> {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|ch| if ch == '_' || ch.is_whitespace() { '-' } else { ch })
            .collect::<String>();
        if normalized.is_empty() {
            return Err(CategoryError::Empty);
        }
        if normalized.chars().count() > CATEGORY_MAX_CHARS {
            return Err(CategoryError::TooLong(normalized));
        }
        let valid_chars = normalized
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
        if !valid_chars || normalized.starts_with('-') {
            return Err(CategoryError::InvalidCharacters(normalized));
        }
        Ok(Self(normalized))
    }

    pub fn general() -> Self {
        Self(Self::GENERAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_built_in(&self) -> bool {
        Self::BUILT_IN.contains(&self.0.as_str())
    }

    /// Label name used to tag tracked issues with this category.
    pub fn label_slug(&self) -> String {
        self.0.trim_end_matches('-').to_string()
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::general()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Category {
    type Error = CategoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.0
    }
}
