use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures of the markup codec. Both are block-local: the caller reports the block and moves on.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MarkupError {
    #[error("malformed markup at char {offset}: {reason}")]
    Malformed { offset: usize, reason: String },
    #[error("placeholder {token} missing from translation (expected {expected}, found {found})")]
    MissingPlaceholder {
        token: String,
        expected: usize,
        found: usize,
    },
}

/// Recoverable parser diagnostic. The unit it describes is passed through verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("line {line}: {message}")]
pub struct ParseWarning {
    pub line: usize,
    pub message: String,
}

impl ParseWarning {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationRule {
    QuoteBalance,
    MarkupBalance,
    MalformedMarkup,
    MissingPlaceholder,
    UnexpectedPlaceholder,
    MissingEntry,
    OrphanEntry,
}

impl ValidationRule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuoteBalance => "quote-balance",
            Self::MarkupBalance => "markup-balance",
            Self::MalformedMarkup => "malformed-markup",
            Self::MissingPlaceholder => "missing-placeholder",
            Self::UnexpectedPlaceholder => "unexpected-placeholder",
            Self::MissingEntry => "missing-entry",
            Self::OrphanEntry => "orphan-entry",
        }
    }
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[error("{block_id}: {rule}: {detail}")]
pub struct ValidationError {
    pub block_id: String,
    pub rule: ValidationRule,
    pub detail: String,
    pub source_text: String,
    pub target_text: String,
}
