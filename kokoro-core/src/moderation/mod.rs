//! Content filter collaborator.

pub mod keyword;

use async_trait::async_trait;

use crate::preferences::ContentFilterLevel;

pub use keyword::KeywordFilter;

/// Outcome of reviewing a piece of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Rejected { reason: String },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[async_trait]
pub trait ContentFilter: Send + Sync {
    /// Review `text` at the user's configured strictness.
    async fn review(&self, text: &str, level: ContentFilterLevel) -> Verdict;
}
