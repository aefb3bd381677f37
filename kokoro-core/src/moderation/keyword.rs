//! Keyword-based content filter using Aho-Corasick multi-pattern matching.

use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use kokoro_common::{Error, Result};

use super::{ContentFilter, Verdict};
use crate::preferences::ContentFilterLevel;

const MODERATE_TERMS: &[&str] = &[
    "kill yourself",
    "kys",
    "go die",
    "self-harm",
    "how to make a bomb",
];

/// Added on top of the moderate list at `strict`.
const STRICT_EXTRA_TERMS: &[&str] = &["idiot", "stupid", "shut up", "hate you", "loser"];

pub struct KeywordFilter {
    moderate: AhoCorasick,
    strict: AhoCorasick,
    moderate_terms: Vec<String>,
    strict_terms: Vec<String>,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(moderate: &[S], strict_extra: &[S]) -> Result<Self> {
        let moderate_terms: Vec<String> = moderate
            .iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        let strict_terms: Vec<String> = moderate_terms
            .iter()
            .cloned()
            .chain(
                strict_extra
                    .iter()
                    .map(|t| t.as_ref().trim().to_lowercase())
                    .filter(|t| !t.is_empty()),
            )
            .collect();

        Ok(Self {
            moderate: build(&moderate_terms)?,
            strict: build(&strict_terms)?,
            moderate_terms,
            strict_terms,
        })
    }

    pub fn with_default_terms() -> Result<Self> {
        Self::new(MODERATE_TERMS, STRICT_EXTRA_TERMS)
    }

    fn find(&self, text: &str, level: ContentFilterLevel) -> Option<&str> {
        let (matcher, terms) = match level {
            ContentFilterLevel::Off => return None,
            ContentFilterLevel::Moderate => (&self.moderate, &self.moderate_terms),
            ContentFilterLevel::Strict => (&self.strict, &self.strict_terms),
        };
        let folded = text.to_lowercase();
        matcher
            .find_overlapping_iter(&folded)
            .find(|m| on_word_boundaries(&folded, m.start(), m.end()))
            .map(|m| terms[m.pattern().as_usize()].as_str())
    }
}

/// A term only counts as a whole word, so "kys" never fires inside "skyscrapers".
/// Scripts written without spaces (kana, kanji) have no ASCII word characters
/// and always match.
fn on_word_boundaries(text: &str, start: usize, end: usize) -> bool {
    let is_word = |c: char| c.is_ascii_alphanumeric();
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.is_some_and(is_word) && !after.is_some_and(is_word)
}

fn build(terms: &[String]) -> Result<AhoCorasick> {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(terms)
        .map_err(|e| Error::Config(format!("invalid content filter terms: {e}")))
}

#[async_trait]
impl ContentFilter for KeywordFilter {
    async fn review(&self, text: &str, level: ContentFilterLevel) -> Verdict {
        match self.find(text, level) {
            Some(term) => {
                tracing::debug!(level = level.as_str(), term, "Content filter matched");
                Verdict::Rejected {
                    reason: format!("contains blocked phrase \"{term}\""),
                }
            }
            None => Verdict::Allowed,
        }
    }
}
