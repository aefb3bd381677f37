//! Dialogue generation collaborator.

pub mod openai;
pub mod prompt;

use async_trait::async_trait;
use kokoro_common::Error;
use thiserror::Error as ThisError;

use crate::character::Character;
use crate::emotion::Emotion;
use crate::message::Message;
use crate::preferences::Relationship;
use crate::scenario::Scenario;

pub use openai::OpenAiDialogue;

/// Everything a generator needs to produce the next reply.
#[derive(Debug, Clone)]
pub struct DialogueRequest {
    pub character: Character,
    pub scenario: Scenario,
    pub relationship: Relationship,
    pub user_name: String,
    /// Full conversation history, oldest first, ending with the user message.
    pub history: Vec<Message>,
}

/// A generated character reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedReply {
    pub text: String,
    pub emotion: Emotion,
    /// 0.0..=1.0
    pub confidence: f32,
}

/// Generator failures.
#[derive(Debug, ThisError)]
pub enum DialogueError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by {0}")]
    RateLimited(String),

    #[error("{0}")]
    ContentFiltered(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<DialogueError> for Error {
    fn from(err: DialogueError) -> Self {
        match err {
            DialogueError::ContentFiltered(reason) => Error::ContentFiltered(reason),
            other => Error::GenerationFailure(other.to_string()),
        }
    }
}

/// Produces character replies.
#[async_trait]
pub trait DialogueGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: DialogueRequest) -> Result<GeneratedReply, DialogueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let filtered: Error = DialogueError::ContentFiltered("unsafe".into()).into();
        assert!(filtered.is_content_filtered());

        let limited: Error = DialogueError::RateLimited("openai".into()).into();
        assert!(matches!(limited, Error::GenerationFailure(ref m) if m.contains("rate limited")));

        let api: Error = DialogueError::Api {
            status: 500,
            message: "boom".into(),
        }
        .into();
        assert!(api.is_retryable());
    }
}
