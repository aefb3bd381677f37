//! Error types for the Kokoro companion.

use thiserror::Error;

/// Result type alias using the Kokoro error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the conversation state layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input to a store mutation (empty text, bad enum, duplicate id)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation not allowed in the conversation's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Referenced conversation, character, or backup does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Dialogue generation failed or timed out
    #[error("Generation failed: {0}")]
    GenerationFailure(String),

    /// Generated or submitted content was rejected by the content filter
    #[error("Content filtered: {0}")]
    ContentFiltered(String),

    /// Persistent storage read/write failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create an error with additional context.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers and return the underlying error.
    pub fn root(&self) -> &Error {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Self::Validation(_))
    }

    /// Check if this is a state error.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self.root(), Self::InvalidState(_))
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound(_))
    }

    /// Check if this is a content filter rejection.
    pub fn is_content_filtered(&self) -> bool {
        matches!(self.root(), Self::ContentFiltered(_))
    }

    /// Whether a manual retry of the same operation could succeed.
    ///
    /// Content filter rejections and validation errors are deterministic;
    /// generation and storage failures are usually transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            Self::GenerationFailure(_) | Self::Storage(_) | Self::Io(_)
        )
    }

    /// Short text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self.root() {
            Self::Validation(reason) => format!("That input isn't valid: {reason}"),
            Self::InvalidState(reason) => format!("Please wait: {reason}"),
            Self::NotFound(what) => format!("Couldn't find {what}"),
            Self::GenerationFailure(_) => {
                "The reply couldn't be generated. Check your connection and try again.".into()
            }
            Self::ContentFiltered(_) => {
                "That reply was blocked by your content-safety settings.".into()
            }
            Self::Storage(_) | Self::Io(_) | Self::Json(_) => {
                "Your changes couldn't be saved; they will be kept until you close the app."
                    .into()
            }
            Self::Config(reason) => format!("Configuration problem: {reason}"),
            Self::WithContext { .. } => self.to_string(),
        }
    }
}

/// Extension trait for adding context to any error type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(Error::Validation("empty".into()).is_validation());
        assert!(Error::InvalidState("busy".into()).is_invalid_state());
        assert!(Error::NotFound("c1".into()).is_not_found());
        assert!(Error::ContentFiltered("blocked".into()).is_content_filtered());
        assert!(!Error::ContentFiltered("blocked".into()).is_retryable());
        assert!(Error::GenerationFailure("timeout".into()).is_retryable());
    }

    #[test]
    fn test_error_with_context() {
        let err = Error::NotFound("conversation c9".into());
        let with_ctx = err.with_context("toggling favorite");
        assert!(matches!(with_ctx, Error::WithContext { .. }));
        assert!(with_ctx.is_not_found());
        assert_eq!(
            with_ctx.to_string(),
            "toggling favorite: Not found: conversation c9"
        );
    }

    #[test]
    fn test_user_message_distinguishes_filter_from_failure() {
        let filtered = Error::ContentFiltered("policy".into()).user_message();
        let failed = Error::GenerationFailure("503".into()).user_message();
        assert_ne!(filtered, failed);
        assert!(filtered.contains("content-safety"));
    }

    #[test]
    fn test_result_ext_context() {
        let raw: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = raw.context("writing preferences").unwrap_err();
        assert!(err.to_string().starts_with("writing preferences"));
        assert!(err.is_retryable());
    }
}
