//! Configuration validation for the Kokoro companion.
//!
//! Catches values that deserialize fine but cannot work at runtime
//! (zero timeouts, unknown backends, out-of-range temperatures).

use thiserror::Error;

use crate::config::{Config, LlmConfig, ObservabilityConfig, SessionSettings, StorageConfig};

/// Storage backends the core knows how to open.
pub const STORAGE_BACKENDS: &[&str] = &["sqlite", "memory"];

/// Log formats understood by `init_logging`.
pub const LOG_FORMATS: &[&str] = &["pretty", "json"];

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.storage.validate(),
            self.llm.validate(),
            self.session.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for StorageConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !STORAGE_BACKENDS.contains(&self.backend.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "storage.backend".into(),
                reason: format!(
                    "'{}' is not one of {}",
                    self.backend,
                    STORAGE_BACKENDS.join(", ")
                ),
            });
        }
        Ok(())
    }
}

impl Validate for LlmConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "llm.base_url".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ValidationError::InvalidValue {
                field: "llm.temperature".into(),
                reason: "must be between 0.0 and 2.0".into(),
            });
        }
        if self.max_tokens == 0 {
            return Err(ValidationError::InvalidValue {
                field: "llm.max_tokens".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for SessionSettings {
    fn validate(&self) -> ValidationResult<()> {
        if self.generation_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.generation_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_history_messages == 0 {
            return Err(ValidationError::InvalidValue {
                field: "session.max_history_messages".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("'{}' is not one of {}", self.log_format, LOG_FORMATS.join(", ")),
            });
        }
        Ok(())
    }
}

impl Config {
    /// Load, apply environment overrides, and validate.
    pub fn load_and_validate(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let config = Self::load_with_env(path)?;
        Validate::validate(&config).map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let mut config = Config::default();
        config.storage.backend = "redis".into();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "storage.backend"));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.session.generation_timeout_secs = 0;
        config.observability.log_format = "xml".into();
        match config.validate().unwrap_err() {
            ValidationError::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected Multiple, got {other:?}"),
        }
    }

    #[test]
    fn test_temperature_range() {
        let mut llm = LlmConfig::default();
        llm.temperature = 2.5;
        assert!(llm.validate().is_err());
        llm.temperature = 0.0;
        assert!(llm.validate().is_ok());
    }
}
