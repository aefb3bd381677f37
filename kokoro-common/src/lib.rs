//! Kokoro Common - Shared types, utilities, and configuration for the Kokoro companion.
//!
//! This crate provides:
//! - The error taxonomy shared by every store and controller
//! - Configuration types, loading, and validation
//! - Logging setup
//! - Small text utilities

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, LlmConfig, ObservabilityConfig, SessionSettings, StorageConfig, TtsConfig,
};
pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
