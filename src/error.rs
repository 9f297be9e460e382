//! Error types for submission and configuration.
//!
//! Runtime failures of a search never appear here: they end the task in the
//! FAILED state and are reported through its status and event stream.

use std::path::PathBuf;
use thiserror::Error;

/// Reasons a job submission is rejected before any task is created.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("charset must not be empty")]
    EmptyCharset,

    #[error("charset contains duplicate symbol {0:?}")]
    DuplicateSymbol(char),

    #[error("max_length must be at least 1")]
    InvalidMaxLength,

    #[error("target digest must not be empty")]
    EmptyTarget,

    #[error("task {0} is already running")]
    AlreadyActive(String),

    #[error("maximum {limit} concurrent tasks reached")]
    AtCapacity { limit: usize },
}

impl SubmitError {
    /// Short stable label for logs and API error bodies.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            SubmitError::EmptyCharset => "empty_charset",
            SubmitError::DuplicateSymbol(_) => "duplicate_symbol",
            SubmitError::InvalidMaxLength => "invalid_max_length",
            SubmitError::EmptyTarget => "empty_target",
            SubmitError::AlreadyActive(_) => "already_active",
            SubmitError::AtCapacity { .. } => "at_capacity",
        }
    }

    /// Validation errors are the caller's fault; the rest are conflicts with
    /// current registry state.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            SubmitError::AlreadyActive(_) | SubmitError::AtCapacity { .. }
        )
    }
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(SubmitError::EmptyCharset.as_label(), "empty_charset");
        assert_eq!(
            SubmitError::AtCapacity { limit: 4 }.as_label(),
            "at_capacity"
        );
    }

    #[test]
    fn messages_include_details() {
        assert_eq!(
            SubmitError::UnsupportedAlgorithm("rar".into()).to_string(),
            "unsupported digest algorithm: rar"
        );
        assert_eq!(
            SubmitError::DuplicateSymbol('a').to_string(),
            "charset contains duplicate symbol 'a'"
        );
    }

    #[test]
    fn conflicts_are_not_validation_errors() {
        assert!(SubmitError::InvalidMaxLength.is_validation());
        assert!(!SubmitError::AlreadyActive("x".into()).is_validation());
        assert!(!SubmitError::AtCapacity { limit: 1 }.is_validation());
    }
}
