//! Error types for the creative pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, CatalystError>;

/// Why a transient invocation failed. Used by `RetryPolicy` to decide
/// which failures are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientKind {
    RateLimited,
    Timeout,
    ServerError,
    Network,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransientKind::RateLimited => "rate limited",
            TransientKind::Timeout => "timeout",
            TransientKind::ServerError => "server error",
            TransientKind::Network => "network",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum CatalystError {

    // =============================
    // Invocation Errors
    // =============================

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transient invocation error ({kind}): {message}")]
    TransientInvocation { kind: TransientKind, message: String },

    #[error("Permanent invocation error: {0}")]
    PermanentInvocation(String),

    #[error("Schema validation error for {schema}: {message}")]
    SchemaValidation { schema: String, message: String },

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Weak content: {0}")]
    WeakContent(String),

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Cache transaction error: {0}")]
    CacheTransaction(String),

    #[error("Briefing error: {0}")]
    Briefing(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Run cancelled before stage {0}")]
    Cancelled(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Top-level failure classification reported to callers.
/// Retry and fallback detail never leaks past this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Configuration,
    Invocation,
    SchemaValidation,
    Briefing,
    Synthesis,
    Cancelled,
    Internal,
}

impl CatalystError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        CatalystError::TransientInvocation {
            kind,
            message: message.into(),
        }
    }

    pub fn schema(schema: &str, message: impl Into<String>) -> Self {
        CatalystError::SchemaValidation {
            schema: schema.to_string(),
            message: message.into(),
        }
    }

    pub fn transient_kind(&self) -> Option<TransientKind> {
        match self {
            CatalystError::TransientInvocation { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.transient_kind().is_some()
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            CatalystError::Configuration(_) => ErrorClass::Configuration,
            CatalystError::TransientInvocation { .. } | CatalystError::PermanentInvocation(_) => {
                ErrorClass::Invocation
            }
            CatalystError::SchemaValidation { .. } => ErrorClass::SchemaValidation,
            CatalystError::Briefing(_) => ErrorClass::Briefing,
            CatalystError::WeakContent(_) | CatalystError::Assembly(_) => ErrorClass::Synthesis,
            CatalystError::Cancelled(_) => ErrorClass::Cancelled,
            _ => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = CatalystError::transient(TransientKind::RateLimited, "429");
        assert!(err.is_transient());
        assert_eq!(err.transient_kind(), Some(TransientKind::RateLimited));
        assert_eq!(err.class(), ErrorClass::Invocation);

        let err = CatalystError::PermanentInvocation("401".into());
        assert!(!err.is_transient());
        assert_eq!(err.class(), ErrorClass::Invocation);
    }

    #[test]
    fn test_fallback_errors_classify_as_synthesis() {
        assert_eq!(
            CatalystError::Assembly("theme".into()).class(),
            ErrorClass::Synthesis
        );
        assert_eq!(
            CatalystError::WeakContent("short".into()).class(),
            ErrorClass::Synthesis
        );
    }
}
