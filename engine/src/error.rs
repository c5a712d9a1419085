//! Engine error types
//!
//! Every public engine call returns either a payload or one of four tagged
//! errors. The enum serializes as `{"kind": "...", ...}` so hosts can forward
//! it to a UI layer as plain data.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Timeout,
    Unavailable,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::Timeout => write!(f, "timeout"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Errors surfaced by the crisis engine
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineError {
    /// Malformed caller data (assessment answers, unknown event id, ...)
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A unit of work exceeded its deadline
    #[error("'{label}' exceeded its {deadline_ms}ms deadline")]
    Timeout { label: String, deadline_ms: u64 },

    /// A collaborator or dependency reported failure
    #[error("{system} unavailable: {reason}")]
    Unavailable { system: String, reason: String },

    /// Unexpected failure inside the engine itself
    #[error("Internal engine error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(label: impl Into<String>, deadline_ms: u64) -> Self {
        Self::Timeout {
            label: label.into(),
            deadline_ms,
        }
    }

    /// Create an unavailable error
    pub fn unavailable(system: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            system: system.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Lock poisoning is always an engine bug
    pub fn lock_poisoned(what: &str) -> Self {
        Self::internal(format!("{what} lock poisoned"))
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this error should trigger the offline fallback path
    pub fn requires_fallback(&self) -> bool {
        !matches!(self, Self::InvalidInput { .. })
    }

    /// Check if this error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Unavailable { .. } => true,
            Self::InvalidInput { .. } => false,
            Self::Internal { .. } => false,
        }
    }

    /// Get recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => {
                "Check the submitted data: PHQ-9 needs 9 answers and GAD-7 needs 7, each 0-3."
            }
            Self::Timeout { .. } => {
                "Show the offline crisis message now. The action may still complete in the \
                 background and can be retried."
            }
            Self::Unavailable { .. } => {
                "Use the offline crisis resources until the failing system reports recovery."
            }
            Self::Internal { .. } => {
                "Show the static emergency message (call or text 988, or 911 in an emergency) \
                 and report the failure."
            }
        }
    }

    /// Flatten into a UI-facing report
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.kind(),
            message: self.to_string(),
            recovery_action: self.recovery_suggestion().to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// Structured error payload for UI layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorKind,
    pub message: String,
    pub recovery_action: String,
    #[serde(default)]
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serializes_tagged() {
        let err = EngineError::timeout("hotline", 200);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["label"], "hotline");
        assert_eq!(json["deadline_ms"], 200);
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            EngineError::invalid_input("bad").kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            EngineError::unavailable("storage", "locked").kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(EngineError::internal("oops").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_invalid_input_never_falls_back() {
        assert!(!EngineError::invalid_input("bad").requires_fallback());
        assert!(EngineError::timeout("x", 1).requires_fallback());
        assert!(EngineError::internal("x").requires_fallback());
    }

    #[test]
    fn test_retryable() {
        assert!(EngineError::timeout("dial", 200).is_retryable());
        assert!(EngineError::unavailable("calendar", "revoked").is_retryable());
        assert!(!EngineError::invalid_input("len").is_retryable());
        assert!(!EngineError::internal("bug").is_retryable());
    }

    #[test]
    fn test_report_mentions_hotline_for_internal() {
        let report = EngineError::internal("poisoned").report();
        assert_eq!(report.code, ErrorKind::Internal);
        assert!(report.recovery_action.contains("988"));
        assert!(!report.retryable);
    }
}
