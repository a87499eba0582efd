//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Where in a declaration document an error originated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Source id (usually the declaration file path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    /// Element path inside the document, e.g. `/root/jobs/nightly`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

impl SourcePosition {
    pub fn at(source: Option<&str>, line: usize, column: usize) -> Self {
        Self {
            source: source.map(str::to_string),
            line: Some(line),
            column: Some(column),
            element: None,
        }
    }

    pub fn element(source: Option<&str>, element: impl Into<String>) -> Self {
        Self {
            source: source.map(str::to_string),
            line: None,
            column: None,
            element: Some(element.into()),
        }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source.as_deref().unwrap_or("<declaration>"))?;
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, ":{}:{}", line, column)?;
        }
        if let Some(element) = &self.element {
            write!(f, " ({})", element)?;
        }
        Ok(())
    }
}

fn describe_position(position: &Option<SourcePosition>) -> String {
    position
        .as_ref()
        .map(|p| format!(" at {}", p))
        .unwrap_or_default()
}

/// Main error enum for the nodehost kernel.
#[derive(Error, Debug)]
pub enum Error {
    /// Declaration failed validation or activation.
    #[error("configuration error: {message}{}", describe_position(.position))]
    Configuration {
        message: String,
        position: Option<SourcePosition>,
    },

    /// A security demand was not met by the caller.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Path segment, action id or list id did not resolve.
    #[error("not found: {0}")]
    NotFound(String),

    /// Disposed node, duplicate capability id, duplicate sibling name.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Raised by action logic.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// Malformed request or parameter that cannot be bound.
    #[error("validation error: {0}")]
    Validation(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration { .. } => "CONFIGURATION",
            Error::Unauthorized(_) => "UNAUTHORIZED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidOperation(_) => "INVALID_OPERATION",
            Error::ActionFailed(_) => "ACTION_FAILED",
            Error::Validation(_) => "INVALID_ARGUMENT",
            Error::Internal(_) => "INTERNAL",
            Error::Serialization(_) => "INTERNAL",
            Error::Io(_) => "INTERNAL",
        }
    }

    /// Failure status reported by the dispatcher's top-level boundary.
    pub fn status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unauthorized(_) => 403,
            Error::NotFound(_) => 404,
            Error::InvalidOperation(_) => 409,
            Error::Configuration { .. } => 500,
            Error::ActionFailed(_) => 500,
            Error::Internal(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
        }
    }

    /// Structured failure payload, as returned to callers.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "error",
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            },
        })
    }
}

// Convenience constructors
impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            position: None,
        }
    }

    pub fn configuration_at(msg: impl Into<String>, position: SourcePosition) -> Self {
        Self::Configuration {
            message: msg.into(),
            position: Some(position),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    pub fn action_failed(msg: impl Into<String>) -> Self {
        Self::ActionFailed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Run a node hook or action body, turning a panic into `Error::Internal`.
///
/// Guards held inside `f` are released during unwinding, so the caller's
/// locks stay consistent.
pub(crate) fn contain<T>(what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(Error::internal(format!("{} panicked: {}", what, detail)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::unauthorized("x").status(), 403);
        assert_eq!(Error::not_found("x").status(), 404);
        assert_eq!(Error::invalid_operation("x").status(), 409);
        assert_eq!(Error::validation("x").status(), 400);
        assert_eq!(Error::action_failed("x").status(), 500);
    }

    #[test]
    fn test_configuration_error_carries_position() {
        let err = Error::configuration_at(
            "missing name",
            SourcePosition::at(Some("tree.json"), 3, 7),
        );
        let text = err.to_string();
        assert!(text.contains("missing name"));
        assert!(text.contains("tree.json:3:7"));
        assert_eq!(err.code(), "CONFIGURATION");
    }

    #[test]
    fn test_failure_payload_shape() {
        let payload = Error::not_found("action 'stop'").to_payload();
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error"]["code"], "NOT_FOUND");
    }

    #[test]
    fn test_contain_converts_panic() {
        let result: Result<()> = contain("hook", || panic!("boom"));
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_contain_passes_through() {
        assert_eq!(contain("hook", || Ok(7)).unwrap(), 7);
    }
}
