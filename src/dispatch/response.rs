//! Dispatch results as handed back to listeners.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::types::Error;

/// Result of a successful walk.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Whether any node claimed the request.
    pub handled: bool,
    pub status: u16,
    pub payload: Option<Value>,
    /// Raw output written by a hook or action.
    pub output: Bytes,
}

impl Outcome {
    pub fn not_handled() -> Self {
        Self {
            handled: false,
            status: 404,
            payload: None,
            output: Bytes::new(),
        }
    }

    pub fn handled(status: u16, payload: Option<Value>, output: Bytes) -> Self {
        Self {
            handled: true,
            status,
            payload,
            output,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.handled && (200..300).contains(&self.status)
    }
}

/// What the top-level boundary returns: never an error.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub status: u16,
    pub handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip)]
    pub output: Bytes,
}

impl Response {
    pub fn from_error(err: &Error) -> Self {
        Self {
            status: err.status(),
            handled: !matches!(err, Error::NotFound(_)),
            payload: Some(err.to_payload()),
            output: Bytes::new(),
        }
    }

    /// Payload `status` field, if any.
    pub fn payload_status(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("status"))
            .and_then(Value::as_str)
    }
}

impl From<Outcome> for Response {
    fn from(outcome: Outcome) -> Self {
        Self {
            status: outcome.status,
            handled: outcome.handled,
            payload: outcome.payload,
            output: outcome.output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response() {
        let r = Response::from_error(&Error::unauthorized("needs ops"));
        assert_eq!(r.status, 403);
        assert!(r.handled);
        assert_eq!(r.payload_status(), Some("error"));

        let r = Response::from_error(&Error::not_found("/x/"));
        assert_eq!(r.status, 404);
        assert!(!r.handled);
    }

    #[test]
    fn test_outcome_conversion() {
        let outcome = Outcome::handled(200, Some(json!({"status": "ok"})), Bytes::new());
        assert!(outcome.is_ok());
        let r = Response::from(outcome);
        assert_eq!(r.payload_status(), Some("ok"));
        assert!(!Outcome::not_handled().is_ok());
    }
}
