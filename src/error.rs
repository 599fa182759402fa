//! Application-wide error types.
//!
//! [`AppError`] covers process-level failures (startup, transport, logger).
//! [`TurnError`] is the per-frame taxonomy surfaced to clients as
//! `{"error": ...}` frames — its `Display` strings are the wire contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-frame failures. None of these terminate the connection; the session
/// loop replies with an error frame and keeps reading.
#[derive(Debug, Error)]
pub enum TurnError {
    /// Input frame was not a JSON object of the expected shape.
    #[error("malformed frame")]
    MalformedFrame,

    /// Chat turn received before an `identify` command bound an identity.
    #[error("not identified")]
    NotIdentified,

    /// A required chat-turn field was absent.
    #[error("missing required fields")]
    MissingFields,

    /// `sender_uuid` did not match the identity bound to the connection.
    #[error("sender mismatch")]
    AuthMismatch,

    /// A `chat_history` element could not be normalised into a message.
    #[error("bad history item: {0}")]
    BadHistoryItem(String),

    /// The LLM call failed after the turn was accepted.
    #[error("llm call failed: {0}")]
    Llm(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("missing field".into());
        assert!(e.to_string().contains("missing field"));
    }

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: AppError = io_err.into();
        assert!(e.to_string().contains("io error"));
        let _: &dyn Error = &e;
    }

    #[test]
    fn turn_error_wire_strings() {
        assert_eq!(TurnError::MalformedFrame.to_string(), "malformed frame");
        assert_eq!(TurnError::NotIdentified.to_string(), "not identified");
        assert_eq!(TurnError::MissingFields.to_string(), "missing required fields");
        assert_eq!(TurnError::AuthMismatch.to_string(), "sender mismatch");
        assert!(
            TurnError::BadHistoryItem("no content".into())
                .to_string()
                .contains("no content")
        );
    }
}
