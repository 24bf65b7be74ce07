//! Custom error types for the application.
//!
//! This module defines the primary error type, `FmError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of errors that can occur,
//! from configuration and I/O issues to instrument-specific problems.
//!
//! - **`Config`**: Wraps errors from the `config` crate (file parsing,
//!   missing keys, format issues).
//! - **`Configuration`**: Semantic errors in the configuration, i.e. values
//!   that parse fine but are logically invalid (empty host, start frequency
//!   above stop frequency). Caught by the validation step.
//! - **`Io`**: Standard `std::io::Error`, covering the TCP session.
//! - **`Instrument`**: General category for errors originating from the
//!   instrument session (connect failures, closed connections).
//! - **`Protocol`**: The instrument answered, but the response could not be
//!   parsed as the expected type. Carries both the query and the raw text.
//!
//! With `#[from]`, `FmError` can be seamlessly created from underlying error
//! types, so the rest of the crate propagates errors with the `?` operator.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, FmError>;

#[derive(Error, Debug)]
pub enum FmError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Unparseable response to '{query}': {response:?}")]
    Protocol { query: String, response: String },

    #[error("Timed out waiting for response to '{0}'")]
    CommandTimeout(String),

    #[error("Timed out after {0:?} waiting for the first completed sweep")]
    SweepTimeout(Duration),

    #[error("Parameter is read-only")]
    ParameterReadOnly,

    #[error("Value for parameter '{0}' is outside its allowed range")]
    ParameterOutOfRange(String),

    #[error("Invalid choice for parameter '{0}'")]
    ParameterInvalidChoice(String),

    #[error("Trace number {0} is out of range (traces are numbered 1..=6)")]
    InvalidTraceNumber(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_names_query_and_response() {
        let err = FmError::Protocol {
            query: "FREQ:STAR?".into(),
            response: "garbage".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("FREQ:STAR?"));
        assert!(msg.contains("garbage"));
    }

    #[test]
    fn invalid_trace_number_mentions_valid_range() {
        let err = FmError::InvalidTraceNumber(7);
        assert!(err.to_string().contains("1..=6"));
    }
}
