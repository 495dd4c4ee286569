//! Error types for the playback & session engine
//!
//! Defines the engine error taxonomy using thiserror for clear error
//! propagation. Remote failures are classified from HTTP status codes;
//! resolution errors degrade to playlist advance at the controller
//! boundary and listen-delivery errors are absorbed into the retry queue.

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Authorization expired mid-flight (HTTP 401); recoverable exactly once
    /// via refresh-and-retry, performed by the caller
    #[error("Authorization expired")]
    AuthExpired,

    /// The credential is not allowed to perform the operation (HTTP 403)
    #[error("Forbidden")]
    Forbidden,

    /// Backend rate limit hit (HTTP 429)
    #[error("Rate limited")]
    RateLimited,

    /// Backend temporarily unavailable (HTTP 503)
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// Remote call exceeded its bound
    #[error("Request timed out")]
    Timeout,

    /// Any other non-success HTTP status
    #[error("Server error: status {0}")]
    ServerError(u16),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Track lacks identity or collection data required for the operation
    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    /// No valid session or legacy API key is available
    #[error("No valid session")]
    NoSession,

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a non-success HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Error::AuthExpired,
            403 => Error::Forbidden,
            429 => Error::RateLimited,
            503 => Error::ServiceUnavailable,
            other => Error::ServerError(other),
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Error::AuthExpired)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout
        } else if let Some(status) = err.status() {
            Error::from_status(status.as_u16())
        } else {
            Error::Network(err.to_string())
        }
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
