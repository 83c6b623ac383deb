// SPDX-License-Identifier: MIT
//
// Docgate: Secure Document-Access Proxy

//! Error types for the document proxy
//!
//! Provides a unified error taxonomy using `thiserror`, with stable wire
//! codes for the public resolution surface.

use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network communication failed
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Link store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Request validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Internal trust secret missing or mismatched
    #[error("Authentication failed")]
    Authentication,

    /// Sliding-window rate limit exceeded
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the oldest admission leaves the window
        retry_after: Duration,
    },

    /// Circuit breaker is open; upstream not attempted
    #[error("Circuit open, retry after {retry_after:?}")]
    CircuitOpen {
        /// Remaining cool-down before a half-open trial
        retry_after: Duration,
    },

    /// Token was never issued here (or has been forged)
    #[error("Link not found")]
    LinkNotFound,

    /// Token was issued but its lifetime has elapsed
    #[error("Link expired")]
    LinkExpired,

    /// Upstream returned a non-success status
    #[error("Upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error indicates a transient condition worth retrying
    /// later (by the caller; the proxy itself never retries)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Timeout
                | Error::RateLimited { .. }
                | Error::CircuitOpen { .. }
                | Error::UpstreamStatus(_)
        )
    }

    /// Check if the error should count against the circuit breaker
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout | Error::UpstreamStatus(_)
        )
    }

    /// Stable wire code for the public resolution surface
    pub fn wire_code(&self) -> &'static str {
        match self {
            Error::LinkExpired => "EXPIRED",
            Error::LinkNotFound => "NOT_FOUND",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::CircuitOpen { .. } | Error::Network(_) | Error::Timeout
                | Error::UpstreamStatus(_) => "UPSTREAM_UNAVAILABLE",
            Error::Authentication => "UNAUTHORIZED",
            Error::Validation(_) => "INVALID_REQUEST",
            _ => "INTERNAL",
        }
    }
}

// Conversions for common error types
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
