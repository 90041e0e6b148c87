//! Error taxonomy for generation calls.
//!
//! The capability wrapper only retries transient kinds; malformed output is
//! surfaced to the scheduler as a failed sub-task.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 or provider-side throttling.
    RateLimited,
    /// 5xx responses.
    ServerError,
    /// Timeouts, refused connections, broken streams.
    Network,
    /// 4xx other than 429. Retrying will not help.
    ClientError,
    /// The response did not satisfy the expected data contract.
    Malformed,
}

impl LlmErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError | Self::Network)
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::ClientError => "client_error",
            Self::Malformed => "malformed_output",
        };
        write!(f, "{}", s)
    }
}

/// A failed generation call.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// Server-provided hint (Retry-After).
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            kind: LlmErrorKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    pub fn server_error(status: u16, body: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, format!("HTTP {}: {}", status, body.into()))
    }

    pub fn client_error(status: u16, body: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ClientError, format!("HTTP {}: {}", status, body.into()))
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Malformed, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Map an HTTP status to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        408 => LlmErrorKind::Network,
        500..=599 => LlmErrorKind::ServerError,
        _ => LlmErrorKind::ClientError,
    }
}
