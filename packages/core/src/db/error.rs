//! Gateway Error Types
//!
//! This module defines the error taxonomy shared by every engine adapter,
//! the connection manager and the dispatcher. Adapters return the most
//! specific kind they can determine; the dispatcher surfaces kind and
//! message to the caller unchanged.
//!
//! Engine-native errors are never converted blindly: each call site knows
//! whether it was opening a handle (always `EngineUnavailable`) or running a
//! statement, and maps accordingly.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the core
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway operation errors
///
/// One variant per taxonomy kind. The message is user-facing and is copied
/// into the response envelope verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Malformed envelope, parameter/placeholder mismatch, unsupported engine/operation pair
    #[error("{0}")]
    BadRequest(String),

    /// Key absent on select/update against the embedded store
    #[error("{0}")]
    NotFound(String),

    /// Key already present on create against the embedded store
    #[error("{0}")]
    Conflict(String),

    /// Connection or open failure, including lock contention on the embedded engine
    #[error("{0}")]
    EngineUnavailable(String),

    /// Engine rejected the statement (syntax, constraint violation, deadline)
    #[error("{0}")]
    StatementFailed(String),

    /// Unexpected fault caught at the dispatch boundary
    #[error("{0}")]
    Internal(String),
}

/// Machine-readable error kind, serialized into the response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    EngineUnavailable,
    StatementFailed,
    Internal,
}

impl ErrorKind {
    /// Stable string code for logs and transports
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BAD_REQUEST",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::EngineUnavailable => "ENGINE_UNAVAILABLE",
            ErrorKind::StatementFailed => "STATEMENT_FAILED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatewayError {
    /// Create a bad request error
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an engine unavailable error
    pub fn engine_unavailable(msg: impl Into<String>) -> Self {
        Self::EngineUnavailable(msg.into())
    }

    /// Create a statement failed error
    pub fn statement_failed(msg: impl Into<String>) -> Self {
        Self::StatementFailed(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Taxonomy kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::BadRequest(_) => ErrorKind::BadRequest,
            GatewayError::NotFound(_) => ErrorKind::NotFound,
            GatewayError::Conflict(_) => ErrorKind::Conflict,
            GatewayError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            GatewayError::StatementFailed(_) => ErrorKind::StatementFailed,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// User-facing message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            GatewayError::BadRequest(m)
            | GatewayError::NotFound(m)
            | GatewayError::Conflict(m)
            | GatewayError::EngineUnavailable(m)
            | GatewayError::StatementFailed(m)
            | GatewayError::Internal(m) => m,
        }
    }
}

impl From<tokio::task::JoinError> for GatewayError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            GatewayError::internal("engine task panicked")
        } else {
            GatewayError::internal(format!("engine task cancelled: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(GatewayError::bad_request("x").kind(), ErrorKind::BadRequest);
        assert_eq!(GatewayError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(GatewayError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(
            GatewayError::engine_unavailable("x").kind(),
            ErrorKind::EngineUnavailable
        );
        assert_eq!(
            GatewayError::statement_failed("x").kind(),
            ErrorKind::StatementFailed
        );
        assert_eq!(GatewayError::internal("x").kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_display_is_bare_message() {
        let err = GatewayError::conflict("key exists: user:42");
        assert_eq!(err.to_string(), "key exists: user:42");
        assert_eq!(err.message(), "key exists: user:42");
    }

    #[test]
    fn test_kind_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::EngineUnavailable).unwrap();
        assert_eq!(json, "\"ENGINE_UNAVAILABLE\"");
        assert_eq!(ErrorKind::StatementFailed.as_str(), "STATEMENT_FAILED");
    }
}
