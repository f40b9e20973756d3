//! Error taxonomy shared by every layer of the identity core.

use thiserror::Error;

/// Result type used across the core.
pub type DomainResult<T> = Result<T, DomainError>;

/// Typed failure returned by store, resolver, token and guard operations.
///
/// Callers decide presentation; the core never logs and discards.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (bad field format). Recoverable by the caller.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Missing, malformed, tampered or expired credential, or bad login.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Valid principal lacking a required role or permission.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A referenced user/role/permission does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Uniqueness violation on username/email/role name/permission code.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backing store failed; the enclosing transaction was rolled back.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A local failure unrelated to input or storage (e.g. token signing).
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unauthenticated(msg: impl Into<String>) -> Self {
        Self::Unauthenticated(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable tag, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::Unauthenticated(_) => "unauthenticated",
            DomainError::Forbidden(_) => "forbidden",
            DomainError::NotFound(_) => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::Storage(_) => "storage_failure",
            DomainError::Internal(_) => "internal_error",
        }
    }
}
