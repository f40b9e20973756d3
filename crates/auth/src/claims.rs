use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use omms_core::DomainError;

use crate::{PermissionCode, RoleName};

/// Wire claims carried inside an access token.
///
/// `roles` and `permissions` are a snapshot taken at issuance and are kept
/// sorted so that identical subjects produce identical payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id, as a decimal string.
    pub sub: String,

    pub username: String,

    #[serde(default)]
    pub roles: Vec<RoleName>,

    #[serde(default)]
    pub permissions: Vec<PermissionCode>,

    /// Superuser flag.
    #[serde(default)]
    pub su: bool,

    /// Issued-at, unix seconds.
    pub iat: i64,

    /// Expiration, unix seconds.
    pub exp: i64,
}

/// Why a token was refused. Deliberately coarse: callers never learn which
/// cryptographic check failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,

    #[error("token has expired")]
    Expired,
}

impl From<TokenError> for DomainError {
    fn from(value: TokenError) -> Self {
        DomainError::unauthenticated(value.to_string())
    }
}

/// Deterministically validate the time window of decoded claims.
pub fn validate_claims(claims: &TokenClaims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.exp <= claims.iat {
        return Err(TokenError::Invalid);
    }
    if now.timestamp() >= claims.exp {
        return Err(TokenError::Expired);
    }
    Ok(())
}
