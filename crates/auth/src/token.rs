//! HS256 access tokens.
//!
//! The service is built once from explicit configuration and is cheap to
//! clone. Expiry is checked against a caller-supplied clock so tests and the
//! guard stay deterministic; jsonwebtoken's own clock check is disabled.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;

use omms_core::{DomainError, UserId};

use crate::{Principal, TokenClaims, TokenError, TokenSubject, validate_claims};

pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 30;

/// Signing secret and token lifetime.
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub ttl: Duration,
}

impl TokenConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl core::fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// A freshly minted token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl core::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &Algorithm::HS256)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(config: &TokenConfig) -> Result<Self, DomainError> {
        if config.secret.is_empty() {
            return Err(DomainError::validation("token secret cannot be empty"));
        }
        if config.ttl <= Duration::zero() {
            return Err(DomainError::validation("token ttl must be positive"));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            ttl: config.ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, subject: &TokenSubject) -> Result<IssuedToken, DomainError> {
        self.issue_at(subject, Utc::now())
    }

    /// Mint a token whose snapshot is `subject`, valid for the configured ttl
    /// starting at `now`.
    pub fn issue_at(&self, subject: &TokenSubject, now: DateTime<Utc>) -> Result<IssuedToken, DomainError> {
        let iat = now.timestamp();
        let expires_in = self.ttl.num_seconds();
        let exp = iat + expires_in;

        let claims = TokenClaims {
            sub: subject.user_id.to_string(),
            username: subject.username.clone(),
            roles: subject.roles.iter().cloned().collect(),
            permissions: subject.permissions.iter().cloned().collect(),
            su: subject.is_superuser,
            iat,
            exp,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DomainError::internal(format!("failed to sign token: {e}")))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| DomainError::internal("token expiry out of range"))?;

        Ok(IssuedToken {
            token,
            expires_at,
            expires_in,
        })
    }

    pub fn validate(&self, token: &str) -> Result<Principal, TokenError> {
        self.validate_at(token, Utc::now())
    }

    /// Verify signature and structure, then check expiry against `now`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            TokenError::Invalid
        })?;
        let claims = data.claims;
        validate_claims(&claims, now)?;

        let user_id: UserId = claims.sub.parse().map_err(|_| TokenError::Invalid)?;
        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or(TokenError::Invalid)?;
        let expires_at = DateTime::from_timestamp(claims.exp, 0).ok_or(TokenError::Invalid)?;

        Ok(Principal {
            subject: TokenSubject {
                user_id,
                username: claims.username,
                roles: claims.roles.into_iter().collect(),
                permissions: claims.permissions.into_iter().collect(),
                is_superuser: claims.su,
            },
            issued_at,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PermissionCode, RoleName};
    use proptest::prelude::*;

    const SECRET: &str = "test-secret-key-minimum-32-characters-long";

    fn service() -> TokenService {
        TokenService::new(&TokenConfig::new(SECRET)).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn alice() -> TokenSubject {
        TokenSubject::new(UserId::new(2), "alice")
            .with_roles(["standard user"])
            .with_permissions(["user:read", "user:list"])
    }

    #[test]
    fn issued_token_round_trips() {
        let svc = service();
        let issued = svc.issue_at(&alice(), at(1_000)).unwrap();
        assert_eq!(issued.expires_in, 30 * 60);
        assert_eq!(issued.expires_at, at(1_000 + 30 * 60));

        let principal = svc.validate_at(&issued.token, at(1_001)).unwrap();
        assert_eq!(principal.subject, alice());
        assert_eq!(principal.issued_at, at(1_000));
        assert!(principal.has_permission("user:list"));
        assert!(!principal.is_superuser());
    }

    #[test]
    fn token_is_rejected_at_expiry() {
        let svc = service();
        let issued = svc.issue_at(&alice(), at(1_000)).unwrap();
        assert!(svc.validate_at(&issued.token, at(1_000 + 30 * 60 - 1)).is_ok());
        assert_eq!(
            svc.validate_at(&issued.token, at(1_000 + 30 * 60)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn custom_ttl_is_honoured() {
        let svc = TokenService::new(&TokenConfig::new(SECRET).with_ttl(Duration::seconds(5))).unwrap();
        let issued = svc.issue_at(&alice(), at(10)).unwrap();
        assert_eq!(issued.expires_in, 5);
        assert_eq!(svc.validate_at(&issued.token, at(15)), Err(TokenError::Expired));
    }

    #[test]
    fn tampered_signature_is_invalid() {
        let svc = service();
        let issued = svc.issue_at(&alice(), at(1_000)).unwrap();

        let (head, sig) = issued.token.rsplit_once('.').unwrap();
        let mut sig: Vec<char> = sig.chars().collect();
        sig[0] = if sig[0] == 'A' { 'B' } else { 'A' };
        let tampered = format!("{head}.{}", sig.into_iter().collect::<String>());

        assert_eq!(svc.validate_at(&tampered, at(1_001)), Err(TokenError::Invalid));
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let svc = service();
        let plain = svc.issue_at(&alice(), at(1_000)).unwrap();
        let elevated = svc.issue_at(&alice().superuser(true), at(1_000)).unwrap();

        // Splice the superuser payload onto the ordinary token's signature.
        let parts: Vec<&str> = plain.token.split('.').collect();
        let forged_payload = elevated.token.split('.').nth(1).unwrap();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(svc.validate_at(&forged, at(1_001)), Err(TokenError::Invalid));
    }

    #[test]
    fn foreign_secret_is_invalid() {
        let other = TokenService::new(&TokenConfig::new("a-completely-different-secret")).unwrap();
        let issued = other.issue_at(&alice(), at(1_000)).unwrap();
        assert_eq!(service().validate_at(&issued.token, at(1_001)), Err(TokenError::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        let svc = service();
        assert_eq!(svc.validate_at("", at(0)), Err(TokenError::Invalid));
        assert_eq!(svc.validate_at("not.a.jwt", at(0)), Err(TokenError::Invalid));
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(TokenService::new(&TokenConfig::new("")).is_err());
    }

    #[test]
    fn debug_never_prints_secret() {
        let cfg = TokenConfig::new(SECRET);
        assert!(!format!("{cfg:?}").contains(SECRET));
        assert!(!format!("{:?}", service()).contains(SECRET));
    }

    proptest! {
        #[test]
        fn any_subject_round_trips(
            id in 1i64..1_000_000,
            username in "[a-z_-]{3,20}",
            roles in proptest::collection::btree_set("[a-z ]{1,12}", 0..4),
            perms in proptest::collection::btree_set("[a-z]{1,8}:[a-z_]{1,12}", 0..8),
            su in any::<bool>(),
            now in 0i64..4_000_000_000,
        ) {
            let subject = TokenSubject {
                user_id: UserId::new(id),
                username,
                roles: roles.into_iter().map(RoleName::from).collect(),
                permissions: perms.into_iter().map(PermissionCode::from).collect(),
                is_superuser: su,
            };
            let svc = service();
            let issued = svc.issue_at(&subject, at(now)).unwrap();
            let principal = svc.validate_at(&issued.token, at(now)).unwrap();
            prop_assert_eq!(principal.subject, subject);
        }
    }
}
