use chrono::{DateTime, Utc};
use thiserror::Error;

use omms_core::DomainError;

use crate::{PermissionCode, Principal, RoleName, TokenError, TokenService};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl From<TokenError> for AuthzError {
    fn from(value: TokenError) -> Self {
        AuthzError::Unauthenticated(value.to_string())
    }
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::Unauthenticated(msg) => DomainError::Unauthenticated(msg),
            AuthzError::Forbidden(msg) => DomainError::Forbidden(msg),
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthzError> {
    let header = header
        .ok_or_else(|| AuthzError::Unauthenticated("missing Authorization header".to_string()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthzError::Unauthenticated("expected a Bearer token".to_string()))?
        .trim();
    if token.is_empty() {
        return Err(AuthzError::Unauthenticated("empty bearer token".to_string()));
    }
    Ok(token)
}

/// Turn an `Authorization` header into a principal.
pub fn authenticate(
    tokens: &TokenService,
    authorization: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Principal, AuthzError> {
    let token = bearer_token(authorization)?;
    Ok(tokens.validate_at(token, now)?)
}

/// A single check applied to an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// At least one of the listed roles.
    AnyRole(Vec<RoleName>),
    /// Every listed permission.
    AllPermissions(Vec<PermissionCode>),
    Superuser,
}

impl Requirement {
    pub fn check(&self, principal: &Principal) -> Result<(), AuthzError> {
        match self {
            Requirement::AnyRole(roles) => {
                if principal.is_superuser() || roles.iter().any(|r| principal.roles().contains(r)) {
                    return Ok(());
                }
                let wanted: Vec<&str> = roles.iter().map(RoleName::as_str).collect();
                Err(AuthzError::Forbidden(format!(
                    "requires one of roles: {}",
                    wanted.join(", ")
                )))
            }
            Requirement::AllPermissions(codes) => {
                if principal.is_superuser() {
                    return Ok(());
                }
                match codes.iter().find(|c| !principal.permissions().contains(*c)) {
                    None => Ok(()),
                    Some(missing) => Err(AuthzError::Forbidden(format!(
                        "missing permission '{missing}'"
                    ))),
                }
            }
            Requirement::Superuser => {
                if principal.is_superuser() {
                    Ok(())
                } else {
                    Err(AuthzError::Forbidden("superuser required".to_string()))
                }
            }
        }
    }
}

/// Ordered list of requirements, evaluated left to right.
///
/// An empty guard only demands a valid token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Guard {
    requirements: Vec<Requirement>,
}

impl Guard {
    pub fn authenticated() -> Self {
        Self::default()
    }

    pub fn roles<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleName>,
    {
        Self::authenticated().and(Requirement::AnyRole(roles.into_iter().map(Into::into).collect()))
    }

    pub fn permissions<I, P>(codes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PermissionCode>,
    {
        Self::authenticated()
            .and(Requirement::AllPermissions(codes.into_iter().map(Into::into).collect()))
    }

    pub fn superuser() -> Self {
        Self::authenticated().and(Requirement::Superuser)
    }

    pub fn and(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// Check an already-authenticated principal.
    pub fn check(&self, principal: &Principal) -> Result<(), AuthzError> {
        self.requirements.iter().try_for_each(|r| r.check(principal))
    }

    /// Authenticate, then check. Authentication failures always win.
    pub fn enforce(
        &self,
        tokens: &TokenService,
        authorization: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Principal, AuthzError> {
        let principal = authenticate(tokens, authorization, now)?;
        self.check(&principal)?;
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::{TokenConfig, TokenSubject};
    use omms_core::UserId;
    use proptest::prelude::*;

    fn tokens() -> TokenService {
        TokenService::new(&TokenConfig::new("guard-test-secret")).unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn principal(subject: TokenSubject) -> Principal {
        Principal {
            subject,
            issued_at: at(0),
            expires_at: at(60),
        }
    }

    fn viewer() -> TokenSubject {
        TokenSubject::new(UserId::new(5), "viewer")
            .with_roles(["standard user"])
            .with_permissions(["user:list"])
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Ok("abc"));
        assert!(bearer_token(None).is_err());
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer   ")).is_err());
    }

    #[test]
    fn any_role_is_an_or() {
        let guard = Guard::roles(["administrator", "standard user"]);
        assert!(guard.check(&principal(viewer())).is_ok());

        let guard = Guard::roles(["administrator"]);
        assert!(matches!(
            guard.check(&principal(viewer())),
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[test]
    fn all_permissions_is_an_and() {
        let p = principal(viewer());
        assert!(Guard::permissions(["user:list"]).check(&p).is_ok());
        let err = Guard::permissions(["user:list", "user:delete"])
            .check(&p)
            .unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("missing permission 'user:delete'".to_string()));
    }

    #[test]
    fn superuser_bypasses_roles_and_permissions() {
        let root = principal(TokenSubject::new(UserId::new(1), "admin").superuser(true));
        assert!(Guard::roles(["nobody-has-this"]).check(&root).is_ok());
        assert!(Guard::permissions(["anything:at_all"]).check(&root).is_ok());
        assert!(Guard::superuser().check(&root).is_ok());
        assert!(Guard::superuser().check(&principal(viewer())).is_err());
    }

    #[test]
    fn requirements_compose_in_order() {
        let guard = Guard::roles(["standard user"]).and(Requirement::AllPermissions(vec!["role:list".into()]));
        assert_eq!(guard.requirements().len(), 2);
        assert!(guard.check(&principal(viewer())).is_err());
    }

    #[test]
    fn expired_token_preempts_permission_check() {
        let tokens = tokens();
        let issued = tokens.issue_at(&viewer(), at(0)).unwrap();
        let header = format!("Bearer {}", issued.token);
        let past_expiry = at(issued.expires_in);

        // Holds the permission, but the token has expired.
        let err = Guard::permissions(["user:list"])
            .enforce(&tokens, Some(header.as_str()), past_expiry)
            .unwrap_err();
        assert!(matches!(err, AuthzError::Unauthenticated(_)));

        // Lacks the permission and the token has expired: still unauthenticated.
        let err = Guard::permissions(["user:delete"])
            .enforce(&tokens, Some(header.as_str()), past_expiry)
            .unwrap_err();
        assert!(matches!(err, AuthzError::Unauthenticated(_)));
    }

    #[test]
    fn enforce_returns_principal_on_success() {
        let tokens = tokens();
        let issued = tokens.issue_at(&viewer(), at(0)).unwrap();
        let header = format!("Bearer {}", issued.token);
        let p = Guard::authenticated().enforce(&tokens, Some(header.as_str()), at(1)).unwrap();
        assert_eq!(p.username(), "viewer");
    }

    #[test]
    fn authz_errors_map_onto_domain_errors() {
        let err: DomainError = AuthzError::Forbidden("x".to_string()).into();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    proptest! {
        /// Granted iff the required set is a subset of what the principal holds.
        #[test]
        fn all_permissions_is_subset_check(
            held in proptest::collection::btree_set("[a-c]:[x-z]", 0..9),
            required in proptest::collection::btree_set("[a-c]:[x-z]", 0..5),
        ) {
            let subject = TokenSubject::new(UserId::new(9), "prop")
                .with_permissions(held.iter().cloned());
            let verdict = Guard::permissions(required.iter().cloned()).check(&principal(subject));
            let held: BTreeSet<&String> = held.iter().collect();
            let expected = required.iter().all(|c| held.contains(c));
            prop_assert_eq!(verdict.is_ok(), expected);
        }
    }
}
