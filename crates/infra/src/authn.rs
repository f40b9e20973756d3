//! Username/password login.

use chrono::{DateTime, Utc};
use serde::Serialize;

use omms_auth::{PasswordHasher, TokenService, TokenSubject};
use omms_core::{DomainError, DomainResult, UserId};

use crate::resolver::PermissionResolver;
use crate::store::SharedCredentialStore;

const BAD_CREDENTIALS: &str = "invalid username or password";
const ACCOUNT_DISABLED: &str = "account is disabled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user_id: UserId,
    pub username: String,
}

/// Verifies credentials and mints an access token carrying the user's
/// resolved roles and permissions.
#[derive(Clone)]
pub struct LoginService {
    store: SharedCredentialStore,
    resolver: PermissionResolver,
    hasher: PasswordHasher,
    tokens: TokenService,
}

impl LoginService {
    pub fn new(store: SharedCredentialStore, hasher: PasswordHasher, tokens: TokenService) -> Self {
        Self {
            resolver: PermissionResolver::new(store.clone()),
            store,
            hasher,
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    pub async fn login(&self, username: &str, password: &str) -> DomainResult<LoginResponse> {
        self.login_at(username, password, Utc::now()).await
    }

    pub async fn login_at(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<LoginResponse> {
        let Some(user) = self.store.get_user_by_username(username).await? else {
            // Unknown users cost one argon2 check, same as a wrong password.
            self.hasher
                .verify_blocking(password.to_string(), self.hasher.dummy_digest())
                .await?;
            tracing::info!(%username, "login failed: unknown user");
            return Err(DomainError::unauthenticated(BAD_CREDENTIALS));
        };
        let matches = self
            .hasher
            .verify_blocking(password.to_string(), user.password_hash.clone())
            .await?;
        if !matches {
            tracing::info!(%username, "login failed: wrong password");
            return Err(DomainError::unauthenticated(BAD_CREDENTIALS));
        }
        if !user.is_active {
            tracing::info!(%username, "login failed: account disabled");
            return Err(DomainError::unauthenticated(ACCOUNT_DISABLED));
        }

        let permissions = self.resolver.resolve(&user).await?;
        let subject = TokenSubject::new(user.id, user.username.clone())
            .with_roles(user.role_names().cloned())
            .with_permissions(permissions)
            .superuser(user.is_superuser);
        let issued = self.tokens.issue_at(&subject, now)?;

        self.store.touch_last_login(user.id, now).await?;
        tracing::info!(user_id = %user.id, %username, "login succeeded");

        Ok(LoginResponse {
            access_token: issued.token,
            token_type: "bearer",
            expires_in: issued.expires_in,
            user_id: user.id,
            username: user.username,
        })
    }
}
