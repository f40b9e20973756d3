//! Service wiring: one credential store shared by the directory and login.

use std::sync::Arc;

use anyhow::Context;

use omms_auth::{PasswordHasher, TokenConfig, TokenService};
use omms_infra::{
    BootstrapReport, Directory, InMemoryCredentialStore, LoginService, PermissionResolver,
    PostgresCredentialStore, SharedCredentialStore, bootstrap,
};

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub directory: Directory,
    pub login: LoginService,
}

impl AppState {
    pub fn new(store: SharedCredentialStore, hasher: PasswordHasher, tokens: TokenService) -> Self {
        Self {
            directory: Directory::new(store.clone(), hasher.clone()),
            login: LoginService::new(store, hasher, tokens),
        }
    }

    pub fn tokens(&self) -> &TokenService {
        self.login.tokens()
    }

    pub fn resolver(&self) -> &PermissionResolver {
        self.login.resolver()
    }

    /// Seed the built-in admin, roles and permission catalog.
    pub async fn bootstrap(&self, admin_password: &str) -> anyhow::Result<BootstrapReport> {
        bootstrap(&self.directory, admin_password)
            .await
            .context("bootstrap seeding failed")
    }
}

/// Build the store, hasher and token service described by `config`, then seed.
pub async fn build_state(config: &AppConfig) -> anyhow::Result<Arc<AppState>> {
    let store: SharedCredentialStore = match &config.database_url {
        Some(url) => {
            let pg = PostgresCredentialStore::connect(url)
                .await
                .context("failed to connect to Postgres")?;
            pg.migrate().await.context("schema migration failed")?;
            tracing::info!("using Postgres credential store");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("OMMS_DATABASE_URL not set; using in-memory credential store");
            Arc::new(InMemoryCredentialStore::new())
        }
    };

    let hasher = PasswordHasher::new(config.password_hash_cost).context("invalid password hash cost")?;
    let tokens = TokenService::new(&TokenConfig::new(config.jwt_secret.clone()).with_ttl(config.token_ttl))
        .context("invalid token configuration")?;

    let state = AppState::new(store, hasher, tokens);
    state.bootstrap(&config.admin_password).await?;
    Ok(Arc::new(state))
}
