//! Process configuration, read once at startup from `OMMS_*` variables.

use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;

use omms_auth::catalog::DEFAULT_ADMIN_PASSWORD;
use omms_auth::token::DEFAULT_TOKEN_TTL_MINUTES;
use omms_observability::LogFormat;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_PASSWORD_HASH_COST: u32 = 2;
const DEV_JWT_SECRET: &str = "omms-dev-secret";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set when OMMS_ENV is '{1}'")]
    Missing(&'static str, String),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Deployment mode. Only `dev` tolerates a missing signing secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Other(String),
}

impl Environment {
    fn parse(raw: Option<String>) -> Self {
        match raw.as_deref().map(str::trim) {
            None | Some("") | Some("dev") | Some("development") => Environment::Dev,
            Some(other) => Environment::Other(other.to_string()),
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Environment::Dev)
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// True when `jwt_secret` fell back to the built-in dev value.
    pub insecure_secret: bool,
    pub token_ttl: Duration,
    pub database_url: Option<String>,
    pub admin_password: String,
    pub password_hash_cost: u32,
    pub log_format: LogFormat,
}

impl core::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"[REDACTED]")
            .field("insecure_secret", &self.insecure_secret)
            .field("token_ttl", &self.token_ttl)
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("admin_password", &"[REDACTED]")
            .field("password_hash_cost", &self.password_hash_cost)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl AppConfig {
    /// Load `.env` (if present), then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let environment = Environment::parse(var("OMMS_ENV"));

        let bind_addr = var("OMMS_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| invalid("OMMS_BIND_ADDR", e))?;

        let explicit_secret = var("OMMS_JWT_SECRET");
        let insecure_secret = explicit_secret.is_none();
        let jwt_secret = match (explicit_secret, &environment) {
            (Some(secret), _) => secret,
            (None, Environment::Dev) => DEV_JWT_SECRET.to_string(),
            (None, Environment::Other(name)) => {
                return Err(ConfigError::Missing("OMMS_JWT_SECRET", name.clone()));
            }
        };

        let ttl_minutes = match var("OMMS_TOKEN_TTL_MINUTES") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map_err(|e| invalid("OMMS_TOKEN_TTL_MINUTES", e))?,
            None => DEFAULT_TOKEN_TTL_MINUTES,
        };
        if ttl_minutes <= 0 {
            return Err(invalid("OMMS_TOKEN_TTL_MINUTES", "must be positive"));
        }
        let token_ttl = Duration::try_minutes(ttl_minutes)
            .ok_or_else(|| invalid("OMMS_TOKEN_TTL_MINUTES", "too large"))?;

        let password_hash_cost = match var("OMMS_PASSWORD_HASH_COST") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid("OMMS_PASSWORD_HASH_COST", e))?,
            None => DEFAULT_PASSWORD_HASH_COST,
        };
        if password_hash_cost == 0 {
            return Err(invalid("OMMS_PASSWORD_HASH_COST", "must be at least 1"));
        }

        let log_format = match var("OMMS_LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|e| invalid("OMMS_LOG_FORMAT", e))?,
            None => LogFormat::default(),
        };

        Ok(Self {
            environment,
            bind_addr,
            jwt_secret,
            insecure_secret,
            token_ttl,
            database_url: var("OMMS_DATABASE_URL"),
            admin_password: var("OMMS_ADMIN_PASSWORD")
                .unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.to_string()),
            password_hash_cost,
            log_format,
        })
    }
}

fn invalid(var: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_in_dev() {
        let cfg = load(&[]).unwrap();
        assert!(cfg.environment.is_dev());
        assert_eq!(cfg.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert!(cfg.insecure_secret);
        assert_eq!(cfg.token_ttl, Duration::minutes(30));
        assert_eq!(cfg.database_url, None);
        assert_eq!(cfg.admin_password, "Admin@123");
        assert_eq!(cfg.password_hash_cost, 2);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn explicit_values_are_honoured() {
        let cfg = load(&[
            ("OMMS_BIND_ADDR", "127.0.0.1:9000"),
            ("OMMS_JWT_SECRET", "s3cret"),
            ("OMMS_TOKEN_TTL_MINUTES", "5"),
            ("OMMS_DATABASE_URL", "postgres://localhost/omms"),
            ("OMMS_ADMIN_PASSWORD", "Changed!1"),
            ("OMMS_PASSWORD_HASH_COST", "3"),
            ("OMMS_LOG_FORMAT", "pretty"),
        ])
        .unwrap();
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.jwt_secret, "s3cret");
        assert!(!cfg.insecure_secret);
        assert_eq!(cfg.token_ttl, Duration::minutes(5));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/omms"));
        assert_eq!(cfg.admin_password, "Changed!1");
        assert_eq!(cfg.password_hash_cost, 3);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn production_requires_a_secret() {
        let err = load(&[("OMMS_ENV", "production")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("OMMS_JWT_SECRET", _)));
        assert!(load(&[("OMMS_ENV", "production"), ("OMMS_JWT_SECRET", "x")]).is_ok());
    }

    #[test]
    fn bad_values_are_rejected() {
        for (var, value) in [
            ("OMMS_BIND_ADDR", "not-an-addr"),
            ("OMMS_TOKEN_TTL_MINUTES", "0"),
            ("OMMS_TOKEN_TTL_MINUTES", "soon"),
            ("OMMS_TOKEN_TTL_MINUTES", "200000000000000"),
            ("OMMS_PASSWORD_HASH_COST", "0"),
            ("OMMS_LOG_FORMAT", "xml"),
        ] {
            let err = load(&[(var, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{var}={value}"
            );
        }
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = load(&[("OMMS_JWT_SECRET", "hunter2"), ("OMMS_ADMIN_PASSWORD", "pw-pw-pw")]).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("pw-pw-pw"));
    }
}
