use axum::Router;

pub mod auth;
pub mod permissions;
pub mod roles;
pub mod system;
pub mod users;

use omms_core::DomainError;
use serde::Serialize;

/// Router for every authenticated endpoint under `/auth`.
pub fn router() -> Router {
    Router::new()
        .merge(auth::router())
        .nest("/users", users::router())
        .nest("/roles", roles::router())
        .nest("/permissions", permissions::router())
}

/// Body returned by delete and detach endpoints.
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: &'static str,
}

/// Parse a numeric path segment into a typed id (400 on garbage).
pub fn parse_id<T>(raw: &str) -> Result<T, DomainError>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.parse()
}
